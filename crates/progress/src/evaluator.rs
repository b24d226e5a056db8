//! Unlock and completion decisions.
//!
//! Rules:
//! - level 1 of any module is unlocked;
//! - level N > 1 is unlocked iff level N-1 of the same module is completed;
//! - module 1 is unlocked; module M > 1 is unlocked iff module M-1 is completed;
//! - a module is completed iff every one of its levels is completed.
//!
//! Answers come from the replica, never from the remote store. When the data
//! needed for an answer has not been fetched (or is still being fetched) the
//! answer is "locked", and that uncertain answer is not memoized: a slow
//! network must never make content appear unlocked, and a level only turns
//! unlocked once confirmed data says so.

use tracing::debug;
use waypoint_core::{Curriculum, LevelId, LevelKey, ModuleId, ProgressSummary, UnlockStatus};

use crate::context::ContextState;

/// Pure unlock logic over a [`ContextState`].
#[derive(Debug, Clone)]
pub struct UnlockEvaluator {
    curriculum: Curriculum,
}

impl UnlockEvaluator {
    /// Evaluator for `curriculum`.
    pub fn new(curriculum: Curriculum) -> Self {
        Self { curriculum }
    }

    /// Module and level layout.
    pub fn curriculum(&self) -> &Curriculum {
        &self.curriculum
    }

    /// Whether a level may be played. Memoized per `"{module}-{level}"`.
    pub fn is_level_unlocked(&self, state: &mut ContextState, module: ModuleId, level: LevelId) -> bool {
        if level.is_first() {
            return true;
        }
        let key = LevelKey::new(module, level);
        if let Some(hit) = state.cache.get(key) {
            return hit;
        }
        if state.user.is_none() {
            return false;
        }
        if state.cache.is_loading(module) || !state.replica.is_loaded(module) {
            debug!(%key, "module snapshot not ready, failing locked");
            return false;
        }
        if !self.curriculum.contains_level(module, level) {
            debug!(%key, "level outside curriculum, failing locked");
            return false;
        }

        let unlocked = level
            .previous()
            .and_then(|prev| state.replica.level(LevelKey::new(module, prev)))
            .map(|r| r.is_completed)
            .unwrap_or(false);
        state.cache.insert(key, unlocked);
        unlocked
    }

    /// Whether a level has a confirmed completed record.
    pub fn is_level_completed(&self, state: &ContextState, module: ModuleId, level: LevelId) -> bool {
        state.user.is_some()
            && state
                .replica
                .level(LevelKey::new(module, level))
                .map(|r| r.is_completed)
                .unwrap_or(false)
    }

    /// Tri-state status of a level.
    pub fn level_status(&self, state: &mut ContextState, module: ModuleId, level: LevelId) -> UnlockStatus {
        let completed = self.is_level_completed(state, module, level);
        let unlocked = self.is_level_unlocked(state, module, level);
        UnlockStatus::from_flags(unlocked, completed)
    }

    /// Whether every level of a module is complete.
    ///
    /// Uses the module's level snapshot when loaded, otherwise the module
    /// record's flag; with neither available the module is not complete.
    pub fn is_module_completed(&self, state: &ContextState, module: ModuleId) -> bool {
        if state.user.is_none() {
            return false;
        }
        let Some(total) = self.curriculum.level_count(module) else {
            return false;
        };
        if state.replica.is_loaded(module)
            && !state.cache.is_loading(module)
            && state.replica.module_progress(module).all_completed(total)
        {
            return true;
        }
        state
            .replica
            .module(module)
            .map(|r| r.is_completed)
            .unwrap_or(false)
    }

    /// Whether a module may be played.
    pub fn is_module_unlocked(&self, state: &ContextState, module: ModuleId) -> bool {
        if module.is_first() {
            return true;
        }
        if !self.curriculum.contains(module) {
            return false;
        }
        module
            .previous()
            .map(|prev| self.is_module_completed(state, prev))
            .unwrap_or(false)
    }

    /// Tri-state status of a module.
    pub fn module_status(&self, state: &ContextState, module: ModuleId) -> UnlockStatus {
        UnlockStatus::from_flags(
            self.is_module_unlocked(state, module),
            self.is_module_completed(state, module),
        )
    }

    /// Completed-count over total from the replica.
    pub fn summary(&self, state: &ContextState, module: ModuleId) -> ProgressSummary {
        let total = self.curriculum.level_count(module).unwrap_or(0);
        let completed = if state.user.is_some() {
            state.replica.module_progress(module).completed_count(total)
        } else {
            0
        };
        ProgressSummary {
            module_id: module,
            completed,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use waypoint_core::{LevelProgressRecord, ModuleProgressRecord, UserId};

    fn signed_in() -> ContextState {
        ContextState {
            user: Some(UserId::new("u")),
            ..Default::default()
        }
    }

    fn done(module: u32, level: u32) -> LevelProgressRecord {
        LevelProgressRecord::started(UserId::new("u"), ModuleId(module), LevelId(level), Utc::now())
            .completed(Utc::now())
    }

    fn evaluator() -> UnlockEvaluator {
        UnlockEvaluator::new(Curriculum::default())
    }

    #[test]
    fn test_level_one_always_unlocked() {
        let eval = evaluator();
        let mut state = ContextState::default();
        for module in 1..=7 {
            assert!(eval.is_level_unlocked(&mut state, ModuleId(module), LevelId(1)));
        }
    }

    #[test]
    fn test_unlock_follows_previous_level() {
        let eval = evaluator();
        let mut state = signed_in();
        state.replica.load_module_levels(ModuleId(3), &[done(3, 1)]);

        assert!(eval.is_level_unlocked(&mut state, ModuleId(3), LevelId(2)));
        assert!(!eval.is_level_unlocked(&mut state, ModuleId(3), LevelId(3)));
        assert_eq!(eval.level_status(&mut state, ModuleId(3), LevelId(1)), UnlockStatus::Completed);
        assert_eq!(eval.level_status(&mut state, ModuleId(3), LevelId(2)), UnlockStatus::Available);
        assert_eq!(eval.level_status(&mut state, ModuleId(3), LevelId(3)), UnlockStatus::Locked);
    }

    #[test]
    fn test_fail_locked_while_not_loaded() {
        let eval = evaluator();
        let mut state = signed_in();
        // Confirmed data for level 1 exists but the module snapshot is not complete.
        state.replica.apply_level(&done(2, 1));
        assert!(!eval.is_level_unlocked(&mut state, ModuleId(2), LevelId(2)));
        assert!(state.cache.is_empty(), "uncertain answers are not memoized");

        state.replica.load_module_levels(ModuleId(2), &[]);
        state.cache.begin_loading(ModuleId(2));
        assert!(!eval.is_level_unlocked(&mut state, ModuleId(2), LevelId(2)));

        state.cache.finish_loading(ModuleId(2));
        assert!(eval.is_level_unlocked(&mut state, ModuleId(2), LevelId(2)));
    }

    #[test]
    fn test_cached_answer_survives_reload_until_evicted() {
        let eval = evaluator();
        let mut state = signed_in();
        state.replica.load_module_levels(ModuleId(1), &[done(1, 1)]);
        assert!(eval.is_level_unlocked(&mut state, ModuleId(1), LevelId(2)));

        // A refresh in flight does not flip a confirmed answer back to locked.
        state.cache.begin_loading(ModuleId(1));
        assert!(eval.is_level_unlocked(&mut state, ModuleId(1), LevelId(2)));
    }

    #[test]
    fn test_level_outside_curriculum_is_locked() {
        let eval = evaluator();
        let mut state = signed_in();
        let levels: Vec<_> = (1..=4).map(|l| done(1, l)).collect();
        state.replica.load_module_levels(ModuleId(1), &levels);
        assert!(!eval.is_level_unlocked(&mut state, ModuleId(1), LevelId(5)));
    }

    #[test]
    fn test_module_completion_unlocks_next() {
        let eval = evaluator();
        let mut state = signed_in();
        let levels: Vec<_> = (1..=3).map(|l| done(2, l)).collect();
        state.replica.load_module_levels(ModuleId(2), &levels);
        assert!(!eval.is_module_completed(&state, ModuleId(2)));
        assert!(!eval.is_module_unlocked(&state, ModuleId(3)));

        state.replica.load_module_levels(ModuleId(2), &[done(2, 4)]);
        assert!(eval.is_module_completed(&state, ModuleId(2)));
        assert!(eval.is_module_unlocked(&state, ModuleId(3)));
        assert_eq!(eval.module_status(&state, ModuleId(2)), UnlockStatus::Completed);
        assert_eq!(eval.module_status(&state, ModuleId(4)), UnlockStatus::Locked);
    }

    #[test]
    fn test_module_record_used_when_levels_not_loaded() {
        let eval = evaluator();
        let mut state = signed_in();
        let mut record = ModuleProgressRecord::seeded(UserId::new("u"), ModuleId(1), Utc::now());
        record.is_completed = true;
        state.replica.load_modules(&[record]);

        assert!(eval.is_module_unlocked(&state, ModuleId(2)));
        assert!(!eval.is_module_unlocked(&state, ModuleId(3)));
        assert!(eval.is_module_unlocked(&state, ModuleId(1)));
    }

    #[test]
    fn test_signed_out_is_locked() {
        let eval = evaluator();
        let mut state = ContextState::default();
        state.replica.load_module_levels(ModuleId(1), &[done(1, 1)]);
        assert!(!eval.is_level_unlocked(&mut state, ModuleId(1), LevelId(2)));
        assert_eq!(eval.summary(&state, ModuleId(1)).completed, 0);
    }

    #[test]
    fn test_summary_counts_completed() {
        let eval = evaluator();
        let mut state = signed_in();
        state.replica.load_module_levels(ModuleId(4), &[done(4, 1), done(4, 2)]);
        let summary = eval.summary(&state, ModuleId(4));
        assert_eq!((summary.completed, summary.total), (2, 4));
        assert_eq!(summary.percentage(), 50.0);
    }
}
