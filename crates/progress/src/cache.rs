//! Memoized unlock decisions.

use std::collections::{BTreeMap, BTreeSet};
use waypoint_core::{LevelKey, ModuleId};

/// Level unlock answers keyed by `"{module}-{level}"`, plus the set of
/// modules whose snapshot is currently being fetched.
#[derive(Debug, Default, Clone)]
pub struct UnlockCache {
    entries: BTreeMap<LevelKey, bool>,
    loading: BTreeSet<ModuleId>,
}

impl UnlockCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached answer for a level.
    pub fn get(&self, key: LevelKey) -> Option<bool> {
        self.entries.get(&key).copied()
    }

    /// Remember an answer.
    pub fn insert(&mut self, key: LevelKey, unlocked: bool) {
        self.entries.insert(key, unlocked);
    }

    /// Evict every entry of `module`. Returns how many were dropped.
    pub fn evict_module(&mut self, module: ModuleId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.module != module);
        before - self.entries.len()
    }

    /// Drop everything, including loading marks.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.loading.clear();
    }

    /// Mark a module snapshot as in flight.
    pub fn begin_loading(&mut self, module: ModuleId) {
        self.loading.insert(module);
    }

    /// Clear the in-flight mark.
    pub fn finish_loading(&mut self, module: ModuleId) {
        self.loading.remove(&module);
    }

    /// Whether a snapshot for `module` is in flight.
    pub fn is_loading(&self, module: ModuleId) -> bool {
        self.loading.contains(&module)
    }

    /// Number of cached answers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::LevelId;

    #[test]
    fn test_evict_matches_whole_module_id() {
        let mut cache = UnlockCache::new();
        cache.insert(LevelKey::new(ModuleId(1), LevelId(2)), true);
        cache.insert(LevelKey::new(ModuleId(1), LevelId(3)), false);
        cache.insert(LevelKey::new(ModuleId(11), LevelId(2)), true);

        assert_eq!(cache.evict_module(ModuleId(1)), 2);
        assert_eq!(cache.get(LevelKey::new(ModuleId(11), LevelId(2))), Some(true));
        assert_eq!(cache.evict_module(ModuleId(1)), 0);
    }
}
