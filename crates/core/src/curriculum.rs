//! Which modules exist and how many levels each one has.

use serde::{Deserialize, Serialize};
use crate::id::{LevelId, ModuleId};

/// One module of the curriculum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Module number
    pub id: ModuleId,
    /// Number of levels, numbered `1..=levels`
    pub levels: u32,
}

/// Ordered list of modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Curriculum {
    modules: Vec<ModuleSpec>,
}

impl Curriculum {
    /// Build from module specs; sorted by module id.
    pub fn new(mut modules: Vec<ModuleSpec>) -> Self {
        modules.sort_by_key(|m| m.id);
        modules.dedup_by_key(|m| m.id);
        Self { modules }
    }

    /// `count` modules with `levels` levels each.
    pub fn uniform(count: u32, levels: u32) -> Self {
        Self::new(
            (1..=count)
                .map(|id| ModuleSpec {
                    id: ModuleId(id),
                    levels,
                })
                .collect(),
        )
    }

    /// All modules, in order.
    pub fn modules(&self) -> &[ModuleSpec] {
        &self.modules
    }

    /// Module ids, in order.
    pub fn module_ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.modules.iter().map(|m| m.id)
    }

    /// Whether the module exists.
    pub fn contains(&self, module: ModuleId) -> bool {
        self.level_count(module).is_some()
    }

    /// Number of levels in a module.
    pub fn level_count(&self, module: ModuleId) -> Option<u32> {
        self.modules.iter().find(|m| m.id == module).map(|m| m.levels)
    }

    /// Whether the level exists in the module.
    pub fn contains_level(&self, module: ModuleId, level: LevelId) -> bool {
        self.level_count(module)
            .map(|n| level.0 >= 1 && level.0 <= n)
            .unwrap_or(false)
    }

    /// Levels of a module, in order. Empty for unknown modules.
    pub fn levels(&self, module: ModuleId) -> impl Iterator<Item = LevelId> {
        (1..=self.level_count(module).unwrap_or(0)).map(LevelId)
    }

    /// The module unlocked by completing `module`.
    pub fn next_module(&self, module: ModuleId) -> Option<ModuleId> {
        self.modules.iter().map(|m| m.id).find(|id| *id > module)
    }

    /// Modules must be numbered `1..=n` without gaps and have at least one level.
    pub fn validate(&self) -> Result<(), String> {
        if self.modules.is_empty() {
            return Err("curriculum has no modules".into());
        }
        for (idx, spec) in self.modules.iter().enumerate() {
            if spec.id.0 != idx as u32 + 1 {
                return Err(format!("module {} is out of sequence (expected {})", spec.id, idx + 1));
            }
            if spec.levels == 0 {
                return Err(format!("module {} has no levels", spec.id));
            }
        }
        Ok(())
    }
}

impl Default for Curriculum {
    fn default() -> Self {
        Self::uniform(5, 4)
    }
}
