use std::any::TypeId;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::stores::Stores;
use crate::world::WorldError;

/// Dense index of a run condition in the schedule's condition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ConditionId(pub(crate) usize);

/// Dedup identity of a run condition.
///
/// State checks are identified by state type and variant hash so the
/// same gate declared on many systems (directly or through system-set
/// merging) evaluates once per frame. User predicates are identified
/// by the address of their shared closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ConditionKey {
    StateEq(TypeId, u64),
    StateNot(TypeId, u64),
    Predicate(usize),
}

/// A run condition ready for evaluation.
pub(crate) struct StoredCondition {
    /// Human-readable label for error reporting.
    pub(crate) label: String,
    pub(crate) eval: Arc<dyn Fn(&Stores) -> bool + Send + Sync>,
}

/// Interns run conditions, assigning one [`ConditionId`] per distinct
/// [`ConditionKey`].
#[derive(Default)]
pub(crate) struct ConditionTable {
    ids: HashMap<ConditionKey, ConditionId>,
    stored: Vec<StoredCondition>,
}

impl ConditionTable {
    pub(crate) fn intern(
        &mut self,
        key: ConditionKey,
        label: String,
        eval: Arc<dyn Fn(&Stores) -> bool + Send + Sync>,
    ) -> ConditionId {
        if let Some(&id) = self.ids.get(&key) {
            return id;
        }
        let id = ConditionId(self.stored.len());
        self.ids.insert(key, id);
        self.stored.push(StoredCondition { label, eval });
        id
    }

    pub(crate) fn into_conditions(self) -> Vec<StoredCondition> {
        self.stored
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.stored.len()
    }
}

/// Per-frame boolean values of every run condition.
///
/// Refreshed once at the start of each frame by the driver; read-only
/// while systems run.
#[derive(Debug, Default)]
pub(crate) struct ConditionCache {
    values: Vec<bool>,
}

impl ConditionCache {
    /// Evaluates every condition exactly once against the stores.
    ///
    /// A panicking predicate is a fatal frame error: it is the Rust
    /// rendition of a condition failing to produce a boolean.
    pub(crate) fn refresh(
        conditions: &[StoredCondition],
        stores: &Stores,
    ) -> Result<Self, WorldError> {
        let mut values = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let eval = &condition.eval;
            match catch_unwind(AssertUnwindSafe(|| eval(stores))) {
                Ok(value) => values.push(value),
                Err(_) => {
                    return Err(WorldError::BadCondition {
                        condition: condition.label.clone(),
                    });
                }
            }
        }
        Ok(Self { values })
    }

    /// Returns whether every listed condition holds (conjunction).
    pub(crate) fn passes(&self, ids: &[ConditionId]) -> bool {
        ids.iter().all(|id| self.values[id.0])
    }
}
