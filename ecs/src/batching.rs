use std::any::TypeId;
use std::collections::HashMap;

use crate::access::LockSet;
use crate::schedule::{ScheduleError, TagRef};
use crate::system::SystemId;

/// One parallel batch of the async plan: the member systems plus the
/// union of their lock sets.
///
/// A candidate conflicts with some member iff it conflicts with the
/// union, because every conflict rule is a set-membership test.
#[derive(Default)]
pub(crate) struct Batch {
    pub(crate) members: Vec<SystemId>,
    pub(crate) locks: LockSet,
}

/// Incremental builder of the async phase's batch plan.
///
/// Systems are inserted in declaration order; each lands in the first
/// batch that has no lock conflict and lies after every `run_after`
/// predecessor. The result is deterministic and order-stable.
#[derive(Default)]
pub(crate) struct BatchPlan {
    batches: Vec<Batch>,
    /// Batch index of every placed system, keyed by system tag.
    placed: HashMap<TypeId, usize>,
}

impl BatchPlan {
    /// Places one system, returning the index of the batch it joined.
    ///
    /// Fails with [`ScheduleError::UnknownPredecessor`] if a
    /// `run_after` tag has not been placed yet; declaration order is
    /// significant, and forward references would allow cycles.
    pub(crate) fn insert(
        &mut self,
        id: SystemId,
        tag: TypeId,
        name: &'static str,
        locks: &LockSet,
        run_after: &[TagRef],
    ) -> Result<usize, ScheduleError> {
        let mut start = 0;
        for predecessor in run_after {
            match self.placed.get(&predecessor.type_id) {
                Some(&index) => start = start.max(index + 1),
                None => {
                    return Err(ScheduleError::UnknownPredecessor {
                        system: name,
                        predecessor: predecessor.name,
                    });
                }
            }
        }

        let found = self
            .batches
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, batch)| !batch.locks.conflicts_with(locks))
            .map(|(index, _)| index);

        let index = match found {
            Some(index) => index,
            None => {
                self.batches.push(Batch::default());
                self.batches.len() - 1
            }
        };

        let batch = &mut self.batches[index];
        batch.members.push(id);
        batch.locks.extend(locks);
        self.placed.insert(tag, index);
        Ok(index)
    }

    pub(crate) fn into_batches(self) -> Vec<Vec<SystemId>> {
        self.batches.into_iter().map(|batch| batch.members).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;

    #[derive(Clone)]
    struct C1;
    impl Component for C1 {}

    #[derive(Clone)]
    struct C2;
    impl Component for C2 {}

    #[derive(Clone)]
    struct C3;
    impl Component for C3 {}

    #[derive(Clone)]
    struct TagT;
    impl Component for TagT {}

    struct SysA;
    struct SysB;
    struct SysC;

    fn tag<T: 'static>() -> TypeId {
        TypeId::of::<T>()
    }

    fn after<T: 'static>() -> TagRef {
        TagRef {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    #[test]
    fn no_constraints_first_fit_is_batch_zero() {
        let mut plan = BatchPlan::default();
        let index = plan
            .insert(SystemId(0), tag::<SysA>(), "a", &LockSet::new().add::<C1>(), &[])
            .unwrap();
        assert_eq!(index, 0);
    }

    #[test]
    fn lock_conflict_forces_new_batch() {
        // A locks [C1], B locks [C1], C locks [C2] => [[A, C], [B]]
        let mut plan = BatchPlan::default();
        plan.insert(SystemId(0), tag::<SysA>(), "a", &LockSet::new().add::<C1>(), &[])
            .unwrap();
        let b = plan
            .insert(SystemId(1), tag::<SysB>(), "b", &LockSet::new().add::<C1>(), &[])
            .unwrap();
        let c = plan
            .insert(SystemId(2), tag::<SysC>(), "c", &LockSet::new().add::<C2>(), &[])
            .unwrap();
        assert_eq!(b, 1);
        assert_eq!(c, 0);

        let batches = plan.into_batches();
        assert_eq!(batches, vec![vec![SystemId(0), SystemId(2)], vec![SystemId(1)]]);
    }

    #[test]
    fn scoped_lock_conflicts_with_bare() {
        // A locks [C1], B locks [(C1, TagT)] => [[A], [B]]
        let mut plan = BatchPlan::default();
        plan.insert(SystemId(0), tag::<SysA>(), "a", &LockSet::new().add::<C1>(), &[])
            .unwrap();
        let b = plan
            .insert(
                SystemId(1),
                tag::<SysB>(),
                "b",
                &LockSet::new().add_scoped::<C1, TagT>(),
                &[],
            )
            .unwrap();
        assert_eq!(b, 1);
    }

    #[test]
    fn run_after_skips_predecessor_batch() {
        // C has no conflicts but runs after A, so it may not share A's
        // batch: [[A, B], [C]]
        let mut plan = BatchPlan::default();
        plan.insert(SystemId(0), tag::<SysA>(), "a", &LockSet::new().add::<C1>(), &[])
            .unwrap();
        plan.insert(SystemId(1), tag::<SysB>(), "b", &LockSet::new().add::<C2>(), &[])
            .unwrap();
        let c = plan
            .insert(
                SystemId(2),
                tag::<SysC>(),
                "c",
                &LockSet::new().add::<C3>(),
                &[after::<SysA>()],
            )
            .unwrap();
        assert_eq!(c, 1);

        let batches = plan.into_batches();
        assert_eq!(batches, vec![vec![SystemId(0), SystemId(1)], vec![SystemId(2)]]);
    }

    #[test]
    fn run_after_takes_latest_predecessor() {
        let mut plan = BatchPlan::default();
        plan.insert(SystemId(0), tag::<SysA>(), "a", &LockSet::new().add::<C1>(), &[])
            .unwrap();
        // B conflicts with A -> batch 1.
        plan.insert(SystemId(1), tag::<SysB>(), "b", &LockSet::new().add::<C1>(), &[])
            .unwrap();
        // C runs after both; B sits in batch 1, so C goes to batch 2.
        let c = plan
            .insert(
                SystemId(2),
                tag::<SysC>(),
                "c",
                &LockSet::new().add::<C3>(),
                &[after::<SysA>(), after::<SysB>()],
            )
            .unwrap();
        assert_eq!(c, 2);
    }

    #[test]
    fn unknown_predecessor_is_rejected() {
        let mut plan = BatchPlan::default();
        let err = plan
            .insert(
                SystemId(0),
                tag::<SysA>(),
                "a",
                &LockSet::new(),
                &[after::<SysB>()],
            )
            .unwrap_err();
        match err {
            ScheduleError::UnknownPredecessor { system, .. } => assert_eq!(system, "a"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn every_system_lands_in_exactly_one_batch() {
        let tags = [
            tag::<(SysA, C1)>(),
            tag::<(SysA, C2)>(),
            tag::<(SysA, C3)>(),
            tag::<(SysB, C1)>(),
            tag::<(SysB, C2)>(),
            tag::<(SysB, C3)>(),
            tag::<(SysC, C1)>(),
            tag::<(SysC, C2)>(),
            tag::<(SysC, C3)>(),
            tag::<(SysA, TagT)>(),
        ];

        let mut plan = BatchPlan::default();
        for (i, &system_tag) in tags.iter().enumerate() {
            let locks = if i % 2 == 0 {
                LockSet::new().add::<C1>()
            } else {
                LockSet::new().add::<C2>()
            };
            plan.insert(SystemId(i), system_tag, "s", &locks, &[]).unwrap();
        }

        let batches = plan.into_batches();
        let mut seen = std::collections::HashSet::new();
        for batch in &batches {
            for id in batch {
                assert!(seen.insert(*id), "system placed twice");
            }
        }
        assert_eq!(seen.len(), 10);
        // Five C1-lockers and five C2-lockers pair up across five batches.
        assert_eq!(batches.len(), 5);
        for batch in &batches {
            assert_eq!(batch.len(), 2);
        }
    }
}
