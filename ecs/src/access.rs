use std::any::TypeId;
use std::collections::HashSet;

use crate::component::Component;

/// Static declaration of the component types a system may mutate.
///
/// A lock entry is either a bare component type `C` (the system may
/// mutate `C` on any entity) or a pair `(C, T)` where `T` is a tag
/// component scoping the mutation to entities carrying `T`.
///
/// The schedule builder uses lock sets to decide which async systems
/// can share a batch: two systems may run in parallel iff their lock
/// sets do not conflict.
#[derive(Debug, Clone, Default)]
pub struct LockSet {
    /// Bare component locks.
    bare: HashSet<TypeId>,
    /// Entity-tag scoped locks, keyed `(component, tag)`.
    scoped: HashSet<(TypeId, TypeId)>,
    /// Component halves of the scoped locks, for the bare-vs-scoped check.
    scoped_components: HashSet<TypeId>,
}

impl LockSet {
    /// Creates an empty lock set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a bare lock on component type `C`.
    pub fn add<C: Component>(mut self) -> Self {
        self.bare.insert(TypeId::of::<C>());
        self
    }

    /// Declares a lock on component type `C` scoped to entities
    /// carrying the tag component `T`.
    pub fn add_scoped<C: Component, T: Component>(mut self) -> Self {
        self.scoped.insert((TypeId::of::<C>(), TypeId::of::<T>()));
        self.scoped_components.insert(TypeId::of::<C>());
        self
    }

    /// Returns whether no locks are declared.
    pub fn is_empty(&self) -> bool {
        self.bare.is_empty() && self.scoped.is_empty()
    }

    /// Returns whether this lock set conflicts with another.
    ///
    /// Two lock sets conflict iff any of:
    /// - they share a bare component type;
    /// - one holds bare `C` and the other holds `(C, _)` for the same `C`;
    /// - they share an identical `(C, T)` pair.
    pub fn conflicts_with(&self, other: &LockSet) -> bool {
        if self.bare.iter().any(|c| other.bare.contains(c)) {
            return true;
        }
        if self.bare.iter().any(|c| other.scoped_components.contains(c)) {
            return true;
        }
        if other.bare.iter().any(|c| self.scoped_components.contains(c)) {
            return true;
        }
        self.scoped.iter().any(|pair| other.scoped.contains(pair))
    }

    /// Returns whether a write to component type `id` is covered by
    /// this lock set, through either a bare or a scoped entry.
    pub(crate) fn covers(&self, id: TypeId) -> bool {
        self.bare.contains(&id) || self.scoped_components.contains(&id)
    }

    /// Merges another lock set into this one.
    ///
    /// Used by the batching analyzer to maintain the union of all
    /// locks held by a batch.
    pub(crate) fn extend(&mut self, other: &LockSet) {
        self.bare.extend(other.bare.iter().copied());
        self.scoped.extend(other.scoped.iter().copied());
        self.scoped_components
            .extend(other.scoped_components.iter().copied());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct CompA;
    impl Component for CompA {}

    #[derive(Clone)]
    struct CompB;
    impl Component for CompB {}

    #[derive(Clone)]
    struct TagT;
    impl Component for TagT {}

    #[derive(Clone)]
    struct TagU;
    impl Component for TagU {}

    #[test]
    fn empty_sets_no_conflict() {
        assert!(!LockSet::new().conflicts_with(&LockSet::new()));
    }

    #[test]
    fn disjoint_bare_no_conflict() {
        let a = LockSet::new().add::<CompA>();
        let b = LockSet::new().add::<CompB>();
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn shared_bare_conflicts() {
        let a = LockSet::new().add::<CompA>();
        let b = LockSet::new().add::<CompA>();
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn bare_vs_scoped_same_component_conflicts() {
        let a = LockSet::new().add::<CompA>();
        let b = LockSet::new().add_scoped::<CompA, TagT>();
        assert!(a.conflicts_with(&b));
        assert!(b.conflicts_with(&a));
    }

    #[test]
    fn identical_scoped_pair_conflicts() {
        let a = LockSet::new().add_scoped::<CompA, TagT>();
        let b = LockSet::new().add_scoped::<CompA, TagT>();
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn scoped_same_component_different_tags_no_conflict() {
        let a = LockSet::new().add_scoped::<CompA, TagT>();
        let b = LockSet::new().add_scoped::<CompA, TagU>();
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn scoped_different_components_no_conflict() {
        let a = LockSet::new().add_scoped::<CompA, TagT>();
        let b = LockSet::new().add_scoped::<CompB, TagT>();
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn covers_bare_and_scoped() {
        let locks = LockSet::new().add::<CompA>().add_scoped::<CompB, TagT>();
        assert!(locks.covers(TypeId::of::<CompA>()));
        assert!(locks.covers(TypeId::of::<CompB>()));
        assert!(!locks.covers(TypeId::of::<TagT>()));
    }

    #[test]
    fn extend_unions_locks() {
        let mut a = LockSet::new().add::<CompA>();
        let b = LockSet::new().add_scoped::<CompB, TagT>();
        a.extend(&b);

        let bare_b = LockSet::new().add::<CompB>();
        assert!(a.conflicts_with(&bare_b));
        let bare_a = LockSet::new().add::<CompA>();
        assert!(a.conflicts_with(&bare_a));
    }
}
