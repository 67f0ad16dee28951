/// An opaque entity identifier grouping components.
///
/// Entities carry no data of their own; they are keys into the shared
/// component table. Identity allocation is handled by
/// [`Stores::spawn_entity`](crate::Stores::spawn_entity).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    id: u64,
}

impl Entity {
    /// Creates an entity from a raw identifier.
    ///
    /// Useful for stable ids originating outside the world (e.g. a
    /// network session id). The caller is responsible for keeping raw
    /// ids disjoint from world-allocated ones.
    pub fn from_raw(id: u64) -> Self {
        Self { id }
    }

    /// Returns the raw identifier backing this entity.
    pub fn to_raw(self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({})", self.id)
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({})", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trip() {
        let e = Entity::from_raw(17);
        assert_eq!(e.to_raw(), 17);
        assert_eq!(e, Entity::from_raw(17));
        assert_ne!(e, Entity::from_raw(18));
    }

    #[test]
    fn debug_format() {
        let e = Entity::from_raw(3);
        assert_eq!(format!("{e:?}"), "Entity(3)");
    }
}
