//! Identity map scoped to one materialization pass

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::value::KeyValue;

/// Arena index of a materialized entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityId(pub usize);

/// Entity type plus primary key value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EntityIdentity {
    pub entity_type: String,
    pub key: KeyValue,
}

impl EntityIdentity {
    pub fn new(entity_type: &str, key: KeyValue) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            key,
        }
    }
}

impl fmt::Display for EntityIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.entity_type, self.key)
    }
}

/// Maps identities to the single instance materialized for them
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<EntityIdentity, EntityId>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &EntityIdentity) -> Option<EntityId> {
        self.entries.get(identity).copied()
    }

    /// Returns the existing instance, or registers `id` for the identity.
    /// The boolean is true when the identity was already known.
    pub fn get_or_insert(&mut self, identity: EntityIdentity, id: EntityId) -> (EntityId, bool) {
        match self.entries.get(&identity) {
            Some(existing) => (*existing, true),
            None => {
                self.entries.insert(identity, id);
                (id, false)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_type_scoped() {
        let mut map = IdentityMap::new();

        let order = EntityIdentity::new("Order", KeyValue::Int(1));
        let (first, known) = map.get_or_insert(order.clone(), EntityId(0));
        assert!(!known);
        let (again, known) = map.get_or_insert(order, EntityId(5));
        assert!(known);
        assert_eq!(first, again);

        let (other, known) =
            map.get_or_insert(EntityIdentity::new("Customer", KeyValue::Int(1)), EntityId(1));
        assert!(!known);
        assert_ne!(first, other);
        assert_eq!(map.len(), 2);
    }
}
