//! Entity graph arena and result values

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::{HashMap, HashSet};

use crate::relationships::CollectionKind;
use crate::value::KeyValue;

use super::identity::{EntityId, EntityIdentity, IdentityMap};

/// Members of a collection navigation in attach order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionValue {
    pub kind: CollectionKind,
    pub members: Vec<EntityId>,
    #[serde(skip)]
    index: HashSet<EntityId>,
}

impl CollectionValue {
    fn new(kind: CollectionKind) -> Self {
        Self {
            kind,
            members: Vec::new(),
            index: HashSet::new(),
        }
    }

    /// Push a member unless it is already present
    fn push(&mut self, member: EntityId) -> bool {
        if !self.index.insert(member) {
            return false;
        }
        self.members.push(member);
        true
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains(&id)
    }
}

/// One materialized entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityData {
    pub identity: EntityIdentity,
    pub fields: Map<String, JsonValue>,
    /// Loaded reference navigations; `None` when loaded but absent
    pub references: HashMap<String, Option<EntityId>>,
    pub collections: HashMap<String, CollectionValue>,
}

impl EntityData {
    pub fn field(&self, name: &str) -> &JsonValue {
        self.fields.get(name).unwrap_or(&JsonValue::Null)
    }
}

/// Arena of entities addressed by [`EntityId`], one per identity
#[derive(Debug, Default)]
pub struct EntityGraph {
    entities: Vec<EntityData>,
    identities: IdentityMap,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the instance for an identity, creating it from `fields` on
    /// first sight. The boolean is true for a newly created instance.
    pub fn resolve(
        &mut self,
        entity_type: &str,
        key: KeyValue,
        fields: Map<String, JsonValue>,
    ) -> (EntityId, bool) {
        let identity = EntityIdentity::new(entity_type, key);
        let candidate = EntityId(self.entities.len());
        let (id, known) = self.identities.get_or_insert(identity.clone(), candidate);

        if !known {
            self.entities.push(EntityData {
                identity,
                fields,
                references: HashMap::new(),
                collections: HashMap::new(),
            });
        }
        (id, !known)
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntityData> {
        self.entities.get(id.0)
    }

    pub fn identity_of(&self, id: EntityId) -> Option<&EntityIdentity> {
        self.entity(id).map(|entity| &entity.identity)
    }

    pub fn find(&self, entity_type: &str, key: impl Into<KeyValue>) -> Option<EntityId> {
        self.identities
            .get(&EntityIdentity::new(entity_type, key.into()))
    }

    /// Target of a loaded reference navigation
    pub fn reference(&self, id: EntityId, navigation: &str) -> Option<EntityId> {
        self.entity(id)
            .and_then(|entity| entity.references.get(navigation).copied().flatten())
    }

    /// Returns true when the reference navigation was loaded, even if absent
    pub fn is_reference_loaded(&self, id: EntityId, navigation: &str) -> bool {
        self.entity(id)
            .map_or(false, |entity| entity.references.contains_key(navigation))
    }

    pub fn collection(&self, id: EntityId, navigation: &str) -> Option<&CollectionValue> {
        self.entity(id)
            .and_then(|entity| entity.collections.get(navigation))
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &EntityData)> {
        self.entities
            .iter()
            .enumerate()
            .map(|(index, entity)| (EntityId(index), entity))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Attach a reference; an absent target never overwrites a loaded one
    pub fn set_reference(&mut self, id: EntityId, navigation: &str, target: Option<EntityId>) {
        if let Some(entity) = self.entities.get_mut(id.0) {
            match (entity.references.get(navigation), target) {
                (Some(Some(_)), None) => {}
                _ => {
                    entity.references.insert(navigation.to_string(), target);
                }
            }
        }
    }

    /// Initialize a collection navigation as empty when not yet loaded
    pub fn ensure_collection(&mut self, id: EntityId, navigation: &str, kind: &CollectionKind) {
        if let Some(entity) = self.entities.get_mut(id.0) {
            entity
                .collections
                .entry(navigation.to_string())
                .or_insert_with(|| CollectionValue::new(kind.clone()));
        }
    }

    /// Append a member, keeping the first appearance of each identity.
    /// Returns true when the member was added.
    pub fn append(
        &mut self,
        id: EntityId,
        navigation: &str,
        kind: &CollectionKind,
        member: EntityId,
    ) -> bool {
        self.ensure_collection(id, navigation, kind);
        self.entities
            .get_mut(id.0)
            .and_then(|entity| entity.collections.get_mut(navigation))
            .map_or(false, |collection| collection.push(member))
    }
}

/// One materialized result value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ResultValue {
    Null,
    Scalar(JsonValue),
    Entity(EntityId),
    Record {
        type_name: Option<String>,
        fields: Vec<(String, ResultValue)>,
    },
    Collection {
        kind: CollectionKind,
        items: Vec<ResultValue>,
    },
    Grouping {
        key: Box<ResultValue>,
        elements: Vec<ResultValue>,
    },
}

impl ResultValue {
    /// Convert a plain JSON value; objects become anonymous records
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => ResultValue::Null,
            JsonValue::Object(map) => ResultValue::Record {
                type_name: None,
                fields: map
                    .iter()
                    .map(|(name, value)| (name.clone(), ResultValue::from_json(value)))
                    .collect(),
            },
            JsonValue::Array(items) => ResultValue::Collection {
                kind: CollectionKind::List,
                items: items.iter().map(ResultValue::from_json).collect(),
            },
            other => ResultValue::Scalar(other.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ResultValue::Null)
    }

    pub fn as_entity(&self) -> Option<EntityId> {
        match self {
            ResultValue::Entity(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&JsonValue> {
        match self {
            ResultValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Field of a record value
    pub fn field(&self, name: &str) -> Option<&ResultValue> {
        match self {
            ResultValue::Record { fields, .. } => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Items of a collection or elements of a grouping
    pub fn items(&self) -> &[ResultValue] {
        match self {
            ResultValue::Collection { items, .. } => items,
            ResultValue::Grouping { elements, .. } => elements,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_returns_single_instance() {
        let mut graph = EntityGraph::new();
        let (first, created) = graph.resolve("Customer", KeyValue::Int(1), Map::new());
        assert!(created);
        let (second, created) = graph.resolve("Customer", KeyValue::Int(1), Map::new());
        assert!(!created);

        assert_eq!(first, second);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.find("Customer", 1i64), Some(first));
    }

    #[test]
    fn test_append_keeps_first_appearance() {
        let mut graph = EntityGraph::new();
        let (customer, _) = graph.resolve("Customer", KeyValue::Int(1), Map::new());
        let (order, _) = graph.resolve("Order", KeyValue::Int(10), Map::new());

        assert!(graph.append(customer, "Orders", &CollectionKind::List, order));
        assert!(!graph.append(customer, "Orders", &CollectionKind::List, order));

        let orders = graph.collection(customer, "Orders").unwrap();
        assert_eq!(orders.len(), 1);
        assert!(orders.contains(order));
    }

    #[test]
    fn test_append_many_members_keeps_order() {
        let mut graph = EntityGraph::new();
        let (customer, _) = graph.resolve("Customer", KeyValue::Int(1), Map::new());
        let orders: Vec<EntityId> = (0..500)
            .map(|n| graph.resolve("Order", KeyValue::Int(n), Map::new()).0)
            .collect();

        for order in orders.iter().chain(orders.iter().rev()) {
            graph.append(customer, "Orders", &CollectionKind::List, *order);
        }

        let collection = graph.collection(customer, "Orders").unwrap();
        assert_eq!(collection.members, orders);
    }

    #[test]
    fn test_absent_reference_does_not_overwrite() {
        let mut graph = EntityGraph::new();
        let (order, _) = graph.resolve("Order", KeyValue::Int(10), Map::new());
        let (customer, _) = graph.resolve("Customer", KeyValue::Int(1), Map::new());

        graph.set_reference(order, "Customer", Some(customer));
        graph.set_reference(order, "Customer", None);
        assert_eq!(graph.reference(order, "Customer"), Some(customer));
        assert!(graph.is_reference_loaded(order, "Customer"));
    }

    #[test]
    fn test_result_value_from_json() {
        let value = ResultValue::from_json(&json!({"Name": "Ana", "Tags": [1, 2]}));

        assert_eq!(value.field("Name"), Some(&ResultValue::Scalar(json!("Ana"))));
        assert_eq!(value.field("Tags").unwrap().items().len(), 2);
        assert!(ResultValue::from_json(&json!(null)).is_null());
    }
}
