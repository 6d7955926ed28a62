//! Stitches plan rows into a single identity-resolved result
//!
//! Child plans are shaped first (plans are stored parent-before-child, so a
//! reverse walk sees every child before its parent). Their results are kept
//! per parent key in row order and looked up when the parent row is shaped;
//! row adjacency between plans is never relied on.

use serde_json::{Map, Value as JsonValue};
use std::collections::{HashMap, HashSet};

use crate::error::{ShapeError, ShapeResult};
use crate::planning::{
    Cardinality, CollectionShape, CorrelatedPlan, GroupElement, GroupStage, GroupedOutput,
    GroupedPlan, IncludeShaper, InverseLink, KeyShape, PlanId, PlanSet, RowStreams, Shaper,
};
use crate::value::{KeyValue, Row, COUNT_COLUMN, GROUP_KEY_COLUMN, VALUE_COLUMN};

use super::graph::{CollectionValue, EntityData, EntityGraph, ResultValue};
use super::identity::{EntityId, EntityIdentity};

/// Result of one materialization pass
#[derive(Debug)]
pub struct MaterializedResult {
    graph: EntityGraph,
    rows: Vec<ResultValue>,
}

impl MaterializedResult {
    /// Top-level results in root row order
    pub fn rows(&self) -> &[ResultValue] {
        &self.rows
    }

    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntityData> {
        self.graph.entity(id)
    }

    pub fn reference(&self, id: EntityId, navigation: &str) -> Option<EntityId> {
        self.graph.reference(id, navigation)
    }

    pub fn collection(&self, id: EntityId, navigation: &str) -> Option<&CollectionValue> {
        self.graph.collection(id, navigation)
    }

    pub fn identity_of(&self, id: EntityId) -> Option<&EntityIdentity> {
        self.graph.identity_of(id)
    }

    /// Entity ids of the top-level results, skipping non-entity values
    pub fn entities(&self) -> Vec<EntityId> {
        self.rows.iter().filter_map(ResultValue::as_entity).collect()
    }
}

/// Materializer / Identity Map
pub struct Materializer<'a> {
    plans: &'a PlanSet,
    streams: &'a RowStreams,
    graph: EntityGraph,
    /// Shaped child results per plan, per parent key, in row order
    children: HashMap<PlanId, HashMap<KeyValue, Vec<ResultValue>>>,
    consumed: HashSet<(PlanId, KeyValue)>,
}

impl<'a> Materializer<'a> {
    pub fn new(plans: &'a PlanSet, streams: &'a RowStreams) -> Self {
        Self {
            plans,
            streams,
            graph: EntityGraph::new(),
            children: HashMap::new(),
            consumed: HashSet::new(),
        }
    }

    pub fn materialize(mut self) -> ShapeResult<MaterializedResult> {
        let plans = self.plans;
        let streams = self.streams;

        for plan in plans.iter().rev().filter(|plan| !plan.is_root()) {
            self.shape_child_plan(plan, streams.rows(plan.id))?;
        }

        let root = plans.root();
        let mut rows = Vec::with_capacity(streams.rows(root.id).len());
        for row in streams.rows(root.id) {
            rows.push(self.shape_row(root, &root.shaper, row)?);
        }

        for (plan, per_parent) in &self.children {
            for key in per_parent.keys() {
                if !self.consumed.contains(&(*plan, key.clone())) {
                    tracing::debug!(
                        plan = %plan,
                        parent = %key,
                        "Skipping rows of an unknown parent"
                    );
                }
            }
        }

        tracing::debug!(rows = rows.len(), entities = self.graph.len(), "Materialized result");
        Ok(MaterializedResult {
            graph: self.graph,
            rows,
        })
    }

    fn shape_child_plan(&mut self, plan: &CorrelatedPlan, rows: &[Row]) -> ShapeResult<()> {
        let link = plan.parent.as_ref().ok_or_else(|| {
            ShapeError::Materialization(format!("plan {} has no parent", plan.id))
        })?;
        let mut per_parent: HashMap<KeyValue, Vec<ResultValue>> = HashMap::new();

        for row in rows {
            let parent_key = row.parent_key(&link.key_fields)?;
            if parent_key.is_null() {
                return Err(ShapeError::Materialization(format!(
                    "row of plan {} carries no key of its '{}' parent",
                    plan.id, link.entity_type
                )));
            }

            let value = match plan.cardinality {
                Cardinality::Count => ResultValue::Scalar(
                    row.get(COUNT_COLUMN).cloned().unwrap_or_else(|| JsonValue::from(0)),
                ),
                Cardinality::Many | Cardinality::Single => self.shape_row(plan, &plan.shaper, row)?,
            };
            per_parent.entry(parent_key).or_default().push(value);
        }

        self.children.insert(plan.id, per_parent);
        Ok(())
    }

    /// Shaped results of `plan` belonging to the parent with `key`
    fn children_of(&mut self, plan: PlanId, key: &KeyValue) -> Vec<ResultValue> {
        self.consumed.insert((plan, key.clone()));
        self.children
            .get(&plan)
            .and_then(|per_parent| per_parent.get(key))
            .cloned()
            .unwrap_or_default()
    }

    fn shape_row(
        &mut self,
        plan: &CorrelatedPlan,
        shaper: &Shaper,
        row: &Row,
    ) -> ShapeResult<ResultValue> {
        match shaper {
            Shaper::Entity {
                segment,
                entity_type,
                key_fields,
                fields,
                includes,
            } => {
                let key = row.segment_key(segment, key_fields)?;
                if key.is_null() {
                    if segment.is_empty() {
                        return Err(ShapeError::Materialization(format!(
                            "row of plan {} has no key for '{}'",
                            plan.id, entity_type
                        )));
                    }
                    return Ok(ResultValue::Null);
                }

                let values: Map<String, JsonValue> = fields
                    .iter()
                    .map(|field| (field.clone(), row.field(segment, field).clone()))
                    .collect();
                let (id, _) = self.graph.resolve(entity_type, key.clone(), values);

                for include in includes {
                    self.attach(plan, id, &key, include, row)?;
                }
                Ok(ResultValue::Entity(id))
            }
            Shaper::Field { segment, field } => {
                Ok(ResultValue::from_json(row.field(segment, field)))
            }
            Shaper::Constant(value) => Ok(ResultValue::from_json(value)),
            Shaper::Reference {
                segment,
                key_fields,
                inner,
            } => {
                if row.segment_key(segment, key_fields)?.is_null() {
                    Ok(ResultValue::Null)
                } else {
                    self.shape_row(plan, inner, row)
                }
            }
            Shaper::Collection {
                plan: child,
                segment,
                key_fields,
                shape,
            } => {
                let key = row.segment_key(segment, key_fields)?;
                let items = if key.is_null() {
                    Vec::new()
                } else {
                    self.children_of(*child, &key)
                };

                Ok(match shape {
                    CollectionShape::Collection(kind) => ResultValue::Collection {
                        kind: kind.clone(),
                        items: if kind.is_set() { dedupe(items) } else { items },
                    },
                    CollectionShape::First => items.into_iter().next().unwrap_or(ResultValue::Null),
                    CollectionShape::Count => items
                        .into_iter()
                        .next()
                        .unwrap_or_else(|| ResultValue::Scalar(JsonValue::from(0))),
                })
            }
            Shaper::Record { type_name, fields } => {
                let mut values = Vec::with_capacity(fields.len());
                for (name, field) in fields {
                    values.push((name.clone(), self.shape_row(plan, field, row)?));
                }
                Ok(ResultValue::Record {
                    type_name: type_name.clone(),
                    fields: values,
                })
            }
        }
    }

    fn attach(
        &mut self,
        plan: &CorrelatedPlan,
        owner: EntityId,
        owner_key: &KeyValue,
        include: &IncludeShaper,
        row: &Row,
    ) -> ShapeResult<()> {
        match include {
            IncludeShaper::Reference {
                navigation,
                target,
                inverse,
                ..
            } => {
                let target = self.shape_row(plan, target, row)?.as_entity();
                self.graph.set_reference(owner, navigation, target);
                if let Some(target) = target {
                    self.fix_up(target, inverse.as_ref(), owner);
                }
            }
            IncludeShaper::Collection {
                navigation,
                plan: child,
                kind,
                inverse,
            } => {
                self.graph.ensure_collection(owner, navigation, kind);
                for member in self.children_of(*child, owner_key) {
                    if let Some(member) = member.as_entity() {
                        self.graph.append(owner, navigation, kind, member);
                        self.fix_up(member, inverse.as_ref(), owner);
                    }
                }
            }
        }
        Ok(())
    }

    /// Wire the inverse side of an attached navigation
    fn fix_up(&mut self, target: EntityId, inverse: Option<&InverseLink>, owner: EntityId) {
        match inverse {
            Some(InverseLink {
                navigation,
                kind: None,
            }) => self.graph.set_reference(target, navigation, Some(owner)),
            Some(InverseLink {
                navigation,
                kind: Some(kind),
            }) => {
                self.graph.append(target, navigation, kind, owner);
            }
            None => {}
        }
    }
}

/// Materialize the rows of a grouped plan
pub fn materialize_grouped(
    plan: &GroupedPlan,
    streams: &RowStreams,
) -> ShapeResult<MaterializedResult> {
    let mut graph = EntityGraph::new();
    let rows = streams.grouped_rows();

    let results: Vec<ResultValue> = match &plan.output {
        GroupedOutput::Projected { type_name, fields } => rows
            .iter()
            .map(|row| {
                let value = row.get(VALUE_COLUMN).unwrap_or(&JsonValue::Null);
                projected_value(value, type_name.as_deref(), fields.as_deref())
            })
            .collect(),
        GroupedOutput::Grouping { element } => {
            let stage = plan.stages.last().ok_or_else(|| {
                ShapeError::Materialization("grouped plan without stages".to_string())
            })?;

            let mut order: Vec<KeyValue> = Vec::new();
            let mut groups: HashMap<KeyValue, (ResultValue, Vec<ResultValue>)> = HashMap::new();

            for row in rows {
                let key_json = row.get(GROUP_KEY_COLUMN).unwrap_or(&JsonValue::Null);
                let identity = grouping_identity(key_json)?;

                let member = match element {
                    GroupElement::Entity {
                        entity_type,
                        key_fields,
                        fields,
                    } => {
                        let key = row.segment_key("", key_fields)?;
                        if key.is_null() {
                            return Err(ShapeError::Materialization(format!(
                                "grouped row has no key for '{}'",
                                entity_type
                            )));
                        }
                        let values: Map<String, JsonValue> = fields
                            .iter()
                            .map(|field| (field.clone(), row.field("", field).clone()))
                            .collect();
                        ResultValue::Entity(graph.resolve(entity_type, key, values).0)
                    }
                    GroupElement::Value => {
                        ResultValue::from_json(row.get(VALUE_COLUMN).unwrap_or(&JsonValue::Null))
                    }
                };

                if !groups.contains_key(&identity) {
                    order.push(identity.clone());
                }
                groups
                    .entry(identity)
                    .or_insert_with(|| (key_value(stage, key_json), Vec::new()))
                    .1
                    .push(member);
            }

            order
                .into_iter()
                .filter_map(|identity| groups.remove(&identity))
                .map(|(key, elements)| ResultValue::Grouping {
                    key: Box::new(key),
                    elements,
                })
                .collect()
        }
    };

    tracing::debug!(rows = rows.len(), "Materialized grouped result");
    Ok(MaterializedResult {
        graph,
        rows: results,
    })
}

fn projected_value(
    value: &JsonValue,
    type_name: Option<&str>,
    fields: Option<&[String]>,
) -> ResultValue {
    match (value, fields) {
        (JsonValue::Object(map), Some(fields)) => ResultValue::Record {
            type_name: type_name.map(str::to_string),
            fields: fields
                .iter()
                .map(|field| {
                    (
                        field.clone(),
                        ResultValue::from_json(map.get(field).unwrap_or(&JsonValue::Null)),
                    )
                })
                .collect(),
        },
        _ => ResultValue::from_json(value),
    }
}

fn key_value(stage: &GroupStage, key: &JsonValue) -> ResultValue {
    let type_name = match stage.key_shape {
        KeyShape::Scalar => return ResultValue::from_json(key),
        KeyShape::Composite => None,
        KeyShape::Nominal(ref name) => Some(name.as_str()),
    };
    let fields: Vec<String> = stage.keys.iter().map(|column| column.name.clone()).collect();
    projected_value(key, type_name, Some(&fields))
}

/// Hashable identity of a grouping key; record keys compare field by field
fn grouping_identity(key: &JsonValue) -> ShapeResult<KeyValue> {
    match key {
        JsonValue::Object(map) => map
            .values()
            .map(grouping_identity)
            .collect::<ShapeResult<Vec<_>>>()
            .map(KeyValue::Composite),
        other => KeyValue::from_json(other),
    }
}

/// Drop repeated values, keeping the first appearance
fn dedupe(items: Vec<ResultValue>) -> Vec<ResultValue> {
    let mut unique: Vec<ResultValue> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}
