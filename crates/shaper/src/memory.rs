//! In-memory row source
//!
//! [`MemoryStore`] executes correlated and grouped plans against tables of
//! JSON rows held in memory. It follows the row contract of the execution
//! layer exactly: child plans are evaluated per parent key, paging applies
//! per parent, and rows of an ordered plan are delivered in one global order,
//! so rows of different parents interleave.

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ShapeError, ShapeResult};
use crate::expr::eval::{apply, float_value, json_equals};
use crate::expr::{compare_json, evaluate, is_truthy, Env, Filter};
use crate::planning::grouping::{
    GroupElement, GroupStage, GroupedOutput, GroupedPlan, KeyShape, GROUP_ELEMENT, KEY_FIELD,
};
use crate::planning::{AggregateColumn, Cardinality, CorrelatedPlan, PlanSource, RowSource};
use crate::query::AggregateFunction;
use crate::relationships::{Navigation, RelationshipModel, RelationshipType};
use crate::value::{
    parent_column, segment_column, KeyValue, Row, COUNT_COLUMN, GROUP_KEY_COLUMN, VALUE_COLUMN,
};

static NULL: JsonValue = JsonValue::Null;

/// Reference navigations resolved into element views for predicates
const VIEW_DEPTH: usize = 2;

fn field<'a>(row: &'a JsonValue, name: &str) -> &'a JsonValue {
    row.get(name).unwrap_or(&NULL)
}

/// Tables of JSON rows keyed by entity type or pivot table name
#[derive(Debug, Clone)]
pub struct MemoryStore {
    model: Arc<RelationshipModel>,
    tables: HashMap<String, Vec<JsonValue>>,
}

impl MemoryStore {
    pub fn new(model: Arc<RelationshipModel>) -> Self {
        Self {
            model,
            tables: HashMap::new(),
        }
    }

    /// Builder-style table population
    pub fn with_rows(mut self, table: &str, rows: Vec<JsonValue>) -> Self {
        self.tables.entry(table.to_string()).or_default().extend(rows);
        self
    }

    pub fn insert(&mut self, table: &str, row: JsonValue) {
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    pub fn table(&self, table: &str) -> &[JsonValue] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn find_by_key(
        &self,
        entity_type: &str,
        key_fields: &[String],
        key: &KeyValue,
    ) -> Option<&JsonValue> {
        let components = key.components();
        self.table(entity_type).iter().find(|row| {
            key_fields.len() == components.len()
                && key_fields
                    .iter()
                    .zip(components.iter())
                    .all(|(name, component)| json_equals(field(row, name), &component.to_json()))
        })
    }

    /// Rows of the navigation target related to `source`
    fn related(&self, navigation: &Navigation, source: &JsonValue) -> ShapeResult<Vec<JsonValue>> {
        let targets = self.table(&navigation.target_type);

        let matching = |target_columns: &[String], values: &[&JsonValue]| -> Vec<JsonValue> {
            if values.iter().any(|value| value.is_null()) {
                return Vec::new();
            }
            targets
                .iter()
                .filter(|row| {
                    target_columns
                        .iter()
                        .zip(values.iter())
                        .all(|(column, value)| json_equals(field(row, column), value))
                })
                .cloned()
                .collect()
        };

        match navigation.relationship_type {
            RelationshipType::HasOne | RelationshipType::HasMany => {
                let principal_key = self.model.primary_key(&navigation.declaring_type)?;
                let values: Vec<&JsonValue> =
                    principal_key.iter().map(|name| field(source, name)).collect();
                Ok(matching(&navigation.foreign_key.columns, &values))
            }
            RelationshipType::BelongsTo => {
                let target_key = self.model.primary_key(&navigation.target_type)?;
                let values: Vec<&JsonValue> = navigation
                    .foreign_key
                    .columns
                    .iter()
                    .map(|name| field(source, name))
                    .collect();
                Ok(matching(&target_key, &values))
            }
            RelationshipType::ManyToMany => {
                let pivot = navigation.pivot.as_ref().ok_or_else(|| {
                    ShapeError::InvalidModel(format!(
                        "many-to-many navigation '{}' has no pivot",
                        navigation.display_name()
                    ))
                })?;
                let local_key = self.model.primary_key(&navigation.declaring_type)?;
                let target_key = self.model.primary_key(&navigation.target_type)?;
                let (Some(local_key), Some(target_key)) = (local_key.first(), target_key.first())
                else {
                    return Ok(Vec::new());
                };

                let mut related = Vec::new();
                for link in self.table(&pivot.table) {
                    if json_equals(field(link, &pivot.local_key), field(source, local_key)) {
                        let foreign = field(link, &pivot.foreign_key);
                        related.extend(matching(std::slice::from_ref(target_key), &[foreign]));
                    }
                }
                Ok(related)
            }
        }
    }

    /// Element row with reference navigations resolved, for predicate and
    /// key evaluation
    fn view(&self, entity_type: &str, row: &JsonValue, depth: usize) -> ShapeResult<JsonValue> {
        let mut object = match row {
            JsonValue::Object(map) => map.clone(),
            other => return Ok(other.clone()),
        };

        if depth > 0 {
            if let Some(entity) = self.model.entity(entity_type) {
                for navigation in entity.navigations.iter().filter(|n| !n.is_collection()) {
                    if object.contains_key(&navigation.name) {
                        continue;
                    }
                    let value = match self.related(navigation, row)?.into_iter().next() {
                        Some(target) => self.view(&navigation.target_type, &target, depth - 1)?,
                        None => JsonValue::Null,
                    };
                    object.insert(navigation.name.clone(), value);
                }
            }
        }

        Ok(JsonValue::Object(object))
    }

    /// Elements of a plan grouped by the parent key they belong to
    fn sources(
        &self,
        plan: &CorrelatedPlan,
        parent_keys: Option<&[KeyValue]>,
    ) -> ShapeResult<Vec<(Option<KeyValue>, Vec<JsonValue>)>> {
        match (&plan.source, &plan.parent) {
            (PlanSource::Root { entity_type }, _) => {
                Ok(vec![(None, self.table(entity_type).to_vec())])
            }
            (PlanSource::Navigation(navigation), Some(link)) => {
                let mut sources = Vec::new();
                for key in parent_keys.unwrap_or(&[]) {
                    let parent = self.find_by_key(&link.entity_type, &link.key_fields, key);
                    let elements = match parent {
                        Some(parent) => self.related(navigation, parent)?,
                        None => Vec::new(),
                    };
                    sources.push((Some(key.clone()), elements));
                }
                Ok(sources)
            }
            (PlanSource::Navigation(navigation), None) => Err(ShapeError::execution(
                plan.id,
                format!("navigation '{}' has no parent plan", navigation.display_name()),
            )),
        }
    }

    fn element_row(&self, plan: &CorrelatedPlan, element: &JsonValue) -> ShapeResult<Row> {
        let mut row = Row::new();
        let mut segment_rows: HashMap<&str, Option<JsonValue>> = HashMap::new();

        for segment in &plan.segments {
            let value = match segment.join {
                None => Some(element.clone()),
                Some(ref join) => match segment_rows.get(join.parent_segment.as_str()) {
                    Some(Some(parent)) => {
                        self.related(&join.navigation, parent)?.into_iter().next()
                    }
                    _ => None,
                },
            };

            if let Some(ref value) = value {
                for name in &segment.fields {
                    row.insert(segment_column(&segment.path, name), field(value, name).clone());
                }
            }
            segment_rows.insert(segment.path.as_str(), value);
        }

        Ok(row)
    }

    fn run_stage(&self, stage: &GroupStage, elements: Vec<JsonValue>) -> ShapeResult<StageOutput> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Group> = Vec::new();

        for element in elements {
            let env = Env::new().bind(GROUP_ELEMENT, element.clone());
            let key = match stage.key_shape {
                KeyShape::Scalar => match stage.keys.first() {
                    Some(column) => evaluate(&column.expr, &env)?,
                    None => JsonValue::Null,
                },
                KeyShape::Composite | KeyShape::Nominal(_) => {
                    let mut object = Map::new();
                    for column in &stage.keys {
                        object.insert(column.name.clone(), evaluate(&column.expr, &env)?);
                    }
                    JsonValue::Object(object)
                }
            };

            let position = *index.entry(key.to_string()).or_insert_with(|| {
                groups.push(Group {
                    key: key.clone(),
                    elements: Vec::new(),
                    row: JsonValue::Null,
                });
                groups.len() - 1
            });
            groups[position].elements.push(element);
        }

        for group in &mut groups {
            let mut row = Map::new();
            row.insert(KEY_FIELD.to_string(), group.key.clone());
            for column in &stage.aggregates {
                row.insert(column.name.clone(), aggregate(column, &group.elements)?);
            }
            group.row = JsonValue::Object(row);
        }

        let groups = apply_filter(groups, &stage.group_filter, |group| &group.row)?;

        match stage.projection {
            Some(ref projection) => {
                let mut values = Vec::with_capacity(groups.len());
                for group in &groups {
                    values.push(apply(projection, &group.row)?);
                }
                Ok(StageOutput::Values(apply_filter(values, &stage.output, |v| v)?))
            }
            None => {
                let mut members = Vec::with_capacity(groups.len());
                for group in groups {
                    let elements = match stage.element {
                        Some(ref selector) => group
                            .elements
                            .iter()
                            .map(|e| evaluate(selector, &Env::new().bind(GROUP_ELEMENT, e.clone())))
                            .collect::<ShapeResult<Vec<_>>>()?,
                        None => group.elements,
                    };
                    members.push((group.key, elements));
                }
                Ok(StageOutput::Groupings(members))
            }
        }
    }
}

struct Group {
    key: JsonValue,
    elements: Vec<JsonValue>,
    row: JsonValue,
}

enum StageOutput {
    Values(Vec<JsonValue>),
    Groupings(Vec<(JsonValue, Vec<JsonValue>)>),
}

fn aggregate(column: &AggregateColumn, elements: &[JsonValue]) -> ShapeResult<JsonValue> {
    let mut values = Vec::new();
    for element in elements {
        let env = Env::new().bind(GROUP_ELEMENT, element.clone());
        if let Some(ref predicate) = column.predicate {
            if !is_truthy(&evaluate(predicate, &env)?) {
                continue;
            }
        }
        values.push(match column.selector {
            Some(ref selector) => evaluate(selector, &env)?,
            None => element.clone(),
        });
    }

    let present: Vec<&JsonValue> = values.iter().filter(|value| !value.is_null()).collect();

    Ok(match column.function {
        AggregateFunction::Count | AggregateFunction::LongCount => JsonValue::from(values.len()),
        AggregateFunction::Sum => {
            if present.iter().all(|value| value.is_i64()) {
                let mut total: i64 = 0;
                for value in present.iter().filter_map(|value| value.as_i64()) {
                    total = total.checked_add(value).ok_or_else(|| {
                        ShapeError::execution(&column.name, "integer sum overflows i64")
                    })?;
                }
                JsonValue::from(total)
            } else {
                float_value(present.iter().filter_map(|value| value.as_f64()).sum())
            }
        }
        AggregateFunction::Min => present
            .into_iter()
            .min_by(|a, b| compare_json(a, b))
            .cloned()
            .unwrap_or(JsonValue::Null),
        AggregateFunction::Max => present
            .into_iter()
            .max_by(|a, b| compare_json(a, b))
            .cloned()
            .unwrap_or(JsonValue::Null),
        AggregateFunction::Average => {
            let numbers: Vec<f64> = present.iter().filter_map(|value| value.as_f64()).collect();
            if numbers.is_empty() {
                JsonValue::Null
            } else {
                float_value(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
    })
}

fn ordering_keys(filter: &Filter, value: &JsonValue) -> ShapeResult<Vec<JsonValue>> {
    filter
        .ordering
        .iter()
        .map(|term| apply(&term.key, value))
        .collect()
}

fn compare_keys(filter: &Filter, left: &[JsonValue], right: &[JsonValue]) -> Ordering {
    for ((term, l), r) in filter.ordering.iter().zip(left).zip(right) {
        let ordering = compare_json(l, r);
        let ordering = if term.descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Predicate, distinct, stable ordering, then skip/take
fn apply_filter<T>(
    items: Vec<T>,
    filter: &Filter,
    value: impl Fn(&T) -> &JsonValue,
) -> ShapeResult<Vec<T>> {
    let mut selected = Vec::with_capacity(items.len());
    for item in items {
        if let Some(ref predicate) = filter.predicate {
            if !is_truthy(&apply(predicate, value(&item))?) {
                continue;
            }
        }
        if filter.distinct && selected.iter().any(|kept| value(kept) == value(&item)) {
            continue;
        }
        selected.push(item);
    }

    if filter.is_ordered() {
        let mut keyed = Vec::with_capacity(selected.len());
        for item in selected {
            keyed.push((ordering_keys(filter, value(&item))?, item));
        }
        keyed.sort_by(|(a, _), (b, _)| compare_keys(filter, a, b));
        selected = keyed.into_iter().map(|(_, item)| item).collect();
    }

    let skip = filter.skip.unwrap_or(0);
    let take = filter.take.unwrap_or(usize::MAX);
    Ok(selected.into_iter().skip(skip).take(take).collect())
}

#[async_trait]
impl RowSource for MemoryStore {
    async fn fetch(
        &self,
        plan: &CorrelatedPlan,
        parent_keys: Option<&[KeyValue]>,
    ) -> ShapeResult<Vec<Row>> {
        let mut keyed_rows: Vec<(Vec<JsonValue>, Row)> = Vec::new();

        for (parent_key, elements) in self.sources(plan, parent_keys)? {
            let mut parent_columns = Row::new();
            if let (Some(key), Some(link)) = (&parent_key, &plan.parent) {
                for (name, component) in link.key_fields.iter().zip(key.components()) {
                    parent_columns.insert(parent_column(name), component.to_json());
                }
            }

            let mut views = Vec::with_capacity(elements.len());
            for element in elements {
                let view = self.view(&plan.element_type, &element, VIEW_DEPTH)?;
                views.push((view, element));
            }
            let selected = apply_filter(views, &plan.filter, |(view, _)| view)?;

            if plan.cardinality == Cardinality::Count {
                let mut row = parent_columns.clone();
                row.insert(COUNT_COLUMN, JsonValue::from(selected.len()));
                keyed_rows.push((Vec::new(), row));
                continue;
            }

            for (view, element) in selected {
                let mut row = self.element_row(plan, &element)?;
                for (column, value) in parent_columns.columns() {
                    row.insert(column.clone(), value.clone());
                }
                keyed_rows.push((ordering_keys(&plan.filter, &view)?, row));
            }
        }

        if plan.filter.is_ordered() && plan.cardinality != Cardinality::Count {
            keyed_rows.sort_by(|(a, _), (b, _)| compare_keys(&plan.filter, a, b));
        }

        tracing::debug!(plan = %plan.id, rows = keyed_rows.len(), "Fetched rows from memory");
        Ok(keyed_rows.into_iter().map(|(_, row)| row).collect())
    }

    async fn fetch_grouped(&self, plan: &GroupedPlan) -> ShapeResult<Vec<Row>> {
        let mut views = Vec::new();
        for row in self.table(&plan.source) {
            views.push(self.view(&plan.source, row, VIEW_DEPTH)?);
        }
        let mut elements = apply_filter(views, &plan.filter, |v| v)?;
        let mut groupings = None;

        for stage in &plan.stages {
            match self.run_stage(stage, elements)? {
                StageOutput::Values(values) => elements = values,
                StageOutput::Groupings(members) => {
                    groupings = Some(members);
                    elements = Vec::new();
                }
            }
        }

        let rows = match (&plan.output, groupings) {
            (GroupedOutput::Grouping { element }, Some(groupings)) => {
                let mut rows = Vec::new();
                for (key, members) in groupings {
                    for member in members {
                        let mut row = Row::new().with(GROUP_KEY_COLUMN, key.clone());
                        match element {
                            GroupElement::Entity { fields, .. } => {
                                for name in fields {
                                    let value = field(&member, name).clone();
                                    row.insert(segment_column("", name), value);
                                }
                            }
                            GroupElement::Value => row.insert(VALUE_COLUMN, member),
                        }
                        rows.push(row);
                    }
                }
                rows
            }
            (GroupedOutput::Projected { .. }, None) => elements
                .into_iter()
                .map(|value| Row::new().with(VALUE_COLUMN, value))
                .collect(),
            _ => {
                return Err(ShapeError::execution(
                    &plan.source,
                    "grouped plan output does not match its stages",
                ))
            }
        };

        tracing::debug!(
            source = %plan.source,
            rows = rows.len(),
            "Fetched grouped rows from memory"
        );
        Ok(rows)
    }
}
