//! Grouping Translator
//!
//! Lowers `GroupBy` shapes into a [`GroupedPlan`]: a chain of grouping stages
//! whose keys and aggregates are expressed over source columns. The raw group
//! may only be consumed through aggregation; any other use is rejected at
//! compile time with the position it would have escaped into.

use serde::Serialize;

use crate::error::{ShapeError, ShapeResult};
use crate::expr::{lit, param, Expr, Filter, Lambda};
use crate::query::{Aggregate, AggregateFunction, GroupBy, GroupExpr, GroupOperator, Query};
use crate::relationships::RelationshipModel;

/// Parameter naming a grouped element in stage expressions
pub const GROUP_ELEMENT: &str = "e";
/// Parameter naming a group row (`Key` plus aggregate columns)
pub const GROUP_ROW: &str = "g";
/// Field of the group row holding the key
pub const KEY_FIELD: &str = "Key";

const FINAL_PROJECTION: &str = "final projection";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum KeyShape {
    Scalar,
    /// Anonymous record of key fields
    Composite,
    /// Named key type
    Nominal(String),
}

/// One key column, evaluated over a grouped element
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyColumn {
    pub name: String,
    pub expr: Expr,
}

/// Aggregate column of a group row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateColumn {
    pub name: String,
    pub function: AggregateFunction,
    /// Value aggregated per element; `None` counts elements
    pub selector: Option<Expr>,
    pub predicate: Option<Expr>,
}

/// One `GroupBy` level
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStage {
    pub keys: Vec<KeyColumn>,
    pub key_shape: KeyShape,
    /// Element selector; `None` keeps the incoming element
    pub element: Option<Expr>,
    pub aggregates: Vec<AggregateColumn>,
    /// Filter, ordering and paging over group rows
    pub group_filter: Filter,
    /// Result selector over the group row; `None` for a terminal grouping
    pub projection: Option<Lambda>,
    /// Filter, ordering and paging over projected rows
    pub output: Filter,
}

impl GroupStage {
    pub fn is_terminal(&self) -> bool {
        self.projection.is_none()
    }
}

/// Element materialized inside a terminal grouping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GroupElement {
    Entity {
        entity_type: String,
        key_fields: Vec<String>,
        fields: Vec<String>,
    },
    Value,
}

/// Shape of the rows a grouped plan returns
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GroupedOutput {
    /// One `$` value per row; records list their fields in projection order
    Projected {
        type_name: Option<String>,
        fields: Option<Vec<String>>,
    },
    /// `{key, members}` groupings; rows carry `#key` plus the element
    Grouping { element: GroupElement },
}

/// Single grouped execution handed to the row source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupedPlan {
    pub source: String,
    /// Predicate, ordering and paging applied to source rows before grouping
    pub filter: Filter,
    pub stages: Vec<GroupStage>,
    pub output: GroupedOutput,
}

/// Translates grouped query shapes
pub struct GroupingTranslator<'a> {
    model: &'a RelationshipModel,
}

impl<'a> GroupingTranslator<'a> {
    pub fn new(model: &'a RelationshipModel) -> Self {
        Self { model }
    }

    pub fn translate(&self, query: &Query) -> ShapeResult<GroupedPlan> {
        let group_by = query.group_by.as_ref().ok_or_else(|| {
            ShapeError::InvalidShape(format!("query over '{}' is not grouped", query.root))
        })?;
        let entity = self.model.entity(&query.root).ok_or_else(|| {
            ShapeError::InvalidShape(format!("unknown entity type '{}'", query.root))
        })?;
        query.filter.validate_for_collection(&query.root)?;

        let mut stages = Vec::new();
        let mut level = Some(group_by);
        let mut scalar_elements = false;
        let mut output = None;

        while let Some(current) = level {
            let stage = translate_stage(current, scalar_elements)?;

            output = Some(match current.result {
                Some(GroupExpr::Record {
                    ref type_name,
                    ref fields,
                }) => GroupedOutput::Projected {
                    type_name: type_name.clone(),
                    fields: Some(fields.iter().map(|(name, _)| name.clone()).collect()),
                },
                Some(_) => GroupedOutput::Projected {
                    type_name: None,
                    fields: None,
                },
                None => GroupedOutput::Grouping {
                    element: match (&stage.element, stages.is_empty()) {
                        (None, true) => GroupElement::Entity {
                            entity_type: entity.name.clone(),
                            key_fields: entity.primary_key.clone(),
                            fields: entity.fields.clone(),
                        },
                        _ => GroupElement::Value,
                    },
                },
            });

            scalar_elements = !matches!(current.result, Some(GroupExpr::Record { .. }));
            stages.push(stage);
            level = current.then.as_deref();
        }

        let output = output.ok_or_else(|| {
            ShapeError::InvalidShape("grouping without stages".to_string())
        })?;

        if !query.directives.is_empty() {
            tracing::debug!(root = %query.root, "Includes ignored on a grouped query");
        }
        tracing::debug!(root = %query.root, stages = stages.len(), "Translated grouping");

        Ok(GroupedPlan {
            source: entity.name,
            filter: query.filter.clone(),
            stages,
            output,
        })
    }
}

fn escaped(position: &str, detail: String) -> ShapeError {
    ShapeError::GroupingEscaped {
        position: position.to_string(),
        detail,
    }
}

fn translate_stage(group_by: &GroupBy, scalar_elements: bool) -> ShapeResult<GroupStage> {
    let key = group_by.key.selector.rebind(GROUP_ELEMENT);
    if let Some(outer) = key.outer_parameters().into_iter().next() {
        return Err(ShapeError::UnsupportedFilterPosition {
            path: "GroupBy".to_string(),
            reason: format!("key selector '{}' references '{}'", key, outer),
        });
    }

    let (keys, key_shape) = match (&key.body, &group_by.key.nominal) {
        (Expr::Record(fields), nominal) => (
            fields
                .iter()
                .map(|(name, expr)| KeyColumn {
                    name: name.clone(),
                    expr: expr.clone(),
                })
                .collect(),
            match nominal {
                Some(type_name) => KeyShape::Nominal(type_name.clone()),
                None => KeyShape::Composite,
            },
        ),
        (_, Some(type_name)) => {
            return Err(ShapeError::InvalidShape(format!(
                "nominal key '{}' must be built from named fields",
                type_name
            )))
        }
        (body, None) => (
            vec![KeyColumn {
                name: KEY_FIELD.to_string(),
                expr: body.clone(),
            }],
            KeyShape::Scalar,
        ),
    };

    let element = group_by
        .element
        .as_ref()
        .map(|selector| selector.rebind(GROUP_ELEMENT).body);
    let element_is_scalar = match element {
        Some(Expr::Record(_)) => false,
        Some(_) => true,
        None => scalar_elements,
    };

    let mut lowering = Lowering {
        element: element.clone().unwrap_or_else(|| param(GROUP_ELEMENT)),
        element_is_scalar,
        aggregates: Vec::new(),
    };

    let group_filter = lowering.group_operators(&group_by.group_operators)?;

    if group_by.is_terminal() {
        if group_by.then.is_some() {
            return Err(escaped(
                "GroupBy",
                "a terminal grouping cannot be grouped again".to_string(),
            ));
        }
        if !group_by.output.is_empty() {
            return Err(escaped(
                output_position(&group_by.output),
                "operators cannot be applied to a terminal grouping".to_string(),
            ));
        }
    }

    let projection = match group_by.result {
        Some(ref result) => {
            check_result(result, &group_by.output, group_by.then.as_deref())?;
            Some(Lambda::new(GROUP_ROW, lowering.lower(result, FINAL_PROJECTION)?))
        }
        None => None,
    };

    Ok(GroupStage {
        keys,
        key_shape,
        element,
        aggregates: lowering.aggregates,
        group_filter,
        projection,
        output: group_by.output.clone(),
    })
}

fn output_position(filter: &Filter) -> &'static str {
    if filter.predicate.is_some() {
        "Where"
    } else if filter.is_ordered() {
        "OrderBy"
    } else if filter.skip.is_some() {
        "Skip"
    } else if filter.take.is_some() {
        "Take"
    } else {
        "Distinct"
    }
}

/// Reject raw-group use in a result selector, naming the operator that
/// consumes the leaked value
fn check_result(result: &GroupExpr, output: &Filter, then: Option<&GroupBy>) -> ShapeResult<()> {
    match result {
        GroupExpr::Record { fields, .. } => {
            for (name, expr) in fields {
                if let Some(detail) = expr.raw_group_use() {
                    return Err(escaped(&consumer_of(Some(name), output, then), detail));
                }
            }
            Ok(())
        }
        other => match other.raw_group_use() {
            Some(detail) => Err(escaped(&consumer_of(None, output, then), detail)),
            None => Ok(()),
        },
    }
}

fn consumer_of(field: Option<&str>, output: &Filter, then: Option<&GroupBy>) -> String {
    let uses = |lambda: &Lambda| match field {
        Some(field) => uses_field(&lambda.body, &lambda.parameter, field),
        None => lambda.body.references_parameter(&lambda.parameter),
    };

    if output.predicate.as_ref().map_or(false, |p| uses(p)) {
        return "Where".to_string();
    }
    for (index, term) in output.ordering.iter().enumerate() {
        if uses(&term.key) {
            return if index == 0 { "OrderBy" } else { "ThenBy" }.to_string();
        }
    }
    if let Some(next) = then {
        if uses(&next.key.selector) {
            return "GroupBy".to_string();
        }
    }
    FINAL_PROJECTION.to_string()
}

fn uses_field(body: &Expr, parameter: &str, field: &str) -> bool {
    let mut found = false;
    body.walk(&mut |expr| {
        if let Expr::Property(inner, member) = expr {
            if member == field && matches!(inner.as_ref(), Expr::Parameter(p) if p == parameter) {
                found = true;
            }
        }
    });
    found
}

/// Lowers group expressions into expressions over the group row
struct Lowering {
    element: Expr,
    element_is_scalar: bool,
    aggregates: Vec<AggregateColumn>,
}

impl Lowering {
    fn group_operators(&mut self, operators: &[GroupOperator]) -> ShapeResult<Filter> {
        let mut filter = Filter::new();

        for operator in operators {
            let position = operator.name();
            if filter.has_paging()
                && matches!(
                    operator,
                    GroupOperator::Where(_)
                        | GroupOperator::OrderBy { .. }
                        | GroupOperator::ThenBy { .. }
                )
            {
                return Err(ShapeError::InvalidShape(format!(
                    "'{}' over groups after Skip/Take is not supported",
                    position
                )));
            }

            filter = match operator {
                GroupOperator::Where(predicate) => {
                    filter.where_(Lambda::new(GROUP_ROW, self.lower(predicate, position)?))
                }
                GroupOperator::OrderBy { key, descending } => {
                    let key = Lambda::new(GROUP_ROW, self.lower(key, position)?);
                    if *descending {
                        filter.order_by_desc(key)
                    } else {
                        filter.order_by(key)
                    }
                }
                GroupOperator::ThenBy { key, descending } => {
                    let key = Lambda::new(GROUP_ROW, self.lower(key, position)?);
                    if !filter.is_ordered() {
                        return Err(ShapeError::InvalidShape(
                            "ThenBy over groups requires a preceding OrderBy".to_string(),
                        ));
                    }
                    if *descending {
                        filter.then_by_desc(key)
                    } else {
                        filter.then_by(key)
                    }
                }
                GroupOperator::Skip(count) => filter.skip(*count),
                GroupOperator::Take(count) => filter.take(*count),
                GroupOperator::SelectMany(_) => {
                    return Err(escaped(
                        position,
                        "the raw group cannot be flattened".to_string(),
                    ))
                }
            };
        }

        Ok(filter)
    }

    fn lower(&mut self, expr: &GroupExpr, position: &str) -> ShapeResult<Expr> {
        match expr {
            GroupExpr::Key => Ok(param(GROUP_ROW).prop(KEY_FIELD)),
            GroupExpr::KeyField(field) => Ok(param(GROUP_ROW).prop(KEY_FIELD).prop(field)),
            GroupExpr::Aggregate(aggregate) => {
                let name = self.aggregate(aggregate)?;
                Ok(param(GROUP_ROW).prop(&name))
            }
            GroupExpr::Group => Err(escaped(position, "the raw group 'g'".to_string())),
            GroupExpr::Enumerate(operator) => Err(escaped(
                position,
                format!("non-aggregate enumeration 'g.{}()'", operator),
            )),
            GroupExpr::Constant(value) => Ok(lit(value.clone())),
            GroupExpr::Binary { op, left, right } => Ok(Expr::Binary {
                op: *op,
                left: Box::new(self.lower(left, position)?),
                right: Box::new(self.lower(right, position)?),
            }),
            GroupExpr::Record { fields, .. } => {
                let mut lowered = Vec::with_capacity(fields.len());
                for (name, field) in fields {
                    lowered.push((name.clone(), self.lower(field, position)?));
                }
                Ok(Expr::Record(lowered))
            }
        }
    }

    /// Register an aggregate column, reusing an identical one
    fn aggregate(&mut self, aggregate: &Aggregate) -> ShapeResult<String> {
        let selector = match aggregate.selector {
            Some(ref selector) => Some(selector.apply(&self.element)),
            None if aggregate.function.is_counting() => None,
            None if self.element_is_scalar => Some(self.element.clone()),
            None => {
                return Err(ShapeError::InvalidShape(format!(
                    "{} over grouped elements needs a selector",
                    aggregate.function.name()
                )))
            }
        };
        let predicate = aggregate
            .predicate
            .as_ref()
            .map(|predicate| predicate.apply(&self.element));

        if let Some(existing) = self.aggregates.iter().find(|column| {
            column.function == aggregate.function
                && column.selector == selector
                && column.predicate == predicate
        }) {
            return Ok(existing.name.clone());
        }

        let name = format!("agg{}", self.aggregates.len());
        self.aggregates.push(AggregateColumn {
            name: name.clone(),
            function: aggregate.function,
            selector,
            predicate,
        });
        Ok(name)
    }
}
