//! Grouping shapes: keys, aggregates and the operators applied to groups

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::expr::{BinaryOp, Filter, Lambda};

/// Grouping key selector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupKey {
    pub selector: Lambda,
    /// Named key type for nominal keys
    pub nominal: Option<String>,
}

impl GroupKey {
    /// Scalar key, or composite key when the selector builds a record
    pub fn new(selector: Lambda) -> Self {
        Self {
            selector,
            nominal: None,
        }
    }

    /// Key of a named type; the selector must build a record
    pub fn nominal(type_name: &str, selector: Lambda) -> Self {
        Self {
            selector,
            nominal: Some(type_name.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    Count,
    LongCount,
    Sum,
    Min,
    Max,
    Average,
}

impl AggregateFunction {
    pub fn name(self) -> &'static str {
        match self {
            Self::Count => "Count",
            Self::LongCount => "LongCount",
            Self::Sum => "Sum",
            Self::Min => "Min",
            Self::Max => "Max",
            Self::Average => "Average",
        }
    }

    /// Counting aggregates do not need a selector
    pub fn is_counting(self) -> bool {
        matches!(self, Self::Count | Self::LongCount)
    }
}

/// Aggregate over the grouped elements, optionally predicate-filtered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub function: AggregateFunction,
    pub selector: Option<Lambda>,
    pub predicate: Option<Lambda>,
}

impl Aggregate {
    fn of(function: AggregateFunction, selector: Option<Lambda>) -> Self {
        Self {
            function,
            selector,
            predicate: None,
        }
    }

    pub fn count() -> Self {
        Self::of(AggregateFunction::Count, None)
    }

    pub fn long_count() -> Self {
        Self::of(AggregateFunction::LongCount, None)
    }

    pub fn sum(selector: Lambda) -> Self {
        Self::of(AggregateFunction::Sum, Some(selector))
    }

    pub fn min(selector: Lambda) -> Self {
        Self::of(AggregateFunction::Min, Some(selector))
    }

    pub fn max(selector: Lambda) -> Self {
        Self::of(AggregateFunction::Max, Some(selector))
    }

    pub fn average(selector: Lambda) -> Self {
        Self::of(AggregateFunction::Average, Some(selector))
    }

    /// Aggregate over the elements themselves (after the element selector)
    pub fn over_elements(function: AggregateFunction) -> Self {
        Self::of(function, None)
    }

    /// Only aggregate elements matching `predicate`
    pub fn filtered(mut self, predicate: Lambda) -> Self {
        self.predicate = Some(predicate);
        self
    }
}

/// Expression over a group `g`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupExpr {
    /// `g.Key`
    Key,
    /// `g.Key.Field` of a composite or nominal key
    KeyField(String),
    Aggregate(Aggregate),
    /// The raw group itself
    Group,
    /// Non-aggregate enumeration of the group (`g.First()`, `g.ToList()`, ...)
    Enumerate(String),
    Constant(JsonValue),
    Binary {
        op: BinaryOp,
        left: Box<GroupExpr>,
        right: Box<GroupExpr>,
    },
    Record {
        type_name: Option<String>,
        fields: Vec<(String, GroupExpr)>,
    },
}

impl GroupExpr {
    pub fn key_field(field: &str) -> Self {
        Self::KeyField(field.to_string())
    }

    pub fn aggregate(aggregate: Aggregate) -> Self {
        Self::Aggregate(aggregate)
    }

    pub fn count() -> Self {
        Self::Aggregate(Aggregate::count())
    }

    pub fn enumerate(operator: &str) -> Self {
        Self::Enumerate(operator.to_string())
    }

    pub fn constant(value: impl Into<JsonValue>) -> Self {
        Self::Constant(value.into())
    }

    pub fn binary(op: BinaryOp, left: GroupExpr, right: GroupExpr) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn record(fields: Vec<(&str, GroupExpr)>) -> Self {
        Self::Record {
            type_name: None,
            fields: fields
                .into_iter()
                .map(|(name, expr)| (name.to_string(), expr))
                .collect(),
        }
    }

    pub fn named(type_name: &str, fields: Vec<(&str, GroupExpr)>) -> Self {
        match Self::record(fields) {
            Self::Record { fields, .. } => Self::Record {
                type_name: Some(type_name.to_string()),
                fields,
            },
            other => other,
        }
    }

    /// Visit every node, parents before children
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a GroupExpr)) {
        visit(self);
        match self {
            Self::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Self::Record { fields, .. } => {
                for (_, expr) in fields {
                    expr.walk(visit);
                }
            }
            _ => {}
        }
    }

    /// Description of the first raw-group use, if any
    pub fn raw_group_use(&self) -> Option<String> {
        let mut found = None;
        self.walk(&mut |expr| {
            if found.is_some() {
                return;
            }
            match expr {
                Self::Group => found = Some("the raw group 'g'".to_string()),
                Self::Enumerate(operator) => {
                    found = Some(format!("non-aggregate enumeration 'g.{}()'", operator))
                }
                _ => {}
            }
        });
        found
    }
}

/// Operator applied to groups before the result selector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupOperator {
    Where(GroupExpr),
    OrderBy { key: GroupExpr, descending: bool },
    ThenBy { key: GroupExpr, descending: bool },
    Skip(usize),
    Take(usize),
    SelectMany(GroupExpr),
}

impl GroupOperator {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Where(_) => "Where",
            Self::OrderBy { .. } => "OrderBy",
            Self::ThenBy { .. } => "ThenBy",
            Self::Skip(_) => "Skip",
            Self::Take(_) => "Take",
            Self::SelectMany(_) => "SelectMany",
        }
    }
}

/// `GroupBy` together with everything composed on top of it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBy {
    pub key: GroupKey,
    pub element: Option<Lambda>,
    /// Operators over groups, before the result selector
    pub group_operators: Vec<GroupOperator>,
    /// `Select(g => ...)`; absent for a terminal grouping
    pub result: Option<GroupExpr>,
    /// Filter applied to the projected rows
    pub output: Filter,
    /// Regrouping of the projected rows
    pub then: Option<Box<GroupBy>>,
}

impl GroupBy {
    pub fn new(key: GroupKey) -> Self {
        Self {
            key,
            element: None,
            group_operators: Vec::new(),
            result: None,
            output: Filter::default(),
            then: None,
        }
    }

    /// Group by a key selector lambda
    pub fn by(selector: Lambda) -> Self {
        Self::new(GroupKey::new(selector))
    }

    pub fn with_element(mut self, element: Lambda) -> Self {
        self.element = Some(element);
        self
    }

    /// `Where(g => ...)` over groups
    pub fn having(mut self, predicate: GroupExpr) -> Self {
        self.group_operators.push(GroupOperator::Where(predicate));
        self
    }

    pub fn order_groups_by(mut self, key: GroupExpr, descending: bool) -> Self {
        self.group_operators
            .push(GroupOperator::OrderBy { key, descending });
        self
    }

    pub fn then_groups_by(mut self, key: GroupExpr, descending: bool) -> Self {
        self.group_operators
            .push(GroupOperator::ThenBy { key, descending });
        self
    }

    pub fn skip_groups(mut self, count: usize) -> Self {
        self.group_operators.push(GroupOperator::Skip(count));
        self
    }

    pub fn take_groups(mut self, count: usize) -> Self {
        self.group_operators.push(GroupOperator::Take(count));
        self
    }

    pub fn select_many(mut self, selector: GroupExpr) -> Self {
        self.group_operators.push(GroupOperator::SelectMany(selector));
        self
    }

    /// Result selector receiving key and group
    pub fn select(mut self, result: GroupExpr) -> Self {
        self.result = Some(result);
        self
    }

    /// Filter, order or page the projected rows
    pub fn output(mut self, filter: Filter) -> Self {
        self.output = filter;
        self
    }

    /// Group the projected rows again
    pub fn regroup(mut self, next: GroupBy) -> Self {
        self.then = Some(Box::new(next));
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.result.is_none()
    }
}
