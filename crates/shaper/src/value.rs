//! Key values and result rows exchanged with the execution layer
//!
//! Rows are flat maps of qualified column names to JSON values. Columns are
//! qualified by the segment they belong to:
//!
//! - `$.field` for the plan element,
//! - `$.Customer.field` for a reference segment joined into the plan,
//! - `^.field` for the key of the owning parent,
//! - `#count` for per-parent counts and `#key` for terminal grouping keys,
//! - `$` alone for a projected value of a grouped plan.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;

use crate::error::{ShapeError, ShapeResult};

pub const ELEMENT_PREFIX: &str = "$";
pub const VALUE_COLUMN: &str = "$";
pub const PARENT_PREFIX: &str = "^";
pub const COUNT_COLUMN: &str = "#count";
pub const GROUP_KEY_COLUMN: &str = "#key";

/// Qualified column name for a field of a segment (empty segment = plan element)
pub fn segment_column(segment: &str, field: &str) -> String {
    if segment.is_empty() {
        format!("{}.{}", ELEMENT_PREFIX, field)
    } else {
        format!("{}.{}.{}", ELEMENT_PREFIX, segment, field)
    }
}

/// Qualified column name for a parent key field
pub fn parent_column(field: &str) -> String {
    format!("{}.{}", PARENT_PREFIX, field)
}

/// Hashable key value used for identity resolution and correlation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyValue {
    Null,
    Bool(bool),
    Int(i64),
    /// Non-integer number in its canonical JSON rendering
    Decimal(String),
    Text(String),
    Composite(Vec<KeyValue>),
}

impl KeyValue {
    /// Build a key component from a JSON value
    pub fn from_json(value: &JsonValue) -> ShapeResult<Self> {
        match value {
            JsonValue::Null => Ok(KeyValue::Null),
            JsonValue::Bool(b) => Ok(KeyValue::Bool(*b)),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Ok(KeyValue::Int(i)),
                None => Ok(KeyValue::Decimal(n.to_string())),
            },
            JsonValue::String(s) => Ok(KeyValue::Text(s.clone())),
            JsonValue::Array(items) => items
                .iter()
                .map(KeyValue::from_json)
                .collect::<ShapeResult<Vec<_>>>()
                .map(KeyValue::Composite),
            JsonValue::Object(_) => Err(ShapeError::Materialization(format!(
                "object value '{}' cannot be used as a key",
                value
            ))),
        }
    }

    /// Build a (possibly composite) key from several JSON components
    pub fn from_parts<'a, I>(parts: I) -> ShapeResult<Self>
    where
        I: IntoIterator<Item = Option<&'a JsonValue>>,
    {
        let mut values = parts
            .into_iter()
            .map(|part| match part {
                Some(value) => KeyValue::from_json(value),
                None => Ok(KeyValue::Null),
            })
            .collect::<ShapeResult<Vec<_>>>()?;

        if values.len() == 1 {
            Ok(values.remove(0))
        } else {
            Ok(KeyValue::Composite(values))
        }
    }

    /// A key is null when it, or any component of it, is null
    pub fn is_null(&self) -> bool {
        match self {
            KeyValue::Null => true,
            KeyValue::Composite(parts) => parts.iter().any(KeyValue::is_null),
            _ => false,
        }
    }

    /// Key components in field order
    pub fn components(&self) -> Vec<&KeyValue> {
        match self {
            KeyValue::Composite(parts) => parts.iter().collect(),
            other => vec![other],
        }
    }

    /// Convert back into a JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            KeyValue::Null => JsonValue::Null,
            KeyValue::Bool(b) => JsonValue::Bool(*b),
            KeyValue::Int(i) => JsonValue::from(*i),
            KeyValue::Decimal(n) => serde_json::from_str(n).unwrap_or(JsonValue::Null),
            KeyValue::Text(s) => JsonValue::String(s.clone()),
            KeyValue::Composite(parts) => {
                JsonValue::Array(parts.iter().map(KeyValue::to_json).collect())
            }
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Null => write!(f, "null"),
            KeyValue::Bool(b) => write!(f, "{}", b),
            KeyValue::Int(i) => write!(f, "{}", i),
            KeyValue::Decimal(n) => write!(f, "{}", n),
            KeyValue::Text(s) => write!(f, "{}", s),
            KeyValue::Composite(parts) => {
                let rendered: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "({})", rendered.join(", "))
            }
        }
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Int(value)
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Text(value.to_string())
    }
}

/// One result row returned by the execution layer for a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: HashMap<String, JsonValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column insertion
    pub fn with(mut self, column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: JsonValue) {
        self.columns.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.columns.get(column)
    }

    /// Value of a segment field, `Null` when the column is absent
    pub fn field(&self, segment: &str, field: &str) -> &JsonValue {
        self.columns
            .get(&segment_column(segment, field))
            .unwrap_or(&JsonValue::Null)
    }

    /// Key of a segment built from its key fields
    pub fn segment_key(&self, segment: &str, key_fields: &[String]) -> ShapeResult<KeyValue> {
        KeyValue::from_parts(
            key_fields
                .iter()
                .map(|field| self.columns.get(&segment_column(segment, field))),
        )
    }

    /// Key of the owning parent carried in `^.` columns
    pub fn parent_key(&self, key_fields: &[String]) -> ShapeResult<KeyValue> {
        KeyValue::from_parts(
            key_fields
                .iter()
                .map(|field| self.columns.get(&parent_column(field))),
        )
    }

    pub fn columns(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
