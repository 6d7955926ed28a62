//! Reference evaluator for expressions over JSON values

use serde_json::{Map, Number, Value as JsonValue};
use std::cmp::Ordering;
use std::collections::HashMap;

use super::{BinaryOp, Expr, Lambda};
use crate::error::{ShapeError, ShapeResult};

/// Parameter bindings for evaluation
#[derive(Debug, Clone, Default)]
pub struct Env {
    bindings: HashMap<String, JsonValue>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, parameter: &str, value: JsonValue) -> Self {
        self.bindings.insert(parameter.to_string(), value);
        self
    }

    pub fn get(&self, parameter: &str) -> Option<&JsonValue> {
        self.bindings.get(parameter)
    }
}

/// Evaluate `lambda` against a single argument
pub fn apply(lambda: &Lambda, argument: &JsonValue) -> ShapeResult<JsonValue> {
    evaluate(&lambda.body, &Env::new().bind(&lambda.parameter, argument.clone()))
}

/// Evaluate an expression; member access on null yields null
pub fn evaluate(expr: &Expr, env: &Env) -> ShapeResult<JsonValue> {
    match expr {
        Expr::Parameter(name) => env.get(name).cloned().ok_or_else(|| {
            ShapeError::InvalidShape(format!("parameter '{}' is not bound", name))
        }),
        Expr::Property(inner, member) => match evaluate(inner, env)? {
            JsonValue::Object(map) => Ok(map.get(member).cloned().unwrap_or(JsonValue::Null)),
            JsonValue::Null => Ok(JsonValue::Null),
            other => Err(ShapeError::InvalidShape(format!(
                "cannot access member '{}' on value {}",
                member, other
            ))),
        },
        Expr::Constant(value) => Ok(value.clone()),
        Expr::Binary { op, left, right } => {
            let left = evaluate(left, env)?;
            match op {
                BinaryOp::And if !is_truthy(&left) => return Ok(JsonValue::Bool(false)),
                BinaryOp::Or if is_truthy(&left) => return Ok(JsonValue::Bool(true)),
                _ => {}
            }
            let right = evaluate(right, env)?;
            binary(*op, &left, &right)
        }
        Expr::Not(inner) => Ok(JsonValue::Bool(!is_truthy(&evaluate(inner, env)?))),
        Expr::IsNull(inner) => Ok(JsonValue::Bool(evaluate(inner, env)?.is_null())),
        Expr::Record(fields) => {
            let mut map = Map::new();
            for (name, field) in fields {
                map.insert(name.clone(), evaluate(field, env)?);
            }
            Ok(JsonValue::Object(map))
        }
        Expr::QueryRoot(entity) => Err(ShapeError::InvalidShape(format!(
            "query root '{}' cannot be evaluated inline",
            entity
        ))),
    }
}

fn binary(op: BinaryOp, left: &JsonValue, right: &JsonValue) -> ShapeResult<JsonValue> {
    let result = match op {
        BinaryOp::Eq => JsonValue::Bool(json_equals(left, right)),
        BinaryOp::Ne => JsonValue::Bool(!json_equals(left, right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if left.is_null() || right.is_null() {
                return Ok(JsonValue::Bool(false));
            }
            let ordering = compare_json(left, right);
            JsonValue::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
        BinaryOp::And => JsonValue::Bool(is_truthy(left) && is_truthy(right)),
        BinaryOp::Or => JsonValue::Bool(is_truthy(left) || is_truthy(right)),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            arithmetic(op, left, right)?
        }
    };
    Ok(result)
}

fn arithmetic(op: BinaryOp, left: &JsonValue, right: &JsonValue) -> ShapeResult<JsonValue> {
    if left.is_null() || right.is_null() {
        return Ok(JsonValue::Null);
    }

    if let (BinaryOp::Add, JsonValue::String(l), JsonValue::String(r)) = (op, left, right) {
        return Ok(JsonValue::String(format!("{}{}", l, r)));
    }

    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
        let value = match op {
            BinaryOp::Add => l.checked_add(r),
            BinaryOp::Sub => l.checked_sub(r),
            BinaryOp::Mul => l.checked_mul(r),
            _ => None,
        };
        if let Some(value) = value {
            return Ok(JsonValue::from(value));
        }
    }

    let (l, r) = match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => (l, r),
        _ => {
            return Err(ShapeError::InvalidShape(format!(
                "operator '{}' is not defined for {} and {}",
                op.symbol(),
                left,
                right
            )))
        }
    };

    let value = match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        _ => {
            if r == 0.0 {
                return Err(ShapeError::InvalidShape("division by zero".to_string()));
            }
            l / r
        }
    };

    Ok(float_value(value))
}

/// Number value, kept integral when the float has no fractional part
pub fn float_value(value: f64) -> JsonValue {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        JsonValue::from(value as i64)
    } else {
        Number::from_f64(value)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

/// Truthiness used by predicates: only `true` passes
pub fn is_truthy(value: &JsonValue) -> bool {
    matches!(value, JsonValue::Bool(true))
}

/// Equality with numeric normalization (`1 == 1.0`)
pub fn json_equals(left: &JsonValue, right: &JsonValue) -> bool {
    match (left, right) {
        (JsonValue::Number(l), JsonValue::Number(r)) => l.as_f64() == r.as_f64(),
        _ => left == right,
    }
}

/// Total order over JSON values: null < bool < number < string < array < object
pub fn compare_json(left: &JsonValue, right: &JsonValue) -> Ordering {
    fn rank(value: &JsonValue) -> u8 {
        match value {
            JsonValue::Null => 0,
            JsonValue::Bool(_) => 1,
            JsonValue::Number(_) => 2,
            JsonValue::String(_) => 3,
            JsonValue::Array(_) => 4,
            JsonValue::Object(_) => 5,
        }
    }

    match (left, right) {
        (JsonValue::Bool(l), JsonValue::Bool(r)) => l.cmp(r),
        (JsonValue::Number(l), JsonValue::Number(r)) => match (l.as_i64(), r.as_i64()) {
            (Some(l), Some(r)) => l.cmp(&r),
            _ => l
                .as_f64()
                .partial_cmp(&r.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (JsonValue::String(l), JsonValue::String(r)) => l.cmp(r),
        (JsonValue::Array(l), JsonValue::Array(r)) => {
            for (a, b) in l.iter().zip(r.iter()) {
                let ordering = compare_json(a, b);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            l.len().cmp(&r.len())
        }
        _ => rank(left).cmp(&rank(right)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{lit, param, record};
    use serde_json::json;

    #[test]
    fn test_predicate_evaluation() {
        let lambda = Lambda::new("o", param("o").prop("Total").gt(lit(100)));

        assert_eq!(apply(&lambda, &json!({"Total": 150})).unwrap(), json!(true));
        assert_eq!(apply(&lambda, &json!({"Total": 50})).unwrap(), json!(false));
        assert_eq!(apply(&lambda, &json!({"Total": null})).unwrap(), json!(false));
    }

    #[test]
    fn test_null_member_access() {
        let lambda = Lambda::new("o", param("o").prop("Customer").prop("Name"));
        assert_eq!(apply(&lambda, &json!({"Customer": null})).unwrap(), JsonValue::Null);
    }

    #[test]
    fn test_arithmetic_and_records() {
        let lambda = Lambda::new(
            "o",
            record(vec![
                ("Double", param("o").prop("N").times(lit(2))),
                ("Half", param("o").prop("N").divided_by(lit(4))),
            ]),
        );

        assert_eq!(
            apply(&lambda, &json!({"N": 6})).unwrap(),
            json!({"Double": 12, "Half": 1.5})
        );
    }

    #[test]
    fn test_short_circuit() {
        let lambda = Lambda::new("o", lit(false).and(param("missing")));
        assert_eq!(apply(&lambda, &json!({})).unwrap(), json!(false));
    }

    #[test]
    fn test_compare_json_ordering() {
        assert_eq!(compare_json(&json!(null), &json!(1)), Ordering::Less);
        assert_eq!(compare_json(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_json(&json!(1.5), &json!(1)), Ordering::Greater);
        assert_eq!(compare_json(&json!("b"), &json!("a")), Ordering::Greater);
        assert!(json_equals(&json!(1), &json!(1.0)));
    }
}
