//! Closed expression AST
//!
//! Filters, ordering keys, grouping keys and aggregate selectors are all
//! expressed with this small tree. The upstream expression parser produces
//! it; the compiler only inspects, rewrites and (for the in-memory source)
//! evaluates it.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::fmt;

pub mod eval;
pub mod filter;

pub use eval::{compare_json, evaluate, is_truthy, Env};
pub use filter::{Filter, OrderingTerm};

/// Binary operators supported by the expression tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

/// Expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Reference to a lambda parameter
    Parameter(String),
    /// Member access
    Property(Box<Expr>, String),
    Constant(JsonValue),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    /// Anonymous or named record construction
    Record(Vec<(String, Expr)>),
    /// Reference to an unrelated query root (`Set<T>()`)
    QueryRoot(String),
}

/// Parameter reference
pub fn param(name: &str) -> Expr {
    Expr::Parameter(name.to_string())
}

/// Constant literal
pub fn lit(value: impl Into<JsonValue>) -> Expr {
    Expr::Constant(value.into())
}

/// Record construction from `(name, expr)` pairs
pub fn record(fields: Vec<(&str, Expr)>) -> Expr {
    Expr::Record(
        fields
            .into_iter()
            .map(|(name, expr)| (name.to_string(), expr))
            .collect(),
    )
}

impl Expr {
    /// Member access on this expression
    pub fn prop(self, name: &str) -> Expr {
        Expr::Property(Box::new(self), name.to_string())
    }

    fn binary(self, op: BinaryOp, other: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn equals(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn not_equals(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Ne, other)
    }

    pub fn lt(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn le(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Le, other)
    }

    pub fn gt(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn ge(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Ge, other)
    }

    pub fn and(self, other: Expr) -> Expr {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Or, other)
    }

    pub fn plus(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Add, other)
    }

    pub fn minus(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Sub, other)
    }

    pub fn times(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Mul, other)
    }

    pub fn divided_by(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Div, other)
    }

    pub fn negate(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull(Box::new(self))
    }

    /// Visit every node, parents before children
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Property(inner, _) | Expr::Not(inner) | Expr::IsNull(inner) => inner.walk(visit),
            Expr::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::Record(fields) => {
                for (_, expr) in fields {
                    expr.walk(visit);
                }
            }
            Expr::Parameter(_) | Expr::Constant(_) | Expr::QueryRoot(_) => {}
        }
    }

    /// Names of all parameters referenced by the expression
    pub fn free_parameters(&self) -> BTreeSet<String> {
        let mut parameters = BTreeSet::new();
        self.walk(&mut |expr| {
            if let Expr::Parameter(name) = expr {
                parameters.insert(name.clone());
            }
        });
        parameters
    }

    pub fn references_parameter(&self, name: &str) -> bool {
        let mut found = false;
        self.walk(&mut |expr| {
            if matches!(expr, Expr::Parameter(p) if p == name) {
                found = true;
            }
        });
        found
    }

    /// Query roots referenced by the expression
    pub fn query_roots(&self) -> Vec<String> {
        let mut roots = Vec::new();
        self.walk(&mut |expr| {
            if let Expr::QueryRoot(root) = expr {
                roots.push(root.clone());
            }
        });
        roots
    }

    /// Replace parameter `name` with `replacement`, folding member access on
    /// records into the selected field
    pub fn substitute(&self, name: &str, replacement: &Expr) -> Expr {
        match self {
            Expr::Parameter(p) if p == name => replacement.clone(),
            Expr::Parameter(_) | Expr::Constant(_) | Expr::QueryRoot(_) => self.clone(),
            Expr::Property(inner, member) => {
                let inner = inner.substitute(name, replacement);
                match inner {
                    Expr::Record(fields) => match fields.into_iter().find(|(f, _)| f == member) {
                        Some((_, expr)) => expr,
                        None => Expr::Property(Box::new(Expr::Record(Vec::new())), member.clone()),
                    },
                    other => Expr::Property(Box::new(other), member.clone()),
                }
            }
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: Box::new(left.substitute(name, replacement)),
                right: Box::new(right.substitute(name, replacement)),
            },
            Expr::Not(inner) => Expr::Not(Box::new(inner.substitute(name, replacement))),
            Expr::IsNull(inner) => Expr::IsNull(Box::new(inner.substitute(name, replacement))),
            Expr::Record(fields) => Expr::Record(
                fields
                    .iter()
                    .map(|(f, e)| (f.clone(), e.substitute(name, replacement)))
                    .collect(),
            ),
        }
    }

    /// Member chain rooted at `parameter`, e.g. `o.Customer.Name` -> `[Customer, Name]`
    pub fn member_path(&self, parameter: &str) -> Option<Vec<String>> {
        match self {
            Expr::Parameter(p) if p == parameter => Some(Vec::new()),
            Expr::Property(inner, member) => {
                let mut path = inner.member_path(parameter)?;
                path.push(member.clone());
                Some(path)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Parameter(name) => write!(f, "{}", name),
            Expr::Property(inner, member) => write!(f, "{}.{}", inner, member),
            Expr::Constant(JsonValue::String(s)) => write!(f, "\"{}\"", s),
            Expr::Constant(value) => write!(f, "{}", value),
            Expr::Binary { op, left, right } => {
                write_operand(f, left)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, right)
            }
            Expr::Not(inner) => {
                write!(f, "!")?;
                write_operand(f, inner)
            }
            Expr::IsNull(inner) => write!(f, "{} == null", inner),
            Expr::Record(fields) => {
                let rendered: Vec<String> = fields
                    .iter()
                    .map(|(name, expr)| format!("{} = {}", name, expr))
                    .collect();
                write!(f, "new {{ {} }}", rendered.join(", "))
            }
            Expr::QueryRoot(entity) => write!(f, "Set<{}>()", entity),
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
    match expr {
        Expr::Binary { .. } | Expr::IsNull(_) => write!(f, "({})", expr),
        _ => write!(f, "{}", expr),
    }
}

/// Single-parameter lambda
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub parameter: String,
    pub body: Expr,
}

impl Lambda {
    pub fn new(parameter: &str, body: Expr) -> Self {
        Self {
            parameter: parameter.to_string(),
            body,
        }
    }

    /// Identity lambda `x => x`
    pub fn identity(parameter: &str) -> Self {
        Self::new(parameter, param(parameter))
    }

    /// Member-access lambda `x => x.field`
    pub fn field(parameter: &str, field: &str) -> Self {
        Self::new(parameter, param(parameter).prop(field))
    }

    /// Canonical form with the parameter renamed, so structurally identical
    /// lambdas compare equal regardless of parameter naming
    pub fn normalized(&self) -> Lambda {
        const CANONICAL: &str = "_";
        Lambda::new(CANONICAL, self.body.substitute(&self.parameter, &param(CANONICAL)))
    }

    /// Rebind the lambda to a different parameter name
    pub fn rebind(&self, parameter: &str) -> Lambda {
        Lambda::new(parameter, self.body.substitute(&self.parameter, &param(parameter)))
    }

    /// Apply the lambda to an argument expression
    pub fn apply(&self, argument: &Expr) -> Expr {
        self.body.substitute(&self.parameter, argument)
    }

    /// Parameters referenced by the body other than the lambda's own
    pub fn outer_parameters(&self) -> BTreeSet<String> {
        let mut parameters = self.body.free_parameters();
        parameters.remove(&self.parameter);
        parameters
    }

    pub fn is_identity(&self) -> bool {
        matches!(&self.body, Expr::Parameter(p) if *p == self.parameter)
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.parameter, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let lambda = Lambda::new(
            "o",
            param("o").prop("Id").gt(lit(1)).and(param("o").prop("Name").is_null().negate()),
        );
        assert_eq!(lambda.to_string(), "o => (o.Id > 1) && !(o.Name == null)");
        assert_eq!(lit("x").to_string(), "\"x\"");
    }

    #[test]
    fn test_normalized_ignores_parameter_names() {
        let a = Lambda::new("a", param("a").prop("Id").gt(lit(1)));
        let b = Lambda::new("b", param("b").prop("Id").gt(lit(1)));
        let c = Lambda::new("b", param("b").prop("Id").gt(lit(2)));

        assert_ne!(a, b);
        assert_eq!(a.normalized(), b.normalized());
        assert_ne!(a.normalized(), c.normalized());
    }

    #[test]
    fn test_outer_parameters_and_roots() {
        let lambda = Lambda::new("o", param("o").prop("CustomerId").equals(param("c").prop("Id")));
        assert_eq!(lambda.outer_parameters().into_iter().collect::<Vec<_>>(), vec!["c"]);

        let rooted = Lambda::new("o", Expr::QueryRoot("Customer".into()).prop("Id"));
        assert_eq!(rooted.body.query_roots(), vec!["Customer"]);
        assert!(rooted.outer_parameters().is_empty());
    }

    #[test]
    fn test_substitute_folds_record_access() {
        let element = record(vec![("Amount", param("o").prop("Total")), ("Tag", lit("x"))]);
        let selector = Lambda::new("e", param("e").prop("Amount"));

        assert_eq!(selector.apply(&element), param("o").prop("Total"));
    }

    #[test]
    fn test_member_path() {
        let expr = param("o").prop("Customer").prop("Name");
        assert_eq!(
            expr.member_path("o"),
            Some(vec!["Customer".to_string(), "Name".to_string()])
        );
        assert_eq!(expr.member_path("x"), None);
    }
}
