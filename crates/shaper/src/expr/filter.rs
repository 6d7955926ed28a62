//! Collection filters: predicate, ordering, paging and distinct

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Lambda;
use crate::error::{ShapeError, ShapeResult};

/// One ordering key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderingTerm {
    pub key: Lambda,
    pub descending: bool,
}

impl OrderingTerm {
    pub fn ascending(key: Lambda) -> Self {
        Self {
            key,
            descending: false,
        }
    }

    pub fn descending(key: Lambda) -> Self {
        Self {
            key,
            descending: true,
        }
    }
}

/// Filter applied to a collection navigation or a collection projection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub predicate: Option<Lambda>,
    pub ordering: Vec<OrderingTerm>,
    pub skip: Option<usize>,
    pub take: Option<usize>,
    pub distinct: bool,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a predicate; successive predicates are combined with `&&`
    pub fn where_(mut self, predicate: Lambda) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => {
                let next = predicate.rebind(&existing.parameter);
                Lambda::new(&existing.parameter, existing.body.and(next.body))
            }
            None => predicate,
        });
        self
    }

    /// Primary ascending ordering, replacing any previous ordering
    pub fn order_by(mut self, key: Lambda) -> Self {
        self.ordering = vec![OrderingTerm::ascending(key)];
        self
    }

    /// Primary descending ordering, replacing any previous ordering
    pub fn order_by_desc(mut self, key: Lambda) -> Self {
        self.ordering = vec![OrderingTerm::descending(key)];
        self
    }

    pub fn then_by(mut self, key: Lambda) -> Self {
        self.ordering.push(OrderingTerm::ascending(key));
        self
    }

    pub fn then_by_desc(mut self, key: Lambda) -> Self {
        self.ordering.push(OrderingTerm::descending(key));
        self
    }

    /// Skip elements; skipping after a take shrinks the taken window
    pub fn skip(mut self, count: usize) -> Self {
        if let Some(take) = self.take {
            self.take = Some(take.saturating_sub(count));
        }
        self.skip = Some(self.skip.unwrap_or(0) + count);
        self
    }

    /// Take elements; successive takes keep the smallest window
    pub fn take(mut self, count: usize) -> Self {
        self.take = Some(self.take.map_or(count, |take| take.min(count)));
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicate.is_none()
            && self.ordering.is_empty()
            && self.skip.is_none()
            && self.take.is_none()
            && !self.distinct
    }

    pub fn has_paging(&self) -> bool {
        self.skip.is_some() || self.take.is_some()
    }

    pub fn is_ordered(&self) -> bool {
        !self.ordering.is_empty()
    }

    /// Structural form with canonical lambda parameters
    pub fn normalized(&self) -> Filter {
        Filter {
            predicate: self.predicate.as_ref().map(Lambda::normalized),
            ordering: self
                .ordering
                .iter()
                .map(|term| OrderingTerm {
                    key: term.key.normalized(),
                    descending: term.descending,
                })
                .collect(),
            skip: self.skip,
            take: self.take,
            distinct: self.distinct,
        }
    }

    /// Structural equality ignoring lambda parameter names
    pub fn same_as(&self, other: &Filter) -> bool {
        self.normalized() == other.normalized()
    }

    fn lambdas(&self) -> impl Iterator<Item = &Lambda> {
        self.predicate
            .iter()
            .chain(self.ordering.iter().map(|term| &term.key))
    }

    /// Reject filters referencing anything other than their own element
    fn check_element_scope(&self, path: &str) -> ShapeResult<()> {
        for lambda in self.lambdas() {
            if let Some(outer) = lambda.outer_parameters().into_iter().next() {
                return Err(ShapeError::UnsupportedFilterPosition {
                    path: path.to_string(),
                    reason: format!(
                        "'{}' references the enclosing parameter '{}'",
                        lambda, outer
                    ),
                });
            }

            if let Some(root) = lambda.body.query_roots().into_iter().next() {
                return Err(ShapeError::UnsupportedFilterPosition {
                    path: path.to_string(),
                    reason: format!("'{}' references the query root '{}'", lambda, root),
                });
            }
        }

        Ok(())
    }

    /// Validate a filter attached to an include directive
    pub fn validate_for_include(&self, path: &str) -> ShapeResult<()> {
        if self.distinct {
            return Err(ShapeError::InvalidIncludeFilter {
                path: path.to_string(),
                reason: "Distinct is not supported in filtered includes".to_string(),
            });
        }

        if self.has_paging() && !self.is_ordered() {
            return Err(ShapeError::InvalidIncludeFilter {
                path: path.to_string(),
                reason: "Skip/Take on an included collection requires an ordering".to_string(),
            });
        }

        self.check_element_scope(path)
    }

    /// Validate a filter attached to a collection projection
    pub fn validate_for_collection(&self, path: &str) -> ShapeResult<()> {
        if self.distinct && (self.is_ordered() || self.has_paging()) {
            return Err(ShapeError::UnsupportedFilterPosition {
                path: path.to_string(),
                reason: "Distinct cannot be combined with ordering or paging in a correlated \
                         collection"
                    .to_string(),
            });
        }

        self.check_element_scope(path)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(ref predicate) = self.predicate {
            parts.push(format!("Where({})", predicate));
        }
        for (index, term) in self.ordering.iter().enumerate() {
            let operator = match (index, term.descending) {
                (0, false) => "OrderBy",
                (0, true) => "OrderByDescending",
                (_, false) => "ThenBy",
                (_, true) => "ThenByDescending",
            };
            parts.push(format!("{}({})", operator, term.key));
        }
        if self.distinct {
            parts.push("Distinct()".to_string());
        }
        if let Some(skip) = self.skip {
            parts.push(format!("Skip({})", skip));
        }
        if let Some(take) = self.take {
            parts.push(format!("Take({})", take));
        }

        if parts.is_empty() {
            write!(f, "<unfiltered>")
        } else {
            write!(f, "{}", parts.join("."))
        }
    }
}
