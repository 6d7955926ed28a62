//! Non-fatal diagnostics collected during query compilation

use serde::Serialize;

use crate::error::{ErrorCategory, ShapeError};

/// A structured warning produced while compiling a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub category: ErrorCategory,
    pub message: String,
    pub paths: Vec<String>,
}

impl Diagnostic {
    pub fn from_error(error: &ShapeError) -> Self {
        Self {
            category: error.category(),
            message: error.to_string(),
            paths: error.paths(),
        }
    }
}

/// Warnings raised while compiling one query
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a recoverable error as a warning, or return it when `strict` is set
    pub fn warn_or_fail(&mut self, error: ShapeError, strict: bool) -> Result<(), ShapeError> {
        if strict {
            return Err(error);
        }

        tracing::warn!(category = %error.category(), "{}", error);
        self.entries.push(Diagnostic::from_error(&error));
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check whether a warning of the given category was recorded
    pub fn contains(&self, category: ErrorCategory) -> bool {
        self.entries.iter().any(|entry| entry.category == category)
    }
}
