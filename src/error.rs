//! Error types shared across the dispatch core.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::context::ContextVariant;

/// Boxed error for failures raised by user code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures surfaced while filtering or invoking a handler.
///
/// Every variant is offered to the exception chain before the engine falls
/// back to a generic `500`.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The request resolved to no route, or the route carries no usable handler.
    #[error("no handler found")]
    HandlerNotFound,

    #[error("request body is required but absent")]
    NoRequestBody,

    #[error("validation failed: {0}")]
    ValidationFailed(ValidationErrors),

    /// A filter rejected the request; the inner error is what the filter returned.
    #[error("filter failed: {0}")]
    FilterFailure(Box<HandlerError>),

    /// The handler unwound while running.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// A capability was used on a context variant that does not carry it.
    #[error("`{capability}` is not available on {variant} contexts")]
    Unsupported {
        capability: &'static str,
        variant: ContextVariant,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("view error: {0}")]
    View(String),

    #[error(transparent)]
    Other(#[from] BoxError),
}

impl HandlerError {
    /// Wraps any displayable message as [`HandlerError::Other`].
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::Other(message.to_string().into())
    }

    /// Returns the error a filter produced, looking through [`HandlerError::FilterFailure`].
    pub fn root(&self) -> &HandlerError {
        match self {
            Self::FilterFailure(inner) => inner.root(),
            other => other,
        }
    }
}

/// A single field-level diagnostic produced by a [`Validate`](crate::context::Validate) impl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

/// Field-level diagnostics carried by [`HandlerError::ValidationFailed`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    violations: Vec<FieldViolation>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a violation on `field`.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.violations.push(FieldViolation {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// `Ok(())` when nothing was recorded, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for v in &self.violations {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", v.field, v.message)?;
            first = false;
        }
        Ok(())
    }
}

/// Route registration failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route {method} {pattern} is already registered")]
    Conflict { method: String, pattern: String },

    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },
}

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection is closed")]
    Closed,
}
