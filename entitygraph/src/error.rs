//! Error taxonomy (spec §7).

use thiserror::Error;

/// Top-level error type returned by entitygraph operations.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Payload did not satisfy declared field types. Not cached.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A payload's type tag does not correspond to the target type or any
    /// concrete subtype. Not cached.
    #[error("type mismatch: expected `{expected}` or a concrete subtype, found `{found}`")]
    TypeMismatch { expected: String, found: String },

    /// The underlying transport failed. No cache mutation for the failed
    /// operation.
    #[error("transport error: {0}")]
    Transport(String),

    /// A protected, server-side path field was targeted by a write before
    /// any transport call was made.
    #[error("refusing to write protected configuration field `{field}`")]
    ProtectedConfiguration { field: String },

    /// An id did not have the shape required by the calling context (e.g. a
    /// positive integer string).
    #[error("invalid identifier `{id}`: {reason}")]
    InvalidIdentifier { id: String, reason: String },

    /// `filter_strict` found at least one cached entity missing required
    /// fields.
    #[error("entity `{entity_id}` is missing required fields: {missing:?}")]
    StrictFilterGap { entity_id: String, missing: Vec<String> },

    /// Catch-all for malformed requests that don't fit a more specific
    /// variant.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

/// Collection of validation issues encountered while preparing or ingesting
/// an entity.
#[derive(Debug, Error)]
#[error("validation errors: {issues:?}")]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new<I>(issues: I) -> Self
    where
        I: IntoIterator<Item = ValidationIssue>,
    {
        Self {
            issues: issues.into_iter().collect(),
        }
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new([ValidationIssue::new(field, message)])
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type GraphResult<T> = Result<T, GraphError>;
pub type ValidationResult<T> = Result<T, ValidationError>;
