//! API error taxonomy.
//!
//! Every failure surfaced through a resolver is one of these variants,
//! carried to the client as a GraphQL error with a `code` extension.
//! Store errors propagate untranslated except for constraint violations,
//! which map onto the conflict/validation variants.

use async_graphql::ErrorExtensions;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Identifier does not resolve to a record.
    #[error("{0} not found")]
    NotFound(String),

    /// Required-field or type-shape violation on input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Uniqueness/integrity violation surfaced from the store.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown operator key or malformed filter shape.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// Limit/offset/nesting-depth out of bounds.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Fatal: the schema could not be assembled.
    #[error("schema build failed: {0}")]
    SchemaBuild(String),

    /// Transient or unclassified store error; never retried here.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl ApiError {
    /// Stable machine-readable code for the `code` error extension.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::InvalidFilter(_) => "INVALID_FILTER",
            ApiError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ApiError::SchemaBuild(_) => "SCHEMA_BUILD_ERROR",
            ApiError::Store(_) => "STORE_ERROR",
        }
    }

    /// Classify a store error from a write: uniqueness violations become
    /// conflicts, foreign-key violations become validation errors.
    pub fn from_write(err: sqlx::Error, entity: &str) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return ApiError::Conflict(format!("{entity}: {}", db_err.message()));
            }
            if db_err.is_foreign_key_violation() {
                return ApiError::Validation(format!(
                    "{entity}: foreign key violation: {}",
                    db_err.message()
                ));
            }
        }
        ApiError::Store(err)
    }
}

// Resolvers must convert through `extend()`: a plain `?` would go through
// async-graphql's blanket Display conversion and lose the code extension.
impl ErrorExtensions for ApiError {
    fn extend(&self) -> async_graphql::Error {
        async_graphql::Error::new(self.to_string())
            .extend_with(|_, ext| ext.set("code", self.code()))
    }
}
