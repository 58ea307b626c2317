//! Generated GraphQL API: types, filters, operations and assembly.

pub mod compile;
pub mod errors;
pub mod filters;
pub mod operations;
pub mod schema;
pub mod types;

pub use errors::ApiError;
pub use schema::{ApiStats, SchemaLoader, build_schema};
