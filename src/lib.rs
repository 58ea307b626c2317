//! Registro: a GraphQL API generated from entity metadata.
//!
//! Entity descriptors ([`meta`]) drive everything downstream: the SQLite
//! schema ([`db`]), the GraphQL object/input types, the filter language and
//! the CRUD operations ([`graphql`]). Adding an entity to the catalog is the
//! whole job; no per-entity resolver code exists anywhere.

pub mod config;
pub mod db;
pub mod graphql;
pub mod meta;
