//! Core record model for recmerge.
//!
//! Defines the universal types that the storage adapter and the merge engine
//! depend on:
//! - [`Record`]: the generic data container (entity type, key, attribute map)
//! - [`EntitySchema`]: declares an entity type's table layout and relations
//! - [`RelationDef`] / [`RelationKind`]: statically declared relationships
//! - [`Mergeable`]: capability trait for typed models that can be merged
//! - [`MergeStrategy`] / [`MergeConfig`]: per-attribute merge policy
//! - [`MergeData`]: the read-only preview of a merge
//!
//! These types form the contract between the storage adapter and the merge
//! engine. They carry no persistence logic of their own.

mod data;
mod record;
mod schema;
mod strategy;

pub use data::{AttributeComparison, MergeData, RelationshipCount};
pub use record::{is_null, Actor, Record, RecordKey};
pub use schema::{EntitySchema, Mergeable, RelationDef, RelationKind, SchemaRegistry};
pub use strategy::{MergeConfig, MergeStrategy, ParseStrategyError};
