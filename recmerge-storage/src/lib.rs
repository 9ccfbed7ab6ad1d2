//! Storage layer for recmerge.
//!
//! Defines the record store contract the merge engine consumes and ships a
//! SQLite implementation of it.
//!
//! # Architecture
//!
//! - [`RecordStore`] exposes table-level primitives (select, count, update,
//!   insert, delete, search) plus transaction control
//! - [`RecordStoreExt`] layers record-level helpers on top (find, create,
//!   save, soft delete, refresh, merge candidates), driven by each entity
//!   type's [`EntitySchema`](recmerge_model::EntitySchema)
//! - [`SqliteStore`] implements the contract on a single `rusqlite`
//!   connection with savepoint-based nested transactions

mod error;
mod sqlite;
mod store;

pub use error::{StorageError, StorageResult};
pub use sqlite::SqliteStore;
pub use store::{now_timestamp, Filter, RecordStore, RecordStoreExt, Row};
