//! Built-in relationship handlers.

mod belongs_to_many;
mod has_one_or_many;
mod morph_one_or_many;

pub use belongs_to_many::BelongsToManyHandler;
pub use has_one_or_many::{HasManyHandler, HasOneHandler};
pub use morph_one_or_many::MorphOneOrManyHandler;

use crate::error::{MergeError, MergeResult};
use recmerge_model::{Record, RelationDef};
use serde_json::Value;

/// Value of the relation's local key on `record`. Records built without
/// their key column fall back to the record key.
pub(crate) fn local_key_value(record: &Record, relation: &RelationDef) -> Value {
    match record.get(&relation.local_key) {
        Some(value) if !value.is_null() => value.clone(),
        _ => record.key.to_value(),
    }
}

pub(crate) fn required<'a>(relation: &RelationDef, column: &'a Option<String>, what: &str) -> MergeResult<&'a str> {
    column.as_deref().ok_or_else(|| MergeError::InvalidRelation {
        relationship: relation.name.clone(),
        reason: format!("{} relation has no {what} column", relation.kind),
    })
}
