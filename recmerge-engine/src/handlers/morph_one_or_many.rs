use super::{local_key_value, required};
use crate::error::MergeResult;
use crate::registry::RelationshipHandler;
use recmerge_model::{Record, RelationDef};
use recmerge_storage::{Filter, RecordStore, Row};
use serde_json::Value;
use tracing::debug;

/// Re-points polymorphic children: both the id and the type columns are
/// rewritten to the target's.
#[derive(Debug, Clone, Copy, Default)]
pub struct MorphOneOrManyHandler;

impl RelationshipHandler for MorphOneOrManyHandler {
    fn handle(&self, store: &dyn RecordStore, source: &Record, target: &Record, relation: &RelationDef) -> MergeResult<()> {
        let type_column = required(relation, &relation.morph_type, "morph type")?;

        let filter = Filter::eq(relation.foreign_key.clone(), local_key_value(source, relation))
            .and(type_column, Value::from(source.entity_type.as_str()));
        let mut changes = Row::new();
        changes.insert(relation.foreign_key.clone(), local_key_value(target, relation));
        changes.insert(type_column.to_string(), Value::from(target.entity_type.as_str()));

        let moved = store.update(&relation.table, &filter, &changes)?;
        debug!("Moved {} `{}` row(s) to {}:{}", moved, relation.name, target.entity_type, target.key);
        Ok(())
    }
}
