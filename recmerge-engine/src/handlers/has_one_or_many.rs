use super::local_key_value;
use crate::error::{MergeError, MergeResult};
use crate::registry::RelationshipHandler;
use recmerge_model::{Record, RelationDef};
use recmerge_storage::{Filter, RecordStore, Row};
use tracing::debug;

/// Re-points every related row's foreign key at the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct HasManyHandler;

impl RelationshipHandler for HasManyHandler {
    fn handle(&self, store: &dyn RecordStore, source: &Record, target: &Record, relation: &RelationDef) -> MergeResult<()> {
        let mut changes = Row::new();
        changes.insert(relation.foreign_key.clone(), local_key_value(target, relation));
        let filter = Filter::eq(relation.foreign_key.clone(), local_key_value(source, relation));

        let moved = store.update(&relation.table, &filter, &changes)?;
        debug!("Moved {} row(s) of `{}` to {}:{}", moved, relation.name, target.entity_type, target.key);
        Ok(())
    }
}

/// Re-points the single related row, if there is one.
#[derive(Debug, Clone, Copy, Default)]
pub struct HasOneHandler;

impl RelationshipHandler for HasOneHandler {
    fn handle(&self, store: &dyn RecordStore, source: &Record, target: &Record, relation: &RelationDef) -> MergeResult<()> {
        let filter = Filter::eq(relation.foreign_key.clone(), local_key_value(source, relation));
        let Some(related) = store.select(&relation.table, &filter)?.into_iter().next() else {
            debug!("No `{}` row to move from {}:{}", relation.name, source.entity_type, source.key);
            return Ok(());
        };
        // The moved row is addressed by its own key.
        let related_key = match related.get(&relation.related_primary_key) {
            Some(key) if !key.is_null() => key.clone(),
            _ => {
                return Err(MergeError::InvalidRelation {
                    relationship: relation.name.clone(),
                    reason: format!(
                        "related row in `{}` has no `{}` value",
                        relation.table, relation.related_primary_key
                    ),
                });
            }
        };

        let mut changes = Row::new();
        changes.insert(relation.foreign_key.clone(), local_key_value(target, relation));
        store.update(
            &relation.table,
            &Filter::eq(relation.related_primary_key.clone(), related_key),
            &changes,
        )?;
        debug!("Moved `{}` row to {}:{}", relation.name, target.entity_type, target.key);
        Ok(())
    }
}
