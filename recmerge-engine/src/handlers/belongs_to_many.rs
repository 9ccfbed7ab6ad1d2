use super::{local_key_value, required};
use crate::error::MergeResult;
use crate::registry::RelationshipHandler;
use recmerge_model::{Record, RelationDef, RelationKind};
use recmerge_storage::{Filter, RecordStore, Row};
use serde_json::Value;
use tracing::debug;

/// Moves pivot rows from the source to the target.
///
/// Serves plain and polymorphic many-to-many relations. Rows linking the
/// source to something the target is already linked to are dropped rather
/// than duplicated, and the target's own pivot rows are never rewritten.
#[derive(Debug, Clone, Copy, Default)]
pub struct BelongsToManyHandler;

impl BelongsToManyHandler {
    /// The type discriminator column and the value this record's side uses.
    fn discriminator<'a>(relation: &'a RelationDef, record: &Record) -> MergeResult<Option<(&'a str, Value)>> {
        match relation.kind {
            RelationKind::MorphToMany => {
                let column = required(relation, &relation.morph_type, "morph type")?;
                Ok(Some((column, Value::from(record.entity_type.as_str()))))
            }
            RelationKind::MorphedByMany => {
                let column = required(relation, &relation.morph_type, "morph type")?;
                let class = required(relation, &relation.morph_class, "morph class")?;
                Ok(Some((column, Value::from(class))))
            }
            _ => Ok(None),
        }
    }

    fn pivot_filter(relation: &RelationDef, record: &Record) -> MergeResult<Filter> {
        let mut filter = Filter::eq(relation.foreign_key.clone(), local_key_value(record, relation));
        if let Some((column, value)) = Self::discriminator(relation, record)? {
            filter = filter.and(column, value);
        }
        Ok(filter)
    }
}

impl RelationshipHandler for BelongsToManyHandler {
    fn handle(&self, store: &dyn RecordStore, source: &Record, target: &Record, relation: &RelationDef) -> MergeResult<()> {
        let related_key = required(relation, &relation.related_key, "related pivot key")?;
        let type_column = Self::discriminator(relation, target)?;

        let source_filter = Self::pivot_filter(relation, source)?;
        let rows = store.select(&relation.table, &source_filter)?;
        store.delete(&relation.table, &source_filter)?;

        let mut attached: Vec<Value> = store
            .select(&relation.table, &Self::pivot_filter(relation, target)?)?
            .into_iter()
            .filter_map(|row| row.get(related_key).cloned())
            .collect();

        let (mut moved, mut dropped) = (0usize, 0usize);
        for row in rows {
            let Some(related) = row.get(related_key).filter(|v| !v.is_null()).cloned() else {
                continue;
            };
            if attached.contains(&related) {
                dropped += 1;
                continue;
            }

            let mut pivot = Row::new();
            pivot.insert(relation.foreign_key.clone(), local_key_value(target, relation));
            pivot.insert(related_key.to_string(), related.clone());
            if let Some((column, value)) = &type_column {
                pivot.insert(column.to_string(), value.clone());
            }
            for column in &relation.pivot_columns {
                let is_key = *column == relation.foreign_key
                    || column == related_key
                    || type_column.as_ref().is_some_and(|(c, _)| *c == column.as_str());
                if is_key {
                    continue;
                }
                if let Some(value) = row.get(column) {
                    pivot.insert(column.clone(), value.clone());
                }
            }

            store.insert(&relation.table, &pivot)?;
            attached.push(related);
            moved += 1;
        }

        debug!(
            "Moved {} `{}` pivot row(s) to {}:{}, dropped {} already attached",
            moved, relation.name, target.entity_type, target.key, dropped
        );
        Ok(())
    }
}
