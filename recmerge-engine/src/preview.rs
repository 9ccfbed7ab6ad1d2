//! Read-only preview of a merge: attribute comparison and related row counts.

use crate::discovery::relationships_for;
use crate::error::MergeResult;
use crate::handlers::local_key_value;
use crate::policy::AttributePolicy;
use recmerge_model::{AttributeComparison, EntitySchema, Record, RelationDef, RelationKind, RelationshipCount};
use recmerge_storage::{Filter, RecordStore};
use serde_json::Value;
use std::collections::BTreeMap;

/// Source and target values of every reported attribute of either record.
pub fn build_comparison(
    policy: &AttributePolicy<'_>,
    source: &Record,
    target: &Record,
) -> BTreeMap<String, AttributeComparison> {
    source
        .attribute_names()
        .chain(target.attribute_names())
        .filter(|name| policy.is_reported(name))
        .map(|name| {
            (
                name.to_string(),
                AttributeComparison::new(source.get_or_null(name), target.get_or_null(name)),
            )
        })
        .collect()
}

/// Source and target counts for every relationship the merge would touch.
pub fn build_relationship_counts(
    store: &dyn RecordStore,
    schema: &EntitySchema,
    source: &Record,
    target: &Record,
) -> MergeResult<BTreeMap<String, RelationshipCount>> {
    let mut counts = BTreeMap::new();
    for relation in relationships_for(schema) {
        let count = RelationshipCount::new(
            relation.name.clone(),
            count_related(store, source, relation)?,
            count_related(store, target, relation)?,
        );
        counts.insert(relation.name.clone(), count);
    }
    Ok(counts)
}

/// Number of rows `record` reaches through `relation`.
pub fn count_related(store: &dyn RecordStore, record: &Record, relation: &RelationDef) -> MergeResult<u64> {
    let local = local_key_value(record, relation);
    let count = match relation.kind {
        RelationKind::HasOne | RelationKind::HasMany | RelationKind::BelongsToMany => {
            store.count(&relation.table, &Filter::eq(relation.foreign_key.clone(), local))?
        }
        RelationKind::MorphOne | RelationKind::MorphMany | RelationKind::MorphToMany => {
            let mut filter = Filter::eq(relation.foreign_key.clone(), local);
            if let Some(column) = &relation.morph_type {
                filter = filter.and(column.clone(), Value::from(record.entity_type.as_str()));
            }
            store.count(&relation.table, &filter)?
        }
        RelationKind::MorphedByMany => {
            let mut filter = Filter::eq(relation.foreign_key.clone(), local);
            if let (Some(column), Some(class)) = (&relation.morph_type, &relation.morph_class) {
                filter = filter.and(column.clone(), Value::from(class.as_str()));
            }
            store.count(&relation.table, &filter)?
        }
        RelationKind::BelongsTo => match record.get(&relation.foreign_key) {
            Some(owner) if !owner.is_null() => store
                .count(&relation.table, &Filter::eq(relation.local_key.clone(), owner.clone()))?
                .min(1),
            _ => 0,
        },
        RelationKind::MorphTo => count_morph_owner(store, record, relation)?,
        RelationKind::HasOneThrough | RelationKind::HasManyThrough => {
            let total = count_through(store, local, relation)?;
            if relation.kind == RelationKind::HasOneThrough {
                total.min(1)
            } else {
                total
            }
        }
    };
    Ok(count)
}

fn count_morph_owner(store: &dyn RecordStore, record: &Record, relation: &RelationDef) -> MergeResult<u64> {
    let owner_key = record.get_or_null(&relation.foreign_key);
    let owner_type = relation.morph_type.as_deref().and_then(|c| record.get_str(c));
    let (Some(owner_type), false) = (owner_type, owner_key.is_null()) else {
        return Ok(0);
    };
    let Some(owner) = store.schemas().get(owner_type) else {
        return Ok(0);
    };
    let filter = Filter::eq(owner.primary_key.clone(), owner_key);
    Ok(store.count(&owner.table, &filter)?.min(1))
}

fn count_through(store: &dyn RecordStore, local: Value, relation: &RelationDef) -> MergeResult<u64> {
    let (Some(through), Some(far_key)) = (&relation.through_table, &relation.related_key) else {
        return Ok(0);
    };
    let mut total = 0;
    for row in store.select(through, &Filter::eq(relation.foreign_key.clone(), local))? {
        let Some(key) = row.get(&relation.related_primary_key) else {
            continue;
        };
        total += store.count(&relation.table, &Filter::eq(far_key.clone(), key.clone()))?;
    }
    Ok(total)
}
