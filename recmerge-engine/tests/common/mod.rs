#![allow(dead_code)]

use recmerge_engine::AuditTableLogger;
use recmerge_model::{EntitySchema, Record, RelationDef, SchemaRegistry};
use recmerge_storage::{Filter, RecordStore, RecordStoreExt, Row, SqliteStore};
use serde_json::{json, Value};

pub const TABLES: &str = "
    CREATE TABLE model_without_relationships (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT,
        email TEXT,
        created_at TEXT,
        updated_at TEXT
    );
    CREATE TABLE soft_deletable_model_without_relationships (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT,
        created_at TEXT,
        updated_at TEXT,
        deleted_at TEXT
    );
    CREATE TABLE test_models (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT,
        parent_id INTEGER,
        profile_parent_id INTEGER,
        commentable_type TEXT,
        commentable_id INTEGER,
        created_at TEXT,
        updated_at TEXT
    );
    CREATE TABLE tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        created_at TEXT,
        updated_at TEXT
    );
    CREATE TABLE tag_test_model (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
        test_model_id INTEGER NOT NULL REFERENCES test_models(id) ON DELETE CASCADE,
        priority INTEGER NOT NULL DEFAULT 0,
        notes TEXT,
        created_at TEXT,
        updated_at TEXT
    );
    CREATE TABLE taggables (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
        taggable_type TEXT NOT NULL,
        taggable_id INTEGER NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0,
        notes TEXT,
        created_at TEXT,
        updated_at TEXT
    );
";

pub fn test_model_schema() -> EntitySchema {
    EntitySchema::new("test_model", "test_models")
        .relation(RelationDef::has_many("children", "test_models", "parent_id"))
        .relation(RelationDef::has_one("profile", "test_models", "profile_parent_id"))
        .relation(RelationDef::morph_many("comments", "test_models", "commentable"))
        .relation(RelationDef::belongs_to("parent", "test_models", "parent_id"))
        .relation(RelationDef::morph_to("commentable", "commentable"))
        .relation(
            RelationDef::belongs_to_many("tags", "tag_test_model", "test_model_id", "tag_id")
                .with_pivot(["priority", "notes"])
                .with_pivot_timestamps(),
        )
        .relation(
            RelationDef::morph_to_many("morph_tags", "taggables", "taggable", "tag_id")
                .with_pivot(["priority", "notes"])
                .with_pivot_timestamps(),
        )
}

pub fn tag_schema() -> EntitySchema {
    EntitySchema::new("tag", "tags")
        .relation(RelationDef::belongs_to_many(
            "test_models",
            "tag_test_model",
            "tag_id",
            "test_model_id",
        ))
        .relation(
            RelationDef::morphed_by_many("morph_test_models", "taggables", "tag_id", "taggable", "test_model")
                .with_pivot(["priority", "notes"]),
        )
}

pub fn registry() -> SchemaRegistry {
    [
        EntitySchema::new("model_without_relationships", "model_without_relationships"),
        EntitySchema::new(
            "soft_deletable_model_without_relationships",
            "soft_deletable_model_without_relationships",
        )
        .soft_deletes(),
        test_model_schema(),
        tag_schema(),
    ]
    .into_iter()
    .collect()
}

pub fn make_store() -> SqliteStore {
    let store = SqliteStore::open_in_memory(registry()).unwrap();
    store.execute_batch(TABLES).unwrap();
    store.execute_batch(AuditTableLogger::SQLITE_SCHEMA).unwrap();
    store
}

pub fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap()
}

pub fn create(store: &dyn RecordStore, entity_type: &str, attributes: Value) -> Record {
    store.create(entity_type, row(attributes)).unwrap()
}

pub fn test_model(store: &dyn RecordStore, name: &str) -> Record {
    create(store, "test_model", json!({ "name": name }))
}

pub fn tag(store: &dyn RecordStore, name: &str) -> Record {
    create(store, "tag", json!({ "name": name }))
}

pub fn attach_tag(store: &dyn RecordStore, model: &Record, tag: &Record, priority: i64, notes: &str) {
    let pivot = row(json!({
        "test_model_id": model.key.to_value(),
        "tag_id": tag.key.to_value(),
        "priority": priority,
        "notes": notes,
    }));
    store.insert("tag_test_model", &pivot).unwrap();
}

pub fn attach_morph_tag(store: &dyn RecordStore, model: &Record, tag: &Record, priority: i64, notes: &str) {
    let pivot = row(json!({
        "taggable_type": model.entity_type,
        "taggable_id": model.key.to_value(),
        "tag_id": tag.key.to_value(),
        "priority": priority,
        "notes": notes,
    }));
    store.insert("taggables", &pivot).unwrap();
}

/// Pivot rows of `model` in `tag_test_model`, ordered by insertion.
pub fn tag_pivots(store: &dyn RecordStore, model: &Record) -> Vec<Row> {
    store
        .select("tag_test_model", &Filter::eq("test_model_id", model.key.to_value()))
        .unwrap()
}

pub fn morph_tag_pivots(store: &dyn RecordStore, model: &Record) -> Vec<Row> {
    let filter = Filter::eq("taggable_id", model.key.to_value()).and("taggable_type", model.entity_type.as_str());
    store.select("taggables", &filter).unwrap()
}

/// The pivot row linking to `tag`, if any.
pub fn pivot_for<'r>(pivots: &'r [Row], tag: &Record) -> Option<&'r Row> {
    pivots.iter().find(|p| p["tag_id"] == tag.key.to_value())
}

pub fn tag_ids(pivots: &[Row]) -> Vec<Value> {
    let mut ids: Vec<Value> = pivots.iter().map(|p| p["tag_id"].clone()).collect();
    ids.sort_by_key(|v| v.as_i64());
    ids
}

pub fn count(store: &dyn RecordStore, table: &str, filter: Filter) -> u64 {
    store.count(table, &filter).unwrap()
}
