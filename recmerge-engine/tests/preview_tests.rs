mod common;

use common::*;
use pretty_assertions::assert_eq;
use recmerge_engine::{count_related, AttributePolicy, Exclusion, RecordMerge, SupportsMerging};
use recmerge_model::{
    AttributeComparison, EntitySchema, MergeConfig, MergeStrategy, RelationDef, RelationshipCount, SchemaRegistry,
};
use recmerge_storage::{RecordStoreExt, SqliteStore};
use serde_json::{json, Value};

// ── Attribute eligibility ────────────────────────────────────────

#[test]
fn eligibility_rules_in_order() {
    let schema = EntitySchema::new("contact", "contacts")
        .soft_deletes()
        .not_mergeable(["external_ref"]);
    let config = MergeConfig::make([
        ("nickname", MergeStrategy::Skip),
        ("email", MergeStrategy::UseTarget),
        ("id", MergeStrategy::UseSource),
    ]);
    let allowed: Vec<String> = Vec::new();
    let policy = AttributePolicy::new(&schema, Some(&config), &allowed);

    assert_eq!(policy.exclusion("nickname"), Some(Exclusion::Skipped));
    assert_eq!(policy.exclusion("email"), Some(Exclusion::KeptOnTarget));
    assert_eq!(policy.exclusion("id"), Some(Exclusion::PrimaryKey));
    assert_eq!(policy.exclusion("created_at"), Some(Exclusion::Timestamp));
    assert_eq!(policy.exclusion("updated_at"), Some(Exclusion::Timestamp));
    assert_eq!(policy.exclusion("deleted_at"), Some(Exclusion::SoftDeleteMarker));
    assert_eq!(policy.exclusion("external_ref"), Some(Exclusion::NotMergeable));
    assert!(policy.can_attribute_be_merged("name"));
}

#[test]
fn allow_list_excludes_everything_else() {
    let schema = EntitySchema::new("contact", "contacts");
    let allowed = vec!["name".to_string()];
    let policy = AttributePolicy::new(&schema, None, &allowed);

    assert!(policy.can_attribute_be_merged("name"));
    assert_eq!(policy.exclusion("email"), Some(Exclusion::NotAllowed));
}

#[test]
fn soft_delete_column_is_mergeable_without_soft_deletes() {
    let schema = EntitySchema::new("contact", "contacts");
    let policy = AttributePolicy::new(&schema, None, &[]);
    assert!(policy.can_attribute_be_merged("deleted_at"));
}

#[test]
fn eligibility_is_deterministic() {
    let schema = EntitySchema::new("contact", "contacts").not_mergeable(["x"]);
    let config = MergeConfig::make([("y", MergeStrategy::Skip)]);
    let policy = AttributePolicy::new(&schema, Some(&config), &[]);
    for attribute in ["x", "y", "z", "id", "created_at"] {
        let first = policy.can_attribute_be_merged(attribute);
        assert!((0..10).all(|_| policy.can_attribute_be_merged(attribute) == first));
    }
}

// ── Comparison ───────────────────────────────────────────────────

#[test]
fn preview_compares_eligible_attributes() {
    let store = make_store();
    let a = create(&store, "model_without_relationships", json!({"name": "A", "description": "desc-A"}));
    let b = create(&store, "model_without_relationships", json!({"name": "B"}));

    let data = RecordMerge::new(&store).from(a.clone()).to(b.clone()).preview().unwrap();

    assert_eq!(data.source, a);
    assert_eq!(data.target, b);
    let names: Vec<_> = data.comparison.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["description", "email", "name"]);
    assert_eq!(
        data.comparison["description"],
        AttributeComparison::new(json!("desc-A"), Value::Null)
    );
    assert_eq!(data.comparison["name"], AttributeComparison::new(json!("A"), json!("B")));
    assert!(data.relationship_counts.is_empty());
}

#[test]
fn comparison_reports_kept_attributes_but_not_skipped_ones() {
    let store = make_store();
    let a = create(&store, "model_without_relationships", json!({"name": "A", "email": "a@x"}));
    let b = create(&store, "model_without_relationships", json!({"name": "B"}));

    let config = MergeConfig::make([("name", MergeStrategy::UseTarget), ("email", MergeStrategy::Skip)]);
    let data = RecordMerge::new(&store)
        .from(a)
        .to(b)
        .with_merge_config(Some(config))
        .preview()
        .unwrap();

    assert!(data.comparison.contains_key("name"));
    assert!(!data.comparison.contains_key("email"));
}

#[test]
fn preview_writes_nothing() {
    let store = make_store();
    let a = create(&store, "model_without_relationships", json!({"name": "A", "description": "desc-A"}));
    let b = create(&store, "model_without_relationships", json!({"name": "B"}));

    let merge = RecordMerge::new(&store).from(a.clone()).to(b.clone());
    merge.preview().unwrap();
    merge.preview().unwrap();

    assert_eq!(store.refresh(&a).unwrap(), a);
    assert_eq!(store.refresh(&b).unwrap(), b);
}

// ── Relationship counts ──────────────────────────────────────────

#[test]
fn preview_counts_pivot_relationships() {
    let store = make_store();
    let source = test_model(&store, "Source");
    let target = test_model(&store, "Target");
    let (t1, t2, t3) = (tag(&store, "Tag 1"), tag(&store, "Tag 2"), tag(&store, "Tag 3"));
    attach_tag(&store, &source, &t1, 1, "Regular tag");
    attach_morph_tag(&store, &source, &t2, 2, "Morph tag");
    attach_tag(&store, &target, &t3, 3, "Target tag");

    let data = source.preview_merge_to(&store, &target, None).unwrap();

    assert_eq!(data.relationship_counts["tags"], RelationshipCount::new("tags", 1, 1));
    assert_eq!(data.relationship_counts["morph_tags"], RelationshipCount::new("morph_tags", 1, 0));
    assert_eq!(data.rows_to_reassign(), 2);
}

#[test]
fn preview_counts_children_and_owners() {
    let store = make_store();
    let owner = test_model(&store, "Owner");
    let source = create(&store, "test_model", json!({"name": "Source", "parent_id": owner.key.to_value()}));
    let target = create(
        &store,
        "test_model",
        json!({"name": "Target", "commentable_type": "test_model", "commentable_id": owner.key.to_value()}),
    );
    for name in ["c1", "c2"] {
        create(&store, "test_model", json!({"name": name, "parent_id": source.key.to_value()}));
    }
    create(&store, "test_model", json!({"name": "p", "profile_parent_id": target.key.to_value()}));

    let data = RecordMerge::new(&store).from(source).to(target).preview().unwrap();
    let counts = &data.relationship_counts;

    assert_eq!(counts["children"], RelationshipCount::new("children", 2, 0));
    assert_eq!(counts["profile"], RelationshipCount::new("profile", 0, 1));
    assert_eq!(counts["parent"], RelationshipCount::new("parent", 1, 0));
    assert_eq!(counts["commentable"], RelationshipCount::new("commentable", 0, 1));
    assert_eq!(counts["comments"], RelationshipCount::new("comments", 0, 0));
}

#[test]
fn through_relations_sum_far_rows() {
    const THROUGH_TABLES: &str = "
        CREATE TABLE countries (id INTEGER PRIMARY KEY, name TEXT, created_at TEXT, updated_at TEXT);
        CREATE TABLE users (id INTEGER PRIMARY KEY, country_id INTEGER);
        CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER);
    ";
    let schema = EntitySchema::new("country", "countries")
        .relation(RelationDef::has_many_through("posts", "posts", "users", "country_id", "user_id"))
        .relation(RelationDef::has_one_through("first_post", "posts", "users", "country_id", "user_id"));
    let registry: SchemaRegistry = [schema.clone()].into_iter().collect();
    let store = SqliteStore::open_in_memory(registry).unwrap();
    store.execute_batch(THROUGH_TABLES).unwrap();

    let country = create(&store, "country", json!({"name": "Sweden"}));
    store
        .execute_batch(
            "INSERT INTO users (id, country_id) VALUES (1, 1), (2, 1), (3, 2);
             INSERT INTO posts (user_id) VALUES (1), (1), (2), (3);",
        )
        .unwrap();

    assert_eq!(count_related(&store, &country, &schema.relations[0]).unwrap(), 3);
    assert_eq!(count_related(&store, &country, &schema.relations[1]).unwrap(), 1);
}

// ── Candidates ───────────────────────────────────────────────────

#[test]
fn possible_records_for_merging_excludes_self() {
    let store = make_store();
    let source = test_model(&store, "Acme");
    let other = test_model(&store, "Acme Two");
    test_model(&store, "Unrelated");

    let found = source.possible_records_for_merging(&store, "Acme", 10).unwrap();
    assert_eq!(found, vec![store.refresh(&other).unwrap()]);
}
