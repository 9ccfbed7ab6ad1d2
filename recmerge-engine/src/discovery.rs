use recmerge_model::{EntitySchema, RelationDef};

/// Relationships a merge reassigns: every declared relation in declaration
/// order, minus the protected ones.
pub fn relationships_for(schema: &EntitySchema) -> Vec<&RelationDef> {
    schema
        .relations
        .iter()
        .filter(|r| !schema.is_protected_relation(&r.name))
        .collect()
}
