use crate::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Source and target values of one attribute, read before the merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeComparison {
    pub source_value: Value,
    pub target_value: Value,
}

impl AttributeComparison {
    pub fn new(source_value: Value, target_value: Value) -> Self {
        Self {
            source_value,
            target_value,
        }
    }

    pub fn differs(&self) -> bool {
        self.source_value != self.target_value
    }
}

/// Number of related rows on each side of a relationship, before the merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipCount {
    pub relationship: String,
    pub source_count: u64,
    pub target_count: u64,
}

impl RelationshipCount {
    pub fn new(relationship: impl Into<String>, source_count: u64, target_count: u64) -> Self {
        Self {
            relationship: relationship.into(),
            source_count,
            target_count,
        }
    }
}

/// The complete preview of a merge. Never persisted by the engine itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeData {
    pub source: Record,
    pub target: Record,
    pub relationship_counts: BTreeMap<String, RelationshipCount>,
    pub comparison: BTreeMap<String, AttributeComparison>,
}

impl MergeData {
    /// Total related rows that would move from source to target.
    pub fn rows_to_reassign(&self) -> u64 {
        self.relationship_counts.values().map(|c| c.source_count).sum()
    }

    /// Attributes whose source and target values differ.
    pub fn differing_attributes(&self) -> impl Iterator<Item = &str> {
        self.comparison
            .iter()
            .filter(|(_, c)| c.differs())
            .map(|(name, _)| name.as_str())
    }
}
