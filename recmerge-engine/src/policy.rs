//! Attribute eligibility and the attribute merge decision.
//!
//! [`AttributePolicy`] answers, for one entity type, whether an attribute may
//! be written on the target and which values a merge would copy. It holds no
//! state of its own, so the same inputs always give the same answers.

use recmerge_model::{is_null, EntitySchema, MergeConfig, MergeStrategy, Record};
use recmerge_storage::Row;

/// Why an attribute is left out of the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    /// The merge config says `skip`.
    Skipped,
    /// The merge config says `target`.
    KeptOnTarget,
    /// An allow-list is set and the attribute is not on it.
    NotAllowed,
    PrimaryKey,
    Timestamp,
    SoftDeleteMarker,
    NotMergeable,
}

/// Eligibility rules for one entity type, one merge config and one allow-list.
#[derive(Debug, Clone, Copy)]
pub struct AttributePolicy<'a> {
    schema: &'a EntitySchema,
    config: Option<&'a MergeConfig>,
    allowed: &'a [String],
}

impl<'a> AttributePolicy<'a> {
    pub fn new(schema: &'a EntitySchema, config: Option<&'a MergeConfig>, allowed: &'a [String]) -> Self {
        Self {
            schema,
            config,
            allowed,
        }
    }

    fn strategy_for(&self, attribute: &str) -> Option<MergeStrategy> {
        self.config.and_then(|c| c.strategy_for(attribute))
    }

    /// The first rule that excludes `attribute`, or `None` when it may be merged.
    ///
    /// An explicit config entry is checked before the allow-list, so a
    /// `skip` or `target` entry always wins.
    pub fn exclusion(&self, attribute: &str) -> Option<Exclusion> {
        match self.strategy_for(attribute) {
            Some(MergeStrategy::Skip) => return Some(Exclusion::Skipped),
            Some(MergeStrategy::UseTarget) => return Some(Exclusion::KeptOnTarget),
            _ => {}
        }
        self.structural_exclusion(attribute)
    }

    fn structural_exclusion(&self, attribute: &str) -> Option<Exclusion> {
        if !self.allowed.is_empty() && !self.allowed.iter().any(|a| a == attribute) {
            return Some(Exclusion::NotAllowed);
        }
        if attribute == self.schema.primary_key {
            return Some(Exclusion::PrimaryKey);
        }
        if self.schema.is_timestamp_column(attribute) {
            return Some(Exclusion::Timestamp);
        }
        if self.schema.is_soft_delete_column(attribute) {
            return Some(Exclusion::SoftDeleteMarker);
        }
        if self.schema.is_not_mergeable(attribute) {
            return Some(Exclusion::NotMergeable);
        }
        None
    }

    pub fn can_attribute_be_merged(&self, attribute: &str) -> bool {
        self.exclusion(attribute).is_none()
    }

    /// Whether the attribute belongs in a preview comparison. Attributes
    /// kept on the target are shown so the caller sees what will not change.
    pub fn is_reported(&self, attribute: &str) -> bool {
        match self.strategy_for(attribute) {
            Some(MergeStrategy::Skip) => false,
            _ => self.structural_exclusion(attribute).is_none(),
        }
    }

    /// The attribute writes a merge of `source` into `target` performs.
    pub fn changes(&self, source: &Record, target: &Record) -> Row {
        let mut changes = Row::new();
        for (attribute, value) in &source.attributes {
            if is_null(value) || !self.can_attribute_be_merged(attribute) {
                continue;
            }
            let overwrite = self.strategy_for(attribute) == Some(MergeStrategy::UseSource);
            if overwrite || target.is_null(attribute) {
                changes.insert(attribute.clone(), value.clone());
            }
        }
        changes
    }
}
