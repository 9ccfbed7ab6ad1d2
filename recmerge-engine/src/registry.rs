//! Maps each relationship kind to the handler that reassigns it.

use crate::error::{MergeError, MergeResult};
use crate::handlers::{BelongsToManyHandler, HasManyHandler, HasOneHandler, MorphOneOrManyHandler};
use recmerge_model::{Record, RelationDef, RelationKind};
use recmerge_storage::RecordStore;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Moves the rows of one relationship from the source record to the target.
///
/// Handlers run inside the merge transaction; any error they return rolls
/// the whole merge back.
pub trait RelationshipHandler: Send + Sync {
    fn handle(
        &self,
        store: &dyn RecordStore,
        source: &Record,
        target: &Record,
        relation: &RelationDef,
    ) -> MergeResult<()>;
}

/// A registry entry: a handler, or an explicit instruction to leave the
/// relationship alone.
#[derive(Clone)]
pub enum HandlerEntry {
    Handler(Arc<dyn RelationshipHandler>),
    Skip,
}

impl HandlerEntry {
    pub fn handler(handler: impl RelationshipHandler + 'static) -> Self {
        Self::Handler(Arc::new(handler))
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(_) => f.write_str("Handler(..)"),
            Self::Skip => f.write_str("Skip"),
        }
    }
}

/// Outcome of looking a kind up in the registry.
pub enum Resolution<'a> {
    Handler(&'a dyn RelationshipHandler),
    Skip,
    Unresolved,
}

/// Relationship kind to handler table.
#[derive(Debug, Clone)]
pub struct HandlerRegistry {
    entries: HashMap<RelationKind, HandlerEntry>,
}

impl HandlerRegistry {
    /// A registry with no entries; every kind is unresolved.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// The built-in table. Ownership-side and through relationships are
    /// skipped; everything else has a handler.
    pub fn defaults() -> Self {
        let mut registry = Self::empty();
        let pivot = HandlerEntry::handler(BelongsToManyHandler);
        let morph = HandlerEntry::handler(MorphOneOrManyHandler);
        registry
            .skip(RelationKind::BelongsTo)
            .skip(RelationKind::MorphTo)
            .skip(RelationKind::HasOneThrough)
            .skip(RelationKind::HasManyThrough)
            .register(RelationKind::HasOne, HasOneHandler)
            .register(RelationKind::HasMany, HasManyHandler)
            .insert(RelationKind::MorphOne, morph.clone())
            .insert(RelationKind::MorphMany, morph)
            .insert(RelationKind::BelongsToMany, pivot.clone())
            .insert(RelationKind::MorphToMany, pivot.clone())
            .insert(RelationKind::MorphedByMany, pivot);
        registry
    }

    /// Sets the entry for `kind`, replacing any existing one.
    pub fn insert(&mut self, kind: RelationKind, entry: HandlerEntry) -> &mut Self {
        self.entries.insert(kind, entry);
        self
    }

    pub fn register(&mut self, kind: RelationKind, handler: impl RelationshipHandler + 'static) -> &mut Self {
        self.insert(kind, HandlerEntry::handler(handler))
    }

    pub fn skip(&mut self, kind: RelationKind) -> &mut Self {
        self.insert(kind, HandlerEntry::Skip)
    }

    pub fn remove(&mut self, kind: RelationKind) -> Option<HandlerEntry> {
        self.entries.remove(&kind)
    }

    /// Applies overrides on top of this table; overrides win.
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = (RelationKind, HandlerEntry)>) -> Self {
        self.entries.extend(overrides);
        self
    }

    pub fn resolve(&self, kind: RelationKind) -> Resolution<'_> {
        match self.entries.get(&kind) {
            Some(HandlerEntry::Handler(handler)) => Resolution::Handler(&**handler),
            Some(HandlerEntry::Skip) => Resolution::Skip,
            None => Resolution::Unresolved,
        }
    }

    /// The handler for `relation`, `None` when its kind is skipped.
    pub fn handler_for(&self, relation: &RelationDef) -> MergeResult<Option<&dyn RelationshipHandler>> {
        match self.resolve(relation.kind) {
            Resolution::Handler(handler) => Ok(Some(handler)),
            Resolution::Skip => Ok(None),
            Resolution::Unresolved => Err(MergeError::MissingHandler {
                kind: relation.kind,
                relationship: relation.name.clone(),
            }),
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::defaults()
    }
}
