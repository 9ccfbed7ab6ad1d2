//! The merge orchestrator.

use crate::discovery::relationships_for;
use crate::error::{MergeError, MergeResult};
use crate::logger::MergeLogger;
use crate::policy::AttributePolicy;
use crate::preview::{build_comparison, build_relationship_counts};
use crate::registry::HandlerRegistry;
use recmerge_model::{Actor, MergeConfig, MergeData, Record};
use recmerge_storage::{RecordStore, RecordStoreExt};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Callback run after a merge's writes, before commit. Receives the source,
/// the merged target and the actor by value. An error rolls the merge back.
pub type AfterMerging = Box<dyn FnOnce(Record, Record, Option<Actor>) -> MergeResult<()> + Send>;

/// Progress of a [`RecordMerge`]. `Failed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Configured,
    Validated,
    AttributesMerged,
    RelationshipsReassigned,
    Logged,
    Completed,
    Failed,
}

/// Checks that a merge of `source` into `target` makes sense. Has no side effects.
pub fn validate<'r>(source: Option<&'r Record>, target: Option<&'r Record>) -> MergeResult<(&'r Record, &'r Record)> {
    let source = source.ok_or(MergeError::NoSource)?;
    let target = target.ok_or(MergeError::NoTarget)?;
    if source.entity_type != target.entity_type {
        return Err(MergeError::TypeMismatch {
            source_record: Box::new(source.clone()),
            target_record: Box::new(target.clone()),
        });
    }
    if source.key == target.key {
        return Err(MergeError::IdenticalRecord {
            source_record: Box::new(source.clone()),
            target_record: Box::new(target.clone()),
        });
    }
    Ok((source, target))
}

/// Merges one record into another of the same entity type.
///
/// ```
/// use recmerge_engine::RecordMerge;
/// use recmerge_model::{EntitySchema, RecordKey, SchemaRegistry};
/// use recmerge_storage::{RecordStoreExt, SqliteStore};
/// use serde_json::json;
///
/// let registry: SchemaRegistry = [EntitySchema::new("contact", "contacts")].into_iter().collect();
/// let store = SqliteStore::open_in_memory(registry).unwrap();
/// store
///     .execute_batch("CREATE TABLE contacts (id INTEGER PRIMARY KEY, name TEXT, email TEXT, created_at TEXT, updated_at TEXT);")
///     .unwrap();
/// let source = store.create("contact", json!({"name": "A", "email": "a@example.com"}).as_object().cloned().unwrap()).unwrap();
/// let target = store.create("contact", json!({"name": "B"}).as_object().cloned().unwrap()).unwrap();
///
/// let merged = RecordMerge::new(&store).from(source).to(target).merge().unwrap();
/// assert_eq!(merged.get_str("name"), Some("B"));
/// assert_eq!(merged.get_str("email"), Some("a@example.com"));
/// assert!(store.find("contact", &RecordKey::Int(1)).unwrap().is_none());
/// ```
pub struct RecordMerge<'a> {
    store: &'a dyn RecordStore,
    source: Option<Record>,
    target: Option<Record>,
    performed_by: Option<Actor>,
    merge_config: Option<MergeConfig>,
    allowed_attributes: Vec<String>,
    delete_source: bool,
    handlers: Arc<HandlerRegistry>,
    loggers: Vec<Arc<dyn MergeLogger>>,
    after_merging: Option<AfterMerging>,
    state: MergeState,
}

impl<'a> RecordMerge<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self {
            store,
            source: None,
            target: None,
            performed_by: None,
            merge_config: None,
            allowed_attributes: Vec::new(),
            delete_source: true,
            handlers: Arc::new(HandlerRegistry::defaults()),
            loggers: Vec::new(),
            after_merging: None,
            state: MergeState::Configured,
        }
    }

    pub fn from(mut self, source: Record) -> Self {
        self.source = Some(source);
        self
    }

    pub fn to(mut self, target: Record) -> Self {
        self.target = Some(target);
        self
    }

    pub fn performed_by(mut self, actor: Option<Actor>) -> Self {
        self.performed_by = actor;
        self
    }

    pub fn with_merge_config(mut self, config: Option<MergeConfig>) -> Self {
        self.merge_config = config;
        self
    }

    /// Replaces the allow-list. An empty list allows every attribute.
    pub fn allowed_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Adds to the allow-list. Each item may hold several comma-separated names.
    pub fn allow_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for item in attributes {
            self.allowed_attributes.extend(
                item.as_ref()
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from),
            );
        }
        self
    }

    pub fn after_merging<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Record, Record, Option<Actor>) -> MergeResult<()> + Send + 'static,
    {
        self.after_merging = Some(Box::new(callback));
        self
    }

    pub fn delete_after_merging(mut self, delete: bool) -> Self {
        self.delete_source = delete;
        self
    }

    pub fn dont_delete_after_merging(self) -> Self {
        self.delete_after_merging(false)
    }

    pub fn with_handlers(mut self, handlers: Arc<HandlerRegistry>) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_loggers(mut self, loggers: Vec<Arc<dyn MergeLogger>>) -> Self {
        self.loggers = loggers;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn MergeLogger>) -> Self {
        self.loggers.push(logger);
        self
    }

    pub fn state(&self) -> MergeState {
        self.state
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed_attributes
    }

    /// Whether the configured merge would write `attribute` on the target.
    pub fn can_attribute_be_merged(&self, attribute: &str) -> MergeResult<bool> {
        let (source, _) = validate(self.source.as_ref(), self.target.as_ref())?;
        let schema = self.store.schema_for(&source.entity_type)?;
        Ok(AttributePolicy::new(schema, self.merge_config.as_ref(), &self.allowed_attributes)
            .can_attribute_be_merged(attribute))
    }

    /// What the merge would do, without writing anything.
    pub fn preview(&self) -> MergeResult<MergeData> {
        let (source, target) = validate(self.source.as_ref(), self.target.as_ref())?;
        let schema = self.store.schema_for(&source.entity_type)?;
        let policy = AttributePolicy::new(schema, self.merge_config.as_ref(), &self.allowed_attributes);

        Ok(MergeData {
            source: source.clone(),
            target: target.clone(),
            relationship_counts: build_relationship_counts(self.store, schema, source, target)?,
            comparison: build_comparison(&policy, source, target),
        })
    }

    /// Runs the merge in one transaction and returns the refreshed target.
    ///
    /// On any error the transaction is rolled back, the state becomes
    /// [`MergeState::Failed`] and the error is returned as is. Once the
    /// transaction has committed the merge counts as completed: if the target
    /// cannot be re-read afterwards, the merged copy built in memory is
    /// returned instead.
    pub fn merge(&mut self) -> MergeResult<Record> {
        let result = self.run();
        if result.is_err() {
            self.state = MergeState::Failed;
        }
        result
    }

    fn run(&mut self) -> MergeResult<Record> {
        if self.state != MergeState::Configured {
            warn!("Merge re-run from state {:?}", self.state);
        }
        validate(self.source.as_ref(), self.target.as_ref())?;

        // Relationship counts are read inside the transaction.
        let transaction = Transaction::begin(self.store)?;
        let data = self.preview()?;
        self.state = MergeState::Validated;
        let merged = self.run_in_transaction(&data)?;
        transaction.commit()?;

        self.state = MergeState::Completed;
        info!(
            "Merged {}:{} into {}:{}",
            data.source.entity_type, data.source.key, data.target.entity_type, data.target.key
        );
        match self.store.refresh(&data.target) {
            Ok(fresh) => Ok(fresh),
            Err(e) => {
                warn!("Merged target {}:{} could not be re-read: {}", merged.entity_type, merged.key, e);
                Ok(merged)
            }
        }
    }

    /// Writes the merge and returns the target as merged in memory.
    fn run_in_transaction(&mut self, data: &MergeData) -> MergeResult<Record> {
        let store = self.store;
        let source = &data.source;
        let schema = store.schema_for(&source.entity_type)?;

        let changes = AttributePolicy::new(schema, self.merge_config.as_ref(), &self.allowed_attributes)
            .changes(source, &data.target);
        let mut target = data.target.clone();
        if !changes.is_empty() {
            store.save(&target, &changes)?;
            for (attribute, value) in changes {
                target.set(attribute, value);
            }
        }
        self.state = MergeState::AttributesMerged;

        for relation in relationships_for(schema) {
            match self.handlers.handler_for(relation)? {
                Some(handler) => handler.handle(store, source, &target, relation)?,
                None => debug!("Skipping `{}` ({})", relation.name, relation.kind),
            }
        }
        self.state = MergeState::RelationshipsReassigned;

        for logger in &self.loggers {
            logger.log(source, &target, data, self.performed_by.as_ref())?;
        }
        self.state = MergeState::Logged;

        if let Some(callback) = self.after_merging.take() {
            callback(source.clone(), target.clone(), self.performed_by.clone())?;
        }

        if self.delete_source {
            store.delete_record(source)?;
        }
        Ok(target)
    }
}

/// An open store transaction, rolled back on drop unless committed.
/// Unwinding out of a handler or callback also rolls back.
struct Transaction<'s> {
    store: &'s dyn RecordStore,
    open: bool,
}

impl<'s> Transaction<'s> {
    fn begin(store: &'s dyn RecordStore) -> MergeResult<Self> {
        store.begin()?;
        Ok(Self { store, open: true })
    }

    fn commit(mut self) -> MergeResult<()> {
        self.store.commit()?;
        self.open = false;
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.store.rollback() {
                warn!("Rollback after failed merge also failed: {}", e);
            }
        }
    }
}

impl fmt::Debug for RecordMerge<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordMerge")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("performed_by", &self.performed_by)
            .field("merge_config", &self.merge_config)
            .field("allowed_attributes", &self.allowed_attributes)
            .field("delete_source", &self.delete_source)
            .field("loggers", &self.loggers.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
