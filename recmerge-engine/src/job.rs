//! Queued merges: the job value and an in-process dispatcher.

use crate::error::{MergeError, MergeResult};
use crate::events::{EventBus, MergeEvent};
use crate::logger::MergeLogger;
use crate::merge::{validate, RecordMerge};
use crate::registry::HandlerRegistry;
use crate::settings::{MergeSettings, QueueSettings};
use recmerge_model::{Actor, MergeConfig, Record};
use recmerge_storage::{RecordStore, RecordStoreExt, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handlers, loggers and event channel shared by every job a dispatcher runs.
#[derive(Clone, Default)]
pub struct MergeContext {
    pub handlers: Arc<HandlerRegistry>,
    pub loggers: Vec<Arc<dyn MergeLogger>>,
    pub events: EventBus,
}

impl MergeContext {
    /// Builds handlers and loggers from settings. Audit-table loggers write
    /// through `store`.
    pub fn from_settings(settings: &MergeSettings, store: Arc<dyn RecordStore>) -> Self {
        Self {
            handlers: Arc::new(settings.handler_registry()),
            loggers: settings.build_loggers(store),
            events: EventBus::default(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }
}

impl fmt::Debug for MergeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeContext")
            .field("handlers", &self.handlers)
            .field("loggers", &self.loggers.iter().map(|l| l.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// A merge to run later, possibly on another thread.
///
/// Records are re-read from the store when the job runs, so edits made
/// while it was queued are merged too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRecordJob {
    pub source: Record,
    pub target: Record,
    pub performed_by: Option<Actor>,
    pub merge_config: Option<MergeConfig>,
    pub connection: Option<String>,
    pub queue: String,
}

impl MergeRecordJob {
    pub fn new(source: Record, target: Record, performed_by: Option<Actor>, merge_config: Option<MergeConfig>) -> Self {
        Self {
            source,
            target,
            performed_by,
            merge_config,
            connection: None,
            queue: QueueSettings::default().queue,
        }
    }

    pub fn on_queue(mut self, settings: &QueueSettings) -> Self {
        self.connection = settings.connection.clone();
        self.queue = settings.queue.clone();
        self
    }

    /// Two jobs with the same id must not run at the same time.
    pub fn unique_id(&self) -> String {
        format!(
            "{}:{}-{}:{}",
            self.source.entity_type, self.source.key, self.target.entity_type, self.target.key
        )
    }

    pub fn tags(&self) -> Vec<String> {
        vec![
            "record-merge".to_string(),
            format!("source:{}:{}", self.source.entity_type, self.source.key),
            format!("target:{}:{}", self.target.entity_type, self.target.key),
        ]
    }

    /// Runs the merge, publishing `RecordMerged` on success and calling
    /// [`fail`](Self::fail) on error.
    pub fn handle(&self, store: &dyn RecordStore, context: &MergeContext) -> MergeResult<Record> {
        match self.run(store, context) {
            Ok((source, merged)) => {
                context.events.publish(MergeEvent::RecordMerged {
                    source,
                    target: merged.clone(),
                    performed_by: self.performed_by.clone(),
                });
                Ok(merged)
            }
            Err(e) => {
                self.fail(Some(&e), &context.events);
                Err(e)
            }
        }
    }

    fn run(&self, store: &dyn RecordStore, context: &MergeContext) -> MergeResult<(Record, Record)> {
        validate(Some(&self.source), Some(&self.target))?;
        let source = Self::reload(store, &self.source)?;
        let target = Self::reload(store, &self.target)?;

        let merged = RecordMerge::new(store)
            .from(source.clone())
            .to(target)
            .performed_by(self.performed_by.clone())
            .with_merge_config(self.merge_config.clone())
            .with_handlers(Arc::clone(&context.handlers))
            .with_loggers(context.loggers.clone())
            .merge()?;
        Ok((source, merged))
    }

    fn reload(store: &dyn RecordStore, record: &Record) -> MergeResult<Record> {
        store
            .find(&record.entity_type, &record.key)?
            .ok_or_else(|| StorageError::NotFound(format!("{}:{}", record.entity_type, record.key)).into())
    }

    /// Publishes `RecordMergeFailed` for this job. Rejected pairs are logged
    /// at info level since nothing was written.
    pub fn fail(&self, error: Option<&MergeError>, events: &EventBus) {
        match error {
            Some(e) if e.is_validation() => info!("Merge {} rejected: {}", self.unique_id(), e),
            Some(e) => warn!("Merge {} failed: {}", self.unique_id(), e),
            None => warn!("Merge {} failed: unknown error", self.unique_id()),
        }
        events.publish(MergeEvent::RecordMergeFailed {
            source: self.source.clone(),
            target: self.target.clone(),
            performed_by: self.performed_by.clone(),
            error: error.map(ToString::to_string),
        });
    }
}

/// Removes a job id from the in-flight set when the job ends, even by panic.
struct InFlight {
    ids: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        ids.remove(&self.id);
    }
}

/// Runs merge jobs on tokio's blocking pool, one at a time per unique id.
pub struct MergeDispatcher {
    store: Arc<dyn RecordStore>,
    context: Arc<MergeContext>,
    queue: QueueSettings,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl MergeDispatcher {
    pub fn new(store: Arc<dyn RecordStore>, context: MergeContext) -> Self {
        Self {
            store,
            context: Arc::new(context),
            queue: QueueSettings::default(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn from_settings(store: Arc<dyn RecordStore>, settings: &MergeSettings) -> Self {
        let context = MergeContext::from_settings(settings, Arc::clone(&store));
        let mut dispatcher = Self::new(store, context);
        dispatcher.queue = settings.queue.clone();
        dispatcher
    }

    pub fn context(&self) -> &MergeContext {
        &self.context
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MergeEvent> {
        self.context.events.subscribe()
    }

    pub fn is_queued(&self, unique_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(unique_id)
    }

    /// Starts `job` on the blocking pool. Must be called inside a tokio runtime.
    pub fn dispatch(&self, job: MergeRecordJob) -> MergeResult<JoinHandle<MergeResult<Record>>> {
        let id = job.unique_id();
        {
            let mut ids = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if !ids.insert(id.clone()) {
                return Err(MergeError::AlreadyQueued(id));
            }
        }
        debug!("Dispatching merge {} on queue {}", id, job.queue);

        let guard = InFlight {
            ids: Arc::clone(&self.in_flight),
            id,
        };
        let store = Arc::clone(&self.store);
        let context = Arc::clone(&self.context);
        Ok(tokio::task::spawn_blocking(move || {
            let _guard = guard;
            job.handle(store.as_ref(), &context)
        }))
    }

    /// Queues a merge of `source` into `target` on the configured queue.
    pub fn merge_to(
        &self,
        source: Record,
        target: Record,
        performed_by: Option<Actor>,
        merge_config: Option<MergeConfig>,
    ) -> MergeResult<JoinHandle<MergeResult<Record>>> {
        self.dispatch(MergeRecordJob::new(source, target, performed_by, merge_config).on_queue(&self.queue))
    }

    /// Dispatches `job` and waits for it.
    pub async fn run(&self, job: MergeRecordJob) -> MergeResult<Record> {
        self.dispatch(job)?
            .await
            .map_err(|e| MergeError::Task(e.to_string()))?
    }
}

impl fmt::Debug for MergeDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeDispatcher")
            .field("context", &self.context)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
