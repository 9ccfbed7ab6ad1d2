//! Record merge engine.
//!
//! Merges a source record into a target of the same entity type: missing
//! attribute values are copied over according to a per-attribute policy,
//! related rows are moved by one handler per relationship kind, loggers
//! record the merge, and the source is deleted. Everything after validation
//! runs in one store transaction.
//!
//! - [`RecordMerge`]: builder and orchestrator
//! - [`AttributePolicy`]: attribute eligibility and copy rules
//! - [`HandlerRegistry`] / [`RelationshipHandler`]: relationship reassignment
//! - [`MergeLogger`]: audit sinks
//! - [`MergeRecordJob`] / [`MergeDispatcher`]: queued merges and their events
//! - [`MergeSettings`]: JSON configuration

pub mod discovery;
pub mod error;
pub mod events;
pub mod handlers;
pub mod job;
pub mod logger;
pub mod merge;
pub mod policy;
pub mod preview;
pub mod registry;
pub mod settings;
mod supports;

pub use discovery::relationships_for;
pub use error::{MergeError, MergeResult};
pub use events::{EventBus, MergeEvent};
pub use handlers::{BelongsToManyHandler, HasManyHandler, HasOneHandler, MorphOneOrManyHandler};
pub use job::{MergeContext, MergeDispatcher, MergeRecordJob};
pub use logger::{AuditTableLogger, MergeLogger, TracingMergeLogger};
pub use merge::{validate, AfterMerging, MergeState, RecordMerge};
pub use policy::{AttributePolicy, Exclusion};
pub use preview::{build_comparison, build_relationship_counts, count_related};
pub use registry::{HandlerEntry, HandlerRegistry, RelationshipHandler, Resolution};
pub use settings::{HandlerSetting, LoggerSetting, MergeSettings, QueueSettings};
pub use supports::SupportsMerging;
