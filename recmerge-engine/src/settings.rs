//! Engine settings, loaded from JSON.
//!
//! ```json
//! {
//!   "handlers": { "belongs_to": "skip", "morph_one": "morph_one_or_many" },
//!   "loggers": ["tracing", "audit_table"],
//!   "queue": { "connection": "redis", "queue": "merges" }
//! }
//! ```
//!
//! Every section is optional. `handlers` entries override the built-in table.

use crate::error::{MergeError, MergeResult};
use crate::handlers::{BelongsToManyHandler, HasManyHandler, HasOneHandler, MorphOneOrManyHandler};
use crate::logger::{AuditTableLogger, MergeLogger, TracingMergeLogger};
use crate::registry::{HandlerEntry, HandlerRegistry};
use recmerge_model::RelationKind;
use recmerge_storage::RecordStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// A built-in handler, or `skip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerSetting {
    Skip,
    HasOne,
    HasMany,
    MorphOneOrMany,
    BelongsToMany,
}

impl HandlerSetting {
    pub fn entry(self) -> HandlerEntry {
        match self {
            Self::Skip => HandlerEntry::Skip,
            Self::HasOne => HandlerEntry::handler(HasOneHandler),
            Self::HasMany => HandlerEntry::handler(HasManyHandler),
            Self::MorphOneOrMany => HandlerEntry::handler(MorphOneOrManyHandler),
            Self::BelongsToMany => HandlerEntry::handler(BelongsToManyHandler),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoggerSetting {
    Tracing,
    /// Writes to [`AuditTableLogger::DEFAULT_TABLE`].
    AuditTable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub connection: Option<String>,
    pub queue: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            connection: None,
            queue: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeSettings {
    pub handlers: BTreeMap<RelationKind, HandlerSetting>,
    pub loggers: Vec<LoggerSetting>,
    pub queue: QueueSettings,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            handlers: BTreeMap::new(),
            loggers: vec![LoggerSetting::Tracing],
            queue: QueueSettings::default(),
        }
    }
}

impl MergeSettings {
    pub fn from_json_str(json: &str) -> MergeResult<Self> {
        serde_json::from_str(json).map_err(|e| MergeError::Settings(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> MergeResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| MergeError::Settings(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// The built-in handler table with this file's overrides applied.
    pub fn handler_registry(&self) -> HandlerRegistry {
        HandlerRegistry::defaults().with_overrides(self.handlers.iter().map(|(kind, setting)| (*kind, setting.entry())))
    }

    pub fn build_loggers(&self, store: Arc<dyn RecordStore>) -> Vec<Arc<dyn MergeLogger>> {
        self.loggers
            .iter()
            .map(|setting| -> Arc<dyn MergeLogger> {
                match setting {
                    LoggerSetting::Tracing => Arc::new(TracingMergeLogger),
                    LoggerSetting::AuditTable => Arc::new(AuditTableLogger::new(Arc::clone(&store))),
                }
            })
            .collect()
    }
}
