//! Audit loggers invoked once per successful merge, inside the transaction.

use crate::error::{MergeError, MergeResult};
use recmerge_model::{Actor, MergeData, Record};
use recmerge_storage::{now_timestamp, RecordStore, RecordStoreExt, Row};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Receives the preview data of every merge. A failing logger aborts the
/// merge and rolls it back.
pub trait MergeLogger: Send + Sync {
    /// Name used in error messages and settings.
    fn name(&self) -> &str;

    fn log(&self, source: &Record, target: &Record, data: &MergeData, performed_by: Option<&Actor>) -> MergeResult<()>;
}

/// Writes one `info` event per merge.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMergeLogger;

impl MergeLogger for TracingMergeLogger {
    fn name(&self) -> &str {
        "tracing"
    }

    fn log(&self, source: &Record, target: &Record, data: &MergeData, performed_by: Option<&Actor>) -> MergeResult<()> {
        let actor = performed_by.map(ToString::to_string).unwrap_or_else(|| "system".into());
        info!(
            "Merged {}:{} into {}:{} by {} ({} related row(s), {} differing attribute(s))",
            source.entity_type,
            source.key,
            target.entity_type,
            target.key,
            actor,
            data.rows_to_reassign(),
            data.differing_attributes().count()
        );
        Ok(())
    }
}

/// Records each merge as two activity rows: `merged-into` on the source and
/// `merge-received` on the target.
///
/// The activity table needs the columns of [`AuditTableLogger::SQLITE_SCHEMA`].
/// Share the store the merge runs on so the rows commit or roll back with it.
pub struct AuditTableLogger {
    store: Arc<dyn RecordStore>,
    table: String,
}

impl AuditTableLogger {
    pub const DEFAULT_TABLE: &'static str = "merge_activity";

    /// DDL for the default activity table.
    pub const SQLITE_SCHEMA: &'static str = "
        CREATE TABLE IF NOT EXISTS merge_activity (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_type TEXT NOT NULL,
            subject_key TEXT NOT NULL,
            event TEXT NOT NULL,
            description TEXT NOT NULL,
            causer TEXT,
            properties TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
    ";

    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_table(store, Self::DEFAULT_TABLE)
    }

    pub fn with_table(store: Arc<dyn RecordStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn activity(&self, subject: &Record, event: &str, description: String, causer: Option<&Actor>, properties: Value) -> Row {
        let mut row = Row::new();
        row.insert("subject_type".into(), Value::from(subject.entity_type.as_str()));
        row.insert("subject_key".into(), Value::from(subject.key.to_string()));
        row.insert("event".into(), Value::from(event));
        row.insert("description".into(), Value::from(description));
        row.insert(
            "causer".into(),
            causer.map_or(Value::Null, |a| Value::from(a.id.as_str())),
        );
        row.insert("properties".into(), Value::from(properties.to_string()));
        row.insert("created_at".into(), Value::from(now_timestamp()));
        row
    }

    fn insert(&self, row: &Row) -> MergeResult<()> {
        self.store.insert(&self.table, row).map_err(|e| MergeError::Logger {
            logger: self.name().to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}

impl MergeLogger for AuditTableLogger {
    fn name(&self) -> &str {
        "audit_table"
    }

    fn log(&self, source: &Record, target: &Record, data: &MergeData, performed_by: Option<&Actor>) -> MergeResult<()> {
        let source_label = self.store.label(source);
        let target_label = self.store.label(target);
        let preview = serde_json::to_value(data).map_err(|e| MergeError::Logger {
            logger: self.name().to_string(),
            message: e.to_string(),
        })?;

        let merged_into = self.activity(
            source,
            "merged-into",
            format!("{} {} was merged into {}", source.entity_type, source_label, target_label),
            performed_by,
            json!({
                "merged_into_type": target.entity_type,
                "merged_into_key": target.key,
                "merged_into_label": target_label,
                "merge_data": preview,
            }),
        );
        let received = self.activity(
            target,
            "merge-received",
            format!("{} {} received a merge from {}", target.entity_type, target_label, source_label),
            performed_by,
            json!({
                "merged_from_type": source.entity_type,
                "merged_from_key": source.key,
                "merged_from_label": source_label,
                "merge_data": preview,
            }),
        );

        self.insert(&merged_into)?;
        self.insert(&received)
    }
}
