//! The record store contract.

use crate::error::{StorageError, StorageResult};
use recmerge_model::{EntitySchema, Record, RecordKey, SchemaRegistry};
use serde_json::{Map, Value};
use tracing::debug;

/// One stored row, column name to value.
pub type Row = Map<String, Value>;

/// A conjunction of column equality conditions.
///
/// A `Value::Null` condition matches SQL `NULL` (`IS NULL`), not the
/// literal comparison `= NULL`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// A filter that matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(column, value)
    }

    pub fn and(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// True when `row` satisfies every condition.
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .all(|(column, value)| row.get(column).unwrap_or(&Value::Null) == value)
    }
}

/// Storage primitives the merge engine needs from the backing store.
///
/// Implementations must make everything between [`begin`](Self::begin) and
/// [`commit`](Self::commit) atomic, and must support nesting: an inner
/// `begin`/`rollback` pair undoes only the inner work.
pub trait RecordStore: Send + Sync {
    /// Schemas of every entity type this store can hold.
    fn schemas(&self) -> &SchemaRegistry;

    /// Rows of `table` matching `filter`, in insertion order.
    fn select(&self, table: &str, filter: &Filter) -> StorageResult<Vec<Row>>;

    fn count(&self, table: &str, filter: &Filter) -> StorageResult<u64>;

    /// Applies `changes` to every matching row. Returns the number of rows touched.
    fn update(&self, table: &str, filter: &Filter, changes: &Row) -> StorageResult<usize>;

    /// Inserts one row. Returns the row id assigned by the store.
    fn insert(&self, table: &str, row: &Row) -> StorageResult<i64>;

    /// Deletes every matching row. Returns the number of rows removed.
    fn delete(&self, table: &str, filter: &Filter) -> StorageResult<usize>;

    /// Rows where any of `columns` contains `term`, at most `limit` of them.
    /// Columns the table does not have are ignored.
    fn search(&self, table: &str, columns: &[String], term: &str, limit: usize) -> StorageResult<Vec<Row>>;

    fn begin(&self) -> StorageResult<()>;

    fn commit(&self) -> StorageResult<()>;

    fn rollback(&self) -> StorageResult<()>;
}

/// Current time in the format written to timestamp columns.
pub fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Record-level helpers built on [`RecordStore`].
///
/// Implemented for every store, including `dyn RecordStore`.
pub trait RecordStoreExt: RecordStore {
    fn schema_for(&self, entity_type: &str) -> StorageResult<&EntitySchema> {
        self.schemas()
            .get(entity_type)
            .ok_or_else(|| StorageError::UnknownEntityType(entity_type.to_string()))
    }

    /// Builds a [`Record`] from a raw row of the schema's table.
    fn record_from_row(&self, schema: &EntitySchema, row: Row) -> StorageResult<Record> {
        let key = row
            .get(&schema.primary_key)
            .and_then(RecordKey::from_value)
            .ok_or_else(|| {
                StorageError::InvalidData(format!(
                    "{} row has no usable primary key `{}`",
                    schema.entity_type, schema.primary_key
                ))
            })?;
        Ok(Record::new(schema.entity_type.clone(), key, row))
    }

    /// Finds a live record; soft-deleted rows are not returned.
    fn find(&self, entity_type: &str, key: &RecordKey) -> StorageResult<Option<Record>> {
        let schema = self.schema_for(entity_type)?;
        let mut filter = Filter::eq(schema.primary_key.clone(), key.to_value());
        if let Some(column) = &schema.soft_delete_column {
            filter = filter.and(column.clone(), Value::Null);
        }
        self.select(&schema.table, &filter)?
            .into_iter()
            .next()
            .map(|row| self.record_from_row(schema, row))
            .transpose()
    }

    /// Finds a record whether or not it has been soft-deleted.
    fn find_with_trashed(&self, entity_type: &str, key: &RecordKey) -> StorageResult<Option<Record>> {
        let schema = self.schema_for(entity_type)?;
        let filter = Filter::eq(schema.primary_key.clone(), key.to_value());
        self.select(&schema.table, &filter)?
            .into_iter()
            .next()
            .map(|row| self.record_from_row(schema, row))
            .transpose()
    }

    /// Inserts a new record, filling timestamp columns, and reads it back.
    fn create(&self, entity_type: &str, attributes: Row) -> StorageResult<Record> {
        let schema = self.schema_for(entity_type)?;
        let mut row = attributes;
        let now = now_timestamp();
        for column in [&schema.created_at, &schema.updated_at].into_iter().flatten() {
            row.entry(column.clone()).or_insert_with(|| Value::from(now.as_str()));
        }

        let rowid = self.insert(&schema.table, &row)?;
        let key = row
            .get(&schema.primary_key)
            .and_then(RecordKey::from_value)
            .unwrap_or(RecordKey::Int(rowid));

        self.find_with_trashed(entity_type, &key)?
            .ok_or_else(|| StorageError::NotFound(format!("{entity_type}:{key}")))
    }

    /// Persists `changes` on the record's row in one update, touching the
    /// update timestamp. An empty change set is a no-op.
    fn save(&self, record: &Record, changes: &Row) -> StorageResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let schema = self.schema_for(&record.entity_type)?;
        let mut changes = changes.clone();
        if let Some(column) = &schema.updated_at {
            changes.insert(column.clone(), Value::from(now_timestamp()));
        }
        let filter = Filter::eq(schema.primary_key.clone(), record.key.to_value());
        let touched = self.update(&schema.table, &filter, &changes)?;
        if touched == 0 {
            return Err(StorageError::NotFound(format!("{}:{}", record.entity_type, record.key)));
        }
        debug!("Saved {} attribute(s) on {}:{}", changes.len(), record.entity_type, record.key);
        Ok(())
    }

    /// Deletes the record: soft delete when the schema supports it, row
    /// removal otherwise.
    fn delete_record(&self, record: &Record) -> StorageResult<()> {
        let schema = self.schema_for(&record.entity_type)?;
        let filter = Filter::eq(schema.primary_key.clone(), record.key.to_value());
        let touched = match &schema.soft_delete_column {
            Some(column) => {
                let mut changes = Row::new();
                changes.insert(column.clone(), Value::from(now_timestamp()));
                self.update(&schema.table, &filter, &changes)?
            }
            None => self.delete(&schema.table, &filter)?,
        };
        if touched == 0 {
            return Err(StorageError::NotFound(format!("{}:{}", record.entity_type, record.key)));
        }
        debug!("Deleted {}:{}", record.entity_type, record.key);
        Ok(())
    }

    /// Re-reads the record from storage.
    fn refresh(&self, record: &Record) -> StorageResult<Record> {
        self.find_with_trashed(&record.entity_type, &record.key)?
            .ok_or_else(|| StorageError::NotFound(format!("{}:{}", record.entity_type, record.key)))
    }

    /// Live records of the same type whose label attributes or key contain
    /// `term`, excluding `source` itself.
    fn merge_candidates(&self, source: &Record, term: &str, amount: usize) -> StorageResult<Vec<Record>> {
        let schema = self.schema_for(&source.entity_type)?;
        let mut columns = schema.label_attributes.clone();
        columns.push(schema.primary_key.clone());

        // One extra row so excluding the source still leaves `amount`.
        let rows = self.search(&schema.table, &columns, term, amount + 1)?;
        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(column) = &schema.soft_delete_column {
                if !row.get(column).is_none_or(Value::is_null) {
                    continue;
                }
            }
            let record = self.record_from_row(schema, row)?;
            if record.key != source.key {
                candidates.push(record);
            }
        }
        candidates.truncate(amount);
        Ok(candidates)
    }

    /// Human-readable label: the first non-null label attribute, else the key.
    fn label(&self, record: &Record) -> String {
        self.schemas()
            .get(&record.entity_type)
            .into_iter()
            .flat_map(|s| s.label_attributes.iter())
            .find_map(|attr| match record.get(attr) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(v) if !v.is_null() => Some(v.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| record.key.to_string())
    }
}

impl<T: RecordStore + ?Sized> RecordStoreExt for T {}
