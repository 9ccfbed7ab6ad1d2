//! SQLite implementation of [`RecordStore`].

use crate::error::{StorageError, StorageResult};
use crate::store::{Filter, RecordStore, Row};
use recmerge_model::{EntitySchema, SchemaRegistry};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

struct Inner {
    conn: Connection,
    /// Open savepoints; zero outside a transaction.
    depth: usize,
    /// Thread that opened the outermost savepoint.
    owner: Option<ThreadId>,
}

/// Record store backed by a single SQLite connection.
///
/// The connection sits behind a mutex so the store can be shared across
/// threads. Transactions are savepoints, so `begin` may be nested.
///
/// An open transaction belongs to the thread that began it. Every call from
/// another thread, including its own `begin`, waits until that transaction
/// is committed or rolled back, so concurrent merges never share savepoints.
pub struct SqliteStore {
    inner: Arc<Mutex<Inner>>,
    released: Arc<Condvar>,
    schemas: SchemaRegistry,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>, schemas: SchemaRegistry) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, schemas)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory(schemas: SchemaRegistry) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, schemas)
    }

    fn with_connection(conn: Connection, schemas: SchemaRegistry) -> StorageResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                conn,
                depth: 0,
                owner: None,
            })),
            released: Arc::new(Condvar::new()),
            schemas,
        })
    }

    /// Registers (or replaces) an entity type's schema.
    pub fn register_schema(&mut self, schema: EntitySchema) {
        self.schemas.register(schema);
    }

    /// Runs raw SQL, typically table creation.
    pub fn execute_batch(&self, sql: &str) -> StorageResult<()> {
        self.lock()?.conn.execute_batch(sql)?;
        Ok(())
    }

    /// True while at least one transaction is open, on any thread.
    pub fn in_transaction(&self) -> StorageResult<bool> {
        let inner = self.inner.lock().map_err(|_| StorageError::Lock)?;
        Ok(inner.depth > 0)
    }

    /// Locks the connection once no other thread holds a transaction.
    fn lock(&self) -> StorageResult<MutexGuard<'_, Inner>> {
        let me = thread::current().id();
        let guard = self.inner.lock().map_err(|_| StorageError::Lock)?;
        self.released
            .wait_while(guard, |inner| inner.owner.is_some_and(|owner| owner != me))
            .map_err(|_| StorageError::Lock)
    }

    /// Closes the innermost savepoint; hands the store to waiting threads
    /// when it was the outermost one.
    fn close_savepoint(&self, inner: &mut Inner) {
        inner.depth -= 1;
        if inner.depth == 0 {
            inner.owner = None;
            self.released.notify_all();
        }
    }

    fn table_columns(conn: &Connection, table: &str) -> StorageResult<Vec<String>> {
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
        let columns = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }
}

impl RecordStore for SqliteStore {
    fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    fn select(&self, table: &str, filter: &Filter) -> StorageResult<Vec<Row>> {
        let (clause, params) = where_clause(filter)?;
        let sql = format!("SELECT * FROM {}{clause} ORDER BY rowid", quote_ident(table)?);
        let inner = self.lock()?;
        query_rows(&inner.conn, &sql, &params)
    }

    fn count(&self, table: &str, filter: &Filter) -> StorageResult<u64> {
        let (clause, params) = where_clause(filter)?;
        let sql = format!("SELECT COUNT(*) FROM {}{clause}", quote_ident(table)?);
        let inner = self.lock()?;
        let count: i64 = inner
            .conn
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn update(&self, table: &str, filter: &Filter, changes: &Row) -> StorageResult<usize> {
        if changes.is_empty() {
            return Ok(0);
        }
        let mut assignments = Vec::with_capacity(changes.len());
        let mut params = Vec::with_capacity(changes.len() + filter.conditions().len());
        for (column, value) in changes {
            assignments.push(format!("{} = ?", quote_ident(column)?));
            params.push(to_sql_value(value));
        }
        let (clause, filter_params) = where_clause(filter)?;
        params.extend(filter_params);

        let sql = format!(
            "UPDATE {} SET {}{clause}",
            quote_ident(table)?,
            assignments.join(", ")
        );
        let inner = self.lock()?;
        let touched = inner.conn.execute(&sql, params_from_iter(params.iter()))?;
        debug!("UPDATE {} touched {} row(s)", table, touched);
        Ok(touched)
    }

    fn insert(&self, table: &str, row: &Row) -> StorageResult<i64> {
        let table_ident = quote_ident(table)?;
        let inner = self.lock()?;
        if row.is_empty() {
            inner
                .conn
                .execute(&format!("INSERT INTO {table_ident} DEFAULT VALUES"), [])?;
            return Ok(inner.conn.last_insert_rowid());
        }

        let columns = row
            .keys()
            .map(|c| quote_ident(c))
            .collect::<StorageResult<Vec<_>>>()?;
        let placeholders = vec!["?"; columns.len()].join(", ");
        let params: Vec<SqlValue> = row.values().map(to_sql_value).collect();
        let sql = format!(
            "INSERT INTO {table_ident} ({}) VALUES ({placeholders})",
            columns.join(", ")
        );
        inner.conn.execute(&sql, params_from_iter(params.iter()))?;
        Ok(inner.conn.last_insert_rowid())
    }

    fn delete(&self, table: &str, filter: &Filter) -> StorageResult<usize> {
        let (clause, params) = where_clause(filter)?;
        let sql = format!("DELETE FROM {}{clause}", quote_ident(table)?);
        let inner = self.lock()?;
        let removed = inner.conn.execute(&sql, params_from_iter(params.iter()))?;
        debug!("DELETE {} removed {} row(s)", table, removed);
        Ok(removed)
    }

    fn search(&self, table: &str, columns: &[String], term: &str, limit: usize) -> StorageResult<Vec<Row>> {
        let table_ident = quote_ident(table)?;
        let inner = self.lock()?;
        let existing = Self::table_columns(&inner.conn, table)?;
        let searchable = columns
            .iter()
            .filter(|c| existing.contains(*c))
            .map(|c| quote_ident(c).map(|ident| format!("CAST({ident} AS TEXT) LIKE ?1")))
            .collect::<StorageResult<Vec<_>>>()?;
        if searchable.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT * FROM {table_ident} WHERE {} ORDER BY rowid LIMIT {}",
            searchable.join(" OR "),
            limit
        );
        let pattern = SqlValue::Text(format!("%{term}%"));
        query_rows(&inner.conn, &sql, &[pattern])
    }

    fn begin(&self) -> StorageResult<()> {
        let mut inner = self.lock()?;
        let name = savepoint_name(inner.depth + 1);
        inner.conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        inner.depth += 1;
        inner.owner = Some(thread::current().id());
        debug!("Opened savepoint {}", name);
        Ok(())
    }

    fn commit(&self) -> StorageResult<()> {
        let mut inner = self.lock()?;
        if inner.depth == 0 {
            return Err(StorageError::Transaction("commit without an open transaction".into()));
        }
        let name = savepoint_name(inner.depth);
        inner.conn.execute_batch(&format!("RELEASE {name}"))?;
        self.close_savepoint(&mut inner);
        debug!("Released savepoint {}", name);
        Ok(())
    }

    fn rollback(&self) -> StorageResult<()> {
        let mut inner = self.lock()?;
        if inner.depth == 0 {
            return Err(StorageError::Transaction("rollback without an open transaction".into()));
        }
        let name = savepoint_name(inner.depth);
        inner
            .conn
            .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name};"))?;
        self.close_savepoint(&mut inner);
        warn!("Rolled back savepoint {}", name);
        Ok(())
    }
}

fn savepoint_name(depth: usize) -> String {
    format!("recmerge_{depth}")
}

/// Quotes a table or column name after checking it is a plain identifier.
fn quote_ident(name: &str) -> StorageResult<String> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StorageError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{name}\""))
}

fn where_clause(filter: &Filter) -> StorageResult<(String, Vec<SqlValue>)> {
    if filter.is_empty() {
        return Ok((String::new(), Vec::new()));
    }
    let mut parts = Vec::with_capacity(filter.conditions().len());
    let mut params = Vec::new();
    for (column, value) in filter.conditions() {
        let ident = quote_ident(column)?;
        if value.is_null() {
            parts.push(format!("{ident} IS NULL"));
        } else {
            parts.push(format!("{ident} = ?"));
            params.push(to_sql_value(value));
        }
    }
    Ok((format!(" WHERE {}", parts.join(" AND ")), params))
}

fn query_rows(conn: &Connection, sql: &str, params: &[SqlValue]) -> StorageResult<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            let mut map = Map::new();
            for (idx, name) in columns.iter().enumerate() {
                map.insert(name.clone(), from_sql_value(row.get_ref(idx)?));
            }
            Ok(map)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        // Nested JSON is stored as its text form.
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
    }
}
