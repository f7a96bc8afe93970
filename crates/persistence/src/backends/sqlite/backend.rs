//! SQLite store implementation.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{ErrorCode, params_from_iter};
use serde::{Deserialize, Serialize};

use crate::backends::sql::{self, Bound, Cell, Dialect, Statement};
use crate::core::{BackendKind, RelationalStore, Row};
use crate::entity::SchemaMap;
use crate::error::{BackendError, ResourceError, StorageError, StorageResult};
use crate::types::{Condition, QueryOptions};

use super::schema;

/// SQLite relational store.
///
/// Serves both the `sqlite` kind (a database file) and the `memory` kind (a
/// private in-process database held by a single pooled connection).
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteConfig,
    is_memory: bool,
}

impl Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .finish_non_exhaustive()
    }
}

/// Configuration for the SQLite store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Enable WAL mode for file databases.
    #[serde(default = "default_true")]
    pub enable_wal: bool,

    /// Extra `PRAGMA name = value` settings applied to every connection.
    #[serde(default)]
    pub pragmas: BTreeMap<String, String>,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
            pragmas: BTreeMap::new(),
        }
    }
}

fn connection_failed(message: impl ToString) -> StorageError {
    StorageError::Backend(BackendError::ConnectionFailed {
        backend_name: "sqlite".to_string(),
        message: message.to_string(),
    })
}

impl SqliteStore {
    /// Creates a private in-memory database.
    pub fn in_memory() -> StorageResult<Self> {
        Self::build(
            SqliteConnectionManager::memory(),
            SqliteConfig {
                max_connections: 1,
                enable_wal: false,
                ..Default::default()
            },
            true,
        )
    }

    /// Opens or creates a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Self::with_config(path, SqliteConfig::default())
    }

    /// Opens a database file with custom configuration. The path `:memory:`
    /// is equivalent to [`SqliteStore::in_memory`].
    pub fn with_config<P: AsRef<Path>>(path: P, config: SqliteConfig) -> StorageResult<Self> {
        if path.as_ref().to_string_lossy() == ":memory:" {
            return Self::build(
                SqliteConnectionManager::memory(),
                SqliteConfig {
                    max_connections: 1,
                    enable_wal: false,
                    ..config
                },
                true,
            );
        }
        Self::build(SqliteConnectionManager::file(path.as_ref()), config, false)
    }

    fn build(
        manager: SqliteConnectionManager,
        config: SqliteConfig,
        is_memory: bool,
    ) -> StorageResult<Self> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let enable_wal = config.enable_wal && !is_memory;
        let pragmas = config.pragmas.clone();

        let manager = manager.with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            if enable_wal {
                conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
            }
            for (name, value) in &pragmas {
                conn.execute_batch(&format!("PRAGMA {} = {}", name, value))?;
            }
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(config.max_connections.max(1))
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(connection_failed)?;

        Ok(Self {
            pool,
            config,
            is_memory,
        })
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Get a connection from the pool.
    pub(crate) fn get_connection(
        &self,
    ) -> StorageResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(connection_failed)
    }

    fn execute(&self, table: &str, statement: &Statement) -> StorageResult<usize> {
        let params = bind_params(statement)?;
        let conn = self.get_connection()?;
        conn.execute(&statement.sql, params_from_iter(params))
            .map_err(|e| write_error(table, e))
    }
}

fn bind_params(statement: &Statement) -> StorageResult<Vec<SqlValue>> {
    statement
        .params
        .iter()
        .map(|param| {
            Ok(match param.bound()? {
                Bound::Null => SqlValue::Null,
                Bound::Int(i) => SqlValue::Integer(i),
                Bound::Real(f) => SqlValue::Real(f),
                Bound::Bool(b) => SqlValue::Integer(i64::from(b)),
                Bound::Text(s) => SqlValue::Text(s),
            })
        })
        .collect()
}

fn cell(value: ValueRef<'_>) -> Cell {
    match value {
        ValueRef::Null => Cell::Null,
        ValueRef::Integer(i) => Cell::Int(i),
        ValueRef::Real(f) => Cell::Real(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Cell::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Maps unique-constraint failures to a resource error carrying the engine
/// message.
pub(crate) fn write_error(table: &str, err: rusqlite::Error) -> StorageError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        if failure.code == ErrorCode::ConstraintViolation {
            return StorageError::Resource(ResourceError::ConstraintViolation {
                table: table.to_string(),
                message: message.clone().unwrap_or_else(|| err.to_string()),
            });
        }
    }
    err.into()
}

#[async_trait]
impl RelationalStore for SqliteStore {
    fn kind(&self) -> BackendKind {
        if self.is_memory {
            BackendKind::Memory
        } else {
            BackendKind::Sqlite
        }
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let conn = self.pool.get().map_err(|_| BackendError::Unavailable {
            backend_name: "sqlite".to_string(),
            message: "Failed to get connection".to_string(),
        })?;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| BackendError::Internal {
                backend_name: "sqlite".to_string(),
                message: format!("Health check failed: {}", e),
                source: None,
            })?;
        Ok(())
    }

    async fn migrate(&self, schema_map: &SchemaMap) -> StorageResult<()> {
        let conn = self.get_connection()?;
        schema::migrate_table(&conn, schema_map)
    }

    async fn insert(&self, schema: &SchemaMap, row: &Row) -> StorageResult<Option<i64>> {
        let statement = sql::insert(Dialect::Sqlite, schema, row)?;
        let params = bind_params(&statement)?;
        let conn = self.get_connection()?;
        conn.execute(&statement.sql, params_from_iter(params))
            .map_err(|e| write_error(schema.table(), e))?;
        Ok(Some(conn.last_insert_rowid()))
    }

    async fn upsert(
        &self,
        schema: &SchemaMap,
        row: &Row,
        conflict: &[String],
        assigned: &[String],
    ) -> StorageResult<u64> {
        let statement = sql::upsert(Dialect::Sqlite, schema, row, conflict, assigned)?;
        Ok(self.execute(schema.table(), &statement)? as u64)
    }

    async fn update(
        &self,
        schema: &SchemaMap,
        condition: &Condition,
        patch: &Row,
    ) -> StorageResult<u64> {
        let statement = sql::update(Dialect::Sqlite, schema, condition, patch)?;
        Ok(self.execute(schema.table(), &statement)? as u64)
    }

    async fn select(
        &self,
        schema: &SchemaMap,
        condition: &Condition,
        options: &QueryOptions,
    ) -> StorageResult<Vec<Row>> {
        let statement = sql::select(Dialect::Sqlite, schema, condition, options)?;
        let params = bind_params(&statement)?;
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&statement.sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;

        let mut result = Vec::new();
        while let Some(sql_row) = rows.next()? {
            let mut row = Row::new();
            for (i, column) in schema.columns().iter().enumerate() {
                let value = cell(sql_row.get_ref(i)?).decode(column.sql_type);
                row.insert(column.name.clone(), value);
            }
            result.push(row);
        }
        Ok(result)
    }

    async fn delete(&self, schema: &SchemaMap, condition: &Condition) -> StorageResult<u64> {
        let statement = sql::delete(Dialect::Sqlite, schema, condition)?;
        Ok(self.execute(schema.table(), &statement)? as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_memory());
        assert_eq!(store.kind(), BackendKind::Memory);
        assert_eq!(store.config().max_connections, 1);
    }

    #[test]
    fn test_memory_path_alias() {
        let store = SqliteStore::with_config(":memory:", SqliteConfig::default()).unwrap();
        assert!(store.is_memory());
    }

    #[tokio::test]
    async fn test_health_check() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_file_store_with_pragmas() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SqliteConfig::default();
        config
            .pragmas
            .insert("synchronous".to_string(), "NORMAL".to_string());
        let store = SqliteStore::with_config(dir.path().join("t.db"), config).unwrap();
        assert_eq!(store.kind(), BackendKind::Sqlite);
        assert!(store.health_check().await.is_ok());
    }
}
