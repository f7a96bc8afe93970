//! PostgreSQL store implementation.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use serde::{Deserialize, Serialize};
use tokio_postgres::NoTls;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;

use crate::backends::sql::{self, Bound, Cell, Dialect, Statement};
use crate::core::{BackendKind, RelationalStore, Row};
use crate::entity::{SchemaMap, SqlType};
use crate::error::{BackendError, ResourceError, StorageError, StorageResult};
use crate::types::{Condition, QueryOptions};

/// PostgreSQL relational store.
pub struct PostgresStore {
    pool: Pool,
    config: PostgresConfig,
}

impl Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Configuration for the PostgreSQL store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// PostgreSQL host.
    #[serde(default = "default_host")]
    pub host: String,

    /// PostgreSQL port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database name.
    pub dbname: String,

    /// Database user.
    #[serde(default = "default_user")]
    pub user: String,

    /// Database password.
    #[serde(default)]
    pub password: Option<String>,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Session time zone.
    #[serde(default)]
    pub timezone: Option<String>,

    /// Extra run-time parameters, sent as `-c name=value` options.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> usize {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl PostgresConfig {
    /// Creates a configuration for `dbname` with defaults for everything else.
    pub fn new(dbname: &str) -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dbname: dbname.to_string(),
            user: default_user(),
            password: None,
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            timezone: None,
            options: BTreeMap::new(),
        }
    }

    fn runtime_options(&self) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        if let Some(tz) = &self.timezone {
            parts.push(format!("-c TimeZone={}", tz));
        }
        for (name, value) in &self.options {
            parts.push(format!("-c {}={}", name, value));
        }
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

impl PostgresStore {
    /// Creates the connection pool. Connections are opened lazily; use
    /// [`RelationalStore::health_check`] to verify connectivity.
    pub fn new(config: PostgresConfig) -> StorageResult<Self> {
        let pool = Self::create_pool(&config)?;
        Ok(Self { pool, config })
    }

    fn create_pool(config: &PostgresConfig) -> StorageResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.dbname = Some(config.dbname.clone());
        cfg.user = Some(config.user.clone());
        cfg.password = config.password.clone();
        cfg.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));
        cfg.options = config.runtime_options();

        let pool = cfg
            .builder(NoTls)
            .map_err(|e| {
                StorageError::Backend(BackendError::Internal {
                    backend_name: "postgres".to_string(),
                    message: format!("Failed to create pool builder: {}", e),
                    source: None,
                })
            })?
            .max_size(config.max_connections)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| {
                StorageError::Backend(BackendError::ConnectionFailed {
                    backend_name: "postgres".to_string(),
                    message: e.to_string(),
                })
            })?;

        Ok(pool)
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    async fn execute(&self, table: &str, statement: &Statement) -> StorageResult<u64> {
        let params = bind_params(statement)?;
        let client = self.pool.get().await?;
        client
            .execute(statement.sql.as_str(), &param_refs(&params))
            .await
            .map_err(|e| write_error(table, e))
    }
}

type BoxedParam = Box<dyn ToSql + Sync + Send>;

fn bind_params(statement: &Statement) -> StorageResult<Vec<BoxedParam>> {
    statement
        .params
        .iter()
        .map(|param| {
            let boxed: BoxedParam = match (param.bound()?, param.sql_type) {
                (Bound::Null, Some(SqlType::Integer)) => Box::new(None::<i64>),
                (Bound::Null, Some(SqlType::Real)) => Box::new(None::<f64>),
                (Bound::Null, Some(SqlType::Boolean)) => Box::new(None::<bool>),
                (Bound::Null, _) => Box::new(None::<String>),
                (Bound::Int(i), _) => Box::new(i),
                (Bound::Real(f), _) => Box::new(f),
                (Bound::Bool(b), _) => Box::new(b),
                (Bound::Text(s), _) => Box::new(s),
            };
            Ok(boxed)
        })
        .collect()
}

fn param_refs(params: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

fn read_cell(row: &tokio_postgres::Row, index: usize, sql_type: SqlType) -> StorageResult<Cell> {
    let cell = match sql_type {
        SqlType::Integer => row.try_get::<_, Option<i64>>(index)?.map(Cell::Int),
        SqlType::Real => row.try_get::<_, Option<f64>>(index)?.map(Cell::Real),
        SqlType::Boolean => row.try_get::<_, Option<bool>>(index)?.map(Cell::Bool),
        SqlType::Text | SqlType::Timestamp | SqlType::Json => {
            row.try_get::<_, Option<String>>(index)?.map(Cell::Text)
        }
    };
    Ok(cell.unwrap_or(Cell::Null))
}

fn write_error(table: &str, err: tokio_postgres::Error) -> StorageError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        let message = err
            .as_db_error()
            .map(|db| db.message().to_string())
            .unwrap_or_else(|| err.to_string());
        return StorageError::Resource(ResourceError::ConstraintViolation {
            table: table.to_string(),
            message,
        });
    }
    err.into()
}

fn migration_error(table: &str, step: &str, err: tokio_postgres::Error) -> StorageError {
    StorageError::Backend(BackendError::MigrationError {
        message: format!("{} on table {}: {}", step, table, err),
    })
}

#[async_trait]
impl RelationalStore for PostgresStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| BackendError::Unavailable {
                backend_name: "postgres".to_string(),
                message: e.to_string(),
            })?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| BackendError::Internal {
                backend_name: "postgres".to_string(),
                message: format!("Health check failed: {}", e),
                source: None,
            })?;
        Ok(())
    }

    async fn migrate(&self, schema: &SchemaMap) -> StorageResult<()> {
        let table = schema.table();
        let client = self.pool.get().await?;

        client
            .batch_execute(&sql::create_table(Dialect::Postgres, schema, None))
            .await
            .map_err(|e| migration_error(table, "create table", e))?;

        let existing: HashSet<String> = client
            .query(
                "SELECT column_name::text FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1",
                &[&table],
            )
            .await
            .map_err(|e| migration_error(table, "read columns", e))?
            .iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<Result<_, _>>()?;

        for column in schema.columns() {
            if !existing.contains(&column.name) {
                client
                    .batch_execute(&sql::add_column(Dialect::Postgres, table, column))
                    .await
                    .map_err(|e| migration_error(table, "add column", e))?;
                tracing::debug!(table = %table, column = %column.name, "Added column");
            }
        }

        for (group, columns) in schema.unique_groups() {
            client
                .batch_execute(&sql::create_unique_index(
                    Dialect::Postgres,
                    table,
                    &group,
                    &columns,
                ))
                .await
                .map_err(|e| migration_error(table, "create unique index", e))?;
        }

        Ok(())
    }

    async fn insert(&self, schema: &SchemaMap, row: &Row) -> StorageResult<Option<i64>> {
        let statement = sql::insert(Dialect::Postgres, schema, row)?;
        let params = bind_params(&statement)?;
        let client = self.pool.get().await?;
        let returned = client
            .query_one(statement.sql.as_str(), &param_refs(&params))
            .await
            .map_err(|e| write_error(schema.table(), e))?;
        Ok(Some(returned.try_get::<_, i64>(0)?))
    }

    async fn upsert(
        &self,
        schema: &SchemaMap,
        row: &Row,
        conflict: &[String],
        assigned: &[String],
    ) -> StorageResult<u64> {
        let statement = sql::upsert(Dialect::Postgres, schema, row, conflict, assigned)?;
        self.execute(schema.table(), &statement).await
    }

    async fn update(
        &self,
        schema: &SchemaMap,
        condition: &Condition,
        patch: &Row,
    ) -> StorageResult<u64> {
        let statement = sql::update(Dialect::Postgres, schema, condition, patch)?;
        self.execute(schema.table(), &statement).await
    }

    async fn select(
        &self,
        schema: &SchemaMap,
        condition: &Condition,
        options: &QueryOptions,
    ) -> StorageResult<Vec<Row>> {
        let statement = sql::select(Dialect::Postgres, schema, condition, options)?;
        let params = bind_params(&statement)?;
        let client = self.pool.get().await?;
        let rows = client
            .query(statement.sql.as_str(), &param_refs(&params))
            .await?;

        let mut result = Vec::with_capacity(rows.len());
        for pg_row in &rows {
            let mut row = Row::new();
            for (i, column) in schema.columns().iter().enumerate() {
                let value = read_cell(pg_row, i, column.sql_type)?.decode(column.sql_type);
                row.insert(column.name.clone(), value);
            }
            result.push(row);
        }
        Ok(result)
    }

    async fn delete(&self, schema: &SchemaMap, condition: &Condition) -> StorageResult<u64> {
        let statement = sql::delete(Dialect::Postgres, schema, condition)?;
        self.execute(schema.table(), &statement).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sql::Param;
    use serde_json::json;

    #[test]
    fn test_runtime_options() {
        let mut config = PostgresConfig::new("app");
        assert_eq!(config.runtime_options(), None);
        config.timezone = Some("UTC".to_string());
        config
            .options
            .insert("statement_timeout".to_string(), "30000".to_string());
        assert_eq!(
            config.runtime_options().as_deref(),
            Some("-c TimeZone=UTC -c statement_timeout=30000")
        );
    }

    #[test]
    fn test_bind_params_types_nulls_by_column() {
        let statement = Statement {
            sql: String::new(),
            params: vec![
                Param {
                    value: json!(null),
                    sql_type: Some(SqlType::Integer),
                },
                Param {
                    value: json!("x"),
                    sql_type: Some(SqlType::Text),
                },
            ],
        };
        assert_eq!(bind_params(&statement).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_pool_is_lazy() {
        let store = PostgresStore::new(PostgresConfig::new("app")).unwrap();
        assert_eq!(store.kind(), BackendKind::Postgres);
        assert_eq!(store.config().port, 5432);
    }
}
