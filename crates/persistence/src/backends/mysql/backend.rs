//! MySQL store implementation.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Pool, PoolConstraints, PoolOpts, Value as MyValue};
use serde::{Deserialize, Serialize};

use crate::backends::sql::{self, Bound, Cell, Dialect, Statement, unique_index_name};
use crate::core::{BackendKind, RelationalStore, Row};
use crate::entity::SchemaMap;
use crate::error::{BackendError, ResourceError, StorageError, StorageResult};
use crate::types::{Condition, QueryOptions};

/// MySQL server error code for duplicate entries on a unique key.
const ER_DUP_ENTRY: u16 = 1062;

/// MySQL relational store.
pub struct MysqlStore {
    pool: Pool,
    config: MysqlConfig,
}

impl Debug for MysqlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Configuration for the MySQL store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MysqlConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub dbname: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    /// Default character set for provisioned tables.
    #[serde(default = "default_charset")]
    pub charset: String,

    /// Session `time_zone`, e.g. `+00:00`.
    #[serde(default)]
    pub timezone: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Extra session variables, applied with `SET SESSION` on connect.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_user() -> String {
    "root".to_string()
}

fn default_charset() -> String {
    "utf8mb4".to_string()
}

fn default_max_connections() -> usize {
    10
}

impl MysqlConfig {
    pub fn new(dbname: &str) -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dbname: dbname.to_string(),
            user: default_user(),
            password: None,
            charset: default_charset(),
            timezone: None,
            max_connections: default_max_connections(),
            options: BTreeMap::new(),
        }
    }

    fn init_statements(&self) -> Vec<String> {
        let mut statements = Vec::new();
        if let Some(tz) = &self.timezone {
            statements.push(format!("SET time_zone = '{}'", tz.replace('\'', "")));
        }
        for (name, value) in &self.options {
            statements.push(format!("SET SESSION {} = {}", name, value));
        }
        statements
    }

    fn opts(&self) -> Opts {
        let mut pool_opts = PoolOpts::default();
        if let Some(constraints) = PoolConstraints::new(1, self.max_connections.max(1)) {
            pool_opts = pool_opts.with_constraints(constraints);
        }

        OptsBuilder::default()
            .ip_or_hostname(self.host.clone())
            .tcp_port(self.port)
            .user(Some(self.user.clone()))
            .pass(self.password.clone())
            .db_name(Some(self.dbname.clone()))
            .init(self.init_statements())
            .pool_opts(pool_opts)
            .into()
    }
}

impl MysqlStore {
    /// Creates the connection pool. Connections are opened lazily.
    pub fn new(config: MysqlConfig) -> StorageResult<Self> {
        let pool = Pool::new(config.opts());
        Ok(Self { pool, config })
    }

    pub fn config(&self) -> &MysqlConfig {
        &self.config
    }

    async fn conn(&self) -> StorageResult<Conn> {
        self.pool.get_conn().await.map_err(|e| {
            StorageError::Backend(BackendError::ConnectionFailed {
                backend_name: "mysql".to_string(),
                message: e.to_string(),
            })
        })
    }

    async fn execute(&self, table: &str, statement: &Statement) -> StorageResult<(u64, Option<u64>)> {
        let params = bind_params(statement)?;
        let mut conn = self.conn().await?;
        conn.exec_drop(statement.sql.as_str(), params)
            .await
            .map_err(|e| write_error(table, e))?;
        Ok((conn.affected_rows(), conn.last_insert_id()))
    }
}

fn bind_params(statement: &Statement) -> StorageResult<Params> {
    if statement.params.is_empty() {
        return Ok(Params::Empty);
    }
    let values = statement
        .params
        .iter()
        .map(|param| {
            Ok(match param.bound()? {
                Bound::Null => MyValue::NULL,
                Bound::Int(i) => MyValue::Int(i),
                Bound::Real(f) => MyValue::Double(f),
                Bound::Bool(b) => MyValue::Int(i64::from(b)),
                Bound::Text(s) => MyValue::Bytes(s.into_bytes()),
            })
        })
        .collect::<StorageResult<Vec<_>>>()?;
    Ok(Params::Positional(values))
}

fn cell(value: Option<&MyValue>) -> Cell {
    match value {
        None | Some(MyValue::NULL) => Cell::Null,
        Some(MyValue::Int(i)) => Cell::Int(*i),
        Some(MyValue::UInt(u)) => match i64::try_from(*u) {
            Ok(i) => Cell::Int(i),
            Err(_) => Cell::Real(*u as f64),
        },
        Some(MyValue::Float(f)) => Cell::Real(f64::from(*f)),
        Some(MyValue::Double(f)) => Cell::Real(*f),
        Some(MyValue::Bytes(bytes)) => Cell::Text(String::from_utf8_lossy(bytes).into_owned()),
        Some(other) => Cell::Text(other.as_sql(true).trim_matches('\'').to_string()),
    }
}

fn write_error(table: &str, err: mysql_async::Error) -> StorageError {
    if let mysql_async::Error::Server(server) = &err {
        if server.code == ER_DUP_ENTRY {
            return StorageError::Resource(ResourceError::ConstraintViolation {
                table: table.to_string(),
                message: server.message.clone(),
            });
        }
    }
    err.into()
}

fn migration_error(table: &str, step: &str, err: mysql_async::Error) -> StorageError {
    StorageError::Backend(BackendError::MigrationError {
        message: format!("{} on table {}: {}", step, table, err),
    })
}

#[async_trait]
impl RelationalStore for MysqlStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Mysql
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| BackendError::Unavailable {
                backend_name: "mysql".to_string(),
                message: e.to_string(),
            })?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| BackendError::Internal {
                backend_name: "mysql".to_string(),
                message: format!("Health check failed: {}", e),
                source: None,
            })
    }

    async fn migrate(&self, schema: &SchemaMap) -> StorageResult<()> {
        let table = schema.table();
        let mut conn = self.conn().await?;

        conn.query_drop(sql::create_table(
            Dialect::Mysql,
            schema,
            Some(&self.config.charset),
        ))
        .await
        .map_err(|e| migration_error(table, "create table", e))?;

        let existing: HashSet<String> = conn
            .exec::<String, _, _>(
                "SELECT column_name FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ?",
                (table,),
            )
            .await
            .map_err(|e| migration_error(table, "read columns", e))?
            .into_iter()
            .collect();

        for column in schema.columns() {
            if !existing.contains(&column.name) {
                conn.query_drop(sql::add_column(Dialect::Mysql, table, column))
                    .await
                    .map_err(|e| migration_error(table, "add column", e))?;
                tracing::debug!(table = %table, column = %column.name, "Added column");
            }
        }

        for (group, columns) in schema.unique_groups() {
            let present: Option<i64> = conn
                .exec_first(
                    "SELECT COUNT(*) FROM information_schema.statistics \
                     WHERE table_schema = DATABASE() AND table_name = ? AND index_name = ?",
                    (table, unique_index_name(table, &group)),
                )
                .await
                .map_err(|e| migration_error(table, "read indexes", e))?;
            if present.unwrap_or(0) == 0 {
                conn.query_drop(sql::create_unique_index(
                    Dialect::Mysql,
                    table,
                    &group,
                    &columns,
                ))
                .await
                .map_err(|e| migration_error(table, "create unique index", e))?;
            }
        }

        Ok(())
    }

    async fn insert(&self, schema: &SchemaMap, row: &Row) -> StorageResult<Option<i64>> {
        let statement = sql::insert(Dialect::Mysql, schema, row)?;
        let (_, last_id) = self.execute(schema.table(), &statement).await?;
        Ok(last_id.and_then(|id| i64::try_from(id).ok()))
    }

    async fn upsert(
        &self,
        schema: &SchemaMap,
        row: &Row,
        conflict: &[String],
        assigned: &[String],
    ) -> StorageResult<u64> {
        let statement = sql::upsert(Dialect::Mysql, schema, row, conflict, assigned)?;
        Ok(self.execute(schema.table(), &statement).await?.0)
    }

    async fn update(
        &self,
        schema: &SchemaMap,
        condition: &Condition,
        patch: &Row,
    ) -> StorageResult<u64> {
        let statement = sql::update(Dialect::Mysql, schema, condition, patch)?;
        Ok(self.execute(schema.table(), &statement).await?.0)
    }

    async fn select(
        &self,
        schema: &SchemaMap,
        condition: &Condition,
        options: &QueryOptions,
    ) -> StorageResult<Vec<Row>> {
        let statement = sql::select(Dialect::Mysql, schema, condition, options)?;
        let params = bind_params(&statement)?;
        let mut conn = self.conn().await?;
        let rows: Vec<mysql_async::Row> = conn.exec(statement.sql.as_str(), params).await?;

        Ok(rows
            .iter()
            .map(|my_row| {
                schema
                    .columns()
                    .iter()
                    .enumerate()
                    .map(|(i, column)| {
                        (
                            column.name.clone(),
                            cell(my_row.as_ref(i)).decode(column.sql_type),
                        )
                    })
                    .collect()
            })
            .collect())
    }

    async fn delete(&self, schema: &SchemaMap, condition: &Condition) -> StorageResult<u64> {
        let statement = sql::delete(Dialect::Mysql, schema, condition)?;
        Ok(self.execute(schema.table(), &statement).await?.0)
    }
}
