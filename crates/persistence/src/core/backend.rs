//! Relational store abstraction.
//!
//! This module defines the [`RelationalStore`] trait, the one seam every
//! relational engine implements. Stores work on column-keyed [`Row`]s and
//! take the entity's [`SchemaMap`] with every call, so one store instance
//! serves any number of entity types.

use std::fmt::Debug;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::entity::SchemaMap;
use crate::error::{BackendError, ConfigError, StorageResult};
use crate::types::{Condition, QueryOptions};

/// A column-keyed row.
pub type Row = Map<String, Value>;

/// Identifies the relational engine behind a store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// SQLite database file.
    Sqlite,
    /// In-process SQLite database; always provisions schema.
    Memory,
    /// PostgreSQL database.
    Postgres,
    /// MySQL or MariaDB database.
    Mysql,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Memory => "memory",
            BackendKind::Postgres => "postgres",
            BackendKind::Mysql => "mysql",
        }
    }

    /// The cargo feature that compiles this engine in.
    pub fn feature(&self) -> &'static str {
        match self {
            BackendKind::Sqlite | BackendKind::Memory => "sqlite",
            BackendKind::Postgres => "postgres",
            BackendKind::Mysql => "mysql",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(BackendKind::Sqlite),
            "memory" | "in-memory" | "inmemory" => Ok(BackendKind::Memory),
            "postgres" | "postgresql" | "pgsql" => Ok(BackendKind::Postgres),
            "mysql" | "mariadb" => Ok(BackendKind::Mysql),
            other => Err(ConfigError::UnsupportedBackend {
                kind: other.to_string(),
            }),
        }
    }
}

/// A relational engine that persists entity rows.
///
/// Writes that violate a unique index fail with
/// [`ResourceError::ConstraintViolation`](crate::error::ResourceError::ConstraintViolation);
/// filters, patches and orderings naming undeclared columns fail with a
/// validation error before reaching the engine.
#[async_trait]
pub trait RelationalStore: Debug + Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Checks that the engine answers.
    async fn health_check(&self) -> Result<(), BackendError>;

    /// Creates the table if missing, adds missing columns and creates missing
    /// unique indexes.
    async fn migrate(&self, schema: &SchemaMap) -> StorageResult<()>;

    /// Inserts one row and returns the generated row id when the engine
    /// reports it.
    async fn insert(&self, schema: &SchemaMap, row: &Row) -> StorageResult<Option<i64>>;

    /// Inserts a row or, on conflict over `conflict`, updates `assigned`
    /// (or every writable column when `assigned` is empty). Returns the
    /// engine's affected-row count.
    async fn upsert(
        &self,
        schema: &SchemaMap,
        row: &Row,
        conflict: &[String],
        assigned: &[String],
    ) -> StorageResult<u64>;

    /// Sets `patch` on every row matching `condition`.
    async fn update(&self, schema: &SchemaMap, condition: &Condition, patch: &Row)
    -> StorageResult<u64>;

    /// Selects every declared column of the matching rows.
    async fn select(
        &self,
        schema: &SchemaMap,
        condition: &Condition,
        options: &QueryOptions,
    ) -> StorageResult<Vec<Row>>;

    /// Deletes the matching rows.
    async fn delete(&self, schema: &SchemaMap, condition: &Condition) -> StorageResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_aliases() {
        assert_eq!("in-memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!("memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!("pgsql".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert_eq!("PostgreSQL".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert_eq!("mysql".parse::<BackendKind>().unwrap(), BackendKind::Mysql);
        assert_eq!("sqlite".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
    }

    #[test]
    fn test_unsupported_kind() {
        let err = "oracle".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedBackend { kind } if kind == "oracle"));
    }

    #[test]
    fn test_display_and_feature() {
        assert_eq!(BackendKind::Memory.to_string(), "memory");
        assert_eq!(BackendKind::Memory.feature(), "sqlite");
        assert_eq!(BackendKind::Mysql.feature(), "mysql");
    }
}
