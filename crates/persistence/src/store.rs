//! Store handles and the backend-kind dispatch.
//!
//! A [`StoreHandle`] owns one relational store, its schema provisioning
//! policy, and the search index attached to it, if any. Handles are created by
//! the [`Registry`](crate::registry::Registry) and shared by every accessor
//! bound to the same store key.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{BackendKind, RelationalStore};
use crate::error::{BackendError, StorageResult};
use crate::search::SearchIndex;

#[cfg(feature = "sqlite")]
use crate::backends::sqlite::{SqliteConfig, SqliteStore};

#[cfg(feature = "postgres")]
use crate::backends::postgres::{PostgresConfig, PostgresStore};

#[cfg(feature = "mysql")]
use crate::backends::mysql::{MysqlConfig, MysqlStore};

#[cfg(any(feature = "postgres", feature = "mysql"))]
use crate::error::ConfigError;

/// Pause between connection attempts.
pub const RETRY_PAUSE: Duration = Duration::from_secs(3);

/// Connection settings for one store.
///
/// Only the parameters the chosen backend needs are read: `filepath` for
/// `sqlite`, `dbname` (plus host, port and credentials) for `postgres` and
/// `mysql`, nothing for `memory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend kind: `sqlite`, `memory`/`in-memory`, `postgres`/`pgsql`,
    /// `mysql`.
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default, alias = "user")]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub dbname: Option<String>,

    /// Database file for `sqlite`.
    #[serde(default)]
    pub filepath: Option<String>,

    /// Table character set for `mysql`.
    #[serde(default = "default_charset")]
    pub charset: String,

    #[serde(default)]
    pub timezone: Option<String>,

    /// Engine session parameters (`PRAGMA` for sqlite).
    #[serde(default)]
    pub options: BTreeMap<String, String>,

    /// Provision the schema when an accessor is registered.
    #[serde(default)]
    pub automigrate: bool,

    /// Additional connection attempts before giving up.
    #[serde(default)]
    pub retry: u32,

    #[serde(default)]
    pub max_connections: Option<usize>,

    /// Search index attached to this store.
    #[serde(default)]
    pub cqrs: Option<CqrsConfig>,
}

fn default_charset() -> String {
    "utf8mb4".to_string()
}

impl StoreConfig {
    /// A configuration of the given kind with every optional parameter unset.
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            host: None,
            port: None,
            username: None,
            password: None,
            dbname: None,
            filepath: None,
            charset: default_charset(),
            timezone: None,
            options: BTreeMap::new(),
            automigrate: false,
            retry: 0,
            max_connections: None,
            cqrs: None,
        }
    }

    pub fn memory() -> Self {
        Self::new("memory")
    }

    pub fn sqlite(filepath: &str) -> Self {
        Self {
            filepath: Some(filepath.to_string()),
            ..Self::new("sqlite")
        }
    }

    pub fn with_automigrate(mut self, automigrate: bool) -> Self {
        self.automigrate = automigrate;
        self
    }

    /// Attaches the search index registered under `name`.
    pub fn with_index(mut self, name: &str) -> Self {
        self.cqrs = Some(CqrsConfig {
            kind: "elastic".to_string(),
            name: name.to_string(),
        });
        self
    }

    #[cfg(any(feature = "postgres", feature = "mysql"))]
    fn require_dbname(&self, key: &str) -> Result<String, ConfigError> {
        self.dbname
            .clone()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ConfigError::MissingParameter {
                store: key.to_string(),
                parameter: "dbname".to_string(),
            })
    }
}

/// Reference from a store to its search index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CqrsConfig {
    /// Index engine family; `elastic`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Key of the index configuration.
    pub name: String,
}

/// One configured store.
#[derive(Debug)]
pub struct StoreHandle {
    key: String,
    kind: BackendKind,
    automigrate: bool,
    relational: Arc<dyn RelationalStore>,
    search: Option<Arc<dyn SearchIndex>>,
}

impl StoreHandle {
    /// Wraps an existing store. Memory stores always provision schema.
    pub fn new(
        key: &str,
        relational: Arc<dyn RelationalStore>,
        automigrate: bool,
        search: Option<Arc<dyn SearchIndex>>,
    ) -> Self {
        let kind = relational.kind();
        Self {
            key: key.to_string(),
            kind,
            automigrate: automigrate || kind == BackendKind::Memory,
            relational,
            search,
        }
    }

    /// Opens the backend named by `config.kind` and checks that it answers.
    pub async fn connect(
        key: &str,
        config: &StoreConfig,
        search: Option<Arc<dyn SearchIndex>>,
    ) -> StorageResult<Self> {
        let kind: BackendKind = config.kind.parse()?;
        let relational = open_relational(key, kind, config)?;
        check_connection(key, relational.as_ref(), config.retry).await?;

        info!(
            store = %key,
            kind = %kind,
            indexed = search.is_some(),
            "Connected store"
        );
        Ok(Self::new(key, relational, config.automigrate, search))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn automigrate(&self) -> bool {
        self.automigrate
    }

    pub fn relational(&self) -> &Arc<dyn RelationalStore> {
        &self.relational
    }

    pub fn search_index(&self) -> Option<&Arc<dyn SearchIndex>> {
        self.search.as_ref()
    }
}

#[allow(unused_variables)]
fn open_relational(
    key: &str,
    kind: BackendKind,
    config: &StoreConfig,
) -> StorageResult<Arc<dyn RelationalStore>> {
    match kind {
        #[cfg(feature = "sqlite")]
        BackendKind::Memory => Ok(Arc::new(SqliteStore::in_memory()?)),

        #[cfg(feature = "sqlite")]
        BackendKind::Sqlite => {
            let path = config
                .filepath
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| crate::error::ConfigError::MissingParameter {
                    store: key.to_string(),
                    parameter: "filepath".to_string(),
                })?;
            let mut sqlite = SqliteConfig {
                pragmas: config.options.clone(),
                ..SqliteConfig::default()
            };
            if let Some(max) = config.max_connections {
                sqlite.max_connections = u32::try_from(max).unwrap_or(u32::MAX);
            }
            Ok(Arc::new(SqliteStore::with_config(path, sqlite)?))
        }

        #[cfg(feature = "postgres")]
        BackendKind::Postgres => {
            let mut postgres = PostgresConfig::new(&config.require_dbname(key)?);
            if let Some(host) = &config.host {
                postgres.host = host.clone();
            }
            if let Some(port) = config.port {
                postgres.port = port;
            }
            if let Some(user) = &config.username {
                postgres.user = user.clone();
            }
            if let Some(max) = config.max_connections {
                postgres.max_connections = max;
            }
            postgres.password = config.password.clone();
            postgres.timezone = config.timezone.clone();
            postgres.options = config.options.clone();
            Ok(Arc::new(PostgresStore::new(postgres)?))
        }

        #[cfg(feature = "mysql")]
        BackendKind::Mysql => {
            let mut mysql = MysqlConfig::new(&config.require_dbname(key)?);
            if let Some(host) = &config.host {
                mysql.host = host.clone();
            }
            if let Some(port) = config.port {
                mysql.port = port;
            }
            if let Some(user) = &config.username {
                mysql.user = user.clone();
            }
            if let Some(max) = config.max_connections {
                mysql.max_connections = max;
            }
            mysql.password = config.password.clone();
            mysql.charset = config.charset.clone();
            mysql.timezone = config.timezone.clone();
            mysql.options = config.options.clone();
            Ok(Arc::new(MysqlStore::new(mysql)?))
        }

        #[allow(unreachable_patterns)]
        other => Err(crate::error::ConfigError::BackendNotEnabled {
            kind: other.to_string(),
            feature: other.feature(),
        }
        .into()),
    }
}

/// Runs the health check, retrying `retry` more times with [`RETRY_PAUSE`]
/// between attempts.
async fn check_connection(key: &str, store: &dyn RelationalStore, retry: u32) -> StorageResult<()> {
    let mut attempt: u32 = 0;
    loop {
        match store.health_check().await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < retry => {
                attempt += 1;
                warn!(store = %key, attempt, error = %e, "Store connection check failed, retrying");
                tokio::time::sleep(RETRY_PAUSE).await;
            }
            Err(e) => {
                return Err(BackendError::ConnectionFailed {
                    backend_name: store.kind().to_string(),
                    message: format!(
                        "store '{}' unreachable after {} attempt(s): {}",
                        key,
                        attempt + 1,
                        e
                    ),
                }
                .into());
            }
        }
    }
}
