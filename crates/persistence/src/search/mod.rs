//! Search-index clients.
//!
//! The index is the read-optimised projection of the relational store. Each
//! client implements [`SearchIndex`] for one engine protocol version and is
//! selected by [`IndexConfig::version`]:
//!
//! | Version | Client | Feature |
//! |---------|--------|---------|
//! | `8` | [`ElasticV8`](elasticsearch::ElasticV8) | `elasticsearch` |
//! | `7` | [`ElasticV7`](elasticsearch::ElasticV7) | `elasticsearch` |
//! | `memory` | [`MemoryIndex`] | always |
//!
//! Writes to the index are best-effort. `delete` and `delete_index` log engine
//! failures instead of returning them.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConfigError, StorageResult};

#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;
mod memory;
mod query;

pub use memory::MemoryIndex;
pub use query::{DEFAULT_SEARCH_SIZE, SearchOptions, TermQuery, search_body};

/// A client for one search engine.
#[async_trait]
pub trait SearchIndex: Debug + Send + Sync {
    /// The protocol version this client speaks.
    fn version(&self) -> &str;

    /// Creates or overwrites the document `id`.
    async fn index(&self, index: &str, id: &str, document: &Value) -> StorageResult<()>;

    /// Merges `partial` into the existing document `id`.
    async fn update(&self, index: &str, id: &str, partial: &Map<String, Value>) -> StorageResult<()>;

    /// Returns the `_source` of every matching document.
    ///
    /// A sort on a field the engine cannot sort on yields an empty result,
    /// which is indistinguishable from a search that matched nothing.
    async fn search(
        &self,
        index: &str,
        query: &TermQuery,
        options: &SearchOptions,
    ) -> StorageResult<Vec<Map<String, Value>>>;

    /// Removes the given documents. Failures are logged.
    async fn delete(&self, index: &str, ids: &[String]);

    /// Removes whole indices. Failures are logged.
    async fn delete_index(&self, indices: &[String]);
}

/// Connection settings for a search engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// `"8"`, `"7"` or `"memory"`.
    #[serde(default = "default_version")]
    pub version: String,

    /// Engine node URLs. The first one is used.
    #[serde(default = "default_addresses")]
    pub addresses: Vec<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Refresh after each write so documents are searchable immediately.
    #[serde(default)]
    pub refresh: bool,
}

fn default_version() -> String {
    "8".to_string()
}

fn default_addresses() -> Vec<String> {
    vec!["http://localhost:9200".to_string()]
}

fn default_request_timeout_ms() -> u64 {
    30000
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            addresses: default_addresses(),
            username: None,
            password: None,
            request_timeout_ms: default_request_timeout_ms(),
            refresh: false,
        }
    }
}

impl IndexConfig {
    pub fn memory() -> Self {
        Self {
            version: "memory".to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn first_address(&self) -> &str {
        self.addresses
            .first()
            .map(String::as_str)
            .unwrap_or("http://localhost:9200")
    }
}

/// Creates the client for `config.version`.
pub fn connect(config: &IndexConfig) -> StorageResult<Arc<dyn SearchIndex>> {
    let normalized = config.version.trim().to_ascii_lowercase();
    let version = normalized.strip_prefix('v').unwrap_or(&normalized);
    let client: Arc<dyn SearchIndex> = match version {
        "memory" => Arc::new(MemoryIndex::new()),
        #[cfg(feature = "elasticsearch")]
        "8" => Arc::new(elasticsearch::ElasticV8::new(config)?),
        #[cfg(feature = "elasticsearch")]
        "7" => Arc::new(elasticsearch::ElasticV7::new(config)?),
        #[cfg(not(feature = "elasticsearch"))]
        "7" | "8" => {
            return Err(ConfigError::BackendNotEnabled {
                kind: format!("elasticsearch v{}", version),
                feature: "elasticsearch",
            }
            .into());
        }
        other => {
            return Err(ConfigError::UnsupportedIndexVersion {
                version: other.to_string(),
            }
            .into());
        }
    };

    tracing::info!(
        version = %client.version(),
        address = %config.first_address(),
        "Created search index client"
    );
    Ok(client)
}
