//! Tessera Persistence Layer
//!
//! Entity accessors over a relational store, with an eventually consistent
//! search-index read model kept in step by an asynchronous change notifier.
//!
//! # Features
//!
//! - **Relational backends**: SQLite (file and in-memory), PostgreSQL, MySQL
//! - **Search index**: Elasticsearch 7 and 8, or an in-process index
//! - **CQRS reads**: queries are answered from the index when one is attached,
//!   falling back to the relational store
//! - **Schema provisioning**: tables, columns and unique indexes from the
//!   entity declaration
//!
//! # Backend Features
//!
//! ```toml
//! [dependencies]
//! tessera-persistence = { version = "0.1", features = ["postgres", "elasticsearch"] }
//! ```
//!
//! - `sqlite` (default) - SQLite, also backing the `memory` store kind
//! - `postgres` - PostgreSQL via tokio-postgres
//! - `mysql` - MySQL via mysql_async
//! - `elasticsearch` - Elasticsearch 7 (REST) and 8 (official client)
//!
//! # Architecture
//!
//! - [`entity`] - the [`Entity`](entity::Entity) trait and column/field
//!   translation
//! - [`types`] - filters, patches and query options
//! - [`core`] - the [`RelationalStore`](core::RelationalStore) trait
//! - [`backends`] - relational engine implementations
//! - [`search`] - search-index clients
//! - [`sync`] - change notifier and index synchronization
//! - [`dao`] - the per-entity accessor
//! - [`store`] / [`registry`] - store handles and the accessor directory
//! - [`settings`] / [`logging`] - configuration and tracing setup
//!
//! # Quick Start
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use tessera_persistence::entity::{Column, Entity, Model};
//! use tessera_persistence::registry::Registry;
//! use tessera_persistence::search::IndexConfig;
//! use tessera_persistence::store::StoreConfig;
//! use tessera_persistence::types::{Filter, QueryOptions};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! struct Book {
//!     #[serde(flatten)]
//!     model: Model,
//!     title: String,
//!     author: String,
//! }
//!
//! impl Entity for Book {
//!     fn table_name() -> &'static str {
//!         "books"
//!     }
//!     fn columns() -> Vec<Column> {
//!         vec![Column::text("title").unique("title"), Column::text("author")]
//!     }
//!     fn model(&self) -> &Model {
//!         &self.model
//!     }
//!     fn model_mut(&mut self) -> &mut Model {
//!         &mut self.model
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::new();
//! registry.add_index("search", &IndexConfig::memory())?;
//! registry
//!     .add_store("library", &StoreConfig::memory().with_index("search"))
//!     .await?;
//!
//! let books = registry.accessor::<Book>("library").await?;
//! let mut book = Book {
//!     title: "Dune".into(),
//!     author: "Herbert".into(),
//!     ..Default::default()
//! };
//! books.create(&mut book).await?;
//!
//! let by_author = books
//!     .query(&Filter::new().eq("author", "Herbert"), &QueryOptions::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Consistency
//!
//! The relational store is authoritative. Mutations publish a change event
//! once the relational write returns; the index is updated asynchronously and
//! a failed index write is logged, never reported to the caller. Concurrent
//! mutations of one identifier may reach the index in a different order than
//! they reached the relational store.

pub mod backends;
pub mod core;
pub mod dao;
pub mod entity;
pub mod error;
pub mod logging;
pub mod registry;
pub mod search;
pub mod settings;
pub mod store;
pub mod sync;
pub mod types;

// Re-export commonly used types at crate root
pub use dao::{Dao, FallbackReason, QueryResult, ReadPath};
pub use entity::{Column, Entity, Model, SchemaMap};
pub use error::{StorageError, StorageResult};
pub use registry::Registry;
pub use store::{StoreConfig, StoreHandle};
pub use types::{Condition, Filter, Patch, QueryOptions};

// Re-export core traits
pub use core::{BackendKind, RelationalStore};
pub use search::SearchIndex;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
