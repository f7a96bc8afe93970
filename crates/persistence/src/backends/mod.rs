//! Relational store implementations.
//!
//! Each backend implements [`RelationalStore`](crate::core::RelationalStore)
//! and is gated behind a feature flag.
//!
//! | Backend | Feature | Store kinds |
//! |---------|---------|-------------|
//! | SQLite | `sqlite` | `sqlite`, `memory` |
//! | PostgreSQL | `postgres` | `postgres` |
//! | MySQL | `mysql` | `mysql` |
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "sqlite")]
//! use tessera_persistence::backends::sqlite::SqliteStore;
//!
//! # #[cfg(feature = "sqlite")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteStore::in_memory()?;
//! # Ok(())
//! # }
//! ```

#[cfg(any(feature = "sqlite", feature = "postgres", feature = "mysql"))]
pub(crate) mod sql;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;
