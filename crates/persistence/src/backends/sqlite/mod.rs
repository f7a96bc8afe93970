//! SQLite backend implementation.
//!
//! Serves two store kinds: `sqlite`, a database file shared by a connection
//! pool, and `memory`, a private in-process database on a single connection
//! (great for testing). Every entity gets its own table:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS "users" (
//!     "id" INTEGER PRIMARY KEY AUTOINCREMENT,
//!     "uuid" TEXT NOT NULL,
//!     "created_at" TEXT,
//!     "updated_at" TEXT,
//!     "name" TEXT,
//!     ...
//! );
//! CREATE UNIQUE INDEX IF NOT EXISTS "users_uuid" ON "users" ("uuid");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tessera_persistence::backends::sqlite::SqliteStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let memory = SqliteStore::in_memory()?;
//! let file = SqliteStore::open("./data/app.db")?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod schema;

pub use backend::{SqliteConfig, SqliteStore};
