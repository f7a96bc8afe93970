//! PostgreSQL backend implementation.
//!
//! Rows are stored in one table per entity with native `BIGINT`,
//! `DOUBLE PRECISION` and `BOOLEAN` columns; timestamps and JSON columns are
//! text. The `id` column is a `BIGSERIAL` and inserts use `RETURNING id`.

mod backend;

pub use backend::{PostgresConfig, PostgresStore};
