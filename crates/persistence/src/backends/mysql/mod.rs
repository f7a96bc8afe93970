//! MySQL backend implementation.
//!
//! Text columns are `VARCHAR(255)` so they can carry unique indexes, JSON
//! columns are `LONGTEXT`, and upserts use `ON DUPLICATE KEY UPDATE`. The
//! engine reports 2 affected rows for an upsert that updated an existing row
//! and 0 for one that changed nothing.

mod backend;

pub use backend::{MysqlConfig, MysqlStore};
