//! SQLite schema provisioning.

use std::collections::HashSet;

use rusqlite::Connection;

use crate::backends::sql::{self, Dialect};
use crate::entity::SchemaMap;
use crate::error::{BackendError, StorageError, StorageResult};

fn migration_error(table: &str, step: &str, err: rusqlite::Error) -> StorageError {
    StorageError::Backend(BackendError::MigrationError {
        message: format!("{} on table {}: {}", step, table, err),
    })
}

/// Creates or extends the table for `schema`. Safe to run repeatedly.
pub(crate) fn migrate_table(conn: &Connection, schema: &SchemaMap) -> StorageResult<()> {
    let table = schema.table();

    conn.execute_batch(&sql::create_table(Dialect::Sqlite, schema, None))
        .map_err(|e| migration_error(table, "create table", e))?;

    let existing = existing_columns(conn, table)?;
    for column in schema.columns() {
        if !existing.contains(&column.name) {
            conn.execute_batch(&sql::add_column(Dialect::Sqlite, table, column))
                .map_err(|e| migration_error(table, "add column", e))?;
            tracing::debug!(table = %table, column = %column.name, "Added column");
        }
    }

    for (group, columns) in schema.unique_groups() {
        conn.execute_batch(&sql::create_unique_index(
            Dialect::Sqlite,
            table,
            &group,
            &columns,
        ))
        .map_err(|e| migration_error(table, "create unique index", e))?;
    }

    Ok(())
}

fn existing_columns(conn: &Connection, table: &str) -> StorageResult<HashSet<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", Dialect::Sqlite.quote(table)))
        .map_err(|e| migration_error(table, "read columns", e))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| migration_error(table, "read columns", e))?
        .collect::<Result<HashSet<_>, _>>()
        .map_err(|e| migration_error(table, "read columns", e))?;
    Ok(names)
}
