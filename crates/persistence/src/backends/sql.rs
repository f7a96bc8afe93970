//! SQL text generation shared by the relational backends.
//!
//! Statements are built from the entity's [`SchemaMap`]; every identifier that
//! reaches SQL text is a declared column or table name (validated as a plain
//! identifier when the schema was built) and every value is bound as a
//! parameter. Each [`Param`] carries the declared column type when known so
//! that strictly typed drivers can bind it correctly.

use serde_json::Value;

use crate::core::Row;
use crate::entity::{
    CREATED_AT_COLUMN, Column, ID_COLUMN, SchemaMap, SqlType, UPDATED_AT_COLUMN, UUID_COLUMN,
};
use crate::error::ValidationError;
use crate::types::{Condition, QueryOptions};

/// SQL dialect of a relational backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
}

impl Dialect {
    pub(crate) fn quote(&self, ident: &str) -> String {
        match self {
            Dialect::Mysql => format!("`{}`", ident),
            Dialect::Sqlite | Dialect::Postgres => format!("\"{}\"", ident),
        }
    }

    fn placeholder(&self, position: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", position),
            Dialect::Sqlite | Dialect::Mysql => "?".to_string(),
        }
    }

    pub(crate) fn column_type(&self, sql_type: SqlType) -> &'static str {
        match (self, sql_type) {
            (Dialect::Sqlite, SqlType::Integer | SqlType::Boolean) => "INTEGER",
            (Dialect::Sqlite, SqlType::Real) => "REAL",
            (Dialect::Sqlite, SqlType::Text | SqlType::Timestamp | SqlType::Json) => "TEXT",

            (Dialect::Postgres, SqlType::Integer) => "BIGINT",
            (Dialect::Postgres, SqlType::Real) => "DOUBLE PRECISION",
            (Dialect::Postgres, SqlType::Boolean) => "BOOLEAN",
            (Dialect::Postgres, SqlType::Text | SqlType::Timestamp | SqlType::Json) => "TEXT",

            (Dialect::Mysql, SqlType::Text) => "VARCHAR(255)",
            (Dialect::Mysql, SqlType::Integer) => "BIGINT",
            (Dialect::Mysql, SqlType::Real) => "DOUBLE",
            (Dialect::Mysql, SqlType::Boolean) => "TINYINT(1)",
            (Dialect::Mysql, SqlType::Timestamp) => "VARCHAR(64)",
            (Dialect::Mysql, SqlType::Json) => "LONGTEXT",
        }
    }

    fn primary_key_definition(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
            Dialect::Mysql => "BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY",
        }
    }
}

/// A bound value and the declared type of the column it is compared with.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Param {
    pub value: Value,
    pub sql_type: Option<SqlType>,
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

struct Builder {
    dialect: Dialect,
    sql: String,
    params: Vec<Param>,
}

impl Builder {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn push_ident(&mut self, ident: &str) {
        let quoted = self.dialect.quote(ident);
        self.sql.push_str(&quoted);
    }

    fn bind(&mut self, value: Value, sql_type: Option<SqlType>) {
        self.params.push(Param { value, sql_type });
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
    }

    fn where_clause(
        &mut self,
        schema: &SchemaMap,
        condition: &Condition,
    ) -> Result<(), ValidationError> {
        match condition {
            Condition::Filter(filter) => {
                if filter.is_empty() {
                    return Ok(());
                }
                self.push(" WHERE ");
                for (i, (column, value)) in filter.iter().enumerate() {
                    let sql_type = schema.require_column(column)?.sql_type;
                    if i > 0 {
                        self.push(" AND ");
                    }
                    match value {
                        Value::Null => {
                            self.push_ident(column);
                            self.push(" IS NULL");
                        }
                        Value::Array(values) if values.is_empty() => self.push("1 = 0"),
                        Value::Array(values) => {
                            self.push_ident(column);
                            self.push(" IN (");
                            for (j, v) in values.iter().enumerate() {
                                if j > 0 {
                                    self.push(", ");
                                }
                                self.bind(v.clone(), Some(sql_type));
                            }
                            self.push(")");
                        }
                        other => {
                            self.push_ident(column);
                            self.push(" = ");
                            self.bind(other.clone(), Some(sql_type));
                        }
                    }
                }
                Ok(())
            }
            Condition::Raw { sql, args } => {
                self.push(" WHERE (");
                let mut args = args.iter();
                let mut in_literal = false;
                for ch in sql.chars() {
                    match ch {
                        '\'' => {
                            in_literal = !in_literal;
                            self.sql.push(ch);
                        }
                        '?' if !in_literal => {
                            let arg = args.next().ok_or_else(|| ValidationError::InvalidValue {
                                column: sql.clone(),
                                message: "fewer arguments than placeholders".to_string(),
                            })?;
                            self.bind(arg.clone(), None);
                        }
                        _ => self.sql.push(ch),
                    }
                }
                if args.next().is_some() {
                    return Err(ValidationError::InvalidValue {
                        column: sql.clone(),
                        message: "more arguments than placeholders".to_string(),
                    });
                }
                self.push(")");
                Ok(())
            }
        }
    }

    fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

fn is_unset_id(value: &Value) -> bool {
    value.is_null() || value.as_i64() == Some(0)
}

fn insert_body(
    builder: &mut Builder,
    schema: &SchemaMap,
    row: &Row,
) -> Result<(), ValidationError> {
    for column in row.keys() {
        schema.require_column(column)?;
    }

    let columns: Vec<&Column> = schema
        .columns()
        .iter()
        .filter(|c| match row.get(&c.name) {
            Some(value) => !(c.primary_key && is_unset_id(value)),
            None => false,
        })
        .collect();

    builder.push("INSERT INTO ");
    builder.push_ident(schema.table());

    if columns.is_empty() {
        match builder.dialect {
            Dialect::Mysql => builder.push(" () VALUES ()"),
            Dialect::Sqlite | Dialect::Postgres => builder.push(" DEFAULT VALUES"),
        }
        return Ok(());
    }

    builder.push(" (");
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push_ident(&column.name);
    }
    builder.push(") VALUES (");
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        let value = row.get(&column.name).cloned().unwrap_or(Value::Null);
        builder.bind(value, Some(column.sql_type));
    }
    builder.push(")");
    Ok(())
}

/// `INSERT` of one row. Postgres statements return the generated id.
pub(crate) fn insert(
    dialect: Dialect,
    schema: &SchemaMap,
    row: &Row,
) -> Result<Statement, ValidationError> {
    let mut builder = Builder::new(dialect);
    insert_body(&mut builder, schema, row)?;
    if dialect == Dialect::Postgres {
        builder.push(" RETURNING ");
        builder.push_ident(ID_COLUMN);
    }
    Ok(builder.finish())
}

/// Columns an upsert may overwrite on conflict.
fn upsert_assignments(
    schema: &SchemaMap,
    row: &Row,
    conflict: &[String],
    assigned: &[String],
) -> Result<Vec<String>, ValidationError> {
    let immutable = |name: &str| matches!(name, ID_COLUMN | UUID_COLUMN | CREATED_AT_COLUMN);

    if assigned.is_empty() {
        return Ok(schema
            .columns()
            .iter()
            .map(|c| c.name.clone())
            .filter(|name| row.contains_key(name))
            .filter(|name| !immutable(name) && !conflict.contains(name))
            .collect());
    }

    let mut set = Vec::with_capacity(assigned.len() + 1);
    for name in assigned {
        schema.require_column(name)?;
        if !row.contains_key(name) {
            return Err(ValidationError::InvalidValue {
                column: name.clone(),
                message: "assigned column is not part of the written row".to_string(),
            });
        }
        if !immutable(name) && !set.contains(name) {
            set.push(name.clone());
        }
    }
    if row.contains_key(UPDATED_AT_COLUMN) && !set.iter().any(|c| c == UPDATED_AT_COLUMN) {
        set.push(UPDATED_AT_COLUMN.to_string());
    }
    Ok(set)
}

/// Insert-or-update over a unique column set.
///
/// With no conflict columns this is a plain insert. Explicit `assigned`
/// columns take precedence over updating every column; `id`, `uuid` and
/// `created_at` are never overwritten.
pub(crate) fn upsert(
    dialect: Dialect,
    schema: &SchemaMap,
    row: &Row,
    conflict: &[String],
    assigned: &[String],
) -> Result<Statement, ValidationError> {
    if conflict.is_empty() {
        let mut builder = Builder::new(dialect);
        insert_body(&mut builder, schema, row)?;
        return Ok(builder.finish());
    }

    for name in conflict {
        schema.require_column(name)?;
    }
    let set = upsert_assignments(schema, row, conflict, assigned)?;

    let mut builder = Builder::new(dialect);
    insert_body(&mut builder, schema, row)?;

    match dialect {
        Dialect::Sqlite | Dialect::Postgres => {
            builder.push(" ON CONFLICT (");
            for (i, name) in conflict.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                builder.push_ident(name);
            }
            if set.is_empty() {
                builder.push(") DO NOTHING");
            } else {
                builder.push(") DO UPDATE SET ");
                for (i, name) in set.iter().enumerate() {
                    if i > 0 {
                        builder.push(", ");
                    }
                    builder.push_ident(name);
                    builder.push(" = excluded.");
                    builder.push_ident(name);
                }
            }
        }
        Dialect::Mysql => {
            builder.push(" ON DUPLICATE KEY UPDATE ");
            if set.is_empty() {
                builder.push_ident(ID_COLUMN);
                builder.push(" = ");
                builder.push_ident(ID_COLUMN);
            } else {
                for (i, name) in set.iter().enumerate() {
                    if i > 0 {
                        builder.push(", ");
                    }
                    builder.push_ident(name);
                    builder.push(" = VALUES(");
                    builder.push_ident(name);
                    builder.push(")");
                }
            }
        }
    }

    Ok(builder.finish())
}

/// `UPDATE ... SET` for the patched columns.
pub(crate) fn update(
    dialect: Dialect,
    schema: &SchemaMap,
    condition: &Condition,
    patch: &Row,
) -> Result<Statement, ValidationError> {
    if patch.is_empty() {
        return Err(ValidationError::EmptyPatch {
            table: schema.table().to_string(),
        });
    }

    let mut builder = Builder::new(dialect);
    builder.push("UPDATE ");
    builder.push_ident(schema.table());
    builder.push(" SET ");
    for (i, (name, value)) in patch.iter().enumerate() {
        let column = schema.require_column(name)?;
        if matches!(name.as_str(), ID_COLUMN | UUID_COLUMN) {
            return Err(ValidationError::InvalidValue {
                column: name.clone(),
                message: "column is immutable".to_string(),
            });
        }
        if i > 0 {
            builder.push(", ");
        }
        builder.push_ident(name);
        builder.push(" = ");
        builder.bind(value.clone(), Some(column.sql_type));
    }
    builder.where_clause(schema, condition)?;
    Ok(builder.finish())
}

/// `SELECT` of every declared column, in declaration order.
pub(crate) fn select(
    dialect: Dialect,
    schema: &SchemaMap,
    condition: &Condition,
    options: &QueryOptions,
) -> Result<Statement, ValidationError> {
    let mut builder = Builder::new(dialect);
    builder.push("SELECT ");
    for (i, column) in schema.columns().iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push_ident(&column.name);
    }
    builder.push(" FROM ");
    builder.push_ident(schema.table());
    builder.where_clause(schema, condition)?;

    let keys = options.sort_keys()?;
    if !keys.is_empty() {
        builder.push(" ORDER BY ");
        for (i, key) in keys.iter().enumerate() {
            schema.require_column(&key.name)?;
            if i > 0 {
                builder.push(", ");
            }
            // Nulls sort last in either direction, as on the index.
            match dialect {
                Dialect::Mysql => {
                    builder.push_ident(&key.name);
                    builder.push(" IS NULL, ");
                    builder.push_ident(&key.name);
                    builder.push(" ");
                    builder.push(&key.order.as_str().to_ascii_uppercase());
                }
                Dialect::Sqlite | Dialect::Postgres => {
                    builder.push_ident(&key.name);
                    builder.push(" ");
                    builder.push(&key.order.as_str().to_ascii_uppercase());
                    builder.push(" NULLS LAST");
                }
            }
        }
    }

    match (options.limit, options.offset) {
        (Some(limit), offset) => {
            builder.push(&format!(" LIMIT {}", limit));
            if let Some(offset) = offset {
                builder.push(&format!(" OFFSET {}", offset));
            }
        }
        (None, Some(offset)) => match dialect {
            Dialect::Sqlite => builder.push(&format!(" LIMIT -1 OFFSET {}", offset)),
            Dialect::Mysql => {
                builder.push(&format!(" LIMIT 18446744073709551615 OFFSET {}", offset))
            }
            Dialect::Postgres => builder.push(&format!(" OFFSET {}", offset)),
        },
        (None, None) => {}
    }

    Ok(builder.finish())
}

/// `DELETE` of the matching rows.
pub(crate) fn delete(
    dialect: Dialect,
    schema: &SchemaMap,
    condition: &Condition,
) -> Result<Statement, ValidationError> {
    let mut builder = Builder::new(dialect);
    builder.push("DELETE FROM ");
    builder.push_ident(schema.table());
    builder.where_clause(schema, condition)?;
    Ok(builder.finish())
}

/// `CREATE TABLE IF NOT EXISTS` with every declared column.
pub(crate) fn create_table(dialect: Dialect, schema: &SchemaMap, charset: Option<&str>) -> String {
    let definitions: Vec<String> = schema
        .columns()
        .iter()
        .map(|column| column_definition(dialect, column, true))
        .collect();

    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        dialect.quote(schema.table()),
        definitions.join(", ")
    );
    if dialect == Dialect::Mysql {
        sql.push_str(" ENGINE=InnoDB");
        if let Some(charset) = charset {
            sql.push_str(&format!(" DEFAULT CHARSET={}", charset));
        }
    }
    sql
}

fn column_definition(dialect: Dialect, column: &Column, with_constraints: bool) -> String {
    if column.primary_key {
        return format!(
            "{} {}",
            dialect.quote(&column.name),
            dialect.primary_key_definition()
        );
    }
    let mut definition = format!(
        "{} {}",
        dialect.quote(&column.name),
        dialect.column_type(column.sql_type)
    );
    if with_constraints && column.not_null {
        definition.push_str(" NOT NULL");
    }
    definition
}

/// `ALTER TABLE ... ADD COLUMN`; added columns are always nullable.
pub(crate) fn add_column(dialect: Dialect, table: &str, column: &Column) -> String {
    let if_not_exists = if dialect == Dialect::Postgres {
        "IF NOT EXISTS "
    } else {
        ""
    };
    format!(
        "ALTER TABLE {} ADD COLUMN {}{}",
        dialect.quote(table),
        if_not_exists,
        column_definition(dialect, column, false)
    )
}

pub(crate) fn unique_index_name(table: &str, group: &str) -> String {
    format!("{}_{}", table, group)
}

/// `CREATE UNIQUE INDEX` for a unique group. MySQL has no `IF NOT EXISTS`
/// here; its backend checks the catalog first.
pub(crate) fn create_unique_index(
    dialect: Dialect,
    table: &str,
    group: &str,
    columns: &[String],
) -> String {
    let if_not_exists = if dialect == Dialect::Mysql {
        ""
    } else {
        "IF NOT EXISTS "
    };
    let columns: Vec<String> = columns.iter().map(|c| dialect.quote(c)).collect();
    format!(
        "CREATE UNIQUE INDEX {}{} ON {} ({})",
        if_not_exists,
        dialect.quote(&unique_index_name(table, group)),
        dialect.quote(table),
        columns.join(", ")
    )
}

/// A parameter value normalised for driver binding.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Bound {
    Null,
    Int(i64),
    Real(f64),
    Bool(bool),
    Text(String),
}

impl Param {
    /// Coerces the JSON value to the declared column type. Raw-condition
    /// arguments, which have no declared type, keep their JSON shape.
    pub(crate) fn bound(&self) -> Result<Bound, ValidationError> {
        let invalid = |message: &str| ValidationError::InvalidValue {
            column: format!("{:?}", self.sql_type),
            message: format!("{}: {}", message, self.value),
        };

        let value = &self.value;
        if value.is_null() {
            return Ok(Bound::Null);
        }

        let bound = match self.sql_type {
            Some(SqlType::Json) => Bound::Text(value.to_string()),
            Some(SqlType::Text | SqlType::Timestamp) => match value {
                Value::String(s) => Bound::Text(s.clone()),
                other => Bound::Text(other.to_string()),
            },
            Some(SqlType::Integer) => match value {
                Value::Number(n) => Bound::Int(
                    n.as_i64()
                        .or_else(|| n.as_f64().map(|f| f as i64))
                        .ok_or_else(|| invalid("integer out of range"))?,
                ),
                Value::Bool(b) => Bound::Int(i64::from(*b)),
                Value::String(s) => Bound::Int(
                    s.trim()
                        .parse()
                        .map_err(|_| invalid("expected an integer"))?,
                ),
                _ => return Err(invalid("expected an integer")),
            },
            Some(SqlType::Real) => match value {
                Value::Number(n) => {
                    Bound::Real(n.as_f64().ok_or_else(|| invalid("number out of range"))?)
                }
                Value::String(s) => {
                    Bound::Real(s.trim().parse().map_err(|_| invalid("expected a number"))?)
                }
                _ => return Err(invalid("expected a number")),
            },
            Some(SqlType::Boolean) => match value {
                Value::Bool(b) => Bound::Bool(*b),
                Value::Number(n) => Bound::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
                Value::String(s) => match s.trim() {
                    "true" | "1" => Bound::Bool(true),
                    "false" | "0" => Bound::Bool(false),
                    _ => return Err(invalid("expected a boolean")),
                },
                _ => return Err(invalid("expected a boolean")),
            },
            None => match value {
                Value::Bool(b) => Bound::Bool(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => Bound::Int(i),
                    None => Bound::Real(n.as_f64().ok_or_else(|| invalid("number out of range"))?),
                },
                Value::String(s) => Bound::Text(s.clone()),
                other => Bound::Text(other.to_string()),
            },
        };
        Ok(bound)
    }
}

/// A value read back from a driver, before typing.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Cell {
    Null,
    Int(i64),
    Real(f64),
    #[cfg_attr(not(feature = "postgres"), allow(dead_code))]
    Bool(bool),
    Text(String),
}

impl Cell {
    /// Converts a driver value to JSON according to the declared column type.
    pub(crate) fn decode(self, sql_type: SqlType) -> Value {
        match (self, sql_type) {
            (Cell::Null, _) => Value::Null,

            (Cell::Bool(b), _) => Value::Bool(b),
            (Cell::Int(i), SqlType::Boolean) => Value::Bool(i != 0),
            (Cell::Real(f), SqlType::Boolean) => Value::Bool(f != 0.0),
            (Cell::Text(s), SqlType::Boolean) => Value::Bool(matches!(s.trim(), "1" | "true")),

            (Cell::Text(s), SqlType::Json) => {
                serde_json::from_str(&s).unwrap_or(Value::String(s))
            }
            (Cell::Text(s), SqlType::Integer) => match s.trim().parse::<i64>() {
                Ok(i) => Value::from(i),
                Err(_) => Value::String(s),
            },
            (Cell::Text(s), SqlType::Real) => match s.trim().parse::<f64>() {
                Ok(f) => float_value(f),
                Err(_) => Value::String(s),
            },
            (Cell::Text(s), _) => Value::String(s),

            (Cell::Int(i), SqlType::Real) => float_value(i as f64),
            (Cell::Int(i), SqlType::Text | SqlType::Timestamp) => Value::String(i.to_string()),
            (Cell::Int(i), _) => Value::from(i),

            (Cell::Real(f), SqlType::Integer) => Value::from(f as i64),
            (Cell::Real(f), _) => float_value(f),
        }
    }
}

fn float_value(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
