//! The entity contract.
//!
//! Every persisted type implements [`Entity`]: a fixed table name, an explicit
//! column declaration, and access to the standard [`Model`] columns that carry
//! the row id, the external identifier, and timestamps. Entities move through
//! the layer as serde JSON objects keyed by field name; [`SchemaMap`] rewrites
//! them to column-keyed rows and back.
//!
//! # Example
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use tessera_persistence::entity::{Column, Entity, Model};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! struct User {
//!     #[serde(flatten)]
//!     model: Model,
//!     name: String,
//!     sex: String,
//!     #[serde(rename = "homeNation")]
//!     nation: String,
//! }
//!
//! impl Entity for User {
//!     fn table_name() -> &'static str {
//!         "users"
//!     }
//!
//!     fn columns() -> Vec<Column> {
//!         vec![
//!             Column::text("name").unique("unique_name_sex"),
//!             Column::text("sex").unique("unique_name_sex"),
//!             Column::text("nation").field("homeNation"),
//!         ]
//!     }
//!
//!     fn model(&self) -> &Model {
//!         &self.model
//!     }
//!
//!     fn model_mut(&mut self) -> &mut Model {
//!         &mut self.model
//!     }
//! }
//! ```

mod schema;

pub use schema::SchemaMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Column name of the auto-increment primary key.
pub const ID_COLUMN: &str = "id";
/// Column name of the external identifier.
pub const UUID_COLUMN: &str = "uuid";
/// Column name of the creation timestamp.
pub const CREATED_AT_COLUMN: &str = "created_at";
/// Column name of the last-modification timestamp.
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Standard columns embedded (flattened) into every entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Auto-increment row id assigned by the relational store.
    #[serde(default)]
    pub id: i64,
    /// External identifier; joins the relational row and its index document.
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    /// The column declarations for the standard columns.
    pub fn columns() -> Vec<Column> {
        vec![
            Column {
                primary_key: true,
                not_null: true,
                ..Column::integer(ID_COLUMN)
            },
            Column::text(UUID_COLUMN).not_null().unique(UUID_COLUMN),
            Column::timestamp(CREATED_AT_COLUMN),
            Column::timestamp(UPDATED_AT_COLUMN),
        ]
    }

    /// Assigns an external identifier if none is set. Returns true if one was
    /// generated.
    pub fn ensure_uuid(&mut self) -> bool {
        if self.uuid.is_empty() {
            self.uuid = uuid::Uuid::new_v4().to_string();
            true
        } else {
            false
        }
    }

    /// Stamps creation and modification times.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        self.updated_at = Some(now);
    }
}

/// A persisted record type.
pub trait Entity: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {
    /// The table (and index-name suffix) for this type.
    fn table_name() -> &'static str;

    /// Declared columns, excluding the standard [`Model`] columns.
    fn columns() -> Vec<Column>;

    fn model(&self) -> &Model;

    fn model_mut(&mut self) -> &mut Model;

    /// The external identifier used as the index document id.
    fn primary_id(&self) -> &str {
        &self.model().uuid
    }
}

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Text,
    Integer,
    Real,
    Boolean,
    /// RFC 3339 text on every engine.
    Timestamp,
    /// Arbitrary JSON stored as text.
    Json,
}

/// A column declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Storage column name.
    pub name: String,
    /// Serialized field name on the entity.
    pub field: String,
    pub sql_type: SqlType,
    /// Unique index group this column belongs to.
    pub unique: Option<String>,
    pub not_null: bool,
    pub primary_key: bool,
}

impl Column {
    fn new(name: &str, sql_type: SqlType) -> Self {
        Self {
            name: name.to_string(),
            field: name.to_string(),
            sql_type,
            unique: None,
            not_null: false,
            primary_key: false,
        }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, SqlType::Text)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, SqlType::Integer)
    }

    pub fn real(name: &str) -> Self {
        Self::new(name, SqlType::Real)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, SqlType::Boolean)
    }

    pub fn timestamp(name: &str) -> Self {
        Self::new(name, SqlType::Timestamp)
    }

    pub fn json(name: &str) -> Self {
        Self::new(name, SqlType::Json)
    }

    /// Overrides the serialized field name (defaults to the column name).
    pub fn field(mut self, field: &str) -> Self {
        self.field = field.to_string();
        self
    }

    /// Adds the column to a named unique index group.
    pub fn unique(mut self, group: &str) -> Self {
        self.unique = Some(group.to_string());
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_builder() {
        let col = Column::text("nation").field("homeNation").unique("g").not_null();
        assert_eq!(col.name, "nation");
        assert_eq!(col.field, "homeNation");
        assert_eq!(col.unique.as_deref(), Some("g"));
        assert!(col.not_null);
        assert!(!col.primary_key);
    }

    #[test]
    fn test_model_columns() {
        let cols = Model::columns();
        assert!(cols[0].primary_key);
        assert_eq!(cols[1].unique.as_deref(), Some(UUID_COLUMN));
        assert_eq!(cols.len(), 4);
    }

    #[test]
    fn test_ensure_uuid_is_stable() {
        let mut model = Model::default();
        assert!(model.ensure_uuid());
        let first = model.uuid.clone();
        assert!(!model.ensure_uuid());
        assert_eq!(model.uuid, first);
    }

    #[test]
    fn test_touch_keeps_created_at() {
        let mut model = Model::default();
        let t1 = Utc::now();
        model.touch(t1);
        let t2 = t1 + chrono::Duration::seconds(5);
        model.touch(t2);
        assert_eq!(model.created_at, Some(t1));
        assert_eq!(model.updated_at, Some(t2));
    }
}
