//! Column/field translation tables for an entity type.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use crate::core::Row;
use crate::error::{ConfigError, StorageResult, ValidationError};

use super::{Column, Entity, Model};

/// The immutable schema of one entity type.
///
/// Built once per accessor. Holds the declared columns (standard [`Model`]
/// columns first) and both directions of the column/field name mapping.
#[derive(Debug, Clone)]
pub struct SchemaMap {
    table: String,
    columns: Vec<Column>,
    column_to_field: HashMap<String, String>,
    field_to_column: HashMap<String, String>,
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

impl SchemaMap {
    /// Builds the schema for `E`, rejecting malformed declarations.
    pub fn build<E: Entity>() -> Result<Self, ConfigError> {
        let table = E::table_name().to_string();
        let invalid = |message: String| ConfigError::InvalidEntity {
            table: table.clone(),
            message,
        };

        if !is_identifier(&table) {
            return Err(invalid("table name is not a valid identifier".to_string()));
        }

        let zero = serde_json::to_value(E::default())
            .map_err(|e| invalid(format!("zero value does not serialize: {}", e)))?;
        let Value::Object(zero) = zero else {
            return Err(invalid("entity must serialize to a JSON object".to_string()));
        };

        let mut columns = Model::columns();
        columns.extend(E::columns());

        let mut column_to_field = HashMap::with_capacity(columns.len());
        let mut field_to_column = HashMap::with_capacity(columns.len());

        for column in &columns {
            if !is_identifier(&column.name) {
                return Err(invalid(format!(
                    "column '{}' is not a valid identifier",
                    column.name
                )));
            }
            if column.field.is_empty() {
                return Err(invalid(format!("column '{}' has an empty field name", column.name)));
            }
            if let Some(group) = &column.unique {
                if !is_identifier(group) {
                    return Err(invalid(format!("unique group '{}' is not a valid identifier", group)));
                }
            }
            if !zero.contains_key(&column.field) {
                return Err(invalid(format!(
                    "field '{}' of column '{}' is absent from the serialized entity",
                    column.field, column.name
                )));
            }
            if column_to_field
                .insert(column.name.clone(), column.field.clone())
                .is_some()
            {
                return Err(invalid(format!("duplicate column '{}'", column.name)));
            }
            if field_to_column
                .insert(column.field.clone(), column.name.clone())
                .is_some()
            {
                return Err(invalid(format!("duplicate field '{}'", column.field)));
            }
        }

        Ok(Self {
            table,
            columns,
            column_to_field,
            field_to_column,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Looks up a column, failing with a validation error if it is unknown.
    pub fn require_column(&self, name: &str) -> Result<&Column, ValidationError> {
        self.column(name).ok_or_else(|| ValidationError::UnknownColumn {
            table: self.table.clone(),
            column: name.to_string(),
        })
    }

    pub fn field_for(&self, column: &str) -> Option<&str> {
        self.column_to_field.get(column).map(String::as_str)
    }

    pub fn column_for(&self, field: &str) -> Option<&str> {
        self.field_to_column.get(field).map(String::as_str)
    }

    pub fn column_to_field(&self) -> &HashMap<String, String> {
        &self.column_to_field
    }

    pub fn field_to_column(&self) -> &HashMap<String, String> {
        &self.field_to_column
    }

    /// Unique index groups, each listing its columns in declaration order.
    pub fn unique_groups(&self) -> BTreeMap<String, Vec<String>> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for column in &self.columns {
            if let Some(group) = &column.unique {
                groups
                    .entry(group.clone())
                    .or_default()
                    .push(column.name.clone());
            }
        }
        groups
    }

    /// Projects a field-keyed document onto declared columns.
    pub fn to_row(&self, document: &Map<String, Value>) -> Row {
        self.columns
            .iter()
            .filter_map(|column| {
                document
                    .get(&column.field)
                    .map(|value| (column.name.clone(), value.clone()))
            })
            .collect()
    }

    /// Renames a column-keyed row to entity field names. Unknown columns are
    /// dropped.
    pub fn to_document(&self, row: &Row) -> Map<String, Value> {
        row.iter()
            .filter_map(|(column, value)| {
                self.field_for(column)
                    .map(|field| (field.to_string(), value.clone()))
            })
            .collect()
    }

    /// Serializes an entity into a column-keyed row.
    pub fn encode<E: Entity>(&self, entity: &E) -> StorageResult<Row> {
        match serde_json::to_value(entity)? {
            Value::Object(document) => Ok(self.to_row(&document)),
            _ => Err(ConfigError::InvalidEntity {
                table: self.table.clone(),
                message: "entity must serialize to a JSON object".to_string(),
            }
            .into()),
        }
    }

    /// Deserializes a column-keyed row into an entity.
    pub fn decode<E: Entity>(&self, row: &Row) -> StorageResult<E> {
        Ok(serde_json::from_value(Value::Object(self.to_document(row)))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::SqlType;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Person {
        #[serde(flatten)]
        model: Model,
        name: String,
        #[serde(rename = "homeNation")]
        nation: String,
        age: i64,
    }

    impl Entity for Person {
        fn table_name() -> &'static str {
            "people"
        }

        fn columns() -> Vec<Column> {
            vec![
                Column::text("name").unique("unique_name"),
                Column::text("nation").field("homeNation"),
                Column::integer("age"),
            ]
        }

        fn model(&self) -> &Model {
            &self.model
        }

        fn model_mut(&mut self) -> &mut Model {
            &mut self.model
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Broken {
        #[serde(flatten)]
        model: Model,
        name: String,
    }

    impl Entity for Broken {
        fn table_name() -> &'static str {
            "broken"
        }

        fn columns() -> Vec<Column> {
            vec![Column::text("name"), Column::text("missing")]
        }

        fn model(&self) -> &Model {
            &self.model
        }

        fn model_mut(&mut self) -> &mut Model {
            &mut self.model
        }
    }

    #[test]
    fn test_build_maps_both_directions() {
        let schema = SchemaMap::build::<Person>().unwrap();
        assert_eq!(schema.table(), "people");
        assert_eq!(schema.field_for("nation"), Some("homeNation"));
        assert_eq!(schema.column_for("homeNation"), Some("nation"));
        assert_eq!(schema.field_for("uuid"), Some("uuid"));
        assert_eq!(schema.column_to_field().len(), schema.field_to_column().len());
        assert_eq!(schema.column("age").map(|c| c.sql_type), Some(SqlType::Integer));
    }

    #[test]
    fn test_missing_field_is_config_error() {
        let err = SchemaMap::build::<Broken>().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEntity { .. }));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_unique_groups() {
        let schema = SchemaMap::build::<Person>().unwrap();
        let groups = schema.unique_groups();
        assert_eq!(groups["unique_name"], vec!["name"]);
        assert_eq!(groups["uuid"], vec!["uuid"]);
    }

    #[test]
    fn test_encode_decode_renames_fields() {
        let schema = SchemaMap::build::<Person>().unwrap();
        let person = Person {
            name: "ann".to_string(),
            nation: "peru".to_string(),
            age: 30,
            ..Default::default()
        };

        let row = schema.encode(&person).unwrap();
        assert_eq!(row.get("nation"), Some(&json!("peru")));
        assert!(row.get("homeNation").is_none());

        let back: Person = schema.decode(&row).unwrap();
        assert_eq!(back, person);
    }

    #[test]
    fn test_require_column() {
        let schema = SchemaMap::build::<Person>().unwrap();
        assert!(schema.require_column("age").is_ok());
        assert!(matches!(
            schema.require_column("homeNation"),
            Err(ValidationError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_identifier("created_at"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("name; drop"));
        assert!(!is_identifier(""));
    }
}
