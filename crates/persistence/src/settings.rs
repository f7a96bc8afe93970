//! Hierarchical configuration source.
//!
//! [`Settings`] wraps a JSON tree loaded from JSON or TOML text and offers
//! typed getters with defaults plus dotted-path sub-tree extraction. The
//! registry reads store and index configuration through it:
//!
//! ```toml
//! [database.db1]
//! type = "sqlite"
//! filepath = "/var/lib/app/db1.sqlite"
//! automigrate = true
//! cqrs = { type = "elastic", name = "search" }
//!
//! [search]
//! version = "8"
//! addresses = ["http://localhost:9200"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ConfigError;

/// A configuration tree with typed, defaulted lookups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    root: Value,
}

impl Settings {
    /// Wraps an existing JSON tree.
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    /// Parses JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text)
            .map(Self::new)
            .map_err(|e| ConfigError::InvalidSettings {
                message: format!("invalid JSON: {}", e),
            })
    }

    /// Parses TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str::<Value>(text)
            .map(Self::new)
            .map_err(|e| ConfigError::InvalidSettings {
                message: format!("invalid TOML: {}", e),
            })
    }

    /// Loads a file, choosing the format from its extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidSettings {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&text),
            Some("json") => Self::from_json_str(&text),
            other => Err(ConfigError::InvalidSettings {
                message: format!(
                    "unsupported settings format '{}' for {}",
                    other.unwrap_or(""),
                    path.display()
                ),
            }),
        }
    }

    /// Returns the underlying tree.
    pub fn root(&self) -> &Value {
        &self.root
    }

    fn lookup(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(&self.root);
        }
        path.split('.')
            .try_fold(&self.root, |node, segment| node.as_object()?.get(segment))
    }

    /// Returns true if a non-null value exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.lookup(path).is_some_and(|v| !v.is_null())
    }

    /// Reads a string; numbers and booleans are rendered as text.
    pub fn get_string(&self, path: &str, default: &str) -> String {
        match self.lookup(path) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => default.to_string(),
        }
    }

    /// Reads an integer; numeric strings are accepted.
    pub fn get_int(&self, path: &str, default: i64) -> i64 {
        match self.lookup(path) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Reads a boolean; `"true"`/`"false"` strings are accepted.
    pub fn get_bool(&self, path: &str, default: bool) -> bool {
        match self.lookup(path) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => true,
                "false" | "no" | "off" | "0" => false,
                _ => default,
            },
            _ => default,
        }
    }

    /// Reads a float; numeric strings are accepted.
    pub fn get_float(&self, path: &str, default: f64) -> f64 {
        match self.lookup(path) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Reads an array of strings. A single string is treated as a
    /// one-element array.
    pub fn get_string_array(&self, path: &str, default: &[&str]) -> Vec<String> {
        match self.lookup(path) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    Value::Bool(b) => Some(b.to_string()),
                    _ => None,
                })
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => default.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Extracts the sub-tree at `path`.
    pub fn sub(&self, path: &str) -> Option<Settings> {
        self.lookup(path)
            .filter(|v| v.is_object())
            .map(|v| Settings::new(v.clone()))
    }

    /// Extracts every child table under `path`, keyed by child name.
    pub fn sub_map(&self, path: &str) -> BTreeMap<String, Settings> {
        self.lookup(path)
            .and_then(Value::as_object)
            .map(|children| {
                children
                    .iter()
                    .filter(|(_, v)| v.is_object())
                    .map(|(k, v)| (k.clone(), Settings::new(v.clone())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Lists the child keys under `path`.
    pub fn keys(&self, path: &str) -> Vec<String> {
        self.lookup(path)
            .and_then(Value::as_object)
            .map(|children| children.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Deserializes the sub-tree at `path` into a typed configuration struct.
    pub fn deserialize<T: DeserializeOwned>(&self, path: &str) -> Result<T, ConfigError> {
        let value = self
            .lookup(path)
            .cloned()
            .ok_or_else(|| ConfigError::InvalidSettings {
                message: format!("missing settings key '{}'", path),
            })?;
        serde_json::from_value(value).map_err(|e| ConfigError::InvalidSettings {
            message: format!("invalid settings at '{}': {}", path, e),
        })
    }
}

impl From<Value> for Settings {
    fn from(root: Value) -> Self {
        Self::new(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn sample() -> Settings {
        Settings::new(json!({
            "database": {
                "db1": { "type": "sqlite", "filepath": "/tmp/db1.sqlite", "retry": "2" },
                "db2": { "type": "memory", "automigrate": true }
            },
            "search": {
                "version": 8,
                "addresses": ["http://es1:9200", "http://es2:9200"],
                "ratio": 0.5,
                "refresh": "true"
            }
        }))
    }

    #[test]
    fn test_typed_getters() {
        let settings = sample();
        assert_eq!(settings.get_string("database.db1.type", "x"), "sqlite");
        assert_eq!(settings.get_string("search.version", "7"), "8");
        assert_eq!(settings.get_int("database.db1.retry", 0), 2);
        assert!(settings.get_bool("database.db2.automigrate", false));
        assert!(settings.get_bool("search.refresh", false));
        assert_eq!(settings.get_float("search.ratio", 1.0), 0.5);
        assert_eq!(
            settings.get_string_array("search.addresses", &[]),
            vec!["http://es1:9200", "http://es2:9200"]
        );
    }

    #[test]
    fn test_defaults_for_missing_keys() {
        let settings = sample();
        assert_eq!(settings.get_string("database.db3.type", "mysql"), "mysql");
        assert_eq!(settings.get_int("nope", 7), 7);
        assert!(!settings.get_bool("database.db1.automigrate", false));
        assert_eq!(settings.get_string_array("nope", &["a"]), vec!["a"]);
        assert!(!settings.contains("database.db1.host"));
        assert!(settings.contains("database.db1"));
    }

    #[test]
    fn test_sub_and_sub_map() {
        let settings = sample();
        let stores = settings.sub_map("database");
        assert_eq!(stores.keys().collect::<Vec<_>>(), vec!["db1", "db2"]);
        assert_eq!(stores["db2"].get_string("type", ""), "memory");

        let search = settings.sub("search").unwrap();
        assert_eq!(search.get_int("version", 0), 8);
        assert!(settings.sub("search.version").is_none());
    }

    #[test]
    fn test_toml_and_deserialize() {
        #[derive(Debug, Deserialize)]
        struct Store {
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            automigrate: bool,
        }

        let settings = Settings::from_toml_str(
            r#"
            [database.main]
            type = "postgres"
            automigrate = true
            "#,
        )
        .unwrap();

        let store: Store = settings.deserialize("database.main").unwrap();
        assert_eq!(store.kind, "postgres");
        assert!(store.automigrate);
        assert!(settings.deserialize::<Store>("database.other").is_err());
    }

    #[test]
    fn test_invalid_text_is_config_error() {
        assert!(matches!(
            Settings::from_json_str("{"),
            Err(ConfigError::InvalidSettings { .. })
        ));
        assert!(matches!(
            Settings::from_toml_str("a = "),
            Err(ConfigError::InvalidSettings { .. })
        ));
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.json");
        std::fs::write(&path, r#"{"database": {"db1": {"type": "memory"}}}"#).unwrap();
        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.keys("database"), vec!["db1"]);

        let bad = dir.path().join("app.ini");
        std::fs::write(&bad, "x=1").unwrap();
        assert!(Settings::from_file(&bad).is_err());
    }
}
