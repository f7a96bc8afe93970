//! Column-keyed filters, raw conditions and partial updates.

use std::collections::BTreeMap;

use serde_json::Value;

/// A conjunction of column equality tests.
///
/// An array value means "any of" and translates to `IN (...)` on the
/// relational path and a `terms` clause on the index path. A null value means
/// `IS NULL`. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter(BTreeMap<String, Value>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality test.
    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.0.insert(column.to_string(), value.into());
        self
    }

    /// Adds a membership test.
    pub fn any_of<V: Into<Value>>(mut self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.0.insert(column.to_string(), Value::Array(values));
        self
    }

    pub fn insert(&mut self, column: &str, value: impl Into<Value>) {
        self.0.insert(column.to_string(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Filter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A row selection for update and delete.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Column equality tests.
    Filter(Filter),
    /// A raw SQL predicate with `?` placeholders, rewritten per dialect.
    Raw { sql: String, args: Vec<Value> },
}

impl Condition {
    /// Builds a raw predicate such as `Condition::raw("name LIKE ?", [json!("user%")])`.
    pub fn raw<A: Into<Value>>(sql: &str, args: impl IntoIterator<Item = A>) -> Self {
        Condition::Raw {
            sql: sql.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Condition::Raw { .. })
    }

    /// True for a filter with no tests or a raw predicate with no text.
    pub fn is_empty(&self) -> bool {
        match self {
            Condition::Filter(filter) => filter.is_empty(),
            Condition::Raw { sql, .. } => sql.trim().is_empty(),
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Condition::Filter(Filter::default())
    }
}

impl From<Filter> for Condition {
    fn from(filter: Filter) -> Self {
        Condition::Filter(filter)
    }
}

impl From<&Filter> for Condition {
    fn from(filter: &Filter) -> Self {
        Condition::Filter(filter.clone())
    }
}

/// The columns an update sets, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch(BTreeMap<String, Value>);

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.0.insert(column.to_string(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Patch {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_builder() {
        let filter = Filter::new().eq("name", "user1").any_of("sex", ["male", "female"]);
        assert_eq!(filter.len(), 2);
        assert_eq!(filter.get("name"), Some(&json!("user1")));
        assert_eq!(filter.get("sex"), Some(&json!(["male", "female"])));
    }

    #[test]
    fn test_filter_from_iter() {
        let filter: Filter = [("a", 1), ("b", 2)].into_iter().collect();
        assert_eq!(filter.iter().count(), 2);
    }

    #[test]
    fn test_raw_condition() {
        let cond = Condition::raw("name LIKE ?", ["user%"]);
        assert!(cond.is_raw());
        assert_eq!(
            cond,
            Condition::Raw {
                sql: "name LIKE ?".to_string(),
                args: vec![json!("user%")],
            }
        );
        assert!(!Condition::from(Filter::new()).is_raw());
    }

    #[test]
    fn test_patch() {
        let patch = Patch::new().set("nation", "japan");
        assert!(patch.contains("nation"));
        assert!(!patch.is_empty());
    }
}
