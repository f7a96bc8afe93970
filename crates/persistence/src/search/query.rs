//! The generic query shape and its translation to an engine query body.

use serde_json::{Map, Value, json};

use crate::error::ValidationError;
use crate::types::{SortKey, parse_sort};

/// Page size used when a search does not set one (the engine's default
/// result window).
pub const DEFAULT_SEARCH_SIZE: u64 = 10_000;

/// A `{kind: {field: value}}` query over index documents.
///
/// Several fields in one query are combined with AND. Array values in a
/// `Term` query mean "any of".
#[derive(Debug, Clone, PartialEq)]
pub enum TermQuery {
    Match(Map<String, Value>),
    Term(Map<String, Value>),
    Wildcard(Map<String, Value>),
    Terms(Map<String, Value>),
}

impl TermQuery {
    /// The engine query kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TermQuery::Match(_) => "match",
            TermQuery::Term(_) => "term",
            TermQuery::Wildcard(_) => "wildcard",
            TermQuery::Terms(_) => "terms",
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        match self {
            TermQuery::Match(fields)
            | TermQuery::Term(fields)
            | TermQuery::Wildcard(fields)
            | TermQuery::Terms(fields) => fields,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    fn clause(&self, field: &str, value: &Value) -> Value {
        match (self, value) {
            (TermQuery::Terms(_), Value::Array(_))
            | (TermQuery::Term(_) | TermQuery::Match(_), Value::Array(_)) => {
                json!({ "terms": { field: value } })
            }
            (TermQuery::Terms(_), single) => json!({ "terms": { field: [single] } }),
            (TermQuery::Wildcard(_), Value::String(pattern)) => {
                json!({ "wildcard": { field: { "value": pattern } } })
            }
            (query, single) => json!({ query.kind(): { field: single } }),
        }
    }

    /// The query clause of a search body.
    pub fn to_query(&self) -> Value {
        let mut clauses: Vec<Value> = self
            .fields()
            .iter()
            .map(|(field, value)| self.clause(field, value))
            .collect();

        match clauses.len() {
            0 => json!({ "match_all": {} }),
            1 => clauses.remove(0),
            _ => json!({ "bool": { "filter": clauses } }),
        }
    }
}

/// Sort, offset and page size for an index search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// `"field1 order1, field2 order2"`; an omitted order is descending.
    pub sort: Option<String>,
    pub from: Option<u64>,
    pub size: Option<u64>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, spec: &str) -> Self {
        self.sort = Some(spec.to_string());
        self
    }

    pub fn from(mut self, from: u64) -> Self {
        self.from = Some(from);
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn sort_keys(&self) -> Result<Vec<SortKey>, ValidationError> {
        match &self.sort {
            Some(spec) => parse_sort(spec),
            None => Ok(Vec::new()),
        }
    }

    pub fn has_sort(&self) -> bool {
        self.sort.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// Builds the full `_search` request body.
pub fn search_body(query: &TermQuery, options: &SearchOptions) -> Result<Value, ValidationError> {
    let mut body = json!({
        "query": query.to_query(),
        "from": options.from.unwrap_or(0),
        "size": options.size.unwrap_or(DEFAULT_SEARCH_SIZE),
    });

    let sort: Vec<Value> = options
        .sort_keys()?
        .into_iter()
        .map(|key| json!({ key.name: { "order": key.order.as_str() } }))
        .collect();
    if !sort.is_empty() {
        body["sort"] = Value::Array(sort);
    }

    Ok(body)
}

/// Body of a delete-by-query over document ids.
#[cfg(feature = "elasticsearch")]
pub(crate) fn ids_query(ids: &[String]) -> Value {
    json!({ "query": { "terms": { "_id": ids } } })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_empty_query_matches_all() {
        let query = TermQuery::Term(Map::new());
        assert_eq!(query.to_query(), json!({"match_all": {}}));
    }

    #[test]
    fn test_single_term() {
        let query = TermQuery::Term(fields(json!({"name": "user1"})));
        assert_eq!(query.to_query(), json!({"term": {"name": "user1"}}));
    }

    #[test]
    fn test_multiple_fields_are_filtered_together() {
        let query = TermQuery::Term(fields(json!({"name": "user1", "sex": "male"})));
        assert_eq!(
            query.to_query(),
            json!({"bool": {"filter": [
                {"term": {"name": "user1"}},
                {"term": {"sex": "male"}}
            ]}})
        );
    }

    #[test]
    fn test_array_values_become_terms() {
        let query = TermQuery::Term(fields(json!({"uuid": ["a", "b"]})));
        assert_eq!(query.to_query(), json!({"terms": {"uuid": ["a", "b"]}}));

        let query = TermQuery::Terms(fields(json!({"uuid": "a"})));
        assert_eq!(query.to_query(), json!({"terms": {"uuid": ["a"]}}));
    }

    #[test]
    fn test_wildcard() {
        let query = TermQuery::Wildcard(fields(json!({"name": "user*"})));
        assert_eq!(
            query.to_query(),
            json!({"wildcard": {"name": {"value": "user*"}}})
        );
    }

    #[test]
    fn test_search_body_sort_defaults_to_desc() {
        let query = TermQuery::Match(fields(json!({"city": "x"})));
        let options = SearchOptions::new().sort("age, name asc").from(5).size(20);
        let body = search_body(&query, &options).unwrap();

        assert_eq!(body["from"], json!(5));
        assert_eq!(body["size"], json!(20));
        assert_eq!(
            body["sort"],
            json!([{"age": {"order": "desc"}}, {"name": {"order": "asc"}}])
        );
    }

    #[test]
    fn test_search_body_defaults() {
        let body = search_body(&TermQuery::Term(Map::new()), &SearchOptions::new()).unwrap();
        assert_eq!(body["from"], json!(0));
        assert_eq!(body["size"], json!(DEFAULT_SEARCH_SIZE));
        assert!(body.get("sort").is_none());
    }

    #[test]
    fn test_invalid_sort_is_rejected() {
        let options = SearchOptions::new().sort("age sideways");
        assert!(search_body(&TermQuery::Term(Map::new()), &options).is_err());
    }
}
