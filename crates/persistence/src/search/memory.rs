//! In-process search index.
//!
//! Behaves like an engine whose string fields are mapped as keywords: `match`
//! and `term` compare whole values, `wildcard` supports `*` and `?`, and a
//! sort on a field that no document carries yields an empty page instead of
//! an error.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::{Map, Value};

use super::query::{DEFAULT_SEARCH_SIZE, SearchOptions, TermQuery};
use super::SearchIndex;
use crate::error::{IndexError, StorageResult};
use crate::types::{SortKey, SortOrder};

type Document = Map<String, Value>;

/// A search index held in process memory.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    indices: RwLock<HashMap<String, BTreeMap<String, Document>>>,
    unavailable: AtomicBool,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent request fail as if the engine were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.indices.read().get(index).map_or(0, BTreeMap::len)
    }

    pub fn document(&self, index: &str, id: &str) -> Option<Document> {
        self.indices
            .read()
            .get(index)
            .and_then(|docs| docs.get(id).cloned())
    }

    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indices.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn check_available(&self) -> Result<(), IndexError> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(IndexError::Unavailable {
                message: "memory index is marked unavailable".to_string(),
            });
        }
        Ok(())
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn values_equal(doc_value: &Value, wanted: &Value) -> bool {
    if doc_value == wanted {
        return true;
    }
    match (doc_value, wanted) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Array(items), _) => items.iter().any(|item| values_equal(item, wanted)),
        _ => match (scalar_text(doc_value), scalar_text(wanted)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

fn any_of(doc_value: &Value, wanted: &Value) -> bool {
    match wanted {
        Value::Array(options) => options.iter().any(|w| values_equal(doc_value, w)),
        single => values_equal(doc_value, single),
    }
}

fn wildcard_regex(pattern: &str) -> Option<Regex> {
    let mut expr = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).ok()
}

fn matches(query: &TermQuery, document: &Document) -> bool {
    query.fields().iter().all(|(field, wanted)| {
        let Some(doc_value) = document.get(field) else {
            return false;
        };
        match query {
            TermQuery::Match(_) | TermQuery::Term(_) | TermQuery::Terms(_) => {
                any_of(doc_value, wanted)
            }
            TermQuery::Wildcard(_) => {
                match (wanted.as_str().and_then(wildcard_regex), scalar_text(doc_value)) {
                    (Some(re), Some(text)) => re.is_match(&text),
                    _ => false,
                }
            }
        }
    })
}

fn is_sortable(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) | Value::Object(_) => 4,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Orders documents by `keys`; missing values sort last in either direction.
fn compare_documents(keys: &[SortKey], a: &Document, b: &Document) -> Ordering {
    for key in keys {
        let left = a.get(&key.name).filter(|v| !v.is_null());
        let right = b.get(&key.name).filter(|v| !v.is_null());
        let ordering = match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => match key.order {
                SortOrder::Asc => compare_values(x, y),
                SortOrder::Desc => compare_values(y, x),
            },
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    fn version(&self) -> &str {
        "memory"
    }

    async fn index(&self, index: &str, id: &str, document: &Value) -> StorageResult<()> {
        self.check_available()?;
        let Value::Object(document) = document else {
            return Err(IndexError::Status {
                index: index.to_string(),
                status: 400,
                body: "document must be a JSON object".to_string(),
            }
            .into());
        };
        self.indices
            .write()
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn update(&self, index: &str, id: &str, partial: &Map<String, Value>) -> StorageResult<()> {
        self.check_available()?;
        let mut indices = self.indices.write();
        let Some(existing) = indices.get_mut(index).and_then(|docs| docs.get_mut(id)) else {
            return Err(IndexError::Status {
                index: index.to_string(),
                status: 404,
                body: format!("document {} is missing", id),
            }
            .into());
        };
        for (field, value) in partial {
            existing.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        index: &str,
        query: &TermQuery,
        options: &SearchOptions,
    ) -> StorageResult<Vec<Document>> {
        self.check_available()?;
        let keys = options.sort_keys()?;

        let indices = self.indices.read();
        let Some(documents) = indices.get(index) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<&Document> = documents
            .values()
            .filter(|document| matches(query, document))
            .collect();

        for key in &keys {
            let mut present = documents.values().filter_map(|d| d.get(&key.name));
            let sortable = present.clone().all(is_sortable);
            if present.next().is_none() || !sortable {
                tracing::warn!(index = %index, field = %key.name, "Cannot sort on field, returning no hits");
                return Ok(Vec::new());
            }
        }
        if !keys.is_empty() {
            hits.sort_by(|a, b| compare_documents(&keys, a, b));
        }

        let from = usize::try_from(options.from.unwrap_or(0)).unwrap_or(usize::MAX);
        let size = usize::try_from(options.size.unwrap_or(DEFAULT_SEARCH_SIZE)).unwrap_or(usize::MAX);
        Ok(hits.into_iter().skip(from).take(size).cloned().collect())
    }

    async fn delete(&self, index: &str, ids: &[String]) {
        if let Err(e) = self.check_available() {
            tracing::error!(index = %index, error = %e, "Failed to delete documents");
            return;
        }
        if let Some(documents) = self.indices.write().get_mut(index) {
            for id in ids {
                documents.remove(id);
            }
        }
    }

    async fn delete_index(&self, indices: &[String]) {
        let mut all = self.indices.write();
        for index in indices {
            all.remove(index);
        }
    }
}
