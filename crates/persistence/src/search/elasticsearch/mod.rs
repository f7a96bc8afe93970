//! Elasticsearch clients.
//!
//! Indices are created on first write with a dynamic template that maps every
//! string field as a `keyword`, so term filters and sorts operate on whole
//! values the same way the relational path compares columns.
//!
//! [`ElasticV8`] uses the official client; [`ElasticV7`] talks to the REST API
//! of 7.x clusters directly.

mod v7;
mod v8;

pub use v7::ElasticV7;
pub use v8::ElasticV8;

use std::collections::HashSet;
use std::fmt::Display;

use parking_lot::Mutex;
use serde_json::{Map, Value, json};

use crate::error::{IndexError, StorageError, StorageResult};

/// Settings and mappings for a newly created index.
pub(crate) fn index_definition() -> Value {
    json!({
        "settings": {
            "index.max_result_window": super::DEFAULT_SEARCH_SIZE
        },
        "mappings": {
            "dynamic_templates": [
                {
                    "strings_as_keywords": {
                        "match_mapping_type": "string",
                        "mapping": { "type": "keyword" }
                    }
                }
            ]
        }
    })
}

/// Names of indices already known to exist.
#[derive(Debug, Default)]
pub(crate) struct KnownIndices(Mutex<HashSet<String>>);

impl KnownIndices {
    pub(crate) fn contains(&self, index: &str) -> bool {
        self.0.lock().contains(index)
    }

    pub(crate) fn insert(&self, index: &str) {
        self.0.lock().insert(index.to_string());
    }

    pub(crate) fn remove(&self, index: &str) {
        self.0.lock().remove(index);
    }
}

pub(crate) fn transport_error(index: &str, err: impl Display) -> StorageError {
    StorageError::Index(IndexError::Transport {
        index: index.to_string(),
        message: err.to_string(),
    })
}

pub(crate) fn status_error(index: &str, status: u16, body: String) -> StorageError {
    StorageError::Index(IndexError::Status {
        index: index.to_string(),
        status,
        body,
    })
}

pub(crate) fn is_index_not_found(body: &str) -> bool {
    body.contains("index_not_found_exception")
}

pub(crate) fn is_already_exists(body: &str) -> bool {
    body.contains("resource_already_exists_exception")
}

/// Interprets a failed search response.
///
/// A missing index is an empty result. A rejected request that carried a sort
/// is also an empty result, since the engine refuses to sort on unmapped or
/// non-keyword fields.
pub(crate) fn failed_search(
    index: &str,
    status: u16,
    body: String,
    has_sort: bool,
) -> StorageResult<Vec<Map<String, Value>>> {
    if is_index_not_found(&body) {
        tracing::debug!(index = %index, "Search on missing index");
        return Ok(Vec::new());
    }
    if has_sort && status == 400 {
        tracing::warn!(index = %index, body = %body, "Search rejected with a sort, returning no hits");
        return Ok(Vec::new());
    }
    Err(status_error(index, status, body))
}

/// Extracts `hits.hits[]._source` from a search response.
pub(crate) fn parse_hits(index: &str, body: &Value) -> StorageResult<Vec<Map<String, Value>>> {
    let malformed = |message: &str| {
        StorageError::Index(IndexError::MalformedResponse {
            index: index.to_string(),
            message: message.to_string(),
        })
    };

    let hits = body
        .get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(|h| h.as_array())
        .ok_or_else(|| malformed("missing hits.hits"))?;

    hits.iter()
        .map(|hit| match hit.get("_source") {
            Some(Value::Object(source)) => Ok(source.clone()),
            _ => Err(malformed("hit without an object _source")),
        })
        .collect()
}
