//! Propagation of mutation outcomes into the search index.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use super::notifier::EventHandler;
use crate::error::StorageResult;
use crate::search::SearchIndex;

/// The outcome of one mutation against the relational store.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub table: String,
    /// Index namespace of the entity's documents.
    pub index: String,
    pub kind: ChangeKind,
    pub rows_affected: u64,
    /// Set when the relational operation failed. Accessors publish only
    /// successful mutations and leave this `None`; it is for applications
    /// publishing their own outcomes on a notifier, and [`IndexSync`] skips
    /// such events.
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ChangeKind {
    /// A full document to write under `id`.
    Upserted { id: String, document: Value },
    /// Field-keyed values to merge into each listed document.
    Patched {
        ids: Vec<String>,
        fields: Map<String, Value>,
    },
}

impl ChangeEvent {
    /// True when the mutation succeeded and changed at least one row.
    pub fn is_effective(&self) -> bool {
        self.error.is_none() && self.rows_affected > 0
    }
}

/// Writes mutated entities to the search index.
#[derive(Debug, Clone)]
pub struct IndexSync {
    index: Arc<dyn SearchIndex>,
}

impl IndexSync {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl EventHandler<ChangeEvent> for IndexSync {
    async fn handle(&self, event: &ChangeEvent) -> StorageResult<()> {
        if !event.is_effective() {
            debug!(table = %event.table, "Skipping ineffective mutation");
            return Ok(());
        }

        match &event.kind {
            ChangeKind::Upserted { id, document } => {
                self.index.index(&event.index, id, document).await?;
                debug!(index = %event.index, id = %id, "Indexed document");
            }
            ChangeKind::Patched { ids, fields } => {
                let mut first_error = None;
                for id in ids {
                    if let Err(e) = self.index.update(&event.index, id, fields).await {
                        first_error.get_or_insert(e);
                    }
                }
                if let Some(e) = first_error {
                    return Err(e);
                }
                debug!(index = %event.index, count = ids.len(), "Patched documents");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::MemoryIndex;
    use serde_json::json;

    fn upserted(id: &str, rows_affected: u64, error: Option<&str>) -> ChangeEvent {
        ChangeEvent {
            table: "people".to_string(),
            index: "db_people".to_string(),
            kind: ChangeKind::Upserted {
                id: id.to_string(),
                document: json!({"uuid": id, "name": "ann"}),
            },
            rows_affected,
            error: error.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_upserted_is_indexed() {
        let index = Arc::new(MemoryIndex::new());
        let sync = IndexSync::new(index.clone());
        sync.handle(&upserted("a", 1, None)).await.unwrap();
        assert_eq!(index.document("db_people", "a").unwrap()["name"], json!("ann"));
    }

    #[tokio::test]
    async fn test_failed_or_noop_mutations_are_skipped() {
        let index = Arc::new(MemoryIndex::new());
        let sync = IndexSync::new(index.clone());
        sync.handle(&upserted("a", 0, None)).await.unwrap();
        sync.handle(&upserted("b", 1, Some("constraint violation"))).await.unwrap();
        assert_eq!(index.document_count("db_people"), 0);
    }

    #[tokio::test]
    async fn test_patched_merges_fields() {
        let index = Arc::new(MemoryIndex::new());
        let sync = IndexSync::new(index.clone());
        sync.handle(&upserted("a", 1, None)).await.unwrap();

        let mut fields = Map::new();
        fields.insert("name".to_string(), json!("bob"));
        let patch = ChangeEvent {
            table: "people".to_string(),
            index: "db_people".to_string(),
            kind: ChangeKind::Patched {
                ids: vec!["a".to_string(), "missing".to_string()],
                fields,
            },
            rows_affected: 1,
            error: None,
        };

        assert!(sync.handle(&patch).await.is_err());
        let doc = index.document("db_people", "a").unwrap();
        assert_eq!(doc["name"], json!("bob"));
        assert_eq!(doc["uuid"], json!("a"));
    }
}
