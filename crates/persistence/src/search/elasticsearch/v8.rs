//! Elasticsearch 8.x client built on the official crate.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use elasticsearch::auth::Credentials;
use elasticsearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use elasticsearch::indices::{IndicesCreateParts, IndicesDeleteParts, IndicesExistsParts};
use elasticsearch::params::Refresh;
use elasticsearch::{DeleteByQueryParts, Elasticsearch, IndexParts, SearchParts, UpdateParts};
use serde_json::{Map, Value, json};

use super::{
    KnownIndices, failed_search, index_definition, is_already_exists, is_index_not_found,
    parse_hits, status_error, transport_error,
};
use crate::error::{BackendError, StorageError, StorageResult};
use crate::search::query::{ids_query, search_body};
use crate::search::{IndexConfig, SearchIndex, SearchOptions, TermQuery};

/// Client for Elasticsearch 8.x clusters.
pub struct ElasticV8 {
    client: Elasticsearch,
    config: IndexConfig,
    known: KnownIndices,
}

impl Debug for ElasticV8 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticV8")
            .field("address", &self.config.first_address())
            .field("refresh", &self.config.refresh)
            .finish_non_exhaustive()
    }
}

impl ElasticV8 {
    pub fn new(config: &IndexConfig) -> StorageResult<Self> {
        let url: elasticsearch::http::Url = config.first_address().parse().map_err(|e| {
            StorageError::Backend(BackendError::ConnectionFailed {
                backend_name: "elasticsearch".to_string(),
                message: format!("Invalid URL: {}", e),
            })
        })?;

        let mut builder = TransportBuilder::new(SingleNodeConnectionPool::new(url))
            .timeout(Duration::from_millis(config.request_timeout_ms));
        if let Some(username) = &config.username {
            builder = builder.auth(Credentials::Basic(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            ));
        }

        let transport = builder.build().map_err(|e| {
            StorageError::Backend(BackendError::ConnectionFailed {
                backend_name: "elasticsearch".to_string(),
                message: format!("Failed to build transport: {}", e),
            })
        })?;

        Ok(Self {
            client: Elasticsearch::new(transport),
            config: config.clone(),
            known: KnownIndices::default(),
        })
    }

    fn refresh(&self) -> Refresh {
        if self.config.refresh {
            Refresh::True
        } else {
            Refresh::False
        }
    }

    async fn ensure_index(&self, index: &str) -> StorageResult<()> {
        if self.known.contains(index) {
            return Ok(());
        }

        let exists = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| transport_error(index, e))?;

        if !exists.status_code().is_success() {
            let response = self
                .client
                .indices()
                .create(IndicesCreateParts::Index(index))
                .body(index_definition())
                .send()
                .await
                .map_err(|e| transport_error(index, e))?;

            let status = response.status_code();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                if !is_already_exists(&body) {
                    return Err(status_error(index, status.as_u16(), body));
                }
            } else {
                tracing::info!(index = %index, "Created search index");
            }
        }

        self.known.insert(index);
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for ElasticV8 {
    fn version(&self) -> &str {
        "8"
    }

    async fn index(&self, index: &str, id: &str, document: &Value) -> StorageResult<()> {
        self.ensure_index(index).await?;

        let response = self
            .client
            .index(IndexParts::IndexId(index, id))
            .refresh(self.refresh())
            .body(document)
            .send()
            .await
            .map_err(|e| transport_error(index, e))?;

        let status = response.status_code();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(index, status.as_u16(), body));
        }
        Ok(())
    }

    async fn update(&self, index: &str, id: &str, partial: &Map<String, Value>) -> StorageResult<()> {
        let response = self
            .client
            .update(UpdateParts::IndexId(index, id))
            .refresh(self.refresh())
            .body(json!({ "doc": partial }))
            .send()
            .await
            .map_err(|e| transport_error(index, e))?;

        let status = response.status_code();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(index, status.as_u16(), body));
        }
        Ok(())
    }

    async fn search(
        &self,
        index: &str,
        query: &TermQuery,
        options: &SearchOptions,
    ) -> StorageResult<Vec<Map<String, Value>>> {
        let body = search_body(query, options)?;

        let response = self
            .client
            .search(SearchParts::Index(&[index]))
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(index, e))?;

        let status = response.status_code();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return failed_search(index, status.as_u16(), body, options.has_sort());
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| transport_error(index, e))?;
        parse_hits(index, &body)
    }

    async fn delete(&self, index: &str, ids: &[String]) {
        if ids.is_empty() {
            return;
        }

        let response = self
            .client
            .delete_by_query(DeleteByQueryParts::Index(&[index]))
            .refresh(self.config.refresh)
            .body(ids_query(ids))
            .send()
            .await;

        match response {
            Ok(response) if response.status_code().is_success() => {
                tracing::debug!(index = %index, count = ids.len(), "Deleted index documents");
            }
            Ok(response) => {
                let status = response.status_code();
                let body = response.text().await.unwrap_or_default();
                if !is_index_not_found(&body) {
                    tracing::error!(index = %index, status = %status, body = %body, "Failed to delete index documents");
                }
            }
            Err(e) => {
                tracing::error!(index = %index, error = %e, "Failed to delete index documents");
            }
        }
    }

    async fn delete_index(&self, indices: &[String]) {
        if indices.is_empty() {
            return;
        }
        let names: Vec<&str> = indices.iter().map(String::as_str).collect();
        for name in &names {
            self.known.remove(name);
        }

        let response = self
            .client
            .indices()
            .delete(IndicesDeleteParts::Index(&names))
            .send()
            .await;

        match response {
            Ok(response) if response.status_code().is_success() => {
                tracing::info!(indices = ?names, "Deleted search indices");
            }
            Ok(response) => {
                let body = response.text().await.unwrap_or_default();
                if !is_index_not_found(&body) {
                    tracing::error!(indices = ?names, body = %body, "Failed to delete search indices");
                }
            }
            Err(e) => {
                tracing::error!(indices = ?names, error = %e, "Failed to delete search indices");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_construction() {
        let config = IndexConfig {
            username: Some("elastic".to_string()),
            password: Some("secret".to_string()),
            ..IndexConfig::default()
        };
        let client = ElasticV8::new(&config).unwrap();
        assert_eq!(client.version(), "8");
        assert!(matches!(client.refresh(), Refresh::False));
    }

    #[test]
    fn test_invalid_address() {
        let config = IndexConfig {
            addresses: vec!["not a url".to_string()],
            ..IndexConfig::default()
        };
        assert!(ElasticV8::new(&config).is_err());
    }
}
