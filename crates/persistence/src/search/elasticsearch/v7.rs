//! Elasticsearch 7.x client over the REST API.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{Map, Value, json};

use super::{
    KnownIndices, failed_search, index_definition, is_already_exists, is_index_not_found,
    parse_hits, status_error, transport_error,
};
use crate::error::{BackendError, StorageError, StorageResult};
use crate::search::query::{ids_query, search_body};
use crate::search::{IndexConfig, SearchIndex, SearchOptions, TermQuery};

/// Client for Elasticsearch 7.x clusters.
pub struct ElasticV7 {
    http: Client,
    base_url: String,
    config: IndexConfig,
    known: KnownIndices,
}

impl Debug for ElasticV7 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticV7")
            .field("base_url", &self.base_url)
            .field("refresh", &self.config.refresh)
            .finish_non_exhaustive()
    }
}

impl ElasticV7 {
    pub fn new(config: &IndexConfig) -> StorageResult<Self> {
        let base_url = config.first_address().trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url).map_err(|e| {
            StorageError::Backend(BackendError::ConnectionFailed {
                backend_name: "elasticsearch".to_string(),
                message: format!("Invalid URL: {}", e),
            })
        })?;

        let http = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| {
                StorageError::Backend(BackendError::ConnectionFailed {
                    backend_name: "elasticsearch".to_string(),
                    message: format!("Failed to build HTTP client: {}", e),
                })
            })?;

        Ok(Self {
            http,
            base_url,
            config: config.clone(),
            known: KnownIndices::default(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}/{}", self.base_url, path));
        match &self.config.username {
            Some(username) => builder.basic_auth(username, self.config.password.as_ref()),
            None => builder,
        }
    }

    fn refresh_param(&self) -> &'static str {
        if self.config.refresh { "true" } else { "false" }
    }

    async fn ensure_index(&self, index: &str) -> StorageResult<()> {
        if self.known.contains(index) {
            return Ok(());
        }

        let exists = self
            .request(Method::HEAD, index)
            .send()
            .await
            .map_err(|e| transport_error(index, e))?;

        if !exists.status().is_success() {
            let response = self
                .request(Method::PUT, index)
                .json(&index_definition())
                .send()
                .await
                .map_err(|e| transport_error(index, e))?;

            let status = response.status();
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

    async fn expect_success(&self, index: &str, request: RequestBuilder) -> StorageResult<()> {
        let response = request.send().await.map_err(|e| transport_error(index, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(index, status.as_u16(), body));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for ElasticV7 {
    fn version(&self) -> &str {
        "7"
    }

    async fn index(&self, index: &str, id: &str, document: &Value) -> StorageResult<()> {
        self.ensure_index(index).await?;
        let request = self
            .request(Method::PUT, &format!("{}/_doc/{}", index, id))
            .query(&[("refresh", self.refresh_param())])
            .json(document);
        self.expect_success(index, request).await
    }

    async fn update(&self, index: &str, id: &str, partial: &Map<String, Value>) -> StorageResult<()> {
        let request = self
            .request(Method::POST, &format!("{}/_update/{}", index, id))
            .query(&[("refresh", self.refresh_param())])
            .json(&json!({ "doc": partial }));
        self.expect_success(index, request).await
    }

    async fn search(
        &self,
        index: &str,
        query: &TermQuery,
        options: &SearchOptions,
    ) -> StorageResult<Vec<Map<String, Value>>> {
        let body = search_body(query, options)?;

        let response = self
            .request(Method::POST, &format!("{}/_search", index))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(index, e))?;

        let status = response.status();
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
            .request(Method::POST, &format!("{}/_delete_by_query", index))
            .query(&[("refresh", self.refresh_param())])
            .json(&ids_query(ids))
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(index = %index, count = ids.len(), "Deleted index documents");
            }
            Ok(response) => {
                let status = response.status();
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
        for name in indices {
            self.known.remove(name);
        }

        let response = self
            .request(Method::DELETE, &indices.join(","))
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                tracing::info!(indices = ?indices, "Deleted search indices");
            }
            Ok(response) => {
                let body = response.text().await.unwrap_or_default();
                if !is_index_not_found(&body) {
                    tracing::error!(indices = ?indices, body = %body, "Failed to delete search indices");
                }
            }
            Err(e) => {
                tracing::error!(indices = ?indices, error = %e, "Failed to delete search indices");
            }
        }
    }
}
