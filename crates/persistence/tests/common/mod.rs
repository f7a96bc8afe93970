//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tessera_persistence::dao::Dao;
use tessera_persistence::entity::{Column, Entity, Model};
use tessera_persistence::registry::Registry;
use tessera_persistence::search::{IndexConfig, MemoryIndex, SearchIndex};
use tessera_persistence::store::{StoreConfig, StoreHandle};

/// Upper bound for index propagation in tests.
pub const PROPAGATION: Duration = Duration::from_secs(5);

/// A user record with a unique (name, sex) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleModel {
    #[serde(flatten)]
    pub model: Model,
    pub name: String,
    pub sex: String,
    #[serde(rename = "homeNation")]
    pub nation: String,
    #[serde(default)]
    pub city: String,
}

impl SampleModel {
    pub fn new(name: &str, sex: &str, nation: &str) -> Self {
        Self {
            name: name.to_string(),
            sex: sex.to_string(),
            nation: nation.to_string(),
            ..Default::default()
        }
    }
}

impl Entity for SampleModel {
    fn table_name() -> &'static str {
        "sample_models"
    }

    fn columns() -> Vec<Column> {
        vec![
            Column::text("name").unique("unique_name_sex"),
            Column::text("sex").unique("unique_name_sex"),
            Column::text("nation").field("homeNation"),
            Column::text("city"),
        ]
    }

    fn model(&self) -> &Model {
        &self.model
    }

    fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }
}

/// An entity with a JSON column, which the index cannot filter on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(flatten)]
    pub model: Model,
    pub handle: String,
    #[serde(default)]
    pub attributes: Value,
}

impl Entity for Profile {
    fn table_name() -> &'static str {
        "profiles"
    }

    fn columns() -> Vec<Column> {
        vec![Column::text("handle").unique("handle"), Column::json("attributes")]
    }

    fn model(&self) -> &Model {
        &self.model
    }

    fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }
}

/// A registry with one in-memory store `db1` and no index.
pub async fn memory_registry() -> Registry {
    let registry = Registry::new();
    registry
        .add_store("db1", &StoreConfig::memory())
        .await
        .expect("memory store");
    registry
}

/// A registry with one in-memory store `db1` attached to an in-process index.
pub async fn indexed_registry() -> (Registry, Arc<MemoryIndex>) {
    let index = Arc::new(MemoryIndex::new());
    let registry = Registry::new();
    registry.add_index_client("search", index.clone());
    registry
        .add_store("db1", &StoreConfig::memory().with_index("search"))
        .await
        .expect("indexed memory store");
    (registry, index)
}

/// An accessor on a fresh in-memory store.
pub async fn sample_dao() -> Arc<Dao<SampleModel>> {
    memory_registry()
        .await
        .accessor::<SampleModel>("db1")
        .await
        .expect("sample accessor")
}

/// An accessor on a fresh indexed in-memory store, with its index.
pub async fn indexed_sample_dao() -> (Arc<Dao<SampleModel>>, Arc<MemoryIndex>) {
    let (registry, index) = indexed_registry().await;
    let dao = registry
        .accessor::<SampleModel>("db1")
        .await
        .expect("sample accessor");
    (dao, index)
}

/// Waits until every change event published by `dao` has been handled.
pub async fn settle<E: Entity>(dao: &Dao<E>) {
    assert!(
        dao.notifier().wait_idle(PROPAGATION).await,
        "index propagation did not finish"
    );
}

/// A store handle over a private in-memory database.
pub fn memory_handle(key: &str, search: Option<Arc<dyn SearchIndex>>) -> StoreHandle {
    let store = tessera_persistence::backends::sqlite::SqliteStore::in_memory()
        .expect("in-memory sqlite");
    StoreHandle::new(key, Arc::new(store), true, search)
}

pub fn memory_index_config() -> IndexConfig {
    IndexConfig::memory()
}
