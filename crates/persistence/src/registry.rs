//! The directory of configured stores and their cached accessors.
//!
//! A [`Registry`] is constructed by the application's composition root and
//! shared by reference (usually in an `Arc`). It is populated from
//! configuration before first use:
//!
//! ```toml
//! [elastic]
//! version = "8"
//! addresses = ["http://localhost:9200"]
//!
//! [database.db1]
//! type = "mysql"
//! host = "localhost"
//! dbname = "app"
//! automigrate = true
//! cqrs = { type = "elastic", name = "elastic" }
//! ```
//!
//! Accessors are created once per `(store key, entity type)` pair. Concurrent
//! first use resolves to a single instance; schema provisioning runs once, at
//! registration.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::dao::Dao;
use crate::entity::Entity;
use crate::error::{ConfigError, StorageError, StorageResult};
use crate::search::{self, IndexConfig, SearchIndex};
use crate::settings::Settings;
use crate::store::{StoreConfig, StoreHandle};

/// Index engine families accepted in a store's `cqrs.type`.
const INDEX_KINDS: &[&str] = &["elastic", "elasticsearch", "es"];

type AccessorKey = (String, TypeId);
type AccessorSlot = Arc<dyn Any + Send + Sync>;

/// Stores, search-index clients and accessors, keyed by name.
#[derive(Default)]
pub struct Registry {
    stores: RwLock<HashMap<String, Arc<StoreHandle>>>,
    indices: RwLock<HashMap<String, Arc<dyn SearchIndex>>>,
    accessors: Mutex<HashMap<AccessorKey, AccessorSlot>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("stores", &self.store_keys())
            .field("indices", &self.indices.read().keys().collect::<Vec<_>>())
            .field("accessors", &self.accessors.lock().len())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from every child of `path` in `settings`.
    pub async fn with_settings(settings: &Settings, path: &str) -> StorageResult<Self> {
        let registry = Self::new();
        registry.load_settings(settings, path).await?;
        Ok(registry)
    }

    /// Adds every store configured under `path`. Index configurations named
    /// by a store's `cqrs` block are read from the root of `settings`.
    pub async fn load_settings(&self, settings: &Settings, path: &str) -> StorageResult<()> {
        let children = settings.sub_map(path);
        if children.is_empty() {
            return Err(ConfigError::NoStores.into());
        }

        for (key, child) in children {
            let config: StoreConfig = child.deserialize("")?;
            if let Some(cqrs) = &config.cqrs {
                if self.index(&cqrs.name).is_none() && settings.contains(&cqrs.name) {
                    let index: IndexConfig = settings.deserialize(&cqrs.name)?;
                    self.add_index(&cqrs.name, &index)?;
                }
            }
            self.add_store(&key, &config).await?;
        }
        Ok(())
    }

    /// Connects a search-index client and registers it under `name`.
    pub fn add_index(&self, name: &str, config: &IndexConfig) -> StorageResult<Arc<dyn SearchIndex>> {
        let client = search::connect(config)?;
        self.add_index_client(name, client.clone());
        info!(index = %name, version = %client.version(), "Registered search index");
        Ok(client)
    }

    /// Registers an existing client under `name`, replacing any previous one.
    pub fn add_index_client(&self, name: &str, client: Arc<dyn SearchIndex>) {
        self.indices.write().insert(name.to_string(), client);
    }

    pub fn index(&self, name: &str) -> Option<Arc<dyn SearchIndex>> {
        self.indices.read().get(name).cloned()
    }

    /// Connects the store described by `config` and registers it as `key`.
    ///
    /// A `cqrs` block must name an index added beforehand. Registering an
    /// existing key replaces its handle.
    pub async fn add_store(&self, key: &str, config: &StoreConfig) -> StorageResult<Arc<StoreHandle>> {
        let search = match &config.cqrs {
            Some(cqrs) => {
                let kind = cqrs.kind.to_ascii_lowercase();
                if !INDEX_KINDS.contains(&kind.as_str()) {
                    return Err(ConfigError::UnsupportedIndexKind {
                        kind: cqrs.kind.clone(),
                    }
                    .into());
                }
                let client = self.index(&cqrs.name).ok_or_else(|| ConfigError::UnknownIndex {
                    name: cqrs.name.clone(),
                })?;
                Some(client)
            }
            None => None,
        };

        let handle = StoreHandle::connect(key, config, search).await?;
        Ok(self.add_store_handle(handle))
    }

    /// Registers an already opened store.
    pub fn add_store_handle(&self, handle: StoreHandle) -> Arc<StoreHandle> {
        let key = handle.key().to_string();
        let handle = Arc::new(handle);

        let replaced = self
            .stores
            .write()
            .insert(key.clone(), handle.clone())
            .is_some();
        if replaced {
            warn!(store = %key, "Store re-registered, previous handle replaced");
            self.accessors.lock().retain(|(store, _), _| *store != key);
        }
        handle
    }

    /// The store registered as `key`. An empty key names the only store.
    pub fn store(&self, key: &str) -> StorageResult<Arc<StoreHandle>> {
        let stores = self.stores.read();
        if key.is_empty() {
            return match stores.len() {
                0 => Err(ConfigError::NoStores.into()),
                1 => Ok(stores.values().next().cloned().ok_or(ConfigError::NoStores)?),
                count => Err(ConfigError::AmbiguousStore { count }.into()),
            };
        }
        stores.get(key).cloned().ok_or_else(|| {
            ConfigError::UnknownStore {
                key: key.to_string(),
            }
            .into()
        })
    }

    /// Registered store keys, sorted.
    pub fn store_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.stores.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the accessor for `E` on store `key`, creating it on first use.
    ///
    /// Concurrent first calls share one creation: a single accessor is built
    /// and, when the store provisions schema, `migrate` runs once. If creation
    /// fails the next call tries again.
    pub async fn register_accessor<E: Entity>(&self, key: &str) -> StorageResult<Arc<Dao<E>>> {
        let store = self.store(key)?;
        let slot = self.slot::<E>(store.key());
        let cell = slot
            .downcast::<OnceCell<Arc<Dao<E>>>>()
            .map_err(|_| StorageError::from(ConfigError::InvalidEntity {
                table: E::table_name().to_string(),
                message: "accessor slot holds a different entity type".to_string(),
            }))?;

        let dao = cell
            .get_or_try_init(|| async {
                let dao = Dao::<E>::new(store.clone())?;
                if store.automigrate() {
                    dao.automigrate().await?;
                }
                debug!(store = %store.key(), table = %dao.name(), "Registered accessor");
                Ok::<_, StorageError>(Arc::new(dao))
            })
            .await?;
        Ok(dao.clone())
    }

    /// Alias of [`Registry::register_accessor`].
    pub async fn accessor<E: Entity>(&self, key: &str) -> StorageResult<Arc<Dao<E>>> {
        self.register_accessor::<E>(key).await
    }

    /// Load-or-store of the creation cell for `(store, E)`.
    fn slot<E: Entity>(&self, store: &str) -> AccessorSlot {
        self.accessors
            .lock()
            .entry((store.to_string(), TypeId::of::<E>()))
            .or_insert_with(|| Arc::new(OnceCell::<Arc<Dao<E>>>::new()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::MemoryIndex;

    #[test]
    fn test_store_lookup_on_empty_registry() {
        let registry = Registry::new();
        assert!(matches!(
            registry.store(""),
            Err(StorageError::Config(ConfigError::NoStores))
        ));
        assert!(matches!(
            registry.store("db1"),
            Err(StorageError::Config(ConfigError::UnknownStore { .. }))
        ));
    }

    #[tokio::test]
    async fn test_cqrs_requires_registered_index() {
        let registry = Registry::new();
        let config = StoreConfig::memory().with_index("search");
        let err = registry.add_store("db1", &config).await.unwrap_err();
        assert!(matches!(err, StorageError::Config(ConfigError::UnknownIndex { .. })));
    }

    #[tokio::test]
    async fn test_cqrs_kind_is_checked() {
        let registry = Registry::new();
        registry.add_index_client("search", Arc::new(MemoryIndex::new()));
        let mut config = StoreConfig::memory().with_index("search");
        if let Some(cqrs) = config.cqrs.as_mut() {
            cqrs.kind = "solr".to_string();
        }
        let err = registry.add_store("db1", &config).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Config(ConfigError::UnsupportedIndexKind { .. })
        ));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_empty_key_resolves_single_store() {
        let registry = Registry::new();
        registry.add_store("db1", &StoreConfig::memory()).await.unwrap();
        assert_eq!(registry.store("").unwrap().key(), "db1");

        registry.add_store("db2", &StoreConfig::memory()).await.unwrap();
        assert!(matches!(
            registry.store(""),
            Err(StorageError::Config(ConfigError::AmbiguousStore { count: 2 }))
        ));
        assert_eq!(registry.store_keys(), vec!["db1", "db2"]);
    }

    #[test]
    fn test_index_client_registration() {
        let registry = Registry::new();
        assert!(registry.index("search").is_none());
        let client = registry.add_index("search", &IndexConfig::memory()).unwrap();
        assert_eq!(client.version(), "memory");
        assert!(registry.index("search").is_some());
    }
}
