//! The per-entity accessor.
//!
//! A [`Dao`] binds one [`Entity`] type to one [`StoreHandle`]. Mutations go to
//! the relational store first; once it returns successfully the accessor
//! publishes a [`ChangeEvent`] and returns without waiting for the index.
//! Reads try the attached search index and fall back to the relational store,
//! reporting why through [`ReadPath`].
//!
//! # Example
//!
//! ```no_run
//! # use serde::{Deserialize, Serialize};
//! # use tessera_persistence::entity::{Column, Entity, Model};
//! # #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! # struct User { #[serde(flatten)] model: Model, name: String, nation: String }
//! # impl Entity for User {
//! #     fn table_name() -> &'static str { "users" }
//! #     fn columns() -> Vec<Column> { vec![Column::text("name"), Column::text("nation")] }
//! #     fn model(&self) -> &Model { &self.model }
//! #     fn model_mut(&mut self) -> &mut Model { &mut self.model }
//! # }
//! use tessera_persistence::registry::Registry;
//! use tessera_persistence::store::StoreConfig;
//! use tessera_persistence::types::{Filter, Patch, QueryOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::new();
//! registry.add_store("db1", &StoreConfig::memory()).await?;
//! let users = registry.accessor::<User>("db1").await?;
//!
//! let mut user = User { name: "user1".into(), nation: "china".into(), ..Default::default() };
//! users.create(&mut user).await?;
//!
//! users
//!     .update(Filter::new().eq("name", "user1"), &Patch::new().set("nation", "japan"))
//!     .await?;
//!
//! let found = users
//!     .query(&Filter::new().eq("nation", "japan"), &QueryOptions::new().order("name asc"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::core::Row;
use crate::entity::{Entity, SchemaMap, SqlType, UPDATED_AT_COLUMN, UUID_COLUMN};
use crate::error::{ResourceError, StorageResult, ValidationError};
use crate::search::{SearchIndex, SearchOptions, TermQuery};
use crate::store::StoreHandle;
use crate::sync::{
    ChangeEvent, ChangeKind, ChangeNotifier, ENTITY_MUTATED, IndexSync, NotifierConfig,
};
use crate::types::{Condition, Filter, Patch, QueryOptions, SortKey, format_sort};

/// Why a read was not served by the search index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The filter or ordering names a column the index cannot answer for.
    UnsupportedColumn(String),
    /// The index request failed.
    IndexUnavailable(String),
    /// An index document did not deserialize into the entity.
    Decode(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::UnsupportedColumn(column) => {
                write!(f, "column '{}' is not searchable in the index", column)
            }
            FallbackReason::IndexUnavailable(message) => write!(f, "index unavailable: {}", message),
            FallbackReason::Decode(message) => write!(f, "index document did not decode: {}", message),
        }
    }
}

/// Which store answered a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadPath {
    Index,
    /// `fallback` is set when an index is attached but could not be used.
    Relational { fallback: Option<FallbackReason> },
}

/// Entities returned by [`Dao::query_traced`].
#[derive(Debug, Clone)]
pub struct QueryResult<E> {
    pub items: Vec<E>,
    pub served_by: ReadPath,
}

/// Accessor for one entity type in one store.
pub struct Dao<E: Entity> {
    store: Arc<StoreHandle>,
    schema: SchemaMap,
    index_name: String,
    notifier: ChangeNotifier<ChangeEvent>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> fmt::Debug for Dao<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dao")
            .field("store", &self.store.key())
            .field("table", &self.schema.table())
            .field("index_name", &self.index_name)
            .finish_non_exhaustive()
    }
}

impl<E: Entity> Dao<E> {
    /// Builds the accessor and, when the store has a search index, subscribes
    /// the index synchronizer. Fails on a malformed entity declaration.
    pub fn new(store: Arc<StoreHandle>) -> StorageResult<Self> {
        Self::with_notifier_config(store, &NotifierConfig::default())
    }

    pub fn with_notifier_config(
        store: Arc<StoreHandle>,
        config: &NotifierConfig,
    ) -> StorageResult<Self> {
        let schema = SchemaMap::build::<E>()?;
        let index_name = format!("{}_{}", store.key(), schema.table()).to_lowercase();
        let notifier = ChangeNotifier::new(config)?;

        if let Some(search) = store.search_index() {
            notifier.subscribe(ENTITY_MUTATED, Arc::new(IndexSync::new(search.clone())));
        }

        debug!(
            store = %store.key(),
            table = %schema.table(),
            indexed = store.search_index().is_some(),
            "Created accessor"
        );

        Ok(Self {
            store,
            schema,
            index_name,
            notifier,
            _entity: PhantomData,
        })
    }

    /// The table name.
    pub fn name(&self) -> &str {
        self.schema.table()
    }

    /// The index namespace, `<store key>_<table>` in lower case.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn store(&self) -> &Arc<StoreHandle> {
        &self.store
    }

    pub fn schema(&self) -> &SchemaMap {
        &self.schema
    }

    pub fn search_index(&self) -> Option<&Arc<dyn SearchIndex>> {
        self.store.search_index()
    }

    /// The notifier mutations are published on. Applications may subscribe
    /// their own handlers to [`ENTITY_MUTATED`].
    pub fn notifier(&self) -> &ChangeNotifier<ChangeEvent> {
        &self.notifier
    }

    /// Provisions the table, its columns and unique indexes.
    pub async fn automigrate(&self) -> StorageResult<()> {
        self.store.relational().migrate(&self.schema).await?;
        info!(store = %self.store.key(), table = %self.schema.table(), "Provisioned schema");
        Ok(())
    }

    /// Stops accepting change events and waits for queued ones to reach the
    /// index.
    pub async fn shutdown(&self) {
        self.notifier.shutdown().await;
    }

    /// Inserts `entity`, assigning its external identifier if unset.
    ///
    /// The generated row id and timestamps are written back into `entity`.
    pub async fn create(&self, entity: &mut E) -> StorageResult<()> {
        let model = entity.model_mut();
        model.ensure_uuid();
        model.touch(Utc::now());

        let row = self.schema.encode(entity)?;
        let id = self.store.relational().insert(&self.schema, &row).await?;
        if let Some(id) = id {
            entity.model_mut().id = id;
        }

        self.publish_upserted(entity, 1).await;
        Ok(())
    }

    /// Sets the columns in `patch` on every row matching `condition`.
    ///
    /// Matching zero rows is [`ResourceError::NotFound`] and an empty
    /// condition is rejected. The index receives only the supplied fields for
    /// each matched identifier.
    pub async fn update(&self, condition: impl Into<Condition>, patch: &Patch) -> StorageResult<u64> {
        let condition = condition.into();
        self.require_condition(&condition, "update")?;
        if patch.is_empty() {
            return Err(ValidationError::EmptyPatch {
                table: self.schema.table().to_string(),
            }
            .into());
        }
        for (column, _) in patch.iter() {
            self.schema.require_column(column)?;
        }

        let mut row: Row = patch.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        if !row.contains_key(UPDATED_AT_COLUMN) {
            row.insert(UPDATED_AT_COLUMN.to_string(), serde_json::to_value(Utc::now())?);
        }

        let ids = if self.has_listeners() {
            Some(self.resolve_ids(&condition).await?)
        } else {
            None
        };

        let rows = self
            .store
            .relational()
            .update(&self.schema, &condition, &row)
            .await?;
        if rows == 0 {
            return Err(self.not_found("update"));
        }

        if let Some(ids) = ids {
            let kind = ChangeKind::Patched {
                ids,
                fields: self.schema.to_document(&row),
            };
            self.publish(kind, rows).await;
        }
        Ok(rows)
    }

    /// Inserts `entity` or, on conflict over `conflict`, updates `assigned`
    /// (every writable column when `assigned` is empty).
    ///
    /// With no conflict columns this is a plain insert. After a conflicting
    /// upsert `entity` is refreshed from the stored row, so it carries the
    /// row's original identifier.
    pub async fn upsert(&self, entity: &mut E, conflict: &[&str], assigned: &[&str]) -> StorageResult<u64> {
        for column in conflict.iter().chain(assigned) {
            self.schema.require_column(column)?;
        }

        if conflict.is_empty() {
            self.create(entity).await?;
            return Ok(1);
        }

        let model = entity.model_mut();
        model.ensure_uuid();
        model.touch(Utc::now());
        let row = self.schema.encode(entity)?;

        let conflict: Vec<String> = conflict.iter().map(|c| c.to_string()).collect();
        let assigned: Vec<String> = assigned.iter().map(|c| c.to_string()).collect();
        let rows = self
            .store
            .relational()
            .upsert(&self.schema, &row, &conflict, &assigned)
            .await?;

        let key: Filter = conflict
            .iter()
            .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
            .collect();
        let stored = self
            .store
            .relational()
            .select(&self.schema, &key.into(), &QueryOptions::new().limit(1))
            .await?;
        if let Some(stored) = stored.first() {
            self.refresh_from_row(entity, stored)?;
        }

        if rows > 0 {
            self.publish_upserted(entity, rows).await;
        }
        Ok(rows)
    }

    /// Entities matching `filter`, ordered and paged by `options`.
    pub async fn query(&self, filter: &Filter, options: &QueryOptions) -> StorageResult<Vec<E>> {
        Ok(self.query_traced(filter, options).await?.items)
    }

    /// Like [`Dao::query`], also reporting which store served the read.
    pub async fn query_traced(
        &self,
        filter: &Filter,
        options: &QueryOptions,
    ) -> StorageResult<QueryResult<E>> {
        for (column, _) in filter.iter() {
            self.schema.require_column(column)?;
        }
        let keys = options.sort_keys()?;
        for key in &keys {
            self.schema.require_column(&key.name)?;
        }

        let mut fallback = None;
        if let Some(search) = self.search_index() {
            match self.query_index(search.as_ref(), filter, &keys, options).await {
                Ok(items) => {
                    return Ok(QueryResult {
                        items,
                        served_by: ReadPath::Index,
                    });
                }
                Err(reason) => {
                    warn!(
                        store = %self.store.key(),
                        table = %self.schema.table(),
                        reason = %reason,
                        "Falling back to relational query"
                    );
                    fallback = Some(reason);
                }
            }
        }

        let rows = self
            .store
            .relational()
            .select(&self.schema, &Condition::Filter(filter.clone()), options)
            .await?;
        let items = rows
            .iter()
            .map(|row| self.schema.decode::<E>(row))
            .collect::<StorageResult<Vec<E>>>()?;

        Ok(QueryResult {
            items,
            served_by: ReadPath::Relational { fallback },
        })
    }

    /// Deletes the rows matching `condition` and their index documents.
    ///
    /// Identifiers are resolved first; if that fails neither store is
    /// touched. Index removal is best-effort. Matching zero rows is
    /// [`ResourceError::NotFound`]; an empty condition is rejected.
    pub async fn delete(&self, condition: impl Into<Condition>) -> StorageResult<u64> {
        let condition = condition.into();
        self.require_condition(&condition, "delete")?;

        if let Some(search) = self.search_index() {
            let ids = self.resolve_ids(&condition).await?;
            if !ids.is_empty() {
                search.delete(&self.index_name, &ids).await;
            }
        }

        let rows = self
            .store
            .relational()
            .delete(&self.schema, &condition)
            .await?;
        if rows == 0 {
            return Err(self.not_found("delete"));
        }
        debug!(table = %self.schema.table(), rows, "Deleted rows");
        Ok(rows)
    }

    async fn query_index(
        &self,
        search: &dyn SearchIndex,
        filter: &Filter,
        keys: &[SortKey],
        options: &QueryOptions,
    ) -> Result<Vec<E>, FallbackReason> {
        let mut fields = Map::new();
        for (column, value) in filter.iter() {
            fields.insert(self.searchable_field(column)?, value.clone());
        }

        let mut sort = Vec::with_capacity(keys.len());
        for key in keys {
            sort.push(SortKey {
                name: self.searchable_field(&key.name)?,
                order: key.order,
            });
        }

        let search_options = SearchOptions {
            sort: (!sort.is_empty()).then(|| format_sort(&sort)),
            from: options.offset,
            size: options.limit,
        };

        let documents = search
            .search(&self.index_name, &TermQuery::Term(fields), &search_options)
            .await
            .map_err(|e| FallbackReason::IndexUnavailable(e.to_string()))?;

        documents
            .into_iter()
            .map(|document| {
                serde_json::from_value::<E>(Value::Object(document))
                    .map_err(|e| FallbackReason::Decode(e.to_string()))
            })
            .collect()
    }

    /// The index field for `column`. JSON columns hold nested documents and
    /// cannot be compared or sorted as whole values.
    fn searchable_field(&self, column: &str) -> Result<String, FallbackReason> {
        match (self.schema.column(column), self.schema.field_for(column)) {
            (Some(declared), Some(field)) if declared.sql_type != SqlType::Json => {
                Ok(field.to_string())
            }
            _ => Err(FallbackReason::UnsupportedColumn(column.to_string())),
        }
    }

    async fn resolve_ids(&self, condition: &Condition) -> StorageResult<Vec<String>> {
        let rows = self
            .store
            .relational()
            .select(&self.schema, condition, &QueryOptions::default())
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(UUID_COLUMN).and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Overlays the stored row on `entity`, keeping fields that are not
    /// columns.
    fn refresh_from_row(&self, entity: &mut E, row: &Row) -> StorageResult<()> {
        let mut document = match serde_json::to_value(&*entity)? {
            Value::Object(document) => document,
            _ => Map::new(),
        };
        document.extend(self.schema.to_document(row));
        *entity = serde_json::from_value(Value::Object(document))?;
        Ok(())
    }

    fn has_listeners(&self) -> bool {
        self.notifier.subscriber_count(ENTITY_MUTATED) > 0
    }

    fn require_condition(&self, condition: &Condition, operation: &'static str) -> StorageResult<()> {
        if condition.is_empty() {
            return Err(ValidationError::MissingCondition {
                table: self.schema.table().to_string(),
                operation,
            }
            .into());
        }
        Ok(())
    }

    fn not_found(&self, operation: &'static str) -> crate::error::StorageError {
        ResourceError::NotFound {
            table: self.schema.table().to_string(),
            operation,
        }
        .into()
    }

    async fn publish_upserted(&self, entity: &E, rows_affected: u64) {
        if !self.has_listeners() {
            return;
        }
        match serde_json::to_value(entity) {
            Ok(document) => {
                let kind = ChangeKind::Upserted {
                    id: entity.primary_id().to_string(),
                    document,
                };
                self.publish(kind, rows_affected).await;
            }
            Err(e) => {
                warn!(table = %self.schema.table(), error = %e, "Entity did not serialize for the index");
            }
        }
    }

    async fn publish(&self, kind: ChangeKind, rows_affected: u64) {
        let event = ChangeEvent {
            table: self.schema.table().to_string(),
            index: self.index_name.clone(),
            kind,
            rows_affected,
            error: None,
        };
        if let Err(e) = self.notifier.publish(ENTITY_MUTATED, event).await {
            warn!(table = %self.schema.table(), error = %e, "Change event was not published");
        }
    }
}
