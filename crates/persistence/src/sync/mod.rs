//! Index synchronization.
//!
//! Accessors publish a [`ChangeEvent`] on [`ENTITY_MUTATED`] after every
//! relational mutation returns. The [`IndexSync`] handler, running on the
//! notifier's worker pool, writes the change to the search index:
//!
//! ```text
//! Dao::create ──► RelationalStore::insert ──► ChangeNotifier::publish
//!                                                   │ (queue)
//!                                                   ▼
//!                                     worker ──► IndexSync ──► SearchIndex::index
//! ```
//!
//! Propagation is in-memory and best-effort: a failed index write is logged
//! and counted, never retried, and never reported to the mutating caller.

mod indexer;
mod notifier;

pub use indexer::{ChangeEvent, ChangeKind, IndexSync};
pub use notifier::{
    ChangeNotifier, ENTITY_MUTATED, EventHandler, NotifierConfig, NotifierStats, Subscription,
};
