//! Core storage traits.
//!
//! - [`RelationalStore`] - the authoritative row store, one implementation per
//!   engine in [`backends`](crate::backends)
//! - [`BackendKind`] - the engine tag used by configuration dispatch
//!
//! The search-index side has its own trait,
//! [`SearchIndex`](crate::search::SearchIndex).

pub mod backend;

pub use backend::{BackendKind, RelationalStore, Row};
