//! Request types shared by the accessor, the relational stores and the
//! search-index clients.

mod filter;
mod query;

pub use filter::{Condition, Filter, Patch};
pub use query::{QueryOptions, SortKey, SortOrder, format_sort, parse_sort};
