//! Document cache for watchtower
//!
//! sled-backed collections of JSON documents with secondary indexes,
//! filtered queries and typed access through [`Collection`].

pub mod cache;
pub mod collection;
pub mod index;
pub mod query;
pub mod schemas;

pub use cache::{CacheConfig, DocumentCache, DocumentStore, JsonCollection};
pub use collection::{CachedDocument, Collection};
pub use index::IndexSpec;
pub use query::{Condition, Cursor, Filter, FindOptions, Sort, SortOrder};
