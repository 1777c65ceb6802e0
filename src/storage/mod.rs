//! Persistence layer: SQLite-backed article store, feed rows, tags, and the
//! reconciliation digest.
//!
//! All access goes through a cloneable [`Database`] handle; there is no
//! ambient global store. Digests are serialized FIFO per handle family (the
//! gate travels with the clone), while read queries run unserialized.

mod articles;
mod feeds;
mod meta;
mod schema;
mod tags;
mod types;

pub use schema::Database;
pub use types::{
    Article, ArticlePage, DigestOutcome, Enclosure, FeedRecord, HarvestedArticle, StoreError, Tag,
};
