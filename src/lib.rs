//! gleaner — the feed ingestion and article-persistence core of a desktop
//! RSS/Atom reader.
//!
//! The pipeline: the [`fetch::FetchScheduler`] partitions the
//! [`catalog::FeedCatalog`]'s feeds into priority baskets from their
//! publication cadence, fetches them with bounded concurrency, parses the
//! bodies through [`feed::parser`], and reconciles the harvested articles
//! into the [`storage::Database`] — merging changed articles, flagging
//! vanished ones as abandoned, and never touching user state (read flags,
//! tags). Low-priority fetches are parked in the durable
//! [`fetch::StagingQueue`] and digested on the next run.

pub mod catalog;
pub mod config;
pub mod feed;
pub mod fetch;
pub mod storage;
