//! Fetch pipeline: HTTP capability, durable staging queue, and the scheduler
//! that turns catalog activity data into prioritized fetch waves.
//!
//! - [`client`] - shared HTTP client with the fetch error taxonomy
//! - [`staging`] - durable waiting room for fetched-but-undigested bodies
//! - [`scheduler`] - baskets, bounded-concurrency waves, download cycles

pub mod client;
pub mod scheduler;
pub mod staging;

pub use client::{build_client, FetchError};
pub use scheduler::{
    calculate_average_activity, compute_baskets, fetch_feeds, fetch_feeds_background,
    ActivityBaskets, DownloadError, DownloadOutcome, FetchProgress, FetchScheduler, FetchStatus,
    ScheduleError,
};
pub use staging::{StagedEntry, StagingError, StagingQueue};
