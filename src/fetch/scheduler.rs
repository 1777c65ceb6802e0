use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::catalog::FeedCatalog;
use crate::feed::parser::{parse_feed, FeedDocument, RawArticle};
use crate::fetch::client::{fetch_bytes, FetchError};
use crate::fetch::staging::{StagingError, StagingQueue};
use crate::storage::{Database, Enclosure, HarvestedArticle, StoreError};

/// In-flight ceiling for the foreground (hi-basket) wave.
const FOREGROUND_CONCURRENCY: usize = 5;
/// In-flight ceiling for the background (lo-basket) wave.
const BACKGROUND_CONCURRENCY: usize = 3;
/// Consecutive connection-class failures that mean "the network is down",
/// not "a few feeds are individually broken".
const MAX_FAILURE_STREAK: u32 = 5;
/// Deadline for each scheduled batch fetch.
const BATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A feed is "probably stale" once elapsed time exceeds roughly a third of
/// its typical gap between publications.
const STALENESS_FACTOR: f64 = 0.33;
const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 24 * HOUR_MS;

// ============================================================================
// Baskets
// ============================================================================

/// Priority partition of feed URLs for one fetch wave.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActivityBaskets {
    /// Fetched in the foreground wave
    pub hi: Vec<String>,
    /// Deferred to the background wave (staged, digested next run)
    pub lo: Vec<String>,
}

/// Partition feeds into hi/lo baskets from their publication cadence and the
/// time of the last successful full download.
///
/// The stored last-download time is clamped before use: older than 3 days is
/// treated as "never" (everything becomes hi priority), newer than 24 hours
/// is pushed back to `now - 24h` so frequent manual refreshes cannot starve
/// a feed out of the hi basket. If the hi basket ends up empty the baskets
/// swap, so a wave always has foreground work.
pub fn compute_baskets(
    feeds: &[(String, i64)],
    last_download_ms: i64,
    now_ms: i64,
) -> ActivityBaskets {
    let clamped = if last_download_ms < now_ms - 3 * DAY_MS {
        0
    } else if last_download_ms > now_ms - DAY_MS {
        now_ms - DAY_MS
    } else {
        last_download_ms
    };
    let hours_since_last = (now_ms - clamped) as f64 / HOUR_MS as f64;

    let mut baskets = ActivityBaskets::default();
    for (url, average_activity) in feeds {
        if hours_since_last >= *average_activity as f64 * STALENESS_FACTOR {
            baskets.hi.push(url.clone());
        } else {
            baskets.lo.push(url.clone());
        }
    }

    if baskets.hi.is_empty() {
        std::mem::swap(&mut baskets.hi, &mut baskets.lo);
    }

    baskets
}

/// Estimate a feed's typical hours between publications from its most recent
/// articles (feed order, newest first).
///
/// Looks at up to the 5 newest articles. Any missing publish date means the
/// cadence cannot be reasoned about: returns 0 ("very active"), as does an
/// empty harvest. Otherwise the gaps walking backward from `now` are
/// averaged and rounded to whole hours.
pub fn calculate_average_activity(pub_times_ms: &[Option<i64>], now_ms: i64) -> i64 {
    if pub_times_ms.is_empty() {
        return 0;
    }

    let recent = &pub_times_ms[..pub_times_ms.len().min(5)];
    let mut reference = now_ms;
    let mut total_gap: i64 = 0;
    for pub_time in recent {
        let Some(pub_time) = pub_time else {
            return 0;
        };
        total_gap += reference - pub_time;
        reference = *pub_time;
    }

    let average_ms = total_gap as f64 / recent.len() as f64;
    (average_ms / HOUR_MS as f64).round() as i64
}

// ============================================================================
// Fetch Waves
// ============================================================================

/// Per-URL outcome reported as the wave progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Ok,
    ParseError,
    NotFound,
    ConnectionError,
}

/// Progress event emitted after each completed URL.
#[derive(Debug, Clone)]
pub struct FetchProgress {
    pub completed: usize,
    pub total: usize,
    pub url: String,
    pub status: FetchStatus,
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The connection-error streak tripped: the network itself is down.
    #[error("No connection")]
    NoConnection,
}

/// One feed successfully fetched and parsed in a wave.
#[derive(Debug)]
pub struct HarvestedFeed {
    pub url: String,
    pub document: FeedDocument,
}

/// What a foreground wave produced.
#[derive(Debug, Default)]
pub struct WaveOutcome {
    pub harvested: Vec<HarvestedFeed>,
    /// URLs that hit connection-class errors, to be demoted into the
    /// background basket for retry
    pub demoted: Vec<String>,
}

async fn fetch_one(
    client: &reqwest::Client,
    url: String,
) -> (String, Result<Vec<u8>, FetchError>) {
    let result = fetch_bytes(client, &url, BATCH_TIMEOUT).await;
    (url, result)
}

/// Fetch a basket with bounded concurrency, parsing each body as it lands.
///
/// URLs are popped off the end of the list (LIFO) with up to 5 in flight;
/// each completion pulls the next queued URL. A streak of connection-class
/// failures — 5 in a row, or every URL when the basket is smaller — aborts
/// the wave with [`ScheduleError::NoConnection`]. The abort stops issuing
/// new fetches and lets the in-flight ones run out; siblings are never
/// cancelled mid-flight.
///
/// Individual 404s and parse failures are reported in progress and swallowed;
/// they never abort the wave.
pub async fn fetch_feeds(
    client: &reqwest::Client,
    urls: Vec<String>,
    progress: Option<mpsc::Sender<FetchProgress>>,
) -> Result<WaveOutcome, ScheduleError> {
    let total = urls.len();
    let mut outcome = WaveOutcome::default();
    if total == 0 {
        return Ok(outcome);
    }

    let mut work = urls;
    let mut in_flight = FuturesUnordered::new();
    while in_flight.len() < FOREGROUND_CONCURRENCY {
        match work.pop() {
            Some(url) => in_flight.push(fetch_one(client, url)),
            None => break,
        }
    }

    let mut completed = 0;
    let mut failure_streak: u32 = 0;

    while let Some((url, result)) = in_flight.next().await {
        completed += 1;

        let status = match result {
            Ok(bytes) => match parse_feed(&bytes) {
                Ok(parsed) => {
                    failure_streak = 0;
                    outcome.harvested.push(HarvestedFeed {
                        url: url.clone(),
                        document: parsed.document,
                    });
                    FetchStatus::Ok
                }
                Err(e) => {
                    // The fetch itself succeeded; only the body is junk
                    failure_streak = 0;
                    tracing::warn!(url = %url, error = %e, "feed body failed to parse");
                    FetchStatus::ParseError
                }
            },
            Err(FetchError::NotFound) => {
                // An explicit 404 is an individually-broken feed; it neither
                // feeds nor resets the streak.
                tracing::warn!(url = %url, "feed returned 404");
                FetchStatus::NotFound
            }
            Err(e) => {
                failure_streak += 1;
                outcome.demoted.push(url.clone());
                tracing::warn!(url = %url, error = %e, streak = failure_streak, "connection-class fetch failure");
                FetchStatus::ConnectionError
            }
        };

        if let Some(tx) = &progress {
            let _ = tx
                .send(FetchProgress {
                    completed,
                    total,
                    url,
                    status,
                })
                .await;
        }

        if failure_streak >= MAX_FAILURE_STREAK || failure_streak as usize == total {
            tracing::warn!(streak = failure_streak, total = total, "aborting wave: no connection");
            while in_flight.next().await.is_some() {}
            return Err(ScheduleError::NoConnection);
        }

        if let Some(next) = work.pop() {
            in_flight.push(fetch_one(client, next));
        }
    }

    Ok(outcome)
}

/// Background variant: concurrency 3, no escalation, and nothing is digested
/// here — every successful fetch is parked in the staging queue so the main
/// path stays decoupled and a kill between fetch and digest loses nothing.
/// Returns the number of bodies staged.
pub async fn fetch_feeds_background(
    client: &reqwest::Client,
    urls: Vec<String>,
    staging: &StagingQueue,
) -> usize {
    let mut work = urls;
    let mut in_flight = FuturesUnordered::new();
    while in_flight.len() < BACKGROUND_CONCURRENCY {
        match work.pop() {
            Some(url) => in_flight.push(fetch_one(client, url)),
            None => break,
        }
    }

    let mut staged = 0;
    while let Some((url, result)) = in_flight.next().await {
        match result {
            Ok(bytes) => match staging.store_one(&url, &bytes).await {
                Ok(()) => staged += 1,
                Err(e) => tracing::warn!(url = %url, error = %e, "failed to stage feed body"),
            },
            Err(e) => tracing::debug!(url = %url, error = %e, "background fetch failed"),
        }

        if let Some(next) = work.pop() {
            in_flight.push(fetch_one(client, next));
        }
    }

    staged
}

// ============================================================================
// Orchestration
// ============================================================================

#[derive(Debug, Error)]
pub enum DownloadError {
    /// Propagated from the foreground wave's streak escalation.
    #[error("No connection")]
    NoConnection,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handle returned by [`FetchScheduler::download`] once the foreground phase
/// is done. The background job keeps running after this is returned.
#[derive(Debug)]
pub struct DownloadOutcome {
    /// Feeds digested during the foreground phase (staged leftovers + hi wave)
    pub digested: usize,
    /// The lo-basket background fetch; resolves to the number of bodies staged
    pub background: JoinHandle<usize>,
}

/// Drives download cycles: basket computation, the foreground wave with
/// staged-leftover draining, digestion, and the background staging job.
pub struct FetchScheduler {
    db: Database,
    catalog: Arc<FeedCatalog>,
    staging: StagingQueue,
    client: reqwest::Client,
    working: Arc<AtomicBool>,
}

impl FetchScheduler {
    pub fn new(
        db: Database,
        catalog: Arc<FeedCatalog>,
        staging: StagingQueue,
        client: reqwest::Client,
    ) -> Self {
        Self {
            db,
            catalog,
            staging,
            client,
            working: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True while a foreground phase (staging drain + hi wave + digestion) is
    /// running. The background phase does not hold the flag.
    pub fn is_working(&self) -> bool {
        self.working.load(Ordering::SeqCst)
    }

    /// Run one download cycle.
    ///
    /// 1. Compute baskets from catalog activity and the stored last-download
    ///    time, then stamp the last-download time immediately so an
    ///    interrupted run still recomputes sane baskets.
    /// 2. Concurrently drain staged leftovers from the previous run and
    ///    fetch the hi basket.
    /// 3. Digest every harvested feed; connection-error URLs are demoted
    ///    into the lo basket.
    /// 4. Kick off the background job fetching the lo basket into staging
    ///    and return its handle.
    ///
    /// # Errors
    ///
    /// [`DownloadError::NoConnection`] when the hi wave's failure streak
    /// trips. Per-feed parse failures and 404s are swallowed; those feeds
    /// simply contribute nothing this cycle.
    pub async fn download(
        &self,
        progress: Option<mpsc::Sender<FetchProgress>>,
    ) -> Result<DownloadOutcome, DownloadError> {
        self.working.store(true, Ordering::SeqCst);
        let result = self.run_foreground(progress).await;
        self.working.store(false, Ordering::SeqCst);
        result
    }

    async fn run_foreground(
        &self,
        progress: Option<mpsc::Sender<FetchProgress>>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let now = Utc::now().timestamp_millis();
        let snapshot = self.catalog.activity_snapshot().await;
        let last_download = self.db.last_feeds_download().await?;
        let baskets = compute_baskets(&snapshot, last_download, now);
        tracing::info!(hi = baskets.hi.len(), lo = baskets.lo.len(), "computed fetch baskets");

        self.db.set_last_feeds_download(now).await?;

        let (drained, wave) = tokio::join!(
            self.drain_staging(),
            fetch_feeds(&self.client, baskets.hi, progress)
        );
        let wave = wave.map_err(|_| DownloadError::NoConnection)?;

        let mut digested = drained;
        for feed in wave.harvested {
            if self.digest_document(&feed.url, feed.document).await {
                digested += 1;
            }
        }

        let mut lo = baskets.lo;
        lo.extend(wave.demoted);

        let client = self.client.clone();
        let staging = self.staging.clone();
        let background = tokio::spawn(async move {
            fetch_feeds_background(&client, lo, &staging).await
        });

        Ok(DownloadOutcome {
            digested,
            background,
        })
    }

    /// Digest leftovers a previous run staged but never digested. Runs until
    /// the queue reports empty; corrupt or unparsable bodies are dropped.
    async fn drain_staging(&self) -> usize {
        let mut digested = 0;
        loop {
            match self.staging.get_one().await {
                Ok(entry) => {
                    match parse_feed(&entry.data) {
                        Ok(parsed) => {
                            if self.digest_document(&entry.url, parsed.document).await {
                                digested += 1;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(url = %entry.url, error = %e, "staged body failed to parse");
                        }
                    }
                }
                Err(StagingError::Empty) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "staging drain stopped");
                    break;
                }
            }
        }
        digested
    }

    /// Apply one parsed document to the store and write the feed's activity
    /// estimate back to the catalog. Digest failures are demoted to log
    /// lines: a feed that yields nothing this cycle is stale, not fatal.
    async fn digest_document(&self, url: &str, document: FeedDocument) -> bool {
        let now = Utc::now().timestamp_millis();
        let pub_times: Vec<Option<i64>> =
            document.articles.iter().map(|a| a.pub_date).collect();

        let harvest: Vec<HarvestedArticle> =
            document.articles.into_iter().map(to_harvested).collect();

        match self.db.digest(url, &harvest).await {
            Ok(outcome) => {
                let hours = calculate_average_activity(&pub_times, now);
                if let Err(e) = self.catalog.set_average_activity(url, hours).await {
                    tracing::warn!(url = %url, error = %e, "failed to write back activity");
                }
                tracing::info!(
                    url = %url,
                    inserted = outcome.inserted,
                    updated = outcome.updated,
                    abandoned = outcome.abandoned,
                    "feed digested"
                );
                true
            }
            Err(StoreError::EmptyHarvest) => {
                tracing::debug!(url = %url, "empty harvest skipped");
                false
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "digest failed");
                false
            }
        }
    }
}

fn to_harvested(article: RawArticle) -> HarvestedArticle {
    HarvestedArticle {
        guid: article.guid,
        link: article.link,
        title: article.title,
        content: article.description,
        pub_time: article.pub_date,
        enclosures: article
            .enclosures
            .into_iter()
            .map(|e| Enclosure {
                url: e.url,
                mime_type: e.mime_type,
            })
            .collect(),
    }
}
