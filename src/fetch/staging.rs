//! Durable waiting room for fetched-but-not-yet-digested feed bodies.
//!
//! Background fetch waves park their results here as one file per entry, so
//! a kill between fetch and digest loses nothing; the next run drains the
//! directory through the normal parse/digest path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::fs;

const ENTRY_EXTENSION: &str = "staged";

/// Disambiguates entries created within the same nanosecond stamp.
static ENTRY_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum StagingError {
    /// The queue holds no entries
    #[error("staging queue is empty")]
    Empty,

    #[error("staging I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A popped entry: the feed URL and the raw body that was fetched for it.
#[derive(Debug)]
pub struct StagedEntry {
    pub url: String,
    pub data: Vec<u8>,
}

/// One-file-per-entry durable queue in a dedicated directory. The directory
/// is created lazily on first store. Pop order follows filename order
/// (creation-stamped names give near-FIFO), though the contract only
/// requires that every entry is eventually drained exactly once.
#[derive(Debug, Clone)]
pub struct StagingQueue {
    dir: PathBuf,
}

impl StagingQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Persist one `(url, body)` pair as a single self-describing file:
    /// a length-prefixed URL header followed by the raw bytes. Written to a
    /// temp name and renamed so a crash never leaves a half-written entry
    /// under the queue's extension.
    pub async fn store_one(&self, url: &str, data: &[u8]) -> Result<(), StagingError> {
        fs::create_dir_all(&self.dir).await?;

        let mut encoded = Vec::with_capacity(4 + url.len() + data.len());
        encoded.extend_from_slice(&(url.len() as u32).to_be_bytes());
        encoded.extend_from_slice(url.as_bytes());
        encoded.extend_from_slice(data);

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let seq = ENTRY_SEQ.fetch_add(1, Ordering::Relaxed);
        let name = format!("{stamp:024}-{seq:04}");

        let temp_path = self.dir.join(format!("{name}.tmp"));
        let final_path = self.dir.join(format!("{name}.{ENTRY_EXTENSION}"));
        fs::write(&temp_path, &encoded).await?;
        fs::rename(&temp_path, &final_path).await?;

        tracing::debug!(url = %url, bytes = data.len(), "staged feed body");
        Ok(())
    }

    /// Pop one entry: read, decode, delete, return. Fails with
    /// [`StagingError::Empty`] when nothing is left. An undecodable file is
    /// discarded with a warning and the next one is tried.
    pub async fn get_one(&self) -> Result<StagedEntry, StagingError> {
        let mut names = match self.list_entries().await {
            Ok(names) => names,
            // A directory that was never created is just an empty queue
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StagingError::Empty),
            Err(e) => return Err(e.into()),
        };
        names.sort();

        for name in names {
            let path = self.dir.join(&name);
            let bytes = fs::read(&path).await?;
            fs::remove_file(&path).await?;

            match decode_entry(&bytes) {
                Some(entry) => return Ok(entry),
                None => {
                    tracing::warn!(file = %name, "discarding corrupt staging entry");
                    continue;
                }
            }
        }

        Err(StagingError::Empty)
    }

    /// Number of entries currently parked.
    pub async fn len(&self) -> Result<usize, StagingError> {
        match self.list_entries().await {
            Ok(names) => Ok(names.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn is_empty(&self) -> Result<bool, StagingError> {
        Ok(self.len().await? == 0)
    }

    async fn list_entries(&self) -> Result<Vec<String>, std::io::Error> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(&format!(".{ENTRY_EXTENSION}")) {
                names.push(name);
            }
        }
        Ok(names)
    }
}

fn decode_entry(bytes: &[u8]) -> Option<StagedEntry> {
    if bytes.len() < 4 {
        return None;
    }
    let url_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if bytes.len() < 4 + url_len {
        return None;
    }
    let url = String::from_utf8(bytes[4..4 + url_len].to_vec()).ok()?;
    let data = bytes[4 + url_len..].to_vec();
    Some(StagedEntry { url, data })
}
