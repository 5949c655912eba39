//! Bounded publication history
//!
//! An append/read log of published pages, persisted as a JSON file so it
//! survives restarts (the only state in the service that does). Writes use
//! atomic temp-file + rename to prevent corruption on crash. The log is
//! bounded: appending past capacity drops the oldest entries.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// One published page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub keyword: String,
    pub title: String,
    pub page_url: String,
    pub completed_at: DateTime<Utc>,
}

/// Bounded, file-backed history log. Newest entries first.
pub struct History {
    path: PathBuf,
    capacity: usize,
    entries: RwLock<VecDeque<HistoryEntry>>,
}

impl History {
    /// Load history from disk, or start empty when the file doesn't exist.
    /// Entries beyond capacity are dropped at load time.
    pub async fn load(path: PathBuf, capacity: usize) -> Result<Self> {
        let entries = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::History(format!("reading {}: {e}", path.display())))?;
            let mut loaded: VecDeque<HistoryEntry> = serde_json::from_str(&contents)
                .map_err(|e| Error::History(format!("parsing {}: {e}", path.display())))?;
            loaded.truncate(capacity);
            info!(path = %path.display(), entries = loaded.len(), "history loaded");
            loaded
        } else {
            info!(path = %path.display(), "no history file, starting empty");
            VecDeque::new()
        };

        Ok(Self {
            path,
            capacity,
            entries: RwLock::new(entries),
        })
    }

    /// Append an entry (newest first), trim to capacity, persist.
    pub async fn append(&self, entry: HistoryEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.push_front(entry);
        entries.truncate(self.capacity);
        write_atomic(&self.path, &entries).await
    }

    /// Snapshot of all entries, newest first.
    pub async fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Write the log atomically: temp file in the same directory, then rename.
async fn write_atomic(path: &Path, entries: &VecDeque<HistoryEntry>) -> Result<()> {
    let json = serde_json::to_string_pretty(entries)
        .map_err(|e| Error::History(format!("serializing history: {e}")))?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let tmp_path = dir.join(format!(".history.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::History(format!("writing temp history file: {e}")))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::History(format!("renaming temp history file: {e}")))?;

    debug!(path = %path.display(), "history persisted");
    Ok(())
}
