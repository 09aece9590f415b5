//! Download session status types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Lifecycle of a download session.
///
/// `Queued → Downloading → {Completed | Failed | Cancelled | Paused}`.
/// `Paused` is re-enterable: a later fetch for the same key starts a fresh
/// session from zero. Terminal states release the key's session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    /// Session created, waiting for a concurrency slot.
    Queued,
    /// Transfer in progress.
    Downloading,
    /// Transfer stopped on request; restartable from zero.
    Paused,
    /// Transfer finished and the file was published.
    Completed,
    /// Transfer aborted by a network or storage fault.
    Failed,
    /// Cooperative cancellation observed.
    Cancelled,
}

impl DownloadState {
    /// Returns `true` once no further updates will be emitted for a session.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadState::Completed
                | DownloadState::Failed
                | DownloadState::Cancelled
                | DownloadState::Paused
        )
    }
}

/// Externally observable snapshot of a download session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadStatus {
    /// Source URL.
    pub url: String,
    /// Percent complete, 0-100. Stays 0 while the total length is unknown.
    pub progress: u8,
    /// Declared total length in bytes, 0 when unknown.
    pub total_bytes: u64,
    /// Bytes received so far.
    pub downloaded_bytes: u64,
    /// Current lifecycle state.
    pub state: DownloadState,
    /// Request headers the session was started with.
    pub headers: HashMap<String, String>,
    /// Destination file once resolved; set on `Completed`.
    pub file: Option<PathBuf>,
    /// Human-readable fault description; set on `Failed`.
    pub error: Option<String>,
}

impl DownloadStatus {
    /// A fresh `Queued` status for `url`.
    pub fn queued(url: impl Into<String>, headers: HashMap<String, String>) -> Self {
        Self {
            url: url.into(),
            progress: 0,
            total_bytes: 0,
            downloaded_bytes: 0,
            state: DownloadState::Queued,
            headers,
            file: None,
            error: None,
        }
    }

    /// A synthesized `Completed` status for a cache hit: no transfer ran,
    /// but the status still reflects the headers the caller asked with.
    pub fn completed(
        url: impl Into<String>,
        headers: HashMap<String, String>,
        file: PathBuf,
        len: u64,
    ) -> Self {
        Self {
            url: url.into(),
            progress: 100,
            total_bytes: len,
            downloaded_bytes: len,
            state: DownloadState::Completed,
            headers,
            file: Some(file),
            error: None,
        }
    }

    /// Returns `true` if the session finished successfully.
    pub fn is_successful(&self) -> bool {
        self.state == DownloadState::Completed
    }

    /// Returns `true` if the session ended in a fault.
    pub fn is_failed(&self) -> bool {
        self.state == DownloadState::Failed
    }

    /// The published file, if the session completed.
    pub fn file_or_none(&self) -> Option<&PathBuf> {
        self.file.as_ref()
    }

    pub(crate) fn with_progress(mut self, downloaded: u64, total: u64) -> Self {
        self.downloaded_bytes = downloaded;
        self.total_bytes = total;
        self.progress = percent(downloaded, total);
        self
    }

    pub(crate) fn with_state(mut self, state: DownloadState) -> Self {
        self.state = state;
        self
    }
}

/// Progress percent; 0 while the total length is unknown.
pub(crate) fn percent(downloaded: u64, total: u64) -> u8 {
    if total == 0 {
        0
    } else {
        ((downloaded.saturating_mul(100)) / total).min(100) as u8
    }
}
