//! Single-flight, concurrency-bounded fetch coordination.
//!
//! `fetch` resolves a remote URL to a local cache file, composing the
//! in-memory cache, the disk store, in-flight deduplication, and the network,
//! and returns a replay-latest stream of session status updates. Observers
//! attaching after a transfer started immediately see the most recent status.
//!
//! At most one transfer per key is ever in flight; additional requesters for
//! the same key attach to the existing session's stream. A global semaphore
//! bounds simultaneous transfers, with tokio's FIFO permit queue providing
//! starvation-free promotion of `Queued` sessions.

pub mod status;

pub use status::{DownloadState, DownloadStatus};

use crate::cache::disk::{DiskStore, VIDEO_NAMESPACE};
use crate::cache::memory::BoundedMemoryCache;
use crate::error::{AnimError, Result};
use crate::http::RemoteClient;
use crate::key::CacheKey;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Extension used for cached animation containers.
pub(crate) const VIDEO_EXT: &str = "mp4";

/// A remote asset resolved to a local, fully-written cache file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    /// Path of the published cache file.
    pub path: PathBuf,
    /// File length in bytes.
    pub len: u64,
}

struct Session {
    tx: watch::Sender<DownloadStatus>,
    cancel: CancellationToken,
    pause_requested: Arc<AtomicBool>,
    destination: PathBuf,
}

/// Outcome of a transfer body that did not fault.
enum Outcome {
    Completed { len: u64 },
    Interrupted,
}

/// Coordinates remote fetches over a shared disk namespace.
///
/// Cheap to clone; clones share the session map, caches, and permit pool.
#[derive(Clone)]
pub struct FetchCoordinator {
    client: Arc<dyn RemoteClient>,
    store: Arc<DiskStore>,
    memory: Arc<BoundedMemoryCache<ResolvedFile>>,
    permits: Arc<Semaphore>,
    sessions: Arc<parking_lot::Mutex<HashMap<CacheKey, Session>>>,
}

impl FetchCoordinator {
    /// Create a coordinator over `store`, transferring through `client`,
    /// with at most `max_concurrent` simultaneous transfers.
    pub fn new(
        client: Arc<dyn RemoteClient>,
        store: Arc<DiskStore>,
        memory: Arc<BoundedMemoryCache<ResolvedFile>>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            client,
            store,
            memory,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            sessions: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        }
    }

    /// The cache key a URL resolves under.
    pub fn key_for(url: &str) -> CacheKey {
        CacheKey::for_url(url)
    }

    /// The shared memory cache of resolved files.
    pub fn memory(&self) -> &BoundedMemoryCache<ResolvedFile> {
        &self.memory
    }

    /// Resolve `url` to a local file, returning a replay-latest status stream.
    ///
    /// Resolution order: memory cache, disk store, an already-active session
    /// for the same key, then a new bounded network transfer. `destination`
    /// overrides the content-addressed default path; `expected_len`, when
    /// known, tightens the disk validity predicate.
    pub async fn fetch(
        &self,
        url: &str,
        destination: Option<PathBuf>,
        headers: HashMap<String, String>,
        expected_len: Option<u64>,
    ) -> Result<watch::Receiver<DownloadStatus>> {
        let key = Self::key_for(url);

        // 1. Memory hit: no disk or network touched.
        if let Some(resolved) = self.memory.get(&key) {
            debug!(%key, url, "fetch served from memory cache");
            return Ok(completed_receiver(url, headers, &resolved));
        }

        let dest = match destination {
            Some(path) => path,
            None => self.store.resolve(VIDEO_NAMESPACE, &key, VIDEO_EXT).await?,
        };

        // 2. Disk hit: populate memory and synthesize completion.
        if let Some(len) = DiskStore::validate(&dest, expected_len).await {
            let resolved = Arc::new(ResolvedFile {
                path: dest.clone(),
                len,
            });
            self.memory.put(key.clone(), &resolved);
            debug!(%key, url, "fetch served from disk store");
            return Ok(completed_receiver(url, headers, &resolved));
        }

        // 3/4. Single-flight: attach to an active session or create one.
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(&key) {
            debug!(%key, url, "attached to in-flight download session");
            return Ok(existing.tx.subscribe());
        }

        let (tx, rx) = watch::channel(DownloadStatus::queued(url, headers.clone()));
        let cancel = CancellationToken::new();
        let pause_requested = Arc::new(AtomicBool::new(false));
        sessions.insert(
            key.clone(),
            Session {
                tx: tx.clone(),
                cancel: cancel.clone(),
                pause_requested: pause_requested.clone(),
                destination: dest.clone(),
            },
        );
        drop(sessions);

        info!(%key, url, "download session queued");
        let coordinator = self.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            coordinator
                .run_session(key, url, dest, headers, tx, cancel, pause_requested)
                .await;
        });

        Ok(rx)
    }

    /// Pause the session for `key`: the transfer is cancelled and the session
    /// ends in `Paused`. A later `fetch` restarts from zero.
    pub fn pause(&self, key: &CacheKey) {
        let sessions = self.sessions.lock();
        if let Some(session) = sessions.get(key) {
            session.pause_requested.store(true, Ordering::SeqCst);
            session.cancel.cancel();
            info!(%key, "download paused");
        }
    }

    /// Cancel the session for `key`, optionally deleting its destination
    /// file. A session that never left `Queued` is cancelled without ever
    /// opening a connection.
    pub async fn cancel(&self, key: &CacheKey, delete_file: bool) {
        let destination = {
            let sessions = self.sessions.lock();
            sessions.get(key).map(|session| {
                session.cancel.cancel();
                session.destination.clone()
            })
        };
        if let Some(dest) = destination {
            if delete_file {
                DiskStore::remove_quiet(&dest).await;
            }
            info!(%key, delete_file, "download cancelled");
        }
    }

    /// Latest status of the active session for `key`, if any.
    pub fn status_of(&self, key: &CacheKey) -> Option<DownloadStatus> {
        self.sessions
            .lock()
            .get(key)
            .map(|session| session.tx.borrow().clone())
    }

    /// Latest statuses of all active sessions.
    pub fn all_statuses(&self) -> Vec<DownloadStatus> {
        self.sessions
            .lock()
            .values()
            .map(|session| session.tx.borrow().clone())
            .collect()
    }

    /// Cancel every active session. Used at service shutdown.
    pub fn shutdown(&self) {
        let sessions = self.sessions.lock();
        for session in sessions.values() {
            session.cancel.cancel();
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_session(
        self,
        key: CacheKey,
        url: String,
        dest: PathBuf,
        headers: HashMap<String, String>,
        tx: watch::Sender<DownloadStatus>,
        cancel: CancellationToken,
        pause_requested: Arc<AtomicBool>,
    ) {
        let interrupted_state = |paused: &AtomicBool| {
            if paused.load(Ordering::SeqCst) {
                DownloadState::Paused
            } else {
                DownloadState::Cancelled
            }
        };

        // Wait for a transfer slot; cancellation while queued never opens a
        // connection.
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                publish(&tx, |s| s.with_state(interrupted_state(&pause_requested)));
                self.sessions.lock().remove(&key);
                return;
            }
            permit = self.permits.clone().acquire_owned() => permit,
        };
        let _permit = match permit {
            Ok(permit) => permit,
            Err(_) => {
                publish(&tx, |s| {
                    s.with_state(DownloadState::Failed)
                        .with_error("coordinator shut down")
                });
                self.sessions.lock().remove(&key);
                return;
            }
        };

        publish(&tx, |s| s.with_state(DownloadState::Downloading));
        let result = self
            .transfer(&url, &dest, &headers, &tx, &cancel)
            .await;

        match result {
            Ok(Outcome::Completed { len }) => {
                let resolved = Arc::new(ResolvedFile {
                    path: dest.clone(),
                    len,
                });
                self.memory.put(key.clone(), &resolved);
                publish(&tx, |s| {
                    s.with_progress(len, len)
                        .with_state(DownloadState::Completed)
                        .with_file(dest.clone())
                });
                info!(%key, url, len, "download completed");
            }
            Ok(Outcome::Interrupted) => {
                let state = interrupted_state(&pause_requested);
                publish(&tx, |s| s.with_state(state));
                info!(%key, url, ?state, "download interrupted");
            }
            Err(e) => {
                DiskStore::remove_quiet(&DiskStore::shadow_path(&dest)).await;
                warn!(%key, url, error = %e, "download failed");
                publish(&tx, |s| {
                    s.with_state(DownloadState::Failed).with_error(e.to_string())
                });
            }
        }

        // Terminal state releases the key's slot; dropping the permit
        // promotes the next queued session.
        self.sessions.lock().remove(&key);
    }

    /// Stream the response body to the shadow path and publish atomically.
    /// Faults propagate as errors; the caller cleans up the shadow file.
    async fn transfer(
        &self,
        url: &str,
        dest: &PathBuf,
        headers: &HashMap<String, String>,
        tx: &watch::Sender<DownloadStatus>,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let response = self.client.get(url, headers).await?;
        if !response.is_success() {
            return Err(AnimError::Network(format!("HTTP {}", response.status)));
        }

        let total = response.content_length.unwrap_or(0);

        // Resume skip: a destination already matching the declared length is
        // complete; anything else at the final path is stale and removed.
        if DiskStore::exists(dest).await {
            if let Some(len) = DiskStore::validate(dest, response.content_length).await {
                if response.content_length.is_some() {
                    debug!(url, len, "destination already complete, skipping transfer");
                    return Ok(Outcome::Completed { len });
                }
            }
            DiskStore::remove_quiet(dest).await;
        }

        let shadow = DiskStore::shadow_path(dest);
        // A leftover shadow from a prior aborted write must not be appended to.
        DiskStore::remove_quiet(&shadow).await;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(&shadow).await?;
        let mut body = response.body;
        let mut downloaded: u64 = 0;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    drop(file);
                    DiskStore::remove_quiet(&shadow).await;
                    return Ok(Outcome::Interrupted);
                }
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    file.write_all(&bytes).await?;
                    downloaded += bytes.len() as u64;
                    publish(tx, |s| s.with_progress(downloaded, total));
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        DiskStore::publish(&shadow, dest).await?;
        Ok(Outcome::Completed { len: downloaded })
    }
}

impl DownloadStatus {
    fn with_file(mut self, file: PathBuf) -> Self {
        self.file = Some(file);
        self
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Publish an update unless the session already reached a terminal state;
/// once terminal, no further updates are ever emitted.
fn publish(
    tx: &watch::Sender<DownloadStatus>,
    update: impl FnOnce(DownloadStatus) -> DownloadStatus,
) {
    tx.send_if_modified(|status| {
        if status.state.is_terminal() {
            return false;
        }
        *status = update(status.clone());
        true
    });
}

/// A receiver whose stream is already at `Completed`; used for cache hits.
fn completed_receiver(
    url: &str,
    headers: HashMap<String, String>,
    resolved: &ResolvedFile,
) -> watch::Receiver<DownloadStatus> {
    let (_tx, rx) = watch::channel(DownloadStatus::completed(
        url,
        headers,
        resolved.path.clone(),
        resolved.len,
    ));
    rx
}
