//! The engine facade.
//!
//! [`AnimEngine`] owns the disk store, both memory caches, the fetch
//! coordinator, the image loader, and the playback arbiter, and wires
//! source classification to resolution to playback. One engine per cache
//! root; everything is an explicit instance with an explicit lifecycle.

use crate::cache::disk::{DiskStore, VIDEO_NAMESPACE};
use crate::cache::memory::BoundedMemoryCache;
use crate::config::EngineConfig;
use crate::error::{AnimError, Result};
use crate::fetch::{DownloadState, DownloadStatus, FetchCoordinator, ResolvedFile, VIDEO_EXT};
use crate::http::RemoteClient;
use crate::image::{DecodedImage, ImageDecoder, ImageLoader};
use crate::key::CacheKey;
use crate::playback::{EventListener, FirstFrameCallback, PlaybackArbiter};
use crate::player::{Player, PlayerEvent};
use crate::source::{classify, SourceInput, SourceKind};
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Animation engine: resolves sources to local files and arbitrates playback.
pub struct AnimEngine {
    store: Arc<DiskStore>,
    fetcher: FetchCoordinator,
    images: ImageLoader,
    arbiter: Arc<PlaybackArbiter>,
    assets_root: Option<PathBuf>,
    /// Strong owner of the currently playing file's cache entry; the memory
    /// cache itself only holds weak handles.
    current: parking_lot::Mutex<Option<Arc<ResolvedFile>>>,
}

impl AnimEngine {
    /// Build an engine from configuration and its collaborators.
    pub fn new(
        config: EngineConfig,
        player: Arc<dyn Player>,
        client: Arc<dyn RemoteClient>,
        decoder: Arc<dyn ImageDecoder>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(DiskStore::new(config.cache_root.clone()));
        let video_memory = Arc::new(BoundedMemoryCache::new(config.fetch.memory_capacity));
        let image_memory = Arc::new(BoundedMemoryCache::new(config.fetch.memory_capacity));

        let fetcher = FetchCoordinator::new(
            client.clone(),
            store.clone(),
            video_memory,
            config.fetch.max_concurrent_downloads,
        );
        let images = ImageLoader::new(
            client,
            store.clone(),
            image_memory,
            decoder,
            config.fetch.image_fetch_timeout,
        );
        let arbiter = PlaybackArbiter::new(player, config.playback.clone());

        Ok(Self {
            store,
            fetcher,
            images,
            arbiter,
            assets_root: config.assets_root,
            current: parking_lot::Mutex::new(None),
        })
    }

    /// Establish the cache root directory. Idempotent; also re-established
    /// lazily by every store resolve.
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.store.root()).await?;
        info!(root = %self.store.root().display(), "engine initialized");
        Ok(())
    }

    /// Register the observer for forwarded player events.
    pub fn set_listener(&self, listener: EventListener) {
        self.arbiter.set_listener(listener);
    }

    /// Mark the owning view attached or detached.
    pub fn set_attached(&self, attached: bool) {
        self.arbiter.set_attached(attached);
    }

    /// Resolve `input` and play it.
    ///
    /// Remote URLs resolve through the cache and network first; local files
    /// and bundled assets play directly; raw bytes are persisted under a
    /// content-addressed key; `None` stops the active session.
    pub async fn load(
        &self,
        input: SourceInput,
        loop_count: i32,
        on_first_frame: Option<FirstFrameCallback>,
    ) -> Result<()> {
        match classify(&input) {
            SourceKind::None => {
                debug!("empty source, stopping playback");
                self.arbiter.stop();
                Ok(())
            }
            SourceKind::LocalFile(path) => self.play(path, loop_count, on_first_frame),
            SourceKind::AssetPath(name) => {
                let root = self.assets_root.as_ref().ok_or_else(|| {
                    AnimError::State(format!("no assets root configured for asset '{name}'"))
                })?;
                self.play(root.join(name), loop_count, on_first_frame)
            }
            SourceKind::RemoteUrl(url) => {
                let resolved = self.resolve_remote(&url).await?;
                let path = resolved.path.clone();
                *self.current.lock() = Some(resolved);
                self.play(path, loop_count, on_first_frame)
            }
            SourceKind::RawBytes(bytes) => {
                let resolved = self.persist_bytes(&bytes).await?;
                let path = resolved.path.clone();
                *self.current.lock() = Some(resolved);
                self.play(path, loop_count, on_first_frame)
            }
            SourceKind::ResourceHandle(handle) => Err(AnimError::State(format!(
                "resource handle {handle} must be resolved to a file by the embedder"
            ))),
        }
    }

    /// Stop the active playback session.
    pub fn stop(&self) {
        self.arbiter.stop();
    }

    /// Returns `true` while a playback session is active.
    pub fn is_running(&self) -> bool {
        self.arbiter.is_running()
    }

    /// Deliver an external player lifecycle event to the arbiter.
    pub fn handle_player_event(&self, event: PlayerEvent) {
        self.arbiter.handle_event(event);
    }

    /// Resolve a dynamic image; see [`ImageLoader::fetch_image`].
    pub async fn fetch_image(
        &self,
        source: &str,
        width: u32,
        height: u32,
    ) -> Result<Option<Arc<DecodedImage>>> {
        self.images.fetch_image(source, width, height).await
    }

    /// Pause the download of `url`; a later `load` restarts it from zero.
    pub fn pause_download(&self, url: &str) {
        self.fetcher.pause(&FetchCoordinator::key_for(url));
    }

    /// Cancel the download of `url`, optionally deleting the partial target.
    pub async fn cancel_download(&self, url: &str, delete_file: bool) {
        self.fetcher
            .cancel(&FetchCoordinator::key_for(url), delete_file)
            .await;
    }

    /// Latest status of the active download for `url`, if any.
    pub fn download_status(&self, url: &str) -> Option<DownloadStatus> {
        self.fetcher.status_of(&FetchCoordinator::key_for(url))
    }

    /// Latest statuses of all active downloads.
    pub fn all_download_statuses(&self) -> Vec<DownloadStatus> {
        self.fetcher.all_statuses()
    }

    /// Drop both memory caches and delete everything under the cache root.
    pub async fn clear_cache(&self) -> Result<()> {
        self.fetcher.memory().clear();
        self.images.memory().clear();
        self.store.clear().await?;
        info!("cache cleared");
        Ok(())
    }

    /// Cancel all in-flight transfers and tear down playback. The engine
    /// accepts no further requests.
    pub fn shutdown(&self) {
        self.fetcher.shutdown();
        self.images.shutdown();
        self.arbiter.destroy();
        *self.current.lock() = None;
        info!("engine shut down");
    }

    async fn resolve_remote(&self, url: &str) -> Result<Arc<ResolvedFile>> {
        let mut rx = self.fetcher.fetch(url, None, HashMap::new(), None).await?;
        let status = rx
            .wait_for(|status| status.state.is_terminal())
            .await
            .map_err(|_| AnimError::Internal("status stream closed mid-session".into()))?
            .clone();

        match status.state {
            DownloadState::Completed => {
                let path = status.file.ok_or_else(|| {
                    AnimError::Internal("completed download carried no file".into())
                })?;
                let key = FetchCoordinator::key_for(url);
                // Share the coordinator's entry when it is still alive.
                Ok(self.fetcher.memory().get(&key).unwrap_or_else(|| {
                    Arc::new(ResolvedFile {
                        path,
                        len: status.downloaded_bytes,
                    })
                }))
            }
            DownloadState::Failed => Err(AnimError::Network(
                status.error.unwrap_or_else(|| "download failed".into()),
            )),
            DownloadState::Cancelled | DownloadState::Paused => Err(AnimError::Cancelled),
            DownloadState::Queued | DownloadState::Downloading => Err(AnimError::Internal(
                "non-terminal state observed after terminal wait".into(),
            )),
        }
    }

    /// Persist in-memory media under a content-addressed key so the player
    /// reads from a file like every other source.
    async fn persist_bytes(&self, bytes: &Bytes) -> Result<Arc<ResolvedFile>> {
        let key = CacheKey::for_bytes(bytes);
        let path = self.store.resolve(VIDEO_NAMESPACE, &key, VIDEO_EXT).await?;
        if DiskStore::validate(&path, Some(bytes.len() as u64))
            .await
            .is_none()
        {
            self.store.write_atomic(&path, bytes).await?;
            debug!(%key, len = bytes.len(), "persisted in-memory source");
        }
        Ok(Arc::new(ResolvedFile {
            path,
            len: bytes.len() as u64,
        }))
    }

    /// Force-play with the re-entrancy guard absorbed: a suppressed request
    /// is a logged no-op, not a caller-visible fault.
    fn play(
        &self,
        file: PathBuf,
        loop_count: i32,
        on_first_frame: Option<FirstFrameCallback>,
    ) -> Result<()> {
        match self.arbiter.force_play(file, loop_count, on_first_frame) {
            Err(AnimError::ReentrancyRejected) => {
                debug!("force-play suppressed, keeping current session");
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::http::RemoteResponse;
    use crate::image::DefaultImageDecoder;
    use crate::player::MockPlayer;
    use async_trait::async_trait;
    use futures::StreamExt;

    struct NoNetwork;

    #[async_trait]
    impl RemoteClient for NoNetwork {
        async fn get(
            &self,
            _url: &str,
            _headers: &HashMap<String, String>,
        ) -> Result<RemoteResponse> {
            Err(AnimError::Network("no network in this test".into()))
        }
    }

    struct OneShot(Bytes);

    #[async_trait]
    impl RemoteClient for OneShot {
        async fn get(
            &self,
            _url: &str,
            _headers: &HashMap<String, String>,
        ) -> Result<RemoteResponse> {
            let payload = self.0.clone();
            Ok(RemoteResponse {
                status: 200,
                content_length: Some(payload.len() as u64),
                body: futures::stream::once(async move { Ok(payload) }).boxed(),
            })
        }
    }

    fn engine_with(
        player: MockPlayer,
        client: Arc<dyn RemoteClient>,
        root: &std::path::Path,
    ) -> AnimEngine {
        AnimEngine::new(
            EngineConfig::new(root),
            Arc::new(player),
            client,
            Arc::new(DefaultImageDecoder),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_none_source_stops_playback() {
        let dir = tempfile::tempdir().unwrap();
        let mut player = MockPlayer::new();
        player.expect_stop().times(1).return_const(());

        let engine = engine_with(player, Arc::new(NoNetwork), dir.path());
        engine.load(SourceInput::None, 1, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_local_file_plays_directly() {
        let dir = tempfile::tempdir().unwrap();
        let mut player = MockPlayer::new();
        player.expect_is_running().return_const(false);
        player.expect_set_loop().times(1).return_const(());
        player.expect_start().times(1).returning(|_| Ok(()));

        let engine = engine_with(player, Arc::new(NoNetwork), dir.path());
        engine
            .load(SourceInput::Path(PathBuf::from("/data/a.mp4")), 1, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_asset_without_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(MockPlayer::new(), Arc::new(NoNetwork), dir.path());
        let result = engine
            .load(SourceInput::Text("gift_box.mp4".into()), 1, None)
            .await;
        assert!(matches!(result, Err(AnimError::State(_))));
    }

    #[tokio::test]
    async fn test_resource_handle_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(MockPlayer::new(), Arc::new(NoNetwork), dir.path());
        let result = engine.load(SourceInput::Resource(7), 1, None).await;
        assert!(matches!(result, Err(AnimError::State(_))));
    }

    #[tokio::test]
    async fn test_raw_bytes_persist_and_play() {
        let dir = tempfile::tempdir().unwrap();
        let mut player = MockPlayer::new();
        player.expect_is_running().return_const(false);
        player.expect_set_loop().return_const(());
        player.expect_start().times(1).returning(|_| Ok(()));

        let engine = engine_with(player, Arc::new(NoNetwork), dir.path());
        let bytes = Bytes::from_static(b"fake container bytes");
        engine
            .load(SourceInput::Bytes(bytes.clone()), 1, None)
            .await
            .unwrap();

        let key = CacheKey::for_bytes(&bytes);
        let path = engine
            .store
            .resolve(VIDEO_NAMESPACE, &key, VIDEO_EXT)
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), bytes.as_ref());
    }

    #[tokio::test]
    async fn test_remote_url_resolves_then_plays() {
        let dir = tempfile::tempdir().unwrap();
        let mut player = MockPlayer::new();
        player.expect_is_running().return_const(false);
        player.expect_set_loop().return_const(());
        player.expect_start().times(1).returning(|_| Ok(()));

        let payload = Bytes::from_static(b"remote container");
        let engine = engine_with(player, Arc::new(OneShot(payload.clone())), dir.path());
        engine
            .load(
                SourceInput::Text("http://cdn.example.com/a.mp4".into()),
                1,
                None,
            )
            .await
            .unwrap();

        let current = engine.current.lock().clone().unwrap();
        assert_eq!(current.len, payload.len() as u64);
        assert_eq!(
            tokio::fs::read(&current.path).await.unwrap(),
            payload.as_ref()
        );
    }

    #[tokio::test]
    async fn test_remote_failure_surfaces_as_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(MockPlayer::new(), Arc::new(NoNetwork), dir.path());
        let result = engine
            .load(
                SourceInput::Text("http://cdn.example.com/a.mp4".into()),
                1,
                None,
            )
            .await;
        assert!(matches!(result, Err(AnimError::Network(_))));
    }

    #[tokio::test]
    async fn test_clear_cache_empties_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut player = MockPlayer::new();
        player.expect_is_running().return_const(false);
        player.expect_set_loop().return_const(());
        player.expect_start().returning(|_| Ok(()));

        let engine = engine_with(player, Arc::new(NoNetwork), dir.path());
        engine.init().await.unwrap();
        let bytes = Bytes::from_static(b"payload");
        engine.load(SourceInput::Bytes(bytes.clone()), 1, None).await.unwrap();

        engine.clear_cache().await.unwrap();
        let key = CacheKey::for_bytes(&bytes);
        let path = engine
            .store
            .resolve(VIDEO_NAMESPACE, &key, VIDEO_EXT)
            .await
            .unwrap();
        // resolve recreated the namespace directory, but the file is gone.
        assert!(!DiskStore::exists(&path).await);
    }
}
