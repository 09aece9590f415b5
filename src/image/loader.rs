//! Dynamic image fetch-decode-cache pipeline.
//!
//! Resolution order mirrors the video path: memory cache, disk store, then
//! network. Encoded bytes are persisted to the image namespace; decoded
//! pixels live only in the weak memory cache. At most one fetch per
//! (source, dimensions) key runs at a time; a duplicate arriving mid-flight
//! resolves to `None` instead of piling a second request on the wire.

use crate::cache::disk::{DiskStore, IMAGE_NAMESPACE};
use crate::cache::memory::BoundedMemoryCache;
use crate::error::{AnimError, Result};
use crate::http::RemoteClient;
use crate::image::{DecodedImage, ImageDecoder};
use crate::key::CacheKey;
use bytes::BytesMut;
use futures::StreamExt;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Extension used for cached encoded images.
const IMAGE_EXT: &str = "png";

/// Fetches, decodes, and caches per-play dynamic images.
pub struct ImageLoader {
    client: Arc<dyn RemoteClient>,
    store: Arc<DiskStore>,
    memory: Arc<BoundedMemoryCache<DecodedImage>>,
    decoder: Arc<dyn ImageDecoder>,
    timeout: Duration,
    inflight: parking_lot::Mutex<HashSet<CacheKey>>,
    cancel: CancellationToken,
}

impl ImageLoader {
    /// Create a loader over `store`, decoding through `decoder`.
    pub fn new(
        client: Arc<dyn RemoteClient>,
        store: Arc<DiskStore>,
        memory: Arc<BoundedMemoryCache<DecodedImage>>,
        decoder: Arc<dyn ImageDecoder>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            store,
            memory,
            decoder,
            timeout,
            inflight: parking_lot::Mutex::new(HashSet::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// The shared memory cache of decoded images.
    pub fn memory(&self) -> &BoundedMemoryCache<DecodedImage> {
        &self.memory
    }

    /// Resolve `source` to a decoded image no larger than the given bounds.
    ///
    /// `Ok(None)` means the image is unavailable right now: undecodable
    /// bytes, a duplicate fetch already in flight, or shutdown. Transport
    /// and storage faults surface as errors.
    pub async fn fetch_image(
        &self,
        source: &str,
        width: u32,
        height: u32,
    ) -> Result<Option<Arc<DecodedImage>>> {
        let key = CacheKey::for_image(source, width, height);

        if let Some(image) = self.memory.get(&key) {
            debug!(%key, source, "image served from memory cache");
            return Ok(Some(image));
        }

        let path = self.store.resolve(IMAGE_NAMESPACE, &key, IMAGE_EXT).await?;
        if DiskStore::validate(&path, None).await.is_some() {
            let bytes = tokio::fs::read(&path).await?;
            match self.decoder.decode(&bytes, width, height) {
                Some(image) => {
                    let image = Arc::new(image);
                    self.memory.put(key.clone(), &image);
                    debug!(%key, source, "image served from disk store");
                    return Ok(Some(image));
                }
                None => {
                    // Stored bytes no longer decode; refetch below.
                    warn!(%key, source, "stored image undecodable, discarding");
                    DiskStore::remove_quiet(&path).await;
                }
            }
        }

        // Single-flight per key. Unlike video fetches there is no status
        // stream to attach to, so a duplicate resolves empty.
        {
            let mut inflight = self.inflight.lock();
            if !inflight.insert(key.clone()) {
                debug!(%key, source, "duplicate image fetch suppressed");
                return Ok(None);
            }
        }
        let _slot = InflightSlot {
            inflight: &self.inflight,
            key: &key,
        };

        let bytes = match tokio::time::timeout(self.timeout, self.download(source)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AnimError::Network(format!(
                    "image fetch timed out after {:?}",
                    self.timeout
                )))
            }
        };
        let bytes = match bytes {
            Some(bytes) => bytes,
            // Shutdown raced the transfer.
            None => return Ok(None),
        };

        self.store.write_atomic(&path, &bytes).await?;

        match self.decoder.decode(&bytes, width, height) {
            Some(image) => {
                let image = Arc::new(image);
                self.memory.put(key.clone(), &image);
                debug!(%key, source, len = bytes.len(), "image fetched and decoded");
                Ok(Some(image))
            }
            None => {
                warn!(%key, source, "fetched image undecodable");
                DiskStore::remove_quiet(&path).await;
                Ok(None)
            }
        }
    }

    /// Abort in-flight image transfers. Used at service shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Stream the full response body; `None` on cooperative cancellation.
    async fn download(&self, source: &str) -> Result<Option<Vec<u8>>> {
        let response = self.client.get(source, &HashMap::new()).await?;
        if !response.is_success() {
            return Err(AnimError::Network(format!("HTTP {}", response.status)));
        }

        let mut body = response.body;
        let mut buf = BytesMut::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(None),
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
        Ok(Some(buf.to_vec()))
    }
}

/// Releases the in-flight slot for a key on scope exit, fault or not.
struct InflightSlot<'a> {
    inflight: &'a parking_lot::Mutex<HashSet<CacheKey>>,
    key: &'a CacheKey,
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        self.inflight.lock().remove(self.key);
    }
}
