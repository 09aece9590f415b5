//! Content-addressed disk store.
//!
//! Files live at `<root>/<namespace>/<key>.<ext>`. Namespaces separate video
//! assets from image assets so the two key spaces cannot collide. A file at a
//! final path exists iff a completed, verified write occurred: writers stream
//! into a sibling shadow path and rename into place only after the bytes are
//! flushed, so readers observe either the previous complete version, nothing,
//! or the new complete file.

use crate::error::Result;
use crate::key::CacheKey;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Namespace for cached animation containers.
pub const VIDEO_NAMESPACE: &str = "video";
/// Namespace for cached dynamic images.
pub const IMAGE_NAMESPACE: &str = "image";
/// Suffix appended to a final path to form its shadow (partial) path.
pub const SHADOW_SUFFIX: &str = "partial";

/// Lazily-initialized, content-addressed file namespace.
///
/// Holds no in-memory state beyond the root path; the directory invariant
/// (exists, writable) is re-established on demand by every `resolve`.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Create a store rooted at `root`. No I/O happens until first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the final path for `key` under `namespace`, (re)creating the
    /// directory if absent. Never fails due to a missing directory.
    pub async fn resolve(&self, namespace: &str, key: &CacheKey, ext: &str) -> Result<PathBuf> {
        let dir = self.root.join(namespace);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir.join(format!("{key}.{ext}")))
    }

    /// Returns `true` if a file exists at `path`.
    pub async fn exists(path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    /// Validity predicate for a stored file: present, non-zero length, and
    /// equal to `expected_len` when one is known. Anything else is a miss.
    pub async fn validate(path: &Path, expected_len: Option<u64>) -> Option<u64> {
        let meta = tokio::fs::metadata(path).await.ok()?;
        let len = meta.len();
        if len == 0 {
            return None;
        }
        match expected_len {
            Some(expected) if expected != len => None,
            _ => Some(len),
        }
    }

    /// The shadow (partial) path for a final path.
    pub fn shadow_path(final_path: &Path) -> PathBuf {
        let mut name = final_path.as_os_str().to_os_string();
        name.push(".");
        name.push(SHADOW_SUFFIX);
        PathBuf::from(name)
    }

    /// Atomically publish a fully-written shadow file to its final path.
    pub async fn publish(shadow: &Path, final_path: &Path) -> Result<()> {
        tokio::fs::rename(shadow, final_path).await?;
        debug!(path = %final_path.display(), "published cache file");
        Ok(())
    }

    /// Write `bytes` to `final_path` atomically: a pre-existing shadow from an
    /// aborted write is deleted, bytes go to a fresh shadow, are flushed and
    /// synced, then renamed into place.
    pub async fn write_atomic(&self, final_path: &Path, bytes: &[u8]) -> Result<()> {
        let shadow = Self::shadow_path(final_path);
        Self::remove_quiet(&shadow).await;
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&shadow).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        Self::publish(&shadow, final_path).await
    }

    /// Delete a file, tolerating it already being gone.
    pub async fn remove_quiet(path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file"),
        }
    }

    /// Recursively delete everything under the root. A file vanishing
    /// mid-walk is not an error; the walk simply continues.
    pub async fn clear(&self) -> Result<()> {
        let mut pending = vec![self.root.clone()];
        let mut dirs = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // Raced with a concurrent delete; nothing left to clear here.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                match entry.file_type().await {
                    Ok(ft) if ft.is_dir() => {
                        pending.push(path.clone());
                        dirs.push(path);
                    }
                    Ok(_) => Self::remove_quiet(&path).await,
                    Err(_) => {}
                }
            }
        }

        // Children first, then the (now empty) directories.
        for dir in dirs.into_iter().rev() {
            let _ = tokio::fs::remove_dir(&dir).await;
        }
        debug!(root = %self.root.display(), "cleared disk store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> CacheKey {
        CacheKey::from_descriptor(name)
    }

    #[tokio::test]
    async fn test_resolve_creates_namespace_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("anim"));

        let path = store.resolve(VIDEO_NAMESPACE, &key("a"), "mp4").await.unwrap();
        assert!(path.parent().unwrap().is_dir());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with(".mp4"));

        // Idempotent.
        let again = store.resolve(VIDEO_NAMESPACE, &key("a"), "mp4").await.unwrap();
        assert_eq!(path, again);
    }

    #[tokio::test]
    async fn test_validate_rejects_empty_and_mismatched() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        let path = store.resolve(VIDEO_NAMESPACE, &key("v"), "mp4").await.unwrap();

        assert!(DiskStore::validate(&path, None).await.is_none());

        tokio::fs::write(&path, b"").await.unwrap();
        assert!(DiskStore::validate(&path, None).await.is_none());

        tokio::fs::write(&path, b"12345").await.unwrap();
        assert_eq!(DiskStore::validate(&path, None).await, Some(5));
        assert_eq!(DiskStore::validate(&path, Some(5)).await, Some(5));
        assert!(DiskStore::validate(&path, Some(6)).await.is_none());
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_stale_shadow() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        let path = store.resolve(IMAGE_NAMESPACE, &key("i"), "png").await.unwrap();
        let shadow = DiskStore::shadow_path(&path);

        // Leftover from an aborted write.
        tokio::fs::write(&shadow, b"garbage").await.unwrap();

        store.write_atomic(&path, b"fresh").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"fresh");
        assert!(!DiskStore::exists(&shadow).await);
    }

    #[tokio::test]
    async fn test_shadow_path_shape() {
        let shadow = DiskStore::shadow_path(Path::new("/cache/video/abc.mp4"));
        assert_eq!(shadow, PathBuf::from("/cache/video/abc.mp4.partial"));
    }

    #[tokio::test]
    async fn test_clear_removes_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("anim"));
        let video = store.resolve(VIDEO_NAMESPACE, &key("v"), "mp4").await.unwrap();
        let image = store.resolve(IMAGE_NAMESPACE, &key("i"), "png").await.unwrap();
        tokio::fs::write(&video, b"v").await.unwrap();
        tokio::fs::write(&image, b"i").await.unwrap();

        store.clear().await.unwrap();
        assert!(!DiskStore::exists(&video).await);
        assert!(!DiskStore::exists(&image).await);
    }

    #[tokio::test]
    async fn test_clear_missing_root_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("never-created"));
        assert!(store.clear().await.is_ok());
    }
}
