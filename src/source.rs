//! Source classification.
//!
//! Maps an opaque caller-supplied input onto the kind of asset it names.
//! Classification inspects the input only; it performs no network or disk
//! writes (a filesystem existence probe is used as a tiebreak for bare
//! path-like strings, matching how callers hand over already-downloaded
//! files).

use bytes::Bytes;
use std::path::{Path, PathBuf};
use url::Url;

/// Opaque input accepted by [`crate::service::AnimEngine::load`].
#[derive(Debug, Clone)]
pub enum SourceInput {
    /// An explicit filesystem path.
    Path(PathBuf),
    /// A string that may be a URL, a file path, or a bundled asset name.
    Text(String),
    /// Raw media bytes held in memory.
    Bytes(Bytes),
    /// An opaque platform resource handle.
    Resource(u32),
    /// Nothing to play; an active session should stop.
    None,
}

/// The classified kind of a source input.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    /// A readable local file.
    LocalFile(PathBuf),
    /// A remote `http`/`https` URL to resolve through the cache.
    RemoteUrl(String),
    /// A bundled asset path, resolved against the configured assets root.
    AssetPath(String),
    /// Raw media bytes.
    RawBytes(Bytes),
    /// An opaque platform resource handle.
    ResourceHandle(u32),
    /// No source.
    None,
}

/// Classify an opaque input into its source kind.
pub fn classify(input: &SourceInput) -> SourceKind {
    match input {
        SourceInput::Path(path) => SourceKind::LocalFile(path.clone()),
        SourceInput::Bytes(bytes) => SourceKind::RawBytes(bytes.clone()),
        SourceInput::Resource(handle) => SourceKind::ResourceHandle(*handle),
        SourceInput::None => SourceKind::None,
        SourceInput::Text(text) => classify_text(text),
    }
}

fn classify_text(text: &str) -> SourceKind {
    if text.is_empty() {
        return SourceKind::None;
    }
    if is_url(text) {
        return SourceKind::RemoteUrl(text.to_string());
    }
    if let Some(path) = as_file_path(text) {
        return SourceKind::LocalFile(path);
    }
    SourceKind::AssetPath(text.to_string())
}

/// Returns `true` for `http`/`https` URLs.
pub fn is_url(text: &str) -> bool {
    match Url::parse(text) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// Interpret a bare string as a local file path when it carries a `file`
/// scheme, is absolute, or names an existing file.
fn as_file_path(text: &str) -> Option<PathBuf> {
    if let Ok(url) = Url::parse(text) {
        if url.scheme() == "file" {
            return url.to_file_path().ok();
        }
        // Any other scheme is not a plain path.
        if !url.cannot_be_a_base() {
            return None;
        }
    }
    let path = Path::new(text);
    if path.is_absolute() || path.exists() {
        Some(path.to_path_buf())
    } else {
        None
    }
}
