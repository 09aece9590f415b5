//! Content-addressed cache keys.
//!
//! Keys are a 128-bit digest of the canonical UTF-8 descriptor, rendered as
//! 32 lowercase hex characters. Composite descriptors are built as one
//! canonical string before hashing; per-component hashes are never
//! concatenated.

use md5::{Digest, Md5};
use std::fmt;

/// Opaque, immutable cache key derived from a canonical source descriptor.
///
/// Equal descriptors always produce equal keys; distinct descriptors produce
/// distinct keys with overwhelming probability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive a key from a canonical descriptor string.
    pub fn from_descriptor(descriptor: &str) -> Self {
        let digest = Md5::digest(descriptor.as_bytes());
        Self(format!("{:x}", digest))
    }

    /// Key for a remote URL; the URL itself is the canonical descriptor.
    pub fn for_url(url: &str) -> Self {
        Self::from_descriptor(url)
    }

    /// Composite key for a dynamic image request: source plus the
    /// requested decode bounds.
    pub fn for_image(source: &str, width: u32, height: u32) -> Self {
        Self::from_descriptor(&format!(
            "key:{{path = {source} width = {width} height = {height}}}"
        ))
    }

    /// Key for an in-memory payload, addressed by its content.
    pub fn for_bytes(bytes: &[u8]) -> Self {
        let digest = Md5::digest(bytes);
        Self(format!("{:x}", digest))
    }

    /// The 32-character lowercase hex rendering.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
