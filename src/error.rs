//! # Animation Cache Error Types
//!
//! Error taxonomy for asset resolution, caching, and playback arbitration.

use thiserror::Error;

/// Errors that can occur while resolving, caching, or playing an asset.
#[derive(Error, Debug)]
pub enum AnimError {
    // ========================================================================
    // Transfer Errors
    // ========================================================================
    /// Connection failure, timeout, or non-success HTTP response.
    #[error("Network error: {0}")]
    Network(String),

    /// Disk write, rename, or permission failure.
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    // ========================================================================
    // Decode Errors
    // ========================================================================
    /// Payload is not a valid image or media container.
    #[error("Decode error: {0}")]
    Decode(String),

    // ========================================================================
    // Coordination Signals
    // ========================================================================
    /// Cooperative cancellation observed between I/O chunks.
    #[error("Operation cancelled")]
    Cancelled,

    /// A force-play or fetch request was suppressed by the single-flight
    /// or debounce guard. Expected steady-state behavior, not a fault.
    #[error("Request suppressed by re-entrancy guard")]
    ReentrancyRejected,

    /// Operation requested while the owning session or view is already
    /// destroyed, or before the service was initialized.
    #[error("Invalid state: {0}")]
    State(String),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AnimError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, AnimError::Network(_))
    }

    /// Returns `true` if this error is a cooperative-cancellation signal
    /// rather than a fault.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AnimError::Cancelled | AnimError::ReentrancyRejected)
    }
}

/// Result type for animation cache operations.
pub type Result<T> = std::result::Result<T, AnimError>;
