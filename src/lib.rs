//! # Animation Asset Engine
//!
//! Resolves animation assets and dynamic sub-resources (local files, bundled
//! assets, remote URLs, raw bytes) into locally readable files or decoded
//! images, and arbitrates overlapping playback requests against a single
//! external player.
//!
//! ## Overview
//!
//! This crate handles:
//! - Content-addressed caching: bounded in-memory LRU over a disk store
//! - Single-flight, concurrency-bounded remote fetches with replay-latest
//!   status streams
//! - Atomic write-then-publish so readers never observe partial files
//! - Dynamic image fetch/decode/downscale with per-key deduplication
//! - Playback arbitration: debounced force-play, deferred restart, loop
//!   teardown
//!
//! The frame decode/composite/render pipeline stays outside, behind the
//! [`player::Player`] trait; image decoding is pluggable via
//! [`image::ImageDecoder`].

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod http;
pub mod image;
pub mod key;
pub mod playback;
pub mod player;
pub mod service;
pub mod source;

pub use cache::{BoundedMemoryCache, DiskStore};
pub use config::{EngineConfig, FetchConfig, PlaybackConfig};
pub use error::{AnimError, Result};
pub use fetch::{DownloadState, DownloadStatus, FetchCoordinator, ResolvedFile};
pub use http::{HttpRemoteClient, RemoteClient, RemoteResponse};
pub use image::{DecodedImage, DefaultImageDecoder, ImageDecoder, ImageLoader};
pub use key::CacheKey;
pub use playback::{EventListener, FirstFrameCallback, Phase, PlaybackArbiter};
pub use player::{FailureKind, Player, PlayerEvent};
pub use service::AnimEngine;
pub use source::{classify, SourceInput, SourceKind};
