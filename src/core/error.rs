//! Error types for Tilekit

use thiserror::Error;

use crate::tiles::cold_storage::TileIndex;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Hydrate(#[from] HydrateError),

    #[error(transparent)]
    Import(#[from] ImportError),
}

/// Failures raised by [`ColdStorage`](crate::tiles::ColdStorage).
///
/// These indicate a corrupted range table or a caller bug and are never
/// clamped or ignored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("tile index {index} is out of range (storage holds {len} tiles)")]
    InvalidIndex { index: TileIndex, len: usize },

    #[error("child {child} is out of range for tile {tile} with {count} children")]
    ChildIndexOutOfRange { tile: TileIndex, child: usize, count: usize },

    #[error("tile {tile} has {expected} child slots, got {actual} replacement indices")]
    ChildCountMismatch { tile: TileIndex, expected: usize, actual: usize },

    #[error("storage capacity of {max_tiles} tiles exceeded")]
    CapacityExceeded { max_tiles: usize },
}

/// Failures while populating a storage from a tileset description.
#[derive(Debug, Error)]
pub enum HydrateError {
    #[error("tileset JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("root tile rejected: {0}")]
    RootRejected(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failure of a single content fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported URL: {0}")]
    Unsupported(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Failures surfaced by the content importer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    #[error("fetch of {url} failed: {source}")]
    Fetch { url: String, source: FetchError },

    #[error("content {0} was evicted before it completed")]
    Evicted(String),

    #[error("unknown content key {0}")]
    UnknownKey(String),

    #[error("content decode failed: {0}")]
    Decode(String),
}
