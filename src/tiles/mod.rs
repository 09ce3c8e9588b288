//! Tile hierarchy storage

pub mod bounding_volume;
pub mod cold_storage;
pub mod tile;

pub use bounding_volume::BoundingVolume;
pub use cold_storage::{
    ColdStorage, TileIndex, Range, Refinement, Subdivision,
    TileContent, TileContentData,
};
pub use tile::{Tile, DepthFirst};
