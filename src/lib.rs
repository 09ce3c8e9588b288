//! Tilekit - tile streaming and caching for 3D Tiles and WMS datasets
//!
//! Tilesets are hydrated into a flat [`ColdStorage`](tiles::ColdStorage).
//! Each frame a [`TileService`](streaming::TileService) selects the tiles a
//! predicate accepts, warms them by importing their content and heats them
//! into renderer handles once the content has arrived.

pub mod core;
pub mod math;
pub mod tiles;
pub mod tileset;
pub mod streaming;

pub use crate::core::{Error, Result, TilekitConfig};
pub use crate::tiles::{ColdStorage, Tile, TileIndex};
