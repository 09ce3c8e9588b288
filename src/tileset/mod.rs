//! Builders that populate a [`ColdStorage`](crate::tiles::ColdStorage)

pub mod quadtree;
pub mod ogc3d;

pub use quadtree::ExplicitQuadTreeTilesBuilder;
pub use ogc3d::{Ogc3DTilesHydrator, TilesetInfo, HydrateStats};
