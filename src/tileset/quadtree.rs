//! Explicit quadtree tiling for procedurally tiled sources (e.g. WMS)

use crate::core::error::StorageError;
use crate::core::types::DMat4;
use crate::math::Aabb;
use crate::tiles::{BoundingVolume, ColdStorage, Refinement, Subdivision, TileIndex};

/// Subdivides an area into a full quadtree of fixed depth.
///
/// Nodes are added top-down: a parent is appended with four placeholder
/// children, its subtrees are built, then the parent's range is patched.
#[derive(Clone, Debug)]
pub struct ExplicitQuadTreeTilesBuilder {
    /// Area covered by the root tile
    pub area: Aabb,
    /// Depth of the leaves (0 = root only)
    pub depth: u32,
    /// Geometric error of the root; halves at every level
    pub geometric_error: f64,
    pub refine: Refinement,
}

impl ExplicitQuadTreeTilesBuilder {
    pub fn new(area: Aabb, depth: u32) -> Self {
        let size = area.size();
        Self {
            area,
            depth,
            geometric_error: size.x.max(size.y),
            refine: Refinement::Replace,
        }
    }

    pub fn with_geometric_error(mut self, geometric_error: f64) -> Self {
        self.geometric_error = geometric_error;
        self
    }

    pub fn with_refinement(mut self, refine: Refinement) -> Self {
        self.refine = refine;
        self
    }

    /// Tiles in a full quadtree of `depth`: 4^0 + 4^1 + ... + 4^depth,
    /// or `None` if that does not fit in a `usize`
    pub fn tile_count(depth: u32) -> Option<usize> {
        (0..=depth).try_fold(0usize, |total, level| total.checked_add(4usize.checked_pow(level)?))
    }

    /// Append the whole tree to `storage`, returning the root index.
    ///
    /// Fails up front with `CapacityExceeded` when the tree does not fit,
    /// leaving `storage` untouched.
    pub fn build(&self, storage: &mut ColdStorage) -> Result<TileIndex, StorageError> {
        let tiles = Self::tile_count(self.depth)
            .filter(|&tiles| tiles <= storage.remaining_capacity())
            .ok_or(StorageError::CapacityExceeded { max_tiles: storage.max_tiles() })?;
        storage.reserve(tiles, tiles - 1, 0);

        let root = self.build_node(storage, self.area, 0, self.geometric_error)?;
        log::info!(
            "Built quadtree of depth {} ({} tiles) over {:?}..{:?}",
            self.depth, tiles, self.area.min, self.area.max
        );
        Ok(root)
    }

    fn build_node(
        &self,
        storage: &mut ColdStorage,
        area: Aabb,
        level: u32,
        geometric_error: f64,
    ) -> Result<TileIndex, StorageError> {
        let is_leaf = level >= self.depth;
        let (placeholders, subdivision): (&[TileIndex], _) = if is_leaf {
            (&[], Subdivision::None)
        } else {
            (&[TileIndex::PLACEHOLDER; 4], Subdivision::Quadtree)
        };

        let index = storage.add_tile(
            BoundingVolume::from_aabb(&area),
            geometric_error,
            &[],
            placeholders,
            self.refine,
            subdivision,
            DMat4::IDENTITY,
        )?;

        if !is_leaf {
            let mut children = [TileIndex::PLACEHOLDER; 4];
            for (quadrant, child) in children.iter_mut().enumerate() {
                *child = self.build_node(
                    storage,
                    area.child_quadrant(quadrant as u8),
                    level + 1,
                    geometric_error * 0.5,
                )?;
            }
            storage.replace_children(index, &children)?;
        }

        Ok(index)
    }
}
