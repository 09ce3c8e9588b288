//! Tile selection against a spatial predicate

use std::collections::HashSet;

use crate::core::error::StorageError;
use crate::math::{Aabb, Containment, Frustum};
use crate::tiles::{Tile, TileIndex};

/// Decides whether a tile is of interest this frame
pub trait SelectionPredicate {
    fn classify(&self, tile: &Tile<'_>) -> Containment;
}

impl SelectionPredicate for Frustum {
    fn classify(&self, tile: &Tile<'_>) -> Containment {
        self.classify_aabb(&tile.world_box())
    }
}

/// Selects tiles whose planar footprint overlaps an area
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlanarArea(pub Aabb);

impl SelectionPredicate for PlanarArea {
    fn classify(&self, tile: &Tile<'_>) -> Containment {
        if tile.world_box().intersects_planar(&self.0) {
            Containment::Intersecting
        } else {
            Containment::Outside
        }
    }
}

/// Any closure works as a predicate (temporal filters, distance cutoffs...)
impl<P> SelectionPredicate for P
where
    P: Fn(&Tile<'_>) -> Containment,
{
    fn classify(&self, tile: &Tile<'_>) -> Containment {
        self(tile)
    }
}

/// Depth-first walk collecting every tile the predicate accepts.
///
/// A rejected tile prunes its whole subtree. The traversal stack is kept
/// between calls so steady-state selection does not allocate.
#[derive(Debug, Default)]
pub struct TilesSelector {
    stack: Vec<TileIndex>,
}

impl TilesSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the selected tiles under `root` (inclusive) to `output`
    pub fn select(
        &mut self,
        output: &mut HashSet<TileIndex>,
        root: Tile<'_>,
        predicate: &impl SelectionPredicate,
    ) -> Result<usize, StorageError> {
        let storage = root.storage();
        let before = output.len();

        self.stack.clear();
        self.stack.push(root.index());

        while let Some(index) = self.stack.pop() {
            let tile = storage.get(index)?;
            if predicate.classify(&tile) == Containment::Outside {
                continue;
            }
            output.insert(index);
            self.stack.extend(tile.children().iter().rev().copied());
        }

        Ok(output.len() - before)
    }
}
