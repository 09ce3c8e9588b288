//! Borrowed view of one tile row

use crate::core::error::StorageError;
use crate::core::types::DMat4;
use crate::math::Aabb;
use super::bounding_volume::BoundingVolume;
use super::cold_storage::{ColdStorage, Refinement, Subdivision, TileContentData, TileIndex};

/// A tile as seen through its storage. Cheap to copy; never clones buffers.
#[derive(Clone, Copy, Debug)]
pub struct Tile<'a> {
    storage: &'a ColdStorage,
    index: TileIndex,
}

impl<'a> Tile<'a> {
    /// `index` must already be validated against `storage`
    pub(crate) fn new(storage: &'a ColdStorage, index: TileIndex) -> Self {
        Self { storage, index }
    }

    pub fn index(&self) -> TileIndex {
        self.index
    }

    pub fn storage(&self) -> &'a ColdStorage {
        self.storage
    }

    pub fn bounding_volume(&self) -> &'a BoundingVolume {
        &self.storage.bounding_volumes[self.index.as_usize()]
    }

    pub fn geometric_error(&self) -> f64 {
        self.storage.geometric_errors[self.index.as_usize()]
    }

    pub fn refinement(&self) -> Refinement {
        self.storage.refinements[self.index.as_usize()]
    }

    pub fn subdivision(&self) -> Subdivision {
        self.storage.subdivisions[self.index.as_usize()]
    }

    pub fn transform(&self) -> &'a DMat4 {
        &self.storage.transforms[self.index.as_usize()]
    }

    /// Bounding volume in world space (transform applied)
    pub fn world_box(&self) -> Aabb {
        self.bounding_volume().transformed(self.transform())
    }

    /// Child indices; empty when the tile is a leaf
    pub fn children(&self) -> &'a [TileIndex] {
        let range = self.storage.child_ranges[self.index.as_usize()];
        &self.storage.children[range.as_range()]
    }

    pub fn child_count(&self) -> usize {
        self.storage.child_ranges[self.index.as_usize()].len()
    }

    pub fn is_leaf(&self) -> bool {
        self.child_count() == 0
    }

    /// Child `i`, resolved through the flat child buffer
    pub fn get_child(&self, i: usize) -> Result<Tile<'a>, StorageError> {
        let children = self.children();
        let child = children.get(i).ok_or(StorageError::ChildIndexOutOfRange {
            tile: self.index,
            child: i,
            count: children.len(),
        })?;
        self.storage.get(*child)
    }

    pub fn contents(&self) -> &'a [TileContentData] {
        let range = self.storage.content_ranges[self.index.as_usize()];
        &self.storage.contents[range.as_range()]
    }

    pub fn content_uris(self) -> impl Iterator<Item = &'a str> + 'a {
        let storage = self.storage;
        self.contents().iter().filter_map(move |content| storage.uri(content.uri))
    }

    /// URI of the first content, if any
    pub fn first_content_uri(&self) -> Option<&'a str> {
        self.content_uris().next()
    }
}

/// Pre-order traversal over a subtree.
///
/// Yields an error for a child index that does not resolve (for example an
/// unpatched placeholder) and keeps going with its siblings.
pub struct DepthFirst<'a> {
    storage: &'a ColdStorage,
    stack: Vec<TileIndex>,
}

impl<'a> DepthFirst<'a> {
    pub(crate) fn new(storage: &'a ColdStorage, root: TileIndex) -> Self {
        Self { storage, stack: vec![root] }
    }
}

impl<'a> Iterator for DepthFirst<'a> {
    type Item = Result<Tile<'a>, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.stack.pop()?;
        let tile = match self.storage.get(index) {
            Ok(tile) => tile,
            Err(e) => return Some(Err(e)),
        };
        // Reverse so the first child is visited first
        self.stack.extend(tile.children().iter().rev());
        Some(Ok(tile))
    }
}
