//! Structure-of-arrays store for every known tile
//!
//! Each tile is a row across parallel columns. Children and contents are not
//! stored per tile: every `add_tile` appends them to the tail of one shared
//! flat buffer and records a `(offset, count)` range. Local child `i` of a
//! tile lives at `children[offset + i]`.
//!
//! Ranges are packed back to back in insertion order and exactly cover each
//! flat buffer. The only mutation after insertion is
//! [`ColdStorage::replace_children`], which overwrites a range in place.

use std::collections::HashMap;
use std::fmt;

use crate::core::config::StorageConfig;
use crate::core::error::StorageError;
use crate::core::types::DMat4;
use super::bounding_volume::BoundingVolume;
use super::tile::{DepthFirst, Tile};

/// Arena handle of a tile inside one [`ColdStorage`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileIndex(pub u32);

impl TileIndex {
    /// Stand-in child index used before the real children exist
    pub const PLACEHOLDER: TileIndex = TileIndex(u32::MAX);

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Contiguous slice of a flat buffer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Range {
    pub offset: u32,
    pub count: u32,
}

impl Range {
    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn as_range(&self) -> std::ops::Range<usize> {
        let start = self.offset as usize;
        start..start + self.count as usize
    }
}

/// Whether a tile's content supplements or supersedes its parent's
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Refinement {
    #[default]
    Add,
    Replace,
}

impl Refinement {
    /// Parse a 3D Tiles `refine` value ("ADD" / "REPLACE", any case)
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("add") {
            Some(Refinement::Add)
        } else if value.eq_ignore_ascii_case("replace") {
            Some(Refinement::Replace)
        } else {
            None
        }
    }
}

/// How implicit children would be derived. Explicit children win when present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Subdivision {
    #[default]
    None,
    Quadtree,
    Octree,
}

/// Content reference supplied to [`ColdStorage::add_tile`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileContent<'a> {
    pub uri: &'a str,
    pub bounding_volume: Option<BoundingVolume>,
}

impl<'a> TileContent<'a> {
    pub fn new(uri: &'a str) -> Self {
        Self { uri, bounding_volume: None }
    }
}

/// Stored content reference: URI as a string table index
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileContentData {
    pub uri: u32,
    pub bounding_volume: Option<BoundingVolume>,
}

/// Flat tile store
#[derive(Debug, Clone)]
pub struct ColdStorage {
    pub(crate) bounding_volumes: Vec<BoundingVolume>,
    pub(crate) geometric_errors: Vec<f64>,
    pub(crate) refinements: Vec<Refinement>,
    pub(crate) subdivisions: Vec<Subdivision>,
    pub(crate) transforms: Vec<DMat4>,
    pub(crate) child_ranges: Vec<Range>,
    pub(crate) content_ranges: Vec<Range>,
    /// Flat child buffer shared by all tiles
    pub(crate) children: Vec<TileIndex>,
    /// Flat content buffer shared by all tiles
    pub(crate) contents: Vec<TileContentData>,
    uris: Vec<String>,
    uri_lookup: HashMap<String, u32>,
    max_tiles: usize,
}

impl ColdStorage {
    pub fn new() -> Self {
        Self::with_capacity(0, 0, 0)
    }

    /// Pre-size the columns and flat buffers
    pub fn with_capacity(tiles: usize, children: usize, contents: usize) -> Self {
        Self {
            bounding_volumes: Vec::with_capacity(tiles),
            geometric_errors: Vec::with_capacity(tiles),
            refinements: Vec::with_capacity(tiles),
            subdivisions: Vec::with_capacity(tiles),
            transforms: Vec::with_capacity(tiles),
            child_ranges: Vec::with_capacity(tiles),
            content_ranges: Vec::with_capacity(tiles),
            children: Vec::with_capacity(children),
            contents: Vec::with_capacity(contents),
            uris: Vec::new(),
            uri_lookup: HashMap::new(),
            max_tiles: u32::MAX as usize,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::with_capacity(config.initial_tiles, config.initial_children, config.initial_contents)
            .with_max_tiles(config.max_tiles)
    }

    /// Cap the number of tiles; appends beyond it fail with `CapacityExceeded`
    pub fn with_max_tiles(mut self, max_tiles: usize) -> Self {
        self.max_tiles = max_tiles.min(u32::MAX as usize);
        self
    }

    /// Reserve room for `tiles` more tiles and their flat buffer entries
    pub fn reserve(&mut self, tiles: usize, children: usize, contents: usize) {
        self.bounding_volumes.reserve(tiles);
        self.geometric_errors.reserve(tiles);
        self.refinements.reserve(tiles);
        self.subdivisions.reserve(tiles);
        self.transforms.reserve(tiles);
        self.child_ranges.reserve(tiles);
        self.content_ranges.reserve(tiles);
        self.children.reserve(children);
        self.contents.reserve(contents);
    }

    /// Append one tile.
    ///
    /// `children` is stored verbatim and may hold placeholders that are
    /// patched later with [`replace_children`](Self::replace_children).
    pub fn add_tile(
        &mut self,
        bounding_volume: BoundingVolume,
        geometric_error: f64,
        contents: &[TileContent<'_>],
        children: &[TileIndex],
        refine: Refinement,
        subdivision: Subdivision,
        transform: DMat4,
    ) -> Result<TileIndex, StorageError> {
        let index = self.len();
        if index >= self.max_tiles
            || self.children.len() + children.len() > u32::MAX as usize
            || self.contents.len() + contents.len() > u32::MAX as usize
        {
            return Err(StorageError::CapacityExceeded { max_tiles: self.max_tiles });
        }

        self.child_ranges.push(Range {
            offset: self.children.len() as u32,
            count: children.len() as u32,
        });
        self.children.extend_from_slice(children);

        self.content_ranges.push(Range {
            offset: self.contents.len() as u32,
            count: contents.len() as u32,
        });
        for content in contents {
            let uri = self.intern_uri(content.uri);
            self.contents.push(TileContentData {
                uri,
                bounding_volume: content.bounding_volume,
            });
        }

        self.bounding_volumes.push(bounding_volume);
        self.geometric_errors.push(geometric_error);
        self.refinements.push(refine);
        self.subdivisions.push(subdivision);
        self.transforms.push(transform);

        Ok(TileIndex(index as u32))
    }

    /// Overwrite a tile's child range in place.
    ///
    /// The replacement must have exactly as many entries as the tile was
    /// added with, so ranges stay packed.
    pub fn replace_children(&mut self, index: TileIndex, new_children: &[TileIndex]) -> Result<(), StorageError> {
        let range = self.child_range(index)?;
        if range.len() != new_children.len() {
            return Err(StorageError::ChildCountMismatch {
                tile: index,
                expected: range.len(),
                actual: new_children.len(),
            });
        }
        self.children[range.as_range()].copy_from_slice(new_children);
        Ok(())
    }

    /// Lightweight view of one tile
    pub fn get(&self, index: TileIndex) -> Result<Tile<'_>, StorageError> {
        self.check_index(index)?;
        Ok(Tile::new(self, index))
    }

    /// Same as [`get`](Self::get)
    pub fn tile(&self, index: TileIndex) -> Result<Tile<'_>, StorageError> {
        self.get(index)
    }

    /// First tile added, the root for every builder in this crate
    pub fn root(&self) -> Option<Tile<'_>> {
        self.get(TileIndex(0)).ok()
    }

    pub fn child_range(&self, index: TileIndex) -> Result<Range, StorageError> {
        self.check_index(index)?;
        Ok(self.child_ranges[index.as_usize()])
    }

    pub fn content_range(&self, index: TileIndex) -> Result<Range, StorageError> {
        self.check_index(index)?;
        Ok(self.content_ranges[index.as_usize()])
    }

    /// Number of tiles
    pub fn len(&self) -> usize {
        self.bounding_volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounding_volumes.is_empty()
    }

    pub fn max_tiles(&self) -> usize {
        self.max_tiles
    }

    /// Tiles that can still be added before `CapacityExceeded`
    pub fn remaining_capacity(&self) -> usize {
        self.max_tiles.saturating_sub(self.len())
    }

    /// Total entries in the flat child buffer
    pub fn children_len(&self) -> usize {
        self.children.len()
    }

    /// Total entries in the flat content buffer
    pub fn contents_len(&self) -> usize {
        self.contents.len()
    }

    /// Resolve a string table index
    pub fn uri(&self, id: u32) -> Option<&str> {
        self.uris.get(id as usize).map(String::as_str)
    }

    /// Number of distinct content URIs
    pub fn uri_count(&self) -> usize {
        self.uris.len()
    }

    /// All tiles in index order
    pub fn iter(&self) -> impl Iterator<Item = Tile<'_>> {
        (0..self.len() as u32).map(move |i| Tile::new(self, TileIndex(i)))
    }

    /// Pre-order traversal starting at `root`
    pub fn depth_first(&self, root: TileIndex) -> DepthFirst<'_> {
        DepthFirst::new(self, root)
    }

    /// Drop every tile; all previously returned indices become invalid
    pub fn clear(&mut self) {
        self.bounding_volumes.clear();
        self.geometric_errors.clear();
        self.refinements.clear();
        self.subdivisions.clear();
        self.transforms.clear();
        self.child_ranges.clear();
        self.content_ranges.clear();
        self.children.clear();
        self.contents.clear();
        self.uris.clear();
        self.uri_lookup.clear();
    }

    /// Clear and release the backing allocations
    pub fn dispose(&mut self) {
        let max_tiles = self.max_tiles;
        *self = Self::new().with_max_tiles(max_tiles);
    }

    fn check_index(&self, index: TileIndex) -> Result<(), StorageError> {
        if index.as_usize() < self.len() {
            Ok(())
        } else {
            Err(StorageError::InvalidIndex { index, len: self.len() })
        }
    }

    fn intern_uri(&mut self, uri: &str) -> u32 {
        if let Some(&id) = self.uri_lookup.get(uri) {
            return id;
        }
        let id = self.uris.len() as u32;
        self.uris.push(uri.to_string());
        self.uri_lookup.insert(uri.to_string(), id);
        id
    }
}

impl Default for ColdStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DVec3;
    use crate::math::Aabb;

    fn unit_volume() -> BoundingVolume {
        BoundingVolume::from_aabb(&Aabb::new(DVec3::ZERO, DVec3::ONE))
    }

    fn add(storage: &mut ColdStorage, contents: &[TileContent<'_>], children: &[TileIndex]) -> TileIndex {
        storage
            .add_tile(unit_volume(), 1.0, contents, children, Refinement::Add, Subdivision::None, DMat4::IDENTITY)
            .unwrap()
    }

    #[test]
    fn test_children_length_and_identity() {
        let mut storage = ColdStorage::new();
        let a = add(&mut storage, &[], &[]);
        let b = add(&mut storage, &[], &[]);
        let c = add(&mut storage, &[], &[]);
        let parent = add(&mut storage, &[], &[a, b, c]);

        let tile = storage.get(parent).unwrap();
        assert_eq!(tile.children().len(), 3);
        for (i, &child) in tile.children().iter().enumerate() {
            assert_eq!(tile.get_child(i).unwrap().index(), child);
        }
        assert_eq!(tile.children(), &[a, b, c]);
    }

    #[test]
    fn test_child_offsets_are_additive() {
        let mut storage = ColdStorage::new();
        let leaves: Vec<TileIndex> = (0..6).map(|_| add(&mut storage, &[], &[])).collect();

        let first = add(&mut storage, &[], &leaves[0..2]);
        let second = add(&mut storage, &[], &leaves[2..5]);
        let third = add(&mut storage, &[], &leaves[5..6]);

        assert_eq!(storage.child_range(first).unwrap(), Range { offset: 0, count: 2 });
        assert_eq!(storage.child_range(second).unwrap(), Range { offset: 2, count: 3 });
        assert_eq!(storage.child_range(third).unwrap(), Range { offset: 5, count: 1 });

        // offset * i would land on leaves[4] here
        assert_eq!(storage.get(second).unwrap().get_child(2).unwrap().index(), leaves[4]);
        assert_eq!(storage.get(third).unwrap().get_child(0).unwrap().index(), leaves[5]);
        assert_eq!(storage.children_len(), 6);
    }

    #[test]
    fn test_get_child_out_of_range() {
        let mut storage = ColdStorage::new();
        let leaf = add(&mut storage, &[], &[]);
        let parent = add(&mut storage, &[], &[leaf]);

        let tile = storage.get(parent).unwrap();
        assert!(tile.get_child(0).is_ok());
        assert_eq!(
            tile.get_child(1).unwrap_err(),
            StorageError::ChildIndexOutOfRange { tile: parent, child: 1, count: 1 }
        );
    }

    #[test]
    fn test_childless_tile_has_empty_slice() {
        let mut storage = ColdStorage::new();
        let leaf = add(&mut storage, &[], &[]);

        let tile = storage.get(leaf).unwrap();
        assert!(tile.children().is_empty());
        assert!(tile.is_leaf());
        assert!(tile.get_child(0).is_err());
    }

    #[test]
    fn test_content_and_children_ranges_independent() {
        let mut storage = ColdStorage::new();
        let leaf = add(&mut storage, &[TileContent::new("a.b3dm")], &[]);
        let two = add(&mut storage, &[TileContent::new("b.b3dm"), TileContent::new("c.b3dm")], &[leaf]);
        let none = add(&mut storage, &[], &[leaf, two]);
        let three = add(
            &mut storage,
            &[TileContent::new("d.b3dm"), TileContent::new("e.b3dm"), TileContent::new("a.b3dm")],
            &[],
        );

        assert_eq!(storage.content_range(leaf).unwrap(), Range { offset: 0, count: 1 });
        assert_eq!(storage.content_range(two).unwrap(), Range { offset: 1, count: 2 });
        assert_eq!(storage.content_range(none).unwrap(), Range { offset: 3, count: 0 });
        assert_eq!(storage.content_range(three).unwrap(), Range { offset: 3, count: 3 });

        assert_eq!(storage.child_range(leaf).unwrap(), Range { offset: 0, count: 0 });
        assert_eq!(storage.child_range(two).unwrap(), Range { offset: 0, count: 1 });
        assert_eq!(storage.child_range(none).unwrap(), Range { offset: 1, count: 2 });
        assert_eq!(storage.child_range(three).unwrap(), Range { offset: 3, count: 0 });

        let uris: Vec<&str> = storage.get(three).unwrap().content_uris().collect();
        assert_eq!(uris, ["d.b3dm", "e.b3dm", "a.b3dm"]);
        assert_eq!(storage.uri_count(), 5);
    }

    #[test]
    fn test_replace_children_in_place() {
        let mut storage = ColdStorage::new();
        let parent = add(&mut storage, &[], &[TileIndex::PLACEHOLDER, TileIndex::PLACEHOLDER]);
        let a = add(&mut storage, &[], &[]);
        let b = add(&mut storage, &[], &[]);

        assert!(storage.get(parent).unwrap().get_child(0).is_err());

        storage.replace_children(parent, &[a, b]).unwrap();
        assert_eq!(storage.get(parent).unwrap().children(), &[a, b]);
        assert_eq!(storage.children_len(), 2);

        assert_eq!(
            storage.replace_children(parent, &[a]),
            Err(StorageError::ChildCountMismatch { tile: parent, expected: 2, actual: 1 })
        );
    }

    #[test]
    fn test_invalid_index() {
        let storage = ColdStorage::new();
        assert_eq!(
            storage.get(TileIndex(0)).unwrap_err(),
            StorageError::InvalidIndex { index: TileIndex(0), len: 0 }
        );
        assert!(storage.root().is_none());
    }

    #[test]
    fn test_capacity_exceeded_leaves_no_partial_state() {
        let mut storage = ColdStorage::new().with_max_tiles(1);
        add(&mut storage, &[TileContent::new("x")], &[]);

        let result = storage.add_tile(
            unit_volume(), 1.0, &[TileContent::new("y")], &[TileIndex(0)],
            Refinement::Add, Subdivision::None, DMat4::IDENTITY,
        );
        assert_eq!(result, Err(StorageError::CapacityExceeded { max_tiles: 1 }));
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.children_len(), 0);
        assert_eq!(storage.contents_len(), 1);
        assert_eq!(storage.uri_count(), 1);
    }

    #[test]
    fn test_clear_invalidates_indices() {
        let mut storage = ColdStorage::new();
        let leaf = add(&mut storage, &[TileContent::new("a")], &[]);
        add(&mut storage, &[], &[leaf]);

        storage.clear();
        assert!(storage.is_empty());
        assert!(storage.get(leaf).is_err());
        assert_eq!(storage.children_len(), 0);
        assert_eq!(storage.uri_count(), 0);

        // Indices restart after a clear
        assert_eq!(add(&mut storage, &[], &[]), TileIndex(0));
    }

    #[test]
    fn test_dispose_keeps_limit() {
        let mut storage = ColdStorage::with_capacity(64, 64, 64).with_max_tiles(2);
        add(&mut storage, &[], &[]);
        storage.dispose();
        assert!(storage.is_empty());

        add(&mut storage, &[], &[]);
        add(&mut storage, &[], &[]);
        assert!(storage.add_tile(
            unit_volume(), 1.0, &[], &[], Refinement::Add, Subdivision::None, DMat4::IDENTITY,
        ).is_err());
    }

    #[test]
    fn test_refinement_parse() {
        assert_eq!(Refinement::parse("ADD"), Some(Refinement::Add));
        assert_eq!(Refinement::parse("replace"), Some(Refinement::Replace));
        assert_eq!(Refinement::parse("MERGE"), None);
    }
}
