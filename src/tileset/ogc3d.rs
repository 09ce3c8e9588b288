//! OGC 3D Tiles `tileset.json` hydration
//!
//! The document is parsed as a whole and every tile object is decoded from
//! its buffered JSON value, so the order of keys inside a tile never matters.
//! A tile that fails to decode is dropped on its own; its siblings and the
//! rest of the document carry on.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::core::error::HydrateError;
use crate::core::types::DMat4;
use crate::math::Aabb;
use crate::tiles::{
    BoundingVolume, ColdStorage, Refinement, Subdivision, TileContent, TileIndex,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TilesetJson {
    #[serde(default)]
    asset: AssetJson,
    #[serde(default)]
    geometric_error: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetJson {
    #[serde(default)]
    version: String,
    #[serde(default)]
    tileset_version: Option<String>,
}

/// One tile object; `children` is read straight from the buffered value
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TileJson {
    bounding_volume: BoundingVolumeJson,
    #[serde(default)]
    geometric_error: f64,
    #[serde(default)]
    refine: Option<String>,
    #[serde(default)]
    transform: Option<Vec<f64>>,
    #[serde(default)]
    content: Option<ContentJson>,
    #[serde(default)]
    contents: Vec<ContentJson>,
    #[serde(default)]
    implicit_tiling: Option<ImplicitTilingJson>,
}

#[derive(Debug, Default, Deserialize)]
struct BoundingVolumeJson {
    #[serde(rename = "box")]
    bbox: Option<Vec<f64>>,
    region: Option<Vec<f64>>,
    sphere: Option<Vec<f64>>,
}

impl BoundingVolumeJson {
    fn decode(&self) -> Option<BoundingVolume> {
        if let Some(values) = &self.bbox {
            BoundingVolume::from_box_array(values)
        } else if let Some(values) = &self.region {
            BoundingVolume::from_region_array(values)
        } else if let Some(values) = &self.sphere {
            BoundingVolume::from_sphere_array(values)
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentJson {
    uri: Option<String>,
    /// Pre-1.0 tilesets use `url`
    url: Option<String>,
    bounding_volume: Option<BoundingVolumeJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImplicitTilingJson {
    subdivision_scheme: String,
}

/// Counters collected while hydrating
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HydrateStats {
    /// Tiles written to storage
    pub tiles: usize,
    /// Tiles dropped because they failed to decode
    pub invalid: usize,
    /// Subtrees dropped by the area of interest
    pub pruned: usize,
}

/// Result of hydrating one tileset document
#[derive(Clone, Debug, PartialEq)]
pub struct TilesetInfo {
    /// `asset.version`
    pub version: String,
    pub tileset_version: Option<String>,
    /// Top-level geometric error
    pub geometric_error: f64,
    pub root: TileIndex,
    pub stats: HydrateStats,
}

/// Tile that passed validation, waiting to be written
struct DecodedTile<'v> {
    volume: BoundingVolume,
    world_transform: DMat4,
    geometric_error: f64,
    refine: Refinement,
    subdivision: Subdivision,
    contents: Vec<(String, Option<BoundingVolume>)>,
    children: &'v [Value],
}

/// Converts a 3D Tiles document into [`ColdStorage`] rows.
///
/// Transforms are accumulated down the hierarchy; each stored tile carries
/// its world transform. A tile without `refine` inherits its parent's value.
#[derive(Clone, Debug, Default)]
pub struct Ogc3DTilesHydrator {
    /// Tiles whose world box misses this area (X/Y only) are pruned with
    /// their whole subtree
    pub area_of_interest: Option<Aabb>,
    /// Refinement of a root tile that does not declare one
    pub default_refine: Refinement,
}

impl Ogc3DTilesHydrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_area_of_interest(mut self, area: Aabb) -> Self {
        self.area_of_interest = Some(area);
        self
    }

    /// Hydrate from a JSON string
    pub fn hydrate_str(&self, json: &str, storage: &mut ColdStorage) -> Result<TilesetInfo, HydrateError> {
        let document: Value = serde_json::from_str(json)?;
        self.hydrate_value(&document, storage)
    }

    /// Hydrate from a file on disk
    pub async fn hydrate_file(&self, path: &Path, storage: &mut ColdStorage) -> Result<TilesetInfo, HydrateError> {
        let json = tokio::fs::read_to_string(path).await?;
        self.hydrate_str(&json, storage)
    }

    /// Hydrate from an already parsed document
    pub fn hydrate_value(&self, document: &Value, storage: &mut ColdStorage) -> Result<TilesetInfo, HydrateError> {
        let tileset = TilesetJson::deserialize(document)?;
        let root = document
            .get("root")
            .ok_or_else(|| HydrateError::RootRejected("document has no root tile".to_string()))?;
        let mut stats = HydrateStats::default();

        let root = self
            .decode(root, &DMat4::IDENTITY, self.default_refine, &mut stats)
            .ok_or_else(|| HydrateError::RootRejected(
                "root tile is invalid or outside the area of interest".to_string(),
            ))?;
        let root = self.insert(storage, root, &mut stats)?;

        log::info!(
            "Hydrated 3D Tiles {} tileset: {} tiles ({} invalid, {} pruned)",
            tileset.asset.version, stats.tiles, stats.invalid, stats.pruned
        );

        Ok(TilesetInfo {
            version: tileset.asset.version,
            tileset_version: tileset.asset.tileset_version,
            geometric_error: tileset.geometric_error,
            root,
            stats,
        })
    }

    /// Write `tile`, then its surviving children, then patch its child range
    fn insert(
        &self,
        storage: &mut ColdStorage,
        tile: DecodedTile<'_>,
        stats: &mut HydrateStats,
    ) -> Result<TileIndex, HydrateError> {
        let children: Vec<DecodedTile<'_>> = tile
            .children
            .iter()
            .filter_map(|child| self.decode(child, &tile.world_transform, tile.refine, stats))
            .collect();

        let contents: Vec<TileContent<'_>> = tile
            .contents
            .iter()
            .map(|(uri, bounding_volume)| TileContent { uri: uri.as_str(), bounding_volume: *bounding_volume })
            .collect();

        let index = storage.add_tile(
            tile.volume,
            tile.geometric_error,
            &contents,
            &vec![TileIndex::PLACEHOLDER; children.len()],
            tile.refine,
            tile.subdivision,
            tile.world_transform,
        )?;
        stats.tiles += 1;

        let mut child_indices = Vec::with_capacity(children.len());
        for child in children {
            child_indices.push(self.insert(storage, child, stats)?);
        }
        storage.replace_children(index, &child_indices)?;

        Ok(index)
    }

    /// Validate one tile object; `None` means it is excluded
    fn decode<'v>(
        &self,
        value: &'v Value,
        parent_transform: &DMat4,
        parent_refine: Refinement,
        stats: &mut HydrateStats,
    ) -> Option<DecodedTile<'v>> {
        let tile = match TileJson::deserialize(value) {
            Ok(tile) => tile,
            Err(e) => {
                log::warn!("Skipping malformed tile: {}", e);
                stats.invalid += 1;
                return None;
            }
        };

        let Some(volume) = tile.bounding_volume.decode() else {
            log::warn!("Skipping tile with invalid bounding volume");
            stats.invalid += 1;
            return None;
        };

        let local_transform = match tile.transform.as_deref() {
            None => DMat4::IDENTITY,
            Some(values) if values.len() == 16 && values.iter().all(|v| v.is_finite()) => {
                DMat4::from_cols_slice(values)
            }
            Some(values) => {
                log::warn!("Skipping tile with invalid transform ({} values)", values.len());
                stats.invalid += 1;
                return None;
            }
        };
        let world_transform = *parent_transform * local_transform;

        if let Some(area) = &self.area_of_interest {
            if !volume.transformed(&world_transform).intersects_planar(area) {
                log::trace!("Pruned {} tile outside the area of interest", volume.kind());
                stats.pruned += 1;
                return None;
            }
        }

        let refine = match tile.refine.as_deref() {
            None => parent_refine,
            Some(value) => Refinement::parse(value).unwrap_or_else(|| {
                log::warn!("Unknown refine value {:?}, inheriting {:?}", value, parent_refine);
                parent_refine
            }),
        };

        let subdivision = match tile.implicit_tiling.as_ref().map(|t| t.subdivision_scheme.as_str()) {
            Some("QUADTREE") => Subdivision::Quadtree,
            Some("OCTREE") => Subdivision::Octree,
            _ => Subdivision::None,
        };

        let contents = tile
            .content
            .into_iter()
            .chain(tile.contents)
            .filter_map(|content| {
                let volume = content.bounding_volume.as_ref().and_then(BoundingVolumeJson::decode);
                match content.uri.or(content.url) {
                    Some(uri) => Some((uri, volume)),
                    None => {
                        log::warn!("Ignoring tile content without a uri");
                        None
                    }
                }
            })
            .collect();

        let children = value
            .get("children")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        Some(DecodedTile {
            volume,
            world_transform,
            geometric_error: tile.geometric_error,
            refine,
            subdivision,
            contents,
            children,
        })
    }
}
