//! Tile residency: selection, content import and the Warm/Hot lifecycle

pub mod fetch;
pub mod importer;
pub mod selector;
pub mod archetype;
pub mod service;
pub mod wms;
pub mod ogc3d_service;

pub use fetch::{Fetcher, LocalFetcher, MemoryFetcher, decode_data_uri};
pub use importer::{Content, ContentImporter, ContentKey, ImportState, normalize_url};
pub use selector::{PlanarArea, SelectionPredicate, TilesSelector};
pub use archetype::{Archetype, HotTile, TileState, WarmTile, swap_remove_and_relink};
pub use service::{ServiceType, TickStats, TileRenderer, TileService};
pub use wms::WmsService;
pub use ogc3d_service::{Ogc3DTilesService, resolve_url};
