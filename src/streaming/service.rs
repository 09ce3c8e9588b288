//! Service seams and the per-frame tick loop

use std::collections::HashSet;

use crate::core::error::StorageError;
use crate::streaming::archetype::Archetype;
use crate::streaming::fetch::Fetcher;
use crate::streaming::importer::{Content, ContentImporter};
use crate::streaming::selector::{SelectionPredicate, TilesSelector};
use crate::tiles::{Tile, TileIndex};

/// Where a tile's content comes from
pub trait ServiceType {
    fn name(&self) -> &str;

    /// URL of the content to load for `tile`, or `None` if it has none
    fn content_url(&self, tile: Tile<'_>) -> Option<String>;
}

/// Turns loaded content into whatever the host draws
pub trait TileRenderer {
    type Handle;

    fn materialize(&mut self, tile: Tile<'_>, content: &Content) -> Self::Handle;
    fn release(&mut self, tile: Tile<'_>, handle: Self::Handle);
}

/// What one tick did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    pub frame: u64,
    /// Fetches that finished since the previous tick
    pub completed: usize,
    pub selected: usize,
    pub frozen: usize,
    pub warmed: usize,
    pub heated: usize,
    pub warm_total: usize,
    pub hot_total: usize,
}

/// Drives one tileset through select, freeze, warm-up and heat-up each frame
pub struct TileService<S, R: TileRenderer> {
    archetype: Archetype<R::Handle>,
    service: S,
    renderer: R,
    selector: TilesSelector,
    selected: HashSet<TileIndex>,
    frame: u64,
}

impl<S: ServiceType, R: TileRenderer> TileService<S, R> {
    pub fn new(archetype: Archetype<R::Handle>, service: S, renderer: R) -> Self {
        Self {
            archetype,
            service,
            renderer,
            selector: TilesSelector::new(),
            selected: HashSet::new(),
            frame: 0,
        }
    }

    /// Run one frame.
    ///
    /// Selection is rebuilt from scratch: warm tiles that fell out of it are
    /// frozen, newly selected tiles are warmed, and tiles whose content
    /// finished loading are heated.
    pub fn tick<F: Fetcher>(
        &mut self,
        predicate: &impl SelectionPredicate,
        importer: &mut ContentImporter<F>,
    ) -> Result<TickStats, StorageError> {
        self.frame += 1;

        self.selected.clear();
        let root = self.archetype.storage().get(self.archetype.root())?;
        self.selector.select(&mut self.selected, root, predicate)?;

        let to_freeze: Vec<TileIndex> = self
            .archetype
            .warm_tiles()
            .iter()
            .map(|warm| warm.tile_index)
            .filter(|index| !self.selected.contains(index))
            .collect();
        let frozen = self.archetype.on_freeze(&to_freeze, importer, &mut self.renderer)?;

        let completed = importer.poll_completed();
        let mut heated = self.archetype.resume(&completed, importer, &mut self.renderer)?;

        let mut to_warm: Vec<TileIndex> = self
            .selected
            .iter()
            .copied()
            .filter(|index| !self.archetype.is_warm(*index))
            .collect();
        to_warm.sort_unstable();

        let hot_before = self.archetype.hot_tiles().len();
        let warmed = self.archetype.on_warm_up(&to_warm, &self.service, importer, &mut self.renderer)?;
        heated += self.archetype.hot_tiles().len() - hot_before;
        heated += self.archetype.retry_stalled(importer, &mut self.renderer)?;

        debug_assert!(self.archetype.check_links().is_ok(), "{:?}", self.archetype.check_links());

        let stats = TickStats {
            frame: self.frame,
            completed: completed.len(),
            selected: self.selected.len(),
            frozen,
            warmed,
            heated,
            warm_total: self.archetype.warm_tiles().len(),
            hot_total: self.archetype.hot_tiles().len(),
        };
        log::debug!(
            "[{}] frame {}: {} selected, +{} warm, +{} hot, -{} frozen ({} warm / {} hot)",
            self.service.name(),
            stats.frame,
            stats.selected,
            stats.warmed,
            stats.heated,
            stats.frozen,
            stats.warm_total,
            stats.hot_total
        );
        Ok(stats)
    }

    /// Freeze everything, releasing every handle and content reference
    pub fn reset<F: Fetcher>(&mut self, importer: &mut ContentImporter<F>) -> Result<usize, StorageError> {
        self.selected.clear();
        self.archetype.freeze_all(importer, &mut self.renderer)
    }

    pub fn archetype(&self) -> &Archetype<R::Handle> {
        &self.archetype
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    /// Tiles selected by the last tick
    pub fn selected(&self) -> &HashSet<TileIndex> {
        &self.selected
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::runtime::Handle;

    use crate::core::config::ImporterConfig;
    use crate::core::types::{DMat4, DVec3};
    use crate::math::{Aabb, Containment, Frustum};
    use crate::streaming::archetype::TileState;
    use crate::streaming::fetch::MemoryFetcher;
    use crate::streaming::ogc3d_service::Ogc3DTilesService;
    use crate::streaming::selector::PlanarArea;
    use crate::streaming::wms::WmsService;
    use crate::tileset::{ExplicitQuadTreeTilesBuilder, Ogc3DTilesHydrator};
    use crate::tiles::ColdStorage;

    #[derive(Default)]
    struct CountingRenderer {
        live: usize,
        released: usize,
    }

    impl TileRenderer for CountingRenderer {
        type Handle = usize;

        fn materialize(&mut self, _tile: Tile<'_>, content: &Content) -> usize {
            self.live += 1;
            content.len()
        }

        fn release(&mut self, _tile: Tile<'_>, _handle: usize) {
            self.live -= 1;
            self.released += 1;
        }
    }

    const TEMPLATE: &str = "wms?LAYERS={layers}&STYLES={styles}&BBOX={bbox}";

    /// Depth-1 quadtree over 0..2 served by WMS, with every GetMap URL preloaded
    fn wms_setup() -> (Arc<MemoryFetcher>, ContentImporter<MemoryFetcher>, TileService<WmsService, CountingRenderer>) {
        let mut storage = ColdStorage::new();
        let root = ExplicitQuadTreeTilesBuilder::new(Aabb::from_planar(0.0, 0.0, 2.0, 2.0), 1)
            .build(&mut storage)
            .unwrap();
        let wms = WmsService::new(TEMPLATE, "osm", "default");

        let fetcher = Arc::new(MemoryFetcher::new());
        for tile in storage.iter() {
            fetcher.insert(wms.content_url(tile).unwrap(), vec![0u8; 4]);
        }

        let importer = ContentImporter::with_handle(Arc::clone(&fetcher), ImporterConfig::default(), Handle::current());
        let service = TileService::new(Archetype::new(storage, root), wms, CountingRenderer::default());
        (fetcher, importer, service)
    }

    async fn settle(service: &TileService<WmsService, CountingRenderer>, importer: &ContentImporter<MemoryFetcher>) {
        for warm in service.archetype().warm_tiles() {
            let _ = importer.get_async(warm.content_key).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tick_warms_then_heats() {
        let (fetcher, mut importer, mut service) = wms_setup();
        let area = PlanarArea(Aabb::from_planar(0.2, 0.2, 0.8, 0.8));
        fetcher.pause();

        let stats = service.tick(&area, &mut importer).unwrap();
        assert_eq!(stats.frame, 1);
        assert_eq!(stats.selected, 2);
        assert_eq!(stats.warmed, 2);
        assert_eq!(stats.hot_total, 0);

        // Nothing new is fetched while the same tiles stay selected
        for _ in 0..3 {
            let stats = service.tick(&area, &mut importer).unwrap();
            assert_eq!(stats.warmed, 0);
        }
        assert_eq!(importer.fetches_issued(), 2);

        fetcher.resume();
        settle(&service, &importer).await;
        let stats = service.tick(&area, &mut importer).unwrap();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.heated, 2);
        assert_eq!(stats.hot_total, 2);
        assert_eq!(service.renderer().live, 2);
        assert_eq!(fetcher.request_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tick_freezes_deselected_tiles() {
        let (_fetcher, mut importer, mut service) = wms_setup();
        let left = PlanarArea(Aabb::from_planar(0.2, 0.2, 0.8, 1.8));
        let right = PlanarArea(Aabb::from_planar(1.2, 0.2, 1.8, 1.8));

        service.tick(&left, &mut importer).unwrap();
        settle(&service, &importer).await;
        service.tick(&left, &mut importer).unwrap();
        assert_eq!(service.archetype().hot_tiles().len(), 3);

        let stats = service.tick(&right, &mut importer).unwrap();
        assert_eq!(stats.frozen, 2);
        assert_eq!(stats.warmed, 2);
        assert_eq!(service.renderer().released, 2);
        for &index in service.selected() {
            assert_ne!(service.archetype().state(index), TileState::Cold);
        }

        // Root stayed selected and hot across the move
        assert!(service.archetype().is_hot(TileIndex(0)));
        assert_eq!(service.reset(&mut importer).unwrap(), 3);
        assert_eq!(service.renderer().live, 0);
        assert!(importer.is_empty() || importer.pending_count() == importer.len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tick_with_nothing_selected() {
        let (_fetcher, mut importer, mut service) = wms_setup();
        fn nothing(_: &Tile<'_>) -> Containment {
            Containment::Outside
        }
        let stats = service.tick(&nothing, &mut importer).unwrap();
        assert_eq!(stats, TickStats { frame: 1, ..Default::default() });
        assert_eq!(importer.fetches_issued(), 0);
    }

    /// Root over 0..20 x 0..20 with four 10x10 leaves:
    /// a = (0,0), b = (10,0), c = (0,10), d = (10,10)
    const FOUR_LEAVES: &str = r#"{
        "asset": { "version": "1.0" },
        "geometricError": 100,
        "root": {
            "boundingVolume": { "box": [10, 10, 0, 10, 0, 0, 0, 10, 0, 0, 0, 1] },
            "geometricError": 50,
            "refine": "REPLACE",
            "children": [
                { "boundingVolume": { "box": [5, 5, 0, 5, 0, 0, 0, 5, 0, 0, 0, 1] },
                  "geometricError": 0, "content": { "uri": "a.glb" } },
                { "boundingVolume": { "box": [15, 5, 0, 5, 0, 0, 0, 5, 0, 0, 0, 1] },
                  "geometricError": 0, "content": { "uri": "b.glb" } },
                { "boundingVolume": { "box": [5, 15, 0, 5, 0, 0, 0, 5, 0, 0, 0, 1] },
                  "geometricError": 0, "content": { "uri": "c.glb" } },
                { "boundingVolume": { "box": [15, 15, 0, 5, 0, 0, 0, 5, 0, 0, 0, 1] },
                  "geometricError": 0, "content": { "uri": "d.glb" } }
            ]
        }
    }"#;

    /// Records content URLs as they are materialized and released
    #[derive(Default)]
    struct UrlRenderer {
        materialized: Vec<String>,
        released: Vec<String>,
    }

    impl TileRenderer for UrlRenderer {
        type Handle = String;

        fn materialize(&mut self, _tile: Tile<'_>, content: &Content) -> String {
            self.materialized.push(content.url.clone());
            content.url.clone()
        }

        fn release(&mut self, _tile: Tile<'_>, handle: String) {
            self.released.push(handle);
        }
    }

    /// Orthographic camera looking straight down at the column `center_x`,
    /// 9 units wide and tall enough for the whole tileset
    fn top_down_frustum(center_x: f64) -> Frustum {
        let eye = DVec3::new(center_x, 10.0, 100.0);
        let view = DMat4::look_at_rh(eye, DVec3::new(center_x, 10.0, 0.0), DVec3::Y);
        let projection = DMat4::orthographic_rh(-4.5, 4.5, -15.0, 15.0, 0.1, 1000.0);
        Frustum::from_view_projection(&(projection * view))
    }

    struct TilesetSetup {
        fetcher: Arc<MemoryFetcher>,
        importer: ContentImporter<MemoryFetcher>,
        service: TileService<Ogc3DTilesService, UrlRenderer>,
        /// a, b, c, d
        leaves: [TileIndex; 4],
    }

    impl TilesetSetup {
        fn new() -> Self {
            let mut storage = ColdStorage::new();
            let info = Ogc3DTilesHydrator::new().hydrate_str(FOUR_LEAVES, &mut storage).unwrap();
            assert_eq!(info.stats.tiles, 5);

            let uris = ["a.glb", "b.glb", "c.glb", "d.glb"];
            let leaves = uris.map(|uri| {
                storage
                    .iter()
                    .find(|tile| tile.first_content_uri() == Some(uri))
                    .map(|tile| tile.index())
                    .unwrap()
            });

            let fetcher = Arc::new(MemoryFetcher::new());
            for uri in uris {
                fetcher.insert(uri, uri.as_bytes().to_vec());
            }
            let importer = ContentImporter::with_handle(Arc::clone(&fetcher), ImporterConfig::default(), Handle::current());
            let service = TileService::new(
                Archetype::new(storage, info.root),
                Ogc3DTilesService::new("tileset.json"),
                UrlRenderer::default(),
            );
            Self { fetcher, importer, service, leaves }
        }

        async fn settle(&self) {
            for warm in self.service.archetype().warm_tiles() {
                let _ = self.importer.get_async(warm.content_key).await;
            }
        }

        fn state(&self, leaf: usize) -> TileState {
            self.service.archetype().state(self.leaves[leaf])
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_frustum_warms_only_visible_leaves() {
        let mut setup = TilesetSetup::new();
        let [a, b, c, d] = [0, 1, 2, 3];
        let left = top_down_frustum(4.75);
        setup.fetcher.pause();

        for _ in 0..5 {
            setup.service.tick(&left, &mut setup.importer).unwrap();
        }

        // Root is selected but has no content, so only two tiles warm up
        assert_eq!(setup.service.selected().len(), 3);
        assert_eq!(setup.service.archetype().warm_tiles().len(), 2);
        assert_eq!(setup.state(a), TileState::Warm);
        assert_eq!(setup.state(c), TileState::Warm);
        assert_eq!(setup.state(b), TileState::Cold);
        assert_eq!(setup.state(d), TileState::Cold);
        assert_eq!(setup.importer.fetches_issued(), 2);

        setup.fetcher.resume();
        setup.settle().await;
        let stats = setup.service.tick(&left, &mut setup.importer).unwrap();
        assert_eq!(stats.heated, 2);
        assert_eq!(setup.state(a), TileState::Hot);
        assert_eq!(setup.state(c), TileState::Hot);

        let mut materialized = setup.service.renderer().materialized.clone();
        materialized.sort();
        assert_eq!(materialized, vec!["a.glb".to_string(), "c.glb".to_string()]);
        assert_eq!(setup.fetcher.request_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panning_frustum_freezes_and_relinks() {
        let mut setup = TilesetSetup::new();
        let [a, b, c, d] = [0, 1, 2, 3];
        let left = top_down_frustum(4.75);
        let right = top_down_frustum(15.25);

        setup.service.tick(&left, &mut setup.importer).unwrap();
        setup.settle().await;
        setup.service.tick(&left, &mut setup.importer).unwrap();
        assert_eq!(setup.service.archetype().hot_tiles().len(), 2);

        let stats = setup.service.tick(&right, &mut setup.importer).unwrap();
        assert_eq!(stats.frozen, 2);
        assert_eq!(stats.warmed, 2);
        assert_eq!(setup.state(a), TileState::Cold);
        assert_eq!(setup.state(c), TileState::Cold);
        setup.service.archetype().check_links().unwrap();

        let mut released = setup.service.renderer().released.clone();
        released.sort();
        assert_eq!(released, vec!["a.glb".to_string(), "c.glb".to_string()]);

        setup.settle().await;
        setup.service.tick(&right, &mut setup.importer).unwrap();
        assert_eq!(setup.state(b), TileState::Hot);
        assert_eq!(setup.state(d), TileState::Hot);
        setup.service.archetype().check_links().unwrap();

        // Panning back fetches the left leaves again since nothing is retained
        setup.service.tick(&left, &mut setup.importer).unwrap();
        assert_eq!(setup.importer.fetches_issued(), 6);
        assert_eq!(setup.service.reset(&mut setup.importer).unwrap(), 2);
        assert!(setup.service.archetype().warm_tiles().is_empty());
    }
}
