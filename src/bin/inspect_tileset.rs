//! Tileset inspector: hydrates a 3D Tiles document and reports on it.
//!
//! Usage: cargo run --release --bin inspect_tileset -- <TILESET> [OPTIONS]
//!
//! Options:
//!   --aoi <minX,minY,maxX,maxY>     Prune tiles outside this planar area while hydrating
//!   --select <minX,minY,maxX,maxY>  Select tiles overlapping this area and stream their content
//!   --config <PATH>                 Tilekit JSON config (default: built-in defaults)
//!   --frames <N>                    Max ticks while streaming (default: 200)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tilekit::core::logging;
use tilekit::math::Aabb;
use tilekit::streaming::{
    Archetype, Content, ContentImporter, LocalFetcher, Ogc3DTilesService, PlanarArea, TileRenderer, TileService,
};
use tilekit::tileset::Ogc3DTilesHydrator;
use tilekit::{ColdStorage, Tile, TilekitConfig};

/// Keeps byte counts instead of GPU resources
#[derive(Default)]
struct ByteCounter {
    resident_bytes: usize,
    materialized: usize,
}

impl TileRenderer for ByteCounter {
    type Handle = usize;

    fn materialize(&mut self, _tile: Tile<'_>, content: &Content) -> usize {
        self.resident_bytes += content.len();
        self.materialized += 1;
        content.len()
    }

    fn release(&mut self, _tile: Tile<'_>, handle: usize) {
        self.resident_bytes -= handle;
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let Some(tileset_path) = args.get(1).filter(|arg| !arg.starts_with("--")).map(PathBuf::from) else {
        eprintln!("Usage: inspect_tileset <TILESET> [--aoi minX,minY,maxX,maxY] [--select minX,minY,maxX,maxY] [--config PATH] [--frames N]");
        std::process::exit(2);
    };
    let aoi = parse_area_arg(&args, "--aoi");
    let select = parse_area_arg(&args, "--select");
    let frames = parse_usize_arg(&args, "--frames").unwrap_or(200);
    let config = match parse_str_arg(&args, "--config") {
        Some(path) => TilekitConfig::load_sync(Path::new(&path))?,
        None => TilekitConfig::default(),
    };

    let mut hydrator = Ogc3DTilesHydrator::new();
    if let Some(area) = aoi {
        hydrator = hydrator.with_area_of_interest(area);
    }

    let mut storage = ColdStorage::from_config(&config.storage);
    let json = std::fs::read_to_string(&tileset_path)?;
    let start = Instant::now();
    let info = hydrator.hydrate_str(&json, &mut storage)?;

    println!("=== Tileset: {} ===", tileset_path.display());
    println!("Version:         {} ({})", info.version, info.tileset_version.as_deref().unwrap_or("-"));
    println!("Geometric error: {}", info.geometric_error);
    println!("Tiles:           {} ({} invalid, {} pruned)", info.stats.tiles, info.stats.invalid, info.stats.pruned);
    println!("Contents:        {} ({} unique URIs)", storage.contents_len(), storage.uri_count());
    println!("Hydrated in:     {:.2?}", start.elapsed());

    let mut per_depth: BTreeMap<usize, (usize, usize)> = BTreeMap::new();
    let mut depths = vec![0usize; storage.len()];
    for tile in storage.depth_first(info.root) {
        let tile = tile?;
        let depth = depths[tile.index().as_usize()];
        for child in tile.children() {
            if let Some(child_depth) = depths.get_mut(child.as_usize()) {
                *child_depth = depth + 1;
            }
        }
        let entry = per_depth.entry(depth).or_default();
        entry.0 += 1;
        if tile.is_leaf() {
            entry.1 += 1;
        }
    }
    println!();
    println!("Depth  Tiles  Leaves");
    for (depth, (tiles, leaves)) in &per_depth {
        println!("{:>5}  {:>5}  {:>6}", depth, tiles, leaves);
    }

    let Some(area) = select else {
        return Ok(());
    };

    let base_dir = tileset_path.parent().map(PathBuf::from).unwrap_or_default();
    let base_url = tileset_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let fetcher = Arc::new(LocalFetcher::new(base_dir));
    let mut importer = ContentImporter::new(fetcher, config.importer.clone())?;

    let archetype = Archetype::with_capacity(storage, info.root, config.service.warm_capacity);
    let mut service = TileService::new(archetype, Ogc3DTilesService::new(base_url), ByteCounter::default());
    let predicate = PlanarArea(area);

    println!();
    println!("Streaming tiles over {:?}..{:?}", area.min, area.max);
    let start = Instant::now();
    for _ in 0..frames {
        let stats = service.tick(&predicate, &mut importer)?;
        if importer.pending_count() == 0 && stats.warmed == 0 && stats.heated == 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    let archetype = service.archetype();
    println!("Selected:        {}", service.selected().len());
    println!("Warm / Hot:      {} / {}", archetype.warm_tiles().len(), archetype.hot_tiles().len());
    println!("Fetches issued:  {}", importer.fetches_issued());
    println!("Materialized:    {}", service.renderer().materialized);
    println!("Resident bytes:  {}", service.renderer().resident_bytes);
    println!("Streamed in:     {:.2?} ({} frames)", start.elapsed(), service.frame());

    service.reset(&mut importer)?;
    Ok(())
}

/// Parse `minX,minY,maxX,maxY`
fn parse_area_arg(args: &[String], flag: &str) -> Option<Aabb> {
    let values: Vec<f64> = parse_str_arg(args, flag)?
        .split(',')
        .map(|v| v.trim().parse().ok())
        .collect::<Option<_>>()?;
    match values.as_slice() {
        [min_x, min_y, max_x, max_y] => Some(Aabb::from_planar(*min_x, *min_y, *max_x, *max_y)),
        _ => None,
    }
}

fn parse_usize_arg(args: &[String], flag: &str) -> Option<usize> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
