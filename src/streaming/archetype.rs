//! Warm/Hot residency of one tileset
//!
//! A tile is Cold when it only exists in [`ColdStorage`]. Warming it takes a
//! reference on its content in the importer and appends a [`WarmTile`].
//! Once that content is ready the tile is heated: the renderer materializes
//! it and a [`HotTile`] pointing back at the warm entry is appended.
//!
//! Both lists are dense and removal is swap-remove, so every removal must
//! relink whatever entry moved into the vacated slot. The lookups map a tile
//! index to its slot in each list, and every hot entry stores the slot of
//! its warm entry.

use std::collections::{HashMap, HashSet};

use crate::core::error::StorageError;
use crate::streaming::fetch::Fetcher;
use crate::streaming::importer::{ContentImporter, ContentKey, ImportState};
use crate::streaming::service::{ServiceType, TileRenderer};
use crate::tiles::{ColdStorage, TileIndex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WarmTile {
    pub tile_index: TileIndex,
    pub content_key: ContentKey,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HotTile<H> {
    /// Slot of this tile's entry in the warm list
    pub warm_index: usize,
    pub handle: H,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileState {
    Cold,
    Warm,
    Hot,
}

/// Swap-remove `index` from `list`, reporting the element that moved into
/// its place (if any) together with its new slot
pub fn swap_remove_and_relink<T>(list: &mut Vec<T>, index: usize, mut relink: impl FnMut(&T, usize)) -> T {
    let removed = list.swap_remove(index);
    if let Some(moved) = list.get(index) {
        relink(moved, index);
    }
    removed
}

/// Residency state for a tileset, generic over the renderer's handle type
pub struct Archetype<H> {
    storage: ColdStorage,
    root: TileIndex,
    warm: Vec<WarmTile>,
    hot: Vec<HotTile<H>>,
    warm_lookup: HashMap<TileIndex, usize>,
    hot_lookup: HashMap<TileIndex, usize>,
    /// Warm tiles whose content is still loading, by content key
    waiting: HashMap<ContentKey, Vec<TileIndex>>,
    /// Warm tiles whose content failed to load
    stalled: HashSet<TileIndex>,
}

impl<H> Archetype<H> {
    pub fn new(storage: ColdStorage, root: TileIndex) -> Self {
        Self::with_capacity(storage, root, 0)
    }

    pub fn with_capacity(storage: ColdStorage, root: TileIndex, warm_capacity: usize) -> Self {
        Self {
            storage,
            root,
            warm: Vec::with_capacity(warm_capacity),
            hot: Vec::with_capacity(warm_capacity),
            warm_lookup: HashMap::with_capacity(warm_capacity),
            hot_lookup: HashMap::with_capacity(warm_capacity),
            waiting: HashMap::new(),
            stalled: HashSet::new(),
        }
    }

    /// Warm each Cold tile: import its content, then try to heat it.
    ///
    /// Tiles already Warm are left alone, as are tiles the service has no
    /// content URL for. Returns the number of tiles newly warmed.
    pub fn on_warm_up<S, F, R>(
        &mut self,
        indices: &[TileIndex],
        service: &S,
        importer: &mut ContentImporter<F>,
        renderer: &mut R,
    ) -> Result<usize, StorageError>
    where
        S: ServiceType,
        F: Fetcher,
        R: TileRenderer<Handle = H>,
    {
        // Resolve every tile before touching any state so a bad index
        // cannot leave earlier tiles warm without a continuation
        let mut candidates = Vec::with_capacity(indices.len());
        for &index in indices {
            if self.warm_lookup.contains_key(&index) {
                continue;
            }
            let tile = self.storage.get(index)?;
            match service.content_url(tile) {
                Some(url) => candidates.push((index, url)),
                None => log::trace!("Tile {} has no {} content; staying cold", index, service.name()),
            }
        }

        let mut warmed = Vec::with_capacity(candidates.len());
        for (index, url) in candidates {
            if self.warm_lookup.contains_key(&index) {
                continue;
            }
            let content_key = importer.import(&url);
            self.warm_lookup.insert(index, self.warm.len());
            self.warm.push(WarmTile { tile_index: index, content_key });
            warmed.push(index);
        }

        self.on_heat_up(&warmed, importer, renderer)?;
        Ok(warmed.len())
    }

    /// Materialize Warm tiles whose content is ready.
    ///
    /// Pending tiles are parked until their key completes; failed ones are
    /// marked stalled. Returns the number of tiles that became Hot.
    pub fn on_heat_up<F, R>(
        &mut self,
        indices: &[TileIndex],
        importer: &mut ContentImporter<F>,
        renderer: &mut R,
    ) -> Result<usize, StorageError>
    where
        F: Fetcher,
        R: TileRenderer<Handle = H>,
    {
        let mut heated = 0;

        for &index in indices {
            let Some(&warm_index) = self.warm_lookup.get(&index) else {
                continue;
            };
            if self.hot_lookup.contains_key(&index) {
                continue;
            }

            let key = self.warm[warm_index].content_key;
            match importer.state(key) {
                ImportState::Ready(content) => {
                    let handle = renderer.materialize(self.storage.get(index)?, &content);
                    self.hot_lookup.insert(index, self.hot.len());
                    self.hot.push(HotTile { warm_index, handle });
                    self.stalled.remove(&index);
                    heated += 1;
                }
                ImportState::Pending => {
                    self.stalled.remove(&index);
                    let waiters = self.waiting.entry(key).or_default();
                    if !waiters.contains(&index) {
                        waiters.push(index);
                    }
                }
                ImportState::Failed(_) => {
                    self.stalled.insert(index);
                }
                ImportState::Unknown => {
                    log::warn!("Tile {} references unknown content {}", index, key);
                    self.stalled.insert(index);
                }
            }
        }

        Ok(heated)
    }

    /// Heat the tiles that were waiting on `completed` keys
    pub fn resume<F, R>(
        &mut self,
        completed: &[ContentKey],
        importer: &mut ContentImporter<F>,
        renderer: &mut R,
    ) -> Result<usize, StorageError>
    where
        F: Fetcher,
        R: TileRenderer<Handle = H>,
    {
        let mut heated = 0;
        for key in completed {
            if let Some(tiles) = self.waiting.remove(key) {
                heated += self.on_heat_up(&tiles, importer, renderer)?;
            }
        }
        Ok(heated)
    }

    /// Ask the importer to retry stalled content and heat what is ready
    pub fn retry_stalled<F, R>(
        &mut self,
        importer: &mut ContentImporter<F>,
        renderer: &mut R,
    ) -> Result<usize, StorageError>
    where
        F: Fetcher,
        R: TileRenderer<Handle = H>,
    {
        if self.stalled.is_empty() {
            return Ok(0);
        }

        let mut stalled: Vec<TileIndex> = self.stalled.iter().copied().collect();
        stalled.sort_unstable();
        for index in &stalled {
            if let Some(&warm_index) = self.warm_lookup.get(index) {
                importer.retry(self.warm[warm_index].content_key);
            }
        }
        self.on_heat_up(&stalled, importer, renderer)
    }

    /// Release the renderer handles of Hot tiles; they stay Warm
    pub fn on_cooldown<R>(&mut self, indices: &[TileIndex], renderer: &mut R) -> Result<usize, StorageError>
    where
        R: TileRenderer<Handle = H>,
    {
        let mut cooled = 0;

        for &index in indices {
            let Some(hot_index) = self.hot_lookup.remove(&index) else {
                continue;
            };

            let warm = &self.warm;
            let hot_lookup = &mut self.hot_lookup;
            let removed = swap_remove_and_relink(&mut self.hot, hot_index, |moved, slot| {
                hot_lookup.insert(warm[moved.warm_index].tile_index, slot);
            });

            renderer.release(self.storage.get(index)?, removed.handle);
            cooled += 1;
        }

        Ok(cooled)
    }

    /// Return tiles to Cold, dropping their content references
    pub fn on_freeze<F, R>(
        &mut self,
        indices: &[TileIndex],
        importer: &mut ContentImporter<F>,
        renderer: &mut R,
    ) -> Result<usize, StorageError>
    where
        F: Fetcher,
        R: TileRenderer<Handle = H>,
    {
        self.on_cooldown(indices, renderer)?;
        let mut frozen = 0;

        for &index in indices {
            let Some(warm_index) = self.warm_lookup.remove(&index) else {
                continue;
            };

            let warm_lookup = &mut self.warm_lookup;
            let hot_lookup = &self.hot_lookup;
            let hot = &mut self.hot;
            let removed = swap_remove_and_relink(&mut self.warm, warm_index, |moved, slot| {
                warm_lookup.insert(moved.tile_index, slot);
                if let Some(&hot_index) = hot_lookup.get(&moved.tile_index) {
                    hot[hot_index].warm_index = slot;
                }
            });

            self.stalled.remove(&index);
            if let Some(waiters) = self.waiting.get_mut(&removed.content_key) {
                waiters.retain(|waiter| *waiter != index);
                if waiters.is_empty() {
                    self.waiting.remove(&removed.content_key);
                }
            }
            importer.try_evict(removed.content_key);
            frozen += 1;
        }

        Ok(frozen)
    }

    /// Freeze every Warm tile
    pub fn freeze_all<F, R>(&mut self, importer: &mut ContentImporter<F>, renderer: &mut R) -> Result<usize, StorageError>
    where
        F: Fetcher,
        R: TileRenderer<Handle = H>,
    {
        let indices: Vec<TileIndex> = self.warm.iter().map(|warm| warm.tile_index).collect();
        self.on_freeze(&indices, importer, renderer)
    }

    pub fn state(&self, index: TileIndex) -> TileState {
        if self.hot_lookup.contains_key(&index) {
            TileState::Hot
        } else if self.warm_lookup.contains_key(&index) {
            TileState::Warm
        } else {
            TileState::Cold
        }
    }

    /// Warm includes Hot
    pub fn is_warm(&self, index: TileIndex) -> bool {
        self.warm_lookup.contains_key(&index)
    }

    pub fn is_hot(&self, index: TileIndex) -> bool {
        self.hot_lookup.contains_key(&index)
    }

    pub fn is_stalled(&self, index: TileIndex) -> bool {
        self.stalled.contains(&index)
    }

    pub fn warm_tiles(&self) -> &[WarmTile] {
        &self.warm
    }

    pub fn hot_tiles(&self) -> &[HotTile<H>] {
        &self.hot
    }

    pub fn warm_index_of(&self, index: TileIndex) -> Option<usize> {
        self.warm_lookup.get(&index).copied()
    }

    pub fn hot_index_of(&self, index: TileIndex) -> Option<usize> {
        self.hot_lookup.get(&index).copied()
    }

    /// Renderer handle of a Hot tile
    pub fn handle(&self, index: TileIndex) -> Option<&H> {
        self.hot_lookup.get(&index).map(|&slot| &self.hot[slot].handle)
    }

    /// Tiles waiting on content still in flight
    pub fn waiting_count(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }

    pub fn storage(&self) -> &ColdStorage {
        &self.storage
    }

    /// Mutable storage, only while no tile is resident
    pub fn storage_mut(&mut self) -> Option<&mut ColdStorage> {
        if self.warm.is_empty() { Some(&mut self.storage) } else { None }
    }

    pub fn root(&self) -> TileIndex {
        self.root
    }

    /// Verify the cross-links between both lists and their lookups
    pub fn check_links(&self) -> Result<(), String> {
        if self.warm_lookup.len() != self.warm.len() {
            return Err(format!("warm lookup has {} entries for {} warm tiles", self.warm_lookup.len(), self.warm.len()));
        }
        if self.hot_lookup.len() != self.hot.len() {
            return Err(format!("hot lookup has {} entries for {} hot tiles", self.hot_lookup.len(), self.hot.len()));
        }

        for (slot, warm) in self.warm.iter().enumerate() {
            if self.warm_lookup.get(&warm.tile_index) != Some(&slot) {
                return Err(format!("warm slot {} ({}) is not in the lookup", slot, warm.tile_index));
            }
        }

        for (slot, hot) in self.hot.iter().enumerate() {
            let warm = self
                .warm
                .get(hot.warm_index)
                .ok_or_else(|| format!("hot slot {} points past the warm list ({})", slot, hot.warm_index))?;
            if self.hot_lookup.get(&warm.tile_index) != Some(&slot) {
                return Err(format!("hot slot {} links to warm {} ({}) which maps elsewhere", slot, hot.warm_index, warm.tile_index));
            }
        }

        Ok(())
    }
}
