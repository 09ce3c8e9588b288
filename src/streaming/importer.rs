//! Deduplicated, reference-counted content import
//!
//! Every URL maps to one [`ContentKey`]. The first `import` of a key spawns a
//! fetch on the tokio runtime; later imports only bump the reference count.
//! Finished fetches are reported back over a channel and drained on the
//! caller's thread by [`ContentImporter::poll_completed`], so the importer's
//! own bookkeeping is never touched from worker threads.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::{Handle, Runtime};
use tokio::sync::{mpsc, watch, Semaphore};

use crate::core::config::ImporterConfig;
use crate::core::error::{Error, FetchError, ImportError};
use crate::streaming::fetch::Fetcher;

/// Stable handle for one piece of content, derived from its normalized URL
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey(pub u64);

impl ContentKey {
    pub fn from_url(url: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        normalize_url(url).hash(&mut hasher);
        Self(hasher.finish())
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Canonical form used for keying: trimmed, fragment dropped, scheme and
/// host lowercased. Paths and queries are case sensitive and kept as is.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("data:") {
        return url.to_string();
    }
    let url = url.split('#').next().unwrap_or(url);

    match url.find("://") {
        Some(scheme_end) => {
            let authority_start = scheme_end + 3;
            let authority_end = url[authority_start..]
                .find(['/', '?'])
                .map_or(url.len(), |i| authority_start + i);
            format!(
                "{}{}{}",
                url[..authority_start].to_ascii_lowercase(),
                url[authority_start..authority_end].to_ascii_lowercase(),
                &url[authority_end..]
            )
        }
        None => url.to_string(),
    }
}

/// A fetched payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Content {
    pub url: String,
    pub bytes: Vec<u8>,
}

impl Content {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode the payload as an image (WMS tiles, textures)
    pub fn decode_image(&self) -> Result<image::RgbaImage, ImportError> {
        image::load_from_memory(&self.bytes)
            .map(|image| image.to_rgba8())
            .map_err(|e| ImportError::Decode(format!("{}: {}", self.url, e)))
    }
}

/// Import status of a key
#[derive(Clone, Debug)]
pub enum ImportState {
    /// Never imported, or already freed
    Unknown,
    Pending,
    Ready(Arc<Content>),
    Failed(ImportError),
}

impl ImportState {
    pub fn is_pending(&self) -> bool {
        matches!(self, ImportState::Pending)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ImportState::Ready(_))
    }
}

struct Entry {
    /// URL as first imported; this is what gets fetched
    url: String,
    ref_count: u32,
    state: ImportState,
    /// Published by the fetch task so async waiters do not depend on polling
    watch: Arc<watch::Sender<ImportState>>,
    failed_at: Option<Instant>,
    /// Bumped on retry; completions from older fetches are dropped
    generation: u32,
}

struct Completion {
    key: ContentKey,
    generation: u32,
    result: Result<Arc<Content>, ImportError>,
}

/// Shared, deduplicated content loader
pub struct ContentImporter<F: Fetcher> {
    fetcher: Arc<F>,
    config: ImporterConfig,
    handle: Handle,
    runtime: Option<Runtime>,
    permits: Arc<Semaphore>,
    entries: HashMap<ContentKey, Entry>,
    /// Unreferenced finished entries, oldest first
    retained: VecDeque<ContentKey>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    fetches_issued: u64,
}

impl<F: Fetcher> ContentImporter<F> {
    /// Create an importer with its own multi-threaded runtime
    pub fn new(fetcher: Arc<F>, config: ImporterConfig) -> Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("tilekit-import")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self::build(fetcher, config, handle, Some(runtime)))
    }

    /// Create an importer that spawns onto an existing runtime
    pub fn with_handle(fetcher: Arc<F>, config: ImporterConfig, handle: Handle) -> Self {
        Self::build(fetcher, config, handle, None)
    }

    fn build(fetcher: Arc<F>, config: ImporterConfig, handle: Handle, runtime: Option<Runtime>) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            fetcher,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            handle,
            runtime,
            entries: HashMap::new(),
            retained: VecDeque::new(),
            completion_tx,
            completion_rx,
            fetches_issued: 0,
        }
    }

    /// Take a reference on `url`, starting its fetch if nobody holds it yet
    pub fn import(&mut self, url: &str) -> ContentKey {
        let key = ContentKey::from_url(url);

        if let Some(entry) = self.entries.get_mut(&key) {
            if entry.ref_count == 0 {
                self.retained.retain(|retained| *retained != key);
            }
            entry.ref_count += 1;
            return key;
        }

        let (sender, _) = watch::channel(ImportState::Pending);
        let watch = Arc::new(sender);
        let url = url.trim().to_string();
        self.entries.insert(
            key,
            Entry {
                url: url.clone(),
                ref_count: 1,
                state: ImportState::Pending,
                watch: Arc::clone(&watch),
                failed_at: None,
                generation: 0,
            },
        );
        self.spawn_fetch(key, url, 0, watch);
        key
    }

    fn spawn_fetch(&mut self, key: ContentKey, url: String, generation: u32, watch: Arc<watch::Sender<ImportState>>) {
        let fetcher = Arc::clone(&self.fetcher);
        let permits = Arc::clone(&self.permits);
        let completion_tx = self.completion_tx.clone();
        self.fetches_issued += 1;
        log::trace!("Fetching {} as {}", url, key);

        self.handle.spawn(async move {
            let fetched = match permits.acquire().await {
                Ok(_permit) => fetcher.fetch(&url).await,
                Err(_) => Err(FetchError::Transport("importer shut down".to_string())),
            };

            let result = match fetched {
                Ok(bytes) => Ok(Arc::new(Content { url: url.clone(), bytes })),
                Err(source) => Err(ImportError::Fetch { url, source }),
            };
            let state = match &result {
                Ok(content) => ImportState::Ready(Arc::clone(content)),
                Err(e) => ImportState::Failed(e.clone()),
            };

            // Channel first: once a waiter sees the watch change, the
            // completion is already queued for poll_completed
            let _ = completion_tx.send(Completion { key, generation, result });
            watch.send_replace(state);
        });
    }

    /// Payload for `key` if it has finished loading
    pub fn try_get(&self, key: ContentKey) -> Option<Arc<Content>> {
        match self.entries.get(&key).map(|entry| &entry.state) {
            Some(ImportState::Ready(content)) => Some(Arc::clone(content)),
            _ => None,
        }
    }

    pub fn state(&self, key: ContentKey) -> ImportState {
        self.entries
            .get(&key)
            .map_or(ImportState::Unknown, |entry| entry.state.clone())
    }

    /// Future resolving once `key` is no longer pending
    ///
    /// Resolves with [`ImportError::Evicted`] if the entry is freed first.
    pub fn get_async(&self, key: ContentKey) -> impl Future<Output = Result<Arc<Content>, ImportError>> + Send + 'static {
        let receiver = self.entries.get(&key).map(|entry| entry.watch.subscribe());

        async move {
            let mut receiver = receiver.ok_or_else(|| ImportError::UnknownKey(key.to_string()))?;
            let state = receiver
                .wait_for(|state| !state.is_pending())
                .await
                .map(|state| (*state).clone())
                .map_err(|_| ImportError::Evicted(key.to_string()))?;

            match state {
                ImportState::Ready(content) => Ok(content),
                ImportState::Failed(e) => Err(e),
                ImportState::Unknown | ImportState::Pending => Err(ImportError::Evicted(key.to_string())),
            }
        }
    }

    /// Drop one reference on `key`
    ///
    /// Returns true when this was the last reference. The payload is then
    /// retained or freed per the configuration; a fetch still in flight is
    /// left to finish and released on completion.
    pub fn try_evict(&mut self, key: ContentKey) -> bool {
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };
        if entry.ref_count == 0 {
            return false;
        }

        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            return false;
        }
        if !entry.state.is_pending() {
            self.release(key);
        }
        true
    }

    /// Drain finished fetches, returning the keys that completed
    pub fn poll_completed(&mut self) -> Vec<ContentKey> {
        let mut completed = Vec::new();

        while let Ok(completion) = self.completion_rx.try_recv() {
            let Some(entry) = self.entries.get_mut(&completion.key) else {
                continue;
            };
            if entry.generation != completion.generation {
                continue;
            }

            match completion.result {
                Ok(content) => {
                    log::debug!("Imported {} ({} bytes)", entry.url, content.len());
                    entry.state = ImportState::Ready(content);
                    entry.failed_at = None;
                }
                Err(e) => {
                    log::warn!("Import failed: {}", e);
                    entry.state = ImportState::Failed(e);
                    entry.failed_at = Some(Instant::now());
                }
            }

            let unreferenced = entry.ref_count == 0;
            completed.push(completion.key);
            if unreferenced {
                self.release(completion.key);
            }
        }

        completed
    }

    /// Re-issue a failed fetch once the retry delay has passed
    pub fn retry(&mut self, key: ContentKey) -> bool {
        let delay = self.config.retry_delay();
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };
        if !matches!(entry.state, ImportState::Failed(_)) {
            return false;
        }
        if entry.failed_at.is_some_and(|failed_at| failed_at.elapsed() < delay) {
            return false;
        }

        entry.generation += 1;
        entry.state = ImportState::Pending;
        entry.failed_at = None;
        entry.watch.send_replace(ImportState::Pending);

        let (url, generation, watch) = (entry.url.clone(), entry.generation, Arc::clone(&entry.watch));
        log::debug!("Retrying {}", url);
        self.spawn_fetch(key, url, generation, watch);
        true
    }

    /// Park an unreferenced entry in the retention queue, freeing the oldest
    fn release(&mut self, key: ContentKey) {
        self.retained.push_back(key);
        while self.retained.len() > self.config.retained_entries {
            if let Some(oldest) = self.retained.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn ref_count(&self, key: ContentKey) -> u32 {
        self.entries.get(&key).map_or(0, |entry| entry.ref_count)
    }

    pub fn contains(&self, key: ContentKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Entries currently tracked, referenced or retained
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.values().filter(|entry| entry.state.is_pending()).count()
    }

    /// Total fetches spawned, including retries
    pub fn fetches_issued(&self) -> u64 {
        self.fetches_issued
    }

    pub fn config(&self) -> &ImporterConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &Arc<F> {
        &self.fetcher
    }
}

impl<F: Fetcher> Drop for ContentImporter<F> {
    fn drop(&mut self) {
        // Dropping a runtime from async context panics; let it wind down on its own
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
