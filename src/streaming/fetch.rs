//! Content fetchers
//!
//! [`Fetcher`] is the seam to whatever transport delivers tile payloads. The
//! importer only needs raw bytes for a URL, asynchronously. Two
//! implementations ship with the crate: [`LocalFetcher`] for files and
//! `data:` URIs, and [`MemoryFetcher`] for preloaded or embedded content.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::Engine;
use tokio::sync::watch;

use crate::core::error::FetchError;

/// Asynchronous byte source keyed by URL
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// Reads files relative to a root directory, `file://` URLs and `data:` URIs
#[derive(Clone, Debug)]
pub struct LocalFetcher {
    root: PathBuf,
}

impl LocalFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a URL to a path, or `None` for schemes this fetcher cannot serve
    fn resolve_path(&self, url: &str) -> Option<PathBuf> {
        if let Some(path) = url.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }
        if url.contains("://") {
            return None;
        }
        let path = url.split(['?', '#']).next().unwrap_or(url);
        Some(self.root.join(path))
    }
}

impl Fetcher for LocalFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send {
        let url = url.to_string();
        let path = if url.starts_with("data:") { None } else { self.resolve_path(&url) };

        async move {
            if url.starts_with("data:") {
                return decode_data_uri(&url);
            }
            let Some(path) = path else {
                return Err(FetchError::Unsupported(url));
            };

            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(FetchError::NotFound(path.display().to_string()))
                }
                Err(e) => Err(FetchError::Transport(format!("{}: {}", path.display(), e))),
            }
        }
    }
}

/// Decode `data:[<mediatype>][;base64],<data>`
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, FetchError> {
    let body = uri
        .strip_prefix("data:")
        .ok_or_else(|| FetchError::Unsupported(uri.to_string()))?;
    let (header, data) = body
        .split_once(',')
        .ok_or_else(|| FetchError::Transport("data URI without ','".to_string()))?;

    if header.ends_with(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| FetchError::Transport(format!("invalid base64 in data URI: {}", e)))
    } else {
        Ok(data.as_bytes().to_vec())
    }
}

/// In-memory payloads keyed by exact URL.
///
/// Fetches can be paused so callers observe content while it is still in
/// flight; every call to `fetch` is counted.
pub struct MemoryFetcher {
    payloads: Mutex<HashMap<String, Vec<u8>>>,
    requests: AtomicUsize,
    paused: watch::Sender<bool>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            payloads: Mutex::new(HashMap::new()),
            requests: AtomicUsize::new(0),
            paused,
        }
    }

    pub fn insert(&self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.payloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.into(), bytes.into());
    }

    pub fn remove(&self, url: &str) -> Option<Vec<u8>> {
        self.payloads.lock().unwrap_or_else(|e| e.into_inner()).remove(url)
    }

    /// Hold every fetch until [`resume`](Self::resume)
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Number of fetches started so far
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn lookup(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.payloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}

impl Default for MemoryFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let mut paused = self.paused.subscribe();
        let url = url.to_string();

        async move {
            // Sender lives as long as self, so this only ends once resumed
            let _ = paused.wait_for(|paused| !*paused).await;
            self.lookup(&url)
        }
    }
}
