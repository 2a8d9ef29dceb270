//! Backend handle cache keyed by base URL and credential

use crate::error::Result;
use dashmap::DashMap;
use std::fmt;
use tracing::debug;

/// Cache key: one handle per `(base_url, credential)` pair
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HandleKey {
    base_url: String,
    credential: String,
}

impl HandleKey {
    /// Create a new key
    pub fn new(base_url: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            credential: credential.into(),
        }
    }

    /// Base URL part of the key
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl fmt::Debug for HandleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleKey")
            .field("base_url", &self.base_url)
            .field("credential", &"***REDACTED***")
            .finish()
    }
}

/// Concurrent memo of constructed backend handles.
///
/// `get_or_create` is insert-if-absent: when two callers race on first use
/// of a key, both may construct a handle but only the first one stored is
/// kept and returned to both. Entries live as long as the cache.
pub struct HandleCache<H> {
    handles: DashMap<HandleKey, H>,
}

impl<H: Clone> HandleCache<H> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
        }
    }

    /// Return the handle for `key`, constructing it with `make` on first use
    pub fn get_or_create<F>(&self, key: &HandleKey, make: F) -> Result<H>
    where
        F: FnOnce() -> Result<H>,
    {
        if let Some(handle) = self.handles.get(key) {
            return Ok(handle.value().clone());
        }

        // Built outside the shard lock; a racing duplicate is discarded below.
        let handle = make()?;
        debug!(base_url = %key.base_url, "Created backend handle");

        Ok(self.handles.entry(key.clone()).or_insert(handle).value().clone())
    }

    /// Look up a handle without constructing one
    pub fn get(&self, key: &HandleKey) -> Option<H> {
        self.handles.get(key).map(|h| h.value().clone())
    }

    /// Store a handle, replacing any existing one for the key
    pub fn insert(&self, key: HandleKey, handle: H) {
        self.handles.insert(key, handle);
    }

    /// Whether a handle exists for the key
    pub fn contains(&self, key: &HandleKey) -> bool {
        self.handles.contains_key(key)
    }

    /// Number of cached handles
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<H: Clone> Default for HandleCache<H> {
    fn default() -> Self {
        Self::new()
    }
}
