//! Lookup-or-record front over the shared link cache.
//!
//! Backend failures never abort a record: a failed lookup reads as a miss and
//! a failed insert is skipped, both with a warning.

use log::{debug, warn};

use crate::backends::{CacheBackend, CacheEntry, CacheKey};

pub struct EnrichmentCache {
    backend: Box<dyn CacheBackend>,
}

impl EnrichmentCache {
    pub fn new(backend: Box<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Returns the stored link for the pair, including empty no-match links.
    pub fn resolve(&self, title: &str, creator: &str) -> Option<String> {
        let key = CacheKey::new(title, creator);
        match self.backend.lookup(&key) {
            Ok(Some(link)) => {
                debug!("Cache hit for '{}' by '{}'", key.song, key.artist);
                Some(link)
            }
            Ok(None) => None,
            Err(error) => {
                warn!(
                    "Cache lookup failed for '{}' by '{}': {}",
                    key.song, key.artist, error
                );
                None
            }
        }
    }

    /// Stores a freshly searched link. Returns whether the write went through.
    pub fn record(&self, title: &str, creator: &str, link: &str, attributed_user: &str) -> bool {
        let entry = CacheEntry {
            key: CacheKey::new(title, creator),
            link: link.to_string(),
            username: attributed_user.to_string(),
            fetched_at: chrono::Utc::now().to_rfc3339(),
        };
        match self.backend.insert(&entry) {
            Ok(()) => {
                debug!(
                    "Cached link for '{}' by '{}' ({})",
                    entry.key.song, entry.key.artist, attributed_user
                );
                true
            }
            Err(error) => {
                warn!(
                    "Cache insert skipped for '{}' by '{}': {}",
                    entry.key.song, entry.key.artist, error
                );
                false
            }
        }
    }
}
