//! Link cache backend abstractions and concrete implementations.

pub mod postgrest;
pub mod sqlite;

/// Exact-match cache key: trimmed title and artist, case preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub song: String,
    pub artist: String,
}

impl CacheKey {
    pub fn new(song: &str, artist: &str) -> Self {
        Self {
            song: song.trim().to_string(),
            artist: artist.trim().to_string(),
        }
    }
}

/// One resolved mapping attributed to the operator that searched for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Video URL, or empty when the search found nothing.
    pub link: String,
    pub username: String,
    /// RFC 3339 UTC timestamp.
    pub fetched_at: String,
}

/// Interface implemented by link cache stores.
///
/// Duplicate inserts for the same key are allowed; lookups return one stored link.
pub trait CacheBackend: Send {
    fn lookup(&self, key: &CacheKey) -> Result<Option<String>, String>;
    fn insert(&self, entry: &CacheEntry) -> Result<(), String>;
}

/// Backend used when caching is turned off: every lookup misses, writes are dropped.
pub struct DisabledCacheBackend;

impl CacheBackend for DisabledCacheBackend {
    fn lookup(&self, _key: &CacheKey) -> Result<Option<String>, String> {
        Ok(None)
    }

    fn insert(&self, _entry: &CacheEntry) -> Result<(), String> {
        Ok(())
    }
}
