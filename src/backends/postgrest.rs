//! Hosted PostgREST link cache backend shared between operators.

use std::time::Duration;

use serde_json::{json, Value};

use crate::backends::{CacheBackend, CacheEntry, CacheKey};

/// PostgREST adapter backed by `ureq`.
pub struct PostgrestCacheBackend {
    http_client: ureq::Agent,
    base_url: String,
    table: String,
    api_key: String,
}

impl PostgrestCacheBackend {
    pub fn new(base_url: &str, table: &str, api_key: &str) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(10))
            .timeout_write(Duration::from_secs(10))
            .build();
        Self {
            http_client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            table: table.to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn lookup_url(&self, key: &CacheKey) -> String {
        format!(
            "{}?select=youtube_link&song=eq.{}&artist=eq.{}&limit=1",
            self.table_url(),
            urlencoding::encode(&key.song),
            urlencoding::encode(&key.artist)
        )
    }

    fn insert_body(entry: &CacheEntry) -> Value {
        json!({
            "song": entry.key.song,
            "artist": entry.key.artist,
            "youtube_link": entry.link,
            "username": entry.username,
            "fetched_at": entry.fetched_at,
        })
    }

    fn parse_lookup_response(parsed: &Value) -> Option<String> {
        parsed
            .as_array()?
            .first()?
            .get("youtube_link")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

impl CacheBackend for PostgrestCacheBackend {
    fn lookup(&self, key: &CacheKey) -> Result<Option<String>, String> {
        let response = self
            .http_client
            .get(&self.lookup_url(key))
            .set("apikey", &self.api_key)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("Accept", "application/json")
            .call()
            .map_err(|err| format!("PostgREST lookup failed: {err}"))?;
        let parsed: Value = response
            .into_json()
            .map_err(|err| format!("PostgREST lookup parse failed: {err}"))?;
        Ok(Self::parse_lookup_response(&parsed))
    }

    fn insert(&self, entry: &CacheEntry) -> Result<(), String> {
        self.http_client
            .post(&self.table_url())
            .set("apikey", &self.api_key)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("Prefer", "return=minimal")
            .send_json(Self::insert_body(entry))
            .map(|_| ())
            .map_err(|err| format!("PostgREST insert failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::PostgrestCacheBackend;
    use crate::backends::{CacheEntry, CacheKey};

    #[test]
    fn test_lookup_url_filters_exact_pair_and_limits_to_one_row() {
        let backend = PostgrestCacheBackend::new("https://db.example.com/", "fetched_links", "k");
        let url = backend.lookup_url(&CacheKey::new("Song & Dance", "AC/DC"));
        assert_eq!(
            url,
            "https://db.example.com/rest/v1/fetched_links?select=youtube_link\
             &song=eq.Song%20%26%20Dance&artist=eq.AC%2FDC&limit=1"
        );
    }

    #[test]
    fn test_parse_lookup_response_reads_first_row() {
        let body = json!([{ "youtube_link": "https://www.youtube.com/watch?v=abc" }]);
        assert_eq!(
            PostgrestCacheBackend::parse_lookup_response(&body),
            Some("https://www.youtube.com/watch?v=abc".to_string())
        );
        assert_eq!(PostgrestCacheBackend::parse_lookup_response(&json!([])), None);
        assert_eq!(
            PostgrestCacheBackend::parse_lookup_response(&json!({"message": "denied"})),
            None
        );
    }

    #[test]
    fn test_insert_body_carries_attribution() {
        let entry = CacheEntry {
            key: CacheKey::new("Song", "Artist"),
            link: String::new(),
            username: "operator".to_string(),
            fetched_at: "2026-01-01T00:00:00+00:00".to_string(),
        };
        let body = PostgrestCacheBackend::insert_body(&entry);
        assert_eq!(body["song"], "Song");
        assert_eq!(body["artist"], "Artist");
        assert_eq!(body["youtube_link"], "");
        assert_eq!(body["username"], "operator");
    }
}
