//! External search client that turns a "title artist" query into a video link.

use std::io::Read;
use std::time::Duration;

use log::debug;
use regex::Regex;

use crate::config::LookupConfig;

const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";
const VIDEO_ID_PATTERN: &str = r#""videoId":"(.*?)""#;
const MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;

/// Interface implemented by search providers.
pub trait TrackLookup: Send {
    /// Returns the first matching link for `query`, `None` when nothing matched.
    fn first_match(&self, query: &str) -> Result<Option<String>, String>;
}

/// Builds the search query for one record.
pub fn search_query(title: &str, creator: &str) -> String {
    format!("{title} {creator}").trim().to_string()
}

/// Scrapes YouTube search result pages with `ureq`.
pub struct YoutubeSearchClient {
    http_client: ureq::Agent,
    search_url: String,
    user_agent: String,
    video_id_pattern: Regex,
}

impl YoutubeSearchClient {
    pub fn new(config: &LookupConfig) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(config.connect_timeout_secs))
            .timeout_read(Duration::from_secs(config.read_timeout_secs))
            .timeout_write(Duration::from_secs(config.read_timeout_secs))
            .build();

        Self {
            http_client,
            search_url: config.search_url.clone(),
            user_agent: config.user_agent.clone(),
            video_id_pattern: Regex::new(VIDEO_ID_PATTERN).expect("valid video id pattern"),
        }
    }

    fn request_url(&self, query: &str) -> String {
        format!("{}?search_query={}", self.search_url, urlencoding::encode(query))
    }

    fn first_video_link(&self, body: &str) -> Option<String> {
        self.video_id_pattern
            .captures(body)
            .and_then(|captures| captures.get(1))
            .map(|video_id| format!("{WATCH_URL_PREFIX}{}", video_id.as_str()))
    }
}

impl TrackLookup for YoutubeSearchClient {
    fn first_match(&self, query: &str) -> Result<Option<String>, String> {
        let url = self.request_url(query);
        debug!("Searching: {url}");
        let response = self
            .http_client
            .get(&url)
            .set("User-Agent", &self.user_agent)
            .call()
            .map_err(|error| format!("Search request failed for '{query}': {error}"))?;
        let mut body = String::new();
        response
            .into_reader()
            .take(MAX_BODY_BYTES)
            .read_to_string(&mut body)
            .map_err(|error| format!("Failed to read search response for '{query}': {error}"))?;
        Ok(self.first_video_link(&body))
    }
}
