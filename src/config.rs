//! Persistent application configuration model and defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ConfigError;

/// Upper bound for a single cooldown sleep (one day).
pub const MAX_COOLDOWN_SECS: u64 = 24 * 60 * 60;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Walk pacing and cooldown behavior.
    pub pipeline: PipelineConfig,
    #[serde(default)]
    /// External search client preferences.
    pub lookup: LookupConfig,
    #[serde(default)]
    /// Shared link cache backend selection.
    pub cache: CacheConfig,
}

/// Run parameters. A copy is frozen when a run starts.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_inter_record_delay_secs")]
    pub inter_record_delay_secs: f64,
    /// Maximum number of links to resolve in one run. `0` means no limit.
    #[serde(default)]
    pub max_records_to_fetch: u32,
    #[serde(default = "default_external_call_budget_before_cooldown")]
    pub external_call_budget_before_cooldown: u32,
    #[serde(default = "default_cooldown_min_secs")]
    pub cooldown_min_secs: u64,
    #[serde(default = "default_cooldown_max_secs")]
    pub cooldown_max_secs: u64,
    #[serde(default = "default_pause_poll_interval_ms")]
    pub pause_poll_interval_ms: u64,
    #[serde(default = "default_output_suffix")]
    pub output_suffix: String,
}

/// Search client preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LookupConfig {
    #[serde(default = "default_search_url")]
    pub search_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Hard floor on spacing between outbound searches. `0` disables it.
    #[serde(default)]
    pub min_request_interval_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

/// Which store backs the shared link cache.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    /// Local SQLite file.
    #[default]
    Sqlite,
    /// Hosted PostgREST table shared between operators.
    Postgrest,
    /// No cache; every lookup is a miss.
    Disabled,
}

/// Cache backend configuration.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackendKind,
    /// Overrides the default `<data_dir>/csv2youtube/cache.db`.
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,
    /// Base URL of the PostgREST service; falls back to `postgrest_url_env`.
    #[serde(default)]
    pub postgrest_url: String,
    #[serde(default = "default_postgrest_table")]
    pub postgrest_table: String,
    #[serde(default = "default_postgrest_url_env")]
    pub postgrest_url_env: String,
    #[serde(default = "default_postgrest_key_env")]
    pub postgrest_key_env: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inter_record_delay_secs: default_inter_record_delay_secs(),
            max_records_to_fetch: 0,
            external_call_budget_before_cooldown: default_external_call_budget_before_cooldown(),
            cooldown_min_secs: default_cooldown_min_secs(),
            cooldown_max_secs: default_cooldown_max_secs(),
            pause_poll_interval_ms: default_pause_poll_interval_ms(),
            output_suffix: default_output_suffix(),
        }
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
            user_agent: default_user_agent(),
            min_request_interval_ms: 0,
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            sqlite_path: None,
            postgrest_url: String::new(),
            postgrest_table: default_postgrest_table(),
            postgrest_url_env: default_postgrest_url_env(),
            postgrest_key_env: default_postgrest_key_env(),
        }
    }
}

impl PipelineConfig {
    /// Rejects run parameters that cannot drive a walk.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if Duration::try_from_secs_f64(self.inter_record_delay_secs).is_err() {
            return Err(ConfigError::InvalidDelay(self.inter_record_delay_secs));
        }
        if self.external_call_budget_before_cooldown == 0 {
            return Err(ConfigError::InvalidCooldownBudget);
        }
        if self.cooldown_min_secs > self.cooldown_max_secs
            || self.cooldown_max_secs > MAX_COOLDOWN_SECS
        {
            return Err(ConfigError::InvalidCooldownWindow {
                min: self.cooldown_min_secs,
                max: self.cooldown_max_secs,
            });
        }
        Ok(())
    }

    pub fn inter_record_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.inter_record_delay_secs.max(0.0))
            .unwrap_or(Duration::MAX)
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms)
    }

    pub fn fetch_cap(&self) -> Option<u32> {
        (self.max_records_to_fetch > 0).then_some(self.max_records_to_fetch)
    }
}

impl CacheConfig {
    pub fn resolved_sqlite_path(&self) -> Option<PathBuf> {
        self.sqlite_path.clone().or_else(|| {
            dirs::data_dir().map(|dir| dir.join("csv2youtube").join("cache.db"))
        })
    }
}

/// Clamps values that would otherwise wedge a run.
pub fn sanitize_config(config: Config) -> Config {
    let mut sanitized = config;
    let pipeline = &mut sanitized.pipeline;
    pipeline.cooldown_min_secs = pipeline.cooldown_min_secs.min(MAX_COOLDOWN_SECS);
    pipeline.cooldown_max_secs = pipeline.cooldown_max_secs.min(MAX_COOLDOWN_SECS);
    if sanitized.pipeline.cooldown_max_secs < sanitized.pipeline.cooldown_min_secs {
        sanitized.pipeline.cooldown_max_secs = sanitized.pipeline.cooldown_min_secs;
    }
    sanitized.pipeline.pause_poll_interval_ms = sanitized.pipeline.pause_poll_interval_ms.max(10);
    if Duration::try_from_secs_f64(sanitized.pipeline.inter_record_delay_secs).is_err() {
        sanitized.pipeline.inter_record_delay_secs = default_inter_record_delay_secs();
    }
    if sanitized.pipeline.external_call_budget_before_cooldown == 0 {
        sanitized.pipeline.external_call_budget_before_cooldown =
            default_external_call_budget_before_cooldown();
    }
    if sanitized.pipeline.output_suffix.trim().is_empty() {
        sanitized.pipeline.output_suffix = default_output_suffix();
    }
    sanitized
}

fn default_inter_record_delay_secs() -> f64 {
    3.0
}

fn default_external_call_budget_before_cooldown() -> u32 {
    20
}

fn default_cooldown_min_secs() -> u64 {
    30
}

fn default_cooldown_max_secs() -> u64 {
    120
}

fn default_pause_poll_interval_ms() -> u64 {
    500
}

fn default_output_suffix() -> String {
    "_with_links".to_string()
}

fn default_search_url() -> String {
    "https://www.youtube.com/results".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_read_timeout_secs() -> u64 {
    15
}

fn default_postgrest_table() -> String {
    "fetched_links".to_string()
}

fn default_postgrest_url_env() -> String {
    "SUPABASE_URL".to_string()
}

fn default_postgrest_key_env() -> String {
    "SUPABASE_KEY".to_string()
}
