mod backends;
mod config;
mod enrichment_cache;
mod errors;
mod identity;
mod lookup;
mod pipeline_controller;
mod protocol;
mod rate_limiter;
mod record_processor;
mod run_state;
mod table;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use clap::Parser;
use log::{info, warn};
use tokio::sync::broadcast;

use backends::postgrest::PostgrestCacheBackend;
use backends::sqlite::SqliteCacheBackend;
use backends::{CacheBackend, DisabledCacheBackend};
use config::{sanitize_config, CacheBackendKind, CacheConfig, Config};
use enrichment_cache::EnrichmentCache;
use errors::{ConfigError, PipelineError};
use lookup::YoutubeSearchClient;
use pipeline_controller::{PipelineController, PipelineRun};
use protocol::{progress_percent, PipelineEvent, RunMode};
use rate_limiter::RateLimiter;
use record_processor::RecordProcessor;
use table::{output_path_for, RecordTable};

#[derive(Parser)]
#[command(
    name = "csv2youtube",
    version,
    about = "Fill a YouTube link column for every track in a CSV export"
)]
struct Cli {
    /// CSV file with `Track Name` and `Artist Name(s)` columns
    input: Option<PathBuf>,

    /// Delay between searches in seconds (keep >= 3)
    #[arg(long)]
    delay: Option<f64>,

    /// Maximum number of links to fetch (0 = no limit)
    #[arg(long)]
    max_links: Option<u32>,

    /// Number of searches before a randomized cooldown
    #[arg(long)]
    cooldown_budget: Option<u32>,

    /// Username attributed to cache writes (saved for later runs)
    #[arg(long)]
    username: Option<String>,

    /// Config directory (default: <config_dir>/csv2youtube)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_or_create_config(config_file: &Path) -> Config {
    if !config_file.exists() {
        let default_config = sanitize_config(Config::default());
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        match toml::to_string(&default_config) {
            Ok(text) => {
                if let Err(err) = std::fs::write(config_file, text) {
                    warn!("Failed to write default config: {}", err);
                }
            }
            Err(err) => warn!("Failed to serialize default config: {}", err),
        }
        return default_config;
    }

    match std::fs::read_to_string(config_file) {
        Ok(content) => sanitize_config(toml::from_str::<Config>(&content).unwrap_or_else(|err| {
            warn!(
                "Invalid config {}; using defaults: {}",
                config_file.display(),
                err
            );
            Config::default()
        })),
        Err(err) => {
            warn!(
                "Failed to read config {}; using defaults: {}",
                config_file.display(),
                err
            );
            sanitize_config(Config::default())
        }
    }
}

fn build_cache_backend(config: &CacheConfig) -> Result<Box<dyn CacheBackend>, PipelineError> {
    match config.backend {
        CacheBackendKind::Sqlite => {
            let path = config.resolved_sqlite_path().ok_or_else(|| {
                PipelineError::Cache("could not determine a data directory".to_string())
            })?;
            info!("Using SQLite link cache at {}", path.display());
            let backend = SqliteCacheBackend::open(&path).map_err(PipelineError::Cache)?;
            Ok(Box::new(backend))
        }
        CacheBackendKind::Postgrest => {
            let url = if config.postgrest_url.trim().is_empty() {
                std::env::var(&config.postgrest_url_env).unwrap_or_default()
            } else {
                config.postgrest_url.clone()
            };
            let key = std::env::var(&config.postgrest_key_env).unwrap_or_default();
            if url.trim().is_empty() || key.trim().is_empty() {
                return Err(PipelineError::Cache(format!(
                    "PostgREST cache needs a URL and ${} to be set",
                    config.postgrest_key_env
                )));
            }
            info!("Using shared PostgREST link cache at {url}");
            Ok(Box::new(PostgrestCacheBackend::new(
                &url,
                &config.postgrest_table,
                &key,
            )))
        }
        CacheBackendKind::Disabled => {
            warn!("Link cache disabled; every row will be searched");
            Ok(Box::new(DisabledCacheBackend))
        }
    }
}

fn spawn_progress_printer(mut events: broadcast::Receiver<PipelineEvent>) {
    thread::spawn(move || loop {
        match events.blocking_recv() {
            Ok(PipelineEvent::Progress { processed, total }) => println!(
                "Progress: {processed}/{total} ({:.1}%)",
                progress_percent(processed, total)
            ),
            Ok(PipelineEvent::CooldownStarted {
                seconds,
                external_calls,
            }) => println!("Hit {external_calls} searches, sleeping {seconds} seconds for safety..."),
            Ok(PipelineEvent::Paused) => println!("Paused. Enter 'r' to resume or 's' to stop."),
            Ok(PipelineEvent::Resumed) => println!("Resumed."),
            Ok(PipelineEvent::Failed { message }) => eprintln!("Something went wrong: {message}"),
            Ok(PipelineEvent::Finished(_)) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    });
}

fn spawn_control_reader(controller: Arc<PipelineController>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match line.trim().to_ascii_lowercase().as_str() {
                "p" | "pause" => {
                    if controller.mode() == RunMode::Paused {
                        controller.resume();
                    } else {
                        controller.pause();
                    }
                }
                "r" | "resume" => {
                    controller.resume();
                }
                "s" | "stop" => {
                    controller.stop();
                }
                "status" => {
                    let snapshot = controller.snapshot();
                    println!(
                        "{:?}: {}/{} rows ({:.1}%), {} links, {} searches",
                        snapshot.mode,
                        snapshot.processed,
                        snapshot.total,
                        snapshot.progress_percent(),
                        snapshot.fetched,
                        snapshot.external_calls
                    );
                }
                "" => {}
                other => println!(
                    "Unknown command '{other}'. Use p (pause), r (resume), s (stop), status."
                ),
            }
            if !controller.mode().is_active() {
                break;
            }
        }
    });
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        cli.log_level
            .parse::<log::LevelFilter>()
            .unwrap_or(log::LevelFilter::Info),
    );
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_root = match cli.config.clone() {
        Some(path) => path,
        None => dirs::config_dir()
            .ok_or("Could not find config directory")?
            .join("csv2youtube"),
    };
    std::fs::create_dir_all(&config_root).map_err(|err| {
        format!(
            "Failed to create config directory {}: {}",
            config_root.display(),
            err
        )
    })?;
    let config = load_or_create_config(&config_root.join("config.toml"));

    let mut settings = config.pipeline.clone();
    if let Some(delay) = cli.delay {
        settings.inter_record_delay_secs = delay;
    }
    if let Some(max_links) = cli.max_links {
        settings.max_records_to_fetch = max_links;
    }
    if let Some(budget) = cli.cooldown_budget {
        settings.external_call_budget_before_cooldown = budget;
    }
    settings.validate()?;

    let input = cli.input.clone().ok_or(ConfigError::MissingInputFile)?;
    if !input.is_file() {
        return Err(ConfigError::InputFileNotFound(input).into());
    }

    let identity_path = identity::identity_file_path(&config_root);
    let username = match cli.username.as_deref().map(str::trim) {
        Some(username) if !username.is_empty() => {
            identity::save_username(&identity_path, username)?;
            username.to_string()
        }
        _ => identity::get_or_request_username(
            &identity_path,
            &mut std::io::stdin().lock(),
            &mut std::io::stdout(),
        )?,
    };
    info!("Username: {username}");

    let table = RecordTable::load(&input)?;
    if table.is_empty() {
        warn!("{} has no rows; writing an unchanged copy", input.display());
    }
    let output_path = output_path_for(&input, &settings.output_suffix);
    let processor = RecordProcessor::new(
        EnrichmentCache::new(build_cache_backend(&config.cache)?),
        Box::new(YoutubeSearchClient::new(&config.lookup)),
        RateLimiter::new(
            settings.external_call_budget_before_cooldown,
            settings.cooldown_min_secs..=settings.cooldown_max_secs,
        )
        .with_request_floor(config.lookup.min_request_interval_ms),
        &username,
    );

    let (event_sender, event_receiver) = broadcast::channel(1024);
    spawn_progress_printer(event_receiver);
    let controller = Arc::new(PipelineController::new(event_sender));

    controller.start(PipelineRun {
        table,
        output_path,
        settings,
        processor,
    })?;
    println!("Running. Enter p (pause/resume), r (resume), or s (stop & save).");
    spawn_control_reader(Arc::clone(&controller));

    match controller.join() {
        Some(summary) if summary.stopped_early => println!(
            "Stopped early. Fetched {} links. Saved to {}",
            summary.fetched,
            summary.output_path.display()
        ),
        Some(summary) if summary.limit_reached => println!(
            "Reached max fetch limit. Fetched {} links and saved file to {}",
            summary.fetched,
            summary.output_path.display()
        ),
        Some(summary) => println!(
            "Done! Fetched {} links and saved file to {}",
            summary.fetched,
            summary.output_path.display()
        ),
        None => return Err("run ended without saving results".into()),
    }

    info!("Application exiting");
    Ok(())
}
