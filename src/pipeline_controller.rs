//! Resumable, rate-limited walk over a track table.
//!
//! One controller owns one run at a time. The walk runs on a dedicated worker
//! thread; the control surface only flips the shared run mode. Whatever way the
//! walk ends (completion, stop, fetch cap, or a panic inside a collaborator),
//! the worker writes the full table to the output path before going idle.

use std::any::Any;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};
use tokio::sync::broadcast::Sender;

use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::protocol::{
    PipelineEvent, ProcessOutcome, RunMode, RunSnapshot, RunSummary, SkipReason,
};
use crate::record_processor::RecordProcessor;
use crate::run_state::RunSignals;
use crate::table::{Record, RecordTable};

/// Everything one run needs. Settings are frozen once the run starts.
pub struct PipelineRun {
    pub table: RecordTable,
    pub output_path: PathBuf,
    pub settings: PipelineConfig,
    pub processor: RecordProcessor,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct WalkExit {
    stopped_early: bool,
    limit_reached: bool,
}

pub struct PipelineController {
    signals: Arc<RunSignals>,
    worker: Mutex<Option<JoinHandle<Option<RunSummary>>>>,
}

fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

impl PipelineController {
    pub fn new(events: Sender<PipelineEvent>) -> Self {
        Self {
            signals: Arc::new(RunSignals::new(events)),
            worker: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> RunMode {
        self.signals.mode()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.signals.snapshot()
    }

    /// Idle -> Running. Spawns the worker thread for `run`.
    pub fn start(&self, run: PipelineRun) -> Result<(), PipelineError> {
        run.settings.validate()?;
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.signals.begin(run.table.len()) {
            return Err(PipelineError::AlreadyRunning);
        }
        if let Some(previous) = worker.take() {
            let _ = previous.join();
        }

        let signals = Arc::clone(&self.signals);
        let handle = thread::Builder::new()
            .name("pipeline-worker".to_string())
            .spawn(move || run_worker(&signals, run));
        match handle {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.signals.finish();
                Err(PipelineError::Worker(err.to_string()))
            }
        }
    }

    pub fn pause(&self) -> bool {
        let paused = self.signals.pause();
        if paused {
            info!("Paused");
            self.signals.emit(PipelineEvent::Paused);
        }
        paused
    }

    pub fn resume(&self) -> bool {
        let resumed = self.signals.resume();
        if resumed {
            info!("Resumed");
            self.signals.emit(PipelineEvent::Resumed);
        }
        resumed
    }

    /// Requests a cooperative stop; the worker checkpoints and goes idle.
    pub fn stop(&self) -> bool {
        let stopping = self.signals.request_stop();
        if stopping {
            info!("Stop requested. Waiting for worker to save progress...");
            self.signals.emit(PipelineEvent::StopRequested);
        }
        stopping
    }

    /// Waits for the current worker. Returns its summary when the checkpoint was written.
    pub fn join(&self) -> Option<RunSummary> {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        handle.join().ok().flatten()
    }
}

fn run_worker(signals: &RunSignals, run: PipelineRun) -> Option<RunSummary> {
    let PipelineRun {
        mut table,
        output_path,
        settings,
        mut processor,
    } = run;
    let mut records = table.records();
    info!(
        "Starting run over {} rows, saving to {}",
        records.len(),
        output_path.display()
    );
    signals.emit(PipelineEvent::Started {
        total: records.len(),
    });

    let walk_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        walk(signals, &settings, &mut processor, &mut records)
    }));
    let (exit, failure) = match walk_result {
        Ok(exit) => (exit, None),
        Err(payload) => {
            let message = panic_payload_to_string(payload.as_ref());
            error!("Run aborted: {message}");
            (
                WalkExit {
                    stopped_early: true,
                    limit_reached: false,
                },
                Some(message),
            )
        }
    };

    finalize(signals, &mut table, &records, output_path, exit, failure)
}

fn walk(
    signals: &RunSignals,
    settings: &PipelineConfig,
    processor: &mut RecordProcessor,
    records: &mut [Record],
) -> WalkExit {
    let fetch_cap = settings.fetch_cap();
    let delay = settings.inter_record_delay();
    let poll = settings.pause_poll_interval();

    for (index, record) in records.iter_mut().enumerate() {
        let row = index + 1;
        if signals.is_stopping() {
            info!("Stop requested. Ending loop at row {row}");
            return WalkExit {
                stopped_early: true,
                ..WalkExit::default()
            };
        }
        if let Some(cap) = fetch_cap {
            if signals.fetched() >= cap as usize {
                info!("Reached max fetch limit: {cap}");
                return WalkExit {
                    limit_reached: true,
                    ..WalkExit::default()
                };
            }
        }
        if record.has_link() {
            debug!("Skipping row {row}, already has link");
            emit_progress(signals, false);
            continue;
        }

        signals.wait_while_paused(poll);
        if signals.is_stopping() {
            info!("Stop requested while paused. Ending loop at row {row}");
            return WalkExit {
                stopped_early: true,
                ..WalkExit::default()
            };
        }

        let resolved = match processor.process(record, signals) {
            ProcessOutcome::Skipped(SkipReason::AlreadyEnriched) => false,
            ProcessOutcome::Skipped(SkipReason::Interrupted) => {
                info!("Stop requested before searching row {row}");
                return WalkExit {
                    stopped_early: true,
                    ..WalkExit::default()
                };
            }
            ProcessOutcome::Skipped(SkipReason::MissingFields) => {
                warn!("Skipping row {row} (missing song/artist)");
                record.result.clear();
                false
            }
            ProcessOutcome::CacheHit(link) | ProcessOutcome::Fetched(link) => {
                info!("Row {row} final link: {link}");
                record.result = link;
                true
            }
        };
        emit_progress(signals, resolved);
        signals.sleep_unless_stopped(delay);
    }
    WalkExit::default()
}

fn emit_progress(signals: &RunSignals, resolved_link: bool) {
    let (processed, total) = signals.record_processed(resolved_link);
    signals.emit(PipelineEvent::Progress { processed, total });
}

fn finalize(
    signals: &RunSignals,
    table: &mut RecordTable,
    records: &[Record],
    output_path: PathBuf,
    exit: WalkExit,
    failure: Option<String>,
) -> Option<RunSummary> {
    table.apply_results(records);
    let snapshot = signals.snapshot();
    let saved = match table.save(&output_path) {
        Ok(()) => {
            info!("Progress saved to: {}", output_path.display());
            true
        }
        Err(err) => {
            error!(
                "Failed to save progress to {}: {}",
                output_path.display(),
                err
            );
            false
        }
    };
    signals.finish();

    if let Some(message) = failure {
        signals.emit(PipelineEvent::Failed { message });
    }
    if !saved {
        signals.emit(PipelineEvent::Failed {
            message: format!("could not write {}", output_path.display()),
        });
        return None;
    }

    let summary = RunSummary {
        processed: snapshot.processed,
        fetched: snapshot.fetched,
        total: snapshot.total,
        external_calls: snapshot.external_calls,
        stopped_early: exit.stopped_early,
        limit_reached: exit.limit_reached,
        output_path,
    };
    if summary.stopped_early {
        info!("Stopped early. Fetched {} links", summary.fetched);
    } else {
        info!("Done. Fetched {} links", summary.fetched);
    }
    signals.emit(PipelineEvent::Finished(summary.clone()));
    Some(summary)
}

#[cfg(test)]
mod tests {
    use std::ops::RangeInclusive;
    use std::path::PathBuf;
    use std::thread;
    use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

    use tokio::sync::broadcast::{self, Receiver};

    use super::{PipelineController, PipelineRun};
    use crate::config::PipelineConfig;
    use crate::enrichment_cache::test_support::RecordingCacheBackend;
    use crate::enrichment_cache::EnrichmentCache;
    use crate::errors::PipelineError;
    use crate::lookup::test_support::ScriptedLookup;
    use crate::protocol::{PipelineEvent, RunMode};
    use crate::rate_limiter::RateLimiter;
    use crate::record_processor::RecordProcessor;
    use crate::table::{Record, RecordTable};

    fn unique_temp_csv_path(name: &str) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be valid")
            .as_nanos();
        std::env::temp_dir().join(format!("csv2youtube_{name}_{nonce}.csv"))
    }

    fn settings(delay_secs: f64) -> PipelineConfig {
        PipelineConfig {
            inter_record_delay_secs: delay_secs,
            external_call_budget_before_cooldown: 3,
            pause_poll_interval_ms: 10,
            ..PipelineConfig::default()
        }
    }

    fn make_run(
        records: &[Record],
        settings: PipelineConfig,
        backend: &RecordingCacheBackend,
        lookup: &ScriptedLookup,
        output_path: &PathBuf,
    ) -> PipelineRun {
        let limiter = RateLimiter::with_sampler(
            settings.external_call_budget_before_cooldown,
            30..=120,
            Box::new(|_: RangeInclusive<u64>| 0),
        );
        PipelineRun {
            table: RecordTable::from_records(records),
            output_path: output_path.clone(),
            settings,
            processor: RecordProcessor::new(
                EnrichmentCache::new(Box::new(backend.clone())),
                Box::new(lookup.clone()),
                limiter,
                "operator",
            ),
        }
    }

    fn saved_records(path: &PathBuf) -> Vec<Record> {
        let records = RecordTable::load(path).expect("saved table").records();
        let _ = std::fs::remove_file(path);
        records
    }

    fn wait_for_progress(events: &mut Receiver<PipelineEvent>, processed: usize) {
        loop {
            match events.blocking_recv().expect("event bus open") {
                PipelineEvent::Progress { processed: seen, .. } if seen >= processed => return,
                _ => {}
            }
        }
    }

    fn numbered_records(count: usize) -> Vec<Record> {
        (1..=count)
            .map(|n| Record::new(&format!("Song {n}"), "Band", ""))
            .collect()
    }

    #[test]
    fn test_scenario_skips_existing_link_and_fetches_the_other_row() {
        let (sender, _) = broadcast::channel(64);
        let controller = PipelineController::new(sender);
        let backend = RecordingCacheBackend::default();
        let lookup = ScriptedLookup::default()
            .with_response("Song A Artist X", "https://www.youtube.com/watch?v=a");
        let output = unique_temp_csv_path("scenario");
        let records = vec![
            Record::new("Song A", "Artist X", ""),
            Record::new("Song B", "Artist Y", "http://existing"),
        ];

        controller
            .start(make_run(&records, settings(0.0), &backend, &lookup, &output))
            .expect("run starts");
        let summary = controller.join().expect("checkpoint written");

        assert_eq!(backend.lookup_count(), 1);
        assert_eq!(lookup.call_count(), 1);
        assert_eq!(backend.insert_count(), 1);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.external_calls, 1);
        assert!(!summary.stopped_early);
        assert_eq!(controller.mode(), RunMode::Idle);
        assert_eq!(
            saved_records(&output),
            vec![
                Record::new("Song A", "Artist X", "https://www.youtube.com/watch?v=a"),
                Record::new("Song B", "Artist Y", "http://existing"),
            ]
        );
    }

    #[test]
    fn test_stop_checkpoints_processed_rows_and_keeps_the_rest() {
        let (sender, mut events) = broadcast::channel(256);
        let controller = PipelineController::new(sender);
        let backend = RecordingCacheBackend::default();
        let lookup = ScriptedLookup::default()
            .with_response("Song 1 Band", "https://one");
        let output = unique_temp_csv_path("stop");
        let mut records = numbered_records(5);
        records[1].result = "https://two".to_string();

        controller
            .start(make_run(&records, settings(30.0), &backend, &lookup, &output))
            .expect("run starts");
        wait_for_progress(&mut events, 1);
        assert!(controller.stop());
        let started = Instant::now();
        let summary = controller.join().expect("checkpoint written");

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(summary.stopped_early);
        assert_eq!(summary.processed, 1);
        assert_eq!(lookup.call_count(), 1);
        assert_eq!(controller.mode(), RunMode::Idle);
        assert_eq!(controller.snapshot().processed, 0);
        assert_eq!(
            saved_records(&output),
            vec![
                Record::new("Song 1", "Band", "https://one"),
                Record::new("Song 2", "Band", "https://two"),
                Record::new("Song 3", "Band", ""),
                Record::new("Song 4", "Band", ""),
                Record::new("Song 5", "Band", ""),
            ]
        );
    }

    #[test]
    fn test_fetch_cap_ends_run_after_limit() {
        let (sender, _) = broadcast::channel(64);
        let controller = PipelineController::new(sender);
        let backend = RecordingCacheBackend::default().with_entry("Song 1", "Band", "https://c");
        let lookup = ScriptedLookup::default();
        let output = unique_temp_csv_path("cap");
        let run_settings = PipelineConfig {
            max_records_to_fetch: 2,
            ..settings(0.0)
        };

        controller
            .start(make_run(&numbered_records(4), run_settings, &backend, &lookup, &output))
            .expect("run starts");
        let summary = controller.join().expect("checkpoint written");

        assert!(summary.limit_reached);
        assert_eq!(summary.fetched, 2);
        assert_eq!(lookup.call_count(), 1, "cache hit does not search");
        let saved = saved_records(&output);
        assert_eq!(saved[0].result, "https://c");
        assert_eq!(saved[1].result, "");
        assert_eq!(saved.len(), 4);
    }

    #[test]
    fn test_missing_fields_are_cleared_and_counted_without_fetch() {
        let (sender, _) = broadcast::channel(64);
        let controller = PipelineController::new(sender);
        let backend = RecordingCacheBackend::default();
        let lookup = ScriptedLookup::default();
        let output = unique_temp_csv_path("missing");
        let records = vec![Record::new("nan", "Band", "stale"), Record::new("Song", "", "")];

        controller
            .start(make_run(&records, settings(0.0), &backend, &lookup, &output))
            .expect("run starts");
        let summary = controller.join().expect("checkpoint written");

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.fetched, 0);
        assert_eq!(lookup.call_count(), 0);
        let saved = saved_records(&output);
        assert_eq!(saved[0].result, "");
        assert_eq!(saved[1].result, "");
    }

    #[test]
    fn test_pause_holds_the_walk_until_resume() {
        let (sender, mut events) = broadcast::channel(256);
        let controller = PipelineController::new(sender);
        let backend = RecordingCacheBackend::default();
        let lookup = ScriptedLookup::default();
        let output = unique_temp_csv_path("pause");

        controller
            .start(make_run(&numbered_records(3), settings(1.0), &backend, &lookup, &output))
            .expect("run starts");
        wait_for_progress(&mut events, 1);
        assert!(controller.pause());
        assert_eq!(controller.mode(), RunMode::Paused);

        thread::sleep(Duration::from_millis(1500));
        assert_eq!(controller.snapshot().processed, 1);
        assert_eq!(lookup.call_count(), 1);

        assert!(controller.resume());
        controller.stop();
        let summary = controller.join().expect("checkpoint written");
        assert!(summary.processed <= 2);
        assert_eq!(saved_records(&output).len(), 3);
    }

    #[test]
    fn test_stop_while_paused_checkpoints_exactly_the_processed_rows() {
        let (sender, mut events) = broadcast::channel(256);
        let controller = PipelineController::new(sender);
        let backend = RecordingCacheBackend::default();
        let lookup = ScriptedLookup::default()
            .with_response("Song 1 Band", "https://one")
            .with_response("Song 2 Band", "https://two");
        let output = unique_temp_csv_path("pause_stop");

        controller
            .start(make_run(&numbered_records(3), settings(0.2), &backend, &lookup, &output))
            .expect("run starts");
        wait_for_progress(&mut events, 1);
        assert!(controller.pause());
        // Let the delay run out so the worker parks in the pause wait.
        thread::sleep(Duration::from_millis(600));
        assert_eq!(controller.mode(), RunMode::Paused);
        assert!(controller.stop());
        let summary = controller.join().expect("checkpoint written");

        assert!(summary.stopped_early);
        assert_eq!(summary.processed, 1);
        assert_eq!(lookup.call_count(), 1);
        assert_eq!(controller.mode(), RunMode::Idle);
        assert_eq!(
            saved_records(&output),
            vec![
                Record::new("Song 1", "Band", "https://one"),
                Record::new("Song 2", "Band", ""),
                Record::new("Song 3", "Band", ""),
            ]
        );
    }

    #[test]
    fn test_out_of_range_delay_is_rejected_and_long_delay_still_stops() {
        let (sender, mut events) = broadcast::channel(64);
        let controller = PipelineController::new(sender);
        let backend = RecordingCacheBackend::default();
        let lookup = ScriptedLookup::default().with_response("Song 1 Band", "https://one");
        let output = unique_temp_csv_path("long_delay");

        let rejected = controller.start(make_run(
            &numbered_records(2),
            settings(1e20),
            &backend,
            &lookup,
            &output,
        ));
        assert!(matches!(rejected, Err(PipelineError::Config(_))));
        assert_eq!(controller.mode(), RunMode::Idle);

        controller
            .start(make_run(&numbered_records(2), settings(1e18), &backend, &lookup, &output))
            .expect("run starts");
        wait_for_progress(&mut events, 1);
        assert!(controller.stop());
        let summary = controller.join().expect("checkpoint written");

        assert!(summary.stopped_early);
        assert_eq!(summary.processed, 1);
        assert_eq!(
            saved_records(&output),
            vec![
                Record::new("Song 1", "Band", "https://one"),
                Record::new("Song 2", "Band", ""),
            ]
        );
    }

    #[test]
    fn test_panic_inside_walk_still_checkpoints() {
        let (sender, mut events) = broadcast::channel(64);
        let controller = PipelineController::new(sender);
        let backend = RecordingCacheBackend::default();
        let lookup = ScriptedLookup {
            panic_on: Some("Song 2 Band".to_string()),
            ..ScriptedLookup::default()
        }
        .with_response("Song 1 Band", "https://one");
        let output = unique_temp_csv_path("panic");

        controller
            .start(make_run(&numbered_records(3), settings(0.0), &backend, &lookup, &output))
            .expect("run starts");
        let summary = controller.join().expect("checkpoint written");

        assert!(summary.stopped_early);
        assert_eq!(controller.mode(), RunMode::Idle);
        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::Failed { message } = event {
                assert!(message.contains("lookup exploded"));
                saw_failure = true;
            }
        }
        assert!(saw_failure);
        assert_eq!(
            saved_records(&output),
            vec![
                Record::new("Song 1", "Band", "https://one"),
                Record::new("Song 2", "Band", ""),
                Record::new("Song 3", "Band", ""),
            ]
        );
    }

    #[test]
    fn test_second_start_is_rejected_while_running() {
        let (sender, mut events) = broadcast::channel(64);
        let controller = PipelineController::new(sender);
        let backend = RecordingCacheBackend::default();
        let lookup = ScriptedLookup::default();
        let output = unique_temp_csv_path("double");

        controller
            .start(make_run(&numbered_records(2), settings(30.0), &backend, &lookup, &output))
            .expect("run starts");
        wait_for_progress(&mut events, 1);
        let second = controller.start(make_run(
            &numbered_records(2),
            settings(0.0),
            &backend,
            &lookup,
            &output,
        ));
        assert!(matches!(second, Err(PipelineError::AlreadyRunning)));

        controller.stop();
        controller.join().expect("checkpoint written");
        let _ = std::fs::remove_file(&output);
    }

    #[test]
    fn test_controls_are_ignored_while_idle() {
        let (sender, mut events) = broadcast::channel(8);
        let controller = PipelineController::new(sender);
        assert!(!controller.pause());
        assert!(!controller.resume());
        assert!(!controller.stop());
        assert!(controller.join().is_none());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_invalid_settings_are_rejected_before_start() {
        let (sender, _) = broadcast::channel(8);
        let controller = PipelineController::new(sender);
        let backend = RecordingCacheBackend::default();
        let lookup = ScriptedLookup::default();
        let output = unique_temp_csv_path("invalid");

        let result = controller.start(make_run(
            &numbered_records(1),
            settings(-2.0),
            &backend,
            &lookup,
            &output,
        ));
        assert!(matches!(result, Err(PipelineError::Config(_))));
        assert_eq!(controller.mode(), RunMode::Idle);
        assert!(!output.exists());
    }

    #[test]
    fn test_progress_is_reported_for_every_row() {
        let (sender, mut events) = broadcast::channel(64);
        let controller = PipelineController::new(sender);
        let backend = RecordingCacheBackend::default();
        let lookup = ScriptedLookup::default();
        let output = unique_temp_csv_path("progress");
        let records = vec![
            Record::new("Song 1", "Band", "https://already"),
            Record::new("", "Band", ""),
            Record::new("Song 3", "Band", ""),
        ];

        controller
            .start(make_run(&records, settings(0.0), &backend, &lookup, &output))
            .expect("run starts");
        controller.join().expect("checkpoint written");
        let _ = std::fs::remove_file(&output);

        let mut progress = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::Progress { processed, total } = event {
                progress.push((processed, total));
            }
        }
        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
    }
}
