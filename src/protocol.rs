//! Event and outcome types shared between the worker and its observers.

use std::path::PathBuf;

/// Lifecycle of one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Idle,
    Running,
    Paused,
    Stopping,
}

impl RunMode {
    pub fn is_active(self) -> bool {
        !matches!(self, RunMode::Idle)
    }
}

/// Why a record produced no new link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The row already carries a link.
    AlreadyEnriched,
    /// Title or artist is blank or a missing-value marker. The row's link is cleared.
    MissingFields,
    /// A stop arrived while waiting for a search slot. The row is left untouched.
    Interrupted,
}

/// Result of processing exactly one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Skipped(SkipReason),
    CacheHit(String),
    Fetched(String),
}

impl ProcessOutcome {
    /// Link to store for outcomes that resolved one. Empty strings are valid no-match links.
    #[cfg(test)]
    pub fn link(&self) -> Option<&str> {
        match self {
            ProcessOutcome::Skipped(_) => None,
            ProcessOutcome::CacheHit(link) | ProcessOutcome::Fetched(link) => Some(link),
        }
    }
}

/// Counters and exit state reported once a run has been checkpointed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub fetched: usize,
    pub total: usize,
    pub external_calls: u64,
    pub stopped_early: bool,
    pub limit_reached: bool,
    pub output_path: PathBuf,
}

/// Point-in-time copy of the run state for polled observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSnapshot {
    pub mode: RunMode,
    pub processed: usize,
    pub fetched: usize,
    pub total: usize,
    pub external_calls: u64,
}

impl RunSnapshot {
    pub fn progress_percent(&self) -> f64 {
        progress_percent(self.processed, self.total)
    }
}

/// Notifications published on the pipeline event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Started {
        total: usize,
    },
    Progress {
        processed: usize,
        total: usize,
    },
    CooldownStarted {
        seconds: u64,
        external_calls: u64,
    },
    CooldownFinished,
    Paused,
    Resumed,
    StopRequested,
    Finished(RunSummary),
    Failed {
        message: String,
    },
}

pub fn progress_percent(processed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (processed as f64 / total as f64) * 100.0
}
