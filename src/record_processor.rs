//! Per-record decision: skip, cache hit, or external search.

use log::{info, warn};

use crate::enrichment_cache::EnrichmentCache;
use crate::lookup::{search_query, TrackLookup};
use crate::protocol::{PipelineEvent, ProcessOutcome, SkipReason};
use crate::rate_limiter::{CooldownDirective, RateLimiter};
use crate::run_state::RunSignals;
use crate::table::{is_missing_value, Record};

pub struct RecordProcessor {
    cache: EnrichmentCache,
    lookup: Box<dyn TrackLookup>,
    rate_limiter: RateLimiter,
    attributed_user: String,
}

impl RecordProcessor {
    pub fn new(
        cache: EnrichmentCache,
        lookup: Box<dyn TrackLookup>,
        rate_limiter: RateLimiter,
        attributed_user: &str,
    ) -> Self {
        Self {
            cache,
            lookup,
            rate_limiter,
            attributed_user: attributed_user.to_string(),
        }
    }

    #[cfg(test)]
    pub fn external_calls(&self) -> u64 {
        self.rate_limiter.external_calls()
    }

    /// Resolves one record. Searches that fail are reported as an empty link.
    pub fn process(&mut self, record: &Record, signals: &RunSignals) -> ProcessOutcome {
        if record.has_link() {
            return ProcessOutcome::Skipped(SkipReason::AlreadyEnriched);
        }
        if is_missing_value(&record.title) || is_missing_value(&record.creator) {
            return ProcessOutcome::Skipped(SkipReason::MissingFields);
        }

        info!("Searching: {} by {}", record.title, record.creator);
        if let Some(link) = self.cache.resolve(&record.title, &record.creator) {
            info!("Found in cache: {}", display_link(&link));
            return ProcessOutcome::CacheHit(link);
        }

        if !self.rate_limiter.wait_for_request_slot(signals) {
            return ProcessOutcome::Skipped(SkipReason::Interrupted);
        }
        let link = self.search(record);
        // No-match results are cached too, so known-absent tracks are not searched again.
        self.cache
            .record(&record.title, &record.creator, &link, &self.attributed_user);

        let directive = self.rate_limiter.record_external_call();
        signals.set_external_calls(self.rate_limiter.external_calls());
        if let Some(directive) = directive {
            Self::cool_down(directive, signals);
        }
        ProcessOutcome::Fetched(link)
    }

    fn search(&self, record: &Record) -> String {
        let query = search_query(&record.title, &record.creator);
        match self.lookup.first_match(&query) {
            Ok(Some(link)) => link,
            Ok(None) => String::new(),
            Err(error) => {
                warn!("Error searching '{query}': {error}");
                String::new()
            }
        }
    }

    fn cool_down(directive: CooldownDirective, signals: &RunSignals) {
        let seconds = directive.duration.as_secs();
        info!(
            "Hit {} searches, sleeping {} seconds for safety...",
            directive.external_calls, seconds
        );
        signals.emit(PipelineEvent::CooldownStarted {
            seconds,
            external_calls: directive.external_calls,
        });
        if !signals.sleep_unless_stopped(directive.duration) {
            info!("Cooldown interrupted by stop request");
        }
        signals.emit(PipelineEvent::CooldownFinished);
    }
}

fn display_link(link: &str) -> &str {
    if link.is_empty() {
        "<no match>"
    } else {
        link
    }
}
