//! Per-source optimization engine: tracks counters and chooses filter-first
//! vs dedup-first ordering.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::event::Severity;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);

/// The order the processor evaluates filter vs dedup in for a given source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    FilterFirst,
    DedupFirst,
}

impl Strategy {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::FilterFirst => "filter_first",
            Self::DedupFirst => "dedup_first",
        }
    }
}

/// An explicit order pin from Ingester configuration, which always wins
/// over the adaptive heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderPin {
    FilterFirst,
    DedupFirst,
}

/// Minimum sample size before the adaptive heuristic is trusted.
const MIN_SAMPLES_FOR_SWITCH: u64 = 100;

#[derive(Default)]
struct SourceCounters {
    attempted: AtomicU64,
    deduped: AtomicU64,
    created: AtomicU64,
    low_severity: AtomicU64,
    critical: AtomicU64,
    high: AtomicU64,
    medium: AtomicU64,
    low: AtomicU64,
    info: AtomicU64,
    last_update: std::sync::Mutex<Option<Instant>>,
    current_strategy: std::sync::Mutex<Option<Strategy>>,
    /// Timestamps of created events within the last hour, oldest first, used
    /// to derive the per-minute/per-hour rate gauges. Pruned lazily on read.
    creation_times: std::sync::Mutex<VecDeque<Instant>>,
}

/// Owns per-source counters and derives the filter/dedup ordering. Many
/// writers, sharded by [`DashMap`]; no single global lock.
pub struct OptimizationEngine {
    sources: DashMap<String, SourceCounters>,
}

impl Default for OptimizationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationEngine {
    pub fn new() -> Self {
        Self {
            sources: DashMap::new(),
        }
    }

    fn counters(&self, source: &str) -> dashmap::mapref::one::Ref<'_, String, SourceCounters> {
        if !self.sources.contains_key(source) {
            self.sources.entry(source.to_owned()).or_default();
        }
        self.sources.get(source).expect("just inserted")
    }

    /// Record an attempt, optionally noting whether the event's normalized
    /// severity is "low" (low or info) for the low-severity-share heuristic.
    pub fn record_attempt(&self, source: &str, is_low_severity: bool) {
        let counters = self.counters(source);
        counters.attempted.fetch_add(1, Ordering::Relaxed);
        if is_low_severity {
            counters.low_severity.fetch_add(1, Ordering::Relaxed);
        }
        *counters.last_update.lock().expect("lock poisoned") = Some(Instant::now());
    }

    pub fn record_deduped(&self, source: &str) {
        self.counters(source).deduped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful write, folding `severity` into the per-severity
    /// breakdown and noting the creation time for the rate gauges.
    pub fn record_created(&self, source: &str, severity: Severity) {
        let counters = self.counters(source);
        counters.created.fetch_add(1, Ordering::Relaxed);
        match severity {
            Severity::Critical => counters.critical.fetch_add(1, Ordering::Relaxed),
            Severity::High => counters.high.fetch_add(1, Ordering::Relaxed),
            Severity::Medium => counters.medium.fetch_add(1, Ordering::Relaxed),
            Severity::Low => counters.low.fetch_add(1, Ordering::Relaxed),
            Severity::Info => counters.info.fetch_add(1, Ordering::Relaxed),
        };
        let now = Instant::now();
        let mut times = counters.creation_times.lock().expect("lock poisoned");
        times.push_back(now);
        while times.front().is_some_and(|t| now.duration_since(*t) > HOUR) {
            times.pop_front();
        }
    }

    /// Filter pass rate: share of attempts that were not filtered out.
    /// Exposed as a gauge.
    pub fn filter_pass_rate(&self, source: &str) -> f64 {
        let counters = self.counters(source);
        let attempted = counters.attempted.load(Ordering::Relaxed);
        if attempted == 0 {
            return 1.0;
        }
        let created = counters.created.load(Ordering::Relaxed);
        let deduped = counters.deduped.load(Ordering::Relaxed);
        // events that passed the filter are everything that wasn't dropped
        // for dedup reasons alone; approximate with created+deduped over
        // attempted since the engine does not separately track
        // filter-specific drops (the processor owns that metric).
        ((created + deduped) as f64 / attempted as f64).min(1.0)
    }

    /// Dedup effectiveness: share of attempts that turned out to be
    /// duplicates.
    pub fn dedup_effectiveness(&self, source: &str) -> f64 {
        let counters = self.counters(source);
        let attempted = counters.attempted.load(Ordering::Relaxed);
        if attempted == 0 {
            return 0.0;
        }
        counters.deduped.load(Ordering::Relaxed) as f64 / attempted as f64
    }

    /// Share of attempts whose severity was low/info.
    pub fn low_severity_share(&self, source: &str) -> f64 {
        let counters = self.counters(source);
        let attempted = counters.attempted.load(Ordering::Relaxed);
        if attempted == 0 {
            return 0.0;
        }
        counters.low_severity.load(Ordering::Relaxed) as f64 / attempted as f64
    }

    pub fn attempted(&self, source: &str) -> u64 {
        self.counters(source).attempted.load(Ordering::Relaxed)
    }

    /// Created-event rate over the trailing minute.
    pub fn events_per_minute(&self, source: &str) -> f64 {
        let counters = self.counters(source);
        let times = counters.creation_times.lock().expect("lock poisoned");
        let now = Instant::now();
        times.iter().filter(|t| now.duration_since(**t) <= MINUTE).count() as f64
    }

    /// Created-event rate over the trailing hour.
    pub fn events_per_hour(&self, source: &str) -> f64 {
        let counters = self.counters(source);
        let times = counters.creation_times.lock().expect("lock poisoned");
        let now = Instant::now();
        times.iter().filter(|t| now.duration_since(**t) <= HOUR).count() as f64
    }

    /// Share of created events at `severity`, for the severity-distribution
    /// gauge (labeled per severity at the call site).
    pub fn severity_share(&self, source: &str, severity: Severity) -> f64 {
        let counters = self.counters(source);
        let created = counters.created.load(Ordering::Relaxed);
        if created == 0 {
            return 0.0;
        }
        let count = match severity {
            Severity::Critical => counters.critical.load(Ordering::Relaxed),
            Severity::High => counters.high.load(Ordering::Relaxed),
            Severity::Medium => counters.medium.load(Ordering::Relaxed),
            Severity::Low => counters.low.load(Ordering::Relaxed),
            Severity::Info => counters.info.load(Ordering::Relaxed),
        };
        count as f64 / created as f64
    }

    /// Decide the strategy for `source`. A configured `pin` always wins.
    /// Otherwise: low-severity share > 70% favors
    /// filter-first (cheap drop of noise); dedup effectiveness > 50% (once
    /// at least `MIN_SAMPLES_FOR_SWITCH` attempts have been observed) favors
    /// dedup-first; otherwise filter-first. Logs once per actual change.
    pub fn decide_strategy(&self, source: &str, pin: Option<OrderPin>) -> Strategy {
        let decided = if let Some(pin) = pin {
            match pin {
                OrderPin::FilterFirst => Strategy::FilterFirst,
                OrderPin::DedupFirst => Strategy::DedupFirst,
            }
        } else if self.low_severity_share(source) > 0.70 {
            Strategy::FilterFirst
        } else if self.attempted(source) >= MIN_SAMPLES_FOR_SWITCH && self.dedup_effectiveness(source) > 0.50 {
            Strategy::DedupFirst
        } else {
            Strategy::FilterFirst
        };

        let counters = self.counters(source);
        let mut current = counters.current_strategy.lock().expect("lock poisoned");
        if *current != Some(decided) {
            tracing::info!(
                source,
                from = current.map(Strategy::as_label).unwrap_or("none"),
                to = decided.as_label(),
                "processing order changed for source"
            );
            *current = Some(decided);
        }
        decided
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_filter_first_with_no_data() {
        let engine = OptimizationEngine::new();
        assert_eq!(engine.decide_strategy("new-source", None), Strategy::FilterFirst);
    }

    #[test]
    fn pin_always_wins() {
        let engine = OptimizationEngine::new();
        for _ in 0..200 {
            engine.record_attempt("pinned", false);
            engine.record_deduped("pinned");
        }
        assert_eq!(
            engine.decide_strategy("pinned", Some(OrderPin::FilterFirst)),
            Strategy::FilterFirst
        );
    }

    #[test]
    fn high_dedup_effectiveness_switches_to_dedup_first() {
        let engine = OptimizationEngine::new();
        for i in 0..200 {
            engine.record_attempt("noisy", false);
            if i % 10 != 0 {
                engine.record_deduped("noisy");
            } else {
                engine.record_created("noisy", Severity::Medium);
            }
        }
        assert_eq!(engine.decide_strategy("noisy", None), Strategy::DedupFirst);
    }

    #[test]
    fn severity_share_reflects_created_breakdown() {
        let engine = OptimizationEngine::new();
        engine.record_created("sevtest", Severity::Critical);
        engine.record_created("sevtest", Severity::Critical);
        engine.record_created("sevtest", Severity::Low);
        assert!((engine.severity_share("sevtest", Severity::Critical) - (2.0 / 3.0)).abs() < 1e-9);
        assert!((engine.severity_share("sevtest", Severity::Low) - (1.0 / 3.0)).abs() < 1e-9);
        assert_eq!(engine.severity_share("sevtest", Severity::High), 0.0);
    }

    #[test]
    fn rate_gauges_count_recent_creations() {
        let engine = OptimizationEngine::new();
        for _ in 0..5 {
            engine.record_created("rated", Severity::Info);
        }
        assert_eq!(engine.events_per_minute("rated"), 5.0);
        assert_eq!(engine.events_per_hour("rated"), 5.0);
    }

    #[test]
    fn below_sample_threshold_stays_filter_first_even_with_high_dedup() {
        let engine = OptimizationEngine::new();
        for _ in 0..10 {
            engine.record_attempt("fresh", false);
            engine.record_deduped("fresh");
        }
        assert_eq!(engine.decide_strategy("fresh", None), Strategy::FilterFirst);
    }

    #[test]
    fn high_low_severity_share_wins_over_dedup_effectiveness() {
        let engine = OptimizationEngine::new();
        for _ in 0..200 {
            engine.record_attempt("spammy", true);
            engine.record_deduped("spammy");
        }
        assert_eq!(engine.decide_strategy("spammy", None), Strategy::FilterFirst);
    }
}
