//! Pure, O(1)-amortized policy filter.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::event::{Category, Event, Severity};

/// A short, stable, machine-readable reason a filter decision was made. Used
/// both as a metrics label and in log lines.
pub type ReasonToken = &'static str;

pub const REASON_ALLOWED: ReasonToken = "allowed";
pub const REASON_SEVERITY_BELOW_THRESHOLD: ReasonToken = "severity_below_threshold";
pub const REASON_EXCLUDED_NAMESPACE: ReasonToken = "excluded_namespace";
pub const REASON_EXCLUDED_SOURCE: ReasonToken = "excluded_source";
pub const REASON_EXCLUDED_CATEGORY: ReasonToken = "excluded_category";
pub const REASON_RATE_CAPPED: ReasonToken = "rate_capped";

/// Policy configuration for the filter. All fields default to "no
/// restriction" so an empty policy allows everything.
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    pub denied_sources: HashSet<String>,
    pub denied_namespaces: HashSet<String>,
    pub denied_categories: HashSet<Category>,
    pub minimum_severity: Option<Severity>,
    /// Per-source rate cap: at most `limit` accepted events per `window`.
    pub rate_caps: HashMap<String, RateCap>,
}

#[derive(Debug, Clone, Copy)]
pub struct RateCap {
    pub limit: u32,
    pub window: Duration,
}

fn severity_rank(s: Severity) -> u8 {
    match s {
        Severity::Critical => 4,
        Severity::High => 3,
        Severity::Medium => 2,
        Severity::Low => 1,
        Severity::Info => 0,
    }
}

struct RateWindow {
    count: AtomicU32,
    window_start: std::sync::Mutex<Instant>,
}

/// Evaluates [`FilterPolicy`] against events. Pure with respect to the event
/// under evaluation; the only internal state is the rate-cap counters, which
/// are reset on window rollover, not on arbitrary I/O.
pub struct Filter {
    policy: FilterPolicy,
    rate_windows: DashMap<String, RateWindow>,
}

impl Filter {
    pub fn new(policy: FilterPolicy) -> Self {
        Self {
            policy,
            rate_windows: DashMap::new(),
        }
    }

    /// Decide whether `event` (already normalized enough to know its
    /// severity/category/namespace/source) should produce an Observation.
    pub fn allow_with_reason(&self, event: &Event, severity: Severity) -> (bool, ReasonToken) {
        if self.policy.denied_sources.contains(&event.source) {
            return (false, REASON_EXCLUDED_SOURCE);
        }
        if self.policy.denied_namespaces.contains(&event.namespace) {
            return (false, REASON_EXCLUDED_NAMESPACE);
        }
        if self.policy.denied_categories.contains(&event.category) {
            return (false, REASON_EXCLUDED_CATEGORY);
        }
        if let Some(min) = self.policy.minimum_severity {
            if severity_rank(severity) < severity_rank(min) {
                return (false, REASON_SEVERITY_BELOW_THRESHOLD);
            }
        }
        if let Some(cap) = self.policy.rate_caps.get(&event.source) {
            if !self.check_rate_cap(&event.source, *cap) {
                return (false, REASON_RATE_CAPPED);
            }
        }
        (true, REASON_ALLOWED)
    }

    fn check_rate_cap(&self, source: &str, cap: RateCap) -> bool {
        let entry = self.rate_windows.entry(source.to_owned()).or_insert_with(|| RateWindow {
            count: AtomicU32::new(0),
            window_start: std::sync::Mutex::new(Instant::now()),
        });

        let mut start = entry.window_start.lock().expect("rate window lock poisoned");
        if start.elapsed() >= cap.window {
            *start = Instant::now();
            entry.count.store(0, Ordering::Relaxed);
        }
        drop(start);

        let prior = entry.count.fetch_add(1, Ordering::Relaxed);
        prior < cap.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ResourceRef;

    fn sample_event(source: &str, namespace: &str) -> Event {
        Event {
            source: source.into(),
            category: Category::Security,
            severity: "high".into(),
            event_type: "vulnerability".into(),
            resource: Some(ResourceRef {
                api_version: None,
                kind: "Deployment".into(),
                name: "api".into(),
                namespace: Some(namespace.into()),
            }),
            details: Default::default(),
            namespace: namespace.into(),
            detected_at: None,
            ttl_seconds_after_creation: None,
            annotations: Default::default(),
        }
    }

    #[test]
    fn empty_policy_allows_everything() {
        let filter = Filter::new(FilterPolicy::default());
        let (allowed, reason) = filter.allow_with_reason(&sample_event("trivy", "prod"), Severity::High);
        assert!(allowed);
        assert_eq!(reason, REASON_ALLOWED);
    }

    #[test]
    fn denied_namespace_is_rejected() {
        let mut policy = FilterPolicy::default();
        policy.denied_namespaces.insert("kube-system".into());
        let filter = Filter::new(policy);
        let (allowed, reason) = filter.allow_with_reason(&sample_event("trivy", "kube-system"), Severity::High);
        assert!(!allowed);
        assert_eq!(reason, REASON_EXCLUDED_NAMESPACE);
    }

    #[test]
    fn below_threshold_severity_is_rejected() {
        let mut policy = FilterPolicy::default();
        policy.minimum_severity = Some(Severity::High);
        let filter = Filter::new(policy);
        let (allowed, reason) = filter.allow_with_reason(&sample_event("trivy", "prod"), Severity::Low);
        assert!(!allowed);
        assert_eq!(reason, REASON_SEVERITY_BELOW_THRESHOLD);
    }

    #[test]
    fn rate_cap_trips_after_limit() {
        let mut policy = FilterPolicy::default();
        policy.rate_caps.insert(
            "falco".into(),
            RateCap {
                limit: 2,
                window: Duration::from_secs(60),
            },
        );
        let filter = Filter::new(policy);
        let event = sample_event("falco", "prod");
        assert!(filter.allow_with_reason(&event, Severity::High).0);
        assert!(filter.allow_with_reason(&event, Severity::High).0);
        let (allowed, reason) = filter.allow_with_reason(&event, Severity::High);
        assert!(!allowed);
        assert_eq!(reason, REASON_RATE_CAPPED);
    }
}
