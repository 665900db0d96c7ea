//! Processor / Observation Creator: the canonical pipeline every [`Event`]
//! passes through between an adapter's channel send and a write.

use std::sync::Arc;
use std::time::Instant;

use zen_watcher_core::allowlist::Allowlist;
use zen_watcher_core::dedup::DedupCache;
use zen_watcher_core::event::{clamp_ttl, Event, Severity};
use zen_watcher_core::filter::Filter;
use zen_watcher_core::fingerprint::DedupKey;
use zen_watcher_core::normalize::{normalize_event_type, normalize_severity};
use zen_watcher_core::optimize::{OptimizationEngine, Strategy};
use zen_watcher_core::metrics as metric_names;
use zen_watcher_k8s::writer::{self, WriteTarget};
use zen_watcher_k8s::DynamicClient;

const UNKNOWN_SOURCE: &str = "unknown";

/// Everything the processor needs that is shared across every event and
/// every adapter. Cheap to clone (an `Arc` wrapper around the shared state).
#[derive(Clone)]
pub struct Processor {
    inner: Arc<Inner>,
}

struct Inner {
    client: DynamicClient,
    allowlist: Allowlist,
    filter: Filter,
    dedup: DedupCache,
    optimizer: OptimizationEngine,
    default_target: WriteTarget,
    config: crate::config_source::SourceConfigs,
    default_ttl_seconds: i64,
}

impl Processor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: DynamicClient,
        allowlist: Allowlist,
        filter: Filter,
        dedup: DedupCache,
        optimizer: OptimizationEngine,
        default_target: WriteTarget,
        config: crate::config_source::SourceConfigs,
        default_ttl_seconds: i64,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                allowlist,
                filter,
                dedup,
                optimizer,
                default_target,
                config,
                default_ttl_seconds,
            }),
        }
    }

    /// Run one event through the full pipeline: source resolution, TTL
    /// clamp, filter, dedup, normalize, allowlist gate, write.
    /// Never returns an error: every failure mode is logged and counted in
    /// place. A denial is not a process error.
    pub async fn process(&self, mut event: Event) {
        let inner = &self.inner;
        let source = if event.source.is_empty() {
            UNKNOWN_SOURCE.to_owned()
        } else {
            event.source.clone()
        };
        event.source = source.clone();

        let severity = normalize_severity(&event.severity);
        let is_low_severity = matches!(
            severity,
            Severity::Low | Severity::Info
        );
        inner.optimizer.record_attempt(&source, is_low_severity);

        let pin = inner.config.order_pin(&source);
        let strategy = inner.optimizer.decide_strategy(&source, pin);

        let dedup_key = DedupKey::derive(&event);
        let canonical = dedup_key.canonical();

        let passed = match strategy {
            Strategy::FilterFirst => {
                if !self.filter_step(&event, severity, &source) {
                    return;
                }
                self.dedup_step(&canonical, &source)
            }
            Strategy::DedupFirst => {
                if !self.dedup_step(&canonical, &source) {
                    return;
                }
                self.filter_step(&event, severity, &source)
            }
        };
        if !passed {
            return;
        }

        event.severity = severity.to_string();
        event.event_type = normalize_event_type(&event.event_type);
        event.ttl_seconds_after_creation = Some(clamp_ttl(
            event.ttl_seconds_after_creation,
            inner.default_ttl_seconds,
            &source,
        ));
        if event.detected_at.is_none() {
            event.detected_at = Some(chrono::Utc::now());
        }

        let target = inner.config.destination_target(&source).unwrap_or_else(|| inner.default_target.clone());

        if let Err(reason) = inner.allowlist.is_allowed(&target.gvr, Some(&event.namespace)) {
            metrics::counter!(
                metric_names::OBSERVATIONS_CREATE_ERRORS,
                "source" => source.clone(),
                "error_type" => "not_allowed"
            )
            .increment(1);
            tracing::warn!(source = %source, reason = reason.as_label(), "write denied by allowlist gate");
            return;
        }

        let start = Instant::now();
        match writer::write(&inner.client, &inner.allowlist, &target, &event).await {
            Ok(_created) => {
                let elapsed = start.elapsed();
                inner.optimizer.record_created(&source, severity);
                metrics::counter!(metric_names::OBSERVATIONS_CREATED, "source" => source.clone()).increment(1);
                metrics::counter!(
                    metric_names::EVENTS_TOTAL,
                    "source" => source.clone(),
                    "category" => event.category.to_string(),
                    "severity" => event.severity.clone(),
                    "eventType" => event.event_type.clone(),
                    "namespace" => event.namespace.clone(),
                    "kind" => target.gvr.resource.clone(),
                    "strategy" => strategy.as_label()
                )
                .increment(1);
                self.publish_gauges(&source);
                tracing::debug!(
                    source = %source,
                    event_type = %event.event_type,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "observation created"
                );
            }
            Err(err) => {
                metrics::counter!(
                    metric_names::OBSERVATIONS_CREATE_ERRORS,
                    "source" => source.clone(),
                    "error_type" => err.kind.as_label()
                )
                .increment(1);
                match err.kind {
                    zen_watcher_k8s::WriteErrorKind::AlreadyExists | zen_watcher_k8s::WriteErrorKind::Forbidden => {
                        tracing::warn!(source = %source, kind = err.kind.as_label(), "write rejected");
                    }
                    _ => {
                        tracing::error!(source = %source, kind = err.kind.as_label(), error = %err, "write failed");
                    }
                }
            }
        }
    }

    fn filter_step(&self, event: &Event, severity: Severity, source: &str) -> bool {
        let (allowed, reason) = self.inner.filter.allow_with_reason(event, severity);
        if !allowed {
            metrics::counter!(
                metric_names::OBSERVATIONS_FILTERED,
                "source" => source.to_owned(),
                "reason" => reason
            )
            .increment(1);
            tracing::debug!(source, reason, "event filtered");
        }
        allowed
    }

    fn dedup_step(&self, canonical_key: &str, source: &str) -> bool {
        let fresh = self.inner.dedup.should_create(canonical_key);
        if !fresh {
            self.inner.optimizer.record_deduped(source);
            metrics::counter!(metric_names::OBSERVATIONS_DEDUPED, "source" => source.to_owned()).increment(1);
            tracing::debug!(source, "event deduplicated");
        }
        fresh
    }

    /// Refresh every derived gauge for `source`. Called on every created
    /// event, per the optimization engine's contract.
    fn publish_gauges(&self, source: &str) {
        let optimizer = &self.inner.optimizer;
        metrics::gauge!(metric_names::GAUGE_FILTER_PASS_RATE, "source" => source.to_owned())
            .set(optimizer.filter_pass_rate(source));
        metrics::gauge!(metric_names::GAUGE_DEDUP_EFFECTIVENESS, "source" => source.to_owned())
            .set(optimizer.dedup_effectiveness(source));
        metrics::gauge!(metric_names::GAUGE_LOW_SEVERITY_PERCENT, "source" => source.to_owned())
            .set(optimizer.low_severity_share(source));
        metrics::gauge!(metric_names::GAUGE_EVENTS_PER_MINUTE, "source" => source.to_owned())
            .set(optimizer.events_per_minute(source));
        metrics::gauge!(metric_names::GAUGE_EVENTS_PER_HOUR, "source" => source.to_owned())
            .set(optimizer.events_per_hour(source));
        for severity in [
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low,
            Severity::Info,
        ] {
            metrics::gauge!(
                metric_names::GAUGE_SEVERITY_DISTRIBUTION,
                "source" => source.to_owned(),
                "severity" => severity.to_string()
            )
            .set(optimizer.severity_share(source, severity));
        }
    }
}
