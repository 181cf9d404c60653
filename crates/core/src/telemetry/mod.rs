//! Telemetry & SLO tracking (C3).
//!
//! Every decision node in the workflow orchestrator emits a [`DecisionEvent`]
//! through [`TelemetryService::log_event`]. The service maintains sliding-window
//! success-rate/latency stats, monotonic counters, a latency histogram with the
//! buckets fixed by the kernel's external contract, a drift counter, and SLO
//! compliance evaluation against configurable targets.

pub mod decision;
pub mod registry;
pub mod slo;

pub use decision::{DecisionEvent, DecisionStats, DriftCounter, LATENCY_BUCKETS_MS};
pub use registry::{MetricsRegistry, MetricsService};
pub use slo::{SloEntry, SloEvaluator, SloReport, SloSample, SloTargets, Trend};

use crate::audit::EventSeverity;
use prometheus::{HistogramVec, IntCounterVec, Opts};
use tracing::{info, warn};

/// Façade combining counters, histograms, the sliding-window stats, the drift
/// counter, and SLO evaluation behind the stable operations named in the
/// kernel's external interface: `logEvent`, `logDrift`, `checkSLOCompliance`,
/// `metricsText`.
pub struct TelemetryService {
    registry: MetricsRegistry,
    stats: DecisionStats,
    drift: DriftCounter,
    slo: SloEvaluator,
    latency_histogram: HistogramVec,
    event_counter: IntCounterVec,
    drift_total: IntCounterVec,
}

impl TelemetryService {
    pub fn new(registry: MetricsRegistry, slo_targets: SloTargets) -> Self {
        let latency_histogram = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "occam_decision_latency_ms",
                "Latency of decision-node events in milliseconds",
            )
            .buckets(LATENCY_BUCKETS_MS.to_vec()),
            &["event_type"],
        )
        .expect("valid histogram opts");

        let event_counter = IntCounterVec::new(
            Opts::new("occam_decision_events_total", "Decision node events by outcome"),
            &["event_type", "severity", "agent_id", "success"],
        )
        .expect("valid counter opts");

        let drift_total = IntCounterVec::new(
            Opts::new("occam_drift_total", "Drift detections by severity and action"),
            &["severity", "action"],
        )
        .expect("valid counter opts");

        if let Err(e) = registry.register(latency_histogram.clone()) {
            warn!(error = %e, "failed to register decision latency histogram");
        }
        if let Err(e) = registry.register(event_counter.clone()) {
            warn!(error = %e, "failed to register decision event counter");
        }
        if let Err(e) = registry.register(drift_total.clone()) {
            warn!(error = %e, "failed to register drift counter");
        }

        Self {
            registry,
            stats: DecisionStats::new(),
            drift: DriftCounter::new(),
            slo: SloEvaluator::new(slo_targets),
            latency_histogram,
            event_counter,
            drift_total,
        }
    }

    /// Record a decision-node emission: `{eventType, agentId, latencyMs, success, confidenceScore?, metadata}`.
    pub async fn log_event(&self, event: DecisionEvent) {
        self.latency_histogram
            .with_label_values(&[&event.event_type])
            .observe(event.latency_ms as f64);
        self.event_counter
            .with_label_values(&[
                &event.event_type,
                &event.severity.to_string(),
                &event.agent_id,
                &event.success.to_string(),
            ])
            .inc();

        info!(
            event_type = %event.event_type,
            agent_id = %event.agent_id,
            latency_ms = event.latency_ms,
            success = event.success,
            confidence = ?event.confidence_score,
            "decision node event"
        );

        self.stats.record(&event).await;
    }

    /// Record a drift detection; the detection algorithm itself lives outside the kernel.
    pub async fn log_drift(&self, severity: EventSeverity, action: impl Into<String>) {
        let action = action.into();
        self.drift_total
            .with_label_values(&[&severity.to_string(), &action])
            .inc();
        self.drift.record(severity, action).await;
    }

    pub async fn success_rate(&self, event_type: &str) -> f64 {
        self.stats.success_rate(event_type).await
    }

    pub async fn avg_latency_ms(&self, event_type: &str) -> f64 {
        self.stats.avg_latency_ms(event_type).await
    }

    pub async fn drift_count(&self, severity: EventSeverity, action: &str) -> u64 {
        self.drift.count(severity, action).await
    }

    pub async fn record_resource_usage(&self, cpu_percent: f64, memory_percent: f64) {
        self.slo.record_resource_usage(cpu_percent, memory_percent).await;
    }

    pub async fn check_slo_compliance(&self, measured: SloSample) -> SloReport {
        self.slo.check_compliance(measured).await
    }

    /// Build an [`SloSample`] from this service's own running decision stats
    /// for `event_type` (average latency, success rate as a proxy for
    /// compliance accuracy) and evaluate it. `build_time_secs` is left at its
    /// default since decision-node stats carry no build-duration signal; CPU
    /// and memory fall back to whatever [`Self::record_resource_usage`] last
    /// recorded. The one genuinely external input, `audit_trace_verification`,
    /// is fixed at `1.0` here — callers that want it to reflect an actual
    /// chain `verify()` run should call [`Self::check_slo_compliance`] directly
    /// with a fully populated sample instead.
    pub async fn check_slo_compliance_for(&self, event_type: &str) -> SloReport {
        let sample = SloSample {
            retrieval_latency_ms: self.avg_latency_ms(event_type).await,
            compliance_accuracy: self.success_rate(event_type).await,
            audit_trace_verification: 1.0,
            ..SloSample::default()
        };
        self.check_slo_compliance(sample).await
    }

    /// Text exposition in the common `name{labels} value` format for scraping.
    pub fn metrics_text(&self) -> String {
        self.registry.metrics_text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SloConfig, TelemetryConfig};

    fn test_telemetry_config() -> TelemetryConfig {
        TelemetryConfig {
            metrics_enabled: true,
            metrics_port: 9090,
            metrics_path: "/metrics".to_string(),
            metrics_namespace: "occam_telemetry_test".to_string(),
            slo: SloConfig {
                retrieval_latency_ms: 500.0,
                build_time_secs: 60.0,
                compliance_accuracy: 0.99,
                audit_trace_verification: 1.0,
                cpu_percent: 80.0,
                memory_percent: 80.0,
            },
        }
    }

    #[tokio::test]
    async fn check_slo_compliance_for_reflects_logged_decision_events() {
        crate::init_test_logging();
        let service = TelemetryService::new(MetricsRegistry::new(test_telemetry_config()), SloTargets::default());

        for _ in 0..3 {
            service
                .log_event(DecisionEvent::new("validation-check", "agent-1", 50, true))
                .await;
        }

        let report = service.check_slo_compliance_for("validation-check").await;
        let retrieval = report.entries.iter().find(|e| e.name == "retrieval_latency").unwrap();
        assert_eq!(retrieval.actual, 50.0);
        assert!(retrieval.compliant);
        let accuracy = report.entries.iter().find(|e| e.name == "compliance_accuracy").unwrap();
        assert_eq!(accuracy.actual, 1.0);
        assert!(report.violated.is_empty());

        for _ in 0..10 {
            service
                .log_event(DecisionEvent::new("validation-check", "agent-1", 5_000, false))
                .await;
        }

        let degraded = service.check_slo_compliance_for("validation-check").await;
        assert!(degraded.violated.contains(&"retrieval_latency".to_string()));
        assert!(degraded.violated.contains(&"compliance_accuracy".to_string()));
    }
}
