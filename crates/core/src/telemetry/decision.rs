use crate::audit::EventSeverity;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Maximum number of samples retained per event type for sliding-window stats.
pub const MAX_WINDOW_SAMPLES: usize = 10_000;

pub const LATENCY_BUCKETS_MS: &[f64] = &[
    10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

/// A single emission from a decision node: ingest, validate, form-generation,
/// payment-processing, submission-attempt, confirmation-received, or any
/// other named stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub event_type: String,
    pub agent_id: String,
    pub latency_ms: u64,
    pub success: bool,
    pub severity: EventSeverity,
    pub confidence_score: Option<f64>,
    pub metadata: serde_json::Value,
}

impl DecisionEvent {
    pub fn new(event_type: impl Into<String>, agent_id: impl Into<String>, latency_ms: u64, success: bool) -> Self {
        Self {
            event_type: event_type.into(),
            agent_id: agent_id.into(),
            latency_ms,
            success,
            severity: EventSeverity::Info,
            confidence_score: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_severity(mut self, severity: EventSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_score = Some(confidence);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Default)]
struct WindowStats {
    samples: VecDeque<(u64, bool)>,
}

impl WindowStats {
    fn record(&mut self, latency_ms: u64, success: bool) {
        self.samples.push_back((latency_ms, success));
        while self.samples.len() > MAX_WINDOW_SAMPLES {
            self.samples.pop_front();
        }
    }

    fn success_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 1.0;
        }
        let successes = self.samples.iter().filter(|(_, ok)| *ok).count();
        successes as f64 / self.samples.len() as f64
    }

    fn avg_latency_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: u64 = self.samples.iter().map(|(lat, _)| lat).sum();
        total as f64 / self.samples.len() as f64
    }
}

/// Per-`(eventType, severity, agentId, success)` monotonic counters plus
/// a per-`eventType` sliding window of the most recent `MAX_WINDOW_SAMPLES`
/// events, used for success-rate and average-latency reporting.
#[derive(Clone)]
pub struct DecisionStats {
    windows: Arc<RwLock<HashMap<String, WindowStats>>>,
    counters: Arc<RwLock<HashMap<(String, EventSeverity, String, bool), Arc<AtomicU64>>>>,
}

impl DecisionStats {
    pub fn new() -> Self {
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            counters: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn record(&self, event: &DecisionEvent) {
        {
            let mut windows = self.windows.write().await;
            windows
                .entry(event.event_type.clone())
                .or_default()
                .record(event.latency_ms, event.success);
        }

        let key = (
            event.event_type.clone(),
            event.severity,
            event.agent_id.clone(),
            event.success,
        );
        let counter = {
            let counters = self.counters.read().await;
            counters.get(&key).cloned()
        };
        let counter = match counter {
            Some(c) => c,
            None => {
                let mut counters = self.counters.write().await;
                counters
                    .entry(key)
                    .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                    .clone()
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn success_rate(&self, event_type: &str) -> f64 {
        self.windows
            .read()
            .await
            .get(event_type)
            .map(WindowStats::success_rate)
            .unwrap_or(1.0)
    }

    pub async fn avg_latency_ms(&self, event_type: &str) -> f64 {
        self.windows
            .read()
            .await
            .get(event_type)
            .map(WindowStats::avg_latency_ms)
            .unwrap_or(0.0)
    }

    pub async fn counter(
        &self,
        event_type: &str,
        severity: EventSeverity,
        agent_id: &str,
        success: bool,
    ) -> u64 {
        let key = (event_type.to_string(), severity, agent_id.to_string(), success);
        self.counters
            .read()
            .await
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl Default for DecisionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic drift counters keyed by `(severity, action)`. The upstream
/// drift-detection algorithm lives outside the kernel; this only exposes
/// the counter and the logging API it feeds.
#[derive(Clone)]
pub struct DriftCounter {
    counts: Arc<RwLock<HashMap<(EventSeverity, String), Arc<AtomicU64>>>>,
}

impl DriftCounter {
    pub fn new() -> Self {
        Self {
            counts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn record(&self, severity: EventSeverity, action: impl Into<String>) {
        let key = (severity, action.into());
        let counter = {
            let counts = self.counts.read().await;
            counts.get(&key).cloned()
        };
        let counter = match counter {
            Some(c) => c,
            None => {
                let mut counts = self.counts.write().await;
                counts
                    .entry(key)
                    .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                    .clone()
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn count(&self, severity: EventSeverity, action: &str) -> u64 {
        let key = (severity, action.to_string());
        self.counts
            .read()
            .await
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl Default for DriftCounter {
    fn default() -> Self {
        Self::new()
    }
}
