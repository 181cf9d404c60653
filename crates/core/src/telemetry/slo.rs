use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Service-level objective targets. Defaults match the kernel's baseline
/// commitments; deployments may override any of them via configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloTargets {
    pub retrieval_latency_ms: f64,
    pub build_time_secs: f64,
    pub compliance_accuracy: f64,
    pub audit_trace_verification: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

impl Default for SloTargets {
    fn default() -> Self {
        Self {
            retrieval_latency_ms: 2500.0,
            build_time_secs: 7.0 * 60.0,
            compliance_accuracy: 0.97,
            audit_trace_verification: 1.0,
            cpu_percent: 80.0,
            memory_percent: 75.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Degrading,
    Stable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloEntry {
    pub name: String,
    pub target: f64,
    pub actual: f64,
    pub compliant: bool,
    pub trend: Trend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloReport {
    pub entries: Vec<SloEntry>,
    pub violated: Vec<String>,
}

/// The measured process/system values `checkSLOCompliance` compares against
/// [`SloTargets`]. Resource sampling (CPU/memory percent) is platform-specific
/// and is fed in from outside the kernel via [`SloEvaluator::record_resource_usage`];
/// everything else is computed from the kernel's own telemetry.
#[derive(Debug, Clone, Default)]
pub struct SloSample {
    pub retrieval_latency_ms: f64,
    pub build_time_secs: f64,
    pub compliance_accuracy: f64,
    pub audit_trace_verification: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Evaluates SLO compliance against a rolling "prior window" so that trend
/// can be reported as improving/degrading/stable rather than a bare snapshot.
pub struct SloEvaluator {
    targets: SloTargets,
    prior: Arc<RwLock<HashMap<String, f64>>>,
    resource_usage: Arc<RwLock<(f64, f64)>>,
}

impl SloEvaluator {
    pub fn new(targets: SloTargets) -> Self {
        Self {
            targets,
            prior: Arc::new(RwLock::new(HashMap::new())),
            resource_usage: Arc::new(RwLock::new((0.0, 0.0))),
        }
    }

    /// Feed in the latest CPU/memory utilization, sampled by a periodic tick
    /// external to the kernel (the actual sampling mechanism is OS-specific).
    pub async fn record_resource_usage(&self, cpu_percent: f64, memory_percent: f64) {
        *self.resource_usage.write().await = (cpu_percent, memory_percent);
    }

    pub async fn check_compliance(&self, measured: SloSample) -> SloReport {
        let (cpu, memory) = {
            let usage = self.resource_usage.read().await;
            if measured.cpu_percent > 0.0 || measured.memory_percent > 0.0 {
                (measured.cpu_percent, measured.memory_percent)
            } else {
                *usage
            }
        };

        let candidates = [
            ("retrieval_latency", self.targets.retrieval_latency_ms, measured.retrieval_latency_ms, false),
            ("build_time", self.targets.build_time_secs, measured.build_time_secs, false),
            ("compliance_accuracy", self.targets.compliance_accuracy, measured.compliance_accuracy, true),
            (
                "audit_trace_verification",
                self.targets.audit_trace_verification,
                measured.audit_trace_verification,
                true,
            ),
            ("cpu", self.targets.cpu_percent, cpu, false),
            ("memory", self.targets.memory_percent, memory, false),
        ];

        let mut entries = Vec::with_capacity(candidates.len());
        let mut violated = Vec::new();
        let mut prior = self.prior.write().await;

        for (name, target, actual, higher_is_better) in candidates {
            let compliant = if higher_is_better {
                actual >= target
            } else {
                actual <= target
            };
            if !compliant {
                violated.push(name.to_string());
            }

            let trend = match prior.get(name) {
                None => Trend::Stable,
                Some(&prev) => {
                    let improved = if higher_is_better { actual > prev } else { actual < prev };
                    let degraded = if higher_is_better { actual < prev } else { actual > prev };
                    if (actual - prev).abs() < f64::EPSILON {
                        Trend::Stable
                    } else if improved {
                        Trend::Improving
                    } else if degraded {
                        Trend::Degrading
                    } else {
                        Trend::Stable
                    }
                }
            };
            prior.insert(name.to_string(), actual);

            entries.push(SloEntry {
                name: name.to_string(),
                target,
                actual,
                compliant,
                trend,
            });
        }

        SloReport { entries, violated }
    }
}
