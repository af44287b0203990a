//! Decision metrics with Prometheus text export

use super::decision::{Decision, DecisionSource};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Engine performance metrics
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Total number of decisions produced
    pub total_decisions: u64,

    pub allowed_decisions: u64,

    pub denied_decisions: u64,

    /// Decisions per source
    pub by_source: BTreeMap<DecisionSource, u64>,

    /// Policy cache hits
    pub cache_hits: u64,

    /// Policy cache misses
    pub cache_misses: u64,

    /// Latency percentiles
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,

    pub avg_latency_ms: f64,

    /// Evaluations aborted by a store error
    pub store_errors: u64,

    /// Evaluations aborted by cancellation
    pub cancellations: u64,
}

impl EngineMetrics {
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    pub fn allow_rate(&self) -> f64 {
        if self.total_decisions == 0 {
            0.0
        } else {
            self.allowed_decisions as f64 / self.total_decisions as f64
        }
    }
}

/// Metrics collector
pub struct MetricsCollector {
    metrics: Arc<RwLock<EngineMetrics>>,

    /// Recent latency samples for percentile calculation
    latency_samples: Arc<RwLock<Vec<f64>>>,

    max_samples: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(10_000))),
            max_samples: 10_000,
        }
    }

    pub async fn record_cache_hit(&self) {
        self.metrics.write().await.cache_hits += 1;
    }

    pub async fn record_cache_miss(&self) {
        self.metrics.write().await.cache_misses += 1;
    }

    pub async fn record_decision(&self, decision: &Decision) {
        let mut metrics = self.metrics.write().await;
        metrics.total_decisions += 1;

        if decision.allowed {
            metrics.allowed_decisions += 1;
        } else {
            metrics.denied_decisions += 1;
        }
        *metrics.by_source.entry(decision.source).or_insert(0) += 1;
    }

    pub async fn record_store_error(&self) {
        self.metrics.write().await.store_errors += 1;
    }

    pub async fn record_cancellation(&self) {
        self.metrics.write().await.cancellations += 1;
    }

    pub async fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write().await;
        samples.push(latency_ms);

        if samples.len() > self.max_samples {
            samples.drain(0..1_000);
        }

        let mut sorted = samples.clone();
        drop(samples);
        sorted.sort_by(f64::total_cmp);

        let mut metrics = self.metrics.write().await;
        metrics.avg_latency_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
        metrics.latency_p50_ms = Self::percentile(&sorted, 0.50);
        metrics.latency_p90_ms = Self::percentile(&sorted, 0.90);
        metrics.latency_p99_ms = Self::percentile(&sorted, 0.99);
    }

    /// Current metrics snapshot
    pub async fn get_metrics(&self) -> EngineMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn reset(&self) {
        *self.metrics.write().await = EngineMetrics::default();
        self.latency_samples.write().await.clear();
    }

    /// Export metrics in Prometheus text format
    pub async fn export_prometheus(&self) -> String {
        let metrics = self.metrics.read().await;

        let mut by_source = String::new();
        for source in DecisionSource::ALL {
            let count = metrics.by_source.get(&source).copied().unwrap_or(0);
            by_source.push_str(&format!(
                "authz_decisions_by_source_total{{source=\"{}\"}} {}\n",
                source, count
            ));
        }

        format!(
            r#"# HELP authz_decisions_total Total number of authorization decisions
# TYPE authz_decisions_total counter
authz_decisions_total {}

# HELP authz_allowed_total Number of allowed decisions
# TYPE authz_allowed_total counter
authz_allowed_total {}

# HELP authz_denied_total Number of denied decisions
# TYPE authz_denied_total counter
authz_denied_total {}

# HELP authz_decisions_by_source_total Decisions per source
# TYPE authz_decisions_by_source_total counter
{}
# HELP authz_cache_hits_total Policy cache hits
# TYPE authz_cache_hits_total counter
authz_cache_hits_total {}

# HELP authz_cache_misses_total Policy cache misses
# TYPE authz_cache_misses_total counter
authz_cache_misses_total {}

# HELP authz_latency_seconds Decision latency percentiles
# TYPE authz_latency_seconds summary
authz_latency_seconds{{quantile="0.5"}} {}
authz_latency_seconds{{quantile="0.9"}} {}
authz_latency_seconds{{quantile="0.99"}} {}

# HELP authz_store_errors_total Evaluations aborted by store errors
# TYPE authz_store_errors_total counter
authz_store_errors_total {}

# HELP authz_cancellations_total Evaluations aborted by cancellation
# TYPE authz_cancellations_total counter
authz_cancellations_total {}
"#,
            metrics.total_decisions,
            metrics.allowed_decisions,
            metrics.denied_decisions,
            by_source,
            metrics.cache_hits,
            metrics.cache_misses,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p90_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
            metrics.store_errors,
            metrics.cancellations,
        )
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
