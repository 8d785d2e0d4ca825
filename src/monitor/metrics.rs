//! # Metrics & Health Scoring
//!
//! The metrics snapshot type, the deterministic health heuristic, and the
//! dashboard projection assembled from recent snapshots.
//!
//! Health scoring is a fixed weighted arithmetic, not a model; the exact
//! numbers are pinned by tests so dashboards and alert thresholds stay
//! comparable across versions.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One periodic aggregate over pipeline state. Appended by the metrics
/// loop; snapshots older than the retention window are pruned on insert.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Requests observed across all sources in the trailing hour.
    pub total_requests: u64,
    /// Findings recorded in the trailing hour.
    pub threats_detected: u64,
    /// Responses in the trailing hour that ordered a block.
    pub threats_blocked: u64,
    pub unique_sources: u64,
    pub blocked_source_count: u64,
    /// Mean admission latency since the previous snapshot.
    pub pipeline_latency_ms: f64,
    pub health_label: String,
}

/// Boolean threshold alerts surfaced on the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardAlerts {
    pub high_threat_rate: bool,
    pub many_blocked_sources: bool,
    pub high_latency: bool,
}

/// Running-state flags for the monitor and its loops.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub monitor_active: bool,
    pub sweep_loop: bool,
    pub metrics_loop: bool,
    pub health_loop: bool,
    pub classifier_running: bool,
}

/// The dashboard projection handed to the embedding application.
///
/// `status` is the current health label, or `"no_data"` before the first
/// snapshot has been collected.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub status: String,
    pub generated_at: DateTime<Utc>,
    pub current: Option<MetricsSnapshot>,
    /// Up to the last twelve snapshots' detection counts, oldest first.
    pub threats_detected_trend: Vec<u64>,
    /// Up to the last twelve snapshots' block counts, oldest first.
    pub threats_blocked_trend: Vec<u64>,
    pub alerts: DashboardAlerts,
    pub components: ComponentStatus,
}

/// How many trailing snapshots feed the dashboard trend arrays.
pub const TREND_POINTS: usize = 12;

/// Deterministic health heuristic over recent snapshots.
///
/// Starts at 100. Latency: -20 above 1000ms average, -10 above 500ms.
/// Threat volume: -30 above 50 average detections, -15 above 20. Block
/// rate (blocked / detected): +10 above 0.9, -20 below 0.5, no adjustment
/// when nothing was detected. An empty sequence scores 100.
pub fn compute_health(snapshots: &[MetricsSnapshot]) -> (i32, &'static str) {
    if snapshots.is_empty() {
        return (100, health_label(100));
    }
    let n = snapshots.len() as f64;
    let avg_latency = snapshots.iter().map(|s| s.pipeline_latency_ms).sum::<f64>() / n;
    let avg_threats = snapshots.iter().map(|s| s.threats_detected as f64).sum::<f64>() / n;
    let detected: u64 = snapshots.iter().map(|s| s.threats_detected).sum();
    let blocked: u64 = snapshots.iter().map(|s| s.threats_blocked).sum();

    let mut score = 100;
    if avg_latency > 1000.0 {
        score -= 20;
    } else if avg_latency > 500.0 {
        score -= 10;
    }
    if avg_threats > 50.0 {
        score -= 30;
    } else if avg_threats > 20.0 {
        score -= 15;
    }
    if detected > 0 {
        let block_rate = blocked as f64 / detected as f64;
        if block_rate > 0.9 {
            score += 10;
        } else if block_rate < 0.5 {
            score -= 20;
        }
    }
    (score, health_label(score))
}

/// Map a health score to its label.
pub fn health_label(score: i32) -> &'static str {
    match score {
        s if s >= 90 => "excellent",
        s if s >= 75 => "good",
        s if s >= 50 => "fair",
        _ => "poor",
    }
}

/// Mean of `threats_detected` across snapshots, 0 when empty. Shared by
/// the health loop and the dashboard's threat-rate alert.
pub fn average_threats(snapshots: &[MetricsSnapshot]) -> f64 {
    if snapshots.is_empty() {
        return 0.0;
    }
    snapshots.iter().map(|s| s.threats_detected as f64).sum::<f64>() / snapshots.len() as f64
}

/// Accumulates admission latencies between metrics snapshots.
#[derive(Debug, Default)]
pub struct LatencyMeter {
    sum_ms: f64,
    count: u64,
}

impl LatencyMeter {
    pub fn record(&mut self, ms: f64) {
        self.sum_ms += ms;
        self.count += 1;
    }

    /// Mean latency since the last drain, then reset. 0.0 with no samples.
    pub fn drain_average(&mut self) -> f64 {
        let avg = if self.count == 0 {
            0.0
        } else {
            self.sum_ms / self.count as f64
        };
        self.sum_ms = 0.0;
        self.count = 0;
        avg
    }
}
