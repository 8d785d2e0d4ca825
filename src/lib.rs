//! # Vigil - Core Library
//!
//! Real-time threat detection, automated response, and proactive security
//! monitoring for request-serving applications.
//!
//! Vigil inspects every inbound request, maintains per-source behavioral
//! state, classifies attacks through signature and statistical methods,
//! triggers rule-driven mitigation with time-bounded effects, and runs
//! background loops that aggregate metrics and alert on health thresholds.
//!
//! ## Pipeline
//! - `tracker` - per-source request windows, failure counters, reputation flags
//! - `classifier` - signature + behavioral threat classification
//! - `response` - rule-driven actions, time-bounded block list, response log
//! - `monitor` - background loops, request admission, dashboard snapshot
//!
//! State is in-memory only. Persistence, notification delivery, and
//! authentication are external collaborators reached through the trait
//! seams in `sinks`.

pub mod classifier;
pub mod monitor;
pub mod response;
pub mod sinks;
pub mod tracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for Vigil.
#[derive(Error, Debug)]
pub enum VigilError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Permission denied: {actor} may not {action}")]
    PermissionDenied { actor: String, action: String },

    #[error("Alert queue full, alert dropped")]
    AlertQueueFull,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

pub type VigilResult<T> = Result<T, VigilError>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Top-level configuration for Vigil.
///
/// Loaded from `vigil.toml` in the working directory or a path supplied
/// via CLI flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VigilConfig {
    /// Per-source tracking settings.
    pub tracker: TrackerConfig,

    /// Detection thresholds and signature tuning.
    pub detection: DetectionConfig,

    /// Response rule table and block cooldowns.
    pub response: ResponseConfig,

    /// Background loop intervals and health alert thresholds.
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Sliding window for per-source request timestamps, in seconds.
    pub window_secs: u64,

    /// Treat requests claiming a private/reserved source address as
    /// suspicious. These ranges show up spoofed in attack traffic against
    /// internet-facing services.
    pub flag_private_sources: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Requests allowed per rate-limit window before a violation is flagged.
    pub rate_limit_max_requests: usize,

    /// Rate-limit window in seconds.
    pub rate_limit_window_secs: u64,

    /// Consecutive auth failures before a brute-force finding is emitted.
    pub brute_force_threshold: u32,

    /// Maximum bytes of request payload retained in a finding.
    /// Bounds memory and keeps attacker input out of unbounded logs.
    pub payload_excerpt_bytes: usize,

    /// Capacity of the finding ring buffer. Oldest entries are evicted first.
    pub finding_buffer_capacity: usize,

    /// Standard-deviation multiplier for the statistical flood sweep.
    pub ddos_sigma: f64,

    /// Absolute request-count floor for the flood sweep. Prevents false
    /// positives when the tracked fleet is small and variance is near zero.
    pub ddos_floor: usize,

    /// Window in seconds over which the flood sweep counts requests.
    pub ddos_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Block duration in minutes for rules that don't specify their own.
    pub default_cooldown_minutes: i64,

    /// Declarative rule table. Empty = built-in defaults.
    /// Unknown threat type, level, or action names fail at startup.
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval of the statistical threat sweep loop, in seconds.
    pub sweep_interval_secs: u64,

    /// Interval of the metrics collection loop, in seconds.
    pub metrics_interval_secs: u64,

    /// Interval of the health-check loop, in seconds.
    pub health_interval_secs: u64,

    /// How long metrics snapshots are retained, in hours.
    pub metrics_retention_hours: i64,

    /// Health alert fires when the average threats-detected across recent
    /// snapshots exceeds this rate.
    pub threat_rate_alert: f64,

    /// Health alert fires when the blocked source count exceeds this ceiling.
    pub blocked_sources_ceiling: usize,

    /// Dashboard latency alert threshold in milliseconds.
    pub latency_alert_ms: f64,

    /// How many recent findings the sweep loop inspects for coordinated
    /// attack patterns.
    pub pattern_batch_size: usize,

    /// Findings from one source within a batch before a coordinated-attack
    /// warning is logged.
    pub coordinated_threshold: usize,

    /// Webhook endpoint for alert delivery. Alerts go to the process log
    /// when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_webhook_url: Option<String>,
}

/// One declarative response rule as it appears in the config file.
///
/// String names are resolved against the threat type / level / action
/// tables when the `ResponseEngine` is constructed; resolution failure
/// is a startup error, never a request-time one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub threat_type: String,
    pub threat_level: String,
    pub actions: Vec<String>,
    pub auto_execute: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_minutes: Option<i64>,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig {
                window_secs: 3600,
                flag_private_sources: true,
            },
            detection: DetectionConfig {
                rate_limit_max_requests: 100,
                rate_limit_window_secs: 300,
                brute_force_threshold: 5,
                payload_excerpt_bytes: 500,
                finding_buffer_capacity: 10_000,
                ddos_sigma: 3.0,
                ddos_floor: 100,
                ddos_window_secs: 60,
            },
            response: ResponseConfig {
                default_cooldown_minutes: 5,
                rules: Vec::new(),
            },
            monitor: MonitorConfig {
                sweep_interval_secs: 10,
                metrics_interval_secs: 60,
                health_interval_secs: 300,
                metrics_retention_hours: 24,
                threat_rate_alert: 10.0,
                blocked_sources_ceiling: 50,
                latency_alert_ms: 1000.0,
                pattern_batch_size: 50,
                coordinated_threshold: 3,
                alert_webhook_url: None,
            },
        }
    }
}

impl VigilConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> VigilResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: VigilConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Write the default configuration to a TOML file.
    pub fn write_default(path: &std::path::Path) -> VigilResult<()> {
        let config = Self::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| VigilError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Core Types
// ---------------------------------------------------------------------------

/// Threat severity. Ordinal - `Critical` outranks `High` outranks `Medium`
/// outranks `Low` - used for tie-breaking and escalation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// Stable string form used at the serialization boundary.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }

    /// Resolve a config-file name. Unknown names are a configuration error.
    pub fn parse(name: &str) -> VigilResult<Self> {
        match name {
            "low" => Ok(ThreatLevel::Low),
            "medium" => Ok(ThreatLevel::Medium),
            "high" => Ok(ThreatLevel::High),
            "critical" => Ok(ThreatLevel::Critical),
            other => Err(VigilError::Config(format!(
                "Unknown threat level: {}",
                other
            ))),
        }
    }
}

/// Classification of detected threats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    SqlInjection,
    XssAttack,
    CommandInjection,
    DirectoryTraversal,
    BruteForce,
    RateLimitViolation,
    SuspiciousPayload,
    AnomalousBehavior,
    MaliciousSource,
    DdosAttempt,
}

impl ThreatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatType::SqlInjection => "sql_injection",
            ThreatType::XssAttack => "xss_attack",
            ThreatType::CommandInjection => "command_injection",
            ThreatType::DirectoryTraversal => "directory_traversal",
            ThreatType::BruteForce => "brute_force",
            ThreatType::RateLimitViolation => "rate_limit_violation",
            ThreatType::SuspiciousPayload => "suspicious_payload",
            ThreatType::AnomalousBehavior => "anomalous_behavior",
            ThreatType::MaliciousSource => "malicious_source",
            ThreatType::DdosAttempt => "ddos_attempt",
        }
    }

    /// Resolve a config-file name. Unknown names are a configuration error.
    pub fn parse(name: &str) -> VigilResult<Self> {
        match name {
            "sql_injection" => Ok(ThreatType::SqlInjection),
            "xss_attack" => Ok(ThreatType::XssAttack),
            "command_injection" => Ok(ThreatType::CommandInjection),
            "directory_traversal" => Ok(ThreatType::DirectoryTraversal),
            "brute_force" => Ok(ThreatType::BruteForce),
            "rate_limit_violation" => Ok(ThreatType::RateLimitViolation),
            "suspicious_payload" => Ok(ThreatType::SuspiciousPayload),
            "anomalous_behavior" => Ok(ThreatType::AnomalousBehavior),
            "malicious_source" => Ok(ThreatType::MaliciousSource),
            "ddos_attempt" => Ok(ThreatType::DdosAttempt),
            other => Err(VigilError::Config(format!("Unknown threat type: {}", other))),
        }
    }
}

/// The request fields retained in a finding.
///
/// The payload excerpt is truncated to a fixed byte budget before storage
/// so a finding never carries unbounded attacker input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInfo {
    pub method: String,
    pub endpoint: String,
    pub user_agent: String,
    pub payload_excerpt: Option<String>,
}

impl RequestInfo {
    pub fn new(
        method: &str,
        endpoint: &str,
        user_agent: &str,
        payload: Option<&str>,
        excerpt_budget: usize,
    ) -> Self {
        Self {
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            user_agent: user_agent.to_string(),
            payload_excerpt: payload.map(|p| truncate_to_bytes(p, excerpt_budget)),
        }
    }
}

/// Truncate a string to at most `budget` bytes, respecting char boundaries.
fn truncate_to_bytes(s: &str, budget: usize) -> String {
    if s.len() <= budget {
        return s.to_string();
    }
    let mut end = budget;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// One detected threat tied to a single request or sweep.
///
/// Findings are immutable events: `confidence` and `level` are set once at
/// creation and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatFinding {
    /// Opaque unique identifier, derived from (type, source, time) so that
    /// repeated logging of the same detection stays idempotent.
    pub id: String,

    pub detected_at: DateTime<Utc>,

    pub threat_type: ThreatType,

    pub level: ThreatLevel,

    /// Network address string identifying the request origin.
    pub source: String,

    pub request: RequestInfo,

    /// Fixed heuristic weight per detector, in [0, 1]. Not learned.
    pub confidence: f64,

    /// Human-readable justifications: matched pattern, observed rate,
    /// statistical threshold.
    pub evidence: Vec<String>,

    pub description: String,
}

impl ThreatFinding {
    /// Create a finding stamped with the current time and a derived id.
    pub fn new(
        threat_type: ThreatType,
        level: ThreatLevel,
        source: &str,
        request: RequestInfo,
        confidence: f64,
        evidence: Vec<String>,
        description: String,
    ) -> Self {
        let detected_at = Utc::now();
        Self {
            id: Self::derive_id(threat_type, source, detected_at),
            detected_at,
            threat_type,
            level,
            source: source.to_string(),
            request,
            confidence,
            evidence,
            description,
        }
    }

    /// Derive the finding id from (type, source, second-resolution time).
    fn derive_id(threat_type: ThreatType, source: &str, at: DateTime<Utc>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(threat_type.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(source.as_bytes());
        hasher.update(b":");
        hasher.update(at.timestamp().to_string().as_bytes());
        let digest = hasher.finalize();
        // 16 hex chars is plenty for log correlation.
        digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
    }
}

/// Mitigation actions a response rule can order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResponseActionKind {
    /// Insert or refresh a time-bounded block entry for the source.
    BlockSource,

    /// Hand a structured alert to the external notification channel.
    AlertAdmin,

    /// Mark the source for tighter request admission without a hard block.
    RateLimit,

    /// Forward the finding to the external audit sink.
    LogEvent,

    /// Reserved hook: forward to external incident management.
    Escalate,

    /// Reserved hook: forward to external incident management.
    Quarantine,
}

impl ResponseActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseActionKind::BlockSource => "block_source",
            ResponseActionKind::AlertAdmin => "alert_admin",
            ResponseActionKind::RateLimit => "rate_limit",
            ResponseActionKind::LogEvent => "log_event",
            ResponseActionKind::Escalate => "escalate",
            ResponseActionKind::Quarantine => "quarantine",
        }
    }

    /// Resolve a config-file name. Unknown names are a configuration error.
    pub fn parse(name: &str) -> VigilResult<Self> {
        match name {
            "block_source" => Ok(ResponseActionKind::BlockSource),
            "alert_admin" => Ok(ResponseActionKind::AlertAdmin),
            "rate_limit" => Ok(ResponseActionKind::RateLimit),
            "log_event" => Ok(ResponseActionKind::LogEvent),
            "escalate" => Ok(ResponseActionKind::Escalate),
            "quarantine" => Ok(ResponseActionKind::Quarantine),
            other => Err(VigilError::Config(format!(
                "Unknown response action: {}",
                other
            ))),
        }
    }
}

/// Append-only record of one processed finding. Never mutated after
/// creation; used for statistics and audit export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseLog {
    pub finding_id: String,
    pub threat_type: ThreatType,
    pub source: String,
    pub actions_taken: Vec<ResponseActionKind>,
    pub success: bool,
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threat_level_ordering() {
        assert!(ThreatLevel::Critical > ThreatLevel::High);
        assert!(ThreatLevel::High > ThreatLevel::Medium);
        assert!(ThreatLevel::Medium > ThreatLevel::Low);
    }

    #[test]
    fn test_enum_string_round_trip() {
        for t in [
            ThreatType::SqlInjection,
            ThreatType::XssAttack,
            ThreatType::CommandInjection,
            ThreatType::DirectoryTraversal,
            ThreatType::BruteForce,
            ThreatType::RateLimitViolation,
            ThreatType::SuspiciousPayload,
            ThreatType::AnomalousBehavior,
            ThreatType::MaliciousSource,
            ThreatType::DdosAttempt,
        ] {
            assert_eq!(ThreatType::parse(t.as_str()).unwrap(), t);
        }
        assert!(ThreatType::parse("warp_core_breach").is_err());
        assert!(ThreatLevel::parse("severe").is_err());
        assert!(ResponseActionKind::parse("retaliate").is_err());
    }

    #[test]
    fn test_finding_id_is_stable_within_a_second() {
        let at = Utc::now();
        let a = ThreatFinding::derive_id(ThreatType::SqlInjection, "1.2.3.4", at);
        let b = ThreatFinding::derive_id(ThreatType::SqlInjection, "1.2.3.4", at);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);

        let c = ThreatFinding::derive_id(ThreatType::XssAttack, "1.2.3.4", at);
        assert_ne!(a, c);
    }

    #[test]
    fn test_payload_excerpt_truncation() {
        let long = "x".repeat(2000);
        let info = RequestInfo::new("POST", "/api/query", "curl/8.0", Some(&long), 500);
        assert_eq!(info.payload_excerpt.unwrap().len(), 500);

        // Multi-byte chars are never split.
        let multibyte = "é".repeat(300); // 600 bytes
        let info = RequestInfo::new("POST", "/", "", Some(&multibyte), 501);
        let excerpt = info.payload_excerpt.unwrap();
        assert!(excerpt.len() <= 501);
        assert!(excerpt.is_char_boundary(excerpt.len()));
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = VigilConfig::default();
        let s = toml::to_string_pretty(&config).unwrap();
        let back: VigilConfig = toml::from_str(&s).unwrap();
        assert_eq!(back.detection.rate_limit_max_requests, 100);
        assert_eq!(back.detection.brute_force_threshold, 5);
        assert_eq!(back.monitor.sweep_interval_secs, 10);
    }
}
