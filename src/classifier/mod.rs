//! # Threat Classifier
//!
//! Turns raw request descriptions and tracker state into `ThreatFinding`s.
//!
//! Detection methods:
//! - **Per-request signature checks** (`analyze`): source reputation, rate
//!   limiting, user-agent fingerprints, payload signatures (SQL injection,
//!   XSS, command injection), path traversal. Every check runs on every
//!   request; one threat never masks another.
//! - **Stateful brute-force detection** (`detect_brute_force`): fed by the
//!   auth layer, fires exactly once per threshold crossing.
//! - **Statistical flood sweep** (`sweep_for_ddos`): flags sources whose
//!   request count is an outlier against the current population.
//!
//! Findings land in a bounded ring buffer; summary and recent-threat
//! projections read from it without copying the whole history.

pub mod patterns;

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::tracker::SourceTracker;
use crate::{
    DetectionConfig, RequestInfo, ThreatFinding, ThreatLevel, ThreatType, VigilResult,
};
use patterns::SignatureSet;

/// A borrowed view of one inbound request, as handed in by the embedding
/// layer. The classifier never stores this directly; retained fields go
/// through `RequestInfo` with the payload excerpt budget applied.
#[derive(Debug, Clone, Copy)]
pub struct RequestDescriptor<'a> {
    pub source: &'a str,
    pub method: &'a str,
    pub endpoint: &'a str,
    pub user_agent: &'a str,
    pub payload: Option<&'a str>,
}

/// Aggregate view over the findings recorded in a trailing window.
#[derive(Debug, Clone, Serialize)]
pub struct ThreatSummary {
    pub window_hours: i64,
    pub total_threats: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_level: BTreeMap<String, usize>,
    /// Up to ten sources with the most findings, busiest first.
    pub top_sources: Vec<(String, usize)>,
    /// Up to ten endpoints with the most findings, busiest first.
    pub top_endpoints: Vec<(String, usize)>,
    pub threats_per_hour: f64,
}

/// Signature and behavioral threat classification over tracker state.
pub struct ThreatClassifier {
    config: DetectionConfig,
    tracker: Arc<SourceTracker>,

    sql: SignatureSet,
    xss: SignatureSet,
    command: SignatureSet,
    traversal: SignatureSet,
    user_agents: SignatureSet,

    /// Bounded finding history, oldest evicted first.
    findings: Mutex<VecDeque<ThreatFinding>>,

    /// Lifetime per-type detection counters. Survive ring-buffer eviction.
    counters: Mutex<HashMap<ThreatType, u64>>,

    running: AtomicBool,
}

impl ThreatClassifier {
    /// Build a classifier with all signature sets compiled up front.
    pub fn new(config: &DetectionConfig, tracker: Arc<SourceTracker>) -> VigilResult<Self> {
        Ok(Self {
            config: config.clone(),
            tracker,
            sql: SignatureSet::compile(patterns::SQL_INJECTION)?,
            xss: SignatureSet::compile(patterns::XSS)?,
            command: SignatureSet::compile(patterns::COMMAND_INJECTION)?,
            traversal: SignatureSet::compile(patterns::DIRECTORY_TRAVERSAL)?,
            user_agents: SignatureSet::compile(patterns::SUSPICIOUS_USER_AGENTS)?,
            findings: Mutex::new(VecDeque::with_capacity(64)),
            counters: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Classify one request. Records the request in the tracker, runs every
    /// per-request check, and returns all findings (possibly several for the
    /// same request).
    ///
    /// Trusted sources are never classified as threats, whatever the other
    /// signals say.
    pub fn analyze(&self, request: &RequestDescriptor) -> Vec<ThreatFinding> {
        self.tracker.observe_request(request.source);

        if self.tracker.flags(request.source).trusted {
            return Vec::new();
        }

        let mut findings = Vec::new();

        if self.tracker.is_suspicious(request.source) {
            findings.push(self.finding(
                ThreatType::MaliciousSource,
                ThreatLevel::High,
                0.8,
                request,
                vec!["source carries a suspicious reputation".to_string()],
                format!("Request from suspicious source {}", request.source),
            ));
        }

        let rate = self
            .tracker
            .request_rate(request.source, self.config.rate_limit_window_secs);
        if rate > self.config.rate_limit_max_requests {
            findings.push(self.finding(
                ThreatType::RateLimitViolation,
                ThreatLevel::Medium,
                0.9,
                request,
                vec![format!(
                    "observed rate: {} requests / {}s (limit {})",
                    rate, self.config.rate_limit_window_secs, self.config.rate_limit_max_requests
                )],
                format!(
                    "Rate limit exceeded: {} requests in {}s",
                    rate, self.config.rate_limit_window_secs
                ),
            ));
        }

        if let Some(pattern) = self.user_agents.first_match(request.user_agent) {
            findings.push(self.finding(
                ThreatType::SuspiciousPayload,
                ThreatLevel::Medium,
                0.7,
                request,
                vec![format!("user agent matched {:?}", pattern)],
                format!("Suspicious user agent: {}", request.user_agent),
            ));
        }

        if let Some(payload) = request.payload {
            if let Some(pattern) = self.sql.first_match(payload) {
                findings.push(self.finding(
                    ThreatType::SqlInjection,
                    ThreatLevel::High,
                    0.85,
                    request,
                    vec![format!("payload matched {:?}", pattern)],
                    "SQL injection attempt detected in payload".to_string(),
                ));
            }
            if let Some(pattern) = self.xss.first_match(payload) {
                findings.push(self.finding(
                    ThreatType::XssAttack,
                    ThreatLevel::High,
                    0.8,
                    request,
                    vec![format!("payload matched {:?}", pattern)],
                    "Cross-site scripting attempt detected in payload".to_string(),
                ));
            }
            if let Some(pattern) = self.command.first_match(payload) {
                findings.push(self.finding(
                    ThreatType::CommandInjection,
                    ThreatLevel::Critical,
                    0.9,
                    request,
                    vec![format!("payload matched {:?}", pattern)],
                    "Command injection attempt detected in payload".to_string(),
                ));
            }
        }

        if let Some(pattern) = self.traversal.first_match(request.endpoint) {
            findings.push(self.finding(
                ThreatType::DirectoryTraversal,
                ThreatLevel::High,
                0.85,
                request,
                vec![format!("path matched {:?}", pattern)],
                "Directory traversal attempt in request path".to_string(),
            ));
        }

        for finding in &findings {
            self.record_finding(finding);
        }
        findings
    }

    /// Feed one auth attempt outcome into the brute-force detector.
    ///
    /// Returns a finding exactly when the consecutive-failure count lands on
    /// the threshold, so a sustained attack produces one finding per
    /// crossing rather than one per attempt. A success resets the counter.
    pub fn detect_brute_force(
        &self,
        source: &str,
        endpoint: &str,
        success: bool,
    ) -> Option<ThreatFinding> {
        if success {
            self.tracker.reset_failures(source);
            return None;
        }
        let count = self.tracker.record_failure(source);
        if count != self.config.brute_force_threshold {
            return None;
        }
        if self.tracker.flags(source).trusted {
            return None;
        }

        let request = RequestInfo::new("POST", endpoint, "", None, 0);
        let finding = ThreatFinding::new(
            ThreatType::BruteForce,
            ThreatLevel::High,
            source,
            request,
            0.9,
            vec![format!("{} consecutive failed auth attempts", count)],
            format!(
                "Brute force pattern: {} consecutive failures against {}",
                count, endpoint
            ),
        );
        self.record_finding(&finding);
        Some(finding)
    }

    /// Statistical flood sweep. Flags sources whose request count over the
    /// trailing window exceeds both `mean + sigma * stddev` across all
    /// tracked sources and the absolute floor. The floor guards small fleets
    /// where near-zero variance would otherwise flag ordinary traffic.
    pub fn sweep_for_ddos(&self, window_secs: u64) -> Vec<ThreatFinding> {
        let counts = self.tracker.request_counts(window_secs);
        if counts.len() < 2 {
            return Vec::new();
        }

        let n = counts.len() as f64;
        let mean = counts.iter().map(|(_, c)| *c as f64).sum::<f64>() / n;
        let variance = counts
            .iter()
            .map(|(_, c)| {
                let d = *c as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        let threshold = mean + self.config.ddos_sigma * variance.sqrt();

        let mut findings = Vec::new();
        for (source, count) in counts {
            if count <= self.config.ddos_floor || (count as f64) <= threshold {
                continue;
            }
            if self.tracker.flags(&source).trusted {
                continue;
            }
            warn!(
                "[SWEEP] Flood outlier {}: {} requests in {}s (threshold {:.1})",
                source, count, window_secs, threshold
            );
            let finding = ThreatFinding::new(
                ThreatType::DdosAttempt,
                ThreatLevel::Critical,
                &source,
                RequestInfo::new("*", "*", "", None, 0),
                0.8,
                vec![
                    format!("{} requests in {}s", count, window_secs),
                    format!("population mean {:.1}, threshold {:.1}", mean, threshold),
                ],
                format!("Anomalous request volume from {}", source),
            );
            self.record_finding(&finding);
            findings.push(finding);
        }
        findings
    }

    /// The most recent findings, newest first.
    pub fn get_recent_threats(&self, limit: usize) -> Vec<ThreatFinding> {
        let findings = self.findings.lock();
        findings.iter().rev().take(limit).cloned().collect()
    }

    /// Aggregate the findings recorded in the trailing `hours`.
    pub fn get_threat_summary(&self, hours: i64) -> ThreatSummary {
        let cutoff = Utc::now() - Duration::hours(hours);
        let findings = self.findings.lock();

        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_level: BTreeMap<String, usize> = BTreeMap::new();
        let mut sources: HashMap<String, usize> = HashMap::new();
        let mut endpoints: HashMap<String, usize> = HashMap::new();
        let mut total = 0usize;

        for finding in findings.iter().filter(|f| f.detected_at > cutoff) {
            total += 1;
            *by_type.entry(finding.threat_type.as_str().to_string()).or_default() += 1;
            *by_level.entry(finding.level.as_str().to_string()).or_default() += 1;
            *sources.entry(finding.source.clone()).or_default() += 1;
            *endpoints.entry(finding.request.endpoint.clone()).or_default() += 1;
        }

        ThreatSummary {
            window_hours: hours,
            total_threats: total,
            by_type,
            by_level,
            top_sources: top_n(sources, 10),
            top_endpoints: top_n(endpoints, 10),
            threats_per_hour: total as f64 / hours.max(1) as f64,
        }
    }

    /// Count of findings recorded after `cutoff`.
    pub fn findings_since(&self, cutoff: DateTime<Utc>) -> usize {
        self.findings
            .lock()
            .iter()
            .filter(|f| f.detected_at > cutoff)
            .count()
    }

    /// Lifetime detection count across all threat types.
    pub fn total_detected(&self) -> u64 {
        self.counters.lock().values().sum()
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn finding(
        &self,
        threat_type: ThreatType,
        level: ThreatLevel,
        confidence: f64,
        request: &RequestDescriptor,
        evidence: Vec<String>,
        description: String,
    ) -> ThreatFinding {
        let info = RequestInfo::new(
            request.method,
            request.endpoint,
            request.user_agent,
            request.payload,
            self.config.payload_excerpt_bytes,
        );
        ThreatFinding::new(
            threat_type,
            level,
            request.source,
            info,
            confidence,
            evidence,
            description,
        )
    }

    fn record_finding(&self, finding: &ThreatFinding) {
        info!(
            "[DETECT] {} {} from {} ({:.2}): {}",
            finding.level.as_str(),
            finding.threat_type.as_str(),
            finding.source,
            finding.confidence,
            finding.description
        );
        {
            let mut findings = self.findings.lock();
            while findings.len() >= self.config.finding_buffer_capacity {
                findings.pop_front();
            }
            findings.push_back(finding.clone());
        }
        *self.counters.lock().entry(finding.threat_type).or_default() += 1;
    }
}

/// Top `n` entries of a count map, largest first, name as tie-break.
fn top_n(map: HashMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut entries: Vec<(String, usize)> = map.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(n);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrackerConfig;

    fn build() -> (Arc<SourceTracker>, ThreatClassifier) {
        build_with(|_| {})
    }

    fn build_with(tune: impl FnOnce(&mut DetectionConfig)) -> (Arc<SourceTracker>, ThreatClassifier) {
        let tracker = Arc::new(SourceTracker::new(&TrackerConfig {
            window_secs: 3600,
            flag_private_sources: true,
        }));
        let mut config = crate::VigilConfig::default().detection;
        tune(&mut config);
        let classifier = ThreatClassifier::new(&config, tracker.clone()).unwrap();
        (tracker, classifier)
    }

    fn request<'a>(source: &'a str, payload: Option<&'a str>) -> RequestDescriptor<'a> {
        RequestDescriptor {
            source,
            method: "POST",
            endpoint: "/api/login",
            user_agent: "Mozilla/5.0",
            payload,
        }
    }

    #[test]
    fn test_clean_request_produces_no_findings() {
        let (_, classifier) = build();
        let findings = classifier.analyze(&request("203.0.113.10", Some("hello world")));
        assert!(findings.is_empty());
    }

    #[test]
    fn test_sql_injection_in_payload() {
        let (_, classifier) = build();
        let findings = classifier.analyze(&request("203.0.113.10", Some("' OR '1'='1")));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].threat_type, ThreatType::SqlInjection);
        assert_eq!(findings[0].level, ThreatLevel::High);
        assert!((findings[0].confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_payload_checks_do_not_short_circuit() {
        let (_, classifier) = build();
        // Quote + script tag + shell separator in one payload.
        let payload = "'; DROP TABLE users; <script>alert(1)</script>";
        let findings = classifier.analyze(&request("203.0.113.10", Some(payload)));
        let types: Vec<ThreatType> = findings.iter().map(|f| f.threat_type).collect();
        assert!(types.contains(&ThreatType::SqlInjection));
        assert!(types.contains(&ThreatType::XssAttack));
        assert!(types.contains(&ThreatType::CommandInjection));
    }

    #[test]
    fn test_command_injection_is_critical() {
        let (_, classifier) = build();
        let findings = classifier.analyze(&request("203.0.113.10", Some("x | id")));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].threat_type, ThreatType::CommandInjection);
        assert_eq!(findings[0].level, ThreatLevel::Critical);
    }

    #[test]
    fn test_traversal_in_endpoint() {
        let (_, classifier) = build();
        let desc = RequestDescriptor {
            source: "203.0.113.10",
            method: "GET",
            endpoint: "/files/../../etc/passwd",
            user_agent: "Mozilla/5.0",
            payload: None,
        };
        let findings = classifier.analyze(&desc);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].threat_type, ThreatType::DirectoryTraversal);
    }

    #[test]
    fn test_offensive_user_agent() {
        let (_, classifier) = build();
        let desc = RequestDescriptor {
            source: "203.0.113.10",
            method: "GET",
            endpoint: "/",
            user_agent: "sqlmap/1.7.2#stable",
            payload: None,
        };
        let findings = classifier.analyze(&desc);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].threat_type, ThreatType::SuspiciousPayload);
        assert_eq!(findings[0].level, ThreatLevel::Medium);
    }

    #[test]
    fn test_suspicious_source_reputation() {
        let (tracker, classifier) = build();
        tracker.mark_suspicious("203.0.113.10", true);
        let findings = classifier.analyze(&request("203.0.113.10", None));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].threat_type, ThreatType::MaliciousSource);
    }

    #[test]
    fn test_rate_limit_fires_on_excess_request() {
        let (_, classifier) = build();
        for _ in 0..100 {
            assert!(classifier.analyze(&request("203.0.113.10", None)).is_empty());
        }
        let findings = classifier.analyze(&request("203.0.113.10", None));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].threat_type, ThreatType::RateLimitViolation);
        assert_eq!(findings[0].level, ThreatLevel::Medium);
    }

    #[test]
    fn test_trusted_source_is_never_a_threat() {
        let (tracker, classifier) = build();
        tracker.mark_trusted("10.0.0.7", true);
        tracker.mark_suspicious("10.0.0.7", true);
        // Private range, flagged suspicious, hostile payload: still clean.
        let findings = classifier.analyze(&request("10.0.0.7", Some("' OR '1'='1")));
        assert!(findings.is_empty());
    }

    #[test]
    fn test_brute_force_fires_once_per_crossing() {
        let (_, classifier) = build();
        let source = "203.0.113.20";
        for _ in 0..4 {
            assert!(classifier.detect_brute_force(source, "/login", false).is_none());
        }
        let finding = classifier.detect_brute_force(source, "/login", false);
        assert_eq!(finding.unwrap().threat_type, ThreatType::BruteForce);
        // Past the threshold: no repeat finding per attempt.
        assert!(classifier.detect_brute_force(source, "/login", false).is_none());

        // A success resets the counter; the next run can fire again.
        assert!(classifier.detect_brute_force(source, "/login", true).is_none());
        for _ in 0..4 {
            assert!(classifier.detect_brute_force(source, "/login", false).is_none());
        }
        assert!(classifier.detect_brute_force(source, "/login", false).is_some());
    }

    #[test]
    fn test_ddos_sweep_flags_statistical_outlier() {
        let (tracker, classifier) = build();
        for i in 0..12 {
            let source = format!("198.51.100.{}", i + 1);
            for _ in 0..10 {
                tracker.observe_request(&source);
            }
        }
        for _ in 0..500 {
            tracker.observe_request("203.0.113.66");
        }

        let findings = classifier.sweep_for_ddos(60);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].threat_type, ThreatType::DdosAttempt);
        assert_eq!(findings[0].level, ThreatLevel::Critical);
        assert_eq!(findings[0].source, "203.0.113.66");
    }

    #[test]
    fn test_ddos_sweep_respects_absolute_floor() {
        let (tracker, classifier) = build();
        for i in 0..20 {
            tracker.observe_request(&format!("198.51.100.{}", i + 1));
        }
        // 90 requests is a clear statistical outlier here, but stays under
        // the 100-request floor.
        for _ in 0..90 {
            tracker.observe_request("203.0.113.66");
        }
        assert!(classifier.sweep_for_ddos(60).is_empty());

        for _ in 0..60 {
            tracker.observe_request("203.0.113.66");
        }
        let findings = classifier.sweep_for_ddos(60);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].source, "203.0.113.66");
    }

    #[test]
    fn test_ddos_sweep_skips_trusted_sources() {
        let (tracker, classifier) = build();
        tracker.mark_trusted("203.0.113.66", true);
        for i in 0..12 {
            let source = format!("198.51.100.{}", i + 1);
            for _ in 0..10 {
                tracker.observe_request(&source);
            }
        }
        for _ in 0..500 {
            tracker.observe_request("203.0.113.66");
        }
        assert!(classifier.sweep_for_ddos(60).is_empty());
    }

    #[test]
    fn test_finding_buffer_evicts_oldest() {
        let (_, classifier) = build_with(|c| c.finding_buffer_capacity = 5);
        for i in 0..8 {
            let source = format!("198.51.100.{}", i + 1);
            let findings = classifier.analyze(&request(&source, Some("' OR '1'='1")));
            assert_eq!(findings.len(), 1);
        }
        let recent = classifier.get_recent_threats(100);
        assert_eq!(recent.len(), 5);
        // Newest first; the oldest three were evicted.
        assert_eq!(recent[0].source, "198.51.100.8");
        assert_eq!(recent[4].source, "198.51.100.4");
        assert_eq!(classifier.total_detected(), 8);
    }

    #[test]
    fn test_threat_summary_aggregates() {
        let (_, classifier) = build();
        classifier.analyze(&request("203.0.113.1", Some("' OR '1'='1")));
        classifier.analyze(&request("203.0.113.1", Some("<script>alert(1)</script>")));
        classifier.analyze(&request("203.0.113.2", Some("' OR '1'='1")));

        let summary = classifier.get_threat_summary(24);
        assert_eq!(summary.total_threats, 3);
        assert_eq!(summary.by_type.get("sql_injection"), Some(&2));
        assert_eq!(summary.by_type.get("xss_attack"), Some(&1));
        assert_eq!(summary.by_level.get("high"), Some(&3));
        assert_eq!(summary.top_sources[0], ("203.0.113.1".to_string(), 2));
        assert!((summary.threats_per_hour - 3.0 / 24.0).abs() < 1e-9);
    }
}
