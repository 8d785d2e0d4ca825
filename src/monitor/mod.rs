//! # Proactive Monitor
//!
//! Orchestrates the pipeline: owns the three background loops, the
//! synchronous request-admission entry point, and the administrative /
//! reporting surface.
//!
//! Loops (all observe one shutdown signal and exit at their next wake-up):
//! - **Sweep** (10s): statistical flood sweep, block-list eviction, idle
//!   record pruning, coordinated-attack pattern check.
//! - **Metrics** (60s): aggregates a `MetricsSnapshot`, prunes the
//!   retention window.
//! - **Health** (300s): inspects recent snapshots and raises threshold
//!   alerts through the notification channel.
//!
//! `admit` is the one hot-path call: fully synchronous, never returns an
//! error, fails closed on blocked sources and Critical findings.

pub mod metrics;

use chrono::{Duration, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use crate::classifier::{RequestDescriptor, ThreatClassifier, ThreatSummary};
use crate::response::{ResponseEngine, ResponseStats};
use crate::sinks::{AuditSink, Notifier, PermissionCheck, Severity};
use crate::tracker::SourceTracker;
use crate::{
    MonitorConfig, ThreatFinding, ThreatLevel, VigilConfig, VigilError, VigilResult,
};
use metrics::{
    average_threats, compute_health, ComponentStatus, DashboardAlerts, DashboardSnapshot,
    LatencyMeter, MetricsSnapshot, TREND_POINTS,
};

/// Pipeline orchestrator. Construct once, share behind an `Arc`.
pub struct ProactiveMonitor {
    config: MonitorConfig,
    ddos_window_secs: u64,

    tracker: Arc<SourceTracker>,
    classifier: Arc<ThreatClassifier>,
    engine: Arc<ResponseEngine>,

    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
    permissions: Arc<dyn PermissionCheck>,

    snapshots: Mutex<Vec<MetricsSnapshot>>,
    latency: Mutex<LatencyMeter>,

    /// Shutdown sender for the currently running loops. Each `start` gets
    /// a fresh channel, so loops from an earlier run can never be confused
    /// by a later run's signal.
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    active: AtomicBool,
    sweep_loop: AtomicBool,
    metrics_loop: AtomicBool,
    health_loop: AtomicBool,
    /// Count of loop tasks that have started and not yet exited.
    live_loops: AtomicUsize,
}

impl ProactiveMonitor {
    pub fn new(
        config: &VigilConfig,
        tracker: Arc<SourceTracker>,
        classifier: Arc<ThreatClassifier>,
        engine: Arc<ResponseEngine>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn Notifier>,
        permissions: Arc<dyn PermissionCheck>,
    ) -> Self {
        Self {
            config: config.monitor.clone(),
            ddos_window_secs: config.detection.ddos_window_secs,
            tracker,
            classifier,
            engine,
            audit,
            notifier,
            permissions,
            snapshots: Mutex::new(Vec::new()),
            latency: Mutex::new(LatencyMeter::default()),
            shutdown: Mutex::new(None),
            active: AtomicBool::new(false),
            sweep_loop: AtomicBool::new(false),
            metrics_loop: AtomicBool::new(false),
            health_loop: AtomicBool::new(false),
            live_loops: AtomicUsize::new(0),
        }
    }

    /// Start the three background loops. Idempotent; a second call while
    /// active is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.active.swap(true, Ordering::SeqCst) {
            return;
        }
        self.classifier.set_running(true);
        info!("[MONITOR] Starting background loops");

        // A fresh channel per run: loops from a previous run keep their
        // old receiver and exit on its signal regardless of how quickly
        // this run started.
        let (shutdown, _) = watch::channel(false);
        self.spawn_loop(
            self.config.sweep_interval_secs,
            Self::sweep_loop_flag,
            Self::run_sweep,
            shutdown.subscribe(),
        );
        self.spawn_loop(
            self.config.metrics_interval_secs,
            Self::metrics_loop_flag,
            Self::collect_metrics,
            shutdown.subscribe(),
        );
        self.spawn_loop(
            self.config.health_interval_secs,
            Self::health_loop_flag,
            Self::run_health_check,
            shutdown.subscribe(),
        );
        *self.shutdown.lock() = Some(shutdown);
    }

    /// Signal the loops to exit at their next wake-up. Safe to call while
    /// they are mid-sleep, and safe to call twice.
    pub fn stop(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("[MONITOR] Stopping background loops");
        self.classifier.set_running(false);
        if let Some(shutdown) = self.shutdown.lock().take() {
            // Dropping the sender also wakes the loops; send is best-effort.
            let _ = shutdown.send(true);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn sweep_loop_flag(&self) -> &AtomicBool {
        &self.sweep_loop
    }

    fn metrics_loop_flag(&self) -> &AtomicBool {
        &self.metrics_loop
    }

    fn health_loop_flag(&self) -> &AtomicBool {
        &self.health_loop
    }

    fn spawn_loop(
        self: &Arc<Self>,
        interval_secs: u64,
        flag: for<'a> fn(&'a ProactiveMonitor) -> &'a AtomicBool,
        body: fn(&ProactiveMonitor),
        mut shutdown: watch::Receiver<bool>,
    ) {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            monitor.live_loops.fetch_add(1, Ordering::SeqCst);
            flag(&monitor).store(true, Ordering::SeqCst);
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; an initial pass on start
            // is wanted for all three loops.
            loop {
                tokio::select! {
                    _ = ticker.tick() => body(&monitor),
                    changed = shutdown.changed() => {
                        // A dropped sender means the run is over too.
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            // On an immediate restart the replacement loop already owns
            // this flag; only a final stop clears it.
            if !monitor.is_active() {
                flag(&monitor).store(false, Ordering::SeqCst);
            }
            monitor.live_loops.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Synchronous request admission. Never errors; the boolean is the
    /// whole contract.
    ///
    /// Denies immediately for blocked sources. Otherwise classifies the
    /// request, responds to every finding, and denies when any finding is
    /// Critical. Medium and High findings admit the request; their rules
    /// may still block the source for next time.
    pub fn admit(
        &self,
        source: &str,
        method: &str,
        endpoint: &str,
        headers: &HashMap<String, String>,
        payload: Option<&str>,
    ) -> bool {
        let started = Instant::now();

        if self.engine.is_blocked(source) {
            let _ = self.audit.record(
                "request_blocked",
                endpoint,
                "system",
                "source is on the block list",
                Some(source),
            );
            self.record_latency(started);
            return false;
        }

        let user_agent = headers
            .get("User-Agent")
            .or_else(|| headers.get("user-agent"))
            .map(String::as_str)
            .unwrap_or("");
        let request = RequestDescriptor {
            source,
            method,
            endpoint,
            user_agent,
            payload,
        };

        let findings = self.classifier.analyze(&request);
        let mut admitted = true;
        for finding in &findings {
            self.engine.respond(finding);
            if finding.level == ThreatLevel::Critical {
                admitted = false;
            }
        }
        if !admitted {
            let _ = self.audit.record(
                "request_denied",
                endpoint,
                "system",
                "critical finding on request",
                Some(source),
            );
        }
        self.record_latency(started);
        admitted
    }

    /// Feed an authentication outcome into brute-force detection and
    /// respond to any finding it produces.
    pub fn record_auth_outcome(&self, source: &str, endpoint: &str, success: bool) {
        if let Some(finding) = self.classifier.detect_brute_force(source, endpoint, success) {
            self.engine.respond(&finding);
        }
    }

    /// Administrative block. Requires permission; produces an audit record.
    pub fn block_source(
        &self,
        actor: &str,
        source: &str,
        minutes: i64,
        reason: &str,
    ) -> VigilResult<()> {
        if !self.permissions.allow(actor, "block_source") {
            return Err(VigilError::PermissionDenied {
                actor: actor.to_string(),
                action: "block_source".to_string(),
            });
        }
        self.engine.block_source(source, minutes, reason);
        self.audit
            .record("block_source", source, actor, reason, Some(source))
    }

    /// Administrative unblock. Requires permission; produces an audit
    /// record. Returns whether a block existed.
    pub fn unblock_source(&self, actor: &str, source: &str) -> VigilResult<bool> {
        if !self.permissions.allow(actor, "unblock_source") {
            return Err(VigilError::PermissionDenied {
                actor: actor.to_string(),
                action: "unblock_source".to_string(),
            });
        }
        let removed = self.engine.unblock_source(source);
        self.audit.record(
            "unblock_source",
            source,
            actor,
            if removed { "block removed" } else { "no block present" },
            Some(source),
        )?;
        Ok(removed)
    }

    pub fn get_recent_threats(&self, limit: usize) -> Vec<ThreatFinding> {
        self.classifier.get_recent_threats(limit)
    }

    pub fn get_threat_summary(&self, hours: i64) -> ThreatSummary {
        self.classifier.get_threat_summary(hours)
    }

    pub fn get_response_stats(&self) -> ResponseStats {
        self.engine.response_stats()
    }

    /// Assemble the dashboard projection. `status` is `"no_data"` until
    /// the metrics loop has collected at least one snapshot.
    pub fn get_dashboard(&self) -> DashboardSnapshot {
        let snapshots = self.snapshots.lock();
        let components = ComponentStatus {
            monitor_active: self.is_active(),
            sweep_loop: self.sweep_loop.load(Ordering::SeqCst),
            metrics_loop: self.metrics_loop.load(Ordering::SeqCst),
            health_loop: self.health_loop.load(Ordering::SeqCst),
            classifier_running: self.classifier.is_running(),
        };

        let Some(current) = snapshots.last().cloned() else {
            return DashboardSnapshot {
                status: "no_data".to_string(),
                generated_at: Utc::now(),
                current: None,
                threats_detected_trend: Vec::new(),
                threats_blocked_trend: Vec::new(),
                alerts: DashboardAlerts {
                    high_threat_rate: false,
                    many_blocked_sources: false,
                    high_latency: false,
                },
                components,
            };
        };

        let trend_start = snapshots.len().saturating_sub(TREND_POINTS);
        let trend = &snapshots[trend_start..];
        let recent_start = snapshots.len().saturating_sub(5);

        DashboardSnapshot {
            status: current.health_label.clone(),
            generated_at: Utc::now(),
            threats_detected_trend: trend.iter().map(|s| s.threats_detected).collect(),
            threats_blocked_trend: trend.iter().map(|s| s.threats_blocked).collect(),
            alerts: DashboardAlerts {
                high_threat_rate: average_threats(&snapshots[recent_start..])
                    > self.config.threat_rate_alert,
                many_blocked_sources: current.blocked_source_count
                    > self.config.blocked_sources_ceiling as u64,
                high_latency: current.pipeline_latency_ms > self.config.latency_alert_ms,
            },
            current: Some(current),
            components,
        }
    }

    /// One pass of the sweep loop: statistical flood detection, block-list
    /// eviction, idle-record pruning, coordinated-attack check.
    fn run_sweep(&self) {
        let findings = self.classifier.sweep_for_ddos(self.ddos_window_secs);
        for finding in &findings {
            self.engine.respond(finding);
        }
        self.engine.evict_expired();
        self.tracker.prune_idle();

        let recent = self.classifier.get_recent_threats(self.config.pattern_batch_size);
        let mut per_source: HashMap<&str, usize> = HashMap::new();
        for finding in &recent {
            *per_source.entry(finding.source.as_str()).or_default() += 1;
        }
        for (source, count) in per_source {
            if count >= self.config.coordinated_threshold {
                warn!(
                    "[MONITOR] Coordinated attack pattern: {} findings from {} in the last {} findings",
                    count, source, recent.len()
                );
            }
        }
    }

    /// One pass of the metrics loop: aggregate a snapshot, append it,
    /// prune the retention window. Public so embedders can force a
    /// collection outside the loop cadence.
    pub fn collect_metrics(&self) {
        let hour_ago = Utc::now() - Duration::hours(1);
        let mut snapshot = MetricsSnapshot {
            timestamp: Utc::now(),
            total_requests: self.tracker.total_requests(3600) as u64,
            threats_detected: self.classifier.findings_since(hour_ago) as u64,
            threats_blocked: self.engine.blocking_responses_since(hour_ago) as u64,
            unique_sources: self.tracker.source_count() as u64,
            blocked_source_count: self.engine.blocked_count() as u64,
            pipeline_latency_ms: self.latency.lock().drain_average(),
            health_label: String::new(),
        };
        let (score, label) = compute_health(std::slice::from_ref(&snapshot));
        snapshot.health_label = label.to_string();
        debug!(
            "[MONITOR] Snapshot: {} requests, {} threats, {} blocked, health {} ({})",
            snapshot.total_requests, snapshot.threats_detected, snapshot.threats_blocked, score,
            label
        );

        let mut snapshots = self.snapshots.lock();
        snapshots.push(snapshot);
        let retention_cutoff =
            Utc::now() - Duration::hours(self.config.metrics_retention_hours);
        snapshots.retain(|s| s.timestamp > retention_cutoff);
    }

    /// One pass of the health loop: threshold alerts over the last five
    /// minutes of snapshots.
    fn run_health_check(&self) {
        let cutoff = Utc::now() - Duration::minutes(5);
        let recent: Vec<MetricsSnapshot> = {
            let snapshots = self.snapshots.lock();
            snapshots.iter().filter(|s| s.timestamp > cutoff).cloned().collect()
        };
        if recent.is_empty() {
            return;
        }

        let avg_threats = average_threats(&recent);
        if avg_threats > self.config.threat_rate_alert {
            let _ = self.notifier.notify(
                Severity::Warning,
                "Elevated threat rate",
                &format!(
                    "Average of {:.1} threats per snapshot over the last 5 minutes (alert at {:.1})",
                    avg_threats, self.config.threat_rate_alert
                ),
            );
        }

        let blocked = recent
            .last()
            .map(|s| s.blocked_source_count)
            .unwrap_or(0);
        if blocked > self.config.blocked_sources_ceiling as u64 {
            let _ = self.notifier.notify(
                Severity::Warning,
                "Block list growing",
                &format!(
                    "{} sources currently blocked (ceiling {})",
                    blocked, self.config.blocked_sources_ceiling
                ),
            );
        }

        let (score, label) = compute_health(&recent);
        if score < 50 {
            let _ = self.notifier.notify(
                Severity::Critical,
                "Pipeline health degraded",
                &format!("Health score {} ({})", score, label),
            );
        }
    }

    fn record_latency(&self, started: Instant) {
        self.latency
            .lock()
            .record(started.elapsed().as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::{AllowAll, LogAuditSink, LogNotifier};

    fn build() -> Arc<ProactiveMonitor> {
        build_with(VigilConfig::default())
    }

    fn build_with(config: VigilConfig) -> Arc<ProactiveMonitor> {
        let tracker = Arc::new(SourceTracker::new(&config.tracker));
        let classifier =
            Arc::new(ThreatClassifier::new(&config.detection, tracker.clone()).unwrap());
        let engine = Arc::new(
            ResponseEngine::new(&config.response, Arc::new(LogAuditSink), Arc::new(LogNotifier))
                .unwrap(),
        );
        Arc::new(ProactiveMonitor::new(
            &config,
            tracker,
            classifier,
            engine,
            Arc::new(LogAuditSink),
            Arc::new(LogNotifier),
            Arc::new(AllowAll),
        ))
    }

    fn headers() -> HashMap<String, String> {
        HashMap::from([("User-Agent".to_string(), "Mozilla/5.0".to_string())])
    }

    #[test]
    fn test_admit_clean_request() {
        let monitor = build();
        assert!(monitor.admit("203.0.113.10", "GET", "/api/items", &headers(), None));
    }

    #[test]
    fn test_admit_fails_closed_on_critical_finding() {
        let monitor = build();
        // Command injection classifies as Critical: denied on the spot.
        let admitted = monitor.admit(
            "203.0.113.10",
            "POST",
            "/api/run",
            &headers(),
            Some("x; rm -rf /"),
        );
        assert!(!admitted);
        // The response rule also blocked the source for next time.
        assert!(!monitor.admit("203.0.113.10", "GET", "/api/items", &headers(), None));
    }

    #[test]
    fn test_admit_high_finding_blocks_only_subsequent_requests() {
        let monitor = build();
        // SQL injection is High: this request passes, the source does not.
        let admitted = monitor.admit(
            "203.0.113.11",
            "POST",
            "/api/query",
            &headers(),
            Some("' OR '1'='1"),
        );
        assert!(admitted);
        assert!(!monitor.admit("203.0.113.11", "GET", "/api/items", &headers(), None));
    }

    #[test]
    fn test_blocked_source_denied_without_analysis() {
        let monitor = build();
        monitor.block_source("admin", "203.0.113.12", 10, "manual").unwrap();
        assert!(!monitor.admit("203.0.113.12", "GET", "/", &headers(), None));

        assert!(monitor.unblock_source("admin", "203.0.113.12").unwrap());
        assert!(monitor.admit("203.0.113.12", "GET", "/", &headers(), None));
        // Second unblock is a clean no-op.
        assert!(!monitor.unblock_source("admin", "203.0.113.12").unwrap());
    }

    #[test]
    fn test_admin_ops_respect_permission_check() {
        struct DenyAll;
        impl PermissionCheck for DenyAll {
            fn allow(&self, _actor: &str, _action: &str) -> bool {
                false
            }
        }

        let config = VigilConfig::default();
        let tracker = Arc::new(SourceTracker::new(&config.tracker));
        let classifier =
            Arc::new(ThreatClassifier::new(&config.detection, tracker.clone()).unwrap());
        let engine = Arc::new(
            ResponseEngine::new(&config.response, Arc::new(LogAuditSink), Arc::new(LogNotifier))
                .unwrap(),
        );
        let monitor = ProactiveMonitor::new(
            &config,
            tracker,
            classifier,
            engine,
            Arc::new(LogAuditSink),
            Arc::new(LogNotifier),
            Arc::new(DenyAll),
        );

        let result = monitor.block_source("intern", "203.0.113.9", 5, "test");
        assert!(matches!(result, Err(VigilError::PermissionDenied { .. })));
        assert!(monitor.admit("203.0.113.9", "GET", "/", &HashMap::new(), None));
    }

    #[test]
    fn test_brute_force_outcome_triggers_block() {
        let monitor = build();
        for _ in 0..5 {
            monitor.record_auth_outcome("203.0.113.13", "/login", false);
        }
        assert!(!monitor.admit("203.0.113.13", "GET", "/", &headers(), None));
    }

    #[test]
    fn test_rate_limit_violation_admits_but_throttles() {
        let monitor = build();
        for _ in 0..101 {
            assert!(monitor.admit("203.0.113.14", "GET", "/api/items", &headers(), None));
        }
        let recent = monitor.get_recent_threats(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].threat_type, crate::ThreatType::RateLimitViolation);

        let stats = monitor.get_response_stats();
        assert_eq!(stats.actions_taken.get("rate_limit"), Some(&1));
    }

    #[test]
    fn test_dashboard_reports_no_data_before_first_snapshot() {
        let monitor = build();
        let dashboard = monitor.get_dashboard();
        assert_eq!(dashboard.status, "no_data");
        assert!(dashboard.current.is_none());
        assert!(dashboard.threats_detected_trend.is_empty());
        assert!(!dashboard.components.monitor_active);
    }

    #[test]
    fn test_dashboard_after_metrics_collection() {
        let monitor = build();
        monitor.admit(
            "203.0.113.15",
            "POST",
            "/api/query",
            &headers(),
            Some("' OR '1'='1"),
        );
        for _ in 0..15 {
            monitor.collect_metrics();
        }

        let dashboard = monitor.get_dashboard();
        assert_ne!(dashboard.status, "no_data");
        assert_eq!(dashboard.threats_detected_trend.len(), 12);
        let current = dashboard.current.unwrap();
        assert_eq!(current.threats_detected, 1);
        assert_eq!(current.threats_blocked, 1);
        assert_eq!(current.blocked_source_count, 1);
        assert!(!dashboard.alerts.high_threat_rate);
    }

    #[test]
    fn test_sweep_responds_to_flood_outliers() {
        let monitor = build();
        let quiet = headers();
        for i in 0..12 {
            let source = format!("198.51.100.{}", i + 1);
            for _ in 0..10 {
                assert!(monitor.admit(&source, "GET", "/", &quiet, None));
            }
        }
        // Past the rate limit too, but only Medium findings result; the
        // hard block comes from the statistical sweep.
        for _ in 0..150 {
            monitor.admit("203.0.113.66", "GET", "/", &quiet, None);
        }
        monitor.run_sweep();
        assert!(!monitor.admit("203.0.113.66", "GET", "/", &quiet, None));
    }

    #[test]
    fn test_admit_returns_before_alert_delivery() {
        struct SlowNotifier;
        impl Notifier for SlowNotifier {
            fn notify(
                &self,
                _severity: crate::sinks::Severity,
                _title: &str,
                _body: &str,
            ) -> VigilResult<()> {
                std::thread::sleep(std::time::Duration::from_millis(500));
                Ok(())
            }
        }

        let config = VigilConfig::default();
        let tracker = Arc::new(SourceTracker::new(&config.tracker));
        let classifier =
            Arc::new(ThreatClassifier::new(&config.detection, tracker.clone()).unwrap());
        let engine = Arc::new(
            ResponseEngine::new(&config.response, Arc::new(LogAuditSink), Arc::new(SlowNotifier))
                .unwrap(),
        );
        let monitor = ProactiveMonitor::new(
            &config,
            tracker,
            classifier,
            engine,
            Arc::new(LogAuditSink),
            Arc::new(LogNotifier),
            Arc::new(AllowAll),
        );

        // High finding: block + alert rules fire. Admission must not wait
        // on the notification channel.
        let started = std::time::Instant::now();
        let admitted = monitor.admit(
            "203.0.113.20",
            "POST",
            "/api/users",
            &headers(),
            Some("' OR '1'='1"),
        );
        assert!(started.elapsed() < std::time::Duration::from_millis(100));
        assert!(admitted);
        assert!(!monitor.admit("203.0.113.20", "GET", "/", &headers(), None));
    }

    #[test]
    fn test_health_loop_raises_threshold_alerts() {
        struct CapturingNotifier {
            seen: parking_lot::Mutex<Vec<(crate::sinks::Severity, String)>>,
        }
        impl Notifier for CapturingNotifier {
            fn notify(
                &self,
                severity: crate::sinks::Severity,
                title: &str,
                _body: &str,
            ) -> VigilResult<()> {
                self.seen.lock().push((severity, title.to_string()));
                Ok(())
            }
        }

        let notifier = Arc::new(CapturingNotifier {
            seen: parking_lot::Mutex::new(Vec::new()),
        });
        let config = VigilConfig::default();
        let tracker = Arc::new(SourceTracker::new(&config.tracker));
        let classifier =
            Arc::new(ThreatClassifier::new(&config.detection, tracker.clone()).unwrap());
        let engine = Arc::new(
            ResponseEngine::new(&config.response, Arc::new(LogAuditSink), Arc::new(LogNotifier))
                .unwrap(),
        );
        let monitor = ProactiveMonitor::new(
            &config,
            tracker,
            classifier,
            engine,
            Arc::new(LogAuditSink),
            notifier.clone(),
            Arc::new(AllowAll),
        );

        let snapshot = |detected: u64, blocked_sources: u64, latency: f64, blocked: u64| {
            MetricsSnapshot {
                timestamp: Utc::now(),
                total_requests: 5000,
                threats_detected: detected,
                threats_blocked: blocked,
                unique_sources: 40,
                blocked_source_count: blocked_sources,
                pipeline_latency_ms: latency,
                health_label: String::new(),
            }
        };

        // A quiet snapshot raises nothing.
        monitor.snapshots.lock().push(snapshot(2, 3, 50.0, 2));
        monitor.run_health_check();
        assert!(notifier.seen.lock().is_empty());

        // Over every threshold: 60 threats/snapshot (alert at 10), 60
        // blocked sources (ceiling 50), and health 100-20-30-20 = 30.
        monitor.snapshots.lock().clear();
        monitor.snapshots.lock().push(snapshot(60, 60, 1200.0, 24));
        monitor.run_health_check();

        let seen = notifier.seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(
            seen[0],
            (crate::sinks::Severity::Warning, "Elevated threat rate".to_string())
        );
        assert_eq!(
            seen[1],
            (crate::sinks::Severity::Warning, "Block list growing".to_string())
        );
        assert_eq!(
            seen[2],
            (crate::sinks::Severity::Critical, "Pipeline health degraded".to_string())
        );
    }

    #[tokio::test]
    async fn test_immediate_restart_does_not_leak_loops() {
        let monitor = build();
        monitor.start();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(monitor.live_loops.load(Ordering::SeqCst), 3);

        // Restart without yielding in between: the first run's loops have
        // not yet observed their shutdown signal when the second run
        // spawns its own.
        monitor.stop();
        monitor.start();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(monitor.is_active());
        assert_eq!(monitor.live_loops.load(Ordering::SeqCst), 3);
        let dashboard = monitor.get_dashboard();
        assert!(dashboard.components.sweep_loop);
        assert!(dashboard.components.metrics_loop);
        assert!(dashboard.components.health_loop);

        monitor.stop();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(monitor.live_loops.load(Ordering::SeqCst), 0);
        assert!(!monitor.get_dashboard().components.sweep_loop);
    }

    #[tokio::test]
    async fn test_start_and_stop_toggle_loop_flags() {
        let monitor = build();
        assert!(!monitor.is_active());

        monitor.start();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(monitor.is_active());
        let dashboard = monitor.get_dashboard();
        assert!(dashboard.components.sweep_loop);
        assert!(dashboard.components.metrics_loop);
        assert!(dashboard.components.health_loop);
        assert!(dashboard.components.classifier_running);
        // The metrics loop's immediate first tick already collected.
        assert_ne!(dashboard.status, "no_data");

        monitor.stop();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!monitor.is_active());
        let dashboard = monitor.get_dashboard();
        assert!(!dashboard.components.sweep_loop);
        assert!(!dashboard.components.metrics_loop);
        assert!(!dashboard.components.health_loop);
        assert!(!dashboard.components.classifier_running);
    }
}
