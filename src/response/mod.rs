//! # Response Engine
//!
//! Maps findings to mitigation through a declarative `(threat type, level)
//! -> actions` rule table, maintains the time-bounded block list, and keeps
//! an append-only log of everything it did.
//!
//! Rules are resolved and validated once at construction; a bad rule is a
//! startup error, never a request-time one. `respond` is fully synchronous
//! and infallible: individual action failures are collected into the
//! response log instead of aborting the remaining actions.
//!
//! Alert delivery never runs on the caller: `AlertAdmin` pushes onto a
//! bounded queue drained by a dedicated thread, so a slow notification
//! channel cannot stall request admission. A full queue is recorded in
//! `ResponseLog.errors`; a failed delivery is logged by the drain thread.
//!
//! Block expiry is lazy. `is_blocked` compares against the stored deadline
//! in O(1); expired entries are physically removed by `evict_expired`,
//! which the monitor's sweep loop calls periodically. No per-block timer
//! tasks exist.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::sinks::{AuditSink, Notifier, Severity};
use crate::{
    ResponseActionKind, ResponseConfig, ResponseLog, ThreatFinding, ThreatLevel, ThreatType,
    VigilError, VigilResult,
};

/// Bound on queued, undelivered alerts. Past this the response log records
/// the drop instead of the caller waiting on the notifier.
const ALERT_QUEUE_CAPACITY: usize = 256;

/// One alert waiting for the drain thread.
struct AlertMessage {
    severity: Severity,
    title: String,
    body: String,
}

/// One resolved response rule. Matches a finding when both the threat type
/// and the level are equal.
#[derive(Debug, Clone)]
pub struct ResponseRule {
    pub threat_type: ThreatType,
    pub threat_level: ThreatLevel,
    pub actions: Vec<ResponseActionKind>,
    pub auto_execute: bool,
    pub cooldown: Duration,
}

/// One entry in the block list.
#[derive(Debug, Clone)]
pub struct BlockEntry {
    pub blocked_until: DateTime<Utc>,
    pub reason: String,
}

/// Aggregate view over the response history and block list.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseStats {
    pub total_responses: usize,
    pub successful_responses: usize,
    pub success_rate: f64,
    pub blocked_source_count: usize,
    pub blocked_sources: Vec<String>,
    pub actions_taken: BTreeMap<String, usize>,
}

/// Rule-driven mitigation with a lazily-evicted block list.
pub struct ResponseEngine {
    rules: Vec<ResponseRule>,
    blocks: DashMap<String, BlockEntry>,
    throttled: DashMap<String, DateTime<Utc>>,
    history: Mutex<Vec<ResponseLog>>,
    audit: Arc<dyn AuditSink>,
    /// Hand-off to the alert drain thread. The thread exits when the
    /// engine (and with it this sender) is dropped.
    alerts: std::sync::mpsc::SyncSender<AlertMessage>,
}

impl ResponseEngine {
    /// Build an engine from configuration. An empty rule table selects the
    /// built-in defaults; a rule naming an unknown threat type, level, or
    /// action fails here.
    pub fn new(
        config: &ResponseConfig,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn Notifier>,
    ) -> VigilResult<Self> {
        let default_cooldown = Duration::minutes(config.default_cooldown_minutes);
        let rules = if config.rules.is_empty() {
            default_rules(default_cooldown)
        } else {
            let mut resolved = Vec::with_capacity(config.rules.len());
            for rule in &config.rules {
                let mut actions = Vec::with_capacity(rule.actions.len());
                for name in &rule.actions {
                    actions.push(ResponseActionKind::parse(name)?);
                }
                resolved.push(ResponseRule {
                    threat_type: ThreatType::parse(&rule.threat_type)?,
                    threat_level: ThreatLevel::parse(&rule.threat_level)?,
                    actions,
                    auto_execute: rule.auto_execute,
                    cooldown: rule
                        .cooldown_minutes
                        .map(Duration::minutes)
                        .unwrap_or(default_cooldown),
                });
            }
            resolved
        };

        let (alerts, alert_rx) = std::sync::mpsc::sync_channel(ALERT_QUEUE_CAPACITY);
        std::thread::Builder::new()
            .name("vigil-alerts".to_string())
            .spawn(move || {
                while let Ok(alert) = alert_rx.recv() {
                    let AlertMessage { severity, title, body } = alert;
                    if let Err(e) = notifier.notify(severity, &title, &body) {
                        warn!("[ALERT] Delivery failed: {}", e);
                    }
                }
            })?;

        Ok(Self {
            rules,
            blocks: DashMap::new(),
            throttled: DashMap::new(),
            history: Mutex::new(Vec::new()),
            audit,
            alerts,
        })
    }

    /// Execute every matching auto-executing rule against `finding`, in
    /// declaration order. A failing action is recorded and the remaining
    /// actions still run. Always returns a log entry; `success` is false
    /// only when at least one action failed.
    pub fn respond(&self, finding: &ThreatFinding) -> ResponseLog {
        let mut actions_taken = Vec::new();
        let mut errors = Vec::new();

        for rule in self
            .rules
            .iter()
            .filter(|r| r.threat_type == finding.threat_type && r.threat_level == finding.level)
        {
            if !rule.auto_execute {
                info!(
                    "[RESPOND] Rule for {} {} requires manual approval, skipping",
                    finding.level.as_str(),
                    finding.threat_type.as_str()
                );
                continue;
            }
            for &action in &rule.actions {
                match self.execute(action, finding, rule.cooldown) {
                    Ok(()) => actions_taken.push(action),
                    Err(e) => {
                        warn!(
                            "[RESPOND] Action {} failed for finding {}: {}",
                            action.as_str(),
                            finding.id,
                            e
                        );
                        errors.push(format!("{}: {}", action.as_str(), e));
                    }
                }
            }
        }

        if actions_taken.is_empty() && errors.is_empty() {
            debug!(
                "[RESPOND] No auto rule for {} {} (finding {})",
                finding.level.as_str(),
                finding.threat_type.as_str(),
                finding.id
            );
        }

        let log = ResponseLog {
            finding_id: finding.id.clone(),
            threat_type: finding.threat_type,
            source: finding.source.clone(),
            actions_taken,
            success: errors.is_empty(),
            errors,
            timestamp: Utc::now(),
        };
        self.history.lock().push(log.clone());
        log
    }

    fn execute(
        &self,
        action: ResponseActionKind,
        finding: &ThreatFinding,
        cooldown: Duration,
    ) -> VigilResult<()> {
        match action {
            ResponseActionKind::BlockSource => {
                self.block_for(&finding.source, cooldown, &finding.description);
                Ok(())
            }
            ResponseActionKind::AlertAdmin => {
                let severity = match finding.level {
                    ThreatLevel::Critical => Severity::Critical,
                    ThreatLevel::High => Severity::Warning,
                    _ => Severity::Info,
                };
                let message = AlertMessage {
                    severity,
                    title: format!("Threat detected: {}", finding.threat_type.as_str()),
                    body: serde_json::to_string(finding)?,
                };
                self.alerts.try_send(message).map_err(|e| match e {
                    std::sync::mpsc::TrySendError::Full(_) => VigilError::AlertQueueFull,
                    std::sync::mpsc::TrySendError::Disconnected(_) => {
                        VigilError::Config("alert channel closed".to_string())
                    }
                })
            }
            ResponseActionKind::RateLimit => {
                let until = Utc::now() + cooldown;
                self.throttled.insert(finding.source.clone(), until);
                info!(
                    "[THROTTLE] {} rate-limited until {}",
                    finding.source, until
                );
                Ok(())
            }
            ResponseActionKind::LogEvent => self.audit.record(
                "threat_detected",
                &finding.request.endpoint,
                "system",
                &serde_json::to_string(finding)?,
                Some(&finding.source),
            ),
            ResponseActionKind::Escalate | ResponseActionKind::Quarantine => {
                // Forwarded to incident management when one is wired in.
                warn!(
                    "[RESPOND] {} ordered for {} (no incident backend wired)",
                    action.as_str(),
                    finding.source
                );
                self.audit.record(
                    action.as_str(),
                    &finding.request.endpoint,
                    "system",
                    &finding.description,
                    Some(&finding.source),
                )
            }
        }
    }

    /// True while `source` has an unexpired block entry. O(1); expired
    /// entries answer false immediately even before eviction.
    pub fn is_blocked(&self, source: &str) -> bool {
        self.blocks
            .get(source)
            .is_some_and(|entry| Utc::now() < entry.blocked_until)
    }

    /// Block `source` for `minutes`. Admin-surface variant of `block_for`.
    pub fn block_source(&self, source: &str, minutes: i64, reason: &str) {
        self.block_for(source, Duration::minutes(minutes), reason);
    }

    /// Insert or refresh a block entry. Re-blocking keeps whichever
    /// deadline is later, so overlapping responses only ever extend a block.
    pub fn block_for(&self, source: &str, duration: Duration, reason: &str) {
        let candidate = Utc::now() + duration;
        let mut entry = self.blocks.entry(source.to_string()).or_insert(BlockEntry {
            blocked_until: candidate,
            reason: reason.to_string(),
        });
        if candidate > entry.blocked_until {
            entry.blocked_until = candidate;
            entry.reason = reason.to_string();
        }
        info!(
            "[BLOCK] {} blocked until {} ({})",
            source, entry.blocked_until, entry.reason
        );
    }

    /// Remove the block entry for `source`. Idempotent; returns whether an
    /// entry existed.
    pub fn unblock_source(&self, source: &str) -> bool {
        let removed = self.blocks.remove(source).is_some();
        if removed {
            info!("[BLOCK] {} unblocked", source);
        }
        removed
    }

    /// Current block deadline for `source`, expired entries included.
    pub fn block_deadline(&self, source: &str) -> Option<DateTime<Utc>> {
        self.blocks.get(source).map(|entry| entry.blocked_until)
    }

    /// Physically remove expired block and throttle entries. Called from
    /// background maintenance. Returns the number of blocks evicted.
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.blocks.len();
        self.blocks.retain(|_, entry| entry.blocked_until > now);
        self.throttled.retain(|_, until| *until > now);
        let evicted = before - self.blocks.len();
        if evicted > 0 {
            debug!("[BLOCK] Evicted {} expired block entries", evicted);
        }
        evicted
    }

    /// True while `source` is marked for tighter admission. Advisory: the
    /// embedding layer decides what throttling means.
    pub fn is_throttled(&self, source: &str) -> bool {
        self.throttled
            .get(source)
            .is_some_and(|until| Utc::now() < *until)
    }

    /// Sources with unexpired block entries.
    pub fn blocked_sources(&self) -> Vec<String> {
        let now = Utc::now();
        self.blocks
            .iter()
            .filter(|entry| entry.blocked_until > now)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Count of unexpired block entries.
    pub fn blocked_count(&self) -> usize {
        let now = Utc::now();
        self.blocks
            .iter()
            .filter(|entry| entry.blocked_until > now)
            .count()
    }

    /// Count of response log entries after `cutoff` that ordered a block.
    pub fn blocking_responses_since(&self, cutoff: DateTime<Utc>) -> usize {
        self.history
            .lock()
            .iter()
            .filter(|log| log.timestamp > cutoff)
            .filter(|log| log.actions_taken.contains(&ResponseActionKind::BlockSource))
            .count()
    }

    /// The most recent response log entries, newest first.
    pub fn recent_logs(&self, limit: usize) -> Vec<ResponseLog> {
        let history = self.history.lock();
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Aggregate statistics over the full response history and block list.
    pub fn response_stats(&self) -> ResponseStats {
        let history = self.history.lock();
        let total = history.len();
        let successful = history.iter().filter(|log| log.success).count();

        let mut actions_taken: BTreeMap<String, usize> = BTreeMap::new();
        for log in history.iter() {
            for action in &log.actions_taken {
                *actions_taken.entry(action.as_str().to_string()).or_default() += 1;
            }
        }

        let mut blocked_sources = self.blocked_sources();
        blocked_sources.sort();

        ResponseStats {
            total_responses: total,
            successful_responses: successful,
            success_rate: if total == 0 {
                1.0
            } else {
                successful as f64 / total as f64
            },
            blocked_source_count: blocked_sources.len(),
            blocked_sources,
            actions_taken,
        }
    }
}

/// The built-in rule table, applied when the config supplies none.
///
/// Injection attacks block immediately; brute force blocks for half an
/// hour; rate-limit violations throttle without a hard block.
fn default_rules(default_cooldown: Duration) -> Vec<ResponseRule> {
    use ResponseActionKind::*;
    use ThreatLevel::*;
    use ThreatType::*;

    let rule = |threat_type, threat_level, actions: Vec<ResponseActionKind>, cooldown| {
        ResponseRule {
            threat_type,
            threat_level,
            actions,
            auto_execute: true,
            cooldown,
        }
    };

    vec![
        rule(SqlInjection, Critical, vec![BlockSource, AlertAdmin], default_cooldown),
        rule(SqlInjection, High, vec![BlockSource, AlertAdmin], default_cooldown),
        rule(CommandInjection, Critical, vec![BlockSource, AlertAdmin], default_cooldown),
        rule(XssAttack, High, vec![BlockSource, AlertAdmin], default_cooldown),
        rule(BruteForce, High, vec![BlockSource, AlertAdmin], Duration::minutes(30)),
        rule(DdosAttempt, Critical, vec![BlockSource, AlertAdmin], default_cooldown),
        rule(RateLimitViolation, Medium, vec![RateLimit, LogEvent], default_cooldown),
    ]
}
