//! # External Collaborator Seams
//!
//! Trait boundaries for everything Vigil hands off to the outside world:
//! audit recording, operator notification, and admin-action permission
//! checks. The pipeline core stays in-memory and synchronous; these seams
//! are where deployments plug in their own infrastructure.
//!
//! Default implementations are log-backed (plus an optional webhook
//! notifier) so the pipeline is fully functional with no wiring at all.

use log::{error, info, warn};
use serde_json::json;
use std::time::Duration;

use crate::{VigilError, VigilResult};

/// Notification severity, independent of threat level so operational
/// alerts (health degradation, loop failures) can use the same channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// Receives structured audit events for admin actions and rule-ordered
/// log events. Implementations must not block the caller for long.
pub trait AuditSink: Send + Sync {
    fn record(
        &self,
        action: &str,
        resource: &str,
        actor: &str,
        details: &str,
        source: Option<&str>,
    ) -> VigilResult<()>;
}

/// Delivers operator-facing alerts. Delivery failure is reported to the
/// caller but must never panic or block indefinitely.
pub trait Notifier: Send + Sync {
    fn notify(&self, severity: Severity, title: &str, body: &str) -> VigilResult<()>;
}

/// Decides whether an actor may perform a named admin action.
pub trait PermissionCheck: Send + Sync {
    fn allow(&self, actor: &str, action: &str) -> bool;
}

/// Audit sink that writes structured lines to the process log.
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(
        &self,
        action: &str,
        resource: &str,
        actor: &str,
        details: &str,
        source: Option<&str>,
    ) -> VigilResult<()> {
        info!(
            "[AUDIT] action={} resource={} actor={} source={} details={}",
            action,
            resource,
            actor,
            source.unwrap_or("-"),
            details
        );
        Ok(())
    }
}

/// Notifier that writes alerts to the process log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, severity: Severity, title: &str, body: &str) -> VigilResult<()> {
        match severity {
            Severity::Critical => error!("[ALERT] {}: {}", title, body),
            Severity::Warning => warn!("[ALERT] {}: {}", title, body),
            Severity::Info => info!("[ALERT] {}: {}", title, body),
        }
        Ok(())
    }
}

/// Notifier that POSTs alerts as JSON to a webhook endpoint.
///
/// Requests carry a short timeout so a dead endpoint cannot stall the
/// response path. Delivery failures are returned, not swallowed; the
/// caller records them in the response log.
pub struct WebhookNotifier {
    url: String,
    agent: ureq::Agent,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(5))
                .build(),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, severity: Severity, title: &str, body: &str) -> VigilResult<()> {
        let payload = json!({
            "severity": severity.as_str(),
            "title": title,
            "body": body,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.agent
            .post(&self.url)
            .send_json(payload)
            .map_err(|e| VigilError::Config(format!("Webhook delivery failed: {}", e)))?;
        Ok(())
    }
}

/// Permission check that admits every actor. The default for deployments
/// without an authorization layer.
pub struct AllowAll;

impl PermissionCheck for AllowAll {
    fn allow(&self, _actor: &str, _action: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_backed_sinks_always_succeed() {
        let audit = LogAuditSink;
        assert!(audit
            .record("block_source", "203.0.113.9", "system", "{}", Some("203.0.113.9"))
            .is_ok());

        let notifier = LogNotifier;
        assert!(notifier.notify(Severity::Critical, "test", "body").is_ok());
    }

    #[test]
    fn test_allow_all_admits_everyone() {
        assert!(AllowAll.allow("anyone", "unblock_source"));
    }

    #[test]
    fn test_webhook_failure_is_an_error_not_a_panic() {
        // Unroutable per RFC 5737; delivery must fail cleanly.
        let notifier = WebhookNotifier::new("http://192.0.2.1:9/hook");
        assert!(notifier.notify(Severity::Info, "test", "body").is_err());
    }
}
