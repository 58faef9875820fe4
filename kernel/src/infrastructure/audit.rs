use serde::Serialize;
use tracing::{info, info_span};

/// Domain event for audit logging.
/// Structured for JSON serialization to enable machine-readable audit trails.
#[derive(Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// The kernel process started.
    SystemStartup {
        /// Component that started.
        component: String,
    },
    /// The kernel process is shutting down.
    SystemShutdown {
        /// Why the process is stopping.
        reason: String,
    },
    /// A caller lacked the permissions a method requires.
    AccessDenied {
        /// Caller identity, empty when unauthenticated.
        user: String,
        /// Method that was refused.
        resource: String,
    },
    /// An applet's public methods were moved to another execution target.
    AppletRetargeted {
        /// Owning applet.
        applet: String,
        /// New execution target.
        target: String,
        /// Number of methods moved.
        methods: usize,
    },
}

/// Logs an audit event to the dedicated audit channel as structured JSON.
/// This uses a specific `target` which can be filtered by the subscriber to redirect to a secure file.
pub fn log_audit(event: &AuditEvent) {
    let span = info_span!(target: "audit", "audit_event");
    let _enter = span.enter();

    let json = serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"));
    info!(target: "audit", audit_json = %json, "Security Audit Event");
}
