//! System-level error kinds, closed set.
//!
//! Tool-level failures never leave a turn (they become `<tool-error>` tool
//! messages); everything that does propagate is one of these kinds. Each kind
//! maps to a stable user-facing message that clients render verbatim.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HiveError {
    /// Input failed a schema or range check; caller-visible message.
    #[error("validation error: {0}")]
    Validation(String),

    /// A tool or subprocess ran and failed.
    #[error("execution error: {0}")]
    Execution(String),

    /// Resolver returned no credentials for the connector.
    #[error("connector not configured: {0}")]
    ConnectorNotConfigured(String),

    /// The provider rejected the credentials.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Upstream asked us to back off.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Owner mismatch or provider-level 403.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Id collision, duplicate name, or execution already finished.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Cooperative deadline exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// An agent with a run in flight refused a second run.
    #[error("agent busy: {0}")]
    AgentBusy(String),

    /// Programmer error; logged with trace, surfaced generically.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HiveError {
    /// Stable message the frontend renders verbatim; routing hints
    /// (reconnect / setup / retry-later) key off the kind, not the text.
    pub fn user_message(&self) -> String {
        match self {
            HiveError::Validation(m) => m.clone(),
            HiveError::Execution(m) => m.clone(),
            HiveError::ConnectorNotConfigured(c) => {
                format!("{c} is not connected. Set it up in integrations.")
            }
            HiveError::InvalidCredentials(c) => {
                format!("{c} credentials were rejected. Please reconnect.")
            }
            HiveError::RateLimited(_) => {
                "The service is rate limited right now. Try again shortly.".to_string()
            }
            HiveError::PermissionDenied(_) => "Access denied.".to_string(),
            HiveError::NotFound(m) => format!("Not found: {m}"),
            HiveError::Conflict(m) => m.clone(),
            HiveError::Timeout(m) => m.clone(),
            HiveError::AgentBusy(_) => "Agent already running".to_string(),
            HiveError::Internal(_) => "Something went wrong. The error has been logged.".to_string(),
        }
    }
}

impl From<rusqlite::Error> for HiveError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => HiveError::NotFound("row".to_string()),
            other => HiveError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for HiveError {
    fn from(e: serde_json::Error) -> Self {
        HiveError::Internal(format!("serialization: {e}"))
    }
}

impl From<tokio::task::JoinError> for HiveError {
    fn from(e: tokio::task::JoinError) -> Self {
        HiveError::Internal(format!("task join: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_user_message_is_stable() {
        let e = HiveError::PermissionDenied("worker x".into());
        assert_eq!(e.user_message(), "Access denied.");
    }

    #[test]
    fn internal_errors_stay_generic_for_users() {
        let e = HiveError::Internal("stack trace details".into());
        assert!(!e.user_message().contains("stack trace"));
    }
}
