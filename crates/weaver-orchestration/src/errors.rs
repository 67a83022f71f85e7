//! Job-level error taxonomy.
//!
//! Agent-level failures are localised: the playbook continues and the
//! failing node reports a soft failure. The kinds here abort the whole job.
//! User-visible messages stay terse and free of internals; detailed
//! diagnostics travel through logs keyed by `job_id`.

use weaver_store_core::StoreError;

/// Errors that abort a job.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// Envelope validation failed; surfaced as a 400-equivalent upstream.
    #[error("invalid job envelope: {0}")]
    BadEnvelope(String),

    /// The domain exists in neither the tenant nor the system scope.
    #[error("domain not found: {0}")]
    DomainNotFound(String),

    /// The selected playbook has no nodes.
    #[error("playbook disabled for domain {domain_id} ({job_type})")]
    PlaybookDisabled {
        /// Domain whose playbook was selected.
        domain_id: String,
        /// Job type that selected it.
        job_type: &'static str,
    },

    /// The playbook graph is malformed (cycle, dangling edge).
    #[error("invalid playbook for domain {domain_id}: {reason}")]
    InvalidPlaybook {
        /// Domain whose playbook failed validation.
        domain_id: String,
        /// What the Kahn check found.
        reason: String,
    },

    /// An agent id referenced by the playbook exists in neither scope.
    #[error("agent missing: {0}")]
    AgentMissing(String),

    /// A strict agent failed; the job aborts.
    #[error("strict agent failed: {0}")]
    AgentFailed(String),

    /// Persistence failed past retries.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The job exceeded its wall-clock deadline.
    #[error("job exceeded its deadline")]
    Timeout,
}

impl OrchestrationError {
    /// Stable taxonomy value persisted with failed jobs and surfaced in
    /// status events.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestrationError::BadEnvelope(_) => "bad_envelope",
            OrchestrationError::DomainNotFound(_) => "domain_not_found",
            OrchestrationError::PlaybookDisabled { .. } => "playbook_disabled",
            OrchestrationError::InvalidPlaybook { .. } => "invalid_playbook",
            OrchestrationError::AgentMissing(_) => "agent_missing",
            OrchestrationError::AgentFailed(_) => "agent_failed",
            OrchestrationError::StoreUnavailable(_) => "store_unavailable",
            OrchestrationError::Timeout => "timeout",
        }
    }

    /// Terse, user-safe message. Internals stay in logs.
    pub fn user_message(&self) -> String {
        match self {
            OrchestrationError::BadEnvelope(_) => "The request was malformed.".to_string(),
            OrchestrationError::DomainNotFound(_) => {
                "The requested domain is not configured.".to_string()
            }
            OrchestrationError::PlaybookDisabled { .. } => {
                "This operation is not enabled for the domain.".to_string()
            }
            OrchestrationError::InvalidPlaybook { .. }
            | OrchestrationError::AgentMissing(_) => {
                "The domain configuration is invalid.".to_string()
            }
            OrchestrationError::AgentFailed(_) => {
                "A required processing step failed.".to_string()
            }
            OrchestrationError::StoreUnavailable(_) => {
                "The service is temporarily unavailable.".to_string()
            }
            OrchestrationError::Timeout => "The request took too long.".to_string(),
        }
    }
}

impl From<StoreError> for OrchestrationError {
    fn from(err: StoreError) -> Self {
        OrchestrationError::StoreUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(OrchestrationError::Timeout.kind(), "timeout");
        assert_eq!(
            OrchestrationError::BadEnvelope("x".into()).kind(),
            "bad_envelope"
        );
        assert_eq!(
            OrchestrationError::PlaybookDisabled {
                domain_id: "d".into(),
                job_type: "ingest",
            }
            .kind(),
            "playbook_disabled"
        );
    }

    #[test]
    fn user_messages_hide_internals() {
        let err = OrchestrationError::StoreUnavailable("connection to 10.0.0.3 refused".into());
        assert!(!err.user_message().contains("10.0.0.3"));
    }

    #[test]
    fn store_errors_convert() {
        let err: OrchestrationError = StoreError::Unavailable("down".into()).into();
        assert_eq!(err.kind(), "store_unavailable");
    }
}
