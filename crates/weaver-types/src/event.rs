//! Status events streamed onto the push channel while a job runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle and per-agent event kinds, in the order a client may observe
/// them for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// The job left `queued` and its first agent is about to run.
    JobStarted,
    /// One agent began executing.
    AgentStarted,
    /// One agent finished successfully.
    AgentCompleted,
    /// One agent finished unsuccessfully (soft failure unless strict).
    AgentFailed,
    /// The job needs a clarification follow-up before it can complete.
    ClarificationRequired,
    /// Terminal: the job completed.
    JobCompleted,
    /// Terminal: the job failed.
    JobFailed,
}

impl EventType {
    /// Wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::JobStarted => "job_started",
            EventType::AgentStarted => "agent_started",
            EventType::AgentCompleted => "agent_completed",
            EventType::AgentFailed => "agent_failed",
            EventType::ClarificationRequired => "clarification_required",
            EventType::JobCompleted => "job_completed",
            EventType::JobFailed => "job_failed",
        }
    }
}

/// The payload published per event. Events are strictly ordered per
/// `job_id`; delivery beyond the bus is best-effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Correlation key for everything this job emits.
    pub job_id: String,
    /// Tenant scope of the job.
    pub tenant_id: String,
    /// User the push channel fans out to.
    pub user_id: String,
    /// Optional client session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Which transition or agent step happened.
    pub event_type: EventType,
    /// Agent involved, for per-agent events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Job or agent status string at emit time.
    pub status: String,
    /// Terse, user-safe description.
    pub message: String,
    /// Emit timestamp (ISO 8601 on the wire).
    pub timestamp: DateTime<Utc>,
    /// Event-specific extras (attempt counts, durations, confidence).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl StatusEvent {
    /// Attach an agent id.
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&EventType::ClarificationRequired).unwrap(),
            "\"clarification_required\""
        );
        assert_eq!(EventType::AgentFailed.as_str(), "agent_failed");
    }

    #[test]
    fn status_event_serde_roundtrip() {
        let event = StatusEvent {
            job_id: "job-1".to_string(),
            tenant_id: "acme".to_string(),
            user_id: "user-1".to_string(),
            session_id: None,
            event_type: EventType::AgentCompleted,
            agent_id: Some("geo".to_string()),
            status: "completed".to_string(),
            message: "agent completed".to_string(),
            timestamp: Utc::now(),
            metadata: Some(serde_json::json!({"attempts": 1})),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: StatusEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
