//! Per-job status emission.
//!
//! The [`StatusEmitter`] binds one job's identity to the injected bus and
//! builds the event payloads. Emission is best-effort: a failed publish is
//! logged and metered, never propagated — losing an event must not fail the
//! job. Callers are responsible for ordering: every emit happens strictly
//! after the corresponding persisted transition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use weaver_bus_core::StatusPublisher;
use weaver_types::{AgentExecutionResult, AgentRunStatus, EventType, JobEnvelope, StatusEvent};

/// Builds and publishes one job's status events.
pub struct StatusEmitter {
    bus: Arc<dyn StatusPublisher>,
    job_id: String,
    tenant_id: String,
    user_id: String,
    session_id: Option<String>,
    dropped: AtomicU64,
}

impl StatusEmitter {
    /// An emitter bound to one job's identity.
    pub fn new(bus: Arc<dyn StatusPublisher>, envelope: &JobEnvelope) -> Self {
        Self::for_job(
            bus,
            &envelope.job_id,
            &envelope.tenant_id,
            &envelope.user_id,
            envelope.session_id.clone(),
        )
    }

    /// An emitter for a job known only by its row (supervisor sweeps).
    pub fn for_job(
        bus: Arc<dyn StatusPublisher>,
        job_id: &str,
        tenant_id: &str,
        user_id: &str,
        session_id: Option<String>,
    ) -> Self {
        Self {
            bus,
            job_id: job_id.to_string(),
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            session_id,
            dropped: AtomicU64::new(0),
        }
    }

    /// Events that could not be published for this job.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn emit(
        &self,
        event_type: EventType,
        status: &str,
        message: impl Into<String>,
        agent_id: Option<&str>,
        metadata: Option<Value>,
    ) {
        let event = StatusEvent {
            job_id: self.job_id.clone(),
            tenant_id: self.tenant_id.clone(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            event_type,
            agent_id: agent_id.map(String::from),
            status: status.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
            metadata,
        };
        if let Err(e) = self.bus.publish(&event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(job_id = %self.job_id, event_type = event_type.as_str(), error = %e,
                  "failed to publish status event");
        }
    }

    /// The job left `queued` and is running.
    pub fn job_started(&self) {
        self.emit(EventType::JobStarted, "running", "Processing started.", None, None);
    }

    /// One agent began executing.
    pub fn agent_started(&self, agent_id: &str) {
        self.emit(
            EventType::AgentStarted,
            "running",
            format!("Agent {agent_id} started."),
            Some(agent_id),
            None,
        );
    }

    /// One agent finished; picks the completed/failed event by status.
    pub fn agent_finished(&self, result: &AgentExecutionResult) {
        let metadata = json!({
            "attempts": result.attempts,
            "duration_ms": result.duration_ms(),
            "confidence": result.confidence,
        });
        match result.status {
            AgentRunStatus::Completed => self.emit(
                EventType::AgentCompleted,
                result.status.as_str(),
                format!("Agent {} completed.", result.agent_id),
                Some(&result.agent_id),
                Some(metadata),
            ),
            _ => self.emit(
                EventType::AgentFailed,
                result.status.as_str(),
                format!("Agent {} did not complete.", result.agent_id),
                Some(&result.agent_id),
                Some(metadata),
            ),
        }
    }

    /// The job needs a clarification follow-up.
    pub fn clarification_required(&self, fields: &[String]) {
        self.emit(
            EventType::ClarificationRequired,
            "awaiting_clarification",
            "More detail is needed to finish this report.",
            None,
            Some(json!({ "fields": fields })),
        );
    }

    /// Terminal: completed.
    pub fn job_completed(&self, job_confidence: f64) {
        self.emit(
            EventType::JobCompleted,
            "complete",
            "Processing completed.",
            None,
            Some(json!({ "job_confidence": job_confidence })),
        );
    }

    /// Terminal: failed, with the taxonomy value and a terse message.
    pub fn job_failed(&self, kind: &str, user_message: &str) {
        self.emit(
            EventType::JobFailed,
            "failed",
            user_message,
            None,
            Some(json!({ "reason": kind })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weaver_bus_core::InMemoryStatusBus;
    use weaver_types::{JobInput, JobType};

    fn envelope() -> JobEnvelope {
        JobEnvelope {
            job_id: "job-1".into(),
            tenant_id: "acme".into(),
            user_id: "user-1".into(),
            job_type: JobType::Ingest,
            domain_id: "d1".into(),
            session_id: Some("sess-1".into()),
            deadline_epoch_ms: None,
            input: JobInput {
                text: Some("report".into()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn events_carry_job_identity() {
        let bus = Arc::new(InMemoryStatusBus::new(16));
        let mut rx = bus.subscribe();
        let emitter = StatusEmitter::new(bus, &envelope());

        emitter.job_started();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id, "job-1");
        assert_eq!(event.tenant_id, "acme");
        assert_eq!(event.session_id.as_deref(), Some("sess-1"));
        assert_eq!(event.event_type, EventType::JobStarted);
    }

    #[tokio::test]
    async fn agent_finished_picks_event_by_status() {
        let bus = Arc::new(InMemoryStatusBus::new(16));
        let mut rx = bus.subscribe();
        let emitter = StatusEmitter::new(bus, &envelope());

        let failed = AgentExecutionResult::failed("geo", Utc::now(), 3, "boom");
        emitter.agent_finished(&failed);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::AgentFailed);
        assert_eq!(event.agent_id.as_deref(), Some("geo"));
        assert_eq!(event.metadata.as_ref().unwrap()["attempts"], 3);
    }

    #[tokio::test]
    async fn failed_job_event_carries_reason() {
        let bus = Arc::new(InMemoryStatusBus::new(16));
        let mut rx = bus.subscribe();
        let emitter = StatusEmitter::new(bus, &envelope());

        emitter.job_failed("timeout", "The request took too long.");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::JobFailed);
        assert_eq!(event.metadata.as_ref().unwrap()["reason"], "timeout");
        assert_eq!(event.message, "The request took too long.");
    }
}
