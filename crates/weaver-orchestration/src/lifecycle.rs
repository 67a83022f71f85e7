//! Job lifecycle management.
//!
//! Owns every persisted job transition and the per-job-type completion
//! merges. Two rules hold throughout:
//!
//! - **At-most-once per transition.** Every `(job_id, transition)` pair is
//!   guarded by an idempotence marker, so a replayed delivery does not
//!   double-apply a write or re-emit an event.
//! - **Persist, then emit.** Status events go out strictly after the
//!   corresponding store write; a crash in between loses the event rather
//!   than duplicating it, and clients reconcile by polling the job row.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use weaver_bus_core::StatusPublisher;
use weaver_store_core::{
    document, encode_for_store, JobRow, JobStore, RecordFields, RecordStore,
};
use weaver_types::{JobEnvelope, JobResult, JobStatus, JobType};

use crate::errors::OrchestrationError;
use crate::publisher::StatusEmitter;

/// Record status strings written by the lifecycle manager.
mod record_status {
    pub const PROCESSING: &str = "processing";
    pub const AWAITING_CLARIFICATION: &str = "awaiting_clarification";
    pub const COMPLETE: &str = "complete";
    pub const FAILED: &str = "failed";
}

/// Owns job rows and the record writes each transition performs.
pub struct JobLifecycleManager {
    jobs: Arc<dyn JobStore>,
    records: Arc<dyn RecordStore>,
    applied: DashMap<(String, String), ()>,
}

impl JobLifecycleManager {
    /// New manager over the job and record stores.
    pub fn new(jobs: Arc<dyn JobStore>, records: Arc<dyn RecordStore>) -> Self {
        Self {
            jobs,
            records,
            applied: DashMap::new(),
        }
    }

    /// Load a job row.
    pub async fn load(
        &self,
        tenant_id: &str,
        job_id: &str,
    ) -> Result<Option<JobRow>, OrchestrationError> {
        Ok(self.jobs.get_job(tenant_id, job_id).await?)
    }

    /// `queued → running`: persist the initial job row (and, for fresh
    /// ingest jobs, the initial record with status `processing`), then
    /// publish `job_started`.
    pub async fn mark_running(
        &self,
        envelope: &JobEnvelope,
        deadline_at: DateTime<Utc>,
        emitter: &StatusEmitter,
    ) -> Result<JobRow, OrchestrationError> {
        let resuming = envelope.is_clarification_followup();
        let transition = if resuming { "resume" } else { "running" };
        if !self.first_application(&envelope.job_id, transition) {
            if let Some(row) = self.load(&envelope.tenant_id, &envelope.job_id).await? {
                return Ok(row);
            }
        }

        let now = Utc::now();
        let row = if resuming {
            let mut row = self
                .load(&envelope.tenant_id, &envelope.job_id)
                .await?
                .ok_or_else(|| {
                    OrchestrationError::BadEnvelope(
                        "clarification follow-up for unknown job".to_string(),
                    )
                })?;
            row.status = JobStatus::Running;
            row.clarification_consumed = true;
            row.updated_at = now;
            row.deadline_at = deadline_at;
            row
        } else {
            let record_id = if envelope.job_type == JobType::Ingest {
                let raw_input = serde_json::to_value(&envelope.input)
                    .unwrap_or(serde_json::Value::Null);
                let record = document::new_record(
                    &envelope.tenant_id,
                    &envelope.domain_id,
                    &raw_input,
                    record_status::PROCESSING,
                    now,
                );
                Some(
                    self.records
                        .create_record(&envelope.tenant_id, record)
                        .await?,
                )
            } else {
                envelope.input.record_id.clone()
            };
            JobRow {
                job_id: envelope.job_id.clone(),
                tenant_id: envelope.tenant_id.clone(),
                user_id: envelope.user_id.clone(),
                session_id: envelope.session_id.clone(),
                domain_id: envelope.domain_id.clone(),
                job_type: envelope.job_type,
                status: JobStatus::Running,
                result: None,
                clarification: None,
                clarification_consumed: false,
                record_id,
                created_at: now,
                updated_at: now,
                deadline_at,
            }
        };

        self.jobs.put_job(row.clone()).await?;
        emitter.job_started();
        info!(job_id = %row.job_id, job_type = row.job_type.as_str(), "job running");
        Ok(row)
    }

    /// `running → complete` for ingest: merge the playbook outputs into the
    /// record's `ingestion_data`, finalise the job row, publish
    /// `job_completed`.
    pub async fn complete_ingest(
        &self,
        mut row: JobRow,
        result: JobResult,
        job_confidence: f64,
        emitter: &StatusEmitter,
    ) -> Result<JobRow, OrchestrationError> {
        if !self.first_application(&row.job_id, "complete") {
            return Ok(row);
        }

        if let Some(record_id) = &row.record_id {
            let ingestion_data =
                encode_for_store(&serde_json::Value::Object(result.merged_output.clone()))?;
            let partial = json!({
                RecordFields::INGESTION_DATA: ingestion_data,
                RecordFields::STATUS: record_status::COMPLETE,
                RecordFields::UPDATED_AT: Utc::now().to_rfc3339(),
            });
            self.records
                .merge_record(&row.tenant_id, record_id, partial)
                .await?;
        }

        row.status = JobStatus::Complete;
        row.result = Some(result);
        row.updated_at = Utc::now();
        self.jobs.put_job(row.clone()).await?;
        emitter.job_completed(job_confidence);
        Ok(row)
    }

    /// `running → awaiting_clarification`: the record keeps no playbook
    /// output yet; the job row gains the clarification bundle. Publishes
    /// `clarification_required`.
    pub async fn await_clarification(
        &self,
        mut row: JobRow,
        result: JobResult,
        emitter: &StatusEmitter,
    ) -> Result<JobRow, OrchestrationError> {
        if !self.first_application(&row.job_id, "clarify") {
            return Ok(row);
        }

        if let Some(record_id) = &row.record_id {
            let partial = json!({
                RecordFields::STATUS: record_status::AWAITING_CLARIFICATION,
                RecordFields::UPDATED_AT: Utc::now().to_rfc3339(),
            });
            self.records
                .merge_record(&row.tenant_id, record_id, partial)
                .await?;
        }

        let bundle = result.clarification_bundle();
        let fields = bundle.fields.clone();
        row.status = JobStatus::AwaitingClarification;
        row.clarification = Some(bundle);
        row.result = Some(result);
        row.updated_at = Utc::now();
        self.jobs.put_job(row.clone()).await?;
        emitter.clarification_required(&fields);
        Ok(row)
    }

    /// `running → complete` for query: the answer lives on the job row;
    /// records are not mutated.
    pub async fn complete_query(
        &self,
        mut row: JobRow,
        result: JobResult,
        job_confidence: f64,
        emitter: &StatusEmitter,
    ) -> Result<JobRow, OrchestrationError> {
        if !self.first_application(&row.job_id, "complete") {
            return Ok(row);
        }
        row.status = JobStatus::Complete;
        row.result = Some(result);
        row.updated_at = Utc::now();
        self.jobs.put_job(row.clone()).await?;
        emitter.job_completed(job_confidence);
        Ok(row)
    }

    /// `running → complete` for management: merge outputs into the record's
    /// `management_data` and append one history entry.
    pub async fn complete_management(
        &self,
        mut row: JobRow,
        result: JobResult,
        command: &str,
        job_confidence: f64,
        emitter: &StatusEmitter,
    ) -> Result<JobRow, OrchestrationError> {
        if !self.first_application(&row.job_id, "complete") {
            return Ok(row);
        }

        if let Some(record_id) = &row.record_id {
            let outputs =
                encode_for_store(&serde_json::Value::Object(result.merged_output.clone()))?;
            let history_entry = json!({
                "job_id": row.job_id,
                "command": command,
                "outputs": outputs,
                "timestamp": Utc::now().to_rfc3339(),
            });
            let partial = json!({
                RecordFields::MANAGEMENT_DATA: {
                    RecordFields::HISTORY: [history_entry],
                },
                RecordFields::UPDATED_AT: Utc::now().to_rfc3339(),
            });
            self.records
                .merge_record(&row.tenant_id, record_id, partial)
                .await?;
        }

        row.status = JobStatus::Complete;
        row.result = Some(result);
        row.updated_at = Utc::now();
        self.jobs.put_job(row.clone()).await?;
        emitter.job_completed(job_confidence);
        Ok(row)
    }

    /// Any state → `failed`: persist the taxonomy value and a terse
    /// user-safe message, keep partial agent results for observability,
    /// publish `job_failed`.
    pub async fn fail(
        &self,
        mut row: JobRow,
        error: &OrchestrationError,
        per_agent: Vec<weaver_types::AgentExecutionResult>,
        emitter: &StatusEmitter,
    ) -> JobRow {
        if !self.first_application(&row.job_id, "failed") {
            return row;
        }

        row.status = JobStatus::Failed;
        row.result = Some(JobResult {
            job_id: row.job_id.clone(),
            status: JobStatus::Failed,
            merged_output: JobResult::merge_outputs(&per_agent),
            per_agent,
            needs_review: false,
            low_confidence: false,
            clarification_needed: false,
            clarification_fields: Vec::new(),
            references: Vec::new(),
            summary: None,
            error: Some(error.user_message()),
        });
        row.updated_at = Utc::now();

        if row.job_type == JobType::Ingest {
            if let Some(record_id) = &row.record_id {
                let partial = json!({
                    RecordFields::STATUS: record_status::FAILED,
                    RecordFields::UPDATED_AT: Utc::now().to_rfc3339(),
                });
                if let Err(e) = self
                    .records
                    .merge_record(&row.tenant_id, record_id, partial)
                    .await
                {
                    warn!(job_id = %row.job_id, error = %e, "failed to mark record failed");
                }
            }
        }

        match self.jobs.put_job(row.clone()).await {
            Ok(()) => emitter.job_failed(error.kind(), &error.user_message()),
            Err(e) => {
                // Emitting without the persisted transition would invert the
                // ordering guarantee; clients reconcile by polling.
                error!(job_id = %row.job_id, error = %e, "failed to persist job failure");
            }
        }
        debug!(job_id = %row.job_id, kind = error.kind(), "job failed");
        row
    }

    /// Spawn the supervisor task sweeping `running` jobs past their
    /// deadline to `failed` with reason `timeout`.
    pub fn spawn_supervisor(
        self: &Arc<Self>,
        bus: Arc<dyn StatusPublisher>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = manager.sweep_stalled(&bus).await {
                    warn!(error = %e, "supervisor sweep failed");
                }
            }
        })
    }

    /// One supervisor pass. Public so tests can drive it directly.
    pub async fn sweep_stalled(
        &self,
        bus: &Arc<dyn StatusPublisher>,
    ) -> Result<usize, OrchestrationError> {
        let now = Utc::now();
        let mut swept = 0;
        for row in self.jobs.running_jobs().await? {
            if row.deadline_at >= now {
                continue;
            }
            warn!(job_id = %row.job_id, "sweeping job stuck past its deadline");
            let emitter = StatusEmitter::for_job(
                bus.clone(),
                &row.job_id,
                &row.tenant_id,
                &row.user_id,
                row.session_id.clone(),
            );
            self.fail(row, &OrchestrationError::Timeout, Vec::new(), &emitter)
                .await;
            swept += 1;
        }
        Ok(swept)
    }

    /// Whether this is the first application of `(job_id, transition)`.
    fn first_application(&self, job_id: &str, transition: &str) -> bool {
        self.applied
            .insert((job_id.to_string(), transition.to_string()), ())
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weaver_bus_core::InMemoryStatusBus;
    use weaver_store_memory::{MemoryJobStore, MemoryRecordStore};
    use weaver_types::{EventType, JobInput};

    fn envelope(job_id: &str) -> JobEnvelope {
        JobEnvelope {
            job_id: job_id.into(),
            tenant_id: "acme".into(),
            user_id: "user-1".into(),
            job_type: JobType::Ingest,
            domain_id: "d1".into(),
            session_id: None,
            deadline_epoch_ms: None,
            input: JobInput {
                text: Some("Pothole on Main Street".into()),
                ..Default::default()
            },
        }
    }

    fn empty_result(job_id: &str, status: JobStatus) -> JobResult {
        JobResult {
            job_id: job_id.into(),
            status,
            per_agent: Vec::new(),
            merged_output: serde_json::Map::new(),
            needs_review: false,
            low_confidence: false,
            clarification_needed: false,
            clarification_fields: Vec::new(),
            references: Vec::new(),
            summary: None,
            error: None,
        }
    }

    struct Harness {
        manager: Arc<JobLifecycleManager>,
        records: Arc<MemoryRecordStore>,
        jobs: Arc<MemoryJobStore>,
        bus: Arc<InMemoryStatusBus>,
    }

    fn harness() -> Harness {
        let records = Arc::new(MemoryRecordStore::new());
        let jobs = Arc::new(MemoryJobStore::new());
        let bus = Arc::new(InMemoryStatusBus::new(64));
        let manager = Arc::new(JobLifecycleManager::new(jobs.clone(), records.clone()));
        Harness {
            manager,
            records,
            jobs,
            bus,
        }
    }

    #[tokio::test]
    async fn mark_running_creates_record_then_emits() {
        let h = harness();
        let mut rx = h.bus.subscribe();
        let env = envelope("job-1");
        let emitter = StatusEmitter::new(h.bus.clone(), &env);

        let row = h
            .manager
            .mark_running(&env, Utc::now() + chrono::Duration::minutes(10), &emitter)
            .await
            .unwrap();
        assert_eq!(row.status, JobStatus::Running);
        let record_id = row.record_id.clone().unwrap();

        let record = h
            .records
            .get_record("acme", &record_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["status"], "processing");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::JobStarted);
    }

    #[tokio::test]
    async fn complete_ingest_merges_and_emits_once() {
        let h = harness();
        let env = envelope("job-1");
        let emitter = StatusEmitter::new(h.bus.clone(), &env);
        let row = h
            .manager
            .mark_running(&env, Utc::now() + chrono::Duration::minutes(10), &emitter)
            .await
            .unwrap();
        let record_id = row.record_id.clone().unwrap();

        let mut result = empty_result("job-1", JobStatus::Complete);
        result.merged_output.insert(
            "geo".into(),
            serde_json::json!({"location": "Main Street", "confidence": 0.9}),
        );

        let mut rx = h.bus.subscribe();
        h.manager
            .complete_ingest(row.clone(), result.clone(), 0.9, &emitter)
            .await
            .unwrap();
        // Idempotent: a second application neither rewrites nor re-emits.
        h.manager
            .complete_ingest(row, result, 0.9, &emitter)
            .await
            .unwrap();

        let record = h
            .records
            .get_record("acme", &record_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["ingestion_data"]["geo"]["location"], "Main Street");
        assert_eq!(record["status"], "complete");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::JobCompleted);
        assert!(rx.try_recv().is_err());

        let stored = h.jobs.get_job("acme", "job-1").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn clarification_keeps_ingestion_data_out_of_record() {
        let h = harness();
        let env = envelope("job-1");
        let emitter = StatusEmitter::new(h.bus.clone(), &env);
        let row = h
            .manager
            .mark_running(&env, Utc::now() + chrono::Duration::minutes(10), &emitter)
            .await
            .unwrap();
        let record_id = row.record_id.clone().unwrap();

        let mut result = empty_result("job-1", JobStatus::AwaitingClarification);
        result.clarification_needed = true;
        result.clarification_fields = vec!["location".into(), "duration".into()];

        let mut rx = h.bus.subscribe();
        let row = h
            .manager
            .await_clarification(row, result, &emitter)
            .await
            .unwrap();
        assert_eq!(row.status, JobStatus::AwaitingClarification);
        assert_eq!(
            row.clarification.as_ref().unwrap().fields,
            vec!["location", "duration"]
        );

        let record = h
            .records
            .get_record("acme", &record_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["status"], "awaiting_clarification");
        assert_eq!(record["ingestion_data"], serde_json::json!({}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::ClarificationRequired);
    }

    #[tokio::test]
    async fn management_appends_history() {
        let h = harness();
        let record_id = h
            .records
            .create_record(
                "acme",
                document::new_record(
                    "acme",
                    "d1",
                    &serde_json::json!({"text": "original"}),
                    record_status::COMPLETE,
                    Utc::now(),
                ),
            )
            .await
            .unwrap();

        let mut env = envelope("job-2");
        env.job_type = JobType::Management;
        env.input = JobInput {
            text: Some("mark as resolved".into()),
            record_id: Some(record_id.clone()),
            ..Default::default()
        };
        let emitter = StatusEmitter::new(h.bus.clone(), &env);
        let row = h
            .manager
            .mark_running(&env, Utc::now() + chrono::Duration::minutes(10), &emitter)
            .await
            .unwrap();

        let mut result = empty_result("job-2", JobStatus::Complete);
        result
            .merged_output
            .insert("resolver".into(), serde_json::json!({"resolution": "fixed"}));
        h.manager
            .complete_management(row, result, "mark as resolved", 0.95, &emitter)
            .await
            .unwrap();

        let record = h
            .records
            .get_record("acme", &record_id)
            .await
            .unwrap()
            .unwrap();
        let history = record["management_data"]["history"].as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["command"], "mark as resolved");
        assert_eq!(history[0]["outputs"]["resolver"]["resolution"], "fixed");
    }

    #[tokio::test]
    async fn failure_is_terse_and_idempotent() {
        let h = harness();
        let env = envelope("job-1");
        let emitter = StatusEmitter::new(h.bus.clone(), &env);
        let row = h
            .manager
            .mark_running(&env, Utc::now() + chrono::Duration::minutes(10), &emitter)
            .await
            .unwrap();

        let mut rx = h.bus.subscribe();
        let error = OrchestrationError::StoreUnavailable("pool exhausted at 10.2.3.4".into());
        h.manager.fail(row.clone(), &error, Vec::new(), &emitter).await;
        h.manager.fail(row, &error, Vec::new(), &emitter).await;

        let stored = h.jobs.get_job("acme", "job-1").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        let message = stored.result.unwrap().error.unwrap();
        assert!(!message.contains("10.2.3.4"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::JobFailed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sweep_fails_jobs_past_deadline() {
        let h = harness();
        let env = envelope("job-1");
        let emitter = StatusEmitter::new(h.bus.clone(), &env);
        h.manager
            .mark_running(&env, Utc::now() - chrono::Duration::seconds(1), &emitter)
            .await
            .unwrap();

        let bus: Arc<dyn StatusPublisher> = h.bus.clone();
        let swept = h.manager.sweep_stalled(&bus).await.unwrap();
        assert_eq!(swept, 1);

        let stored = h.jobs.get_job("acme", "job-1").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);

        // Fresh rows inside their deadline are left alone.
        let env2 = envelope("job-2");
        let emitter2 = StatusEmitter::new(h.bus.clone(), &env2);
        h.manager
            .mark_running(&env2, Utc::now() + chrono::Duration::minutes(10), &emitter2)
            .await
            .unwrap();
        assert_eq!(h.manager.sweep_stalled(&bus).await.unwrap(), 0);
    }
}
