//! Orchestrator entry.
//!
//! The engine receives job envelopes one at a time (each job is a one-shot
//! unit of work; there is no long-running server here), validates them,
//! routes by job type, owns the job deadline, and folds every failure into
//! the error taxonomy. Redelivering a terminal `job_id` is a no-op that
//! returns the persisted result; a job awaiting clarification accepts
//! exactly one follow-up envelope.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use weaver_bus_core::StatusPublisher;
use weaver_store_core::{ConfigStore, JobRow, JobStore, RecordFields, RecordStore};
use weaver_tools::{ToolBroker, ToolContext};
use weaver_types::{
    AgentExecutionResult, AgentRunStatus, JobEnvelope, JobResult, JobStatus, JobType,
};

use crate::confidence::{ConfidenceAggregator, JobDisposition};
use crate::config::EngineConfig;
use crate::errors::OrchestrationError;
use crate::invoker::AgentInvoker;
use crate::lifecycle::JobLifecycleManager;
use crate::loader::{PlaybookLoader, ResolvedPlaybook};
use crate::publisher::StatusEmitter;
use crate::retry::RetryPolicy;
use crate::scheduler::DagScheduler;

/// Counters the engine keeps for observability hooks.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    jobs_started: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    clarifications_requested: AtomicU64,
}

/// Point-in-time snapshot of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Jobs that entered `running`.
    pub jobs_started: u64,
    /// Jobs that reached `complete`.
    pub jobs_completed: u64,
    /// Jobs that reached `failed`.
    pub jobs_failed: u64,
    /// Jobs parked for clarification.
    pub clarifications_requested: u64,
}

impl EngineMetrics {
    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            clarifications_requested: self.clarifications_requested.load(Ordering::Relaxed),
        }
    }
}

/// The orchestration engine: end-to-end owner of one job's workflow.
pub struct OrchestrationEngine {
    config: EngineConfig,
    loader: PlaybookLoader,
    scheduler: DagScheduler,
    aggregator: ConfidenceAggregator,
    lifecycle: Arc<JobLifecycleManager>,
    records: Arc<dyn RecordStore>,
    bus: Arc<dyn StatusPublisher>,
    metrics: EngineMetrics,
}

impl OrchestrationEngine {
    /// Wire an engine from its collaborators. The tool broker arrives with
    /// every provider already registered.
    pub fn new(
        config: EngineConfig,
        config_store: Arc<dyn ConfigStore>,
        records: Arc<dyn RecordStore>,
        jobs: Arc<dyn JobStore>,
        broker: Arc<ToolBroker>,
        bus: Arc<dyn StatusPublisher>,
    ) -> Self {
        let loader = PlaybookLoader::new(config_store, config.degraded_agent_stub);
        let invoker = Arc::new(AgentInvoker::new(
            broker,
            RetryPolicy::with_attempts(config.agent_retries),
        ));
        let scheduler = DagScheduler::new(invoker);
        let aggregator = ConfidenceAggregator::new(config.thresholds);
        let lifecycle = Arc::new(JobLifecycleManager::new(jobs, records.clone()));
        Self {
            config,
            loader,
            scheduler,
            aggregator,
            lifecycle,
            records,
            bus,
            metrics: EngineMetrics::default(),
        }
    }

    /// Current engine counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Spawn the supervisor task that sweeps jobs stuck in `running` past
    /// their deadline.
    pub fn spawn_supervisor(&self) -> JoinHandle<()> {
        self.lifecycle
            .spawn_supervisor(self.bus.clone(), self.config.sweep_interval)
    }

    /// Execute one job envelope end to end.
    #[instrument(skip(self, envelope), fields(job_id = %envelope.job_id, job_type = envelope.job_type.as_str()))]
    pub async fn execute(&self, envelope: JobEnvelope) -> Result<JobResult, OrchestrationError> {
        envelope
            .validate()
            .map_err(OrchestrationError::BadEnvelope)?;

        if let Some(existing) = self
            .lifecycle
            .load(&envelope.tenant_id, &envelope.job_id)
            .await?
        {
            if existing.status.is_terminal() {
                info!("redelivery of terminal job; returning persisted result");
                return Ok(existing
                    .result
                    .unwrap_or_else(|| empty_result(&existing.job_id, existing.status)));
            }
            match existing.status {
                JobStatus::AwaitingClarification => {
                    if !envelope.is_clarification_followup() {
                        return Err(OrchestrationError::BadEnvelope(
                            "job is awaiting clarification".to_string(),
                        ));
                    }
                    if existing.clarification_consumed {
                        return Err(OrchestrationError::BadEnvelope(
                            "clarification already provided".to_string(),
                        ));
                    }
                }
                _ => {
                    return Err(OrchestrationError::BadEnvelope(
                        "job is already in progress".to_string(),
                    ));
                }
            }
        } else if envelope.is_clarification_followup() {
            return Err(OrchestrationError::BadEnvelope(
                "clarification follow-up for unknown job".to_string(),
            ));
        }

        let emitter = StatusEmitter::new(self.bus.clone(), &envelope);
        let deadline_at = self.deadline_for(&envelope);
        let ctx = ToolContext::new(envelope.tenant_id.clone(), envelope.job_id.clone());

        // The watchdog turns the wall-clock deadline into cooperative
        // cancellation; in-flight tool calls observe the token.
        let token = ctx.cancellation.clone();
        let remaining = (deadline_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            token.cancel();
        });

        self.metrics.jobs_started.fetch_add(1, Ordering::Relaxed);
        let outcome = self
            .run_workflow(&envelope, deadline_at, &ctx, &emitter)
            .await;
        watchdog.abort();

        match &outcome {
            Ok(result) if result.clarification_needed => {
                self.metrics
                    .clarifications_requested
                    .fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {
                self.metrics.jobs_completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.metrics.jobs_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        outcome
    }

    async fn run_workflow(
        &self,
        envelope: &JobEnvelope,
        deadline_at: DateTime<Utc>,
        ctx: &ToolContext,
        emitter: &StatusEmitter,
    ) -> Result<JobResult, OrchestrationError> {
        let row = self
            .lifecycle
            .mark_running(envelope, deadline_at, emitter)
            .await?;

        let playbook = match self
            .loader
            .resolve(&envelope.tenant_id, &envelope.domain_id, envelope.job_type)
            .await
        {
            Ok(playbook) => playbook,
            Err(e) => return Err(self.abort(row, e, Vec::new(), emitter).await),
        };

        let (job_input, references) = match self.build_input(envelope).await {
            Ok(built) => built,
            Err(e) => return Err(self.abort(row, e, Vec::new(), emitter).await),
        };

        let run = self
            .scheduler
            .run(
                &playbook,
                &job_input,
                self.config.max_parallel_for(&envelope.tenant_id),
                ctx,
                emitter,
            )
            .await;

        if let Some(agent_id) = run.strict_failure {
            let e = OrchestrationError::AgentFailed(agent_id);
            return Err(self.abort(row, e, run.results, emitter).await);
        }
        if run.cancelled {
            return Err(self
                .abort(row, OrchestrationError::Timeout, run.results, emitter)
                .await);
        }

        let (job_confidence, disposition) =
            self.aggregator
                .evaluate(envelope.job_type, &playbook, &run.results);
        self.finish(
            envelope, row, &playbook, run.results, job_confidence, disposition, references,
            emitter,
        )
        .await
    }

    /// Persist a failure and hand the error back for surfacing.
    async fn abort(
        &self,
        row: JobRow,
        error: OrchestrationError,
        partial: Vec<AgentExecutionResult>,
        emitter: &StatusEmitter,
    ) -> OrchestrationError {
        self.lifecycle.fail(row, &error, partial, emitter).await;
        error
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        envelope: &JobEnvelope,
        row: JobRow,
        playbook: &ResolvedPlaybook,
        results: Vec<AgentExecutionResult>,
        job_confidence: f64,
        disposition: JobDisposition,
        references: Vec<String>,
        emitter: &StatusEmitter,
    ) -> Result<JobResult, OrchestrationError> {
        let merged_output = JobResult::merge_outputs(&results);
        let mut references = references;
        if let Some(record_id) = &row.record_id {
            if !references.contains(record_id) {
                references.push(record_id.clone());
            }
        }

        // A job holds exactly one clarification round. A still-uncertain
        // re-run completes flagged for review instead of parking again.
        let disposition = match disposition {
            JobDisposition::AwaitClarification { .. } if row.clarification_consumed => {
                JobDisposition::Complete {
                    needs_review: true,
                    low_confidence: true,
                }
            }
            other => other,
        };

        match disposition {
            JobDisposition::AwaitClarification { fields } => {
                let result = JobResult {
                    job_id: row.job_id.clone(),
                    status: JobStatus::AwaitingClarification,
                    per_agent: results,
                    merged_output,
                    needs_review: false,
                    low_confidence: false,
                    clarification_needed: true,
                    clarification_fields: fields,
                    references,
                    summary: None,
                    error: None,
                };
                let stored = match self
                    .lifecycle
                    .await_clarification(row.clone(), result, emitter)
                    .await
                {
                    Ok(stored) => stored,
                    Err(e) => return Err(self.abort(row, e, Vec::new(), emitter).await),
                };
                Ok(stored
                    .result
                    .unwrap_or_else(|| empty_result(&stored.job_id, stored.status)))
            }
            JobDisposition::Complete {
                needs_review,
                low_confidence,
            } => {
                let summary = (envelope.job_type == JobType::Query)
                    .then(|| derive_summary(&results, &merged_output));
                let result = JobResult {
                    job_id: row.job_id.clone(),
                    status: JobStatus::Complete,
                    per_agent: results,
                    merged_output,
                    needs_review,
                    low_confidence,
                    clarification_needed: false,
                    clarification_fields: Vec::new(),
                    references,
                    summary,
                    error: None,
                };
                let completion = match envelope.job_type {
                    JobType::Ingest => {
                        self.lifecycle
                            .complete_ingest(row.clone(), result, job_confidence, emitter)
                            .await
                    }
                    JobType::Query => {
                        self.lifecycle
                            .complete_query(row.clone(), result, job_confidence, emitter)
                            .await
                    }
                    JobType::Management => {
                        let command = envelope.input.text.clone().unwrap_or_default();
                        self.lifecycle
                            .complete_management(
                                row.clone(),
                                result,
                                &command,
                                job_confidence,
                                emitter,
                            )
                            .await
                    }
                };
                match completion {
                    Ok(stored) => Ok(stored
                        .result
                        .unwrap_or_else(|| empty_result(&stored.job_id, stored.status))),
                    Err(e) => Err(self.abort(row, e, Vec::new(), emitter).await),
                }
            }
        }
    }

    /// Materialise the job input object handed to every playbook node.
    async fn build_input(
        &self,
        envelope: &JobEnvelope,
    ) -> Result<(Value, Vec<String>), OrchestrationError> {
        match envelope.job_type {
            JobType::Ingest => {
                let mut input = json!({ "text": envelope.input.text });
                if let Some(image_refs) = &envelope.input.image_refs {
                    input["image_refs"] = json!(image_refs);
                }
                if let Some(answers) = &envelope.input.clarification_answers {
                    input["clarification_answers"] = answers.clone();
                }
                Ok((input, Vec::new()))
            }
            JobType::Query => {
                let filters = envelope
                    .input
                    .filters
                    .clone()
                    .unwrap_or(Value::Null);
                let candidates = self
                    .records
                    .query_records(
                        &envelope.tenant_id,
                        &envelope.domain_id,
                        &filters,
                        self.config.query_record_limit,
                    )
                    .await?;
                let references: Vec<String> = candidates
                    .iter()
                    .filter_map(|r| {
                        r.get(RecordFields::RECORD_ID)
                            .and_then(Value::as_str)
                            .map(String::from)
                    })
                    .collect();
                let summaries: Vec<Value> = candidates
                    .iter()
                    .map(|r| {
                        json!({
                            "record_id": r.get(RecordFields::RECORD_ID),
                            "status": r.get(RecordFields::STATUS),
                            "ingestion_data": r.get(RecordFields::INGESTION_DATA),
                        })
                    })
                    .collect();
                let input = json!({
                    "question": envelope.input.question,
                    "filters": filters,
                    "candidate_records": summaries,
                });
                Ok((input, references))
            }
            JobType::Management => {
                let record_id = envelope.input.record_id.clone().unwrap_or_default();
                let record = self
                    .records
                    .get_record(&envelope.tenant_id, &record_id)
                    .await?
                    .ok_or_else(|| {
                        OrchestrationError::BadEnvelope(format!(
                            "management target record not found: {record_id}"
                        ))
                    })?;
                let input = json!({
                    "command": envelope.input.text,
                    "record": record,
                });
                Ok((input, vec![record_id]))
            }
        }
    }

    fn deadline_for(&self, envelope: &JobEnvelope) -> DateTime<Utc> {
        let engine_deadline = Utc::now()
            + chrono::Duration::from_std(self.config.job_max_wall_clock)
                .unwrap_or_else(|_| chrono::Duration::minutes(10));
        match envelope
            .deadline_epoch_ms
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        {
            Some(requested) if requested < engine_deadline => requested,
            Some(_) => engine_deadline,
            None => engine_deadline,
        }
    }
}

/// Free-text answer for query jobs: completed agents' conventional answer
/// keys when present, the merged output otherwise.
fn derive_summary(
    results: &[AgentExecutionResult],
    merged_output: &serde_json::Map<String, Value>,
) -> String {
    let mut parts = Vec::new();
    for result in results {
        if result.status != AgentRunStatus::Completed {
            continue;
        }
        for key in ["summary", "answer", "response"] {
            if let Some(text) = result.output.get(key).and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    parts.push(text.trim().to_string());
                    break;
                }
            }
        }
    }
    if parts.is_empty() {
        serde_json::to_string(merged_output).unwrap_or_default()
    } else {
        parts.join(" ")
    }
}

fn empty_result(job_id: &str, status: JobStatus) -> JobResult {
    JobResult {
        job_id: job_id.to_string(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_prefers_answer_keys() {
        let now = Utc::now();
        let results = vec![AgentExecutionResult {
            agent_id: "what".into(),
            status: AgentRunStatus::Completed,
            output: serde_json::json!({"answer": "Two open pothole reports.", "confidence": 0.9})
                .as_object()
                .unwrap()
                .clone(),
            confidence: Some(0.9),
            started_at: now,
            ended_at: now,
            attempts: 1,
            error: None,
        }];
        let merged = JobResult::merge_outputs(&results);
        assert_eq!(derive_summary(&results, &merged), "Two open pothole reports.");
    }

    #[test]
    fn summary_falls_back_to_merged_output() {
        let now = Utc::now();
        let results = vec![AgentExecutionResult {
            agent_id: "what".into(),
            status: AgentRunStatus::Completed,
            output: serde_json::json!({"label": "pothole", "confidence": 0.9})
                .as_object()
                .unwrap()
                .clone(),
            confidence: Some(0.9),
            started_at: now,
            ended_at: now,
            attempts: 1,
            error: None,
        }];
        let merged = JobResult::merge_outputs(&results);
        let summary = derive_summary(&results, &merged);
        assert!(summary.contains("pothole"));
    }
}
