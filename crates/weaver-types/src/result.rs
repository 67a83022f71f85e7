//! Per-agent execution results and the persisted job outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ClarificationBundle, JobStatus};

/// Outcome of one agent node inside a playbook run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunStatus {
    /// Produced a usable, schema-conforming output.
    Completed,
    /// The tool call failed past retries (soft failure unless strict).
    Failed,
    /// The tool answered but its output could not be parsed.
    ParseFailed,
    /// The job was cancelled before or during this agent's run.
    Cancelled,
}

impl AgentRunStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRunStatus::Completed => "completed",
            AgentRunStatus::Failed => "failed",
            AgentRunStatus::ParseFailed => "parse_failed",
            AgentRunStatus::Cancelled => "cancelled",
        }
    }
}

/// In-memory result for one agent node; every playbook node yields exactly
/// one of these, whatever happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentExecutionResult {
    /// The playbook node this result belongs to.
    pub agent_id: String,
    /// How the run ended.
    pub status: AgentRunStatus,
    /// Schema-validated output map; empty on failure.
    pub output: Map<String, Value>,
    /// Self-assessed confidence in `[0, 1]`; `None` only for cancelled runs.
    pub confidence: Option<f64>,
    /// When the invocation began.
    pub started_at: DateTime<Utc>,
    /// When the invocation ended.
    pub ended_at: DateTime<Utc>,
    /// Attempts consumed, including the successful one.
    pub attempts: u32,
    /// Terse error description for failed/parse-failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentExecutionResult {
    /// A soft-failure result: output `null`ed, confidence zero.
    pub fn failed(
        agent_id: impl Into<String>,
        started_at: DateTime<Utc>,
        attempts: u32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: AgentRunStatus::Failed,
            output: Map::new(),
            confidence: Some(0.0),
            started_at,
            ended_at: Utc::now(),
            attempts,
            error: Some(error.into()),
        }
    }

    /// A result for a node that never ran because the job was cancelled.
    /// `started_at == ended_at` marks the sweep instant.
    pub fn cancelled(agent_id: impl Into<String>) -> Self {
        let instant = Utc::now();
        Self {
            agent_id: agent_id.into(),
            status: AgentRunStatus::Cancelled,
            output: Map::new(),
            confidence: None,
            started_at: instant,
            ended_at: instant,
            attempts: 0,
            error: None,
        }
    }

    /// Confidence used by the aggregator: the self-assessed value for
    /// completed runs, zero otherwise.
    pub fn effective_confidence(&self) -> f64 {
        match self.status {
            AgentRunStatus::Completed => self.confidence.unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Wall-clock duration of the run in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }
}

/// The persisted outcome of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Job this result belongs to.
    pub job_id: String,
    /// Terminal (or clarification) status reached.
    pub status: JobStatus,
    /// One entry per playbook node.
    pub per_agent: Vec<AgentExecutionResult>,
    /// Outputs keyed by agent id; failed agents appear as `null`.
    pub merged_output: Map<String, Value>,
    /// Completed, but a human should look at it.
    #[serde(default)]
    pub needs_review: bool,
    /// Completed read path with hedged confidence.
    #[serde(default)]
    pub low_confidence: bool,
    /// The job is parked awaiting a clarification follow-up.
    #[serde(default)]
    pub clarification_needed: bool,
    /// Schema keys the clarification round should ask about.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clarification_fields: Vec<String>,
    /// Record ids this job read or wrote.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    /// Free-text answer for query jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Terse, user-safe failure description for failed jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    /// Merge per-agent outputs into the `agent_id → output` map. Agents that
    /// did not complete contribute a `null` entry, which is how downstream
    /// consumers (and child agents) observe a soft failure.
    pub fn merge_outputs(per_agent: &[AgentExecutionResult]) -> Map<String, Value> {
        let mut merged = Map::new();
        for result in per_agent {
            let value = match result.status {
                AgentRunStatus::Completed => Value::Object(result.output.clone()),
                _ => Value::Null,
            };
            merged.insert(result.agent_id.clone(), value);
        }
        merged
    }

    /// Derive the clarification bundle persisted with an
    /// `awaiting_clarification` job.
    pub fn clarification_bundle(&self) -> ClarificationBundle {
        ClarificationBundle {
            questions: self
                .clarification_fields
                .iter()
                .map(|f| format!("Could you provide more detail about the {f}?"))
                .collect(),
            fields: self.clarification_fields.clone(),
        }
    }
}
