//! Job envelopes — the immutable input record the core consumes.
//!
//! The HTTP edge validates authentication and delivers envelopes here as
//! structured records; the core re-validates shape so that a malformed
//! envelope can never reach a playbook.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{JobType, MAX_INPUT_TEXT_LEN};

/// The immutable input record for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Unique job identifier; redelivery of a terminal id is a no-op.
    pub job_id: String,
    /// Tenant scope for every lookup and write this job performs.
    pub tenant_id: String,
    /// End user on whose behalf the job runs.
    pub user_id: String,
    /// Kind of work requested.
    pub job_type: JobType,
    /// Domain whose playbook will run.
    pub domain_id: String,
    /// Optional client session used for status fan-out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Optional hard deadline in epoch milliseconds; the engine cap still
    /// applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_epoch_ms: Option<i64>,
    /// Job-type-specific input payload.
    pub input: JobInput,
}

/// Input payload; which fields are required depends on the job type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    /// Free-form text: the report body (ingest) or the command (management).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Natural-language question (query).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Record-store filter predicates (query).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Value>,
    /// Target record (management, or ingest clarification follow-up).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// References to attached images (ingest).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_refs: Option<Vec<String>>,
    /// Answers to a clarification round (ingest retry).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_answers: Option<Value>,
}

impl JobEnvelope {
    /// Validate envelope shape. Violations surface as `BadEnvelope` in the
    /// engine's taxonomy; nothing malformed reaches a playbook.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("job_id", &self.job_id),
            ("tenant_id", &self.tenant_id),
            ("user_id", &self.user_id),
            ("domain_id", &self.domain_id),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{name} cannot be empty"));
            }
        }

        match self.job_type {
            JobType::Ingest => {
                let text = self
                    .input
                    .text
                    .as_deref()
                    .ok_or("ingest input requires text")?;
                if text.trim().is_empty() {
                    return Err("ingest input text cannot be empty".to_string());
                }
                if text.len() > MAX_INPUT_TEXT_LEN {
                    return Err(format!(
                        "input text too long: {} > {}",
                        text.len(),
                        MAX_INPUT_TEXT_LEN
                    ));
                }
            }
            JobType::Query => {
                let question = self
                    .input
                    .question
                    .as_deref()
                    .ok_or("query input requires a question")?;
                if question.trim().is_empty() {
                    return Err("query question cannot be empty".to_string());
                }
                if let Some(filters) = &self.input.filters {
                    if !filters.is_object() {
                        return Err("query filters must be an object".to_string());
                    }
                }
            }
            JobType::Management => {
                if self
                    .input
                    .record_id
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or("")
                    .is_empty()
                {
                    return Err("management input requires a record_id".to_string());
                }
                if self
                    .input
                    .text
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or("")
                    .is_empty()
                {
                    return Err("management input requires a command text".to_string());
                }
            }
        }
        Ok(())
    }

    /// Whether this envelope is a clarification follow-up for an earlier
    /// ingest round.
    pub fn is_clarification_followup(&self) -> bool {
        self.job_type == JobType::Ingest && self.input.clarification_answers.is_some()
    }
}
