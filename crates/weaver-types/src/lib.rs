#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **weaver-types** – Shared primitive data structures for Weaver.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that *every* other crate can depend on it without causing cycles.
//! It intentionally makes no assumptions about I/O, LLM providers, or storage.
//!
//! Everything a job touches is defined here: tenants, agent definitions,
//! domain configurations with their playbook graphs, job envelopes, per-agent
//! execution results, job results, and the status events the engine streams
//! while a job runs.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod envelope;
pub mod event;
pub mod graph;
pub mod result;

pub use envelope::{JobEnvelope, JobInput};
pub use event::{EventType, StatusEvent};
pub use graph::ExecutionGraph;
pub use result::{AgentExecutionResult, AgentRunStatus, JobResult};

//─────────────────────────────
//  Reserved identifiers and size constants
//─────────────────────────────

/// Reserved tenant holding built-in agents and domains, visible read-only to
/// every tenant. Lookups fall back to this tenant when a tenant-scoped row is
/// absent.
pub const SYSTEM_TENANT: &str = "system";

/// Output-schema key every agent must declare; carries a number in `[0, 1]`.
pub const CONFIDENCE_KEY: &str = "confidence";

/// Maximum allowed size for an agent system prompt.
pub const MAX_SYSTEM_PROMPT_LEN: usize = 2048;

/// Maximum number of keys in an agent output schema.
pub const MAX_OUTPUT_SCHEMA_KEYS: usize = 5;

/// Maximum allowed size for free-form job input text.
pub const MAX_INPUT_TEXT_LEN: usize = 65_536;

//─────────────────────────────
//  Job and agent classification
//─────────────────────────────

/// The kind of work a job envelope requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Turn free-form input into a structured record.
    Ingest,
    /// Answer a natural-language question against existing records.
    Query,
    /// Apply a natural-language command to an existing record.
    Management,
}

impl JobType {
    /// The agent class that may run inside this job's playbook.
    pub fn agent_class(&self) -> AgentClass {
        match self {
            JobType::Ingest => AgentClass::Ingestion,
            JobType::Query => AgentClass::Query,
            JobType::Management => AgentClass::Management,
        }
    }

    /// Wire name of the job type.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Ingest => "ingest",
            JobType::Query => "query",
            JobType::Management => "management",
        }
    }
}

/// Classification of an agent definition; mirrors [`JobType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentClass {
    /// Extracts structure from free-form ingest input.
    Ingestion,
    /// Answers questions against loaded records.
    Query,
    /// Interprets management commands over a record.
    Management,
}

//─────────────────────────────
//  Output schema field types
//─────────────────────────────

/// Declared type of an output-schema key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 text.
    String,
    /// Floating-point number.
    Number,
    /// Boolean flag.
    Boolean,
    /// JSON array.
    Array,
    /// Nested JSON object.
    Object,
}

impl FieldType {
    /// The type-appropriate zero value substituted for a missing key.
    pub fn zero_value(&self) -> Value {
        match self {
            FieldType::String => Value::String(String::new()),
            FieldType::Number => Value::from(0),
            FieldType::Boolean => Value::Bool(false),
            FieldType::Array => Value::Array(Vec::new()),
            FieldType::Object => Value::Object(serde_json::Map::new()),
        }
    }

    /// Whether `value` already conforms to this declared type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }
}

/// Ordered output schema: key → declared type.
pub type OutputSchema = IndexMap<String, FieldType>;

//─────────────────────────────
//  Agent definition
//─────────────────────────────

/// A specialised, prompt-driven operation. Agents differ in prompts, output
/// schemas, and tools — these are *data*, not subclasses; the invoker is a
/// single function over this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Opaque agent identifier, unique per tenant.
    pub agent_id: String,
    /// Owning tenant (`"system"` for built-ins).
    pub tenant_id: String,
    /// Human-readable name.
    pub agent_name: String,
    /// Which playbook column this agent may appear in.
    pub agent_class: AgentClass,
    /// System prompt prepended to every invocation (≤ 2 KB).
    pub system_prompt: String,
    /// Ordered set of tool names this agent may call; the first entry is the
    /// primary tool used by the invoker.
    pub tools: Vec<String>,
    /// Declared output keys and their types (≤ 5 keys, must contain
    /// [`CONFIDENCE_KEY`]).
    pub output_schema: OutputSchema,
    /// Monotonically increasing per `(tenant_id, agent_id)`.
    pub version: u64,
    /// Built-in agents are immutable.
    #[serde(default)]
    pub is_builtin: bool,
    /// When true, this agent's failure aborts the entire job.
    #[serde(default)]
    pub strict: bool,
    /// Non-negative weight used by the confidence aggregator.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl AgentDefinition {
    /// Validate an agent definition against the size and schema invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.agent_id.trim().is_empty() {
            return Err("agent_id cannot be empty".to_string());
        }
        if self.system_prompt.len() > MAX_SYSTEM_PROMPT_LEN {
            return Err(format!(
                "system prompt too long: {} > {}",
                self.system_prompt.len(),
                MAX_SYSTEM_PROMPT_LEN
            ));
        }
        if self.tools.is_empty() {
            return Err(format!("agent '{}' declares no tools", self.agent_id));
        }
        if self.output_schema.len() > MAX_OUTPUT_SCHEMA_KEYS {
            return Err(format!(
                "output schema too large: {} > {} keys",
                self.output_schema.len(),
                MAX_OUTPUT_SCHEMA_KEYS
            ));
        }
        match self.output_schema.get(CONFIDENCE_KEY) {
            Some(FieldType::Number) => {}
            Some(_) => {
                return Err(format!(
                    "output schema key '{CONFIDENCE_KEY}' must be a number"
                ))
            }
            None => {
                return Err(format!(
                    "output schema must declare a '{CONFIDENCE_KEY}' key"
                ))
            }
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(format!(
                "agent '{}' weight must be a non-negative finite number",
                self.agent_id
            ));
        }
        Ok(())
    }

    /// Name of the primary tool, by convention the first entry of `tools`.
    pub fn primary_tool(&self) -> Option<&str> {
        self.tools.first().map(String::as_str)
    }
}

//─────────────────────────────
//  Domain configuration
//─────────────────────────────

/// A business configuration bundling the three playbooks plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Opaque domain identifier, unique per tenant.
    pub domain_id: String,
    /// Owning tenant (`"system"` for built-ins).
    pub tenant_id: String,
    /// Human-readable name.
    pub domain_name: String,
    /// Playbook executed for `ingest` jobs.
    pub ingestion: ExecutionGraph,
    /// Playbook executed for `query` jobs.
    pub query: ExecutionGraph,
    /// Playbook executed for `management` jobs.
    pub management: ExecutionGraph,
}

impl DomainConfig {
    /// Select the playbook column for a job type.
    pub fn playbook(&self, job_type: JobType) -> &ExecutionGraph {
        match job_type {
            JobType::Ingest => &self.ingestion,
            JobType::Query => &self.query,
            JobType::Management => &self.management,
        }
    }

    /// Validate all three playbook graphs.
    pub fn validate(&self) -> Result<(), String> {
        if self.domain_id.trim().is_empty() {
            return Err("domain_id cannot be empty".to_string());
        }
        for (name, graph) in [
            ("ingestion", &self.ingestion),
            ("query", &self.query),
            ("management", &self.management),
        ] {
            graph
                .validate()
                .map_err(|e| format!("{name} playbook of domain '{}': {e}", self.domain_id))?;
        }
        Ok(())
    }
}

//─────────────────────────────
//  Job lifecycle states
//─────────────────────────────

/// State of a job in the lifecycle machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Envelope accepted, nothing started yet.
    Queued,
    /// First agent has started.
    Running,
    /// Ingest confidence fell below the clarify threshold; waiting on one
    /// follow-up envelope.
    AwaitingClarification,
    /// Terminal success.
    Complete,
    /// Terminal failure.
    Failed,
    /// Terminal: job deadline elapsed before completion.
    Cancelled,
}

impl JobStatus {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the lifecycle machine admits `next` from this state.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Running, Complete)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, AwaitingClarification)
                | (AwaitingClarification, Running)
                | (AwaitingClarification, Failed)
        )
    }

    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::AwaitingClarification => "awaiting_clarification",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

//─────────────────────────────
//  Clarification bundle
//─────────────────────────────

/// Persisted on a job entering `awaiting_clarification`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClarificationBundle {
    /// User-facing questions, one per uncertain field.
    pub questions: Vec<String>,
    /// Output-schema keys whose per-agent confidence fell below the clarify
    /// threshold.
    pub fields: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(keys: &[(&str, FieldType)]) -> OutputSchema {
        keys.iter().map(|(k, t)| (k.to_string(), *t)).collect()
    }

    fn agent(id: &str) -> AgentDefinition {
        AgentDefinition {
            agent_id: id.to_string(),
            tenant_id: SYSTEM_TENANT.to_string(),
            agent_name: id.to_string(),
            agent_class: AgentClass::Ingestion,
            system_prompt: "Extract structure.".to_string(),
            tools: vec!["llm".to_string()],
            output_schema: schema(&[
                ("label", FieldType::String),
                ("confidence", FieldType::Number),
            ]),
            version: 1,
            is_builtin: true,
            strict: false,
            weight: 1.0,
        }
    }

    #[test]
    fn agent_definition_valid() {
        assert!(agent("geo").validate().is_ok());
    }

    #[test]
    fn agent_definition_requires_confidence_key() {
        let mut def = agent("geo");
        def.output_schema = schema(&[("label", FieldType::String)]);
        assert!(def.validate().is_err());
    }

    #[test]
    fn agent_definition_rejects_oversized_schema() {
        let mut def = agent("geo");
        def.output_schema = schema(&[
            ("a", FieldType::String),
            ("b", FieldType::String),
            ("c", FieldType::String),
            ("d", FieldType::String),
            ("e", FieldType::String),
            ("confidence", FieldType::Number),
        ]);
        assert!(def.validate().is_err());
    }

    #[test]
    fn agent_definition_rejects_long_prompt() {
        let mut def = agent("geo");
        def.system_prompt = "x".repeat(MAX_SYSTEM_PROMPT_LEN + 1);
        assert!(def.validate().is_err());
    }

    #[test]
    fn agent_definition_rejects_negative_weight() {
        let mut def = agent("geo");
        def.weight = -0.5;
        assert!(def.validate().is_err());
    }

    #[test]
    fn job_status_transitions() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::AwaitingClarification));
        assert!(JobStatus::AwaitingClarification.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Complete.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Complete));
    }

    #[test]
    fn field_type_zero_values() {
        assert_eq!(FieldType::String.zero_value(), Value::String(String::new()));
        assert_eq!(FieldType::Number.zero_value(), Value::from(0));
        assert!(FieldType::Array.zero_value().is_array());
        assert!(FieldType::Object.zero_value().is_object());
    }

    #[test]
    fn job_type_agent_class_mapping() {
        assert_eq!(JobType::Ingest.agent_class(), AgentClass::Ingestion);
        assert_eq!(JobType::Query.agent_class(), AgentClass::Query);
        assert_eq!(JobType::Management.agent_class(), AgentClass::Management);
    }
}
