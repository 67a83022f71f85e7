//! Single-agent execution.
//!
//! The invoker turns one agent definition plus an input bundle into an
//! [`AgentExecutionResult`], whatever happens: prompt assembly, the primary
//! tool call through the broker (with retries), the parse ladder over the
//! response, and schema validation of the parsed output.
//!
//! Prompt assembly is deterministic: object keys in serialised maps are
//! sorted lexicographically, so a prompt can be replayed byte-for-byte from
//! the same inputs.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Number, Value};
use tracing::{debug, instrument, warn};

use weaver_tools::{ToolBroker, ToolContext, ToolError, ToolRequest};
use weaver_types::{
    AgentDefinition, AgentExecutionResult, AgentRunStatus, FieldType, CONFIDENCE_KEY,
};

use crate::retry::RetryPolicy;

/// The input handed to every node: the job input plus the outputs of the
/// node's parents (a `null` entry marks a failed parent).
#[derive(Debug, Clone)]
pub struct InputBundle {
    /// Job-level input object (text/question/command plus context).
    pub job_input: Value,
    /// Parent outputs keyed by agent id.
    pub parent_outputs: Map<String, Value>,
}

impl InputBundle {
    /// A bundle with no parent outputs (root nodes).
    pub fn root(job_input: Value) -> Self {
        Self {
            job_input,
            parent_outputs: Map::new(),
        }
    }

    /// The primary free-text payload of the job input, when present.
    pub fn primary_text(&self) -> Option<&str> {
        for key in ["text", "question", "command"] {
            if let Some(text) = self.job_input.get(key).and_then(Value::as_str) {
                return Some(text);
            }
        }
        None
    }
}

/// Executes single agents through the tool broker.
pub struct AgentInvoker {
    broker: Arc<ToolBroker>,
    retry: RetryPolicy,
}

impl AgentInvoker {
    /// New invoker over a broker with the given retry policy.
    pub fn new(broker: Arc<ToolBroker>, retry: RetryPolicy) -> Self {
        Self { broker, retry }
    }

    /// Execute one agent. Never panics and never escalates: every outcome,
    /// including tool exhaustion and unparseable output, is folded into the
    /// returned result.
    #[instrument(skip(self, agent, bundle, ctx), fields(job_id = %ctx.job_id, agent_id = %agent.agent_id))]
    pub async fn execute(
        &self,
        agent: &AgentDefinition,
        bundle: &InputBundle,
        ctx: &ToolContext,
    ) -> AgentExecutionResult {
        let started_at = Utc::now();

        let Some(primary_tool) = agent.primary_tool() else {
            return AgentExecutionResult::failed(
                &agent.agent_id,
                started_at,
                0,
                "agent declares no tools",
            );
        };

        let prompt = assemble_prompt(agent, bundle);
        let mut request = ToolRequest::text(prompt);
        if let Some(text) = bundle.primary_text() {
            request = request.with_param("text", Value::String(text.to_string()));
        }

        let (outcome, attempts) = self
            .retry
            .run(&ctx.cancellation, |_| {
                self.broker.invoke(primary_tool, &request, ctx)
            })
            .await;

        match outcome {
            Ok(response) => {
                let default_confidence = self.broker.default_confidence(primary_tool);
                match parse_response(&response.output) {
                    Some(parsed) => {
                        let (output, confidence) =
                            conform_output(agent, parsed, default_confidence);
                        debug!(confidence, attempts, "agent completed");
                        AgentExecutionResult {
                            agent_id: agent.agent_id.clone(),
                            status: AgentRunStatus::Completed,
                            output,
                            confidence: Some(confidence),
                            started_at,
                            ended_at: Utc::now(),
                            attempts,
                            error: None,
                        }
                    }
                    None => {
                        warn!(attempts, "agent output unparseable");
                        AgentExecutionResult {
                            agent_id: agent.agent_id.clone(),
                            status: AgentRunStatus::ParseFailed,
                            output: Map::new(),
                            confidence: Some(0.0),
                            started_at,
                            ended_at: Utc::now(),
                            attempts,
                            error: Some("output could not be parsed".to_string()),
                        }
                    }
                }
            }
            Err(ToolError::Cancelled) => AgentExecutionResult {
                agent_id: agent.agent_id.clone(),
                status: AgentRunStatus::Cancelled,
                output: Map::new(),
                confidence: None,
                started_at,
                ended_at: Utc::now(),
                attempts,
                error: None,
            },
            Err(e) => {
                warn!(attempts, error = %e, "agent tool call failed");
                AgentExecutionResult::failed(&agent.agent_id, started_at, attempts, e.to_string())
            }
        }
    }
}

//─────────────────────────────
//  Prompt assembly
//─────────────────────────────

/// Build the deterministic prompt for one invocation.
pub fn assemble_prompt(agent: &AgentDefinition, bundle: &InputBundle) -> String {
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(agent.system_prompt.trim());

    prompt.push_str("\n\n## Job input\n");
    prompt.push_str(&canonical_json(&bundle.job_input));

    prompt.push_str("\n\n## Outputs from earlier agents\n");
    if bundle.parent_outputs.is_empty() {
        prompt.push_str("(none)");
    } else {
        prompt.push_str(&canonical_json(&Value::Object(bundle.parent_outputs.clone())));
    }

    prompt.push_str("\n\n## Required output\n");
    prompt.push_str("Respond with a single JSON object containing exactly these keys:\n");
    for (key, field_type) in &agent.output_schema {
        prompt.push_str(&format!("- \"{key}\": {}\n", type_name(field_type)));
    }
    prompt.push_str(&format!(
        "\"{CONFIDENCE_KEY}\" must be a number between 0 and 1 reflecting your certainty.\n\
         Do not include any text outside the JSON object.\n"
    ));
    prompt
}

/// Serialise with lexicographically sorted object keys. `serde_json`'s map
/// is ordered, which makes this stable by construction.
fn canonical_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

fn type_name(field_type: &FieldType) -> &'static str {
    match field_type {
        FieldType::String => "string",
        FieldType::Number => "number",
        FieldType::Boolean => "boolean",
        FieldType::Array => "array",
        FieldType::Object => "object",
    }
}

//─────────────────────────────
//  Response parsing and validation
//─────────────────────────────

/// The robustness ladder over a tool response: structured outputs pass
/// through; text outputs get a strict JSON parse, then a parse of the
/// longest `{…}` substring; anything else is unusable.
pub fn parse_response(output: &Value) -> Option<Map<String, Value>> {
    match output {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) => parse_object(text).or_else(|| {
            let start = text.find('{')?;
            let end = text.rfind('}')?;
            (end > start).then(|| parse_object(&text[start..=end])).flatten()
        }),
        _ => None,
    }
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.as_object().cloned())
}

/// Conform a parsed output to the agent's schema: unknown keys are dropped,
/// missing keys get type-appropriate zero values, numbers received as
/// strings are coerced where safe, and confidence is clamped to `[0, 1]`
/// (defaulting to the tool's value when absent).
fn conform_output(
    agent: &AgentDefinition,
    parsed: Map<String, Value>,
    default_confidence: f64,
) -> (Map<String, Value>, f64) {
    let confidence = parsed
        .get(CONFIDENCE_KEY)
        .and_then(coerce_number)
        .unwrap_or(default_confidence)
        .clamp(0.0, 1.0);

    let mut output = Map::with_capacity(agent.output_schema.len());
    for (key, field_type) in &agent.output_schema {
        if key == CONFIDENCE_KEY {
            let number = Number::from_f64(confidence).unwrap_or_else(|| Number::from(0));
            output.insert(key.clone(), Value::Number(number));
            continue;
        }
        let value = match parsed.get(key) {
            Some(value) => coerce_value(value, field_type),
            None => field_type.zero_value(),
        };
        output.insert(key.clone(), value);
    }
    (output, confidence)
}

fn coerce_value(value: &Value, field_type: &FieldType) -> Value {
    if field_type.matches(value) {
        return value.clone();
    }
    match field_type {
        FieldType::Number => coerce_number(value)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        _ => value.clone(),
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
