//! Job-level confidence aggregation and disposition.
//!
//! Per-agent confidence feeds a weighted mean (weights come from agent
//! definitions, default 1). The mean decides the job disposition against
//! two thresholds; ties break in favour of completion. Clarification is an
//! ingest-only loop, and only for fields the user can actually clarify:
//! agents that *completed* below the clarify threshold nominate their
//! schema keys. A playbook whose low score comes purely from tool failures
//! completes hedged instead — re-asking the user cannot fix a broken tool.

use tracing::debug;

use weaver_types::{AgentExecutionResult, AgentRunStatus, JobType, CONFIDENCE_KEY};

use crate::config::ConfidenceThresholds;
use crate::loader::ResolvedPlaybook;

/// The aggregator's verdict on a finished playbook run.
#[derive(Debug, Clone, PartialEq)]
pub enum JobDisposition {
    /// The job completes.
    Complete {
        /// Confidence landed in the review band.
        needs_review: bool,
        /// Read-path answer should be hedged.
        low_confidence: bool,
    },
    /// The job parks awaiting one clarification follow-up.
    AwaitClarification {
        /// Schema keys the follow-up should ask about.
        fields: Vec<String>,
    },
}

/// Combines per-agent results into a job disposition.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceAggregator {
    thresholds: ConfidenceThresholds,
}

impl ConfidenceAggregator {
    /// New aggregator with the given thresholds.
    pub fn new(thresholds: ConfidenceThresholds) -> Self {
        Self { thresholds }
    }

    /// Weighted mean of per-agent confidence. Failed and cancelled agents
    /// contribute zero at their declared weight; an all-zero weight sum
    /// yields zero.
    pub fn job_confidence(
        &self,
        playbook: &ResolvedPlaybook,
        results: &[AgentExecutionResult],
    ) -> f64 {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for result in results {
            let weight = playbook.weight_of(&result.agent_id);
            weighted_sum += weight * result.effective_confidence();
            weight_total += weight;
        }
        if weight_total <= 0.0 {
            return 0.0;
        }
        weighted_sum / weight_total
    }

    /// Decide the disposition for a finished run.
    pub fn evaluate(
        &self,
        job_type: JobType,
        playbook: &ResolvedPlaybook,
        results: &[AgentExecutionResult],
    ) -> (f64, JobDisposition) {
        let confidence = self.job_confidence(playbook, results);

        let disposition = if confidence >= self.thresholds.complete {
            JobDisposition::Complete {
                needs_review: false,
                low_confidence: false,
            }
        } else if confidence >= self.thresholds.clarify {
            JobDisposition::Complete {
                needs_review: true,
                low_confidence: false,
            }
        } else if job_type == JobType::Ingest {
            let fields = self.clarification_fields(playbook, results);
            if fields.is_empty() {
                JobDisposition::Complete {
                    needs_review: false,
                    low_confidence: true,
                }
            } else {
                JobDisposition::AwaitClarification { fields }
            }
        } else {
            JobDisposition::Complete {
                needs_review: false,
                low_confidence: true,
            }
        };

        debug!(confidence, ?disposition, "aggregated job confidence");
        (confidence, disposition)
    }

    /// Union of schema keys (minus `confidence`) across agents that
    /// completed below the clarify threshold, in playbook order.
    fn clarification_fields(
        &self,
        playbook: &ResolvedPlaybook,
        results: &[AgentExecutionResult],
    ) -> Vec<String> {
        let mut fields = Vec::new();
        for result in results {
            if result.status != AgentRunStatus::Completed
                || result.effective_confidence() >= self.thresholds.clarify
            {
                continue;
            }
            if let Some(agent) = playbook.agents.get(&result.agent_id) {
                for key in agent.output_schema.keys() {
                    if key != CONFIDENCE_KEY && !fields.contains(key) {
                        fields.push(key.clone());
                    }
                }
            }
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;
    use weaver_types::{AgentClass, AgentDefinition, ExecutionGraph, FieldType};

    fn agent(id: &str, weight: f64, keys: &[&str]) -> AgentDefinition {
        let mut schema: Vec<(String, FieldType)> = keys
            .iter()
            .map(|k| (k.to_string(), FieldType::String))
            .collect();
        schema.push((CONFIDENCE_KEY.to_string(), FieldType::Number));
        AgentDefinition {
            agent_id: id.to_string(),
            tenant_id: "system".to_string(),
            agent_name: id.to_string(),
            agent_class: AgentClass::Ingestion,
            system_prompt: String::new(),
            tools: vec!["llm".to_string()],
            output_schema: schema.into_iter().collect(),
            version: 1,
            is_builtin: true,
            strict: false,
            weight,
        }
    }

    fn completed(id: &str, confidence: f64) -> AgentExecutionResult {
        let now = Utc::now();
        AgentExecutionResult {
            agent_id: id.to_string(),
            status: AgentRunStatus::Completed,
            output: Map::new(),
            confidence: Some(confidence),
            started_at: now,
            ended_at: now,
            attempts: 1,
            error: None,
        }
    }

    fn playbook(agents: Vec<AgentDefinition>) -> ResolvedPlaybook {
        let nodes: Vec<String> = agents.iter().map(|a| a.agent_id.clone()).collect();
        ResolvedPlaybook {
            graph: ExecutionGraph::flat(nodes),
            agents: agents
                .into_iter()
                .map(|a| (a.agent_id.clone(), a))
                .collect(),
        }
    }

    fn aggregator() -> ConfidenceAggregator {
        ConfidenceAggregator::new(ConfidenceThresholds::default())
    }

    #[test]
    fn high_confidence_completes_clean() {
        let playbook = playbook(vec![agent("a", 1.0, &["x"]), agent("b", 1.0, &["y"])]);
        let results = vec![completed("a", 0.95), completed("b", 0.9)];
        let (confidence, disposition) =
            aggregator().evaluate(JobType::Ingest, &playbook, &results);
        assert!(confidence >= 0.9);
        assert_eq!(
            disposition,
            JobDisposition::Complete {
                needs_review: false,
                low_confidence: false
            }
        );
    }

    #[test]
    fn threshold_boundary_ties_favour_completion() {
        let playbook = playbook(vec![agent("a", 1.0, &["x"])]);
        let results = vec![completed("a", 0.9)];
        let (_, disposition) = aggregator().evaluate(JobType::Ingest, &playbook, &results);
        assert_eq!(
            disposition,
            JobDisposition::Complete {
                needs_review: false,
                low_confidence: false
            }
        );

        let results = vec![completed("a", 0.6)];
        let (_, disposition) = aggregator().evaluate(JobType::Ingest, &playbook, &results);
        assert_eq!(
            disposition,
            JobDisposition::Complete {
                needs_review: true,
                low_confidence: false
            }
        );
    }

    #[test]
    fn mid_band_completes_with_review_flag() {
        let playbook = playbook(vec![agent("a", 1.0, &["x"]), agent("b", 1.0, &["y"])]);
        let results = vec![completed("a", 0.7), completed("b", 0.8)];
        let (_, disposition) = aggregator().evaluate(JobType::Ingest, &playbook, &results);
        assert_eq!(
            disposition,
            JobDisposition::Complete {
                needs_review: true,
                low_confidence: false
            }
        );
    }

    #[test]
    fn uncertain_ingest_asks_for_clarification() {
        let playbook = playbook(vec![
            agent("geo", 1.0, &["location"]),
            agent("temporal", 1.0, &["duration"]),
        ]);
        let results = vec![completed("geo", 0.4), completed("temporal", 0.5)];
        let (confidence, disposition) =
            aggregator().evaluate(JobType::Ingest, &playbook, &results);
        assert!(confidence < 0.6);
        match disposition {
            JobDisposition::AwaitClarification { fields } => {
                assert_eq!(fields, vec!["location", "duration"]);
            }
            other => panic!("expected clarification, got {other:?}"),
        }
    }

    #[test]
    fn uncertain_query_completes_hedged() {
        let playbook = playbook(vec![agent("what", 1.0, &["answer"])]);
        let results = vec![completed("what", 0.3)];
        let (_, disposition) = aggregator().evaluate(JobType::Query, &playbook, &results);
        assert_eq!(
            disposition,
            JobDisposition::Complete {
                needs_review: false,
                low_confidence: true
            }
        );
    }

    #[test]
    fn pure_tool_failure_completes_hedged_instead_of_clarifying() {
        let playbook = playbook(vec![
            agent("geo", 1.0, &["location"]),
            agent("temporal", 1.0, &["duration"]),
        ]);
        let results = vec![
            AgentExecutionResult::failed("geo", Utc::now(), 3, "tool unavailable"),
            completed("temporal", 0.8),
        ];
        let (confidence, disposition) =
            aggregator().evaluate(JobType::Ingest, &playbook, &results);
        assert!(confidence < 0.6);
        assert_eq!(
            disposition,
            JobDisposition::Complete {
                needs_review: false,
                low_confidence: true
            }
        );
    }

    #[test]
    fn weights_shift_the_mean() {
        let playbook = playbook(vec![agent("a", 3.0, &["x"]), agent("b", 1.0, &["y"])]);
        let results = vec![completed("a", 1.0), completed("b", 0.0)];
        let confidence = aggregator().job_confidence(&playbook, &results);
        assert!((confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn zero_weight_sum_yields_zero() {
        let playbook = playbook(vec![agent("a", 0.0, &["x"])]);
        let results = vec![completed("a", 1.0)];
        assert_eq!(aggregator().job_confidence(&playbook, &results), 0.0);
    }

    proptest::proptest! {
        #[test]
        fn job_confidence_stays_in_unit_interval(
            confidences in proptest::collection::vec(0.0f64..=1.0, 1..6),
            weights in proptest::collection::vec(0.0f64..10.0, 1..6),
        ) {
            let n = confidences.len().min(weights.len());
            let agents: Vec<AgentDefinition> = (0..n)
                .map(|i| agent(&format!("a{i}"), weights[i], &["x"]))
                .collect();
            let results: Vec<AgentExecutionResult> = (0..n)
                .map(|i| completed(&format!("a{i}"), confidences[i]))
                .collect();
            let playbook = playbook(agents);
            let confidence = aggregator().job_confidence(&playbook, &results);
            proptest::prop_assert!((0.0..=1.0).contains(&confidence));
        }
    }
}
