//! Dependency-aware playbook execution.
//!
//! The scheduler walks the resolved graph Kahn-style: roots start
//! concurrently, a node becomes ready the moment *all* of its parents have
//! finished (success or failure), and no more than `max_parallel` agents
//! are in flight at any instant. Ordering across unrelated nodes is
//! nondeterministic by design.
//!
//! Failure policy: a failing agent soft-fails by default — its children
//! still run and observe a `null` entry for it. An agent declared `strict`
//! halts the run instead. Cancellation is cooperative: in-flight agents
//! finish (their tool calls observe the token), nothing new is scheduled,
//! and never-started nodes report `cancelled`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use weaver_tools::ToolContext;
use weaver_types::{AgentExecutionResult, AgentRunStatus};

use crate::invoker::{AgentInvoker, InputBundle};
use crate::loader::ResolvedPlaybook;
use crate::publisher::StatusEmitter;

/// Outcome of one playbook run: exactly one result per graph node.
#[derive(Debug)]
pub struct SchedulerRun {
    /// Results in graph declaration order.
    pub results: Vec<AgentExecutionResult>,
    /// Set when a strict agent failed and halted the run.
    pub strict_failure: Option<String>,
    /// Whether job cancellation cut the run short.
    pub cancelled: bool,
}

/// Executes resolved playbooks through the invoker.
pub struct DagScheduler {
    invoker: Arc<AgentInvoker>,
}

impl DagScheduler {
    /// New scheduler over an invoker.
    pub fn new(invoker: Arc<AgentInvoker>) -> Self {
        Self { invoker }
    }

    /// Run every node of `playbook` against `job_input`.
    ///
    /// The contract: one [`AgentExecutionResult`] per node, parents complete
    /// before children start, at most `max_parallel` in flight.
    pub async fn run(
        &self,
        playbook: &ResolvedPlaybook,
        job_input: &Value,
        max_parallel: usize,
        ctx: &ToolContext,
        emitter: &StatusEmitter,
    ) -> SchedulerRun {
        let max_parallel = max_parallel.max(1);
        let mut indegrees = playbook.graph.indegrees();
        let children = playbook.graph.children();
        let parents = playbook.graph.parents();

        let mut ready: VecDeque<String> = playbook.graph.roots().into();
        let mut outputs: HashMap<String, Value> = HashMap::new();
        let mut results: HashMap<String, AgentExecutionResult> = HashMap::new();
        let mut in_flight: JoinSet<AgentExecutionResult> = JoinSet::new();
        let mut strict_failure: Option<String> = None;
        let mut halted = false;

        loop {
            while !halted && in_flight.len() < max_parallel {
                if ctx.cancellation.is_cancelled() {
                    halted = true;
                    break;
                }
                let Some(node) = ready.pop_front() else { break };
                let Some(agent) = playbook.agents.get(&node) else {
                    // The loader materialises every node; a miss here is a
                    // scheduling bug, not a recoverable condition.
                    error!(agent_id = %node, "node absent from resolved playbook");
                    results.insert(
                        node.clone(),
                        AgentExecutionResult::failed(
                            &node,
                            chrono::Utc::now(),
                            0,
                            "agent not materialised",
                        ),
                    );
                    continue;
                };

                emitter.agent_started(&node);
                let parent_outputs = parents
                    .get(&node)
                    .into_iter()
                    .flatten()
                    .map(|p| (p.clone(), outputs.get(p).cloned().unwrap_or(Value::Null)))
                    .collect();
                let bundle = InputBundle {
                    job_input: job_input.clone(),
                    parent_outputs,
                };
                let invoker = self.invoker.clone();
                let agent = agent.clone();
                let task_ctx = ctx.clone();
                in_flight
                    .spawn(async move { invoker.execute(&agent, &bundle, &task_ctx).await });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    // The invoker is panic-free; a join error still must not
                    // wedge the run. The node's slot is filled at the end.
                    error!(error = %e, "agent task aborted");
                    continue;
                }
            };

            emitter.agent_finished(&result);
            let node = result.agent_id.clone();
            let completed = result.status == AgentRunStatus::Completed;
            outputs.insert(
                node.clone(),
                if completed {
                    Value::Object(result.output.clone())
                } else {
                    Value::Null
                },
            );

            match result.status {
                AgentRunStatus::Cancelled => halted = true,
                AgentRunStatus::Failed | AgentRunStatus::ParseFailed
                    if playbook.agents.get(&node).map(|a| a.strict).unwrap_or(false) =>
                {
                    warn!(agent_id = %node, "strict agent failed; halting playbook");
                    strict_failure = Some(node.clone());
                    halted = true;
                    ctx.cancellation.cancel();
                }
                _ => {}
            }

            for child in children.get(&node).into_iter().flatten() {
                if let Some(degree) = indegrees.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 && !halted {
                        ready.push_back(child.clone());
                    }
                }
            }
            results.insert(node, result);
        }

        // Nodes that never started report `cancelled`, keeping one result
        // per playbook node under timeouts and strict halts.
        for node in &playbook.graph.nodes {
            results
                .entry(node.clone())
                .or_insert_with(|| AgentExecutionResult::cancelled(node));
        }

        let cancelled = ctx.cancellation.is_cancelled() && strict_failure.is_none();
        debug!(
            nodes = playbook.graph.len(),
            cancelled,
            strict_failure = strict_failure.as_deref().unwrap_or(""),
            "playbook run finished"
        );

        let ordered = playbook
            .graph
            .nodes
            .iter()
            .filter_map(|n| results.remove(n))
            .collect();
        SchedulerRun {
            results: ordered,
            strict_failure,
            cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use weaver_bus_core::InMemoryStatusBus;
    use weaver_tools::tools::{ScriptedBehavior, ScriptedTool};
    use weaver_tools::{
        BrokerConfig, QuotaConfig, Tool, ToolBroker, ToolError, ToolRequest, ToolResponse,
    };
    use weaver_types::{
        AgentClass, AgentDefinition, ExecutionGraph, FieldType, JobEnvelope, JobInput, JobType,
        CONFIDENCE_KEY,
    };

    use crate::retry::RetryPolicy;

    /// Records prompts and tracks peak concurrency.
    struct ProbeTool {
        name: String,
        current: AtomicUsize,
        peak: AtomicUsize,
        prompts: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl ProbeTool {
        fn new(name: &str, delay: Duration) -> Self {
            Self {
                name: name.to_string(),
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
                delay,
            }
        }

        fn peak_concurrency(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Tool for ProbeTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "probe"
        }

        async fn invoke(
            &self,
            request: &ToolRequest,
            _ctx: &weaver_tools::ToolContext,
        ) -> Result<ToolResponse, ToolError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.input.clone());
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(ToolResponse::structured(json!({"confidence": 0.9})))
        }
    }

    fn agent(id: &str, tool: &str, strict: bool) -> AgentDefinition {
        AgentDefinition {
            agent_id: id.to_string(),
            tenant_id: "system".to_string(),
            agent_name: id.to_string(),
            agent_class: AgentClass::Ingestion,
            system_prompt: format!("You are {id}."),
            tools: vec![tool.to_string()],
            output_schema: [
                ("label".to_string(), FieldType::String),
                (CONFIDENCE_KEY.to_string(), FieldType::Number),
            ]
            .into_iter()
            .collect(),
            version: 1,
            is_builtin: true,
            strict,
            weight: 1.0,
        }
    }

    fn playbook(
        graph: ExecutionGraph,
        agents: Vec<AgentDefinition>,
    ) -> ResolvedPlaybook {
        ResolvedPlaybook {
            graph,
            agents: agents
                .into_iter()
                .map(|a| (a.agent_id.clone(), a))
                .collect(),
        }
    }

    fn broker() -> Arc<ToolBroker> {
        Arc::new(ToolBroker::new(BrokerConfig {
            quota: QuotaConfig {
                capacity: 10_000,
                refill_per_sec: 10_000.0,
            },
            ..Default::default()
        }))
    }

    fn scheduler(broker: &Arc<ToolBroker>) -> DagScheduler {
        DagScheduler::new(Arc::new(AgentInvoker::new(
            broker.clone(),
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        )))
    }

    fn emitter() -> StatusEmitter {
        let envelope = JobEnvelope {
            job_id: "job-1".into(),
            tenant_id: "acme".into(),
            user_id: "user-1".into(),
            job_type: JobType::Ingest,
            domain_id: "d1".into(),
            session_id: None,
            deadline_epoch_ms: None,
            input: JobInput::default(),
        };
        StatusEmitter::new(Arc::new(InMemoryStatusBus::new(64)), &envelope)
    }

    #[tokio::test]
    async fn every_node_yields_exactly_one_result() {
        let broker = broker();
        let probe = Arc::new(ProbeTool::new("probe", Duration::from_millis(1)));
        broker.register(probe);
        let playbook = playbook(
            ExecutionGraph::flat(["a", "b", "c"]),
            vec![
                agent("a", "probe", false),
                agent("b", "probe", false),
                agent("c", "probe", false),
            ],
        );

        let run = scheduler(&broker)
            .run(
                &playbook,
                &json!({"text": "t"}),
                4,
                &weaver_tools::ToolContext::new("acme", "job-1"),
                &emitter(),
            )
            .await;
        assert_eq!(run.results.len(), 3);
        assert!(run.strict_failure.is_none());
        assert!(!run.cancelled);
        assert!(run
            .results
            .iter()
            .all(|r| r.status == AgentRunStatus::Completed));
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let broker = broker();
        let probe = Arc::new(ProbeTool::new("probe", Duration::from_millis(25)));
        broker.register(probe.clone());
        let nodes: Vec<String> = (0..6).map(|i| format!("a{i}")).collect();
        let playbook = playbook(
            ExecutionGraph::flat(nodes.clone()),
            nodes.iter().map(|n| agent(n, "probe", false)).collect(),
        );

        let run = scheduler(&broker)
            .run(
                &playbook,
                &json!({"text": "t"}),
                2,
                &weaver_tools::ToolContext::new("acme", "job-1"),
                &emitter(),
            )
            .await;
        assert_eq!(run.results.len(), 6);
        assert!(
            probe.peak_concurrency() <= 2,
            "peak concurrency {} exceeded bound",
            probe.peak_concurrency()
        );
    }

    #[tokio::test]
    async fn children_start_after_all_parents_end() {
        let broker = broker();
        broker.register(Arc::new(ProbeTool::new("probe", Duration::from_millis(5))));
        let playbook = playbook(
            ExecutionGraph::new(["severity", "priority"], [("severity", "priority")]),
            vec![
                agent("severity", "probe", false),
                agent("priority", "probe", false),
            ],
        );

        let run = scheduler(&broker)
            .run(
                &playbook,
                &json!({"text": "t"}),
                4,
                &weaver_tools::ToolContext::new("acme", "job-1"),
                &emitter(),
            )
            .await;
        let severity = run.results.iter().find(|r| r.agent_id == "severity").unwrap();
        let priority = run.results.iter().find(|r| r.agent_id == "priority").unwrap();
        assert!(priority.started_at >= severity.ended_at);
    }

    #[tokio::test]
    async fn failed_parent_yields_null_entry_for_child() {
        let broker = broker();
        broker.register(Arc::new(ScriptedTool::unavailable("broken")));
        let probe = Arc::new(ProbeTool::new("probe", Duration::from_millis(1)));
        broker.register(probe.clone());
        let playbook = playbook(
            ExecutionGraph::new(["geo", "summary"], [("geo", "summary")]),
            vec![agent("geo", "broken", false), agent("summary", "probe", false)],
        );

        let run = scheduler(&broker)
            .run(
                &playbook,
                &json!({"text": "t"}),
                4,
                &weaver_tools::ToolContext::new("acme", "job-1"),
                &emitter(),
            )
            .await;
        let geo = run.results.iter().find(|r| r.agent_id == "geo").unwrap();
        assert_eq!(geo.status, AgentRunStatus::Failed);
        let summary = run.results.iter().find(|r| r.agent_id == "summary").unwrap();
        assert_eq!(summary.status, AgentRunStatus::Completed);

        // The child saw the failed parent as a null entry.
        let prompts = probe.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("\"geo\": null"));
    }

    #[tokio::test]
    async fn strict_failure_halts_the_run() {
        let broker = broker();
        broker.register(Arc::new(ScriptedTool::unavailable("broken")));
        broker.register(Arc::new(ProbeTool::new("probe", Duration::from_millis(1))));
        let playbook = playbook(
            ExecutionGraph::new(["geo", "summary"], [("geo", "summary")]),
            vec![agent("geo", "broken", true), agent("summary", "probe", false)],
        );

        let run = scheduler(&broker)
            .run(
                &playbook,
                &json!({"text": "t"}),
                4,
                &weaver_tools::ToolContext::new("acme", "job-1"),
                &emitter(),
            )
            .await;
        assert_eq!(run.strict_failure.as_deref(), Some("geo"));
        let summary = run.results.iter().find(|r| r.agent_id == "summary").unwrap();
        assert_eq!(summary.status, AgentRunStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancelled_job_marks_unstarted_nodes() {
        let broker = broker();
        broker.register(Arc::new(ScriptedTool::new(
            "slow",
            vec![ScriptedBehavior::SleepThenRespond(
                Duration::from_secs(30),
                json!({"confidence": 0.9}),
            )],
        )));
        let playbook = playbook(
            ExecutionGraph::new(["a", "b"], [("a", "b")]),
            vec![agent("a", "slow", false), agent("b", "slow", false)],
        );

        let ctx = weaver_tools::ToolContext::new("acme", "job-1");
        let token = ctx.cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let run = scheduler(&broker)
            .run(&playbook, &json!({"text": "t"}), 4, &ctx, &emitter())
            .await;
        assert!(run.cancelled);
        assert_eq!(run.results.len(), 2);
        assert!(run
            .results
            .iter()
            .all(|r| r.status == AgentRunStatus::Cancelled));
    }
}
