//! Playbook resolution.
//!
//! Given `(tenant_id, domain_id, job_type)` the loader materialises
//! everything a run needs: the validated execution graph and every agent
//! definition, with the system-tenant fallback applied. The scheduler
//! performs no configuration I/O afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use weaver_store_core::ConfigStore;
use weaver_types::{
    AgentClass, AgentDefinition, ExecutionGraph, FieldType, JobType, CONFIDENCE_KEY,
    SYSTEM_TENANT,
};

use crate::errors::OrchestrationError;

/// A fully materialised playbook, ready to schedule.
#[derive(Debug, Clone)]
pub struct ResolvedPlaybook {
    /// The validated execution graph.
    pub graph: ExecutionGraph,
    /// One definition per graph node.
    pub agents: HashMap<String, AgentDefinition>,
}

impl ResolvedPlaybook {
    /// Aggregation weight of one node (stubs carry weight zero).
    pub fn weight_of(&self, agent_id: &str) -> f64 {
        self.agents.get(agent_id).map(|a| a.weight).unwrap_or(1.0)
    }
}

/// Resolves domains and agents from the config store.
pub struct PlaybookLoader {
    config_store: Arc<dyn ConfigStore>,
    degraded_agent_stub: bool,
}

impl PlaybookLoader {
    /// New loader over a config store. With `degraded_agent_stub` set,
    /// unresolvable agent ids become inert stubs instead of failing the
    /// job.
    pub fn new(config_store: Arc<dyn ConfigStore>, degraded_agent_stub: bool) -> Self {
        Self {
            config_store,
            degraded_agent_stub,
        }
    }

    /// Resolve the playbook for `(tenant_id, domain_id, job_type)`.
    ///
    /// Lookup order: the tenant's own scope first, then the system tenant.
    /// Agents are loaded in two batch passes the same way.
    pub async fn resolve(
        &self,
        tenant_id: &str,
        domain_id: &str,
        job_type: JobType,
    ) -> Result<ResolvedPlaybook, OrchestrationError> {
        let domain = match self.config_store.get_domain(tenant_id, domain_id).await? {
            Some(domain) => domain,
            None => self
                .config_store
                .get_domain(SYSTEM_TENANT, domain_id)
                .await?
                .ok_or_else(|| OrchestrationError::DomainNotFound(domain_id.to_string()))?,
        };

        let graph = domain.playbook(job_type).clone();
        if graph.is_empty() {
            return Err(OrchestrationError::PlaybookDisabled {
                domain_id: domain_id.to_string(),
                job_type: job_type.as_str(),
            });
        }
        graph
            .validate()
            .map_err(|reason| OrchestrationError::InvalidPlaybook {
                domain_id: domain_id.to_string(),
                reason,
            })?;

        let agent_ids = graph.nodes.clone();
        let mut agents = self.config_store.get_agents(tenant_id, &agent_ids).await?;

        let missing: Vec<String> = agent_ids
            .iter()
            .filter(|id| !agents.contains_key(*id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let system_agents = self
                .config_store
                .get_agents(SYSTEM_TENANT, &missing)
                .await?;
            agents.extend(system_agents);
        }

        for agent_id in &agent_ids {
            if agents.contains_key(agent_id) {
                continue;
            }
            if self.degraded_agent_stub {
                warn!(agent_id = %agent_id, domain_id, "substituting degraded stub for unresolvable agent");
                agents.insert(agent_id.clone(), stub_agent(agent_id, job_type));
            } else {
                return Err(OrchestrationError::AgentMissing(agent_id.clone()));
            }
        }

        debug!(
            domain_id,
            job_type = job_type.as_str(),
            nodes = graph.len(),
            "resolved playbook"
        );
        Ok(ResolvedPlaybook { graph, agents })
    }
}

/// An inert stand-in for an unresolvable agent. Its tool is unregistered,
/// so the node soft-fails in one attempt and contributes nothing to the
/// aggregate.
fn stub_agent(agent_id: &str, job_type: JobType) -> AgentDefinition {
    AgentDefinition {
        agent_id: agent_id.to_string(),
        tenant_id: SYSTEM_TENANT.to_string(),
        agent_name: format!("{agent_id} (degraded stub)"),
        agent_class: match job_type {
            JobType::Ingest => AgentClass::Ingestion,
            JobType::Query => AgentClass::Query,
            JobType::Management => AgentClass::Management,
        },
        system_prompt: String::new(),
        tools: vec!["unresolved".to_string()],
        output_schema: [(CONFIDENCE_KEY.to_string(), FieldType::Number)]
            .into_iter()
            .collect(),
        version: 0,
        is_builtin: false,
        strict: false,
        weight: 0.0,
    }
}
