#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **weaver-store-memory** – In-memory store drivers for Weaver.
//!
//! This crate provides fast, non-persistent implementations of the
//! [`ConfigStore`], [`RecordStore`], and [`JobStore`] traits, suitable for
//! the test-suite, local development, and scenarios where persistence is not
//! required. All data is stored in memory and lost when the process
//! terminates.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use weaver_store_core::{
    deep_merge, ConfigStore, JobRow, JobStore, RecordFields, RecordStore, StoreError,
    StoreResult,
};
use weaver_types::{AgentDefinition, DomainConfig, JobStatus};

//─────────────────────────────
//  Config store
//─────────────────────────────

/// In-memory agent/domain configuration store with seeding helpers.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    domains: Arc<RwLock<HashMap<(String, String), DomainConfig>>>,
    agents: Arc<RwLock<HashMap<(String, String), AgentDefinition>>>,
}

impl MemoryConfigStore {
    /// Creates a new, empty config store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a domain configuration, keyed by `(tenant_id, domain_id)`.
    pub async fn put_domain(&self, domain: DomainConfig) {
        self.domains.write().await.insert(
            (domain.tenant_id.clone(), domain.domain_id.clone()),
            domain,
        );
    }

    /// Seed an agent definition, keyed by `(tenant_id, agent_id)`.
    pub async fn put_agent(&self, agent: AgentDefinition) {
        self.agents
            .write()
            .await
            .insert((agent.tenant_id.clone(), agent.agent_id.clone()), agent);
    }

    /// Number of seeded agents.
    pub async fn agent_count(&self) -> usize {
        self.agents.read().await.len()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get_domain(
        &self,
        tenant_id: &str,
        domain_id: &str,
    ) -> StoreResult<Option<DomainConfig>> {
        Ok(self
            .domains
            .read()
            .await
            .get(&(tenant_id.to_string(), domain_id.to_string()))
            .cloned())
    }

    async fn get_agents(
        &self,
        tenant_id: &str,
        agent_ids: &[String],
    ) -> StoreResult<HashMap<String, AgentDefinition>> {
        let agents = self.agents.read().await;
        let mut found = HashMap::new();
        for agent_id in agent_ids {
            if let Some(def) = agents.get(&(tenant_id.to_string(), agent_id.clone())) {
                found.insert(agent_id.clone(), def.clone());
            }
        }
        Ok(found)
    }
}

//─────────────────────────────
//  Record store
//─────────────────────────────

/// In-memory schemaless record store with merge-like document update.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    records: Arc<RwLock<HashMap<(String, String), Value>>>,
}

impl MemoryRecordStore {
    /// Creates a new, empty record store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across tenants.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Clear all stored records.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_record(&self, tenant_id: &str, mut record: Value) -> StoreResult<String> {
        if !record.is_object() {
            return Err(StoreError::InvalidMerge(
                "record document must be an object".to_string(),
            ));
        }
        let record_id = Uuid::new_v4().to_string();
        record[RecordFields::RECORD_ID] = Value::String(record_id.clone());
        self.records
            .write()
            .await
            .insert((tenant_id.to_string(), record_id.clone()), record);
        Ok(record_id)
    }

    async fn merge_record(
        &self,
        tenant_id: &str,
        record_id: &str,
        partial: Value,
    ) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&(tenant_id.to_string(), record_id.to_string()))
            .ok_or_else(|| StoreError::NotFound(record_id.to_string()))?;
        deep_merge(record, &partial)
    }

    async fn query_records(
        &self,
        tenant_id: &str,
        domain_id: &str,
        filters: &Value,
        limit: usize,
    ) -> StoreResult<Vec<Value>> {
        let records = self.records.read().await;
        let empty = serde_json::Map::new();
        let predicates = filters.as_object().unwrap_or(&empty);
        let mut matches = Vec::new();
        for ((tenant, _), record) in records.iter() {
            if tenant != tenant_id {
                continue;
            }
            if record
                .get(RecordFields::DOMAIN_ID)
                .and_then(Value::as_str)
                != Some(domain_id)
            {
                continue;
            }
            if predicates
                .iter()
                .all(|(field, expected)| record.get(field) == Some(expected))
            {
                matches.push(record.clone());
                if matches.len() >= limit {
                    break;
                }
            }
        }
        Ok(matches)
    }

    async fn get_record(&self, tenant_id: &str, record_id: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .records
            .read()
            .await
            .get(&(tenant_id.to_string(), record_id.to_string()))
            .cloned())
    }
}

//─────────────────────────────
//  Job store
//─────────────────────────────

/// In-memory job row store.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<(String, String), JobRow>>>,
}

impl MemoryJobStore {
    /// Creates a new, empty job store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored job rows.
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn put_job(&self, job: JobRow) -> StoreResult<()> {
        self.jobs
            .write()
            .await
            .insert((job.tenant_id.clone(), job.job_id.clone()), job);
        Ok(())
    }

    async fn get_job(&self, tenant_id: &str, job_id: &str) -> StoreResult<Option<JobRow>> {
        Ok(self
            .jobs
            .read()
            .await
            .get(&(tenant_id.to_string(), job_id.to_string()))
            .cloned())
    }

    async fn running_jobs(&self) -> StoreResult<Vec<JobRow>> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.status == JobStatus::Running)
            .cloned()
            .collect())
    }
}
