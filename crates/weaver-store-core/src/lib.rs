#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **weaver-store-core** – Storage abstractions for Weaver.
//!
//! This crate defines the contracts the orchestration core reads and writes
//! through, without providing concrete implementations:
//!
//! - [`ConfigStore`] — agent and domain definitions (read-only for the core;
//!   both kinds live behind this one interface so there is a single logical
//!   source of truth).
//! - [`RecordStore`] — schemaless user-visible documents produced by ingest
//!   and mutated by management flows. Supports merge-like update of one
//!   document; `history` arrays append.
//! - [`JobStore`] — job rows owned exclusively by the job lifecycle manager,
//!   including the running-jobs scan the supervisor sweep needs.
//!
//! Store drivers (in-memory, document databases, …) implement these traits
//! in separate crates. The [`decimal`] module provides the float→decimal
//! conversion every persisted document traverses, and [`document`] the
//! record document shape plus deep-merge semantics.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use weaver_types::{
    AgentDefinition, ClarificationBundle, DomainConfig, JobResult, JobStatus, JobType,
};

pub mod decimal;
pub mod document;

pub use decimal::encode_for_store;
pub use document::{deep_merge, RecordFields};

//─────────────────────────────
//  Error types
//─────────────────────────────

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached or refused the operation;
    /// retriable at the persistence layer, fatal for the job past retries.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The addressed document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),
    /// The document could not be encoded for the store's type system.
    #[error("failed to encode document: {0}")]
    Encoding(String),
    /// A merge was attempted against a non-object document or partial.
    #[error("invalid merge: {0}")]
    InvalidMerge(String),
}

/// Convenience alias used across store traits.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

//─────────────────────────────
//  Config store (read-only for the core)
//─────────────────────────────

/// Read interface over agent and domain definitions.
///
/// System-tenant fallback is the playbook loader's job, not the store's:
/// implementations answer exactly the tenant they are asked about.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch a domain configuration, or `None` when absent in this tenant.
    async fn get_domain(
        &self,
        tenant_id: &str,
        domain_id: &str,
    ) -> StoreResult<Option<DomainConfig>>;

    /// Batch-fetch agent definitions by id. Ids absent in this tenant are
    /// simply missing from the returned map.
    async fn get_agents(
        &self,
        tenant_id: &str,
        agent_ids: &[String],
    ) -> StoreResult<HashMap<String, AgentDefinition>>;
}

//─────────────────────────────
//  Record store
//─────────────────────────────

/// Interface over the schemaless document store holding user records.
///
/// Documents are JSON objects; numeric values must have traversed
/// [`encode_for_store`] before arriving here (drivers may enforce this).
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a new record document, returning its id.
    async fn create_record(&self, tenant_id: &str, record: Value) -> StoreResult<String>;

    /// Deep-merge `partial` into an existing document; `history` arrays
    /// append rather than replace. The merge is atomic per document.
    async fn merge_record(
        &self,
        tenant_id: &str,
        record_id: &str,
        partial: Value,
    ) -> StoreResult<()>;

    /// Fetch records in a domain matching equality `filters` (an object of
    /// `field → expected value`, matched against top-level record fields),
    /// up to `limit`.
    async fn query_records(
        &self,
        tenant_id: &str,
        domain_id: &str,
        filters: &Value,
        limit: usize,
    ) -> StoreResult<Vec<Value>>;

    /// Fetch one record, or `None` when absent in this tenant.
    async fn get_record(&self, tenant_id: &str, record_id: &str) -> StoreResult<Option<Value>>;
}

//─────────────────────────────
//  Job store
//─────────────────────────────

/// A persisted job row. State is exclusively owned by the job lifecycle
/// manager; other components read it for reconciliation only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRow {
    /// Unique job identifier.
    pub job_id: String,
    /// Tenant scope.
    pub tenant_id: String,
    /// Requesting user.
    pub user_id: String,
    /// Optional client session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Domain whose playbook ran.
    pub domain_id: String,
    /// Kind of work.
    pub job_type: JobType,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Final (or clarification-pending) outcome once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    /// Clarification bundle for `awaiting_clarification` jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<ClarificationBundle>,
    /// Whether the single permitted clarification follow-up was consumed.
    #[serde(default)]
    pub clarification_consumed: bool,
    /// Record this job created or targeted, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
    /// Hard wall-clock deadline; the supervisor sweeps `running` jobs past
    /// this instant to `failed`.
    pub deadline_at: DateTime<Utc>,
}

/// Interface over the job rows.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a job row (upsert keyed by `(tenant_id, job_id)`).
    async fn put_job(&self, job: JobRow) -> StoreResult<()>;

    /// Fetch one job row.
    async fn get_job(&self, tenant_id: &str, job_id: &str) -> StoreResult<Option<JobRow>>;

    /// All jobs currently in the `running` state, across tenants. Used by
    /// the supervisor sweep.
    async fn running_jobs(&self) -> StoreResult<Vec<JobRow>>;
}
