#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **weaver-orchestration** – The Weaver orchestration core.
//!
//! This crate turns job envelopes into persisted results by executing a
//! domain's playbook — a directed acyclic graph of prompt-driven agents —
//! against the configured tool providers.
//!
//! ## Architecture
//!
//! - **OrchestrationEngine**: entry point; validates envelopes, routes by
//!   job type, owns the job deadline
//! - **PlaybookLoader**: resolves domains and agents with system-tenant
//!   fallback; everything a run needs is materialised up front
//! - **DagScheduler**: dependency-aware execution, roots concurrent up to
//!   `max_parallel_agents`, children after all parents
//! - **AgentInvoker**: deterministic prompt assembly, the primary tool call
//!   with retries, the parse ladder, schema validation
//! - **ConfidenceAggregator**: weighted-mean confidence and the
//!   complete / clarify / hedge decision
//! - **JobLifecycleManager**: the job state machine, idempotent persisted
//!   transitions, the supervisor sweep
//! - **StatusEmitter**: per-job status events, published best-effort and
//!   strictly after the persisted transition
//! - **RetryPolicy**: jittered exponential backoff shared by every tool
//!   call
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use weaver_bus_core::InMemoryStatusBus;
//! use weaver_orchestration::{EngineConfig, OrchestrationEngine};
//! use weaver_store_memory::{MemoryConfigStore, MemoryJobStore, MemoryRecordStore};
//! use weaver_tools::{BrokerConfig, ToolBroker};
//!
//! # async fn run(envelope: weaver_types::JobEnvelope) -> anyhow::Result<()> {
//! let broker = Arc::new(ToolBroker::new(BrokerConfig::default()));
//! // ... register the llm / geocoder / classifier providers ...
//!
//! let engine = OrchestrationEngine::new(
//!     EngineConfig::from_env(),
//!     Arc::new(MemoryConfigStore::new()),
//!     Arc::new(MemoryRecordStore::new()),
//!     Arc::new(MemoryJobStore::new()),
//!     broker,
//!     Arc::new(InMemoryStatusBus::default()),
//! );
//! engine.spawn_supervisor();
//!
//! let result = engine.execute(envelope).await?;
//! println!("job finished: {:?}", result.status);
//! # Ok(())
//! # }
//! ```

pub mod confidence;
pub mod config;
pub mod engine;
pub mod errors;
pub mod invoker;
pub mod lifecycle;
pub mod loader;
pub mod publisher;
pub mod retry;
pub mod scheduler;

pub use confidence::{ConfidenceAggregator, JobDisposition};
pub use config::{ConfidenceThresholds, EngineConfig};
pub use engine::{MetricsSnapshot, OrchestrationEngine};
pub use errors::OrchestrationError;
pub use invoker::{AgentInvoker, InputBundle};
pub use lifecycle::JobLifecycleManager;
pub use loader::{PlaybookLoader, ResolvedPlaybook};
pub use publisher::StatusEmitter;
pub use retry::RetryPolicy;
pub use scheduler::{DagScheduler, SchedulerRun};
