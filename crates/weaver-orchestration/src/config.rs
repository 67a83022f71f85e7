//! Engine configuration.
//!
//! All knobs come from the environment (see the key table in the crate
//! docs) with code defaults matching the documented ones. Nothing here is
//! persisted; the engine owns no stateful files.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use tracing::warn;

/// Default bound on concurrently executing agents per job.
pub const DEFAULT_MAX_PARALLEL_AGENTS: usize = 4;

/// Default hard job deadline.
pub const DEFAULT_JOB_MAX_WALL_CLOCK: Duration = Duration::from_millis(600_000);

/// Default attempts per agent tool call.
pub const DEFAULT_AGENT_RETRIES: u32 = 3;

/// Default completion threshold.
pub const DEFAULT_CONFIDENCE_COMPLETE: f64 = 0.9;

/// Default clarification threshold.
pub const DEFAULT_CONFIDENCE_CLARIFY: f64 = 0.6;

/// Default number of candidate records loaded for a query job.
pub const DEFAULT_QUERY_RECORD_LIMIT: usize = 20;

/// Default interval between supervisor sweeps of stalled jobs.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Confidence decision thresholds, configurable per deployment.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceThresholds {
    /// At or above: the job completes cleanly.
    pub complete: f64,
    /// Below: ingest jobs ask for clarification; reads complete hedged.
    pub clarify: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            complete: DEFAULT_CONFIDENCE_COMPLETE,
            clarify: DEFAULT_CONFIDENCE_CLARIFY,
        }
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on concurrently executing agents per job.
    pub max_parallel_agents: usize,
    /// Per-tenant overrides of the parallelism bound.
    pub tenant_parallelism: HashMap<String, usize>,
    /// Hard wall-clock deadline per job.
    pub job_max_wall_clock: Duration,
    /// Maximum attempts per agent tool call.
    pub agent_retries: u32,
    /// Confidence decision thresholds.
    pub thresholds: ConfidenceThresholds,
    /// When an agent id cannot be resolved, substitute an inert stub
    /// instead of failing the job.
    pub degraded_agent_stub: bool,
    /// Candidate records loaded for a query job.
    pub query_record_limit: usize,
    /// Interval between supervisor sweeps.
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_agents: DEFAULT_MAX_PARALLEL_AGENTS,
            tenant_parallelism: HashMap::new(),
            job_max_wall_clock: DEFAULT_JOB_MAX_WALL_CLOCK,
            agent_retries: DEFAULT_AGENT_RETRIES,
            thresholds: ConfidenceThresholds::default(),
            degraded_agent_stub: false,
            query_record_limit: DEFAULT_QUERY_RECORD_LIMIT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment, falling back to defaults
    /// for absent or unparseable keys.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = read_env("MAX_PARALLEL_AGENTS") {
            config.max_parallel_agents = v;
        }
        if let Some(ms) = read_env::<u64>("JOB_MAX_WALL_CLOCK_MS") {
            config.job_max_wall_clock = Duration::from_millis(ms);
        }
        if let Some(v) = read_env("AGENT_RETRIES") {
            config.agent_retries = v;
        }
        if let Some(v) = read_env("CONFIDENCE_COMPLETE") {
            config.thresholds.complete = v;
        }
        if let Some(v) = read_env("CONFIDENCE_CLARIFY") {
            config.thresholds.clarify = v;
        }
        config
    }

    /// The parallelism bound for one tenant.
    pub fn max_parallel_for(&self, tenant_id: &str) -> usize {
        self.tenant_parallelism
            .get(tenant_id)
            .copied()
            .unwrap_or(self.max_parallel_agents)
            .max(1)
    }
}

fn read_env<T: std::str::FromStr>(key: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("ignoring unparseable {key}={raw}: {e}");
            None
        }
    }
}
