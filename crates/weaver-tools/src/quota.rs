//! Per-`(tenant, tool)` token-bucket quotas.
//!
//! The token bucket allows burst traffic up to `capacity` while holding the
//! sustained rate at `refill_per_sec`. Buckets refill lazily on check, so an
//! idle pair costs nothing. State is process-wide and shared by every job.

use std::time::Instant;

use dashmap::DashMap;

/// Quota parameters for one `(tenant, tool)` pair.
#[derive(Debug, Clone, Copy)]
pub struct QuotaConfig {
    /// Maximum burst size.
    pub capacity: u32,
    /// Sustained refill rate in tokens per second.
    pub refill_per_sec: f64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            capacity: 60,
            refill_per_sec: 1.0,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn new(capacity: u32) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, config: &QuotaConfig) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_per_sec).min(config.capacity as f64);
        self.last_refill = Instant::now();
    }

    fn try_take(&mut self, config: &QuotaConfig) -> bool {
        self.refill(config);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Process-wide token-bucket quota set keyed by `(tenant, tool)`.
#[derive(Debug)]
pub struct TokenBucketQuota {
    default_config: QuotaConfig,
    overrides: DashMap<(String, String), QuotaConfig>,
    buckets: DashMap<(String, String), BucketState>,
}

impl TokenBucketQuota {
    /// New quota set with the given default parameters.
    pub fn new(default_config: QuotaConfig) -> Self {
        Self {
            default_config,
            overrides: DashMap::new(),
            buckets: DashMap::new(),
        }
    }

    /// Override quota parameters for one `(tenant, tool)` pair.
    pub fn set_override(
        &self,
        tenant_id: impl Into<String>,
        tool: impl Into<String>,
        config: QuotaConfig,
    ) {
        self.overrides
            .insert((tenant_id.into(), tool.into()), config);
    }

    fn config_for(&self, key: &(String, String)) -> QuotaConfig {
        self.overrides
            .get(key)
            .map(|c| *c)
            .unwrap_or(self.default_config)
    }

    /// Attempt to take one token; `false` means the caller should back off.
    pub fn try_acquire(&self, tenant_id: &str, tool: &str) -> bool {
        let key = (tenant_id.to_string(), tool.to_string());
        let config = self.config_for(&key);
        let mut bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| BucketState::new(config.capacity));
        bucket.try_take(&config)
    }
}

impl Default for TokenBucketQuota {
    fn default() -> Self {
        Self::new(QuotaConfig::default())
    }
}
