#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **weaver-bus-core** – Status-event bus abstraction for Weaver.
//!
//! This crate provides the narrow publish interface the orchestration core
//! emits job status events through, plus a lightweight in-memory broadcast
//! implementation. The realtime transport that fans events out to subscribed
//! clients is injected behind the [`StatusPublisher`] trait; delivery beyond
//! the bus is somebody else's problem.
//!
//! Guarantees the core relies on:
//!
//! - Publishing never blocks the job: a failed emit is reported to the
//!   caller, who logs and moves on.
//! - Events published from one task are observed in publish order, which
//!   gives the per-`job_id` ordering the engine promises.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;

use weaver_types::StatusEvent;

//─────────────────────────────
//  Publisher trait
//─────────────────────────────

/// Emit-only interface onto the push channel.
///
/// Implementations must be thread-safe and cheap to call; the core publishes
/// best-effort and never fails a job over a lost event.
pub trait StatusPublisher: Send + Sync {
    /// Publish an event to all subscribers.
    ///
    /// This operation should complete quickly and not block the caller. If
    /// subscribers are slow or unavailable, the bus may drop events to keep
    /// the system responsive.
    fn publish(&self, event: &StatusEvent) -> Result<()>;
}

//─────────────────────────────
//  In-memory bus implementation
//─────────────────────────────

/// Simple in-memory, broadcast-only status bus using Tokio channels.
///
/// Used by the test-suite and local development. Events are fanned out to
/// every active subscriber through a ring buffer; slow subscribers that fall
/// behind miss events rather than stalling publishers.
#[derive(Debug, Clone)]
pub struct InMemoryStatusBus {
    tx: Arc<broadcast::Sender<StatusEvent>>,
}

impl Default for InMemoryStatusBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl InMemoryStatusBus {
    /// Create a new bus with the specified ring buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to the live event stream.
    ///
    /// Returns a receiver that observes copies of all events published after
    /// the subscription was created.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl StatusPublisher for InMemoryStatusBus {
    fn publish(&self, event: &StatusEvent) -> Result<()> {
        // Ignore lagging receiver errors - subscribers must handle missed events
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

//─────────────────────────────
//  Error types
//─────────────────────────────

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Event could not be published.
    #[error("failed to publish event: {0}")]
    PublishFailed(String),
    /// Subscription failed.
    #[error("failed to create subscription: {0}")]
    SubscriptionFailed(String),
}
