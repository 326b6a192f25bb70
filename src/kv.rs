//! The `KV` substrate: the boundary to the key/value + queue store backing
//! the timeout queue, the status table, and per-service work queues.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Observed state of a host running a service container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    /// Actively processing work.
    Running,
    /// Idle, waiting for work.
    Idle,
}

/// One entry in the status table: which service a host is running, its
/// state, and when the entry expires absent a refresh.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    /// Service name.
    pub service: String,
    /// Observed state.
    pub state: HostState,
    /// Expiry deadline; entries past this are considered stale.
    pub expiry: DateTime<Utc>,
}

/// A message popped from the scaler's timeout queue.
#[derive(Debug, Clone)]
pub struct TimeoutMessage {
    /// Service the timed-out container belongs to.
    pub service: String,
    /// Container identifier to stop.
    pub container: String,
}

/// Blocking pop interface over the shared timeout queue.
#[async_trait]
pub trait TimeoutQueue: Send + Sync {
    /// Pop one message, waiting up to `timeout` for one to arrive.
    async fn pop(&self, timeout: Duration) -> anyhow::Result<Option<TimeoutMessage>>;
}

/// The expiring `host → (service, state, expiry)` status table.
#[async_trait]
pub trait StatusTable: Send + Sync {
    /// Snapshot every entry currently present.
    async fn snapshot(&self) -> anyhow::Result<Vec<(String, StatusEntry)>>;

    /// Remove a host's entry.
    async fn remove(&self, host: &str) -> anyhow::Result<()>;
}

/// A handle to a single service's work queue.
#[async_trait]
pub trait QueueHandle: Send + Sync {
    /// Current queue length.
    async fn length(&self) -> anyhow::Result<u32>;
}

/// Vends per-service [`QueueHandle`]s on demand.
pub trait QueueProvider: Send + Sync {
    /// Get (or lazily create) the queue handle for `service`.
    fn queue_handle(&self, service: &str) -> std::sync::Arc<dyn QueueHandle>;
}
