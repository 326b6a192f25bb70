//! C8 — drains the timeout queue and asks the controller to stop timed-out containers.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{instrument, warn};

use crate::controller::Controller;
use crate::kv::TimeoutQueue;

/// Bounded worker-group size for in-flight stop dispatches.
const WORKER_GROUP_SIZE: usize = 10;

/// The C8 timeout reaper worker.
pub struct TimeoutReaper {
    controller: Arc<dyn Controller>,
    queue: Arc<dyn TimeoutQueue>,
    poll_timeout: Duration,
}

impl TimeoutReaper {
    /// Build a new reaper, blocking up to `poll_timeout` per pop (spec default 1s).
    pub fn new(controller: Arc<dyn Controller>, queue: Arc<dyn TimeoutQueue>, poll_timeout: Duration) -> Self {
        Self {
            controller,
            queue,
            poll_timeout,
        }
    }

    /// Run the reaper loop until `stop` flips to `true`.
    pub async fn run(&self, mut stop: tokio::sync::watch::Receiver<bool>) {
        let mut in_flight = FuturesUnordered::new();

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                popped = self.queue.pop(self.poll_timeout) => {
                    match popped {
                        Ok(Some(message)) => {
                            if in_flight.len() >= WORKER_GROUP_SIZE {
                                // Drain one completed dispatch before accepting more work.
                                in_flight.next().await;
                            }
                            let controller = self.controller.clone();
                            in_flight.push(async move {
                                controller.stop_container(&message.service, &message.container).await
                            });
                        }
                        Ok(None) => {}
                        Err(err) => warn!(error = %err, "timeout queue pop failed"),
                    }
                }
                Some(result) = in_flight.next(), if !in_flight.is_empty() => {
                    if let Err(err) = result {
                        warn!(service = %err.service_name, error = %err.cause, "failed to stop timed-out container");
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }
        }

        // Drain whatever dispatches are still outstanding before returning.
        while let Some(result) = in_flight.next().await {
            if let Err(err) = result {
                warn!(service = %err.service_name, error = %err.cause, "failed to stop timed-out container during shutdown");
            }
        }
    }

    /// Pop and dispatch exactly one message, if one is immediately available. Used by tests
    /// and by callers that want single-step control instead of the free-running loop.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> anyhow::Result<bool> {
        match self.queue.pop(self.poll_timeout).await? {
            Some(message) => {
                if let Err(err) = self.controller.stop_container(&message.service, &message.container).await {
                    warn!(service = %err.service_name, error = %err.cause, "failed to stop timed-out container");
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::TimeoutMessage;
    use crate::testing::{FakeController, FakeTimeoutQueue};

    #[tokio::test]
    async fn run_once_stops_the_popped_container() {
        let controller = Arc::new(FakeController::new());
        controller.set_target("svc", 1).await.unwrap();
        let queue = Arc::new(FakeTimeoutQueue::new(vec![TimeoutMessage {
            service: "svc".to_string(),
            container: "c1".to_string(),
        }]));
        let reaper = TimeoutReaper::new(controller, queue, Duration::from_millis(10));

        assert!(reaper.run_once().await.unwrap());
        assert!(!reaper.run_once().await.unwrap());
    }

    #[tokio::test]
    async fn run_once_on_empty_queue_is_a_noop() {
        let controller = Arc::new(FakeController::new());
        let queue = Arc::new(FakeTimeoutQueue::new(vec![]));
        let reaper = TimeoutReaper::new(controller, queue, Duration::from_millis(10));

        assert!(!reaper.run_once().await.unwrap());
    }
}
