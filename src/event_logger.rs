//! Drains orchestrator-observed container events each tick and logs them.
//!
//! Grounded on the original `log_container_events` scheduler job: the
//! orchestrator driver surfaces events (container exits, OOM kills, image
//! pull failures) that aren't tied to any particular reconciliation decision;
//! this worker's only job is to make sure none of them go unnoticed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{instrument, warn};

use crate::controller::Controller;

/// The container event logger worker.
pub struct ContainerEventLogger {
    controller: Arc<dyn Controller>,
    period: Duration,
}

impl ContainerEventLogger {
    /// Build a new logger, ticking on `period` (spec default 5s).
    pub fn new(controller: Arc<dyn Controller>, period: Duration) -> Self {
        Self { controller, period }
    }

    /// Run the logger loop until `stop` flips to `true`.
    pub async fn run(&self, mut stop: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        warn!(error = %err, "container event logger tick failed");
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Drain and log exactly one round of events.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> anyhow::Result<()> {
        for event in self.controller.new_events().await? {
            warn!(event = %event, "container event");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeController;

    #[tokio::test]
    async fn run_once_drains_and_empties_the_queue() {
        let controller = Arc::new(FakeController::new());
        controller.push_event("container worker-1 exited with code 137");
        controller.push_event("container worker-2 pull failed");

        let logger = ContainerEventLogger::new(controller.clone(), Duration::from_secs(5));
        logger.run_once().await.unwrap();

        assert!(controller.new_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_once_on_no_events_is_a_noop() {
        let controller = Arc::new(FakeController::new());
        let logger = ContainerEventLogger::new(controller, Duration::from_secs(5));
        logger.run_once().await.unwrap();
    }
}
