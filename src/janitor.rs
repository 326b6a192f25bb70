//! C9 — removes stale status-table entries for hosts the controller no longer lists,
//! requiring two consecutive sightings to tolerate brief listing races.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::controller::Controller;
use crate::kv::StatusTable;

/// The C9 status janitor worker.
pub struct StatusJanitor {
    controller: Arc<dyn Controller>,
    status_table: Arc<dyn StatusTable>,
    flagged: Mutex<HashSet<String>>,
    period: Duration,
}

impl StatusJanitor {
    /// Build a new janitor, ticking on `period` (spec default 5s).
    pub fn new(controller: Arc<dyn Controller>, status_table: Arc<dyn StatusTable>, period: Duration) -> Self {
        Self {
            controller,
            status_table,
            flagged: Mutex::new(HashSet::new()),
            period,
        }
    }

    /// Run the janitor loop until `stop` flips to `true`.
    pub async fn run(&self, mut stop: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        warn!(error = %err, "janitor tick failed");
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

    /// Execute exactly one sweep.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> anyhow::Result<()> {
        let live: HashSet<String> = self
            .controller
            .get_running_container_names()
            .await?
            .into_iter()
            .collect();

        let entries = self.status_table.snapshot().await?;
        let mut flagged = self.flagged.lock();
        let mut still_flagged = HashSet::new();

        for (host, _entry) in entries {
            if live.contains(&host) {
                continue;
            }
            if flagged.contains(&host) {
                debug!(host = %host, "removing host not seen on two consecutive sweeps");
                self.status_table.remove(&host).await?;
            } else {
                still_flagged.insert(host);
            }
        }

        *flagged = still_flagged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{HostState, StatusEntry};
    use crate::testing::{FakeController, FakeStatusTable};
    use chrono::Utc;

    fn entry(service: &str) -> StatusEntry {
        StatusEntry {
            service: service.to_string(),
            state: HostState::Idle,
            expiry: Utc::now() + chrono::Duration::seconds(60),
        }
    }

    // S6 — two consecutive sweeps without a live sighting remove the host.
    #[tokio::test]
    async fn two_consecutive_sweeps_remove_a_gone_host() {
        let controller = Arc::new(FakeController::new());
        controller.set_running_containers(vec![]);
        let status = Arc::new(FakeStatusTable::new());
        status.insert("h1", entry("svc"));

        let janitor = StatusJanitor::new(controller, status.clone(), Duration::from_secs(5));

        janitor.run_once().await.unwrap();
        assert!(status.contains("h1"), "first sweep only flags, does not remove");

        janitor.run_once().await.unwrap();
        assert!(!status.contains("h1"), "second sweep removes the still-absent host");
    }

    #[tokio::test]
    async fn a_live_sighting_clears_the_flag() {
        let controller = Arc::new(FakeController::new());
        controller.set_running_containers(vec![]);
        let status = Arc::new(FakeStatusTable::new());
        status.insert("h1", entry("svc"));

        let janitor = StatusJanitor::new(controller.clone(), status.clone(), Duration::from_secs(5));
        janitor.run_once().await.unwrap();

        controller.set_running_containers(vec!["h1".to_string()]);
        janitor.run_once().await.unwrap();
        assert!(status.contains("h1"));

        controller.set_running_containers(vec![]);
        janitor.run_once().await.unwrap();
        assert!(status.contains("h1"), "flag was cleared, so this is only the first re-flag");
        janitor.run_once().await.unwrap();
        assert!(!status.contains("h1"));
    }
}
