//! C6 — pulls status-table samples and queue depths, feeding [`ServiceProfile::update`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{instrument, warn};

use crate::controller::Controller;
use crate::kv::{HostState, QueueProvider, StatusTable};
use crate::metrics::MetricsAggregator;
use crate::registry::ProfileRegistry;

/// Host entries more than this far past their expiry are pruned outright.
const STALE_GRACE: chrono::Duration = chrono::Duration::seconds(600);

/// The C6 metric ingestor worker.
pub struct MetricIngestor {
    registry: Arc<ProfileRegistry>,
    controller: Arc<dyn Controller>,
    status_table: Arc<dyn StatusTable>,
    queues: Arc<dyn QueueProvider>,
    aggregator: MetricsAggregator,
    period: Duration,
    wake_up_delta: Duration,
}

impl MetricIngestor {
    /// Build a new ingestor, ticking on `period` (spec default 0.5s). `wake_up_delta`
    /// is the synthetic `Δt` fed to zero-instance profiles to keep backlog pressure
    /// accumulating (spec default: the export interval).
    pub fn new(
        registry: Arc<ProfileRegistry>,
        controller: Arc<dyn Controller>,
        status_table: Arc<dyn StatusTable>,
        queues: Arc<dyn QueueProvider>,
        period: Duration,
        wake_up_delta: Duration,
    ) -> Self {
        Self {
            registry,
            controller,
            status_table,
            queues,
            aggregator: MetricsAggregator::new(period.as_secs_f64()),
            period,
            wake_up_delta,
        }
    }

    /// Run the ingestor loop until `stop` flips to `true`.
    pub async fn run(&self, mut stop: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        warn!(error = %err, "ingestor tick failed");
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

    /// Execute exactly one ingestion tick.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let busy_seconds = self.period.as_secs_f64();

        for (host, entry) in self.status_table.snapshot().await? {
            if now < entry.expiry {
                let busy = if entry.state == HostState::Running { busy_seconds } else { 0.0 };
                self.aggregator.update(&entry.service, &host, 0.0, busy);
            } else if now > entry.expiry + STALE_GRACE {
                self.status_table.remove(&host).await?;
            }
        }

        let profiles = self.registry.snapshot();
        for p in &profiles {
            if let Some(agg) = self.aggregator.read(&p.name) {
                let delta = (now - p.last_update).num_milliseconds() as f64 / 1000.0;
                let backlog = self.queue_length(&p.name).await;
                self.registry.with_profile(&p.name, |profile| {
                    profile.update(delta.max(0.0), profile.running_instances, backlog, agg.duty_cycle)
                });
                continue;
            }

            // Zero-instance wake-up: keep backlog pressure accumulating for idle profiles.
            if p.desired_instances == 0 {
                let target = self.controller.get_target(&p.name).await.unwrap_or(0);
                if target == 0 {
                    let backlog = self.queue_length(&p.name).await;
                    if backlog > 0 {
                        let target_duty_cycle = p.target_duty_cycle;
                        self.registry.with_profile(&p.name, |profile| {
                            profile.update(self.wake_up_delta.as_secs_f64(), 0, backlog, target_duty_cycle)
                        });
                    }
                }
            }
        }

        Ok(())
    }

    async fn queue_length(&self, service: &str) -> u32 {
        match self.queues.queue_handle(service).length().await {
            Ok(len) => len,
            Err(err) => {
                warn!(service, error = %err, "failed to read queue length");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::StatusEntry;
    use crate::profile::{ContainerConfig, ServiceProfileConfig};
    use crate::testing::{FakeController, FakeQueueProvider, FakeStatusTable};

    fn container() -> ContainerConfig {
        ContainerConfig {
            image: "img".to_string(),
            environment: vec![],
            cpu_cores: 1.0,
            ram_mb: 512,
            allow_internet_access: false,
        }
    }

    fn profile(name: &str, min: u32) -> crate::profile::ServiceProfile {
        crate::profile::ServiceProfile::new(ServiceProfileConfig {
            name: name.to_string(),
            container_config: container(),
            config_hash: 0,
            min_instances: min,
            max_instances: Some(5),
            growth: 60.0,
            shrink: None,
            backlog: 500,
            shutdown_seconds: 30,
            is_analysis: true,
        })
    }

    // S5 — zero-instance wake-up: idle profile with a non-empty queue still accumulates pressure.
    #[tokio::test]
    async fn zero_instance_profile_wakes_up_on_backlog() {
        let registry = Arc::new(ProfileRegistry::new());
        registry.add(profile("svc", 0)).unwrap();

        let controller = Arc::new(FakeController::new());
        controller.set_target("svc", 0).await.unwrap();

        let status = Arc::new(FakeStatusTable::new());
        let queues = Arc::new(FakeQueueProvider::new());
        queues.set_length("svc", 10);

        let ingestor = MetricIngestor::new(
            registry.clone(),
            controller,
            status,
            queues,
            Duration::from_millis(500),
            Duration::from_secs(60),
        );

        for _ in 0..5 {
            ingestor.run_once().await.unwrap();
        }

        let min_instances = registry.with_profile("svc", |p| p.min_instances()).unwrap();
        assert_eq!(min_instances, 1, "backlog > 0 must bump the effective floor to 1");
    }

    #[tokio::test]
    async fn stale_host_entries_are_pruned() {
        let registry = Arc::new(ProfileRegistry::new());
        let controller = Arc::new(FakeController::new());
        let status = Arc::new(FakeStatusTable::new());
        status.insert(
            "h1",
            StatusEntry {
                service: "svc".to_string(),
                state: HostState::Idle,
                expiry: Utc::now() - chrono::Duration::seconds(900),
            },
        );
        let queues = Arc::new(FakeQueueProvider::new());

        let ingestor = MetricIngestor::new(
            registry,
            controller,
            status.clone(),
            queues,
            Duration::from_millis(500),
            Duration::from_secs(60),
        );
        ingestor.run_once().await.unwrap();

        assert!(!status.contains("h1"));
    }
}
