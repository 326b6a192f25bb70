//! C7 — the three-phase resource-constrained allocator.
//!
//! Release wants-less-than-desired services first (freeing resources early),
//! then guarantees every profile reaches its minimum, then spends whatever
//! cluster-wide CPU/RAM budget remains on a fair "least-running-first"
//! growth round. Phase ordering is a hard guarantee; writes within a phase
//! are dispatched concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, instrument, warn};

use crate::controller::{Controller, ServiceControlError};
use crate::datastore::Datastore;
use crate::error_tracker::ErrorTracker;
use crate::profile::ServiceProfile;
use crate::registry::ProfileRegistry;

/// The C7 allocator worker.
pub struct Allocator {
    registry: Arc<ProfileRegistry>,
    controller: Arc<dyn Controller>,
    datastore: Arc<dyn Datastore>,
    error_tracker: Arc<ErrorTracker>,
    period: Duration,
}

impl Allocator {
    /// Build a new allocator, ticking on `period` (spec default 5s).
    pub fn new(
        registry: Arc<ProfileRegistry>,
        controller: Arc<dyn Controller>,
        datastore: Arc<dyn Datastore>,
        error_tracker: Arc<ErrorTracker>,
        period: Duration,
    ) -> Self {
        Self {
            registry,
            controller,
            datastore,
            error_tracker,
            period,
        }
    }

    /// Run the allocator loop until `stop` flips to `true`.
    pub async fn run(&self, mut stop: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        warn!(error = %err, "allocator tick failed");
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

    /// Execute exactly one allocator tick. Per-service orchestrator failures
    /// are recovered locally (reported to the [`ErrorTracker`]) and never
    /// abort the tick; only unexpected errors propagate.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> anyhow::Result<()> {
        let profiles = self.registry.snapshot();
        if profiles.is_empty() {
            return Ok(());
        }
        let is_analysis: HashMap<&str, bool> =
            profiles.iter().map(|p| (p.name.as_str(), p.is_analysis)).collect();

        let mut targets = HashMap::with_capacity(profiles.len());
        for p in &profiles {
            targets.insert(p.name.clone(), self.get_target_or_zero(&p.name, &is_analysis).await);
        }

        // Phase 1 — release.
        let mut writes = Vec::new();
        for p in &profiles {
            if targets[&p.name] > p.desired_instances {
                debug!(service = %p.name, from = targets[&p.name], to = p.desired_instances, "releasing");
                targets.insert(p.name.clone(), p.desired_instances);
                writes.push((p.name.clone(), p.desired_instances));
            }
        }
        self.dispatch(&writes, &is_analysis).await;

        // Phase 2 — floor.
        let mut writes = Vec::new();
        for p in &profiles {
            let min = p.min_instances();
            if targets[&p.name] < min {
                debug!(service = %p.name, from = targets[&p.name], to = min, "raising to minimum");
                targets.insert(p.name.clone(), min);
                writes.push((p.name.clone(), min));
            }
        }
        self.dispatch(&writes, &is_analysis).await;

        // Phase 3 — growth under budget.
        let mut free_cpu = self.controller.free_cpu().await.unwrap_or(0.0);
        let mut free_mem = self.controller.free_memory().await.unwrap_or(0) as f64;
        let mut growth_writes: HashMap<String, u32> = HashMap::new();

        loop {
            let mut candidates: Vec<&ServiceProfile> = profiles
                .iter()
                .filter(|p| p.desired_instances > targets[&p.name])
                .collect();
            if candidates.is_empty() {
                break;
            }

            let dropped: Vec<&str> = candidates
                .iter()
                .filter(|p| p.cpu() > free_cpu || p.ram() as f64 > free_mem)
                .map(|p| p.name.as_str())
                .collect();
            if !dropped.is_empty() {
                debug!(?dropped, free_cpu, free_mem, "insufficient resources to grow further");
            }
            candidates.retain(|p| p.cpu() <= free_cpu && p.ram() as f64 <= free_mem);
            if candidates.is_empty() {
                break;
            }

            // Fewest-running-first: key by the live controller target. `candidates`
            // descends from `profiles`, itself `ProfileRegistry::snapshot()`'s
            // insertion-ordered copy, and filter/retain above preserve that order,
            // so the stable sort's tie-break is the profiles' insertion order.
            let mut keyed = Vec::with_capacity(candidates.len());
            for p in candidates {
                let live = self.get_target_or_zero(&p.name, &is_analysis).await;
                keyed.push((live, p));
            }
            keyed.sort_by_key(|(live, _)| *live);
            let winner = keyed[0].1;

            free_cpu -= winner.cpu();
            free_mem -= winner.ram() as f64;
            let new_value = targets[&winner.name] + 1;
            targets.insert(winner.name.clone(), new_value);
            growth_writes.insert(winner.name.clone(), new_value);
        }

        let writes: Vec<(String, u32)> = growth_writes.into_iter().collect();
        self.dispatch(&writes, &is_analysis).await;

        Ok(())
    }

    async fn get_target_or_zero(&self, name: &str, is_analysis: &HashMap<&str, bool>) -> u32 {
        match self.controller.get_target(name).await {
            Ok(t) => t,
            Err(err) => {
                self.report_failure(err, is_analysis).await;
                0
            }
        }
    }

    async fn report_failure(&self, err: ServiceControlError, is_analysis: &HashMap<&str, bool>) {
        warn!(service = %err.service_name, error = %err.cause, "controller call failed");
        let analysis = is_analysis.get(err.service_name.as_str()).copied().unwrap_or(true);
        if let Err(report_err) = self
            .error_tracker
            .report(&err.service_name, analysis, self.datastore.as_ref())
            .await
        {
            warn!(error = %report_err, "failed to record service error");
        }
    }

    async fn dispatch(&self, writes: &[(String, u32)], is_analysis: &HashMap<&str, bool>) {
        if writes.is_empty() {
            return;
        }
        let futures = writes.iter().map(|(name, value)| {
            let controller = self.controller.clone();
            let name = name.clone();
            let value = *value;
            async move { controller.set_target(&name, value).await }
        });
        for result in join_all(futures).await {
            if let Err(err) = result {
                self.report_failure(err, is_analysis).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ContainerConfig, ServiceProfileConfig};
    use crate::testing::{FakeController, FakeDatastore};

    fn container(cpu: f64, ram: i64) -> ContainerConfig {
        ContainerConfig {
            image: "img".to_string(),
            environment: vec![],
            cpu_cores: cpu,
            ram_mb: ram,
            allow_internet_access: false,
        }
    }

    fn profile(name: &str, cpu: f64, ram: i64, desired: u32, min: u32) -> ServiceProfile {
        let mut p = ServiceProfile::new(ServiceProfileConfig {
            name: name.to_string(),
            container_config: container(cpu, ram),
            config_hash: 0,
            min_instances: min,
            max_instances: None,
            growth: 60.0,
            shrink: None,
            backlog: 500,
            shutdown_seconds: 30,
            is_analysis: true,
        });
        p.desired_instances = desired;
        p.running_instances = desired;
        p
    }

    fn allocator(registry: Arc<ProfileRegistry>, controller: Arc<FakeController>) -> Allocator {
        let datastore = Arc::new(FakeDatastore::new(vec![]));
        let tracker = Arc::new(ErrorTracker::new(Duration::from_secs(3600), 5));
        Allocator::new(registry, controller, datastore, tracker, Duration::from_secs(5))
    }

    // S2 — release first.
    #[tokio::test]
    async fn scenario_release_first_then_grow() {
        let registry = Arc::new(ProfileRegistry::new());
        registry.add(profile("a", 2.0, 1024, 2, 0)).unwrap();
        registry.add(profile("b", 2.0, 1024, 2, 0)).unwrap();

        let controller = Arc::new(FakeController::new());
        controller.set_target("a", 3).await.unwrap();
        controller.set_target("b", 0).await.unwrap();
        controller.set_free(1.0, 8192);

        let allocator = allocator(registry, controller.clone());
        allocator.run_once().await.unwrap();

        assert_eq!(controller.get_target("a").await.unwrap(), 2);
        assert_eq!(controller.get_target("b").await.unwrap(), 1);
    }

    // Property 5 — Phase 2 never reduces a target.
    #[tokio::test]
    async fn floor_phase_never_reduces() {
        let registry = Arc::new(ProfileRegistry::new());
        registry.add(profile("a", 1.0, 512, 3, 3)).unwrap();

        let controller = Arc::new(FakeController::new());
        controller.set_target("a", 5).await.unwrap(); // above desired: would be released, not raised
        controller.set_free(10.0, 10240);

        let allocator = allocator(registry, controller.clone());
        allocator.run_once().await.unwrap();

        // Released down to desired (3), never pushed below the floor (3).
        assert_eq!(controller.get_target("a").await.unwrap(), 3);
    }

    // Property 4 — growth respects the resource budget.
    #[tokio::test]
    async fn growth_respects_budget() {
        let registry = Arc::new(ProfileRegistry::new());
        registry.add(profile("a", 3.0, 1024, 5, 0)).unwrap();

        let controller = Arc::new(FakeController::new());
        controller.set_target("a", 0).await.unwrap();
        controller.set_free(1.0, 8192); // not enough CPU for even one instance

        let allocator = allocator(registry, controller.clone());
        allocator.run_once().await.unwrap();

        assert_eq!(controller.get_target("a").await.unwrap(), 0);
    }

    // Property 6 — idempotence.
    #[tokio::test]
    async fn second_run_is_idempotent() {
        let registry = Arc::new(ProfileRegistry::new());
        registry.add(profile("a", 1.0, 512, 2, 0)).unwrap();

        let controller = Arc::new(FakeController::new());
        controller.set_target("a", 0).await.unwrap();
        controller.set_free(10.0, 10240);

        let allocator = allocator(registry, controller.clone());
        allocator.run_once().await.unwrap();
        assert_eq!(controller.get_target("a").await.unwrap(), 2);

        controller.reset_write_count();
        allocator.run_once().await.unwrap();
        assert_eq!(controller.write_count(), 0);
    }
}
