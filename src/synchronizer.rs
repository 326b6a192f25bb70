//! C5 — periodically reconciles [`ProfileRegistry`] against the service catalog.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::config::ServiceDefaults;
use crate::controller::{Controller, ServiceControlError};
use crate::datastore::{Datastore, Service, Stage};
use crate::error_tracker::ErrorTracker;
use crate::profile::{ContainerConfig, ServiceProfile, ServiceProfileConfig};
use crate::registry::ProfileRegistry;

/// The C5 synchronizer worker.
pub struct Synchronizer {
    registry: Arc<ProfileRegistry>,
    controller: Arc<dyn Controller>,
    datastore: Arc<dyn Datastore>,
    error_tracker: Arc<ErrorTracker>,
    defaults: ServiceDefaults,
    default_environment: Vec<(String, String)>,
    period: Duration,
}

impl Synchronizer {
    /// Build a new synchronizer, ticking on `period` (spec default 30s).
    pub fn new(
        registry: Arc<ProfileRegistry>,
        controller: Arc<dyn Controller>,
        datastore: Arc<dyn Datastore>,
        error_tracker: Arc<ErrorTracker>,
        defaults: ServiceDefaults,
        default_environment: Vec<(String, String)>,
        period: Duration,
    ) -> Self {
        Self {
            registry,
            controller,
            datastore,
            error_tracker,
            defaults,
            default_environment,
            period,
        }
    }

    /// Run the synchronizer loop until `stop` flips to `true`.
    pub async fn run(&self, mut stop: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        warn!(error = %err, "synchronizer tick failed");
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

    /// Execute exactly one reconciliation pass.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> anyhow::Result<()> {
        let services = self.datastore.list_all_services().await?;
        let mut seen: HashSet<String> = HashSet::with_capacity(services.len());

        for service in &services {
            seen.insert(service.name.clone());
            if let Err(err) = self.reconcile_one(service).await {
                self.report_failure(err, service.is_analysis).await;
            }
        }

        // Remove strays: anything still registered but absent from this cycle's catalog.
        let strays: Vec<String> = self
            .registry
            .names()
            .into_iter()
            .filter(|name| !seen.contains(name))
            .collect();
        for name in strays {
            debug!(service = %name, "stopping stray profile not present in catalog");
            let stage = match self.datastore.get_service_stage(&name).await {
                Ok(stage) => stage,
                Err(err) => {
                    self.report_failure(ServiceControlError::new(&name, err), true).await;
                    continue;
                }
            };
            if let Err(err) = self.stop_service(&name, stage).await {
                self.report_failure(err, true).await;
            }
        }

        Ok(())
    }

    async fn reconcile_one(&self, service: &Service) -> Result<(), ServiceControlError> {
        let stage = self
            .datastore
            .get_service_stage(&service.name)
            .await
            .map_err(|e| ServiceControlError::new(&service.name, e))?;

        if !service.enabled {
            return self.stop_service(&service.name, stage).await;
        }

        match stage {
            Stage::Off => self.bring_up(service).await,
            Stage::Update => Ok(()),
            Stage::Running => self.reconcile_running(service).await,
        }
    }

    async fn bring_up(&self, service: &Service) -> Result<(), ServiceControlError> {
        self.controller
            .prepare_network(&service.name, service.container_config.allow_internet_access)
            .await?;

        for (container_name, spec) in &service.dependencies {
            let labels = HashMap::from([("dependency_for".to_string(), service.name.clone())]);
            self.controller
                .start_stateful_container(&service.name, container_name, spec, &labels)
                .await?;
        }

        let wait_for_update = service
            .update_config
            .as_ref()
            .map(|c| c.wait_for_update)
            .unwrap_or(false);
        let next_stage = if wait_for_update { Stage::Update } else { Stage::Running };
        self.datastore
            .set_service_stage(&service.name, next_stage)
            .await
            .map_err(|e| ServiceControlError::new(&service.name, e))
    }

    async fn reconcile_running(&self, service: &Service) -> Result<(), ServiceControlError> {
        let container_config = ContainerConfig {
            image: substitute_variables(&service.container_config.image),
            environment: merge_environment(&service.container_config.environment, &self.default_environment),
            cpu_cores: service.container_config.cpu_cores,
            ram_mb: service.container_config.ram_mb,
            allow_internet_access: service.container_config.allow_internet_access,
        };
        let config_hash = compute_config_hash(&service.config, &service.submission_params);
        let max_instances_cap = if service.licence_count == 0 {
            None
        } else {
            Some(service.licence_count)
        };

        if !self.registry.contains(&service.name) {
            self.add_service(service, container_config, config_hash, max_instances_cap)
                .await
        } else {
            self.update_service(service, container_config, config_hash, max_instances_cap)
                .await
        }
    }

    async fn add_service(
        &self,
        service: &Service,
        container_config: ContainerConfig,
        config_hash: u64,
        max_instances_cap: Option<u32>,
    ) -> Result<(), ServiceControlError> {
        let target = self.controller.get_target(&service.name).await?;
        let mut profile = ServiceProfile::new(ServiceProfileConfig {
            name: service.name.clone(),
            container_config,
            config_hash,
            min_instances: self.defaults.min_instances,
            max_instances: max_instances_cap,
            growth: self.defaults.growth,
            shrink: self.defaults.shrink,
            backlog: self.defaults.backlog,
            shutdown_seconds: service.timeout + 30,
            is_analysis: service.is_analysis,
        });
        profile.desired_instances = target.max(profile.min_instances());
        profile.running_instances = target;

        self.controller.add_profile(&profile).await?;
        if self.registry.add(profile).is_err() {
            warn!(service = %service.name, "profile appeared concurrently, skipping add");
        }
        Ok(())
    }

    async fn update_service(
        &self,
        service: &Service,
        container_config: ContainerConfig,
        config_hash: u64,
        max_instances_cap: Option<u32>,
    ) -> Result<(), ServiceControlError> {
        let needs_restart = self
            .registry
            .with_profile(&service.name, |p| {
                let changed = p.container_config != container_config || p.config_hash != config_hash;
                if changed {
                    p.container_config = container_config.clone();
                    p.config_hash = config_hash;
                }
                p.set_max_instances_cap(max_instances_cap);
                changed
            })
            .unwrap_or(false);

        if needs_restart {
            let snapshot = self.registry.with_profile(&service.name, |p| p.clone());
            if let Some(profile) = snapshot {
                debug!(service = %service.name, "container spec or config hash changed, restarting");
                self.controller.restart(&profile).await?;
            }
        }
        Ok(())
    }

    /// `stop_service(name, stage)` per spec §4.3: stop dependency containers if
    /// not already `Off`, then zero and drop the profile if it has any trace.
    async fn stop_service(&self, name: &str, stage: Stage) -> Result<(), ServiceControlError> {
        if stage != Stage::Off {
            let labels = HashMap::from([("dependency_for".to_string(), name.to_string())]);
            self.controller.stop_containers(&labels).await?;
            self.datastore
                .set_service_stage(name, Stage::Off)
                .await
                .map_err(|e| ServiceControlError::new(name, e))?;
        }

        let target = self.controller.get_target(name).await?;
        if self.registry.contains(name) || target != 0 {
            self.controller.set_target(name, 0).await?;
            self.registry.remove(name);
        }
        Ok(())
    }

    async fn report_failure(&self, err: ServiceControlError, is_analysis: bool) {
        warn!(service = %err.service_name, error = %err.cause, "synchronizer controller call failed");
        if let Err(report_err) = self
            .error_tracker
            .report(&err.service_name, is_analysis, self.datastore.as_ref())
            .await
        {
            warn!(error = %report_err, "failed to record service error");
        }
    }
}

/// Substitute known placeholders (e.g. `${NAMESPACE}`) in a container image
/// reference from the process environment, leaving unknown placeholders untouched.
fn substitute_variables(image: &str) -> String {
    let mut result = image.to_string();
    for (key, value) in std::env::vars() {
        result = result.replace(&format!("${{{key}}}"), &value);
    }
    result
}

/// Merge default environment entries in, without overriding anything the
/// service already set explicitly.
fn merge_environment(
    explicit: &[(String, String)],
    defaults: &[(String, String)],
) -> Vec<(String, String)> {
    let mut merged = explicit.to_vec();
    let set: HashSet<&str> = explicit.iter().map(|(k, _)| k.as_str()).collect();
    for (key, value) in defaults {
        if !set.contains(key.as_str()) {
            merged.push((key.clone(), value.clone()));
        }
    }
    merged
}

/// Digest the sorted config map plus submission params into the restart-detection hash.
fn compute_config_hash(config: &HashMap<String, String>, submission_params: &str) -> u64 {
    let mut entries: Vec<(&String, &String)> = config.iter().collect();
    entries.sort_by_key(|(k, _)| k.as_str());

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for (k, v) in entries {
        k.hash(&mut hasher);
        v.hash(&mut hasher);
    }
    submission_params.hash(&mut hasher);
    hasher.finish()
}
