//! The `Datastore` trait: the boundary to the persistent service catalog.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::controller::DependencySpec;
use crate::profile::ContainerConfig;

/// Lifecycle phase of a managed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Not running; no resources allocated.
    Off,
    /// Transitioning, e.g. waiting on a pre-warm step.
    Update,
    /// Fully running and eligible for scaling.
    Running,
}

/// Update-time configuration knobs for a service.
#[derive(Debug, Clone, Default)]
pub struct UpdateConfig {
    /// Whether the service must reach `Update` stage before `Running`.
    pub wait_for_update: bool,
}

/// A service definition as read from the catalog.
#[derive(Debug, Clone)]
pub struct Service {
    /// Unique service name.
    pub name: String,
    /// Whether the service should be running at all.
    pub enabled: bool,
    /// Whether this is an "analysis" service (vs. a core/infrastructure one).
    /// Errors from core services are never auto-disabling.
    pub is_analysis: bool,
    /// Container spec before variable substitution / default env merge.
    pub container_config: ContainerConfig,
    /// Non-container submission parameters, folded into `config_hash`.
    pub submission_params: String,
    /// Arbitrary config key/value pairs, folded into `config_hash`.
    pub config: HashMap<String, String>,
    /// Declared stateful dependencies, keyed by container name.
    pub dependencies: HashMap<String, DependencySpec>,
    /// Update-time configuration.
    pub update_config: Option<UpdateConfig>,
    /// `0` means unbounded.
    pub licence_count: u32,
    /// Task timeout, in seconds; profiles get `timeout + 30` graceful-stop budget.
    pub timeout: u32,
}

/// A single field assignment applied to a service's delta record.
#[derive(Debug, Clone)]
pub enum ServiceDeltaOp {
    /// Set a named field to a value.
    Set { field: String, value: String },
}

/// The persistent service catalog (external collaborator).
#[async_trait]
pub trait Datastore: Send + Sync {
    /// List every known service definition.
    async fn list_all_services(&self) -> anyhow::Result<Vec<Service>>;

    /// Apply field updates to a service's delta record (e.g. disabling it).
    async fn update_service_delta(&self, name: &str, ops: Vec<ServiceDeltaOp>) -> anyhow::Result<()>;

    /// Read the current lifecycle stage for a service.
    async fn get_service_stage(&self, name: &str) -> anyhow::Result<Stage>;

    /// Persist a new lifecycle stage for a service.
    async fn set_service_stage(&self, name: &str, stage: Stage) -> anyhow::Result<()>;
}

/// Convenience constructor for the common "disable this service" delta.
pub fn disable_delta() -> Vec<ServiceDeltaOp> {
    vec![ServiceDeltaOp::Set {
        field: "enabled".to_string(),
        value: "false".to_string(),
    }]
}
