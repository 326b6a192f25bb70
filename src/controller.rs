//! The `Controller` trait: the boundary to the container-orchestrator driver
//! (Docker or Kubernetes). Concrete drivers are external collaborators; this
//! module only defines the interface the control loops program against.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::profile::ServiceProfile;

/// A per-service failure raised by the orchestrator driver.
#[derive(Debug, thiserror::Error)]
#[error("orchestrator failure for {service_name}: {cause}")]
pub struct ServiceControlError {
    /// The service the failure is attributed to.
    pub service_name: String,
    /// Underlying cause.
    #[source]
    pub cause: anyhow::Error,
}

impl ServiceControlError {
    /// Build a new controller failure.
    pub fn new(service_name: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self {
            service_name: service_name.into(),
            cause: cause.into(),
        }
    }
}

/// Result type for controller operations.
pub type ControllerResult<T> = std::result::Result<T, ServiceControlError>;

/// A stateful auxiliary container spec, started on behalf of a service.
#[derive(Debug, Clone)]
pub struct DependencySpec {
    /// Container image for the dependency.
    pub image: String,
    /// Environment variables.
    pub environment: Vec<(String, String)>,
}

/// Free vs. total resource readout.
#[derive(Debug, Clone, Copy)]
pub struct ResourceInfo {
    /// Currently free.
    pub free: f64,
    /// Cluster total.
    pub total: f64,
}

/// A classification-asset mount request.
#[derive(Debug, Clone)]
pub struct ConfigMount {
    /// Name of the mount (Kubernetes: configmap name).
    pub config_map: String,
    /// Key within the map.
    pub key: String,
    /// Path inside the container to mount at.
    pub target_path: String,
}

/// The container-orchestrator driver abstraction (Docker or Kubernetes).
///
/// Implementations perform network I/O and may be slow; every call here
/// should be treated as a potentially-blocking operation by callers.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Register a freshly discovered profile with the driver.
    async fn add_profile(&self, profile: &ServiceProfile) -> ControllerResult<()>;

    /// Restart a service whose container spec or config hash changed.
    async fn restart(&self, profile: &ServiceProfile) -> ControllerResult<()>;

    /// Stop one specific container.
    async fn stop_container(&self, service: &str, container: &str) -> ControllerResult<()>;

    /// Stop every container matching the given label selector.
    async fn stop_containers(&self, labels: &HashMap<String, String>) -> ControllerResult<()>;

    /// The orchestrator's persisted replica intent for `name`.
    async fn get_target(&self, name: &str) -> ControllerResult<u32>;

    /// Persist a new replica intent for `name`.
    async fn set_target(&self, name: &str, target: u32) -> ControllerResult<()>;

    /// Cluster-wide free CPU cores.
    async fn free_cpu(&self) -> ControllerResult<f64>;

    /// Cluster-wide free memory, in megabytes.
    async fn free_memory(&self) -> ControllerResult<i64>;

    /// CPU `(free, total)`.
    async fn cpu_info(&self) -> ControllerResult<ResourceInfo>;

    /// Memory `(free, total)`, in megabytes.
    async fn memory_info(&self) -> ControllerResult<ResourceInfo>;

    /// Names of every container currently known to be running.
    async fn get_running_container_names(&self) -> ControllerResult<Vec<String>>;

    /// Drain any newly observed orchestrator events, non-blocking.
    async fn new_events(&self) -> ControllerResult<Vec<String>>;

    /// Prepare networking for a service before its containers start.
    async fn prepare_network(&self, service_name: &str, allow_internet: bool) -> ControllerResult<()>;

    /// Start a stateful auxiliary container on behalf of a service.
    async fn start_stateful_container(
        &self,
        service_name: &str,
        container_name: &str,
        spec: &DependencySpec,
        labels: &HashMap<String, String>,
    ) -> ControllerResult<()>;

    /// Register a classification-asset mount, applied to every managed container.
    async fn config_mount(&self, name: &str, mount: ConfigMount) -> ControllerResult<()>;

    /// Release the driver's own resources (connections, watch tasks). Called once,
    /// after the supervisor has joined every worker.
    async fn stop(&self) -> ControllerResult<()>;
}
