//! Layered configuration: defaults → optional TOML file → environment overrides.
//!
//! Loading hierarchy mirrors the rest of the fleet's configuration crates: start
//! from hard-coded defaults, merge in a config file if one is present, then let
//! environment variables win so operators can override a single knob without
//! touching the file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, ScalerError};

/// Which orchestrator driver the process should talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterDriver {
    /// Kubernetes driver, selected when `KUBERNETES_AL_CONFIG` is set.
    Kubernetes,
    /// Docker driver, the default.
    Docker,
}

/// Classification asset mount settings, consumed by the Controller's mount surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationMount {
    /// Host path to mount directly (Docker driver).
    pub host_path: Option<String>,
    /// ConfigMap name to mount (Kubernetes driver).
    pub configmap: Option<String>,
    /// Key within the configmap holding the classification file.
    pub configmap_key: String,
}

impl Default for ClassificationMount {
    fn default() -> Self {
        Self {
            host_path: None,
            configmap: None,
            configmap_key: "classification.yml".to_string(),
        }
    }
}

/// Default parameters handed to every newly-discovered [`crate::profile::ServiceProfile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefaults {
    /// Configured floor on instance count.
    pub min_instances: u32,
    /// Growth threshold (seconds-ish units).
    pub growth: f64,
    /// Shrink threshold; `None` derives `-growth/2`.
    pub shrink: Option<f64>,
    /// Backlog reference used to normalize pressure.
    pub backlog: u32,
}

impl Default for ServiceDefaults {
    fn default() -> Self {
        Self {
            min_instances: 0,
            growth: 600.0,
            shrink: None,
            backlog: 500,
        }
    }
}

/// Worker cadences, all overridable for tests that need faster ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Periods {
    /// Synchronizer reconciliation period. Spec default 30s.
    pub synchronizer: Duration,
    /// Metric ingestion period. Spec default 0.5s.
    pub ingestor: Duration,
    /// Allocator tick period. Spec default 5s.
    pub allocator: Duration,
    /// Status janitor sweep period. Spec default 5s.
    pub janitor: Duration,
    /// Timeout reaper blocking-pop timeout. Spec default 1s.
    pub reaper_poll_timeout: Duration,
    /// Container event logger poll period. Spec default 5s.
    pub event_logger: Duration,
    /// Supervisor restart-check period. Spec default 2s.
    pub supervisor_restart: Duration,
    /// Heartbeat cadence; must stay ≤ 2s per the liveness contract.
    pub heartbeat: Duration,
    /// Metric export cadence (`config.logging.export_interval`).
    pub export_interval: Duration,
}

impl Default for Periods {
    fn default() -> Self {
        Self {
            synchronizer: Duration::from_secs(30),
            ingestor: Duration::from_millis(500),
            allocator: Duration::from_secs(5),
            janitor: Duration::from_secs(5),
            reaper_poll_timeout: Duration::from_secs(1),
            event_logger: Duration::from_secs(5),
            supervisor_restart: Duration::from_secs(2),
            heartbeat: Duration::from_secs(2),
            export_interval: Duration::from_secs(60),
        }
    }
}

/// Top-level process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Which driver to construct.
    pub driver: ClusterDriver,
    /// Kubernetes namespace / Docker prefix.
    pub namespace: String,
    /// Host name reported on exported metrics.
    pub hostname: String,
    /// Classification mount settings.
    pub classification: ClassificationMount,
    /// Defaults applied to newly discovered services.
    pub service_defaults: ServiceDefaults,
    /// Worker cadences.
    pub periods: Periods,
    /// Error window length before disabling an analysis service.
    pub error_expiry: Duration,
    /// Number of errors within the window before a service is disabled.
    pub max_service_errors: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: ClusterDriver::Docker,
            namespace: "al".to_string(),
            hostname: "localhost".to_string(),
            classification: ClassificationMount::default(),
            service_defaults: ServiceDefaults::default(),
            periods: Periods::default(),
            error_expiry: Duration::from_secs(3600),
            max_service_errors: 5,
        }
    }
}

/// File representation of [`Config`]; all fields optional so a partial TOML file
/// only overrides what it mentions, leaving the rest at their defaults.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    namespace: Option<String>,
    error_expiry_seconds: Option<u64>,
    max_service_errors: Option<usize>,
    service_defaults: Option<ServiceDefaultsFile>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceDefaultsFile {
    min_instances: Option<u32>,
    growth: Option<f64>,
    shrink: Option<f64>,
    backlog: Option<u32>,
}

/// Load configuration: defaults → optional TOML file → environment overrides → validate.
pub fn load_config(file_path: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(path) = file_path {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| ScalerError::Config(format!("reading {}: {e}", path.display())))?;
            let file: FileConfig = toml::from_str(&content)
                .map_err(|e| ScalerError::Config(format!("parsing {}: {e}", path.display())))?;
            apply_file_overrides(&mut config, file);
        }
    }

    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

fn apply_file_overrides(config: &mut Config, file: FileConfig) {
    if let Some(namespace) = file.namespace {
        config.namespace = namespace;
    }
    if let Some(seconds) = file.error_expiry_seconds {
        config.error_expiry = Duration::from_secs(seconds);
    }
    if let Some(max) = file.max_service_errors {
        config.max_service_errors = max;
    }
    if let Some(defaults) = file.service_defaults {
        if let Some(v) = defaults.min_instances {
            config.service_defaults.min_instances = v;
        }
        if let Some(v) = defaults.growth {
            config.service_defaults.growth = v;
        }
        if defaults.shrink.is_some() {
            config.service_defaults.shrink = defaults.shrink;
        }
        if let Some(v) = defaults.backlog {
            config.service_defaults.backlog = v;
        }
    }
}

fn apply_env_overrides(config: &mut Config) {
    if std::env::var_os("KUBERNETES_AL_CONFIG").is_some() {
        config.driver = ClusterDriver::Kubernetes;
    } else {
        config.driver = ClusterDriver::Docker;
    }

    if let Ok(namespace) = std::env::var("NAMESPACE") {
        config.namespace = namespace;
    }

    if let Ok(hostname) = std::env::var("HOSTNAME") {
        config.hostname = hostname;
    }

    config.classification.host_path = std::env::var("CLASSIFICATION_HOST_PATH").ok();
    config.classification.configmap = std::env::var("CLASSIFICATION_CONFIGMAP").ok();
    if let Ok(key) = std::env::var("CLASSIFICATION_CONFIGMAP_KEY") {
        config.classification.configmap_key = key;
    }
}

/// Validate the loaded configuration, rejecting nonsensical tunables.
pub fn validate_config(config: &Config) -> Result<()> {
    if config.service_defaults.growth <= 0.0 {
        return Err(ScalerError::Config(
            "service_defaults.growth must be > 0".to_string(),
        ));
    }
    if let Some(shrink) = config.service_defaults.shrink {
        if shrink >= 0.0 {
            return Err(ScalerError::Config(
                "service_defaults.shrink must be < 0".to_string(),
            ));
        }
    }
    if config.max_service_errors == 0 {
        return Err(ScalerError::Config(
            "max_service_errors must be > 0".to_string(),
        ));
    }
    for (name, period) in [
        ("synchronizer", config.periods.synchronizer),
        ("ingestor", config.periods.ingestor),
        ("allocator", config.periods.allocator),
        ("janitor", config.periods.janitor),
        ("event_logger", config.periods.event_logger),
        ("supervisor_restart", config.periods.supervisor_restart),
        ("heartbeat", config.periods.heartbeat),
        ("export_interval", config.periods.export_interval),
    ] {
        if period.is_zero() {
            return Err(ScalerError::Config(format!("period {name} must be > 0")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        validate_config(&Config::default()).expect("defaults must validate");
    }

    #[test]
    fn rejects_nonpositive_growth() {
        let mut config = Config::default();
        config.service_defaults.growth = 0.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_nonnegative_shrink() {
        let mut config = Config::default();
        config.service_defaults.shrink = Some(0.0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn file_overrides_merge_over_defaults() {
        let mut config = Config::default();
        let file = FileConfig {
            namespace: Some("custom".to_string()),
            error_expiry_seconds: Some(120),
            max_service_errors: None,
            service_defaults: Some(ServiceDefaultsFile {
                min_instances: Some(2),
                growth: None,
                shrink: None,
                backlog: None,
            }),
        };
        apply_file_overrides(&mut config, file);
        assert_eq!(config.namespace, "custom");
        assert_eq!(config.error_expiry, Duration::from_secs(120));
        assert_eq!(config.service_defaults.min_instances, 2);
        // Unset fields retain their defaults.
        assert_eq!(config.service_defaults.growth, 600.0);
    }
}
