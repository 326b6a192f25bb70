//! Error types shared across the control plane.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, ScalerError>;

/// Errors that can occur while operating the scaler.
#[derive(Error, Debug)]
pub enum ScalerError {
    /// A per-service failure reported by the orchestrator driver.
    #[error("service control error for {service}: {source}")]
    ServiceControl {
        /// The service the failure is attributed to.
        service: String,
        /// Underlying cause.
        #[source]
        source: anyhow::Error,
    },

    /// Attempted to add a profile that is already present in the registry.
    #[error("profile already present: {0}")]
    AlreadyPresent(String),

    /// A lookup by name found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transient I/O against an external collaborator (datastore, KV, controller).
    #[error("transient I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else, wrapped at a worker boundary.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScalerError {
    /// Build a [`ScalerError::ServiceControl`] from any error-like cause.
    pub fn service_control(service: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        ScalerError::ServiceControl {
            service: service.into(),
            source: source.into(),
        }
    }

    /// The service name attached to this error, if any.
    pub fn service_name(&self) -> Option<&str> {
        match self {
            ScalerError::ServiceControl { service, .. } => Some(service),
            _ => None,
        }
    }
}
