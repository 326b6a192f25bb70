//! Autoscaling control plane for a fleet of analysis worker services running
//! on a container orchestrator (Kubernetes or Docker).
//!
//! For each managed service the crate maintains a [`profile::ServiceProfile`]
//! (resource requirements, instance bounds, queue binding) and continuously
//! decides how many replicas should run, instructing the orchestrator
//! ([`controller::Controller`]) accordingly. It also retires timed-out work
//! items and rolls per-host health samples into the profiles that drive
//! scaling decisions.
//!
//! The container-orchestrator driver, the persistent service catalog, and the
//! key/value + queue substrate are external collaborators: this crate defines
//! the trait boundaries ([`controller::Controller`], [`datastore::Datastore`],
//! [`kv`]) a host binary implements and wires in.

pub mod allocator;
pub mod config;
pub mod controller;
pub mod datastore;
pub mod error;
pub mod error_tracker;
pub mod event_logger;
pub mod export;
pub mod ingestor;
pub mod janitor;
pub mod kv;
pub mod metrics;
pub mod profile;
pub mod reaper;
pub mod registry;
pub mod supervisor;
pub mod synchronizer;
pub mod telemetry;

/// In-memory fakes for `Controller`/`Datastore`/`KV`. Enabled for the crate's
/// own tests and, via the `testing` feature, for downstream integration tests
/// and demos that want to exercise the workers without a real orchestrator.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use allocator::Allocator;
pub use config::{load_config, Config};
pub use error::{Result, ScalerError};
pub use error_tracker::ErrorTracker;
pub use event_logger::ContainerEventLogger;
pub use export::MetricExporter;
pub use ingestor::MetricIngestor;
pub use janitor::StatusJanitor;
pub use metrics::MetricsAggregator;
pub use profile::ServiceProfile;
pub use reaper::TimeoutReaper;
pub use registry::ProfileRegistry;
pub use supervisor::Supervisor;
pub use synchronizer::Synchronizer;
