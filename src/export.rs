//! A3 — periodic metric export: one record per managed profile plus one
//! cluster-wide record, handed to a pluggable [`MetricsSink`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::controller::Controller;
use crate::registry::ProfileRegistry;

/// One profile's exported snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ServiceExportRecord<'a> {
    /// Service name.
    pub name: &'a str,
    /// Last observed replica count.
    pub running: u32,
    /// Controller's current intent.
    pub target: u32,
    /// Effective minimum.
    pub minimum: u32,
    /// Configured hard cap (`0` = unbounded, per [`NO_CAP`]).
    pub maximum: i64,
    /// Derived speed-limited maximum for this tick.
    pub dynamic_maximum: u32,
    /// Last observed queue length.
    pub queue: u32,
    /// Last observed duty cycle.
    pub duty_cycle: f64,
    /// Current pressure accumulator.
    pub pressure: f64,
}

/// Cluster-wide resource snapshot.
#[derive(Debug, Clone, Copy)]
pub struct GlobalExportRecord {
    /// Total cluster memory, in megabytes.
    pub memory_total: f64,
    /// Free cluster memory, in megabytes.
    pub memory_free: f64,
    /// Total cluster CPU cores.
    pub cpu_total: f64,
    /// Free cluster CPU cores.
    pub cpu_free: f64,
}

/// Destination for exported records. A logging sink is provided in-tree;
/// production binaries supply a real sink (metrics backend, timeseries DB).
pub trait MetricsSink: Send + Sync {
    /// Emit one service's record.
    fn export_service(&self, record: &ServiceExportRecord<'_>);
    /// Emit the cluster-wide record.
    fn export_global(&self, record: &GlobalExportRecord);
}

/// A [`MetricsSink`] that logs every record at `info`.
pub struct LoggingSink;

impl MetricsSink for LoggingSink {
    fn export_service(&self, record: &ServiceExportRecord<'_>) {
        info!(
            service = record.name,
            running = record.running,
            target = record.target,
            minimum = record.minimum,
            maximum = record.maximum,
            dynamic_maximum = record.dynamic_maximum,
            queue = record.queue,
            duty_cycle = record.duty_cycle,
            pressure = record.pressure,
            "service metrics"
        );
    }

    fn export_global(&self, record: &GlobalExportRecord) {
        info!(
            memory_total = record.memory_total,
            memory_free = record.memory_free,
            cpu_total = record.cpu_total,
            cpu_free = record.cpu_free,
            "cluster metrics"
        );
    }
}

/// The A3 metric exporter worker.
pub struct MetricExporter {
    registry: Arc<ProfileRegistry>,
    controller: Arc<dyn Controller>,
    sink: Arc<dyn MetricsSink>,
    period: Duration,
}

impl MetricExporter {
    /// Build a new exporter, ticking on `period` (`config.periods.export_interval`, default 60s).
    pub fn new(
        registry: Arc<ProfileRegistry>,
        controller: Arc<dyn Controller>,
        sink: Arc<dyn MetricsSink>,
        period: Duration,
    ) -> Self {
        Self {
            registry,
            controller,
            sink,
            period,
        }
    }

    /// Run the exporter loop until `stop` flips to `true`.
    pub async fn run(&self, mut stop: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        warn!(error = %err, "metric export tick failed");
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

    /// Export exactly one round of records.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> anyhow::Result<()> {
        for profile in self.registry.snapshot() {
            let record = ServiceExportRecord {
                name: &profile.name,
                running: profile.running_instances,
                target: profile.desired_instances,
                minimum: profile.min_instances(),
                maximum: profile.instance_limit(),
                dynamic_maximum: profile.max_instances(),
                queue: profile.queue_length,
                duty_cycle: profile.duty_cycle,
                pressure: profile.pressure,
            };
            self.sink.export_service(&record);
        }

        let cpu = self.controller.cpu_info().await?;
        let mem = self.controller.memory_info().await?;
        self.sink.export_global(&GlobalExportRecord {
            memory_total: mem.total,
            memory_free: mem.free,
            cpu_total: cpu.total,
            cpu_free: cpu.free,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ContainerConfig, ServiceProfile, ServiceProfileConfig};
    use crate::testing::FakeController;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        services: Mutex<Vec<String>>,
        globals: Mutex<usize>,
    }

    impl MetricsSink for RecordingSink {
        fn export_service(&self, record: &ServiceExportRecord<'_>) {
            self.services.lock().push(record.name.to_string());
        }

        fn export_global(&self, _record: &GlobalExportRecord) {
            *self.globals.lock() += 1;
        }
    }

    #[tokio::test]
    async fn exports_one_record_per_profile_plus_one_global() {
        let registry = Arc::new(ProfileRegistry::new());
        registry
            .add(ServiceProfile::new(ServiceProfileConfig {
                name: "svc".to_string(),
                container_config: ContainerConfig {
                    image: "img".to_string(),
                    environment: vec![],
                    cpu_cores: 1.0,
                    ram_mb: 512,
                    allow_internet_access: false,
                },
                config_hash: 0,
                min_instances: 0,
                max_instances: None,
                growth: 60.0,
                shrink: None,
                backlog: 500,
                shutdown_seconds: 30,
                is_analysis: true,
            }))
            .unwrap();

        let controller = Arc::new(FakeController::new());
        controller.set_totals(4.0, 8192);
        controller.set_free(2.0, 4096);

        let sink = Arc::new(RecordingSink::default());
        let exporter = MetricExporter::new(registry, controller, sink.clone(), Duration::from_secs(60));
        exporter.run_once().await.unwrap();

        assert_eq!(*sink.services.lock(), vec!["svc".to_string()]);
        assert_eq!(*sink.globals.lock(), 1);
    }
}
