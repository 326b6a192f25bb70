//! End-to-end scenario tests wiring multiple workers together against the
//! in-memory fakes. Requires `--features testing`.

use std::sync::Arc;
use std::time::Duration;

use scaler_core::allocator::Allocator;
use scaler_core::datastore::{Service, UpdateConfig};
use scaler_core::error_tracker::ErrorTracker;
use scaler_core::profile::ContainerConfig;
use scaler_core::registry::ProfileRegistry;
use scaler_core::synchronizer::Synchronizer;
use scaler_core::testing::{FakeController, FakeDatastore};

fn service(name: &str, cpu: f64, ram: i64) -> Service {
    Service {
        name: name.to_string(),
        enabled: true,
        is_analysis: true,
        container_config: ContainerConfig {
            image: "registry/worker:latest".to_string(),
            environment: vec![],
            cpu_cores: cpu,
            ram_mb: ram,
            allow_internet_access: false,
        },
        submission_params: "".to_string(),
        config: Default::default(),
        dependencies: Default::default(),
        update_config: Some(UpdateConfig { wait_for_update: false }),
        licence_count: 0,
        timeout: 60,
    }
}

// A newly-catalogued service is brought up by the synchronizer, then the
// allocator grows it under an ample budget.
#[tokio::test]
async fn synchronizer_then_allocator_brings_a_new_service_up() {
    let registry = Arc::new(ProfileRegistry::new());
    let controller = Arc::new(FakeController::new());
    let datastore = Arc::new(FakeDatastore::new(vec![service("svc", 1.0, 512)]));
    let error_tracker = Arc::new(ErrorTracker::new(Duration::from_secs(3600), 5));

    let synchronizer = Synchronizer::new(
        registry.clone(),
        controller.clone(),
        datastore.clone(),
        error_tracker.clone(),
        Default::default(),
        vec![],
        Duration::from_secs(30),
    );

    // First pass: Off -> Running.
    synchronizer.run_once().await.unwrap();
    // Second pass: Running -> profile created.
    synchronizer.run_once().await.unwrap();
    assert!(registry.contains("svc"));

    registry.with_profile("svc", |p| p.desired_instances = 2);
    controller.set_free(4.0, 8192);

    let allocator = Allocator::new(registry.clone(), controller.clone(), datastore, error_tracker, Duration::from_secs(5));
    allocator.run_once().await.unwrap();

    assert_eq!(controller.get_target("svc").await.unwrap(), 2);
}

// Removing a service from the catalog mid-flight zeroes its target and drops
// the profile within one synchronizer cycle.
#[tokio::test]
async fn removed_service_is_torn_down_within_one_cycle() {
    let registry = Arc::new(ProfileRegistry::new());
    let controller = Arc::new(FakeController::new());
    let datastore = Arc::new(FakeDatastore::new(vec![service("svc", 1.0, 512)]));
    let error_tracker = Arc::new(ErrorTracker::new(Duration::from_secs(3600), 5));

    let synchronizer = Synchronizer::new(
        registry.clone(),
        controller.clone(),
        datastore.clone(),
        error_tracker,
        Default::default(),
        vec![],
        Duration::from_secs(30),
    );

    synchronizer.run_once().await.unwrap();
    synchronizer.run_once().await.unwrap();
    assert!(registry.contains("svc"));

    datastore.set_services(vec![]);
    synchronizer.run_once().await.unwrap();

    assert!(!registry.contains("svc"));
    assert_eq!(controller.get_target("svc").await.unwrap(), 0);
}
