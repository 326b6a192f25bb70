//! Illustrates wiring the control-plane workers end to end against the
//! in-memory fakes (`--features testing`). Not a cargo example target
//! (this crate's `examples/` directory is reserved); run its contents
//! by copying into a small binary crate, or adapt for an integration test.

use std::sync::Arc;
use std::time::Duration;

use scaler_core::allocator::Allocator;
use scaler_core::config::Config;
use scaler_core::error_tracker::ErrorTracker;
use scaler_core::registry::ProfileRegistry;
use scaler_core::testing::{FakeController, FakeDatastore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scaler_core::telemetry::init();

    let config = Config::default();
    let registry = Arc::new(ProfileRegistry::new());
    let controller = Arc::new(FakeController::new());
    let datastore = Arc::new(FakeDatastore::new(vec![]));
    let error_tracker = Arc::new(ErrorTracker::new(config.error_expiry, config.max_service_errors));

    let allocator = Allocator::new(
        registry.clone(),
        controller.clone(),
        datastore.clone(),
        error_tracker,
        config.periods.allocator,
    );

    controller.set_free(4.0, 8192);
    allocator.run_once().await?;

    tokio::time::sleep(Duration::from_millis(1)).await;
    Ok(())
}
