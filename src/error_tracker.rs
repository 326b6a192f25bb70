//! Sliding-window error counter per service; disables a service in the
//! catalog once it crosses the error threshold within the tracking window.
//!
//! Errors from core (non-analysis) services are logged only — core
//! components are expected to be retried forever rather than auto-disabled.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::datastore::{disable_delta, Datastore};

/// Per-service sliding window of error timestamps, with disable-on-threshold.
pub struct ErrorTracker {
    window: Duration,
    threshold: usize,
    errors: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl ErrorTracker {
    /// Build a tracker with the given expiry window and disable threshold.
    pub fn new(window: Duration, threshold: usize) -> Self {
        Self {
            window,
            threshold,
            errors: Mutex::new(HashMap::new()),
        }
    }

    /// Record an error for `service`. Core services are logged only; analysis
    /// services accumulate in the window and trigger a disable once the
    /// retained count reaches the threshold, after which the window is
    /// cleared. Returns whether this call triggered a disable.
    pub async fn report(&self, service: &str, is_analysis: bool, datastore: &dyn Datastore) -> anyhow::Result<bool> {
        if !is_analysis {
            warn!(service, "error in core service, retrying indefinitely");
            return Ok(false);
        }

        let should_disable = {
            let mut guard = self.errors.lock();
            let window = self.window;
            let now = Utc::now();
            let entry = guard.entry(service.to_string()).or_default();
            entry.push_back(now);
            while let Some(front) = entry.front() {
                if now.signed_duration_since(*front) > chrono::Duration::from_std(window).unwrap_or_default() {
                    entry.pop_front();
                } else {
                    break;
                }
            }
            let disable = entry.len() >= self.threshold;
            if disable {
                guard.remove(service);
            }
            disable
        };

        if should_disable {
            warn!(service, "disabling analysis service after repeated errors");
            datastore
                .update_service_delta(service, disable_delta())
                .await?;
        } else {
            info!(service, "recorded analysis service error");
        }

        Ok(should_disable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{Service, ServiceDeltaOp, Stage};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    struct RecordingDatastore {
        calls: Arc<AsyncMutex<Vec<(String, Vec<ServiceDeltaOp>)>>>,
    }

    #[async_trait]
    impl Datastore for RecordingDatastore {
        async fn list_all_services(&self) -> anyhow::Result<Vec<Service>> {
            Ok(vec![])
        }

        async fn update_service_delta(&self, name: &str, ops: Vec<ServiceDeltaOp>) -> anyhow::Result<()> {
            self.calls.lock().await.push((name.to_string(), ops));
            Ok(())
        }

        async fn get_service_stage(&self, _name: &str) -> anyhow::Result<Stage> {
            Ok(Stage::Running)
        }

        async fn set_service_stage(&self, _name: &str, _stage: Stage) -> anyhow::Result<()> {
            Ok(())
        }
    }

    // S4 / property 8 — five errors within the window disables exactly once.
    #[tokio::test]
    async fn five_errors_disable_exactly_once() {
        let calls = Arc::new(AsyncMutex::new(Vec::new()));
        let ds = RecordingDatastore { calls: calls.clone() };
        let tracker = ErrorTracker::new(Duration::from_secs(3600), 5);

        for i in 0..5 {
            let disabled = tracker.report("svc", true, &ds).await.unwrap();
            assert_eq!(disabled, i == 4);
        }
        assert_eq!(calls.lock().await.len(), 1);

        // A sixth call starts a fresh window; it should not disable again immediately.
        let disabled = tracker.report("svc", true, &ds).await.unwrap();
        assert!(!disabled);
        assert_eq!(calls.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn core_service_errors_never_disable() {
        let calls = Arc::new(AsyncMutex::new(Vec::new()));
        let ds = RecordingDatastore { calls: calls.clone() };
        let tracker = ErrorTracker::new(Duration::from_secs(3600), 5);

        for _ in 0..10 {
            let disabled = tracker.report("core-svc", false, &ds).await.unwrap();
            assert!(!disabled);
        }
        assert!(calls.lock().await.is_empty());
    }
}
