//! Rolls per-host status samples up into a per-service `(throughput, duty_cycle)`
//! reading, on a rolling window.

use std::collections::HashMap;

use parking_lot::Mutex;

/// One service's accumulated observation over the current window.
#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    throughput: f64,
    busy_seconds: f64,
    window_seconds: f64,
}

/// A read out of the aggregator: throughput and the fraction of the window
/// hosts spent busy.
#[derive(Debug, Clone, Copy)]
pub struct AggregatedMetric {
    /// Summed throughput samples.
    pub throughput: f64,
    /// Duty cycle: busy_seconds / window_seconds, clamped to `[0, 1]`.
    pub duty_cycle: f64,
}

/// Accumulates per-host samples into per-service readings over a rolling window.
pub struct MetricsAggregator {
    period: f64,
    state: Mutex<HashMap<String, Accumulator>>,
}

impl MetricsAggregator {
    /// Create an aggregator whose window is `period` seconds (the export interval).
    pub fn new(period_seconds: f64) -> Self {
        Self {
            period: period_seconds,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Feed one host sample for `service`.
    pub fn update(&self, service: &str, _host: &str, throughput: f64, busy_seconds: f64) {
        let mut guard = self.state.lock();
        let entry = guard.entry(service.to_string()).or_default();
        entry.throughput += throughput;
        entry.busy_seconds += busy_seconds;
        entry.window_seconds += self.period;
    }

    /// Read and clear the accumulated value for `service`, if any samples arrived.
    pub fn read(&self, service: &str) -> Option<AggregatedMetric> {
        let mut guard = self.state.lock();
        let acc = guard.remove(service)?;
        if acc.window_seconds <= 0.0 {
            return None;
        }
        Some(AggregatedMetric {
            throughput: acc.throughput,
            duty_cycle: (acc.busy_seconds / acc.window_seconds).clamp(0.0, 1.0),
        })
    }
}
