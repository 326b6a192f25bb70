//! Per-service controller state and the pressure-based scaling algorithm.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque container specification, consumed by the [`crate::controller::Controller`].
///
/// Two profiles compare equal (for restart-detection purposes) iff all fields
/// are equal, matching the original `DockerConfig` equality contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Container image reference, already variable-substituted.
    pub image: String,
    /// Environment variables to set in the container.
    pub environment: Vec<(String, String)>,
    /// CPU cores requested.
    pub cpu_cores: f64,
    /// RAM requested, in megabytes.
    pub ram_mb: i64,
    /// Whether the container may reach the public internet.
    pub allow_internet_access: bool,
}

/// Sentinel used when reporting `instance_limit`: `0` means "no cap".
pub const NO_CAP: i64 = 0;

/// Per-service controller state and scaling configuration.
#[derive(Debug, Clone)]
pub struct ServiceProfile {
    /// Unique service name.
    pub name: String,
    /// Instructions handed to the controller when starting/restarting the service.
    pub container_config: ContainerConfig,
    /// Digest of non-container fields that still require a restart on change.
    pub config_hash: u64,

    min_instances_floor: u32,
    /// Effective minimum, recomputed on every `update`.
    min_instances: u32,
    max_instances_cap: Option<u32>,

    /// Controller's current intent for replica count.
    pub desired_instances: u32,
    /// Last observed replica count.
    pub running_instances: u32,

    /// Leaky-integrator pressure accumulator.
    pub pressure: f64,
    /// Threshold above which pressure triggers a scale-up.
    pub growth_threshold: f64,
    /// Threshold below which pressure triggers a scale-down (negative).
    pub shrink_threshold: f64,
    /// Magnitude pulled toward zero per second.
    pub leak_rate: f64,

    /// Queue length considered "normal" saturation.
    pub backlog_reference: u32,
    /// Target fraction of time workers should be busy.
    pub target_duty_cycle: f64,

    /// Last observed queue length.
    pub queue_length: u32,
    /// Last observed duty cycle.
    pub duty_cycle: f64,
    /// Wall-clock time of the last `update` call.
    pub last_update: DateTime<Utc>,

    /// Advisory upper bound on graceful-stop latency.
    pub shutdown_seconds: u32,

    /// Whether this is an analysis service (vs. core/infrastructure). Only
    /// analysis services are auto-disabled by the [`crate::error_tracker::ErrorTracker`].
    pub is_analysis: bool,
}

/// Builder-style configuration for constructing a new [`ServiceProfile`].
#[derive(Debug, Clone)]
pub struct ServiceProfileConfig {
    /// Unique service name.
    pub name: String,
    /// Container spec handed to the controller.
    pub container_config: ContainerConfig,
    /// Non-container config digest.
    pub config_hash: u64,
    /// Configured instance floor.
    pub min_instances: u32,
    /// Hard cap; `None` means unbounded.
    pub max_instances: Option<u32>,
    /// Growth threshold (absolute value is taken).
    pub growth: f64,
    /// Shrink threshold; `None` derives `-growth / 2`.
    pub shrink: Option<f64>,
    /// Backlog reference.
    pub backlog: u32,
    /// Advisory graceful-stop bound.
    pub shutdown_seconds: u32,
    /// Whether this is an analysis service.
    pub is_analysis: bool,
}

impl ServiceProfile {
    /// Construct a new profile. Mirrors the original constructor's defaulting rules:
    /// growth/shrink are stored as absolute magnitudes with the correct signs, and
    /// `shrink` defaults to `-growth / 2` when unspecified.
    pub fn new(cfg: ServiceProfileConfig) -> Self {
        let growth_threshold = cfg.growth.abs();
        let shrink_threshold = match cfg.shrink {
            Some(s) => -s.abs(),
            None => -growth_threshold / 2.0,
        };

        Self {
            name: cfg.name,
            container_config: cfg.container_config,
            config_hash: cfg.config_hash,
            min_instances_floor: cfg.min_instances,
            min_instances: cfg.min_instances,
            max_instances_cap: cfg.max_instances,
            desired_instances: 0,
            running_instances: 0,
            pressure: 0.0,
            growth_threshold,
            shrink_threshold,
            leak_rate: 0.1,
            backlog_reference: cfg.backlog,
            target_duty_cycle: 0.9,
            queue_length: 0,
            duty_cycle: 0.0,
            last_update: Utc::now(),
            shutdown_seconds: cfg.shutdown_seconds,
            is_analysis: cfg.is_analysis,
        }
    }

    /// CPU cores this profile's containers request.
    pub fn cpu(&self) -> f64 {
        self.container_config.cpu_cores
    }

    /// RAM (MB) this profile's containers request.
    pub fn ram(&self) -> i64 {
        self.container_config.ram_mb
    }

    /// The effective, clamp-ready minimum (≥ floor, forced ≥ 1 when backlog > 0).
    pub fn min_instances(&self) -> u32 {
        self.min_instances
    }

    /// The configured floor, ignoring backlog-driven bumps. Authoritative for
    /// wake-up paths that synthesize `instances = 0` updates.
    pub fn min_instances_floor(&self) -> u32 {
        self.min_instances_floor
    }

    /// The hard cap configured by the synchronizer, if any.
    pub fn max_instances_cap(&self) -> Option<u32> {
        self.max_instances_cap
    }

    /// Set the hard cap, e.g. from a licence count (`0` meaning unbounded).
    pub fn set_max_instances_cap(&mut self, cap: Option<u32>) {
        self.max_instances_cap = cap;
    }

    /// Derived maximum: `min(cap, running_instances + 2)`, bounding growth speed.
    pub fn max_instances(&self) -> u32 {
        let speed_limited = self.running_instances + 2;
        match self.max_instances_cap {
            Some(cap) => cap.min(speed_limited),
            None => speed_limited,
        }
    }

    /// Reported instance limit: `0` is the "no cap" sentinel.
    pub fn instance_limit(&self) -> i64 {
        match self.max_instances_cap {
            Some(cap) => i64::from(cap),
            None => NO_CAP,
        }
    }

    /// Apply one observation to the leaky-integrator pressure controller.
    ///
    /// `delta` is the elapsed time in seconds since the previous update,
    /// `instances` the currently observed replica count, `backlog` the queue
    /// length, and `duty_cycle` the fraction of the window workers were busy.
    pub fn update(&mut self, delta: f64, instances: u32, backlog: u32, duty_cycle: f64) {
        self.last_update = Utc::now();
        self.running_instances = instances;
        self.queue_length = backlog;
        self.duty_cycle = duty_cycle;

        // Bump the effective floor to at least 1 while there's a backlog; has no
        // effect when the configured floor is already ≥ 1.
        self.min_instances = self.min_instances_floor.max(u32::from(backlog > 0));

        let max_instances = self.max_instances();
        self.desired_instances = self
            .desired_instances
            .clamp(self.min_instances, max_instances);

        // Backlog pressure: square root softens response to very long queues.
        self.pressure += delta * (f64::from(backlog) / f64::from(self.backlog_reference)).sqrt();

        // Duty-cycle pressure: idle workers (duty_cycle below target) push pressure down.
        self.pressure -=
            delta * (self.target_duty_cycle - duty_cycle) / self.target_duty_cycle;

        // Leak toward zero.
        let leak = (self.leak_rate * delta).min(self.pressure.abs());
        self.pressure = self.pressure.abs().saturating_sub_signed(leak) * self.pressure.signum_or_zero();

        // At the floor, don't let negative pressure build up (avoids irregular response).
        if self.desired_instances == self.min_instances {
            self.pressure = self.pressure.max(0.0);
        }

        if self.pressure >= self.growth_threshold {
            self.desired_instances = max_instances.min(self.desired_instances + 1);
            self.pressure = 0.0;
        }

        if self.pressure <= self.shrink_threshold {
            self.desired_instances = self.min_instances.max(self.desired_instances.saturating_sub(1));
            self.pressure = 0.0;
        }
    }
}

/// Small helpers kept local to this module: `f64` has no `saturating_sub` or
/// "sign, or zero when the magnitude hit zero" helper in std.
trait FloatPressureExt {
    fn saturating_sub_signed(self, leak: f64) -> f64;
    fn signum_or_zero(self) -> f64;
}

impl FloatPressureExt for f64 {
    fn saturating_sub_signed(self, leak: f64) -> f64 {
        (self - leak).max(0.0)
    }

    fn signum_or_zero(self) -> f64 {
        if self == 0.0 {
            0.0
        } else {
            self.signum()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> ContainerConfig {
        ContainerConfig {
            image: "example/worker:latest".to_string(),
            environment: vec![],
            cpu_cores: 1.0,
            ram_mb: 1024,
            allow_internet_access: false,
        }
    }

    fn profile(min: u32, max: Option<u32>, growth: f64, shrink: Option<f64>, backlog: u32) -> ServiceProfile {
        ServiceProfile::new(ServiceProfileConfig {
            name: "svc".to_string(),
            container_config: container(),
            config_hash: 0,
            min_instances: min,
            max_instances: max,
            growth,
            shrink,
            backlog,
            shutdown_seconds: 30,
            is_analysis: true,
        })
    }

    #[test]
    fn invariants_hold_after_update() {
        let mut p = profile(0, Some(5), 60.0, Some(30.0), 500);
        for _ in 0..10 {
            p.update(5.0, 0, 500, 0.0);
            assert!(p.min_instances() <= p.desired_instances);
            assert!(p.desired_instances <= p.max_instances());
            if p.desired_instances == p.min_instances() {
                assert!(p.pressure >= 0.0);
            }
        }
    }

    #[test]
    fn shrink_defaults_to_half_growth() {
        let p = profile(0, Some(5), 100.0, None, 500);
        assert_eq!(p.shrink_threshold, -50.0);
    }

    #[test]
    fn no_cap_reports_sentinel() {
        let p = profile(0, None, 60.0, None, 500);
        assert_eq!(p.instance_limit(), NO_CAP);
    }

    #[test]
    fn backlog_bumps_floor_to_one() {
        let mut p = profile(0, Some(5), 60.0, None, 500);
        p.update(1.0, 0, 1, 0.9);
        assert_eq!(p.min_instances(), 1);
    }

    // S1 — cold start grows under backlog.
    #[test]
    fn scenario_cold_start_grows_under_backlog() {
        let mut p = profile(0, Some(5), 60.0, Some(30.0), 500);
        let mut crossed = false;
        for _ in 0..10 {
            p.update(5.0, 0, 500, 0.0);
            if p.pressure >= 60.0 || p.desired_instances >= 1 {
                crossed = true;
            }
        }
        assert!(crossed);
        assert!(p.desired_instances >= 1);
    }

    // S3 — duty-cycle shrink.
    #[test]
    fn scenario_duty_cycle_shrink() {
        let mut p = profile(1, Some(5), 60.0, Some(30.0), 500);
        p.running_instances = 3;
        p.desired_instances = 3;
        for _ in 0..200 {
            p.update(10.0, 3, 0, 0.1);
            if p.desired_instances == 2 {
                break;
            }
        }
        assert_eq!(p.desired_instances, 2);
        assert_eq!(p.pressure, 0.0);
    }

    proptest::proptest! {
        #[test]
        fn prop_invariants_hold(
            deltas in proptest::collection::vec(0.0f64..20.0, 1..30),
            backlog in 0u32..2000,
            duty in 0.0f64..1.0,
            instances in 0u32..10,
        ) {
            let mut p = profile(0, Some(8), 60.0, Some(30.0), 500);
            for delta in deltas {
                p.update(delta, instances, backlog, duty);
                proptest::prop_assert!(p.min_instances() <= p.desired_instances);
                proptest::prop_assert!(p.desired_instances <= p.max_instances());
                if p.desired_instances == p.min_instances() {
                    proptest::prop_assert!(p.pressure >= 0.0);
                }
            }
        }

        #[test]
        fn prop_idle_pressure_converges_to_zero(
            deltas in proptest::collection::vec(0.1f64..5.0, 1..50),
        ) {
            let mut p = profile(1, Some(8), 60.0, Some(30.0), 500);
            let mut last_abs = f64::MAX;
            for delta in deltas {
                p.update(delta, 1, 0, p.target_duty_cycle);
                proptest::prop_assert!(p.pressure.abs() <= last_abs + 1e-9);
                last_abs = p.pressure.abs();
            }
        }
    }
}
