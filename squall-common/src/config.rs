//! Environment preconditions and timing configuration.
//!
//! All timeouts and settle durations that bound fault injection live here,
//! keyed by fault kind, rather than inline at call sites. Tests shrink them
//! to milliseconds.

use crate::error::{Error, Result};
use crate::types::FaultKind;
use std::env;
use std::time::Duration;

const ENV_CONTROL_PLANE_URL: &str = "SQUALL_CONTROL_PLANE_URL";
const ENV_TARGET_KUBECONFIG: &str = "SQUALL_TARGET_KUBECONFIG";
const ENV_ACCOUNT_NAME: &str = "SQUALL_ACCOUNT_NAME";
const ENV_CLUSTER_USER: &str = "SQUALL_CLUSTER_USER";
const ENV_CLUSTER_SECRET: &str = "SQUALL_CLUSTER_SECRET";

/// Process-start environment. Every field is required; a run against a real
/// cluster must not start without all of them.
#[derive(Debug, Clone)]
pub struct Environment {
    pub control_plane_url: String,
    pub target_kubeconfig: String,
    pub account_name: String,
    pub cluster_user: String,
    pub cluster_secret: String,
}

impl Environment {
    /// Load the required environment, collecting every missing variable so
    /// all of them can be reported at once.
    pub fn from_env() -> Result<Self> {
        let mut missing = Vec::new();
        let control_plane_url = require(ENV_CONTROL_PLANE_URL, &mut missing);
        let target_kubeconfig = require(ENV_TARGET_KUBECONFIG, &mut missing);
        let account_name = require(ENV_ACCOUNT_NAME, &mut missing);
        let cluster_user = require(ENV_CLUSTER_USER, &mut missing);
        let cluster_secret = require(ENV_CLUSTER_SECRET, &mut missing);

        if !missing.is_empty() {
            return Err(Error::Precondition { missing });
        }

        Ok(Self {
            control_plane_url,
            target_kubeconfig,
            account_name,
            cluster_user,
            cluster_secret,
        })
    }
}

fn require(name: &str, missing: &mut Vec<String>) -> String {
    match env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => {
            missing.push(name.to_string());
            String::new()
        }
    }
}

/// Timing bounds for one fault kind.
#[derive(Debug, Clone, Copy)]
pub struct FaultTimings {
    /// Settle duration between induction and observation.
    pub hold: Duration,
    /// Budget for the post-reversal driver-up poll.
    pub recovery_timeout: Duration,
    /// Interval between recovery poll attempts.
    pub poll_interval: Duration,
}

/// Per-fault-kind timing table.
#[derive(Debug, Clone)]
pub struct Timings {
    pub drive_failure: FaultTimings,
    pub network_error: FaultTimings,
    pub driver_stop: FaultTimings,
    pub driver_crash: FaultTimings,
    /// Stabilize wait after a scale operation before re-validating.
    pub scale_settle: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            drive_failure: FaultTimings {
                hold: Duration::from_secs(30),
                recovery_timeout: Duration::from_secs(120),
                poll_interval: Duration::from_secs(5),
            },
            network_error: FaultTimings {
                // Errors persist for a full hour before observation.
                hold: Duration::from_secs(60 * 60),
                recovery_timeout: Duration::from_secs(20 * 60),
                poll_interval: Duration::from_secs(10),
            },
            driver_stop: FaultTimings {
                hold: Duration::from_secs(20),
                recovery_timeout: Duration::from_secs(120),
                poll_interval: Duration::from_secs(5),
            },
            driver_crash: FaultTimings {
                hold: Duration::from_secs(20),
                recovery_timeout: Duration::from_secs(120),
                poll_interval: Duration::from_secs(5),
            },
            scale_settle: Duration::from_secs(10),
        }
    }
}

impl Timings {
    pub fn for_kind(&self, kind: FaultKind) -> &FaultTimings {
        match kind {
            FaultKind::DriveFailure => &self.drive_failure,
            FaultKind::NetworkError => &self.network_error,
            FaultKind::DriverStop => &self.driver_stop,
            FaultKind::DriverCrash => &self.driver_crash,
        }
    }
}

/// Parameters for network-error injection.
#[derive(Debug, Clone, Copy)]
pub struct NetworkErrorConfig {
    /// Packet drop percentage while the rule is installed.
    pub drop_percentage: u8,
    /// Packet delay while the rule is installed.
    pub delay_ms: u32,
    /// Fraction of worker nodes targeted, rounded up.
    pub target_fraction: f64,
}

impl Default for NetworkErrorConfig {
    fn default() -> Self {
        Self {
            drop_percentage: 20,
            delay_ms: 250,
            target_fraction: 0.40,
        }
    }
}

/// Timing and shape of the snapshot-schedule validation.
#[derive(Debug, Clone)]
pub struct ScheduleTimings {
    /// Default policy interval.
    pub interval_minutes: u32,
    /// Snapshots retained per schedule.
    pub retain: u32,
    /// Pause after creating a new policy so at least one scheduled snapshot
    /// cycle can elapse. Correctness over runtime: checking earlier produces
    /// false negatives.
    pub creation_grace: Duration,
    /// Budget for the per-volume schedule-status poll.
    pub poll_timeout: Duration,
    /// Interval between schedule-status poll attempts.
    pub poll_interval: Duration,
}

impl Default for ScheduleTimings {
    fn default() -> Self {
        Self {
            interval_minutes: 30,
            retain: 2,
            creation_grace: Duration::from_secs(10 * 60),
            poll_timeout: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(10),
        }
    }
}
