//! Post-fault validators: cluster health and snapshot schedules.

pub mod health;
pub mod snapshot;

pub use health::{ClusterHealthValidator, check_quorum, wait_driver_up};
pub use snapshot::{ScheduleOutcome, ScheduleRun, ScheduleState, ScheduleValidator};
