//! Shared types, collaborator contracts, and polling primitives for Squall.
//!
//! Squall injects controlled faults into a distributed storage cluster under
//! test and validates that the cluster and its workloads converge back to a
//! healthy state within bounded time. This crate holds everything shared
//! between the engine and its tests: the data model, the error catalog, the
//! environment/timing configuration, the convergence poller, the driver
//! contracts for the cluster's collaborator planes, and a scriptable mock
//! cluster.

#![forbid(unsafe_code)]

pub mod config;
pub mod drivers;
pub mod error;
pub mod mock;
pub mod poll;
pub mod types;

pub use config::{Environment, FaultTimings, NetworkErrorConfig, ScheduleTimings, Timings};
pub use drivers::{NodeDriver, PolicyDriver, SchedulerDriver, VolumeDriver};
pub use error::{Error, Result};
pub use poll::{Observation, poll_until};
pub use types::{
    DriveRecovery, DriverStatus, FaultEpisode, FaultKind, KvdbMember, NetworkErrorKind,
    NetworkErrorOp, Node, NodeId, RecoveryToken, ScaleFactors, SchedulePolicy,
    ScheduleStatusEntry, SnapshotPhase, TeardownOpts, Volume, WorkloadContext,
};
