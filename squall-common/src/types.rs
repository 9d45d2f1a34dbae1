//! Common types used across Squall components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cluster member.
///
/// Identity is immutable; scheduling eligibility and liveness are owned by
/// the cluster and only observed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Node identity.
    pub id: NodeId,
    /// Whether this node contributes storage (vs storage-less).
    pub storage_capable: bool,
    /// Whether this node is a worker (vs control-plane only).
    pub worker: bool,
    /// Current scheduling eligibility (cordoned = false).
    pub schedulable: bool,
}

/// A volume backing a deployed workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Volume name as known to the storage plane.
    pub name: String,
    /// Volumes on a Pure-backed medium do not support scheduled snapshots.
    pub pure_backed: bool,
}

/// One deployed application instance under test.
///
/// Owned exclusively by the orchestrator for the scenario's lifetime;
/// validators only read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadContext {
    /// Unique key for this instance (e.g., "drivefailure-0").
    pub key: String,
    /// Instance UID assigned at deploy time.
    pub uid: String,
    /// Volumes currently backing the workload.
    pub volumes: Vec<Volume>,
    /// Nodes the workload currently runs on.
    pub nodes: Vec<NodeId>,
}

impl WorkloadContext {
    /// Namespace the workload's resources live in.
    pub fn namespace(&self) -> String {
        format!("{}-{}", self.key, self.uid)
    }
}

/// Kind of fault applied during an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    DriveFailure,
    NetworkError,
    DriverStop,
    DriverCrash,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DriveFailure => write!(f, "drive-failure"),
            Self::NetworkError => write!(f, "network-error"),
            Self::DriverStop => write!(f, "driver-stop"),
            Self::DriverCrash => write!(f, "driver-crash"),
        }
    }
}

/// Sub-kind of an injected network error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    /// Packet drop at the given percentage.
    Drop,
    /// Packet delay of the given duration.
    Delay,
}

impl NetworkErrorKind {
    /// The sub-kind used on the following iteration of a long-running run.
    pub fn alternate(self) -> Self {
        match self {
            Self::Drop => Self::Delay,
            Self::Delay => Self::Drop,
        }
    }
}

impl std::fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Drop => write!(f, "drop"),
            Self::Delay => write!(f, "delay"),
        }
    }
}

/// Whether a network-error call installs or clears the rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorOp {
    Add,
    Delete,
}

/// Opaque handle returned by a fault-inducing call, required to reverse
/// that specific fault instance (e.g., the bus id of a yanked drive).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecoveryToken(pub String);

impl RecoveryToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Display for RecoveryToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Recovery material for one yanked drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveRecovery {
    pub node: NodeId,
    pub drive: String,
    /// Present until consumed by reversal.
    pub token: Option<RecoveryToken>,
}

/// One induced-and-eventually-reversed fault against a set of nodes.
///
/// Created when injection begins, closed when reversal is confirmed. An
/// episode that is never closed has leaked past its scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultEpisode {
    pub id: Uuid,
    pub kind: FaultKind,
    pub targets: Vec<NodeId>,
    /// Per-drive recovery tokens (drive failures only).
    pub drive_recoveries: Vec<DriveRecovery>,
    /// Network sub-kind (network errors only), needed to clear the rule.
    pub network_kind: Option<NetworkErrorKind>,
    pub injected_at: DateTime<Utc>,
    pub reversed_at: Option<DateTime<Utc>>,
}

impl FaultEpisode {
    /// Open a new episode as injection begins.
    pub fn begin(kind: FaultKind, targets: Vec<NodeId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            targets,
            drive_recoveries: Vec::new(),
            network_kind: None,
            injected_at: Utc::now(),
            reversed_at: None,
        }
    }

    /// Record the recovery token handed back for one yanked drive.
    pub fn record_drive(&mut self, node: NodeId, drive: impl Into<String>, token: RecoveryToken) {
        self.drive_recoveries.push(DriveRecovery {
            node,
            drive: drive.into(),
            token: Some(token),
        });
    }

    /// Whether this episode is still open (fault not yet reversed).
    pub fn is_open(&self) -> bool {
        self.reversed_at.is_none()
    }

    /// Close the episode once reversal is confirmed.
    pub fn close(&mut self) {
        self.reversed_at = Some(Utc::now());
    }
}

/// Liveness of the storage driver on one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Up,
    Down,
}

impl std::fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// One member of the key-value coordination quorum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvdbMember {
    pub id: String,
    /// Reachable and voting.
    pub healthy: bool,
    pub leader: bool,
}

/// A named recurring snapshot policy bound to a namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulePolicy {
    pub name: String,
    pub interval_minutes: u32,
    pub retain: u32,
}

/// Phase of one scheduled snapshot as reported by the storage plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPhase {
    Pending,
    InProgress,
    Ready,
    Failed,
}

/// One reported status entry for a snapshot schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleStatusEntry {
    pub snapshot_name: String,
    pub phase: SnapshotPhase,
}

/// Options controlling workload teardown.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TeardownOpts {
    /// Block until the workload's resources are gone.
    pub wait_for_destroy: bool,
    /// Also wait for leaked storage resources to be cleaned up.
    pub wait_for_resource_leak_cleanup: bool,
}

impl Default for TeardownOpts {
    fn default() -> Self {
        Self {
            wait_for_destroy: true,
            wait_for_resource_leak_cleanup: true,
        }
    }
}

/// Per-component replica counts for scaling a workload.
pub type ScaleFactors = HashMap<String, u32>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_derivation() {
        let ctx = WorkloadContext {
            key: "drivefailure-0".to_string(),
            uid: "a1b2c3".to_string(),
            volumes: vec![],
            nodes: vec![],
        };
        assert_eq!(ctx.namespace(), "drivefailure-0-a1b2c3");
    }

    #[test]
    fn test_network_kind_alternates() {
        assert_eq!(NetworkErrorKind::Drop.alternate(), NetworkErrorKind::Delay);
        assert_eq!(NetworkErrorKind::Delay.alternate(), NetworkErrorKind::Drop);
    }

    #[test]
    fn test_episode_lifecycle() {
        let mut episode = FaultEpisode::begin(FaultKind::DriveFailure, vec![NodeId::new("n1")]);
        assert!(episode.is_open());

        episode.record_drive(NodeId::new("n1"), "/dev/sdb", RecoveryToken::new("bus-0"));
        assert_eq!(episode.drive_recoveries.len(), 1);

        episode.close();
        assert!(!episode.is_open());
        assert!(episode.reversed_at.is_some());
    }
}
