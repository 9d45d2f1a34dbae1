//! Collaborator contracts for the cluster under test.
//!
//! The engine only sequences and bounds faults; deploying workloads,
//! discovering inventory, and the concrete fault mechanics live behind
//! these traits. Implementations are injected at construction - there are
//! no process-wide singletons - so scenarios can run concurrently and
//! tests substitute fakes.

use crate::error::Result;
use crate::types::{
    DriverStatus, KvdbMember, NetworkErrorKind, NetworkErrorOp, Node, NodeId, RecoveryToken,
    ScaleFactors, SchedulePolicy, ScheduleStatusEntry, TeardownOpts, Volume, WorkloadContext,
};
use async_trait::async_trait;
use std::time::Duration;

/// Workload deployment, validation, scaling, and teardown.
#[async_trait]
pub trait SchedulerDriver: Send + Sync {
    /// Deploy one named workload instance; a single deploy may produce
    /// several contexts.
    async fn deploy(&self, name: &str) -> Result<Vec<WorkloadContext>>;

    /// Assert the workload's expected task/volume topology currently holds.
    async fn validate(&self, ctx: &WorkloadContext) -> Result<()>;

    /// Destroy the workload and its resources.
    async fn teardown(&self, ctx: &WorkloadContext, opts: TeardownOpts) -> Result<()>;

    /// Block until a destroyed workload's resources are gone.
    async fn wait_for_destroy(&self, ctx: &WorkloadContext, timeout: Duration) -> Result<()>;

    /// Current per-component replica counts.
    async fn scale_factors(&self, ctx: &WorkloadContext) -> Result<ScaleFactors>;

    /// Apply per-component replica counts.
    async fn scale(&self, ctx: &WorkloadContext, factors: &ScaleFactors) -> Result<()>;

    /// Nodes the workload currently runs on.
    async fn nodes_for(&self, ctx: &WorkloadContext) -> Result<Vec<Node>>;

    /// Cordon (`false`) or uncordon (`true`) a node.
    async fn set_schedulable(&self, node: &NodeId, schedulable: bool) -> Result<()>;
}

/// Node inventory and node-level fault mechanics.
#[async_trait]
pub trait NodeDriver: Send + Sync {
    async fn nodes(&self) -> Result<Vec<Node>>;

    async fn worker_nodes(&self) -> Result<Vec<Node>>;

    async fn storage_nodes(&self) -> Result<Vec<Node>>;

    /// Fail one drive; the returned token is required to reverse exactly
    /// this fault instance.
    async fn yank_drive(&self, node: &NodeId, drive: &str) -> Result<RecoveryToken>;

    /// Reverse a drive failure. Consuming a token twice is an explicit
    /// error, never a duplicate side effect.
    async fn recover_drive(&self, node: &NodeId, drive: &str, token: &RecoveryToken) -> Result<()>;

    /// Install (`Add`) or clear (`Delete`) a packet-drop/-delay rule on the
    /// given nodes. Clearing passes zeroed parameters.
    async fn inject_network_error(
        &self,
        nodes: &[NodeId],
        kind: NetworkErrorKind,
        op: NetworkErrorOp,
        drop_percentage: u8,
        delay_ms: u32,
    ) -> Result<()>;
}

/// Storage-plane queries and storage-driver lifecycle.
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    async fn volumes(&self, ctx: &WorkloadContext) -> Result<Vec<Volume>>;

    /// Physical drives backing storage on one node.
    async fn storage_devices(&self, node: &NodeId) -> Result<Vec<String>>;

    /// Whether the volume's backing medium rules out scheduled snapshots.
    async fn is_pure_backed(&self, volume: &Volume) -> Result<bool>;

    async fn stop_driver(&self, nodes: &[NodeId]) -> Result<()>;

    async fn start_driver(&self, nodes: &[NodeId]) -> Result<()>;

    async fn crash_driver(&self, nodes: &[NodeId]) -> Result<()>;

    /// Current liveness of the storage driver on one node.
    async fn driver_status(&self, node: &NodeId) -> Result<DriverStatus>;

    /// Coordination-quorum membership as seen from one node.
    async fn kvdb_members(&self, node: &NodeId) -> Result<Vec<KvdbMember>>;
}

/// Snapshot policy plane.
#[async_trait]
pub trait PolicyDriver: Send + Sync {
    async fn get_policy(&self, name: &str) -> Result<Option<SchedulePolicy>>;

    async fn create_policy(&self, policy: SchedulePolicy) -> Result<()>;

    /// Status entries for a named schedule in a namespace. Errors while the
    /// schedule object has not propagated yet are transient.
    async fn schedule_status(
        &self,
        schedule_name: &str,
        namespace: &str,
    ) -> Result<Vec<ScheduleStatusEntry>>;
}
