//! In-memory mock cluster for tests and `--driver mock` runs.
//!
//! Implements all four collaborator contracts against a scriptable cluster
//! model. It does not open sockets or touch a real control plane; it is
//! intended for CI and engine tests where a real cluster is unavailable.
//! Failure modes (stuck drivers, unconsumable tokens, empty snapshot
//! statuses, degraded quorum) are armed through the `script_*` methods.

use crate::drivers::{NodeDriver, PolicyDriver, SchedulerDriver, VolumeDriver};
use crate::error::{Error, Result};
use crate::types::{
    DriverStatus, KvdbMember, NetworkErrorKind, NetworkErrorOp, Node, NodeId, RecoveryToken,
    ScaleFactors, SchedulePolicy, ScheduleStatusEntry, SnapshotPhase, TeardownOpts, Volume,
    WorkloadContext,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;

/// One recorded network-error call, for assertions.
#[derive(Debug, Clone)]
pub struct NetworkEvent {
    pub nodes: Vec<NodeId>,
    pub kind: NetworkErrorKind,
    pub op: NetworkErrorOp,
    pub drop_percentage: u8,
    pub delay_ms: u32,
}

#[derive(Debug)]
struct MockDrive {
    path: String,
    yanked: bool,
}

#[derive(Debug)]
struct MockNode {
    node: Node,
    drives: Vec<MockDrive>,
    driver: DriverStatus,
    /// Remaining `driver_status` calls that still report Down (restart lag).
    down_polls_left: u32,
    /// Never comes back up, whatever is attempted.
    stuck_down: bool,
}

#[derive(Debug)]
struct MockWorkload {
    ctx: WorkloadContext,
    factors: ScaleFactors,
    torn_down: bool,
}

#[derive(Debug, Default)]
struct Script {
    fail_yank_on: Option<NodeId>,
    fail_recover_on: Option<NodeId>,
    fail_validate: bool,
    fail_teardown: bool,
    empty_schedule_status: bool,
    /// `schedule_status` errors "not found" for this many leading calls.
    schedule_hidden_polls: u32,
    pure_volumes: bool,
}

#[derive(Debug)]
struct MockState {
    nodes: Vec<MockNode>,
    workloads: HashMap<String, MockWorkload>,
    policies: HashMap<String, SchedulePolicy>,
    consumed_tokens: HashSet<String>,
    kvdb: Vec<KvdbMember>,
    network_events: Vec<NetworkEvent>,
    active_network_rules: HashMap<NodeId, NetworkErrorKind>,
    deploy_counter: u32,
    schedule_status_calls: u32,
    script: Script,
}

/// Scriptable in-memory cluster implementing every driver contract.
pub struct MockCluster {
    state: Mutex<MockState>,
}

impl MockCluster {
    /// A cluster of `total` worker nodes, the first `storage` of which are
    /// storage-capable with two drives each. Quorum members mirror the
    /// storage nodes, first member leading.
    pub fn new(total: usize, storage: usize) -> Self {
        let nodes = (1..=total)
            .map(|i| MockNode {
                node: Node {
                    id: NodeId::new(format!("node-{i}")),
                    storage_capable: i <= storage,
                    worker: true,
                    schedulable: true,
                },
                drives: vec![
                    MockDrive {
                        path: "/dev/sdb".to_string(),
                        yanked: false,
                    },
                    MockDrive {
                        path: "/dev/sdc".to_string(),
                        yanked: false,
                    },
                ],
                driver: DriverStatus::Up,
                down_polls_left: 0,
                stuck_down: false,
            })
            .collect();

        let kvdb = (1..=storage)
            .map(|i| KvdbMember {
                id: format!("kvdb-{i}"),
                healthy: true,
                leader: i == 1,
            })
            .collect();

        Self {
            state: Mutex::new(MockState {
                nodes,
                workloads: HashMap::new(),
                policies: HashMap::new(),
                consumed_tokens: HashSet::new(),
                kvdb,
                network_events: Vec::new(),
                active_network_rules: HashMap::new(),
                deploy_counter: 0,
                schedule_status_calls: 0,
                script: Script::default(),
            }),
        }
    }

    // ── Scripted failure modes ─────────────────────────────────────────────

    /// Storage driver on `node` never reports Up again.
    pub async fn script_stuck_driver(&self, node: &NodeId) {
        let mut state = self.state.lock().await;
        if let Some(n) = state.nodes.iter_mut().find(|n| &n.node.id == node) {
            n.stuck_down = true;
        }
    }

    /// Next `driver_status` calls on `node` report Down `polls` times.
    pub async fn script_driver_restart_lag(&self, node: &NodeId, polls: u32) {
        let mut state = self.state.lock().await;
        if let Some(n) = state.nodes.iter_mut().find(|n| &n.node.id == node) {
            n.down_polls_left = polls;
        }
    }

    /// Drive yanks on `node` fail.
    pub async fn script_yank_failure(&self, node: &NodeId) {
        self.state.lock().await.script.fail_yank_on = Some(node.clone());
    }

    /// Drive recoveries on `node` fail.
    pub async fn script_recovery_failure(&self, node: &NodeId) {
        self.state.lock().await.script.fail_recover_on = Some(node.clone());
    }

    /// Workload validation fails until cleared.
    pub async fn script_validate_failure(&self, fail: bool) {
        self.state.lock().await.script.fail_validate = fail;
    }

    /// Teardown calls fail.
    pub async fn script_teardown_failure(&self) {
        self.state.lock().await.script.fail_teardown = true;
    }

    /// Schedule-status queries succeed but report zero entries.
    pub async fn script_empty_schedule_status(&self) {
        self.state.lock().await.script.empty_schedule_status = true;
    }

    /// Schedule-status queries error ("not propagated") for `polls` calls.
    pub async fn script_schedule_hidden_for(&self, polls: u32) {
        self.state.lock().await.script.schedule_hidden_polls = polls;
    }

    /// Mark `count` quorum members unhealthy, starting with the leader.
    pub async fn script_degraded_kvdb(&self, count: usize) {
        let mut state = self.state.lock().await;
        for member in state.kvdb.iter_mut().take(count) {
            member.healthy = false;
            member.leader = false;
        }
    }

    /// Deployed workloads carry an extra Pure-backed volume.
    pub async fn script_pure_volumes(&self) {
        self.state.lock().await.script.pure_volumes = true;
    }

    // ── Inspection ─────────────────────────────────────────────────────────

    pub async fn network_events(&self) -> Vec<NetworkEvent> {
        self.state.lock().await.network_events.clone()
    }

    /// Nodes with a packet rule currently installed.
    pub async fn active_network_rules(&self) -> usize {
        self.state.lock().await.active_network_rules.len()
    }

    pub async fn current_driver_status(&self, node: &NodeId) -> DriverStatus {
        let state = self.state.lock().await;
        state
            .nodes
            .iter()
            .find(|n| &n.node.id == node)
            .map(|n| n.driver)
            .unwrap_or(DriverStatus::Down)
    }

    pub async fn is_torn_down(&self, key: &str) -> bool {
        let state = self.state.lock().await;
        state.workloads.get(key).map(|w| w.torn_down).unwrap_or(false)
    }

    pub async fn is_schedulable(&self, node: &NodeId) -> bool {
        let state = self.state.lock().await;
        state
            .nodes
            .iter()
            .find(|n| &n.node.id == node)
            .map(|n| n.node.schedulable)
            .unwrap_or(false)
    }

    pub async fn policy(&self, name: &str) -> Option<SchedulePolicy> {
        self.state.lock().await.policies.get(name).cloned()
    }
}

fn bus_token(node: &NodeId, drive: &str) -> String {
    format!("bus-{node}-{drive}")
}

#[async_trait]
impl SchedulerDriver for MockCluster {
    async fn deploy(&self, name: &str) -> Result<Vec<WorkloadContext>> {
        let mut state = self.state.lock().await;
        state.deploy_counter += 1;
        let uid = format!("{:06x}", state.deploy_counter * 0x1f3b);

        let target = state
            .nodes
            .iter()
            .find(|n| n.node.worker && n.node.schedulable)
            .map(|n| n.node.id.clone())
            .ok_or_else(|| Error::Driver("no schedulable worker nodes".to_string()))?;

        let mut volumes = vec![Volume {
            name: format!("{name}-data"),
            pure_backed: false,
        }];
        if state.script.pure_volumes {
            volumes.push(Volume {
                name: format!("{name}-scratch"),
                pure_backed: true,
            });
        }

        let ctx = WorkloadContext {
            key: name.to_string(),
            uid,
            volumes,
            nodes: vec![target],
        };
        state.workloads.insert(
            name.to_string(),
            MockWorkload {
                ctx: ctx.clone(),
                factors: ScaleFactors::from([("server".to_string(), 1)]),
                torn_down: false,
            },
        );
        Ok(vec![ctx])
    }

    async fn validate(&self, ctx: &WorkloadContext) -> Result<()> {
        let state = self.state.lock().await;
        let workload = state
            .workloads
            .get(&ctx.key)
            .ok_or_else(|| Error::Driver(format!("workload {} not found", ctx.key)))?;
        if workload.torn_down {
            return Err(Error::Driver(format!("workload {} is gone", ctx.key)));
        }
        if state.script.fail_validate {
            return Err(Error::Driver(format!("workload {} tasks not ready", ctx.key)));
        }
        Ok(())
    }

    async fn teardown(&self, ctx: &WorkloadContext, _opts: TeardownOpts) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.script.fail_teardown {
            return Err(Error::Driver(format!("teardown of {} refused", ctx.key)));
        }
        if let Some(workload) = state.workloads.get_mut(&ctx.key) {
            workload.torn_down = true;
        }
        Ok(())
    }

    async fn wait_for_destroy(&self, ctx: &WorkloadContext, _timeout: Duration) -> Result<()> {
        let state = self.state.lock().await;
        match state.workloads.get(&ctx.key) {
            Some(w) if !w.torn_down => {
                Err(Error::Driver(format!("workload {} still present", ctx.key)))
            }
            _ => Ok(()),
        }
    }

    async fn scale_factors(&self, ctx: &WorkloadContext) -> Result<ScaleFactors> {
        let state = self.state.lock().await;
        state
            .workloads
            .get(&ctx.key)
            .map(|w| w.factors.clone())
            .ok_or_else(|| Error::Driver(format!("workload {} not found", ctx.key)))
    }

    async fn scale(&self, ctx: &WorkloadContext, factors: &ScaleFactors) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.workloads.get_mut(&ctx.key) {
            Some(w) => {
                w.factors = factors.clone();
                Ok(())
            }
            None => Err(Error::Driver(format!("workload {} not found", ctx.key))),
        }
    }

    async fn nodes_for(&self, ctx: &WorkloadContext) -> Result<Vec<Node>> {
        let state = self.state.lock().await;
        Ok(state
            .nodes
            .iter()
            .filter(|n| ctx.nodes.contains(&n.node.id))
            .map(|n| n.node.clone())
            .collect())
    }

    async fn set_schedulable(&self, node: &NodeId, schedulable: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.nodes.iter_mut().find(|n| &n.node.id == node) {
            Some(n) => {
                n.node.schedulable = schedulable;
                Ok(())
            }
            None => Err(Error::Driver(format!("node {node} not found"))),
        }
    }
}

#[async_trait]
impl NodeDriver for MockCluster {
    async fn nodes(&self) -> Result<Vec<Node>> {
        let state = self.state.lock().await;
        Ok(state.nodes.iter().map(|n| n.node.clone()).collect())
    }

    async fn worker_nodes(&self) -> Result<Vec<Node>> {
        let state = self.state.lock().await;
        Ok(state
            .nodes
            .iter()
            .filter(|n| n.node.worker)
            .map(|n| n.node.clone())
            .collect())
    }

    async fn storage_nodes(&self) -> Result<Vec<Node>> {
        let state = self.state.lock().await;
        Ok(state
            .nodes
            .iter()
            .filter(|n| n.node.storage_capable)
            .map(|n| n.node.clone())
            .collect())
    }

    async fn yank_drive(&self, node: &NodeId, drive: &str) -> Result<RecoveryToken> {
        let mut state = self.state.lock().await;
        if state.script.fail_yank_on.as_ref() == Some(node) {
            return Err(Error::Driver(format!("bus reset refused on {node}")));
        }
        let mock_node = state
            .nodes
            .iter_mut()
            .find(|n| &n.node.id == node)
            .ok_or_else(|| Error::Driver(format!("node {node} not found")))?;
        let mock_drive = mock_node
            .drives
            .iter_mut()
            .find(|d| d.path == drive)
            .ok_or_else(|| Error::Driver(format!("no drive {drive} on {node}")))?;
        mock_drive.yanked = true;
        mock_node.driver = DriverStatus::Down;
        Ok(RecoveryToken::new(bus_token(node, drive)))
    }

    async fn recover_drive(&self, node: &NodeId, drive: &str, token: &RecoveryToken) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.script.fail_recover_on.as_ref() == Some(node) {
            return Err(Error::Driver(format!("bus rescan refused on {node}")));
        }
        if state.consumed_tokens.contains(&token.0) {
            return Err(Error::Driver(format!(
                "recovery token {token} already consumed"
            )));
        }
        if token.0 != bus_token(node, drive) {
            return Err(Error::Driver(format!(
                "recovery token {token} does not match {node}:{drive}"
            )));
        }
        state.consumed_tokens.insert(token.0.clone());
        let mock_node = state
            .nodes
            .iter_mut()
            .find(|n| &n.node.id == node)
            .ok_or_else(|| Error::Driver(format!("node {node} not found")))?;
        if let Some(mock_drive) = mock_node.drives.iter_mut().find(|d| d.path == drive) {
            mock_drive.yanked = false;
        }
        Ok(())
    }

    async fn inject_network_error(
        &self,
        nodes: &[NodeId],
        kind: NetworkErrorKind,
        op: NetworkErrorOp,
        drop_percentage: u8,
        delay_ms: u32,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.network_events.push(NetworkEvent {
            nodes: nodes.to_vec(),
            kind,
            op,
            drop_percentage,
            delay_ms,
        });
        match op {
            NetworkErrorOp::Add => {
                for node in nodes {
                    state.active_network_rules.insert(node.clone(), kind);
                }
            }
            NetworkErrorOp::Delete => {
                for node in nodes {
                    state.active_network_rules.remove(node);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VolumeDriver for MockCluster {
    async fn volumes(&self, ctx: &WorkloadContext) -> Result<Vec<Volume>> {
        let state = self.state.lock().await;
        state
            .workloads
            .get(&ctx.key)
            .map(|w| w.ctx.volumes.clone())
            .ok_or_else(|| Error::Driver(format!("workload {} not found", ctx.key)))
    }

    async fn storage_devices(&self, node: &NodeId) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let mock_node = state
            .nodes
            .iter()
            .find(|n| &n.node.id == node)
            .ok_or_else(|| Error::Driver(format!("node {node} not found")))?;
        if !mock_node.node.storage_capable {
            return Ok(Vec::new());
        }
        Ok(mock_node.drives.iter().map(|d| d.path.clone()).collect())
    }

    async fn is_pure_backed(&self, volume: &Volume) -> Result<bool> {
        Ok(volume.pure_backed)
    }

    async fn stop_driver(&self, nodes: &[NodeId]) -> Result<()> {
        let mut state = self.state.lock().await;
        for node in nodes {
            if let Some(n) = state.nodes.iter_mut().find(|n| &n.node.id == node) {
                n.driver = DriverStatus::Down;
            }
        }
        Ok(())
    }

    async fn start_driver(&self, nodes: &[NodeId]) -> Result<()> {
        let mut state = self.state.lock().await;
        for node in nodes {
            if let Some(n) = state.nodes.iter_mut().find(|n| &n.node.id == node)
                && !n.stuck_down
            {
                n.driver = DriverStatus::Up;
            }
        }
        Ok(())
    }

    async fn crash_driver(&self, nodes: &[NodeId]) -> Result<()> {
        let mut state = self.state.lock().await;
        for node in nodes {
            if let Some(n) = state.nodes.iter_mut().find(|n| &n.node.id == node) {
                // The driver supervisor restarts a crashed driver on its
                // own; liveness lags by one observation.
                n.down_polls_left = 1;
                if !n.stuck_down {
                    n.driver = DriverStatus::Up;
                }
            }
        }
        Ok(())
    }

    async fn driver_status(&self, node: &NodeId) -> Result<DriverStatus> {
        let mut state = self.state.lock().await;
        let mock_node = state
            .nodes
            .iter_mut()
            .find(|n| &n.node.id == node)
            .ok_or_else(|| Error::Driver(format!("node {node} not found")))?;
        if mock_node.stuck_down {
            return Ok(DriverStatus::Down);
        }
        if mock_node.down_polls_left > 0 {
            mock_node.down_polls_left -= 1;
            return Ok(DriverStatus::Down);
        }
        Ok(mock_node.driver)
    }

    async fn kvdb_members(&self, _node: &NodeId) -> Result<Vec<KvdbMember>> {
        Ok(self.state.lock().await.kvdb.clone())
    }
}

#[async_trait]
impl PolicyDriver for MockCluster {
    async fn get_policy(&self, name: &str) -> Result<Option<SchedulePolicy>> {
        Ok(self.state.lock().await.policies.get(name).cloned())
    }

    async fn create_policy(&self, policy: SchedulePolicy) -> Result<()> {
        let mut state = self.state.lock().await;
        state.policies.insert(policy.name.clone(), policy);
        Ok(())
    }

    async fn schedule_status(
        &self,
        schedule_name: &str,
        namespace: &str,
    ) -> Result<Vec<ScheduleStatusEntry>> {
        let mut state = self.state.lock().await;
        state.schedule_status_calls += 1;
        if state.schedule_status_calls <= state.script.schedule_hidden_polls {
            return Err(Error::Driver(format!(
                "schedule {schedule_name} not propagated yet"
            )));
        }
        if state.script.empty_schedule_status {
            return Ok(Vec::new());
        }

        let volume_name = schedule_name
            .strip_suffix("-interval-schedule")
            .unwrap_or(schedule_name);
        let known = state.workloads.values().any(|w| {
            w.ctx.namespace() == namespace && w.ctx.volumes.iter().any(|v| v.name == volume_name)
        });
        if !known {
            return Err(Error::Driver(format!(
                "schedule {schedule_name} not found in {namespace}"
            )));
        }
        Ok(vec![ScheduleStatusEntry {
            snapshot_name: format!("{schedule_name}-1"),
            phase: SnapshotPhase::Ready,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_yank_marks_driver_down_and_token_round_trips() {
        let cluster = MockCluster::new(3, 3);
        let node = NodeId::new("node-1");

        let token = cluster.yank_drive(&node, "/dev/sdb").await.unwrap();
        assert_eq!(cluster.current_driver_status(&node).await, DriverStatus::Down);

        cluster.recover_drive(&node, "/dev/sdb", &token).await.unwrap();
        cluster.start_driver(std::slice::from_ref(&node)).await.unwrap();
        assert_eq!(cluster.current_driver_status(&node).await, DriverStatus::Up);
    }

    #[tokio::test]
    async fn test_recovery_token_is_consume_once() {
        let cluster = MockCluster::new(1, 1);
        let node = NodeId::new("node-1");

        let token = cluster.yank_drive(&node, "/dev/sdb").await.unwrap();
        cluster.recover_drive(&node, "/dev/sdb", &token).await.unwrap();

        let err = cluster
            .recover_drive(&node, "/dev/sdb", &token)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already consumed"));
    }

    #[tokio::test]
    async fn test_deploy_teardown_round_trip() {
        let cluster = MockCluster::new(2, 1);
        let contexts = cluster.deploy("setupteardown-0").await.unwrap();
        assert_eq!(contexts.len(), 1);
        let ctx = &contexts[0];

        cluster.validate(ctx).await.unwrap();
        cluster.teardown(ctx, TeardownOpts::default()).await.unwrap();
        assert!(cluster.is_torn_down("setupteardown-0").await);
        assert!(cluster.validate(ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_schedule_status_derived_from_volume_name() {
        let cluster = MockCluster::new(1, 1);
        let ctx = cluster.deploy("storm-0").await.unwrap().remove(0);

        let entries = cluster
            .schedule_status("storm-0-data-interval-schedule", &ctx.namespace())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].phase, SnapshotPhase::Ready);

        let err = cluster
            .schedule_status("unknown-interval-schedule", &ctx.namespace())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_network_rules_install_and_clear() {
        let cluster = MockCluster::new(5, 3);
        let targets: Vec<NodeId> = (1..=3).map(|i| NodeId::new(format!("node-{i}"))).collect();

        cluster
            .inject_network_error(&targets, NetworkErrorKind::Drop, NetworkErrorOp::Add, 20, 250)
            .await
            .unwrap();
        assert_eq!(cluster.active_network_rules().await, 3);

        cluster
            .inject_network_error(&targets, NetworkErrorKind::Drop, NetworkErrorOp::Delete, 0, 0)
            .await
            .unwrap();
        assert_eq!(cluster.active_network_rules().await, 0);
    }
}
