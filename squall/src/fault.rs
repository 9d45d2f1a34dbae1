//! Fault injection lifecycle.
//!
//! Every fault kind follows the same four-phase contract: **induce** the
//! fault on each target (collecting recovery tokens where the mechanism
//! hands them back), **hold** a settle duration while the fault propagates,
//! **observe** that the workload tolerates it, then **reverse** it and poll
//! the storage driver back to Up within the kind's recovery budget. A fault
//! that cannot be reversed aborts the owning scenario.

use crate::validate::health::wait_driver_up;
use squall_common::config::{NetworkErrorConfig, Timings};
use squall_common::error::{Error, Result};
use squall_common::poll::{Observation, poll_until};
use squall_common::types::{
    DriverStatus, FaultEpisode, FaultKind, NetworkErrorKind, NetworkErrorOp, Node, NodeId,
    WorkloadContext,
};
use squall_common::{NodeDriver, SchedulerDriver, VolumeDriver};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{info, warn};

/// Number of worker nodes targeted by one network-error episode: the
/// configured fraction of the fleet, rounded up past exact multiples and
/// capped at the fleet size (five workers at 40% yields three targets).
pub fn network_target_count(workers: usize, fraction: f64) -> usize {
    if workers == 0 {
        return 0;
    }
    let raw = fraction * workers as f64;
    (raw.floor() as usize + 1).min(workers)
}

/// Applies and reverses a single fault against one or more target nodes.
pub struct FaultInjector<S, N, V> {
    scheduler: Arc<S>,
    nodes: Arc<N>,
    volumes: Arc<V>,
    timings: Timings,
}

impl<S, N, V> FaultInjector<S, N, V>
where
    S: SchedulerDriver,
    N: NodeDriver,
    V: VolumeDriver,
{
    pub fn new(scheduler: Arc<S>, nodes: Arc<N>, volumes: Arc<V>, timings: Timings) -> Self {
        Self {
            scheduler,
            nodes,
            volumes,
            timings,
        }
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Yank every drive on `target`, recording the bus token each yank
    /// hands back. Fails fast on the first yank error; the partial
    /// induction is reported in the error, never retried.
    pub async fn induce_drive_failure(&self, target: &Node) -> Result<FaultEpisode> {
        let drives = self
            .volumes
            .storage_devices(&target.id)
            .await
            .map_err(|e| induction(FaultKind::DriveFailure, &target.id, e.to_string()))?;
        if drives.is_empty() {
            return Err(induction(
                FaultKind::DriveFailure,
                &target.id,
                "no storage devices on node".to_string(),
            ));
        }

        let mut episode = FaultEpisode::begin(FaultKind::DriveFailure, vec![target.id.clone()]);
        for drive in &drives {
            match self.nodes.yank_drive(&target.id, drive).await {
                Ok(token) => {
                    info!(node = %target.id, drive, %token, "yanked drive");
                    episode.record_drive(target.id.clone(), drive, token);
                }
                Err(e) => {
                    warn!(
                        node = %target.id,
                        drive,
                        yanked = episode.drive_recoveries.len(),
                        total = drives.len(),
                        "drive yank failed mid-induction"
                    );
                    return Err(induction(
                        FaultKind::DriveFailure,
                        &target.id,
                        format!(
                            "{e} ({} of {} drives already yanked)",
                            episode.drive_recoveries.len(),
                            drives.len()
                        ),
                    ));
                }
            }
        }
        Ok(episode)
    }

    /// Install a packet-drop or packet-delay rule on a computed subset of
    /// the worker fleet.
    pub async fn induce_network_error(
        &self,
        workers: &[Node],
        kind: NetworkErrorKind,
        config: &NetworkErrorConfig,
    ) -> Result<FaultEpisode> {
        let count = network_target_count(workers.len(), config.target_fraction);
        let targets: Vec<NodeId> = workers.iter().take(count).map(|n| n.id.clone()).collect();
        if targets.is_empty() {
            return Err(induction(
                FaultKind::NetworkError,
                &NodeId::new("<none>"),
                "no worker nodes to target".to_string(),
            ));
        }

        info!(
            %kind,
            targets = targets.len(),
            workers = workers.len(),
            drop_percentage = config.drop_percentage,
            delay_ms = config.delay_ms,
            "installing network error"
        );
        self.nodes
            .inject_network_error(
                &targets,
                kind,
                NetworkErrorOp::Add,
                config.drop_percentage,
                config.delay_ms,
            )
            .await
            .map_err(|e| induction(FaultKind::NetworkError, &targets[0], e.to_string()))?;

        let mut episode = FaultEpisode::begin(FaultKind::NetworkError, targets);
        episode.network_kind = Some(kind);
        Ok(episode)
    }

    /// Stop the storage driver on each target and wait until every one of
    /// them actually reports Down.
    pub async fn induce_driver_stop(&self, targets: &[Node]) -> Result<FaultEpisode> {
        let ids: Vec<NodeId> = targets.iter().map(|n| n.id.clone()).collect();
        self.volumes
            .stop_driver(&ids)
            .await
            .map_err(|e| induction(FaultKind::DriverStop, &ids[0], e.to_string()))?;

        let t = self.timings.for_kind(FaultKind::DriverStop);
        for node in &ids {
            let what = format!("storage driver down on {node}");
            poll_until(&what, t.poll_interval, t.recovery_timeout, || {
                let node = node.clone();
                async move {
                    match self.volumes.driver_status(&node).await {
                        Ok(DriverStatus::Down) => Observation::Ready(()),
                        Ok(status) => Observation::Pending(format!("driver {status}")),
                        Err(e) => Observation::Pending(e.to_string()),
                    }
                }
            })
            .await
            .map_err(|e| induction(FaultKind::DriverStop, node, e.to_string()))?;
        }
        Ok(FaultEpisode::begin(FaultKind::DriverStop, ids))
    }

    /// Crash the storage driver on each target. The driver supervisor
    /// restarts it on its own; reversal only has to wait for liveness.
    pub async fn induce_driver_crash(&self, targets: &[Node]) -> Result<FaultEpisode> {
        let ids: Vec<NodeId> = targets.iter().map(|n| n.id.clone()).collect();
        self.volumes
            .crash_driver(&ids)
            .await
            .map_err(|e| induction(FaultKind::DriverCrash, &ids[0], e.to_string()))?;
        Ok(FaultEpisode::begin(FaultKind::DriverCrash, ids))
    }

    /// Sleep the kind-specific settle duration so the fault propagates
    /// before observation.
    pub async fn hold(&self, kind: FaultKind) {
        let hold = self.timings.for_kind(kind).hold;
        info!(fault = %kind, settle = ?hold, "holding fault");
        sleep(hold).await;
    }

    /// Assert the workload is still alive despite the fault. Tolerating the
    /// failure is the property under test, not that nothing changed.
    pub async fn observe_degraded(&self, ctx: &WorkloadContext) -> Result<()> {
        self.scheduler.validate(ctx).await.map_err(|e| Error::Validation {
            what: format!("workload {} alive under fault", ctx.key),
            detail: e.to_string(),
        })
    }

    /// Undo the fault per target, consuming recovery tokens where required,
    /// then poll until the storage driver reports Up on every affected
    /// node. Every failure past this point is a reversal failure; the
    /// episode stays open and the scenario must abort.
    pub async fn reverse(&self, episode: &mut FaultEpisode) -> Result<()> {
        if !episode.is_open() {
            let node = episode.targets[0].clone();
            return Err(reversal(
                episode.kind,
                &node,
                "episode already reversed".to_string(),
            ));
        }

        match episode.kind {
            FaultKind::DriveFailure => {
                for i in 0..episode.drive_recoveries.len() {
                    let rec = &mut episode.drive_recoveries[i];
                    let node = rec.node.clone();
                    let drive = rec.drive.clone();
                    let token = rec.token.take().ok_or_else(|| {
                        reversal(
                            FaultKind::DriveFailure,
                            &node,
                            format!("recovery token for {drive} already consumed"),
                        )
                    })?;
                    self.nodes
                        .recover_drive(&node, &drive, &token)
                        .await
                        .map_err(|e| reversal(FaultKind::DriveFailure, &node, e.to_string()))?;
                    info!(%node, drive, "recovered drive");
                }
                // Let the recovered drives settle before bouncing the driver.
                sleep(self.timings.drive_failure.hold).await;
                self.volumes
                    .start_driver(&episode.targets)
                    .await
                    .map_err(|e| {
                        reversal(FaultKind::DriveFailure, &episode.targets[0], e.to_string())
                    })?;
            }
            FaultKind::NetworkError => {
                let kind = episode.network_kind.unwrap_or(NetworkErrorKind::Drop);
                info!(%kind, targets = episode.targets.len(), "clearing network error");
                self.nodes
                    .inject_network_error(&episode.targets, kind, NetworkErrorOp::Delete, 0, 0)
                    .await
                    .map_err(|e| {
                        reversal(FaultKind::NetworkError, &episode.targets[0], e.to_string())
                    })?;
            }
            FaultKind::DriverStop => {
                self.volumes
                    .start_driver(&episode.targets)
                    .await
                    .map_err(|e| {
                        reversal(FaultKind::DriverStop, &episode.targets[0], e.to_string())
                    })?;
            }
            FaultKind::DriverCrash => {
                // Nothing to undo; the supervisor restart is awaited below.
            }
        }

        self.wait_targets_up(episode).await?;
        episode.close();
        info!(fault = %episode.kind, episode = %episode.id, "fault reversed");
        Ok(())
    }

    async fn wait_targets_up(&self, episode: &FaultEpisode) -> Result<()> {
        let t = self.timings.for_kind(episode.kind);
        for node in &episode.targets {
            wait_driver_up(
                self.volumes.as_ref(),
                node,
                t.recovery_timeout,
                t.poll_interval,
            )
            .await
            .map_err(|e| reversal(episode.kind, node, e.to_string()))?;
        }
        Ok(())
    }
}

fn induction(fault: FaultKind, node: &NodeId, detail: String) -> Error {
    Error::Induction {
        fault,
        node: node.clone(),
        detail,
    }
}

fn reversal(fault: FaultKind, node: &NodeId, detail: String) -> Error {
    Error::Reversal {
        fault,
        node: node.clone(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use squall_common::config::FaultTimings;
    use squall_common::mock::MockCluster;
    use std::time::Duration;

    fn fast_timings() -> Timings {
        let fast = FaultTimings {
            hold: Duration::from_millis(1),
            recovery_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(1),
        };
        Timings {
            drive_failure: fast,
            network_error: fast,
            driver_stop: fast,
            driver_crash: fast,
            scale_settle: Duration::from_millis(1),
        }
    }

    fn injector(cluster: &Arc<MockCluster>) -> FaultInjector<MockCluster, MockCluster, MockCluster> {
        FaultInjector::new(
            cluster.clone(),
            cluster.clone(),
            cluster.clone(),
            fast_timings(),
        )
    }

    #[test]
    fn test_network_target_count_rounds_up() {
        assert_eq!(network_target_count(5, 0.40), 3);
        assert_eq!(network_target_count(3, 0.40), 2);
        assert_eq!(network_target_count(1, 0.40), 1);
        assert_eq!(network_target_count(0, 0.40), 0);
    }

    #[tokio::test]
    async fn test_drive_failure_round_trip() {
        let cluster = Arc::new(MockCluster::new(3, 3));
        let injector = injector(&cluster);
        let node = cluster.nodes().await.unwrap().remove(0);

        let mut episode = injector.induce_drive_failure(&node).await.unwrap();
        assert_eq!(episode.drive_recoveries.len(), 2);
        assert!(episode.is_open());
        assert_eq!(
            cluster.current_driver_status(&node.id).await,
            DriverStatus::Down
        );

        injector.reverse(&mut episode).await.unwrap();
        assert!(!episode.is_open());
        assert_eq!(
            cluster.current_driver_status(&node.id).await,
            DriverStatus::Up
        );
    }

    #[tokio::test]
    async fn test_second_reversal_is_an_explicit_error() {
        let cluster = Arc::new(MockCluster::new(1, 1));
        let injector = injector(&cluster);
        let node = cluster.nodes().await.unwrap().remove(0);

        let mut episode = injector.induce_drive_failure(&node).await.unwrap();
        injector.reverse(&mut episode).await.unwrap();

        let err = injector.reverse(&mut episode).await.unwrap_err();
        assert!(err.is_reversal());
    }

    #[tokio::test]
    async fn test_induction_failure_reports_partial_progress() {
        let cluster = Arc::new(MockCluster::new(1, 1));
        let node = cluster.nodes().await.unwrap().remove(0);
        cluster.script_yank_failure(&node.id).await;

        let err = injector(&cluster)
            .induce_drive_failure(&node)
            .await
            .unwrap_err();
        match err {
            Error::Induction { detail, .. } => {
                assert!(detail.contains("0 of 2 drives"));
            }
            other => panic!("expected induction failure, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_network_error_targets_and_clears_same_nodes() {
        let cluster = Arc::new(MockCluster::new(5, 3));
        let injector = injector(&cluster);
        let workers = cluster.worker_nodes().await.unwrap();

        let mut episode = injector
            .induce_network_error(&workers, NetworkErrorKind::Drop, &NetworkErrorConfig::default())
            .await
            .unwrap();
        assert_eq!(episode.targets.len(), 3);
        assert_eq!(cluster.active_network_rules().await, 3);

        injector.reverse(&mut episode).await.unwrap();
        assert_eq!(cluster.active_network_rules().await, 0);

        let events = cluster.network_events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].op, NetworkErrorOp::Delete);
        assert_eq!(events[1].drop_percentage, 0);
        assert_eq!(events[1].delay_ms, 0);
        assert_eq!(events[1].nodes, events[0].nodes);
    }

    #[tokio::test]
    async fn test_stuck_driver_turns_reversal_failure() {
        let cluster = Arc::new(MockCluster::new(1, 1));
        let injector = injector(&cluster);
        let node = cluster.nodes().await.unwrap().remove(0);
        cluster.script_stuck_driver(&node.id).await;

        let mut episode = injector.induce_drive_failure(&node).await.unwrap();
        let err = injector.reverse(&mut episode).await.unwrap_err();
        assert!(err.is_reversal());
        assert!(episode.is_open());
    }

    #[tokio::test]
    async fn test_driver_crash_waits_out_restart_lag() {
        let cluster = Arc::new(MockCluster::new(2, 2));
        let injector = injector(&cluster);
        let nodes = cluster.storage_nodes().await.unwrap();

        let mut episode = injector.induce_driver_crash(&nodes).await.unwrap();
        injector.reverse(&mut episode).await.unwrap();
        assert!(!episode.is_open());
        for node in &nodes {
            assert_eq!(
                cluster.current_driver_status(&node.id).await,
                DriverStatus::Up
            );
        }
    }
}
