//! Cluster health validation after a disruptive step.
//!
//! Two independent checks: per-node storage-driver liveness (polled, since
//! driver restart is eventually consistent) and coordination-quorum
//! membership (checked once; quorum loss is terminal and needs an operator,
//! so it is never retried).

use squall_common::error::{Error, Result};
use squall_common::poll::{Observation, poll_until};
use squall_common::types::{DriverStatus, KvdbMember, Node, NodeId};
use squall_common::VolumeDriver;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Poll until the storage driver reports Up on `node`.
pub async fn wait_driver_up<V: VolumeDriver>(
    volumes: &V,
    node: &NodeId,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    let what = format!("storage driver up on {node}");
    poll_until(&what, interval, timeout, || {
        let node = node.clone();
        async move {
            match volumes.driver_status(&node).await {
                Ok(DriverStatus::Up) => Observation::Ready(()),
                Ok(status) => Observation::Pending(format!("driver {status}")),
                Err(e) => Observation::Pending(e.to_string()),
            }
        }
    })
    .await
}

/// Decide whether a fetched membership satisfies the quorum rules: a
/// majority of members reachable and voting, with a leader among them.
pub fn check_quorum(members: &[KvdbMember]) -> Result<()> {
    if members.is_empty() {
        return Err(Error::Validation {
            what: "kvdb quorum".to_string(),
            detail: "membership list is empty".to_string(),
        });
    }
    let healthy = members.iter().filter(|m| m.healthy).count();
    if healthy * 2 <= members.len() {
        return Err(Error::Validation {
            what: "kvdb quorum".to_string(),
            detail: format!("{healthy} of {} members reachable and voting", members.len()),
        });
    }
    if !members.iter().any(|m| m.healthy && m.leader) {
        return Err(Error::Validation {
            what: "kvdb quorum".to_string(),
            detail: "no healthy leader".to_string(),
        });
    }
    Ok(())
}

/// Polls node- and cluster-level health after a fault episode.
pub struct ClusterHealthValidator<V> {
    volumes: Arc<V>,
    /// Budget for each per-node driver liveness poll.
    pub driver_timeout: Duration,
    pub poll_interval: Duration,
}

impl<V: VolumeDriver> ClusterHealthValidator<V> {
    pub fn new(volumes: Arc<V>, driver_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            volumes,
            driver_timeout,
            poll_interval,
        }
    }

    /// Check driver liveness on every node, reporting all failing nodes
    /// rather than stopping at the first.
    pub async fn validate_driver_liveness(&self, nodes: &[Node]) -> Result<()> {
        let mut down = Vec::new();
        for node in nodes {
            match wait_driver_up(
                self.volumes.as_ref(),
                &node.id,
                self.driver_timeout,
                self.poll_interval,
            )
            .await
            {
                Ok(()) => info!(node = %node.id, "storage driver up"),
                Err(e) => {
                    warn!(node = %node.id, error = %e, "storage driver not ready");
                    down.push(node.id.clone());
                }
            }
        }
        if down.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = down.iter().map(|n| n.as_str()).collect();
        Err(Error::Validation {
            what: "storage driver liveness".to_string(),
            detail: format!("driver not up on: {}", names.join(", ")),
        })
    }

    /// Fetch quorum membership once, through `via`, and apply the quorum
    /// rules. A violation is reported immediately.
    pub async fn validate_quorum(&self, via: &NodeId) -> Result<()> {
        let members = self
            .volumes
            .kvdb_members(via)
            .await
            .map_err(|e| Error::Validation {
                what: "kvdb quorum".to_string(),
                detail: format!("could not fetch members via {via}: {e}"),
            })?;
        info!(via = %via, members = members.len(), "fetched kvdb membership");
        check_quorum(&members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use squall_common::mock::MockCluster;
    use squall_common::NodeDriver;

    fn member(id: &str, healthy: bool, leader: bool) -> KvdbMember {
        KvdbMember {
            id: id.to_string(),
            healthy,
            leader,
        }
    }

    #[test]
    fn test_quorum_majority_and_leader() {
        let ok = vec![
            member("a", true, true),
            member("b", true, false),
            member("c", false, false),
        ];
        assert!(check_quorum(&ok).is_ok());
    }

    #[test]
    fn test_quorum_minority_fails() {
        let bad = vec![
            member("a", true, true),
            member("b", false, false),
            member("c", false, false),
        ];
        let err = check_quorum(&bad).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("1 of 3 members"));
    }

    #[test]
    fn test_quorum_without_leader_fails() {
        let bad = vec![
            member("a", true, false),
            member("b", true, false),
            member("c", false, true),
        ];
        assert!(check_quorum(&bad).is_err());
    }

    #[test]
    fn test_quorum_empty_membership_fails() {
        assert!(check_quorum(&[]).is_err());
    }

    #[tokio::test]
    async fn test_liveness_reports_every_down_node() {
        let cluster = Arc::new(MockCluster::new(3, 3));
        cluster.script_stuck_driver(&NodeId::new("node-1")).await;
        cluster.script_stuck_driver(&NodeId::new("node-3")).await;

        let validator = ClusterHealthValidator::new(
            cluster.clone(),
            Duration::from_millis(10),
            Duration::from_millis(1),
        );
        let nodes = cluster.nodes().await.unwrap();
        let err = validator.validate_driver_liveness(&nodes).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("node-1"));
        assert!(msg.contains("node-3"));
        assert!(!msg.contains("node-2"));
    }

    #[tokio::test]
    async fn test_degraded_quorum_fails_immediately() {
        let cluster = Arc::new(MockCluster::new(3, 3));
        cluster.script_degraded_kvdb(2).await;

        let validator = ClusterHealthValidator::new(
            cluster.clone(),
            Duration::from_millis(10),
            Duration::from_millis(1),
        );
        let err = validator
            .validate_quorum(&NodeId::new("node-1"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
