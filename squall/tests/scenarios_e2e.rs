//! End-to-end scenario runs against the mock cluster.
//!
//! Timings are shrunk to milliseconds; the sequencing and reporting under
//! test is identical to a real run.

use squall::scenario::{
    CancelFlag, Scenario, ScenarioConfig, ScenarioKind, ScenarioStatus, StepStatus,
};
use squall_common::config::{FaultTimings, NetworkErrorConfig, ScheduleTimings, Timings};
use squall_common::mock::MockCluster;
use squall_common::types::{DriverStatus, NetworkErrorKind, NetworkErrorOp, NodeId};
use std::sync::Arc;
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

fn fast_schedule_timings() -> ScheduleTimings {
    ScheduleTimings {
        creation_grace: Duration::from_millis(1),
        poll_timeout: Duration::from_millis(50),
        poll_interval: Duration::from_millis(1),
        ..Default::default()
    }
}

fn fast_config() -> ScenarioConfig {
    ScenarioConfig {
        wall_clock_budget: Duration::from_millis(40),
        destroy_timeout: Duration::from_millis(50),
        driver_health_timeout: Duration::from_millis(200),
        health_poll_interval: Duration::from_millis(1),
        ..Default::default()
    }
}

fn scenario(
    cluster: &Arc<MockCluster>,
    config: ScenarioConfig,
) -> Scenario<MockCluster, MockCluster, MockCluster, MockCluster> {
    Scenario::new(
        cluster.clone(),
        cluster.clone(),
        cluster.clone(),
        cluster.clone(),
        fast_timings(),
        fast_schedule_timings(),
        NetworkErrorConfig::default(),
        config,
    )
}

#[tokio::test]
async fn test_setup_teardown_passes() {
    let cluster = Arc::new(MockCluster::new(3, 3));
    let report = scenario(&cluster, fast_config())
        .run(ScenarioKind::SetupTeardown)
        .await;

    assert_eq!(report.status, ScenarioStatus::Passed);
    assert_eq!(report.leaked_episodes, 0);
    assert!(report.steps.iter().all(|s| s.status == StepStatus::Passed));
    assert!(cluster.is_torn_down("setupteardown-0").await);
}

#[tokio::test]
async fn test_scale_factor_deploys_multiple_instances() {
    let cluster = Arc::new(MockCluster::new(3, 3));
    let config = ScenarioConfig {
        scale_factor: 2,
        ..fast_config()
    };
    let report = scenario(&cluster, config)
        .run(ScenarioKind::SetupTeardown)
        .await;

    assert_eq!(report.status, ScenarioStatus::Passed);
    assert!(cluster.is_torn_down("setupteardown-0").await);
    assert!(cluster.is_torn_down("setupteardown-1").await);
}

#[tokio::test]
async fn test_drive_failure_full_cycle() {
    let cluster = Arc::new(MockCluster::new(3, 3));
    let report = scenario(&cluster, fast_config())
        .run(ScenarioKind::DriveFailure)
        .await;

    assert_eq!(report.status, ScenarioStatus::Passed);
    assert_eq!(report.leaked_episodes, 0);
    assert!(cluster.is_torn_down("drivefailure-0").await);
    assert_eq!(
        cluster.current_driver_status(&NodeId::new("node-1")).await,
        DriverStatus::Up
    );

    // Failures must be attributable to named phases; the cycle's steps are
    // all present and passed.
    let names: Vec<&str> = report.steps.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"induce drive-failure on node-1"));
    assert!(names.contains(&"reverse drive-failure on node-1"));
    assert!(names.contains(&"validate storage driver on node-1"));
    assert!(report.steps.iter().all(|s| s.status == StepStatus::Passed));
}

#[tokio::test]
async fn test_unreversible_fault_fails_and_reports_leak() {
    let cluster = Arc::new(MockCluster::new(3, 3));
    cluster.script_stuck_driver(&NodeId::new("node-1")).await;

    let report = scenario(&cluster, fast_config())
        .run(ScenarioKind::DriveFailure)
        .await;

    assert_eq!(report.status, ScenarioStatus::Failed);
    assert_eq!(report.leaked_episodes, 1);

    let failed: Vec<_> = report.failed_steps().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "reverse drive-failure on node-1");

    // Teardown is still attempted after the abort.
    assert!(cluster.is_torn_down("drivefailure-0").await);
}

#[tokio::test]
async fn test_driver_down_bounces_every_storage_node() {
    let cluster = Arc::new(MockCluster::new(4, 2));
    let report = scenario(&cluster, fast_config())
        .run(ScenarioKind::DriverDown)
        .await;

    assert_eq!(report.status, ScenarioStatus::Passed);
    assert_eq!(report.leaked_episodes, 0);
    for node in ["node-1", "node-2"] {
        let id = NodeId::new(node);
        assert_eq!(cluster.current_driver_status(&id).await, DriverStatus::Up);
        assert!(
            report
                .steps
                .iter()
                .any(|s| s.name == format!("induce driver-stop on {node}"))
        );
    }
}

#[tokio::test]
async fn test_driver_crash_waits_for_supervisor_restart() {
    let cluster = Arc::new(MockCluster::new(3, 2));
    let report = scenario(&cluster, fast_config())
        .run(ScenarioKind::DriverCrash)
        .await;

    assert_eq!(report.status, ScenarioStatus::Passed);
    assert_eq!(report.leaked_episodes, 0);
}

#[tokio::test]
async fn test_driver_down_attached_targets_workload_nodes_only() {
    let cluster = Arc::new(MockCluster::new(4, 3));
    let report = scenario(&cluster, fast_config())
        .run(ScenarioKind::DriverDownAttached)
        .await;

    assert_eq!(report.status, ScenarioStatus::Passed);
    // The workload runs on node-1 only; no other node's driver is bounced.
    assert!(
        report
            .steps
            .iter()
            .any(|s| s.name == "induce driver-stop on node-1")
    );
    assert!(
        !report
            .steps
            .iter()
            .any(|s| s.name == "induce driver-stop on node-2")
    );
}

#[tokio::test]
async fn test_app_delete_with_driver_down_completes_destroy() {
    let cluster = Arc::new(MockCluster::new(3, 3));
    let report = scenario(&cluster, fast_config())
        .run(ScenarioKind::DriverDownAppDelete)
        .await;

    assert_eq!(report.status, ScenarioStatus::Passed);
    assert_eq!(report.leaked_episodes, 0);
    assert!(cluster.is_torn_down("voldriverappdown-0").await);
    let names: Vec<&str> = report.steps.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"destroy voldriverappdown-0 with driver down"));
    assert!(names.contains(&"wait for destroy of voldriverappdown-0"));
}

#[tokio::test]
async fn test_app_scale_up_and_down() {
    let cluster = Arc::new(MockCluster::new(4, 3));
    let report = scenario(&cluster, fast_config())
        .run(ScenarioKind::AppScale)
        .await;

    assert_eq!(report.status, ScenarioStatus::Passed);
    let names: Vec<&str> = report.steps.iter().map(|s| s.name.as_str()).collect();
    assert!(names.iter().any(|n| n.starts_with("scale up")));
    assert!(names.iter().any(|n| n.starts_with("scale down")));
}

#[tokio::test]
async fn test_cordon_deploy_destroy_restores_schedulability() {
    let cluster = Arc::new(MockCluster::new(4, 2));
    let report = scenario(&cluster, fast_config())
        .run(ScenarioKind::CordonDeployDestroy)
        .await;

    assert_eq!(report.status, ScenarioStatus::Passed);
    for i in 1..=4 {
        assert!(
            cluster.is_schedulable(&NodeId::new(format!("node-{i}"))).await,
            "node-{i} left cordoned"
        );
    }
}

#[tokio::test]
async fn test_cordon_storage_nodes_skips_without_storageless_nodes() {
    let cluster = Arc::new(MockCluster::new(3, 3));
    let report = scenario(&cluster, fast_config())
        .run(ScenarioKind::CordonStorageNodes)
        .await;

    assert_eq!(report.status, ScenarioStatus::Passed);
    assert!(
        report
            .steps
            .iter()
            .any(|s| s.status == StepStatus::Skipped)
    );
}

#[tokio::test]
async fn test_network_storm_alternates_and_targets_worker_subset() {
    let cluster = Arc::new(MockCluster::new(5, 3));
    let config = ScenarioConfig {
        wall_clock_budget: Duration::from_millis(150),
        ..fast_config()
    };
    let report = scenario(&cluster, config)
        .run(ScenarioKind::NetworkStorm)
        .await;

    assert_eq!(report.status, ScenarioStatus::Passed);
    assert_eq!(report.leaked_episodes, 0);
    assert_eq!(cluster.active_network_rules().await, 0);

    let events = cluster.network_events().await;
    let adds: Vec<_> = events
        .iter()
        .filter(|e| e.op == NetworkErrorOp::Add)
        .collect();
    let deletes: Vec<_> = events
        .iter()
        .filter(|e| e.op == NetworkErrorOp::Delete)
        .collect();
    assert!(adds.len() >= 2, "expected at least two fault cycles");
    assert_eq!(adds.len(), deletes.len());

    for (i, add) in adds.iter().enumerate() {
        // 40% of 5 workers, rounded up: exactly 3 targets.
        assert_eq!(add.nodes.len(), 3);
        assert_eq!(add.drop_percentage, 20);
        assert_eq!(add.delay_ms, 250);
        // Sub-kind alternates across iterations.
        let expected = if i % 2 == 0 {
            NetworkErrorKind::Drop
        } else {
            NetworkErrorKind::Delay
        };
        assert_eq!(add.kind, expected);
        // Clearing restores 0% drop / 0ms delay on the same nodes.
        assert_eq!(deletes[i].nodes, add.nodes);
        assert_eq!(deletes[i].drop_percentage, 0);
        assert_eq!(deletes[i].delay_ms, 0);
    }
}

#[tokio::test]
async fn test_quorum_violation_fails_scenario_without_retry() {
    let cluster = Arc::new(MockCluster::new(5, 3));
    cluster.script_degraded_kvdb(2).await;

    let report = scenario(&cluster, fast_config())
        .run(ScenarioKind::NetworkStorm)
        .await;

    assert_eq!(report.status, ScenarioStatus::Failed);
    // The network fault was reversed before the quorum check fired.
    assert_eq!(report.leaked_episodes, 0);
    assert_eq!(cluster.active_network_rules().await, 0);

    let failed: Vec<_> = report.failed_steps().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "check kvdb quorum membership");
    assert!(cluster.is_torn_down("networkstorm-0").await);
}

#[tokio::test]
async fn test_empty_snapshot_statuses_are_a_validation_failure() {
    let cluster = Arc::new(MockCluster::new(5, 3));
    cluster.script_empty_schedule_status().await;

    let report = scenario(&cluster, fast_config())
        .run(ScenarioKind::NetworkStorm)
        .await;

    assert_eq!(report.status, ScenarioStatus::Failed);
    let failed: Vec<_> = report.failed_steps().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "validate snapshot schedules");
    let detail = failed[0].detail.as_deref().unwrap();
    assert!(detail.contains("no scheduled snapshot status entries"));
    // Still a clean cluster: fault reversed, workloads torn down.
    assert_eq!(cluster.active_network_rules().await, 0);
    assert!(cluster.is_torn_down("networkstorm-0").await);
}

#[tokio::test]
async fn test_cancellation_is_honored_between_fault_cycles() {
    let cluster = Arc::new(MockCluster::new(5, 3));
    let cancel = CancelFlag::new();
    cancel.cancel();

    let report = scenario(&cluster, fast_config())
        .with_cancel_flag(cancel)
        .run(ScenarioKind::NetworkStorm)
        .await;

    assert_eq!(report.status, ScenarioStatus::Cancelled);
    assert_eq!(report.leaked_episodes, 0);
    // No fault cycle started, and the workloads were still torn down.
    assert!(cluster.network_events().await.is_empty());
    assert!(cluster.is_torn_down("networkstorm-0").await);
}

#[tokio::test]
async fn test_teardown_failure_fails_the_scenario() {
    let cluster = Arc::new(MockCluster::new(3, 3));
    cluster.script_teardown_failure().await;

    let report = scenario(&cluster, fast_config())
        .run(ScenarioKind::SetupTeardown)
        .await;

    assert_eq!(report.status, ScenarioStatus::Failed);
    let failed: Vec<_> = report.failed_steps().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "teardown workloads");
}
