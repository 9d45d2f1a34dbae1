//! Scenario orchestration.
//!
//! The orchestrator drives a linear or looping sequence of named steps:
//! deploy, validate the baseline, run fault cycles (induce, hold, observe,
//! reverse, re-validate), and tear down. Any failure marks the scenario
//! failed, but teardown of every workload the scenario created is always
//! attempted so test resources do not leak. Fault episodes are tracked for
//! the scenario's lifetime; an episode still open at the end is reported as
//! leaked and fails the run.

pub mod report;

pub use report::{ScenarioReport, ScenarioStatus, StepReport, StepStatus};

use crate::fault::FaultInjector;
use crate::validate::{ClusterHealthValidator, ScheduleRun, ScheduleValidator};
use rand::RngExt;
use squall_common::config::{NetworkErrorConfig, ScheduleTimings, Timings};
use squall_common::error::{Error, Result};
use squall_common::types::{
    FaultEpisode, FaultKind, NetworkErrorKind, Node, TeardownOpts, WorkloadContext,
};
use squall_common::{NodeDriver, PolicyDriver, SchedulerDriver, VolumeDriver};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Cooperative cancellation handle.
///
/// Cancellation is honored between fault cycles and after a begun fault's
/// reversal completes, never mid-episode, so the cluster is not left
/// disrupted. A cancelled scenario still tears down.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The scenarios the engine knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    /// Deploy, validate, tear down.
    SetupTeardown,
    /// Yank every drive on one node per workload, recover, re-validate.
    DriveFailure,
    /// Stop and restart the storage driver on every storage node.
    DriverDown,
    /// Stop and restart the storage driver on the workloads' own nodes.
    DriverDownAttached,
    /// Crash the storage driver on every storage node.
    DriverCrash,
    /// Destroy a workload while the driver on one of its nodes is down;
    /// the lost unmount must not block volume cleanup once the driver is
    /// back.
    DriverDownAppDelete,
    /// Scale each workload up to the storage-node count and back down.
    AppScale,
    /// Cordon all worker nodes but one, then deploy and destroy.
    CordonDeployDestroy,
    /// Cordon every storage node, then deploy and destroy.
    CordonStorageNodes,
    /// Long-running loop: inject network errors on a worker subset,
    /// alternating drop and delay, until the wall-clock budget elapses.
    NetworkStorm,
}

impl ScenarioKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetupTeardown => "setup-teardown",
            Self::DriveFailure => "drive-failure",
            Self::DriverDown => "driver-down",
            Self::DriverDownAttached => "driver-down-attached",
            Self::DriverCrash => "driver-crash",
            Self::DriverDownAppDelete => "driver-down-app-delete",
            Self::AppScale => "app-scale",
            Self::CordonDeployDestroy => "cordon-deploy-destroy",
            Self::CordonStorageNodes => "cordon-storage-nodes",
            Self::NetworkStorm => "network-storm",
        }
    }

    /// Workload key prefix used at deploy time.
    fn app_prefix(&self) -> &'static str {
        match self {
            Self::SetupTeardown => "setupteardown",
            Self::DriveFailure => "drivefailure",
            Self::DriverDown => "voldriverdown",
            Self::DriverDownAttached => "voldriverdownattachednode",
            Self::DriverCrash => "voldrivercrash",
            Self::DriverDownAppDelete => "voldriverappdown",
            Self::AppScale => "applicationscaleupdown",
            Self::CordonDeployDestroy | Self::CordonStorageNodes => "cordondeploydestroy",
            Self::NetworkStorm => "networkstorm",
        }
    }
}

/// Knobs common to every scenario.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Workload instances deployed per scenario.
    pub scale_factor: usize,
    /// Wall-clock budget for long-running fault loops.
    pub wall_clock_budget: Duration,
    /// Snapshot schedule policy name.
    pub policy_name: String,
    pub teardown: TeardownOpts,
    /// Bound on waiting for a destroyed workload to disappear.
    pub destroy_timeout: Duration,
    /// Bound on each per-node driver liveness check.
    pub driver_health_timeout: Duration,
    pub health_poll_interval: Duration,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            scale_factor: 1,
            wall_clock_budget: Duration::from_secs(24 * 60 * 60),
            policy_name: "intervalpolicy".to_string(),
            teardown: TeardownOpts::default(),
            destroy_timeout: Duration::from_secs(5 * 60),
            driver_health_timeout: Duration::from_secs(120),
            health_poll_interval: Duration::from_secs(5),
        }
    }
}

/// Record a step outcome and pass the result through.
fn record<T>(report: &mut ScenarioReport, index: usize, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            report.pass_step(index);
            Ok(value)
        }
        Err(e) => {
            report.fail_step(index, e.to_string());
            Err(e)
        }
    }
}

/// Top-level state machine driving one scenario against one cluster.
///
/// Owns the workload contexts and fault episodes for the scenario's
/// lifetime; no other component retains or mutates them.
pub struct Scenario<S, N, V, P> {
    scheduler: Arc<S>,
    nodes: Arc<N>,
    volumes: Arc<V>,
    injector: FaultInjector<S, N, V>,
    health: ClusterHealthValidator<V>,
    snapshots: ScheduleValidator<V, P>,
    timings: Timings,
    network: NetworkErrorConfig,
    config: ScenarioConfig,
    cancel: CancelFlag,
    contexts: Vec<WorkloadContext>,
    episodes: Vec<FaultEpisode>,
}

impl<S, N, V, P> Scenario<S, N, V, P>
where
    S: SchedulerDriver,
    N: NodeDriver,
    V: VolumeDriver,
    P: PolicyDriver,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scheduler: Arc<S>,
        nodes: Arc<N>,
        volumes: Arc<V>,
        policies: Arc<P>,
        timings: Timings,
        schedule_timings: ScheduleTimings,
        network: NetworkErrorConfig,
        config: ScenarioConfig,
    ) -> Self {
        let injector = FaultInjector::new(
            scheduler.clone(),
            nodes.clone(),
            volumes.clone(),
            timings.clone(),
        );
        let health = ClusterHealthValidator::new(
            volumes.clone(),
            config.driver_health_timeout,
            config.health_poll_interval,
        );
        let snapshots = ScheduleValidator::new(volumes.clone(), policies, schedule_timings);
        Self {
            scheduler,
            nodes,
            volumes,
            injector,
            health,
            snapshots,
            timings,
            network,
            config,
            cancel: CancelFlag::new(),
            contexts: Vec::new(),
            episodes: Vec::new(),
        }
    }

    /// Install an external cancellation handle.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the scenario to completion. Teardown of every workload the
    /// scenario created is attempted whatever happened before it.
    pub async fn run(mut self, kind: ScenarioKind) -> ScenarioReport {
        let mut report = ScenarioReport::new(kind.name());
        info!(scenario = kind.name(), "scenario starting");

        let outcome = self.execute(kind, &mut report).await;
        if let Err(e) = &outcome {
            error!(
                scenario = kind.name(),
                kind = e.kind_label(),
                error = %e,
                "scenario failed; attempting teardown"
            );
        }

        let teardown_ok = self.teardown_all(&mut report).await;

        report.leaked_episodes = self.episodes.iter().filter(|e| e.is_open()).count();
        if report.leaked_episodes > 0 {
            error!(
                leaked = report.leaked_episodes,
                "fault episodes leaked past scenario boundary"
            );
        }

        let status = if outcome.is_err() || !teardown_ok || report.leaked_episodes > 0 {
            ScenarioStatus::Failed
        } else if self.cancel.is_cancelled() {
            ScenarioStatus::Cancelled
        } else {
            ScenarioStatus::Passed
        };
        report.finish(status);
        info!(scenario = kind.name(), status = ?status, "scenario finished");
        report
    }

    async fn execute(&mut self, kind: ScenarioKind, report: &mut ScenarioReport) -> Result<()> {
        match kind {
            ScenarioKind::SetupTeardown => {
                self.deploy_all(kind.app_prefix(), report).await?;
                self.validate_all(report, "validate workloads after deploy").await
            }
            ScenarioKind::DriveFailure => self.run_drive_failure(kind, report).await,
            ScenarioKind::DriverDown => self.run_driver_bounce(kind, report, false).await,
            ScenarioKind::DriverDownAttached => self.run_driver_bounce(kind, report, true).await,
            ScenarioKind::DriverCrash => self.run_driver_crash(kind, report).await,
            ScenarioKind::DriverDownAppDelete => self.run_app_delete(kind, report).await,
            ScenarioKind::AppScale => self.run_app_scale(kind, report).await,
            ScenarioKind::CordonDeployDestroy => self.run_cordon(kind, report, false).await,
            ScenarioKind::CordonStorageNodes => self.run_cordon(kind, report, true).await,
            ScenarioKind::NetworkStorm => self.run_network_storm(kind, report).await,
        }
    }

    // ── Shared steps ───────────────────────────────────────────────────────

    async fn deploy_all(&mut self, prefix: &str, report: &mut ScenarioReport) -> Result<()> {
        let idx = report.begin_step(format!(
            "deploy {} instance(s) of {prefix}",
            self.config.scale_factor
        ));
        for i in 0..self.config.scale_factor {
            let name = format!("{prefix}-{i}");
            match self.scheduler.deploy(&name).await {
                Ok(mut contexts) => self.contexts.append(&mut contexts),
                Err(e) => {
                    report.fail_step(idx, e.to_string());
                    return Err(e);
                }
            }
        }
        info!(contexts = self.contexts.len(), "workloads deployed");
        report.pass_step(idx);
        Ok(())
    }

    /// Validate every context, aggregating all failures so one workload's
    /// failure does not suppress another's report.
    async fn validate_all(&self, report: &mut ScenarioReport, name: &str) -> Result<()> {
        let idx = report.begin_step(name);
        let mut failures = Vec::new();
        for ctx in &self.contexts {
            if let Err(e) = self.scheduler.validate(ctx).await {
                warn!(workload = %ctx.key, error = %e, "workload validation failed");
                failures.push(format!("{}: {e}", ctx.key));
            }
        }
        if failures.is_empty() {
            report.pass_step(idx);
            return Ok(());
        }
        let detail = failures.join("; ");
        report.fail_step(idx, &detail);
        Err(Error::Validation {
            what: name.to_string(),
            detail,
        })
    }

    /// Observe every workload mid-fault, aggregating failures.
    async fn observe_all(&self, report: &mut ScenarioReport, name: &str) -> Result<()> {
        let idx = report.begin_step(name);
        let mut failures = Vec::new();
        for ctx in &self.contexts {
            if let Err(e) = self.injector.observe_degraded(ctx).await {
                failures.push(format!("{}: {e}", ctx.key));
            }
        }
        if failures.is_empty() {
            report.pass_step(idx);
            return Ok(());
        }
        let detail = failures.join("; ");
        report.fail_step(idx, &detail);
        Err(Error::Validation {
            what: name.to_string(),
            detail,
        })
    }

    /// No fault is injected unless every workload has at least one healthy
    /// volume and can be scheduled on at least one eligible node.
    async fn baseline_gate(&self, report: &mut ScenarioReport) -> Result<()> {
        let idx = report.begin_step("baseline gate: volumes present, nodes schedulable");
        let mut failures = Vec::new();
        for ctx in &self.contexts {
            match self.volumes.volumes(ctx).await {
                Ok(volumes) if volumes.is_empty() => {
                    failures.push(format!("{}: no volumes", ctx.key));
                }
                Ok(_) => {}
                Err(e) => failures.push(format!("{}: {e}", ctx.key)),
            }
            match self.scheduler.nodes_for(ctx).await {
                Ok(nodes) if !nodes.iter().any(|n| n.schedulable) => {
                    failures.push(format!("{}: no schedulable nodes", ctx.key));
                }
                Ok(_) => {}
                Err(e) => failures.push(format!("{}: {e}", ctx.key)),
            }
        }
        if failures.is_empty() {
            report.pass_step(idx);
            return Ok(());
        }
        let detail = failures.join("; ");
        report.fail_step(idx, &detail);
        Err(Error::Validation {
            what: "baseline gate".to_string(),
            detail,
        })
    }

    async fn teardown_all(&mut self, report: &mut ScenarioReport) -> bool {
        if self.contexts.is_empty() {
            return true;
        }
        let idx = report.begin_step("teardown workloads");
        let mut failures = Vec::new();
        for ctx in &self.contexts {
            if let Err(e) = self.scheduler.teardown(ctx, self.config.teardown).await {
                warn!(workload = %ctx.key, error = %e, "teardown failed");
                failures.push(format!("{}: {e}", ctx.key));
            }
        }
        if failures.is_empty() {
            report.pass_step(idx);
            true
        } else {
            report.fail_step(idx, failures.join("; "));
            false
        }
    }

    // ── Fault scenarios ────────────────────────────────────────────────────

    async fn run_drive_failure(
        &mut self,
        kind: ScenarioKind,
        report: &mut ScenarioReport,
    ) -> Result<()> {
        self.deploy_all(kind.app_prefix(), report).await?;
        self.validate_all(report, "validate workloads after deploy").await?;
        self.baseline_gate(report).await?;

        for i in 0..self.contexts.len() {
            let ctx = self.contexts[i].clone();

            let idx = report.begin_step(format!("get nodes running {}", ctx.key));
            let picked = self.scheduler.nodes_for(&ctx).await.and_then(|nodes| {
                nodes.first().cloned().ok_or_else(|| Error::Validation {
                    what: format!("nodes for {}", ctx.key),
                    detail: "workload is not running anywhere".to_string(),
                })
            });
            let target = record(report, idx, picked)?;

            let idx = report.begin_step(format!("induce drive-failure on {}", target.id));
            let episode = record(
                report,
                idx,
                self.injector.induce_drive_failure(&target).await,
            )?;
            self.episodes.push(episode);
            let ep = self.episodes.len() - 1;

            self.injector.hold(FaultKind::DriveFailure).await;

            let idx = report.begin_step(format!("observe {} under drive-failure", ctx.key));
            let observed = record(report, idx, self.injector.observe_degraded(&ctx).await);

            let idx = report.begin_step(format!("reverse drive-failure on {}", target.id));
            let reversed = record(
                report,
                idx,
                self.injector.reverse(&mut self.episodes[ep]).await,
            );

            // Reversal failures outrank everything else in the cycle.
            reversed?;
            observed?;

            let idx = report.begin_step(format!("validate storage driver on {}", target.id));
            record(
                report,
                idx,
                self.health
                    .validate_driver_liveness(std::slice::from_ref(&target))
                    .await,
            )?;
        }

        self.validate_all(report, "validate workloads after recovery").await
    }

    async fn run_driver_bounce(
        &mut self,
        kind: ScenarioKind,
        report: &mut ScenarioReport,
        attached_only: bool,
    ) -> Result<()> {
        self.deploy_all(kind.app_prefix(), report).await?;
        self.validate_all(report, "validate workloads after deploy").await?;
        self.baseline_gate(report).await?;

        let targets = if attached_only {
            self.attached_nodes().await?
        } else {
            self.nodes.storage_nodes().await?
        };

        for node in targets {
            let idx = report.begin_step(format!("induce driver-stop on {}", node.id));
            let episode = record(
                report,
                idx,
                self.injector.induce_driver_stop(std::slice::from_ref(&node)).await,
            )?;
            self.episodes.push(episode);
            let ep = self.episodes.len() - 1;

            self.injector.hold(FaultKind::DriverStop).await;

            let observed = self
                .observe_all(report, &format!("observe workloads with driver stopped on {}", node.id))
                .await;

            let idx = report.begin_step(format!("reverse driver-stop on {}", node.id));
            let reversed = record(
                report,
                idx,
                self.injector.reverse(&mut self.episodes[ep]).await,
            );

            reversed?;
            observed?;

            self.validate_all(report, "validate workloads after driver restart").await?;
        }
        Ok(())
    }

    async fn run_driver_crash(
        &mut self,
        kind: ScenarioKind,
        report: &mut ScenarioReport,
    ) -> Result<()> {
        self.deploy_all(kind.app_prefix(), report).await?;
        self.validate_all(report, "validate workloads after deploy").await?;
        self.baseline_gate(report).await?;

        for node in self.nodes.storage_nodes().await? {
            let idx = report.begin_step(format!("induce driver-crash on {}", node.id));
            let episode = record(
                report,
                idx,
                self.injector.induce_driver_crash(std::slice::from_ref(&node)).await,
            )?;
            self.episodes.push(episode);
            let ep = self.episodes.len() - 1;

            self.injector.hold(FaultKind::DriverCrash).await;

            let observed = self
                .observe_all(report, &format!("observe workloads with driver crashed on {}", node.id))
                .await;

            let idx = report.begin_step(format!("await driver restart on {}", node.id));
            let reversed = record(
                report,
                idx,
                self.injector.reverse(&mut self.episodes[ep]).await,
            );

            reversed?;
            observed?;
        }

        self.validate_all(report, "validate workloads after crashes").await
    }

    async fn run_app_delete(
        &mut self,
        kind: ScenarioKind,
        report: &mut ScenarioReport,
    ) -> Result<()> {
        self.deploy_all(kind.app_prefix(), report).await?;
        self.validate_all(report, "validate workloads after deploy").await?;
        self.baseline_gate(report).await?;

        for i in 0..self.contexts.len() {
            let ctx = self.contexts[i].clone();

            let idx = report.begin_step(format!("pick a node running {}", ctx.key));
            let picked = self.scheduler.nodes_for(&ctx).await.and_then(|nodes| {
                if nodes.is_empty() {
                    return Err(Error::Validation {
                        what: format!("nodes for {}", ctx.key),
                        detail: "workload is not running anywhere".to_string(),
                    });
                }
                let choice = rand::rng().random_range(0..nodes.len());
                Ok(nodes[choice].clone())
            });
            let target = record(report, idx, picked)?;

            let idx = report.begin_step(format!("induce driver-stop on {}", target.id));
            let episode = record(
                report,
                idx,
                self.injector.induce_driver_stop(std::slice::from_ref(&target)).await,
            )?;
            self.episodes.push(episode);
            let ep = self.episodes.len() - 1;

            let idx = report.begin_step(format!("destroy {} with driver down", ctx.key));
            let opts = TeardownOpts {
                wait_for_destroy: false,
                wait_for_resource_leak_cleanup: false,
            };
            record(report, idx, self.scheduler.teardown(&ctx, opts).await)?;

            self.injector.hold(FaultKind::DriverStop).await;

            let idx = report.begin_step(format!("reverse driver-stop on {}", target.id));
            record(
                report,
                idx,
                self.injector.reverse(&mut self.episodes[ep]).await,
            )?;

            // With the driver back, the lost unmount must resolve and the
            // destroy must complete.
            let idx = report.begin_step(format!("wait for destroy of {}", ctx.key));
            record(
                report,
                idx,
                self.scheduler
                    .wait_for_destroy(&ctx, self.config.destroy_timeout)
                    .await,
            )?;
        }
        Ok(())
    }

    async fn run_app_scale(
        &mut self,
        kind: ScenarioKind,
        report: &mut ScenarioReport,
    ) -> Result<()> {
        self.deploy_all(kind.app_prefix(), report).await?;
        self.validate_all(report, "validate workloads after deploy").await?;

        let storage_count = self.nodes.storage_nodes().await?.len() as u32;

        for i in 0..self.contexts.len() {
            let ctx = self.contexts[i].clone();

            let idx = report.begin_step(format!("scale up {} to {storage_count}", ctx.key));
            let scaled_up: Result<()> = async {
                let mut factors = self.scheduler.scale_factors(&ctx).await?;
                for replicas in factors.values_mut() {
                    if *replicas < storage_count {
                        *replicas = storage_count;
                    }
                }
                self.scheduler.scale(&ctx, &factors).await
            }
            .await;
            record(report, idx, scaled_up)?;
            sleep(self.timings.scale_settle).await;
            self.validate_all(report, "validate workloads after scale up").await?;

            let idx = report.begin_step(format!("scale down {} by 1", ctx.key));
            let scaled_down: Result<()> = async {
                let mut factors = self.scheduler.scale_factors(&ctx).await?;
                for replicas in factors.values_mut() {
                    *replicas = replicas.saturating_sub(1);
                }
                self.scheduler.scale(&ctx, &factors).await
            }
            .await;
            record(report, idx, scaled_down)?;
            sleep(self.timings.scale_settle).await;
            self.validate_all(report, "validate workloads after scale down").await?;
        }
        Ok(())
    }

    async fn run_cordon(
        &mut self,
        kind: ScenarioKind,
        report: &mut ScenarioReport,
        storage_only: bool,
    ) -> Result<()> {
        let cordon_targets: Vec<Node> = if storage_only {
            let all = self.nodes.nodes().await?;
            let storage = self.nodes.storage_nodes().await?;
            if all.len() == storage.len() {
                let idx = report.begin_step("cordon storage nodes");
                report.skip_step(idx, "no storage-less nodes detected");
                return Ok(());
            }
            storage
        } else {
            let workers = self.nodes.worker_nodes().await?;
            workers.into_iter().skip(1).collect()
        };

        let idx = report.begin_step(format!("cordon {} node(s)", cordon_targets.len()));
        let cordoned: Result<()> = async {
            for node in &cordon_targets {
                self.scheduler.set_schedulable(&node.id, false).await?;
            }
            Ok(())
        }
        .await;
        record(report, idx, cordoned)?;

        let run: Result<()> = async {
            self.deploy_all(kind.app_prefix(), report).await?;
            self.validate_all(report, "validate workloads on uncordoned nodes").await?;

            let idx = report.begin_step("destroy workloads without waiting");
            let mut destroyed: Result<()> = Ok(());
            for ctx in &self.contexts {
                let opts = TeardownOpts {
                    wait_for_destroy: false,
                    wait_for_resource_leak_cleanup: false,
                };
                if let Err(e) = self.scheduler.teardown(ctx, opts).await {
                    destroyed = Err(e);
                    break;
                }
            }
            record(report, idx, destroyed)?;

            let idx = report.begin_step("wait for workload destruction");
            let mut waited: Result<()> = Ok(());
            for ctx in &self.contexts {
                if let Err(e) = self
                    .scheduler
                    .wait_for_destroy(ctx, self.config.destroy_timeout)
                    .await
                {
                    waited = Err(e);
                    break;
                }
            }
            record(report, idx, waited)
        }
        .await;

        // Uncordon whatever happened above; leaving nodes cordoned would
        // poison every later scenario on the cluster.
        let idx = report.begin_step("uncordon all worker nodes");
        let mut uncordoned: Result<()> = Ok(());
        for node in self.nodes.worker_nodes().await? {
            if let Err(e) = self.scheduler.set_schedulable(&node.id, true).await {
                uncordoned = Err(e);
            }
        }
        record(report, idx, uncordoned)?;

        run
    }

    async fn run_network_storm(
        &mut self,
        kind: ScenarioKind,
        report: &mut ScenarioReport,
    ) -> Result<()> {
        self.deploy_all(kind.app_prefix(), report).await?;
        self.validate_all(report, "verify applications after deployment").await?;
        self.baseline_gate(report).await?;

        // One schedule state machine per (workload, policy) pair. The first
        // ensure creates the policy and pays the grace wait; the rest reuse.
        let mut schedule_runs: Vec<ScheduleRun> = self
            .contexts
            .iter()
            .map(|_| ScheduleRun::new(self.config.policy_name.clone()))
            .collect();
        let idx = report.begin_step(format!(
            "ensure snapshot schedule policy {}",
            self.config.policy_name
        ));
        let ensured: Result<()> = async {
            for run in &mut schedule_runs {
                self.snapshots.ensure_policy(run).await?;
            }
            Ok(())
        }
        .await;
        record(report, idx, ensured)?;

        let deadline = Instant::now() + self.config.wall_clock_budget;
        let mut error_kind = NetworkErrorKind::Drop;
        let mut iteration: u32 = 0;

        while Instant::now() < deadline {
            if self.cancel.is_cancelled() {
                info!(iteration, "cancellation honored between fault cycles");
                break;
            }
            iteration += 1;
            info!(
                iteration,
                remaining = ?deadline.saturating_duration_since(Instant::now()),
                "starting network fault cycle"
            );

            let workers = self.nodes.worker_nodes().await?;

            let idx = report.begin_step(format!(
                "inject network {error_kind} on worker subset (iteration {iteration})"
            ));
            let episode = record(
                report,
                idx,
                self.injector
                    .induce_network_error(&workers, error_kind, &self.network)
                    .await,
            )?;
            self.episodes.push(episode);
            let ep = self.episodes.len() - 1;

            self.injector.hold(FaultKind::NetworkError).await;

            let idx = report.begin_step("validate storage driver liveness under network error");
            let observed = record(
                report,
                idx,
                self.health.validate_driver_liveness(&workers).await,
            );

            let idx = report.begin_step(format!("clear network {error_kind}"));
            let reversed = record(
                report,
                idx,
                self.injector.reverse(&mut self.episodes[ep]).await,
            );

            reversed?;
            observed?;

            self.validate_all(report, "verify applications after clearing error").await?;

            let via = workers
                .first()
                .map(|n| n.id.clone())
                .ok_or_else(|| Error::Validation {
                    what: "kvdb quorum".to_string(),
                    detail: "no worker nodes to query".to_string(),
                })?;
            let idx = report.begin_step("check kvdb quorum membership");
            record(report, idx, self.health.validate_quorum(&via).await)?;

            let idx = report.begin_step("validate snapshot schedules");
            let mut failures = Vec::new();
            for (run, ctx) in schedule_runs.iter_mut().zip(self.contexts.iter()) {
                if let Err(e) = self.snapshots.validate_workload(run, ctx).await {
                    failures.push(format!("{}: {e}", ctx.key));
                }
            }
            if failures.is_empty() {
                report.pass_step(idx);
            } else {
                let detail = failures.join("; ");
                report.fail_step(idx, &detail);
                return Err(Error::Validation {
                    what: "snapshot schedules".to_string(),
                    detail,
                });
            }

            error_kind = error_kind.alternate();

            // Settle before the next cycle.
            sleep(self.timings.network_error.hold).await;
        }
        Ok(())
    }

    /// Union of the nodes every workload currently runs on.
    async fn attached_nodes(&self) -> Result<Vec<Node>> {
        let mut seen = Vec::new();
        let mut nodes = Vec::new();
        for ctx in &self.contexts {
            for node in self.scheduler.nodes_for(ctx).await? {
                if !seen.contains(&node.id) {
                    seen.push(node.id.clone());
                    nodes.push(node);
                }
            }
        }
        Ok(nodes)
    }
}
