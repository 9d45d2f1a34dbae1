//! Squall - fault injection and convergence validation CLI.
//!
//! Runs one scenario against a cluster driver and prints the step report
//! as JSON on stdout. Logs go to stderr.

#![forbid(unsafe_code)]

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use squall::scenario::{CancelFlag, Scenario, ScenarioConfig, ScenarioKind, ScenarioStatus};
use squall_common::config::{
    Environment, FaultTimings, NetworkErrorConfig, ScheduleTimings, Timings,
};
use squall_common::mock::MockCluster;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "squall")]
#[command(author, version, about = "Squall - storage cluster fault injection")]
struct Cli {
    /// Scenario to run
    #[arg(value_enum)]
    scenario: ScenarioArg,

    /// Cluster driver to run against
    #[arg(long, default_value = "mock")]
    driver: String,

    /// Workload instances deployed per scenario
    #[arg(long, default_value = "1")]
    scale_factor: usize,

    /// Wall-clock budget for long-running scenarios (e.g. "24h", "90m")
    #[arg(long)]
    budget: Option<humantime::Duration>,

    /// Snapshot schedule policy name
    #[arg(long, default_value = "intervalpolicy")]
    policy: String,

    /// Worker node count for the mock cluster
    #[arg(long, default_value = "5")]
    nodes: usize,

    /// Storage-capable node count for the mock cluster
    #[arg(long, default_value = "3")]
    storage_nodes: usize,

    /// Shrink holds and poll budgets to milliseconds (mock dry runs)
    #[arg(long)]
    fast: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScenarioArg {
    SetupTeardown,
    DriveFailure,
    DriverDown,
    DriverDownAttached,
    DriverCrash,
    DriverDownAppDelete,
    AppScale,
    CordonDeployDestroy,
    CordonStorageNodes,
    NetworkStorm,
}

impl From<ScenarioArg> for ScenarioKind {
    fn from(arg: ScenarioArg) -> Self {
        match arg {
            ScenarioArg::SetupTeardown => Self::SetupTeardown,
            ScenarioArg::DriveFailure => Self::DriveFailure,
            ScenarioArg::DriverDown => Self::DriverDown,
            ScenarioArg::DriverDownAttached => Self::DriverDownAttached,
            ScenarioArg::DriverCrash => Self::DriverCrash,
            ScenarioArg::DriverDownAppDelete => Self::DriverDownAppDelete,
            ScenarioArg::AppScale => Self::AppScale,
            ScenarioArg::CordonDeployDestroy => Self::CordonDeployDestroy,
            ScenarioArg::CordonStorageNodes => Self::CordonStorageNodes,
            ScenarioArg::NetworkStorm => Self::NetworkStorm,
        }
    }
}

fn accelerated_timings() -> Timings {
    let fast = FaultTimings {
        hold: Duration::from_millis(5),
        recovery_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(5),
    };
    Timings {
        drive_failure: fast,
        network_error: fast,
        driver_stop: fast,
        driver_crash: fast,
        scale_settle: Duration::from_millis(5),
    }
}

fn accelerated_schedule_timings() -> ScheduleTimings {
    ScheduleTimings {
        creation_grace: Duration::from_millis(5),
        poll_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(5),
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging on stderr; stdout carries the JSON report.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cluster = match cli.driver.as_str() {
        "mock" => Arc::new(MockCluster::new(cli.nodes, cli.storage_nodes)),
        other => {
            // A real run must not start with an incomplete environment.
            let env = Environment::from_env()?;
            info!(
                control_plane = %env.control_plane_url,
                account = %env.account_name,
                "environment loaded"
            );
            bail!("unknown cluster driver '{other}' (available: mock)");
        }
    };

    let mut config = ScenarioConfig {
        scale_factor: cli.scale_factor,
        policy_name: cli.policy.clone(),
        ..Default::default()
    };
    if let Some(budget) = cli.budget {
        config.wall_clock_budget = budget.into();
    }
    let (timings, schedule_timings) = if cli.fast {
        config.driver_health_timeout = Duration::from_millis(500);
        config.health_poll_interval = Duration::from_millis(5);
        (accelerated_timings(), accelerated_schedule_timings())
    } else {
        (Timings::default(), ScheduleTimings::default())
    };

    // Ctrl-C requests cancellation; the scenario finishes the current
    // fault cycle's reversal first, then tears down.
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("cancellation requested; finishing current fault cycle");
                cancel.cancel();
            }
        });
    }

    let scenario = Scenario::new(
        cluster.clone(),
        cluster.clone(),
        cluster.clone(),
        cluster.clone(),
        timings,
        schedule_timings,
        NetworkErrorConfig::default(),
        config,
    )
    .with_cancel_flag(cancel);

    let report = scenario.run(cli.scenario.into()).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    match report.status {
        ScenarioStatus::Passed | ScenarioStatus::Cancelled => Ok(()),
        _ => bail!("scenario {} failed", report.scenario),
    }
}
