//! Scenario step reporting.
//!
//! Every step is named and reported independently so a failure is
//! attributable to a specific phase ("reverse drive-failure on node-2")
//! rather than a bare stack trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a single scenario step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    InProgress,
    Passed,
    Failed,
    Skipped,
}

/// One named step of a scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure detail or skip reason.
    pub detail: Option<String>,
}

/// Terminal status of a whole scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Running,
    Passed,
    Failed,
    Cancelled,
}

/// Full record of one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub id: Uuid,
    pub scenario: String,
    pub status: ScenarioStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepReport>,
    /// Fault episodes never reversed by the time the scenario ended.
    pub leaked_episodes: usize,
}

impl ScenarioReport {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scenario: scenario.into(),
            status: ScenarioStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            steps: Vec::new(),
            leaked_episodes: 0,
        }
    }

    /// Open a new step; returns its index for the matching pass/fail call.
    pub fn begin_step(&mut self, name: impl Into<String>) -> usize {
        let name = name.into();
        tracing::info!(step = %name, "step started");
        self.steps.push(StepReport {
            name,
            status: StepStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
            detail: None,
        });
        self.steps.len() - 1
    }

    pub fn pass_step(&mut self, index: usize) {
        let step = &mut self.steps[index];
        step.status = StepStatus::Passed;
        step.completed_at = Some(Utc::now());
        tracing::info!(step = %step.name, "step passed");
    }

    pub fn fail_step(&mut self, index: usize, detail: impl Into<String>) {
        let step = &mut self.steps[index];
        let detail = detail.into();
        step.status = StepStatus::Failed;
        step.completed_at = Some(Utc::now());
        tracing::error!(step = %step.name, detail = %detail, "step failed");
        step.detail = Some(detail);
    }

    pub fn skip_step(&mut self, index: usize, reason: impl Into<String>) {
        let step = &mut self.steps[index];
        let reason = reason.into();
        step.status = StepStatus::Skipped;
        step.completed_at = Some(Utc::now());
        tracing::info!(step = %step.name, reason = %reason, "step skipped");
        step.detail = Some(reason);
    }

    pub fn finish(&mut self, status: ScenarioStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| s.status == StepStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_lifecycle() {
        let mut report = ScenarioReport::new("drive-failure");
        let idx = report.begin_step("induce drive-failure on node-1");
        assert_eq!(report.steps[idx].status, StepStatus::InProgress);

        report.pass_step(idx);
        assert_eq!(report.steps[idx].status, StepStatus::Passed);
        assert!(report.steps[idx].completed_at.is_some());
    }

    #[test]
    fn test_failure_is_attributable_to_its_step() {
        let mut report = ScenarioReport::new("drive-failure");
        let a = report.begin_step("induce drive-failure on node-1");
        report.pass_step(a);
        let b = report.begin_step("reverse drive-failure on node-1");
        report.fail_step(b, "driver down after 2m");

        let failed: Vec<_> = report.failed_steps().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "reverse drive-failure on node-1");
        assert_eq!(failed[0].detail.as_deref(), Some("driver down after 2m"));
    }

    #[test]
    fn test_report_serializes() {
        let mut report = ScenarioReport::new("setup-teardown");
        let idx = report.begin_step("deploy");
        report.pass_step(idx);
        report.finish(ScenarioStatus::Passed);

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"setup-teardown\""));
        assert!(json.contains("\"passed\""));
    }
}
