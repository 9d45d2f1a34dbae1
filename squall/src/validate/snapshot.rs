//! Snapshot-schedule validation.
//!
//! Ensures a recurring snapshot policy exists for a workload, then polls
//! for evidence that scheduled snapshots are actually produced, volume by
//! volume. Volumes on a backing medium without scheduled-snapshot support
//! are skipped, not failed.

use squall_common::config::ScheduleTimings;
use squall_common::error::{Error, Result};
use squall_common::poll::{Observation, poll_until};
use squall_common::types::{SchedulePolicy, WorkloadContext};
use squall_common::{PolicyDriver, VolumeDriver};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info};

/// Progress of one (workload, policy) validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    Absent,
    Ensuring,
    Ensured,
    Validating,
    Validated,
    ValidationFailed,
}

impl std::fmt::Display for ScheduleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Ensuring => write!(f, "ensuring"),
            Self::Ensured => write!(f, "ensured"),
            Self::Validating => write!(f, "validating"),
            Self::Validated => write!(f, "validated"),
            Self::ValidationFailed => write!(f, "validation-failed"),
        }
    }
}

/// One validation run for a (workload, policy) pair, with its recorded
/// state trace.
#[derive(Debug)]
pub struct ScheduleRun {
    pub policy: String,
    pub state: ScheduleState,
    trace: Vec<ScheduleState>,
}

impl ScheduleRun {
    pub fn new(policy: impl Into<String>) -> Self {
        Self {
            policy: policy.into(),
            state: ScheduleState::Absent,
            trace: vec![ScheduleState::Absent],
        }
    }

    fn advance(&mut self, to: ScheduleState) {
        debug!(policy = %self.policy, from = %self.state, to = %to, "schedule state transition");
        self.state = to;
        self.trace.push(to);
    }

    pub fn trace(&self) -> &[ScheduleState] {
        &self.trace
    }
}

/// Counts from one completed validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleOutcome {
    pub validated_volumes: usize,
    pub skipped_volumes: usize,
}

/// Ensures snapshot policies and validates that schedules produce
/// snapshots.
pub struct ScheduleValidator<V, P> {
    volumes: Arc<V>,
    policies: Arc<P>,
    timings: ScheduleTimings,
}

impl<V, P> ScheduleValidator<V, P>
where
    V: VolumeDriver,
    P: PolicyDriver,
{
    pub fn new(volumes: Arc<V>, policies: Arc<P>, timings: ScheduleTimings) -> Self {
        Self {
            volumes,
            policies,
            timings,
        }
    }

    /// Reuse the policy if it already exists; otherwise create it and wait
    /// out the grace period so at least one scheduled snapshot cycle can
    /// elapse before anything is validated.
    pub async fn ensure_policy(&self, run: &mut ScheduleRun) -> Result<()> {
        run.advance(ScheduleState::Ensuring);
        match self.policies.get_policy(&run.policy).await? {
            Some(existing) => {
                info!(policy = %existing.name, "schedule policy already exists, reusing");
            }
            None => {
                let policy = SchedulePolicy {
                    name: run.policy.clone(),
                    interval_minutes: self.timings.interval_minutes,
                    retain: self.timings.retain,
                };
                info!(
                    policy = %policy.name,
                    interval_minutes = policy.interval_minutes,
                    retain = policy.retain,
                    "creating schedule policy"
                );
                self.policies.create_policy(policy).await?;
                info!(
                    grace = ?self.timings.creation_grace,
                    "waiting for the first scheduled snapshot cycle"
                );
                sleep(self.timings.creation_grace).await;
            }
        }
        run.advance(ScheduleState::Ensured);
        Ok(())
    }

    /// Query the derived schedule of every eligible volume until it reports
    /// at least one snapshot status entry. Zero entries after a completed
    /// query is a validation failure, not a timeout.
    pub async fn validate_workload(
        &self,
        run: &mut ScheduleRun,
        ctx: &WorkloadContext,
    ) -> Result<ScheduleOutcome> {
        run.advance(ScheduleState::Validating);

        let volumes = self.volumes.volumes(ctx).await?;
        if volumes.is_empty() {
            run.advance(ScheduleState::ValidationFailed);
            return Err(Error::Validation {
                what: format!("snapshot schedules for {}", ctx.key),
                detail: "workload has no volumes".to_string(),
            });
        }

        let namespace = ctx.namespace();
        let mut outcome = ScheduleOutcome {
            validated_volumes: 0,
            skipped_volumes: 0,
        };

        for volume in &volumes {
            if self.volumes.is_pure_backed(volume).await? {
                info!(
                    volume = %volume.name,
                    "backing medium does not support scheduled snapshots, skipping"
                );
                outcome.skipped_volumes += 1;
                continue;
            }

            let schedule_name = format!("{}-interval-schedule", volume.name);
            let what = format!("snapshot schedule status for {schedule_name} in {namespace}");
            let result = poll_until(
                &what,
                self.timings.poll_interval,
                self.timings.poll_timeout,
                || {
                    let schedule_name = schedule_name.clone();
                    let namespace = namespace.clone();
                    async move {
                        Observation::from_result(
                            self.policies.schedule_status(&schedule_name, &namespace).await,
                        )
                    }
                },
            )
            .await;

            let entries = match result {
                Ok(entries) => entries,
                Err(e) => {
                    run.advance(ScheduleState::ValidationFailed);
                    return Err(e);
                }
            };
            if entries.is_empty() {
                run.advance(ScheduleState::ValidationFailed);
                return Err(Error::Validation {
                    what: format!("snapshot schedule {schedule_name}"),
                    detail: "no scheduled snapshot status entries".to_string(),
                });
            }
            for entry in &entries {
                debug!(
                    schedule = %schedule_name,
                    snapshot = %entry.snapshot_name,
                    phase = ?entry.phase,
                    "scheduled snapshot reported"
                );
            }
            outcome.validated_volumes += 1;
        }

        run.advance(ScheduleState::Validated);
        Ok(outcome)
    }
}
