//! Bounded retry-until-success polling for eventually-consistent remote state.
//!
//! Every state assertion against the cluster under test goes through
//! [`poll_until`] rather than ad hoc sleeps: propagation through the storage
//! control plane and the orchestration platform is slow, and a single
//! primitive keeps the timeout discipline uniform.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Outcome of one observation attempt.
pub enum Observation<T> {
    /// The condition converged; polling stops with this value.
    Ready(T),
    /// Not yet converged (or a transient error); retry while budget remains.
    Pending(String),
    /// Non-retryable condition; propagates immediately.
    Fatal(Error),
}

impl<T> Observation<T> {
    /// Fold a collaborator call into an observation: any error is transient
    /// here and retried as "not yet converged".
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Ready(value),
            Err(err) => Self::Pending(err.to_string()),
        }
    }
}

/// Repeatedly evaluate `observe`, sleeping `interval` between attempts,
/// until it reports [`Observation::Ready`] or the elapsed time exceeds
/// `timeout`.
///
/// Returns as soon as the first observation succeeds and never overshoots
/// `timeout` by more than one `interval`. On timeout the error carries the
/// last observed failure detail.
pub async fn poll_until<F, Fut, T>(
    what: &str,
    interval: Duration,
    timeout: Duration,
    mut observe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Observation<T>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 1;
    let mut last_seen = String::from("no observation made");

    loop {
        match observe().await {
            Observation::Ready(value) => {
                debug!(what, attempt, "condition converged");
                return Ok(value);
            }
            Observation::Fatal(err) => {
                warn!(what, attempt, error = %err, "fatal observation, aborting poll");
                return Err(err);
            }
            Observation::Pending(reason) => {
                debug!(what, attempt, reason = %reason, "not yet converged");
                last_seen = reason;
            }
        }

        if started.elapsed() >= timeout {
            warn!(what, attempt, last_seen = %last_seen, "poll budget exhausted");
            return Err(Error::ConvergenceTimeout {
                what: what.to_string(),
                waited: started.elapsed(),
                last_seen,
            });
        }

        sleep(interval).await;
        attempt += 1;
    }
}
