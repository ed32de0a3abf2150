use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::poll::{PollPolicy, Polled};
use crate::repository::LagProvider;

/// One reading from the replication-status provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "lag_ms", rename_all = "snake_case")]
pub enum LagSample {
    /// The provider has no telemetry yet.
    NoData,
    Millis(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LagSettings {
    pub poll_interval_ms: u64,
    pub lag_target_ms: u64,
    pub max_wait_ms: u64,
}

impl Default for LagSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            lag_target_ms: 1000,
            max_wait_ms: 10_000,
        }
    }
}

impl LagSettings {
    fn policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.poll_interval_ms.max(1)),
            Duration::from_millis(self.max_wait_ms),
        )
    }
}

/// How the wait for the replica ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LagWait {
    CaughtUp { lag_ms: f64, waited_ms: u64 },
    /// Lag was observed but never reached the target within the budget.
    TimedOut { last_lag_ms: f64, waited_ms: u64 },
    /// The budget ran out without a single lag reading.
    NoStats { waited_ms: u64 },
}

impl LagWait {
    /// The refresh that follows this wait may have missed recent writes.
    pub fn is_stale(&self) -> bool {
        !matches!(self, LagWait::CaughtUp { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            LagWait::CaughtUp { .. } => "caught_up",
            LagWait::TimedOut { .. } => "timed_out",
            LagWait::NoStats { .. } => "no_stats",
        }
    }
}

/// Polls `provider` until measured lag is at or below the target, or the
/// wait budget is spent. Provider errors and non-finite readings count as a
/// sample with no data.
pub async fn wait_for_replica(provider: &dyn LagProvider, settings: &LagSettings) -> LagWait {
    let target = settings.lag_target_ms as f64;

    let polled = settings
        .policy()
        .poll_until(
            move || async move {
                match provider.sample_lag().await {
                    Ok(LagSample::Millis(ms)) if ms.is_finite() => {
                        debug!("Replica lag sample: {:.0} ms", ms);
                        Some(ms.max(0.0))
                    }
                    Ok(LagSample::Millis(ms)) => {
                        warn!("Ignoring non-finite replica lag sample: {}", ms);
                        None
                    }
                    Ok(LagSample::NoData) => None,
                    Err(e) => {
                        warn!("Replication lag sample failed: {}", e);
                        None
                    }
                }
            },
            |lag_ms| *lag_ms <= target,
        )
        .await;

    match polled {
        Polled::Satisfied { value, waited } => LagWait::CaughtUp {
            lag_ms: value,
            waited_ms: waited.as_millis() as u64,
        },
        Polled::Exhausted { last: Some(last), waited } => LagWait::TimedOut {
            last_lag_ms: last,
            waited_ms: waited.as_millis() as u64,
        },
        Polled::Exhausted { last: None, waited } => LagWait::NoStats {
            waited_ms: waited.as_millis() as u64,
        },
    }
}
