//! Debounced, replication-aware refresh of the analytical store.
//!
//! One scheduler task per process owns the [`RefreshSchedule`]. Callers only
//! send it messages, so the schedule has a single writer. State machine:
//!
//! ```text
//! Idle --write--> PendingDebounce --write--> PendingDebounce (timer reset)
//! PendingDebounce --timer--> Waiting --lag ok / budget spent--> Refreshing
//! Refreshing --done--> Idle, or PendingDebounce if a write arrived meanwhile
//! ```
//!
//! A manual refresh skips the debounce but still waits for the replica, and
//! joins the in-flight refresh if there is one.

use chrono::{DateTime, Utc};
use futures_util::future::OptionFuture;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::replication::{wait_for_replica, LagSettings, LagWait};
use crate::repository::{LagProvider, RefreshTrigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    #[default]
    Idle,
    PendingDebounce,
    /// Polling replication lag before refreshing.
    Waiting,
    Refreshing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RefreshStats {
    pub runs: u64,
    pub caught_up: u64,
    pub timed_out: u64,
    pub no_stats: u64,
    pub failed: u64,
    /// Triggers absorbed into an already pending or in-flight refresh.
    pub coalesced: u64,
    pub follow_ups: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RefreshStatus {
    pub state: RefreshState,
    pub stats: RefreshStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    pub debounce: Duration,
    pub lag: LagSettings,
    /// Schedule one corrective refresh after a timed-out or stats-less wait.
    pub follow_up: bool,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
            lag: LagSettings::default(),
            follow_up: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub wait: LagWait,
    pub refresh_ms: u64,
    pub completed_at: DateTime<Utc>,
    pub follow_up_scheduled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("Refresh failed: {0}")]
    Trigger(String),
    #[error("Refresh task aborted: {0}")]
    Aborted(String),
    #[error("Refresh scheduler is not running")]
    Stopped,
}

type Reply = oneshot::Sender<Result<RefreshReport, RefreshError>>;

enum Command {
    NotifyWrite,
    RefreshNow(Reply),
}

/// Handle to the process-wide refresh scheduler. Cheap to clone.
#[derive(Clone)]
pub struct RefreshCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<RefreshStatus>,
}

impl RefreshCoordinator {
    /// Starts the scheduler task on the current tokio runtime. The task stops
    /// once every handle has been dropped.
    pub fn spawn(lag: Arc<dyn LagProvider>, trigger: Arc<dyn RefreshTrigger>, settings: RefreshSettings) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(RefreshStatus::default());

        let scheduler = Scheduler {
            lag,
            trigger,
            settings,
            schedule: RefreshSchedule::default(),
            status: status_tx,
        };
        tokio::spawn(scheduler.run(receiver));

        Self { commands, status }
    }

    /// Records that a write committed. Never blocks; bursts collapse into one refresh.
    pub fn notify_write(&self) {
        if self.commands.send(Command::NotifyWrite).is_err() {
            warn!("Refresh scheduler stopped; write notification dropped");
        }
    }

    /// Waits for the replica, refreshes, and returns once the refresh is done.
    pub async fn refresh_now(&self) -> Result<RefreshReport, RefreshError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::RefreshNow(reply))
            .map_err(|_| RefreshError::Stopped)?;
        response.await.map_err(|_| RefreshError::Stopped)?
    }

    pub fn state(&self) -> RefreshState {
        self.status.borrow().state
    }

    pub fn stats(&self) -> RefreshStats {
        self.status.borrow().stats
    }

    pub fn status(&self) -> RefreshStatus {
        *self.status.borrow()
    }
}

#[derive(Default)]
struct RefreshSchedule {
    pending: bool,
    in_flight: bool,
    requested_while_running: bool,
    /// Debounce timer; `None` when no refresh is pending.
    deadline: Option<Instant>,
    /// The pending refresh is a corrective follow-up.
    follow_up: bool,
    /// The in-flight refresh is a corrective follow-up.
    running_follow_up: bool,
    job_seq: u64,
    waiters: Vec<Reply>,
    state: RefreshState,
    stats: RefreshStats,
}

enum JobPhase {
    Refreshing(u64),
}

struct JobOutput {
    wait: LagWait,
    refresh_ms: u64,
    result: Result<(), String>,
}

struct Scheduler {
    lag: Arc<dyn LagProvider>,
    trigger: Arc<dyn RefreshTrigger>,
    settings: RefreshSettings,
    schedule: RefreshSchedule,
    status: watch::Sender<RefreshStatus>,
}

impl Scheduler {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let (phase_tx, mut phases) = mpsc::unbounded_channel::<JobPhase>();
        let mut job: Option<JoinHandle<JobOutput>> = None;

        loop {
            let deadline = self.schedule.deadline;
            let timer_armed = deadline.is_some() && job.is_none();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::NotifyWrite) => self.on_write(),
                    Some(Command::RefreshNow(reply)) => {
                        self.schedule.waiters.push(reply);
                        if job.is_some() {
                            self.schedule.stats.coalesced += 1;
                            debug!("Manual refresh joined the in-flight refresh");
                            self.publish();
                        } else {
                            info!("Manual refresh requested");
                            job = Some(self.start(&phase_tx, false));
                        }
                    }
                    None => break,
                },
                Some(JobPhase::Refreshing(seq)) = phases.recv() => {
                    if self.schedule.in_flight && seq == self.schedule.job_seq {
                        self.schedule.state = RefreshState::Refreshing;
                        self.publish();
                    }
                }
                Some(joined) = OptionFuture::from(job.as_mut()) => {
                    job = None;
                    self.on_finished(joined);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if timer_armed => {
                    let follow_up = self.schedule.follow_up;
                    job = Some(self.start(&phase_tx, follow_up));
                }
            }
        }

        debug!("Refresh scheduler stopped");
    }

    fn on_write(&mut self) {
        let schedule = &mut self.schedule;
        if schedule.in_flight {
            schedule.requested_while_running = true;
            schedule.stats.coalesced += 1;
        } else {
            if schedule.pending {
                schedule.stats.coalesced += 1;
            }
            schedule.pending = true;
            schedule.follow_up = false;
            schedule.deadline = Some(Instant::now() + self.settings.debounce);
            schedule.state = RefreshState::PendingDebounce;
        }
        self.publish();
    }

    fn start(&mut self, phase_tx: &mpsc::UnboundedSender<JobPhase>, follow_up: bool) -> JoinHandle<JobOutput> {
        let schedule = &mut self.schedule;
        schedule.pending = false;
        schedule.deadline = None;
        schedule.follow_up = false;
        schedule.in_flight = true;
        schedule.running_follow_up = follow_up;
        schedule.job_seq += 1;
        schedule.state = RefreshState::Waiting;
        let seq = schedule.job_seq;
        self.publish();

        let lag = self.lag.clone();
        let trigger = self.trigger.clone();
        let lag_settings = self.settings.lag;
        let phase_tx = phase_tx.clone();

        tokio::spawn(async move {
            let wait = wait_for_replica(lag.as_ref(), &lag_settings).await;
            if wait.is_stale() {
                warn!("Refreshing without replica catch-up: {:?}", wait);
            }

            let _ = phase_tx.send(JobPhase::Refreshing(seq));
            let started = Instant::now();
            let result = trigger.run_refresh().await.map_err(|e| e.to_string());

            JobOutput {
                wait,
                refresh_ms: started.elapsed().as_millis() as u64,
                result,
            }
        })
    }

    fn on_finished(&mut self, joined: Result<JobOutput, JoinError>) {
        let schedule = &mut self.schedule;
        schedule.in_flight = false;
        schedule.stats.runs += 1;

        let mut stale_success = false;
        let outcome = match joined {
            Ok(output) => {
                match output.wait {
                    LagWait::CaughtUp { .. } => schedule.stats.caught_up += 1,
                    LagWait::TimedOut { .. } => schedule.stats.timed_out += 1,
                    LagWait::NoStats { .. } => schedule.stats.no_stats += 1,
                }
                match output.result {
                    Ok(()) => {
                        stale_success = output.wait.is_stale();
                        info!(
                            "Analytics refresh completed in {} ms after {} wait",
                            output.refresh_ms,
                            output.wait.label()
                        );
                        Ok(RefreshReport {
                            wait: output.wait,
                            refresh_ms: output.refresh_ms,
                            completed_at: Utc::now(),
                            follow_up_scheduled: false,
                        })
                    }
                    Err(e) => {
                        schedule.stats.failed += 1;
                        error!("Analytics refresh failed: {}", e);
                        Err(RefreshError::Trigger(e))
                    }
                }
            }
            Err(e) => {
                schedule.stats.failed += 1;
                error!("Analytics refresh task aborted: {}", e);
                Err(RefreshError::Aborted(e.to_string()))
            }
        };

        let follow_up_due = stale_success && self.settings.follow_up && !schedule.running_follow_up;
        schedule.running_follow_up = false;

        let mut follow_up_scheduled = false;
        if schedule.requested_while_running {
            schedule.requested_while_running = false;
            schedule.pending = true;
            schedule.follow_up = false;
            schedule.deadline = Some(Instant::now() + self.settings.debounce);
            schedule.state = RefreshState::PendingDebounce;
            debug!("Write arrived during refresh; rescheduling");
        } else if follow_up_due {
            schedule.pending = true;
            schedule.follow_up = true;
            schedule.deadline = Some(Instant::now() + self.settings.debounce);
            schedule.state = RefreshState::PendingDebounce;
            schedule.stats.follow_ups += 1;
            follow_up_scheduled = true;
            info!("Scheduling follow-up refresh after stale replica wait");
        } else {
            schedule.state = RefreshState::Idle;
        }

        self.publish();

        let outcome = outcome.map(|report| RefreshReport { follow_up_scheduled, ..report });
        for waiter in self.schedule.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn publish(&self) {
        self.status.send_replace(RefreshStatus {
            state: self.schedule.state,
            stats: self.schedule.stats,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{CountingRefresh, ScriptedLag};
    use crate::replication::LagSample;
    use tokio::time::sleep;

    const DEBOUNCE: Duration = Duration::from_millis(500);

    fn settings(follow_up: bool) -> RefreshSettings {
        RefreshSettings {
            debounce: DEBOUNCE,
            lag: LagSettings {
                poll_interval_ms: 100,
                lag_target_ms: 100,
                max_wait_ms: 1000,
            },
            follow_up,
        }
    }

    fn coordinator(lag: ScriptedLag, trigger: &Arc<CountingRefresh>, follow_up: bool) -> RefreshCoordinator {
        RefreshCoordinator::spawn(Arc::new(lag), trigger.clone(), settings(follow_up))
    }

    fn caught_up() -> ScriptedLag {
        ScriptedLag::constant(LagSample::Millis(0.0))
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_writes_coalesces_into_one_refresh() {
        let trigger = Arc::new(CountingRefresh::new(Duration::from_millis(50)));
        let refresh = coordinator(caught_up(), &trigger, true);
        let start = Instant::now();

        refresh.notify_write();
        sleep(Duration::from_millis(200)).await;
        refresh.notify_write();
        sleep(Duration::from_millis(200)).await;
        refresh.notify_write();
        assert_eq!(trigger.calls(), 0);

        sleep(Duration::from_secs(3)).await;

        assert_eq!(trigger.calls(), 1);
        let fired_after = trigger.started_at()[0] - start;
        assert!(fired_after >= Duration::from_millis(900), "fired after {:?}", fired_after);
        assert!(fired_after < Duration::from_millis(1000), "fired after {:?}", fired_after);

        let status = refresh.status();
        assert_eq!(status.state, RefreshState::Idle);
        assert_eq!(status.stats.runs, 1);
        assert_eq!(status.stats.caught_up, 1);
        assert_eq!(status.stats.coalesced, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_refresh_joins_in_flight_refresh() {
        let trigger = Arc::new(CountingRefresh::new(Duration::from_secs(2)));
        let refresh = coordinator(caught_up(), &trigger, true);
        let start = Instant::now();

        refresh.notify_write();
        sleep(Duration::from_millis(600)).await;
        assert_eq!(refresh.state(), RefreshState::Refreshing);

        let report = refresh.refresh_now().await.unwrap();
        assert!(matches!(report.wait, LagWait::CaughtUp { .. }));
        assert_eq!(start.elapsed(), Duration::from_millis(2500));

        sleep(Duration::from_secs(5)).await;
        assert_eq!(trigger.calls(), 1);
        assert_eq!(refresh.stats().coalesced, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_during_refresh_schedules_another() {
        let trigger = Arc::new(CountingRefresh::new(Duration::from_secs(1)));
        let refresh = coordinator(caught_up(), &trigger, true);
        let start = Instant::now();

        refresh.notify_write();
        sleep(Duration::from_millis(1000)).await;
        assert_eq!(refresh.state(), RefreshState::Refreshing);
        refresh.notify_write();

        sleep(Duration::from_millis(700)).await;
        assert_eq!(refresh.state(), RefreshState::PendingDebounce);

        sleep(Duration::from_secs(5)).await;
        let started = trigger.started_at();
        assert_eq!(started.len(), 2);
        assert_eq!(started[0] - start, Duration::from_millis(500));
        // first refresh ends at 1500, then a fresh debounce window
        assert_eq!(started[1] - start, Duration::from_millis(2000));
        assert_eq!(refresh.state(), RefreshState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_refresh_skips_debounce_but_waits_for_lag() {
        let trigger = Arc::new(CountingRefresh::new(Duration::from_millis(10)));
        let lag = ScriptedLag::new(vec![
            LagSample::Millis(500.0),
            LagSample::Millis(400.0),
            LagSample::Millis(50.0),
        ]);
        let refresh = coordinator(lag, &trigger, true);
        let start = Instant::now();

        refresh.notify_write();
        let report = refresh.refresh_now().await.unwrap();

        assert_eq!(report.wait, LagWait::CaughtUp { lag_ms: 50.0, waited_ms: 200 });
        assert!(!report.follow_up_scheduled);
        assert_eq!(trigger.started_at()[0] - start, Duration::from_millis(200));

        // the pending write was absorbed by the manual refresh
        sleep(Duration::from_secs(5)).await;
        assert_eq!(trigger.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_refresh_returns_within_wait_budget() {
        let trigger = Arc::new(CountingRefresh::new(Duration::from_millis(300)));
        let refresh = coordinator(ScriptedLag::constant(LagSample::Millis(5000.0)), &trigger, false);
        let start = Instant::now();

        let report = refresh.refresh_now().await.unwrap();

        assert!(start.elapsed() <= Duration::from_millis(1300));
        assert_eq!(report.wait, LagWait::TimedOut { last_lag_ms: 5000.0, waited_ms: 1000 });
        assert!(!report.follow_up_scheduled);
        assert_eq!(refresh.stats().timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_stats_schedules_a_single_follow_up() {
        let trigger = Arc::new(CountingRefresh::new(Duration::ZERO));
        let refresh = coordinator(ScriptedLag::constant(LagSample::NoData), &trigger, true);
        let start = Instant::now();

        refresh.notify_write();
        sleep(Duration::from_secs(10)).await;

        let started = trigger.started_at();
        assert_eq!(started.len(), 2);
        assert_eq!(started[0] - start, Duration::from_millis(1500));
        assert_eq!(started[1] - start, Duration::from_millis(3000));

        let stats = refresh.stats();
        assert_eq!(stats.no_stats, 2);
        assert_eq!(stats.follow_ups, 1);
        assert_eq!(refresh.state(), RefreshState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_does_not_wedge_scheduler() {
        let trigger = Arc::new(CountingRefresh::new(Duration::from_millis(10)));
        trigger.fail_next(1);
        let refresh = coordinator(caught_up(), &trigger, true);

        let first = refresh.refresh_now().await;
        assert!(matches!(first, Err(RefreshError::Trigger(_))));
        assert_eq!(refresh.state(), RefreshState::Idle);

        // no automatic retry
        sleep(Duration::from_secs(5)).await;
        assert_eq!(trigger.calls(), 1);

        let second = refresh.refresh_now().await;
        assert!(second.is_ok());
        let stats = refresh.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.runs, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_refresh_failure_is_swallowed() {
        let trigger = Arc::new(CountingRefresh::new(Duration::from_millis(10)));
        trigger.fail_next(1);
        let refresh = coordinator(caught_up(), &trigger, true);

        refresh.notify_write();
        sleep(Duration::from_secs(2)).await;
        assert_eq!(refresh.stats().failed, 1);

        refresh.notify_write();
        sleep(Duration::from_secs(2)).await;
        assert_eq!(trigger.calls(), 2);
        assert_eq!(refresh.stats().failed, 1);
    }
}
