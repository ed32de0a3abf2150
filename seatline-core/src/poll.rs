use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

/// Fixed-interval polling bounded by a total wait budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Polled<T> {
    /// A probe produced a value accepted by the predicate.
    Satisfied { value: T, waited: Duration },
    /// The budget ran out. `last` is the most recent value the probe produced, if any.
    Exhausted { last: Option<T>, waited: Duration },
}

impl PollPolicy {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }

    /// Calls `probe` until `accept` returns true or `max_wait` has elapsed.
    ///
    /// The first probe runs immediately. A probe that yields `None` counts as
    /// "no data" and does not reset `last`. Each probe is cut off when the
    /// remaining budget runs out, so the whole call returns within `max_wait`.
    pub async fn poll_until<T, F, Fut, P>(&self, mut probe: F, accept: P) -> Polled<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
        P: Fn(&T) -> bool,
    {
        let started = Instant::now();
        let deadline = started + self.max_wait;
        let mut last = None;

        loop {
            // a zero timeout still polls the probe once before expiring
            let remaining = deadline.saturating_duration_since(Instant::now());
            let sample = timeout(remaining, probe()).await.ok().flatten();

            if let Some(value) = sample {
                if accept(&value) {
                    return Polled::Satisfied { value, waited: started.elapsed() };
                }
                last = Some(value);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Polled::Exhausted { last, waited: started.elapsed() };
            }
            sleep(self.interval.min(remaining)).await;
        }
    }
}
