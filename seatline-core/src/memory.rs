//! In-memory collaborators with the same locking semantics as the SQL store.
//!
//! Row locks are `tokio::sync::Mutex` guards taken with `try_lock_owned`, so a
//! contended lock fails immediately just like `FOR UPDATE NOWAIT`. Writes are
//! staged inside the transaction and applied on commit.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use uuid::Uuid;

use crate::booking::{CancellationOutcome, FlightStatus, FlightStatusChange, ReservationLine, Seat, SeatId};
use crate::replication::LagSample;
use crate::repository::{FlightStore, LagProvider, RefreshTrigger, RowLock, SeatStore, SeatTransaction};
use crate::RepoError;

#[derive(Debug, Clone)]
struct StoredLine {
    booking_id: Uuid,
    line: ReservationLine,
    cancelled: bool,
}

#[derive(Default)]
struct Inner {
    row_locks: Mutex<HashMap<SeatId, Arc<tokio::sync::Mutex<()>>>>,
    seats: Mutex<HashMap<SeatId, Seat>>,
    lines: Mutex<Vec<StoredLine>>,
    transactions_begun: AtomicUsize,
    fail_next_insert: AtomicBool,
}

fn locked<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RepoError> {
    mutex.lock().map_err(|_| "memory store mutex poisoned".into())
}

#[derive(Clone, Default)]
pub struct MemorySeatStore {
    inner: Arc<Inner>,
}

impl MemorySeatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seats(ids: impl IntoIterator<Item = SeatId>) -> Self {
        let store = Self::new();
        for id in ids {
            store.add_seat(id);
        }
        store
    }

    pub fn add_seat(&self, id: SeatId) {
        if let (Ok(mut locks), Ok(mut seats)) = (self.inner.row_locks.lock(), self.inner.seats.lock()) {
            locks.entry(id).or_default();
            seats.insert(id, Seat { id, is_available: true, version: 0 });
        }
    }

    /// Committed state of a seat.
    pub fn seat(&self, id: SeatId) -> Option<Seat> {
        self.inner.seats.lock().ok()?.get(&id).cloned()
    }

    /// Active reservation lines of a booking.
    pub fn lines_for(&self, booking_id: Uuid) -> Vec<ReservationLine> {
        match self.inner.lines.lock() {
            Ok(lines) => lines
                .iter()
                .filter(|l| l.booking_id == booking_id && !l.cancelled)
                .map(|l| l.line.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn transactions_begun(&self) -> usize {
        self.inner.transactions_begun.load(Ordering::SeqCst)
    }

    /// Makes the next `insert_reservation_line` fail, to exercise rollback paths.
    pub fn fail_next_insert(&self) {
        self.inner.fail_next_insert.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SeatStore for MemorySeatStore {
    async fn begin(&self) -> Result<Box<dyn SeatTransaction>, RepoError> {
        self.inner.transactions_begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySeatTransaction {
            inner: self.inner.clone(),
            guards: BTreeMap::new(),
            unavailable: Vec::new(),
            lines: Vec::new(),
        }))
    }

    async fn release_booking(&self, booking_id: Uuid) -> Result<CancellationOutcome, RepoError> {
        let mut lines = locked(&self.inner.lines)?;
        let mut seats = locked(&self.inner.seats)?;

        if !lines.iter().any(|l| l.booking_id == booking_id) {
            return Ok(CancellationOutcome::NotFound);
        }

        let mut released = Vec::new();
        for stored in lines.iter_mut().filter(|l| l.booking_id == booking_id && !l.cancelled) {
            stored.cancelled = true;
            if let Some(seat) = seats.get_mut(&stored.line.seat_id) {
                seat.is_available = true;
                seat.version += 1;
            }
            released.push(stored.line.seat_id);
        }
        released.sort_unstable();

        Ok(CancellationOutcome::Released(released))
    }
}

pub struct MemorySeatTransaction {
    inner: Arc<Inner>,
    guards: BTreeMap<SeatId, OwnedMutexGuard<()>>,
    unavailable: Vec<SeatId>,
    lines: Vec<StoredLine>,
}

#[async_trait]
impl SeatTransaction for MemorySeatTransaction {
    async fn try_lock_seat(&mut self, seat_id: SeatId) -> Result<RowLock, RepoError> {
        if self.guards.contains_key(&seat_id) {
            return Ok(RowLock::Acquired);
        }

        let row = match locked(&self.inner.row_locks)?.get(&seat_id) {
            Some(row) => row.clone(),
            None => return Ok(RowLock::NotFound),
        };

        match row.try_lock_owned() {
            Ok(guard) => {
                self.guards.insert(seat_id, guard);
                Ok(RowLock::Acquired)
            }
            Err(_) => Ok(RowLock::Contended),
        }
    }

    async fn seat_available(&mut self, seat_id: SeatId) -> Result<bool, RepoError> {
        if self.unavailable.contains(&seat_id) {
            return Ok(false);
        }
        let seats = locked(&self.inner.seats)?;
        Ok(seats.get(&seat_id).map(|s| s.is_available).unwrap_or(false))
    }

    async fn mark_unavailable(&mut self, seat_id: SeatId) -> Result<(), RepoError> {
        if !self.guards.contains_key(&seat_id) {
            return Err(format!("seat {} is not locked by this transaction", seat_id).into());
        }
        self.unavailable.push(seat_id);
        Ok(())
    }

    async fn insert_reservation_line(
        &mut self,
        booking_id: Uuid,
        line: &ReservationLine,
    ) -> Result<(), RepoError> {
        if self.inner.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err("injected insert failure".into());
        }
        self.lines.push(StoredLine {
            booking_id,
            line: line.clone(),
            cancelled: false,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        {
            let mut seats = locked(&self.inner.seats)?;
            for seat_id in &self.unavailable {
                if let Some(seat) = seats.get_mut(seat_id) {
                    seat.is_available = false;
                    seat.version += 1;
                }
            }
        }
        locked(&self.inner.lines)?.extend(self.lines.iter().cloned());
        // guards drop here, releasing the row locks
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepoError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryFlightStore {
    flights: Mutex<HashMap<i64, FlightStatus>>,
}

impl MemoryFlightStore {
    pub fn with_flights(ids: impl IntoIterator<Item = i64>) -> Self {
        let flights = ids.into_iter().map(|id| (id, FlightStatus::Scheduled)).collect();
        Self { flights: Mutex::new(flights) }
    }

    pub fn status(&self, flight_id: i64) -> Option<FlightStatus> {
        self.flights.lock().ok()?.get(&flight_id).copied()
    }
}

#[async_trait]
impl FlightStore for MemoryFlightStore {
    async fn update_statuses(&self, changes: &[FlightStatusChange]) -> Result<u64, RepoError> {
        let mut flights = locked(&self.flights)?;
        let mut updated = 0;
        for change in changes {
            if let Some(status) = flights.get_mut(&change.flight_id) {
                *status = change.status;
                updated += 1;
            }
        }
        Ok(updated)
    }
}

/// Lag provider that replays a script of samples and then repeats the last one.
pub struct ScriptedLag {
    samples: Mutex<Vec<Result<LagSample, String>>>,
    calls: AtomicUsize,
}

impl ScriptedLag {
    pub fn new(samples: Vec<LagSample>) -> Self {
        Self::with_results(samples.into_iter().map(Ok).collect())
    }

    pub fn constant(sample: LagSample) -> Self {
        Self::new(vec![sample])
    }

    pub fn with_results(mut samples: Vec<Result<LagSample, String>>) -> Self {
        samples.reverse();
        Self {
            samples: Mutex::new(samples),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LagProvider for ScriptedLag {
    async fn sample_lag(&self) -> Result<LagSample, RepoError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut samples = locked(&self.samples)?;
        let next = if samples.len() > 1 { samples.pop() } else { samples.last().cloned() };
        match next {
            Some(Ok(sample)) => Ok(sample),
            Some(Err(e)) => Err(e.into()),
            None => Ok(LagSample::NoData),
        }
    }
}

/// Refresh trigger that records every invocation and takes a fixed amount of time.
#[derive(Default)]
pub struct CountingRefresh {
    delay: Duration,
    started: Mutex<Vec<Instant>>,
    failures_left: AtomicUsize,
}

impl CountingRefresh {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// The next `n` refreshes fail after their delay.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.started.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn started_at(&self) -> Vec<Instant> {
        self.started.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RefreshTrigger for CountingRefresh {
    async fn run_refresh(&self) -> Result<(), RepoError> {
        locked(&self.started)?.push(Instant::now());
        tokio::time::sleep(self.delay).await;

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err("refresh failed".into());
        }
        Ok(())
    }
}
