use async_trait::async_trait;
use uuid::Uuid;

use crate::booking::{CancellationOutcome, FlightStatusChange, ReservationLine, SeatId};
use crate::replication::LagSample;
use crate::RepoError;

/// Result of a non-blocking row lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLock {
    Acquired,
    /// Another transaction holds the row; the attempt did not wait.
    Contended,
    NotFound,
}

/// Entry point to the transactional seat store.
#[async_trait]
pub trait SeatStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn SeatTransaction>, RepoError>;

    /// Releases every active seat of a booking in one transaction.
    async fn release_booking(&self, booking_id: Uuid) -> Result<CancellationOutcome, RepoError>;
}

/// Operations that participate in one enclosing store transaction.
///
/// Dropping a transaction without calling `commit` must discard its writes.
#[async_trait]
pub trait SeatTransaction: Send {
    /// Exclusive row lock that fails immediately instead of waiting.
    async fn try_lock_seat(&mut self, seat_id: SeatId) -> Result<RowLock, RepoError>;

    /// Availability as seen by this transaction. Never blocks on row locks.
    async fn seat_available(&mut self, seat_id: SeatId) -> Result<bool, RepoError>;

    /// Marks a locked seat unavailable and bumps its version.
    async fn mark_unavailable(&mut self, seat_id: SeatId) -> Result<(), RepoError>;

    async fn insert_reservation_line(
        &mut self,
        booking_id: Uuid,
        line: &ReservationLine,
    ) -> Result<(), RepoError>;

    async fn commit(self: Box<Self>) -> Result<(), RepoError>;

    async fn rollback(self: Box<Self>) -> Result<(), RepoError>;
}

#[async_trait]
pub trait FlightStore: Send + Sync {
    /// Applies all changes atomically and returns the number of flights updated.
    async fn update_statuses(&self, changes: &[FlightStatusChange]) -> Result<u64, RepoError>;
}

/// Replication telemetry. Sampling must be side-effect free.
#[async_trait]
pub trait LagProvider: Send + Sync {
    async fn sample_lag(&self) -> Result<LagSample, RepoError>;
}

/// Recomputes the derived analytical data. Idempotent, possibly slow.
#[async_trait]
pub trait RefreshTrigger: Send + Sync {
    async fn run_refresh(&self) -> Result<(), RepoError>;
}
