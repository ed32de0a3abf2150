pub mod booking;
pub mod repository;
pub mod reservation;
pub mod poll;
pub mod replication;
pub mod refresh;
pub mod memory;

pub use booking::{
    CancellationOutcome, Confirmation, FlightStatus, FlightStatusChange, ReservationOutcome,
    SeatId, SeatReservationRequest,
};
pub use refresh::{RefreshCoordinator, RefreshError, RefreshReport, RefreshState, RefreshStats};
pub use replication::{LagSample, LagSettings, LagWait};
pub use reservation::ReservationCoordinator;

/// Error type shared by every collaborator trait; backends box their native errors.
pub type RepoError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
