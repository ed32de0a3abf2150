use async_trait::async_trait;
use seatline_core::booking::{CancellationOutcome, ReservationLine, SeatId};
use seatline_core::repository::{RowLock, SeatStore, SeatTransaction};
use seatline_core::RepoError;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

/// SQLSTATE raised by `FOR UPDATE NOWAIT` when the row is already locked.
const LOCK_NOT_AVAILABLE: &str = "55P03";

fn is_lock_not_available(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(LOCK_NOT_AVAILABLE),
        _ => false,
    }
}

pub struct PgSeatStore {
    pool: PgPool,
}

impl PgSeatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SeatStore for PgSeatStore {
    async fn begin(&self) -> Result<Box<dyn SeatTransaction>, RepoError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSeatTransaction { tx }))
    }

    async fn release_booking(&self, booking_id: Uuid) -> Result<CancellationOutcome, RepoError> {
        let mut tx = self.pool.begin().await?;

        let lines: Vec<(i64, String)> = sqlx::query_as(
            r#"
            SELECT seat_id, status
            FROM reservation_lines
            WHERE booking_id = $1
            ORDER BY seat_id
            FOR UPDATE
            "#,
        )
        .bind(booking_id)
        .fetch_all(&mut *tx)
        .await?;

        if lines.is_empty() {
            return Ok(CancellationOutcome::NotFound);
        }

        let active: Vec<SeatId> = lines
            .into_iter()
            .filter(|(_, status)| status == "ACTIVE")
            .map(|(seat_id, _)| seat_id)
            .collect();

        for seat_id in &active {
            sqlx::query("UPDATE seats SET is_available = TRUE, version = version + 1 WHERE id = $1")
                .bind(seat_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE reservation_lines SET status = 'CANCELLED' WHERE booking_id = $1 AND status = 'ACTIVE'")
            .bind(booking_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(CancellationOutcome::Released(active))
    }
}

/// Dropping this without commit rolls the transaction back.
pub struct PgSeatTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SeatTransaction for PgSeatTransaction {
    async fn try_lock_seat(&mut self, seat_id: SeatId) -> Result<RowLock, RepoError> {
        // A failed NOWAIT aborts the whole transaction unless it runs under a savepoint.
        sqlx::query("SAVEPOINT seat_lock").execute(&mut *self.tx).await?;

        let locked: Result<Option<i64>, sqlx::Error> =
            sqlx::query_scalar("SELECT id FROM seats WHERE id = $1 FOR UPDATE NOWAIT")
                .bind(seat_id)
                .fetch_optional(&mut *self.tx)
                .await;

        match locked {
            Ok(row) => {
                sqlx::query("RELEASE SAVEPOINT seat_lock").execute(&mut *self.tx).await?;
                Ok(if row.is_some() { RowLock::Acquired } else { RowLock::NotFound })
            }
            Err(e) if is_lock_not_available(&e) => {
                sqlx::query("ROLLBACK TO SAVEPOINT seat_lock").execute(&mut *self.tx).await?;
                debug!("Seat {} is locked by another transaction", seat_id);
                Ok(RowLock::Contended)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn seat_available(&mut self, seat_id: SeatId) -> Result<bool, RepoError> {
        let available: Option<bool> = sqlx::query_scalar("SELECT is_available FROM seats WHERE id = $1")
            .bind(seat_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(available.unwrap_or(false))
    }

    async fn mark_unavailable(&mut self, seat_id: SeatId) -> Result<(), RepoError> {
        let result = sqlx::query("UPDATE seats SET is_available = FALSE, version = version + 1 WHERE id = $1")
            .bind(seat_id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() != 1 {
            return Err(format!("seat {} disappeared while locked", seat_id).into());
        }
        Ok(())
    }

    async fn insert_reservation_line(
        &mut self,
        booking_id: Uuid,
        line: &ReservationLine,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO reservation_lines (booking_id, seat_id, passenger_name, price)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(booking_id)
        .bind(line.seat_id)
        .bind(&line.passenger_name)
        .bind(line.price)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        let PgSeatTransaction { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepoError> {
        let PgSeatTransaction { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}
