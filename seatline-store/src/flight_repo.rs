use async_trait::async_trait;
use seatline_core::booking::FlightStatusChange;
use seatline_core::repository::FlightStore;
use seatline_core::RepoError;
use sqlx::PgPool;

pub struct PgFlightStore {
    pool: PgPool,
}

impl PgFlightStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FlightStore for PgFlightStore {
    async fn update_statuses(&self, changes: &[FlightStatusChange]) -> Result<u64, RepoError> {
        let mut tx = self.pool.begin().await?;
        let mut updated = 0;

        for change in changes {
            let result = sqlx::query("UPDATE flights SET status = $1, updated_at = NOW() WHERE id = $2")
                .bind(change.status.to_string())
                .bind(change.flight_id)
                .execute(&mut *tx)
                .await?;
            updated += result.rows_affected();
        }

        tx.commit().await?;
        Ok(updated)
    }
}
