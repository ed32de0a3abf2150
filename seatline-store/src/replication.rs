use async_trait::async_trait;
use seatline_core::repository::LagProvider;
use seatline_core::{LagSample, RepoError};
use sqlx::PgPool;

/// Reads replay lag of the primary's walsenders from `pg_stat_replication`.
///
/// `replay_lag` is NULL until a standby or subscriber has reported progress,
/// and there are no rows at all without a connected replica; both map to
/// [`LagSample::NoData`].
pub struct PgLagProvider {
    pool: PgPool,
    application_name: Option<String>,
}

impl PgLagProvider {
    pub fn new(pool: PgPool, application_name: Option<String>) -> Self {
        Self { pool, application_name }
    }
}

#[async_trait]
impl LagProvider for PgLagProvider {
    async fn sample_lag(&self) -> Result<LagSample, RepoError> {
        let lag_ms: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT (EXTRACT(EPOCH FROM MAX(replay_lag)) * 1000)::float8
            FROM pg_stat_replication
            WHERE $1::text IS NULL OR application_name = $1
            "#,
        )
        .bind(self.application_name.as_deref())
        .fetch_one(&self.pool)
        .await?;

        Ok(match lag_ms {
            Some(ms) => LagSample::Millis(ms),
            None => LagSample::NoData,
        })
    }
}
