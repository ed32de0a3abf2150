use async_trait::async_trait;
use seatline_core::repository::RefreshTrigger;
use seatline_core::RepoError;
use sqlx::PgPool;
use std::time::Instant;
use tracing::info;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AnalyticsError {
    #[error("Invalid materialized view name: {0:?}")]
    InvalidViewName(String),
    #[error("No materialized views configured")]
    NoViews,
}

/// Rebuilds the reporting materialized views on the analytics replica.
pub struct PgRefreshTrigger {
    pool: PgPool,
    statements: Vec<String>,
}

impl PgRefreshTrigger {
    pub fn new(pool: PgPool, views: &[String], concurrently: bool) -> Result<Self, AnalyticsError> {
        Ok(Self {
            pool,
            statements: refresh_statements(views, concurrently)?,
        })
    }
}

#[async_trait]
impl RefreshTrigger for PgRefreshTrigger {
    async fn run_refresh(&self) -> Result<(), RepoError> {
        for statement in &self.statements {
            let started = Instant::now();
            sqlx::query(statement).execute(&self.pool).await?;
            info!("{} took {} ms", statement, started.elapsed().as_millis());
        }
        Ok(())
    }
}

/// Plain or schema-qualified identifier; views are interpolated into SQL.
fn is_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

fn refresh_statements(views: &[String], concurrently: bool) -> Result<Vec<String>, AnalyticsError> {
    if views.is_empty() {
        return Err(AnalyticsError::NoViews);
    }

    let mode = if concurrently { " CONCURRENTLY" } else { "" };
    views
        .iter()
        .map(|view| {
            if is_identifier(view) {
                Ok(format!("REFRESH MATERIALIZED VIEW{} {}", mode, view))
            } else {
                Err(AnalyticsError::InvalidViewName(view.clone()))
            }
        })
        .collect()
}
