pub mod analytics;
pub mod app_config;
pub mod database;
pub mod flight_repo;
pub mod replication;
pub mod seat_repo;

pub use analytics::PgRefreshTrigger;
pub use database::DbClient;
pub use flight_repo::PgFlightStore;
pub use replication::PgLagProvider;
pub use seat_repo::PgSeatStore;
