use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use std::time::Duration;

/// Create and configure database connection pool
pub async fn create_pool(database_url: &str) -> Result<Pool<Postgres>, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}
