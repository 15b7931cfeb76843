use sqlx::Pool;
use sqlx::Postgres;

const REQUIRED_TABLES: &[&str] = &[
    "provider_configs",
    "cloud_resources",
    "budget_rules",
    "spending_records",
    "action_logs",
];

/// Run database migrations and verify the dashboard tables exist
pub async fn run_migrations(pool: &Pool<Postgres>) -> Result<(), sqlx::migrate::MigrateError> {
    if let Err(e) = sqlx::migrate!("../sqlx-migrations").run(pool).await {
        eprintln!("[warn] Migration error (may be safe to ignore if migrations were applied manually): {}", e);

        for table in REQUIRED_TABLES {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
            )
            .bind(table)
            .fetch_one(pool)
            .await
            .unwrap_or(false);

            if !exists {
                eprintln!("[error] Table '{}' does not exist - migrations must be applied!", table);
                return Err(e);
            }
        }

        eprintln!("[info] Dashboard tables exist - continuing despite migration error");
    }

    Ok(())
}
