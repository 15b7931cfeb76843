use nimbus_api::app::{create_app, AppState};
use nimbus_api::config::{database::create_pool, ApiConfig};
use nimbus_api::provider_registry::{OciConnector, ProviderRegistry};
use nimbus_api::scheduler;
use nimbus_api::setup::run_migrations;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = ApiConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    println!("✅ Connected to Postgres");

    // migrations are embedded at compile time from ../sqlx-migrations
    run_migrations(&pool).await?;

    let providers = ProviderRegistry::new(Arc::new(OciConnector::from_env()));
    if config.api_key.is_none() {
        eprintln!("⚠️  NIMBUS_API_KEY is not set, protected routes are open");
    }
    let state = AppState::new(pool, providers, config.api_key.clone());
    match config.scheduler_interval {
        Some(period) => {
            let scheduler_state = state.clone();
            tokio::spawn(async move {
                scheduler::run(scheduler_state, period).await;
            });
        }
        None => println!("⏸️  [Scheduler] disabled (NIMBUS_SCHEDULER_INTERVAL_SECS=0)"),
    }
    let app = create_app(state, &config.cors_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    println!("🚀 nimbus-api listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
