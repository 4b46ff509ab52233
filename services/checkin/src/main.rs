use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use checkin::{
    AppState, MIGRATOR,
    config::Settings,
    feed::LedgerFeed,
    middleware::OperatorAuth,
    repositories::PgCheckinStore,
    routes,
};
use common::database::{DatabaseConfig, health_check, init_pool, run_migrations};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .init();

    info!("Starting check-in service");

    let settings = Settings::load()?;
    let auth = OperatorAuth::rs256(&settings.jwt_public_key_pem()?)?;

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    if health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    run_migrations(&pool, &MIGRATOR).await?;

    let feed = LedgerFeed::new(settings.feed_capacity);
    let store = PgCheckinStore::new(pool, feed);
    let _listener_task = store.spawn_change_listener();

    let bind_address = settings.bind_address.clone();
    let app_state = AppState {
        store: Arc::new(store),
        settings: Arc::new(settings),
        auth: Arc::new(auth),
    };

    let app = routes::create_router(app_state);

    let listener = TcpListener::bind(&bind_address).await?;
    info!("Check-in service listening on {}", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
