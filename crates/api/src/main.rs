//! Hearth API server

use tracing::info;

use hearth_api::{config::Config, routes::create_router, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    info!(bind_address = %config.bind_address, "Starting Hearth API");

    let pool = hearth_shared::db::create_pool(&config.database_url).await?;
    hearth_shared::db::run_migrations(&pool).await?;
    info!("Migrations applied");

    let bind_address = config.bind_address.clone();
    let state = AppState::new(pool, config);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "Listening");
    axum::serve(listener, router).await?;

    Ok(())
}
