//! Hearth Background Worker
//!
//! Scheduled jobs:
//! - Subscription sweeper: expires lapsed active subscriptions (every 10 minutes)
//! - Notification re-attempt: redelivers events marked undelivered (every 15 minutes)
//! - Session purge: drops long-expired sessions (daily at 4:10 UTC)
//!
//! Jobs acquire their own transactions and share no in-memory state with the
//! API request handlers.

use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use hearth_api::config::Config;
use hearth_api::notify::{channels::Channels, Notifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting Hearth Worker");

    let config = Config::from_env()?;
    let pool = hearth_shared::db::create_pool(&config.database_url).await?;
    info!("Database pool created");

    let http = reqwest::Client::new();
    let channels = Channels::new(
        http,
        config.push_gateway_url.clone(),
        config.messenger_gateway_url.clone(),
        config.sms_gateway_url.clone(),
        config.email_gateway_url.clone(),
        config.notify_api_key.clone(),
        config.email_from.clone(),
    );
    let notifier = Notifier::new(pool.clone(), channels);

    let scheduler = JobScheduler::new().await?;

    // Job 1: subscription sweeper (every 10 minutes)
    let sweep_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 */10 * * * *", move |_uuid, _l| {
            let pool = sweep_pool.clone();
            Box::pin(async move {
                match hearth_billing::subscriptions::sweep_expired(&pool).await {
                    Ok(expired) if expired > 0 => {
                        info!(expired = expired, "Subscription sweep complete");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Subscription sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: subscription sweeper (every 10 minutes)");

    // Job 2: notification re-attempt (every 15 minutes)
    let retry_notifier = notifier.clone();
    scheduler
        .add(Job::new_async("0 */15 * * * *", move |_uuid, _l| {
            let notifier = retry_notifier.clone();
            Box::pin(async move {
                match notifier.retry_undelivered(100).await {
                    Ok(delivered) if delivered > 0 => {
                        info!(delivered = delivered, "Notification re-attempt complete");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Notification re-attempt failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: notification re-attempt (every 15 minutes)");

    // Job 3: session purge (daily at 4:10 UTC)
    let purge_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 10 4 * * *", move |_uuid, _l| {
            let pool = purge_pool.clone();
            Box::pin(async move {
                match purge_sessions(&pool).await {
                    Ok(purged) if purged > 0 => info!(purged = purged, "Session purge complete"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Session purge failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: session purge (daily at 4:10 UTC)");

    scheduler.start().await?;
    info!("Worker running");

    // Run until terminated
    tokio::signal::ctrl_c().await?;
    info!("Worker shutting down");
    Ok(())
}

async fn purge_sessions(pool: &PgPool) -> anyhow::Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at < NOW() - INTERVAL '7 days'")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
