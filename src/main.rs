mod config;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use eventsub_listener::{EventSubListener, HelixEventSubApi};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eventsub_listener=debug".into()),
        )
        .init();

    let config = config::Config::from_env()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        adapter = ?config.adapter,
        host = %config.host_name,
        "starting eventsub-listener"
    );

    let api = Arc::new(HelixEventSubApi::with_app_token(&config.client_id, &config.app_token));
    let adapter = config.build_adapter()?;
    let listener = EventSubListener::new(api, adapter, config.secret.clone())
        .context("invalid listener configuration")?;

    for user_id in &config.user_ids {
        listener
            .subscribe_to_stream_online_events(user_id, |event| {
                info!(
                    broadcaster = %event.broadcaster_user_login,
                    stream_type = %event.stream_type,
                    "stream went online"
                );
            })
            .await
            .with_context(|| format!("failed to subscribe to stream.online for {user_id}"))?;
        listener
            .subscribe_to_stream_offline_events(user_id, |event| {
                info!(broadcaster = %event.broadcaster_user_login, "stream went offline");
            })
            .await
            .with_context(|| format!("failed to subscribe to stream.offline for {user_id}"))?;
    }

    let report = listener.listen(config.port).await.context("failed to start listener")?;
    if !report.is_success() {
        warn!(
            failed = report.failed.len(),
            started = report.succeeded.len(),
            "some subscriptions could not be started"
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl-C handler")?;
    info!("shutting down");

    let report = listener.unlisten().await?;
    if !report.is_success() {
        warn!(failed = report.failed.len(), "some remote subscriptions could not be deleted");
    }
    Ok(())
}
