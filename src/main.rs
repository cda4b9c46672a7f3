// ABOUTME: Entry point for the safeweb demo binary.
// ABOUTME: Loads settings from the environment, initializes tracing, and serves the demo app until Ctrl+C.

mod app;

use std::sync::Arc;

use safeweb_server::{Server, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "safeweb=debug,safeweb_server=debug,tower_http=debug".into()),
        )
        .init();

    tracing::info!("safeweb starting up");

    let settings = Settings::from_env()?;
    tracing::info!(?settings, "settings loaded");

    let bind = settings.bind;
    let config = settings.into_config(Some(app::api_router()), Some(app::browser_router()));
    let server = Arc::new(Server::new(config)?);

    let stopper = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            stopper.close();
        }
    });

    server.listen_and_serve(bind).await?;
    Ok(())
}
