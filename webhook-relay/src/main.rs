use anyhow::Context;
use tether::MemorySync;
use webhook_relay::{HttpDispatcher, RelayConfig, WebhookRegistry, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a missing .env file is fine
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RelayConfig::from_env().context("Failed to read relay configuration")?;

    // in-process backend, see the crate docs
    let sync = MemorySync::new();
    sync.authenticate(&config.session)
        .context("Failed to authenticate with the sync service")?;

    let dispatcher = HttpDispatcher::new(&config.credential, config.delivery.timeout)
        .context("Failed to build the webhook HTTP client")?;
    let registry = WebhookRegistry::spawn(sync, dispatcher, config.delivery);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    log::info!("Server started on {}", config.bind);

    axum::serve(listener, router(registry.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    registry.shutdown().await;
    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
