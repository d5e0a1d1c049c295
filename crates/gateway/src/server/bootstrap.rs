use crate::config::GatewayConfig;
use crate::{apikey::ApiKeyStore, config, server};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Notify;

/// CLI arguments forwarded from `main()`. The config is loaded and
/// CLI-overridden by the caller so flags like `--rate-limit-minute` win
/// over both the config file and env overrides.
pub struct BootstrapArgs {
    pub config: GatewayConfig,
    pub listen: String,
}

/// Gateway lifecycle: init → seed dev key → serve → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    embedserve_common::init_tracing();

    let config = args.config;
    let state = server::GatewayState::new(config).await?;

    initialize_dev_api_key(&state.api_key_store, &state.config);

    let shutdown = Arc::new(Notify::new());

    tracing::info!("server: starting gateway, listen={}", args.listen);

    let server_handle = tokio::spawn({
        let listen = args.listen.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_server(&listen, state, shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    if let Err(e) = server_handle.await {
        tracing::error!("server: task error: {}", e);
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

/// Seeds a usable API key so the gateway is immediately callable without an
/// external provisioning step. Uses `API_KEY` if set (so deployers can pin
/// a known key), otherwise generates one and prints it once, the way the
/// original's `_initialize_dev_api_key` does for local development.
fn initialize_dev_api_key(store: &ApiKeyStore, config: &Arc<config::GatewayConfig>) {
    let dev_key = std::env::var("API_KEY").unwrap_or_else(|_| ApiKeyStore::generate("sk_dev"));

    store.add_key(
        &dev_key,
        "dev_user",
        "Development API Key",
        config.rate_limit_minute,
        config.rate_limit_hour,
        None,
    );

    tracing::warn!("server: generated development API key, store this securely");
    println!("\n{}", "=".repeat(60));
    println!("Development API Key: {dev_key}");
    println!("{}\n", "=".repeat(60));
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_waiters();
}
