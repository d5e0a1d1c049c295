use crate::batcher::{Batcher, BatcherConfig, DynamicBatcher, SingletonBatcher};
use crate::config::InferenceConfig;
use crate::model::{EmbeddingModel, HashEmbeddingModel};
use crate::server;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// CLI arguments forwarded from `main()`. The config is loaded and
/// CLI-overridden by the caller so flags like `--max-batch-size` win over
/// the config file without this module re-reading it from disk.
pub struct BootstrapArgs {
    pub config: InferenceConfig,
    pub listen: String,
}

/// Inference service lifecycle: init → build model + batcher → serve →
/// drain → shutdown batcher.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    embedserve_common::init_tracing();

    let config = args.config;

    let model: Arc<dyn EmbeddingModel> = Arc::new(HashEmbeddingModel::new(config.model_name.clone()));

    let batcher: Arc<dyn Batcher> = if config.disable_batching {
        tracing::info!("batcher: no_batching mode, each request is its own singleton batch");
        SingletonBatcher::start(model.clone(), config.num_batching_workers)
    } else {
        tracing::info!(
            "batcher: starting, max_batch_size={}, batch_timeout_ms={}, workers={}",
            config.max_batch_size,
            config.batch_timeout_ms,
            config.num_batching_workers
        );
        DynamicBatcher::start(
            model.clone(),
            BatcherConfig {
                max_batch_size: config.max_batch_size,
                batch_timeout: Duration::from_millis(config.batch_timeout_ms),
                num_workers: config.num_batching_workers,
            },
        )
    };

    let state = server::InferenceState::new(config, model, batcher);

    let shutdown = Arc::new(Notify::new());

    tracing::info!("server: starting inference service, listen={}", args.listen);

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
