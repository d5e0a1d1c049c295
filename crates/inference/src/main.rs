#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use embedserve_inference::{config::InferenceConfig, server};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "embedserve-inference", about = "Embedding model batching service")]
struct Cli {
    /// Path to inference config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Listen host, overriding the config file's `host`
    #[arg(long)]
    host: Option<String>,

    /// Listen port, overriding the config file's `port`
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address passed straight to the accept loop; takes priority
    /// over `--host`/`--port` when given
    #[arg(short, long)]
    listen: Option<String>,

    /// Override max_batch_size from the config file
    #[arg(long)]
    max_batch_size: Option<usize>,

    /// Override batch_timeout (milliseconds) from the config file
    #[arg(long)]
    batch_timeout_ms: Option<u64>,

    /// Override num_batching_workers from the config file
    #[arg(long)]
    num_batching_workers: Option<usize>,

    /// Select the ONNX execution backend instead of the bundled stand-in model.
    /// Accepted for forward compatibility; ONNX execution itself is out of
    /// scope for this service.
    #[arg(long, default_value_t = false)]
    use_onnx: bool,

    /// Number of Tokio worker threads; defaults to the detected container
    /// CPU limit when unset
    #[arg(long)]
    workers: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let worker_threads = cli
        .workers
        .unwrap_or_else(embedserve_common::runtime::get_container_cpu_limit);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(async move {
        let mut config = InferenceConfig::load(&cli.config)?;
        if let Some(v) = cli.max_batch_size {
            config.max_batch_size = v;
        }
        if let Some(v) = cli.batch_timeout_ms {
            config.batch_timeout_ms = v;
        }
        if let Some(v) = cli.num_batching_workers {
            config.num_batching_workers = v;
        }
        if let Some(v) = &cli.host {
            config.host = v.clone();
        }
        if let Some(v) = cli.port {
            config.port = v;
        }
        config.use_onnx = cli.use_onnx;
        config.validate()?;

        let listen = cli
            .listen
            .unwrap_or_else(|| format!("{}:{}", config.host, config.port));

        server::bootstrap::run(server::bootstrap::BootstrapArgs { config, listen }).await
    })
}
