#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use embedserve_gateway::{apikey::ApiKeyStore, server};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "embedserve-gateway", about = "Embedding service API gateway")]
struct Cli {
    /// Path to gateway config file
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

    /// Base URL of the inference service to proxy to
    #[arg(long)]
    inference_url: Option<String>,

    /// Per-minute request limit applied to every API key
    #[arg(long)]
    rate_limit_minute: Option<u32>,

    /// Per-hour request limit applied to every API key
    #[arg(long)]
    rate_limit_hour: Option<u32>,

    /// Redis connection string for the distributed rate limiter
    #[arg(long)]
    redis_url: Option<String>,

    /// Disable rate limiting entirely (also settable via BYPASS_RATE_LIMITS)
    #[arg(long, default_value_t = false)]
    bypass_rate_limits: bool,

    /// Number of Tokio worker threads; defaults to the detected container
    /// CPU limit when unset
    #[arg(long)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a new API key and print it (does not persist it anywhere).
    Keygen {
        /// Key prefix, e.g. sk_live, sk_test
        #[arg(long, default_value = "sk_live")]
        prefix: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Keygen { prefix }) = cli.command {
        let key = ApiKeyStore::generate(&prefix);
        println!("\n{}", "=".repeat(60));
        println!("Generated new API key:");
        println!("  Key: {key}");
        println!("  Prefix: {prefix}");
        println!("\nUse it as: Authorization: Bearer {key}");
        println!("{}\n", "=".repeat(60));
        return Ok(());
    }

    let worker_threads = cli
        .workers
        .unwrap_or_else(embedserve_common::runtime::get_container_cpu_limit);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(async move {
        let mut config = embedserve_gateway::config::GatewayConfig::load(&cli.config)?;
        if let Some(v) = cli.inference_url {
            config.inference_url = v;
        }
        if let Some(v) = cli.rate_limit_minute {
            config.rate_limit_minute = v;
        }
        if let Some(v) = cli.rate_limit_hour {
            config.rate_limit_hour = v;
        }
        if let Some(v) = cli.redis_url {
            config.redis_url = Some(v);
        }
        if cli.bypass_rate_limits {
            config.bypass_rate_limits = true;
        }
        if let Some(v) = &cli.host {
            config.host = v.clone();
        }
        if let Some(v) = cli.port {
            config.port = v;
        }
        config.validate()?;

        let listen = cli
            .listen
            .unwrap_or_else(|| format!("{}:{}", config.host, config.port));

        server::bootstrap::run(server::bootstrap::BootstrapArgs { config, listen }).await
    })
}
