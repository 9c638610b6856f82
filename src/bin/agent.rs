//! Lookout sidecar binary.

use clap::Parser;
use lookout::config::LookoutConfig;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "lookout-agent")]
#[command(about = "Cluster observation and snapshot orchestration sidecar")]
struct Args {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comma-separated node list (host[:port] entries)
    #[arg(long, env = "LOOKOUT_NODES")]
    nodes: Option<String>,

    /// Namespace the database pods run in
    #[arg(long, env = "LOOKOUT_NAMESPACE")]
    namespace: Option<String>,

    /// API key for the cluster HTTP API
    #[arg(long, env = "LOOKOUT_API_KEY")]
    api_key: Option<String>,

    /// Poll interval in seconds
    #[arg(long, env = "LOOKOUT_POLL_INTERVAL", default_value = "30")]
    poll_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load or create configuration
    let mut config = if let Some(config_path) = args.config {
        LookoutConfig::from_file(&config_path)?
    } else {
        LookoutConfig::default()
    };

    // Override with CLI args
    if let Some(nodes) = args.nodes {
        config.cluster.nodes = nodes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(namespace) = args.namespace {
        config.exec.namespace = namespace;
    }
    if let Some(api_key) = args.api_key {
        config.cluster.api_key = Some(api_key);
    }
    config.cluster.poll_interval = Duration::from_secs(args.poll_interval);

    lookout::run(config).await?;

    Ok(())
}
