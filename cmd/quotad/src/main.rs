use clap::Parser;
use pkg_api::server::{ServerConfig, start_server};
use pkg_constants::state::{FANOUT_LIMIT, RESYNC_INTERVAL_SECS};
use pkg_types::config::{QuotadConfigFile, load_config_file};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "quotad", about = "quotad global resource quota control plane")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = "/etc/quotad/config.yaml")]
    config: String,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Operator API token
    #[arg(long)]
    token: Option<String>,

    /// Token the controller identity authenticates with
    #[arg(long)]
    controller_token: Option<String>,

    /// Seconds between periodic reconcile passes
    #[arg(long)]
    resync_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: QuotadConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let port = cli.port.or(file_cfg.port).unwrap_or(6444);
    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| "/tmp/quotad-data".to_string());
    let token = cli
        .token
        .or(file_cfg.token)
        .unwrap_or_else(|| "demo-token-123".to_string());
    let controller_token = cli
        .controller_token
        .or(file_cfg.controller_token)
        .unwrap_or_else(|| "controller-token-123".to_string());
    let resync_secs = cli
        .resync_secs
        .or(file_cfg.resync_secs)
        .unwrap_or(RESYNC_INTERVAL_SECS);
    let fanout_limit = file_cfg.fanout_limit.unwrap_or(FANOUT_LIMIT);

    info!("Starting quotad");
    info!("  Port:      {}", port);
    info!("  Data dir:  {}", data_dir);
    info!("  Resync:    {}s", resync_secs);
    info!("  Token:     {}***", &token[..token.len().min(4)]);

    let config = ServerConfig {
        addr: SocketAddr::from(([0, 0, 0, 0], port)),
        data_dir,
        join_token: token,
        controller_token,
        resync_interval: Duration::from_secs(resync_secs),
        fanout_limit,
    };

    start_server(config).await?;

    Ok(())
}
