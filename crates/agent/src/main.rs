use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pulse_core::{config, shutdown, AgentConfig};

/// Grace period between shutdown request and forced exit.
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "pulse-agent", about = "Samples host metrics and ships them to the server")]
struct Cli {
    /// Destination server address.
    #[arg(short = 'a', long = "address", env = "ADDRESS", default_value = "localhost:8080")]
    address: String,

    /// Seconds between shipments.
    #[arg(short = 'r', long = "report-interval", env = "REPORT_INTERVAL", default_value_t = 10)]
    report_interval: u64,

    /// Seconds between sample cycles.
    #[arg(short = 'p', long = "poll-interval", env = "POLL_INTERVAL", default_value_t = 2)]
    poll_interval: u64,

    /// Number of in-flight shipments.
    #[arg(short = 'l', long = "rate-limit", env = "RATE_LIMIT", default_value_t = 1)]
    rate_limit: usize,

    /// Shared secret for request signing.
    #[arg(short = 'k', long = "key", env = "KEY")]
    key: Option<String>,

    /// Public key file for payload encryption.
    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    crypto_key: Option<PathBuf>,

    /// Ship over gRPC instead of HTTP.
    #[arg(long = "grpc", env = "GRPC", default_value_t = false, num_args = 0..=1, default_missing_value = "true")]
    grpc: bool,

    /// Log verbosity.
    #[arg(long = "log-level", env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();
    let cli = Cli::parse();
    let cfg = AgentConfig {
        server_addr: cli.address,
        report_interval: cli.report_interval,
        poll_interval: cli.poll_interval,
        rate_limit: cli.rate_limit,
        key_enc: cli.key,
        pub_key_file: cli.crypto_key,
        grpc: cli.grpc,
        log_level: cli.log_level,
    };

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (handle, shutdown) = shutdown::channel(FORCE_EXIT_AFTER);
    shutdown::listen_for_signals(handle);

    pulse_agent::run(cfg, shutdown).await?;
    Ok(())
}
