use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pulse_core::{config, shutdown, ServerConfig};

/// Grace period between shutdown request and forced exit.
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "pulse-server", about = "Absorbs metric batches and answers point and bulk queries")]
struct Cli {
    /// HTTP bind address.
    #[arg(short = 'a', long = "address", env = "ADDRESS", default_value = "localhost:8080")]
    address: String,

    /// gRPC ingest bind address; unset disables the RPC transport.
    #[arg(short = 'g', long = "grpc-address", env = "GRPC_ADDRESS")]
    grpc_address: Option<String>,

    /// Seconds between store dumps; 0 dumps only on shutdown.
    #[arg(short = 'i', long = "store-interval", env = "STORE_INTERVAL", default_value_t = 300)]
    store_interval: u64,

    /// In-memory store dump path; empty disables persistence.
    #[arg(short = 'f', long = "file-storage-path", env = "FILE_STORAGE_PATH", default_value = "/tmp/metrics-db.json")]
    file_storage_path: String,

    /// Restore the in-memory store from the dump file on startup.
    #[arg(short = 'r', long = "restore", env = "RESTORE", default_value_t = true, num_args = 0..=1, default_missing_value = "true")]
    restore: bool,

    /// PostgreSQL DSN; non-empty selects the SQL store.
    #[arg(short = 'd', long = "database-dsn", env = "DATABASE_DSN")]
    database_dsn: Option<String>,

    /// Shared secret for signature checks.
    #[arg(short = 'k', long = "key", env = "KEY")]
    key: Option<String>,

    /// Private key file for payload decryption.
    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    crypto_key: Option<PathBuf>,

    /// CIDR allowlist for the gRPC ingest, comma-separated.
    #[arg(short = 't', long = "trusted-subnet", env = "TRUSTED_SUBNET")]
    trusted_subnet: Option<String>,

    /// Log verbosity.
    #[arg(short = 'l', long = "log-level", env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();
    let cli = Cli::parse();
    let cfg = ServerConfig {
        server_addr: cli.address,
        grpc_addr: cli.grpc_address,
        store_interval: cli.store_interval,
        file_storage_path: if cli.file_storage_path.is_empty() {
            None
        } else {
            Some(PathBuf::from(cli.file_storage_path))
        },
        restore: cli.restore,
        database_dsn: cli.database_dsn,
        key_enc: cli.key,
        priv_key_file: cli.crypto_key,
        trusted_subnet: cli.trusted_subnet,
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

    pulse_server::run(cfg, shutdown).await?;
    Ok(())
}
