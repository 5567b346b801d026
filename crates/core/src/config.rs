use std::path::PathBuf;

use crate::error::PulseError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

// ── Agent ─────────────────────────────────────────────────────

/// Options consumed by the agent, however they were sourced
/// (flags, env vars, .env file).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Target server `host:port`.
    pub server_addr: String,
    /// Seconds between shipments.
    pub report_interval: u64,
    /// Seconds between sample cycles.
    pub poll_interval: u64,
    /// Capacity of the job and result channels.
    pub rate_limit: usize,
    /// Shared HMAC secret; `None` disables request signing.
    pub key_enc: Option<String>,
    /// PEM public key; `None` disables payload encryption.
    pub pub_key_file: Option<PathBuf>,
    /// Ship over gRPC instead of HTTP.
    pub grpc: bool,
    /// Log verbosity, e.g. "info".
    pub log_level: String,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), PulseError> {
        if self.server_addr.is_empty() {
            return Err(PulseError::Config("server address is empty".to_string()));
        }
        if self.report_interval == 0 || self.poll_interval == 0 {
            return Err(PulseError::Config(
                "report and poll intervals must be positive".to_string(),
            ));
        }
        if self.rate_limit == 0 {
            return Err(PulseError::Config("rate limit must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Agent config loaded:");
        tracing::info!("  server:    {} (grpc: {})", self.server_addr, self.grpc);
        tracing::info!(
            "  intervals: report={}s poll={}s rate_limit={}",
            self.report_interval,
            self.poll_interval,
            self.rate_limit
        );
        tracing::info!(
            "  security:  sign={} encrypt={}",
            self.key_enc.is_some(),
            self.pub_key_file.is_some()
        );
    }
}

// ── Server ────────────────────────────────────────────────────

/// Options consumed by the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP bind `host:port`.
    pub server_addr: String,
    /// gRPC ingest bind; `None` disables the RPC transport.
    pub grpc_addr: Option<String>,
    /// Seconds between persistence dumps; 0 means dump only on shutdown.
    pub store_interval: u64,
    /// NDJSON dump path for the in-memory store.
    pub file_storage_path: Option<PathBuf>,
    /// Restore the in-memory store from the dump file on startup.
    pub restore: bool,
    /// Non-empty selects the PostgreSQL store.
    pub database_dsn: Option<String>,
    /// Shared HMAC secret; `None` disables signature checks.
    pub key_enc: Option<String>,
    /// PEM private key; `None` disables payload decryption.
    pub priv_key_file: Option<PathBuf>,
    /// CIDR allowlist for the gRPC ingest, comma-separated.
    pub trusted_subnet: Option<String>,
    /// Log verbosity, e.g. "info".
    pub log_level: String,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), PulseError> {
        if self.server_addr.is_empty() {
            return Err(PulseError::Config("bind address is empty".to_string()));
        }
        if self.restore && self.file_storage_path.is_none() && self.database_dsn.is_none() {
            return Err(PulseError::Config(
                "restore requested without a storage file".to_string(),
            ));
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Server config loaded:");
        tracing::info!(
            "  bind:      http={} grpc={}",
            self.server_addr,
            self.grpc_addr.as_deref().unwrap_or("(disabled)")
        );
        tracing::info!(
            "  store:     backend={} dump_interval={}s restore={}",
            if self.database_dsn.is_some() { "postgres" } else { "memory" },
            self.store_interval,
            self.restore
        );
        tracing::info!(
            "  security:  sign={} decrypt={} trusted_subnet={}",
            self.key_enc.is_some(),
            self.priv_key_file.is_some(),
            self.trusted_subnet.as_deref().unwrap_or("(open)")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_config() -> AgentConfig {
        AgentConfig {
            server_addr: "localhost:8080".to_string(),
            report_interval: 10,
            poll_interval: 2,
            rate_limit: 1,
            key_enc: None,
            pub_key_file: None,
            grpc: false,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_agent_config_valid() {
        assert!(agent_config().validate().is_ok());
    }

    #[test]
    fn test_agent_config_rejects_zero_interval() {
        let mut cfg = agent_config();
        cfg.poll_interval = 0;
        assert!(matches!(cfg.validate(), Err(PulseError::Config(_))));
    }

    #[test]
    fn test_agent_config_rejects_zero_rate_limit() {
        let mut cfg = agent_config();
        cfg.rate_limit = 0;
        assert!(matches!(cfg.validate(), Err(PulseError::Config(_))));
    }

    #[test]
    fn test_server_config_restore_needs_file() {
        let cfg = ServerConfig {
            server_addr: "localhost:8080".to_string(),
            grpc_addr: None,
            store_interval: 300,
            file_storage_path: None,
            restore: true,
            database_dsn: None,
            key_enc: None,
            priv_key_file: None,
            trusted_subnet: None,
            log_level: "info".to_string(),
        };
        assert!(matches!(cfg.validate(), Err(PulseError::Config(_))));
    }
}
