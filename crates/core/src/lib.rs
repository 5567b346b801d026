pub mod config;
pub mod error;
pub mod metrics;
pub mod shutdown;

pub use config::{AgentConfig, ServerConfig};
pub use error::PulseError;
pub use metrics::*;
