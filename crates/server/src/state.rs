use std::sync::Arc;

use pulse_storage::retry::Retrier;
use pulse_storage::MetricStore;
use pulse_wire::crypt::Decryptor;

/// Shared request-handling state: the store behind its retry wrapper
/// plus the optional wire-security material.
pub struct AppState {
    pub store: Arc<dyn MetricStore>,
    pub retrier: Retrier,
    /// Shared HMAC secret; `None` disables verification and response
    /// signing.
    pub sign_key: Option<String>,
    /// Private key half; `None` disables body decryption.
    pub decryptor: Option<Decryptor>,
}

pub type SharedState = Arc<AppState>;
