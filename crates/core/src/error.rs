use thiserror::Error;

/// Error taxonomy shared by the agent, the server, and the store layer.
///
/// The first four variants form the non-retriable set consulted by the
/// retry layer; everything else is considered transient.
#[derive(Error, Debug)]
pub enum PulseError {
    #[error("no value")]
    NoValue,

    #[error("bad metric type")]
    BadMetricType,

    #[error("wrong metric type")]
    WrongMetricType,

    #[error("wrong metric value type")]
    WrongMetricValueType,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("auth failure: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("store failure: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PulseError {
    /// Whether the retry layer must give up immediately on this error.
    pub fn is_non_retriable(&self) -> bool {
        matches!(
            self,
            PulseError::NoValue
                | PulseError::BadMetricType
                | PulseError::WrongMetricType
                | PulseError::WrongMetricValueType
        )
    }
}
