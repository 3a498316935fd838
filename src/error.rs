use thiserror::Error;

/// Top-level error type for the forwarder.
#[derive(Debug, Error)]
pub enum ForwarderError {
    /// Required settings are missing or malformed.
    #[error("config error: {0}")]
    Config(String),

    /// Login code, password or token was rejected.
    #[error("authentication error: {0}")]
    Auth(String),

    /// A single message could not be delivered.
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Transient network or protocol failure from the connector.
    #[error("connection error: {0}")]
    Connection(String),

    /// The active connector cannot perform this operation.
    #[error("{operation} is not supported by the {connector} connector")]
    Unsupported {
        operation: &'static str,
        connector: &'static str,
    },

    /// A prompt was needed while running headless.
    #[error("interactive input required: {0}")]
    NonInteractive(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForwarderError {
    /// Whether a fresh session may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Io(_))
    }
}
