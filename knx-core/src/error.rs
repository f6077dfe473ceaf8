use thiserror::Error;

/// Main error type for KNX client operations
#[derive(Error, Debug)]
pub enum KnxError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Link closed: {0}")]
    LinkClosed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Timeout")]
    Timeout,

    #[error("Cancelled")]
    Cancelled,

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias for KNX client operations
pub type KnxResult<T> = Result<T, KnxError>;

impl KnxError {
    /// Check if the error indicates a lost or unusable link
    ///
    /// Recoverable errors release the connection resources and schedule a
    /// reconnect; everything else is handled locally by the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            KnxError::Connection(_)
                | KnxError::LinkClosed(_)
                | KnxError::Protocol(_)
                | KnxError::Timeout
        )
    }

    /// Check if the error represents caller-initiated cancellation
    ///
    /// Cancellation is neither success nor failure: it suppresses noisy
    /// logging and honors disposal when one is in progress.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, KnxError::Cancelled)
    }

    /// Check if the error is a fatal configuration problem
    ///
    /// Configuration errors are reported to the host without scheduling an
    /// automatic retry.
    pub fn is_configuration(&self) -> bool {
        matches!(self, KnxError::Configuration(_))
    }
}
