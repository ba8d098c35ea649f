use thiserror::Error;

/// Application-wide error types for harvest.
#[derive(Error, Debug)]
pub enum AppError {
    /// The broker could not be reached when the client was constructed.
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// A broker call failed mid-run.
    #[error("Broker error: {0}")]
    BrokerError(String),

    /// The extraction invoker raised or returned an explicit failure.
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// An encoded outcome could not be decoded.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// The job input source could not be read.
    #[error("Input source error: {0}")]
    InputSourceError(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Durable output could not be written.
    #[error("Output error: {0}")]
    OutputError(String),

    /// HTTP request failed (fetching a page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Operation timed out.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if the error comes from the shared broker.
    pub fn is_broker_failure(&self) -> bool {
        matches!(self, AppError::BrokerUnavailable(_) | AppError::BrokerError(_))
    }

    /// Returns true if this error belongs to a single job and must be isolated
    /// into a failure outcome instead of stopping the run.
    pub fn is_per_job(&self) -> bool {
        matches!(
            self,
            AppError::ExtractionFailed(_)
                | AppError::HttpError(_)
                | AppError::NetworkError(_)
                | AppError::Timeout(_)
                | AppError::SerializationError(_)
                | AppError::Generic(_)
        )
    }
}

impl From<csv::Error> for AppError {
    fn from(e: csv::Error) -> Self {
        AppError::OutputError(e.to_string())
    }
}
