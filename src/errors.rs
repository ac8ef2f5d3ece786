use thiserror::Error;

/// Fail-fast error types for the discovery pipeline.
///
/// Only configuration and I/O problems surface here; probe failures are
/// silent and adapter failures travel inside `ScanOutcome` so a single bad
/// endpoint can never abort a run.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Invalid Subnet '{subnet}': {reason}")]
    InvalidSubnet { subnet: String, reason: String },

    #[error("Configuration Error: {0}")]
    ConfigError(String),

    #[error("History Error: {0}")]
    HistoryError(String),

    #[error("I/O Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization Error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("HTTP Client Error: {0}")]
    HttpError(#[from] reqwest::Error),
}
