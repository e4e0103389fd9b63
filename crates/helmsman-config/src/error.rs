use thiserror::Error;

/// Failure to produce a usable [`HelmsmanConfig`](crate::HelmsmanConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A layer file could not be read.
    #[error("could not read config layer: {0}")]
    ReadFailed(#[from] std::io::Error),
    /// A layer was not valid JSON5.
    #[error("config layer is not valid JSON5: {0}")]
    ParseFailed(#[from] json5::Error),
    /// The merged document did not match the typed model.
    #[error("config does not match the expected shape: {0}")]
    DecodeFailed(#[from] serde_json::Error),
    /// A key is unknown or a value is out of range.
    #[error("invalid config at {path}: {message}")]
    InvalidField { path: String, message: String },
}
