use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum LabcasError {
    #[error("authentication failed: {0}")]
    #[diagnostic(help("check LABCAS_USERNAME / LABCAS_PASSWORD and the catalog base URL"))]
    Authentication(String),

    #[error("missing credentials: {0} is not set")]
    #[diagnostic(help("export LABCAS_USERNAME and LABCAS_PASSWORD before harvesting"))]
    MissingCredentials(String),

    #[error("catalog request failed: {0}")]
    TransientNetwork(String),

    #[error("catalog resource not found: {0}")]
    NotFound(String),

    #[error("catalog returned status {status}: {message}")]
    Server { status: u16, message: String },

    #[error("catalog returned unexpected status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("unexpected catalog payload: {0}")]
    Decode(String),

    #[error("collection not found in catalog: {0}")]
    CollectionNotFound(String),

    #[error("schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("manifest error: {0}")]
    Manifest(String),
}

impl LabcasError {
    /// Per-request errors a caller may reasonably retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LabcasError::TransientNetwork(_) | LabcasError::Server { .. }
        )
    }
}
