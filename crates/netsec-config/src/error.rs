//! Error types for the configuration system

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The document could not be read as configuration
    #[error("Configuration parsing error: {0}")]
    ParseError(String),

    /// The document parsed but breaks a rule
    #[error("Configuration validation error: {0}")]
    ValidationError(String),

    /// Filesystem failure
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML syntax or shape error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// JSON syntax or shape error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Two configurations with different format versions were merged
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version of the base configuration
        expected: String,
        /// Version of the overriding configuration
        found: String,
    },

    /// A field holds a value outside its domain
    #[error("Invalid value for {field}: {value}")]
    InvalidValue {
        /// Dotted field path
        field: String,
        /// Offending value
        value: String,
    },

    /// Error raised by the policy library
    #[error("Policy error: {0}")]
    PolicyError(#[from] netsec_policy::PolicyError),

    /// An explicitly requested file does not exist
    #[error("Configuration not found at path: {0}")]
    NotFound(String),
}
