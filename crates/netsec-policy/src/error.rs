//! Error types for the policy compiler

use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Result type alias for policy operations
pub type Result<T> = std::result::Result<T, PolicyError>;

/// Category of a canonical object stored in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// A host document
    Host,
    /// A group document
    Group,
    /// A service document
    Service,
    /// A policy document
    Policy,
}

impl ObjectKind {
    /// The document `kind` tag for this category
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Host => "Host",
            ObjectKind::Group => "Group",
            ObjectKind::Service => "Service",
            ObjectKind::Policy => "NetworkPolicy",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Host => write!(f, "Host"),
            ObjectKind::Group => write!(f, "Group"),
            ObjectKind::Service => write!(f, "Service"),
            ObjectKind::Policy => write!(f, "Policy"),
        }
    }
}

/// Main error type for policy operations
#[derive(Error, Debug)]
pub enum PolicyError {
    /// A named reference does not exist in the registry
    #[error("{kind} not found: {name}")]
    ObjectNotFound {
        /// Category of the missing object
        kind: ObjectKind,
        /// Name that was looked up
        name: String,
    },

    /// Structural failure while loading the object store
    #[error("Failed to load {}: {message}", path.display())]
    RegistryError {
        /// Document that could not be loaded
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Aggregated list of human-readable violations
    #[error("Validation failed for {context}: {}", errors.join("; "))]
    ValidationError {
        /// What was being validated (policy, platform, file)
        context: String,
        /// Every violation found
        errors: Vec<String>,
    },

    /// No adapter is registered for the platform
    #[error("No adapter for platform: {0}")]
    UnknownPlatform(String),

    /// A group or service has no mapping for the platform that needs one
    #[error("{kind} '{name}' has no {platform} platform mapping")]
    MissingPlatformMapping {
        /// Platform whose mapping is absent
        platform: String,
        /// Category of the object
        kind: ObjectKind,
        /// Object name
        name: String,
    },

    /// The mapping names a strategy the adapter does not implement
    #[error("Strategy '{strategy}' is not implemented by the {platform} adapter ({kind} '{name}')")]
    StrategyNotImplemented {
        /// Platform adapter that rejected the strategy
        platform: String,
        /// Strategy named in the mapping
        strategy: String,
        /// Category of the object
        kind: ObjectKind,
        /// Object name
        name: String,
    },

    /// A named endpoint resolved to no IP addresses where the rule needs some
    #[error("{kind} '{name}' resolves to no addresses on {platform}")]
    EmptyEndpoint {
        /// Platform whose rule could not be rendered
        platform: String,
        /// Group or host
        kind: ObjectKind,
        /// Object name
        name: String,
    },

    /// Nested group references form a cycle
    #[error("Cyclic group membership: {}", cycle.join(" -> "))]
    CyclicMembership {
        /// Group names along the cycle, first and last equal
        cycle: Vec<String>,
    },

    /// Document parsing error
    #[error("Failed to parse {0}")]
    ParseError(String),

    /// Invalid document or rule format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Glob pattern error
    #[error("Glob pattern error: {0}")]
    GlobError(String),
}

impl From<globset::Error> for PolicyError {
    fn from(err: globset::Error) -> Self {
        PolicyError::GlobError(err.to_string())
    }
}

impl PolicyError {
    /// Create a not-found error
    pub fn not_found<S: Into<String>>(kind: ObjectKind, name: S) -> Self {
        PolicyError::ObjectNotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a parse error with context
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        PolicyError::ParseError(msg.into())
    }

    /// Create an aggregated validation error
    pub fn validation<S: Into<String>>(context: S, errors: Vec<String>) -> Self {
        PolicyError::ValidationError {
            context: context.into(),
            errors,
        }
    }

    /// Create a registry load error for a document
    pub fn registry<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        PolicyError::RegistryError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True for errors a caller may treat as a skipped reference
    pub fn is_not_found(&self) -> bool {
        matches!(self, PolicyError::ObjectNotFound { .. })
    }
}
