//! Error types for analysis, manifests, configuration and run-time lookups

use thiserror::Error;

use crate::types::syntax::SyntaxError;

/// Result of a whole-program analysis step
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Fatal analysis-time failures. Any of these aborts the compilation.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The worklist kept producing work past the configured limit
    #[error("Reachability fixpoint did not converge after {processed} work items")]
    FixpointDiverged {
        /// Number of work items processed before giving up
        processed: usize,
    },

    /// An entry point or root still mentions generic parameters
    #[error("Root {name} is not a closed instantiation")]
    OpenRoot {
        /// Display name of the offending root
        name: String,
    },

    /// A scanning worker thread panicked
    #[error("Scanner worker {worker} panicked")]
    WorkerPanicked {
        /// Worker index
        worker: usize,
    },
}

/// Catchable reflection failures observed by the running program
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReflectionError {
    /// The member or type was not retained at the tier the operation needs
    #[error("Missing metadata for '{name}'")]
    MissingMetadata {
        /// Fully qualified display name of the type or member
        name: String,
    },

    /// The operation is valid but cannot be satisfied ahead of time
    #[error("Operation on '{name}' is not supported: {reason}")]
    NotSupported {
        /// Fully qualified display name of the type or member
        name: String,
        /// Why the operation was refused
        reason: String,
    },
}

impl ReflectionError {
    /// Create a `MissingMetadata` error
    pub fn missing(name: impl Into<String>) -> Self {
        ReflectionError::MissingMetadata { name: name.into() }
    }

    /// Create a `NotSupported` error
    pub fn not_supported(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ReflectionError::NotSupported {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that can occur while loading a program manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Failed to read the manifest file
    #[error("Failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse manifest: {0}")]
    Toml(#[from] toml::de::Error),

    /// Failed to parse JSON
    #[error("Failed to parse manifest: {0}")]
    Json(#[from] serde_json::Error),

    /// A type or member reference did not parse
    #[error("Invalid reference '{text}': {source}")]
    Syntax {
        /// The offending reference text
        text: String,
        /// Underlying syntax error
        source: SyntaxError,
    },

    /// Reference to a type that is not declared
    #[error("Undefined type: {name}")]
    UndefinedType {
        /// Type name that was not found
        name: String,
    },

    /// Reference to a member that is not declared
    #[error("Undefined member {owner}::{name}")]
    UndefinedMember {
        /// Declaring type display name
        owner: String,
        /// Member name
        name: String,
    },

    /// The same type name is declared twice
    #[error("Duplicate type: {name}")]
    DuplicateType {
        /// Duplicated name
        name: String,
    },

    /// Wrong number of generic arguments
    #[error("Invalid generic argument count for {name}: expected {expected}, got {actual}")]
    ArityMismatch {
        /// Generic type or method name
        name: String,
        /// Declared arity
        expected: usize,
        /// Supplied arity
        actual: usize,
    },

    /// The base-type chain loops
    #[error("Circular base type chain through {name}")]
    CyclicInheritance {
        /// A type on the cycle
        name: String,
    },

    /// Structurally invalid declaration
    #[error("Invalid declaration of {name}: {reason}")]
    Invalid {
        /// Declaration name
        name: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}
