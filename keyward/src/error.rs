//! Error types for `keyward` operations.

use std::fmt;

/// Main error type for `keyward` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Provider or application configuration is missing or invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A key vault call failed
    #[error("{operation} failed for key alias `{alias}` (provider `{provider}`): {source}")]
    KeyVault {
        /// The operation that failed
        operation: &'static str,
        /// The key alias being resolved
        alias: String,
        /// The master key provider in use
        provider: String,
        /// Underlying key vault failure
        #[source]
        source: VaultError,
    },

    /// A stored key record's `_id` is not a well-formed binary value
    #[error("data key `{alias}` has a malformed _id: {reason}")]
    Decode {
        /// Alias of the corrupted record
        alias: String,
        /// What was wrong with it
        reason: String,
    },

    /// Key identifier text could not be parsed
    #[error("invalid key identifier: {0}")]
    InvalidKeyId(String),

    /// Field specifications describe conflicting schema nodes
    #[error("invalid schema layout: {0}")]
    SchemaLayout(String),

    /// The encrypted client factory rejected the options
    #[error("encrypted client factory failed: {0}")]
    ClientFactory(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true when a caller-driven retry may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::KeyVault { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns true when the operation stopped because of cancellation or a deadline.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::KeyVault { source: VaultError::Cancelled | VaultError::DeadlineExceeded, .. }
        )
    }
}

/// Errors raised while loading configuration.
///
/// These are fatal at startup; the entry point decides whether to abort.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// One or more required values are absent or empty
    #[error("missing required configuration values: {}", .0.join(", "))]
    Missing(Vec<String>),

    /// A value is present but cannot be used
    #[error("invalid value for {name}: {reason}")]
    Invalid {
        /// Name of the offending value
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// The provider tag is not one of the supported services
    #[error("unknown KMS provider `{0}` (expected aws, azure, gcp or local)")]
    UnknownProvider(String),

    /// Local master key material has the wrong size
    #[error("local master key must be {expected} bytes, got {actual}")]
    LocalKeyLength {
        /// Required length
        expected: usize,
        /// Length found
        actual: usize,
    },
}

/// Errors returned by key vault collaborators.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The key vault store or the master key service could not be reached
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline passed
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A unique alt-name index rejected the insert
    #[error("key alt name `{0}` already exists")]
    DuplicateAltName(String),

    /// A stored document could not be read
    #[error("malformed key vault document: {0}")]
    Malformed(String),

    /// Wrapping the new data key failed
    #[error("{0}")]
    KeyWrap(#[from] KeyWrapError),

    /// Persisting the key vault failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Returns true for connectivity-class failures.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::DeadlineExceeded | Self::Io(_))
    }
}

/// Errors specific to master key wrapping operations.
#[derive(Debug)]
pub enum KeyWrapError {
    /// No wrapper is configured for the provider
    UnknownProvider(String),

    /// Master key material or options are unusable
    InvalidMasterKey(String),

    /// Data key wrapping failed
    WrapFailed(String),

    /// Data key unwrapping failed
    UnwrapFailed(String),
}

impl fmt::Display for KeyWrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownProvider(name) => write!(f, "no key wrapper for provider: {name}"),
            Self::InvalidMasterKey(msg) => write!(f, "invalid master key: {msg}"),
            Self::WrapFailed(msg) => write!(f, "data key wrap failed: {msg}"),
            Self::UnwrapFailed(msg) => write!(f, "data key unwrap failed: {msg}"),
        }
    }
}

impl std::error::Error for KeyWrapError {}
