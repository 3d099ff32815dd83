//! Error types for the palette
//!
//! Provides standardized error handling across the command layer, the
//! bridge client, and the resolution cache.

use thiserror::Error;

/// Errors that can occur in the palette
#[derive(Debug, Error)]
pub enum PaletteError {
    /// The first token of a command line matched no name or alias
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A command's validation rejected its arguments (message shown verbatim)
    #[error("{0}")]
    InvalidArguments(String),

    /// A command could not be registered
    #[error("Invalid command descriptor: {0}")]
    InvalidDescriptor(String),

    /// No correlated response arrived before the deadline
    #[error("{0}")]
    BridgeTimeout(String),

    /// The bridge could not reach the instance
    #[error("{0}")]
    BridgeNetwork(String),

    /// The instance answered 401 or 403
    #[error("{0}")]
    AuthenticationRequired(String),

    /// Script execution was attempted without a discoverable session token
    #[error("No session token found; are you logged in to the instance?")]
    NoSessionToken,

    /// A response could not be interpreted
    #[error("{0}")]
    MalformedResponse(String),

    /// End-impersonation found no original user
    #[error("Not currently impersonating")]
    NotImpersonating,

    /// A non-2xx response that is not an authentication failure
    #[error("{message}")]
    Http { status: u16, message: String },

    /// A command failed for a reason of its own
    #[error("{0}")]
    CommandFailed(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for palette operations
pub type PaletteResult<T> = Result<T, PaletteError>;
