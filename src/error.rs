//! Error types for the Unity Catalog MCP gateway

use std::io;

use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller credential missing or malformed
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Token exchange provider unreachable or refused the exchange
    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    /// No tool registered under the requested name
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Arguments do not match the tool's input schema
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Identity provider could not resolve the caller
    #[error("Identity lookup failed: {0}")]
    IdentityLookup(String),

    /// A source adapter failed while enumerating tools
    #[error("Tool source '{adapter}' failed: {message}")]
    SourceAdapter {
        /// Adapter name
        adapter: String,
        /// Failure description
        message: String,
    },

    /// Workspace REST API returned a non-success status
    #[error("Workspace API error (HTTP {status}): {message}")]
    Backend {
        /// HTTP status code
        status: u16,
        /// Message reported by the workspace
        message: String,
    },

    /// Backend capability reported a failure
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert to JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::ToolNotFound(_) | Self::InvalidArguments(_) => rpc_codes::INVALID_PARAMS,
            Self::Unauthenticated(_) => rpc_codes::UNAUTHENTICATED,
            Self::ExchangeFailed(_) => rpc_codes::EXCHANGE_FAILED,
            Self::Backend { .. } | Self::Execution(_) | Self::Transport(_) => rpc_codes::SERVER_ERROR_START,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }

    /// Whether the error was caused by the caller rather than the server.
    ///
    /// Client errors are logged at debug level only.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated(_)
                | Self::ToolNotFound(_)
                | Self::InvalidArguments(_)
        )
    }
}

/// Standard JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server error range start
    pub const SERVER_ERROR_START: i32 = -32000;
    /// Caller credential missing or malformed
    pub const UNAUTHENTICATED: i32 = -32001;
    /// On-behalf-of exchange refused or unavailable
    pub const EXCHANGE_FAILED: i32 = -32002;
}
