//! Structured errors for the icon database bridge.
//!
//! The facade reports failures as booleans, so the bridge only has to
//! describe bad input and a closed database to the MCP client.

use rmcp::model::{ErrorCode, ErrorData as McpError};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Invalid input parameters (e.g., empty page address, bad hex).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// The icon database is not open.
    #[error("NOT_OPEN: {0}")]
    NotOpen(String),

    /// A result could not be encoded.
    #[error("INTERNAL: {0}")]
    Internal(String),

    #[error(transparent)]
    Core(#[from] favdb_core::Error),
}

impl From<BridgeError> for McpError {
    fn from(err: BridgeError) -> Self {
        let code = match &err {
            BridgeError::InvalidInput(_) => -32602,
            BridgeError::NotOpen(_) => -32001,
            BridgeError::Internal(_) => -32603,
            BridgeError::Core(_) => -32002,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}
