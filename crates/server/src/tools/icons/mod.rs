//! Icon database MCP tools.
//!
//! Each tool is a 1:1 pass-through onto an [`IconDatabase`] method. Tools
//! split into a typed function (tested directly) and an `*_impl` wrapper
//! that renders the output as JSON text content.

pub mod admin;
pub mod lookup;
pub mod mutate;

use favdb_core::IconDatabase;
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

use crate::error::BridgeError;

pub use admin::{OpenParams, PrivateBrowsingParams, SyncParams};
pub use lookup::{IconDataKnownParams, IconForPageParams, IconUrlForPageParams, LoadDecisionParams};
pub use mutate::{IconUrlParams, PageParams, SetIconDataParams, SetIconUrlParams};

/// Acknowledgement returned by tools that only mutate state.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct Ack {
    pub ok: bool,
}

pub(crate) fn to_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| BridgeError::Internal(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

pub(crate) fn require_open(db: &IconDatabase) -> Result<(), BridgeError> {
    if db.is_open() {
        Ok(())
    } else {
        Err(BridgeError::NotOpen("icon database is closed".into()))
    }
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<(), BridgeError> {
    if value.is_empty() {
        return Err(BridgeError::InvalidInput(format!("{field} cannot be empty")));
    }
    Ok(())
}
