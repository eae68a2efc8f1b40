//! Write-side icon tools: bindings, icon bytes, retain/release.

use bytes::Bytes;
use favdb_core::IconDatabase;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Ack, require_non_empty, require_open, to_result};
use crate::error::BridgeError;

/// Parameters for the icon_set_url tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SetIconUrlParams {
    pub icon_url: String,
    pub page_url: String,
}

pub fn set_icon_url(db: &IconDatabase, params: SetIconUrlParams) -> Result<Ack, BridgeError> {
    require_non_empty("icon_url", &params.icon_url)?;
    require_non_empty("page_url", &params.page_url)?;
    require_open(db)?;
    db.set_icon_url_for_page_url(&params.icon_url, &params.page_url);
    Ok(Ack { ok: true })
}

/// Implementation of the icon_set_url tool.
pub fn set_icon_url_impl(db: &IconDatabase, params: SetIconUrlParams) -> Result<CallToolResult, McpError> {
    to_result(&set_icon_url(db, params)?)
}

/// Parameters for the icon_set_data tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SetIconDataParams {
    pub icon_url: String,

    /// Hex-encoded icon bytes.
    pub data_hex: String,
}

pub fn set_icon_data(db: &IconDatabase, params: SetIconDataParams) -> Result<Ack, BridgeError> {
    require_non_empty("icon_url", &params.icon_url)?;
    require_non_empty("data_hex", &params.data_hex)?;
    let data = hex::decode(&params.data_hex)
        .map_err(|e| BridgeError::InvalidInput(format!("data_hex is not valid hex: {e}")))?;
    require_open(db)?;
    db.set_icon_data_for_icon_url(Some(Bytes::from(data)), &params.icon_url);
    Ok(Ack { ok: true })
}

/// Implementation of the icon_set_data tool.
pub fn set_icon_data_impl(db: &IconDatabase, params: SetIconDataParams) -> Result<CallToolResult, McpError> {
    to_result(&set_icon_data(db, params)?)
}

/// Parameters for tools that take a single icon address.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IconUrlParams {
    pub icon_url: String,
}

/// Record that the icon is known to have no data.
pub fn set_missing(db: &IconDatabase, params: IconUrlParams) -> Result<Ack, BridgeError> {
    require_non_empty("icon_url", &params.icon_url)?;
    require_open(db)?;
    db.set_icon_data_for_icon_url(None, &params.icon_url);
    Ok(Ack { ok: true })
}

/// Implementation of the icon_set_missing tool.
pub fn set_missing_impl(db: &IconDatabase, params: IconUrlParams) -> Result<CallToolResult, McpError> {
    to_result(&set_missing(db, params)?)
}

/// Parameters for tools that take a single page address.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PageParams {
    pub page_url: String,
}

pub fn retain(db: &IconDatabase, params: PageParams) -> Result<Ack, BridgeError> {
    require_non_empty("page_url", &params.page_url)?;
    db.retain_icon_for_page_url(&params.page_url);
    Ok(Ack { ok: true })
}

/// Implementation of the icon_retain tool.
pub fn retain_impl(db: &IconDatabase, params: PageParams) -> Result<CallToolResult, McpError> {
    to_result(&retain(db, params)?)
}

pub fn release(db: &IconDatabase, params: PageParams) -> Result<Ack, BridgeError> {
    require_non_empty("page_url", &params.page_url)?;
    db.release_icon_for_page_url(&params.page_url);
    Ok(Ack { ok: true })
}

/// Implementation of the icon_release tool.
pub fn release_impl(db: &IconDatabase, params: PageParams) -> Result<CallToolResult, McpError> {
    to_result(&release(db, params)?)
}
