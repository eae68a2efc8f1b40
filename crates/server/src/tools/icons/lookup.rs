//! Read-side icon tools: image lookup, bound icon address, load decisions.

use favdb_core::{IconDatabase, IconLoadDecision, IconSize, LoaderId};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{require_non_empty, require_open, to_result};
use crate::error::BridgeError;

/// Parameters for the icon_for_page tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IconForPageParams {
    /// Page address to look up.
    pub page_url: String,

    /// Requested width in pixels (default: 16). 0 only schedules a disk read.
    #[serde(default = "default_edge")]
    pub width: u32,

    /// Requested height in pixels (default: 16).
    #[serde(default = "default_edge")]
    pub height: u32,

    /// Keep the decoded image in memory for this size (default: true).
    #[serde(default = "default_true")]
    pub cache: bool,
}

fn default_edge() -> u32 {
    16
}

fn default_true() -> bool {
    true
}

/// Output from the icon_for_page tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IconForPageOutput {
    pub page_url: String,
    /// Icon address bound to the page, if known.
    pub icon_url: Option<String>,
    /// Hex-encoded icon bytes. Absent while the bytes are still being read
    /// from disk; ask again after the next sync.
    pub data_hex: Option<String>,
    pub width: u32,
    pub height: u32,
}

pub fn icon_for_page(db: &IconDatabase, params: IconForPageParams) -> Result<IconForPageOutput, BridgeError> {
    require_non_empty("page_url", &params.page_url)?;
    let size = IconSize::new(params.width, params.height);
    let icon = db.icon_for_page_url(&params.page_url, size, params.cache);

    Ok(IconForPageOutput {
        icon_url: db.icon_url_for_page_url(&params.page_url),
        page_url: params.page_url,
        data_hex: icon.map(|icon| hex::encode(&icon.data)),
        width: size.width,
        height: size.height,
    })
}

/// Implementation of the icon_for_page tool.
pub fn icon_for_page_impl(db: &IconDatabase, params: IconForPageParams) -> Result<CallToolResult, McpError> {
    to_result(&icon_for_page(db, params)?)
}

/// Parameters for the icon_url_for_page tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IconUrlForPageParams {
    pub page_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IconUrlForPageOutput {
    pub page_url: String,
    pub icon_url: Option<String>,
}

pub fn icon_url_for_page(db: &IconDatabase, params: IconUrlForPageParams) -> Result<IconUrlForPageOutput, BridgeError> {
    require_non_empty("page_url", &params.page_url)?;
    require_open(db)?;
    Ok(IconUrlForPageOutput { icon_url: db.icon_url_for_page_url(&params.page_url), page_url: params.page_url })
}

/// Implementation of the icon_url_for_page tool.
pub fn icon_url_for_page_impl(db: &IconDatabase, params: IconUrlForPageParams) -> Result<CallToolResult, McpError> {
    to_result(&icon_url_for_page(db, params)?)
}

/// Parameters for the icon_data_known tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IconDataKnownParams {
    pub icon_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IconDataKnownOutput {
    pub icon_url: String,
    /// True once the bytes, or their absence, are known in memory.
    pub known: bool,
}

pub fn icon_data_known(db: &IconDatabase, params: IconDataKnownParams) -> Result<IconDataKnownOutput, BridgeError> {
    require_non_empty("icon_url", &params.icon_url)?;
    Ok(IconDataKnownOutput { known: db.icon_data_known_for_icon_url(&params.icon_url), icon_url: params.icon_url })
}

/// Implementation of the icon_data_known tool.
pub fn icon_data_known_impl(db: &IconDatabase, params: IconDataKnownParams) -> Result<CallToolResult, McpError> {
    to_result(&icon_data_known(db, params)?)
}

/// Parameters for the icon_load_decision tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoadDecisionParams {
    pub icon_url: String,

    /// Caller-chosen id, echoed back in a later notification when the
    /// decision is `unknown`.
    #[serde(default)]
    pub loader_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoadDecisionOutput {
    pub icon_url: String,
    /// `yes`, `no` or `unknown`.
    pub decision: String,
}

fn decision_label(decision: IconLoadDecision) -> &'static str {
    match decision {
        IconLoadDecision::Yes => "yes",
        IconLoadDecision::No => "no",
        IconLoadDecision::Unknown => "unknown",
    }
}

pub fn load_decision(db: &IconDatabase, params: LoadDecisionParams) -> Result<LoadDecisionOutput, BridgeError> {
    require_non_empty("icon_url", &params.icon_url)?;
    require_open(db)?;
    let decision = db.load_decision_for_icon_url(&params.icon_url, LoaderId(params.loader_id));
    Ok(LoadDecisionOutput { icon_url: params.icon_url, decision: decision_label(decision).into() })
}

/// Implementation of the icon_load_decision tool.
pub fn load_decision_impl(db: &IconDatabase, params: LoadDecisionParams) -> Result<CallToolResult, McpError> {
    to_result(&load_decision(db, params)?)
}
