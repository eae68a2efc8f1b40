//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the icon database tools.
use std::sync::Arc;

use crate::error::BridgeError;
use crate::tools::icons::{
    IconDataKnownParams, IconForPageParams, IconUrlForPageParams, IconUrlParams, LoadDecisionParams, OpenParams,
    PageParams, PrivateBrowsingParams, SetIconDataParams, SetIconUrlParams, SyncParams, admin, lookup, mutate,
};

use favdb_core::IconDatabase;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The main MCP server handler for the icon database.
#[derive(Clone)]
pub struct IconDatabaseServer {
    db: Arc<IconDatabase>,
    tool_router: ToolRouter<Self>,
}

/// Run a tool that may wait on the sync thread off the async runtime.
async fn blocking<F>(f: F) -> Result<CallToolResult, McpError>
where
    F: FnOnce() -> Result<CallToolResult, McpError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BridgeError::Internal(format!("blocking task failed: {e}")))?
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl IconDatabaseServer {
    /// Create a new server handler around an icon database.
    pub fn new(db: Arc<IconDatabase>) -> Self {
        Self { db, tool_router: Self::tool_router() }
    }

    #[tool(description = "Get the icon for a page at a size. Returns hex bytes, or no data while the icon is still being read from disk.")]
    async fn icon_for_page(&self, params: Parameters<IconForPageParams>) -> Result<CallToolResult, McpError> {
        lookup::icon_for_page_impl(&self.db, params.0)
    }

    #[tool(description = "Get the icon address bound to a page.")]
    async fn icon_url_for_page(&self, params: Parameters<IconUrlForPageParams>) -> Result<CallToolResult, McpError> {
        lookup::icon_url_for_page_impl(&self.db, params.0)
    }

    #[tool(description = "Check whether an icon's bytes (or their absence) are known in memory.")]
    async fn icon_data_known(&self, params: Parameters<IconDataKnownParams>) -> Result<CallToolResult, McpError> {
        lookup::icon_data_known_impl(&self.db, params.0)
    }

    #[tool(description = "Decide whether an icon should be fetched: yes, no, or unknown until the import finishes.")]
    async fn icon_load_decision(&self, params: Parameters<LoadDecisionParams>) -> Result<CallToolResult, McpError> {
        lookup::load_decision_impl(&self.db, params.0)
    }

    #[tool(description = "Bind a page address to an icon address.")]
    async fn icon_set_url(&self, params: Parameters<SetIconUrlParams>) -> Result<CallToolResult, McpError> {
        mutate::set_icon_url_impl(&self.db, params.0)
    }

    #[tool(description = "Set the bytes (hex-encoded) for an icon address.")]
    async fn icon_set_data(&self, params: Parameters<SetIconDataParams>) -> Result<CallToolResult, McpError> {
        mutate::set_icon_data_impl(&self.db, params.0)
    }

    #[tool(description = "Record that an icon address is known to have no icon.")]
    async fn icon_set_missing(&self, params: Parameters<IconUrlParams>) -> Result<CallToolResult, McpError> {
        mutate::set_missing_impl(&self.db, params.0)
    }

    #[tool(description = "Retain a page's icon so it is kept across sessions.")]
    async fn icon_retain(&self, params: Parameters<PageParams>) -> Result<CallToolResult, McpError> {
        mutate::retain_impl(&self.db, params.0)
    }

    #[tool(description = "Release one retain of a page's icon.")]
    async fn icon_release(&self, params: Parameters<PageParams>) -> Result<CallToolResult, McpError> {
        mutate::release_impl(&self.db, params.0)
    }

    #[tool(description = "Enable or disable private browsing. While enabled, changes are not written to disk.")]
    async fn icon_private_browsing(
        &self, params: Parameters<PrivateBrowsingParams>,
    ) -> Result<CallToolResult, McpError> {
        admin::private_browsing_impl(&self.db, params.0)
    }

    #[tool(description = "Forget every icon and wipe the store.")]
    async fn icon_remove_all(&self) -> Result<CallToolResult, McpError> {
        admin::remove_all_impl(&self.db)
    }

    #[tool(description = "Report in-memory counts and sync thread state.")]
    async fn icon_stats(&self) -> Result<CallToolResult, McpError> {
        admin::stats_impl(&self.db)
    }

    #[tool(description = "Run a sync cycle now and wait for it to finish.")]
    async fn icon_sync(&self, params: Parameters<SyncParams>) -> Result<CallToolResult, McpError> {
        let db = Arc::clone(&self.db);
        blocking(move || admin::sync_impl(&db, params.0)).await
    }

    #[tool(description = "Open the icon database in a directory (defaults to the configured one).")]
    async fn icon_database_open(&self, params: Parameters<OpenParams>) -> Result<CallToolResult, McpError> {
        admin::open_impl(&self.db, params.0)
    }

    #[tool(description = "Flush pending changes and close the icon database.")]
    async fn icon_database_close(&self) -> Result<CallToolResult, McpError> {
        let db = Arc::clone(&self.db);
        blocking(move || admin::close_impl(&db)).await
    }
}

impl ServerHandler for IconDatabaseServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "favdb".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
