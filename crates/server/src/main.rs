//! favdb MCP bridge entry point.
//!
//! This is the main binary that opens the icon database and serves it over
//! the MCP stdio transport. Logging goes to stderr to avoid interfering with
//! the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use favdb_core::{IconDatabase, IconDatabaseConfig};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = IconDatabaseConfig::load()?;
    let directory = config.database_dir.clone();
    let db = Arc::new(IconDatabase::new(config));
    if !db.open(&directory) {
        anyhow::bail!("failed to open icon database in {}", directory.display());
    }

    tracing::info!(path = %directory.display(), "Starting favdb server on stdio transport");

    let handler = handler::IconDatabaseServer::new(Arc::clone(&db));
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    tokio::task::spawn_blocking(move || db.close()).await?;

    Ok(())
}
