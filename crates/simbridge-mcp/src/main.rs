//! Simbridge MCP Server
//!
//! Serves the tools over stdio. Point it at the same mailbox directory the
//! controller publishes to.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use rmcp::ServiceExt;
use simbridge::{DEFAULT_DATA_DIR, Mailbox, Reader, ReaderConfig};
use simbridge_mcp::SimBridgeServer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "simbridge-mcp", version, about = "MCP server for a simulation mailbox")]
struct Args {
    /// Mailbox directory shared with the controller
    #[arg(long, env = "SIMBRIDGE_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Snapshots older than this are reported as stale
    #[arg(long, env = "SIMBRIDGE_STALE_AFTER_MS", default_value_t = 5000)]
    stale_after_ms: u64,

    /// How long take_screenshot waits for the file
    #[arg(long, env = "SIMBRIDGE_SCREENSHOT_TIMEOUT_MS", default_value_t = 3000)]
    screenshot_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing - output to stderr so it doesn't interfere with MCP stdio
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    tracing::info!(data_dir = %args.data_dir.display(), "Starting Simbridge MCP server");

    let mailbox = Mailbox::open(&args.data_dir)?;
    let config = ReaderConfig {
        stale_after: Duration::from_millis(args.stale_after_ms),
        screenshot_timeout: Duration::from_millis(args.screenshot_timeout_ms),
        ..ReaderConfig::default()
    };
    let server = SimBridgeServer::new(Reader::new(mailbox, config));

    // Serve over stdio
    let service = server
        .serve(rmcp::transport::stdio())
        .await
        .inspect_err(|e| {
            tracing::error!("Failed to start MCP service: {}", e);
        })?;

    tracing::info!("Simbridge MCP server running");

    service.waiting().await?;

    tracing::info!("Simbridge MCP server shutting down");

    Ok(())
}
