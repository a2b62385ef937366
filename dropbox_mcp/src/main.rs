use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dropbox_mcp_core::{
    mcp_server::{JsonRpcHandler, McpServer},
    transport::StdioTransport,
    DropboxConnector, ServerConfig,
};

/// MCP server for Dropbox integration, speaking JSON-RPC over stdio.
#[derive(Parser, Debug)]
#[command(
    name = "dropbox-mcp-server",
    disable_version_flag = true,
    after_help = "Credentials are stored in ~/.dropbox-mcp/config.json (override with DROPBOX_MCP_CONFIG).\nLogs go to stderr; set RUST_LOG to adjust verbosity."
)]
struct Cli {
    /// Show version information
    #[arg(long)]
    version: bool,

    /// Dropbox app client id used by dropbox_auth when the call omits it
    #[arg(long, env = "DROPBOX_CLIENT_ID", hide_env_values = true)]
    client_id: Option<String>,

    /// Dropbox app client secret used by dropbox_auth when the call omits it
    #[arg(long, env = "DROPBOX_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    if cli.version {
        println!("dropbox-mcp-server version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Dropbox MCP server");

    let config = ServerConfig::from_env().with_client(
        cli.client_id.filter(|s| !s.is_empty()),
        cli.client_secret.filter(|s| !s.is_empty()),
    );
    info!(path = %config.credential_path.display(), "using credential file");

    let connector = match DropboxConnector::from_config(config) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to initialize: {}", e);
            return Err(e.into());
        }
    };

    let server = McpServer::new(Box::new(connector));
    let handler = JsonRpcHandler::new(server);
    let transport = StdioTransport::new(handler);

    info!("MCP server ready, listening on stdio");

    tokio::select! {
        res = transport.run() => {
            if let Err(e) = res {
                error!("Transport error: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }

    Ok(())
}
