// src/main.rs
// RepoLens backend entry point

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use repolens::{AppState, CONFIG};

#[derive(Parser, Debug)]
#[command(name = "repolens", about = "AI-powered code analysis assistant for local Git repositories")]
struct Args {
    /// Bind host (overrides REPOLENS_HOST)
    #[arg(long, env = "REPOLENS_HOST")]
    host: Option<String>,

    /// Bind port (overrides REPOLENS_PORT)
    #[arg(long, env = "REPOLENS_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let addr = CONFIG.bind_addr(args.host, args.port);

    let state = AppState::new(CONFIG.mcp_servers_config_path.clone());

    // Start enabled MCP servers and register their tools before serving
    state.initialize_mcp().await;

    let app = repolens::api::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("[APP] repolens listening on {}", addr);

    axum::serve(listener, app).await?;

    state.mcp_manager.stop_all_servers().await;
    Ok(())
}
