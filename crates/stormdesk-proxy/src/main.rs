use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use stormdesk_client::ChatSession;
use stormdesk_proxy::{app, session_slot};

/// Expose a stormdesk chat session over HTTP.
#[derive(Parser)]
#[command(name = "stormdesk-proxy", version, about)]
struct Cli {
    /// Path to the tool server script (.py or .js)
    server_script: String,

    /// Port to listen on
    #[arg(long, default_value_t = 4000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Cli {
        server_script,
        port,
    } = Cli::parse();

    let sessions = session_slot();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "listening for prompts");

    // Accept traffic right away; the endpoint answers 503 until the session
    // lands. A failed connect only logs and leaves the slot empty.
    let slot = sessions.clone();
    tokio::spawn(async move {
        match ChatSession::connect(&server_script).await {
            Ok(session) => {
                slot.write().await.replace(session);
                tracing::info!("chat session ready");
            }
            Err(error) => tracing::error!(%error, "failed to start the chat session"),
        }
    });

    axum::serve(listener, app(sessions)).await?;
    Ok(())
}
