use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use stormdesk_client::session::{ChatSession, SessionError};

/// Chat with a model that can call tools on a stormdesk tool server.
#[derive(Parser)]
#[command(name = "stormdesk", version, about)]
struct Cli {
    /// Path to the tool server script (.py or .js)
    server_script: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // stdout belongs to the conversation; diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let session = match ChatSession::connect(&cli.server_script).await {
        Ok(session) => session,
        Err(SessionError::MissingApiKey) => {
            println!("ANTHROPIC_API_KEY missing. Exiting.");
            return Ok(());
        }
        Err(error) => {
            tracing::error!(%error, "failed to connect to the tool server");
            std::process::exit(1);
        }
    };

    if let Err(error) = session.chat_loop().await {
        tracing::error!(%error, "chat session failed");
        std::process::exit(1);
    }

    Ok(())
}
