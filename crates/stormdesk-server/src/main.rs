use std::sync::Arc;

use anyhow::Result;
use stormdesk_server::{
    tools::{AlertsTool, ForecastTool, IncidentTool, NwsClient},
    ByteTransport, RouterService, Server, ToolRouter,
};
use tokio::io::{stdin, stdout};
use tracing_subscriber::EnvFilter;

const INSTRUCTIONS: &str = "Looks up National Weather Service alerts and \
forecasts for US locations, and opens incidents in ServiceNow.";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // stdout carries JSON-RPC frames, so diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("starting stormdesk tool server");

    let nws = NwsClient::new();
    let router = ToolRouter::new("stormdesk", INSTRUCTIONS)
        .with_tool(Arc::new(AlertsTool::new(nws.clone())))?
        .with_tool(Arc::new(ForecastTool::new(nws)))?
        .with_tool(Arc::new(IncidentTool::new()))?;

    let server = Server::new(RouterService(router));
    let transport = ByteTransport::new(stdin(), stdout());

    Ok(server.run(transport).await?)
}
