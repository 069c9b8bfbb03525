use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use slackbridge_core::{
    connector::SearchScope,
    mcp_server::{JsonRpcHandler, McpServer},
    transport::StdioTransport,
    RequestStats, SlackConfig, SlackConnector, SlackGateway,
};

const DEFAULT_LOG_FILTER: &str = "slackbridge_core=info,slackbridge_mcp=info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Slackbridge MCP Server");

    let config = match SlackConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    info!(
        team_id = config.team_id.as_deref().unwrap_or("-"),
        channel_count = config.channel_ids.len(),
        api_base = %config.api_base,
        "Configuration loaded"
    );

    let stats = Arc::new(RequestStats::new());
    let gateway = SlackGateway::from_config(&config, Arc::clone(&stats))?;
    let connector = SlackConnector::new(
        Arc::new(gateway),
        Arc::clone(&stats),
        SearchScope::from(&config),
    );

    let server = McpServer::new(Arc::new(connector));
    let handler = JsonRpcHandler::new(server);
    let transport = StdioTransport::new(handler);

    info!("MCP Server ready, listening on stdio");

    let outcome = tokio::select! {
        res = transport.run() => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
            Ok(())
        }
    };

    let snapshot = stats.snapshot();
    info!(
        event = "shutdown_stats",
        total_requests = snapshot.total_requests,
        success_rate = snapshot.success_rate,
        average_latency_ms = snapshot.average_latency_ms,
        p50_ms = snapshot.latency_percentiles.p50,
        p99_ms = snapshot.latency_percentiles.p99,
        rate_limit_events = snapshot.rate_limit_events,
        pagination_events = snapshot.pagination_events,
        "Final request statistics"
    );

    if let Err(e) = outcome {
        error!(error = %e, "Transport error");
        return Err(e.into());
    }

    Ok(())
}
