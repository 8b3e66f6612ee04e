/// gridflow: workflow orchestration service
///
/// Main entry point. Loads configuration from the environment and starts the
/// HTTP server with workflow management, execution and scheduling.

use gridflow::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Workflow management at /workflows/*
/// - Execution history at /executions/*
/// - Scheduler control at /scheduler/*
/// - Webhook triggers at /webhooks/{workflow_id}
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults to 0.0.0.0:3004 and a local SQLite file)
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
