use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use llm_gateway::client::OpenAiClient;
use llm_gateway::config::GatewayConfig;
use llm_gateway::gateway::Gateway;
use llm_gateway::handler::{AppState, router};
use llm_gateway::provider::Provider;
use llm_gateway::store::{ConversationStore, MemoryStore};

#[derive(Debug, Parser)]
#[command(name = "llm-gateway", about = "Chat-completion gateway")]
struct Args {
    /// Path to a TOML config file; falls back to environment variables.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen address from config.
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::from_env()?,
    };
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    config.validate()?;

    info!(
        listen = %config.server.listen_addr,
        default_provider = %config.providers.default,
        history = config.server.history_enabled,
        "Starting gateway"
    );

    let openai: Arc<dyn Provider> = Arc::new(OpenAiClient::new(config.providers.openai.clone())?);
    let store: Option<Arc<dyn ConversationStore>> = config
        .server
        .history_enabled
        .then(|| Arc::new(MemoryStore::new()) as Arc<dyn ConversationStore>);

    let gateway = Gateway::new(&config, vec![("openai".to_string(), openai)], store)?;
    let app = router(Arc::new(AppState { gateway }));

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen_addr))?;

    info!("Gateway ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
