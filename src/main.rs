//! Binary entry point: wire config, similarity backend, graph, engine,
//! and the control-plane server together.

use anyhow::Context;
use clap::Parser;
use counsel::adapters::build_adapters;
use counsel::config::Config;
use counsel::engine::DeliberationEngine;
use counsel::graph::DecisionGraph;
use counsel::server::{ServerState, start_server};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ai-counsel", version, about = "Multi-model AI deliberation engine")]
struct Cli {
    /// Configuration file (YAML or TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Decision graph database path (overrides config)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Log filter (overrides the LOG_LEVEL environment variable)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(db) = cli.db {
        config.decision_graph.db_path = Some(db);
    }

    let backend = counsel::similarity::select_backend();

    let graph = if config.decision_graph.enabled {
        let graph = DecisionGraph::open(
            config.decision_graph.clone(),
            &config.graph_db_path(),
            Arc::clone(&backend),
        )
        .await
        .context("opening decision graph")?;
        Some(Arc::new(graph))
    } else {
        tracing::info!("Decision graph disabled");
        None
    };

    let adapters = build_adapters(&config);
    if adapters.is_empty() {
        tracing::warn!("No adapters configured — deliberate calls will be rejected");
    }

    let engine = Arc::new(DeliberationEngine::new(
        config.clone(),
        adapters,
        backend,
        graph.clone(),
    ));

    let state = ServerState {
        engine,
        graph,
        config: Arc::new(config.clone()),
    };

    start_server(&config.server, state).await
}
