use std::io::BufRead;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use contract_events_indexer::abi::InterfaceResolver;
use contract_events_indexer::cli::Cli;
use contract_events_indexer::config::Config;
use contract_events_indexer::db::{Database, EventWriter};
use contract_events_indexer::explorer::ExplorerClient;
use contract_events_indexer::pipeline::Pipeline;
use contract_events_indexer::subscriptions::{self, LogQuery, NodeClient, RpcNode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = cli.apply_overrides(Config::load(cli.config.as_deref())?)?;

    // logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.service.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();

    let wanted = cli.event_filter();
    info!("Indexing events {:?} of contract {}", cli.events, cfg.query.address);

    // interface
    let explorer = ExplorerClient::new(&cfg.explorer.api_url, cfg.explorer.request_timeout_seconds)?;
    let interface = InterfaceResolver::new(explorer)
        .resolve(&cfg.query.address, &cfg.explorer.api_key)
        .await?;
    for name in wanted.names() {
        if !interface.events().any(|e| e.name == name) {
            warn!("Event {} is not declared in the contract ABI", name);
        }
    }

    // store
    let db = Database::connect(&cfg.database)
        .await
        .context("Failed to connect to PostgreSQL")?;
    if let Some(path) = &cfg.database.schema_path {
        db.apply_schema_file(path).await?;
    }
    let writer = Arc::new(EventWriter::new(Arc::new(db)));

    // node
    let node: Arc<dyn NodeClient> = Arc::new(RpcNode::connect(&cfg.node.ws_url).await?);
    let (from_block, to_block) = cfg.block_range();
    let query = LogQuery {
        address: interface.contract,
        signatures: interface.selectors_for(&wanted),
        from_block,
        to_block,
    };
    let merged = subscriptions::merge(node, &query, cfg.service.log_buffer).await?;

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let stats = Pipeline::new(Arc::new(interface), wanted, writer, cancel)
        .run(merged)
        .await?;
    info!("Indexer stopped after decoding {} events", stats.decoded);

    Ok(())
}

/// Cancel on Ctrl-C or when `stop` is typed on stdin.
fn spawn_shutdown_listener(cancel: CancellationToken) {
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
            on_signal.cancel();
        }
    });

    // tokio stdin reads cannot be cancelled and would stall runtime shutdown.
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim() == "stop" => {
                    info!("Received stop command");
                    cancel.cancel();
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });
}
