use std::sync::Arc;

use alloy::eips::BlockNumberOrTag;
use alloy::rpc::types::Filter;
use alloy_primitives::{Address, B256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_transport_ws::WsConnect;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{NodeError, SubscriptionError};
use crate::types::RawLog;

/// Capacity of the queue between the log producers and the pipeline.
pub const DEFAULT_LOG_BUFFER: usize = 256;
const SUBSCRIPTION_ERROR_BUFFER: usize = 16;

pub type LogStream = BoxStream<'static, Result<RawLog, SubscriptionError>>;

/// Node operations the log producers depend on.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn fetch_logs(&self, filter: &Filter) -> Result<Vec<RawLog>, NodeError>;

    async fn subscribe_logs(&self, filter: &Filter) -> Result<LogStream, NodeError>;
}

/// Node client over a WebSocket RPC endpoint.
#[derive(Clone)]
pub struct RpcNode {
    provider: DynProvider,
}

impl RpcNode {
    pub async fn connect(ws_url: &str) -> Result<Self, NodeError> {
        info!("Connecting to node at {}", ws_url);
        let provider = ProviderBuilder::new()
            .connect_ws(WsConnect::new(ws_url))
            .await
            .map_err(NodeError::Connect)?;

        Ok(Self {
            provider: provider.erased(),
        })
    }
}

#[async_trait]
impl NodeClient for RpcNode {
    async fn fetch_logs(&self, filter: &Filter) -> Result<Vec<RawLog>, NodeError> {
        self.provider.get_logs(filter).await.map_err(NodeError::Query)
    }

    async fn subscribe_logs(&self, filter: &Filter) -> Result<LogStream, NodeError> {
        let sub = self
            .provider
            .subscribe_logs(filter)
            .await
            .map_err(NodeError::Subscribe)?;

        let logs = stream::unfold(sub, |mut sub| async move {
            match sub.recv().await {
                Ok(log) => Some((Ok(log), sub)),
                Err(RecvError::Lagged(skipped)) => Some((Err(SubscriptionError::Lagged(skipped)), sub)),
                Err(RecvError::Closed) => None,
            }
        });

        Ok(logs.boxed())
    }
}

/// Contract and block range the producers query.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub address: Address,
    /// Known signature identifiers of the requested events. Empty means no topic filter.
    pub signatures: Vec<B256>,
    /// `None` means the earliest block.
    pub from_block: Option<u64>,
    /// `None` means the latest block.
    pub to_block: Option<u64>,
}

impl LogQuery {
    pub fn historical_filter(&self) -> Filter {
        let from_block = self.from_block.map_or(BlockNumberOrTag::Earliest, BlockNumberOrTag::Number);
        let to_block = self.to_block.map_or(BlockNumberOrTag::Latest, BlockNumberOrTag::Number);

        let filter = Filter::new()
            .address(self.address)
            .from_block(from_block)
            .to_block(to_block);

        if self.signatures.is_empty() {
            filter
        } else {
            filter.event_signature(self.signatures.clone())
        }
    }

    /// Live feed is filtered by address only, topic filtering happens in the decoder.
    pub fn live_filter(&self) -> Filter {
        Filter::new().address(self.address)
    }
}

/// Receiving side of the merged historical and live log producers.
///
/// The live producer never ends on its own: a closed subscription is reported as
/// [`SubscriptionError::Closed`] on `errors`.
pub struct MergedLogs {
    pub logs: mpsc::Receiver<RawLog>,
    pub errors: mpsc::Receiver<SubscriptionError>,
    /// Resolves with the number of historical logs enqueued, or the fatal query error.
    pub historical: JoinHandle<Result<usize, NodeError>>,
    pub live: JoinHandle<()>,
}

/// Start the historical and live producers feeding one bounded queue.
///
/// The live subscription is opened before the historical query is issued, so the two sources
/// overlap instead of leaving a gap. Nothing orders entries across the two producers.
pub async fn merge(node: Arc<dyn NodeClient>, query: &LogQuery, capacity: usize) -> Result<MergedLogs, NodeError> {
    let (log_tx, log_rx) = mpsc::channel(capacity.max(1));
    let (err_tx, err_rx) = mpsc::channel(SUBSCRIPTION_ERROR_BUFFER);

    let live_stream = node.subscribe_logs(&query.live_filter()).await?;
    info!("Subscribed to logs of contract {}", query.address);

    let live = tokio::spawn(forward_live(live_stream, log_tx.clone(), err_tx));

    let filter = query.historical_filter();
    let historical = tokio::spawn(async move {
        let logs = node.fetch_logs(&filter).await?;
        let count = logs.len();
        info!("Historical scan returned {} logs", count);

        for log in logs {
            if log_tx.send(log).await.is_err() {
                debug!("Log queue closed, stopping historical producer");
                break;
            }
        }
        Ok(count)
    });

    Ok(MergedLogs {
        logs: log_rx,
        errors: err_rx,
        historical,
        live,
    })
}

async fn forward_live(
    mut stream: LogStream,
    log_tx: mpsc::Sender<RawLog>,
    err_tx: mpsc::Sender<SubscriptionError>,
) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(log) => {
                if log_tx.send(log).await.is_err() {
                    debug!("Log queue closed, stopping live producer");
                    return;
                }
            }
            Err(e) => {
                if err_tx.send(e).await.is_err() {
                    return;
                }
            }
        }
    }
    warn!("Live log subscription ended");
    // Reported before `log_tx` drops, so the pipeline sees the cause ahead of the closed queue.
    let _ = err_tx.send(SubscriptionError::Closed).await;
}
