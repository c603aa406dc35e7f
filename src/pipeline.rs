use std::sync::Arc;

use futures::future::OptionFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::abi::ContractInterface;
use crate::db::EventSink;
use crate::error::{IndexerError, IndexerResult, SubscriptionError};
use crate::event_decoder;
use crate::subscriptions::MergedLogs;
use crate::types::{EventFilter, RawLog};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub received: u64,
    pub decoded: u64,
    pub discarded: u64,
    pub subscription_errors: u64,
}

/// Drives decoded events from the merged log queue into the sink until cancelled.
pub struct Pipeline {
    interface: Arc<ContractInterface>,
    wanted: EventFilter,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        interface: Arc<ContractInterface>,
        wanted: EventFilter,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            interface,
            wanted,
            sink,
            cancel,
        }
    }

    /// Returns `Ok` only once cancelled. A failed historical scan or a closed live subscription
    /// is returned as an error.
    pub async fn run(self, merged: MergedLogs) -> IndexerResult<PipelineStats> {
        let MergedLogs {
            mut logs,
            mut errors,
            historical,
            live,
        } = merged;

        let mut historical = Some(historical);
        let mut errors_open = true;
        let mut stats = PipelineStats::default();

        let outcome = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Shutdown requested, stopping pipeline");
                    break Ok(());
                }

                maybe_err = errors.recv(), if errors_open => match maybe_err {
                    Some(SubscriptionError::Closed) => {
                        error!("Live log subscription closed, node connection lost");
                        break Err(IndexerError::from(SubscriptionError::Closed));
                    }
                    Some(e) => {
                        stats.subscription_errors += 1;
                        warn!("Live subscription error: {}", e);
                    }
                    None => errors_open = false,
                },

                Some(joined) = OptionFuture::from(historical.as_mut()), if historical.is_some() => {
                    historical = None;
                    match joined {
                        Ok(Ok(count)) => info!("Historical producer finished after {} logs", count),
                        Ok(Err(e)) => {
                            error!("Historical log query failed: {}", e);
                            break Err(IndexerError::from(e));
                        }
                        Err(e) => break Err(IndexerError::Producer(e)),
                    }
                }

                maybe_log = logs.recv() => match maybe_log {
                    Some(log) => self.handle(log, &mut stats),
                    None => {
                        error!("All log producers ended without a shutdown request");
                        break Err(IndexerError::from(SubscriptionError::Closed));
                    }
                },
            }
        };

        live.abort();
        if let Some(handle) = historical {
            handle.abort();
        }

        info!(
            "Pipeline stopped: received={} decoded={} discarded={} subscription_errors={}",
            stats.received, stats.decoded, stats.discarded, stats.subscription_errors
        );
        outcome.map(|_| stats)
    }

    fn handle(&self, log: RawLog, stats: &mut PipelineStats) {
        stats.received += 1;
        match event_decoder::decode(&log, &self.wanted, &self.interface) {
            Some(event) => {
                stats.decoded += 1;
                debug!("Decoded {} at block {}", event.name, event.block_number);
                self.sink.dispatch(event);
            }
            None => stats.discarded += 1,
        }
    }
}
