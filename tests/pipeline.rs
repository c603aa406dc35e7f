//! Integration tests for the log merger and pipeline loop against an in-memory node

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::rpc::types::Filter;
use alloy::transports::TransportErrorKind;
use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{sol, SolEvent};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use contract_events_indexer::abi::ContractInterface;
use contract_events_indexer::db::EventSink;
use contract_events_indexer::error::{IndexerError, NodeError, SubscriptionError};
use contract_events_indexer::pipeline::{Pipeline, PipelineStats};
use contract_events_indexer::subscriptions::{merge, LogQuery, LogStream, NodeClient};
use contract_events_indexer::types::{DecodedEvent, EventFilter, FieldValue, RawLog};

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
    event Approval(address indexed owner, address indexed spender, uint256 value);
}

const ABI: &str = r#"[
    {"type":"event","name":"Transfer","inputs":[
        {"name":"from","type":"address","indexed":true},
        {"name":"to","type":"address","indexed":true},
        {"name":"value","type":"uint256","indexed":false}
    ]},
    {"type":"event","name":"Approval","inputs":[
        {"name":"owner","type":"address","indexed":true},
        {"name":"spender","type":"address","indexed":true},
        {"name":"value","type":"uint256","indexed":false}
    ]}
]"#;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn contract() -> Address {
    Address::from_str("0x1111111111111111111111111111111111111111").unwrap()
}

fn interface() -> Arc<ContractInterface> {
    Arc::new(ContractInterface::from_abi_json(contract(), contract(), ABI).unwrap())
}

fn transfer_log(value: u64) -> RawLog {
    let event = Transfer {
        from: Address::repeat_byte(0x0a),
        to: Address::repeat_byte(0x0b),
        value: U256::from(value),
    };
    RawLog {
        inner: alloy_primitives::Log {
            address: contract(),
            data: event.encode_log_data(),
        },
        block_number: Some(100),
        transaction_hash: Some(B256::repeat_byte(0xab)),
        ..Default::default()
    }
}

fn approval_log() -> RawLog {
    let event = Approval {
        owner: Address::repeat_byte(0x0a),
        spender: Address::repeat_byte(0x0b),
        value: U256::from(1),
    };
    RawLog {
        inner: alloy_primitives::Log {
            address: contract(),
            data: event.encode_log_data(),
        },
        block_number: Some(101),
        transaction_hash: Some(B256::repeat_byte(0xcd)),
        ..Default::default()
    }
}

#[derive(Default)]
struct FakeNode {
    historical: Vec<RawLog>,
    live: Vec<Result<RawLog, SubscriptionError>>,
    /// Keep the live stream open after the scripted items.
    live_open: bool,
    fail_query: bool,
    fail_subscribe: bool,
}

#[async_trait]
impl NodeClient for FakeNode {
    async fn fetch_logs(&self, _filter: &Filter) -> Result<Vec<RawLog>, NodeError> {
        if self.fail_query {
            return Err(NodeError::Query(TransportErrorKind::custom_str("range query rejected")));
        }
        Ok(self.historical.clone())
    }

    async fn subscribe_logs(&self, _filter: &Filter) -> Result<LogStream, NodeError> {
        if self.fail_subscribe {
            return Err(NodeError::Subscribe(TransportErrorKind::custom_str("subscriptions unsupported")));
        }
        let items = stream::iter(self.live.clone());
        if self.live_open {
            Ok(items.chain(stream::pending()).boxed())
        } else {
            Ok(items.boxed())
        }
    }
}

/// Records dispatched events and requests shutdown once `stop_after` have arrived.
struct RecordingSink {
    events: Mutex<Vec<DecodedEvent>>,
    stop_after: usize,
    cancel: CancellationToken,
}

impl RecordingSink {
    fn new(stop_after: usize, cancel: CancellationToken) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            stop_after,
            cancel,
        }
    }

    fn events(&self) -> Vec<DecodedEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn dispatch(&self, event: DecodedEvent) {
        let mut events = self.events.lock().unwrap();
        events.push(event);
        if events.len() >= self.stop_after {
            self.cancel.cancel();
        }
    }
}

fn query() -> LogQuery {
    LogQuery {
        address: contract(),
        signatures: interface().selectors_for(&EventFilter::new(["Transfer"])),
        from_block: None,
        to_block: None,
    }
}

async fn run_pipeline(
    node: FakeNode,
    wanted: EventFilter,
    stop_after: usize,
    cancel: CancellationToken,
) -> (Result<PipelineStats, IndexerError>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new(stop_after, cancel.clone()));
    let merged = merge(Arc::new(node), &query(), 8).await.unwrap();
    let pipeline = Pipeline::new(interface(), wanted, sink.clone(), cancel);

    let result = tokio::time::timeout(TEST_TIMEOUT, pipeline.run(merged))
        .await
        .expect("pipeline did not stop");
    (result, sink)
}

#[tokio::test]
async fn test_overlapping_sources_deliver_identical_events() {
    let node = FakeNode {
        historical: vec![transfer_log(1000)],
        live: vec![Ok(transfer_log(1000))],
        live_open: true,
        ..Default::default()
    };

    let (result, sink) = run_pipeline(node, EventFilter::new(["Transfer"]), 2, CancellationToken::new()).await;
    let stats = result.unwrap();

    assert_eq!(stats.received, 2);
    assert_eq!(stats.decoded, 2);
    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], events[1]);

    // Rows are keyed on (transactionHash, contractAddress, from, to, value).
    let rows: HashSet<String> = events
        .iter()
        .map(|e| {
            format!(
                "{:#x}/{}/{}/{}/{}",
                e.transaction_hash,
                e.contract_address,
                e.field("from").unwrap(),
                e.field("to").unwrap(),
                e.field("value").unwrap()
            )
        })
        .collect();
    assert_eq!(rows.len(), 1);

    let event = &events[0];
    assert_eq!(event.name, "Transfer");
    assert_eq!(event.block_number, 100);
    assert_eq!(event.contract_address, contract());
    assert_eq!(event.field("value"), Some(&FieldValue::Int(1000.into())));
}

#[tokio::test]
async fn test_unrequested_events_are_discarded() {
    let node = FakeNode {
        live: vec![Ok(approval_log()), Ok(transfer_log(7))],
        live_open: true,
        ..Default::default()
    };

    let (result, sink) = run_pipeline(node, EventFilter::new(["Transfer"]), 1, CancellationToken::new()).await;
    let stats = result.unwrap();

    assert_eq!(stats.received, 2);
    assert_eq!(stats.decoded, 1);
    assert_eq!(stats.discarded, 1);
    assert!(sink.events().iter().all(|e| e.name == "Transfer"));
}

#[tokio::test]
async fn test_subscription_error_does_not_stop_pipeline() {
    let node = FakeNode {
        live: vec![Err(SubscriptionError::Lagged(3)), Ok(transfer_log(5))],
        live_open: true,
        ..Default::default()
    };

    let (result, sink) = run_pipeline(node, EventFilter::new(["Transfer"]), 1, CancellationToken::new()).await;
    let stats = result.unwrap();

    assert_eq!(stats.subscription_errors, 1);
    assert_eq!(stats.decoded, 1);
    assert_eq!(sink.events().len(), 1);
}

#[tokio::test]
async fn test_cancellation_stops_open_pipeline() {
    let node = FakeNode {
        live_open: true,
        ..Default::default()
    };
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let (result, sink) = run_pipeline(node, EventFilter::new(["Transfer"]), usize::MAX, cancel).await;

    assert_eq!(result.unwrap(), PipelineStats::default());
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_subscription_setup_failure_is_fatal() {
    let node = FakeNode {
        fail_subscribe: true,
        ..Default::default()
    };

    let result = merge(Arc::new(node), &query(), 8).await;
    assert!(matches!(result, Err(NodeError::Subscribe(_))));
}

#[tokio::test]
async fn test_historical_query_failure_is_fatal() {
    let node = FakeNode {
        live_open: true,
        fail_query: true,
        ..Default::default()
    };

    let (result, _sink) = run_pipeline(node, EventFilter::new(["Transfer"]), usize::MAX, CancellationToken::new()).await;

    assert!(matches!(result, Err(IndexerError::Node(NodeError::Query(_)))));
}

#[tokio::test]
async fn test_closed_live_subscription_is_fatal() {
    let node = FakeNode {
        live: vec![Ok(transfer_log(1))],
        ..Default::default()
    };
    let cancel = CancellationToken::new();

    let (result, _sink) = run_pipeline(node, EventFilter::new(["Transfer"]), usize::MAX, cancel.clone()).await;

    assert!(matches!(
        result,
        Err(IndexerError::Subscription(SubscriptionError::Closed))
    ));
    assert!(!cancel.is_cancelled());
}
