use alloy::transports::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error("Log producer task failed: {0}")]
    Producer(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Fatal conditions of the interface resolution step.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Block explorer API key is not set")]
    MissingApiKey,
    #[error("Contract address is not set")]
    MissingAddress,
    #[error("Invalid contract address '{0}'")]
    InvalidAddress(String),
}

#[derive(Error, Debug)]
pub enum ExplorerError {
    #[error("Block explorer request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Block explorer returned an error: {message} ({result})")]
    Api { message: String, result: String },
    #[error("Malformed block explorer payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Unexpected block explorer result: {0}")]
    UnexpectedResult(String),
}

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Failed to connect to node: {0}")]
    Connect(#[source] TransportError),
    #[error("Log range query failed: {0}")]
    Query(#[source] TransportError),
    #[error("Log subscription setup failed: {0}")]
    Subscribe(#[source] TransportError),
}

/// Errors surfaced by a running log subscription. Only `Closed` ends the stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("Subscription lagged behind, {0} logs were dropped by the node client")]
    Lagged(u64),
    #[error("Live log subscription closed by the node")]
    Closed,
    #[error("Subscription error: {0}")]
    Transport(String),
}

/// Reasons a raw log produces no decoded event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log has no topics")]
    NoTopics,
    #[error("unknown event signature {0}")]
    UnknownSignature(alloy_primitives::B256),
    #[error("event {0} is not requested")]
    NotRequested(String),
    #[error("log is missing {0}")]
    MissingMetadata(&'static str),
    #[error("no topic for indexed parameter {0}")]
    MissingTopic(String),
    #[error("unsupported type '{ty}' for parameter {name}")]
    UnsupportedType { name: String, ty: String },
    #[error("failed to decode log data: {0}")]
    Data(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Postgres database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("Failed to check out a database connection: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error("Failed to create the database pool: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),
    #[error("Block number {0} does not fit the blockNumber column")]
    BlockNumberOverflow(u64),
    #[error("Failed to read schema file: {0}")]
    Schema(#[from] std::io::Error),
}

pub type IndexerResult<T> = Result<T, IndexerError>;
