pub mod abi;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod event_decoder;
pub mod explorer;
pub mod pipeline;
pub mod subscriptions;
pub mod types;

pub use error::{IndexerError, IndexerResult};
