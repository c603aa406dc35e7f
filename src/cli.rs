//! CLI argument parsing

use clap::Parser;

use crate::config::Config;
use crate::error::ConfigError;
use crate::types::EventFilter;

#[derive(Parser, Debug)]
#[command(name = "contract-events-indexer")]
#[command(about = "Indexes selected smart contract events into PostgreSQL", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Event names to index, as declared in the contract ABI (case sensitive)
    #[arg(required = true, num_args = 1..)]
    pub events: Vec<String>,

    /// Contract address, overrides query.address
    #[arg(short, long)]
    pub address: Option<String>,

    /// First block of the historical scan, overrides query.from_block
    #[arg(long)]
    pub from: Option<u64>,

    /// Last block of the historical scan, overrides query.to_block
    #[arg(long)]
    pub to: Option<u64>,

    /// Path to the configuration file
    #[arg(short, long)]
    pub config: Option<String>,
}

impl Cli {
    pub fn event_filter(&self) -> EventFilter {
        EventFilter::new(self.events.iter().cloned())
    }

    /// Apply the query overrides and validate the merged settings.
    pub fn apply_overrides(&self, mut config: Config) -> Result<Config, ConfigError> {
        if let Some(address) = &self.address {
            config.query.address = address.clone();
        }
        if let Some(from) = self.from {
            config.query.from_block = from;
        }
        if let Some(to) = self.to {
            config.query.to_block = to;
        }
        config.validate()?;
        Ok(config)
    }
}
