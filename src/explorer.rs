//! Client for the Etherscan-compatible block explorer API.
//!
//! Only two read-only endpoints are used: `getsourcecode` for proxy detection and `getabi` for
//! the interface description. Both answer with the `{status, message, result}` envelope.

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ExplorerError;

pub const DEFAULT_EXPLORER_API_URL: &str = "https://api.etherscan.io/api";

#[derive(Debug, Deserialize)]
pub struct ExplorerResponse {
    pub status: String,
    pub message: String,
    pub result: Value,
}

impl ExplorerResponse {
    fn into_result(self) -> Result<Value, ExplorerError> {
        if self.status == "1" {
            Ok(self.result)
        } else {
            let result = match self.result {
                Value::String(s) => s,
                other => other.to_string(),
            };
            Err(ExplorerError::Api {
                message: self.message,
                result,
            })
        }
    }
}

/// Entry of the `getsourcecode` result array.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceMetadata {
    #[serde(default)]
    pub contract_name: String,
    #[serde(default)]
    pub proxy: String,
    #[serde(default)]
    pub implementation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyStatus {
    NotProxy,
    Proxy { implementation: Address },
}

impl SourceMetadata {
    pub fn proxy_status(&self) -> ProxyStatus {
        if self.proxy.trim() != "1" {
            return ProxyStatus::NotProxy;
        }
        match Address::from_str(self.implementation.trim()) {
            Ok(implementation) if !implementation.is_zero() => ProxyStatus::Proxy { implementation },
            _ => ProxyStatus::NotProxy,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExplorerClient {
    client: reqwest::Client,
    base_url: String,
}

impl ExplorerClient {
    pub fn new(base_url: &str, timeout_seconds: u64) -> Result<Self, ExplorerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the verified source metadata of `address`, which carries the proxy flags.
    pub async fn source_metadata(&self, address: Address, api_key: &str) -> Result<SourceMetadata, ExplorerError> {
        let result = self.call("getsourcecode", address, api_key).await?;

        let mut entries: Vec<SourceMetadata> = serde_json::from_value(result)?;
        if entries.is_empty() {
            return Err(ExplorerError::UnexpectedResult(format!("empty source metadata for {address}")));
        }
        Ok(entries.swap_remove(0))
    }

    /// Fetch the ABI JSON document of `address`, as returned in the `result` string.
    pub async fn contract_abi(&self, address: Address, api_key: &str) -> Result<String, ExplorerError> {
        match self.call("getabi", address, api_key).await? {
            Value::String(abi) => Ok(abi),
            other => Err(ExplorerError::UnexpectedResult(format!("ABI result is not a string: {other}"))),
        }
    }

    async fn call(&self, action: &str, address: Address, api_key: &str) -> Result<Value, ExplorerError> {
        debug!("Querying block explorer: action={} address={}", action, address);

        let address = format!("{address:#x}");
        let response: ExplorerResponse = self
            .client
            .get(&self.base_url)
            .query(&[
                ("module", "contract"),
                ("action", action),
                ("address", address.as_str()),
                ("apikey", api_key),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response.into_result()
    }
}
