use std::collections::HashMap;
use std::str::FromStr;

use alloy_dyn_abi::DynSolType;
use alloy_json_abi::{Event, JsonAbi};
use alloy_primitives::{Address, B256};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ExplorerError, ResolveError};
use crate::explorer::{ExplorerClient, ProxyStatus};
use crate::types::EventFilter;

#[derive(Debug, Clone)]
pub struct EventParameter {
    pub name: String,
    /// Canonical type string, tuples expanded (e.g. `(address,uint256)[]`).
    pub ty: String,
    /// `None` when the type string is not understood by the dynamic ABI parser.
    pub sol_type: Option<DynSolType>,
    pub indexed: bool,
}

#[derive(Debug, Clone)]
pub struct EventSignature {
    pub name: String,
    pub selector: B256,
    /// Declaration order. Non-indexed data is decoded in this order.
    pub parameters: Vec<EventParameter>,
}

impl EventSignature {
    pub fn from_event(event: &Event) -> Self {
        let parameters = event
            .inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                let ty = input.selector_type().into_owned();
                let sol_type = DynSolType::parse(&ty).ok();
                let name = if input.name.is_empty() {
                    format!("param{i}")
                } else {
                    input.name.clone()
                };
                EventParameter {
                    name,
                    ty,
                    sol_type,
                    indexed: input.indexed,
                }
            })
            .collect();

        Self {
            name: event.name.clone(),
            selector: event.selector(),
            parameters,
        }
    }

    pub fn indexed_count(&self) -> usize {
        self.parameters.iter().filter(|p| p.indexed).count()
    }
}

/// Resolved interface of the indexed contract.
///
/// Built once at startup and shared read-only by the pipeline.
#[derive(Debug, Clone)]
pub struct ContractInterface {
    /// Address supplied by the user, logs are emitted (and attributed) here.
    pub contract: Address,
    /// Address whose ABI was fetched. Differs from `contract` for proxies.
    pub address: Address,
    events: HashMap<B256, EventSignature>,
}

impl ContractInterface {
    pub fn empty(contract: Address, address: Address) -> Self {
        Self {
            contract,
            address,
            events: HashMap::new(),
        }
    }

    pub fn from_json_abi(contract: Address, address: Address, abi: &JsonAbi) -> Self {
        let mut events = HashMap::new();
        for event in abi.events() {
            if event.anonymous {
                debug!("Skipping anonymous event {}", event.name);
                continue;
            }
            let signature = EventSignature::from_event(event);
            events.insert(signature.selector, signature);
        }

        Self {
            contract,
            address,
            events,
        }
    }

    /// Parse an ABI JSON document into an interface.
    pub fn from_abi_json(contract: Address, address: Address, abi_json: &str) -> Result<Self, serde_json::Error> {
        let preprocessed = preprocess_abi_json(abi_json)?;
        let abi: JsonAbi = serde_json::from_value(preprocessed)?;
        Ok(Self::from_json_abi(contract, address, &abi))
    }

    pub fn event(&self, selector: &B256) -> Option<&EventSignature> {
        self.events.get(selector)
    }

    pub fn events(&self) -> impl Iterator<Item = &EventSignature> {
        self.events.values()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_proxied(&self) -> bool {
        self.contract != self.address
    }

    /// Signature identifiers of the requested events known to this interface.
    pub fn selectors_for(&self, wanted: &EventFilter) -> Vec<B256> {
        let mut selectors: Vec<B256> = self
            .events
            .values()
            .filter(|e| wanted.contains(&e.name))
            .map(|e| e.selector)
            .collect();
        selectors.sort();
        selectors
    }
}

/// Default the `anonymous` flag of event items to `false` when the explorer omits it.
fn preprocess_abi_json(abi_json: &str) -> Result<Value, serde_json::Error> {
    let mut value: Value = serde_json::from_str(abi_json)?;

    if let Value::Array(items) = &mut value {
        for item in items.iter_mut() {
            if let Value::Object(obj) = item {
                let is_event = obj.get("type").and_then(Value::as_str) == Some("event");
                if is_event && !obj.contains_key("anonymous") {
                    obj.insert("anonymous".to_string(), Value::Bool(false));
                }
            }
        }
    }

    Ok(value)
}

/// Resolves the interface of a contract through the block explorer, following proxies.
#[derive(Debug, Clone)]
pub struct InterfaceResolver {
    explorer: ExplorerClient,
}

impl InterfaceResolver {
    pub fn new(explorer: ExplorerClient) -> Self {
        Self { explorer }
    }

    pub async fn resolve(&self, address: &str, api_key: &str) -> Result<ContractInterface, ResolveError> {
        if api_key.trim().is_empty() {
            return Err(ResolveError::MissingApiKey);
        }
        let address = address.trim();
        if address.is_empty() {
            return Err(ResolveError::MissingAddress);
        }
        let contract = Address::from_str(address).map_err(|_| ResolveError::InvalidAddress(address.to_string()))?;

        let target = match self.detect_proxy(contract, api_key).await {
            Ok(ProxyStatus::Proxy { implementation }) => {
                info!("Contract {} is a proxy, using implementation {} for the ABI", contract, implementation);
                implementation
            }
            Ok(ProxyStatus::NotProxy) => contract,
            Err(e) => {
                warn!("Proxy detection for {} failed, assuming not a proxy: {}", contract, e);
                contract
            }
        };

        let interface = match self.explorer.contract_abi(target, api_key).await {
            Ok(abi_json) => match ContractInterface::from_abi_json(contract, target, &abi_json) {
                Ok(interface) => interface,
                Err(e) => {
                    warn!("Failed to parse ABI of {}, no events will be decoded: {}", target, e);
                    ContractInterface::empty(contract, target)
                }
            },
            Err(e) => {
                warn!("Failed to fetch ABI of {}, no events will be decoded: {}", target, e);
                ContractInterface::empty(contract, target)
            }
        };

        if interface.is_empty() {
            warn!("Interface of {} declares no events, every log will be discarded", contract);
        } else {
            info!("Resolved interface of {} with {} events", contract, interface.len());
        }
        Ok(interface)
    }

    pub async fn detect_proxy(&self, address: Address, api_key: &str) -> Result<ProxyStatus, ExplorerError> {
        let metadata = self.explorer.source_metadata(address, api_key).await?;
        debug!(
            "Source metadata of {}: contract={} proxy={} implementation={}",
            address, metadata.contract_name, metadata.proxy, metadata.implementation
        );
        Ok(metadata.proxy_status())
    }
}
