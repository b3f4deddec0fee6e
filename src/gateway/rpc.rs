use async_trait::async_trait;
use ethers::abi::{AbiDecode, AbiEncode};
use ethers::providers::{Http, Middleware, Provider, ProviderError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockId, Bytes, Filter, Log, TransactionRequest, H256};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::contracts::{multicall3_address, Aggregate3Call, Aggregate3Return, Call3};
use super::{format_address, BlockRef, BlockTag, ChainGateway};
use crate::config::ChainConfig;
use crate::error::GatewayError;

/// One ethers HTTP provider per configured chain.
struct Endpoint {
    provider: Provider<Http>,
    config: ChainConfig,
}

/// [`ChainGateway`] over ethers JSON-RPC providers. Multicalls go through
/// the Multicall3 contract so a whole batch is one `eth_call`.
pub struct RpcGateway {
    endpoints: BTreeMap<String, Endpoint>,
    explorer: Client,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CreationRecord {
    tx_hash: H256,
}

impl RpcGateway {
    pub fn new(chains: BTreeMap<String, ChainConfig>) -> Result<Self, GatewayError> {
        let mut endpoints = BTreeMap::new();
        for (name, config) in chains {
            let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
                .map_err(|e| GatewayError::Rpc(format!("invalid rpc url for {}: {}", name, e)))?
                .interval(Duration::from_millis(500));
            endpoints.insert(name, Endpoint { provider, config });
        }
        Ok(Self {
            endpoints,
            explorer: Client::new(),
        })
    }

    fn endpoint(&self, chain: &str) -> Result<&Endpoint, GatewayError> {
        self.endpoints
            .get(chain)
            .ok_or_else(|| GatewayError::NotFound(format!("no rpc endpoint for chain {}", chain)))
    }

    /// Bounds one provider request by the chain's configured timeout.
    async fn timed<T, F>(&self, endpoint: &Endpoint, request: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let secs = endpoint.config.timeout_secs;
        match tokio::time::timeout(Duration::from_secs(secs), request).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(GatewayError::Timeout(secs)),
        }
    }

    async fn block(&self, chain: &str, tag: BlockTag) -> Result<BlockRef, GatewayError> {
        let endpoint = self.endpoint(chain)?;
        let block = self
            .timed(endpoint, endpoint.provider.get_block(BlockId::from(tag)))
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("block {} on {}", tag, chain)))?;
        let number = block
            .number
            .ok_or_else(|| GatewayError::Decode(format!("block {} on {} is pending", tag, chain)))?;
        Ok(BlockRef {
            number: i64::try_from(number.as_u64())
                .map_err(|_| GatewayError::Decode(format!("block number {} does not fit its column", number)))?,
            timestamp: super::narrow(block.timestamp, "block timestamp")?,
        })
    }
}

#[async_trait]
impl ChainGateway for RpcGateway {
    async fn call(&self, chain: &str, target: Address, data: Bytes, block: BlockTag) -> Result<Bytes, GatewayError> {
        let endpoint = self.endpoint(chain)?;
        let tx: TypedTransaction = TransactionRequest::new().to(target).data(data).into();
        self.timed(endpoint, endpoint.provider.call(&tx, Some(block.into()))).await
    }

    async fn multicall(
        &self,
        chain: &str,
        calls: Vec<(Address, Bytes)>,
        block: BlockTag,
    ) -> Result<Vec<Bytes>, GatewayError> {
        let count = calls.len();
        let aggregate = Aggregate3Call {
            calls: calls
                .into_iter()
                .map(|(target, call_data)| Call3 {
                    target,
                    allow_failure: true,
                    call_data,
                })
                .collect(),
        };
        debug!("multicall of {} calls on {} at {}", count, chain, block);
        let output = self
            .call(chain, multicall3_address(), aggregate.encode().into(), block)
            .await?;
        let Aggregate3Return { return_data: results } = Aggregate3Return::decode(output.as_ref())
            .map_err(|e| GatewayError::Decode(format!("aggregate3: {}", e)))?;

        results
            .into_iter()
            .enumerate()
            .map(|(i, (success, return_data))| {
                if success {
                    Ok(return_data)
                } else {
                    Err(GatewayError::NotFound(format!("execution reverted in multicall slot {}", i)))
                }
            })
            .collect()
    }

    async fn get_logs(
        &self,
        chain: &str,
        target: Address,
        topic: H256,
        from_block: i64,
        to_block: i64,
    ) -> Result<Vec<Log>, GatewayError> {
        let endpoint = self.endpoint(chain)?;
        let filter = Filter::new()
            .address(target)
            .topic0(topic)
            .from_block(from_block.max(0) as u64)
            .to_block(to_block.max(0) as u64);
        self.timed(endpoint, endpoint.provider.get_logs(&filter)).await
    }

    async fn latest_block(&self, chain: &str) -> Result<BlockRef, GatewayError> {
        self.block(chain, BlockTag::Latest).await
    }

    async fn block_for_timestamp(&self, chain: &str, timestamp: i64) -> Result<BlockRef, GatewayError> {
        let latest = self.latest_block(chain).await?;
        if timestamp >= latest.timestamp {
            return Ok(latest);
        }

        // Binary search for the last block at or before `timestamp`.
        let mut low = 0i64;
        let mut high = latest.number;
        let mut best = self.block(chain, BlockTag::Number(0)).await?;
        if best.timestamp > timestamp {
            return Err(GatewayError::NotFound(format!("{} predates genesis on {}", timestamp, chain)));
        }
        while low <= high {
            let mid = low + (high - low) / 2;
            let candidate = self.block(chain, BlockTag::Number(mid)).await?;
            if candidate.timestamp <= timestamp {
                best = candidate;
                low = mid + 1;
            } else {
                high = mid - 1;
            }
        }
        Ok(best)
    }

    async fn creation_code(&self, chain: &str, address: Address) -> Result<Bytes, GatewayError> {
        let endpoint = self.endpoint(chain)?;
        let explorer = endpoint
            .config
            .explorer_url
            .as_ref()
            .ok_or_else(|| GatewayError::NotFound(format!("no explorer configured for {}", chain)))?;

        let mut query = vec![
            ("module", "contract".to_string()),
            ("action", "getcontractcreation".to_string()),
            ("contractaddresses", format_address(address)),
        ];
        if let Some(key) = &endpoint.config.explorer_api_key {
            query.push(("apikey", key.clone()));
        }

        let body: Value = self
            .explorer
            .get(explorer)
            .query(&query)
            .timeout(Duration::from_secs(endpoint.config.timeout_secs))
            .send()
            .await?
            .json()
            .await?;
        let records: Vec<CreationRecord> = body
            .get("result")
            .cloned()
            .map(serde_json::from_value::<Vec<CreationRecord>>)
            .transpose()
            .map_err(|e| GatewayError::Decode(format!("getcontractcreation: {}", e)))?
            .unwrap_or_default();
        let creation = records
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::NotFound(format!("creation tx for {:?} on {}", address, chain)))?;

        let tx = self
            .timed(endpoint, endpoint.provider.get_transaction(creation.tx_hash))
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("creation tx {:?} of {:?}", creation.tx_hash, address)))?;
        Ok(tx.input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chains() -> BTreeMap<String, ChainConfig> {
        let mut chains = BTreeMap::new();
        chains.insert(
            "ethereum".to_string(),
            ChainConfig {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                explorer_url: None,
                explorer_api_key: None,
                max_block_range: 10_000,
                timeout_secs: 1,
            },
        );
        chains
    }

    #[test]
    fn builds_one_provider_per_chain() {
        let gateway = RpcGateway::new(chains()).unwrap();
        assert!(gateway.endpoint("ethereum").is_ok());
        assert!(matches!(gateway.endpoint("base"), Err(GatewayError::NotFound(_))));
    }

    #[test]
    fn rejects_malformed_rpc_url() {
        let mut chains = chains();
        if let Some(chain) = chains.get_mut("ethereum") {
            chain.rpc_url = "not a url".to_string();
        }
        assert!(RpcGateway::new(chains).is_err());
    }

    #[tokio::test]
    async fn creation_code_needs_an_explorer() {
        let gateway = RpcGateway::new(chains()).unwrap();
        let err = gateway.creation_code("ethereum", Address::zero()).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(ref msg) if msg.contains("explorer")));
    }
}
