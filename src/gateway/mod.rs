//! Read access to EVM chains.
//!
//! Every component reads chain state through [`ChainGateway`]; the production
//! implementation is [`rpc::RpcGateway`], tests substitute an in-memory fake.
//! Calls cross this boundary as ABI-encoded bytes built from the typed
//! bindings in [`contracts`]. [`read`] and [`CallBatch`] do the encoding and
//! decoding so callers only see typed values.

pub mod contracts;
pub mod rpc;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use ethers::abi::{AbiDecode, AbiEncode};
use ethers::contract::EthCall;
use ethers::types::{Address, BlockId, BlockNumber, Bytes, Log, H256, U256, U64};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: i64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Number(i64),
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockTag::Latest => f.write_str("latest"),
            BlockTag::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<BlockTag> for BlockId {
    fn from(tag: BlockTag) -> Self {
        match tag {
            BlockTag::Latest => BlockId::Number(BlockNumber::Latest),
            BlockTag::Number(n) => BlockId::Number(BlockNumber::Number(U64::from(n.max(0) as u64))),
        }
    }
}

#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// `eth_call` of ABI-encoded `data` against `target`; returns the raw output.
    async fn call(&self, chain: &str, target: Address, data: Bytes, block: BlockTag) -> Result<Bytes, GatewayError>;

    /// Many calls pinned to the same block. Outputs are in call order.
    async fn multicall(
        &self,
        chain: &str,
        calls: Vec<(Address, Bytes)>,
        block: BlockTag,
    ) -> Result<Vec<Bytes>, GatewayError> {
        let reads = calls
            .into_iter()
            .map(|(target, data)| self.call(chain, target, data, block));
        join_all(reads).await.into_iter().collect()
    }

    async fn get_logs(
        &self,
        chain: &str,
        target: Address,
        topic: H256,
        from_block: i64,
        to_block: i64,
    ) -> Result<Vec<Log>, GatewayError>;

    async fn latest_block(&self, chain: &str) -> Result<BlockRef, GatewayError>;

    /// Last block produced at or before `timestamp`.
    async fn block_for_timestamp(&self, chain: &str, timestamp: i64) -> Result<BlockRef, GatewayError>;

    /// Creation bytecode (init code + constructor arguments) of a contract.
    async fn creation_code(&self, chain: &str, address: Address) -> Result<Bytes, GatewayError>;
}

/// Sends one typed call and decodes its return value.
pub async fn read<C, R>(
    gateway: &dyn ChainGateway,
    chain: &str,
    target: Address,
    call: C,
    block: BlockTag,
) -> Result<R, GatewayError>
where
    C: EthCall + AbiEncode,
    R: AbiDecode,
{
    let output = gateway.call(chain, target, call.encode().into(), block).await?;
    decode_output(&C::function_name(), target, &output)
}

/// Typed calls collected for a single [`ChainGateway::multicall`].
#[derive(Debug, Default)]
pub struct CallBatch {
    calls: Vec<(Address, Bytes)>,
    names: Vec<Cow<'static, str>>,
}

/// Raw outputs of a sent [`CallBatch`], decoded slot by slot.
#[derive(Debug)]
pub struct BatchOutput {
    calls: Vec<(Address, Bytes)>,
    names: Vec<Cow<'static, str>>,
    outputs: Vec<Bytes>,
}

/// Position of a call inside its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot(usize);

impl CallBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<C>(&mut self, target: Address, call: C) -> Slot
    where
        C: EthCall + AbiEncode,
    {
        self.calls.push((target, call.encode().into()));
        self.names.push(C::function_name());
        Slot(self.calls.len() - 1)
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub async fn send(self, gateway: &dyn ChainGateway, chain: &str, block: BlockTag) -> Result<BatchOutput, GatewayError> {
        let outputs = if self.calls.is_empty() {
            Vec::new()
        } else {
            gateway.multicall(chain, self.calls.clone(), block).await?
        };
        if outputs.len() != self.calls.len() {
            return Err(GatewayError::Decode(format!(
                "multicall returned {} results for {} calls",
                outputs.len(),
                self.calls.len()
            )));
        }
        Ok(BatchOutput {
            calls: self.calls,
            names: self.names,
            outputs,
        })
    }
}

impl BatchOutput {
    pub fn get<R: AbiDecode>(&self, slot: Slot) -> Result<R, GatewayError> {
        let Slot(i) = slot;
        match (self.outputs.get(i), self.names.get(i), self.calls.get(i)) {
            (Some(output), Some(name), Some((target, _))) => decode_output(name, *target, output),
            _ => Err(GatewayError::Decode(format!("no multicall result in slot {}", i))),
        }
    }
}

fn decode_output<R: AbiDecode>(function: &str, target: Address, output: &Bytes) -> Result<R, GatewayError> {
    R::decode(output.as_ref())
        .map_err(|e| GatewayError::Decode(format!("{} on {:?}: {}", function, target, e)))
}

/// Parses a configured or stored `0x` address.
pub fn parse_address(value: &str) -> Result<Address, GatewayError> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|e| GatewayError::Decode(format!("{} is not an address: {}", value, e)))
}

/// Lowercase, `0x`-prefixed form used in every persisted row.
pub fn format_address(address: Address) -> String {
    format!("{:?}", address)
}

/// Narrows an on-chain integer into a column type, failing instead of wrapping.
pub fn narrow<T: TryFrom<U256>>(value: U256, what: &str) -> Result<T, GatewayError> {
    T::try_from(value).map_err(|_| GatewayError::Decode(format!("{} {} does not fit its column", what, value)))
}
