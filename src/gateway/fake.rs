//! Scripted [`ChainGateway`] for tests.

use async_trait::async_trait;
use ethers::abi::{self, AbiEncode, Token};
use ethers::contract::{EthCall, EthEvent};
use ethers::types::{Address, Bytes, Log, H256, U256, U64};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use super::{parse_address, BlockRef, BlockTag, ChainGateway};
use crate::error::GatewayError;

#[derive(Default)]
pub struct FakeGateway {
    calls: Mutex<HashMap<(Address, Bytes), Bytes>>,
    logs: Mutex<Vec<Log>>,
    /// `from_block` of log windows that always fail.
    failing_windows: Mutex<BTreeSet<i64>>,
    /// Upcoming `get_logs` calls that fail once each.
    flaky_log_queries: Mutex<u32>,
    latest: Mutex<Option<BlockRef>>,
    blocks: Mutex<Vec<BlockRef>>,
    creation_codes: Mutex<HashMap<Address, Bytes>>,
    log_queries: Mutex<Vec<(i64, i64)>>,
    single_calls: Mutex<usize>,
    multicalls: Mutex<usize>,
}

fn address(value: &str) -> Address {
    parse_address(value).unwrap()
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `call` on `target` with the ABI encoding of `output`.
    pub fn on_call<C, R>(&self, target: &str, call: C, output: R)
    where
        C: EthCall + AbiEncode,
        R: AbiEncode,
    {
        self.on_raw(target, call.encode(), output.encode());
    }

    pub fn on_raw(&self, target: &str, calldata: Vec<u8>, output: Vec<u8>) {
        self.calls
            .lock()
            .unwrap()
            .insert((address(target), calldata.into()), output.into());
    }

    /// Appends a log of event `E` with the given indexed topics and data words.
    pub fn emit<E: EthEvent>(
        &self,
        target: &str,
        indexed: &[Token],
        data: &[Token],
        block_number: i64,
        tx_hash: H256,
        log_index: i64,
    ) {
        let mut topics = vec![E::signature()];
        topics.extend(indexed.iter().map(|t| H256::from_slice(&abi::encode(&[t.clone()]))));
        self.push_log(Log {
            address: address(target),
            topics,
            data: abi::encode(data).into(),
            block_number: Some(U64::from(block_number as u64)),
            transaction_hash: Some(tx_hash),
            log_index: Some(U256::from(log_index as u64)),
            ..Default::default()
        });
    }

    pub fn push_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn fail_window(&self, from_block: i64) {
        self.failing_windows.lock().unwrap().insert(from_block);
    }

    pub fn heal_windows(&self) {
        self.failing_windows.lock().unwrap().clear();
    }

    pub fn flaky_logs(&self, failures: u32) {
        *self.flaky_log_queries.lock().unwrap() = failures;
    }

    pub fn set_latest(&self, block: BlockRef) {
        *self.latest.lock().unwrap() = Some(block);
        self.add_block(block);
    }

    pub fn add_block(&self, block: BlockRef) {
        let mut blocks = self.blocks.lock().unwrap();
        if !blocks.contains(&block) {
            blocks.push(block);
            blocks.sort_by_key(|b| b.number);
        }
    }

    pub fn set_creation_code(&self, target: &str, code: Vec<u8>) {
        self.creation_codes.lock().unwrap().insert(address(target), code.into());
    }

    pub fn log_queries(&self) -> Vec<(i64, i64)> {
        self.log_queries.lock().unwrap().clone()
    }

    /// Calls sent on their own, outside any multicall.
    pub fn single_calls(&self) -> usize {
        *self.single_calls.lock().unwrap()
    }

    pub fn multicalls(&self) -> usize {
        *self.multicalls.lock().unwrap()
    }

    pub fn reset_counters(&self) {
        *self.single_calls.lock().unwrap() = 0;
        *self.multicalls.lock().unwrap() = 0;
    }

    fn answer(&self, target: Address, data: &Bytes) -> Result<Bytes, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .get(&(target, data.clone()))
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("execution reverted: {} on {:?}", data, target)))
    }
}

#[async_trait]
impl ChainGateway for FakeGateway {
    async fn call(&self, _chain: &str, target: Address, data: Bytes, _block: BlockTag) -> Result<Bytes, GatewayError> {
        *self.single_calls.lock().unwrap() += 1;
        self.answer(target, &data)
    }

    async fn multicall(
        &self,
        _chain: &str,
        calls: Vec<(Address, Bytes)>,
        _block: BlockTag,
    ) -> Result<Vec<Bytes>, GatewayError> {
        *self.multicalls.lock().unwrap() += 1;
        calls.iter().map(|(target, data)| self.answer(*target, data)).collect()
    }

    async fn get_logs(
        &self,
        _chain: &str,
        target: Address,
        topic: H256,
        from_block: i64,
        to_block: i64,
    ) -> Result<Vec<Log>, GatewayError> {
        self.log_queries.lock().unwrap().push((from_block, to_block));
        if self.failing_windows.lock().unwrap().contains(&from_block) {
            return Err(GatewayError::Rpc(format!("query [{}, {}] rejected", from_block, to_block)));
        }
        {
            let mut flaky = self.flaky_log_queries.lock().unwrap();
            if *flaky > 0 {
                *flaky -= 1;
                return Err(GatewayError::Timeout(1));
            }
        }
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                let block = log.block_number.map(|n| n.as_u64() as i64).unwrap_or(-1);
                log.address == target
                    && log.topics.first() == Some(&topic)
                    && block >= from_block
                    && block <= to_block
            })
            .cloned()
            .collect())
    }

    async fn latest_block(&self, chain: &str) -> Result<BlockRef, GatewayError> {
        self.latest
            .lock()
            .unwrap()
            .ok_or_else(|| GatewayError::NotFound(format!("no latest block scripted for {}", chain)))
    }

    async fn block_for_timestamp(&self, chain: &str, timestamp: i64) -> Result<BlockRef, GatewayError> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.timestamp <= timestamp)
            .last()
            .copied()
            .ok_or_else(|| GatewayError::NotFound(format!("no block before {} on {}", timestamp, chain)))
    }

    async fn creation_code(&self, chain: &str, target: Address) -> Result<Bytes, GatewayError> {
        self.creation_codes
            .lock()
            .unwrap()
            .get(&target)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("creation tx for {:?} on {}", target, chain)))
    }
}
