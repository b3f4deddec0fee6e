//! Liquity v2 TroveManager events.
//!
//! Each event decodes through `EthEvent::decode_log` and is then flattened
//! into the JSON object persisted in `event_data`: camelCase keys, integer
//! values as decimal strings, addresses as lowercase hex.

use ethers::abi::RawLog;
use ethers::contract::EthEvent;
use ethers::types::{Address, Log, H256, I256, U256};
use lazy_static::lazy_static;
use serde_json::{json, Value};

use crate::gateway::format_address;

/// Flattening of a decoded event into its persisted payload.
pub trait EventPayload: EthEvent {
    fn payload(&self) -> Value;
}

#[derive(Clone, Debug, EthEvent)]
#[ethevent(
    name = "TroveOperation",
    abi = "TroveOperation(uint256,uint8,uint256,uint256,uint256,int256,uint256,int256)"
)]
pub struct TroveOperation {
    #[ethevent(indexed)]
    pub trove_id: U256,
    pub operation: u8,
    pub annual_interest_rate: U256,
    pub debt_increase_from_redist: U256,
    pub debt_increase_from_upfront_fee: U256,
    pub debt_change_from_operation: I256,
    pub coll_increase_from_redist: U256,
    pub coll_change_from_operation: I256,
}

impl EventPayload for TroveOperation {
    fn payload(&self) -> Value {
        json!({
            "troveId": self.trove_id.to_string(),
            "operation": self.operation.to_string(),
            "annualInterestRate": self.annual_interest_rate.to_string(),
            "debtIncreaseFromRedist": self.debt_increase_from_redist.to_string(),
            "debtIncreaseFromUpfrontFee": self.debt_increase_from_upfront_fee.to_string(),
            "debtChangeFromOperation": self.debt_change_from_operation.to_string(),
            "collIncreaseFromRedist": self.coll_increase_from_redist.to_string(),
            "collChangeFromOperation": self.coll_change_from_operation.to_string(),
        })
    }
}

#[derive(Clone, Debug, EthEvent)]
#[ethevent(
    name = "TroveUpdated",
    abi = "TroveUpdated(uint256,uint256,uint256,uint256,uint256,uint256,uint256)"
)]
pub struct TroveUpdated {
    #[ethevent(indexed)]
    pub trove_id: U256,
    pub debt: U256,
    pub coll: U256,
    pub stake: U256,
    pub annual_interest_rate: U256,
    pub snapshot_of_total_coll_redist: U256,
    pub snapshot_of_total_debt_redist: U256,
}

impl EventPayload for TroveUpdated {
    fn payload(&self) -> Value {
        json!({
            "troveId": self.trove_id.to_string(),
            "debt": self.debt.to_string(),
            "coll": self.coll.to_string(),
            "stake": self.stake.to_string(),
            "annualInterestRate": self.annual_interest_rate.to_string(),
            "snapshotOfTotalCollRedist": self.snapshot_of_total_coll_redist.to_string(),
            "snapshotOfTotalDebtRedist": self.snapshot_of_total_debt_redist.to_string(),
        })
    }
}

#[derive(Clone, Debug, EthEvent)]
#[ethevent(
    name = "Liquidation",
    abi = "Liquidation(uint256,uint256,uint256,uint256,uint256,uint256,uint256,uint256,uint256,uint256)"
)]
pub struct Liquidation {
    pub debt_offset_by_sp: U256,
    pub debt_redistributed: U256,
    pub bold_gas_compensation: U256,
    pub coll_gas_compensation: U256,
    pub coll_sent_to_sp: U256,
    pub coll_redistributed: U256,
    pub coll_surplus: U256,
    pub l_eth: U256,
    pub l_bold_debt: U256,
    pub price: U256,
}

impl EventPayload for Liquidation {
    fn payload(&self) -> Value {
        json!({
            "debtOffsetBySP": self.debt_offset_by_sp.to_string(),
            "debtRedistributed": self.debt_redistributed.to_string(),
            "boldGasCompensation": self.bold_gas_compensation.to_string(),
            "collGasCompensation": self.coll_gas_compensation.to_string(),
            "collSentToSP": self.coll_sent_to_sp.to_string(),
            "collRedistributed": self.coll_redistributed.to_string(),
            "collSurplus": self.coll_surplus.to_string(),
            "lEth": self.l_eth.to_string(),
            "lBoldDebt": self.l_bold_debt.to_string(),
            "price": self.price.to_string(),
        })
    }
}

#[derive(Clone, Debug, EthEvent)]
#[ethevent(name = "Redemption", abi = "Redemption(uint256,uint256,uint256,uint256,uint256,uint256)")]
pub struct Redemption {
    pub attempted_bold_amount: U256,
    pub actual_bold_amount: U256,
    pub coll_sent: U256,
    pub coll_fee: U256,
    pub price: U256,
    pub redemption_price: U256,
}

impl EventPayload for Redemption {
    fn payload(&self) -> Value {
        json!({
            "attemptedBoldAmount": self.attempted_bold_amount.to_string(),
            "actualBoldAmount": self.actual_bold_amount.to_string(),
            "collSent": self.coll_sent.to_string(),
            "collFee": self.coll_fee.to_string(),
            "price": self.price.to_string(),
            "redemptionPrice": self.redemption_price.to_string(),
        })
    }
}

#[derive(Clone, Debug, EthEvent)]
#[ethevent(
    name = "BatchUpdated",
    abi = "BatchUpdated(address,uint8,uint256,uint256,uint256,uint256,uint256,uint256)"
)]
pub struct BatchUpdated {
    #[ethevent(indexed)]
    pub interest_batch_manager: Address,
    pub operation: u8,
    pub debt: U256,
    pub coll: U256,
    pub annual_interest_rate: U256,
    pub annual_management_fee: U256,
    pub total_debt_shares: U256,
    pub debt_increase_from_upfront_fee: U256,
}

impl EventPayload for BatchUpdated {
    fn payload(&self) -> Value {
        json!({
            "interestBatchManager": format_address(self.interest_batch_manager),
            "operation": self.operation.to_string(),
            "debt": self.debt.to_string(),
            "coll": self.coll.to_string(),
            "annualInterestRate": self.annual_interest_rate.to_string(),
            "annualManagementFee": self.annual_management_fee.to_string(),
            "totalDebtShares": self.total_debt_shares.to_string(),
            "debtIncreaseFromUpfrontFee": self.debt_increase_from_upfront_fee.to_string(),
        })
    }
}

/// One indexed event: its name, topic0 and payload decoder.
pub struct EventKind {
    pub name: String,
    pub topic: H256,
    decode: fn(&RawLog) -> Result<Value, String>,
}

impl EventKind {
    fn of<E: EventPayload>() -> Self {
        Self {
            name: E::name().into_owned(),
            topic: E::signature(),
            decode: |raw| <E as EthEvent>::decode_log(raw).map(|event| event.payload()).map_err(|e| e.to_string()),
        }
    }

    pub fn decode(&self, log: &Log) -> Result<Value, String> {
        let raw = RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        };
        (self.decode)(&raw)
    }
}

lazy_static! {
    static ref EVENT_KINDS: Vec<EventKind> = vec![
        EventKind::of::<TroveOperation>(),
        EventKind::of::<TroveUpdated>(),
        EventKind::of::<Liquidation>(),
        EventKind::of::<Redemption>(),
        EventKind::of::<BatchUpdated>(),
    ];
}

/// Every TroveManager event the indexer stores.
pub fn event_kinds() -> &'static [EventKind] {
    &EVENT_KINDS
}
