//! Call bindings for every contract the adapters and the price resolver read.
//!
//! Each binding only declares the view functions this crate needs. Function
//! names are unique across bindings so the generated `*Call` types can be
//! imported side by side.

use ethers::contract::abigen;
use ethers::types::Address;

abigen!(
    CollateralRegistry,
    r#"[
        function totalCollaterals() external view returns (uint256)
        function getTroveManager(uint256 index) external view returns (address)
        function getToken(uint256 index) external view returns (address)
        function boldToken() external view returns (address)
        function baseRate() external view returns (uint256)
    ]"#
);

// `getLatestTroveData` returns a struct of ten static words; declaring the
// fields as flat outputs decodes the same bytes.
abigen!(
    TroveManager,
    r#"[
        function addressesRegistry() external view returns (address)
        function getTroveIdsCount() external view returns (uint256)
        function getTroveFromTroveIdsArray(uint256 index) external view returns (uint256)
        function Troves(uint256 troveId) external view returns (uint256 debt, uint256 coll, uint256 stake, uint8 status, uint64 arrayIndex, uint64 lastDebtUpdateTime, uint64 lastInterestRateAdjTime, uint256 annualInterestRate, address interestBatchManager, uint256 batchDebtShares)
        function getLatestTroveData(uint256 troveId) external view returns (uint256 entireDebt, uint256 entireColl, uint256 redistBoldDebtGain, uint256 redistCollGain, uint256 accruedInterest, uint256 recordedDebt, uint256 annualInterestRate, uint256 weightedRecordedDebt, uint256 accruedBatchManagementFee, uint256 lastInterestRateAdjTime)
    ]"#
);

abigen!(
    AddressesRegistry,
    r#"[
        function CCR() external view returns (uint256)
        function MCR() external view returns (uint256)
        function SCR() external view returns (uint256)
        function collToken() external view returns (address)
        function priceFeed() external view returns (address)
        function activePool() external view returns (address)
        function defaultPool() external view returns (address)
        function stabilityPool() external view returns (address)
        function borrowerOperations() external view returns (address)
        function sortedTroves() external view returns (address)
    ]"#
);

abigen!(
    Erc20,
    r#"[
        function decimals() external view returns (uint8)
        function totalSupply() external view returns (uint256)
    ]"#
);

abigen!(
    BranchPool,
    r#"[
        function getBoldDebt() external view returns (uint256)
        function getCollBalance() external view returns (uint256)
        function getTotalBoldDeposits() external view returns (uint256)
        function aggRecordedDebt() external view returns (uint256)
        function aggWeightedDebtSum() external view returns (uint256)
        function aggBatchManagementFees() external view returns (uint256)
    ]"#
);

abigen!(
    PriceFeed,
    r#"[
        function lastGoodPrice() external view returns (uint256)
    ]"#
);

// Chainlink aggregators also answer `decimals()`, which is read through `Erc20`.
abigen!(
    ChainlinkAggregator,
    r#"[
        function latestAnswer() external view returns (int256)
    ]"#
);

abigen!(
    Multicall3,
    r#"[
        struct Call3 { address target; bool allowFailure; bytes callData; }
        struct Call3Result { bool success; bytes returnData; }
        function aggregate3(Call3[] calls) external payable returns (Call3Result[] returnData)
    ]"#
);

/// Multicall3 is deployed at the same address on every supported chain.
pub fn multicall3_address() -> Address {
    Address::from([
        0xca, 0x11, 0xbd, 0xe0, 0x59, 0x77, 0xb3, 0x63, 0x11, 0x67, 0x02, 0x88, 0x62, 0xbe, 0x2a, 0x17, 0x3b, 0x97,
        0x6c, 0xa1,
    ])
}
