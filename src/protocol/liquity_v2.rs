use async_trait::async_trait;
use ethers::types::{Address, U256};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

use super::events::event_kinds;
use super::{
    ColImmutables, ColPoolReading, CoreImmutables, CorePoolReading, EventBatch, ImmutablesSnapshot,
    ParsedEvent, PoolSnapshot, ProtocolAdapter, ProtocolKind, TroveManagerInfo, TroveReading, TroveStatus,
};
use crate::config::DeploymentConfig;
use crate::error::GatewayError;
use crate::gateway::contracts::{
    ActivePoolCall, AddressesRegistryCall, AggBatchManagementFeesCall, AggRecordedDebtCall,
    AggWeightedDebtSumCall, BaseRateCall, BoldTokenCall, BorrowerOperationsCall, CcrCall, CollTokenCall,
    DecimalsCall, DefaultPoolCall, GetBoldDebtCall, GetCollBalanceCall, GetLatestTroveDataCall,
    GetLatestTroveDataReturn, GetTokenCall, GetTotalBoldDepositsCall, GetTroveFromTroveIdsArrayCall,
    GetTroveIdsCountCall, GetTroveManagerCall, McrCall, PriceFeedCall, ScrCall, SortedTrovesCall,
    StabilityPoolCall, TotalCollateralsCall, TotalSupplyCall, TrovesCall, TrovesReturn,
};
use crate::gateway::{format_address, narrow, parse_address, read, BlockTag, CallBatch, ChainGateway, Slot};

/// Troves per multicall when reading a trove manager's ledger.
const TROVE_BATCH: usize = 200;

/// Adapter for Liquity v2 and its forks (CollateralRegistry + one TroveManager per branch).
pub struct LiquityV2Adapter {
    concurrency: usize,
}

/// A branch's AddressesRegistry, either pinned in config or awaiting a batched lookup.
enum RegistrySource {
    Configured(Address),
    Lookup(Slot),
}

/// Multicall slots of one branch's registry getters.
struct RegistrySlots {
    collateral_token: Slot,
    price_feed: Slot,
    active_pool: Slot,
    default_pool: Slot,
    stability_pool: Slot,
    borrower_operations: Slot,
    sorted_troves: Slot,
    ccr: Slot,
    mcr: Slot,
    scr: Slot,
}

/// Multicall slots of one branch's pool aggregates.
struct PoolSlots {
    active_debt: Slot,
    default_debt: Slot,
    active_coll: Slot,
    default_coll: Slot,
    sp_deposits: Slot,
    sp_coll: Slot,
    agg_recorded_debt: Slot,
    agg_weighted_debt_sum: Slot,
    agg_batch_management_fees: Slot,
    trove_count: Slot,
}

impl LiquityV2Adapter {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Reads `Troves` and `getLatestTroveData` for a chunk of ids in one multicall.
    async fn read_troves(
        &self,
        gateway: &dyn ChainGateway,
        chain: &str,
        trove_manager: &TroveManagerInfo,
        ids: Vec<U256>,
        block: BlockTag,
    ) -> Result<Vec<TroveReading>, GatewayError> {
        let target = parse_address(&trove_manager.address)?;
        let mut batch = CallBatch::new();
        let slots: Vec<(U256, Slot, Slot)> = ids
            .into_iter()
            .map(|id| {
                let stored = batch.push(target, TrovesCall { trove_id: id });
                let latest = batch.push(target, GetLatestTroveDataCall { trove_id: id });
                (id, stored, latest)
            })
            .collect();
        let output = batch.send(gateway, chain, block).await?;

        slots
            .into_iter()
            .map(|(id, stored, latest)| {
                let stored: TrovesReturn = output.get(stored)?;
                let latest: GetLatestTroveDataReturn = output.get(latest)?;
                let batch_manager = stored.interest_batch_manager;
                Ok(TroveReading {
                    trove_manager_index: trove_manager.index,
                    trove_id: id.to_string(),
                    debt: latest.entire_debt.to_string(),
                    coll: latest.entire_coll.to_string(),
                    stake: stored.stake.to_string(),
                    status: TroveStatus::try_from(i64::from(stored.status))?,
                    annual_interest_rate: latest.annual_interest_rate.to_string(),
                    last_debt_update_time: i64::try_from(stored.last_debt_update_time).map_err(|_| {
                        GatewayError::Decode(format!("trove {} update time {}", id, stored.last_debt_update_time))
                    })?,
                    interest_batch_manager: (!batch_manager.is_zero()).then(|| format_address(batch_manager)),
                    batch_debt_shares: stored.batch_debt_shares.to_string(),
                })
            })
            .collect()
    }

    /// Registry of every manager, from config where pinned, else one multicall of `addressesRegistry()`.
    async fn resolve_registries(
        &self,
        gateway: &dyn ChainGateway,
        chain: &str,
        deployment: &DeploymentConfig,
        trove_managers: &[TroveManagerInfo],
        block: BlockTag,
    ) -> Result<Vec<Address>, GatewayError> {
        let mut batch = CallBatch::new();
        let mut pending = Vec::with_capacity(trove_managers.len());
        for tm in trove_managers {
            let configured = deployment
                .collateral(tm.index)
                .and_then(|c| c.addresses_registry.as_deref())
                .map(parse_address)
                .transpose()?;
            pending.push(match configured {
                Some(address) => RegistrySource::Configured(address),
                None => RegistrySource::Lookup(batch.push(parse_address(&tm.address)?, AddressesRegistryCall)),
            });
        }
        let output = batch.send(gateway, chain, block).await?;
        pending
            .into_iter()
            .map(|source| match source {
                RegistrySource::Configured(address) => Ok(address),
                RegistrySource::Lookup(slot) => output.get(slot),
            })
            .collect()
    }
}

#[async_trait]
impl ProtocolAdapter for LiquityV2Adapter {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::LiquityV2
    }

    async fn fetch_trove_managers(
        &self,
        gateway: &dyn ChainGateway,
        chain: &str,
        deployment: &DeploymentConfig,
        block: BlockTag,
    ) -> Result<Vec<TroveManagerInfo>, GatewayError> {
        let registry = parse_address(&deployment.collateral_registry)?;
        let total: U256 = read(gateway, chain, registry, TotalCollateralsCall, block).await?;
        let total: i32 = narrow(total, "totalCollaterals")?;

        let mut batch = CallBatch::new();
        let slots: Vec<(i32, Slot, Slot)> = (0..total)
            .map(|i| {
                let index = U256::from(i as u64);
                (
                    i,
                    batch.push(registry, GetTroveManagerCall { index }),
                    batch.push(registry, GetTokenCall { index }),
                )
            })
            .collect();
        let output = batch.send(gateway, chain, block).await?;

        let managers = slots
            .into_iter()
            .map(|(index, manager, token)| {
                Ok(TroveManagerInfo {
                    index,
                    address: format_address(output.get(manager)?),
                    collateral_token: format_address(output.get(token)?),
                })
            })
            .collect::<Result<Vec<_>, GatewayError>>()?;
        debug!("{} trove managers on {}", managers.len(), chain);
        Ok(managers)
    }

    async fn fetch_troves(
        &self,
        gateway: &dyn ChainGateway,
        chain: &str,
        trove_manager: &TroveManagerInfo,
        block: BlockTag,
    ) -> Result<Vec<TroveReading>, GatewayError> {
        let target = parse_address(&trove_manager.address)?;
        let count: U256 = read(gateway, chain, target, GetTroveIdsCountCall, block).await?;
        let count: usize = narrow(count, "getTroveIdsCount")?;

        let index_chunks: Vec<Vec<usize>> = (0..count)
            .collect::<Vec<_>>()
            .chunks(TROVE_BATCH)
            .map(<[usize]>::to_vec)
            .collect();

        let ids: Vec<Vec<U256>> = stream::iter(index_chunks)
            .map(|chunk| async move {
                let mut batch = CallBatch::new();
                let slots: Vec<Slot> = chunk
                    .into_iter()
                    .map(|i| batch.push(target, GetTroveFromTroveIdsArrayCall { index: U256::from(i as u64) }))
                    .collect();
                let output = batch.send(gateway, chain, block).await?;
                slots
                    .into_iter()
                    .map(|slot| output.get::<U256>(slot))
                    .collect::<Result<Vec<_>, GatewayError>>()
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let troves: Vec<Vec<TroveReading>> = stream::iter(ids)
            .map(|chunk| self.read_troves(gateway, chain, trove_manager, chunk, block))
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;
        let troves: Vec<TroveReading> = troves.into_iter().flatten().collect();

        info!(
            "Read {} troves from trove manager {} on {}",
            troves.len(),
            trove_manager.index,
            chain
        );
        Ok(troves)
    }

    async fn fetch_immutables(
        &self,
        gateway: &dyn ChainGateway,
        chain: &str,
        deployment: &DeploymentConfig,
        trove_managers: &[TroveManagerInfo],
        block: BlockTag,
    ) -> Result<ImmutablesSnapshot, GatewayError> {
        let collateral_registry = parse_address(&deployment.collateral_registry)?;
        let registries = self
            .resolve_registries(gateway, chain, deployment, trove_managers, block)
            .await?;

        let mut batch = CallBatch::new();
        let bold_token = batch.push(collateral_registry, BoldTokenCall);
        let branch_slots: Vec<RegistrySlots> = registries
            .iter()
            .map(|&registry| RegistrySlots {
                collateral_token: batch.push(registry, CollTokenCall),
                price_feed: batch.push(registry, PriceFeedCall),
                active_pool: batch.push(registry, ActivePoolCall),
                default_pool: batch.push(registry, DefaultPoolCall),
                stability_pool: batch.push(registry, StabilityPoolCall),
                borrower_operations: batch.push(registry, BorrowerOperationsCall),
                sorted_troves: batch.push(registry, SortedTrovesCall),
                ccr: batch.push(registry, CcrCall),
                mcr: batch.push(registry, McrCall),
                scr: batch.push(registry, ScrCall),
            })
            .collect();
        let output = batch.send(gateway, chain, block).await?;

        let core = CoreImmutables {
            collateral_registry: format_address(collateral_registry),
            bold_token: format_address(output.get(bold_token)?),
            total_collaterals: i32::try_from(trove_managers.len())
                .map_err(|_| GatewayError::Decode(format!("{} trove managers", trove_managers.len())))?,
        };

        let tokens: Vec<Address> = branch_slots
            .iter()
            .map(|slots| output.get(slots.collateral_token))
            .collect::<Result<_, _>>()?;
        let mut decimals_batch = CallBatch::new();
        let decimals_slots: Vec<Slot> = tokens
            .iter()
            .map(|&token| decimals_batch.push(token, DecimalsCall))
            .collect();
        let decimals = decimals_batch.send(gateway, chain, block).await?;

        let mut collaterals = Vec::with_capacity(trove_managers.len());
        for (i, tm) in trove_managers.iter().enumerate() {
            let slots = &branch_slots[i];
            let address = |slot: Slot| output.get::<Address>(slot).map(format_address);
            let word = |slot: Slot| output.get::<U256>(slot).map(|v| v.to_string());
            collaterals.push(ColImmutables {
                trove_manager_index: tm.index,
                trove_manager: tm.address.clone(),
                collateral_token: format_address(tokens[i]),
                collateral_decimals: i32::from(decimals.get::<u8>(decimals_slots[i])?),
                addresses_registry: format_address(registries[i]),
                price_feed: address(slots.price_feed)?,
                active_pool: address(slots.active_pool)?,
                default_pool: address(slots.default_pool)?,
                stability_pool: address(slots.stability_pool)?,
                borrower_operations: address(slots.borrower_operations)?,
                sorted_troves: address(slots.sorted_troves)?,
                ccr: word(slots.ccr)?,
                mcr: word(slots.mcr)?,
                scr: word(slots.scr)?,
            });
        }
        Ok(ImmutablesSnapshot { core, collaterals })
    }

    async fn fetch_pool_data(
        &self,
        gateway: &dyn ChainGateway,
        chain: &str,
        deployment: &DeploymentConfig,
        immutables: &[ColImmutables],
        block: BlockTag,
    ) -> Result<PoolSnapshot, GatewayError> {
        let registry = parse_address(&deployment.collateral_registry)?;
        let bold_token: Address = read(gateway, chain, registry, BoldTokenCall, block).await?;

        let mut batch = CallBatch::new();
        let bold_supply = batch.push(bold_token, TotalSupplyCall);
        let base_rate = batch.push(registry, BaseRateCall);
        let mut branch_slots = Vec::with_capacity(immutables.len());
        for col in immutables {
            let active = parse_address(&col.active_pool)?;
            let default = parse_address(&col.default_pool)?;
            let stability = parse_address(&col.stability_pool)?;
            branch_slots.push(PoolSlots {
                active_debt: batch.push(active, GetBoldDebtCall),
                default_debt: batch.push(default, GetBoldDebtCall),
                active_coll: batch.push(active, GetCollBalanceCall),
                default_coll: batch.push(default, GetCollBalanceCall),
                sp_deposits: batch.push(stability, GetTotalBoldDepositsCall),
                sp_coll: batch.push(stability, GetCollBalanceCall),
                agg_recorded_debt: batch.push(active, AggRecordedDebtCall),
                agg_weighted_debt_sum: batch.push(active, AggWeightedDebtSumCall),
                agg_batch_management_fees: batch.push(active, AggBatchManagementFeesCall),
                trove_count: batch.push(parse_address(&col.trove_manager)?, GetTroveIdsCountCall),
            });
        }
        let output = batch.send(gateway, chain, block).await?;

        let core = CorePoolReading {
            bold_supply: output.get::<U256>(bold_supply)?.to_string(),
            base_rate: output.get::<U256>(base_rate)?.to_string(),
        };
        let collaterals = immutables
            .iter()
            .zip(branch_slots)
            .map(|(col, slots)| {
                let word = |slot: Slot| output.get::<U256>(slot);
                Ok(ColPoolReading {
                    trove_manager_index: col.trove_manager_index,
                    entire_system_debt: add_words(word(slots.active_debt)?, word(slots.default_debt)?)?,
                    entire_system_coll: add_words(word(slots.active_coll)?, word(slots.default_coll)?)?,
                    sp_deposits: word(slots.sp_deposits)?.to_string(),
                    sp_coll: word(slots.sp_coll)?.to_string(),
                    agg_recorded_debt: word(slots.agg_recorded_debt)?.to_string(),
                    agg_weighted_debt_sum: word(slots.agg_weighted_debt_sum)?.to_string(),
                    agg_batch_management_fees: word(slots.agg_batch_management_fees)?.to_string(),
                    trove_count: narrow(word(slots.trove_count)?, "getTroveIdsCount")?,
                })
            })
            .collect::<Result<Vec<_>, GatewayError>>()?;
        Ok(PoolSnapshot { core, collaterals })
    }

    async fn fetch_events(
        &self,
        gateway: &dyn ChainGateway,
        chain: &str,
        trove_managers: &[TroveManagerInfo],
        from_block: i64,
        to_block: i64,
    ) -> Result<EventBatch, GatewayError> {
        let mut batch = EventBatch::default();
        for tm in trove_managers {
            let target = parse_address(&tm.address)?;
            for kind in event_kinds() {
                let logs = gateway.get_logs(chain, target, kind.topic, from_block, to_block).await?;
                for log in logs {
                    let tx_hash = log.transaction_hash.unwrap_or_default();
                    let block = log.block_number.map(|n| i64::try_from(n.as_u64()));
                    let index = log.log_index.map(i64::try_from);
                    let located = match (block, index) {
                        (Some(Ok(block)), Some(Ok(index))) => Some((block, index)),
                        _ => None,
                    };
                    match (located, kind.decode(&log)) {
                        (Some((block_number, log_index)), Ok(event_data)) => batch.events.push(ParsedEvent {
                            trove_manager_index: tm.index,
                            block_number,
                            tx_hash: format!("{:?}", tx_hash),
                            log_index,
                            event_name: kind.name.clone(),
                            event_data,
                        }),
                        (None, _) => batch
                            .skipped
                            .push(format!("{} log {:?}: missing block or log index", kind.name, tx_hash)),
                        (Some((_, log_index)), Err(e)) => batch
                            .skipped
                            .push(format!("{} log {:?}#{}: {}", kind.name, tx_hash, log_index, e)),
                    }
                }
            }
        }
        batch
            .events
            .sort_by(|a, b| (a.block_number, a.log_index).cmp(&(b.block_number, b.log_index)));
        Ok(batch)
    }
}

/// Active plus default pool balance, refusing to wrap.
fn add_words(a: U256, b: U256) -> Result<String, GatewayError> {
    a.checked_add(b)
        .map(|sum| sum.to_string())
        .ok_or_else(|| GatewayError::Decode(format!("{} + {} overflows uint256", a, b)))
}
