//! In-memory [`Store`] used by the job tests. It enforces the same unique keys
//! and conflict policies as the Postgres schema.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::models::block_timestamps::BlockTimestamp;
use super::models::event_data::{EventData, NewEventData};
use super::models::immutables::{ColImmutablesRow, CoreImmutablesRow, NewColImmutables, NewCoreImmutables};
use super::models::pool_data::{ColPoolData, CorePoolData, NewColPoolData, NewCorePoolData};
use super::models::prices_and_rates::{NewPricesAndRates, PricesAndRates};
use super::models::recorded_blocks::RecordedBlocks;
use super::models::summaries::{NewTroveDataSummary, TroveDataSummary};
use super::models::time_sample_points::{NewTimeSamplePoint, TimeSamplePoint};
use super::models::trove_data::{NewTroveData, TroveData};
use super::models::trove_managers::TroveManager;
use super::{merge_watermark, ConflictPolicy, Store, WatermarkOutcome};
use crate::error::{IndexerError, IndexerResult};
use crate::gateway::BlockRef;
use crate::protocol::TroveManagerInfo;

#[derive(Default)]
pub struct Tables {
    pub next_id: i64,
    pub trove_managers: Vec<TroveManager>,
    pub block_timestamps: BTreeMap<(String, i64), i64>,
    pub troves: BTreeMap<(i32, String, i64), TroveData>,
    pub core_immutables: BTreeMap<(i32, String, i64), CoreImmutablesRow>,
    pub col_immutables: BTreeMap<(i32, i64), ColImmutablesRow>,
    pub core_pool: BTreeMap<(i32, String, i64), CorePoolData>,
    pub col_pool: BTreeMap<(i32, i64), ColPoolData>,
    pub events: BTreeMap<(String, String, i64), EventData>,
    pub recorded_blocks: BTreeMap<(i32, String), RecordedBlocks>,
    pub prices: BTreeMap<(i32, i64), PricesAndRates>,
    pub sample_points: BTreeMap<(i32, String, i64), TimeSamplePoint>,
    pub summaries: BTreeMap<(i32, String, i32, String, i64), TroveDataSummary>,
}

impl Tables {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub tables: Mutex<Tables>,
    /// Number of upcoming write calls that fail with a persistence error.
    pub fail_writes: Mutex<u32>,
}

fn put<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, value: V, policy: ConflictPolicy) -> IndexerResult<bool> {
    if map.contains_key(&key) {
        return match policy {
            ConflictPolicy::Ignore => Ok(false),
            ConflictPolicy::Update => {
                map.insert(key, value);
                Ok(true)
            }
            ConflictPolicy::Error => Err(IndexerError::Conflict("duplicate key".into())),
        };
    }
    map.insert(key, value);
    Ok(true)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap()
    }

    fn check_write(&self) -> IndexerResult<()> {
        let mut remaining = self.fail_writes.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(IndexerError::Persistence("injected write failure".into()));
        }
        Ok(())
    }

    pub fn events(&self) -> Vec<EventData> {
        self.tables().events.values().cloned().collect()
    }

    pub fn prices(&self) -> Vec<PricesAndRates> {
        self.tables().prices.values().cloned().collect()
    }

    pub fn summaries(&self) -> Vec<TroveDataSummary> {
        self.tables().summaries.values().cloned().collect()
    }

    pub fn troves(&self) -> Vec<TroveData> {
        self.tables().troves.values().cloned().collect()
    }

    pub fn col_pool(&self) -> Vec<ColPoolData> {
        self.tables().col_pool.values().cloned().collect()
    }

    pub fn col_immutables(&self) -> Vec<ColImmutablesRow> {
        self.tables().col_immutables.values().cloned().collect()
    }

    pub fn seed_col_immutables(&self, row: NewColImmutables) {
        let mut t = self.tables();
        let id = t.id();
        let key = (row.trove_manager_id, row.block_number);
        t.col_immutables.insert(key, col_immutables_row(id, row));
    }

    pub fn seed_sample_point(&self, point: NewTimeSamplePoint) {
        let mut t = self.tables();
        let id = t.id();
        let key = (point.trove_manager_id, point.granularity.clone(), point.target_timestamp);
        t.sample_points.insert(key, sample_point_row(id, point));
    }
}

fn col_immutables_row(id: i64, row: NewColImmutables) -> ColImmutablesRow {
    ColImmutablesRow {
        id,
        trove_manager_id: row.trove_manager_id,
        block_number: row.block_number,
        collateral_token: row.collateral_token,
        collateral_decimals: row.collateral_decimals,
        addresses_registry: row.addresses_registry,
        price_feed: row.price_feed,
        active_pool: row.active_pool,
        default_pool: row.default_pool,
        stability_pool: row.stability_pool,
        borrower_operations: row.borrower_operations,
        sorted_troves: row.sorted_troves,
        ccr: row.ccr,
        mcr: row.mcr,
        scr: row.scr,
    }
}

fn sample_point_row(id: i64, point: NewTimeSamplePoint) -> TimeSamplePoint {
    TimeSamplePoint {
        id,
        trove_manager_id: point.trove_manager_id,
        granularity: point.granularity,
        target_timestamp: point.target_timestamp,
        block_number: point.block_number,
        block_timestamp: point.block_timestamp,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_trove_managers(
        &self,
        protocol_id: i32,
        chain: &str,
        managers: &[TroveManagerInfo],
    ) -> IndexerResult<Vec<TroveManager>> {
        self.check_write()?;
        let mut t = self.tables();
        for info in managers {
            let position = t.trove_managers.iter().position(|m| {
                m.protocol_id == protocol_id && m.chain == chain && m.trove_manager_index == info.index
            });
            match position {
                Some(i) => {
                    let m = &mut t.trove_managers[i];
                    m.address = info.address.clone();
                    m.collateral_token = info.collateral_token.clone();
                }
                None => {
                    let id = t.trove_managers.len() as i32 + 1;
                    t.trove_managers.push(TroveManager {
                        id,
                        protocol_id,
                        chain: chain.to_string(),
                        trove_manager_index: info.index,
                        address: info.address.clone(),
                        collateral_token: info.collateral_token.clone(),
                    });
                }
            }
        }
        Ok(t.trove_managers
            .iter()
            .filter(|m| m.protocol_id == protocol_id && m.chain == chain)
            .cloned()
            .collect())
    }

    async fn trove_managers(&self, protocol_id: i32, chain: &str) -> IndexerResult<Vec<TroveManager>> {
        Ok(self
            .tables()
            .trove_managers
            .iter()
            .filter(|m| m.protocol_id == protocol_id && m.chain == chain)
            .cloned()
            .collect())
    }

    async fn record_block(&self, chain: &str, block: BlockRef) -> IndexerResult<()> {
        self.tables()
            .block_timestamps
            .entry((chain.to_string(), block.number))
            .or_insert(block.timestamp);
        Ok(())
    }

    async fn insert_troves(&self, rows: Vec<NewTroveData>, policy: ConflictPolicy) -> IndexerResult<usize> {
        self.check_write()?;
        let mut t = self.tables();
        let mut staged = t.troves.clone();
        let mut written = 0;
        for row in rows {
            let id = t.id();
            let key = (row.trove_manager_id, row.trove_id.clone(), row.block_number);
            let stored = TroveData {
                id,
                trove_manager_id: row.trove_manager_id,
                trove_id: row.trove_id,
                block_number: row.block_number,
                debt: row.debt,
                coll: row.coll,
                stake: row.stake,
                status: row.status,
                annual_interest_rate: row.annual_interest_rate,
                last_debt_update_time: row.last_debt_update_time,
                interest_batch_manager: row.interest_batch_manager,
                batch_debt_shares: row.batch_debt_shares,
            };
            if put(&mut staged, key, stored, policy)? {
                written += 1;
            }
        }
        t.troves = staged;
        Ok(written)
    }

    async fn insert_immutables(
        &self,
        core: NewCoreImmutables,
        collaterals: Vec<NewColImmutables>,
        policy: ConflictPolicy,
    ) -> IndexerResult<usize> {
        self.check_write()?;
        let mut t = self.tables();
        let mut core_staged = t.core_immutables.clone();
        let mut col_staged = t.col_immutables.clone();
        let mut written = 0;
        let id = t.id();
        let core_key = (core.protocol_id, core.chain.clone(), core.block_number);
        let core_row = CoreImmutablesRow {
            id,
            protocol_id: core.protocol_id,
            chain: core.chain,
            block_number: core.block_number,
            collateral_registry: core.collateral_registry,
            bold_token: core.bold_token,
            total_collaterals: core.total_collaterals,
        };
        if put(&mut core_staged, core_key, core_row, policy)? {
            written += 1;
        }
        for row in collaterals {
            let id = t.id();
            let key = (row.trove_manager_id, row.block_number);
            if put(&mut col_staged, key, col_immutables_row(id, row), policy)? {
                written += 1;
            }
        }
        t.core_immutables = core_staged;
        t.col_immutables = col_staged;
        Ok(written)
    }

    async fn latest_immutables_block(&self, protocol_id: i32, chain: &str) -> IndexerResult<Option<i64>> {
        Ok(self
            .tables()
            .core_immutables
            .keys()
            .filter(|(p, c, _)| *p == protocol_id && c == chain)
            .map(|(_, _, block)| *block)
            .max())
    }

    async fn latest_core_immutables(&self, protocol_id: i32, chain: &str) -> IndexerResult<Option<CoreImmutablesRow>> {
        Ok(self
            .tables()
            .core_immutables
            .iter()
            .filter(|((p, c, _), _)| *p == protocol_id && c == chain)
            .max_by_key(|((_, _, block), _)| *block)
            .map(|(_, row)| row.clone()))
    }

    async fn latest_col_immutables(
        &self,
        protocol_id: i32,
        chain: &str,
    ) -> IndexerResult<Vec<(TroveManager, ColImmutablesRow)>> {
        let managers = self.trove_managers(protocol_id, chain).await?;
        let mut out = Vec::new();
        for manager in managers {
            if let Some(row) = self.col_immutables_at(manager.id, i64::MAX).await? {
                out.push((manager, row));
            }
        }
        Ok(out)
    }

    async fn col_immutables_at(&self, trove_manager_id: i32, block: i64) -> IndexerResult<Option<ColImmutablesRow>> {
        Ok(self
            .tables()
            .col_immutables
            .range((trove_manager_id, i64::MIN)..=(trove_manager_id, block))
            .next_back()
            .map(|(_, row)| row.clone()))
    }

    async fn insert_pool_data(
        &self,
        core: NewCorePoolData,
        collaterals: Vec<NewColPoolData>,
        policy: ConflictPolicy,
    ) -> IndexerResult<usize> {
        self.check_write()?;
        let mut t = self.tables();
        let mut core_staged = t.core_pool.clone();
        let mut col_staged = t.col_pool.clone();
        let mut written = 0;
        let id = t.id();
        let core_key = (core.protocol_id, core.chain.clone(), core.block_number);
        let core_row = CorePoolData {
            id,
            protocol_id: core.protocol_id,
            chain: core.chain,
            block_number: core.block_number,
            bold_supply: core.bold_supply,
            base_rate: core.base_rate,
        };
        if put(&mut core_staged, core_key, core_row, policy)? {
            written += 1;
        }
        for row in collaterals {
            let id = t.id();
            let key = (row.trove_manager_id, row.block_number);
            let stored = ColPoolData {
                id,
                trove_manager_id: row.trove_manager_id,
                block_number: row.block_number,
                entire_system_debt: row.entire_system_debt,
                entire_system_coll: row.entire_system_coll,
                sp_deposits: row.sp_deposits,
                sp_coll: row.sp_coll,
                agg_recorded_debt: row.agg_recorded_debt,
                agg_weighted_debt_sum: row.agg_weighted_debt_sum,
                agg_batch_management_fees: row.agg_batch_management_fees,
                trove_count: row.trove_count,
            };
            if put(&mut col_staged, key, stored, policy)? {
                written += 1;
            }
        }
        t.core_pool = core_staged;
        t.col_pool = col_staged;
        Ok(written)
    }

    async fn pool_data_for_blocks(&self, trove_manager_id: i32, blocks: Vec<i64>) -> IndexerResult<Vec<ColPoolData>> {
        let t = self.tables();
        Ok(blocks
            .iter()
            .filter_map(|block| t.col_pool.get(&(trove_manager_id, *block)).cloned())
            .collect())
    }

    async fn insert_events(&self, rows: Vec<NewEventData>, policy: ConflictPolicy) -> IndexerResult<usize> {
        self.check_write()?;
        let mut t = self.tables();
        let mut staged = t.events.clone();
        let mut written = 0;
        // Events are append-only: Update keeps the stored row, as in Postgres.
        let policy = match policy {
            ConflictPolicy::Update => ConflictPolicy::Ignore,
            other => other,
        };
        for row in rows {
            let id = t.id();
            let key = row.dedupe_key();
            let stored = EventData {
                id,
                trove_manager_id: row.trove_manager_id,
                block_number: row.block_number,
                tx_hash: row.tx_hash,
                log_index: row.log_index,
                event_name: row.event_name,
                payload: row.payload,
            };
            if put(&mut staged, key, stored, policy)? {
                written += 1;
            }
        }
        t.events = staged;
        Ok(written)
    }

    async fn recorded_blocks(&self, protocol_id: i32, chain: &str) -> IndexerResult<Option<RecordedBlocks>> {
        Ok(self.tables().recorded_blocks.get(&(protocol_id, chain.to_string())).cloned())
    }

    async fn widen_recorded_blocks(
        &self,
        protocol_id: i32,
        chain: &str,
        start_block: i64,
        end_block: i64,
    ) -> IndexerResult<WatermarkOutcome> {
        self.check_write()?;
        let mut t = self.tables();
        let key = (protocol_id, chain.to_string());
        let outcome = merge_watermark(t.recorded_blocks.get(&key), protocol_id, chain, start_block, end_block)?;
        if !matches!(outcome, WatermarkOutcome::Disjoint(_)) {
            t.recorded_blocks.insert(key, outcome.range().clone());
        }
        Ok(outcome)
    }

    async fn insert_prices(&self, row: NewPricesAndRates, policy: ConflictPolicy) -> IndexerResult<usize> {
        self.check_write()?;
        let mut t = self.tables();
        let id = t.id();
        let key = (row.trove_manager_id, row.block_number);
        let stored = PricesAndRates {
            id,
            trove_manager_id: row.trove_manager_id,
            block_number: row.block_number,
            col_usd_price_feed: row.col_usd_price_feed,
            col_usd_oracle: row.col_usd_oracle,
            canonical_rate: row.canonical_rate,
            underlying_usd_oracle: row.underlying_usd_oracle,
            deviation: row.deviation,
        };
        Ok(put(&mut t.prices, key, stored, policy)? as usize)
    }

    async fn prices_at_block(&self, trove_manager_id: i32, block: i64) -> IndexerResult<Option<PricesAndRates>> {
        Ok(self.tables().prices.get(&(trove_manager_id, block)).cloned())
    }

    async fn prices_for_blocks(&self, trove_manager_id: i32, blocks: Vec<i64>) -> IndexerResult<Vec<PricesAndRates>> {
        let t = self.tables();
        Ok(blocks
            .iter()
            .filter_map(|block| t.prices.get(&(trove_manager_id, *block)).cloned())
            .collect())
    }

    async fn record_sample_point(&self, point: NewTimeSamplePoint) -> IndexerResult<bool> {
        self.check_write()?;
        let mut t = self.tables();
        let key = (point.trove_manager_id, point.granularity.clone(), point.target_timestamp);
        if let Some(stored) = t.sample_points.get(&key) {
            if stored.distance() <= point.distance() {
                return Ok(false);
            }
        }
        let id = t.id();
        t.sample_points.insert(key, sample_point_row(id, point));
        Ok(true)
    }

    async fn sample_points(&self, trove_manager_id: i32, granularity: &str) -> IndexerResult<Vec<TimeSamplePoint>> {
        Ok(self
            .tables()
            .sample_points
            .values()
            .filter(|p| p.trove_manager_id == trove_manager_id && p.granularity == granularity)
            .cloned()
            .collect())
    }

    async fn block_timestamps_between(
        &self,
        chain: &str,
        from_timestamp: i64,
        to_timestamp: i64,
    ) -> IndexerResult<Vec<BlockTimestamp>> {
        Ok(self
            .tables()
            .block_timestamps
            .iter()
            .filter(|((c, _), ts)| c == chain && **ts >= from_timestamp && **ts <= to_timestamp)
            .map(|((c, block), ts)| BlockTimestamp {
                chain: c.clone(),
                block_number: *block,
                timestamp: *ts,
            })
            .collect())
    }

    async fn troves_between_blocks(
        &self,
        trove_manager_id: i32,
        from_block: i64,
        to_block: i64,
    ) -> IndexerResult<Vec<TroveData>> {
        let mut rows: Vec<TroveData> = self
            .tables()
            .troves
            .values()
            .filter(|r| r.trove_manager_id == trove_manager_id && r.block_number >= from_block && r.block_number <= to_block)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.block_number);
        Ok(rows)
    }

    async fn latest_troves(&self, trove_manager_id: i32) -> IndexerResult<Vec<TroveData>> {
        let t = self.tables();
        let latest = t
            .troves
            .values()
            .filter(|r| r.trove_manager_id == trove_manager_id)
            .map(|r| r.block_number)
            .max();
        Ok(t.troves
            .values()
            .filter(|r| r.trove_manager_id == trove_manager_id && Some(r.block_number) == latest)
            .cloned()
            .collect())
    }

    async fn upsert_summary(&self, row: NewTroveDataSummary) -> IndexerResult<()> {
        self.check_write()?;
        let mut t = self.tables();
        let id = t.id();
        let key = (
            row.protocol_id,
            row.chain.clone(),
            row.trove_manager_index,
            row.granularity.clone(),
            row.target_timestamp,
        );
        t.summaries.insert(
            key,
            TroveDataSummary {
                id,
                protocol_id: row.protocol_id,
                chain: row.chain,
                trove_manager_index: row.trove_manager_index,
                granularity: row.granularity,
                target_timestamp: row.target_timestamp,
                status_counts: row.status_counts,
                avg_interest_rate: row.avg_interest_rate,
                avg_collateral_ratio: row.avg_collateral_ratio,
                trove_count: row.trove_count,
                sample_block: row.sample_block,
            },
        );
        Ok(())
    }

    async fn summaries_between(
        &self,
        protocol_id: i32,
        chain: &str,
        trove_manager_index: i32,
        granularity: &str,
        from_timestamp: i64,
        to_timestamp: i64,
    ) -> IndexerResult<Vec<TroveDataSummary>> {
        Ok(self
            .tables()
            .summaries
            .values()
            .filter(|s| {
                s.protocol_id == protocol_id
                    && s.chain == chain
                    && s.trove_manager_index == trove_manager_index
                    && s.granularity == granularity
                    && s.target_timestamp >= from_timestamp
                    && s.target_timestamp <= to_timestamp
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::time_sample_points::Granularity;
    use futures::future::join_all;
    use std::sync::Arc;

    // 13:00 UTC target; blocks at 13:20, 12:50 and 13:05.
    const BLOCKS: [(i64, i64); 3] = [(100, 1_704_200_400 + 1_200), (90, 1_704_200_400 - 600), (95, 1_704_200_400 + 300)];

    #[tokio::test]
    async fn concurrent_sample_points_keep_the_closest_block() {
        let store = Arc::new(MemoryStore::new());
        let writes = BLOCKS.iter().map(|&(number, timestamp)| {
            let store = store.clone();
            async move {
                store
                    .record_sample_point(NewTimeSamplePoint::for_block(1, Granularity::Hour, number, timestamp))
                    .await
            }
        });
        for outcome in join_all(writes).await {
            outcome.unwrap();
        }

        let points = store.sample_points(1, "hour").await.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].block_number, 95);
        assert_eq!(points[0].target_timestamp, 1_704_200_400);
    }

    #[tokio::test]
    async fn equally_distant_sample_does_not_replace() {
        let store = MemoryStore::new();
        let first = NewTimeSamplePoint::for_block(1, Granularity::Hour, 95, 1_704_200_400 + 300);
        let twin = NewTimeSamplePoint::for_block(1, Granularity::Hour, 94, 1_704_200_400 - 300);
        assert!(store.record_sample_point(first).await.unwrap());
        assert!(!store.record_sample_point(twin).await.unwrap());
        assert_eq!(store.sample_points(1, "hour").await.unwrap()[0].block_number, 95);
    }
}
