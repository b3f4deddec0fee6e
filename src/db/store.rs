use async_trait::async_trait;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::Error;
use std::sync::Arc;
use tracing::debug;

use super::models::block_timestamps::BlockTimestamp;
use super::models::event_data::NewEventData;
use super::models::immutables::{ColImmutablesRow, CoreImmutablesRow, NewColImmutables, NewCoreImmutables};
use super::models::pool_data::{ColPoolData, NewColPoolData, NewCorePoolData};
use super::models::prices_and_rates::{NewPricesAndRates, PricesAndRates};
use super::models::recorded_blocks::RecordedBlocks;
use super::models::summaries::{NewTroveDataSummary, TroveDataSummary};
use super::models::time_sample_points::{NewTimeSamplePoint, TimeSamplePoint};
use super::models::trove_data::{NewTroveData, TroveData};
use super::models::trove_managers::{NewTroveManager, TroveManager};
use super::repositories::{self, get_conn, DBPool};
use super::{merge_watermark, ConflictPolicy, Store, WatermarkOutcome};
use crate::error::{IndexerError, IndexerResult};
use crate::gateway::BlockRef;
use crate::protocol::TroveManagerInfo;

/// Postgres-backed [`Store`]. Each call checks a connection out of the pool on
/// a blocking thread; multi-statement writes run in one transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: Arc<DBPool>,
}

impl PgStore {
    pub fn new(pool: Arc<DBPool>) -> Self {
        PgStore { pool }
    }

    async fn run<T, F>(&self, f: F) -> IndexerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, Error> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| IndexerError::Persistence(format!("database task panicked: {}", e)))?
        .map_err(IndexerError::from)
    }

    async fn run_tx<T, F>(&self, f: F) -> IndexerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, Error> + Send + 'static,
    {
        self.run(move |conn| conn.transaction(f)).await
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_trove_managers(
        &self,
        protocol_id: i32,
        chain: &str,
        managers: &[TroveManagerInfo],
    ) -> IndexerResult<Vec<TroveManager>> {
        if managers.is_empty() {
            return self.trove_managers(protocol_id, chain).await;
        }
        let rows: Vec<NewTroveManager> = managers
            .iter()
            .map(|info| NewTroveManager::from_info(protocol_id, chain, info))
            .collect();
        self.run_tx(move |conn| repositories::trove_managers::upsert_all(conn, &rows))
            .await
    }

    async fn trove_managers(&self, protocol_id: i32, chain: &str) -> IndexerResult<Vec<TroveManager>> {
        let chain = chain.to_string();
        self.run(move |conn| repositories::trove_managers::find_by_protocol(conn, protocol_id, &chain))
            .await
    }

    async fn record_block(&self, chain: &str, block: BlockRef) -> IndexerResult<()> {
        let row = BlockTimestamp::new(chain, block);
        self.run(move |conn| repositories::block_timestamps::insert(conn, &row))
            .await
            .map(|_| ())
    }

    async fn insert_troves(&self, rows: Vec<NewTroveData>, policy: ConflictPolicy) -> IndexerResult<usize> {
        self.run_tx(move |conn| repositories::trove_data::insert(conn, &rows, policy))
            .await
    }

    async fn insert_immutables(
        &self,
        core: NewCoreImmutables,
        collaterals: Vec<NewColImmutables>,
        policy: ConflictPolicy,
    ) -> IndexerResult<usize> {
        self.run_tx(move |conn| {
            let core_rows = repositories::immutables::insert_core(conn, &core, policy)?;
            let col_rows = repositories::immutables::insert_collaterals(conn, &collaterals, policy)?;
            Ok(core_rows + col_rows)
        })
        .await
    }

    async fn latest_immutables_block(&self, protocol_id: i32, chain: &str) -> IndexerResult<Option<i64>> {
        let chain = chain.to_string();
        self.run(move |conn| repositories::immutables::latest_core_block(conn, protocol_id, &chain))
            .await
    }

    async fn latest_core_immutables(&self, protocol_id: i32, chain: &str) -> IndexerResult<Option<CoreImmutablesRow>> {
        let chain = chain.to_string();
        self.run(move |conn| repositories::immutables::latest_core(conn, protocol_id, &chain))
            .await
    }

    async fn latest_col_immutables(
        &self,
        protocol_id: i32,
        chain: &str,
    ) -> IndexerResult<Vec<(TroveManager, ColImmutablesRow)>> {
        let chain = chain.to_string();
        self.run(move |conn| {
            let managers = repositories::trove_managers::find_by_protocol(conn, protocol_id, &chain)?;
            let mut out = Vec::with_capacity(managers.len());
            for manager in managers {
                if let Some(row) = repositories::immutables::collateral_at(conn, manager.id, i64::MAX)? {
                    out.push((manager, row));
                }
            }
            Ok(out)
        })
        .await
    }

    async fn col_immutables_at(&self, trove_manager_id: i32, block: i64) -> IndexerResult<Option<ColImmutablesRow>> {
        self.run(move |conn| repositories::immutables::collateral_at(conn, trove_manager_id, block))
            .await
    }

    async fn insert_pool_data(
        &self,
        core: NewCorePoolData,
        collaterals: Vec<NewColPoolData>,
        policy: ConflictPolicy,
    ) -> IndexerResult<usize> {
        self.run_tx(move |conn| {
            let core_rows = repositories::pool_data::insert_core(conn, &core, policy)?;
            let col_rows = repositories::pool_data::insert_collaterals(conn, &collaterals, policy)?;
            Ok(core_rows + col_rows)
        })
        .await
    }

    async fn pool_data_for_blocks(&self, trove_manager_id: i32, blocks: Vec<i64>) -> IndexerResult<Vec<ColPoolData>> {
        self.run(move |conn| repositories::pool_data::find_for_blocks(conn, trove_manager_id, &blocks))
            .await
    }

    async fn insert_events(&self, rows: Vec<NewEventData>, policy: ConflictPolicy) -> IndexerResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.run_tx(move |conn| repositories::event_data::insert(conn, &rows, policy))
            .await
    }

    async fn recorded_blocks(&self, protocol_id: i32, chain: &str) -> IndexerResult<Option<RecordedBlocks>> {
        let chain = chain.to_string();
        self.run(move |conn| repositories::recorded_blocks::find(conn, protocol_id, &chain))
            .await
    }

    async fn widen_recorded_blocks(
        &self,
        protocol_id: i32,
        chain: &str,
        start_block: i64,
        end_block: i64,
    ) -> IndexerResult<WatermarkOutcome> {
        // Validate outside the transaction so a bad range never reaches the database.
        merge_watermark(None, protocol_id, chain, start_block, end_block)?;
        let chain = chain.to_string();
        let outcome = self
            .run_tx(move |conn| {
                let existing = repositories::recorded_blocks::find_for_update(conn, protocol_id, &chain)?;
                let outcome = merge_watermark(existing.as_ref(), protocol_id, &chain, start_block, end_block)
                    .map_err(|e| Error::QueryBuilderError(Box::new(e)))?;
                if !matches!(outcome, WatermarkOutcome::Disjoint(_)) {
                    repositories::recorded_blocks::upsert(conn, outcome.range())?;
                }
                Ok(outcome)
            })
            .await?;
        debug!("watermark for protocol {}: {:?}", protocol_id, outcome);
        Ok(outcome)
    }

    async fn insert_prices(&self, row: NewPricesAndRates, policy: ConflictPolicy) -> IndexerResult<usize> {
        self.run_tx(move |conn| repositories::prices_and_rates::insert(conn, &row, policy))
            .await
    }

    async fn prices_at_block(&self, trove_manager_id: i32, block: i64) -> IndexerResult<Option<PricesAndRates>> {
        self.run(move |conn| repositories::prices_and_rates::find_at_block(conn, trove_manager_id, block))
            .await
    }

    async fn prices_for_blocks(&self, trove_manager_id: i32, blocks: Vec<i64>) -> IndexerResult<Vec<PricesAndRates>> {
        self.run(move |conn| repositories::prices_and_rates::find_for_blocks(conn, trove_manager_id, &blocks))
            .await
    }

    async fn record_sample_point(&self, point: NewTimeSamplePoint) -> IndexerResult<bool> {
        self.run(move |conn| repositories::time_sample_points::record_closer(conn, &point))
            .await
    }

    async fn sample_points(&self, trove_manager_id: i32, granularity: &str) -> IndexerResult<Vec<TimeSamplePoint>> {
        let granularity = granularity.to_string();
        self.run(move |conn| repositories::time_sample_points::find_all(conn, trove_manager_id, &granularity))
            .await
    }

    async fn block_timestamps_between(
        &self,
        chain: &str,
        from_timestamp: i64,
        to_timestamp: i64,
    ) -> IndexerResult<Vec<BlockTimestamp>> {
        let chain = chain.to_string();
        self.run(move |conn| repositories::block_timestamps::find_between(conn, &chain, from_timestamp, to_timestamp))
            .await
    }

    async fn troves_between_blocks(
        &self,
        trove_manager_id: i32,
        from_block: i64,
        to_block: i64,
    ) -> IndexerResult<Vec<TroveData>> {
        self.run(move |conn| repositories::trove_data::find_between_blocks(conn, trove_manager_id, from_block, to_block))
            .await
    }

    async fn latest_troves(&self, trove_manager_id: i32) -> IndexerResult<Vec<TroveData>> {
        self.run(move |conn| repositories::trove_data::latest_snapshot(conn, trove_manager_id))
            .await
    }

    async fn upsert_summary(&self, row: NewTroveDataSummary) -> IndexerResult<()> {
        self.run(move |conn| repositories::summaries::upsert(conn, &row))
            .await
            .map(|_| ())
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
        let chain = chain.to_string();
        let granularity = granularity.to_string();
        self.run(move |conn| {
            repositories::summaries::find_between(
                conn,
                protocol_id,
                &chain,
                trove_manager_index,
                &granularity,
                from_timestamp,
                to_timestamp,
            )
        })
        .await
    }
}
