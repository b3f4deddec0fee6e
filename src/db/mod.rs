// Declare database submodules
pub mod models;
pub mod postgres; // Contains schema.rs
pub mod repositories;
pub mod store;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use diesel_migrations::{embed_migrations, EmbeddedMigrations};

use crate::error::{IndexerError, IndexerResult};
use crate::gateway::BlockRef;
use crate::protocol::TroveManagerInfo;
use models::block_timestamps::BlockTimestamp;
use models::event_data::NewEventData;
use models::immutables::{ColImmutablesRow, CoreImmutablesRow, NewColImmutables, NewCoreImmutables};
use models::pool_data::{ColPoolData, NewColPoolData, NewCorePoolData};
use models::prices_and_rates::{NewPricesAndRates, PricesAndRates};
use models::recorded_blocks::RecordedBlocks;
use models::summaries::{NewTroveDataSummary, TroveDataSummary};
use models::time_sample_points::{NewTimeSamplePoint, TimeSamplePoint};
use models::trove_data::{NewTroveData, TroveData};
use models::trove_managers::TroveManager;

pub use repositories::DBPool;
pub use store::PgStore;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// What a batch insert does with rows whose unique key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Keep the stored row. Used by first-time backfills.
    Ignore,
    /// Overwrite the stored row. Used by resyncs.
    Update,
    /// Fail the batch.
    Error,
}

/// Result of widening a backfill watermark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatermarkOutcome {
    Created(RecordedBlocks),
    Widened(RecordedBlocks),
    /// The new range neither overlaps nor touches the stored one; nothing changed.
    Disjoint(RecordedBlocks),
}

impl WatermarkOutcome {
    pub fn range(&self) -> &RecordedBlocks {
        match self {
            WatermarkOutcome::Created(r) | WatermarkOutcome::Widened(r) | WatermarkOutcome::Disjoint(r) => r,
        }
    }
}

/// Widens the stored watermark by `[start_block, end_block]`.
///
/// Overlapping or adjacent ranges merge into their union. A range separated
/// from the stored one by a gap leaves it untouched, so the watermark never
/// claims blocks that were not ingested.
pub fn merge_watermark(
    existing: Option<&RecordedBlocks>,
    protocol_id: i32,
    chain: &str,
    start_block: i64,
    end_block: i64,
) -> IndexerResult<WatermarkOutcome> {
    if start_block > end_block || start_block < 0 {
        return Err(IndexerError::InvalidRange { start: start_block, end: end_block });
    }
    let Some(current) = existing else {
        return Ok(WatermarkOutcome::Created(RecordedBlocks {
            protocol_id,
            chain: chain.to_string(),
            start_block,
            end_block,
        }));
    };
    if end_block < current.start_block - 1 || start_block > current.end_block + 1 {
        return Ok(WatermarkOutcome::Disjoint(current.clone()));
    }
    Ok(WatermarkOutcome::Widened(RecordedBlocks {
        protocol_id,
        chain: chain.to_string(),
        start_block: current.start_block.min(start_block),
        end_block: current.end_block.max(end_block),
    }))
}

/// Persistence seam shared by every writer and by the aggregator.
///
/// Each write method is one logical batch and is applied atomically.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_trove_managers(
        &self,
        protocol_id: i32,
        chain: &str,
        managers: &[TroveManagerInfo],
    ) -> IndexerResult<Vec<TroveManager>>;

    async fn trove_managers(&self, protocol_id: i32, chain: &str) -> IndexerResult<Vec<TroveManager>>;

    async fn record_block(&self, chain: &str, block: BlockRef) -> IndexerResult<()>;

    async fn insert_troves(&self, rows: Vec<NewTroveData>, policy: ConflictPolicy) -> IndexerResult<usize>;

    async fn insert_immutables(
        &self,
        core: NewCoreImmutables,
        collaterals: Vec<NewColImmutables>,
        policy: ConflictPolicy,
    ) -> IndexerResult<usize>;

    async fn latest_immutables_block(&self, protocol_id: i32, chain: &str) -> IndexerResult<Option<i64>>;

    async fn latest_core_immutables(&self, protocol_id: i32, chain: &str) -> IndexerResult<Option<CoreImmutablesRow>>;

    /// Most recent immutables of every trove manager of a protocol/chain.
    async fn latest_col_immutables(
        &self,
        protocol_id: i32,
        chain: &str,
    ) -> IndexerResult<Vec<(TroveManager, ColImmutablesRow)>>;

    /// Immutables in force at `block` (latest row at or before it).
    async fn col_immutables_at(&self, trove_manager_id: i32, block: i64) -> IndexerResult<Option<ColImmutablesRow>>;

    async fn insert_pool_data(
        &self,
        core: NewCorePoolData,
        collaterals: Vec<NewColPoolData>,
        policy: ConflictPolicy,
    ) -> IndexerResult<usize>;

    async fn pool_data_for_blocks(&self, trove_manager_id: i32, blocks: Vec<i64>) -> IndexerResult<Vec<ColPoolData>>;

    async fn insert_events(&self, rows: Vec<NewEventData>, policy: ConflictPolicy) -> IndexerResult<usize>;

    async fn recorded_blocks(&self, protocol_id: i32, chain: &str) -> IndexerResult<Option<RecordedBlocks>>;

    async fn widen_recorded_blocks(
        &self,
        protocol_id: i32,
        chain: &str,
        start_block: i64,
        end_block: i64,
    ) -> IndexerResult<WatermarkOutcome>;

    async fn insert_prices(&self, row: NewPricesAndRates, policy: ConflictPolicy) -> IndexerResult<usize>;

    async fn prices_at_block(&self, trove_manager_id: i32, block: i64) -> IndexerResult<Option<PricesAndRates>>;

    async fn prices_for_blocks(&self, trove_manager_id: i32, blocks: Vec<i64>) -> IndexerResult<Vec<PricesAndRates>>;

    /// Stores `point` unless a sample at least as close to the target exists. Returns whether it was stored.
    async fn record_sample_point(&self, point: NewTimeSamplePoint) -> IndexerResult<bool>;

    async fn sample_points(&self, trove_manager_id: i32, granularity: &str) -> IndexerResult<Vec<TimeSamplePoint>>;

    async fn block_timestamps_between(
        &self,
        chain: &str,
        from_timestamp: i64,
        to_timestamp: i64,
    ) -> IndexerResult<Vec<BlockTimestamp>>;

    async fn troves_between_blocks(
        &self,
        trove_manager_id: i32,
        from_block: i64,
        to_block: i64,
    ) -> IndexerResult<Vec<TroveData>>;

    /// Every trove row of the most recent snapshot block.
    async fn latest_troves(&self, trove_manager_id: i32) -> IndexerResult<Vec<TroveData>>;

    async fn upsert_summary(&self, row: NewTroveDataSummary) -> IndexerResult<()>;

    async fn summaries_between(
        &self,
        protocol_id: i32,
        chain: &str,
        trove_manager_index: i32,
        granularity: &str,
        from_timestamp: i64,
        to_timestamp: i64,
    ) -> IndexerResult<Vec<TroveDataSummary>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(start: i64, end: i64) -> RecordedBlocks {
        RecordedBlocks { protocol_id: 1, chain: "ethereum".into(), start_block: start, end_block: end }
    }

    #[test]
    fn first_range_creates_watermark() {
        let outcome = merge_watermark(None, 1, "ethereum", 100, 200).unwrap();
        assert_eq!(outcome, WatermarkOutcome::Created(stored(100, 200)));
    }

    #[test]
    fn overlapping_and_adjacent_ranges_widen() {
        let current = stored(100, 200);
        let below = merge_watermark(Some(&current), 1, "ethereum", 50, 99).unwrap();
        assert_eq!(below, WatermarkOutcome::Widened(stored(50, 200)));
        let above = merge_watermark(Some(&current), 1, "ethereum", 150, 300).unwrap();
        assert_eq!(above, WatermarkOutcome::Widened(stored(100, 300)));
        let inside = merge_watermark(Some(&current), 1, "ethereum", 120, 130).unwrap();
        assert_eq!(inside.range(), &current);
    }

    #[test]
    fn gap_is_never_claimed() {
        let current = stored(100, 200);
        let outcome = merge_watermark(Some(&current), 1, "ethereum", 500, 600).unwrap();
        assert_eq!(outcome, WatermarkOutcome::Disjoint(current));
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(matches!(
            merge_watermark(None, 1, "ethereum", 10, 5),
            Err(IndexerError::InvalidRange { start: 10, end: 5 })
        ));
    }
}
