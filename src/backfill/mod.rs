//! Historical event indexer.
//!
//! A block range is walked backward in windows no larger than the chain's
//! `max_block_range`. Every window is fetched (with retry) and persisted as
//! one batch before the next, earlier, window is read. The watermark is
//! widened only over blocks whose events are durably stored.

pub mod plan;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, DeploymentConfig};
use crate::db::models::event_data::NewEventData;
use crate::db::models::recorded_blocks::RecordedBlocks;
use crate::db::{ConflictPolicy, Store, WatermarkOutcome};
use crate::error::{IndexerError, IndexerResult};
use crate::gateway::{BlockTag, ChainGateway};
use crate::logging::{Keyword, LogContext, LogSink};
use crate::protocol::{AdapterRegistry, ProtocolAdapter, TroveManagerInfo};
use crate::retry::RetryPolicy;
use plan::{backward_windows, plan_ranges};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillReport {
    pub windows: usize,
    pub events_written: usize,
    pub logs_skipped: usize,
    /// Range abandoned under best-effort mode; never claimed by the watermark.
    pub gap: Option<(i64, i64)>,
    pub watermark: Option<RecordedBlocks>,
}

impl BackfillReport {
    fn absorb(&mut self, other: BackfillReport) {
        self.windows += other.windows;
        self.events_written += other.events_written;
        self.logs_skipped += other.logs_skipped;
        self.gap = self.gap.or(other.gap);
        if other.watermark.is_some() {
            self.watermark = other.watermark;
        }
    }
}

pub struct EventIndexer {
    config: Arc<Config>,
    gateway: Arc<dyn ChainGateway>,
    store: Arc<dyn Store>,
    adapters: AdapterRegistry,
    log: LogSink,
    best_effort: bool,
}

impl EventIndexer {
    pub fn new(
        config: Arc<Config>,
        gateway: Arc<dyn ChainGateway>,
        store: Arc<dyn Store>,
        adapters: AdapterRegistry,
        log: LogSink,
    ) -> Self {
        let best_effort = config.best_effort;
        Self {
            config,
            gateway,
            store,
            adapters,
            log,
            best_effort,
        }
    }

    pub fn best_effort(mut self, enabled: bool) -> Self {
        self.best_effort = enabled;
        self
    }

    /// Plans the outstanding ranges from the stored watermark and indexes them.
    pub async fn run(&self, protocol_id: i32, chain: &str) -> IndexerResult<BackfillReport> {
        let chain_cfg = self.config.chain(chain)?;
        let retry = RetryPolicy::from_settings(&self.config.retry, chain_cfg.timeout_secs);
        let latest = retry
            .run("latest_block", || async { Ok(self.gateway.latest_block(chain).await?) })
            .await?;
        self.store.record_block(chain, latest).await?;

        let watermark = self.store.recorded_blocks(protocol_id, chain).await?;
        let ranges = plan_ranges(watermark.as_ref(), latest.number, self.config.default_history_blocks);
        let mut report = BackfillReport {
            watermark,
            ..Default::default()
        };
        for (start, end) in ranges {
            let partial = self
                .index_range(protocol_id, chain, start, end, ConflictPolicy::Ignore)
                .await?;
            let abandoned = partial.gap.is_some();
            report.absorb(partial);
            if abandoned {
                break;
            }
        }
        Ok(report)
    }

    /// Re-reads every event from the block produced at `timestamp` up to the
    /// latest block, e.g. `policy = Update` for a resync.
    pub async fn run_since(
        &self,
        protocol_id: i32,
        chain: &str,
        timestamp: i64,
        policy: ConflictPolicy,
    ) -> IndexerResult<BackfillReport> {
        let chain_cfg = self.config.chain(chain)?;
        let retry = RetryPolicy::from_settings(&self.config.retry, chain_cfg.timeout_secs);
        let latest = retry
            .run("latest_block", || async { Ok(self.gateway.latest_block(chain).await?) })
            .await?;
        let start = retry
            .run("block_for_timestamp", || async {
                Ok(self.gateway.block_for_timestamp(chain, timestamp).await?)
            })
            .await?;
        self.store.record_block(chain, latest).await?;
        self.store.record_block(chain, start).await?;
        self.index_range(protocol_id, chain, start.number, latest.number, policy).await
    }

    /// Ingests every protocol event in `[start, end]`.
    pub async fn index_range(
        &self,
        protocol_id: i32,
        chain: &str,
        start: i64,
        end: i64,
        policy: ConflictPolicy,
    ) -> IndexerResult<BackfillReport> {
        if start > end || start < 0 {
            return Err(IndexerError::InvalidRange { start, end });
        }
        let ctx = LogContext::new(chain, protocol_id);
        let protocol = self.config.protocol(protocol_id)?;
        let deployment = protocol.deployment(chain)?;
        let chain_cfg = self.config.chain(chain)?;
        let adapter = self.adapters.get(protocol.kind)?;
        let retry = RetryPolicy::from_settings(&self.config.retry, chain_cfg.timeout_secs);

        let managers = self.roster(protocol_id, chain, adapter.as_ref(), deployment, &retry).await?;
        let ids: HashMap<i32, i32> = managers.iter().map(|(info, id)| (info.index, *id)).collect();
        let infos: Vec<TroveManagerInfo> = managers.into_iter().map(|(info, _)| info).collect();

        let mut report = BackfillReport::default();
        let mut covered_from = end + 1;
        for (from, to) in backward_windows(start, end, chain_cfg.max_block_range) {
            match self
                .index_window(&ctx, &retry, adapter.as_ref(), &infos, &ids, from, to, policy)
                .await
            {
                Ok((written, skipped)) => {
                    report.windows += 1;
                    report.events_written += written;
                    report.logs_skipped += skipped;
                    covered_from = from;
                }
                Err(e) if self.best_effort => {
                    let keyword = if e.is_timeout() { Keyword::Timeout } else { Keyword::MissingBlocks };
                    self.log.log(
                        &ctx,
                        "backfill",
                        keyword,
                        format!("window [{}, {}] failed, skipping {} below block {}: {}", from, to, chain, to + 1, e),
                    );
                    report.gap = Some((start, to));
                    break;
                }
                Err(e) => {
                    self.log.critical(&ctx, "backfill", format!("window [{}, {}] failed: {}", from, to, e));
                    return Err(e);
                }
            }
        }

        if covered_from <= end {
            let outcome = retry
                .run("widen_recorded_blocks", || {
                    self.store.widen_recorded_blocks(protocol_id, chain, covered_from, end)
                })
                .await?;
            if let WatermarkOutcome::Disjoint(current) = &outcome {
                self.log.log(
                    &ctx,
                    "backfill",
                    Keyword::MissingBlocks,
                    format!(
                        "[{}, {}] is not contiguous with recorded [{}, {}]; watermark unchanged",
                        covered_from, end, current.start_block, current.end_block
                    ),
                );
            }
            report.watermark = Some(outcome.range().clone());
        }

        info!(
            "Backfilled {} events in {} windows over [{}, {}] on {}",
            report.events_written, report.windows, start, end, chain
        );
        Ok(report)
    }

    /// Stored roster with row ids, read from chain and stored on first use.
    async fn roster(
        &self,
        protocol_id: i32,
        chain: &str,
        adapter: &dyn ProtocolAdapter,
        deployment: &DeploymentConfig,
        retry: &RetryPolicy,
    ) -> IndexerResult<Vec<(TroveManagerInfo, i32)>> {
        let mut stored = self.store.trove_managers(protocol_id, chain).await?;
        if stored.is_empty() {
            let fetched = retry
                .run("fetch_trove_managers", || async {
                    Ok(adapter
                        .fetch_trove_managers(self.gateway.as_ref(), chain, deployment, BlockTag::Latest)
                        .await?)
                })
                .await?;
            stored = self.store.upsert_trove_managers(protocol_id, chain, &fetched).await?;
        }
        Ok(stored
            .into_iter()
            .map(|tm| {
                let id = tm.id;
                (
                    TroveManagerInfo {
                        index: tm.trove_manager_index,
                        address: tm.address,
                        collateral_token: tm.collateral_token,
                    },
                    id,
                )
            })
            .collect())
    }

    #[allow(clippy::too_many_arguments)]
    async fn index_window(
        &self,
        ctx: &LogContext,
        retry: &RetryPolicy,
        adapter: &dyn ProtocolAdapter,
        managers: &[TroveManagerInfo],
        ids: &HashMap<i32, i32>,
        from: i64,
        to: i64,
        policy: ConflictPolicy,
    ) -> IndexerResult<(usize, usize)> {
        let chain = ctx.chain.as_str();
        let batch = retry
            .run("fetch_events", || async {
                Ok(adapter
                    .fetch_events(self.gateway.as_ref(), chain, managers, from, to)
                    .await?)
            })
            .await?;

        for skipped in &batch.skipped {
            warn!("Skipping unparsable log on {}: {}", chain, skipped);
        }

        let mut rows: Vec<NewEventData> = Vec::with_capacity(batch.events.len());
        for event in &batch.events {
            match ids.get(&event.trove_manager_index) {
                Some(id) => rows.push(event.map_to_db(*id)),
                None => self.log.missing_values(
                    ctx,
                    "backfill",
                    format!("event {} from unknown trove manager {}", event.tx_hash, event.trove_manager_index),
                ),
            }
        }

        let written = retry
            .run("insert_events", || self.store.insert_events(rows.clone(), policy))
            .await?;
        Ok((written, batch.skipped.len()))
    }
}
