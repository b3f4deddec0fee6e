//! Time-sample aggregator.
//!
//! Turns block-tagged trove snapshots into hourly and daily summary rows. A
//! summary for target `t` uses the sample point nearest to `t`, then for every
//! trove the reading whose block timestamp is nearest to `t` within a day on
//! either side. Distance from `t` decides how much of the summary is trusted:
//! more than an hour is logged, more than a day drops the collateral ratio.

pub mod series;

use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::db::models::summaries::NewTroveDataSummary;
use crate::db::models::time_sample_points::{Granularity, TimeSamplePoint};
use crate::db::models::trove_data::TroveData;
use crate::db::models::trove_managers::TroveManager;
use crate::db::Store;
use crate::error::{IndexerError, IndexerResult};
use crate::logging::{LogContext, LogSink};
use crate::price::decimals::scale_down;
use series::{bucket, chart_points, period_metrics, pool_values, price_values, replace_latest, summary_points};
use series::{ChartPayload, PeriodMetrics, Reading};

const HOUR: i64 = 3_600;
const DAY: i64 = 86_400;
/// Ratios below this are numerically degenerate.
const MIN_COLLATERAL_RATIO: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    /// Between one hour and one day away.
    Stale,
    /// More than a day away, or no sample at all.
    Expired,
}

impl Staleness {
    /// `distance` is the sampled block's `block_timestamp` minus the normalized
    /// target. The sample itself is picked by its `target_timestamp` (see
    /// [`nearest_sample`]), so a sample can be nearest yet still stale.
    pub fn classify(distance: i64) -> Self {
        match distance.abs() {
            d if d <= HOUR => Staleness::Fresh,
            d if d <= DAY => Staleness::Stale,
            _ => Staleness::Expired,
        }
    }
}

/// Sample whose target is closest to `timestamp`; the first one on a tie.
pub fn nearest_sample(samples: &[TimeSamplePoint], timestamp: i64) -> Option<&TimeSamplePoint> {
    let mut best: Option<&TimeSamplePoint> = None;
    for sample in samples {
        let distance = (sample.target_timestamp - timestamp).abs();
        if best.map_or(true, |b| distance < (b.target_timestamp - timestamp).abs()) {
            best = Some(sample);
        }
    }
    best
}

/// One reading per trove: the one whose block timestamp is closest to
/// `timestamp`. Rows at blocks without a known timestamp are ignored.
pub fn nearest_per_trove<'a>(
    rows: &'a [TroveData],
    block_times: &HashMap<i64, i64>,
    timestamp: i64,
) -> Vec<&'a TroveData> {
    let mut kept: BTreeMap<&str, (i64, &TroveData)> = BTreeMap::new();
    for row in rows {
        let Some(block_time) = block_times.get(&row.block_number) else {
            continue;
        };
        let distance = (block_time - timestamp).abs();
        match kept.get(row.trove_id.as_str()) {
            Some((best, _)) if *best <= distance => {}
            _ => {
                kept.insert(row.trove_id.as_str(), (distance, row));
            }
        }
    }
    kept.into_values().map(|(_, row)| row).collect()
}

/// Count of troves per status code, keyed by the code as a string.
pub fn status_histogram(troves: &[&TroveData]) -> Value {
    let mut counts: BTreeMap<i16, i64> = BTreeMap::new();
    for trove in troves {
        *counts.entry(trove.status).or_default() += 1;
    }
    let map: Map<String, Value> = counts.into_iter().map(|(k, v)| (k.to_string(), v.into())).collect();
    Value::Object(map)
}

/// Mean annual rate in percent over troves with a nonzero rate.
pub fn average_interest_rate(troves: &[&TroveData]) -> Option<f64> {
    let rates: Vec<f64> = troves
        .iter()
        .filter(|t| !t.annual_interest_rate.is_zero())
        .filter_map(|t| scale_down(&t.annual_interest_rate, 16).to_f64())
        .collect();
    mean(&rates)
}

/// Mean collateral ratio in percent. `price` is the collateral's USD price.
pub fn average_collateral_ratio(troves: &[&TroveData], price: &BigDecimal, collateral_decimals: u32) -> Option<f64> {
    let hundred = BigDecimal::from(100);
    let ratios: Vec<f64> = troves
        .iter()
        .filter(|t| !t.debt.is_zero())
        .filter_map(|t| {
            let collateral_usd = scale_down(&t.coll, collateral_decimals) * price;
            let debt = scale_down(&t.debt, 18);
            (collateral_usd / debt * &hundred).to_f64()
        })
        .filter(|r| r.is_finite() && *r >= MIN_COLLATERAL_RATIO)
        .collect();
    mean(&ratios)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub struct TimeSampleAggregator {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    log: LogSink,
}

impl TimeSampleAggregator {
    pub fn new(config: Arc<Config>, store: Arc<dyn Store>, log: LogSink) -> Self {
        Self { config, store, log }
    }

    /// Hourly and daily summaries of every trove manager at `target_timestamp`.
    /// A trove manager that fails is logged and skipped.
    pub async fn run(&self, protocol_id: i32, chain: &str, target_timestamp: i64) -> IndexerResult<usize> {
        self.config.protocol(protocol_id)?.deployment(chain)?;
        let ctx = LogContext::new(chain, protocol_id);
        let managers = self.store.trove_managers(protocol_id, chain).await?;

        let mut written = 0;
        for tm in &managers {
            for granularity in Granularity::ALL {
                match self.summarize(&ctx, tm, target_timestamp, granularity).await {
                    Ok(_) => written += 1,
                    Err(e) => self.log.critical(
                        &ctx,
                        "aggregate",
                        format!("trove manager {} {} summary: {}", tm.trove_manager_index, granularity, e),
                    ),
                }
            }
        }
        info!("Wrote {} summaries for protocol {} on {}", written, protocol_id, chain);
        Ok(written)
    }

    pub async fn summarize(
        &self,
        ctx: &LogContext,
        tm: &TroveManager,
        target_timestamp: i64,
        granularity: Granularity,
    ) -> IndexerResult<NewTroveDataSummary> {
        let normalized = granularity.floor(target_timestamp);

        let samples = self.store.sample_points(tm.id, granularity.as_str()).await?;
        let sample = nearest_sample(&samples, normalized);
        let staleness = sample
            .map(|s| Staleness::classify(s.block_timestamp - normalized))
            .unwrap_or(Staleness::Expired);
        match (staleness, sample) {
            (Staleness::Stale, Some(s)) => self.log.missing_values(
                ctx,
                "aggregate",
                format!(
                    "sample for trove manager {} is {}s from {}",
                    tm.trove_manager_index,
                    (s.block_timestamp - normalized).abs(),
                    normalized
                ),
            ),
            (Staleness::Expired, _) => self.log.critical(
                ctx,
                "aggregate",
                format!(
                    "no sample within a day of {} for trove manager {}; collateral ratio unavailable",
                    normalized, tm.trove_manager_index
                ),
            ),
            _ => {}
        }

        let blocks = self
            .store
            .block_timestamps_between(&ctx.chain, normalized - DAY, normalized + DAY)
            .await?;
        let block_times: HashMap<i64, i64> = blocks.iter().map(|b| (b.block_number, b.timestamp)).collect();
        let rows = match (block_times.keys().min(), block_times.keys().max()) {
            (Some(&from), Some(&to)) => self.store.troves_between_blocks(tm.id, from, to).await?,
            _ => {
                self.log
                    .missing_values(ctx, "aggregate", format!("no recorded blocks within a day of {}", normalized));
                Vec::new()
            }
        };
        let troves = nearest_per_trove(&rows, &block_times, normalized);

        let avg_collateral_ratio = match (staleness, sample) {
            (Staleness::Expired, _) | (_, None) => None,
            (_, Some(s)) => self.collateral_ratio(ctx, tm, s.block_number, &troves).await?,
        };

        let summary = NewTroveDataSummary {
            protocol_id: ctx.protocol_id,
            chain: ctx.chain.clone(),
            trove_manager_index: tm.trove_manager_index,
            granularity: granularity.as_str().to_string(),
            target_timestamp: normalized,
            status_counts: status_histogram(&troves),
            avg_interest_rate: average_interest_rate(&troves),
            avg_collateral_ratio,
            trove_count: troves.len() as i64,
            sample_block: sample.map(|s| s.block_number),
        };
        debug!("summary {:?}", summary);
        self.store.upsert_summary(summary.clone()).await?;
        Ok(summary)
    }

    async fn collateral_ratio(
        &self,
        ctx: &LogContext,
        tm: &TroveManager,
        sample_block: i64,
        troves: &[&TroveData],
    ) -> IndexerResult<Option<f64>> {
        let price = self
            .store
            .prices_at_block(tm.id, sample_block)
            .await?
            .and_then(|p| p.col_usd_price_feed.or(p.col_usd_oracle));
        let Some(price) = price else {
            self.log.missing_values(
                ctx,
                "aggregate",
                format!("no collateral price at block {} for trove manager {}", sample_block, tm.trove_manager_index),
            );
            return Ok(None);
        };
        let stored = self
            .store
            .col_immutables_at(tm.id, sample_block)
            .await?
            .and_then(|row| u32::try_from(row.collateral_decimals).ok());
        let Some(decimals) = stored.or_else(|| self.configured_decimals(tm)) else {
            self.log.missing_values(
                ctx,
                "aggregate",
                format!("no immutables at block {} for trove manager {}", sample_block, tm.trove_manager_index),
            );
            return Ok(None);
        };
        Ok(average_collateral_ratio(troves, &price, decimals))
    }

    /// Decimals configured for the trove manager's collateral, used until its
    /// immutables have been snapshotted.
    fn configured_decimals(&self, tm: &TroveManager) -> Option<u32> {
        self.config
            .protocol(tm.protocol_id)
            .ok()?
            .deployment(&tm.chain)
            .ok()?
            .collateral(tm.trove_manager_index)
            .map(|c| c.decimals)
    }

    async fn trove_manager(&self, protocol_id: i32, chain: &str, index: i32) -> IndexerResult<TroveManager> {
        self.store
            .trove_managers(protocol_id, chain)
            .await?
            .into_iter()
            .find(|tm| tm.trove_manager_index == index)
            .ok_or_else(|| {
                IndexerError::Config(format!("protocol {} has no trove manager {} on {}", protocol_id, index, chain))
            })
    }

    async fn block_times(&self, chain: &str, from: i64, to: i64) -> IndexerResult<(Vec<i64>, HashMap<i64, i64>)> {
        let blocks = self.store.block_timestamps_between(chain, from, to).await?;
        let times: HashMap<i64, i64> = blocks.iter().map(|b| (b.block_number, b.timestamp)).collect();
        Ok((blocks.into_iter().map(|b| b.block_number).collect(), times))
    }

    async fn pool_readings(&self, tm: &TroveManager, from: i64, to: i64) -> IndexerResult<Vec<Reading>> {
        let (blocks, times) = self.block_times(&tm.chain, from, to).await?;
        let decimals = self
            .store
            .col_immutables_at(tm.id, i64::MAX)
            .await?
            .and_then(|row| u32::try_from(row.collateral_decimals).ok())
            .or_else(|| self.configured_decimals(tm))
            .unwrap_or(18);
        let rows = self.store.pool_data_for_blocks(tm.id, blocks).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                times.get(&row.block_number).map(|ts| Reading {
                    timestamp: *ts,
                    block_number: row.block_number,
                    values: pool_values(row, decimals),
                })
            })
            .collect())
    }

    async fn price_readings(&self, tm: &TroveManager, from: i64, to: i64) -> IndexerResult<Vec<Reading>> {
        let (blocks, times) = self.block_times(&tm.chain, from, to).await?;
        let rows = self.store.prices_for_blocks(tm.id, blocks).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                times.get(&row.block_number).map(|ts| Reading {
                    timestamp: *ts,
                    block_number: row.block_number,
                    values: price_values(row),
                })
            })
            .collect())
    }

    fn payload(tm: &TroveManager, readings: Vec<Reading>, granularity: Granularity, latest_hourly: bool) -> ChartPayload {
        let hourly = if latest_hourly && granularity == Granularity::Day {
            bucket(readings.clone(), Granularity::Hour)
        } else {
            Vec::new()
        };
        let mut points = bucket(readings, granularity);
        replace_latest(&mut points, &hourly);
        ChartPayload {
            protocol_id: tm.protocol_id,
            chain: tm.chain.clone(),
            trove_manager_index: tm.trove_manager_index,
            points: chart_points(&points),
        }
    }

    /// Pool metrics bucketed by `granularity` over `[from, to]`. With
    /// `latest_hourly`, the newest daily point shows the latest hourly value.
    pub async fn pool_chart(
        &self,
        protocol_id: i32,
        chain: &str,
        index: i32,
        from: i64,
        to: i64,
        granularity: Granularity,
        latest_hourly: bool,
    ) -> IndexerResult<ChartPayload> {
        let tm = self.trove_manager(protocol_id, chain, index).await?;
        let readings = self.pool_readings(&tm, from, to).await?;
        Ok(Self::payload(&tm, readings, granularity, latest_hourly))
    }

    pub async fn price_chart(
        &self,
        protocol_id: i32,
        chain: &str,
        index: i32,
        from: i64,
        to: i64,
        granularity: Granularity,
        latest_hourly: bool,
    ) -> IndexerResult<ChartPayload> {
        let tm = self.trove_manager(protocol_id, chain, index).await?;
        let readings = self.price_readings(&tm, from, to).await?;
        Ok(Self::payload(&tm, readings, granularity, latest_hourly))
    }

    pub async fn summary_chart(
        &self,
        protocol_id: i32,
        chain: &str,
        index: i32,
        from: i64,
        to: i64,
        granularity: Granularity,
    ) -> IndexerResult<ChartPayload> {
        let rows = self
            .store
            .summaries_between(protocol_id, chain, index, granularity.as_str(), from, to)
            .await?;
        Ok(ChartPayload {
            protocol_id,
            chain: chain.to_string(),
            trove_manager_index: index,
            points: summary_points(&rows),
        })
    }

    /// Current value of a pool metric and its values 1, 7 and 30 days earlier.
    pub async fn pool_period_metrics(
        &self,
        protocol_id: i32,
        chain: &str,
        index: i32,
        field: &str,
        now: i64,
    ) -> IndexerResult<PeriodMetrics> {
        let tm = self.trove_manager(protocol_id, chain, index).await?;
        let readings = self.pool_readings(&tm, now - 31 * DAY, now).await?;
        Ok(period_metrics(&bucket(readings, Granularity::Day), field))
    }

    pub async fn price_period_metrics(
        &self,
        protocol_id: i32,
        chain: &str,
        index: i32,
        field: &str,
        now: i64,
    ) -> IndexerResult<PeriodMetrics> {
        let tm = self.trove_manager(protocol_id, chain, index).await?;
        let readings = self.price_readings(&tm, now - 31 * DAY, now).await?;
        Ok(period_metrics(&bucket(readings, Granularity::Day), field))
    }
}
