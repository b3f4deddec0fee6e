//! Bucketed time series over block-tagged rows, previous-period lookups and
//! chart payloads.
//!
//! Rows are read at whatever block a job happened to run on, so every lookup
//! here goes by timestamp distance, never by row offset.

use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use chrono::DateTime;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::db::models::pool_data::ColPoolData;
use crate::db::models::prices_and_rates::PricesAndRates;
use crate::db::models::summaries::TroveDataSummary;
use crate::db::models::time_sample_points::Granularity;
use crate::price::decimals::scale_down;

/// Largest distance between a point and the timestamp it is used for.
pub const TIMESTAMP_TOLERANCE: i64 = 3_600;

const DAY: i64 = 86_400;

pub type Values = BTreeMap<String, Option<f64>>;

/// One row positioned in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp: i64,
    pub block_number: i64,
    pub values: Values,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    /// Bucket boundary the point represents.
    pub target: i64,
    pub timestamp: i64,
    pub block_number: i64,
    pub values: Values,
}

/// Keeps, per bucket, the reading closest to the bucket boundary. On a tie
/// the reading seen first stays.
pub fn bucket(readings: Vec<Reading>, granularity: Granularity) -> Vec<SeriesPoint> {
    let mut buckets: BTreeMap<i64, SeriesPoint> = BTreeMap::new();
    for reading in readings {
        let target = granularity.nearest(reading.timestamp);
        let distance = (reading.timestamp - target).abs();
        let closer = buckets
            .get(&target)
            .map_or(true, |kept| distance < (kept.timestamp - target).abs());
        if closer {
            buckets.insert(
                target,
                SeriesPoint {
                    target,
                    timestamp: reading.timestamp,
                    block_number: reading.block_number,
                    values: reading.values,
                },
            );
        }
    }
    buckets.into_values().collect()
}

/// Point closest to `timestamp`; the earlier one on a tie.
pub fn nearest(series: &[SeriesPoint], timestamp: i64) -> Option<&SeriesPoint> {
    let mut best: Option<&SeriesPoint> = None;
    for point in series {
        let distance = (point.timestamp - timestamp).abs();
        if best.map_or(true, |b| distance < (b.timestamp - timestamp).abs()) {
            best = Some(point);
        }
    }
    best
}

/// Value of `field` at `timestamp`, or `None` when no point lies within
/// [`TIMESTAMP_TOLERANCE`] of it.
pub fn value_at(series: &[SeriesPoint], field: &str, timestamp: i64) -> Option<f64> {
    let point = nearest(series, timestamp)?;
    if (point.timestamp - timestamp).abs() > TIMESTAMP_TOLERANCE {
        return None;
    }
    point.values.get(field).copied().flatten()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodMetrics {
    pub current: Option<f64>,
    pub previous_1d: Option<f64>,
    pub previous_7d: Option<f64>,
    pub previous_30d: Option<f64>,
}

impl PeriodMetrics {
    pub fn change(&self, previous: Option<f64>) -> Option<f64> {
        Some(self.current? - previous?)
    }
}

/// Latest value of `field` and its values 1, 7 and 30 days before the latest point.
pub fn period_metrics(series: &[SeriesPoint], field: &str) -> PeriodMetrics {
    let Some(latest) = series.iter().max_by_key(|p| p.timestamp) else {
        return PeriodMetrics::default();
    };
    let back = |days: i64| value_at(series, field, latest.timestamp - days * DAY);
    PeriodMetrics {
        current: latest.values.get(field).copied().flatten(),
        previous_1d: back(1),
        previous_7d: back(7),
        previous_30d: back(30),
    }
}

/// Swaps the newest daily point's values for the latest hourly reading, if that is newer.
pub fn replace_latest(daily: &mut [SeriesPoint], hourly: &[SeriesPoint]) {
    let (Some(last), Some(fresh)) = (daily.last_mut(), hourly.iter().max_by_key(|p| p.timestamp)) else {
        return;
    };
    if fresh.timestamp > last.timestamp {
        last.timestamp = fresh.timestamp;
        last.block_number = fresh.block_number;
        last.values = fresh.values.clone();
    }
}

fn date_label(timestamp: i64) -> Value {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| Value::String(dt.format("%Y-%m-%d").to_string()))
        .unwrap_or(Value::Null)
}

/// JSON points with unknown fields left out.
pub fn chart_points(series: &[SeriesPoint]) -> Vec<Value> {
    series
        .iter()
        .map(|point| {
            let mut map = Map::new();
            map.insert("timestamp".into(), point.target.into());
            map.insert("date".into(), date_label(point.target));
            map.insert("blockNumber".into(), point.block_number.into());
            for (field, value) in &point.values {
                if let Some(number) = value.and_then(serde_json::Number::from_f64) {
                    map.insert(field.clone(), Value::Number(number));
                }
            }
            Value::Object(map)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPayload {
    pub protocol_id: i32,
    pub chain: String,
    pub trove_manager_index: i32,
    pub points: Vec<Value>,
}

fn as_f64(value: &BigDecimal, decimals: u32) -> Option<f64> {
    scale_down(value, decimals).to_f64().filter(|v| v.is_finite())
}

pub fn pool_values(row: &ColPoolData, collateral_decimals: u32) -> Values {
    let mut values = Values::new();
    values.insert("entireSystemDebt".into(), as_f64(&row.entire_system_debt, 18));
    values.insert("entireSystemColl".into(), as_f64(&row.entire_system_coll, collateral_decimals));
    values.insert("spDeposits".into(), as_f64(&row.sp_deposits, 18));
    values.insert("spColl".into(), as_f64(&row.sp_coll, collateral_decimals));
    values.insert("aggRecordedDebt".into(), as_f64(&row.agg_recorded_debt, 18));
    values.insert("aggBatchManagementFees".into(), as_f64(&row.agg_batch_management_fees, 18));
    values.insert("troveCount".into(), Some(row.trove_count as f64));
    // Weighted sum is debt times an 18-decimal rate.
    let avg_rate = if row.agg_recorded_debt.is_zero() {
        None
    } else {
        as_f64(&(&row.agg_weighted_debt_sum / &row.agg_recorded_debt), 16)
    };
    values.insert("avgInterestRate".into(), avg_rate);
    values
}

pub fn price_values(row: &PricesAndRates) -> Values {
    let field = |v: &Option<BigDecimal>| v.as_ref().and_then(|d| as_f64(d, 0));
    let mut values = Values::new();
    values.insert("colUSDPriceFeed".into(), field(&row.col_usd_price_feed));
    values.insert("colUSDOracle".into(), field(&row.col_usd_oracle));
    values.insert("canonicalRate".into(), field(&row.canonical_rate));
    values.insert("underlyingUSDOracle".into(), field(&row.underlying_usd_oracle));
    values.insert("deviation".into(), field(&row.deviation));
    values
}

pub fn summary_points(rows: &[TroveDataSummary]) -> Vec<Value> {
    rows.iter()
        .map(|row| {
            let mut map = Map::new();
            map.insert("timestamp".into(), row.target_timestamp.into());
            map.insert("date".into(), date_label(row.target_timestamp));
            map.insert("statusCounts".into(), row.status_counts.clone());
            map.insert("troveCount".into(), row.trove_count.into());
            for (field, value) in [
                ("avgInterestRate", row.avg_interest_rate),
                ("avgCollateralRatio", row.avg_collateral_ratio),
            ] {
                if let Some(number) = value.and_then(serde_json::Number::from_f64) {
                    map.insert(field.into(), Value::Number(number));
                }
            }
            Value::Object(map)
        })
        .collect()
}
