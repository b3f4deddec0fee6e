use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use super::no_data;
use crate::db::models::time_sample_points::Granularity;
use crate::router::AppState;

const DEFAULT_SPAN: i64 = 30 * 86_400;

#[derive(Deserialize, Debug, Default)]
pub struct RangeQuery {
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub granularity: Option<Granularity>,
    /// Replace the newest daily point with the latest hourly reading.
    #[serde(default)]
    pub latest_hourly: bool,
}

impl RangeQuery {
    fn resolve(&self) -> (i64, i64, Granularity) {
        let to = self.to.unwrap_or_else(|| Utc::now().timestamp());
        let from = self.from.unwrap_or(to - DEFAULT_SPAN);
        (from, to, self.granularity.unwrap_or(Granularity::Day))
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricSource {
    Pool,
    Price,
}

#[derive(Deserialize, Debug)]
pub struct MetricQuery {
    pub field: String,
    pub source: MetricSource,
}

type ChartPath = Path<(i32, String, i32)>;

// GET /v0/:protocol_id/:chain/pools/:index
pub async fn get_pool_chart(
    State(state): State<AppState>,
    Path((protocol_id, chain, index)): ChartPath,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (from, to, granularity) = query.resolve();
    debug!("Pool chart for {}/{}/{} in [{}, {}]", protocol_id, chain, index, from, to);
    state
        .aggregator
        .pool_chart(protocol_id, &chain, index, from, to, granularity, query.latest_hourly)
        .await
        .map(Json)
        .map_err(|e| no_data("pool chart", e))
}

// GET /v0/:protocol_id/:chain/prices/:index
pub async fn get_price_chart(
    State(state): State<AppState>,
    Path((protocol_id, chain, index)): ChartPath,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (from, to, granularity) = query.resolve();
    debug!("Price chart for {}/{}/{} in [{}, {}]", protocol_id, chain, index, from, to);
    state
        .aggregator
        .price_chart(protocol_id, &chain, index, from, to, granularity, query.latest_hourly)
        .await
        .map(Json)
        .map_err(|e| no_data("price chart", e))
}

// GET /v0/:protocol_id/:chain/summaries/:index
pub async fn get_summary_chart(
    State(state): State<AppState>,
    Path((protocol_id, chain, index)): ChartPath,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (from, to, granularity) = query.resolve();
    let chart = state
        .aggregator
        .summary_chart(protocol_id, &chain, index, from, to, granularity)
        .await
        .map_err(|e| no_data("summary chart", e))?;
    if chart.points.is_empty() {
        return Err(no_data("summary chart", "no summaries in range"));
    }
    Ok(Json(chart))
}

// GET /v0/:protocol_id/:chain/metrics/:index?field=..&source=pool|price
pub async fn get_period_metrics(
    State(state): State<AppState>,
    Path((protocol_id, chain, index)): ChartPath,
    Query(query): Query<MetricQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let now = Utc::now().timestamp();
    let metrics = match query.source {
        MetricSource::Pool => {
            state
                .aggregator
                .pool_period_metrics(protocol_id, &chain, index, &query.field, now)
                .await
        }
        MetricSource::Price => {
            state
                .aggregator
                .price_period_metrics(protocol_id, &chain, index, &query.field, now)
                .await
        }
    }
    .map_err(|e| no_data("period metrics", e))?;
    Ok(Json(metrics))
}
