use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::aggregator::TimeSampleAggregator;
use crate::db::Store;
use crate::handlers::charts::{get_period_metrics, get_pool_chart, get_price_chart, get_summary_chart};
use crate::handlers::snapshots::{get_latest_immutables, get_latest_troves};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub aggregator: Arc<TimeSampleAggregator>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v0/:protocol_id/:chain/immutables", get(get_latest_immutables))
        .route("/v0/:protocol_id/:chain/troves/:index", get(get_latest_troves))
        .route("/v0/:protocol_id/:chain/pools/:index", get(get_pool_chart))
        .route("/v0/:protocol_id/:chain/prices/:index", get(get_price_chart))
        .route("/v0/:protocol_id/:chain/summaries/:index", get(get_summary_chart))
        .route("/v0/:protocol_id/:chain/metrics/:index", get(get_period_metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
