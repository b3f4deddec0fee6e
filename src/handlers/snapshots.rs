use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tracing::debug;

use super::no_data;
use crate::db::models::immutables::{ColImmutablesRow, CoreImmutablesRow};
use crate::db::models::trove_data::TroveData;
use crate::router::AppState;

#[derive(Serialize, Debug)]
pub struct ImmutablesResponse {
    pub core: CoreImmutablesRow,
    pub collaterals: Vec<ColImmutablesRow>,
}

#[derive(Serialize, Debug)]
pub struct TrovesResponse {
    pub trove_manager_index: i32,
    pub block_number: i64,
    pub troves: Vec<TroveData>,
}

// GET /v0/:protocol_id/:chain/immutables
pub async fn get_latest_immutables(
    State(state): State<AppState>,
    Path((protocol_id, chain)): Path<(i32, String)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    debug!("Fetching latest immutables for protocol {} on {}", protocol_id, chain);

    let core = state
        .store
        .latest_core_immutables(protocol_id, &chain)
        .await
        .map_err(|e| no_data("latest immutables", e))?
        .ok_or_else(|| no_data("latest immutables", "nothing stored"))?;
    let collaterals = state
        .store
        .latest_col_immutables(protocol_id, &chain)
        .await
        .map_err(|e| no_data("latest collateral immutables", e))?
        .into_iter()
        .map(|(_, row)| row)
        .collect();

    Ok(Json(ImmutablesResponse { core, collaterals }))
}

// GET /v0/:protocol_id/:chain/troves/:index
pub async fn get_latest_troves(
    State(state): State<AppState>,
    Path((protocol_id, chain, index)): Path<(i32, String, i32)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    debug!("Fetching latest troves of trove manager {} for protocol {} on {}", index, protocol_id, chain);

    let managers = state
        .store
        .trove_managers(protocol_id, &chain)
        .await
        .map_err(|e| no_data("trove managers", e))?;
    let tm = managers
        .iter()
        .find(|tm| tm.trove_manager_index == index)
        .ok_or_else(|| no_data("latest troves", format!("unknown trove manager {}", index)))?;
    let troves = state
        .store
        .latest_troves(tm.id)
        .await
        .map_err(|e| no_data("latest troves", e))?;
    let block_number = troves
        .first()
        .map(|t| t.block_number)
        .ok_or_else(|| no_data("latest troves", "no snapshot stored"))?;

    Ok(Json(TrovesResponse {
        trove_manager_index: index,
        block_number,
        troves,
    }))
}
