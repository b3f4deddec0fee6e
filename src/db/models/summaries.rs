use diesel::prelude::*;
use serde::Serialize;

use crate::db::postgres::schema::trove_data_summaries;

#[derive(Queryable, Identifiable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = trove_data_summaries)]
pub struct TroveDataSummary {
    pub id: i64,
    pub protocol_id: i32,
    pub chain: String,
    pub trove_manager_index: i32,
    pub granularity: String,
    pub target_timestamp: i64,
    pub status_counts: serde_json::Value,
    pub avg_interest_rate: Option<f64>,
    pub avg_collateral_ratio: Option<f64>,
    pub trove_count: i64,
    pub sample_block: Option<i64>,
}

#[derive(Insertable, AsChangeset, Debug, Clone, PartialEq)]
#[diesel(table_name = trove_data_summaries)]
#[diesel(treat_none_as_null = true)]
pub struct NewTroveDataSummary {
    pub protocol_id: i32,
    pub chain: String,
    pub trove_manager_index: i32,
    pub granularity: String,
    pub target_timestamp: i64,
    pub status_counts: serde_json::Value,
    pub avg_interest_rate: Option<f64>,
    pub avg_collateral_ratio: Option<f64>,
    pub trove_count: i64,
    pub sample_block: Option<i64>,
}
