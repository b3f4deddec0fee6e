use anyhow::Result;
use bigdecimal::BigDecimal;
use diesel::prelude::*;
use serde::Serialize;

use super::parse_numeric;
use crate::db::postgres::schema::{col_pool_data, core_pool_data};
use crate::protocol::{ColPoolReading, CorePoolReading};

#[derive(Queryable, Identifiable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = col_pool_data)]
pub struct ColPoolData {
    pub id: i64,
    pub trove_manager_id: i32,
    pub block_number: i64,
    pub entire_system_debt: BigDecimal,
    pub entire_system_coll: BigDecimal,
    pub sp_deposits: BigDecimal,
    pub sp_coll: BigDecimal,
    pub agg_recorded_debt: BigDecimal,
    pub agg_weighted_debt_sum: BigDecimal,
    pub agg_batch_management_fees: BigDecimal,
    pub trove_count: i64,
}

#[derive(Insertable, AsChangeset, Debug, Clone, PartialEq)]
#[diesel(table_name = col_pool_data)]
pub struct NewColPoolData {
    pub trove_manager_id: i32,
    pub block_number: i64,
    pub entire_system_debt: BigDecimal,
    pub entire_system_coll: BigDecimal,
    pub sp_deposits: BigDecimal,
    pub sp_coll: BigDecimal,
    pub agg_recorded_debt: BigDecimal,
    pub agg_weighted_debt_sum: BigDecimal,
    pub agg_batch_management_fees: BigDecimal,
    pub trove_count: i64,
}

#[derive(Queryable, Identifiable, Debug, Clone, Serialize)]
#[diesel(table_name = core_pool_data)]
pub struct CorePoolData {
    pub id: i64,
    pub protocol_id: i32,
    pub chain: String,
    pub block_number: i64,
    pub bold_supply: BigDecimal,
    pub base_rate: BigDecimal,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = core_pool_data)]
pub struct NewCorePoolData {
    pub protocol_id: i32,
    pub chain: String,
    pub block_number: i64,
    pub bold_supply: BigDecimal,
    pub base_rate: BigDecimal,
}

impl ColPoolReading {
    pub fn try_map_to_db(&self, trove_manager_id: i32, block_number: i64) -> Result<NewColPoolData> {
        Ok(NewColPoolData {
            trove_manager_id,
            block_number,
            entire_system_debt: parse_numeric(&self.entire_system_debt, "entire_system_debt")?,
            entire_system_coll: parse_numeric(&self.entire_system_coll, "entire_system_coll")?,
            sp_deposits: parse_numeric(&self.sp_deposits, "sp_deposits")?,
            sp_coll: parse_numeric(&self.sp_coll, "sp_coll")?,
            agg_recorded_debt: parse_numeric(&self.agg_recorded_debt, "agg_recorded_debt")?,
            agg_weighted_debt_sum: parse_numeric(&self.agg_weighted_debt_sum, "agg_weighted_debt_sum")?,
            agg_batch_management_fees: parse_numeric(&self.agg_batch_management_fees, "agg_batch_management_fees")?,
            trove_count: self.trove_count,
        })
    }
}

impl CorePoolReading {
    pub fn try_map_to_db(&self, protocol_id: i32, chain: &str, block_number: i64) -> Result<NewCorePoolData> {
        Ok(NewCorePoolData {
            protocol_id,
            chain: chain.to_string(),
            block_number,
            bold_supply: parse_numeric(&self.bold_supply, "bold_supply")?,
            base_rate: parse_numeric(&self.base_rate, "base_rate")?,
        })
    }
}
