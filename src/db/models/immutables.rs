use anyhow::Result;
use bigdecimal::BigDecimal;
use diesel::prelude::*;
use serde::Serialize;

use super::parse_numeric;
use crate::db::postgres::schema::{core_col_immutables, core_immutables};
use crate::protocol::{ColImmutables, CoreImmutables};

#[derive(Queryable, Identifiable, Debug, Clone, Serialize)]
#[diesel(table_name = core_immutables)]
pub struct CoreImmutablesRow {
    pub id: i64,
    pub protocol_id: i32,
    pub chain: String,
    pub block_number: i64,
    pub collateral_registry: String,
    pub bold_token: String,
    pub total_collaterals: i32,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = core_immutables)]
pub struct NewCoreImmutables {
    pub protocol_id: i32,
    pub chain: String,
    pub block_number: i64,
    pub collateral_registry: String,
    pub bold_token: String,
    pub total_collaterals: i32,
}

#[derive(Queryable, Identifiable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = core_col_immutables)]
pub struct ColImmutablesRow {
    pub id: i64,
    pub trove_manager_id: i32,
    pub block_number: i64,
    pub collateral_token: String,
    pub collateral_decimals: i32,
    pub addresses_registry: String,
    pub price_feed: String,
    pub active_pool: String,
    pub default_pool: String,
    pub stability_pool: String,
    pub borrower_operations: String,
    pub sorted_troves: String,
    pub ccr: BigDecimal,
    pub mcr: BigDecimal,
    pub scr: BigDecimal,
}

#[derive(Insertable, AsChangeset, Debug, Clone, PartialEq)]
#[diesel(table_name = core_col_immutables)]
pub struct NewColImmutables {
    pub trove_manager_id: i32,
    pub block_number: i64,
    pub collateral_token: String,
    pub collateral_decimals: i32,
    pub addresses_registry: String,
    pub price_feed: String,
    pub active_pool: String,
    pub default_pool: String,
    pub stability_pool: String,
    pub borrower_operations: String,
    pub sorted_troves: String,
    pub ccr: BigDecimal,
    pub mcr: BigDecimal,
    pub scr: BigDecimal,
}

impl CoreImmutables {
    pub fn map_to_db(&self, protocol_id: i32, chain: &str, block_number: i64) -> NewCoreImmutables {
        NewCoreImmutables {
            protocol_id,
            chain: chain.to_string(),
            block_number,
            collateral_registry: self.collateral_registry.clone(),
            bold_token: self.bold_token.to_lowercase(),
            total_collaterals: self.total_collaterals,
        }
    }
}

impl ColImmutables {
    pub fn try_map_to_db(&self, trove_manager_id: i32, block_number: i64) -> Result<NewColImmutables> {
        Ok(NewColImmutables {
            trove_manager_id,
            block_number,
            collateral_token: self.collateral_token.to_lowercase(),
            collateral_decimals: self.collateral_decimals,
            addresses_registry: self.addresses_registry.to_lowercase(),
            price_feed: self.price_feed.to_lowercase(),
            active_pool: self.active_pool.to_lowercase(),
            default_pool: self.default_pool.to_lowercase(),
            stability_pool: self.stability_pool.to_lowercase(),
            borrower_operations: self.borrower_operations.to_lowercase(),
            sorted_troves: self.sorted_troves.to_lowercase(),
            ccr: parse_numeric(&self.ccr, "ccr")?,
            mcr: parse_numeric(&self.mcr, "mcr")?,
            scr: parse_numeric(&self.scr, "scr")?,
        })
    }
}
