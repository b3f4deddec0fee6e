use anyhow::Result;
use bigdecimal::BigDecimal;
use diesel::prelude::*;
use serde::Serialize;

use super::parse_numeric;
use crate::db::postgres::schema::trove_data;
use crate::protocol::TroveReading;

#[derive(Queryable, Identifiable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = trove_data)]
pub struct TroveData {
    pub id: i64,
    pub trove_manager_id: i32,
    pub trove_id: String,
    pub block_number: i64,
    pub debt: BigDecimal,
    pub coll: BigDecimal,
    pub stake: BigDecimal,
    pub status: i16,
    pub annual_interest_rate: BigDecimal,
    pub last_debt_update_time: i64,
    pub interest_batch_manager: Option<String>,
    pub batch_debt_shares: BigDecimal,
}

#[derive(Insertable, AsChangeset, Debug, Clone, PartialEq)]
#[diesel(table_name = trove_data)]
pub struct NewTroveData {
    pub trove_manager_id: i32,
    pub trove_id: String,
    pub block_number: i64,
    pub debt: BigDecimal,
    pub coll: BigDecimal,
    pub stake: BigDecimal,
    pub status: i16,
    pub annual_interest_rate: BigDecimal,
    pub last_debt_update_time: i64,
    pub interest_batch_manager: Option<String>,
    pub batch_debt_shares: BigDecimal,
}

impl TroveReading {
    pub fn try_map_to_db(&self, trove_manager_id: i32, block_number: i64) -> Result<NewTroveData> {
        Ok(NewTroveData {
            trove_manager_id,
            trove_id: self.trove_id.clone(),
            block_number,
            debt: parse_numeric(&self.debt, "debt")?,
            coll: parse_numeric(&self.coll, "coll")?,
            stake: parse_numeric(&self.stake, "stake")?,
            status: self.status as i16,
            annual_interest_rate: parse_numeric(&self.annual_interest_rate, "annual_interest_rate")?,
            last_debt_update_time: self.last_debt_update_time,
            interest_batch_manager: self.interest_batch_manager.clone(),
            batch_debt_shares: parse_numeric(&self.batch_debt_shares, "batch_debt_shares")?,
        })
    }
}
