use diesel::prelude::*;
use serde::Serialize;

use crate::db::postgres::schema::trove_managers;
use crate::protocol::TroveManagerInfo;

/// Row id of this table is the `trove_manager_id` every per-collateral table references.
#[derive(Queryable, Identifiable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = trove_managers)]
pub struct TroveManager {
    pub id: i32,
    pub protocol_id: i32,
    pub chain: String,
    pub trove_manager_index: i32,
    pub address: String,
    pub collateral_token: String,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = trove_managers)]
pub struct NewTroveManager {
    pub protocol_id: i32,
    pub chain: String,
    pub trove_manager_index: i32,
    pub address: String,
    pub collateral_token: String,
}

impl NewTroveManager {
    pub fn from_info(protocol_id: i32, chain: &str, info: &TroveManagerInfo) -> Self {
        Self {
            protocol_id,
            chain: chain.to_string(),
            trove_manager_index: info.index,
            address: info.address.clone(),
            collateral_token: info.collateral_token.clone(),
        }
    }
}
