use diesel::prelude::*;
use serde::Serialize;

use crate::db::postgres::schema::block_timestamps;
use crate::gateway::BlockRef;

#[derive(Queryable, Insertable, Debug, Clone, PartialEq, Eq, Serialize)]
#[diesel(table_name = block_timestamps)]
pub struct BlockTimestamp {
    pub chain: String,
    pub block_number: i64,
    pub timestamp: i64,
}

impl BlockTimestamp {
    pub fn new(chain: &str, block: BlockRef) -> Self {
        Self {
            chain: chain.to_string(),
            block_number: block.number,
            timestamp: block.timestamp,
        }
    }
}
