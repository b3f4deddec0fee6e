use diesel::prelude::*;
use serde::Serialize;

use crate::db::postgres::schema::recorded_blocks;

/// Backfill watermark: the block range of a protocol/chain whose events are stored.
#[derive(Queryable, Insertable, AsChangeset, Debug, Clone, PartialEq, Eq, Serialize)]
#[diesel(table_name = recorded_blocks)]
pub struct RecordedBlocks {
    pub protocol_id: i32,
    pub chain: String,
    pub start_block: i64,
    pub end_block: i64,
}
