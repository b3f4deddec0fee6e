use diesel::pg::PgConnection;
use diesel::prelude::*;

use crate::db::models::block_timestamps::BlockTimestamp;
use crate::db::postgres::schema::block_timestamps::dsl::*;

pub fn insert(conn: &mut PgConnection, row: &BlockTimestamp) -> QueryResult<usize> {
    diesel::insert_into(block_timestamps)
        .values(row)
        .on_conflict((chain, block_number))
        .do_nothing()
        .execute(conn)
}

pub fn find_between(
    conn: &mut PgConnection,
    target_chain: &str,
    from_timestamp: i64,
    to_timestamp: i64,
) -> QueryResult<Vec<BlockTimestamp>> {
    block_timestamps
        .filter(chain.eq(target_chain))
        .filter(timestamp.between(from_timestamp, to_timestamp))
        .order(block_number.asc())
        .load(conn)
}

pub fn find_for_blocks(conn: &mut PgConnection, target_chain: &str, blocks: &[i64]) -> QueryResult<Vec<BlockTimestamp>> {
    block_timestamps
        .filter(chain.eq(target_chain))
        .filter(block_number.eq_any(blocks))
        .load(conn)
}
