use diesel::pg::PgConnection;
use diesel::prelude::*;

use crate::db::models::recorded_blocks::RecordedBlocks;
use crate::db::postgres::schema::recorded_blocks::dsl::*;

pub fn find(conn: &mut PgConnection, target_protocol: i32, target_chain: &str) -> QueryResult<Option<RecordedBlocks>> {
    recorded_blocks
        .filter(protocol_id.eq(target_protocol))
        .filter(chain.eq(target_chain))
        .first(conn)
        .optional()
}

/// Same as [`find`] but locks the row for the rest of the transaction.
pub fn find_for_update(
    conn: &mut PgConnection,
    target_protocol: i32,
    target_chain: &str,
) -> QueryResult<Option<RecordedBlocks>> {
    recorded_blocks
        .filter(protocol_id.eq(target_protocol))
        .filter(chain.eq(target_chain))
        .for_update()
        .first(conn)
        .optional()
}

pub fn upsert(conn: &mut PgConnection, row: &RecordedBlocks) -> QueryResult<usize> {
    diesel::insert_into(recorded_blocks)
        .values(row)
        .on_conflict((protocol_id, chain))
        .do_update()
        .set((start_block.eq(row.start_block), end_block.eq(row.end_block)))
        .execute(conn)
}
