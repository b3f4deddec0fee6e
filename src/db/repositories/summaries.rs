use diesel::pg::PgConnection;
use diesel::prelude::*;

use crate::db::models::summaries::{NewTroveDataSummary, TroveDataSummary};
use crate::db::postgres::schema::trove_data_summaries::dsl::*;

/// Summaries are derived state: a recomputation replaces the stored row.
pub fn upsert(conn: &mut PgConnection, row: &NewTroveDataSummary) -> QueryResult<usize> {
    diesel::insert_into(trove_data_summaries)
        .values(row)
        .on_conflict((protocol_id, chain, trove_manager_index, granularity, target_timestamp))
        .do_update()
        .set(row)
        .execute(conn)
}

pub fn find_between(
    conn: &mut PgConnection,
    target_protocol: i32,
    target_chain: &str,
    target_index: i32,
    target_granularity: &str,
    from_timestamp: i64,
    to_timestamp: i64,
) -> QueryResult<Vec<TroveDataSummary>> {
    trove_data_summaries
        .filter(protocol_id.eq(target_protocol))
        .filter(chain.eq(target_chain))
        .filter(trove_manager_index.eq(target_index))
        .filter(granularity.eq(target_granularity))
        .filter(target_timestamp.between(from_timestamp, to_timestamp))
        .order(target_timestamp.asc())
        .load(conn)
}
