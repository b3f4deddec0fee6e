use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;

use crate::db::models::trove_managers::{NewTroveManager, TroveManager};
use crate::db::postgres::schema::trove_managers::dsl::*;

/// Inserts or refreshes the roster and returns the stored rows.
pub fn upsert_all(conn: &mut PgConnection, rows: &[NewTroveManager]) -> QueryResult<Vec<TroveManager>> {
    diesel::insert_into(trove_managers)
        .values(rows)
        .on_conflict((protocol_id, chain, trove_manager_index))
        .do_update()
        .set((
            address.eq(excluded(address)),
            collateral_token.eq(excluded(collateral_token)),
        ))
        .get_results(conn)
}

pub fn find_by_protocol(conn: &mut PgConnection, target_protocol: i32, target_chain: &str) -> QueryResult<Vec<TroveManager>> {
    trove_managers
        .filter(protocol_id.eq(target_protocol))
        .filter(chain.eq(target_chain))
        .order(trove_manager_index.asc())
        .load(conn)
}

pub fn find_one(
    conn: &mut PgConnection,
    target_protocol: i32,
    target_chain: &str,
    index: i32,
) -> QueryResult<Option<TroveManager>> {
    trove_managers
        .filter(protocol_id.eq(target_protocol))
        .filter(chain.eq(target_chain))
        .filter(trove_manager_index.eq(index))
        .first(conn)
        .optional()
}
