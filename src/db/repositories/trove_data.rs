use diesel::dsl::max;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;

use super::BATCH_ROWS;
use crate::db::models::trove_data::{NewTroveData, TroveData};
use crate::db::postgres::schema::trove_data::dsl::*;
use crate::db::ConflictPolicy;

pub fn insert(conn: &mut PgConnection, rows: &[NewTroveData], policy: ConflictPolicy) -> QueryResult<usize> {
    let mut written = 0;
    for chunk in rows.chunks(BATCH_ROWS) {
        let insert = diesel::insert_into(trove_data).values(chunk);
        written += match policy {
            ConflictPolicy::Ignore => insert
                .on_conflict((trove_manager_id, trove_id, block_number))
                .do_nothing()
                .execute(conn)?,
            ConflictPolicy::Update => insert
                .on_conflict((trove_manager_id, trove_id, block_number))
                .do_update()
                .set((
                    debt.eq(excluded(debt)),
                    coll.eq(excluded(coll)),
                    stake.eq(excluded(stake)),
                    status.eq(excluded(status)),
                    annual_interest_rate.eq(excluded(annual_interest_rate)),
                    last_debt_update_time.eq(excluded(last_debt_update_time)),
                    interest_batch_manager.eq(excluded(interest_batch_manager)),
                    batch_debt_shares.eq(excluded(batch_debt_shares)),
                ))
                .execute(conn)?,
            ConflictPolicy::Error => insert.execute(conn)?,
        };
    }
    Ok(written)
}

pub fn find_between_blocks(
    conn: &mut PgConnection,
    target_trove_manager: i32,
    from_block: i64,
    to_block: i64,
) -> QueryResult<Vec<TroveData>> {
    trove_data
        .filter(trove_manager_id.eq(target_trove_manager))
        .filter(block_number.between(from_block, to_block))
        .order(block_number.asc())
        .load(conn)
}

/// Every trove at the most recent snapshot block of a trove manager.
pub fn latest_snapshot(conn: &mut PgConnection, target_trove_manager: i32) -> QueryResult<Vec<TroveData>> {
    let latest_block: Option<i64> = trove_data
        .filter(trove_manager_id.eq(target_trove_manager))
        .select(max(block_number))
        .first(conn)?;
    match latest_block {
        Some(block) => trove_data
            .filter(trove_manager_id.eq(target_trove_manager))
            .filter(block_number.eq(block))
            .order(trove_id.asc())
            .load(conn),
        None => Ok(Vec::new()),
    }
}
