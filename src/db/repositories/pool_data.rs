use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;

use super::BATCH_ROWS;
use crate::db::models::pool_data::{ColPoolData, NewColPoolData, NewCorePoolData};
use crate::db::postgres::schema::{col_pool_data as cpd, core_pool_data as core};
use crate::db::ConflictPolicy;

pub fn insert_core(conn: &mut PgConnection, row: &NewCorePoolData, policy: ConflictPolicy) -> QueryResult<usize> {
    let insert = diesel::insert_into(core::table).values(row);
    match policy {
        ConflictPolicy::Ignore => insert
            .on_conflict((core::protocol_id, core::chain, core::block_number))
            .do_nothing()
            .execute(conn),
        ConflictPolicy::Update => insert
            .on_conflict((core::protocol_id, core::chain, core::block_number))
            .do_update()
            .set(row)
            .execute(conn),
        ConflictPolicy::Error => insert.execute(conn),
    }
}

pub fn insert_collaterals(conn: &mut PgConnection, rows: &[NewColPoolData], policy: ConflictPolicy) -> QueryResult<usize> {
    let mut written = 0;
    for chunk in rows.chunks(BATCH_ROWS) {
        let insert = diesel::insert_into(cpd::table).values(chunk);
        written += match policy {
            ConflictPolicy::Ignore => insert
                .on_conflict((cpd::trove_manager_id, cpd::block_number))
                .do_nothing()
                .execute(conn)?,
            ConflictPolicy::Update => insert
                .on_conflict((cpd::trove_manager_id, cpd::block_number))
                .do_update()
                .set((
                    cpd::entire_system_debt.eq(excluded(cpd::entire_system_debt)),
                    cpd::entire_system_coll.eq(excluded(cpd::entire_system_coll)),
                    cpd::sp_deposits.eq(excluded(cpd::sp_deposits)),
                    cpd::sp_coll.eq(excluded(cpd::sp_coll)),
                    cpd::agg_recorded_debt.eq(excluded(cpd::agg_recorded_debt)),
                    cpd::agg_weighted_debt_sum.eq(excluded(cpd::agg_weighted_debt_sum)),
                    cpd::agg_batch_management_fees.eq(excluded(cpd::agg_batch_management_fees)),
                    cpd::trove_count.eq(excluded(cpd::trove_count)),
                ))
                .execute(conn)?,
            ConflictPolicy::Error => insert.execute(conn)?,
        };
    }
    Ok(written)
}

pub fn find_for_blocks(conn: &mut PgConnection, target_trove_manager: i32, blocks: &[i64]) -> QueryResult<Vec<ColPoolData>> {
    cpd::table
        .filter(cpd::trove_manager_id.eq(target_trove_manager))
        .filter(cpd::block_number.eq_any(blocks))
        .order(cpd::block_number.asc())
        .load(conn)
}

pub fn latest(conn: &mut PgConnection, target_trove_manager: i32) -> QueryResult<Option<ColPoolData>> {
    cpd::table
        .filter(cpd::trove_manager_id.eq(target_trove_manager))
        .order(cpd::block_number.desc())
        .first(conn)
        .optional()
}
