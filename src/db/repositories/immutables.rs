use diesel::dsl::max;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;

use super::BATCH_ROWS;
use crate::db::models::immutables::{ColImmutablesRow, CoreImmutablesRow, NewColImmutables, NewCoreImmutables};
use crate::db::postgres::schema::{core_col_immutables as cci, core_immutables as ci};
use crate::db::ConflictPolicy;

pub fn insert_core(conn: &mut PgConnection, row: &NewCoreImmutables, policy: ConflictPolicy) -> QueryResult<usize> {
    let insert = diesel::insert_into(ci::table).values(row);
    match policy {
        ConflictPolicy::Ignore => insert
            .on_conflict((ci::protocol_id, ci::chain, ci::block_number))
            .do_nothing()
            .execute(conn),
        ConflictPolicy::Update => insert
            .on_conflict((ci::protocol_id, ci::chain, ci::block_number))
            .do_update()
            .set(row)
            .execute(conn),
        ConflictPolicy::Error => insert.execute(conn),
    }
}

pub fn insert_collaterals(conn: &mut PgConnection, rows: &[NewColImmutables], policy: ConflictPolicy) -> QueryResult<usize> {
    let mut written = 0;
    for chunk in rows.chunks(BATCH_ROWS) {
        let insert = diesel::insert_into(cci::table).values(chunk);
        written += match policy {
            ConflictPolicy::Ignore => insert
                .on_conflict((cci::trove_manager_id, cci::block_number))
                .do_nothing()
                .execute(conn)?,
            ConflictPolicy::Update => insert
                .on_conflict((cci::trove_manager_id, cci::block_number))
                .do_update()
                .set((
                    cci::collateral_token.eq(excluded(cci::collateral_token)),
                    cci::collateral_decimals.eq(excluded(cci::collateral_decimals)),
                    cci::addresses_registry.eq(excluded(cci::addresses_registry)),
                    cci::price_feed.eq(excluded(cci::price_feed)),
                    cci::active_pool.eq(excluded(cci::active_pool)),
                    cci::default_pool.eq(excluded(cci::default_pool)),
                    cci::stability_pool.eq(excluded(cci::stability_pool)),
                    cci::borrower_operations.eq(excluded(cci::borrower_operations)),
                    cci::sorted_troves.eq(excluded(cci::sorted_troves)),
                    cci::ccr.eq(excluded(cci::ccr)),
                    cci::mcr.eq(excluded(cci::mcr)),
                    cci::scr.eq(excluded(cci::scr)),
                ))
                .execute(conn)?,
            ConflictPolicy::Error => insert.execute(conn)?,
        };
    }
    Ok(written)
}

pub fn latest_core(conn: &mut PgConnection, target_protocol: i32, target_chain: &str) -> QueryResult<Option<CoreImmutablesRow>> {
    ci::table
        .filter(ci::protocol_id.eq(target_protocol))
        .filter(ci::chain.eq(target_chain))
        .order(ci::block_number.desc())
        .first(conn)
        .optional()
}

pub fn latest_core_block(conn: &mut PgConnection, target_protocol: i32, target_chain: &str) -> QueryResult<Option<i64>> {
    ci::table
        .filter(ci::protocol_id.eq(target_protocol))
        .filter(ci::chain.eq(target_chain))
        .select(max(ci::block_number))
        .first(conn)
}

/// Latest row at or before `block`.
pub fn collateral_at(conn: &mut PgConnection, target_trove_manager: i32, block: i64) -> QueryResult<Option<ColImmutablesRow>> {
    cci::table
        .filter(cci::trove_manager_id.eq(target_trove_manager))
        .filter(cci::block_number.le(block))
        .order(cci::block_number.desc())
        .first(conn)
        .optional()
}
