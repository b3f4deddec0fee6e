use diesel::pg::PgConnection;
use diesel::prelude::*;

use crate::db::models::prices_and_rates::{NewPricesAndRates, PricesAndRates};
use crate::db::postgres::schema::prices_and_rates::dsl::*;
use crate::db::ConflictPolicy;

pub fn insert(conn: &mut PgConnection, row: &NewPricesAndRates, policy: ConflictPolicy) -> QueryResult<usize> {
    let insert = diesel::insert_into(prices_and_rates).values(row);
    match policy {
        ConflictPolicy::Ignore => insert
            .on_conflict((trove_manager_id, block_number))
            .do_nothing()
            .execute(conn),
        ConflictPolicy::Update => insert
            .on_conflict((trove_manager_id, block_number))
            .do_update()
            .set(row)
            .execute(conn),
        ConflictPolicy::Error => insert.execute(conn),
    }
}

pub fn find_at_block(conn: &mut PgConnection, target_trove_manager: i32, block: i64) -> QueryResult<Option<PricesAndRates>> {
    prices_and_rates
        .filter(trove_manager_id.eq(target_trove_manager))
        .filter(block_number.eq(block))
        .first(conn)
        .optional()
}

pub fn find_for_blocks(conn: &mut PgConnection, target_trove_manager: i32, blocks: &[i64]) -> QueryResult<Vec<PricesAndRates>> {
    prices_and_rates
        .filter(trove_manager_id.eq(target_trove_manager))
        .filter(block_number.eq_any(blocks))
        .order(block_number.asc())
        .load(conn)
}

pub fn latest(conn: &mut PgConnection, target_trove_manager: i32) -> QueryResult<Option<PricesAndRates>> {
    prices_and_rates
        .filter(trove_manager_id.eq(target_trove_manager))
        .order(block_number.desc())
        .first(conn)
        .optional()
}
