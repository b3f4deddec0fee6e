use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types::{Int4, Int8, Text};

use crate::db::models::time_sample_points::{NewTimeSamplePoint, TimeSamplePoint};
use crate::db::postgres::schema::time_sample_points::dsl::*;

/// Inserts the point, or replaces the stored one only when the new block lies
/// strictly closer to the target. The distance comparison runs inside the
/// upsert, under the row lock taken by ON CONFLICT.
const RECORD_CLOSER: &str = r#"
    INSERT INTO time_sample_points
        (trove_manager_id, granularity, target_timestamp, block_number, block_timestamp)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (trove_manager_id, granularity, target_timestamp) DO UPDATE
    SET block_number = EXCLUDED.block_number,
        block_timestamp = EXCLUDED.block_timestamp
    WHERE abs(EXCLUDED.block_timestamp - EXCLUDED.target_timestamp)
        < abs(time_sample_points.block_timestamp - time_sample_points.target_timestamp)
"#;

fn record_closer_query(row: &NewTimeSamplePoint) -> BoxedSqlQuery<'static, Pg, SqlQuery> {
    diesel::sql_query(RECORD_CLOSER)
        .into_boxed()
        .bind::<Int4, _>(row.trove_manager_id)
        .bind::<Text, _>(row.granularity.clone())
        .bind::<Int8, _>(row.target_timestamp)
        .bind::<Int8, _>(row.block_number)
        .bind::<Int8, _>(row.block_timestamp)
}

/// Returns whether the row was written.
pub fn record_closer(conn: &mut PgConnection, row: &NewTimeSamplePoint) -> QueryResult<bool> {
    Ok(record_closer_query(row).execute(conn)? > 0)
}

pub fn find_all(conn: &mut PgConnection, target_trove_manager: i32, target_granularity: &str) -> QueryResult<Vec<TimeSamplePoint>> {
    time_sample_points
        .filter(trove_manager_id.eq(target_trove_manager))
        .filter(granularity.eq(target_granularity))
        .order(target_timestamp.asc())
        .load(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::time_sample_points::Granularity;
    use diesel::debug_query;

    #[test]
    fn replacement_is_guarded_by_distance_in_the_upsert() {
        let point = NewTimeSamplePoint::for_block(7, Granularity::Hour, 500, 1_704_202_800);
        let sql = debug_query::<Pg, _>(&record_closer_query(&point)).to_string();
        assert!(sql.contains("ON CONFLICT (trove_manager_id, granularity, target_timestamp) DO UPDATE"));
        assert!(sql.contains("WHERE abs(EXCLUDED.block_timestamp - EXCLUDED.target_timestamp)"));
        assert!(sql.contains("< abs(time_sample_points.block_timestamp - time_sample_points.target_timestamp)"));
        assert!(sql.contains("\"hour\""));
    }
}
