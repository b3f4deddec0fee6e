use diesel::pg::PgConnection;
use diesel::prelude::*;

use super::BATCH_ROWS;
use crate::db::models::event_data::NewEventData;
use crate::db::postgres::schema::event_data::dsl::*;
use crate::db::ConflictPolicy;

/// Appends events. The log identity `(tx_hash, event_name, log_index)` is
/// unique, so `Ignore` makes re-ingesting a range a no-op. Events are
/// append-only: `Update` behaves like `Ignore`.
pub fn insert(conn: &mut PgConnection, rows: &[NewEventData], policy: ConflictPolicy) -> QueryResult<usize> {
    let mut written = 0;
    for chunk in rows.chunks(BATCH_ROWS) {
        let insert = diesel::insert_into(event_data).values(chunk);
        written += match policy {
            ConflictPolicy::Ignore | ConflictPolicy::Update => insert
                .on_conflict((tx_hash, event_name, log_index))
                .do_nothing()
                .execute(conn)?,
            ConflictPolicy::Error => insert.execute(conn)?,
        };
    }
    Ok(written)
}
