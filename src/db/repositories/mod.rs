use diesel::r2d2::{self, ConnectionManager, PooledConnection};
use diesel::pg::PgConnection;
use diesel::result::Error;

// Define the common DBPool type alias, making it available to submodules
pub type DBPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Rows per INSERT statement; keeps batches under Postgres' bind-parameter limit.
pub(crate) const BATCH_ROWS: usize = 1_000;

// Declare the repository implementation modules
pub mod block_timestamps;
pub mod event_data;
pub mod immutables;
pub mod pool_data;
pub mod prices_and_rates;
pub mod recorded_blocks;
pub mod summaries;
pub mod time_sample_points;
pub mod trove_data;
pub mod trove_managers;

pub fn get_conn(pool: &DBPool) -> Result<PooledConnection<ConnectionManager<PgConnection>>, Error> {
    pool.get().map_err(|e| Error::DatabaseError(diesel::result::DatabaseErrorKind::UnableToSendCommand, Box::new(format!("Failed to get DB connection: {}", e))))
}
