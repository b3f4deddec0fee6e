pub mod aggregator;
pub mod backfill;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod logging;
pub mod price;
pub mod protocol;
pub mod retry;
pub mod router;
pub mod snapshot;
