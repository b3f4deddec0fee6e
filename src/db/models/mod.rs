// Declare model modules
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

use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use std::str::FromStr;

/// Parses a decimal string read from chain into a NUMERIC value.
pub(crate) fn parse_numeric(value: &str, field: &str) -> Result<BigDecimal> {
    BigDecimal::from_str(value).with_context(|| format!("Failed to convert {} ({}) to BigDecimal", field, value))
}
