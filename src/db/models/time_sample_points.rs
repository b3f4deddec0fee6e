use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::postgres::schema::time_sample_points;

#[derive(Queryable, Identifiable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = time_sample_points)]
pub struct TimeSamplePoint {
    pub id: i64,
    pub trove_manager_id: i32,
    pub granularity: String,
    pub target_timestamp: i64,
    pub block_number: i64,
    pub block_timestamp: i64,
}

#[derive(Insertable, AsChangeset, Debug, Clone, PartialEq)]
#[diesel(table_name = time_sample_points)]
pub struct NewTimeSamplePoint {
    pub trove_manager_id: i32,
    pub granularity: String,
    pub target_timestamp: i64,
    pub block_number: i64,
    pub block_timestamp: i64,
}

impl NewTimeSamplePoint {
    /// Seconds between the block actually sampled and the target it stands for.
    pub fn distance(&self) -> i64 {
        (self.block_timestamp - self.target_timestamp).abs()
    }
}

impl TimeSamplePoint {
    pub fn distance(&self) -> i64 {
        (self.block_timestamp - self.target_timestamp).abs()
    }
}

/// Bucket size of sample points and summaries. Stored as its `as_str` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
}

impl Granularity {
    pub const ALL: [Granularity; 2] = [Granularity::Hour, Granularity::Day];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Granularity::Hour => 3_600,
            Granularity::Day => 86_400,
        }
    }

    /// Start of the UTC hour or day containing `timestamp`.
    pub fn floor(&self, timestamp: i64) -> i64 {
        timestamp - timestamp.rem_euclid(self.seconds())
    }

    /// Bucket boundary closest to `timestamp`.
    pub fn nearest(&self, timestamp: i64) -> i64 {
        self.floor(timestamp + self.seconds() / 2)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl NewTimeSamplePoint {
    /// Registers the block at `block_timestamp` against the boundary it best represents.
    pub fn for_block(trove_manager_id: i32, granularity: Granularity, block_number: i64, block_timestamp: i64) -> Self {
        Self {
            trove_manager_id,
            granularity: granularity.as_str().to_string(),
            target_timestamp: granularity.nearest(block_timestamp),
            block_number,
            block_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_are_utc_aligned() {
        // 2024-01-02T13:40:00Z
        let ts = 1_704_202_800;
        assert_eq!(Granularity::Hour.floor(ts), 1_704_200_400);
        assert_eq!(Granularity::Hour.nearest(ts), 1_704_204_000);
        assert_eq!(Granularity::Day.floor(ts), 1_704_153_600);
        assert_eq!(Granularity::Day.nearest(ts), 1_704_240_000);
    }

    #[test]
    fn sample_point_targets_nearest_boundary() {
        let point = NewTimeSamplePoint::for_block(1, Granularity::Hour, 500, 1_704_202_800);
        assert_eq!(point.granularity, "hour");
        assert_eq!(point.distance(), 1_200);
    }
}
