//! Block-range planning for the event backfill.

use crate::db::models::recorded_blocks::RecordedBlocks;

/// Ranges still to ingest, each adjacent to the stored watermark so a
/// successful run always widens it: forward catch-up to `latest`, then the
/// backfill down to the history horizon.
pub fn plan_ranges(watermark: Option<&RecordedBlocks>, latest: i64, history_blocks: i64) -> Vec<(i64, i64)> {
    let horizon = (latest - history_blocks.max(0)).max(0);
    let Some(current) = watermark else {
        return vec![(horizon, latest)];
    };

    let mut ranges = Vec::new();
    if current.end_block < latest {
        ranges.push((current.end_block + 1, latest));
    }
    if current.start_block > horizon {
        ranges.push((horizon, current.start_block - 1));
    }
    ranges
}

/// Splits `[start, end]` into windows of at most `max_range` blocks, newest first.
pub fn backward_windows(start: i64, end: i64, max_range: i64) -> Vec<(i64, i64)> {
    let size = max_range.max(1);
    let mut windows = Vec::new();
    let mut to = end;
    while to >= start {
        let from = (to - size + 1).max(start);
        windows.push((from, to));
        to = from - 1;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watermark(start: i64, end: i64) -> RecordedBlocks {
        RecordedBlocks { protocol_id: 1, chain: "ethereum".into(), start_block: start, end_block: end }
    }

    #[test]
    fn windows_walk_backward_and_cover_range() {
        assert_eq!(
            backward_windows(1, 250, 100),
            vec![(151, 250), (51, 150), (1, 50)]
        );
        assert_eq!(backward_windows(10, 10, 100), vec![(10, 10)]);
        assert!(backward_windows(11, 10, 100).is_empty());
    }

    #[test]
    fn first_run_reaches_history_horizon() {
        assert_eq!(plan_ranges(None, 1_000, 300), vec![(700, 1_000)]);
        assert_eq!(plan_ranges(None, 100, 300), vec![(0, 100)]);
    }

    #[test]
    fn later_runs_extend_both_edges() {
        let current = watermark(800, 900);
        assert_eq!(plan_ranges(Some(&current), 1_000, 300), vec![(901, 1_000), (700, 799)]);
        let caught_up = watermark(700, 1_000);
        assert!(plan_ranges(Some(&caught_up), 1_000, 300).is_empty());
    }
}
