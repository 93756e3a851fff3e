//! Time-bucket downsampling.
//!
//! The window `[start, end]` is split into `max_points` equal-width buckets
//! and the first row of each non-empty bucket is kept. The result is
//! ascending by `ts`, never contains two rows with the same `ts`, and only
//! depends on its input.

use airqmon_types::Measurement;

/// Collapse rows sharing a timestamp to the one with the lowest id.
///
/// `rows` must be ordered by `ts`, then `id`.
pub fn dedupe_timestamps(mut rows: Vec<Measurement>) -> Vec<Measurement> {
    rows.dedup_by_key(|m| m.ts);
    rows
}

/// Bucket index of `ts` in a window of `buckets` buckets.
fn bucket_of(ts: i64, start: i64, end: i64, buckets: usize) -> usize {
    let span = i128::from(end) - i128::from(start) + 1;
    let offset = (i128::from(ts) - i128::from(start)).clamp(0, span - 1);
    let idx = offset * buckets as i128 / span;
    (idx as usize).min(buckets.saturating_sub(1))
}

/// Reduce `rows` to at most `max_points` rows over `[start, end]`.
///
/// `rows` must be ordered by `ts`, then `id`, and lie within the window.
/// Rows sharing a timestamp are collapsed first; if what remains fits in
/// `max_points` it is returned unchanged.
pub fn downsample(
    rows: Vec<Measurement>,
    start: i64,
    end: i64,
    max_points: usize,
) -> Vec<Measurement> {
    let max_points = max_points.max(1);
    let rows = dedupe_timestamps(rows);
    if rows.len() <= max_points {
        return rows;
    }

    let mut kept = Vec::with_capacity(max_points);
    let mut last_bucket = None;
    for row in rows {
        let bucket = bucket_of(row.ts, start, end, max_points);
        if last_bucket != Some(bucket) {
            last_bucket = Some(bucket);
            kept.push(row);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rows(timestamps: &[i64]) -> Vec<Measurement> {
        timestamps
            .iter()
            .enumerate()
            .map(|(i, &ts)| Measurement {
                id: i as i64 + 1,
                ts,
                co2: 400.0 + i as f64,
                temperature: 21.0,
                humidity: 40.0,
            })
            .collect()
    }

    #[test]
    fn test_small_input_returned_unchanged() {
        let input = rows(&[1, 5, 9]);
        assert_eq!(downsample(input.clone(), 0, 10, 3), input);
        assert_eq!(downsample(input.clone(), 0, 10, 500), input);
    }

    #[test]
    fn test_empty_input() {
        assert!(downsample(Vec::new(), 0, 100, 10).is_empty());
    }

    #[test]
    fn test_duplicate_timestamps_keep_lowest_id() {
        let out = downsample(rows(&[1, 1, 2, 2, 2, 3]), 0, 10, 500);
        assert_eq!(out.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 3, 6]);
    }

    #[test]
    fn test_first_row_per_bucket() {
        // Window 0..=9 in 2 buckets: [0,4] and [5,9].
        let out = downsample(rows(&[0, 2, 4, 5, 7, 9]), 0, 9, 2);
        assert_eq!(out.iter().map(|m| m.ts).collect::<Vec<_>>(), vec![0, 5]);
    }

    #[test]
    fn test_single_point() {
        let out = downsample(rows(&[3, 4, 5]), 0, 10, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].ts, 3);
    }

    #[test]
    fn test_bucket_of_edges() {
        assert_eq!(bucket_of(0, 0, 99, 10), 0);
        assert_eq!(bucket_of(99, 0, 99, 10), 9);
        assert_eq!(bucket_of(i64::MAX, i64::MIN, i64::MAX, 7), 6);
    }

    proptest! {
        #[test]
        fn downsample_is_bounded_sorted_and_unique(
            mut timestamps in proptest::collection::vec(0i64..5_000, 0..400),
            max_points in 1usize..200,
        ) {
            timestamps.sort_unstable();
            let input = rows(&timestamps);
            let raw_count = input.len();

            let out = downsample(input.clone(), 0, 4_999, max_points);
            prop_assert!(out.len() <= max_points.min(raw_count));
            prop_assert!(out.windows(2).all(|w| w[0].ts < w[1].ts));
            prop_assert_eq!(&out, &downsample(input, 0, 4_999, max_points));
        }
    }
}
