//! Range query builder.
//!
//! [`RangeQuery`] collects the optional parameters of a history request
//! and resolves them against the current time into a concrete window.
//!
//! # Example
//!
//! ```
//! use airqmon_store::{RangeQuery, DEFAULT_POINTS};
//!
//! let now = 1_700_000_000;
//! let range = RangeQuery::new().resolve(now)?;
//! assert_eq!(range.end, now);
//! assert_eq!(range.start, now - 24 * 3600);
//! assert_eq!(range.max_points, DEFAULT_POINTS);
//!
//! let range = RangeQuery::new().start(10).end(20).points(50_000).resolve(now)?;
//! assert_eq!(range.max_points, 10_000);
//! # Ok::<(), airqmon_store::Error>(())
//! ```

use crate::error::{Error, Result};

/// Points returned when the caller does not ask for a specific number.
pub const DEFAULT_POINTS: usize = 500;
/// Upper bound for the number of points in one response.
pub const MAX_POINTS: usize = 10_000;
/// Window length used when `start` is omitted, in seconds.
pub const DEFAULT_WINDOW_SECS: i64 = 24 * 3600;

/// Fluent builder for downsampled time-range queries.
///
/// All fields are optional; see [`RangeQuery::resolve`] for the defaults.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RangeQuery {
    /// Inclusive window start (Unix seconds).
    pub start: Option<i64>,
    /// Inclusive window end (Unix seconds).
    pub end: Option<i64>,
    /// Requested maximum number of points.
    pub points: Option<i64>,
}

/// A query with every default filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    /// Inclusive window start.
    pub start: i64,
    /// Inclusive window end.
    pub end: i64,
    /// Maximum number of points, within `1..=MAX_POINTS`.
    pub max_points: usize,
}

impl RangeQuery {
    /// Create a query for the last 24 hours with the default point count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inclusive window start.
    pub fn start(mut self, start: i64) -> Self {
        self.start = Some(start);
        self
    }

    /// Set the inclusive window end.
    pub fn end(mut self, end: i64) -> Self {
        self.end = Some(end);
        self
    }

    /// Set the maximum number of points. Out-of-range values are clamped.
    pub fn points(mut self, points: i64) -> Self {
        self.points = Some(points);
        self
    }

    /// Fill in defaults relative to `now`.
    ///
    /// - `end` defaults to `now`
    /// - `start` defaults to `end - 24h`
    /// - `points` defaults to [`DEFAULT_POINTS`] and is clamped to
    ///   `1..=MAX_POINTS`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `start > end`.
    pub fn resolve(&self, now: i64) -> Result<ResolvedRange> {
        let end = self.end.unwrap_or(now);
        let start = self
            .start
            .unwrap_or_else(|| end.saturating_sub(DEFAULT_WINDOW_SECS));

        if start > end {
            return Err(Error::InvalidRange { start, end });
        }

        let max_points = match self.points {
            None => DEFAULT_POINTS,
            Some(p) => p.clamp(1, MAX_POINTS as i64) as usize,
        };

        Ok(ResolvedRange {
            start,
            end,
            max_points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_relative_to_end() {
        let range = RangeQuery::new().end(100_000).resolve(999_999).unwrap();
        assert_eq!(range.end, 100_000);
        assert_eq!(range.start, 100_000 - DEFAULT_WINDOW_SECS);
    }

    #[test]
    fn test_points_clamped() {
        let q = RangeQuery::new().start(0).end(10);
        assert_eq!(q.points(0).resolve(0).unwrap().max_points, 1);
        assert_eq!(q.points(-7).resolve(0).unwrap().max_points, 1);
        assert_eq!(q.points(10_001).resolve(0).unwrap().max_points, MAX_POINTS);
        assert_eq!(q.points(42).resolve(0).unwrap().max_points, 42);
    }

    #[test]
    fn test_start_after_end_rejected() {
        let err = RangeQuery::new().start(11).end(10).resolve(0).unwrap_err();
        assert!(matches!(err, Error::InvalidRange { start: 11, end: 10 }));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_single_instant_window_allowed() {
        let range = RangeQuery::new().start(10).end(10).resolve(0).unwrap();
        assert_eq!((range.start, range.end), (10, 10));
    }

    #[test]
    fn test_extreme_bounds_do_not_overflow() {
        let range = RangeQuery::new().end(i64::MIN + 5).resolve(0).unwrap();
        assert_eq!(range.start, i64::MIN);
    }
}
