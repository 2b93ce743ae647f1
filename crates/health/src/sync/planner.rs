//! Splitting a date range into bounded query windows
//!
//! Pure and deterministic: a plan can be iterated any number of times and
//! always yields the same windows.

use chrono::{DateTime, TimeDelta, Utc};

use crate::models::TimeWindow;

/// Plans windows of a fixed maximum size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlanner {
    window_size: TimeDelta,
}

impl WindowPlanner {
    pub fn new(window_size: TimeDelta) -> Self {
        Self { window_size }
    }

    /// Windows covering `[start, end)`, the last one clipped to `end`
    pub fn plan(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> WindowPlan {
        WindowPlan {
            start,
            end,
            size: self.window_size,
        }
    }
}

/// A restartable sequence of contiguous windows
///
/// Empty when `start >= end` or the window size is not positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    size: TimeDelta,
}

impl WindowPlan {
    pub fn iter(&self) -> Windows {
        Windows {
            cursor: self.start,
            end: self.end,
            size: self.size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Number of windows without materializing them
    pub fn len(&self) -> usize {
        if self.start >= self.end || self.size <= TimeDelta::zero() {
            return 0;
        }
        let span = (self.end - self.start).num_milliseconds();
        let size = self.size.num_milliseconds().max(1);
        ((span + size - 1) / size) as usize
    }
}

impl IntoIterator for &WindowPlan {
    type Item = TimeWindow;
    type IntoIter = Windows;

    fn into_iter(self) -> Windows {
        self.iter()
    }
}

impl IntoIterator for WindowPlan {
    type Item = TimeWindow;
    type IntoIter = Windows;

    fn into_iter(self) -> Windows {
        self.iter()
    }
}

/// Iterator over a [`WindowPlan`]
#[derive(Debug, Clone)]
pub struct Windows {
    cursor: DateTime<Utc>,
    end: DateTime<Utc>,
    size: TimeDelta,
}

impl Iterator for Windows {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<TimeWindow> {
        if self.cursor >= self.end || self.size <= TimeDelta::zero() {
            return None;
        }
        let next = self
            .cursor
            .checked_add_signed(self.size)
            .map_or(self.end, |t| t.min(self.end));
        let window = TimeWindow::new(self.cursor, next);
        self.cursor = next;
        Some(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_two_month_plan() {
        let plan = WindowPlanner::new(TimeDelta::days(30)).plan(day(2022, 1, 1), day(2022, 3, 1));
        let windows: Vec<_> = plan.iter().collect();

        assert_eq!(
            windows,
            vec![
                TimeWindow::new(day(2022, 1, 1), day(2022, 1, 31)),
                TimeWindow::new(day(2022, 1, 31), day(2022, 3, 1)),
            ]
        );
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_windows_cover_range_without_gaps() {
        let start = Utc.with_ymd_and_hms(2021, 11, 3, 7, 15, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 2, 29, 23, 0, 0).unwrap();

        for days in [1, 7, 30, 45, 400, 2000] {
            let size = TimeDelta::days(days);
            let windows: Vec<_> = WindowPlanner::new(size).plan(start, end).into_iter().collect();

            assert_eq!(windows.first().unwrap().start, start);
            assert_eq!(windows.last().unwrap().end, end);
            for w in &windows {
                assert!(w.start < w.end);
                assert!(w.duration() <= size);
            }
            for pair in windows.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
            assert_eq!(windows.len(), WindowPlanner::new(size).plan(start, end).len());
        }
    }

    #[test]
    fn test_empty_plans() {
        let planner = WindowPlanner::new(TimeDelta::days(30));
        assert!(planner.plan(day(2022, 3, 1), day(2022, 1, 1)).is_empty());
        assert!(planner.plan(day(2022, 1, 1), day(2022, 1, 1)).is_empty());

        let zero = WindowPlanner::new(TimeDelta::zero()).plan(day(2022, 1, 1), day(2022, 3, 1));
        assert!(zero.is_empty());
        assert_eq!(zero.len(), 0);

        let negative =
            WindowPlanner::new(TimeDelta::days(-1)).plan(day(2022, 1, 1), day(2022, 3, 1));
        assert!(negative.is_empty());
    }

    #[test]
    fn test_plan_is_restartable() {
        let plan = WindowPlanner::new(TimeDelta::days(7)).plan(day(2022, 1, 1), day(2022, 2, 1));
        let first: Vec<_> = plan.iter().collect();
        let second: Vec<_> = plan.iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_range_shorter_than_window() {
        let start = day(2024, 5, 1);
        let end = start + TimeDelta::hours(5);
        let windows: Vec<_> = WindowPlanner::new(TimeDelta::days(30))
            .plan(start, end)
            .iter()
            .collect();
        assert_eq!(windows, vec![TimeWindow::new(start, end)]);
    }
}
