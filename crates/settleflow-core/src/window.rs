//! Half-open time windows and chunked iteration
//!
//! A [`TimeWindow`] is a half-open interval `[start, end)`. The
//! [`WindowIter`] splits an arbitrary interval into consecutive
//! sub-windows no longer than a dataset's chunk rule, with no gaps and
//! no overlaps. Windows advance from the previous window's end and are
//! never rounded to calendar boundaries.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Errors constructing windows or window iterators.
#[derive(Debug, Error)]
pub enum WindowError {
    /// `start` was after `end`.
    #[error("window start {start} is after end {end}")]
    Inverted {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Chunk size must be strictly positive.
    #[error("chunk size must be positive, got {0}")]
    NonPositiveChunk(Duration),
}

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Build a window, enforcing `start < end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
        if start >= end {
            return Err(WindowError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// Window length.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

/// Lazy iterator over chunked sub-windows of `[start, end)`.
///
/// Yields windows in chronological order, each no longer than the chunk
/// size. The final window is shortened to end exactly at `end`. An empty
/// interval (`start == end`) yields nothing.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, TimeZone, Utc};
/// use settleflow_core::window::WindowIter;
///
/// let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let end = Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap();
/// let windows: Vec<_> = WindowIter::new(start, end, Duration::days(1)).unwrap().collect();
/// assert_eq!(windows.len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct WindowIter {
    cursor: DateTime<Utc>,
    end: DateTime<Utc>,
    chunk: Duration,
}

impl WindowIter {
    /// Build an iterator over `[start, end)` with windows ≤ `chunk`.
    ///
    /// `start == end` is allowed and yields an empty sequence;
    /// `start > end` and non-positive chunks are rejected.
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        chunk: Duration,
    ) -> Result<Self, WindowError> {
        if start > end {
            return Err(WindowError::Inverted { start, end });
        }
        if chunk <= Duration::zero() {
            return Err(WindowError::NonPositiveChunk(chunk));
        }
        Ok(Self {
            cursor: start,
            end,
            chunk,
        })
    }
}

impl Iterator for WindowIter {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }
        let next_end = (self.cursor + self.chunk).min(self.end);
        let window = TimeWindow {
            start: self.cursor,
            end: next_end,
        };
        self.cursor = next_end;
        Some(window)
    }
}
