use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// API time parameter format (UTC, no offset suffix).
const API_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Half-open interval `[start, end)` of audit content to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start < end, "window must not be empty");
        Self { start, end }
    }

    pub fn start_param(&self) -> String {
        self.start.format(API_TIME_FORMAT).to_string()
    }

    pub fn end_param(&self) -> String {
        self.end.format(API_TIME_FORMAT).to_string()
    }

    pub fn span(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Split `[start, now)` into consecutive windows no wider than `max_span`.
///
/// Returns no windows when `start >= now`. The last window ends exactly at `now`.
pub fn plan_windows(start: DateTime<Utc>, now: DateTime<Utc>, max_span: Duration) -> Vec<FetchWindow> {
    let mut windows = Vec::new();
    if max_span <= Duration::zero() {
        return windows;
    }

    let mut current = start;
    while current < now {
        let end = std::cmp::min(current + max_span, now);
        windows.push(FetchWindow::new(current, end));
        current = end;
    }

    windows
}
