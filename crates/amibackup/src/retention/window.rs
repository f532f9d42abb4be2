//! Retention window parsing
//!
//! A window is written `INTERVAL:START:END`, e.g. `7d:30d:90d` meaning
//! "keep one image per 7 days for images between 30 and 90 days old".
//! START and END are ages; they are turned into absolute instants once,
//! against a single invocation time, so every window of a run agrees on
//! what "now" is.

use amibackup_common::{DurationError, parse_duration};
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use thiserror::Error;

/// Errors produced while parsing a retention window
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("malformed retention window '{spec}': expected INTERVAL:START:END, got {found} field(s)")]
    FieldCount { spec: String, found: usize },

    #[error("malformed retention window '{spec}': bad {field}: {source}")]
    Duration {
        spec: String,
        field: &'static str,
        #[source]
        source: DurationError,
    },

    #[error("malformed retention window '{spec}': interval must be greater than zero")]
    ZeroInterval { spec: String },

    #[error("malformed retention window '{spec}': START must be younger than END")]
    StartNotBeforeEnd { spec: String },

    #[error("retention window '{spec}' reaches too far into the past")]
    OutOfRange { spec: String },
}

/// One retention tier: keep one image per `interval` between `start` and `stop`.
///
/// `start` is the older absolute boundary (now − END) and `stop` the younger
/// one (now − START), so `start < stop`. Slices run forward from `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionWindow {
    interval: TimeDelta,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    spec: String,
}

impl RetentionWindow {
    /// Build a window from absolute bounds.
    pub fn new(
        interval: TimeDelta,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<Self, WindowError> {
        let spec = format!("{}s@{}..{}", interval.num_seconds(), start, stop);
        if interval <= TimeDelta::zero() {
            return Err(WindowError::ZeroInterval { spec });
        }
        if start >= stop {
            return Err(WindowError::StartNotBeforeEnd { spec });
        }
        if stop.checked_add_signed(interval).is_none() {
            return Err(WindowError::OutOfRange { spec });
        }
        Ok(Self {
            interval,
            start,
            stop,
            spec,
        })
    }

    /// Parse `INTERVAL:START:END` relative to `now`.
    pub fn parse(spec: &str, now: DateTime<Utc>) -> Result<Self, WindowError> {
        let fields: Vec<&str> = spec.split(':').collect();
        let [interval, start_age, end_age] = fields.as_slice() else {
            return Err(WindowError::FieldCount {
                spec: spec.to_string(),
                found: fields.len(),
            });
        };

        let interval = parse_field(spec, "interval", interval)?;
        let start_age = parse_field(spec, "start", start_age)?;
        let end_age = parse_field(spec, "end", end_age)?;

        if interval.is_zero() {
            return Err(WindowError::ZeroInterval {
                spec: spec.to_string(),
            });
        }
        if start_age >= end_age {
            return Err(WindowError::StartNotBeforeEnd {
                spec: spec.to_string(),
            });
        }

        let out_of_range = || WindowError::OutOfRange {
            spec: spec.to_string(),
        };
        let to_delta = |d: std::time::Duration| TimeDelta::from_std(d).map_err(|_| out_of_range());

        let interval = to_delta(interval)?;
        let start = now
            .checked_sub_signed(to_delta(end_age)?)
            .ok_or_else(out_of_range)?;
        let stop = now
            .checked_sub_signed(to_delta(start_age)?)
            .ok_or_else(out_of_range)?;
        // Slice arithmetic adds the interval to instants inside the window
        stop.checked_add_signed(interval).ok_or_else(out_of_range)?;

        Ok(Self {
            interval,
            start,
            stop,
            spec: spec.to_string(),
        })
    }

    pub fn interval(&self) -> TimeDelta {
        self.interval
    }

    /// Older boundary (inclusive)
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Younger boundary (exclusive)
    pub fn stop(&self) -> DateTime<Utc> {
        self.stop
    }

    /// The text the window was parsed from
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Whether `t` lies inside `[start, stop)`
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.stop
    }

    /// Index of the slice holding `t`, if `t` is inside the window.
    ///
    /// Slice `k` covers `[start + k*interval, min(start + (k+1)*interval, stop))`.
    pub fn slice_index(&self, t: DateTime<Utc>) -> Option<i64> {
        if !self.contains(t) {
            return None;
        }
        let offset = (t - self.start).num_milliseconds();
        let step = self.interval.num_milliseconds().max(1);
        Some(offset / step)
    }

    /// Bounds of slice `index`, clamped to the window's `stop`.
    pub fn slice_bounds(&self, index: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let step = self.interval.num_milliseconds().max(1);
        let lo = self
            .start
            .checked_add_signed(TimeDelta::milliseconds(step.saturating_mul(index)))
            .map_or(self.stop, |lo| lo.min(self.stop));
        let hi = lo
            .checked_add_signed(self.interval)
            .map_or(self.stop, |hi| hi.min(self.stop));
        (lo, hi)
    }
}

impl fmt::Display for RetentionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}

fn parse_field(
    spec: &str,
    field: &'static str,
    value: &str,
) -> Result<std::time::Duration, WindowError> {
    parse_duration(value).map_err(|source| WindowError::Duration {
        spec: spec.to_string(),
        field,
        source,
    })
}

/// Parse a single `INTERVAL:START:END` window relative to `now`.
pub fn parse_window(spec: &str, now: DateTime<Utc>) -> Result<RetentionWindow, WindowError> {
    RetentionWindow::parse(spec, now)
}

/// Parse every `-p` window against the same invocation time.
pub fn parse_windows<S: AsRef<str>>(
    specs: &[S],
    now: DateTime<Utc>,
) -> Result<Vec<RetentionWindow>, WindowError> {
    specs
        .iter()
        .map(|s| parse_window(s.as_ref(), now))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_converts_ages_to_instants() {
        let w = RetentionWindow::parse("1d:1d:7d", now()).unwrap();
        assert_eq!(w.interval(), TimeDelta::hours(24));
        assert_eq!(w.start(), now() - TimeDelta::days(7));
        assert_eq!(w.stop(), now() - TimeDelta::days(1));
        assert!(w.start() < w.stop());
        assert_eq!(w.to_string(), "1d:1d:7d");
    }

    #[test]
    fn test_parse_accepts_hours_and_compound() {
        let w = RetentionWindow::parse("12h:36h:1d12h", now());
        assert!(matches!(w, Err(WindowError::StartNotBeforeEnd { .. })));

        let w = RetentionWindow::parse("12h:1d:2d12h", now()).unwrap();
        assert_eq!(w.interval(), TimeDelta::hours(12));
        assert_eq!(w.start(), now() - TimeDelta::hours(60));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            RetentionWindow::parse("1d:7d", now()),
            Err(WindowError::FieldCount { found: 2, .. })
        ));
        assert!(matches!(
            RetentionWindow::parse("1d:1d:7d:30d", now()),
            Err(WindowError::FieldCount { found: 4, .. })
        ));
        assert!(matches!(
            RetentionWindow::parse("1x:1d:7d", now()),
            Err(WindowError::Duration {
                field: "interval",
                ..
            })
        ));
        assert!(matches!(
            RetentionWindow::parse("0d:1d:7d", now()),
            Err(WindowError::ZeroInterval { .. })
        ));
        assert!(matches!(
            RetentionWindow::parse("1d:7d:7d", now()),
            Err(WindowError::StartNotBeforeEnd { .. })
        ));
        assert!(matches!(
            RetentionWindow::parse("1d:30d:7d", now()),
            Err(WindowError::StartNotBeforeEnd { .. })
        ));
    }

    #[test]
    fn test_slices_are_half_open_and_clamped() {
        // 10h span sliced into 4h pieces: [0,4) [4,8) [8,10)
        let start = now() - TimeDelta::hours(10);
        let w = RetentionWindow::new(TimeDelta::hours(4), start, now()).unwrap();

        assert_eq!(w.slice_index(start), Some(0));
        assert_eq!(w.slice_index(start + TimeDelta::hours(4)), Some(1));
        assert_eq!(
            w.slice_index(start + TimeDelta::hours(4) - TimeDelta::seconds(1)),
            Some(0)
        );
        assert_eq!(w.slice_index(now() - TimeDelta::seconds(1)), Some(2));
        assert_eq!(w.slice_index(now()), None);
        assert_eq!(w.slice_index(start - TimeDelta::seconds(1)), None);

        assert_eq!(w.slice_bounds(2), (start + TimeDelta::hours(8), now()));
    }

    #[test]
    fn test_oversized_interval_is_rejected() {
        assert!(matches!(
            RetentionWindow::parse("100000000d:1d:7d", now()),
            Err(WindowError::OutOfRange { .. })
        ));
        assert!(matches!(
            RetentionWindow::new(
                TimeDelta::days(100_000_000),
                now() - TimeDelta::days(7),
                now()
            ),
            Err(WindowError::OutOfRange { .. })
        ));
        assert!(matches!(
            RetentionWindow::parse("1d:1d:100000000d", now()),
            Err(WindowError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_wide_interval_covers_window_in_one_slice() {
        let w = RetentionWindow::parse("10000d:1d:7d", now()).unwrap();
        let t = now() - TimeDelta::days(3);
        assert_eq!(w.slice_index(t), Some(0));
        assert_eq!(w.slice_bounds(0), (w.start(), w.stop()));
    }

    #[test]
    fn test_parse_windows_shares_now() {
        let windows = parse_windows(&["1d:4d:30d", "7d:30d:90d"], now()).unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].start(), windows[1].stop());
    }
}
