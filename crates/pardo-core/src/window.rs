use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A window an element is assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoundedWindow {
    Global,
    /// Half-open interval `[start, end)`.
    Interval {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl BoundedWindow {
    pub fn interval(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::Interval { start, end }
    }

    /// Latest timestamp that still belongs to this window.
    pub fn max_timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Global => DateTime::<Utc>::MAX_UTC,
            Self::Interval { end, .. } => end
                .checked_sub_signed(Duration::milliseconds(1))
                .unwrap_or(*end),
        }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        match self {
            Self::Global => true,
            Self::Interval { start, end } => *start <= timestamp && timestamp < *end,
        }
    }
}

impl fmt::Display for BoundedWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "GlobalWindow"),
            Self::Interval { start, end } => {
                write!(f, "[{}, {})", start.to_rfc3339(), end.to_rfc3339())
            }
        }
    }
}

/// A value paired with its event timestamp and the window(s) it was assigned to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowedValue<T> {
    pub value: T,
    pub timestamp: DateTime<Utc>,
    pub windows: Vec<BoundedWindow>,
}

impl<T> WindowedValue<T> {
    pub fn new(value: T, timestamp: DateTime<Utc>, windows: Vec<BoundedWindow>) -> Self {
        Self {
            value,
            timestamp,
            windows,
        }
    }

    /// A value in the global window at the minimum timestamp.
    pub fn in_global_window(value: T) -> Self {
        Self {
            value,
            timestamp: DateTime::<Utc>::MIN_UTC,
            windows: vec![BoundedWindow::Global],
        }
    }

    pub fn timestamped(value: T, timestamp: DateTime<Utc>) -> Self {
        Self {
            value,
            timestamp,
            windows: vec![BoundedWindow::Global],
        }
    }

    /// Same timestamp and windows, different payload.
    pub fn with_value<U>(&self, value: U) -> WindowedValue<U> {
        WindowedValue {
            value,
            timestamp: self.timestamp,
            windows: self.windows.clone(),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WindowedValue<U> {
        WindowedValue {
            value: f(self.value),
            timestamp: self.timestamp,
            windows: self.windows,
        }
    }

    pub fn spans_multiple_windows(&self) -> bool {
        self.windows.len() > 1
    }
}

impl<T: Clone> WindowedValue<T> {
    /// One single-window value per assigned window, in assignment order.
    pub fn explode_windows(&self) -> impl Iterator<Item = WindowedValue<T>> + '_ {
        self.windows.iter().map(move |window| WindowedValue {
            value: self.value.clone(),
            timestamp: self.timestamp,
            windows: vec![window.clone()],
        })
    }
}

/// How timestamps map to windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WindowFn {
    Global,
    Fixed {
        #[serde(with = "duration_millis")]
        size: Duration,
    },
    Sliding {
        #[serde(with = "duration_millis")]
        size: Duration,
        #[serde(with = "duration_millis")]
        period: Duration,
    },
}

/// Windowing configuration of the input collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowingStrategy {
    pub window_fn: WindowFn,
}

impl Default for WindowingStrategy {
    fn default() -> Self {
        Self::global()
    }
}

impl WindowingStrategy {
    pub fn global() -> Self {
        Self {
            window_fn: WindowFn::Global,
        }
    }

    pub fn fixed(size: Duration) -> Self {
        Self {
            window_fn: WindowFn::Fixed { size },
        }
    }

    pub fn sliding(size: Duration, period: Duration) -> Self {
        Self {
            window_fn: WindowFn::Sliding { size, period },
        }
    }

    /// Windows containing `timestamp`, earliest start first.
    ///
    /// Non-positive sizes or periods degrade to the global window.
    pub fn assign_windows(&self, timestamp: DateTime<Utc>) -> Vec<BoundedWindow> {
        match &self.window_fn {
            WindowFn::Global => vec![BoundedWindow::Global],
            WindowFn::Fixed { size } => {
                let size_ms = size.num_milliseconds();
                if size_ms <= 0 {
                    return vec![BoundedWindow::Global];
                }
                let start = floor_to(timestamp.timestamp_millis(), size_ms);
                vec![window_from_millis(start, size_ms)]
            }
            WindowFn::Sliding { size, period } => {
                let size_ms = size.num_milliseconds();
                let period_ms = period.num_milliseconds();
                if size_ms <= 0 || period_ms <= 0 {
                    return vec![BoundedWindow::Global];
                }
                let ts = timestamp.timestamp_millis();
                let last_start = floor_to(ts, period_ms);
                let mut windows = Vec::new();
                let mut start = last_start;
                while start > ts - size_ms {
                    windows.push(window_from_millis(start, size_ms));
                    start -= period_ms;
                }
                windows.reverse();
                windows
            }
        }
    }
}

fn floor_to(ts_ms: i64, unit_ms: i64) -> i64 {
    ts_ms - ts_ms.rem_euclid(unit_ms)
}

fn window_from_millis(start_ms: i64, size_ms: i64) -> BoundedWindow {
    let start = Utc
        .timestamp_millis_opt(start_ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let end = Utc
        .timestamp_millis_opt(start_ms.saturating_add(size_ms))
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    BoundedWindow::Interval { start, end }
}

mod duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::milliseconds(i64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn fixed_windows_are_aligned_to_epoch() {
        let strategy = WindowingStrategy::fixed(Duration::seconds(10));
        let windows = strategy.assign_windows(ts(12_345));
        assert_eq!(windows, vec![BoundedWindow::interval(ts(10_000), ts(20_000))]);
        assert!(windows[0].contains(ts(19_999)));
        assert!(!windows[0].contains(ts(20_000)));
    }

    #[test]
    fn sliding_windows_cover_timestamp() {
        let strategy = WindowingStrategy::sliding(Duration::seconds(10), Duration::seconds(5));
        let windows = strategy.assign_windows(ts(12_000));
        assert_eq!(
            windows,
            vec![
                BoundedWindow::interval(ts(5_000), ts(15_000)),
                BoundedWindow::interval(ts(10_000), ts(20_000)),
            ]
        );
        assert!(windows.iter().all(|w| w.contains(ts(12_000))));
    }

    #[test]
    fn explode_windows_yields_one_value_per_window() {
        let value = WindowedValue::new(
            "a",
            ts(12_000),
            vec![
                BoundedWindow::interval(ts(5_000), ts(15_000)),
                BoundedWindow::interval(ts(10_000), ts(20_000)),
            ],
        );
        assert!(value.spans_multiple_windows());
        let exploded: Vec<_> = value.explode_windows().collect();
        assert_eq!(exploded.len(), 2);
        assert!(exploded.iter().all(|v| v.windows.len() == 1 && v.value == "a"));
        assert_eq!(exploded[1].windows[0], value.windows[1]);
    }

    #[test]
    fn interval_max_timestamp_is_end_exclusive() {
        let w = BoundedWindow::interval(ts(0), ts(1_000));
        assert_eq!(w.max_timestamp(), ts(999));
    }
}
