//! # Durations and Bucket Intervals
//!
//! A coarse [`ItemDuration`] always comes with a derived [`Interval`] so that
//! roughly [`DEFAULT_SPLITS`] buckets span the duration. The interval is
//! recomputed from the duration on demand and never stored on its own.

use crate::error::QueryError;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target number of buckets per chart.
pub const DEFAULT_SPLITS: u32 = 30;

static SPAN_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+)(m|h|d)$").expect("span token regex"));

/// Parse a `<integer><m|h|d>` token into a span.
pub fn parse_span(token: &str) -> Result<Duration, QueryError> {
    let caps = SPAN_TOKEN_RE
        .captures(token.trim())
        .ok_or_else(|| QueryError::InvalidDurationToken(token.to_string()))?;
    let amount: i64 = caps[1]
        .parse()
        .map_err(|_| QueryError::InvalidDurationToken(token.to_string()))?;
    match &caps[2] {
        "m" => Ok(Duration::minutes(amount)),
        "h" => Ok(Duration::hours(amount)),
        "d" => Ok(Duration::days(amount)),
        _ => Err(QueryError::InvalidDurationToken(token.to_string())),
    }
}

/// Coarse duration selectable for a dashboard item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ItemDuration {
    #[default]
    #[serde(rename = "1h", alias = "OneHour")]
    OneHour,
    #[serde(rename = "6h", alias = "SixHours")]
    SixHours,
    #[serde(rename = "12h", alias = "TwelveHours")]
    TwelveHours,
    #[serde(rename = "1d", alias = "OneDay")]
    OneDay,
    #[serde(rename = "3d", alias = "ThreeDays")]
    ThreeDays,
    #[serde(rename = "7d", alias = "SevenDays")]
    SevenDays,
    #[serde(rename = "30d", alias = "ThirtyDays")]
    ThirtyDays,
    #[serde(rename = "90d", alias = "NinetyDays")]
    NinetyDays,
    /// Explicit from/to range supplied with the request.
    #[serde(rename = "custom", alias = "Custom")]
    Custom,
}

impl ItemDuration {
    /// The `ago(...)` token, `None` for [`ItemDuration::Custom`].
    pub fn token(self) -> Option<&'static str> {
        match self {
            Self::OneHour => Some("1h"),
            Self::SixHours => Some("6h"),
            Self::TwelveHours => Some("12h"),
            Self::OneDay => Some("1d"),
            Self::ThreeDays => Some("3d"),
            Self::SevenDays => Some("7d"),
            Self::ThirtyDays => Some("30d"),
            Self::NinetyDays => Some("90d"),
            Self::Custom => None,
        }
    }

    pub fn span(self) -> Option<Duration> {
        self.token().and_then(|token| parse_span(token).ok())
    }

    pub fn interval(self, splits: u32) -> Option<Interval> {
        self.span().map(|span| Interval::for_span(span, splits))
    }
}

/// Accepts the token (`6h`), the variant name (`SixHours`) and the numeric
/// codes older clients send (`0`..`6`, `42` for custom).
impl FromStr for ItemDuration {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let duration = match s.trim() {
            "1h" | "OneHour" | "0" => Self::OneHour,
            "6h" | "SixHours" | "1" => Self::SixHours,
            "12h" | "TwelveHours" | "2" => Self::TwelveHours,
            "1d" | "OneDay" | "3" => Self::OneDay,
            "3d" | "ThreeDays" | "4" => Self::ThreeDays,
            "7d" | "SevenDays" | "5" => Self::SevenDays,
            "30d" | "ThirtyDays" | "6" => Self::ThirtyDays,
            "90d" | "NinetyDays" => Self::NinetyDays,
            "custom" | "Custom" | "42" => Self::Custom,
            other => return Err(QueryError::InvalidDurationToken(other.to_string())),
        };
        Ok(duration)
    }
}

impl fmt::Display for ItemDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token().unwrap_or("custom"))
    }
}

/// Width of one chart bucket, in whole minutes (at least one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Interval {
    minutes: i64,
}

impl Interval {
    pub fn from_minutes(minutes: i64) -> Self {
        Self {
            minutes: minutes.max(1),
        }
    }

    /// Interval that splits `span` into about `splits` buckets.
    pub fn for_span(span: Duration, splits: u32) -> Self {
        let minutes = span.num_seconds() as f64 / 60.0 / f64::from(splits.max(1));
        Self::from_minutes(minutes.round() as i64)
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>, splits: u32) -> Self {
        Self::for_span(to - from, splits)
    }

    /// Parse an interval token such as `2m` or `1h`.
    pub fn parse(token: &str) -> Result<Self, QueryError> {
        parse_span(token).map(|span| Self::from_minutes(span.num_minutes()))
    }

    pub fn minutes(self) -> i64 {
        self.minutes
    }

    pub fn as_duration(self) -> Duration {
        Duration::minutes(self.minutes)
    }

    /// Token used inside `bin(timestamp, ...)`.
    pub fn token(self) -> String {
        format!("{}m", self.minutes)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.minutes)
    }
}
