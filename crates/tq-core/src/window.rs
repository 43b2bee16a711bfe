//! # Time Windows
//!
//! The time range a query runs over: either relative (`ago(1h)`) or an
//! explicit `datetime(...)` range. The window is re-applied to composed
//! query text so every stage agrees on it, including stages copied
//! verbatim from templates.

use crate::duration::{parse_span, Interval, ItemDuration};
use crate::error::QueryError;
use crate::query::PipelineQuery;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static AGO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"ago\([^()]*\)").expect("ago regex"));
static AGO_COMPARISON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r">=?\s*ago\([^()]*\)").expect("ago comparison regex"));
static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"timestamp\s*>=\s*datetime\('([^']+)'\)\s+and\s+timestamp\s*<=\s*datetime\('([^']+)'\)")
        .expect("datetime range regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeWindow {
    /// Relative window, e.g. `1h` for `ago(1h)`.
    Ago { token: String },
    /// Explicit range.
    Between { from: DateTime<Utc>, to: DateTime<Utc> },
}

impl TimeWindow {
    /// Relative window from a validated `<integer><m|h|d>` token.
    pub fn ago(token: &str) -> Result<Self, QueryError> {
        parse_span(token)?;
        Ok(Self::Ago {
            token: token.trim().to_string(),
        })
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, QueryError> {
        if from >= to {
            return Err(QueryError::InvalidRange {
                from: format_datetime(from),
                to: format_datetime(to),
            });
        }
        Ok(Self::Between { from, to })
    }

    /// Window selected by a request: a coarse duration, or the explicit
    /// range when the duration is [`ItemDuration::Custom`].
    pub fn from_request(
        duration: ItemDuration,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Self, QueryError> {
        match (duration.token(), from, to) {
            (Some(token), _, _) => Self::ago(token),
            (None, Some(from), Some(to)) => Self::between(from, to),
            (None, _, _) => Err(QueryError::MissingDurationToken(
                "custom duration without from/to".into(),
            )),
        }
    }

    /// Recover the window a query was rendered with.
    pub fn detect(query: &PipelineQuery) -> Result<Self, QueryError> {
        if let Ok(token) = query.extract_duration_token() {
            return Ok(Self::Ago { token });
        }

        let text = query.to_query_string();
        let caps = RANGE_RE
            .captures(&text)
            .ok_or_else(|| QueryError::MissingDurationToken(text.clone()))?;
        let from = parse_datetime(&caps[1])?;
        let to = parse_datetime(&caps[2])?;
        Self::between(from, to)
    }

    pub fn span(&self) -> Duration {
        match self {
            Self::Ago { token } => parse_span(token).unwrap_or_else(|_| Duration::zero()),
            Self::Between { from, to } => *to - *from,
        }
    }

    pub fn interval(&self, splits: u32) -> Interval {
        Interval::for_span(self.span(), splits)
    }

    /// Token to use when a fresh `where timestamp > ago(...)` stage is
    /// synthesised. Explicit ranges rewrite that stage at render time.
    pub fn seed_token(&self) -> &str {
        match self {
            Self::Ago { token } => token,
            Self::Between { .. } => "1h",
        }
    }

    /// Re-apply this window to query text.
    pub fn apply(&self, text: &str) -> String {
        match self {
            Self::Ago { token } => AGO_RE
                .replace_all(text, format!("ago({token})").as_str())
                .into_owned(),
            Self::Between { from, to } => {
                let range = format!(
                    ">= datetime('{}') and timestamp <= datetime('{}')",
                    format_datetime(*from),
                    format_datetime(*to)
                );
                AGO_COMPARISON_RE
                    .replace_all(text, range.as_str())
                    .into_owned()
            }
        }
    }
}

fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, QueryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| QueryError::MissingDurationToken(format!("unparseable datetime '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_ago_replaces_every_token() {
        let window = TimeWindow::ago("6h").unwrap();
        assert_eq!(
            window.apply("a | where timestamp > ago(1h) | where x > ago(30d)"),
            "a | where timestamp > ago(6h) | where x > ago(6h)"
        );
    }

    #[test]
    fn test_between_rewrites_timestamp_comparison() {
        let window = TimeWindow::between(at("2024-01-01T00:00:00Z"), at("2024-01-01T05:00:00Z")).unwrap();
        let text = window.apply("requests | where timestamp > ago(1h)");
        assert_eq!(
            text,
            "requests | where timestamp >= datetime('2024-01-01T00:00:00Z') and timestamp <= datetime('2024-01-01T05:00:00Z')"
        );
        // applying twice is stable
        assert_eq!(window.apply(&text), text);
    }

    #[test]
    fn test_between_rewrites_inclusive_comparison() {
        let window = TimeWindow::between(at("2024-01-01T00:00:00Z"), at("2024-01-01T05:00:00Z")).unwrap();
        let text = window.apply("exceptions | where timestamp >= ago(1h) | summarize count()");
        assert_eq!(
            text,
            "exceptions | where timestamp >= datetime('2024-01-01T00:00:00Z') and timestamp <= datetime('2024-01-01T05:00:00Z') | summarize count()"
        );
        assert!(!text.contains("ago("));
    }

    #[test]
    fn test_detect_relative_and_explicit() {
        let q = PipelineQuery::parse("requests | where timestamp > ago(12h)");
        assert_eq!(
            TimeWindow::detect(&q).unwrap(),
            TimeWindow::Ago { token: "12h".into() }
        );

        let window = TimeWindow::between(at("2024-02-01T10:00:00Z"), at("2024-02-02T10:00:00Z")).unwrap();
        let rendered = PipelineQuery::parse(&window.apply("requests | where timestamp > ago(1h)"));
        assert_eq!(TimeWindow::detect(&rendered).unwrap(), window);
        assert_eq!(window.span(), Duration::days(1));
    }

    #[test]
    fn test_detect_missing_window() {
        let q = PipelineQuery::parse("requests | take 10");
        assert!(matches!(
            TimeWindow::detect(&q),
            Err(QueryError::MissingDurationToken(_))
        ));
    }

    #[test]
    fn test_from_request() {
        assert_eq!(
            TimeWindow::from_request(ItemDuration::SevenDays, None, None).unwrap(),
            TimeWindow::Ago { token: "7d".into() }
        );
        assert!(TimeWindow::from_request(ItemDuration::Custom, None, None).is_err());
        let from = at("2024-01-01T00:00:00Z");
        assert!(TimeWindow::from_request(ItemDuration::Custom, Some(from), Some(from)).is_err());
    }
}
