//! # Filter Predicates
//!
//! Operator-supplied `where` predicates, classified by the column they
//! reference so they can be routed to the table that owns that column.

use crate::stage::strip_keyword;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Telemetry tables that share the correlation key. The declaration order
/// is the order in which correlation bindings are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TelemetryTable {
    #[serde(rename = "requests")]
    Requests,
    #[serde(rename = "exceptions")]
    Exceptions,
    #[serde(rename = "availabilityResults")]
    AvailabilityResults,
}

impl TelemetryTable {
    pub const ALL: [TelemetryTable; 3] = [
        TelemetryTable::Requests,
        TelemetryTable::Exceptions,
        TelemetryTable::AvailabilityResults,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requests => "requests",
            Self::Exceptions => "exceptions",
            Self::AvailabilityResults => "availabilityResults",
        }
    }

    /// Table owning `column`, for the columns used in drill-down filters.
    pub fn for_column(column: &str) -> Option<Self> {
        match column.to_ascii_lowercase().as_str() {
            "type" => Some(Self::Exceptions),
            "operation_name" | "url" | "resultcode" => Some(Self::Requests),
            _ => None,
        }
    }
}

impl fmt::Display for TelemetryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TelemetryTable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|table| table.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown telemetry table '{s}'"))
    }
}

/// A `where` predicate as supplied by the operator (e.g. `where type != 'A'`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterPredicate(String);

impl FilterPredicate {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Predicate text without the `where` keyword.
    pub fn body(&self) -> &str {
        strip_keyword(&self.0, "where").unwrap_or(&self.0)
    }

    /// First identifier referenced by the predicate.
    pub fn column(&self) -> Option<&str> {
        let body = self.body().trim_start_matches(|c: char| c == '(' || c.is_whitespace());
        let end = body
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(body.len());
        let column = &body[..end];
        (!column.is_empty()).then_some(column)
    }

    /// Table this predicate applies to, or `None` when the column is not recognised.
    pub fn target_table(&self) -> Option<TelemetryTable> {
        self.column().and_then(TelemetryTable::for_column)
    }

    /// Equality / containment shapes that can take part in key membership tests.
    pub fn is_correlatable(&self) -> bool {
        let body = self.body();
        body.contains("==") || body.contains("!=") || body.contains("contains")
    }

    pub fn is_negative(&self) -> bool {
        let body = self.body();
        body.contains("!=") || body.contains("!contains")
    }

    /// Negative operators flipped to their positive forms, without the keyword.
    pub fn positive_body(&self) -> String {
        self.body().replace("!=", "==").replace("!contains", "contains")
    }
}

impl fmt::Display for FilterPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FilterPredicate {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for FilterPredicate {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_by_column() {
        let cases = [
            ("where type == 'TimeoutException'", Some(TelemetryTable::Exceptions)),
            ("where operation_Name != 'GET /'", Some(TelemetryTable::Requests)),
            ("where url contains 'api'", Some(TelemetryTable::Requests)),
            ("where resultCode == 500", Some(TelemetryTable::Requests)),
            ("where (type != 'A')", Some(TelemetryTable::Exceptions)),
            ("where client_Type == 'PC'", None),
            ("where * contains 'x'", None),
        ];
        for (text, expected) in cases {
            assert_eq!(FilterPredicate::new(text).target_table(), expected, "{text}");
        }
    }

    #[test]
    fn test_column_prefix_must_match_whole_identifier() {
        assert_eq!(FilterPredicate::new("where typeName == 'x'").target_table(), None);
        assert_eq!(FilterPredicate::new("where url_path == 'x'").target_table(), None);
    }

    #[test]
    fn test_correlatable_and_negative_shapes() {
        let eq = FilterPredicate::new("where type == 'A'");
        let ne = FilterPredicate::new("where type != 'A'");
        let nc = FilterPredicate::new("where url !contains 'x'");
        let gt = FilterPredicate::new("where duration > 100");

        assert!(eq.is_correlatable() && !eq.is_negative());
        assert!(ne.is_correlatable() && ne.is_negative());
        assert!(nc.is_correlatable() && nc.is_negative());
        assert!(!gt.is_correlatable());
    }

    #[test]
    fn test_positive_body() {
        assert_eq!(FilterPredicate::new("where type != 'A'").positive_body(), "type == 'A'");
        assert_eq!(FilterPredicate::new("url !contains 'x'").positive_body(), "url contains 'x'");
    }

    #[test]
    fn test_table_names_round_trip() {
        for table in TelemetryTable::ALL {
            assert_eq!(table.as_str().parse::<TelemetryTable>(), Ok(table));
        }
        assert_eq!(
            "AvailabilityResults".parse::<TelemetryTable>(),
            Ok(TelemetryTable::AvailabilityResults)
        );
    }
}
