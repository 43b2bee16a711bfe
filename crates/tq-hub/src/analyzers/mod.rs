//! # Analyzers
//!
//! Breakdowns of an item's query by one dimension (operation, url, domain,
//! status code, exception type, stack frame, message). Each analyzer brings
//! its own aggregation and knows how to turn a result row back into a pair of
//! drill-in / drill-out filters, which the dashboard page sends back as
//! `queryParts`.

mod exceptions;
mod messages;
pub mod pipeline;
mod requests;

pub use exceptions::{RequestExceptionsAnalyzer, StacktraceAnalyzer};
pub use messages::ExceptionMessageAnalyzer;
pub use pipeline::run;
pub use requests::{DomainAnalyzer, RequestsAnalyzer, StatusCodesAnalyzer, UrlAnalyzer};

use serde::Serialize;
use thiserror::Error;
use tq_core::{QueryError, TelemetryTable};
use tq_store::{TableResult, Value};

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("analyzer \"{0}\" was not found")]
    UnknownAnalyzer(String),

    #[error(transparent)]
    Query(#[from] QueryError),
}

pub trait Analyzer: Send + Sync {
    /// Name the API addresses the analyzer by.
    fn name(&self) -> &'static str;

    /// Heading shown above the result table.
    fn title(&self) -> &'static str;

    fn target_table(&self) -> TelemetryTable;

    /// Pipeline fragment (starting with `|`) appended to the filtered query.
    fn aggregation(&self) -> &'static str;

    /// Display names for the result columns, in order.
    fn column_names(&self) -> &'static [&'static str];

    /// `(drill in, drill out)` filters for a raw result row.
    fn drill_filters(&self, row: &[Value]) -> (String, String);

    /// Rewrite a row for display. Runs after the drill filters are taken.
    fn post_process(&self, _row: &mut Vec<Value>) {}
}

static ANALYZERS: [&dyn Analyzer; 7] = [
    &RequestsAnalyzer,
    &UrlAnalyzer,
    &DomainAnalyzer,
    &StatusCodesAnalyzer,
    &RequestExceptionsAnalyzer,
    &StacktraceAnalyzer,
    &ExceptionMessageAnalyzer,
];

pub fn all() -> &'static [&'static dyn Analyzer] {
    &ANALYZERS
}

pub fn lookup(name: &str) -> Result<&'static dyn Analyzer, AnalyzerError> {
    all()
        .iter()
        .copied()
        .find(|analyzer| analyzer.name() == name)
        .ok_or_else(|| AnalyzerError::UnknownAnalyzer(name.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Table,
}

/// Outcome of one analyzer run. A store failure is reported here rather than
/// as an error, so one broken breakdown does not fail the page.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzerResult {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResultKind,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<TableResult>,
}

impl AnalyzerResult {
    pub fn ok(name: &str, table: TableResult) -> Self {
        Self {
            name: name.to_string(),
            kind: ResultKind::Table,
            success: true,
            error: None,
            table: Some(table),
        }
    }

    pub fn failed(name: &str, error: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            kind: ResultKind::Table,
            success: false,
            error: Some(error.to_string()),
            table: None,
        }
    }
}

// =============================================================================
// Row helpers
// =============================================================================

/// Cell text with single quotes and backslashes escaped for a literal.
pub(crate) fn literal(row: &[Value], index: usize) -> String {
    tq_core::search::escape_literal(&cell_text(row, index))
}

pub(crate) fn cell_text(row: &[Value], index: usize) -> String {
    row.get(index).map(ToString::to_string).unwrap_or_default()
}

/// `N <suffix>` with the number rounded to an integer.
pub(crate) fn with_unit(value: &Value, suffix: &str) -> Value {
    match value.as_f64() {
        Some(number) => Value::String(format!("{} {suffix}", number.round() as i64)),
        None => Value::String(format!("{value} {suffix}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(lookup("UrlAnalyzer").unwrap().title(), "Urls");
        assert!(matches!(
            lookup("RoleAnalyzer"),
            Err(AnalyzerError::UnknownAnalyzer(name)) if name == "RoleAnalyzer"
        ));
    }

    #[test]
    fn test_registry_names_are_unique() {
        let mut names: Vec<_> = all().iter().map(|a| a.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), all().len());
    }

    #[test]
    fn test_aggregations_keep_the_cutoff() {
        for analyzer in all() {
            assert!(analyzer.aggregation().trim_start().starts_with('|'), "{}", analyzer.name());
            assert!(analyzer.aggregation().contains("take 20"), "{}", analyzer.name());
        }
    }

    #[test]
    fn test_with_unit() {
        assert_eq!(with_unit(&Value::Real(12.6), "ms"), Value::String("13 ms".into()));
        assert_eq!(with_unit(&Value::Long(4), "%"), Value::String("4 %".into()));
    }
}
