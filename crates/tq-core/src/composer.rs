//! # Correlation Composer
//!
//! Builds one query that filters a primary table by predicates that belong
//! to other tables. Each foreign table gets an auxiliary query; at render
//! time every auxiliary that received a filter becomes a `let` binding of
//! correlation keys and the primary query gains a membership test on it:
//!
//! ```text
//! let exceptionsOperationIds = exceptions | where timestamp > ago(1h)
//!     | where type == 'TimeoutException' | distinct operation_Id;
//! requests | where timestamp > ago(1h)
//!     | where (operation_Id in (exceptionsOperationIds))
//! ```
//!
//! When every correlatable predicate of an auxiliary is negative, the
//! auxiliary selects the positive forms instead and the membership test is
//! inverted (`!in`). Excluding operations that had *any* matching row is
//! what the operator means by `type != 'A'`.

use crate::filter::{FilterPredicate, TelemetryTable};
use crate::query::PipelineQuery;
use crate::stage::Stage;
use crate::window::TimeWindow;
use crate::CORRELATION_KEY;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Where a filter ended up after [`CorrelationComposer::add_filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Inserted into the primary query.
    Primary,
    /// Added to the auxiliary query of another table.
    Correlated(TelemetryTable),
    /// Column not recognised; the filter was discarded.
    Dropped,
}

/// Membership operator joining an auxiliary binding to the primary query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    In,
    NotIn,
}

impl Membership {
    pub fn operator(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::NotIn => "!in",
        }
    }
}

#[derive(Debug, Clone)]
struct AuxiliaryQuery {
    query: PipelineQuery,
    used: bool,
}

#[derive(Debug, Clone)]
pub struct CorrelationComposer {
    primary: PipelineQuery,
    window: TimeWindow,
    auxiliaries: BTreeMap<TelemetryTable, AuxiliaryQuery>,
}

impl CorrelationComposer {
    /// Composer over `primary` with a relative window (`ago(<token>)`).
    pub fn new(primary: PipelineQuery, duration_token: impl Into<String>) -> Self {
        Self::with_window(
            primary,
            TimeWindow::Ago {
                token: duration_token.into(),
            },
        )
    }

    pub fn with_window(primary: PipelineQuery, window: TimeWindow) -> Self {
        let seed = window.seed_token().to_string();
        let auxiliaries = TelemetryTable::ALL
            .into_iter()
            .map(|table| {
                let query = PipelineQuery::parse(&format!(
                    "{} | where timestamp > ago({seed})",
                    table.as_str()
                ));
                (table, AuxiliaryQuery { query, used: false })
            })
            .collect();

        Self {
            primary,
            window,
            auxiliaries,
        }
    }

    pub fn primary(&self) -> &PipelineQuery {
        &self.primary
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    /// Known table the primary query reads from.
    pub fn source_table(&self) -> Option<TelemetryTable> {
        self.primary.source_table()?.parse().ok()
    }

    pub fn auxiliary(&self, table: TelemetryTable) -> Option<&PipelineQuery> {
        self.auxiliaries.get(&table).map(|aux| &aux.query)
    }

    /// Whether the auxiliary of `table` will be rendered as a binding.
    pub fn is_used(&self, table: TelemetryTable) -> bool {
        self.auxiliaries.get(&table).is_some_and(|aux| aux.used)
    }

    /// Route a single predicate to the table owning its column.
    pub fn add_filter(&mut self, predicate: &FilterPredicate) -> Routing {
        let Some(table) = predicate.target_table() else {
            debug!(predicate = %predicate, "dropping filter on unrecognised column");
            return Routing::Dropped;
        };

        if self.primary.is_source(table.as_str()) {
            self.primary = self.primary.insert_filter(predicate.as_str());
            return Routing::Primary;
        }

        if let Some(aux) = self.auxiliaries.get_mut(&table) {
            aux.query = aux.query.insert_filter(predicate.as_str());
            aux.used = true;
        }
        Routing::Correlated(table)
    }

    /// Route each predicate in order.
    pub fn add_filters<I, P>(&mut self, predicates: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        for predicate in predicates {
            self.add_filter(&FilterPredicate::new(predicate.as_ref()));
        }
    }

    /// Insert an unclassified predicate into the primary query.
    pub fn add_where(&mut self, predicate: &str) {
        self.primary = self.primary.insert_filter(predicate);
    }

    /// Install `query` as the auxiliary of `table` and mark it used, so the
    /// primary is restricted to operations selected by `query`.
    pub fn replace(&mut self, table: TelemetryTable, query: PipelineQuery) {
        if let Some(aux) = self.auxiliaries.get_mut(&table) {
            aux.query = query;
            aux.used = true;
        }
    }

    pub fn append(&mut self, tail: &PipelineQuery) {
        self.primary = self.primary.append(tail);
    }

    pub fn remove_project_and_summarize(&mut self) {
        self.primary = self.primary.without_project_and_summarize();
    }

    /// Final query text: bindings for used auxiliaries (in table order),
    /// the primary query with one membership filter per binding, the time
    /// window re-applied everywhere, whitespace collapsed.
    pub fn render(&self) -> String {
        let distinct_key = PipelineQuery::parse(&format!("| distinct {CORRELATION_KEY}"));
        let mut bindings = String::new();
        let mut primary = self.primary.clone();

        for (table, aux) in self.auxiliaries.iter().filter(|(_, aux)| aux.used) {
            let (selection, membership) = correlation_selection(&aux.query);
            let binding = format!("{}OperationIds", table.as_str());
            bindings.push_str(&format!(
                "let {binding} = {};\n",
                selection.append(&distinct_key)
            ));
            primary = primary.insert_filter(&format!(
                "({CORRELATION_KEY} {} ({binding}))",
                membership.operator()
            ));
        }

        let text = self.window.apply(&format!("{bindings}{primary}"));
        let rendered = WHITESPACE_RE.replace_all(&text, " ").trim().to_string();
        debug!(query = %rendered, "composed correlated query");
        rendered
    }
}

impl fmt::Display for CorrelationComposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// The auxiliary as it should select correlation keys. All-negative
/// correlatable predicates collapse into one positive disjunction and flip
/// the membership test.
fn correlation_selection(query: &PipelineQuery) -> (PipelineQuery, Membership) {
    let correlatable: Vec<FilterPredicate> = query
        .where_predicates()
        .map(FilterPredicate::new)
        .filter(FilterPredicate::is_correlatable)
        .collect();

    if correlatable.is_empty() || !correlatable.iter().all(FilterPredicate::is_negative) {
        return (query.clone(), Membership::In);
    }

    let kept: Vec<Stage> = query
        .stages()
        .iter()
        .filter(|stage| {
            !stage
                .predicate()
                .is_some_and(|p| FilterPredicate::new(p).is_correlatable())
        })
        .cloned()
        .collect();
    let disjunction = correlatable
        .iter()
        .map(FilterPredicate::positive_body)
        .collect::<Vec<_>>()
        .join(" or ");

    (
        PipelineQuery::from_stages(kept).insert_filter(&format!("({disjunction})")),
        Membership::NotIn,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requests() -> CorrelationComposer {
        CorrelationComposer::new(
            PipelineQuery::parse("requests | where timestamp > ago(1h) | summarize count()"),
            "1h",
        )
    }

    #[test]
    fn test_same_table_filter_goes_to_primary() {
        let mut c = requests();
        assert_eq!(
            c.add_filter(&"where url == 'https://a/b'".into()),
            Routing::Primary
        );
        assert_eq!(
            c.render(),
            "requests | where timestamp > ago(1h) | where url == 'https://a/b' | summarize count()"
        );
        assert!(!c.is_used(TelemetryTable::Exceptions));
    }

    #[test]
    fn test_positive_foreign_filter_uses_in() {
        let mut c = requests();
        c.add_filters(["where type == 'TimeoutException'"]);
        assert_eq!(
            c.render(),
            "let exceptionsOperationIds = exceptions | where timestamp > ago(1h) | where type == 'TimeoutException' | distinct operation_Id; \
             requests | where timestamp > ago(1h) | where (operation_Id in (exceptionsOperationIds)) | summarize count()"
        );
    }

    #[test]
    fn test_all_negative_filters_invert_membership() {
        let mut c = requests();
        c.add_filters(["where type != 'A'", "where type != 'B'"]);
        let q = c.render();
        assert!(q.contains(
            "exceptions | where timestamp > ago(1h) | where (type == 'A' or type == 'B') | distinct operation_Id;"
        ));
        assert!(q.contains("where (operation_Id !in (exceptionsOperationIds))"));
        assert!(!q.contains("!="));
    }

    #[test]
    fn test_mixed_signs_keep_predicates_as_written() {
        let mut c = requests();
        c.add_filters(["where type == 'A'", "where type != 'B'"]);
        let q = c.render();
        assert!(q.contains("| where type == 'A' | where type != 'B' | distinct operation_Id;"));
        assert!(q.contains("operation_Id in (exceptionsOperationIds)"));
    }

    #[test]
    fn test_unclassified_filter_is_dropped() {
        let mut c = requests();
        let before = c.render();
        assert_eq!(c.add_filter(&"where client_Type == 'PC'".into()), Routing::Dropped);
        assert_eq!(c.render(), before);
    }

    #[test]
    fn test_window_reapplied_to_every_part() {
        let mut c = CorrelationComposer::new(
            PipelineQuery::parse("requests | where timestamp > ago(1h)"),
            "7d",
        );
        c.add_filters(["where type == 'X'"]);
        let q = c.render();
        assert!(!q.contains("ago(1h)"));
        assert_eq!(q.matches("ago(7d)").count(), 2);
    }

    #[test]
    fn test_replace_installs_base_as_binding() {
        let mut c = CorrelationComposer::new(
            PipelineQuery::parse("exceptions | where timestamp > ago(1h) | summarize count() by type"),
            "1h",
        );
        c.replace(
            TelemetryTable::Requests,
            PipelineQuery::parse("requests | where timestamp > ago(1h) | where success == false"),
        );
        assert!(c.is_used(TelemetryTable::Requests));
        assert_eq!(
            c.render(),
            "let requestsOperationIds = requests | where timestamp > ago(1h) | where success == false | distinct operation_Id; \
             exceptions | where timestamp > ago(1h) | where (operation_Id in (requestsOperationIds)) | summarize count() by type"
        );
    }

    #[test]
    fn test_filters_after_replace_extend_the_replaced_query() {
        let mut c = requests();
        c.replace(
            TelemetryTable::Exceptions,
            PipelineQuery::parse("exceptions | where timestamp > ago(1h) | where outerType == 'x'"),
        );
        c.add_filters(["where type == 'Y'"]);
        assert!(c.render().contains("where outerType == 'x' | where type == 'Y' | distinct operation_Id"));
    }

    #[test]
    fn test_bindings_render_in_table_order() {
        let mut c = CorrelationComposer::new(
            PipelineQuery::parse("availabilityResults | where timestamp > ago(1h)"),
            "1h",
        );
        c.add_filters(["where type == 'A'", "where url == 'u'"]);
        let q = c.render();
        let requests_at = q.find("let requestsOperationIds").unwrap();
        let exceptions_at = q.find("let exceptionsOperationIds").unwrap();
        assert!(requests_at < exceptions_at);
        assert!(q.ends_with(
            "where (operation_Id in (requestsOperationIds)) | where (operation_Id in (exceptionsOperationIds))"
        ));
    }

    #[test]
    fn test_remove_project_and_summarize_then_append() {
        let mut c = requests();
        c.remove_project_and_summarize();
        c.append(&PipelineQuery::parse("| summarize sum(itemCount)"));
        assert_eq!(
            c.render(),
            "requests | where timestamp > ago(1h) | summarize sum(itemCount)"
        );
        assert_eq!(c.source_table(), Some(TelemetryTable::Requests));
    }
}
