//! # Panels
//!
//! What the dashboard and item pages ask for: the tile overview, the detail
//! chart with its drill-down query and count, and analyzer breakdowns. Each
//! panel renders the item's template for the requested window, composes the
//! operator's filters into it and runs the resulting queries concurrently.

use crate::analyzers::{self, AnalyzerError, AnalyzerResult};
use crate::dashboards::{DashboardItem, ItemTotal};
use crate::store::fetch_table;
use crate::timeseries::{self, ItemStatus, Point};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tq_core::search::search_predicates;
use tq_core::template::{render_template, render_value_template};
use tq_core::{CorrelationComposer, ItemDuration, PipelineQuery, QueryError, TelemetryTable, TimeWindow};
use tq_store::{StoreError, TelemetryStore};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
}

/// Server-wide knobs every panel needs.
#[derive(Debug, Clone, Copy)]
pub struct PanelSettings {
    pub timeout: Duration,
    pub splits: u32,
}

// =============================================================================
// Request parameters
// =============================================================================

/// Query-string parameters of the details and analyzer pages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelRequest {
    pub duration: Option<ItemDuration>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub filters: Vec<String>,
}

impl PanelRequest {
    /// Accepts `duration`, `durationFrom`, `durationTo`, `searchQuery` and
    /// repeated `queryParts` (or `queryParts[]`). Empty values are ignored.
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, PanelError> {
        let mut request = Self::default();
        for (key, value) in pairs {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "duration" => {
                    request.duration = Some(
                        value
                            .parse()
                            .map_err(|e: QueryError| PanelError::BadRequest(e.to_string()))?,
                    )
                }
                "durationFrom" => request.from = Some(parse_timestamp(value)?),
                "durationTo" => request.to = Some(parse_timestamp(value)?),
                "searchQuery" => request.search = Some(value.to_string()),
                "queryParts" | "queryParts[]" => request.filters.push(value.to_string()),
                other => debug!(parameter = other, "ignoring unknown parameter"),
            }
        }
        Ok(request)
    }

    /// Requested window; the item's own duration when none was asked for.
    pub fn window(&self, item: &DashboardItem) -> Result<TimeWindow, QueryError> {
        TimeWindow::from_request(self.duration.unwrap_or(item.duration), self.from, self.to)
    }

    fn search_predicates(&self) -> Vec<String> {
        self.search.as_deref().map(search_predicates).unwrap_or_default()
    }
}

/// RFC 3339, or a naive ISO timestamp taken as UTC.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, PanelError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| PanelError::BadRequest(format!("invalid timestamp '{value}'")))
}

// =============================================================================
// Overview
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub value: String,
    pub chart_values: Vec<f64>,
    pub chart_max: f64,
    pub status: ItemStatus,
}

/// Tile data over the item's own duration.
pub async fn overview(
    item: &DashboardItem,
    store: &dyn TelemetryStore,
    settings: PanelSettings,
    now: DateTime<Utc>,
) -> Result<Overview, PanelError> {
    let window = TimeWindow::from_request(item.duration, None, None)?;
    let interval = window.interval(settings.splits);
    let series_query = render_template(&item.query, &window, interval);
    let value_query = render_value_template(&item.query, &window);

    let (series, value) = tokio::join!(
        fetch_table(store, &series_query, settings.timeout),
        fetch_table(store, &value_query, settings.timeout),
    );
    let points = timeseries::points_from_table(&series?);
    let value = value?
        .rows
        .first()
        .and_then(|row| row.get(1))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    let value = match item.total {
        ItemTotal::Rpm => value / window.span().num_minutes().max(1) as f64,
        _ => value,
    };

    let chart_values = timeseries::overview_series(&points, window.span(), interval, now);
    let chart_max = chart_values.iter().copied().fold(item.min_chart_value, f64::max);
    let status = timeseries::derive_status(
        value,
        &points,
        &item.thresholds,
        item.total,
        item.status_split_factor,
        interval,
    );

    Ok(Overview {
        value: item.format.format(value),
        chart_values,
        chart_max,
        status,
    })
}

// =============================================================================
// Details
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Details {
    pub name: String,
    pub chart_values: Vec<Point>,
    pub chart_max: f64,
    /// The composed filter query without display stages.
    pub query: String,
    pub count: Option<i64>,
}

fn composed(item: &DashboardItem, request: &PanelRequest, window: &TimeWindow, splits: u32) -> CorrelationComposer {
    let text = render_template(&item.query, window, window.interval(splits));
    let mut composer = CorrelationComposer::with_window(PipelineQuery::parse(&text), window.clone());
    composer.add_filters(&request.filters);
    for predicate in request.search_predicates() {
        composer.add_where(&predicate);
    }
    composer
}

fn with_tail(composer: &CorrelationComposer, tail: &str) -> String {
    let mut composer = composer.clone();
    composer.remove_project_and_summarize();
    composer.append(&PipelineQuery::parse(tail));
    composer.render()
}

pub async fn details(
    group_name: &str,
    item: &DashboardItem,
    request: &PanelRequest,
    store: &dyn TelemetryStore,
    settings: PanelSettings,
    now: DateTime<Utc>,
) -> Result<Details, PanelError> {
    let window = request.window(item)?;
    let interval = window.interval(settings.splits);
    let composer = composed(item, request, &window, settings.splits);

    let chart_query = composer.render();
    let count_query = with_tail(&composer, "| summarize sum(itemCount)");
    let (chart, count) = tokio::join!(
        fetch_table(store, &chart_query, settings.timeout),
        fetch_table(store, &count_query, settings.timeout),
    );

    let mut points = timeseries::points_from_table(&chart?);
    let counted_source = matches!(
        composer.source_table(),
        Some(TelemetryTable::Requests | TelemetryTable::Exceptions)
    );
    let values: Vec<f64> = points.iter().map(|p| p.value).collect();
    if counted_source && timeseries::needs_coarse_fallback(&values) {
        info!(item = %item.name, "series looks per-error, re-querying plain counts");
        let fallback = with_tail(
            &composer,
            &format!(
                "| summarize _count=sum(itemCount) by bin(timestamp, {}) | project timestamp, _count",
                interval.token()
            ),
        );
        points = timeseries::points_from_table(&fetch_table(store, &fallback, settings.timeout).await?);
    }

    let chart_values = match &window {
        TimeWindow::Ago { .. } => timeseries::fill_trailing(&points, window.span(), interval, now),
        TimeWindow::Between { from, to } => timeseries::fill_gaps(&points, *from, *to, interval),
    };
    let native = item.duration.interval(settings.splits).unwrap_or(interval);
    let chart_max = timeseries::ceiling(
        timeseries::max_value(&chart_values),
        timeseries::scale_minimum(item.min_chart_value, native, interval),
    );

    let count = match count {
        Ok(table) => table
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(|v| v.as_f64())
            .map(|v| v as i64),
        Err(e) => {
            warn!(item = %item.name, error = %e, "count query failed");
            None
        }
    };

    let mut display = composer.clone();
    display.remove_project_and_summarize();
    Ok(Details {
        name: format!("{group_name} / {}", item.name),
        chart_values,
        chart_max,
        query: display.render(),
        count,
    })
}

// =============================================================================
// Analyzer
// =============================================================================

/// Run the analyzer called `name` over the item's query with the search
/// folded in and the request's filters routed by the analyzer pipeline.
pub async fn analyze(
    item: &DashboardItem,
    name: &str,
    request: &PanelRequest,
    store: &dyn TelemetryStore,
    settings: PanelSettings,
) -> Result<AnalyzerResult, PanelError> {
    let analyzer = analyzers::lookup(name)?;
    let window = request.window(item)?;
    let mut base = PipelineQuery::parse(&render_template(&item.query, &window, window.interval(settings.splits)));

    let search = request.search_predicates();
    if !search.is_empty() {
        let mut composer = CorrelationComposer::with_window(base, window);
        for predicate in &search {
            composer.add_where(predicate);
        }
        base = PipelineQuery::parse(&composer.render());
    }

    Ok(analyzers::run(analyzer, store, &base, &request.filters, settings.timeout).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboards::{Thresholds, ValueFormat};
    use crate::store::testing::{table, FakeStore};
    use chrono::Duration as Span;
    use tq_store::{ColumnType, Value};

    fn at(minute: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Span::minutes(minute)
    }

    fn settings() -> PanelSettings {
        PanelSettings {
            timeout: Duration::from_secs(1),
            splits: 30,
        }
    }

    fn item(query: &str, total: ItemTotal) -> DashboardItem {
        DashboardItem {
            name: "Requests".into(),
            store: "prod".into(),
            query: query.into(),
            postfix: "pm".into(),
            duration: ItemDuration::OneHour,
            total,
            min_chart_value: 100.0,
            thresholds: Thresholds::default(),
            status_split_factor: 4,
            format: ValueFormat::Integer,
        }
    }

    fn series(points: &[(i64, f64)]) -> tq_store::TableResult {
        table(
            &[("timestamp", ColumnType::Datetime), ("_count", ColumnType::Real)],
            points
                .iter()
                .map(|(m, v)| vec![Value::Datetime(at(*m)), Value::Real(*v)])
                .collect(),
        )
    }

    const COUNTS: &str = "requests | where timestamp > ago(1h) | where client_Type == 'PC' \
        | summarize _count=sum(itemCount) by bin(timestamp, 2m) | project timestamp, _count";

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_request_from_pairs() {
        let request = PanelRequest::from_pairs(&pairs(&[
            ("duration", "42"),
            ("durationFrom", "2024-03-01T00:00:00Z"),
            ("durationTo", "2024-03-01T06:00:00.000"),
            ("searchQuery", "checkout"),
            ("queryParts", "where type == 'A'"),
            ("queryParts[]", "where url != '/'"),
            ("searchQuery", ""),
        ]))
        .unwrap();

        assert_eq!(request.duration, Some(ItemDuration::Custom));
        assert_eq!(request.to.unwrap() - request.from.unwrap(), Span::hours(6));
        assert_eq!(request.search.as_deref(), Some("checkout"));
        assert_eq!(request.filters.len(), 2);

        assert!(matches!(
            PanelRequest::from_pairs(&pairs(&[("durationFrom", "yesterday")])),
            Err(PanelError::BadRequest(_))
        ));
    }

    #[test]
    fn test_request_defaults_to_item_duration() {
        let request = PanelRequest::default();
        let window = request.window(&item(COUNTS, ItemTotal::Sum)).unwrap();
        assert_eq!(window, TimeWindow::ago("1h").unwrap());
    }

    #[tokio::test]
    async fn test_overview() {
        let store = FakeStore::new()
            .answer(
                "bin(timestamp, 90d)",
                table(
                    &[("timestamp", ColumnType::Datetime), ("_count", ColumnType::Long)],
                    vec![vec![Value::Datetime(at(0)), Value::Long(600)]],
                ),
            )
            .answer("bin(timestamp, 2m)", series(&[(0, 5.0), (60, 7.0)]));

        let overview = overview(&item(COUNTS, ItemTotal::Rpm), &store, settings(), at(61))
            .await
            .unwrap();

        assert_eq!(overview.value, "10");
        assert_eq!(overview.chart_values.len(), 31);
        assert_eq!(overview.chart_values[30], 7.0);
        assert_eq!(overview.chart_max, 100.0);
        assert_eq!(overview.status, ItemStatus::Normal);
        assert_eq!(store.recorded().len(), 2);
    }

    #[tokio::test]
    async fn test_details_with_range_filters_and_search() {
        let store = FakeStore::new()
            .answer(
                "summarize sum(itemCount)",
                table(&[("sum_itemCount", ColumnType::Long)], vec![vec![Value::Long(42)]]),
            )
            .answer("bin(timestamp", series(&[(10, 3.0), (20, 8.0)]));
        let request = PanelRequest {
            duration: Some(ItemDuration::Custom),
            from: Some(at(0)),
            to: Some(at(60)),
            search: Some("checkout".into()),
            filters: vec!["where type == 'TimeoutException'".into()],
        };

        let details = details("Checkout", &item(COUNTS, ItemTotal::Sum), &request, &store, settings(), at(500))
            .await
            .unwrap();

        assert_eq!(details.name, "Checkout / Requests");
        assert_eq!(details.count, Some(42));
        assert_eq!(details.chart_values.len(), 29);
        assert_eq!(details.chart_values[0].timestamp, at(2));
        assert_eq!(details.chart_max, 40.0);
        assert!(details.query.starts_with("let exceptionsOperationIds = exceptions"));
        assert!(details.query.contains("where * contains 'checkout'"));
        assert!(details.query.contains("timestamp >= datetime('2024-03-01T12:00:00Z')"));
        assert!(!details.query.contains("summarize"));
    }

    #[tokio::test]
    async fn test_details_count_failure_is_tolerated() {
        let store = FakeStore::new()
            .fail("summarize sum(itemCount)", "boom")
            .answer("bin(timestamp", series(&[(0, 1.0)]));

        let details = details("G", &item(COUNTS, ItemTotal::Sum), &PanelRequest::default(), &store, settings(), at(1))
            .await
            .unwrap();
        assert_eq!(details.count, None);
    }

    #[tokio::test]
    async fn test_details_falls_back_to_plain_counts() {
        let failed = "requests | where timestamp > ago(1h) \
            | summarize totalCount=sum(itemCount), errorCount=sumif(itemCount, success == false) by bin(timestamp, 2m) \
            | project timestamp, 100.0 / totalCount * errorCount";
        let store = FakeStore::new()
            .answer(
                "errorCount",
                series(&[(0, 100.0), (2, 100.0), (4, 100.0), (6, 100.0), (8, 100.0), (10, 100.0)]),
            )
            .answer("_count=sum(itemCount) by bin(timestamp, 2m)", series(&[(0, 17.0)]));

        let details = details("G", &item(failed, ItemTotal::Average), &PanelRequest::default(), &store, settings(), at(11))
            .await
            .unwrap();

        let queries = store.recorded();
        assert_eq!(queries.len(), 3);
        assert!(queries[2].ends_with("| summarize _count=sum(itemCount) by bin(timestamp, 2m) | project timestamp, _count"));
        assert!(details.chart_values.iter().any(|p| p.value == 17.0));
        assert!(details.chart_values.iter().all(|p| p.value != 100.0));
    }

    #[tokio::test]
    async fn test_analyze_folds_search_into_base() {
        let store = FakeStore::new();
        let request = PanelRequest {
            search: Some("!health".into()),
            ..PanelRequest::default()
        };

        let result = analyze(&item(COUNTS, ItemTotal::Sum), "StatusCodesAnalyzer", &request, &store, settings())
            .await
            .unwrap();

        assert!(result.success);
        let queries = store.recorded();
        assert!(queries[0].contains("where * !contains 'health' | summarize _count=sum(itemCount) by resultCode"));
    }

    #[tokio::test]
    async fn test_analyze_unknown_analyzer() {
        let store = FakeStore::new();
        let result = analyze(&item(COUNTS, ItemTotal::Sum), "RoleAnalyzer", &PanelRequest::default(), &store, settings()).await;
        assert!(matches!(
            result,
            Err(PanelError::Analyzer(AnalyzerError::UnknownAnalyzer(_)))
        ));
        assert!(store.recorded().is_empty());
    }
}
