//! Composing, running and shaping an analyzer query.

use super::{Analyzer, AnalyzerError, AnalyzerResult};
use crate::store::fetch_table;
use std::time::Duration;
use tq_core::{CorrelationComposer, PipelineQuery, QueryError, TelemetryTable, TimeWindow};
use tq_store::{Column, ColumnType, TableResult, TelemetryStore, Value};
use tracing::{debug, warn};

/// Query text for `analyzer` over `base`, restricted by `filters`.
///
/// A base on the analyzer's own table is extended in place. Any other base
/// becomes the correlation binding of its table, and the analyzer reads its
/// target table restricted to the operations the base selects. A base on a
/// table without a correlation binding is rejected.
pub fn compose_query(
    analyzer: &dyn Analyzer,
    base: &PipelineQuery,
    filters: &[String],
) -> Result<String, QueryError> {
    let base = base.without_project_and_summarize();
    let window = TimeWindow::detect(&base)?;
    let target = analyzer.target_table();

    let mut composer = if base.is_source(target.as_str()) {
        CorrelationComposer::with_window(base, window)
    } else {
        let seed = PipelineQuery::parse(&format!(
            "{target} | where timestamp > ago({})",
            window.seed_token()
        ));
        let source = base.source_table().unwrap_or_default().to_string();
        let table = source
            .parse::<TelemetryTable>()
            .map_err(|_| QueryError::UncorrelatedTable(source.clone()))?;
        let mut composer = CorrelationComposer::with_window(seed, window);
        composer.replace(table, base);
        composer
    };
    composer.add_filters(filters);

    // appended after rendering so correlation filters stay ahead of projections
    let aggregation = analyzer
        .aggregation()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    Ok(format!("{} {aggregation}", composer.render()))
}

/// Run `analyzer` against `store`. Store failures and timeouts come back as a
/// failed [`AnalyzerResult`]; only composition errors are returned as `Err`.
pub async fn run(
    analyzer: &dyn Analyzer,
    store: &dyn TelemetryStore,
    base: &PipelineQuery,
    filters: &[String],
    timeout: Duration,
) -> Result<AnalyzerResult, AnalyzerError> {
    let query = compose_query(analyzer, base, filters)?;
    debug!(analyzer = analyzer.name(), %query, "running analyzer");

    match fetch_table(store, &query, timeout).await {
        Ok(table) => Ok(AnalyzerResult::ok(analyzer.title(), shape(analyzer, table))),
        Err(e) => {
            warn!(analyzer = analyzer.name(), error = %e, "analyzer query failed");
            Ok(AnalyzerResult::failed(analyzer.title(), e))
        }
    }
}

/// Rename the columns and add the drill pair to every row. The pair is
/// computed from the raw row, before display formatting.
fn shape(analyzer: &dyn Analyzer, mut table: TableResult) -> TableResult {
    for (column, name) in table.columns.iter_mut().zip(analyzer.column_names()) {
        column.name = (*name).to_string();
    }
    table.columns.push(Column::new("drillIn", ColumnType::String));
    table.columns.push(Column::new("drillOut", ColumnType::String));

    for row in &mut table.rows {
        let (drill_in, drill_out) = analyzer.drill_filters(row);
        analyzer.post_process(row);
        row.push(Value::String(drill_in));
        row.push(Value::String(drill_out));
    }
    table
}
