//! Request breakdowns: by operation, url, domain and status code.

use super::{cell_text, literal, with_unit, Analyzer};
use tq_core::TelemetryTable;
use tq_store::Value;

const REQUEST_COLUMNS: &[&str] = &["Operation name", "Count", "Duration", "Failures", "Percentage"];

/// Duration in ms and failure rate in percent, both rounded.
fn format_request_row(row: &mut [Value]) {
    if let Some(duration) = row.get_mut(2) {
        *duration = with_unit(duration, "ms");
    }
    if let Some(percentage) = row.get_mut(4) {
        *percentage = with_unit(percentage, "%");
    }
}

pub struct RequestsAnalyzer;

impl Analyzer for RequestsAnalyzer {
    fn name(&self) -> &'static str {
        "RequestsAnalyzer"
    }

    fn title(&self) -> &'static str {
        "Requests"
    }

    fn target_table(&self) -> TelemetryTable {
        TelemetryTable::Requests
    }

    fn aggregation(&self) -> &'static str {
        "| summarize duration = avg(duration), failedCount=sumif(itemCount, success == false), totalCount=sum(itemCount) by operation_Name
         | order by totalCount desc
         | take 20
         | project operation_Name, totalCount, duration, failedCount, failedPercentage = 100.0 / totalCount * failedCount"
    }

    fn column_names(&self) -> &'static [&'static str] {
        REQUEST_COLUMNS
    }

    fn drill_filters(&self, row: &[Value]) -> (String, String) {
        let name = literal(row, 0);
        (
            format!("where operation_Name == '{name}'"),
            format!("where operation_Name != '{name}'"),
        )
    }

    fn post_process(&self, row: &mut Vec<Value>) {
        format_request_row(row);
    }
}

pub struct UrlAnalyzer;

impl Analyzer for UrlAnalyzer {
    fn name(&self) -> &'static str {
        "UrlAnalyzer"
    }

    fn title(&self) -> &'static str {
        "Urls"
    }

    fn target_table(&self) -> TelemetryTable {
        TelemetryTable::Requests
    }

    fn aggregation(&self) -> &'static str {
        "| summarize duration = avg(duration), failedCount=sumif(itemCount, success == false), totalCount=sum(itemCount) by url
         | order by failedCount desc
         | take 20
         | project url, totalCount, duration, failedCount, failedPercentage = 100.0 / totalCount * failedCount"
    }

    fn column_names(&self) -> &'static [&'static str] {
        &["Url", "Count", "Duration", "Failures", "Percentage"]
    }

    fn drill_filters(&self, row: &[Value]) -> (String, String) {
        let url = literal(row, 0);
        (format!("where url == '{url}'"), format!("where url != '{url}'"))
    }

    fn post_process(&self, row: &mut Vec<Value>) {
        format_request_row(row);
    }
}

pub struct DomainAnalyzer;

impl Analyzer for DomainAnalyzer {
    fn name(&self) -> &'static str {
        "DomainAnalyzer"
    }

    fn title(&self) -> &'static str {
        "Domains"
    }

    fn target_table(&self) -> TelemetryTable {
        TelemetryTable::Requests
    }

    fn aggregation(&self) -> &'static str {
        "| project domain = extract('^(https|http)://(.*?)/', 2, url), duration, itemCount, success
         | summarize duration = avg(duration), failedCount=sumif(itemCount, success == false), totalCount=sum(itemCount) by domain
         | order by totalCount desc
         | take 20
         | project domain, totalCount, duration, failedCount, failedPercentage = 100.0 / totalCount * failedCount"
    }

    fn column_names(&self) -> &'static [&'static str] {
        &["Domain", "Count", "Duration", "Failures", "Percentage"]
    }

    fn drill_filters(&self, row: &[Value]) -> (String, String) {
        let domain = literal(row, 0);
        (
            format!("where url contains '{domain}'"),
            format!("where url !contains '{domain}'"),
        )
    }

    fn post_process(&self, row: &mut Vec<Value>) {
        format_request_row(row);
    }
}

pub struct StatusCodesAnalyzer;

impl Analyzer for StatusCodesAnalyzer {
    fn name(&self) -> &'static str {
        "StatusCodesAnalyzer"
    }

    fn title(&self) -> &'static str {
        "Status codes"
    }

    fn target_table(&self) -> TelemetryTable {
        TelemetryTable::Requests
    }

    fn aggregation(&self) -> &'static str {
        "| summarize _count=sum(itemCount) by resultCode
         | project resultCode, _count
         | sort by _count desc
         | take 20"
    }

    fn column_names(&self) -> &'static [&'static str] {
        &["Status code", "Count"]
    }

    // status codes compare unquoted
    fn drill_filters(&self, row: &[Value]) -> (String, String) {
        let code = cell_text(row, 0);
        (
            format!("where resultCode == {code}"),
            format!("where resultCode != {code}"),
        )
    }
}
