//! Exception breakdowns by type and by top stack frame.

use super::{cell_text, literal, Analyzer};
use tq_core::TelemetryTable;
use tq_store::Value;

fn type_filters(row: &[Value], index: usize) -> (String, String) {
    let exception_type = literal(row, index);
    (
        format!("where type == '{exception_type}'"),
        format!("where type != '{exception_type}'"),
    )
}

pub struct RequestExceptionsAnalyzer;

impl Analyzer for RequestExceptionsAnalyzer {
    fn name(&self) -> &'static str {
        "RequestExceptionsAnalyzer"
    }

    fn title(&self) -> &'static str {
        "Exceptions"
    }

    fn target_table(&self) -> TelemetryTable {
        TelemetryTable::Exceptions
    }

    fn aggregation(&self) -> &'static str {
        "| summarize _count = sum(itemCount) by type
         | sort by _count desc
         | take 20"
    }

    fn column_names(&self) -> &'static [&'static str] {
        &["Exception type", "Count"]
    }

    fn drill_filters(&self, row: &[Value]) -> (String, String) {
        type_filters(row, 0)
    }
}

/// Groups exceptions by the file and line of their innermost frame.
pub struct StacktraceAnalyzer;

impl Analyzer for StacktraceAnalyzer {
    fn name(&self) -> &'static str {
        "StacktraceAnalyzer"
    }

    fn title(&self) -> &'static str {
        "Stacktraces"
    }

    fn target_table(&self) -> TelemetryTable {
        TelemetryTable::Exceptions
    }

    fn aggregation(&self) -> &'static str {
        "| project operation_Id, itemCount, type, stack = details[0].parsedStack[0]
         | project operation_Id, itemCount, filename = stack.fileName, type, line = stack.line
         | where filename != ''
         | summarize sum(itemCount) by tostring(filename), type, tostring(line)
         | order by sum_itemCount desc
         | take 20"
    }

    fn column_names(&self) -> &'static [&'static str] {
        &["File", "Exception", "Line", "Count"]
    }

    fn drill_filters(&self, row: &[Value]) -> (String, String) {
        type_filters(row, 1)
    }

    /// `File` becomes `<base name>:<line>`, `Exception` loses its namespace.
    fn post_process(&self, row: &mut Vec<Value>) {
        let line = cell_text(row, 2);
        if let Some(file) = row.get_mut(0) {
            let path = file.to_string();
            let base = path.rsplit(['/', '\\']).next().unwrap_or(&path);
            *file = Value::String(if line.is_empty() {
                base.to_string()
            } else {
                format!("{base}:{line}")
            });
        }
        if let Some(exception) = row.get_mut(1) {
            let full = exception.to_string();
            let short = full.rsplit('.').next().unwrap_or(&full);
            *exception = Value::String(short.to_string());
        }
    }
}
