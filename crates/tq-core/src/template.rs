//! Rendering of dashboard query templates for a concrete window.

use crate::duration::Interval;
use crate::window::TimeWindow;
use once_cell::sync::Lazy;
use regex::Regex;

static BIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"bin\((\w+),\s*[0-9a-z]+\)").expect("bin regex"));

/// Bin width used for single-value queries: one bucket covers any window.
pub const VALUE_BIN: &str = "90d";

/// Substitute the window and the bucket width into `template`.
pub fn render_template(template: &str, window: &TimeWindow, interval: Interval) -> String {
    rebin(&window.apply(template), &interval.token())
}

/// Template rendered so that it yields one value for the whole window.
pub fn render_value_template(template: &str, window: &TimeWindow) -> String {
    rebin(&window.apply(template), VALUE_BIN)
}

fn rebin(text: &str, bin: &str) -> String {
    BIN_RE
        .replace_all(text, format!("bin($1, {bin})").as_str())
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    const TEMPLATE: &str = "requests | where timestamp > ago(1h) | summarize _count=sum(itemCount) by bin(timestamp, 1m) | project timestamp, _count";

    #[test]
    fn test_render_relative() {
        let window = TimeWindow::ago("1d").unwrap();
        let q = render_template(TEMPLATE, &window, window.interval(30));
        assert_eq!(
            q,
            "requests | where timestamp > ago(1d) | summarize _count=sum(itemCount) by bin(timestamp, 48m) | project timestamp, _count"
        );
    }

    #[test]
    fn test_render_value() {
        let window = TimeWindow::ago("6h").unwrap();
        assert!(render_value_template(TEMPLATE, &window).contains("bin(timestamp, 90d)"));
    }

    #[test]
    fn test_render_explicit_range() {
        let from: DateTime<Utc> = "2024-03-01T00:00:00Z".parse().unwrap();
        let to: DateTime<Utc> = "2024-03-01T10:00:00Z".parse().unwrap();
        let window = TimeWindow::between(from, to).unwrap();
        let q = render_template(TEMPLATE, &window, window.interval(30));
        assert!(q.contains(
            "where timestamp >= datetime('2024-03-01T00:00:00Z') and timestamp <= datetime('2024-03-01T10:00:00Z')"
        ));
        assert!(q.contains("bin(timestamp, 20m)"));
    }
}
