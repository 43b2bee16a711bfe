//! Built-in item definitions for the common request/exception/web-test tiles.

use super::{ItemTotal, Thresholds, ValueFormat};
use serde::Deserialize;
use tq_core::ItemDuration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    RequestsPerMinute,
    ExceptionsPerMinute,
    ResponseTime,
    FailedRequests,
    Exceptions,
    WebTests,
}

/// Aggregate used by [`Preset::ResponseTime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationAggregate {
    Average,
    P50,
    #[default]
    P90,
    P95,
    P99,
}

impl DurationAggregate {
    fn expression(self) -> &'static str {
        match self {
            Self::Average => "avg(duration)",
            Self::P50 => "percentile(duration, 50)",
            Self::P90 => "percentile(duration, 90)",
            Self::P95 => "percentile(duration, 95)",
            Self::P99 => "percentile(duration, 99)",
        }
    }
}

/// Settings a preset contributes before per-item overrides.
#[derive(Debug, Clone)]
pub struct PresetDefaults {
    pub name: &'static str,
    pub query: String,
    pub postfix: &'static str,
    pub duration: ItemDuration,
    pub total: ItemTotal,
    pub min_chart_value: f64,
    pub thresholds: Thresholds,
    pub format: ValueFormat,
}

impl PresetDefaults {
    fn new(name: &'static str, query: String) -> Self {
        Self {
            name,
            query,
            postfix: "",
            duration: ItemDuration::OneHour,
            total: ItemTotal::Average,
            min_chart_value: 100.0,
            thresholds: Thresholds::default(),
            format: ValueFormat::Integer,
        }
    }
}

pub fn defaults(preset: Preset, aggregate: DurationAggregate) -> PresetDefaults {
    match preset {
        Preset::RequestsPerMinute => PresetDefaults {
            postfix: "pm",
            total: ItemTotal::Rpm,
            min_chart_value: 1000.0,
            ..PresetDefaults::new(
                "Requests",
                counted("requests"),
            )
        },
        Preset::ExceptionsPerMinute => PresetDefaults {
            postfix: "pm",
            total: ItemTotal::Rpm,
            ..PresetDefaults::new("Exceptions", counted("exceptions"))
        },
        Preset::ResponseTime => PresetDefaults {
            postfix: "ms",
            min_chart_value: 1000.0,
            thresholds: Thresholds {
                warning: 1000.0,
                error: 2000.0,
                ..Thresholds::default()
            },
            ..PresetDefaults::new(
                "Response time",
                format!(
                    "requests
                    | where timestamp > ago(1h)
                    | where client_Type == 'PC'
                    | summarize _duration = {} by bin(timestamp, 2m)
                    | project timestamp, _duration",
                    aggregate.expression()
                ),
            )
        },
        Preset::FailedRequests => PresetDefaults {
            postfix: "%",
            min_chart_value: 10.0,
            format: ValueFormat::OneDecimal,
            thresholds: Thresholds {
                warning: 5.0,
                error: 10.0,
                ..Thresholds::default()
            },
            ..PresetDefaults::new(
                "Failed requests",
                "requests
                | where timestamp > ago(1h)
                | where client_Type == 'PC'
                | summarize totalCount=sum(itemCount), errorCount=sumif(itemCount, success == false) by bin(timestamp, 2m)
                | project timestamp, 100.0 / totalCount * errorCount"
                    .to_string(),
            )
        },
        Preset::Exceptions => PresetDefaults {
            min_chart_value: 10.0,
            total: ItemTotal::Sum,
            thresholds: Thresholds {
                warning: 10.0,
                error: 50.0,
                ..Thresholds::default()
            },
            ..PresetDefaults::new("Exceptions", counted("exceptions"))
        },
        Preset::WebTests => PresetDefaults {
            postfix: "%",
            min_chart_value: 10.0,
            duration: ItemDuration::TwelveHours,
            format: ValueFormat::InvertedPercentage,
            thresholds: Thresholds {
                warning: 1.0,
                error: 5.0,
                ..Thresholds::default()
            },
            ..PresetDefaults::new(
                "Web tests",
                "availabilityResults
                | where timestamp > ago(24h)
                | where client_Type == 'PC'
                | summarize _successCount=todouble(countif(success == 1)), _totalCount=todouble(count()) by bin(timestamp, 1h)
                | project timestamp, 100.0 - (_successCount / _totalCount * 100.0)"
                    .to_string(),
            )
        },
    }
}

fn counted(table: &str) -> String {
    format!(
        "{table}
        | where timestamp > ago(1h)
        | where client_Type == 'PC'
        | summarize _count=sum(itemCount) by bin(timestamp, 2m)
        | project timestamp, _count"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tq_core::PipelineQuery;

    #[test]
    fn test_every_preset_has_a_window_and_bin() {
        for preset in [
            Preset::RequestsPerMinute,
            Preset::ExceptionsPerMinute,
            Preset::ResponseTime,
            Preset::FailedRequests,
            Preset::Exceptions,
            Preset::WebTests,
        ] {
            let query = PipelineQuery::parse(&defaults(preset, DurationAggregate::default()).query);
            assert!(query.extract_duration_token().is_ok(), "{preset:?}");
            assert!(query.to_query_string().contains("bin(timestamp,"), "{preset:?}");
        }
    }

    #[test]
    fn test_response_time_aggregate() {
        let preset = defaults(Preset::ResponseTime, DurationAggregate::P99);
        assert!(preset.query.contains("percentile(duration, 99)"));
        assert_eq!(preset.thresholds.error, 2000.0);
    }
}
