//! # tq-cli — The "Console" of TELEQUERY
//!
//! - `tq compose <query> --filter ... --search ...` — Compose a correlated query offline.
//! - `tq search <text>` — Show the predicates a free-text search expands to.
//! - `tq dashboard|overview|details|analyze` — Read panels from a running hub.

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tabled::builder::Builder;
use tq_core::search::search_predicates;
use tq_core::{CorrelationComposer, ItemDuration, PipelineQuery, QueryError, TimeWindow};
use uuid::Uuid;

/// TELEQUERY: correlated drill-down over pipeline telemetry queries.
#[derive(Parser)]
#[command(name = "tq", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose filters and a search into a base query and print the result.
    Compose {
        /// Base query, e.g. "requests | where timestamp > ago(1h)".
        query: String,

        /// `where` predicate to route (repeatable).
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Free-text search.
        #[arg(long)]
        search: Option<String>,

        /// Window to apply instead of the one in the query (1h, 6h, ... 90d).
        #[arg(long)]
        duration: Option<String>,
    },

    /// Print the predicates a free-text search expands to.
    Search { text: String },

    /// List the groups and items of a dashboard.
    Dashboard { id: Uuid },

    /// Tile value, status and series of one item.
    Overview {
        id: Uuid,
        group: usize,
        item: usize,
    },

    /// Detail chart, count and drill-down query of one item.
    Details {
        id: Uuid,
        group: usize,
        item: usize,
        #[command(flatten)]
        params: PanelParams,
    },

    /// Run an analyzer (e.g. RequestsAnalyzer) over one item.
    Analyze {
        id: Uuid,
        group: usize,
        item: usize,
        analyzer: String,
        #[command(flatten)]
        params: PanelParams,

        /// Also print the drill-in / drill-out filters of each row.
        #[arg(long)]
        drill: bool,
    },
}

#[derive(Args, Default)]
struct PanelParams {
    /// 1h, 6h, 12h, 1d, 3d, 7d, 30d, 90d or custom.
    #[arg(long)]
    duration: Option<String>,

    /// Range start for a custom duration (RFC 3339).
    #[arg(long)]
    from: Option<String>,

    /// Range end for a custom duration (RFC 3339).
    #[arg(long)]
    to: Option<String>,

    #[arg(long)]
    search: Option<String>,

    /// Drill filter (repeatable).
    #[arg(long = "filter")]
    filters: Vec<String>,
}

impl PanelParams {
    fn to_query(&self) -> Result<Vec<(&'static str, String)>, String> {
        let mut query = Vec::new();
        if let Some(duration) = &self.duration {
            let duration: ItemDuration = duration.parse().map_err(|e: QueryError| e.to_string())?;
            query.push(("duration", duration.to_string()));
        }
        for (key, value) in [("durationFrom", &self.from), ("durationTo", &self.to)] {
            if let Some(value) = value {
                chrono::DateTime::parse_from_rfc3339(value)
                    .map_err(|e| format!("invalid {key} '{value}': {e}"))?;
                query.push((key, value.clone()));
            }
        }
        if let Some(search) = &self.search {
            query.push(("searchQuery", search.clone()));
        }
        query.extend(self.filters.iter().map(|f| ("queryParts", f.clone())));
        Ok(query)
    }
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Compose {
            query,
            filters,
            search,
            duration,
        } => match compose(&query, &filters, search.as_deref(), duration.as_deref()) {
            Ok(composed) => println!("{composed}"),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },

        Commands::Search { text } => {
            for predicate in search_predicates(&text) {
                println!("{predicate}");
            }
        }

        // Hub commands
        cmd => {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build();
            match rt {
                Ok(rt) => rt.block_on(async_main(cmd)),
                Err(e) => {
                    eprintln!("Failed to build tokio runtime: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

/// Offline composition with the same routing the hub applies.
fn compose(
    query: &str,
    filters: &[String],
    search: Option<&str>,
    duration: Option<&str>,
) -> Result<String, QueryError> {
    let base = PipelineQuery::parse(query);
    let window = match duration {
        Some(duration) => {
            let duration: ItemDuration = duration.parse()?;
            TimeWindow::from_request(duration, None, None)?
        }
        None => TimeWindow::detect(&base)?,
    };

    let mut composer = CorrelationComposer::with_window(base, window);
    composer.add_filters(filters);
    for predicate in search.map(search_predicates).unwrap_or_default() {
        composer.add_where(&predicate);
    }
    Ok(composer.render())
}

async fn async_main(cmd: Commands) {
    let client = reqwest::Client::new();
    let base_url =
        std::env::var("TQ_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string());

    let (path, query, drill) = match &cmd {
        Commands::Dashboard { id } => (format!("/api/dashboard/{id}"), Vec::new(), None),
        Commands::Overview { id, group, item } => (
            format!("/api/dashboard/{id}/overview/{group}/{item}"),
            Vec::new(),
            None,
        ),
        Commands::Details {
            id,
            group,
            item,
            params,
        } => match params.to_query() {
            Ok(query) => (format!("/api/dashboard/{id}/details/{group}/{item}"), query, None),
            Err(e) => exit_with(&e),
        },
        Commands::Analyze {
            id,
            group,
            item,
            analyzer,
            params,
            drill,
        } => match params.to_query() {
            Ok(query) => (
                format!("/api/dashboard/{id}/analyzer/{group}/{item}/{analyzer}"),
                query,
                Some(*drill),
            ),
            Err(e) => exit_with(&e),
        },
        Commands::Compose { .. } | Commands::Search { .. } => return,
    };

    let url = format!("{}{}", base_url.trim_end_matches('/'), path);
    let json = match get_request(&client, &url, &query).await {
        Ok(json) => json,
        Err(e) => exit_with(&e),
    };

    match drill {
        Some(drill) => match serde_json::from_value::<AnalyzerResponse>(json.clone()) {
            Ok(response) => println!("{}", render_analyzer(&response, drill)),
            Err(_) => print_json(&json),
        },
        None => print_json(&json),
    }
}

async fn get_request(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, String)],
) -> Result<serde_json::Value, String> {
    let response = client
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let status = response.status();
    let json = response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| format!("{status}: {e}"))?;
    if !status.is_success() {
        let message = json.get("error").and_then(|e| e.as_str()).unwrap_or("request failed");
        return Err(format!("{status}: {message}"));
    }
    Ok(json)
}

fn print_json(json: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(json).unwrap_or_default());
}

fn exit_with(message: &str) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1)
}

// =============================================================================
// Analyzer tables
// =============================================================================

#[derive(Deserialize)]
struct AnalyzerResponse {
    name: String,
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    table: Option<AnalyzerTable>,
}

#[derive(Deserialize)]
struct AnalyzerTable {
    columns: Vec<AnalyzerColumn>,
    rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
struct AnalyzerColumn {
    name: String,
}

const DRILL_COLUMNS: [&str; 2] = ["drillIn", "drillOut"];

fn render_analyzer(response: &AnalyzerResponse, drill: bool) -> String {
    if !response.success {
        return format!(
            "{}: failed ({})",
            response.name,
            response.error.as_deref().unwrap_or("unknown error")
        );
    }
    let Some(table) = &response.table else {
        return format!("{}: no data", response.name);
    };

    let shown: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| drill || !DRILL_COLUMNS.contains(&c.name.as_str()))
        .map(|(i, _)| i)
        .collect();

    let mut builder = Builder::default();
    builder.push_record(shown.iter().map(|&i| table.columns[i].name.clone()));
    for row in &table.rows {
        builder.push_record(shown.iter().map(|&i| match row.get(i) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }));
    }
    format!("{}\n{}", response.name, builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_offline() {
        let composed = compose(
            "requests | where timestamp > ago(1h) | summarize count()",
            &["where type != 'A'".to_string(), "where url == '/x'".to_string()],
            Some("checkout"),
            Some("6h"),
        )
        .unwrap();
        assert_eq!(
            composed,
            "let exceptionsOperationIds = exceptions | where timestamp > ago(6h) | where (type == 'A') \
             | distinct operation_Id; requests | where timestamp > ago(6h) | where url == '/x' \
             | where * contains 'checkout' | where (operation_Id !in (exceptionsOperationIds)) | summarize count()"
        );
    }

    #[test]
    fn test_compose_needs_window() {
        assert!(compose("requests | take 10", &[], None, None).is_err());
        assert!(compose("requests | take 10", &[], None, Some("fortnight")).is_err());
    }

    #[test]
    fn test_panel_params_to_query() {
        let params = PanelParams {
            duration: Some("SixHours".into()),
            search: Some("timeout".into()),
            filters: vec!["where type == 'A'".into()],
            ..PanelParams::default()
        };
        assert_eq!(
            params.to_query().unwrap(),
            vec![
                ("duration", "6h".to_string()),
                ("searchQuery", "timeout".to_string()),
                ("queryParts", "where type == 'A'".to_string()),
            ]
        );

        let params = PanelParams {
            from: Some("last tuesday".into()),
            ..PanelParams::default()
        };
        assert!(params.to_query().is_err());
    }

    #[test]
    fn test_render_analyzer_hides_drill_columns() {
        let response: AnalyzerResponse = serde_json::from_value(serde_json::json!({
            "name": "Status codes",
            "success": true,
            "table": {
                "columns": [
                    { "name": "Status code", "type": "string" },
                    { "name": "Count", "type": "long" },
                    { "name": "drillIn", "type": "string" },
                    { "name": "drillOut", "type": "string" }
                ],
                "rows": [["500", 12, "where resultCode == 500", "where resultCode != 500"]]
            }
        }))
        .unwrap();

        let plain = render_analyzer(&response, false);
        assert!(plain.starts_with("Status codes\n"));
        assert!(plain.contains("Status code"));
        assert!(plain.contains("12"));
        assert!(!plain.contains("resultCode"));
        assert!(render_analyzer(&response, true).contains("where resultCode != 500"));
    }

    #[test]
    fn test_render_failed_analyzer() {
        let response = AnalyzerResponse {
            name: "Requests".into(),
            success: false,
            error: Some("query timed out".into()),
            table: None,
        };
        assert_eq!(render_analyzer(&response, false), "Requests: failed (query timed out)");
    }
}
