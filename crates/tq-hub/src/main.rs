use anyhow::{bail, Context};
use axum::{routing::get, Router};
use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tq_store::{HttpTelemetryStore, StoreConfig, TelemetryStore};

mod analyzers;
mod api;
mod dashboards;
mod panels;
mod store;
mod timeseries;

use dashboards::{DashboardCatalog, DashboardConfig};
use panels::PanelSettings;
use store::StoreRegistry;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(name = "tq-hub", version, about = "TELEQUERY dashboard hub")]
struct Args {
    /// Server bind address
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: String,

    /// Path to config file
    #[arg(long, default_value = "tq-hub.toml")]
    config: PathBuf,

    /// Directory with the built dashboard UI, served for non-API paths
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

// =============================================================================
// Config
// =============================================================================

#[derive(Deserialize, Default)]
struct Config {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    stores: HashMap<String, StoreConfig>,
    #[serde(default)]
    dashboards: Vec<DashboardConfig>,
}

#[derive(Deserialize, Clone)]
struct ServerConfig {
    /// Upper bound for a single panel query, on top of the store's own timeout.
    #[serde(default = "default_request_timeout")]
    request_timeout_secs: u64,
    /// Target number of chart buckets.
    #[serde(default = "default_splits")]
    splits: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            splits: default_splits(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}
fn default_splits() -> u32 {
    tq_core::DEFAULT_SPLITS
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        tracing::warn!(?path, "config file not found, starting with an empty catalog");
        return Ok(Config::default());
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

// =============================================================================
// Application State
// =============================================================================

pub struct AppState {
    catalog: DashboardCatalog,
    stores: StoreRegistry,
    settings: PanelSettings,
}

impl AppState {
    fn new(catalog: DashboardCatalog, stores: StoreRegistry, server: &ServerConfig) -> anyhow::Result<Self> {
        if let Some(missing) = catalog.store_names().find(|name| !stores.contains_key(*name)) {
            bail!("dashboard item refers to unknown store '{missing}'");
        }
        Ok(Self {
            catalog,
            stores,
            settings: PanelSettings {
                timeout: Duration::from_secs(server.request_timeout_secs),
                splits: server.splits.max(1),
            },
        })
    }

    fn from_config(config: Config) -> anyhow::Result<Self> {
        let catalog = DashboardCatalog::load(config.dashboards)?;
        let mut stores = StoreRegistry::new();
        for (name, store_config) in &config.stores {
            let store = HttpTelemetryStore::new(store_config)
                .with_context(|| format!("creating store '{name}'"))?;
            tracing::debug!(store = %name, url = store.url(), "store configured");
            stores.insert(name.clone(), Arc::new(store) as Arc<dyn TelemetryStore>);
        }
        Self::new(catalog, stores, &config.server)
    }
}

fn router(state: Arc<AppState>, ui_dir: Option<&Path>) -> Router {
    let app = Router::new()
        .route("/api/health", get(api::health))
        .route("/api/dashboard/:id", get(api::get_dashboard))
        .route("/api/dashboard/:id/overview/:group/:item", get(api::overview))
        .route("/api/dashboard/:id/details/:group/:item", get(api::details))
        .route(
            "/api/dashboard/:id/analyzer/:group/:item/:analyzer",
            get(api::analyzer),
        );

    let app = match ui_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app,
    };

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tq_hub=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = load_config(&args.config)?;
    let state = Arc::new(AppState::from_config(config)?);

    let addr: SocketAddr = args
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", args.bind))?;
    tracing::info!("TELEQUERY hub");
    tracing::info!("  Dashboards: {}", state.catalog.len());
    for dashboard in state.catalog.dashboards() {
        tracing::info!("    {} ({})", dashboard.name, dashboard.id);
    }
    tracing::info!("  Stores:     {}", state.stores.len());
    tracing::info!("  API:        http://{}/api/health", addr);
    if let Some(dir) = &args.ui_dir {
        tracing::info!("  UI:         {:?}", dir);
    }

    let app = router(state, args.ui_dir.as_deref());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{table, FakeStore};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use tq_store::{ColumnType, Value};

    const DASHBOARD_ID: &str = "6f1c2b9e-0c55-4d8e-9a41-2f3d7b1e8c20";

    const CONFIG: &str = r#"
        [server]
        request_timeout_secs = 5

        [stores.prod]
        id = "0b8e4c1e-2a57-4f43-8d7c-0b6d3b2f9a10"
        access = "key"
        key = "k"

        [[dashboards]]
        id = "6f1c2b9e-0c55-4d8e-9a41-2f3d7b1e8c20"
        name = "Shop"

        [[dashboards.groups]]
        name = "Checkout"

        [[dashboards.groups.items]]
        store = "prod"
        preset = "exceptions"
    "#;

    #[test]
    fn test_config_parsing() {
        let config: Config = toml::from_str(CONFIG).unwrap();
        assert_eq!(config.server.request_timeout_secs, 5);
        assert_eq!(config.server.splits, 30);
        assert!(config.stores.contains_key("prod"));

        let state = AppState::from_config(config).unwrap();
        assert_eq!(state.catalog.len(), 1);
        assert_eq!(state.catalog.dashboards()[0].name, "Shop");
        assert_eq!(state.settings.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.request_timeout_secs, 30);
        assert!(config.dashboards.is_empty());
        assert!(load_config(Path::new("/nonexistent/tq-hub.toml")).is_ok());
    }

    #[test]
    fn test_unknown_store_is_rejected() {
        let mut config: Config = toml::from_str(CONFIG).unwrap();
        config.stores.clear();
        assert!(AppState::from_config(config).is_err());
    }

    fn app(store: FakeStore) -> Router {
        let config: Config = toml::from_str(CONFIG).unwrap();
        let catalog = DashboardCatalog::load(config.dashboards).unwrap();
        let mut stores = StoreRegistry::new();
        stores.insert("prod".into(), Arc::new(store) as Arc<dyn TelemetryStore>);
        let state = AppState::new(catalog, stores, &config.server).unwrap();
        router(Arc::new(state), None)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(app(FakeStore::new()), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["dashboards"], 1);
    }

    #[tokio::test]
    async fn test_dashboard_summary() {
        let (status, body) = get_json(app(FakeStore::new()), &format!("/api/dashboard/{DASHBOARD_ID}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "Checkout");
        assert_eq!(body[0]["items"][0]["name"], "Exceptions");

        let (status, body) = get_json(
            app(FakeStore::new()),
            "/api/dashboard/00000000-0000-0000-0000-000000000000",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_unknown_item_is_not_found() {
        let (status, _) = get_json(
            app(FakeStore::new()),
            &format!("/api/dashboard/{DASHBOARD_ID}/overview/0/5"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_overview_endpoint() {
        let store = FakeStore::new().answer(
            "bin(timestamp, 90d)",
            table(
                &[("timestamp", ColumnType::Datetime), ("_count", ColumnType::Long)],
                vec![vec![Value::Datetime(chrono::Utc::now()), Value::Long(75)]],
            ),
        );
        let (status, body) = get_json(app(store), &format!("/api/dashboard/{DASHBOARD_ID}/overview/0/0")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], "75");
        assert_eq!(body["status"], "normal");
        assert_eq!(body["chartMax"], 10.0);
    }

    #[tokio::test]
    async fn test_details_endpoint_rejects_bad_duration() {
        let (status, _) = get_json(
            app(FakeStore::new()),
            &format!("/api/dashboard/{DASHBOARD_ID}/details/0/0?duration=fortnight"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_analyzer_endpoint() {
        let (status, body) = get_json(
            app(FakeStore::new()),
            &format!("/api/dashboard/{DASHBOARD_ID}/analyzer/0/0/RoleAnalyzer"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("RoleAnalyzer"));

        let store = FakeStore::new().fail("exceptions", "bad gateway");
        let (status, body) = get_json(
            app(store),
            &format!("/api/dashboard/{DASHBOARD_ID}/analyzer/0/0/RequestExceptionsAnalyzer?searchQuery=timeout"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["name"], "Exceptions");
    }

    #[tokio::test]
    async fn test_store_failure_maps_to_bad_gateway() {
        let store = FakeStore::new().fail("exceptions", "throttled");
        let (status, _) = get_json(app(store), &format!("/api/dashboard/{DASHBOARD_ID}/overview/0/0")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }
}
