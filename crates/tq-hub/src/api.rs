//! # API Handlers
//!
//! Axum handlers for the dashboard, overview, details and analyzer pages.
//! Groups and items are addressed by position, the way the dashboard page
//! lists them.

use crate::analyzers::{AnalyzerError, AnalyzerResult};
use crate::dashboards::{DashboardGroup, DashboardItem, GroupSummary};
use crate::panels::{self, Details, Overview, PanelError, PanelRequest};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tq_store::{StoreError, TelemetryStore};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("no store named '{0}' is configured")]
    MissingStore(String),

    #[error(transparent)]
    Panel(#[from] PanelError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MissingStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Panel(PanelError::BadRequest(_)) => StatusCode::BAD_REQUEST,
            Self::Panel(PanelError::Analyzer(AnalyzerError::UnknownAnalyzer(_))) => StatusCode::NOT_FOUND,
            Self::Panel(PanelError::Query(_) | PanelError::Analyzer(AnalyzerError::Query(_))) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Panel(PanelError::Store(StoreError::Timeout(_))) => StatusCode::GATEWAY_TIMEOUT,
            Self::Panel(PanelError::Store(_)) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(%status, error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

struct Located<'a> {
    group: &'a DashboardGroup,
    item: &'a DashboardItem,
    store: Arc<dyn TelemetryStore>,
}

fn locate(state: &AppState, id: Uuid, group: usize, item: usize) -> Result<Located<'_>, ApiError> {
    let (group, item) = state
        .catalog
        .item(id, group, item)
        .ok_or_else(|| ApiError::NotFound(format!("item {group}/{item} of dashboard {id}")))?;
    let store = state
        .stores
        .get(&item.store)
        .cloned()
        .ok_or_else(|| ApiError::MissingStore(item.store.clone()))?;
    Ok(Located { group, item, store })
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "dashboards": state.catalog.len(),
        "stores": state.stores.len(),
    }))
}

pub async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<GroupSummary>> {
    state
        .catalog
        .summary(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("dashboard {id}")))
}

pub async fn overview(
    State(state): State<Arc<AppState>>,
    Path((id, group, item)): Path<(Uuid, usize, usize)>,
) -> ApiResult<Overview> {
    let located = locate(&state, id, group, item)?;
    let overview = panels::overview(located.item, located.store.as_ref(), state.settings, Utc::now()).await?;
    Ok(Json(overview))
}

pub async fn details(
    State(state): State<Arc<AppState>>,
    Path((id, group, item)): Path<(Uuid, usize, usize)>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Details> {
    let located = locate(&state, id, group, item)?;
    let request = PanelRequest::from_pairs(&params)?;
    let details = panels::details(
        &located.group.name,
        located.item,
        &request,
        located.store.as_ref(),
        state.settings,
        Utc::now(),
    )
    .await?;
    Ok(Json(details))
}

pub async fn analyzer(
    State(state): State<Arc<AppState>>,
    Path((id, group, item, name)): Path<(Uuid, usize, usize, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<AnalyzerResult> {
    let located = locate(&state, id, group, item)?;
    let request = PanelRequest::from_pairs(&params)?;
    let result = panels::analyze(located.item, &name, &request, located.store.as_ref(), state.settings).await?;
    Ok(Json(result))
}
