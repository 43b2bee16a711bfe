//! # Store Credentials
//!
//! A store is addressed by resource kind and id, and authenticated either
//! with a static API key or with an OAuth2 client-credentials grant. Bearer
//! tokens are cached until shortly before they expire.

use crate::error::StoreError;
use chrono::{DateTime, Duration, Utc};
use reqwest::RequestBuilder;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_BASE_URL: &str = "https://api.applicationinsights.io";
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
pub const DEFAULT_SCOPE: &str = "https://api.loganalytics.io/.default";

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    #[default]
    Apps,
    Workspaces,
}

impl ResourceKind {
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Apps => "apps",
            Self::Workspaces => "workspaces",
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(tag = "access", rename_all = "snake_case")]
pub enum Access {
    /// Static key sent as `x-api-key`.
    Key { key: String },
    /// OAuth2 client credentials.
    AppSecret {
        tenant: String,
        client_id: String,
        client_secret: String,
        #[serde(default = "default_authority")]
        authority: String,
        #[serde(default = "default_scope")]
        scope: String,
    },
}

// Secrets stay out of logs.
impl std::fmt::Debug for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Key { .. } => f.write_str("Key { .. }"),
            Self::AppSecret {
                tenant, client_id, ..
            } => f
                .debug_struct("AppSecret")
                .field("tenant", tenant)
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

/// `[stores.<name>]` table of the hub configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub id: Uuid,
    #[serde(default)]
    pub kind: ResourceKind,
    #[serde(flatten)]
    pub access: Access,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl StoreConfig {
    pub fn query_url(&self) -> String {
        format!(
            "{}/v1/{}/{}/query",
            self.base_url.trim_end_matches('/'),
            self.kind.path_segment(),
            self.id
        )
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}
fn default_authority() -> String {
    DEFAULT_AUTHORITY.into()
}
fn default_scope() -> String {
    DEFAULT_SCOPE.into()
}
fn default_timeout_secs() -> u64 {
    100
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

/// Attaches authentication to outgoing query requests.
pub struct Credentials {
    access: Access,
    http: reqwest::Client,
    cached: RwLock<Option<CachedToken>>,
}

impl Credentials {
    pub fn new(access: Access, http: reqwest::Client) -> Self {
        Self {
            access,
            http,
            cached: RwLock::new(None),
        }
    }

    pub async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, StoreError> {
        match &self.access {
            Access::Key { key } => Ok(request.header("x-api-key", key)),
            Access::AppSecret { .. } => Ok(request.bearer_auth(self.bearer_token().await?)),
        }
    }

    async fn bearer_token(&self) -> Result<String, StoreError> {
        let now = Utc::now();
        if let Some(cached) = self.cached.read().await.as_ref() {
            if cached.is_fresh(now) {
                return Ok(cached.token.clone());
            }
        }

        let mut cached = self.cached.write().await;
        // another request may have refreshed while we waited
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.token.clone());
        }

        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn fetch_token(&self) -> Result<CachedToken, StoreError> {
        let Access::AppSecret {
            tenant,
            client_id,
            client_secret,
            authority,
            scope,
        } = &self.access
        else {
            return Err(StoreError::Auth("no client credentials configured".into()));
        };

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            authority.trim_end_matches('/'),
            tenant
        );
        debug!(%url, client_id = %client_id, "requesting bearer token");

        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Auth(format!("token endpoint returned {status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Auth(format!("invalid token response: {e}")))?;

        Ok(CachedToken {
            token: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in as i64),
        })
    }
}
