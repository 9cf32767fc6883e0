//! HTTP surface: profile lookup, avatar image proxy and a liveness probe.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use pht_lookup::{LookupService, LookupStage};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

mod proxy;

pub use proxy::{host_is_allowed, ImageProxy, ImageProxyConfig, ProxyError};

pub const CRATE_NAME: &str = "pht-web";

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub image_proxy: ImageProxyConfig,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            image_proxy: ImageProxyConfig::default(),
        }
    }
}

impl WebConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut image_proxy = defaults.image_proxy;
        if let Ok(raw) = std::env::var("PHT_IMAGE_ALLOWED_SUFFIXES") {
            let suffixes: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect();
            if !suffixes.is_empty() {
                image_proxy.allowed_host_suffixes = suffixes;
            }
        }
        if let Ok(user_agent) = std::env::var("PHT_USER_AGENT") {
            image_proxy.user_agent = user_agent;
        }
        if let Ok(referer) = std::env::var("PHT_IMAGE_REFERER") {
            image_proxy.referer = referer;
        }
        if let Some(secs) = std::env::var("PHT_IMAGE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            image_proxy.timeout = Duration::from_secs(secs);
        }

        Self {
            host: std::env::var("PHT_WEB_HOST").unwrap_or(defaults.host),
            port: std::env::var("PHT_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            image_proxy,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub lookup: Arc<LookupService>,
    pub proxy: Arc<ImageProxy>,
}

#[derive(Debug, Deserialize, Default)]
struct LookupQuery {
    username: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ImageProxyQuery {
    url: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/lookup", get(lookup_handler))
        .route("/image-proxy", get(image_proxy_handler))
        .route("/healthz", get(healthz_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn serve(config: &WebConfig, lookup: Arc<LookupService>) -> anyhow::Result<()> {
    let proxy = Arc::new(ImageProxy::new(&config.image_proxy)?);
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(host = %config.host, port = config.port, "listening");
    axum::serve(listener, app(AppState { lookup, proxy }))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn lookup_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LookupQuery>,
) -> Response {
    let Some(username) = query.username else {
        return error_body(StatusCode::BAD_REQUEST, "Username is required");
    };
    match state.lookup.lookup(&username).await {
        Ok(resp) => Json(resp).into_response(),
        Err(err) => {
            let status = match err.stage() {
                LookupStage::Input => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_body(status, &err.public_message())
        }
    }
}

async fn image_proxy_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImageProxyQuery>,
) -> Response {
    let Some(url) = query.url.filter(|u| !u.trim().is_empty()) else {
        return ProxyError::MissingUrl.into_response();
    };
    match state.proxy.forward(&url).await {
        Ok(resp) => resp,
        Err(err) => {
            match &err {
                ProxyError::Upstream(source) => error!(error = %source, "image proxy request failed"),
                other => info!(error = %other, "image proxy request rejected"),
            }
            err.into_response()
        }
    }
}

async fn healthz_handler() -> &'static str {
    "ok"
}
