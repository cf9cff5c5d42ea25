//! Same-origin HTTP proxy so a browser front end can read cross-origin feeds.
//!
//! `GET /api/proxy?url=<feed>` fetches through the upstream cascade and hands
//! back the raw bytes with the upstream content type.
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::feed::{FeedTransport, Route};
use crate::util::validate_url;

const DEFAULT_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Missing required query parameter: url")]
    MissingUrl,

    #[error("Invalid url: {0}")]
    BadRequest(String),

    #[error("Upstream fetch failed: {0}")]
    Upstream(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingUrl | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::warn!(error = %self, status = status.as_u16(), "Proxy request failed");
        let body = ErrorResponse {
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Clone)]
pub struct ProxyState {
    transport: Arc<dyn FeedTransport>,
    allow_private: bool,
    cache_control: HeaderValue,
}

impl ProxyState {
    pub fn new(transport: Arc<dyn FeedTransport>, config: &Config) -> Self {
        let cache_control = format!("public, max-age={}", config.proxy.cache_max_age_secs);
        Self {
            transport,
            allow_private: config.allow_private_hosts,
            cache_control: HeaderValue::from_str(&cache_control)
                .unwrap_or_else(|_| HeaderValue::from_static("public, max-age=300")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProxyQuery {
    url: Option<String>,
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/proxy", get(proxy))
        .with_state(state)
}

/// Serves the proxy on `listener` until the task is cancelled.
pub async fn serve(listener: TcpListener, state: ProxyState) -> std::io::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "Proxy listening");
    axum::serve(listener, router(state)).await
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn proxy(
    State(state): State<ProxyState>,
    Query(query): Query<ProxyQuery>,
) -> Result<Response, ProxyError> {
    let target = query
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or(ProxyError::MissingUrl)?;
    let target = validate_url(target, state.allow_private)
        .map_err(|e| ProxyError::BadRequest(e.to_string()))?;

    let payload = state
        .transport
        .fetch(target.as_str(), Route::Upstream)
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    tracing::debug!(url = %target, strategy = %payload.strategy, bytes = payload.body.len(), "Proxied feed");

    let content_type = payload
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CACHE_CONTROL, state.cache_control.clone());

    Ok((StatusCode::OK, headers, payload.body).into_response())
}
