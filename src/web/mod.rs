//! Web server module
//!
//! Thin transport binding over the tracking engine: JSON API, proxy-aware
//! client IP extraction and the SSE live visit stream. CORS is open because
//! the hit endpoint is called from tracked pages on foreign origins.

mod routes;
mod sse;

use anyhow::Result;
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::Config;
use crate::db::Database;
use crate::error::TrackError;
use crate::events::EventBus;
use crate::pages::PageRegistry;
use crate::recorder::VisitRecorder;
use crate::sessions::SessionAssigner;
use crate::stats::StatsAggregator;

pub struct AppState {
    pub recorder: VisitRecorder,
    pub pages: PageRegistry,
    pub sessions: SessionAssigner,
    pub stats: StatsAggregator,
    pub event_bus: EventBus,
}

/// Get the real client IP address, checking proxy headers first
/// Priority: X-Real-IP > X-Forwarded-For (first IP) > ConnectInfo
fn get_real_ip(headers: &HeaderMap, fallback_ip: &str) -> String {
    // Try X-Real-IP first (set by Caddy/nginx)
    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip) = real_ip.to_str() {
            let ip = ip.trim();
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
    }

    // Try X-Forwarded-For (may contain chain of IPs, first is original client)
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(ips) = forwarded.to_str() {
            if let Some(first_ip) = ips.split(',').next() {
                let ip = first_ip.trim();
                if !ip.is_empty() {
                    return ip.to_string();
                }
            }
        }
    }

    // Fallback to direct connection IP
    fallback_ip.to_string()
}

impl IntoResponse for TrackError {
    fn into_response(self) -> Response {
        match self {
            TrackError::Validation(messages) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": "validation failed", "messages": messages })),
            )
                .into_response(),
            TrackError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("{what} not found") })),
            )
                .into_response(),
            TrackError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
                .into_response(),
        }
    }
}

pub async fn start_server(config: &Config, event_bus: EventBus, db: Database) -> Result<()> {
    let session_window = chrono::Duration::minutes(config.tracking.session_window_minutes);
    let state = Arc::new(AppState {
        recorder: VisitRecorder::new(db.clone(), session_window),
        pages: PageRegistry::new(db.clone()),
        sessions: SessionAssigner::new(db.clone()),
        stats: StatsAggregator::new(db),
        event_bus,
    });

    let app = Router::new()
        // Tracking
        .route("/api/hit", post(routes::api_hit))
        // Reporting
        .route("/api/stats", get(routes::api_stats))
        .route("/api/pages", get(routes::api_pages))
        .route("/api/pages/hidden", get(routes::api_hidden_pages))
        .route("/api/pages/:id/count", get(routes::api_page_count))
        // Page administration
        .route("/api/pages/:id", delete(routes::api_hide_page))
        .route("/api/pages/:id/restore", post(routes::api_restore_page))
        // Session administration
        .route("/api/sessions/:id/end", post(routes::api_end_session))
        // SSE endpoint
        .route("/events", get(sse::events_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.http_port);
    info!("Web server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
