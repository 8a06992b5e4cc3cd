//! HTTP routes with response caching

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap},
    Json,
};
use cached::proc_macro::cached;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc};

use super::{get_real_ip, AppState};
use crate::db::{PageListing, Session};
use crate::error::TrackError;
use crate::events::VisitEvent;
use crate::recorder::{Hit, HitOutcome};
use crate::stats::{AggregatedStats, StatsAggregator, TimeRange};

/// Normalization limits for header-supplied strings
const MAX_USER_AGENT_LEN: usize = 512;
const MAX_REFERRER_LEN: usize = 1024;

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

#[derive(Debug, Deserialize)]
pub struct HitPayload {
    pub path: String,
    pub domain: String,
    pub referrer: Option<String>,
    pub country: Option<String>,
}

/// API: Record a page hit
pub async fn api_hit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<HitPayload>,
) -> Result<Json<HitOutcome>, TrackError> {
    let remote_addr = get_real_ip(&headers, &addr.ip().to_string());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let hit = Hit {
        remote_addr,
        user_agent: truncate(user_agent, MAX_USER_AGENT_LEN),
        referrer: payload
            .referrer
            .as_deref()
            .map(|r| truncate(r, MAX_REFERRER_LEN)),
        country: payload.country,
        path: payload.path,
        domain: payload.domain,
    };
    let (path, domain, country) = (hit.path.clone(), hit.domain.clone(), hit.country.clone());

    let outcome = state.recorder.process_hit(hit).await?;

    // Only counted visits reach live subscribers
    if outcome.session_id.is_some() {
        state.event_bus.publish(VisitEvent {
            path,
            domain,
            country,
            is_new_visitor: outcome.is_new_visitor,
            visited_at: Utc::now(),
        });
    }

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub range: Option<String>,
}

/// Cached stats query - 5 minute TTL per time range
#[cached(time = 300, key = "String", convert = r#"{ range.label().to_string() }"#)]
async fn get_cached_stats(range: TimeRange, stats: StatsAggregator) -> AggregatedStats {
    match stats.aggregated_stats(range).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Stats aggregation failed: {}", e);
            AggregatedStats::empty(range)
        }
    }
}

/// API: Get aggregated statistics (cached for 5 minutes)
pub async fn api_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Json<AggregatedStats> {
    let range = TimeRange::parse(query.range.as_deref());
    Json(get_cached_stats(range, state.stats.clone()).await)
}

#[derive(Debug, Deserialize)]
pub struct PagesQuery {
    pub domain: Option<String>,
}

/// API: List active pages with their visit counts
pub async fn api_pages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PagesQuery>,
) -> Result<Json<Vec<PageListing>>, TrackError> {
    Ok(Json(state.pages.list_active(query.domain.as_deref()).await?))
}

/// API: List hidden pages with their visit counts
pub async fn api_hidden_pages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PagesQuery>,
) -> Result<Json<Vec<PageListing>>, TrackError> {
    Ok(Json(state.pages.list_hidden(query.domain.as_deref()).await?))
}

/// API: Total visit count for one page
pub async fn api_page_count(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<i64>,
) -> Result<Json<Value>, TrackError> {
    let count = state.pages.visit_count(page_id).await?;
    Ok(Json(json!({ "visitCount": count })))
}

/// API: Hide a page from listings and aggregates (history is kept)
pub async fn api_hide_page(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<i64>,
) -> Result<Json<Value>, TrackError> {
    state.pages.hide(page_id).await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// API: Restore a hidden page
pub async fn api_restore_page(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<i64>,
) -> Result<Json<Value>, TrackError> {
    state.pages.restore(page_id).await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// API: Explicitly close a session, returning its final state
pub async fn api_end_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, TrackError> {
    state.sessions.end_session(&session_id).await?;
    Ok(Json(state.sessions.get(&session_id).await?))
}
