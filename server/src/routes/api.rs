use std::fmt::Write as _;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use stallmap_shared::{BrokerResponse, MapConfig};

use crate::state::{AppState, ObservabilitySnapshot};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (stall_count, seq) = {
        let snapshot = state.live_snapshot.read().await;
        (snapshot.stalls.len(), snapshot.seq)
    };
    let observability = state.observability.snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "stalls": stall_count,
        "seq": seq,
        "stall_feed_configured": state.stall_store.is_some(),
        "map_broker_configured": state.map.api_credentials.is_some(),
        "map_cache_size": state.map_cache.len(),
        "observability": {
            "stall_polls_total": observability.stall_polls_total,
            "stall_poll_failures_total": observability.stall_poll_failures_total,
            "stall_updates_broadcast_total": observability.stall_updates_broadcast_total,
            "broker_requests_total": observability.broker_requests_total,
            "broker_cache_hits_total": observability.broker_cache_hits_total,
            "broker_upstream_errors_total": observability.broker_upstream_errors_total,
        }
    }))
}

/// Serve the pre-serialized stall map, keyed by stall number.
pub async fn get_stalls(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let (etag, json): (String, Arc<Bytes>) = {
        let snapshot = state.live_snapshot.read().await;
        (stalls_etag(snapshot.seq), Arc::clone(&snapshot.stalls_json))
    };

    if if_none_match_matches(&headers, &etag) {
        return not_modified_response("public, max-age=5", Some(etag.as_str()));
    }

    json_bytes_response((*json).clone(), "public, max-age=5", Some(etag.as_str()))
}

/// Sequence-stamped stall map used by clients to resync after a gap.
pub async fn get_live_stalls(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let (etag, json): (String, Arc<Bytes>) = {
        let snapshot = state.live_snapshot.read().await;
        (live_etag(snapshot.seq), Arc::clone(&snapshot.live_json))
    };

    if if_none_match_matches(&headers, &etag) {
        return not_modified_response("no-cache", Some(etag.as_str()));
    }

    json_bytes_response((*json).clone(), "no-cache", Some(etag.as_str()))
}

pub async fn get_map_config(State(state): State<AppState>) -> Response {
    let Some(map_id) = state.map.map_id.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(BrokerResponse::failure("MAP_ID is not configured")),
        )
            .into_response();
    };

    let config = MapConfig {
        map_id,
        archive_url: state.map.archive_url.clone(),
        credentials: state.map.public_credentials.clone(),
    };
    let mut response = Json(config).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=60"),
    );
    response
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let stall_count = state.live_snapshot.read().await.stalls.len();
    let map_cache_size = state.map_cache.len();
    let stall_feed_configured = state.stall_store.is_some();
    let observability = state.observability.snapshot();

    let body = render_prometheus_metrics(
        stall_count,
        map_cache_size,
        stall_feed_configured,
        observability,
    );

    (
        [
            (header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-store"),
        ],
        body,
    )
}

fn render_prometheus_metrics(
    stall_count: usize,
    map_cache_size: usize,
    stall_feed_configured: bool,
    observability: ObservabilitySnapshot,
) -> String {
    let mut body = String::new();
    let _ = writeln!(
        body,
        "# HELP stallmap_stalls Current number of stalls in the live snapshot."
    );
    let _ = writeln!(body, "# TYPE stallmap_stalls gauge");
    let _ = writeln!(body, "stallmap_stalls {stall_count}");

    let _ = writeln!(
        body,
        "# HELP stallmap_map_cache_size Current number of cached broker payloads."
    );
    let _ = writeln!(body, "# TYPE stallmap_map_cache_size gauge");
    let _ = writeln!(body, "stallmap_map_cache_size {map_cache_size}");

    let _ = writeln!(
        body,
        "# HELP stallmap_stall_feed_configured Whether the stall store is configured (1 or 0)."
    );
    let _ = writeln!(body, "# TYPE stallmap_stall_feed_configured gauge");
    let _ = writeln!(
        body,
        "stallmap_stall_feed_configured {}",
        u8::from(stall_feed_configured)
    );

    let counters = [
        (
            "stallmap_stall_polls_total",
            "Total stall store polls.",
            observability.stall_polls_total,
        ),
        (
            "stallmap_stall_poll_failures_total",
            "Total failed stall store polls.",
            observability.stall_poll_failures_total,
        ),
        (
            "stallmap_stall_updates_broadcast_total",
            "Total stall changes broadcast as update events.",
            observability.stall_updates_broadcast_total,
        ),
        (
            "stallmap_broker_requests_total",
            "Total map broker requests.",
            observability.broker_requests_total,
        ),
        (
            "stallmap_broker_cache_hits_total",
            "Total map broker requests served from cache.",
            observability.broker_cache_hits_total,
        ),
        (
            "stallmap_broker_upstream_errors_total",
            "Total map broker failures talking to the mapping service.",
            observability.broker_upstream_errors_total,
        ),
    ];
    for (name, help, value) in counters {
        let _ = writeln!(body, "# HELP {name} {help}");
        let _ = writeln!(body, "# TYPE {name} counter");
        let _ = writeln!(body, "{name} {value}");
    }

    body
}

fn stalls_etag(seq: u64) -> String {
    format!("\"stalls-{seq}\"")
}

fn live_etag(seq: u64) -> String {
    format!("\"stalls-live-{seq}\"")
}

fn json_bytes_response(body: Bytes, cache_control: &'static str, etag: Option<&str>) -> Response {
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(cache_control),
    );
    if let Some(etag) = etag
        && let Ok(etag_header) = HeaderValue::from_str(etag)
    {
        headers.insert(header::ETAG, etag_header);
    }
    response
}

fn not_modified_response(cache_control: &'static str, etag: Option<&str>) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(cache_control),
    );
    if let Some(etag) = etag
        && let Ok(etag_header) = HeaderValue::from_str(etag)
    {
        headers.insert(header::ETAG, etag_header);
    }
    response
}

fn normalize_etag(candidate: &str) -> &str {
    candidate.strip_prefix("W/").unwrap_or(candidate).trim()
}

fn if_none_match_matches(headers: &HeaderMap, etag: &str) -> bool {
    let Some(value) = headers.get(header::IF_NONE_MATCH) else {
        return false;
    };
    let Ok(raw) = value.to_str() else {
        return false;
    };

    raw.split(',').any(|candidate| {
        let candidate = candidate.trim();
        candidate == "*" || normalize_etag(candidate) == normalize_etag(etag)
    })
}
