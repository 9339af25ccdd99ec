use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use stallmap_shared::{BrokerResponse, MapCredentials, is_zip_archive};
use tracing::{info, warn};

use crate::config::{MAP_API_BUNDLE_PATH, MAP_API_TOKEN_PATH, MAX_MAP_CACHE_ENTRIES};
use crate::error::BrokerError;
use crate::state::{AppState, CachedMapPayload, MapSettings};

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// A downloaded map bundle: either the zipped archive or already-parsed map data.
#[derive(Debug)]
enum MapBundle {
    Archive(Bytes),
    Json(serde_json::Value),
}

/// Serve a broker payload for `map_id`, from cache when fresh.
pub async fn cached_payload(state: &AppState, map_id: &str) -> Result<Arc<Bytes>, BrokerError> {
    if let Some(cached) = state.map_cache.get(map_id) {
        let age = Utc::now()
            .signed_duration_since(cached.fetched_at)
            .num_seconds();
        if age < state.map.cache_ttl_secs {
            state.observability.record_broker_cache_hit();
            return Ok(Arc::clone(&cached.json));
        }
    }

    let response = resolve_map_payload(&state.http_client, &state.map, map_id)
        .await
        .inspect_err(|e| {
            if !matches!(e, BrokerError::NotConfigured) {
                state.observability.record_broker_upstream_error();
            }
        })?;
    let json = serde_json::to_vec(&response)
        .map(|json| Arc::new(Bytes::from(json)))
        .map_err(|e| BrokerError::Upstream(format!("serialize broker payload: {e}")))?;

    cache_map_payload(state, map_id.to_string(), Arc::clone(&json));
    Ok(json)
}

/// Exchange the vendor credentials for an access token, then try to download the
/// map bundle with it. The token is always part of a successful response so the
/// client can fall back to token-based loading when the bundle is missing.
pub async fn resolve_map_payload(
    client: &reqwest::Client,
    settings: &MapSettings,
    map_id: &str,
) -> Result<BrokerResponse, BrokerError> {
    let credentials = settings
        .api_credentials
        .as_ref()
        .ok_or(BrokerError::NotConfigured)?;

    let token = fetch_access_token(client, &settings.api_base_url, credentials).await?;
    let mut response = BrokerResponse {
        outdoor_view_token: Some(token.clone()),
        ..BrokerResponse::default()
    };

    match fetch_map_bundle(client, &settings.api_base_url, &token, map_id).await {
        Ok(MapBundle::Archive(bytes)) => {
            info!(map_id, bytes = bytes.len(), "map bundle downloaded as archive");
            response.mvf_base64 = Some(STANDARD.encode(&bytes));
        }
        Ok(MapBundle::Json(value)) => {
            info!(map_id, "map bundle downloaded as JSON");
            response.map_data = Some(value);
        }
        Err(e) => {
            warn!(map_id, error = %e, "map bundle download failed; returning access token only");
        }
    }

    Ok(response)
}

async fn fetch_access_token(
    client: &reqwest::Client,
    base_url: &str,
    credentials: &MapCredentials,
) -> Result<String, BrokerError> {
    let url = api_url(base_url, &[MAP_API_TOKEN_PATH])?;
    let resp = client
        .post(url)
        .json(&serde_json::json!({
            "key": credentials.key,
            "secret": credentials.secret,
        }))
        .send()
        .await?;

    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(BrokerError::Unauthorized(status.as_u16()));
    }
    if !status.is_success() {
        return Err(BrokerError::Upstream(format!("token endpoint HTTP {status}")));
    }

    let token: TokenResponse = resp.json().await?;
    if token.access_token.trim().is_empty() {
        return Err(BrokerError::Upstream("token endpoint returned an empty token".into()));
    }
    if let Some(expires_in) = token.expires_in {
        info!(expires_in, "obtained mapping service access token");
    }
    Ok(token.access_token)
}

async fn fetch_map_bundle(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    map_id: &str,
) -> Result<MapBundle, String> {
    let url = api_url(base_url, &[MAP_API_BUNDLE_PATH, map_id, "mvf"]).map_err(|e| e.to_string())?;
    let bundle = download_bundle(client, url.as_str(), Some(token)).await?;

    // The bundle endpoint may answer with a short-lived download link instead of the bytes.
    if let MapBundle::Json(value) = &bundle
        && let Some(link) = download_link(value)
    {
        let link_token = same_origin(&url, &link).then_some(token);
        if link_token.is_none() {
            let host = reqwest::Url::parse(&link)
                .ok()
                .and_then(|link| link.host_str().map(str::to_owned))
                .unwrap_or_default();
            info!(%host, "following bundle download link without credentials");
        }
        return download_bundle(client, &link, link_token).await;
    }
    Ok(bundle)
}

async fn download_bundle(
    client: &reqwest::Client,
    url: &str,
    token: Option<&str>,
) -> Result<MapBundle, String> {
    let mut request = client.get(url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let resp = request
        .send()
        .await
        .map_err(|e| format!("fetch error: {e}"))?;

    if !resp.status().is_success() {
        return Err(format!("HTTP {}", resp.status()));
    }

    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let body = resp
        .bytes()
        .await
        .map_err(|e| format!("read error: {e}"))?;

    classify_bundle(body, content_type.as_deref())
}

fn classify_bundle(body: Bytes, content_type: Option<&str>) -> Result<MapBundle, String> {
    if body.is_empty() {
        return Err("empty map bundle".to_string());
    }
    if is_zip_archive(&body, content_type) {
        return Ok(MapBundle::Archive(body));
    }
    serde_json::from_slice::<serde_json::Value>(&body)
        .map(MapBundle::Json)
        .map_err(|e| format!("parse error: {e}"))
}

/// `{"url": "https://..."}` with nothing else worth keeping.
fn download_link(value: &serde_json::Value) -> Option<String> {
    let object = value.as_object()?;
    if object.len() > 2 {
        return None;
    }
    object
        .get("url")
        .and_then(|url| url.as_str())
        .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
        .map(str::to_owned)
}

/// The access token only travels to the mapping service's own origin.
fn same_origin(api: &reqwest::Url, link: &str) -> bool {
    reqwest::Url::parse(link).is_ok_and(|link| link.origin() == api.origin())
}

fn api_url(base_url: &str, segments: &[&str]) -> Result<reqwest::Url, BrokerError> {
    let mut url = reqwest::Url::parse(base_url)
        .map_err(|e| BrokerError::Upstream(format!("invalid MAP_API_BASE_URL: {e}")))?;
    let Ok(mut path_segments) = url.path_segments_mut() else {
        return Err(BrokerError::Upstream(
            "MAP_API_BASE_URL cannot carry a path".to_string(),
        ));
    };
    path_segments.pop_if_empty();
    for segment in segments {
        for part in segment.split('/') {
            path_segments.push(part);
        }
    }
    drop(path_segments);
    Ok(url)
}

fn cache_map_payload(state: &AppState, map_id: String, json: Arc<Bytes>) {
    if !state.map_cache.contains_key(&map_id) {
        while state.map_cache.len() >= MAX_MAP_CACHE_ENTRIES {
            if !evict_oldest_map_entry(state) {
                break;
            }
        }
    }

    state.map_cache.insert(
        map_id,
        CachedMapPayload {
            json,
            fetched_at: Utc::now(),
        },
    );
}

fn evict_oldest_map_entry(state: &AppState) -> bool {
    let Some(oldest) = state
        .map_cache
        .iter()
        .min_by_key(|entry| entry.value().fetched_at)
        .map(|entry| entry.key().clone())
    else {
        return false;
    };
    state.map_cache.remove(&oldest).is_some()
}
