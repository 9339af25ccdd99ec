use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, header};
use axum::response::Response;
use stallmap_shared::BrokerRequest;
use tracing::{info, warn};

use crate::error::BrokerError;
use crate::services::map_broker;
use crate::state::AppState;

const MAX_MAP_ID_LEN: usize = 64;

/// Trade the server-held vendor credentials for something the browser can load a map from.
pub async fn broker_map(
    State(state): State<AppState>,
    payload: Result<Json<BrokerRequest>, JsonRejection>,
) -> Result<Response, BrokerError> {
    state.observability.record_broker_request();

    let Json(request) = payload.map_err(|e| {
        warn!(error = %e, "rejected malformed broker request");
        BrokerError::InvalidMapId
    })?;
    let map_id = validate_map_id(&request.map_id)?;
    ensure_served(state.map.map_id.as_deref(), map_id)
        .inspect_err(|_| warn!(map_id, "refused broker request for unserved map"))?;

    let json = map_broker::cached_payload(&state, map_id)
        .await
        .inspect_err(|e| warn!(map_id, error = %e, "map broker request failed"))?;
    info!(map_id, bytes = json.len(), "served map broker payload");

    let mut response = Response::new(Body::from((*json).clone()));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

fn validate_map_id(raw: &str) -> Result<&str, BrokerError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_MAP_ID_LEN {
        return Err(BrokerError::InvalidMapId);
    }

    if !trimmed
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'))
    {
        return Err(BrokerError::InvalidMapId);
    }

    Ok(trimmed)
}

/// Only the configured map is brokered; with none configured nothing is.
fn ensure_served(configured: Option<&str>, map_id: &str) -> Result<(), BrokerError> {
    match configured.map(str::trim) {
        Some(configured) if configured == map_id => Ok(()),
        _ => Err(BrokerError::UnservedMap(map_id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use stallmap_shared::BrokerResponse;
    use tower::ServiceExt;

    use super::{ensure_served, validate_map_id};
    use crate::error::BrokerError;
    use crate::state::{AppState, test_map_settings};

    fn broker_request(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/map/broker")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .expect("build broker request")
    }

    async fn read_failure(response: axum::response::Response) -> BrokerResponse {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("error body should be a broker response")
    }

    #[test]
    fn validate_map_id_rejects_invalid_inputs() {
        assert!(matches!(validate_map_id(""), Err(BrokerError::InvalidMapId)));
        assert!(matches!(validate_map_id("   "), Err(BrokerError::InvalidMapId)));
        assert!(matches!(
            validate_map_id("../venue"),
            Err(BrokerError::InvalidMapId)
        ));
        assert!(matches!(
            validate_map_id("map id"),
            Err(BrokerError::InvalidMapId)
        ));
        assert!(matches!(
            validate_map_id(&"a".repeat(65)),
            Err(BrokerError::InvalidMapId)
        ));
        assert_eq!(
            validate_map_id(" 65f0c1_market-main ").ok(),
            Some("65f0c1_market-main")
        );
    }

    #[test]
    fn only_the_configured_map_is_served() {
        assert!(ensure_served(Some("market-main"), "market-main").is_ok());
        assert!(matches!(
            ensure_served(Some("market-main"), "market-annex"),
            Err(BrokerError::UnservedMap(id)) if id == "market-annex"
        ));
        assert!(matches!(
            ensure_served(None, "market-main"),
            Err(BrokerError::UnservedMap(_))
        ));
    }

    #[tokio::test]
    async fn unserved_map_id_is_forbidden_before_credentials_are_checked() {
        let state = AppState::new(None, test_map_settings());
        let app = crate::app::build_app(state.clone());

        let response = app
            .oneshot(broker_request(r#"{"mapId":"someone-elses-venue"}"#))
            .await
            .expect("router should respond");

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = read_failure(response).await;
        assert!(
            body.error
                .as_deref()
                .is_some_and(|message| message.contains("someone-elses-venue"))
        );
        assert!(!body.has_payload());
        assert!(state.map_cache.is_empty());
    }

    #[tokio::test]
    async fn invalid_map_id_is_bad_request_with_error_body() {
        let app = crate::app::build_app(AppState::new(None, test_map_settings()));

        let response = app
            .oneshot(broker_request(r#"{"mapId":"../../etc"}"#))
            .await
            .expect("router should respond");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = read_failure(response).await;
        assert!(body.error.is_some());
        assert!(!body.has_payload());
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let app = crate::app::build_app(AppState::new(None, test_map_settings()));

        let response = app
            .oneshot(broker_request(r#"{"venue":1}"#))
            .await
            .expect("router should respond");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unconfigured_broker_is_service_unavailable() {
        let state = AppState::new(None, test_map_settings());
        let app = crate::app::build_app(state.clone());

        let response = app
            .oneshot(broker_request(r#"{"mapId":"market-main"}"#))
            .await
            .expect("router should respond");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = read_failure(response).await;
        assert!(
            body.error
                .as_deref()
                .is_some_and(|message| message.contains("MAP_API_KEY"))
        );
        assert_eq!(state.observability.snapshot().broker_requests_total, 1);
    }
}
