use std::path::Path;

use axum::{
    Router,
    extract::Request,
    http::{HeaderValue, Method, header},
    middleware::{self, Next},
    response::Response,
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::routes;
use crate::state::AppState;

pub(crate) fn build_app(state: AppState) -> Router {
    let static_assets = Router::new()
        .fallback_service(
            ServeDir::new("client/dist")
                .precompressed_br()
                .precompressed_gzip(),
        )
        .layer(middleware::from_fn(set_static_cache_control));

    let app = Router::new()
        .route("/api/stalls", axum::routing::get(routes::api::get_stalls))
        .route(
            "/api/stalls/live",
            axum::routing::get(routes::api::get_live_stalls),
        )
        .route(
            "/api/stalls/events",
            axum::routing::get(routes::sse::stall_events),
        )
        .route(
            "/api/map/config",
            axum::routing::get(routes::api::get_map_config),
        )
        .route(
            "/api/map/broker",
            axum::routing::post(routes::broker::broker_map),
        )
        .route("/api/health", axum::routing::get(routes::api::health))
        .route("/api/metrics", axum::routing::get(routes::api::metrics));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::IF_NONE_MATCH]);

    app.layer(CompressionLayer::new())
        .layer(cors)
        .fallback_service(static_assets)
        .with_state(state)
}

async fn set_static_cache_control(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();
    let mut response = next.run(request).await;

    if response.status().is_success()
        && let Some(cache_control) = cache_control_for_path(&path)
    {
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(cache_control),
        );
    }

    response
}

fn cache_control_for_path(path: &str) -> Option<&'static str> {
    if is_hashed_bundle_asset(path) {
        return Some("public, max-age=31536000, immutable");
    }

    if path.starts_with("/fonts/") || path.starts_with("/icons/") || path.starts_with("/maps/") {
        return Some("public, max-age=86400");
    }

    None
}

fn is_hashed_bundle_asset(path: &str) -> bool {
    let Some(ext) = Path::new(path).extension().and_then(|ext| ext.to_str()) else {
        return false;
    };

    if !matches!(ext, "wasm" | "js" | "css") {
        return false;
    }

    let Some(filename) = Path::new(path).file_name().and_then(|name| name.to_str()) else {
        return false;
    };

    filename
        .split(['-', '_', '.'])
        .any(|segment| segment.len() >= 8 && segment.chars().all(|c| c.is_ascii_hexdigit()))
}
