use futures::FutureExt;
use futures::future::LocalBoxFuture;
use gloo_net::http::{Request, Response};
use serde::de::DeserializeOwned;
use stallmap_shared::{BrokerRequest, BrokerResponse, LiveStalls, MapConfig, StallMap};

use crate::sdk::{FetchedArchive, MapTransport};

async fn get_json<T: DeserializeOwned>(url: &str) -> Result<T, String> {
    let resp = Request::get(url)
        .send()
        .await
        .map_err(|e| format!("fetch error: {e}"))?;

    if !resp.ok() {
        return Err(format!("HTTP {}", resp.status()));
    }

    resp.json::<T>()
        .await
        .map_err(|e| format!("parse error: {e}"))
}

pub async fn fetch_map_config() -> Result<MapConfig, String> {
    get_json("/api/map/config").await
}

pub async fn fetch_stalls() -> Result<StallMap, String> {
    get_json("/api/stalls").await
}

/// Gap-free stall state with its sequence number, for resyncing the event feed.
pub async fn fetch_live_stalls() -> Result<LiveStalls, String> {
    get_json("/api/stalls/live").await
}

/// Error text for a failed response, preferring the broker's `error` field.
async fn error_text(resp: Response) -> String {
    let status = resp.status();
    match resp.json::<BrokerResponse>().await {
        Ok(BrokerResponse {
            error: Some(error), ..
        }) => format!("HTTP {status}: {error}"),
        _ => format!("HTTP {status}"),
    }
}

/// Map transport over the browser's fetch.
pub struct GlooTransport;

impl MapTransport for GlooTransport {
    fn fetch_archive(&self, url: String) -> LocalBoxFuture<'static, Result<FetchedArchive, String>> {
        async move {
            let resp = Request::get(&url)
                .send()
                .await
                .map_err(|e| format!("fetch error: {e}"))?;

            if !resp.ok() {
                return Err(format!("HTTP {}", resp.status()));
            }

            let content_type = resp.headers().get("content-type");
            let bytes = resp
                .binary()
                .await
                .map_err(|e| format!("read error: {e}"))?;
            Ok(FetchedArchive {
                bytes,
                content_type,
            })
        }
        .boxed_local()
    }

    fn request_broker(
        &self,
        map_id: String,
    ) -> LocalBoxFuture<'static, Result<BrokerResponse, String>> {
        async move {
            let resp = Request::post("/api/map/broker")
                .json(&BrokerRequest { map_id })
                .map_err(|e| format!("encode error: {e}"))?
                .send()
                .await
                .map_err(|e| format!("fetch error: {e}"))?;

            if !resp.ok() {
                return Err(error_text(resp).await);
            }

            resp.json::<BrokerResponse>()
                .await
                .map_err(|e| format!("parse error: {e}"))
        }
        .boxed_local()
    }
}
