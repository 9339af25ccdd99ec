use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use stallmap_shared::{LiveStalls, MapCredentials, StallMap};
use tokio::sync::{RwLock, broadcast};
use tracing::warn;

use crate::config::{
    map_api_base_url, map_api_credentials, map_archive_url, map_cache_ttl_secs, map_id,
    map_public_credentials, market_id, sse_broadcast_buffer, stall_store_key, stall_store_url,
    upstream_connect_timeout, upstream_http_timeout,
};

/// SSE event serialized once by the poller and shared by all clients via Arc.
#[derive(Debug, Clone)]
pub enum PreSerializedEvent {
    Snapshot { seq: u64, json: Arc<Bytes> },
    Update { seq: u64, json: Arc<Bytes> },
}

#[derive(Debug, Clone)]
pub struct LiveSnapshot {
    pub seq: u64,
    pub timestamp: String,
    pub stalls: StallMap,
    pub snapshot_json: Arc<Bytes>,
    pub stalls_json: Arc<Bytes>,
    pub live_json: Arc<Bytes>,
}

impl Default for LiveSnapshot {
    fn default() -> Self {
        let seq = 0;
        let timestamp = Utc::now().to_rfc3339();
        let stalls = StallMap::new();
        let live_json = serde_json::to_vec(&LiveStalls {
            seq,
            timestamp: timestamp.clone(),
            stalls: stalls.clone(),
        })
        .map(Bytes::from)
        .unwrap_or_else(|_| Bytes::from_static(br#"{"seq":0,"timestamp":"","stalls":{}}"#));

        Self {
            seq,
            timestamp,
            stalls,
            snapshot_json: Arc::new(Bytes::new()),
            stalls_json: Arc::new(Bytes::from_static(b"{}")),
            live_json: Arc::new(live_json),
        }
    }
}

/// Where the stall feed polls from. `None` on the state when unconfigured.
#[derive(Debug, Clone)]
pub struct StallStoreSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub market_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MapSettings {
    pub map_id: Option<String>,
    pub archive_url: Option<String>,
    pub api_base_url: String,
    pub api_credentials: Option<MapCredentials>,
    pub public_credentials: Option<MapCredentials>,
    pub cache_ttl_secs: i64,
}

impl MapSettings {
    pub fn from_env() -> Self {
        Self {
            map_id: map_id(),
            archive_url: map_archive_url(),
            api_base_url: map_api_base_url(),
            api_credentials: map_api_credentials(),
            public_credentials: map_public_credentials(),
            cache_ttl_secs: map_cache_ttl_secs(),
        }
    }
}

/// Broker payload cached per map id, already serialized for the response body.
#[derive(Debug, Clone)]
pub struct CachedMapPayload {
    pub json: Arc<Bytes>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AppState {
    pub live_snapshot: Arc<RwLock<LiveSnapshot>>,
    pub next_seq: Arc<AtomicU64>,
    pub event_tx: broadcast::Sender<PreSerializedEvent>,
    pub map_cache: Arc<DashMap<String, CachedMapPayload>>,
    pub http_client: reqwest::Client,
    pub stall_store: Option<StallStoreSettings>,
    pub map: Arc<MapSettings>,
    pub observability: Arc<ObservabilityCounters>,
}

#[derive(Debug, Default)]
pub struct ObservabilityCounters {
    stall_polls_total: AtomicU64,
    stall_poll_failures_total: AtomicU64,
    stall_updates_broadcast_total: AtomicU64,
    broker_requests_total: AtomicU64,
    broker_cache_hits_total: AtomicU64,
    broker_upstream_errors_total: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct ObservabilitySnapshot {
    pub stall_polls_total: u64,
    pub stall_poll_failures_total: u64,
    pub stall_updates_broadcast_total: u64,
    pub broker_requests_total: u64,
    pub broker_cache_hits_total: u64,
    pub broker_upstream_errors_total: u64,
}

impl ObservabilityCounters {
    pub fn snapshot(&self) -> ObservabilitySnapshot {
        ObservabilitySnapshot {
            stall_polls_total: self.stall_polls_total.load(Ordering::Relaxed),
            stall_poll_failures_total: self.stall_poll_failures_total.load(Ordering::Relaxed),
            stall_updates_broadcast_total: self
                .stall_updates_broadcast_total
                .load(Ordering::Relaxed),
            broker_requests_total: self.broker_requests_total.load(Ordering::Relaxed),
            broker_cache_hits_total: self.broker_cache_hits_total.load(Ordering::Relaxed),
            broker_upstream_errors_total: self.broker_upstream_errors_total.load(Ordering::Relaxed),
        }
    }

    pub fn record_stall_poll(&self) {
        self.stall_polls_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stall_poll_failure(&self) {
        self.stall_poll_failures_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stall_updates_broadcast(&self, count: u64) {
        self.stall_updates_broadcast_total
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_broker_request(&self) {
        self.broker_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broker_cache_hit(&self) {
        self.broker_cache_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broker_upstream_error(&self) {
        self.broker_upstream_errors_total
            .fetch_add(1, Ordering::Relaxed);
    }
}

impl AppState {
    pub fn new(stall_store: Option<StallStoreSettings>, map: MapSettings) -> Self {
        let (event_tx, _) = broadcast::channel(sse_broadcast_buffer());
        let request_timeout = upstream_http_timeout();
        let connect_timeout = upstream_connect_timeout();
        let http_client = reqwest::Client::builder()
            .user_agent("stallmap/0.1")
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .or_else(|e| {
                warn!(
                    error = %e,
                    "failed to build configured HTTP client, retrying without custom user-agent"
                );
                reqwest::Client::builder()
                    .timeout(request_timeout)
                    .connect_timeout(connect_timeout)
                    .build()
            })
            .unwrap_or_else(|e| {
                panic!("failed to build timeout-configured HTTP client: {e}");
            });
        Self {
            live_snapshot: Arc::new(RwLock::new(LiveSnapshot::default())),
            next_seq: Arc::new(AtomicU64::new(0)),
            event_tx,
            map_cache: Arc::new(DashMap::new()),
            http_client,
            stall_store,
            map: Arc::new(map),
            observability: Arc::new(ObservabilityCounters::default()),
        }
    }

    pub fn from_env() -> Self {
        let stall_store = stall_store_url().map(|url| StallStoreSettings {
            url,
            api_key: stall_store_key(),
            market_id: market_id(),
        });
        Self::new(stall_store, MapSettings::from_env())
    }
}

#[cfg(test)]
pub(crate) fn test_map_settings() -> MapSettings {
    MapSettings {
        map_id: Some("market-main".to_string()),
        archive_url: None,
        api_base_url: "http://127.0.0.1:9".to_string(),
        api_credentials: None,
        public_credentials: None,
        cache_ttl_secs: 900,
    }
}
