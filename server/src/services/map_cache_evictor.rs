use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::config::MAP_CACHE_EVICTION_SECS;
use crate::state::AppState;

pub async fn run(state: AppState) {
    let mut interval = tokio::time::interval(Duration::from_secs(MAP_CACHE_EVICTION_SECS));

    loop {
        interval.tick().await;
        evict_stale(&state);
    }
}

fn evict_stale(state: &AppState) -> usize {
    let before = state.map_cache.len();
    let now = Utc::now();
    let ttl = state.map.cache_ttl_secs;

    state
        .map_cache
        .retain(|_, cached| now.signed_duration_since(cached.fetched_at).num_seconds() < ttl);

    let evicted = before.saturating_sub(state.map_cache.len());
    if evicted > 0 {
        info!(
            "evicted {evicted} stale map payloads ({} remaining)",
            state.map_cache.len()
        );
    }
    evicted
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use chrono::{Duration, Utc};

    use super::evict_stale;
    use crate::state::{AppState, CachedMapPayload, test_map_settings};

    #[test]
    fn evicts_only_entries_older_than_ttl() {
        let state = AppState::new(None, test_map_settings());
        state.map_cache.insert(
            "fresh".to_string(),
            CachedMapPayload {
                json: Arc::new(Bytes::from_static(b"{}")),
                fetched_at: Utc::now(),
            },
        );
        state.map_cache.insert(
            "stale".to_string(),
            CachedMapPayload {
                json: Arc::new(Bytes::from_static(b"{}")),
                fetched_at: Utc::now() - Duration::seconds(state.map.cache_ttl_secs + 5),
            },
        );

        assert_eq!(evict_stale(&state), 1);
        assert!(state.map_cache.contains_key("fresh"));
        assert!(!state.map_cache.contains_key("stale"));
    }
}
