use std::time::Duration;

use stallmap_shared::MapCredentials;

pub const DEFAULT_STALL_POLL_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_MAP_API_BASE_URL: &str = "https://app.mappedin.com/api/v1";
pub const MAP_API_TOKEN_PATH: &str = "api-key/token";
pub const MAP_API_BUNDLE_PATH: &str = "venue";
pub const DEFAULT_MAP_CACHE_TTL_SECS: i64 = 900; // 15 minutes
pub const MAP_CACHE_EVICTION_SECS: u64 = 300;
pub const MAX_MAP_CACHE_ENTRIES: usize = 32;
pub const SSE_KEEPALIVE_SECS: u64 = 15;
pub const DEFAULT_BROADCAST_BUFFER: usize = 256;
pub const DEFAULT_UPSTREAM_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_SERVER_PORT: u16 = 3000;

/// Hosted stall table REST endpoint, e.g.
/// `https://<project>.supabase.co/rest/v1/stalls`.
pub fn stall_store_url() -> Option<String> {
    non_empty_var("STALL_STORE_URL")
}

/// API key sent as both `apikey` and bearer token to the stall store.
pub fn stall_store_key() -> Option<String> {
    non_empty_var("STALL_STORE_KEY")
}

/// Restricts the stall feed to one market when set.
pub fn market_id() -> Option<String> {
    non_empty_var("MARKET_ID")
}

pub fn stall_poll_interval() -> Duration {
    positive_var::<u64>("STALL_POLL_INTERVAL_SECS")
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_STALL_POLL_INTERVAL_SECS))
}

pub fn map_id() -> Option<String> {
    non_empty_var("MAP_ID")
}

/// Pre-packaged map archive the client fetches before asking the broker.
pub fn map_archive_url() -> Option<String> {
    non_empty_var("MAP_ARCHIVE_URL")
}

pub fn map_api_base_url() -> String {
    non_empty_var("MAP_API_BASE_URL")
        .map(|url| url.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_MAP_API_BASE_URL.to_string())
}

/// Vendor key/secret the broker exchanges for access tokens. Never sent to browsers.
pub fn map_api_credentials() -> Option<MapCredentials> {
    credentials_pair("MAP_API_KEY", "MAP_API_SECRET")
}

/// Optional read-only credentials handed to the client for its last-resort strategy.
pub fn map_public_credentials() -> Option<MapCredentials> {
    credentials_pair("MAP_PUBLIC_KEY", "MAP_PUBLIC_SECRET")
}

pub fn map_cache_ttl_secs() -> i64 {
    positive_var::<i64>("MAP_CACHE_TTL_SECS").unwrap_or(DEFAULT_MAP_CACHE_TTL_SECS)
}

pub fn sse_broadcast_buffer() -> usize {
    positive_var::<usize>("SSE_BROADCAST_BUFFER").unwrap_or(DEFAULT_BROADCAST_BUFFER)
}

pub fn upstream_http_timeout() -> Duration {
    positive_var::<u64>("UPSTREAM_HTTP_TIMEOUT_SECS")
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_UPSTREAM_HTTP_TIMEOUT_SECS))
}

pub fn upstream_connect_timeout() -> Duration {
    positive_var::<u64>("UPSTREAM_CONNECT_TIMEOUT_SECS")
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS))
}

pub fn server_port() -> u16 {
    positive_var::<u16>("SERVER_PORT").unwrap_or(DEFAULT_SERVER_PORT)
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn positive_var<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
}

fn credentials_pair(key_var: &str, secret_var: &str) -> Option<MapCredentials> {
    Some(MapCredentials {
        key: non_empty_var(key_var)?,
        secret: non_empty_var(secret_var)?,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        DEFAULT_MAP_API_BASE_URL, DEFAULT_STALL_POLL_INTERVAL_SECS, map_api_base_url,
        map_api_credentials, map_cache_ttl_secs, stall_poll_interval, stall_store_url,
    };

    #[test]
    fn poll_interval_ignores_zero_and_garbage() {
        temp_env::with_var("STALL_POLL_INTERVAL_SECS", Some("0"), || {
            assert_eq!(
                stall_poll_interval(),
                Duration::from_secs(DEFAULT_STALL_POLL_INTERVAL_SECS)
            );
        });
        temp_env::with_var("STALL_POLL_INTERVAL_SECS", Some("soon"), || {
            assert_eq!(
                stall_poll_interval(),
                Duration::from_secs(DEFAULT_STALL_POLL_INTERVAL_SECS)
            );
        });
        temp_env::with_var("STALL_POLL_INTERVAL_SECS", Some(" 42 "), || {
            assert_eq!(stall_poll_interval(), Duration::from_secs(42));
        });
    }

    #[test]
    fn credentials_require_both_halves() {
        temp_env::with_vars(
            [("MAP_API_KEY", Some("key")), ("MAP_API_SECRET", None::<&str>)],
            || assert!(map_api_credentials().is_none()),
        );
        temp_env::with_vars(
            [("MAP_API_KEY", Some("key")), ("MAP_API_SECRET", Some("  "))],
            || assert!(map_api_credentials().is_none()),
        );
        temp_env::with_vars(
            [("MAP_API_KEY", Some("key")), ("MAP_API_SECRET", Some("secret"))],
            || {
                let creds = map_api_credentials().expect("both halves set");
                assert_eq!(creds.key, "key");
                assert_eq!(creds.secret, "secret");
            },
        );
    }

    #[test]
    fn api_base_url_defaults_and_strips_trailing_slash() {
        temp_env::with_var("MAP_API_BASE_URL", None::<&str>, || {
            assert_eq!(map_api_base_url(), DEFAULT_MAP_API_BASE_URL);
        });
        temp_env::with_var("MAP_API_BASE_URL", Some("http://127.0.0.1:9000/api/"), || {
            assert_eq!(map_api_base_url(), "http://127.0.0.1:9000/api");
        });
    }

    #[test]
    fn blank_store_url_is_unset() {
        temp_env::with_var("STALL_STORE_URL", Some("   "), || {
            assert!(stall_store_url().is_none());
        });
    }

    #[test]
    fn cache_ttl_rejects_negative_values() {
        temp_env::with_var("MAP_CACHE_TTL_SECS", Some("-5"), || {
            assert_eq!(map_cache_ttl_secs(), super::DEFAULT_MAP_CACHE_TTL_SECS);
        });
    }
}
