use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use stallmap_shared::{Stall, StallChange, StallEvent, StallMap, StallStatus, normalize_key};
use tracing::{info, warn};

use crate::config::stall_poll_interval;
use crate::state::{AppState, PreSerializedEvent, StallStoreSettings};

type SerializedSnapshotPayloads = (Arc<Bytes>, Arc<Bytes>, Arc<Bytes>);

pub async fn run(state: AppState, store: StallStoreSettings) {
    let mut interval = tokio::time::interval(stall_poll_interval());

    loop {
        interval.tick().await;
        state.observability.record_stall_poll();

        match fetch_stalls(&state.http_client, &store).await {
            Ok(stalls) => process_polled_stalls(&state, stalls).await,
            Err(e) => {
                state.observability.record_stall_poll_failure();
                warn!("Failed to fetch stalls: {e}");
            }
        }
    }
}

pub(crate) async fn process_polled_stalls(state: &AppState, new_stalls: StallMap) {
    warn_on_key_collisions(&new_stalls);

    let (changes, has_removals) = {
        let current = state.live_snapshot.read().await;
        (
            compute_changes(&current.stalls, &new_stalls),
            has_removed_stalls(&current.stalls, &new_stalls),
        )
    };

    if changes.is_empty() && !has_removals {
        return;
    }

    let initial_seq = state.next_seq.load(Ordering::Relaxed);
    let Some(seq) = initial_seq.checked_add(1) else {
        warn!("Sequence counter overflow while preparing stall event");
        return;
    };
    let timestamp = Utc::now().to_rfc3339();

    let (snapshot_json, stalls_json, live_json) =
        match serialize_all_formats(seq, &timestamp, &new_stalls) {
            Some(payloads) => payloads,
            None => return,
        };

    let event = if has_removals {
        info!(
            stalls = new_stalls.len(),
            "stall set changed (removals detected), broadcasting snapshot"
        );
        PreSerializedEvent::Snapshot {
            seq,
            json: Arc::clone(&snapshot_json),
        }
    } else {
        info!(changes = changes.len(), "stall changes detected");
        let update = StallEvent::Update {
            seq,
            changes: changes.clone(),
            timestamp: timestamp.clone(),
        };
        match serde_json::to_vec(&update) {
            Ok(json) => PreSerializedEvent::Update {
                seq,
                json: Arc::new(Bytes::from(json)),
            },
            Err(e) => {
                warn!("failed to serialize stall update event: {e}");
                return;
            }
        }
    };

    {
        let mut current = state.live_snapshot.write().await;
        current.stalls = new_stalls;
        current.snapshot_json = snapshot_json;
        current.stalls_json = stalls_json;
        current.live_json = live_json;
        current.seq = seq;
        current.timestamp = timestamp;
    }
    state.next_seq.store(seq, Ordering::Relaxed);

    if matches!(event, PreSerializedEvent::Update { .. }) {
        state
            .observability
            .record_stall_updates_broadcast(changes.len() as u64);
    }
    let _ = state.event_tx.send(event);
}

fn serialize_all_formats(
    seq: u64,
    timestamp: &str,
    stalls: &StallMap,
) -> Option<SerializedSnapshotPayloads> {
    #[derive(serde::Serialize)]
    #[serde(tag = "type")]
    enum SnapshotRef<'a> {
        Snapshot {
            seq: u64,
            stalls: &'a StallMap,
            timestamp: &'a str,
        },
    }

    #[derive(serde::Serialize)]
    struct LiveRef<'a> {
        seq: u64,
        timestamp: &'a str,
        stalls: &'a StallMap,
    }

    let snapshot = serde_json::to_vec(&SnapshotRef::Snapshot {
        seq,
        stalls,
        timestamp,
    });
    let plain = serde_json::to_vec(stalls);
    let live = serde_json::to_vec(&LiveRef {
        seq,
        timestamp,
        stalls,
    });

    match (snapshot, plain, live) {
        (Ok(snapshot), Ok(plain), Ok(live)) => Some((
            Arc::new(Bytes::from(snapshot)),
            Arc::new(Bytes::from(plain)),
            Arc::new(Bytes::from(live)),
        )),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
            warn!("failed to serialize live stall payloads: {e}");
            None
        }
    }
}

async fn fetch_stalls(
    client: &reqwest::Client,
    store: &StallStoreSettings,
) -> Result<StallMap, String> {
    let mut request = client
        .get(&store.url)
        .query(&[("select", "stall_number,status,section_id,location_desc,updated_at")]);
    if let Some(market_id) = store.market_id.as_deref() {
        request = request.query(&[("market_id", format!("eq.{market_id}"))]);
    }
    if let Some(key) = store.api_key.as_deref() {
        request = request.header("apikey", key).bearer_auth(key);
    }

    let resp = request
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    let status = resp.status();
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| format!("failed to read response body: {e}"))?;

    if !status.is_success() {
        let preview = String::from_utf8_lossy(&bytes)
            .chars()
            .take(200)
            .collect::<String>();
        return Err(format!("upstream status {status}; body preview: {preview}"));
    }

    parse_stall_rows(bytes.as_ref()).map_err(|e| {
        let preview = String::from_utf8_lossy(&bytes)
            .chars()
            .take(200)
            .collect::<String>();
        format!("failed to decode stall rows: {e}; body preview: {preview}")
    })
}

#[derive(serde::Deserialize)]
struct RawStallRow {
    #[serde(default)]
    stall_number: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    section_id: Option<serde_json::Value>,
    #[serde(default)]
    location_desc: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl RawStallRow {
    fn into_stall(self) -> Option<Stall> {
        let stall_number = self
            .stall_number
            .as_deref()
            .map(str::trim)
            .filter(|number| !number.is_empty())?
            .to_string();
        let section_id = match self.section_id {
            Some(serde_json::Value::String(id)) => Some(id),
            Some(serde_json::Value::Number(id)) => Some(id.to_string()),
            _ => None,
        };
        let location_desc = self
            .location_desc
            .map(|desc| desc.trim().to_string())
            .filter(|desc| !desc.is_empty());

        Some(Stall {
            stall_number,
            status: self
                .status
                .as_deref()
                .map(StallStatus::parse)
                .unwrap_or_default(),
            section_id,
            location_desc,
            updated_at: self.updated_at,
        })
    }
}

fn parse_stall_rows(bytes: &[u8]) -> Result<StallMap, serde_json::Error> {
    let rows: Vec<RawStallRow> = serde_json::from_slice(bytes)?;
    Ok(rows
        .into_iter()
        .filter_map(RawStallRow::into_stall)
        .map(|stall| (stall.stall_number.clone(), stall))
        .collect())
}

fn compute_changes(old: &StallMap, new: &StallMap) -> Vec<StallChange> {
    new.iter()
        .filter_map(|(number, stall)| {
            let previous = old.get(number);
            if previous.is_some_and(|previous| previous.same_listing(stall)) {
                return None;
            }
            Some(StallChange {
                stall: stall.clone(),
                previous_status: previous.map(|previous| previous.status),
            })
        })
        .collect()
}

fn has_removed_stalls(old: &StallMap, new: &StallMap) -> bool {
    old.keys().any(|number| !new.contains_key(number))
}

/// Stall numbers that are distinct rows but share a map key; the client keeps the last one.
fn key_collisions(stalls: &StallMap) -> Vec<(String, Vec<String>)> {
    let mut by_key: HashMap<String, Vec<String>> = HashMap::new();
    for number in stalls.keys() {
        by_key
            .entry(normalize_key(Some(number)))
            .or_default()
            .push(number.clone());
    }
    let mut collisions: Vec<_> = by_key
        .into_iter()
        .filter(|(key, numbers)| !key.is_empty() && numbers.len() > 1)
        .collect();
    collisions.sort();
    collisions
}

fn warn_on_key_collisions(stalls: &StallMap) {
    for (key, numbers) in key_collisions(stalls) {
        warn!(
            key = key.as_str(),
            stall_numbers = ?numbers,
            "stall numbers collide after normalization; map overlay keeps the last one"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::Router;
    use axum::extract::Query;
    use axum::http::HeaderMap;
    use axum::routing::get;
    use stallmap_shared::{LiveStalls, Stall, StallEvent, StallMap, StallStatus};
    use tokio::sync::broadcast::error::TryRecvError;

    use super::{
        compute_changes, fetch_stalls, has_removed_stalls, key_collisions, parse_stall_rows,
        process_polled_stalls,
    };
    use crate::state::{AppState, PreSerializedEvent, StallStoreSettings, test_map_settings};

    fn stall_map(entries: &[(&str, StallStatus)]) -> StallMap {
        entries
            .iter()
            .map(|&(number, status)| (number.to_string(), Stall::new(number, status)))
            .collect()
    }

    fn event_json(event: &PreSerializedEvent) -> StallEvent {
        let json = match event {
            PreSerializedEvent::Snapshot { json, .. } | PreSerializedEvent::Update { json, .. } => {
                json
            }
        };
        serde_json::from_slice(json.as_ref()).expect("event payload should parse")
    }

    #[test]
    fn compute_changes_reports_new_and_changed_stalls() {
        let old = stall_map(&[("A-1", StallStatus::Vacant), ("A-2", StallStatus::Occupied)]);
        let new = stall_map(&[
            ("A-1", StallStatus::Occupied),
            ("A-2", StallStatus::Occupied),
            ("B-1", StallStatus::Vacant),
        ]);

        let changes = compute_changes(&old, &new);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].stall.stall_number, "A-1");
        assert_eq!(changes[0].previous_status, Some(StallStatus::Vacant));
        assert_eq!(changes[1].stall.stall_number, "B-1");
        assert_eq!(changes[1].previous_status, None);
    }

    #[test]
    fn compute_changes_ignores_timestamp_only_edits() {
        let old = stall_map(&[("A-1", StallStatus::Vacant)]);
        let mut new = old.clone();
        if let Some(stall) = new.get_mut("A-1") {
            stall.updated_at = Some(chrono::Utc::now());
        }
        assert!(compute_changes(&old, &new).is_empty());
    }

    #[test]
    fn removed_stalls_detection_is_correct() {
        let old = stall_map(&[("A-1", StallStatus::Vacant), ("A-2", StallStatus::Vacant)]);
        let new = stall_map(&[("A-1", StallStatus::Vacant)]);
        assert!(has_removed_stalls(&old, &new));
        assert!(!has_removed_stalls(&new, &old));
    }

    #[test]
    fn parse_rows_tolerates_nulls_and_odd_types() {
        let payload = br#"[
            {"stall_number": "A-1", "status": " VACANT ", "section_id": 4, "location_desc": "  "},
            {"stall_number": "A-2", "status": null, "section_id": "sec-b"},
            {"stall_number": null, "status": "vacant"},
            {"stall_number": "   ", "status": "vacant"},
            {"stall_number": "M-7", "status": "closed", "updated_at": "2026-03-01T08:00:00Z"}
        ]"#;

        let stalls = parse_stall_rows(payload).expect("rows should parse");
        assert_eq!(stalls.len(), 3);

        let a1 = stalls.get("A-1").expect("A-1 present");
        assert_eq!(a1.status, StallStatus::Vacant);
        assert_eq!(a1.section_id.as_deref(), Some("4"));
        assert_eq!(a1.location_desc, None);

        let a2 = stalls.get("A-2").expect("A-2 present");
        assert_eq!(a2.status, StallStatus::Unknown);
        assert_eq!(a2.section_id.as_deref(), Some("sec-b"));

        let m7 = stalls.get("M-7").expect("M-7 present");
        assert_eq!(m7.status, StallStatus::Unknown);
        assert!(m7.updated_at.is_some());
    }

    #[test]
    fn key_collisions_group_numbers_by_normalized_key() {
        let stalls = stall_map(&[
            ("A-1", StallStatus::Vacant),
            ("a 1", StallStatus::Occupied),
            ("B-2", StallStatus::Vacant),
            ("--", StallStatus::Vacant),
            ("//", StallStatus::Vacant),
        ]);
        let collisions = key_collisions(&stalls);
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].0, "a1");
        assert_eq!(collisions[0].1.len(), 2);
    }

    #[tokio::test]
    async fn skips_noop_tick_when_there_are_no_changes() {
        let state = AppState::new(None, test_map_settings());
        {
            let mut current = state.live_snapshot.write().await;
            current.stalls = stall_map(&[("A-1", StallStatus::Vacant)]);
            current.seq = 31;
            current.timestamp = "2026-01-01T00:00:00Z".to_string();
        }
        state
            .next_seq
            .store(31, std::sync::atomic::Ordering::Relaxed);
        let mut rx = state.event_tx.subscribe();

        process_polled_stalls(&state, stall_map(&[("A-1", StallStatus::Vacant)])).await;

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        let current = state.live_snapshot.read().await;
        assert_eq!(current.seq, 31);
        assert_eq!(current.timestamp, "2026-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn status_change_broadcasts_update_and_advances_sequence() {
        let state = AppState::new(None, test_map_settings());
        {
            let mut current = state.live_snapshot.write().await;
            current.stalls = stall_map(&[("A-1", StallStatus::Vacant)]);
            current.seq = 4;
        }
        state
            .next_seq
            .store(4, std::sync::atomic::Ordering::Relaxed);
        let mut rx = state.event_tx.subscribe();

        process_polled_stalls(&state, stall_map(&[("A-1", StallStatus::Occupied)])).await;

        let event = rx.try_recv().expect("update should be broadcast");
        assert!(matches!(event, PreSerializedEvent::Update { seq: 5, .. }));
        match event_json(&event) {
            StallEvent::Update { seq, changes, .. } => {
                assert_eq!(seq, 5);
                assert_eq!(changes.len(), 1);
                assert_eq!(changes[0].stall.status, StallStatus::Occupied);
                assert_eq!(changes[0].previous_status, Some(StallStatus::Vacant));
            }
            other => panic!("expected update event, got {other:?}"),
        }

        let current = state.live_snapshot.read().await;
        assert_eq!(current.seq, 5);
        let live: LiveStalls =
            serde_json::from_slice(current.live_json.as_ref()).expect("live payload parses");
        assert_eq!(live.seq, 5);
        assert_eq!(
            live.stalls.get("A-1").map(|stall| stall.status),
            Some(StallStatus::Occupied)
        );
        let plain: StallMap =
            serde_json::from_slice(current.stalls_json.as_ref()).expect("stall map parses");
        assert_eq!(plain.len(), 1);
        assert_eq!(state.observability.snapshot().stall_updates_broadcast_total, 1);
    }

    #[tokio::test]
    async fn removal_broadcasts_snapshot() {
        let state = AppState::new(None, test_map_settings());
        {
            let mut current = state.live_snapshot.write().await;
            current.stalls = stall_map(&[("A-1", StallStatus::Vacant), ("A-2", StallStatus::Vacant)]);
        }
        let mut rx = state.event_tx.subscribe();

        process_polled_stalls(&state, stall_map(&[("A-1", StallStatus::Vacant)])).await;

        let event = rx.try_recv().expect("snapshot should be broadcast");
        match event_json(&event) {
            StallEvent::Snapshot { seq, stalls, .. } => {
                assert_eq!(seq, 1);
                assert_eq!(stalls.len(), 1);
                assert!(stalls.contains_key("A-1"));
            }
            other => panic!("expected snapshot event, got {other:?}"),
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn fetch_sends_key_headers_and_market_filter() {
        let app = Router::new().route(
            "/rest/v1/stalls",
            get(
                |headers: HeaderMap, Query(query): Query<Vec<(String, String)>>| async move {
                    let apikey_ok = headers
                        .get("apikey")
                        .and_then(|value| value.to_str().ok())
                        == Some("anon-key");
                    let market_ok = query
                        .iter()
                        .any(|(name, value)| name == "market_id" && value == "eq.central");
                    if !(apikey_ok && market_ok) {
                        return axum::Json(serde_json::json!([]));
                    }
                    axum::Json(serde_json::json!([
                        {"stall_number": "A-1", "status": "vacant"},
                        {"stall_number": "A-2", "status": "occupied"}
                    ]))
                },
            ),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr: SocketAddr = listener.local_addr().expect("listener address");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve stall store");
        });

        let store = StallStoreSettings {
            url: format!("http://{addr}/rest/v1/stalls"),
            api_key: Some("anon-key".to_string()),
            market_id: Some("central".to_string()),
        };
        let stalls = fetch_stalls(&reqwest::Client::new(), &store)
            .await
            .expect("fetch should succeed");

        assert_eq!(stalls.len(), 2);
        assert_eq!(
            stalls.get("A-2").map(|stall| stall.status),
            Some(StallStatus::Occupied)
        );
        handle.abort();
    }
}
