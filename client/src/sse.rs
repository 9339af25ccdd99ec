use std::cell::RefCell;

use leptos::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;
use web_sys::{EventSource, MessageEvent};

use stallmap_shared::{StallEvent, StallMap, apply_stall_changes};

use crate::api;
use crate::log;

const LIVE_RESYNC_RETRY_BASE_MS: f64 = 500.0;
const LIVE_RESYNC_RETRY_MAX_MS: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Live,
    Reconnecting,
}

impl ConnectionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Connecting => "Connecting",
            Self::Live => "Live",
            Self::Reconnecting => "Reconnecting",
        }
    }
}

/// Signals fed by the stall event stream.
#[derive(Clone, Copy)]
pub struct StallFeed {
    pub stalls: RwSignal<StallMap>,
    pub connection: RwSignal<ConnectionStatus>,
    pub gap_count: RwSignal<u64>,
    last_seq: RwSignal<Option<u64>>,
    needs_resync: RwSignal<bool>,
    resync_in_flight: RwSignal<bool>,
}

impl StallFeed {
    pub fn new() -> Self {
        Self {
            stalls: RwSignal::new(StallMap::new()),
            connection: RwSignal::new(ConnectionStatus::Connecting),
            gap_count: RwSignal::new(0),
            last_seq: RwSignal::new(None),
            needs_resync: RwSignal::new(false),
            resync_in_flight: RwSignal::new(false),
        }
    }

    /// Seed from a plain `/api/stalls` load. Ignored once the stream has delivered
    /// sequenced state.
    pub fn seed(&self, stalls: StallMap) {
        if self.last_seq.get_untracked().is_none() {
            self.stalls.set(stalls);
        }
    }
}

struct SseConnection {
    es: EventSource,
    on_open: Closure<dyn Fn()>,
    on_error: Closure<dyn Fn()>,
    snapshot_handler: Closure<dyn Fn(MessageEvent)>,
    update_handler: Closure<dyn Fn(MessageEvent)>,
}

impl SseConnection {
    fn close(self) {
        let _ = self.on_open.as_ref();
        let _ = self.on_error.as_ref();
        self.es.set_onopen(None);
        self.es.set_onerror(None);
        self.es
            .remove_event_listener_with_callback(
                "snapshot",
                self.snapshot_handler.as_ref().unchecked_ref(),
            )
            .ok();
        self.es
            .remove_event_listener_with_callback(
                "update",
                self.update_handler.as_ref().unchecked_ref(),
            )
            .ok();
        self.es.close();
    }
}

#[derive(Debug, Clone, Copy)]
struct LiveResyncRetryState {
    consecutive_failures: u32,
    next_allowed_at_ms: f64,
}

impl LiveResyncRetryState {
    const fn new() -> Self {
        Self {
            consecutive_failures: 0,
            next_allowed_at_ms: 0.0,
        }
    }
}

thread_local! {
    static SSE_CONNECTION: RefCell<Option<SseConnection>> = const { RefCell::new(None) };
    static LIVE_RESYNC_RETRY: RefCell<LiveResyncRetryState> = const { RefCell::new(LiveResyncRetryState::new()) };
}

pub fn disconnect() {
    SSE_CONNECTION.with(|slot| {
        let mut slot = slot.borrow_mut();
        if let Some(connection) = slot.take() {
            connection.close();
        }
    });
    reset_live_resync_retry();
}

pub fn has_seq_gap(last_seq: Option<u64>, incoming_seq: u64) -> bool {
    if incoming_seq == 0 {
        return false;
    }

    match last_seq {
        Some(last_seq) => incoming_seq != last_seq.saturating_add(1),
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateAction {
    Apply,
    Ignore,
    Resync,
}

fn classify_update(last_seq: Option<u64>, seq: u64, needs_resync: bool) -> UpdateAction {
    if needs_resync {
        return UpdateAction::Resync;
    }
    if seq == 0 {
        return UpdateAction::Apply;
    }
    match last_seq {
        Some(last_seq) if seq <= last_seq => UpdateAction::Ignore,
        _ if has_seq_gap(last_seq, seq) => UpdateAction::Resync,
        _ => UpdateAction::Apply,
    }
}

fn live_resync_backoff_ms(consecutive_failures: u32) -> f64 {
    let exponent = consecutive_failures.saturating_sub(1).min(6);
    let factor = 1u32 << exponent;
    (LIVE_RESYNC_RETRY_BASE_MS * factor as f64).min(LIVE_RESYNC_RETRY_MAX_MS)
}

fn reset_live_resync_retry() {
    LIVE_RESYNC_RETRY.with(|state| {
        *state.borrow_mut() = LiveResyncRetryState::new();
    });
}

fn live_resync_retry_ready(now_ms: f64) -> bool {
    LIVE_RESYNC_RETRY.with(|state| now_ms >= state.borrow().next_allowed_at_ms)
}

fn mark_live_resync_failure(now_ms: f64) -> (u32, f64) {
    LIVE_RESYNC_RETRY.with(|state| {
        let mut state = state.borrow_mut();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let backoff_ms = live_resync_backoff_ms(state.consecutive_failures);
        state.next_allowed_at_ms = now_ms + backoff_ms;
        (state.consecutive_failures, backoff_ms)
    })
}

fn trigger_live_resync(feed: StallFeed) {
    if feed.resync_in_flight.get_untracked() {
        return;
    }

    let now_ms = js_sys::Date::now();
    if !live_resync_retry_ready(now_ms) {
        return;
    }

    feed.resync_in_flight.set(true);
    spawn_local(async move {
        let result = api::fetch_live_stalls().await;
        feed.resync_in_flight.set(false);

        match result {
            Ok(live) => {
                feed.stalls.set(live.stalls);
                feed.last_seq.set(Some(live.seq));
                feed.needs_resync.set(false);
                reset_live_resync_retry();
            }
            Err(e) => {
                feed.needs_resync.set(true);
                let (attempt, backoff_ms) = mark_live_resync_failure(js_sys::Date::now());
                log::warn(&format!(
                    "stall resync failed (attempt {attempt}): {e}; backing off for {}ms",
                    backoff_ms.round()
                ));
            }
        }
    });
}

/// Connect to the stall event stream and keep `feed` current.
pub fn connect(feed: StallFeed) {
    feed.connection.set(ConnectionStatus::Connecting);

    let es = match EventSource::new("/api/stalls/events") {
        Ok(es) => es,
        Err(_) => {
            feed.connection.set(ConnectionStatus::Reconnecting);
            return;
        }
    };

    let on_open = Closure::<dyn Fn()>::new(move || {
        feed.connection.set(ConnectionStatus::Live);
        if feed.needs_resync.get_untracked() {
            trigger_live_resync(feed);
        }
    });
    es.set_onopen(Some(on_open.as_ref().unchecked_ref()));

    let snapshot_handler = Closure::<dyn Fn(MessageEvent)>::new(move |e: MessageEvent| {
        let Some(data) = e.data().as_string() else {
            return;
        };
        let Ok(StallEvent::Snapshot { seq, stalls, .. }) = serde_json::from_str::<StallEvent>(&data)
        else {
            return;
        };

        if let Some(last_seq) = feed.last_seq.get_untracked()
            && seq > 0
            && seq < last_seq
        {
            log::info(&format!(
                "stall feed sequence reset (last_seq={last_seq}, snapshot_seq={seq})"
            ));
        }

        feed.stalls.set(stalls);
        feed.last_seq.set((seq > 0).then_some(seq));
        feed.needs_resync.set(false);
        reset_live_resync_retry();
    });
    es.add_event_listener_with_callback("snapshot", snapshot_handler.as_ref().unchecked_ref())
        .ok();

    let update_handler = Closure::<dyn Fn(MessageEvent)>::new(move |e: MessageEvent| {
        let Some(data) = e.data().as_string() else {
            return;
        };
        let Ok(StallEvent::Update { seq, changes, .. }) = serde_json::from_str::<StallEvent>(&data)
        else {
            return;
        };

        let last_seq = feed.last_seq.get_untracked();
        match classify_update(last_seq, seq, feed.needs_resync.get_untracked()) {
            UpdateAction::Ignore => {}
            UpdateAction::Resync => {
                if !feed.needs_resync.get_untracked() {
                    let mut gap_count = 0;
                    feed.gap_count.update(|count| {
                        *count = count.saturating_add(1);
                        gap_count = *count;
                    });
                    log::warn(&format!(
                        "stall feed gap #{gap_count} (last_seq={last_seq:?}, incoming_seq={seq})"
                    ));
                    feed.needs_resync.set(true);
                }
                trigger_live_resync(feed);
            }
            UpdateAction::Apply => {
                feed.stalls.update(|stalls| apply_stall_changes(stalls, &changes));
                feed.last_seq.set((seq > 0).then_some(seq));
            }
        }
    });
    es.add_event_listener_with_callback("update", update_handler.as_ref().unchecked_ref())
        .ok();

    let on_error = Closure::<dyn Fn()>::new(move || {
        feed.connection.set(ConnectionStatus::Reconnecting);
        feed.needs_resync.set(true);
    });
    es.set_onerror(Some(on_error.as_ref().unchecked_ref()));

    // Replace any existing connection, ensuring handlers are unregistered cleanly.
    SSE_CONNECTION.with(|slot| {
        let mut slot = slot.borrow_mut();
        if let Some(old) = slot.take() {
            old.close();
        }
        *slot = Some(SseConnection {
            es,
            on_open,
            on_error,
            snapshot_handler,
            update_handler,
        });
    });
}
