use std::rc::Rc;

use leptos::html::Div;
use leptos::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::spawn_local;

use stallmap_shared::colors::EMPHASIS;
use stallmap_shared::{MapCredentials, Stall, StallStatus};

use crate::api::GlooTransport;
use crate::bootstrap::{BootstrapContext, StrategyKind, standard_strategies};
use crate::colors::rgba_css;
use crate::debug::DebugSnapshot;
use crate::js_sdk::JsMapSdk;
use crate::log;
use crate::painter::ColorMode;
use crate::router::{RouterCallbacks, StallClickCallback, TooltipRequest};
use crate::sdk::{MapHandle, MapSpace};
use crate::session::{MapSession, SessionOutcome};

/// Latest bootstrap/paint diagnostics, provided by the host app.
#[derive(Clone, Copy)]
pub(crate) struct MapDebug(pub RwSignal<DebugSnapshot>);

/// Host notification once a map is live: the handle and the strategy that produced it.
pub type MapReadyCallback = Callback<(Rc<dyn MapHandle>, StrategyKind)>;

/// The live session of one `StallMap` instance.
#[derive(Clone, Copy)]
struct SessionSlot(StoredValue<Option<MapSession>, LocalStorage>);

impl SessionSlot {
    fn new() -> Self {
        Self(StoredValue::new_local(None))
    }

    fn current(&self) -> Option<MapSession> {
        self.0.try_with_value(Clone::clone).flatten()
    }

    fn release(&self) {
        if let Some(session) = self.0.try_update_value(Option::take).flatten() {
            session.teardown();
        }
    }

    /// Tears down the previous session and installs `session` in its place.
    fn install(&self, session: MapSession) {
        self.release();
        let mut pending = Some(session);
        self.0.try_update_value(|slot| *slot = pending.take());
        if let Some(orphan) = pending {
            orphan.teardown();
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct TooltipInfo {
    stall_number: String,
    status: StallStatus,
    section: Option<String>,
    location: Option<String>,
    x: f64,
    y: f64,
}

impl TooltipInfo {
    fn from_request(request: TooltipRequest) -> Option<Self> {
        match request {
            TooltipRequest::Show {
                stall, pointer, ..
            } => {
                let (x, y) = pointer.unwrap_or((0.0, 0.0));
                Some(Self {
                    stall_number: stall.stall_number,
                    status: stall.status,
                    section: stall.section_id,
                    location: stall.location_desc,
                    x,
                    y,
                })
            }
            TooltipRequest::Hide => None,
        }
    }
}

/// Interactive market map with the stall overlay applied.
#[component]
pub fn StallMap(
    #[prop(into)] map_id: Signal<String>,
    #[prop(into)] archive_url: Signal<Option<String>>,
    #[prop(into)] credentials: Signal<Option<MapCredentials>>,
    #[prop(into)] stalls: Signal<Vec<Stall>>,
    #[prop(into)] color_mode: Signal<ColorMode>,
    #[prop(optional)] on_map_ready: Option<MapReadyCallback>,
    #[prop(optional)] on_stall_click: Option<Callback<(Stall, MapSpace)>>,
) -> impl IntoView {
    let MapDebug(debug) = expect_context();
    let container = NodeRef::<Div>::new();
    let slot = SessionSlot::new();
    let error: RwSignal<Option<String>> = RwSignal::new(None);
    let loading: RwSignal<bool> = RwSignal::new(true);
    let tooltip: RwSignal<Option<TooltipInfo>> = RwSignal::new(None);
    // Bumped each time a session becomes ready so the overlay effect re-runs.
    let ready_generation: RwSignal<u64> = RwSignal::new(0);

    // Bootstrap a fresh session whenever the map inputs change.
    Effect::new(move || {
        let map_id = map_id.get();
        let archive_url = archive_url.get();
        let credentials = credentials.get();
        let Some(element) = container.get() else {
            return;
        };

        slot.release();
        error.set(None);
        tooltip.set(None);
        loading.set(true);

        let sdk = match JsMapSdk::detect(element.unchecked_into::<web_sys::HtmlElement>()) {
            Ok(sdk) => sdk,
            Err(e) => {
                log::warn(&e);
                error.set(Some(e));
                loading.set(false);
                return;
            }
        };
        log::info(&format!("map SDK capabilities: {:?}", sdk.capabilities()));

        let session = MapSession::new();
        slot.install(session.clone());

        let ctx = Rc::new(BootstrapContext::new(map_id, archive_url, credentials));
        let strategies = standard_strategies(Rc::new(sdk), Rc::new(GlooTransport));
        let on_map_ready = on_map_ready.clone();
        spawn_local(async move {
            let outcome = session
                .bootstrap(strategies, ctx, move |handle, kind| {
                    ready_generation.update(|generation| *generation += 1);
                    if let Some(callback) = on_map_ready {
                        callback.run((handle, kind));
                    }
                })
                .await;
            match outcome {
                Ok(SessionOutcome::Stale) => return,
                Ok(SessionOutcome::Ready(_)) => {}
                Err(message) => error.set(Some(message)),
            }
            loading.set(false);
            debug.set(session.debug_snapshot());
        });
    });

    // Repaint and rebind whenever stalls, mode or the live session change.
    Effect::new(move || {
        ready_generation.track();
        let stalls = stalls.get();
        let mode = color_mode.get();
        let Some(session) = slot.current() else {
            return;
        };

        let on_click = on_stall_click.clone().map(|callback| -> StallClickCallback {
            Rc::new(move |stall: &Stall, space: &MapSpace| {
                callback.run((stall.clone(), space.clone()));
            })
        });
        let callbacks = RouterCallbacks {
            on_stall_click: on_click,
            on_tooltip: Some(Rc::new(move |request: TooltipRequest| {
                tooltip.set(TooltipInfo::from_request(request));
            })),
        };

        session.reconcile(&stalls, mode, callbacks);
        if session.is_ready() {
            debug.set(session.debug_snapshot());
        }
    });

    on_cleanup(move || slot.release());

    view! {
        <div style="width: 100%; height: 100%; position: relative; overflow: hidden; background: #0c0e17;">
            <div node_ref=container style="width: 100%; height: 100%;" />
            {move || {
                loading.get().then(|| view! {
                    <div style="position: absolute; top: 16px; left: 16px; padding: 6px 10px; background: #161921; border: 1px solid #282c3e; border-radius: 6px; color: #9a9590; font-family: 'JetBrains Mono', monospace; font-size: 0.72rem;">
                        "Loading market map\u{2026}"
                    </div>
                })
            }}
            {move || error.get().map(|message| view! { <MapErrorPanel message=message /> })}
            <StallTooltip tooltip=tooltip />
        </div>
    }
}

#[component]
fn MapErrorPanel(message: String) -> impl IntoView {
    view! {
        <div style="position: absolute; inset: 0; display: flex; align-items: center; justify-content: center; padding: 24px; background: rgba(12,14,23,0.88);">
            <div style="max-width: 560px; background: #161921; border: 1px solid #282c3e; border-radius: 8px; overflow: hidden; display: flex; flex-direction: row; box-shadow: 0 4px 16px rgba(0,0,0,0.5);">
                <div style="width: 3px; flex-shrink: 0; background: #ef4444;" />
                <div style="padding: 14px 16px;">
                    <div style="font-size: 0.9rem; font-weight: 700; color: #e2e0d8; font-family: 'Inter', system-ui, sans-serif; margin-bottom: 8px;">
                        "Map unavailable"
                    </div>
                    <pre style="margin: 0; white-space: pre-wrap; font-size: 0.72rem; line-height: 1.5; color: #9a9590; font-family: 'JetBrains Mono', monospace;">
                        {message}
                    </pre>
                </div>
            </div>
        </div>
    }
}

/// Follows the pointer while it is over an open stall.
#[component]
fn StallTooltip(tooltip: RwSignal<Option<TooltipInfo>>) -> impl IntoView {
    let (r, g, b) = EMPHASIS;
    view! {
        {move || {
            let Some(info) = tooltip.get() else {
                return view! { <div style="display:none;" /> }.into_any();
            };
            view! {
                <div
                    class="tooltip-animate"
                    style:left=format!("{}px", info.x + 16.0)
                    style:top=format!("{}px", info.y - 8.0)
                    style="position: fixed; pointer-events: none; z-index: 100; background: #161921; border: 1px solid #282c3e; border-radius: 6px; overflow: hidden; box-shadow: 0 4px 16px rgba(0,0,0,0.5); max-width: 240px; display: flex; flex-direction: row;"
                >
                    <div style={format!("width: 3px; flex-shrink: 0; background: {};", rgba_css((r, g, b), 0.85))} />
                    <div style="padding: 8px 10px; flex: 1;">
                        <div style="font-size: 0.82rem; font-weight: 700; color: #e2e0d8; font-family: 'JetBrains Mono', monospace; line-height: 1.3;">
                            {format!("Stall {}", info.stall_number)}
                        </div>
                        <div style="font-size: 0.72rem; color: #22c55e; font-family: 'Inter', system-ui, sans-serif; margin-top: 2px;">
                            {info.status.label()}
                        </div>
                        {info.section.map(|section| view! {
                            <div style="font-size: 0.65rem; margin-top: 5px; padding-top: 4px; border-top: 1px solid rgba(40,44,62,0.5); display: flex; justify-content: space-between; gap: 8px;">
                                <span style="color: #9a9590; font-family: 'Inter', system-ui, sans-serif;">"Section"</span>
                                <span style="color: #e2e0d8; font-family: 'JetBrains Mono', monospace;">{section}</span>
                            </div>
                        })}
                        {info.location.map(|location| view! {
                            <div style="font-size: 0.65rem; margin-top: 3px; color: #9a9590; font-family: 'Inter', system-ui, sans-serif;">
                                {location}
                            </div>
                        })}
                    </div>
                </div>
            }.into_any()
        }}
    }
}
