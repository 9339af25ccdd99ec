use std::rc::Rc;

use chrono::{DateTime, Utc};
use gloo_storage::Storage;
use leptos::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::spawn_local;

use stallmap_shared::colors::{EMPHASIS, NEUTRAL, PLACEHOLDER, PREFIX_COLORS, hex_css};
use stallmap_shared::{MapConfig, Rgb, Stall};

use crate::api;
use crate::bootstrap::StrategyKind;
use crate::debug::DebugSnapshot;
use crate::log;
use crate::painter::ColorMode;
use crate::sdk::{MapHandle, MapSpace};
use crate::sse::{self, ConnectionStatus, StallFeed};
use crate::stall_map::{MapDebug, MapReadyCallback, StallMap};

const SETTINGS_KEY: &str = "stallmap_settings";
const READY_BANNER_MS: u32 = 4_000;

#[derive(serde::Serialize, serde::Deserialize, Default)]
#[serde(default)]
struct Settings {
    color_mode: ColorMode,
}

/// A stall picked on the map, remembered by number so live updates show through.
#[derive(Debug, Clone, PartialEq)]
struct Selection {
    stall_number: String,
    space_label: String,
}

fn legend_entries(mode: ColorMode) -> Vec<(String, Rgb)> {
    let mut entries = vec![("Open for application".to_string(), EMPHASIS)];
    match mode {
        ColorMode::Simple => entries.push(("Occupied or unavailable".to_string(), NEUTRAL)),
        ColorMode::Category => {
            entries.extend(
                PREFIX_COLORS
                    .iter()
                    .map(|&(prefix, rgb)| (format!("Section {prefix}"), rgb)),
            );
            entries.push(("Other sections".to_string(), NEUTRAL));
        }
    }
    entries.push(("No stall record".to_string(), PLACEHOLDER));
    entries
}

/// Root application component. Loads map settings and stalls, then hosts the map.
#[component]
pub fn App() -> impl IntoView {
    let feed = StallFeed::new();
    let config: RwSignal<Option<MapConfig>> = RwSignal::new(None);
    let config_error: RwSignal<Option<String>> = RwSignal::new(None);
    let selected: RwSignal<Option<Selection>> = RwSignal::new(None);
    let ready_via: RwSignal<Option<(StrategyKind, usize)>> = RwSignal::new(None);
    let debug: RwSignal<DebugSnapshot> = RwSignal::new(DebugSnapshot::default());
    let saved: Settings = gloo_storage::LocalStorage::get(SETTINGS_KEY).unwrap_or_default();
    let color_mode: RwSignal<ColorMode> = RwSignal::new(saved.color_mode);

    provide_context(MapDebug(debug));

    // Persist settings on change
    Effect::new(move || {
        let settings = Settings {
            color_mode: color_mode.get(),
        };
        let _ = gloo_storage::LocalStorage::set(SETTINGS_KEY, &settings);
    });

    Effect::new(move || {
        spawn_local(async move {
            match api::fetch_map_config().await {
                Ok(loaded) => config.set(Some(loaded)),
                Err(e) => {
                    log::warn(&format!("map config load failed: {e}"));
                    config_error.set(Some(e));
                }
            }
        });
    });

    Effect::new(move || {
        spawn_local(async move {
            match api::fetch_stalls().await {
                Ok(stalls) => feed.seed(stalls),
                Err(e) => log::warn(&format!("stall list load failed: {e}")),
            }
        });
    });

    // Connect to SSE on mount
    Effect::new(move || {
        sse::connect(feed);
        on_cleanup(|| {
            sse::disconnect();
        });
    });

    let has_config = Memo::new(move |_| config.with(Option::is_some));
    let map_id = Signal::derive(move || {
        config.with(|c| c.as_ref().map(|c| c.map_id.clone()).unwrap_or_default())
    });
    let archive_url = Signal::derive(move || {
        config.with(|c| c.as_ref().and_then(|c| c.archive_url.clone()))
    });
    let credentials = Signal::derive(move || {
        config.with(|c| c.as_ref().and_then(|c| c.credentials.clone()))
    });
    let stall_list = Signal::derive(move || feed.stalls.with(|s| s.values().cloned().collect::<Vec<Stall>>()));

    let on_map_ready: MapReadyCallback =
        Callback::new(move |(handle, kind): (Rc<dyn MapHandle>, StrategyKind)| {
            ready_via.set(Some((kind, handle.spaces().len())));
            spawn_local(async move {
                gloo_timers::future::TimeoutFuture::new(READY_BANNER_MS).await;
                ready_via.set(None);
            });
        });
    let on_stall_click = Callback::new(move |(stall, space): (Stall, MapSpace)| {
        selected.set(Some(Selection {
            stall_number: stall.stall_number,
            space_label: space.label().to_string(),
        }));
    });

    view! {
        <div style="display: flex; flex-direction: column; width: 100vw; height: 100vh; background: #0c0e17; color: #e2e0d8;">
            <Header connection=feed.connection color_mode=color_mode />
            <div style="flex: 1; position: relative; min-height: 0;">
                {move || {
                    if has_config.get() {
                        view! {
                            <StallMap
                                map_id=map_id
                                archive_url=archive_url
                                credentials=credentials
                                stalls=stall_list
                                color_mode=color_mode
                                on_map_ready=on_map_ready
                                on_stall_click=on_stall_click
                            />
                        }
                        .into_any()
                    } else {
                        let text = config_error
                            .get()
                            .map(|e| format!("Map settings unavailable: {e}"))
                            .unwrap_or_else(|| "Loading map settings\u{2026}".to_string());
                        view! {
                            <div style="padding: 24px; font-family: 'JetBrains Mono', monospace; font-size: 0.78rem; color: #9a9590;">
                                {text}
                            </div>
                        }
                        .into_any()
                    }
                }}
                <Legend color_mode=color_mode />
                <SelectedStallPanel selected=selected stalls=feed />
                {move || ready_via.get().map(|(kind, spaces)| view! {
                    <div style="position: absolute; top: 16px; right: 16px; padding: 6px 10px; background: #161921; border: 1px solid #282c3e; border-radius: 6px; font-family: 'JetBrains Mono', monospace; font-size: 0.7rem; color: #50c878;">
                        {format!("Map loaded via {kind} ({spaces} spaces)")}
                    </div>
                })}
            </div>
            <StatusBar debug=debug gap_count=feed.gap_count />
        </div>
    }
}

#[component]
fn Header(connection: RwSignal<ConnectionStatus>, color_mode: RwSignal<ColorMode>) -> impl IntoView {
    view! {
        <div style="display: flex; align-items: center; justify-content: space-between; padding: 10px 16px; background: #161921; border-bottom: 1px solid #282c3e;">
            <div style="display: flex; align-items: center; gap: 10px;">
                <span style="font-size: 0.95rem; font-weight: 700; font-family: 'Inter', system-ui, sans-serif;">"Market Stall Map"</span>
                <span style=move || {
                    let color = match connection.get() {
                        ConnectionStatus::Live => "#50c878",
                        ConnectionStatus::Connecting => "#f5c542",
                        ConnectionStatus::Reconnecting => "#e74c3c",
                    };
                    format!("display: inline-block; width: 8px; height: 8px; border-radius: 50%; background: {color};")
                } />
                <span style="font-family: 'JetBrains Mono', monospace; font-size: 0.65rem; color: #9a9590;">
                    {move || connection.get().label()}
                </span>
            </div>
            <div style="display: flex; gap: 6px;">
                <ModeButton mode=ColorMode::Simple color_mode=color_mode />
                <ModeButton mode=ColorMode::Category color_mode=color_mode />
            </div>
        </div>
    }
}

#[component]
fn ModeButton(mode: ColorMode, color_mode: RwSignal<ColorMode>) -> impl IntoView {
    view! {
        <button
            style=move || {
                let (border, color) = if color_mode.get() == mode {
                    ("#50c878", "#e2e0d8")
                } else {
                    ("#282c3e", "#9a9590")
                };
                format!("padding: 4px 10px; background: #1a1d2a; border: 1px solid {border}; border-radius: 4px; color: {color}; font-family: 'Inter', system-ui, sans-serif; font-size: 0.75rem; cursor: pointer; transition: background 0.15s;")
            }
            on:click=move |_| color_mode.set(mode)
            on:mouseenter=|e| {
                if let Some(el) = e.target().and_then(|t| t.dyn_into::<web_sys::HtmlElement>().ok()) {
                    el.style().set_property("background", "#232738").ok();
                }
            }
            on:mouseleave=|e| {
                if let Some(el) = e.target().and_then(|t| t.dyn_into::<web_sys::HtmlElement>().ok()) {
                    el.style().set_property("background", "#1a1d2a").ok();
                }
            }
        >
            {mode.label()}
        </button>
    }
}

#[component]
fn Legend(color_mode: RwSignal<ColorMode>) -> impl IntoView {
    view! {
        <div style="position: absolute; left: 16px; bottom: 16px; padding: 8px 10px; background: #161921; border: 1px solid #282c3e; border-radius: 6px; display: flex; flex-direction: column; gap: 4px; max-height: 60%; overflow-y: auto;">
            {move || {
                legend_entries(color_mode.get())
                    .into_iter()
                    .map(|(label, rgb)| view! {
                        <div style="display: flex; align-items: center; gap: 8px;">
                            <span style={format!("display: inline-block; width: 10px; height: 10px; border-radius: 2px; background: {};", hex_css(rgb))} />
                            <span style="font-size: 0.68rem; color: #9a9590; font-family: 'Inter', system-ui, sans-serif;">{label}</span>
                        </div>
                    })
                    .collect_view()
            }}
        </div>
    }
}

#[component]
fn SelectedStallPanel(selected: RwSignal<Option<Selection>>, stalls: StallFeed) -> impl IntoView {
    let current = move || {
        let selection = selected.get()?;
        let stall = stalls.stalls.with(|map| {
            map.values()
                .find(|stall| stall.stall_number == selection.stall_number)
                .cloned()
        })?;
        Some((selection, stall))
    };

    view! {
        {move || current().map(|(selection, stall)| view! {
            <div style="position: absolute; right: 16px; bottom: 16px; width: 260px; background: #161921; border: 1px solid #282c3e; border-radius: 6px; padding: 12px 14px; font-family: 'Inter', system-ui, sans-serif;">
                <div style="display: flex; justify-content: space-between; align-items: center;">
                    <span style="font-size: 0.9rem; font-weight: 700; font-family: 'JetBrains Mono', monospace;">
                        {format!("Stall {}", stall.stall_number)}
                    </span>
                    <button
                        style="background: none; border: none; color: #9a9590; cursor: pointer; font-size: 0.9rem;"
                        on:click=move |_| selected.set(None)
                    >
                        "\u{00d7}"
                    </button>
                </div>
                <div style="font-size: 0.72rem; color: #9a9590; margin-top: 4px;">
                    {format!("{} \u{00b7} map space {}", stall.status.label(), selection.space_label)}
                </div>
                {stall.section_id.map(|section| view! {
                    <div style="font-size: 0.72rem; margin-top: 6px;">{format!("Section {section}")}</div>
                })}
                {stall.location_desc.map(|location| view! {
                    <div style="font-size: 0.72rem; margin-top: 2px; color: #9a9590;">{location}</div>
                })}
                {stall.updated_at.map(|at| view! {
                    <div style="font-size: 0.62rem; margin-top: 6px; color: #5a5860; font-family: 'JetBrains Mono', monospace;">
                        {updated_label(at, Utc::now())}
                    </div>
                })}
            </div>
        })}
    }
}

/// Relative age for recent listing changes, an absolute UTC stamp otherwise.
fn updated_label(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(at);
    if age < chrono::Duration::zero() || age >= chrono::Duration::days(1) {
        return format!("updated {}", at.format("%Y-%m-%d %H:%M UTC"));
    }
    match age.num_minutes() {
        0 => "updated just now".to_string(),
        minutes @ 1..60 => format!("updated {minutes} min ago"),
        _ => format!("updated {} h ago", age.num_hours()),
    }
}

#[component]
fn StatusBar(debug: RwSignal<DebugSnapshot>, gap_count: RwSignal<u64>) -> impl IntoView {
    view! {
        <div style="display: flex; justify-content: space-between; padding: 4px 16px; background: #161921; border-top: 1px solid #282c3e; font-family: 'JetBrains Mono', monospace; font-size: 0.62rem; color: #5a5860;">
            <span>{move || debug.with(DebugSnapshot::summary)}</span>
            <span>{move || match gap_count.get() {
                0 => String::new(),
                gaps => format!("feed gaps: {gaps}"),
            }}</span>
        </div>
    }
}

#[cfg(test)]
mod tests {
    use stallmap_shared::colors::{EMPHASIS, NEUTRAL, PLACEHOLDER, PREFIX_COLORS};

    use chrono::{Duration, TimeZone, Utc};

    use super::{legend_entries, updated_label};
    use crate::painter::ColorMode;

    #[test]
    fn simple_legend_lists_the_three_fills() {
        let entries = legend_entries(ColorMode::Simple);
        let colors: Vec<_> = entries.iter().map(|(_, rgb)| *rgb).collect();
        assert_eq!(colors, vec![EMPHASIS, NEUTRAL, PLACEHOLDER]);
    }

    #[test]
    fn category_legend_lists_every_section_color() {
        let entries = legend_entries(ColorMode::Category);
        assert_eq!(entries.len(), PREFIX_COLORS.len() + 3);
        assert_eq!(entries[1].0, format!("Section {}", PREFIX_COLORS[0].0));
        assert_eq!(entries.last().map(|(_, rgb)| *rgb), Some(PLACEHOLDER));
    }

    #[test]
    fn updated_label_is_relative_within_a_day() {
        let now = Utc.with_ymd_and_hms(2024, 5, 4, 12, 0, 0).unwrap();
        assert_eq!(updated_label(now - Duration::seconds(20), now), "updated just now");
        assert_eq!(updated_label(now - Duration::minutes(7), now), "updated 7 min ago");
        assert_eq!(updated_label(now - Duration::hours(3), now), "updated 3 h ago");
        assert_eq!(
            updated_label(now - Duration::days(2), now),
            "updated 2024-05-02 12:00 UTC"
        );
        assert_eq!(
            updated_label(now + Duration::minutes(5), now),
            "updated 2024-05-04 12:05 UTC"
        );
    }
}
