//! Adapter over the vendor's browser SDK, loaded as a global namespace object.
//!
//! The namespace is inspected once when the adapter is built; call paths the
//! loaded SDK build does not offer are reported as strategy failures instead of
//! being checked again on every call.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use js_sys::{Array, Function, Object, Promise, Reflect, Uint8Array};
use serde::Serialize;
use stallmap_shared::MapCredentials;
use stallmap_shared::colors::hex_css;
use wasm_bindgen::JsCast;
use wasm_bindgen::JsValue;
use wasm_bindgen::prelude::Closure;
use wasm_bindgen_futures::JsFuture;

use crate::sdk::{
    HandleCapabilities, HandleResult, ListenerId, MapEvent, MapEventKind, MapHandle, MapListener,
    MapSdk, MapSource, MapSpace, SpaceId, VisualState,
};

pub const SDK_GLOBAL: &str = "mappedin";
const SPACE_TYPE: &str = "space";

/// Entry points present on the loaded SDK namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdkCapabilities {
    pub get_map_data: bool,
    pub hydrate_map_data: bool,
    pub show_3d_map: bool,
}

fn method(target: &JsValue, name: &str) -> Option<Function> {
    Reflect::get(target, &JsValue::from_str(name))
        .ok()?
        .dyn_into::<Function>()
        .ok()
}

fn js_error(value: JsValue) -> String {
    if let Some(text) = value.as_string() {
        return text;
    }
    Reflect::get(&value, &JsValue::from_str("message"))
        .ok()
        .and_then(|message| message.as_string())
        .unwrap_or_else(|| format!("{value:?}"))
}

fn set(target: &Object, key: &str, value: &JsValue) -> Result<(), String> {
    Reflect::set(target, &JsValue::from_str(key), value)
        .map(|_| ())
        .map_err(js_error)
}

/// Call `target[name](...args)` and await the result if it is a promise.
async fn call_async(target: JsValue, name: &'static str, args: Array) -> Result<JsValue, String> {
    let function = method(&target, name).ok_or_else(|| format!("{name} is not available"))?;
    let result = function.apply(&target, &args).map_err(js_error)?;
    JsFuture::from(Promise::resolve(&result))
        .await
        .map_err(|e| format!("{name}: {}", js_error(e)))
}

fn string_field(target: &JsValue, key: &str) -> Option<String> {
    let value = Reflect::get(target, &JsValue::from_str(key)).ok()?;
    value
        .as_string()
        .or_else(|| value.as_f64().map(|number| number.to_string()))
}

fn space_from_js(value: &JsValue) -> Option<MapSpace> {
    let id = string_field(value, "id")?;
    Some(MapSpace {
        space_id: SpaceId(id.clone()),
        name: string_field(value, "name"),
        id: Some(id),
        slug: string_field(value, "slug"),
        external_id: string_field(value, "externalId"),
    })
}

fn map_event(kind: MapEventKind, payload: &JsValue) -> MapEvent {
    let spaces = Reflect::get(payload, &JsValue::from_str("spaces"))
        .ok()
        .and_then(|value| value.dyn_into::<Array>().ok())
        .map(|listed| listed.iter().filter_map(|v| space_from_js(&v)).collect())
        .unwrap_or_default();
    let pointer = Reflect::get(payload, &JsValue::from_str("pointerEvent"))
        .ok()
        .and_then(|value| value.dyn_into::<web_sys::MouseEvent>().ok())
        .map(|mouse| (f64::from(mouse.client_x()), f64::from(mouse.client_y())));
    MapEvent {
        kind,
        spaces,
        pointer,
    }
}

pub struct JsMapSdk {
    namespace: JsValue,
    container: web_sys::HtmlElement,
    capabilities: SdkCapabilities,
}

impl JsMapSdk {
    /// Resolve the SDK from `window[SDK_GLOBAL]`. The map view can only be created
    /// when `show3dMap` exists, so its absence is an error here.
    pub fn detect(container: web_sys::HtmlElement) -> Result<Self, String> {
        let namespace = Reflect::get(&js_sys::global(), &JsValue::from_str(SDK_GLOBAL))
            .map_err(js_error)?;
        if namespace.is_undefined() || namespace.is_null() {
            return Err(format!(
                "map SDK not found: window.{SDK_GLOBAL} is not defined; check the SDK script tag"
            ));
        }

        let capabilities = SdkCapabilities {
            get_map_data: method(&namespace, "getMapData").is_some(),
            hydrate_map_data: method(&namespace, "hydrateMapData").is_some(),
            show_3d_map: method(&namespace, "show3dMap").is_some(),
        };
        if !capabilities.show_3d_map {
            return Err(format!("map SDK window.{SDK_GLOBAL} has no show3dMap"));
        }

        Ok(Self {
            namespace,
            container,
            capabilities,
        })
    }

    pub fn capabilities(&self) -> SdkCapabilities {
        self.capabilities
    }

    fn fetch_and_show(&self, options: Result<Object, String>) -> LocalBoxFuture<'static, HandleResult> {
        let namespace = self.namespace.clone();
        let container = self.container.clone();
        let available = self.capabilities.get_map_data;
        async move {
            if !available {
                return Err("getMapData is not available in this SDK build".to_string());
            }
            let options = options?;
            let map_data =
                call_async(namespace.clone(), "getMapData", Array::of1(&options)).await?;
            show(namespace, container, map_data).await
        }
        .boxed_local()
    }
}

fn map_options(map_id: &str, fields: &[(&str, &str)]) -> Result<Object, String> {
    let options = Object::new();
    set(&options, "mapId", &JsValue::from_str(map_id))?;
    for (key, value) in fields {
        set(&options, key, &JsValue::from_str(value))?;
    }
    Ok(options)
}

/// Runs `list` to completion before `render` starts; a failed listing renders nothing.
async fn list_then_render<S, V, L, R>(
    list: L,
    render: impl FnOnce() -> R,
) -> Result<(S, V), String>
where
    L: Future<Output = Result<S, String>>,
    R: Future<Output = Result<V, String>>,
{
    let listed = list.await?;
    let view = render().await?;
    Ok((listed, view))
}

async fn show(namespace: JsValue, container: web_sys::HtmlElement, map_data: JsValue) -> HandleResult {
    if map_data.is_undefined() || map_data.is_null() {
        return Err("SDK returned no map data".to_string());
    }

    let list = {
        let map_data = map_data.clone();
        async move {
            let listed = call_async(
                map_data,
                "getByType",
                Array::of1(&JsValue::from_str(SPACE_TYPE)),
            )
            .await?;
            listed
                .dyn_into::<Array>()
                .map_err(|_| "getByType('space') did not return an array".to_string())
        }
    };
    let render = move || {
        let args = Array::of2(container.as_ref(), &map_data);
        call_async(namespace, "show3dMap", args)
    };
    let (listed, view) = list_then_render(list, render).await?;
    if view.is_undefined() || view.is_null() {
        return Err("show3dMap returned no map view".to_string());
    }

    let mut spaces = Vec::with_capacity(listed.length() as usize);
    let mut objects = HashMap::with_capacity(listed.length() as usize);
    for value in listed.iter() {
        if let Some(space) = space_from_js(&value) {
            objects.insert(space.space_id.clone(), value);
            spaces.push(space);
        }
    }

    let handle: Rc<dyn MapHandle> = Rc::new(JsMapHandle::new(view, spaces, objects));
    Ok(handle)
}

impl MapSdk for JsMapSdk {
    fn open_source(&self, source: MapSource) -> LocalBoxFuture<'static, HandleResult> {
        let namespace = self.namespace.clone();
        let container = self.container.clone();
        let available = self.capabilities.hydrate_map_data;
        async move {
            if !available {
                return Err("hydrateMapData is not available in this SDK build".to_string());
            }
            let payload = match source {
                MapSource::Archive(bytes) => Uint8Array::from(bytes.as_slice()).into(),
                MapSource::Json(value) => value
                    .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
                    .map_err(|e| format!("map JSON conversion error: {e}"))?,
            };
            let map_data =
                call_async(namespace.clone(), "hydrateMapData", Array::of1(&payload)).await?;
            show(namespace, container, map_data).await
        }
        .boxed_local()
    }

    fn open_with_token(
        &self,
        token: String,
        map_id: String,
    ) -> LocalBoxFuture<'static, HandleResult> {
        self.fetch_and_show(map_options(&map_id, &[("accessToken", token.as_str())]))
    }

    fn open_with_credentials(
        &self,
        credentials: MapCredentials,
        map_id: String,
    ) -> LocalBoxFuture<'static, HandleResult> {
        self.fetch_and_show(map_options(
            &map_id,
            &[
                ("key", credentials.key.as_str()),
                ("secret", credentials.secret.as_str()),
            ],
        ))
    }
}

struct JsListener {
    event: &'static str,
    closure: Closure<dyn Fn(JsValue)>,
}

/// A rendered map view plus the space objects it was created with.
pub struct JsMapHandle {
    view: JsValue,
    spaces: Vec<MapSpace>,
    objects: HashMap<SpaceId, JsValue>,
    listeners: RefCell<HashMap<u64, JsListener>>,
    next_listener: Cell<u64>,
    capabilities: HandleCapabilities,
}

impl JsMapHandle {
    fn new(view: JsValue, spaces: Vec<MapSpace>, objects: HashMap<SpaceId, JsValue>) -> Self {
        let events = method(&view, "on").is_some() && method(&view, "off").is_some();
        let capabilities = HandleCapabilities {
            destroy: method(&view, "destroy").is_some(),
            hover: events,
        };
        Self {
            view,
            spaces,
            objects,
            listeners: RefCell::new(HashMap::new()),
            next_listener: Cell::new(0),
            capabilities,
        }
    }

    fn call(&self, name: &str, args: &Array) -> Result<JsValue, String> {
        let function = method(&self.view, name).ok_or_else(|| format!("{name} is not available"))?;
        function.apply(&self.view, args).map_err(js_error)
    }
}

impl MapHandle for JsMapHandle {
    fn spaces(&self) -> Vec<MapSpace> {
        self.spaces.clone()
    }

    fn apply_visual_state(&self, space: &SpaceId, state: VisualState) -> Result<(), String> {
        let object = self
            .objects
            .get(space)
            .ok_or_else(|| format!("space {space} is not part of this map"))?;
        let update = Object::new();
        set(&update, "color", &JsValue::from_str(&hex_css(state.color)))?;
        set(&update, "hoverColor", &JsValue::from_str(&hex_css(state.hover_color)))?;
        set(&update, "interactive", &JsValue::from_bool(state.interactive))?;
        self.call("updateState", &Array::of2(object, &update))
            .map(|_| ())
    }

    fn subscribe(&self, kind: MapEventKind, listener: MapListener) -> Result<ListenerId, String> {
        let event = match kind {
            MapEventKind::Click => "click",
            MapEventKind::HoverEnter | MapEventKind::HoverLeave => {
                if !self.capabilities.hover {
                    return Err("hover events are not supported".to_string());
                }
                "hover"
            }
        };

        // Leaving a space arrives as a hover event with no spaces.
        let closure = Closure::<dyn Fn(JsValue)>::new(move |payload: JsValue| {
            let event = map_event(kind, &payload);
            let entered = !event.spaces.is_empty();
            let deliver = match kind {
                MapEventKind::Click => true,
                MapEventKind::HoverEnter => entered,
                MapEventKind::HoverLeave => !entered,
            };
            if deliver {
                listener(&event);
            }
        });

        self.call(
            "on",
            &Array::of2(&JsValue::from_str(event), closure.as_ref().unchecked_ref()),
        )?;

        let id = self.next_listener.get() + 1;
        self.next_listener.set(id);
        self.listeners
            .borrow_mut()
            .insert(id, JsListener { event, closure });
        Ok(ListenerId(id))
    }

    fn unsubscribe(&self, id: ListenerId) {
        let Some(listener) = self.listeners.borrow_mut().remove(&id.0) else {
            return;
        };
        let args = Array::of2(
            &JsValue::from_str(listener.event),
            listener.closure.as_ref().unchecked_ref(),
        );
        if let Err(e) = self.call("off", &args) {
            crate::log::warn(&format!("could not remove {} listener: {e}", listener.event));
        }
    }

    fn capabilities(&self) -> HandleCapabilities {
        self.capabilities
    }

    fn destroy(&self) -> Result<(), String> {
        let ids: Vec<u64> = self.listeners.borrow().keys().copied().collect();
        for id in ids {
            self.unsubscribe(ListenerId(id));
        }
        self.call("destroy", &Array::new()).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use futures::executor::block_on;

    use super::list_then_render;

    #[test]
    fn unreadable_spaces_never_render_a_view() {
        let rendered = Cell::new(false);
        let result = block_on(list_then_render(
            async { Err::<Vec<String>, _>("getByType: boom".to_string()) },
            || {
                rendered.set(true);
                async { Ok::<_, String>("view") }
            },
        ));

        assert_eq!(result, Err("getByType: boom".to_string()));
        assert!(!rendered.get());
    }

    #[test]
    fn spaces_are_listed_before_the_view_renders() {
        let listed = Cell::new(false);
        let result = block_on(list_then_render(
            async {
                listed.set(true);
                Ok::<_, String>(vec!["s1".to_string()])
            },
            || {
                assert!(listed.get());
                async { Ok::<_, String>("view") }
            },
        ));

        assert_eq!(result, Ok((vec!["s1".to_string()], "view")));
    }
}
