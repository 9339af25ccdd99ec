//! The seam between the reconciler and the mapping vendor's SDK.
//!
//! Matching, painting and routing only ever see these types; the one concrete
//! adapter over the browser SDK lives in `js_sdk`.

use std::fmt;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use stallmap_shared::{BrokerResponse, MapCredentials, Rgb, first_present, normalize_key};

/// Opaque identity of a space inside one loaded map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpaceId(pub String);

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One renderable region of the loaded map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapSpace {
    pub space_id: SpaceId,
    pub name: Option<String>,
    pub id: Option<String>,
    pub slug: Option<String>,
    pub external_id: Option<String>,
}

impl MapSpace {
    #[cfg(test)]
    pub fn named(space_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            space_id: SpaceId(space_id.into()),
            name: Some(name.into()),
            id: None,
            slug: None,
            external_id: None,
        }
    }

    /// First identifying field that is present, in `name`, `id`, `slug`, `externalId` order.
    pub fn identifier(&self) -> Option<&str> {
        first_present([
            self.name.as_deref(),
            self.id.as_deref(),
            self.slug.as_deref(),
            self.external_id.as_deref(),
        ])
    }

    /// Join key shared with stall numbers. Empty when the space carries no identifier.
    pub fn match_key(&self) -> String {
        normalize_key(self.identifier())
    }

    pub fn label(&self) -> &str {
        self.identifier().unwrap_or(self.space_id.0.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisualState {
    pub color: Rgb,
    pub hover_color: Rgb,
    pub interactive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapEventKind {
    Click,
    HoverEnter,
    HoverLeave,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapEvent {
    pub kind: MapEventKind,
    pub spaces: Vec<MapSpace>,
    /// Viewport coordinates of the pointer, when the SDK reports them.
    pub pointer: Option<(f64, f64)>,
}

pub type MapListener = Rc<dyn Fn(&MapEvent)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Optional operations a handle supports, fixed when the handle is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandleCapabilities {
    pub destroy: bool,
    pub hover: bool,
}

/// A live, rendered map instance.
pub trait MapHandle {
    fn spaces(&self) -> Vec<MapSpace>;
    fn apply_visual_state(&self, space: &SpaceId, state: VisualState) -> Result<(), String>;
    fn subscribe(&self, kind: MapEventKind, listener: MapListener) -> Result<ListenerId, String>;
    fn unsubscribe(&self, id: ListenerId);
    fn capabilities(&self) -> HandleCapabilities;
    fn destroy(&self) -> Result<(), String>;
}

pub type HandleResult = Result<Rc<dyn MapHandle>, String>;

/// Map data the SDK can hydrate without talking to the vendor.
#[derive(Debug, Clone, PartialEq)]
pub enum MapSource {
    Archive(Vec<u8>),
    Json(serde_json::Value),
}

pub trait MapSdk {
    fn open_source(&self, source: MapSource) -> LocalBoxFuture<'static, HandleResult>;
    fn open_with_token(&self, token: String, map_id: String)
    -> LocalBoxFuture<'static, HandleResult>;
    fn open_with_credentials(
        &self,
        credentials: MapCredentials,
        map_id: String,
    ) -> LocalBoxFuture<'static, HandleResult>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedArchive {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Network calls the bootstrapper makes outside the SDK.
pub trait MapTransport {
    fn fetch_archive(&self, url: String) -> LocalBoxFuture<'static, Result<FetchedArchive, String>>;
    fn request_broker(&self, map_id: String)
    -> LocalBoxFuture<'static, Result<BrokerResponse, String>>;
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory SDK pieces shared by the client tests.

    use std::cell::{Cell, RefCell};
    use std::collections::{HashMap, VecDeque};
    use std::rc::Rc;

    use futures::FutureExt;
    use futures::future::LocalBoxFuture;
    use stallmap_shared::{BrokerResponse, MapCredentials};

    use super::{
        FetchedArchive, HandleCapabilities, HandleResult, ListenerId, MapEvent, MapEventKind,
        MapHandle, MapListener, MapSdk, MapSource, MapSpace, MapTransport, SpaceId, VisualState,
    };

    #[derive(Default)]
    pub struct FakeHandle {
        pub label: String,
        pub spaces: Vec<MapSpace>,
        pub capabilities: Cell<HandleCapabilities>,
        pub applied: RefCell<Vec<(SpaceId, VisualState)>>,
        pub fail_apply_for: RefCell<Vec<SpaceId>>,
        pub destroy_calls: Cell<u32>,
        pub fail_destroy: Cell<bool>,
        listeners: RefCell<HashMap<u64, (MapEventKind, MapListener)>>,
        next_listener: Cell<u64>,
    }

    impl FakeHandle {
        pub fn new(label: &str, spaces: Vec<MapSpace>) -> Rc<Self> {
            Rc::new(Self {
                label: label.to_string(),
                spaces,
                capabilities: Cell::new(HandleCapabilities {
                    destroy: true,
                    hover: true,
                }),
                ..Self::default()
            })
        }

        pub fn listener_count(&self) -> usize {
            self.listeners.borrow().len()
        }

        pub fn emit(&self, event: MapEvent) {
            let listeners: Vec<MapListener> = self
                .listeners
                .borrow()
                .values()
                .filter(|(kind, _)| *kind == event.kind)
                .map(|(_, listener)| Rc::clone(listener))
                .collect();
            for listener in listeners {
                listener(&event);
            }
        }

        pub fn state_of(&self, space: &str) -> Option<VisualState> {
            self.applied
                .borrow()
                .iter()
                .rev()
                .find(|(id, _)| id.0 == space)
                .map(|(_, state)| *state)
        }
    }

    impl MapHandle for FakeHandle {
        fn spaces(&self) -> Vec<MapSpace> {
            self.spaces.clone()
        }

        fn apply_visual_state(&self, space: &SpaceId, state: VisualState) -> Result<(), String> {
            if self.fail_apply_for.borrow().contains(space) {
                return Err(format!("space {space} is not rendered"));
            }
            self.applied.borrow_mut().push((space.clone(), state));
            Ok(())
        }

        fn subscribe(
            &self,
            kind: MapEventKind,
            listener: MapListener,
        ) -> Result<ListenerId, String> {
            let id = self.next_listener.get() + 1;
            self.next_listener.set(id);
            self.listeners.borrow_mut().insert(id, (kind, listener));
            Ok(ListenerId(id))
        }

        fn unsubscribe(&self, id: ListenerId) {
            self.listeners.borrow_mut().remove(&id.0);
        }

        fn capabilities(&self) -> HandleCapabilities {
            self.capabilities.get()
        }

        fn destroy(&self) -> Result<(), String> {
            self.destroy_calls.set(self.destroy_calls.get() + 1);
            if self.fail_destroy.get() {
                return Err("renderer already gone".to_string());
            }
            Ok(())
        }
    }

    /// SDK whose open calls resolve to queued results, recording what it was asked.
    #[derive(Default)]
    pub struct FakeSdk {
        pub calls: RefCell<Vec<String>>,
        pub source_results: RefCell<VecDeque<HandleResult>>,
        pub token_results: RefCell<VecDeque<HandleResult>>,
        pub credential_results: RefCell<VecDeque<HandleResult>>,
    }

    impl FakeSdk {
        fn next(queue: &RefCell<VecDeque<HandleResult>>) -> HandleResult {
            queue
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err("no fake result queued".to_string()))
        }
    }

    impl MapSdk for FakeSdk {
        fn open_source(&self, source: MapSource) -> LocalBoxFuture<'static, HandleResult> {
            let label = match source {
                MapSource::Archive(bytes) => format!("open_source:archive:{}", bytes.len()),
                MapSource::Json(_) => "open_source:json".to_string(),
            };
            self.calls.borrow_mut().push(label);
            let result = Self::next(&self.source_results);
            async move { result }.boxed_local()
        }

        fn open_with_token(
            &self,
            token: String,
            map_id: String,
        ) -> LocalBoxFuture<'static, HandleResult> {
            self.calls
                .borrow_mut()
                .push(format!("open_with_token:{token}:{map_id}"));
            let result = Self::next(&self.token_results);
            async move { result }.boxed_local()
        }

        fn open_with_credentials(
            &self,
            credentials: MapCredentials,
            map_id: String,
        ) -> LocalBoxFuture<'static, HandleResult> {
            self.calls
                .borrow_mut()
                .push(format!("open_with_credentials:{}:{map_id}", credentials.key));
            let result = Self::next(&self.credential_results);
            async move { result }.boxed_local()
        }
    }

    #[derive(Default)]
    pub struct FakeTransport {
        pub archive: RefCell<Option<Result<FetchedArchive, String>>>,
        pub broker: RefCell<Option<Result<BrokerResponse, String>>>,
        pub calls: RefCell<Vec<String>>,
    }

    impl MapTransport for FakeTransport {
        fn fetch_archive(
            &self,
            url: String,
        ) -> LocalBoxFuture<'static, Result<FetchedArchive, String>> {
            self.calls.borrow_mut().push(format!("fetch_archive:{url}"));
            let result = self
                .archive
                .borrow_mut()
                .take()
                .unwrap_or_else(|| Err("HTTP 404".to_string()));
            async move { result }.boxed_local()
        }

        fn request_broker(
            &self,
            map_id: String,
        ) -> LocalBoxFuture<'static, Result<BrokerResponse, String>> {
            self.calls.borrow_mut().push(format!("request_broker:{map_id}"));
            let result = self
                .broker
                .borrow_mut()
                .take()
                .unwrap_or_else(|| Err("HTTP 503".to_string()));
            async move { result }.boxed_local()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MapSpace, SpaceId};

    #[test]
    fn match_key_uses_first_present_identifier() {
        let space = MapSpace {
            space_id: SpaceId("s-1".to_string()),
            name: Some("  ".to_string()),
            id: None,
            slug: Some("fv-12".to_string()),
            external_id: Some("ignored".to_string()),
        };
        assert_eq!(space.identifier(), Some("fv-12"));
        assert_eq!(space.match_key(), "fv12");
        assert_eq!(space.label(), "fv-12");
    }

    #[test]
    fn space_without_identifiers_has_empty_key() {
        let space = MapSpace {
            space_id: SpaceId("s-9".to_string()),
            name: None,
            id: None,
            slug: None,
            external_id: None,
        };
        assert_eq!(space.match_key(), "");
        assert_eq!(space.label(), "s-9");
    }
}
