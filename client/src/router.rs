use std::cell::RefCell;
use std::rc::Rc;

use stallmap_shared::Stall;

use crate::log;
use crate::matcher::StallIndex;
use crate::sdk::{ListenerId, MapEvent, MapEventKind, MapHandle, MapListener, MapSpace};

#[derive(Debug, Clone, PartialEq)]
pub enum TooltipRequest {
    Show {
        stall: Stall,
        space: MapSpace,
        pointer: Option<(f64, f64)>,
    },
    Hide,
}

pub type StallClickCallback = Rc<dyn Fn(&Stall, &MapSpace)>;
pub type TooltipCallback = Rc<dyn Fn(TooltipRequest)>;

#[derive(Clone, Default)]
pub struct RouterCallbacks {
    pub on_stall_click: Option<StallClickCallback>,
    pub on_tooltip: Option<TooltipCallback>,
}

impl RouterCallbacks {
    pub fn clickable(&self) -> bool {
        self.on_stall_click.is_some()
    }
}

/// Open stall under the first space of an event, if any.
fn open_stall<'a>(index: &'a StallIndex, event: &'a MapEvent) -> Option<(&'a Stall, &'a MapSpace)> {
    let space = event.spaces.first()?;
    let stall = index.resolve(space)?;
    stall.status.is_open().then_some((stall, space))
}

/// Returns whether the host callback ran.
pub fn route_click(index: &StallIndex, event: &MapEvent, callbacks: &RouterCallbacks) -> bool {
    let Some(on_click) = callbacks.on_stall_click.as_ref() else {
        return false;
    };
    match open_stall(index, event) {
        Some((stall, space)) => {
            on_click(stall, space);
            true
        }
        None => false,
    }
}

pub fn route_hover(index: &StallIndex, event: &MapEvent, callbacks: &RouterCallbacks) {
    let Some(on_tooltip) = callbacks.on_tooltip.as_ref() else {
        return;
    };
    let request = match (event.kind, open_stall(index, event)) {
        (MapEventKind::HoverEnter, Some((stall, space))) => TooltipRequest::Show {
            stall: stall.clone(),
            space: space.clone(),
            pointer: event.pointer,
        },
        _ => TooltipRequest::Hide,
    };
    on_tooltip(request);
}

/// Listener registrations on one handle. Unregistered on `unbind` or drop.
pub struct RouterBinding {
    handle: Rc<dyn MapHandle>,
    listeners: RefCell<Vec<ListenerId>>,
}

impl RouterBinding {
    pub fn bind(
        handle: Rc<dyn MapHandle>,
        index: Rc<StallIndex>,
        callbacks: RouterCallbacks,
    ) -> Self {
        let binding = Self {
            handle: Rc::clone(&handle),
            listeners: RefCell::new(Vec::new()),
        };

        let click: MapListener = {
            let index = Rc::clone(&index);
            let callbacks = callbacks.clone();
            Rc::new(move |event: &MapEvent| {
                route_click(&index, event, &callbacks);
            })
        };
        binding.register(MapEventKind::Click, click);

        if handle.capabilities().hover {
            let hover: MapListener = Rc::new(move |event: &MapEvent| {
                route_hover(&index, event, &callbacks);
            });
            binding.register(MapEventKind::HoverEnter, Rc::clone(&hover));
            binding.register(MapEventKind::HoverLeave, hover);
        }

        binding
    }

    fn register(&self, kind: MapEventKind, listener: MapListener) {
        match self.handle.subscribe(kind, listener) {
            Ok(id) => self.listeners.borrow_mut().push(id),
            Err(e) => log::warn(&format!("could not subscribe to {kind:?} events: {e}")),
        }
    }

    #[cfg(test)]
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn unbind(&self) {
        let ids: Vec<ListenerId> = self.listeners.borrow_mut().drain(..).collect();
        for id in ids {
            self.handle.unsubscribe(id);
        }
    }
}

impl Drop for RouterBinding {
    fn drop(&mut self) {
        self.unbind();
    }
}
