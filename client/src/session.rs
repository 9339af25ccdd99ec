use std::cell::RefCell;
use std::rc::Rc;

use stallmap_shared::{Stall, stalls_fingerprint};

use crate::bootstrap::{BootstrapContext, Strategy, StrategyKind, run_waterfall};
use crate::debug::DebugSnapshot;
use crate::log;
use crate::matcher::StallIndex;
use crate::painter::{ColorMode, apply_overlay, plan_overlay};
use crate::router::{RouterBinding, RouterCallbacks};
use crate::sdk::MapHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Ready(StrategyKind),
    /// The session was torn down before bootstrap settled.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PaintKey {
    fingerprint: u32,
    mode: ColorMode,
    clickable: bool,
    generation: u64,
}

struct SessionState {
    relevant: bool,
    generation: u64,
    handle: Option<Rc<dyn MapHandle>>,
    binding: Option<RouterBinding>,
    last_paint: Option<PaintKey>,
    debug: DebugSnapshot,
}

/// Sole owner of one map handle and everything bound to it.
#[derive(Clone)]
pub struct MapSession {
    inner: Rc<RefCell<SessionState>>,
}

impl Default for MapSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MapSession {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SessionState {
                relevant: true,
                generation: 0,
                handle: None,
                binding: None,
                last_paint: None,
                debug: DebugSnapshot::default(),
            })),
        }
    }

    pub fn is_relevant(&self) -> bool {
        self.inner.borrow().relevant
    }

    pub fn is_ready(&self) -> bool {
        let state = self.inner.borrow();
        state.relevant && state.handle.is_some()
    }

    pub fn debug_snapshot(&self) -> DebugSnapshot {
        self.inner.borrow().debug.clone()
    }

    /// Run the strategies and adopt the winning handle. `on_ready` runs at most
    /// once, and never after `teardown`.
    pub async fn bootstrap(
        &self,
        strategies: Vec<Strategy>,
        ctx: Rc<BootstrapContext>,
        on_ready: impl FnOnce(Rc<dyn MapHandle>, StrategyKind),
    ) -> Result<SessionOutcome, String> {
        let result = run_waterfall(&strategies, ctx, || self.is_relevant()).await;

        if !self.is_relevant() {
            if let Ok(success) = result {
                log::info(&format!(
                    "discarding map handle from {} that settled after teardown",
                    success.kind
                ));
                destroy_handle(success.handle.as_ref());
            }
            return Ok(SessionOutcome::Stale);
        }

        match result {
            Ok(success) => {
                let (binding, previous) = {
                    let mut state = self.inner.borrow_mut();
                    state.generation += 1;
                    state.last_paint = None;
                    state.debug = DebugSnapshot {
                        attempts: success.attempts,
                        winning_strategy: Some(success.kind),
                        ..DebugSnapshot::default()
                    };
                    (
                        state.binding.take(),
                        state.handle.replace(Rc::clone(&success.handle)),
                    )
                };
                drop(binding);
                if let Some(previous) = previous {
                    destroy_handle(previous.as_ref());
                }

                on_ready(success.handle, success.kind);
                Ok(SessionOutcome::Ready(success.kind))
            }
            Err(failure) => {
                self.inner.borrow_mut().debug = DebugSnapshot {
                    attempts: failure.attempts.clone(),
                    ..DebugSnapshot::default()
                };
                Err(failure.message())
            }
        }
    }

    /// Repaint for the current stall list and rebind the router over a fresh
    /// index. Nothing happens before the handle exists or after teardown.
    pub fn reconcile(&self, stalls: &[Stall], mode: ColorMode, callbacks: RouterCallbacks) {
        let (handle, generation, previous_binding) = {
            let mut state = self.inner.borrow_mut();
            if !state.relevant {
                return;
            }
            let Some(handle) = state.handle.clone() else {
                return;
            };
            (handle, state.generation, state.binding.take())
        };
        drop(previous_binding);

        let clickable = callbacks.clickable();
        let index = Rc::new(StallIndex::build(stalls));
        let binding = RouterBinding::bind(Rc::clone(&handle), Rc::clone(&index), callbacks);

        let key = PaintKey {
            fingerprint: stalls_fingerprint(stalls),
            mode,
            clickable,
            generation,
        };
        let unchanged = self.inner.borrow().last_paint == Some(key);
        let painted = if unchanged {
            None
        } else {
            let plan = plan_overlay(&handle.spaces(), &index, mode, clickable);
            let report = apply_overlay(handle.as_ref(), &plan);
            log::info(&format!(
                "painted {} spaces for {} stalls ({} matched, {} unassigned)",
                report.painted,
                index.len(),
                plan.matched,
                plan.unmatched
            ));
            Some((plan, report))
        };

        let mut state = self.inner.borrow_mut();
        state.binding = Some(binding);
        state.last_paint = Some(key);
        state.debug.duplicate_keys = index.duplicate_keys();
        if let Some((plan, report)) = painted {
            state.debug.matched = plan.matched;
            state.debug.unmatched = plan.unmatched;
            state.debug.painted = report.painted;
            state.debug.apply_failures = report.failures;
        }
    }

    /// Unbind listeners and destroy the handle. Safe to call more than once.
    pub fn teardown(&self) {
        let (binding, handle) = {
            let mut state = self.inner.borrow_mut();
            if !state.relevant {
                return;
            }
            state.relevant = false;
            (state.binding.take(), state.handle.take())
        };
        drop(binding);
        if let Some(handle) = handle {
            destroy_handle(handle.as_ref());
        }
    }
}

fn destroy_handle(handle: &dyn MapHandle) {
    if !handle.capabilities().destroy {
        return;
    }
    if let Err(e) = handle.destroy() {
        log::warn(&format!("map teardown failed: {e}"));
    }
}
