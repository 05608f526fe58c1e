//! Process-wide ambient state: the plugin registry and settings every
//! [`crate::storage::Storage`] resolves drivers through.
//!
//! A thread-local-override-else-global pattern (`State`/`CurrentState`/
//! `with_current`/`provide_current_for`): callers can temporarily swap
//! in a scoped registry/settings pair without disturbing the process
//! default seen by other threads.

use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::{OnceLock, RwLock, RwLockReadGuard};

use crate::settings::Settings;
use crate::storage::Registry;

thread_local! {
    static LOCAL_STATE: Cell<Option<NonNull<State>>> = Cell::new(None);
}

/// Bundles the process-wide plugin registry with its settings.
pub struct State {
    registry: Registry,
    settings: Settings,
}

impl State {
    pub fn new() -> Self {
        let settings = Settings::new();
        let registry = Registry::new(settings.initial_search_path());
        State { registry, settings }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn global() -> &'static RwLock<State> {
        static GLOBAL: OnceLock<RwLock<State>> = OnceLock::new();
        GLOBAL.get_or_init(|| RwLock::new(State::new()))
    }

    /// Install `self` as the global state, returning the value it
    /// replaced.
    pub fn into_global(self) -> Self {
        std::mem::replace(&mut *Self::global().write().expect("dlite global state poisoned"), self)
    }

    /// Run `f` with `self` as the current state for this thread only,
    /// restoring whatever was current before on return (including on
    /// unwind).
    pub fn provide_current_for<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        struct Guard(Option<NonNull<State>>);
        impl Drop for Guard {
            fn drop(&mut self) {
                LOCAL_STATE.with(|cell| cell.set(self.0.take()));
            }
        }
        let previous = LOCAL_STATE.with(|cell| cell.replace(Some(NonNull::from(self))));
        let _guard = Guard(previous);
        f()
    }

    /// Run `f` with the current state: the thread-local override if one
    /// was installed via [`provide_current_for`], otherwise the global
    /// state (read-locked for the duration of `f`).
    pub fn with_current<F, T>(f: F) -> T
    where
        F: FnOnce(&State) -> T,
    {
        let local = LOCAL_STATE.with(|cell| cell.get());
        match local {
            // SAFETY: a non-null entry was installed by a still-live call
            // to `provide_current_for` higher on this thread's stack,
            // which outlives this borrow.
            Some(ptr) => f(unsafe { ptr.as_ref() }),
            None => {
                let guard = Self::global().read().expect("dlite global state poisoned");
                f(&guard)
            }
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_local_override_is_visible_and_restored() {
        let overriding = State::new();
        overriding.registry().register(std::sync::Arc::new(crate::storage::mock::MockDriver::new("scoped")));
        overriding.provide_current_for(|| {
            State::with_current(|s| assert!(s.registry().is_registered("scoped")));
        });
        State::with_current(|s| assert!(!s.registry().is_registered("scoped")));
    }
}
