//! Process-wide registry of installed substitutes and their invocation state.
//!
//! The registry owns every [`FakeState`] entry. Entries are looked up by the state index baked
//! into rewritten bytecode, so slots stay put for the lifetime of the registry: tearing a
//! substitute class down empties its slots instead of shifting later ones. All mutation goes
//! through the internal lock, and lookups clone the `Arc` out before the lock is released, so
//! no caller ever holds the registry lock across a substitute invocation.

use crate::errors::{ConstraintViolation, Error};
use crate::rewrite::SubstituteCollection;
use crate::runtime::bridge::DispatchHandler;
use crate::runtime::state::{clear_proceeding, FakeState};
use parking_lot::Mutex;
use std::sync::Arc;

/// One installed substitute method
pub struct RegisteredFake {
    /// Internal name of the substitute class this entry belongs to
    pub substitute_class: String,

    pub state: FakeState,
    pub handler: DispatchHandler,
}

pub struct StateRegistry {
    entries: Mutex<Vec<Option<Arc<RegisteredFake>>>>,
}

impl StateRegistry {
    pub fn new() -> StateRegistry {
        StateRegistry {
            entries: Mutex::new(vec![]),
        }
    }

    /// Install every method of a substitute class, all dispatching through one handler.
    ///
    /// Returns the state index of the collection's first method; the following methods get
    /// consecutive indices in collection order, which is what the rewriting pass bakes into the
    /// redirected bytecode.
    pub fn register_fakes(&self, fakes: &SubstituteCollection, handler: DispatchHandler) -> usize {
        let mut entries = self.entries.lock();
        let state_base = entries.len();
        for method in fakes.methods() {
            entries.push(Some(Arc::new(RegisteredFake {
                substitute_class: fakes.class_name.clone(),
                state: FakeState::new(method.display_name(), method.minimum(), method.maximum()),
                handler: handler.clone(),
            })));
        }
        log::debug!(
            "registered {} substitute(s) for {} at state base {}",
            fakes.methods().len(),
            fakes.class_name,
            state_base,
        );
        state_base
    }

    /// Entry at a state index, or `None` when the substitute was torn down
    pub fn lookup(&self, state_index: usize) -> Option<Arc<RegisteredFake>> {
        self.entries.lock().get(state_index).cloned().flatten()
    }

    /// Count one redirected call; `false` means run the original body.
    ///
    /// A call whose substitute was already torn down (its redefined class not yet restored)
    /// falls back to the original body.
    pub fn update_state(&self, state_index: usize) -> Result<bool, ConstraintViolation> {
        match self.lookup(state_index) {
            Some(entry) => entry.state.update(state_index),
            None => Ok(false),
        }
    }

    /// Verification checkpoint: every unmet lower bound, reported together
    pub fn verify_expectations(&self) -> Result<(), Error> {
        let entries: Vec<Arc<RegisteredFake>> =
            self.entries.lock().iter().flatten().cloned().collect();
        let failures: Vec<ConstraintViolation> = entries
            .iter()
            .filter_map(|entry| entry.state.verify().err())
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::UnmetExpectations { failures })
        }
    }

    /// Zero every counter and drop this thread's proceed markers, keeping registrations
    pub fn reset_between_tests(&self) {
        for entry in self.entries.lock().iter().flatten() {
            entry.state.reset();
        }
        clear_proceeding();
    }

    /// Remove every entry of one substitute class, leaving other indices untouched
    pub fn teardown_class(&self, substitute_class: &str) {
        let mut entries = self.entries.lock();
        for slot in entries.iter_mut() {
            let matches = slot
                .as_ref()
                .map(|entry| entry.substitute_class == substitute_class)
                .unwrap_or(false);
            if matches {
                *slot = None;
            }
        }
    }

    /// Remove everything
    pub fn teardown_all(&self) {
        self.entries.lock().clear();
        clear_proceeding();
    }
}

impl Default for StateRegistry {
    fn default() -> StateRegistry {
        StateRegistry::new()
    }
}
