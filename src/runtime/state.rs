//! Per-substitute invocation state.
//!
//! Each registered substitute method gets one [`FakeState`]: a locked invocation counter plus the
//! configured invocation bounds. The "currently proceeding into the original" marker is a
//! thread-local stack of state entry indices rather than a flag, because a substitute's proceed
//! path can re-enter instrumented code and proceed again before the outer call unwinds.

use crate::errors::ConstraintViolation;
use parking_lot::Mutex;
use std::cell::RefCell;

thread_local! {
    /// Stack of state entry indices whose next redirected call should run the original body
    static PROCEEDING: RefCell<Vec<usize>> = RefCell::new(Vec::new());
}

/// Mark the next redirected call to `state_index` on this thread as a proceed call
pub fn begin_proceed(state_index: usize) {
    PROCEEDING.with(|stack| stack.borrow_mut().push(state_index));
}

/// Consume a pending proceed marker for `state_index`, if one is on top of this thread's stack
pub fn consume_proceed(state_index: usize) -> bool {
    PROCEEDING.with(|stack| {
        let mut stack = stack.borrow_mut();
        if stack.last() == Some(&state_index) {
            stack.pop();
            true
        } else {
            false
        }
    })
}

/// Drop every pending proceed marker on this thread
pub fn clear_proceeding() {
    PROCEEDING.with(|stack| stack.borrow_mut().clear());
}

/// Invocation counter and constraints for one substitute method
pub struct FakeState {
    /// `name(descriptor)` of the substitute, used in constraint diagnostics
    display_name: String,

    invocations: Mutex<usize>,
    minimum: Option<usize>,
    maximum: Option<usize>,
}

impl FakeState {
    pub fn new(display_name: String, minimum: Option<usize>, maximum: Option<usize>) -> FakeState {
        FakeState {
            display_name,
            invocations: Mutex::new(0),
            minimum,
            maximum,
        }
    }

    /// Record one redirected call and decide whether it should reach the substitute.
    ///
    /// Proceed calls consume their marker, stay uncounted, and run the original body. A call
    /// past the configured maximum fails right here: once the bound is broken, letting the test
    /// keep running would only pile up noise.
    pub fn update(&self, state_index: usize) -> Result<bool, ConstraintViolation> {
        if consume_proceed(state_index) {
            return Ok(false);
        }
        let mut invocations = self.invocations.lock();
        *invocations += 1;
        if let Some(maximum) = self.maximum {
            if *invocations > maximum {
                return Err(ConstraintViolation::TooManyInvocations {
                    substitute: self.display_name.clone(),
                    maximum,
                    invocations: *invocations,
                });
            }
        }
        Ok(true)
    }

    /// Check the lower invocation bound, for the verification checkpoint
    pub fn verify(&self) -> Result<(), ConstraintViolation> {
        let invocations = *self.invocations.lock();
        if let Some(expected) = self.minimum {
            if invocations < expected {
                return Err(ConstraintViolation::MissingInvocations {
                    substitute: self.display_name.clone(),
                    expected,
                    actual: invocations,
                });
            }
        }
        Ok(())
    }

    pub fn invocations(&self) -> usize {
        *self.invocations.lock()
    }

    pub fn reset(&self) {
        *self.invocations.lock() = 0;
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}
