//! Runtime half of the framework: state registry, dispatch bridge, and live redefinition.

pub mod bridge;
pub mod redefine;
pub mod registry;
pub mod state;

pub use bridge::{DispatchBridge, DispatchHandler, DispatchResult, PackedArgs, Value};
pub use redefine::{CodeReplacement, RedefinitionEngine, RedefinitionRequest};
pub use registry::{RegisteredFake, StateRegistry};
pub use state::FakeState;

use crate::classpath::{ClassBytesProvider, ClassBytesSource, ClassId};
use crate::errors::Error;
use crate::rewrite::{rewrite_class, SubstituteCollection};
use std::sync::Arc;

/// Owner of all process-wide mutable state: the registry, the bridge over it, and the
/// redefinition engine.
///
/// Threading one context through every component keeps the lifecycle explicit: `install_fakes`
/// at test setup, `checkpoint` plus `reset_between_tests` between tests, `teardown` at the end.
/// There are no ambient statics to leak state across runs.
pub struct InstrumentationContext<R, P> {
    registry: Arc<StateRegistry>,
    bridge: DispatchBridge,
    engine: RedefinitionEngine<R, P>,
}

impl<R: CodeReplacement, P: ClassBytesProvider> InstrumentationContext<R, P> {
    pub fn new(runtime: R, classpath: ClassBytesSource<P>) -> InstrumentationContext<R, P> {
        let registry = Arc::new(StateRegistry::new());
        let bridge = DispatchBridge::new(registry.clone());
        InstrumentationContext {
            registry,
            bridge,
            engine: RedefinitionEngine::new(runtime, classpath),
        }
    }

    pub fn registry(&self) -> &Arc<StateRegistry> {
        &self.registry
    }

    pub fn bridge(&self) -> &DispatchBridge {
        &self.bridge
    }

    pub fn engine(&self) -> &RedefinitionEngine<R, P> {
        &self.engine
    }

    /// Install a substitute class over a loaded real class.
    ///
    /// Registers the substitutes, rewrites the real class's current classpath bytes against
    /// them, and makes the rewrite live. Every substitute must match a real method.
    pub fn install_fakes(
        &mut self,
        real_class: ClassId,
        mut fakes: SubstituteCollection,
        handler: DispatchHandler,
    ) -> Result<(), Error> {
        let original = self
            .engine
            .classpath()
            .get(real_class.loader, &real_class.name)?;
        let state_base = self.registry.register_fakes(&fakes, handler);
        let rewritten = match rewrite_class(&original, &mut fakes, state_base) {
            Ok(rewritten) => rewritten,
            Err(err) => {
                // A failed install must not leave half-registered substitutes behind
                self.registry.teardown_class(&fakes.class_name);
                return Err(err);
            }
        };
        let substitute_class = fakes.class_name.clone();
        if let Err(err) = self
            .engine
            .redefine_class(real_class, rewritten, Some(substitute_class))
        {
            // A rejected redefinition must not leave registered substitutes behind either
            self.registry.teardown_class(&fakes.class_name);
            return Err(err);
        }
        Ok(())
    }

    /// Tear one substitute class down: restore the classes it redefined, drop its state
    pub fn remove_fakes(&mut self, substitute_class: &str) -> Result<(), Error> {
        let redefined: Vec<ClassId> = self
            .engine
            .classes_redefined_by(substitute_class)
            .into_iter()
            .cloned()
            .collect();
        for class in redefined {
            self.engine.restore_original(&class)?;
        }
        self.registry.teardown_class(substitute_class);
        Ok(())
    }

    /// Verification checkpoint: raise every unmet invocation constraint at once
    pub fn checkpoint(&self) -> Result<(), Error> {
        self.registry.verify_expectations()
    }

    /// Zero all counters between test executions, keeping installs live
    pub fn reset_between_tests(&self) {
        self.registry.reset_between_tests();
    }

    /// Full teardown: restore every redefined class and clear all registered state
    pub fn teardown(&mut self) -> Result<(), Error> {
        self.engine.restore_all()?;
        self.registry.teardown_all();
        self.engine.classpath().clear();
        Ok(())
    }
}
