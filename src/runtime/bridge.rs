//! Runtime side of the redirect: the dispatch bridge rewritten bytecode calls into.
//!
//! Rewritten method bodies call two static entry points on a bridge class that is reachable from
//! every loader: one updating invocation state and deciding whether to redirect at all, and one
//! carrying the actual redirected call with positionally packed arguments. The constants here
//! pin down that bytecode-facing contract; [`DispatchBridge`] is the implementation behind it,
//! routing packed invocations to the handler registered for the substitute's state entry.

use crate::descriptor::{BaseType, FieldType, MethodDescriptor, ParseDescriptor};
use crate::errors::Error;
use crate::runtime::registry::StateRegistry;
use crate::runtime::state;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Internal name of the bridge class rewritten bytecode invokes
pub const DISPATCH_CLASS: &str = "classfake/runtime/DispatchBridge";

/// State-update entry point: `(substitute class, state index) -> should redirect`
pub const UPDATE_NAME: &str = "updateFakeState";
pub const UPDATE_DESCRIPTOR: &str = "(Ljava/lang/String;I)Z";

/// Dispatch entry point taking the packed argument array
pub const INVOKE_NAME: &str = "invoke";
pub const INVOKE_DESCRIPTOR: &str =
    "(Ljava/lang/String;Ljava/lang/String;ILjava/lang/String;Ljava/lang/String;I[Ljava/lang/Object;)Ljava/lang/Object;";

/// Class whose class object is the "fall through to the original body" sentinel
pub const PROCEED_SENTINEL_CLASS: &str = "java/lang/Void";

/// A value crossing the bridge boundary
#[derive(Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),

    /// Opaque reference, owned by the caller's side of the bridge
    Reference(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Default value of a declared return type (`None` for `void`)
    pub fn default_for(return_type: Option<&FieldType>) -> Value {
        match return_type {
            None => Value::Null,
            Some(FieldType::Base(BaseType::Boolean)) => Value::Boolean(false),
            Some(FieldType::Base(BaseType::Byte)) => Value::Byte(0),
            Some(FieldType::Base(BaseType::Short)) => Value::Short(0),
            Some(FieldType::Base(BaseType::Char)) => Value::Char(0),
            Some(FieldType::Base(BaseType::Int)) => Value::Int(0),
            Some(FieldType::Base(BaseType::Long)) => Value::Long(0),
            Some(FieldType::Base(BaseType::Float)) => Value::Float(0.0),
            Some(FieldType::Base(BaseType::Double)) => Value::Double(0.0),
            Some(_) => Value::Null,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Byte(v) => write!(f, "{}b", v),
            Value::Short(v) => write!(f, "{}s", v),
            Value::Char(v) => write!(f, "'\\u{:04x}'", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}L", v),
            Value::Float(v) => write!(f, "{}f", v),
            Value::Double(v) => write!(f, "{}d", v),
            Value::Reference(_) => write!(f, "<reference>"),
        }
    }
}

/// What a substitute handler wants done with the redirected call
pub enum DispatchResult {
    /// Fall through into the preserved original body
    Proceed,

    /// Return this value from the redirected method
    Return(Value),
}

/// Handler executing the substitute methods of one substitute class
pub type DispatchHandler = Arc<dyn Fn(&PackedArgs) -> DispatchResult + Send + Sync>;

/// One redirected invocation, laid out the way the rewritten bytecode packs it
pub struct PackedArgs<'a> {
    pub substitute_class: &'a str,
    pub real_class: &'a str,

    /// Access flags of the real method, as written in its classfile
    pub real_access_flags: u16,

    pub name: &'a str,
    pub descriptor: &'a str,
    pub state_index: usize,

    /// Receiver (or `Null` for static methods) followed by every declared argument
    pub arguments: &'a [Value],
}

/// Routes redirected calls to registered substitute handlers
pub struct DispatchBridge {
    registry: Arc<StateRegistry>,
}

impl DispatchBridge {
    pub fn new(registry: Arc<StateRegistry>) -> DispatchBridge {
        DispatchBridge { registry }
    }

    /// Count one call to a redirected method; `false` means run the original body
    pub fn update_fake_state(
        &self,
        substitute_class: &str,
        state_index: usize,
    ) -> Result<bool, Error> {
        match self.registry.lookup(state_index) {
            Some(entry) if entry.substitute_class == substitute_class => {
                Ok(entry.state.update(state_index)?)
            }
            // Torn down, or a stale index from a class awaiting restoration
            _ => Ok(false),
        }
    }

    /// Execute the substitute for one redirected call.
    ///
    /// The handler runs after the registry lock is released, so substitutes are free to trigger
    /// further instrumented calls. A call reaching a torn-down entry answers with the declared
    /// return type's default value.
    pub fn invoke(&self, args: &PackedArgs) -> Result<DispatchResult, Error> {
        match self.registry.lookup(args.state_index) {
            Some(entry) => Ok((entry.handler)(args)),
            None => {
                let descriptor = MethodDescriptor::parse(args.descriptor)?;
                Ok(DispatchResult::Return(Value::default_for(
                    descriptor.return_type.as_ref(),
                )))
            }
        }
    }

    /// Arrange for the next redirected call to `state_index` on this thread to run the original
    /// body; substitute implementations call this to proceed, then re-invoke the real method
    pub fn begin_proceed(&self, state_index: usize) {
        state::begin_proceed(state_index);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rewrite::{SubstituteCollection, SubstituteMethod};
    use crate::runtime::state::clear_proceeding;

    fn install(
        registry: &Arc<StateRegistry>,
        class_name: &str,
        methods: Vec<SubstituteMethod>,
        handler: DispatchHandler,
    ) -> usize {
        let fakes = SubstituteCollection::new(class_name, methods);
        registry.register_fakes(&fakes, handler)
    }

    fn packed<'a>(state_index: usize, descriptor: &'a str, arguments: &'a [Value]) -> PackedArgs<'a> {
        PackedArgs {
            substitute_class: "fakes/SampleFake",
            real_class: "sample/Target",
            real_access_flags: 0x0001,
            name: "target",
            descriptor,
            state_index,
            arguments,
        }
    }

    #[test]
    fn dispatch_reaches_the_registered_handler() {
        let registry = Arc::new(StateRegistry::new());
        let base = install(
            &registry,
            "fakes/SampleFake",
            vec![SubstituteMethod::new("target", "(I)I").unwrap()],
            Arc::new(|args| match args.arguments {
                [_, Value::Int(argument)] => DispatchResult::Return(Value::Int(argument * 2)),
                _ => DispatchResult::Proceed,
            }),
        );
        let bridge = DispatchBridge::new(registry);

        assert!(bridge.update_fake_state("fakes/SampleFake", base).unwrap());
        let arguments = [Value::Null, Value::Int(21)];
        match bridge.invoke(&packed(base, "(I)I", &arguments)).unwrap() {
            DispatchResult::Return(Value::Int(result)) => assert_eq!(result, 42),
            _ => panic!("expected a returned int"),
        }
    }

    #[test]
    fn torn_down_entry_answers_with_a_default_value() {
        let registry = Arc::new(StateRegistry::new());
        let base = install(
            &registry,
            "fakes/SampleFake",
            vec![SubstituteMethod::new("target", "()J").unwrap()],
            Arc::new(|_| DispatchResult::Proceed),
        );
        registry.teardown_class("fakes/SampleFake");
        let bridge = DispatchBridge::new(registry);

        assert!(!bridge.update_fake_state("fakes/SampleFake", base).unwrap());
        match bridge.invoke(&packed(base, "()J", &[])).unwrap() {
            DispatchResult::Return(Value::Long(result)) => assert_eq!(result, 0),
            _ => panic!("expected the long default"),
        }
    }

    #[test]
    fn proceed_marker_suppresses_the_next_redirect() {
        clear_proceeding();
        let registry = Arc::new(StateRegistry::new());
        let base = install(
            &registry,
            "fakes/SampleFake",
            vec![SubstituteMethod::new("target", "()V").unwrap()],
            Arc::new(|_| DispatchResult::Proceed),
        );
        let bridge = DispatchBridge::new(registry);

        assert!(bridge.update_fake_state("fakes/SampleFake", base).unwrap());
        bridge.begin_proceed(base);
        assert!(!bridge.update_fake_state("fakes/SampleFake", base).unwrap());
        assert!(bridge.update_fake_state("fakes/SampleFake", base).unwrap());
    }

    #[test]
    fn mismatched_substitute_class_is_treated_as_stale() {
        let registry = Arc::new(StateRegistry::new());
        let base = install(
            &registry,
            "fakes/SampleFake",
            vec![SubstituteMethod::new("target", "()V").unwrap()],
            Arc::new(|_| DispatchResult::Proceed),
        );
        let bridge = DispatchBridge::new(registry);
        assert!(!bridge.update_fake_state("fakes/OtherFake", base).unwrap());
    }
}
