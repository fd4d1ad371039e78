//! End-to-end lifecycle: install substitutes over a class, dispatch through the bridge with
//! invocation constraints, and restore the original definition.

use classfake::classfile::attribute::{AttributeLike, BytecodeArray, Code};
use classfake::classfile::binary::ByteCursor;
use classfake::classfile::constants::ConstantPool;
use classfake::classfile::instructions::{DecodedInstruction, Instruction, InvokeType};
use classfake::classfile::{
    ClassAccessFlags, ClassFile, Method, MethodAccessFlags, Version,
};
use classfake::classpath::{ClassBytesProvider, ClassBytesSource, ClassId, LoaderId};
use classfake::errors::{ConstraintViolation, Error, RedefinitionError};
use classfake::rewrite::{SubstituteCollection, SubstituteMethod};
use classfake::runtime::bridge::{DISPATCH_CLASS, UPDATE_NAME};
use classfake::runtime::redefine::RedefinitionRequest;
use classfake::runtime::{
    CodeReplacement, DispatchResult, InstrumentationContext, PackedArgs, Value,
};
use std::collections::HashMap;
use std::sync::Arc;

/// `sample/Greeter` with one static method `answer:()I` returning 41
fn greeter_class() -> Vec<u8> {
    let mut constants = ConstantPool::new();
    let this_class = constants.get_class("sample/Greeter").unwrap();
    let super_class = constants.get_class("java/lang/Object").unwrap();
    let name = constants.get_utf8("answer").unwrap();
    let descriptor = constants.get_utf8("()I").unwrap();
    let code = constants
        .get_attribute(Code {
            max_stack: 1,
            max_locals: 0,
            // bipush 41; ireturn
            code_array: BytecodeArray(vec![0x10, 0x29, 0xac]),
            exception_table: vec![],
            attributes: vec![],
        })
        .unwrap();

    let class = ClassFile {
        version: Version::JAVA8,
        constants,
        access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        this_class,
        super_class: Some(super_class),
        interfaces: vec![],
        fields: vec![],
        methods: vec![Method {
            access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            name,
            descriptor,
            attributes: vec![code],
        }],
        attributes: vec![],
    };
    class.into_bytes().unwrap()
}

/// Classpath serving the same class bytes to every loader
struct MapProvider {
    classes: HashMap<String, Vec<u8>>,
}

impl ClassBytesProvider for MapProvider {
    fn class_bytes(&self, _: LoaderId, class_name: &str) -> Result<Vec<u8>, Error> {
        self.classes
            .get(class_name)
            .cloned()
            .ok_or_else(|| Error::ClassNotFound {
                class_name: class_name.to_owned(),
            })
    }
}

/// Runtime keeping the live definition of every class in memory
struct RecordingRuntime {
    live: HashMap<ClassId, Vec<u8>>,
    reject_with: Option<String>,
}

impl CodeReplacement for RecordingRuntime {
    fn redefine(&mut self, batch: &[RedefinitionRequest]) -> Result<(), RedefinitionError> {
        if let Some(reason) = &self.reject_with {
            return Err(RedefinitionError::Rejected {
                class_name: batch[0].class.name.clone(),
                reason: reason.clone(),
            });
        }
        for request in batch {
            self.live
                .insert(request.class.clone(), request.bytecode.to_vec());
        }
        Ok(())
    }
}

fn context_with(runtime: RecordingRuntime) -> InstrumentationContext<RecordingRuntime, MapProvider> {
    let mut classes = HashMap::new();
    classes.insert("sample/Greeter".to_owned(), greeter_class());
    InstrumentationContext::new(runtime, ClassBytesSource::new(MapProvider { classes }))
}

fn context() -> InstrumentationContext<RecordingRuntime, MapProvider> {
    context_with(RecordingRuntime {
        live: HashMap::new(),
        reject_with: None,
    })
}

fn answer_fakes(expected: Option<usize>) -> SubstituteCollection {
    let mut method = SubstituteMethod::new("answer", "()I").unwrap();
    method.expected = expected;
    SubstituteCollection::new("fakes/GreeterFake", vec![method])
}

fn calls_update_bridge(class_bytes: &[u8]) -> bool {
    let class = ClassFile::parse(class_bytes).unwrap();
    for method in &class.methods {
        for attribute in &method.attributes {
            if attribute.name(&class.constants).unwrap() != Code::NAME {
                continue;
            }
            let code = Code::parse(&mut ByteCursor::new(&attribute.info)).unwrap();
            let mut cursor = ByteCursor::new(&code.code_array.0);
            while cursor.remaining() > 0 {
                let insn = DecodedInstruction::parse(&mut cursor, 0).unwrap();
                if let DecodedInstruction::Basic(Instruction::Invoke(
                    InvokeType::Static,
                    method_ref,
                )) = insn
                {
                    let (class_name, name, _) = class.constants.method_ref(method_ref).unwrap();
                    if class_name == DISPATCH_CLASS && name == UPDATE_NAME {
                        return true;
                    }
                }
            }
        }
    }
    false
}

#[test]
fn install_dispatch_and_restore() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut context = context();
    let class = ClassId::new(LoaderId(1), "sample/Greeter");
    let original = greeter_class();

    context
        .install_fakes(
            class.clone(),
            answer_fakes(None),
            Arc::new(|_: &PackedArgs| DispatchResult::Return(Value::Int(42))),
        )
        .unwrap();

    // The live definition is a rewrite that routes through the bridge
    let live = context.engine().runtime().live[&class].clone();
    assert_ne!(live, original);
    assert!(calls_update_bridge(&live));

    // A redirected call reaches the handler and yields the substitute's answer
    assert!(context
        .bridge()
        .update_fake_state("fakes/GreeterFake", 0)
        .unwrap());
    let arguments = [Value::Null];
    let packed = PackedArgs {
        substitute_class: "fakes/GreeterFake",
        real_class: "sample/Greeter",
        real_access_flags: 0x0009,
        name: "answer",
        descriptor: "()I",
        state_index: 0,
        arguments: &arguments,
    };
    match context.bridge().invoke(&packed).unwrap() {
        DispatchResult::Return(Value::Int(result)) => assert_eq!(result, 42),
        _ => panic!("expected the substitute's return value"),
    }

    // Teardown restores the pristine definition
    context.teardown().unwrap();
    assert_eq!(context.engine().runtime().live[&class].clone(), original);
}

#[test]
fn exact_count_constraints_fail_fast_and_at_the_checkpoint() {
    let mut context = context();
    let class = ClassId::new(LoaderId(1), "sample/Greeter");

    context
        .install_fakes(
            class,
            answer_fakes(Some(2)),
            Arc::new(|_: &PackedArgs| DispatchResult::Return(Value::Int(0))),
        )
        .unwrap();
    let bridge = context.bridge();

    // The third call breaks the bound and fails right there
    assert!(bridge.update_fake_state("fakes/GreeterFake", 0).unwrap());
    assert!(bridge.update_fake_state("fakes/GreeterFake", 0).unwrap());
    match bridge.update_fake_state("fakes/GreeterFake", 0) {
        Err(Error::Constraint(ConstraintViolation::TooManyInvocations {
            maximum,
            invocations,
            ..
        })) => {
            assert_eq!(maximum, 2);
            assert_eq!(invocations, 3);
        }
        other => panic!("expected too-many failure, got {:?}", other),
    }

    // Fresh test run: one call out of two expected is caught at the checkpoint
    context.reset_between_tests();
    context
        .bridge()
        .update_fake_state("fakes/GreeterFake", 0)
        .unwrap();
    match context.checkpoint() {
        Err(Error::UnmetExpectations { failures }) => {
            assert_eq!(failures.len(), 1);
            match &failures[0] {
                ConstraintViolation::MissingInvocations {
                    expected, actual, ..
                } => {
                    assert_eq!(*expected, 2);
                    assert_eq!(*actual, 1);
                }
                other => panic!("expected missing invocations, got {:?}", other),
            }
        }
        other => panic!("expected a batched checkpoint failure, got {:?}", other.err()),
    }
}

#[test]
fn loaders_keep_separate_definitions_of_the_same_name() {
    let mut context = context();
    let under_a = ClassId::new(LoaderId(1), "sample/Greeter");
    let under_b = ClassId::new(LoaderId(2), "sample/Greeter");

    context
        .install_fakes(
            under_a.clone(),
            answer_fakes(None),
            Arc::new(|_: &PackedArgs| DispatchResult::Proceed),
        )
        .unwrap();
    context
        .install_fakes(
            under_b.clone(),
            SubstituteCollection::new(
                "fakes/OtherFake",
                vec![SubstituteMethod::new("answer", "()I").unwrap()],
            ),
            Arc::new(|_: &PackedArgs| DispatchResult::Proceed),
        )
        .unwrap();
    assert_eq!(context.engine().generation(&under_a), 1);
    assert_eq!(context.engine().generation(&under_b), 1);

    // Tearing down one substitute class leaves the other loader's definition live
    context.remove_fakes("fakes/GreeterFake").unwrap();
    assert_eq!(context.engine().generation(&under_a), 0);
    assert_eq!(context.engine().generation(&under_b), 1);
    assert_eq!(
        context.engine().runtime().live[&under_a].clone(),
        greeter_class(),
    );
    assert!(calls_update_bridge(
        &context.engine().runtime().live[&under_b]
    ));
}

#[test]
fn rejected_redefinition_rolls_back_registered_substitutes() {
    let mut context = context_with(RecordingRuntime {
        live: HashMap::new(),
        reject_with: Some("schema change".to_owned()),
    });
    let class = ClassId::new(LoaderId(1), "sample/Greeter");

    match context.install_fakes(
        class,
        answer_fakes(None),
        Arc::new(|_: &PackedArgs| DispatchResult::Proceed),
    ) {
        Err(Error::Redefinition(RedefinitionError::Rejected { .. })) => {}
        other => panic!("expected a rejected redefinition, got {:?}", other.err()),
    }

    // Nothing stayed registered: the bridge sees a dead slot and lets the original run
    assert!(!context
        .bridge()
        .update_fake_state("fakes/GreeterFake", 0)
        .unwrap());
    assert!(context.checkpoint().is_ok());
}

#[test]
fn failed_install_reports_all_unmatched_substitutes_and_registers_nothing() {
    let mut context = context();
    let class = ClassId::new(LoaderId(1), "sample/Greeter");

    let fakes = SubstituteCollection::new(
        "fakes/BrokenFake",
        vec![
            SubstituteMethod::new("answer", "()I").unwrap(),
            SubstituteMethod::new("question", "()I").unwrap(),
            SubstituteMethod::new("answer", "(I)I").unwrap(),
        ],
    );
    match context.install_fakes(
        class.clone(),
        fakes,
        Arc::new(|_: &PackedArgs| DispatchResult::Proceed),
    ) {
        Err(Error::UnmatchedSubstitutes { unmatched }) => {
            assert_eq!(unmatched, vec!["question()I", "answer(I)I"]);
        }
        other => panic!("expected unmatched substitutes, got {:?}", other.err()),
    }

    // Nothing was installed or registered
    assert_eq!(context.engine().generation(&class), 0);
    assert!(!context
        .bridge()
        .update_fake_state("fakes/BrokenFake", 0)
        .unwrap());
}
