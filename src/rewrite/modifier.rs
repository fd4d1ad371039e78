//! Rewrites matched method bodies to redirect through the dispatch bridge.
//!
//! [`FakeClassModifier`] sits between a [`ClassReader`](crate::classfile::reader::ClassReader)
//! and a [`ClassWriter`], forwarding events unchanged for methods without a substitute and
//! splicing a redirect prologue into the ones that have one. The prologue asks the bridge
//! whether the call should be redirected, and if so packs the receiver and arguments into an
//! `Object[]`, invokes the bridge, and either returns the converted result or falls through
//! into the preserved original body when the bridge answers with the `java/lang/Void` sentinel.
//!
//! Constructors get the same prologue, but inserted immediately after the superclass constructor
//! call rather than at entry: redirecting before `super()` completes would hand out an
//! uninitialized receiver. Native methods have no original body to preserve, so their redirect
//! falls through to a default-value return and the `native` flag is dropped. Abstract methods
//! only mark their substitute as matched.

use crate::classfile::attribute::Attribute;
use crate::classfile::instructions::{
    BranchInstruction, EqComparison, Instruction, InvokeType, OrdComparison,
};
use crate::classfile::reader::{ClassEvent, ClassStage, CodeDisposition, CodeEvent};
use crate::classfile::writer::ClassWriter;
use crate::classfile::MethodAccessFlags;
use crate::descriptor::{
    BaseType, FieldType, MethodDescriptor, ParseDescriptor, RenderDescriptor,
};
use crate::errors::Error;
use crate::rewrite::substitutes::SubstituteCollection;
use crate::runtime::bridge::{
    DISPATCH_CLASS, INVOKE_DESCRIPTOR, INVOKE_NAME, PROCEED_SENTINEL_CLASS, UPDATE_DESCRIPTOR,
    UPDATE_NAME,
};
use crate::util::Width;

/// Where the redirect prologue goes for one method
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum RedirectKind {
    /// No substitute, or an abstract method (marker only)
    None,

    /// Start of the method body
    AtEntry,

    /// Constructor: right after the superclass (or chained `this`) constructor call
    AfterSuperCall,

    /// Native method: synthesize the whole body at `MethodEnd`
    NativeStub,
}

struct MethodInfo {
    access_flags: MethodAccessFlags,
    name: String,
    descriptor: MethodDescriptor,
    descriptor_string: String,
    substitute: usize,
    redirect: RedirectKind,

    /// Constructor calls belonging to `new` objects allocated before the superclass call
    pending_new: usize,
}

/// Pipeline stage rewriting matched methods of one real class
pub struct FakeClassModifier<'a> {
    writer: ClassWriter,
    fakes: &'a mut SubstituteCollection,

    /// State entry index of the first substitute in the collection
    state_base: usize,

    class_name: String,
    method: Option<MethodInfo>,
}

impl<'a> FakeClassModifier<'a> {
    pub fn new(
        writer: ClassWriter,
        fakes: &'a mut SubstituteCollection,
        state_base: usize,
    ) -> FakeClassModifier<'a> {
        FakeClassModifier {
            writer,
            fakes,
            state_base,
            class_name: String::new(),
            method: None,
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>, Error> {
        self.writer.into_bytes()
    }

    fn code(&mut self, event: CodeEvent) -> Result<(), Error> {
        self.writer.receive(ClassEvent::Code(event))
    }

    fn push(&mut self, insn: Instruction) -> Result<(), Error> {
        self.code(CodeEvent::Instruction(insn))
    }

    /// Push an `int` constant using the shortest encoding
    fn push_int(&mut self, value: i32) -> Result<(), Error> {
        let insn = match value {
            -1 => Instruction::IConstM1,
            0 => Instruction::IConst0,
            1 => Instruction::IConst1,
            2 => Instruction::IConst2,
            3 => Instruction::IConst3,
            4 => Instruction::IConst4,
            5 => Instruction::IConst5,
            -128..=127 => Instruction::BiPush(value as i8),
            -32768..=32767 => Instruction::SiPush(value as i16),
            _ => Instruction::Ldc(self.writer.constants().get_integer(value)?),
        };
        self.push(insn)
    }

    fn push_string(&mut self, value: &str) -> Result<(), Error> {
        let index = self.writer.constants().get_string(value)?;
        self.push(Instruction::Ldc(index.0))
    }

    fn receive_code_event(&mut self, event: CodeEvent) -> Result<(), Error> {
        let redirect = match &self.method {
            Some(method) => method.redirect,
            None => RedirectKind::None,
        };
        match event {
            CodeEvent::Start { .. } => {
                self.code(event)?;
                if redirect == RedirectKind::AtEntry {
                    self.emit_redirect()?;
                }
                Ok(())
            }
            CodeEvent::Instruction(insn) => {
                if redirect == RedirectKind::AfterSuperCall {
                    match insn {
                        Instruction::New(_) => {
                            if let Some(method) = self.method.as_mut() {
                                method.pending_new += 1;
                            }
                        }
                        Instruction::Invoke(InvokeType::Special, method_ref) => {
                            let is_init = {
                                let (_, name, _) =
                                    self.writer.constants().method_ref(method_ref)?;
                                name == "<init>"
                            };
                            if is_init {
                                let pending = self
                                    .method
                                    .as_ref()
                                    .map(|method| method.pending_new)
                                    .unwrap_or(0);
                                if pending > 0 {
                                    if let Some(method) = self.method.as_mut() {
                                        method.pending_new -= 1;
                                    }
                                } else {
                                    // This is the mandatory superclass (or chained) call
                                    self.push(insn)?;
                                    self.emit_redirect()?;
                                    if let Some(method) = self.method.as_mut() {
                                        method.redirect = RedirectKind::None;
                                    }
                                    return Ok(());
                                }
                            }
                        }
                        _ => (),
                    }
                }
                self.push(insn)
            }
            other => self.code(other),
        }
    }

    /// Splice the redirect prologue in at the current position (operand stack must be empty)
    fn emit_redirect(&mut self) -> Result<(), Error> {
        let (access_flags, real_name, descriptor, descriptor_string, substitute) = {
            let method = self.method.as_ref().ok_or(Error::MissingClassHeader)?;
            (
                method.access_flags,
                method.name.clone(),
                method.descriptor.clone(),
                method.descriptor_string.clone(),
                method.substitute,
            )
        };
        let state_index = (self.state_base + substitute) as i32;
        let fake_class = self.fakes.class_name.clone();
        let real_class = self.class_name.clone();
        let is_static = access_flags.contains(MethodAccessFlags::STATIC);

        let proceed = self.writer.fresh_code_label()?;
        let dispatch = self.writer.fresh_code_label()?;
        let convert = self.writer.fresh_code_label()?;
        let drop_sentinel = self.writer.fresh_code_label()?;

        // Count the invocation and ask whether to redirect; a `false` answer (also given while
        // the substitute is proceeding into the original) runs the preserved body
        self.push_string(&fake_class)?;
        self.push_int(state_index)?;
        let update = self.writer.constants().get_method_ref(
            DISPATCH_CLASS,
            UPDATE_NAME,
            UPDATE_DESCRIPTOR,
            false,
        )?;
        self.push(Instruction::Invoke(InvokeType::Static, update))?;
        self.code(CodeEvent::Branch(BranchInstruction::If(
            OrdComparison::EQ,
            proceed,
            dispatch,
        )))?;
        self.code(CodeEvent::Label(dispatch))?;

        // Packed arguments, positional: substitute class, real class, real access flags,
        // member name, member descriptor, state entry index, then the argument array
        self.push_string(&fake_class)?;
        self.push_string(&real_class)?;
        self.push_int(access_flags.bits() as i32)?;
        self.push_string(&real_name)?;
        self.push_string(&descriptor_string)?;
        self.push_int(state_index)?;

        // Argument array: receiver (or null) first, then every declared parameter, boxed
        let object_class = self
            .writer
            .constants()
            .get_class(FieldType::OBJECT_CLASS)?;
        self.push_int(1 + descriptor.parameters.len() as i32)?;
        self.push(Instruction::ANewArray(object_class))?;

        self.push(Instruction::Dup)?;
        self.push_int(0)?;
        if is_static {
            self.push(Instruction::AConstNull)?;
        } else {
            self.push(Instruction::ALoad(0))?;
        }
        self.push(Instruction::AAStore)?;

        let mut slot: u16 = if is_static { 0 } else { 1 };
        for (position, parameter) in descriptor.parameters.iter().enumerate() {
            self.push(Instruction::Dup)?;
            self.push_int(position as i32 + 1)?;
            self.push(load_instruction(parameter, slot))?;
            if let FieldType::Base(base) = parameter {
                let (box_class, valueof_descriptor) = boxing_conversion(*base);
                let valueof = self.writer.constants().get_method_ref(
                    box_class,
                    "valueOf",
                    valueof_descriptor,
                    false,
                )?;
                self.push(Instruction::Invoke(InvokeType::Static, valueof))?;
            }
            self.push(Instruction::AAStore)?;
            slot += parameter.width() as u16;
        }

        let invoke = self.writer.constants().get_method_ref(
            DISPATCH_CLASS,
            INVOKE_NAME,
            INVOKE_DESCRIPTOR,
            false,
        )?;
        self.push(Instruction::Invoke(InvokeType::Static, invoke))?;

        // The `java/lang/Void` class object means "fall through to the original body"
        self.push(Instruction::Dup)?;
        let sentinel = self.writer.constants().get_class(PROCEED_SENTINEL_CLASS)?;
        self.push(Instruction::Ldc(sentinel.0))?;
        self.code(CodeEvent::Branch(BranchInstruction::IfACmp(
            EqComparison::EQ,
            drop_sentinel,
            convert,
        )))?;

        self.code(CodeEvent::Label(convert))?;
        self.emit_result_return(descriptor.return_type.as_ref())?;

        self.code(CodeEvent::Label(drop_sentinel))?;
        self.push(Instruction::Pop)?;
        self.code(CodeEvent::Branch(BranchInstruction::FallThrough(proceed)))?;
        self.code(CodeEvent::Label(proceed))?;
        Ok(())
    }

    /// Convert the bridge's boxed result to the declared return type and return it
    fn emit_result_return(&mut self, return_type: Option<&FieldType>) -> Result<(), Error> {
        match return_type {
            None => {
                self.push(Instruction::Pop)?;
                self.code(CodeEvent::Branch(BranchInstruction::Return))
            }
            Some(FieldType::Base(base)) => {
                let (box_class, unbox_name, unbox_descriptor, ret) = unboxing_conversion(*base);
                let box_index = self.writer.constants().get_class(box_class)?;
                self.push(Instruction::CheckCast(box_index))?;
                let unbox = self.writer.constants().get_method_ref(
                    box_class,
                    unbox_name,
                    unbox_descriptor,
                    false,
                )?;
                self.push(Instruction::Invoke(InvokeType::Virtual, unbox))?;
                self.code(CodeEvent::Branch(ret))
            }
            Some(FieldType::Object(class_name)) => {
                let class_name = class_name.clone();
                let index = self.writer.constants().get_class(&class_name)?;
                self.push(Instruction::CheckCast(index))?;
                self.code(CodeEvent::Branch(BranchInstruction::AReturn))
            }
            Some(array @ FieldType::Array(_)) => {
                // Array classes are referenced by their descriptor form
                let rendered = array.render();
                let index = self.writer.constants().get_class(&rendered)?;
                self.push(Instruction::CheckCast(index))?;
                self.code(CodeEvent::Branch(BranchInstruction::AReturn))
            }
        }
    }

    /// Default value return used as the "proceed" path of a native stub
    fn emit_default_return(&mut self, return_type: Option<&FieldType>) -> Result<(), Error> {
        let branch = match return_type {
            None => BranchInstruction::Return,
            Some(FieldType::Base(BaseType::Long)) => {
                self.push(Instruction::LConst0)?;
                BranchInstruction::LReturn
            }
            Some(FieldType::Base(BaseType::Float)) => {
                self.push(Instruction::FConst0)?;
                BranchInstruction::FReturn
            }
            Some(FieldType::Base(BaseType::Double)) => {
                self.push(Instruction::DConst0)?;
                BranchInstruction::DReturn
            }
            Some(FieldType::Base(_)) => {
                self.push(Instruction::IConst0)?;
                BranchInstruction::IReturn
            }
            Some(_) => {
                self.push(Instruction::AConstNull)?;
                BranchInstruction::AReturn
            }
        };
        self.code(CodeEvent::Branch(branch))
    }

    /// Synthesize a whole body for a matched native method
    fn emit_native_stub(&mut self) -> Result<(), Error> {
        let return_type = match &self.method {
            Some(method) => method.descriptor.return_type.clone(),
            None => return Err(Error::MissingClassHeader),
        };
        let raw = Attribute {
            name_index: self.writer.constants().get_utf8("Code")?,
            info: vec![],
        };
        self.code(CodeEvent::Start {
            max_stack: 0,
            max_locals: 0,
            raw: &raw,
        })?;
        self.emit_redirect()?;
        self.emit_default_return(return_type.as_ref())?;
        self.code(CodeEvent::End)
    }
}

impl<'a> ClassStage for FakeClassModifier<'a> {
    fn code_disposition(&self, _: &str, _: &str, _: MethodAccessFlags) -> CodeDisposition {
        match &self.method {
            Some(method)
                if matches!(
                    method.redirect,
                    RedirectKind::AtEntry | RedirectKind::AfterSuperCall
                ) =>
            {
                CodeDisposition::Decoded
            }
            _ => CodeDisposition::Raw,
        }
    }

    fn receive(&mut self, event: ClassEvent) -> Result<(), Error> {
        match event {
            ClassEvent::Start {
                version,
                access_flags,
                this_class,
                super_class,
                interfaces,
            } => {
                self.class_name = this_class.to_owned();
                self.writer.receive(ClassEvent::Start {
                    version,
                    access_flags,
                    this_class,
                    super_class,
                    interfaces,
                })
            }
            ClassEvent::MethodStart {
                access_flags,
                name,
                descriptor,
                signature,
            } => {
                let substitute = self.fakes.find_match(name, descriptor, signature)?;
                let mut forwarded_flags = access_flags;
                let (substitute, redirect) = match substitute {
                    None => (0, RedirectKind::None),
                    Some(index) => {
                        self.fakes.mark_matched(index);
                        let redirect = if access_flags.contains(MethodAccessFlags::ABSTRACT) {
                            RedirectKind::None
                        } else if access_flags.contains(MethodAccessFlags::NATIVE) {
                            forwarded_flags -= MethodAccessFlags::NATIVE;
                            RedirectKind::NativeStub
                        } else if name == "<init>" {
                            RedirectKind::AfterSuperCall
                        } else {
                            RedirectKind::AtEntry
                        };
                        (index, redirect)
                    }
                };
                self.method = Some(MethodInfo {
                    access_flags,
                    name: name.to_owned(),
                    descriptor: MethodDescriptor::parse(descriptor)?,
                    descriptor_string: descriptor.to_owned(),
                    substitute,
                    redirect,
                    pending_new: 0,
                });
                self.writer.receive(ClassEvent::MethodStart {
                    access_flags: forwarded_flags,
                    name,
                    descriptor,
                    signature,
                })
            }
            ClassEvent::Code(code_event) => self.receive_code_event(code_event),
            ClassEvent::MethodEnd => {
                let redirect = match &self.method {
                    Some(method) => method.redirect,
                    None => RedirectKind::None,
                };
                if redirect == RedirectKind::NativeStub {
                    self.emit_native_stub()?;
                }
                self.method = None;
                self.writer.receive(ClassEvent::MethodEnd)
            }
            other => self.writer.receive(other),
        }
    }
}

fn load_instruction(parameter: &FieldType, slot: u16) -> Instruction {
    match parameter {
        FieldType::Base(BaseType::Long) => Instruction::LLoad(slot),
        FieldType::Base(BaseType::Float) => Instruction::FLoad(slot),
        FieldType::Base(BaseType::Double) => Instruction::DLoad(slot),
        FieldType::Base(_) => Instruction::ILoad(slot),
        _ => Instruction::ALoad(slot),
    }
}

fn boxing_conversion(base: BaseType) -> (&'static str, &'static str) {
    match base {
        BaseType::Byte => ("java/lang/Byte", "(B)Ljava/lang/Byte;"),
        BaseType::Char => ("java/lang/Character", "(C)Ljava/lang/Character;"),
        BaseType::Double => ("java/lang/Double", "(D)Ljava/lang/Double;"),
        BaseType::Float => ("java/lang/Float", "(F)Ljava/lang/Float;"),
        BaseType::Int => ("java/lang/Integer", "(I)Ljava/lang/Integer;"),
        BaseType::Long => ("java/lang/Long", "(J)Ljava/lang/Long;"),
        BaseType::Short => ("java/lang/Short", "(S)Ljava/lang/Short;"),
        BaseType::Boolean => ("java/lang/Boolean", "(Z)Ljava/lang/Boolean;"),
    }
}

type UnboxReturn = BranchInstruction<crate::flow::Label, crate::flow::Label, crate::flow::Label>;

fn unboxing_conversion(base: BaseType) -> (&'static str, &'static str, &'static str, UnboxReturn) {
    match base {
        BaseType::Byte => (
            "java/lang/Byte",
            "byteValue",
            "()B",
            BranchInstruction::IReturn,
        ),
        BaseType::Char => (
            "java/lang/Character",
            "charValue",
            "()C",
            BranchInstruction::IReturn,
        ),
        BaseType::Double => (
            "java/lang/Double",
            "doubleValue",
            "()D",
            BranchInstruction::DReturn,
        ),
        BaseType::Float => (
            "java/lang/Float",
            "floatValue",
            "()F",
            BranchInstruction::FReturn,
        ),
        BaseType::Int => (
            "java/lang/Integer",
            "intValue",
            "()I",
            BranchInstruction::IReturn,
        ),
        BaseType::Long => (
            "java/lang/Long",
            "longValue",
            "()J",
            BranchInstruction::LReturn,
        ),
        BaseType::Short => (
            "java/lang/Short",
            "shortValue",
            "()S",
            BranchInstruction::IReturn,
        ),
        BaseType::Boolean => (
            "java/lang/Boolean",
            "booleanValue",
            "()Z",
            BranchInstruction::IReturn,
        ),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::classfile::attribute::{AttributeLike, BytecodeArray, Code};
    use crate::classfile::binary::ByteCursor;
    use crate::classfile::constants::ConstantPool;
    use crate::classfile::reader::ClassReader;
    use crate::classfile::{
        ClassAccessFlags, ClassFile, Method, Version,
    };
    use crate::rewrite::substitutes::SubstituteMethod;

    struct TestMethod {
        access_flags: MethodAccessFlags,
        name: &'static str,
        descriptor: &'static str,
        code: Option<Vec<u8>>,
    }

    fn sample_class(methods: Vec<TestMethod>) -> Vec<u8> {
        let mut constants = ConstantPool::new();
        let this_class = constants.get_class("sample/Target").unwrap();
        let super_class = constants.get_class("java/lang/Object").unwrap();

        let methods = methods
            .into_iter()
            .map(|method| {
                let name = constants.get_utf8(method.name).unwrap();
                let descriptor = constants.get_utf8(method.descriptor).unwrap();
                let attributes = match method.code {
                    None => vec![],
                    Some(bytes) => {
                        let code = Code {
                            max_stack: 4,
                            max_locals: 4,
                            code_array: BytecodeArray(bytes),
                            exception_table: vec![],
                            attributes: vec![],
                        };
                        vec![constants.get_attribute(code).unwrap()]
                    }
                };
                Method {
                    access_flags: method.access_flags,
                    name,
                    descriptor,
                    attributes,
                }
            })
            .collect();

        let class = ClassFile {
            version: Version::JAVA8,
            constants,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class: Some(super_class),
            interfaces: vec![],
            fields: vec![],
            methods,
            attributes: vec![],
        };
        class.into_bytes().unwrap()
    }

    fn rewrite(bytes: &[u8], fakes: &mut SubstituteCollection) -> Vec<u8> {
        let reader = ClassReader::parse(bytes).unwrap();
        let writer = ClassWriter::new(reader.class().constants.clone());
        let mut modifier = FakeClassModifier::new(writer, fakes, 0);
        reader.accept(&mut modifier).unwrap();
        modifier.into_bytes().unwrap()
    }

    fn method_code(class: &ClassFile, name: &str) -> Option<Code> {
        let method = class
            .methods
            .iter()
            .find(|method| class.constants.utf8(method.name).unwrap() == name)?;
        let attribute = method.attributes.iter().find(|attribute| {
            attribute.name(&class.constants).unwrap() == Code::NAME
        })?;
        Some(Code::parse(&mut ByteCursor::new(&attribute.info)).unwrap())
    }

    /// Offsets of `invokestatic` opcodes, paired with the resolved target
    fn invokestatic_targets(class: &ClassFile, code: &Code) -> Vec<(usize, String)> {
        let bytes = &code.code_array.0;
        let mut found = vec![];
        let mut cursor = ByteCursor::new(bytes);
        while cursor.remaining() > 0 {
            let offset = cursor.position();
            let insn =
                crate::classfile::instructions::DecodedInstruction::parse(&mut cursor, 0).unwrap();
            if let crate::classfile::instructions::DecodedInstruction::Basic(
                Instruction::Invoke(InvokeType::Static, method_ref),
            ) = insn
            {
                let (class_name, name, _) = class.constants.method_ref(method_ref).unwrap();
                found.push((offset, format!("{}.{}", class_name, name)));
            }
        }
        found
    }

    // iload_1; ireturn
    const IDENTITY_BODY: [u8; 2] = [0x1b, 0xac];

    #[test]
    fn matched_method_redirects_through_the_bridge() {
        let bytes = sample_class(vec![
            TestMethod {
                access_flags: MethodAccessFlags::PUBLIC,
                name: "identity",
                descriptor: "(I)I",
                code: Some(IDENTITY_BODY.to_vec()),
            },
            TestMethod {
                access_flags: MethodAccessFlags::PUBLIC,
                name: "untouched",
                descriptor: "(I)I",
                code: Some(IDENTITY_BODY.to_vec()),
            },
        ]);
        let mut fakes = SubstituteCollection::new(
            "fakes/TargetFake",
            vec![SubstituteMethod::new("identity", "(I)I").unwrap()],
        );

        let rewritten = rewrite(&bytes, &mut fakes);
        let class = ClassFile::parse(&rewritten).unwrap();

        let code = method_code(&class, "identity").unwrap();
        let calls = invokestatic_targets(&class, &code);
        let update = format!("{}.{}", DISPATCH_CLASS, UPDATE_NAME);
        let invoke = format!("{}.{}", DISPATCH_CLASS, INVOKE_NAME);
        assert!(calls.iter().any(|(_, target)| *target == update));
        assert!(calls.iter().any(|(_, target)| *target == invoke));

        // The original body survives at the end of the rewritten method
        let body = &code.code_array.0;
        assert_eq!(&body[body.len() - 2..], &IDENTITY_BODY);

        // The unmatched overload is copied through byte for byte
        let untouched = method_code(&class, "untouched").unwrap();
        assert_eq!(untouched.code_array.0, IDENTITY_BODY.to_vec());

        fakes.ensure_all_matched().unwrap();
    }

    #[test]
    fn constructor_redirect_comes_after_the_super_call() {
        // Built by hand so the super constructor ref index can be baked into the code bytes
        let mut constants = ConstantPool::new();
        let this_class = constants.get_class("sample/Target").unwrap();
        let super_class = constants.get_class("java/lang/Object").unwrap();
        let super_init = {
            let index = constants
                .get_method_ref("java/lang/Object", "<init>", "()V", false)
                .unwrap();
            (index.0).0
        };
        let name = constants.get_utf8("<init>").unwrap();
        let descriptor = constants.get_utf8("()V").unwrap();

        // aload_0; invokespecial Object.<init>; return
        let ctor_body = vec![
            0x2a,
            0xb7,
            (super_init >> 8) as u8,
            super_init as u8,
            0xb1,
        ];
        let code = Code {
            max_stack: 1,
            max_locals: 1,
            code_array: BytecodeArray(ctor_body),
            exception_table: vec![],
            attributes: vec![],
        };
        let code_attribute = constants.get_attribute(code).unwrap();
        let class = ClassFile {
            version: Version::JAVA8,
            constants,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class: Some(super_class),
            interfaces: vec![],
            fields: vec![],
            methods: vec![Method {
                access_flags: MethodAccessFlags::PUBLIC,
                name,
                descriptor,
                attributes: vec![code_attribute],
            }],
            attributes: vec![],
        };
        let bytes = class.into_bytes().unwrap();

        let mut fakes = SubstituteCollection::new(
            "fakes/TargetFake",
            vec![SubstituteMethod::new("$init", "()V").unwrap()],
        );
        let rewritten = rewrite(&bytes, &mut fakes);
        let class = ClassFile::parse(&rewritten).unwrap();
        let code = method_code(&class, "<init>").unwrap();

        // Original prefix is intact: aload_0 then invokespecial
        assert_eq!(code.code_array.0[0], 0x2a);
        assert_eq!(code.code_array.0[1], 0xb7);

        // All bridge calls happen after the superclass call
        let calls = invokestatic_targets(&class, &code);
        assert!(!calls.is_empty());
        assert!(calls.iter().all(|(offset, _)| *offset > 1));

        fakes.ensure_all_matched().unwrap();
    }

    #[test]
    fn helper_construction_before_the_super_call_does_not_trigger_the_splice() {
        // Built by hand so the constant pool indices can be baked into the code bytes
        let mut constants = ConstantPool::new();
        let this_class = constants.get_class("sample/Target").unwrap();
        let super_class = constants.get_class("java/lang/Object").unwrap();
        let helper_class = {
            let index = constants.get_class("sample/Helper").unwrap();
            (index.0).0
        };
        let helper_init = {
            let index = constants
                .get_method_ref("sample/Helper", "<init>", "()V", false)
                .unwrap();
            (index.0).0
        };
        let super_init = {
            let index = constants
                .get_method_ref("java/lang/Object", "<init>", "()V", false)
                .unwrap();
            (index.0).0
        };
        let name = constants.get_utf8("<init>").unwrap();
        let descriptor = constants.get_utf8("()V").unwrap();

        // new Helper; dup; invokespecial Helper.<init>; pop; aload_0;
        // invokespecial Object.<init>; return
        let ctor_body = vec![
            0xbb,
            (helper_class >> 8) as u8,
            helper_class as u8,
            0x59,
            0xb7,
            (helper_init >> 8) as u8,
            helper_init as u8,
            0x57,
            0x2a,
            0xb7,
            (super_init >> 8) as u8,
            super_init as u8,
            0xb1,
        ];
        let original_prefix = ctor_body[..12].to_vec();
        let code = Code {
            max_stack: 4,
            max_locals: 1,
            code_array: BytecodeArray(ctor_body),
            exception_table: vec![],
            attributes: vec![],
        };
        let code_attribute = constants.get_attribute(code).unwrap();
        let class = ClassFile {
            version: Version::JAVA8,
            constants,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class: Some(super_class),
            interfaces: vec![],
            fields: vec![],
            methods: vec![Method {
                access_flags: MethodAccessFlags::PUBLIC,
                name,
                descriptor,
                attributes: vec![code_attribute],
            }],
            attributes: vec![],
        };
        let bytes = class.into_bytes().unwrap();

        let mut fakes = SubstituteCollection::new(
            "fakes/TargetFake",
            vec![SubstituteMethod::new("$init", "()V").unwrap()],
        );
        let rewritten = rewrite(&bytes, &mut fakes);
        let class = ClassFile::parse(&rewritten).unwrap();
        let code = method_code(&class, "<init>").unwrap();

        // Everything up to and including the superclass call is untouched, so the
        // helper's own <init> at offset 4 did not get mistaken for the mandatory one
        assert_eq!(&code.code_array.0[..12], &original_prefix[..]);

        // The redirect lands after the second invokespecial
        let calls = invokestatic_targets(&class, &code);
        assert!(!calls.is_empty());
        assert!(calls.iter().all(|(offset, _)| *offset >= 12));

        fakes.ensure_all_matched().unwrap();
    }

    #[test]
    fn matched_native_method_gets_a_stub_body() {
        let bytes = sample_class(vec![TestMethod {
            access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::NATIVE,
            name: "nativeCall",
            descriptor: "(J)J",
            code: None,
        }]);
        let mut fakes = SubstituteCollection::new(
            "fakes/TargetFake",
            vec![SubstituteMethod::new("nativeCall", "(J)J").unwrap()],
        );

        let rewritten = rewrite(&bytes, &mut fakes);
        let class = ClassFile::parse(&rewritten).unwrap();

        let method = &class.methods[0];
        assert!(!method.access_flags.contains(MethodAccessFlags::NATIVE));
        let code = method_code(&class, "nativeCall").unwrap();
        assert!(!code.code_array.0.is_empty());

        fakes.ensure_all_matched().unwrap();
    }

    #[test]
    fn abstract_match_registers_without_a_body() {
        let bytes = sample_class(vec![TestMethod {
            access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
            name: "template",
            descriptor: "()V",
            code: None,
        }]);
        let mut fakes = SubstituteCollection::new(
            "fakes/TargetFake",
            vec![SubstituteMethod::new("template", "()V").unwrap()],
        );

        let rewritten = rewrite(&bytes, &mut fakes);
        let class = ClassFile::parse(&rewritten).unwrap();
        assert!(method_code(&class, "template").is_none());
        assert!(class.methods[0]
            .access_flags
            .contains(MethodAccessFlags::ABSTRACT));

        fakes.ensure_all_matched().unwrap();
    }
}
