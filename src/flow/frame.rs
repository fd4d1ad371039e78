use crate::classfile::binary::{ByteCursor, Serialize};
use crate::classfile::constants::{ClassConstantIndex, ConstantIndex, ConstantPool};
use crate::classfile::instructions::Instruction;
use crate::descriptor::{BaseType, FieldType};
use crate::errors::{Error, FormatError};
use crate::util::{OffsetVec, Width};
use byteorder::WriteBytesExt;

/// Verifier type of one value
///
/// `Cls` is the representation of object types (an internal name during analysis, a constant pool
/// index once serialized into a `StackMapTable`). `U` is the representation of the `new`
/// instruction an uninitialized value came from.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum VerificationType<Cls, U> {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(Cls),
    Uninitialized(U),
}

impl<Cls, U> Width for VerificationType<Cls, U> {
    fn width(&self) -> usize {
        match self {
            VerificationType::Double | VerificationType::Long => 2,
            _ => 1,
        }
    }
}

impl<Cls, U> VerificationType<Cls, U> {
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            VerificationType::Null
                | VerificationType::UninitializedThis
                | VerificationType::Object(_)
                | VerificationType::Uninitialized(_)
        )
    }

    pub fn map<Cls2, U2, E>(
        &self,
        mut map_class: impl FnMut(&Cls) -> Result<Cls2, E>,
        mut map_uninitialized: impl FnMut(&U) -> Result<U2, E>,
    ) -> Result<VerificationType<Cls2, U2>, E> {
        Ok(match self {
            VerificationType::Top => VerificationType::Top,
            VerificationType::Integer => VerificationType::Integer,
            VerificationType::Float => VerificationType::Float,
            VerificationType::Double => VerificationType::Double,
            VerificationType::Long => VerificationType::Long,
            VerificationType::Null => VerificationType::Null,
            VerificationType::UninitializedThis => VerificationType::UninitializedThis,
            VerificationType::Object(cls) => VerificationType::Object(map_class(cls)?),
            VerificationType::Uninitialized(off) => {
                VerificationType::Uninitialized(map_uninitialized(off)?)
            }
        })
    }
}

/// Type representation used while frames are being built up: object types are internal names
pub type AnalysisType = VerificationType<String, usize>;

/// Type representation inside a serialized `StackMapTable`
pub type SerializableType = VerificationType<ClassConstantIndex, u16>;

impl AnalysisType {
    /// Verifier type of a field/parameter type
    pub fn of_field_type(typ: &FieldType) -> AnalysisType {
        use crate::descriptor::RenderDescriptor;
        match typ {
            FieldType::Base(BaseType::Double) => VerificationType::Double,
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(_) => VerificationType::Integer,
            FieldType::Object(class_name) => VerificationType::Object(class_name.clone()),
            // Array types are spelled with their full descriptor in frames
            FieldType::Array(_) => VerificationType::Object(typ.render()),
        }
    }

    /// Resolve object types against the constant pool
    pub fn into_serializable(
        &self,
        constants: &mut ConstantPool,
    ) -> Result<SerializableType, Error> {
        self.map(
            |class_name| constants.get_class(class_name),
            |offset| Ok(*offset as u16),
        )
    }
}

impl Serialize for SerializableType {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            VerificationType::Top => 0u8.serialize(writer)?,
            VerificationType::Integer => 1u8.serialize(writer)?,
            VerificationType::Float => 2u8.serialize(writer)?,
            VerificationType::Double => 3u8.serialize(writer)?,
            VerificationType::Long => 4u8.serialize(writer)?,
            VerificationType::Null => 5u8.serialize(writer)?,
            VerificationType::UninitializedThis => 6u8.serialize(writer)?,
            VerificationType::Object(cls) => {
                7u8.serialize(writer)?;
                cls.serialize(writer)?;
            }
            VerificationType::Uninitialized(offset) => {
                8u8.serialize(writer)?;
                offset.serialize(writer)?;
            }
        }
        Ok(())
    }
}

impl SerializableType {
    pub fn parse(cursor: &mut ByteCursor) -> Result<SerializableType, FormatError> {
        Ok(match cursor.u8()? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(ClassConstantIndex(ConstantIndex(cursor.u16()?))),
            8 => VerificationType::Uninitialized(cursor.u16()?),
            tag => return Err(FormatError::BadVerificationTag { tag }),
        })
    }
}

/// Abstract frame: types of the locals and of the operand stack at one point in a method
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Frame {
    pub locals: OffsetVec<AnalysisType>,
    pub stack: OffsetVec<AnalysisType>,
}

impl Frame {
    pub fn new() -> Frame {
        Frame::default()
    }

    /// Initial frame of a method body
    pub fn entry_frame(
        this_type: Option<AnalysisType>,
        parameters: &[FieldType],
    ) -> Frame {
        let mut locals = OffsetVec::new();
        if let Some(this_type) = this_type {
            locals.push(this_type);
        }
        for parameter in parameters {
            locals.push(AnalysisType::of_field_type(parameter));
        }
        Frame {
            locals,
            stack: OffsetVec::new(),
        }
    }

    /// Merge the frame flowing in from another predecessor
    ///
    /// Stack shapes must agree exactly in depth and widths. Locals that disagree decay to `Top`;
    /// stack entries that disagree decay to the nearest common supertype, or fail if there is no
    /// reference type to decay to.
    pub fn merge(&self, other: &Frame) -> Result<Frame, String> {
        if self.stack.len() != other.stack.len()
            || self.stack.offset_len() != other.stack.offset_len()
        {
            return Err(format!(
                "stack depth mismatch ({} vs {})",
                self.stack.offset_len().0,
                other.stack.offset_len().0,
            ));
        }

        let mut locals = OffsetVec::new();
        let max_len = self.locals.len().max(other.locals.len());
        for index in 0..max_len {
            let mine = self.locals.get_index(index).map(|(_, t)| t);
            let theirs = other.locals.get_index(index).map(|(_, t)| t);
            locals.push(match (mine, theirs) {
                (Some(mine), Some(theirs)) => {
                    Self::merge_types(mine, theirs).unwrap_or(VerificationType::Top)
                }
                _ => VerificationType::Top,
            });
        }

        let mut stack = OffsetVec::new();
        for (index, (_, _, mine)) in self.stack.iter().enumerate() {
            let (_, theirs) = other.stack.get_index(index).ok_or_else(|| {
                format!("stack entry {} missing in predecessor", index)
            })?;
            let merged = Self::merge_types(mine, theirs).ok_or_else(|| {
                format!(
                    "stack entry {} has irreconcilable types {:?} and {:?}",
                    index, mine, theirs
                )
            })?;
            stack.push(merged);
        }

        Ok(Frame { locals, stack })
    }

    /// Read the type of a local variable slot
    pub fn local(&self, index: usize) -> Option<&AnalysisType> {
        self.locals.get_offset(crate::util::Offset(index)).ok()
    }

    /// Write the type of a local variable slot
    ///
    /// Overwriting either half of a wide value invalidates the other half (it decays to `Top`),
    /// and slots between the current end of the locals and the written index are filled with
    /// `Top`.
    pub fn set_local(&mut self, index: usize, value: AnalysisType) {
        // One entry per JVM slot, where `None` marks the second half of a wide value
        let mut slots: Vec<Option<AnalysisType>> = vec![];
        for (_, _, t) in self.locals.iter() {
            let wide = t.width() == 2;
            slots.push(Some(t.clone()));
            if wide {
                slots.push(None);
            }
        }
        while slots.len() < index + value.width() {
            slots.push(Some(VerificationType::Top));
        }

        fn clobber(slots: &mut [Option<AnalysisType>], index: usize) {
            match slots[index].take() {
                None => slots[index - 1] = Some(VerificationType::Top),
                Some(t) if t.width() == 2 => slots[index + 1] = Some(VerificationType::Top),
                Some(_) => (),
            }
            slots[index] = Some(VerificationType::Top);
        }

        let wide = value.width() == 2;
        clobber(&mut slots, index);
        if wide {
            clobber(&mut slots, index + 1);
            slots[index + 1] = None;
        }
        slots[index] = Some(value);

        let mut locals = OffsetVec::new();
        let mut slot = 0;
        while slot < slots.len() {
            match slots[slot].take() {
                Some(t) => {
                    slot += t.width();
                    locals.push(t);
                }
                None => slot += 1,
            }
        }
        self.locals = locals;
    }

    fn push(&mut self, value: AnalysisType) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<AnalysisType, String> {
        self.stack
            .pop()
            .map(|(_, _, t)| t)
            .ok_or_else(|| "pop from empty stack".to_owned())
    }

    fn pop_expecting(&mut self, expected: &AnalysisType) -> Result<(), String> {
        let found = self.pop()?;
        if found == *expected {
            Ok(())
        } else {
            Err(format!("expected {:?} on stack, found {:?}", expected, found))
        }
    }

    fn pop_int(&mut self) -> Result<(), String> {
        self.pop_expecting(&VerificationType::Integer)
    }

    fn pop_reference(&mut self) -> Result<AnalysisType, String> {
        let found = self.pop()?;
        if found.is_reference() {
            Ok(found)
        } else {
            Err(format!("expected reference on stack, found {:?}", found))
        }
    }

    fn pop_field_value(&mut self, typ: &FieldType) -> Result<(), String> {
        match AnalysisType::of_field_type(typ) {
            expected @ (VerificationType::Integer
            | VerificationType::Float
            | VerificationType::Long
            | VerificationType::Double) => self.pop_expecting(&expected),
            _ => self.pop_reference().map(|_| ()),
        }
    }

    /// Pop values totalling exactly `slots` stack slots (for the `dup`/`pop` family)
    ///
    /// Values come out in pop order; a wide value straddling the group boundary is an error.
    fn pop_group(&mut self, slots: usize) -> Result<Vec<AnalysisType>, String> {
        let mut popped = vec![];
        let mut width = 0;
        while width < slots {
            let value = self.pop()?;
            width += value.width();
            popped.push(value);
        }
        if width == slots {
            Ok(popped)
        } else {
            Err(format!("wide value straddles a {}-slot stack group", slots))
        }
    }

    fn push_group(&mut self, group: &[AnalysisType]) {
        for value in group.iter().rev() {
            self.push(value.clone());
        }
    }

    /// Apply the stack/local effect of one straight-line instruction
    ///
    /// `uninit_id` identifies the instruction (used to tag the value a `new` pushes until the
    /// matching constructor call) and `this_class` is the internal name of the enclosing class
    /// (what `UninitializedThis` initializes to).
    pub fn apply(
        &mut self,
        insn: &Instruction,
        constants: &ConstantPool,
        uninit_id: usize,
        this_class: &str,
    ) -> Result<(), String> {
        use crate::classfile::instructions::{InvokeType, ShiftType};
        use crate::descriptor::{MethodDescriptor, ParseDescriptor, RenderDescriptor};
        use VerificationType::{Double, Float, Integer, Long, Null, Object};

        fn constant_type(
            constants: &ConstantPool,
            index: ConstantIndex,
        ) -> Result<AnalysisType, String> {
            let entry = constants
                .entry(index)
                .map_err(|err| format!("bad ldc operand: {}", err))?;
            Ok(match entry {
                crate::classfile::constants::Constant::Integer(_) => Integer,
                crate::classfile::constants::Constant::Float(_) => Float,
                crate::classfile::constants::Constant::Long(_) => Long,
                crate::classfile::constants::Constant::Double(_) => Double,
                crate::classfile::constants::Constant::String(_) => {
                    Object("java/lang/String".to_owned())
                }
                crate::classfile::constants::Constant::Class(_) => {
                    Object("java/lang/Class".to_owned())
                }
                crate::classfile::constants::Constant::MethodHandle { .. } => {
                    Object("java/lang/invoke/MethodHandle".to_owned())
                }
                crate::classfile::constants::Constant::MethodType { .. } => {
                    Object("java/lang/invoke/MethodType".to_owned())
                }
                crate::classfile::constants::Constant::Dynamic { name_and_type, .. } => {
                    let (_, descriptor) = constants
                        .name_and_type(*name_and_type)
                        .map_err(|err| format!("bad dynamic constant: {}", err))?;
                    let typ = FieldType::parse(descriptor)
                        .map_err(|err| format!("bad dynamic constant descriptor: {}", err))?;
                    AnalysisType::of_field_type(&typ)
                }
                other => return Err(format!("unloadable constant {:?}", other)),
            })
        }

        match insn {
            Instruction::Nop => (),

            Instruction::AConstNull => self.push(Null),
            Instruction::IConstM1
            | Instruction::IConst0
            | Instruction::IConst1
            | Instruction::IConst2
            | Instruction::IConst3
            | Instruction::IConst4
            | Instruction::IConst5
            | Instruction::BiPush(_)
            | Instruction::SiPush(_) => self.push(Integer),
            Instruction::LConst0 | Instruction::LConst1 => self.push(Long),
            Instruction::FConst0 | Instruction::FConst1 | Instruction::FConst2 => self.push(Float),
            Instruction::DConst0 | Instruction::DConst1 => self.push(Double),
            Instruction::Ldc(index) | Instruction::Ldc2(index) => {
                let typ = constant_type(constants, *index)?;
                self.push(typ);
            }

            Instruction::ILoad(_) => self.push(Integer),
            Instruction::LLoad(_) => self.push(Long),
            Instruction::FLoad(_) => self.push(Float),
            Instruction::DLoad(_) => self.push(Double),
            Instruction::ALoad(index) => {
                let local = self
                    .local(*index as usize)
                    .cloned()
                    .ok_or_else(|| format!("aload from undefined local {}", index))?;
                if !local.is_reference() {
                    return Err(format!("aload from non-reference local {:?}", local));
                }
                self.push(local);
            }

            Instruction::IALoad
            | Instruction::BALoad
            | Instruction::CALoad
            | Instruction::SALoad => {
                self.pop_int()?;
                self.pop_reference()?;
                self.push(Integer);
            }
            Instruction::LALoad => {
                self.pop_int()?;
                self.pop_reference()?;
                self.push(Long);
            }
            Instruction::FALoad => {
                self.pop_int()?;
                self.pop_reference()?;
                self.push(Float);
            }
            Instruction::DALoad => {
                self.pop_int()?;
                self.pop_reference()?;
                self.push(Double);
            }
            Instruction::AALoad => {
                self.pop_int()?;
                let array = self.pop_reference()?;
                let element = match &array {
                    Null => Null,
                    Object(descriptor) if descriptor.starts_with('[') => {
                        let element = &descriptor[1..];
                        match element.strip_prefix('L').and_then(|e| e.strip_suffix(';')) {
                            Some(class_name) => Object(class_name.to_owned()),
                            None if element.starts_with('[') => Object(element.to_owned()),
                            None => {
                                return Err(format!("aaload from primitive array {}", descriptor))
                            }
                        }
                    }
                    other => return Err(format!("aaload from non-array {:?}", other)),
                };
                self.push(element);
            }

            Instruction::IStore(index) => {
                self.pop_expecting(&Integer)?;
                self.set_local(*index as usize, Integer);
            }
            Instruction::LStore(index) => {
                self.pop_expecting(&Long)?;
                self.set_local(*index as usize, Long);
            }
            Instruction::FStore(index) => {
                self.pop_expecting(&Float)?;
                self.set_local(*index as usize, Float);
            }
            Instruction::DStore(index) => {
                self.pop_expecting(&Double)?;
                self.set_local(*index as usize, Double);
            }
            Instruction::AStore(index) => {
                let value = self.pop_reference()?;
                self.set_local(*index as usize, value);
            }

            Instruction::IAStore
            | Instruction::BAStore
            | Instruction::CAStore
            | Instruction::SAStore => {
                self.pop_int()?;
                self.pop_int()?;
                self.pop_reference()?;
            }
            Instruction::LAStore => {
                self.pop_expecting(&Long)?;
                self.pop_int()?;
                self.pop_reference()?;
            }
            Instruction::FAStore => {
                self.pop_expecting(&Float)?;
                self.pop_int()?;
                self.pop_reference()?;
            }
            Instruction::DAStore => {
                self.pop_expecting(&Double)?;
                self.pop_int()?;
                self.pop_reference()?;
            }
            Instruction::AAStore => {
                self.pop_reference()?;
                self.pop_int()?;
                self.pop_reference()?;
            }

            Instruction::Pop => {
                let _ = self.pop_group(1)?;
            }
            Instruction::Pop2 => {
                let _ = self.pop_group(2)?;
            }
            Instruction::Dup => {
                let top = self.pop_group(1)?;
                self.push_group(&top);
                self.push_group(&top);
            }
            Instruction::DupX1 | Instruction::DupX2 => {
                let skipped = if matches!(insn, Instruction::DupX1) { 1 } else { 2 };
                let top = self.pop_group(1)?;
                let skip = self.pop_group(skipped)?;
                self.push_group(&top);
                self.push_group(&skip);
                self.push_group(&top);
            }
            Instruction::Dup2 => {
                let top = self.pop_group(2)?;
                self.push_group(&top);
                self.push_group(&top);
            }
            Instruction::Dup2X1 | Instruction::Dup2X2 => {
                let skipped = if matches!(insn, Instruction::Dup2X1) { 1 } else { 2 };
                let top = self.pop_group(2)?;
                let skip = self.pop_group(skipped)?;
                self.push_group(&top);
                self.push_group(&skip);
                self.push_group(&top);
            }
            Instruction::Swap => {
                let first = self.pop_group(1)?;
                let second = self.pop_group(1)?;
                self.push_group(&first);
                self.push_group(&second);
            }

            Instruction::IAdd
            | Instruction::ISub
            | Instruction::IMul
            | Instruction::IDiv
            | Instruction::IRem
            | Instruction::IAnd
            | Instruction::IOr
            | Instruction::IXor
            | Instruction::ISh(ShiftType::Left)
            | Instruction::ISh(ShiftType::LogicalRight)
            | Instruction::ISh(ShiftType::ArithmeticRight) => {
                self.pop_int()?;
                self.pop_int()?;
                self.push(Integer);
            }
            Instruction::LAdd
            | Instruction::LSub
            | Instruction::LMul
            | Instruction::LDiv
            | Instruction::LRem
            | Instruction::LAnd
            | Instruction::LOr
            | Instruction::LXor => {
                self.pop_expecting(&Long)?;
                self.pop_expecting(&Long)?;
                self.push(Long);
            }
            Instruction::LSh(_) => {
                self.pop_int()?;
                self.pop_expecting(&Long)?;
                self.push(Long);
            }
            Instruction::FAdd | Instruction::FSub | Instruction::FMul | Instruction::FDiv
            | Instruction::FRem => {
                self.pop_expecting(&Float)?;
                self.pop_expecting(&Float)?;
                self.push(Float);
            }
            Instruction::DAdd | Instruction::DSub | Instruction::DMul | Instruction::DDiv
            | Instruction::DRem => {
                self.pop_expecting(&Double)?;
                self.pop_expecting(&Double)?;
                self.push(Double);
            }
            Instruction::INeg => {
                self.pop_int()?;
                self.push(Integer);
            }
            Instruction::LNeg => {
                self.pop_expecting(&Long)?;
                self.push(Long);
            }
            Instruction::FNeg => {
                self.pop_expecting(&Float)?;
                self.push(Float);
            }
            Instruction::DNeg => {
                self.pop_expecting(&Double)?;
                self.push(Double);
            }
            Instruction::IInc(index, _) => {
                match self.local(*index as usize) {
                    Some(Integer) => (),
                    other => return Err(format!("iinc on non-int local {:?}", other)),
                }
            }

            Instruction::I2L => {
                self.pop_int()?;
                self.push(Long);
            }
            Instruction::I2F => {
                self.pop_int()?;
                self.push(Float);
            }
            Instruction::I2D => {
                self.pop_int()?;
                self.push(Double);
            }
            Instruction::L2I => {
                self.pop_expecting(&Long)?;
                self.push(Integer);
            }
            Instruction::L2F => {
                self.pop_expecting(&Long)?;
                self.push(Float);
            }
            Instruction::L2D => {
                self.pop_expecting(&Long)?;
                self.push(Double);
            }
            Instruction::F2I => {
                self.pop_expecting(&Float)?;
                self.push(Integer);
            }
            Instruction::F2L => {
                self.pop_expecting(&Float)?;
                self.push(Long);
            }
            Instruction::F2D => {
                self.pop_expecting(&Float)?;
                self.push(Double);
            }
            Instruction::D2I => {
                self.pop_expecting(&Double)?;
                self.push(Integer);
            }
            Instruction::D2L => {
                self.pop_expecting(&Double)?;
                self.push(Long);
            }
            Instruction::D2F => {
                self.pop_expecting(&Double)?;
                self.push(Float);
            }
            Instruction::I2B | Instruction::I2C | Instruction::I2S => {
                self.pop_int()?;
                self.push(Integer);
            }

            Instruction::LCmp => {
                self.pop_expecting(&Long)?;
                self.pop_expecting(&Long)?;
                self.push(Integer);
            }
            Instruction::FCmp(_) => {
                self.pop_expecting(&Float)?;
                self.pop_expecting(&Float)?;
                self.push(Integer);
            }
            Instruction::DCmp(_) => {
                self.pop_expecting(&Double)?;
                self.pop_expecting(&Double)?;
                self.push(Integer);
            }

            Instruction::GetStatic(field) | Instruction::GetField(field) => {
                let (_, _, descriptor) = constants
                    .field_ref(*field)
                    .map_err(|err| format!("bad field ref: {}", err))?;
                let typ = FieldType::parse(descriptor)
                    .map_err(|err| format!("bad field descriptor: {}", err))?;
                if matches!(insn, Instruction::GetField(_)) {
                    self.pop_reference()?;
                }
                self.push(AnalysisType::of_field_type(&typ));
            }
            Instruction::PutStatic(field) | Instruction::PutField(field) => {
                let (_, _, descriptor) = constants
                    .field_ref(*field)
                    .map_err(|err| format!("bad field ref: {}", err))?;
                let typ = FieldType::parse(descriptor)
                    .map_err(|err| format!("bad field descriptor: {}", err))?;
                self.pop_field_value(&typ)?;
                if matches!(insn, Instruction::PutField(_)) {
                    self.pop_reference()?;
                }
            }

            Instruction::Invoke(invoke_type, method) => {
                let (class_name, method_name, descriptor) = constants
                    .method_ref(*method)
                    .map_err(|err| format!("bad method ref: {}", err))?;
                let class_name = class_name.to_owned();
                let is_init = method_name == "<init>";
                let descriptor = MethodDescriptor::parse(descriptor)
                    .map_err(|err| format!("bad method descriptor: {}", err))?;
                for parameter in descriptor.parameters.iter().rev() {
                    self.pop_field_value(parameter)?;
                }
                if !matches!(invoke_type, InvokeType::Static) {
                    let receiver = self.pop_reference()?;
                    if is_init {
                        let initialized = match &receiver {
                            VerificationType::UninitializedThis => Object(this_class.to_owned()),
                            VerificationType::Uninitialized(_) => Object(class_name),
                            other => {
                                return Err(format!(
                                    "constructor call on initialized value {:?}",
                                    other
                                ))
                            }
                        };
                        self.initialize(&receiver, initialized);
                    }
                }
                if let Some(return_type) = &descriptor.return_type {
                    self.push(AnalysisType::of_field_type(return_type));
                }
            }
            Instruction::InvokeDynamic(indy) => {
                let (_, descriptor) = constants
                    .invoke_dynamic_descriptor(*indy)
                    .map_err(|err| format!("bad invokedynamic: {}", err))?;
                let descriptor = MethodDescriptor::parse(descriptor)
                    .map_err(|err| format!("bad invokedynamic descriptor: {}", err))?;
                for parameter in descriptor.parameters.iter().rev() {
                    self.pop_field_value(parameter)?;
                }
                if let Some(return_type) = &descriptor.return_type {
                    self.push(AnalysisType::of_field_type(return_type));
                }
            }

            Instruction::New(_) => self.push(VerificationType::Uninitialized(uninit_id)),
            Instruction::NewArray(base) => {
                self.pop_int()?;
                self.push(Object(FieldType::array(FieldType::Base(*base)).render()));
            }
            Instruction::ANewArray(class) => {
                self.pop_int()?;
                let name = constants
                    .class_name(*class)
                    .map_err(|err| format!("bad class ref: {}", err))?;
                let descriptor = if name.starts_with('[') {
                    format!("[{}", name)
                } else {
                    format!("[L{};", name)
                };
                self.push(Object(descriptor));
            }
            Instruction::ArrayLength => {
                self.pop_reference()?;
                self.push(Integer);
            }
            Instruction::CheckCast(class) => {
                self.pop_reference()?;
                let name = constants
                    .class_name(*class)
                    .map_err(|err| format!("bad class ref: {}", err))?;
                self.push(Object(name.to_owned()));
            }
            Instruction::InstanceOf(_) => {
                self.pop_reference()?;
                self.push(Integer);
            }
            Instruction::MonitorEnter | Instruction::MonitorExit => {
                self.pop_reference()?;
            }
            Instruction::MultiANewArray(class, dimensions) => {
                for _ in 0..*dimensions {
                    self.pop_int()?;
                }
                let name = constants
                    .class_name(*class)
                    .map_err(|err| format!("bad class ref: {}", err))?;
                self.push(Object(name.to_owned()));
            }
        }
        Ok(())
    }

    /// Replace every occurrence of an uninitialized value with its initialized type
    fn initialize(&mut self, uninitialized: &AnalysisType, initialized: AnalysisType) {
        let locals = std::mem::take(&mut self.locals);
        self.locals = locals
            .into_iter()
            .map(|(_, _, t)| if t == *uninitialized { initialized.clone() } else { t })
            .collect();
        let stack = std::mem::take(&mut self.stack);
        self.stack = stack
            .into_iter()
            .map(|(_, _, t)| if t == *uninitialized { initialized.clone() } else { t })
            .collect();
    }

    /// Apply the stack effect of a block-ending instruction
    pub fn apply_branch<Lbl, LblWide, LblNext>(
        &mut self,
        insn: &crate::classfile::instructions::BranchInstruction<Lbl, LblWide, LblNext>,
    ) -> Result<(), String> {
        use crate::classfile::instructions::BranchInstruction;
        use VerificationType::{Double, Float, Integer, Long};

        match insn {
            BranchInstruction::If(_, _, _)
            | BranchInstruction::TableSwitch { .. }
            | BranchInstruction::LookupSwitch { .. }
            | BranchInstruction::IReturn => self.pop_int()?,
            BranchInstruction::IfICmp(_, _, _) => {
                self.pop_int()?;
                self.pop_int()?;
            }
            BranchInstruction::IfACmp(_, _, _) => {
                self.pop_reference()?;
                self.pop_reference()?;
            }
            BranchInstruction::IfNull(_, _, _) | BranchInstruction::AReturn
            | BranchInstruction::AThrow => {
                self.pop_reference()?;
            }
            BranchInstruction::LReturn => self.pop_expecting(&Long)?,
            BranchInstruction::FReturn => self.pop_expecting(&Float)?,
            BranchInstruction::DReturn => self.pop_expecting(&Double)?,
            BranchInstruction::Goto(_)
            | BranchInstruction::GotoW(_)
            | BranchInstruction::Return
            | BranchInstruction::FallThrough(_) => (),
        }
        Ok(())
    }

    fn merge_types(left: &AnalysisType, right: &AnalysisType) -> Option<AnalysisType> {
        if left == right {
            return Some(left.clone());
        }
        match (left, right) {
            (VerificationType::Null, other) | (other, VerificationType::Null)
                if other.is_reference() =>
            {
                Some(other.clone())
            }
            // Without a loaded class hierarchy, the nearest common supertype of two distinct
            // classes is approximated by `java/lang/Object`
            (VerificationType::Object(_), VerificationType::Object(_)) => Some(
                VerificationType::Object(FieldType::OBJECT_CLASS.to_owned()),
            ),
            _ => None,
        }
    }
}
