//! Closed instruction model for JVM bytecode.
//!
//! Instructions are split into two enums: [`Instruction`] for straight-line instructions and
//! [`BranchInstruction`] for everything that ends a basic block. Variants cover every encoding of
//! the same operation (`iload_0`, `iload 5` and `wide iload 260` are all `ILoad`), and the
//! shortest valid encoding is chosen on serialization.

use crate::classfile::binary::{ByteCursor, Serialize};
use crate::classfile::constants::{
    ClassConstantIndex, ConstantIndex, FieldRefConstantIndex, InvokeDynamicConstantIndex,
    MethodRefConstantIndex,
};
use crate::descriptor::BaseType;
use crate::errors::FormatError;
use crate::util::Width;
use byteorder::WriteBytesExt;
use std::io::Result;
use std::ops::Not;

/// Non-branching JVM bytecode instruction
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-6.html
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Instruction {
    Nop,
    AConstNull,
    IConstM1,
    IConst0,
    IConst1,
    IConst2,
    IConst3,
    IConst4,
    IConst5,
    LConst0,
    LConst1,
    FConst0,
    FConst1,
    FConst2,
    DConst0,
    DConst1,
    BiPush(i8),
    SiPush(i16),
    Ldc(ConstantIndex), // covers both `ldc` and `ldc_w`
    Ldc2(ConstantIndex),
    ILoad(u16), // covers `iload`, `iload_{0,3}`, and `wide iload`
    LLoad(u16),
    FLoad(u16),
    DLoad(u16),
    ALoad(u16),
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IStore(u16), // covers `istore`, `istore_{0,3}`, and `wide istore`
    LStore(u16),
    FStore(u16),
    DStore(u16),
    AStore(u16),
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    ISh(ShiftType), // covers `ishl`, `ishr`, and `iushr`
    LSh(ShiftType),
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
    IInc(u16, i16), // covers `iinc` and `wide iinc`
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
    LCmp,
    FCmp(CompareMode), // covers `fcmpl` and `fcmpg`
    DCmp(CompareMode),
    GetStatic(FieldRefConstantIndex),
    PutStatic(FieldRefConstantIndex),
    GetField(FieldRefConstantIndex),
    PutField(FieldRefConstantIndex),
    Invoke(InvokeType, MethodRefConstantIndex),
    InvokeDynamic(InvokeDynamicConstantIndex),
    New(ClassConstantIndex),
    NewArray(BaseType),
    ANewArray(ClassConstantIndex),
    ArrayLength,
    CheckCast(ClassConstantIndex),
    InstanceOf(ClassConstantIndex),
    MonitorEnter,
    MonitorExit,
    MultiANewArray(ClassConstantIndex, u8),
}

impl Width for Instruction {
    fn width(&self) -> usize {
        match self {
            Instruction::Nop
            | Instruction::AConstNull
            | Instruction::IConstM1
            | Instruction::IConst0
            | Instruction::IConst1
            | Instruction::IConst2
            | Instruction::IConst3
            | Instruction::IConst4
            | Instruction::IConst5
            | Instruction::LConst0
            | Instruction::LConst1
            | Instruction::FConst0
            | Instruction::FConst1
            | Instruction::FConst2
            | Instruction::DConst0
            | Instruction::DConst1
            | Instruction::ILoad(0..=3)
            | Instruction::LLoad(0..=3)
            | Instruction::FLoad(0..=3)
            | Instruction::DLoad(0..=3)
            | Instruction::ALoad(0..=3)
            | Instruction::IALoad
            | Instruction::LALoad
            | Instruction::FALoad
            | Instruction::DALoad
            | Instruction::AALoad
            | Instruction::BALoad
            | Instruction::CALoad
            | Instruction::SALoad
            | Instruction::IStore(0..=3)
            | Instruction::LStore(0..=3)
            | Instruction::FStore(0..=3)
            | Instruction::DStore(0..=3)
            | Instruction::AStore(0..=3)
            | Instruction::IAStore
            | Instruction::LAStore
            | Instruction::FAStore
            | Instruction::DAStore
            | Instruction::AAStore
            | Instruction::BAStore
            | Instruction::CAStore
            | Instruction::SAStore
            | Instruction::Pop
            | Instruction::Pop2
            | Instruction::Dup
            | Instruction::DupX1
            | Instruction::DupX2
            | Instruction::Dup2
            | Instruction::Dup2X1
            | Instruction::Dup2X2
            | Instruction::Swap
            | Instruction::IAdd
            | Instruction::LAdd
            | Instruction::FAdd
            | Instruction::DAdd
            | Instruction::ISub
            | Instruction::LSub
            | Instruction::FSub
            | Instruction::DSub
            | Instruction::IMul
            | Instruction::LMul
            | Instruction::FMul
            | Instruction::DMul
            | Instruction::IDiv
            | Instruction::LDiv
            | Instruction::FDiv
            | Instruction::DDiv
            | Instruction::IRem
            | Instruction::LRem
            | Instruction::FRem
            | Instruction::DRem
            | Instruction::INeg
            | Instruction::LNeg
            | Instruction::FNeg
            | Instruction::DNeg
            | Instruction::ISh(_)
            | Instruction::LSh(_)
            | Instruction::IAnd
            | Instruction::LAnd
            | Instruction::IOr
            | Instruction::LOr
            | Instruction::IXor
            | Instruction::LXor
            | Instruction::I2L
            | Instruction::I2F
            | Instruction::I2D
            | Instruction::L2I
            | Instruction::L2F
            | Instruction::L2D
            | Instruction::F2I
            | Instruction::F2L
            | Instruction::F2D
            | Instruction::D2I
            | Instruction::D2L
            | Instruction::D2F
            | Instruction::I2B
            | Instruction::I2C
            | Instruction::I2S
            | Instruction::LCmp
            | Instruction::FCmp(_)
            | Instruction::DCmp(_)
            | Instruction::ArrayLength
            | Instruction::MonitorEnter
            | Instruction::MonitorExit => 1,

            Instruction::BiPush(_)
            | Instruction::ILoad(4..=255)
            | Instruction::LLoad(4..=255)
            | Instruction::FLoad(4..=255)
            | Instruction::DLoad(4..=255)
            | Instruction::ALoad(4..=255)
            | Instruction::IStore(4..=255)
            | Instruction::LStore(4..=255)
            | Instruction::FStore(4..=255)
            | Instruction::DStore(4..=255)
            | Instruction::AStore(4..=255)
            | Instruction::Ldc(ConstantIndex(0..=255))
            | Instruction::NewArray(_) => 2,

            Instruction::SiPush(_)
            | Instruction::Ldc(_)
            | Instruction::Ldc2(_) // always wide, unlike `ldc` vs. `ldc_w`
            | Instruction::IInc(0..=255, -128..=127)
            | Instruction::GetStatic(_)
            | Instruction::PutStatic(_)
            | Instruction::GetField(_)
            | Instruction::PutField(_)
            | Instruction::Invoke(InvokeType::Special, _)
            | Instruction::Invoke(InvokeType::Static, _)
            | Instruction::Invoke(InvokeType::Virtual, _)
            | Instruction::New(_)
            | Instruction::ANewArray(_)
            | Instruction::CheckCast(_)
            | Instruction::InstanceOf(_) => 3,

            Instruction::ILoad(_)
            | Instruction::LLoad(_)
            | Instruction::FLoad(_)
            | Instruction::DLoad(_)
            | Instruction::AStore(_)
            | Instruction::IStore(_)
            | Instruction::LStore(_)
            | Instruction::FStore(_)
            | Instruction::DStore(_)
            | Instruction::ALoad(_)
            | Instruction::MultiANewArray(_, _) => 4,

            Instruction::Invoke(InvokeType::Interface(_), _) | Instruction::InvokeDynamic(_) => 5,

            Instruction::IInc(_, _) => 6,
        }
    }
}

impl Serialize for Instruction {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        /* The load/store instructions follow the same pattern:
         *
         *   - short form (0-3) have special bytes
         *   - normal form (0-255) use `iload` plus a byte operand
         *   - wide form (256-65535) use `wide iload` plus two byte operands
         */
        fn serialize_load_or_store<W: WriteBytesExt>(
            idx: u16,
            short_form_start: u8,
            normal_form: u8,
            writer: &mut W,
        ) -> Result<()> {
            match u8::try_from(idx) {
                Ok(n @ 0..=3) => (short_form_start + n).serialize(writer),
                Ok(n) => {
                    normal_form.serialize(writer)?;
                    n.serialize(writer)
                }
                Err(_) => {
                    0xC4u8.serialize(writer)?;
                    normal_form.serialize(writer)?;
                    idx.serialize(writer)
                }
            }
        }

        match self {
            Instruction::Nop => 0x00u8.serialize(writer)?,
            Instruction::AConstNull => 0x01u8.serialize(writer)?,
            Instruction::IConstM1 => 0x02u8.serialize(writer)?,
            Instruction::IConst0 => 0x03u8.serialize(writer)?,
            Instruction::IConst1 => 0x04u8.serialize(writer)?,
            Instruction::IConst2 => 0x05u8.serialize(writer)?,
            Instruction::IConst3 => 0x06u8.serialize(writer)?,
            Instruction::IConst4 => 0x07u8.serialize(writer)?,
            Instruction::IConst5 => 0x08u8.serialize(writer)?,
            Instruction::LConst0 => 0x09u8.serialize(writer)?,
            Instruction::LConst1 => 0x0au8.serialize(writer)?,
            Instruction::FConst0 => 0x0bu8.serialize(writer)?,
            Instruction::FConst1 => 0x0cu8.serialize(writer)?,
            Instruction::FConst2 => 0x0du8.serialize(writer)?,
            Instruction::DConst0 => 0x0eu8.serialize(writer)?,
            Instruction::DConst1 => 0x0fu8.serialize(writer)?,
            Instruction::BiPush(b) => {
                0x10u8.serialize(writer)?;
                b.serialize(writer)?;
            }
            Instruction::SiPush(s) => {
                0x11u8.serialize(writer)?;
                s.serialize(writer)?;
            }
            Instruction::Ldc(ConstantIndex(idx)) => match u8::try_from(*idx) {
                Ok(b) => {
                    0x12u8.serialize(writer)?;
                    b.serialize(writer)?;
                }
                Err(_) => {
                    0x13u8.serialize(writer)?;
                    idx.serialize(writer)?;
                }
            },
            Instruction::Ldc2(ConstantIndex(idx)) => {
                0x14u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::ILoad(idx) => serialize_load_or_store(*idx, 0x1A, 0x15, writer)?,
            Instruction::LLoad(idx) => serialize_load_or_store(*idx, 0x1E, 0x16, writer)?,
            Instruction::FLoad(idx) => serialize_load_or_store(*idx, 0x22, 0x17, writer)?,
            Instruction::DLoad(idx) => serialize_load_or_store(*idx, 0x26, 0x18, writer)?,
            Instruction::ALoad(idx) => serialize_load_or_store(*idx, 0x2A, 0x19, writer)?,
            Instruction::IALoad => 0x2eu8.serialize(writer)?,
            Instruction::LALoad => 0x2fu8.serialize(writer)?,
            Instruction::FALoad => 0x30u8.serialize(writer)?,
            Instruction::DALoad => 0x31u8.serialize(writer)?,
            Instruction::AALoad => 0x32u8.serialize(writer)?,
            Instruction::BALoad => 0x33u8.serialize(writer)?,
            Instruction::CALoad => 0x34u8.serialize(writer)?,
            Instruction::SALoad => 0x35u8.serialize(writer)?,
            Instruction::IStore(idx) => serialize_load_or_store(*idx, 0x3B, 0x36, writer)?,
            Instruction::LStore(idx) => serialize_load_or_store(*idx, 0x3F, 0x37, writer)?,
            Instruction::FStore(idx) => serialize_load_or_store(*idx, 0x43, 0x38, writer)?,
            Instruction::DStore(idx) => serialize_load_or_store(*idx, 0x47, 0x39, writer)?,
            Instruction::AStore(idx) => serialize_load_or_store(*idx, 0x4B, 0x3A, writer)?,
            Instruction::IAStore => 0x4fu8.serialize(writer)?,
            Instruction::LAStore => 0x50u8.serialize(writer)?,
            Instruction::FAStore => 0x51u8.serialize(writer)?,
            Instruction::DAStore => 0x52u8.serialize(writer)?,
            Instruction::AAStore => 0x53u8.serialize(writer)?,
            Instruction::BAStore => 0x54u8.serialize(writer)?,
            Instruction::CAStore => 0x55u8.serialize(writer)?,
            Instruction::SAStore => 0x56u8.serialize(writer)?,
            Instruction::Pop => 0x57u8.serialize(writer)?,
            Instruction::Pop2 => 0x58u8.serialize(writer)?,
            Instruction::Dup => 0x59u8.serialize(writer)?,
            Instruction::DupX1 => 0x5au8.serialize(writer)?,
            Instruction::DupX2 => 0x5bu8.serialize(writer)?,
            Instruction::Dup2 => 0x5cu8.serialize(writer)?,
            Instruction::Dup2X1 => 0x5du8.serialize(writer)?,
            Instruction::Dup2X2 => 0x5eu8.serialize(writer)?,
            Instruction::Swap => 0x5fu8.serialize(writer)?,
            Instruction::IAdd => 0x60u8.serialize(writer)?,
            Instruction::LAdd => 0x61u8.serialize(writer)?,
            Instruction::FAdd => 0x62u8.serialize(writer)?,
            Instruction::DAdd => 0x63u8.serialize(writer)?,
            Instruction::ISub => 0x64u8.serialize(writer)?,
            Instruction::LSub => 0x65u8.serialize(writer)?,
            Instruction::FSub => 0x66u8.serialize(writer)?,
            Instruction::DSub => 0x67u8.serialize(writer)?,
            Instruction::IMul => 0x68u8.serialize(writer)?,
            Instruction::LMul => 0x69u8.serialize(writer)?,
            Instruction::FMul => 0x6au8.serialize(writer)?,
            Instruction::DMul => 0x6bu8.serialize(writer)?,
            Instruction::IDiv => 0x6cu8.serialize(writer)?,
            Instruction::LDiv => 0x6du8.serialize(writer)?,
            Instruction::FDiv => 0x6eu8.serialize(writer)?,
            Instruction::DDiv => 0x6fu8.serialize(writer)?,
            Instruction::IRem => 0x70u8.serialize(writer)?,
            Instruction::LRem => 0x71u8.serialize(writer)?,
            Instruction::FRem => 0x72u8.serialize(writer)?,
            Instruction::DRem => 0x73u8.serialize(writer)?,
            Instruction::INeg => 0x74u8.serialize(writer)?,
            Instruction::LNeg => 0x75u8.serialize(writer)?,
            Instruction::FNeg => 0x76u8.serialize(writer)?,
            Instruction::DNeg => 0x77u8.serialize(writer)?,
            Instruction::ISh(ShiftType::Left) => 0x78u8.serialize(writer)?,
            Instruction::LSh(ShiftType::Left) => 0x79u8.serialize(writer)?,
            Instruction::ISh(ShiftType::ArithmeticRight) => 0x7au8.serialize(writer)?,
            Instruction::LSh(ShiftType::ArithmeticRight) => 0x7bu8.serialize(writer)?,
            Instruction::ISh(ShiftType::LogicalRight) => 0x7cu8.serialize(writer)?,
            Instruction::LSh(ShiftType::LogicalRight) => 0x7du8.serialize(writer)?,
            Instruction::IAnd => 0x7eu8.serialize(writer)?,
            Instruction::LAnd => 0x7fu8.serialize(writer)?,
            Instruction::IOr => 0x80u8.serialize(writer)?,
            Instruction::LOr => 0x81u8.serialize(writer)?,
            Instruction::IXor => 0x82u8.serialize(writer)?,
            Instruction::LXor => 0x83u8.serialize(writer)?,
            Instruction::IInc(idx, diff) => match (u8::try_from(*idx), i8::try_from(*diff)) {
                (Ok(b), Ok(d)) => {
                    0x84u8.serialize(writer)?;
                    b.serialize(writer)?;
                    d.serialize(writer)?;
                }
                _ => {
                    0xc4u8.serialize(writer)?;
                    0x84u8.serialize(writer)?;
                    idx.serialize(writer)?;
                    diff.serialize(writer)?;
                }
            },
            Instruction::I2L => 0x85u8.serialize(writer)?,
            Instruction::I2F => 0x86u8.serialize(writer)?,
            Instruction::I2D => 0x87u8.serialize(writer)?,
            Instruction::L2I => 0x88u8.serialize(writer)?,
            Instruction::L2F => 0x89u8.serialize(writer)?,
            Instruction::L2D => 0x8au8.serialize(writer)?,
            Instruction::F2I => 0x8bu8.serialize(writer)?,
            Instruction::F2L => 0x8cu8.serialize(writer)?,
            Instruction::F2D => 0x8du8.serialize(writer)?,
            Instruction::D2I => 0x8eu8.serialize(writer)?,
            Instruction::D2L => 0x8fu8.serialize(writer)?,
            Instruction::D2F => 0x90u8.serialize(writer)?,
            Instruction::I2B => 0x91u8.serialize(writer)?,
            Instruction::I2C => 0x92u8.serialize(writer)?,
            Instruction::I2S => 0x93u8.serialize(writer)?,
            Instruction::LCmp => 0x94u8.serialize(writer)?,
            Instruction::FCmp(CompareMode::L) => 0x95u8.serialize(writer)?,
            Instruction::FCmp(CompareMode::G) => 0x96u8.serialize(writer)?,
            Instruction::DCmp(CompareMode::L) => 0x97u8.serialize(writer)?,
            Instruction::DCmp(CompareMode::G) => 0x98u8.serialize(writer)?,
            Instruction::GetStatic(idx) => {
                0xb2u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::PutStatic(idx) => {
                0xb3u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::GetField(idx) => {
                0xb4u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::PutField(idx) => {
                0xb5u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::Invoke(InvokeType::Virtual, idx) => {
                0xb6u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::Invoke(InvokeType::Special, idx) => {
                0xb7u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::Invoke(InvokeType::Static, idx) => {
                0xb8u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::Invoke(InvokeType::Interface(cnt), idx) => {
                0xb9u8.serialize(writer)?;
                idx.serialize(writer)?;
                cnt.serialize(writer)?;
                0u8.serialize(writer)?;
            }
            Instruction::InvokeDynamic(idx) => {
                0xbau8.serialize(writer)?;
                idx.serialize(writer)?;
                0u16.serialize(writer)?;
            }
            Instruction::New(idx) => {
                0xbbu8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::NewArray(basetype) => {
                let atype: u8 = match basetype {
                    BaseType::Boolean => 4,
                    BaseType::Char => 5,
                    BaseType::Float => 6,
                    BaseType::Double => 7,
                    BaseType::Byte => 8,
                    BaseType::Short => 9,
                    BaseType::Int => 10,
                    BaseType::Long => 11,
                };
                0xbcu8.serialize(writer)?;
                atype.serialize(writer)?;
            }
            Instruction::ANewArray(idx) => {
                0xbdu8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::ArrayLength => 0xbeu8.serialize(writer)?,
            Instruction::CheckCast(idx) => {
                0xc0u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::InstanceOf(idx) => {
                0xc1u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::MonitorEnter => 0xc2u8.serialize(writer)?,
            Instruction::MonitorExit => 0xc3u8.serialize(writer)?,
            Instruction::MultiANewArray(idx, dimensions) => {
                0xc5u8.serialize(writer)?;
                idx.serialize(writer)?;
                dimensions.serialize(writer)?;
            }
        }
        Ok(())
    }
}

/// Branching JVM bytecode instruction
///
/// The type parameters let us abstract over the representation of
///
///   * __regular relative jump targets__: used in almost all branch instructions
///   * __wide relative jump targets__: used in `goto_w` and the switches
///   * __fallthrough targets__: used in all instructions that fall through
///
/// Shortly before the final serialization step, regular jump targets become signed 16-bit offsets
/// into the code array, wide jump targets become signed 32-bit offsets, and fallthrough targets
/// are replaced with unit (they are implicit from the order of the blocks).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BranchInstruction<Lbl, LblWide, LblNext> {
    If(OrdComparison, Lbl, LblNext), // covers `ifeq`, `ifne`, `iflt`, `ifge`, `ifgt`, `ifle`
    IfICmp(OrdComparison, Lbl, LblNext), // covers `if_icmpeq` through `if_icmple`
    IfACmp(EqComparison, Lbl, LblNext), // covers `if_acmpeq`, `if_acmpne`
    Goto(Lbl),
    GotoW(LblWide),
    TableSwitch {
        /// `default` must be at a multiple of four bytes from the start of the current method, so
        /// there must be a 0-3 inclusive byte padding
        padding: u8,

        /// Jump target if the argument is less than `low` or greater than
        /// `low + targets.len() - 1`
        default: LblWide,

        /// Value associated with the first jump target
        low: i32,

        /// Jump targets
        targets: Vec<LblWide>,
    },
    LookupSwitch {
        /// Same padding rule as `TableSwitch`
        padding: u8,

        /// Jump target if there is no matching key
        default: LblWide,

        /// Jump targets (sorted so that the keys are ascending)
        targets: Vec<(i32, LblWide)>,
    },
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,
    AThrow,
    IfNull(EqComparison, Lbl, LblNext), // covers `ifnull`, `ifnonnull`

    /// Synthetic marker used to explicitly end a block which just falls through to the next
    /// block. In the JVM, this is implicit when a block ends without a jump; making it explicit
    /// lets us enforce that all blocks end in a branch instruction.
    FallThrough(LblNext),
}

impl<Lbl: Copy, LblWide: Copy, LblNext: Copy> BranchInstruction<Lbl, LblWide, LblNext> {
    /// If the instruction can fall through to the next block, get that next block
    pub fn fallthrough_target(&self) -> Option<LblNext> {
        match self {
            BranchInstruction::Goto(_)
            | BranchInstruction::GotoW(_)
            | BranchInstruction::TableSwitch { .. }
            | BranchInstruction::LookupSwitch { .. }
            | BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow => None,

            BranchInstruction::If(_, _, lbl)
            | BranchInstruction::IfICmp(_, _, lbl)
            | BranchInstruction::IfACmp(_, _, lbl)
            | BranchInstruction::IfNull(_, _, lbl)
            | BranchInstruction::FallThrough(lbl) => Some(*lbl),
        }
    }

    /// If the instruction can jump to another block (non-fallthrough), get that block
    pub fn jump_targets(&self) -> JumpTargets<Lbl, LblWide> {
        match self {
            BranchInstruction::If(_, lbl, _)
            | BranchInstruction::IfICmp(_, lbl, _)
            | BranchInstruction::IfACmp(_, lbl, _)
            | BranchInstruction::IfNull(_, lbl, _)
            | BranchInstruction::Goto(lbl) => JumpTargets::Regular(*lbl),
            BranchInstruction::GotoW(lbl_w) => JumpTargets::Wide(*lbl_w),
            BranchInstruction::TableSwitch {
                default, targets, ..
            } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().copied());
                JumpTargets::WideMany(ts)
            }
            BranchInstruction::LookupSwitch {
                default, targets, ..
            } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().map(|(_, target)| *target));
                JumpTargets::WideMany(ts)
            }
            BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow
            | BranchInstruction::FallThrough(_) => JumpTargets::None,
        }
    }

    /// Number of operand stack slots popped before branching
    pub fn stack_pops(&self) -> usize {
        match self {
            BranchInstruction::If(_, _, _) | BranchInstruction::IfNull(_, _, _) => 1,
            BranchInstruction::IfICmp(_, _, _) | BranchInstruction::IfACmp(_, _, _) => 2,
            BranchInstruction::TableSwitch { .. } | BranchInstruction::LookupSwitch { .. } => 1,
            BranchInstruction::IReturn
            | BranchInstruction::FReturn
            | BranchInstruction::AReturn
            | BranchInstruction::AThrow => 1,
            BranchInstruction::LReturn | BranchInstruction::DReturn => 2,
            BranchInstruction::Goto(_)
            | BranchInstruction::GotoW(_)
            | BranchInstruction::Return
            | BranchInstruction::FallThrough(_) => 0,
        }
    }

    pub fn map_labels<Lbl2, LblWide2, LblNext2>(
        &self,
        map_label: impl FnOnce(&Lbl) -> Lbl2,
        map_wide_label: impl Fn(&LblWide) -> LblWide2,
        map_next_label: impl FnOnce(&LblNext) -> LblNext2,
    ) -> BranchInstruction<Lbl2, LblWide2, LblNext2> {
        use BranchInstruction::*;

        match self {
            If(op, lbl, next) => If(*op, map_label(lbl), map_next_label(next)),
            IfICmp(op, lbl, next) => IfICmp(*op, map_label(lbl), map_next_label(next)),
            IfACmp(op, lbl, next) => IfACmp(*op, map_label(lbl), map_next_label(next)),
            Goto(lbl) => Goto(map_label(lbl)),
            GotoW(wide) => GotoW(map_wide_label(wide)),
            TableSwitch {
                padding,
                default,
                low,
                targets,
            } => TableSwitch {
                padding: *padding,
                default: map_wide_label(default),
                low: *low,
                targets: targets.iter().map(map_wide_label).collect(),
            },
            LookupSwitch {
                padding,
                default,
                targets,
            } => LookupSwitch {
                padding: *padding,
                default: map_wide_label(default),
                targets: targets
                    .iter()
                    .map(|(key, lbl)| (*key, map_wide_label(lbl)))
                    .collect(),
            },
            IReturn => IReturn,
            LReturn => LReturn,
            FReturn => FReturn,
            DReturn => DReturn,
            AReturn => AReturn,
            Return => Return,
            AThrow => AThrow,
            IfNull(op, lbl, next) => IfNull(*op, map_label(lbl), map_next_label(next)),
            FallThrough(next) => FallThrough(map_next_label(next)),
        }
    }
}

impl<Lbl, LblWide, LblFall> Width for BranchInstruction<Lbl, LblWide, LblFall> {
    fn width(&self) -> usize {
        match self {
            BranchInstruction::FallThrough(_) => 0,

            BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow => 1,

            BranchInstruction::Goto(_)
            | BranchInstruction::If(_, _, _)
            | BranchInstruction::IfICmp(_, _, _)
            | BranchInstruction::IfACmp(_, _, _)
            | BranchInstruction::IfNull(_, _, _) => 3,

            BranchInstruction::GotoW(_) => 5,

            BranchInstruction::TableSwitch {
                padding, targets, ..
            } => 1 + *padding as usize + 4 * (3 + targets.len()),

            BranchInstruction::LookupSwitch {
                padding, targets, ..
            } => 1 + *padding as usize + 8 * (1 + targets.len()),
        }
    }
}

impl Serialize for BranchInstruction<i16, i32, ()> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        match self {
            BranchInstruction::If(comp, lbl, ()) => {
                let opcode: u8 = match comp {
                    OrdComparison::EQ => 0x99,
                    OrdComparison::NE => 0x9a,
                    OrdComparison::LT => 0x9b,
                    OrdComparison::GE => 0x9c,
                    OrdComparison::GT => 0x9d,
                    OrdComparison::LE => 0x9e,
                };
                opcode.serialize(writer)?;
                lbl.serialize(writer)?;
            }
            BranchInstruction::IfICmp(comp, lbl, ()) => {
                let opcode: u8 = match comp {
                    OrdComparison::EQ => 0x9f,
                    OrdComparison::NE => 0xa0,
                    OrdComparison::LT => 0xa1,
                    OrdComparison::GE => 0xa2,
                    OrdComparison::GT => 0xa3,
                    OrdComparison::LE => 0xa4,
                };
                opcode.serialize(writer)?;
                lbl.serialize(writer)?;
            }
            BranchInstruction::IfACmp(comp, lbl, ()) => {
                let opcode: u8 = match comp {
                    EqComparison::EQ => 0xa5,
                    EqComparison::NE => 0xa6,
                };
                opcode.serialize(writer)?;
                lbl.serialize(writer)?;
            }
            BranchInstruction::Goto(lbl) => {
                0xa7u8.serialize(writer)?;
                lbl.serialize(writer)?;
            }
            BranchInstruction::GotoW(lbl_ext) => {
                0xc8u8.serialize(writer)?;
                lbl_ext.serialize(writer)?;
            }
            BranchInstruction::TableSwitch {
                padding,
                default,
                low,
                targets,
            } => {
                0xaau8.serialize(writer)?;
                for _ in 0..*padding {
                    0x00u8.serialize(writer)?;
                }
                default.serialize(writer)?;
                low.serialize(writer)?;
                (low + targets.len() as i32 - 1).serialize(writer)?;
                for target in targets {
                    target.serialize(writer)?;
                }
            }
            BranchInstruction::LookupSwitch {
                padding,
                default,
                targets,
            } => {
                0xabu8.serialize(writer)?;
                for _ in 0..*padding {
                    0x00u8.serialize(writer)?;
                }
                default.serialize(writer)?;
                (targets.len() as i32).serialize(writer)?;
                for (key, target) in targets {
                    key.serialize(writer)?;
                    target.serialize(writer)?;
                }
            }
            BranchInstruction::IReturn => 0xacu8.serialize(writer)?,
            BranchInstruction::LReturn => 0xadu8.serialize(writer)?,
            BranchInstruction::FReturn => 0xaeu8.serialize(writer)?,
            BranchInstruction::DReturn => 0xafu8.serialize(writer)?,
            BranchInstruction::AReturn => 0xb0u8.serialize(writer)?,
            BranchInstruction::Return => 0xb1u8.serialize(writer)?,
            BranchInstruction::AThrow => 0xbfu8.serialize(writer)?,
            BranchInstruction::IfNull(comp, lbl, ()) => {
                let opcode: u8 = match comp {
                    EqComparison::EQ => 0xc6,
                    EqComparison::NE => 0xc7,
                };
                opcode.serialize(writer)?;
                lbl.serialize(writer)?;
            }
            BranchInstruction::FallThrough(()) => (),
        }
        Ok(())
    }
}

/// One decoded instruction: either straight-line or block-ending
///
/// Branches come out with their encoded relative offsets (relative to the start of the opcode).
#[derive(Debug)]
pub enum DecodedInstruction {
    Basic(Instruction),
    Branch(BranchInstruction<i16, i32, ()>),
}

impl DecodedInstruction {
    /// Decode the instruction starting at the cursor position
    ///
    /// `code_start` is the absolute cursor position at which the code array begins; switch
    /// padding is determined by the opcode's offset relative to it.
    pub fn parse(
        cursor: &mut ByteCursor,
        code_start: usize,
    ) -> std::result::Result<DecodedInstruction, FormatError> {
        use DecodedInstruction::{Basic, Branch};

        fn class_index(cursor: &mut ByteCursor) -> std::result::Result<ClassConstantIndex, FormatError> {
            Ok(ClassConstantIndex(ConstantIndex(cursor.u16()?)))
        }
        fn field_index(cursor: &mut ByteCursor) -> std::result::Result<FieldRefConstantIndex, FormatError> {
            Ok(FieldRefConstantIndex(ConstantIndex(cursor.u16()?)))
        }
        fn method_index(cursor: &mut ByteCursor) -> std::result::Result<MethodRefConstantIndex, FormatError> {
            Ok(MethodRefConstantIndex(ConstantIndex(cursor.u16()?)))
        }

        let opcode_offset = cursor.position() - code_start;
        let opcode = cursor.u8()?;
        let decoded = match opcode {
            0x00 => Basic(Instruction::Nop),
            0x01 => Basic(Instruction::AConstNull),
            0x02 => Basic(Instruction::IConstM1),
            0x03 => Basic(Instruction::IConst0),
            0x04 => Basic(Instruction::IConst1),
            0x05 => Basic(Instruction::IConst2),
            0x06 => Basic(Instruction::IConst3),
            0x07 => Basic(Instruction::IConst4),
            0x08 => Basic(Instruction::IConst5),
            0x09 => Basic(Instruction::LConst0),
            0x0a => Basic(Instruction::LConst1),
            0x0b => Basic(Instruction::FConst0),
            0x0c => Basic(Instruction::FConst1),
            0x0d => Basic(Instruction::FConst2),
            0x0e => Basic(Instruction::DConst0),
            0x0f => Basic(Instruction::DConst1),
            0x10 => Basic(Instruction::BiPush(cursor.i8()?)),
            0x11 => Basic(Instruction::SiPush(cursor.i16()?)),
            0x12 => Basic(Instruction::Ldc(ConstantIndex(cursor.u8()? as u16))),
            0x13 => Basic(Instruction::Ldc(ConstantIndex(cursor.u16()?))),
            0x14 => Basic(Instruction::Ldc2(ConstantIndex(cursor.u16()?))),
            0x15 => Basic(Instruction::ILoad(cursor.u8()? as u16)),
            0x16 => Basic(Instruction::LLoad(cursor.u8()? as u16)),
            0x17 => Basic(Instruction::FLoad(cursor.u8()? as u16)),
            0x18 => Basic(Instruction::DLoad(cursor.u8()? as u16)),
            0x19 => Basic(Instruction::ALoad(cursor.u8()? as u16)),
            0x1a..=0x1d => Basic(Instruction::ILoad((opcode - 0x1a) as u16)),
            0x1e..=0x21 => Basic(Instruction::LLoad((opcode - 0x1e) as u16)),
            0x22..=0x25 => Basic(Instruction::FLoad((opcode - 0x22) as u16)),
            0x26..=0x29 => Basic(Instruction::DLoad((opcode - 0x26) as u16)),
            0x2a..=0x2d => Basic(Instruction::ALoad((opcode - 0x2a) as u16)),
            0x2e => Basic(Instruction::IALoad),
            0x2f => Basic(Instruction::LALoad),
            0x30 => Basic(Instruction::FALoad),
            0x31 => Basic(Instruction::DALoad),
            0x32 => Basic(Instruction::AALoad),
            0x33 => Basic(Instruction::BALoad),
            0x34 => Basic(Instruction::CALoad),
            0x35 => Basic(Instruction::SALoad),
            0x36 => Basic(Instruction::IStore(cursor.u8()? as u16)),
            0x37 => Basic(Instruction::LStore(cursor.u8()? as u16)),
            0x38 => Basic(Instruction::FStore(cursor.u8()? as u16)),
            0x39 => Basic(Instruction::DStore(cursor.u8()? as u16)),
            0x3a => Basic(Instruction::AStore(cursor.u8()? as u16)),
            0x3b..=0x3e => Basic(Instruction::IStore((opcode - 0x3b) as u16)),
            0x3f..=0x42 => Basic(Instruction::LStore((opcode - 0x3f) as u16)),
            0x43..=0x46 => Basic(Instruction::FStore((opcode - 0x43) as u16)),
            0x47..=0x4a => Basic(Instruction::DStore((opcode - 0x47) as u16)),
            0x4b..=0x4e => Basic(Instruction::AStore((opcode - 0x4b) as u16)),
            0x4f => Basic(Instruction::IAStore),
            0x50 => Basic(Instruction::LAStore),
            0x51 => Basic(Instruction::FAStore),
            0x52 => Basic(Instruction::DAStore),
            0x53 => Basic(Instruction::AAStore),
            0x54 => Basic(Instruction::BAStore),
            0x55 => Basic(Instruction::CAStore),
            0x56 => Basic(Instruction::SAStore),
            0x57 => Basic(Instruction::Pop),
            0x58 => Basic(Instruction::Pop2),
            0x59 => Basic(Instruction::Dup),
            0x5a => Basic(Instruction::DupX1),
            0x5b => Basic(Instruction::DupX2),
            0x5c => Basic(Instruction::Dup2),
            0x5d => Basic(Instruction::Dup2X1),
            0x5e => Basic(Instruction::Dup2X2),
            0x5f => Basic(Instruction::Swap),
            0x60 => Basic(Instruction::IAdd),
            0x61 => Basic(Instruction::LAdd),
            0x62 => Basic(Instruction::FAdd),
            0x63 => Basic(Instruction::DAdd),
            0x64 => Basic(Instruction::ISub),
            0x65 => Basic(Instruction::LSub),
            0x66 => Basic(Instruction::FSub),
            0x67 => Basic(Instruction::DSub),
            0x68 => Basic(Instruction::IMul),
            0x69 => Basic(Instruction::LMul),
            0x6a => Basic(Instruction::FMul),
            0x6b => Basic(Instruction::DMul),
            0x6c => Basic(Instruction::IDiv),
            0x6d => Basic(Instruction::LDiv),
            0x6e => Basic(Instruction::FDiv),
            0x6f => Basic(Instruction::DDiv),
            0x70 => Basic(Instruction::IRem),
            0x71 => Basic(Instruction::LRem),
            0x72 => Basic(Instruction::FRem),
            0x73 => Basic(Instruction::DRem),
            0x74 => Basic(Instruction::INeg),
            0x75 => Basic(Instruction::LNeg),
            0x76 => Basic(Instruction::FNeg),
            0x77 => Basic(Instruction::DNeg),
            0x78 => Basic(Instruction::ISh(ShiftType::Left)),
            0x79 => Basic(Instruction::LSh(ShiftType::Left)),
            0x7a => Basic(Instruction::ISh(ShiftType::ArithmeticRight)),
            0x7b => Basic(Instruction::LSh(ShiftType::ArithmeticRight)),
            0x7c => Basic(Instruction::ISh(ShiftType::LogicalRight)),
            0x7d => Basic(Instruction::LSh(ShiftType::LogicalRight)),
            0x7e => Basic(Instruction::IAnd),
            0x7f => Basic(Instruction::LAnd),
            0x80 => Basic(Instruction::IOr),
            0x81 => Basic(Instruction::LOr),
            0x82 => Basic(Instruction::IXor),
            0x83 => Basic(Instruction::LXor),
            0x84 => {
                let idx = cursor.u8()? as u16;
                let diff = cursor.i8()? as i16;
                Basic(Instruction::IInc(idx, diff))
            }
            0x85 => Basic(Instruction::I2L),
            0x86 => Basic(Instruction::I2F),
            0x87 => Basic(Instruction::I2D),
            0x88 => Basic(Instruction::L2I),
            0x89 => Basic(Instruction::L2F),
            0x8a => Basic(Instruction::L2D),
            0x8b => Basic(Instruction::F2I),
            0x8c => Basic(Instruction::F2L),
            0x8d => Basic(Instruction::F2D),
            0x8e => Basic(Instruction::D2I),
            0x8f => Basic(Instruction::D2L),
            0x90 => Basic(Instruction::D2F),
            0x91 => Basic(Instruction::I2B),
            0x92 => Basic(Instruction::I2C),
            0x93 => Basic(Instruction::I2S),
            0x94 => Basic(Instruction::LCmp),
            0x95 => Basic(Instruction::FCmp(CompareMode::L)),
            0x96 => Basic(Instruction::FCmp(CompareMode::G)),
            0x97 => Basic(Instruction::DCmp(CompareMode::L)),
            0x98 => Basic(Instruction::DCmp(CompareMode::G)),
            0x99..=0x9e => {
                let comp = match opcode {
                    0x99 => OrdComparison::EQ,
                    0x9a => OrdComparison::NE,
                    0x9b => OrdComparison::LT,
                    0x9c => OrdComparison::GE,
                    0x9d => OrdComparison::GT,
                    _ => OrdComparison::LE,
                };
                Branch(BranchInstruction::If(comp, cursor.i16()?, ()))
            }
            0x9f..=0xa4 => {
                let comp = match opcode {
                    0x9f => OrdComparison::EQ,
                    0xa0 => OrdComparison::NE,
                    0xa1 => OrdComparison::LT,
                    0xa2 => OrdComparison::GE,
                    0xa3 => OrdComparison::GT,
                    _ => OrdComparison::LE,
                };
                Branch(BranchInstruction::IfICmp(comp, cursor.i16()?, ()))
            }
            0xa5 => Branch(BranchInstruction::IfACmp(
                EqComparison::EQ,
                cursor.i16()?,
                (),
            )),
            0xa6 => Branch(BranchInstruction::IfACmp(
                EqComparison::NE,
                cursor.i16()?,
                (),
            )),
            0xa7 => Branch(BranchInstruction::Goto(cursor.i16()?)),
            0xaa => {
                let padding = (3 - opcode_offset % 4) as u8;
                cursor.skip(padding as usize)?;
                let default = cursor.i32()?;
                let low = cursor.i32()?;
                let high = cursor.i32()?;
                if high < low {
                    return Err(FormatError::BadOpcode {
                        opcode,
                        offset: opcode_offset,
                    });
                }
                let count = (high - low + 1) as usize;
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(cursor.i32()?);
                }
                Branch(BranchInstruction::TableSwitch {
                    padding,
                    default,
                    low,
                    targets,
                })
            }
            0xab => {
                let padding = (3 - opcode_offset % 4) as u8;
                cursor.skip(padding as usize)?;
                let default = cursor.i32()?;
                let count = cursor.i32()?.max(0) as usize;
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = cursor.i32()?;
                    targets.push((key, cursor.i32()?));
                }
                Branch(BranchInstruction::LookupSwitch {
                    padding,
                    default,
                    targets,
                })
            }
            0xac => Branch(BranchInstruction::IReturn),
            0xad => Branch(BranchInstruction::LReturn),
            0xae => Branch(BranchInstruction::FReturn),
            0xaf => Branch(BranchInstruction::DReturn),
            0xb0 => Branch(BranchInstruction::AReturn),
            0xb1 => Branch(BranchInstruction::Return),
            0xb2 => Basic(Instruction::GetStatic(field_index(cursor)?)),
            0xb3 => Basic(Instruction::PutStatic(field_index(cursor)?)),
            0xb4 => Basic(Instruction::GetField(field_index(cursor)?)),
            0xb5 => Basic(Instruction::PutField(field_index(cursor)?)),
            0xb6 => Basic(Instruction::Invoke(InvokeType::Virtual, method_index(cursor)?)),
            0xb7 => Basic(Instruction::Invoke(InvokeType::Special, method_index(cursor)?)),
            0xb8 => Basic(Instruction::Invoke(InvokeType::Static, method_index(cursor)?)),
            0xb9 => {
                let method = method_index(cursor)?;
                let count = cursor.u8()?;
                cursor.skip(1)?; // trailing zero byte
                Basic(Instruction::Invoke(InvokeType::Interface(count), method))
            }
            0xba => {
                let indy = InvokeDynamicConstantIndex(ConstantIndex(cursor.u16()?));
                cursor.skip(2)?; // trailing zero bytes
                Basic(Instruction::InvokeDynamic(indy))
            }
            0xbb => Basic(Instruction::New(class_index(cursor)?)),
            0xbc => {
                let basetype = match cursor.u8()? {
                    4 => BaseType::Boolean,
                    5 => BaseType::Char,
                    6 => BaseType::Float,
                    7 => BaseType::Double,
                    8 => BaseType::Byte,
                    9 => BaseType::Short,
                    10 => BaseType::Int,
                    11 => BaseType::Long,
                    _ => {
                        return Err(FormatError::BadOpcode {
                            opcode,
                            offset: opcode_offset,
                        })
                    }
                };
                Basic(Instruction::NewArray(basetype))
            }
            0xbd => Basic(Instruction::ANewArray(class_index(cursor)?)),
            0xbe => Basic(Instruction::ArrayLength),
            0xbf => Branch(BranchInstruction::AThrow),
            0xc0 => Basic(Instruction::CheckCast(class_index(cursor)?)),
            0xc1 => Basic(Instruction::InstanceOf(class_index(cursor)?)),
            0xc2 => Basic(Instruction::MonitorEnter),
            0xc3 => Basic(Instruction::MonitorExit),
            0xc4 => match cursor.u8()? {
                0x15 => Basic(Instruction::ILoad(cursor.u16()?)),
                0x16 => Basic(Instruction::LLoad(cursor.u16()?)),
                0x17 => Basic(Instruction::FLoad(cursor.u16()?)),
                0x18 => Basic(Instruction::DLoad(cursor.u16()?)),
                0x19 => Basic(Instruction::ALoad(cursor.u16()?)),
                0x36 => Basic(Instruction::IStore(cursor.u16()?)),
                0x37 => Basic(Instruction::LStore(cursor.u16()?)),
                0x38 => Basic(Instruction::FStore(cursor.u16()?)),
                0x39 => Basic(Instruction::DStore(cursor.u16()?)),
                0x3a => Basic(Instruction::AStore(cursor.u16()?)),
                0x84 => {
                    let idx = cursor.u16()?;
                    let diff = cursor.i16()?;
                    Basic(Instruction::IInc(idx, diff))
                }
                _ => {
                    return Err(FormatError::BadOpcode {
                        opcode,
                        offset: opcode_offset,
                    })
                }
            },
            0xc5 => {
                let class = class_index(cursor)?;
                let dimensions = cursor.u8()?;
                Basic(Instruction::MultiANewArray(class, dimensions))
            }
            0xc6 => Branch(BranchInstruction::IfNull(
                EqComparison::EQ,
                cursor.i16()?,
                (),
            )),
            0xc7 => Branch(BranchInstruction::IfNull(
                EqComparison::NE,
                cursor.i16()?,
                (),
            )),
            0xc8 => Branch(BranchInstruction::GotoW(cursor.i32()?)),

            // `jsr`/`ret`/`jsr_w` were retired with classfile version 50; the version floor
            // rewrite never has to preserve them
            opcode => {
                return Err(FormatError::BadOpcode {
                    opcode,
                    offset: opcode_offset,
                })
            }
        };
        Ok(decoded)
    }
}

/// Non-fallthrough jump target of a `BranchInstruction`
pub enum JumpTargets<Lbl, LblWide> {
    None,
    Regular(Lbl),
    Wide(LblWide),
    WideMany(Vec<LblWide>),
}

impl<A> JumpTargets<A, A> {
    /// If all targets are the same type, extract them
    pub fn targets(&self) -> &[A] {
        match self {
            JumpTargets::None => &[],
            JumpTargets::Regular(a) => std::slice::from_ref(a),
            JumpTargets::Wide(a) => std::slice::from_ref(a),
            JumpTargets::WideMany(a_many) => a_many,
        }
    }
}

/// Possible bit shifts
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ShiftType {
    Left,
    LogicalRight,
    ArithmeticRight,
}

/// Comparison modes for floating point
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum CompareMode {
    /// -1 on NaN
    L,

    /// 1 on NaN
    G,
}

/// Binary comparison operators available for `int` branches
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OrdComparison {
    EQ,
    GE,
    GT,
    LE,
    LT,
    NE,
}

impl Not for OrdComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            OrdComparison::EQ => OrdComparison::NE,
            OrdComparison::GE => OrdComparison::LT,
            OrdComparison::GT => OrdComparison::LE,
            OrdComparison::LE => OrdComparison::GT,
            OrdComparison::LT => OrdComparison::GE,
            OrdComparison::NE => OrdComparison::EQ,
        }
    }
}

/// Equality/inequality comparison operators
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum EqComparison {
    EQ,
    NE,
}

impl Not for EqComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            EqComparison::EQ => EqComparison::NE,
            EqComparison::NE => EqComparison::EQ,
        }
    }
}

/// Type of method to invoke
///
/// Note: `InvokeDynamic` is kept separate because the constant argument it expects is not a
/// `Constant::MethodRef`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum InvokeType {
    Virtual,
    Special,
    Static,
    Interface(u8), // `count` is of total argument slots, where `long`/`double` count for 2
}

#[cfg(test)]
mod test {
    use super::*;

    fn encoded(insn: &Instruction) -> Vec<u8> {
        let mut bytes = vec![];
        insn.serialize(&mut bytes).unwrap();
        assert_eq!(bytes.len(), insn.width());
        bytes
    }

    #[test]
    fn load_store_forms() {
        assert_eq!(encoded(&Instruction::ILoad(0)), vec![0x1a]);
        assert_eq!(encoded(&Instruction::ILoad(3)), vec![0x1d]);
        assert_eq!(encoded(&Instruction::ILoad(4)), vec![0x15, 4]);
        assert_eq!(encoded(&Instruction::ILoad(255)), vec![0x15, 255]);
        assert_eq!(encoded(&Instruction::ILoad(256)), vec![0xc4, 0x15, 1, 0]);
        assert_eq!(encoded(&Instruction::AStore(2)), vec![0x4d]);
        assert_eq!(encoded(&Instruction::AStore(300)), vec![0xc4, 0x3a, 1, 44]);
    }

    #[test]
    fn ldc_forms() {
        assert_eq!(encoded(&Instruction::Ldc(ConstantIndex(7))), vec![0x12, 7]);
        assert_eq!(
            encoded(&Instruction::Ldc(ConstantIndex(256))),
            vec![0x13, 1, 0]
        );
        assert_eq!(
            encoded(&Instruction::Ldc2(ConstantIndex(7))),
            vec![0x14, 0, 7]
        );
    }

    #[test]
    fn iinc_forms() {
        assert_eq!(encoded(&Instruction::IInc(3, -1)), vec![0x84, 3, 0xff]);
        assert_eq!(
            encoded(&Instruction::IInc(300, 5)),
            vec![0xc4, 0x84, 1, 44, 0, 5]
        );
    }

    #[test]
    fn basic_instructions_round_trip() {
        let instructions = vec![
            Instruction::Nop,
            Instruction::AConstNull,
            Instruction::BiPush(-5),
            Instruction::SiPush(1234),
            Instruction::ILoad(130),
            Instruction::LStore(70),
            Instruction::IInc(5, -10),
            Instruction::Invoke(
                InvokeType::Interface(2),
                MethodRefConstantIndex(ConstantIndex(17)),
            ),
            Instruction::InvokeDynamic(InvokeDynamicConstantIndex(ConstantIndex(8))),
            Instruction::NewArray(BaseType::Double),
            Instruction::MultiANewArray(ClassConstantIndex(ConstantIndex(4)), 2),
            Instruction::MonitorEnter,
        ];

        let mut bytes = vec![];
        for insn in &instructions {
            insn.serialize(&mut bytes).unwrap();
        }

        let mut cursor = ByteCursor::new(&bytes);
        for insn in &instructions {
            match DecodedInstruction::parse(&mut cursor, 0).unwrap() {
                DecodedInstruction::Basic(decoded) => assert_eq!(decoded, *insn),
                DecodedInstruction::Branch(other) => panic!("decoded branch {:?}", other),
            }
        }
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn branch_round_trip_with_switch_padding() {
        // A one byte instruction before the switch, so the opcode lands at offset 1 and the
        // switch needs 2 bytes of padding
        let mut bytes = vec![];
        Instruction::Nop.serialize(&mut bytes).unwrap();
        let switch: BranchInstruction<i16, i32, ()> = BranchInstruction::TableSwitch {
            padding: 2,
            default: 40,
            low: -1,
            targets: vec![12, 16, 20],
        };
        switch.serialize(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 1 + switch.width());

        let mut cursor = ByteCursor::new(&bytes);
        cursor.skip(1).unwrap();
        match DecodedInstruction::parse(&mut cursor, 0).unwrap() {
            DecodedInstruction::Branch(decoded) => assert_eq!(decoded, switch),
            DecodedInstruction::Basic(other) => panic!("decoded basic {:?}", other),
        }
    }

    #[test]
    fn goto_w_opcode() {
        let wide: BranchInstruction<i16, i32, ()> = BranchInstruction::GotoW(70000);
        let mut bytes = vec![];
        wide.serialize(&mut bytes).unwrap();
        assert_eq!(bytes[0], 0xc8);
        assert_eq!(bytes.len(), 5);
    }

    #[test]
    fn comparison_inversion() {
        assert_eq!(!OrdComparison::LT, OrdComparison::GE);
        assert_eq!(!OrdComparison::EQ, OrdComparison::NE);
        assert_eq!(!EqComparison::NE, EqComparison::EQ);
    }
}
