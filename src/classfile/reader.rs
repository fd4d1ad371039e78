//! Event-based traversal of a parsed classfile.
//!
//! [`ClassReader`] parses a classfile eagerly and then replays it to a [`ClassStage`] as a stream
//! of events. Method bodies are streamed in one of two shapes, chosen per method by the stage:
//! untouched (the whole `Code` attribute is handed over as an opaque attribute, cheap and
//! byte-preserving) or decoded into labels, instructions, and branches that the stage can splice
//! and feed back through a [`CodeBuilder`](crate::flow::CodeBuilder).
//!
//! On the decoded path the bytecode is walked twice: the first pass decodes every instruction and
//! collects the offsets that need labels (branch targets, fallthrough points, handler boundaries,
//! line starts), validating that every target lands on an instruction start; the second pass
//! emits the events. The original `StackMapTable` and local variable tables are dropped on this
//! path, since the builder recomputes frames for whatever the stage ends up emitting.

use crate::classfile::attribute::{Attribute, AttributeLike, Code, LineNumberTable, Signature};
use crate::classfile::binary::ByteCursor;
use crate::classfile::constants::{ConstantIndex, ConstantPool, Utf8ConstantIndex};
use crate::classfile::instructions::{BranchInstruction, DecodedInstruction, Instruction};
use crate::classfile::{ClassAccessFlags, ClassFile, FieldAccessFlags, MethodAccessFlags, Version};
use crate::errors::{Error, FormatError};
use crate::flow::Label;
use crate::util::Width;
use std::collections::HashSet;

/// How a stage wants one method body delivered
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum CodeDisposition {
    /// Hand the `Code` attribute over untouched
    Raw,

    /// Decode the body into labels, instructions, and branches
    Decoded,
}

/// Receiver for the event stream of one classfile
pub trait ClassStage {
    /// Decide how the body of this method should be delivered
    fn code_disposition(
        &self,
        name: &str,
        descriptor: &str,
        access_flags: MethodAccessFlags,
    ) -> CodeDisposition;

    fn receive(&mut self, event: ClassEvent) -> Result<(), Error>;
}

pub enum ClassEvent<'a> {
    Start {
        version: Version,
        access_flags: ClassAccessFlags,
        this_class: &'a str,
        super_class: Option<&'a str>,
        interfaces: Vec<&'a str>,
    },
    Field {
        access_flags: FieldAccessFlags,
        name: &'a str,
        descriptor: &'a str,
        attributes: &'a [Attribute],
    },
    MethodStart {
        access_flags: MethodAccessFlags,
        name: &'a str,
        descriptor: &'a str,

        /// Generic signature, when the method carries one
        signature: Option<&'a str>,
    },
    Code(CodeEvent<'a>),

    /// Non-`Code` method attribute (also the whole `Code` attribute for `Raw` methods)
    MethodAttribute(&'a Attribute),
    MethodEnd,
    ClassAttribute(&'a Attribute),
    End,
}

pub enum CodeEvent<'a> {
    Start {
        max_stack: u16,
        max_locals: u16,

        /// The complete original `Code` attribute, kept around so stages can fall back to a
        /// verbatim copy (eg. when a rewritten body overflows the code size limit)
        raw: &'a Attribute,
    },
    Label(Label),
    Instruction(Instruction),
    Branch(BranchInstruction<Label, Label, Label>),
    Handler {
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&'a str>,
    },
    LineNumber(Label, u16),
    End,
}

/// Eagerly parsed classfile, ready to be replayed as events
pub struct ClassReader {
    class: ClassFile,
}

impl ClassReader {
    pub fn parse(bytes: &[u8]) -> Result<ClassReader, Error> {
        Ok(ClassReader {
            class: ClassFile::parse(bytes)?,
        })
    }

    pub fn class(&self) -> &ClassFile {
        &self.class
    }

    /// Replay the classfile to a stage
    pub fn accept<S: ClassStage>(&self, stage: &mut S) -> Result<(), Error> {
        let class = &self.class;
        let constants = &class.constants;

        let this_class = constants.class_name(class.this_class)?;
        let super_class = match class.super_class {
            None => None,
            Some(index) => Some(constants.class_name(index)?),
        };
        let mut interfaces = Vec::with_capacity(class.interfaces.len());
        for interface in &class.interfaces {
            interfaces.push(constants.class_name(*interface)?);
        }
        stage.receive(ClassEvent::Start {
            version: class.version,
            access_flags: class.access_flags,
            this_class,
            super_class,
            interfaces,
        })?;

        for field in &class.fields {
            stage.receive(ClassEvent::Field {
                access_flags: field.access_flags,
                name: constants.utf8(field.name)?,
                descriptor: constants.utf8(field.descriptor)?,
                attributes: &field.attributes,
            })?;
        }

        for method in &class.methods {
            let name = constants.utf8(method.name)?;
            let descriptor = constants.utf8(method.descriptor)?;
            let mut signature = None;
            for attribute in &method.attributes {
                if attribute.name(constants)? == Signature::NAME {
                    let mut cursor = ByteCursor::new(&attribute.info);
                    let index = Utf8ConstantIndex(ConstantIndex(cursor.u16()?));
                    signature = Some(constants.utf8(index)?);
                }
            }
            stage.receive(ClassEvent::MethodStart {
                access_flags: method.access_flags,
                name,
                descriptor,
                signature,
            })?;

            for attribute in &method.attributes {
                if attribute.name(constants)? == Code::NAME {
                    match stage.code_disposition(name, descriptor, method.access_flags) {
                        CodeDisposition::Raw => {
                            stage.receive(ClassEvent::MethodAttribute(attribute))?;
                        }
                        CodeDisposition::Decoded => {
                            emit_code_events(constants, attribute, stage)?;
                        }
                    }
                } else {
                    stage.receive(ClassEvent::MethodAttribute(attribute))?;
                }
            }
            stage.receive(ClassEvent::MethodEnd)?;
        }

        for attribute in &class.attributes {
            stage.receive(ClassEvent::ClassAttribute(attribute))?;
        }
        stage.receive(ClassEvent::End)
    }
}

fn emit_code_events<S: ClassStage>(
    constants: &ConstantPool,
    attribute: &Attribute,
    stage: &mut S,
) -> Result<(), Error> {
    let mut cursor = ByteCursor::new(&attribute.info);
    let code = Code::parse(&mut cursor)?;
    if cursor.remaining() != 0 {
        return Err(FormatError::BadAttributeLength {
            attribute: Code::NAME.to_owned(),
        }
        .into());
    }

    let bytes = &code.code_array.0;
    let code_length = bytes.len();

    // First pass: decode everything and find the offsets that need labels
    let mut decoded: Vec<(usize, DecodedInstruction)> = vec![];
    let mut starts: HashSet<usize> = HashSet::new();
    let mut labelled: HashSet<usize> = HashSet::new();
    {
        let mut cursor = ByteCursor::new(bytes);
        while cursor.remaining() > 0 {
            let offset = cursor.position();
            let insn = DecodedInstruction::parse(&mut cursor, 0)?;
            if let DecodedInstruction::Branch(branch) = &insn {
                if branch.fallthrough_target().is_some() {
                    labelled.insert(cursor.position());
                }
            }
            starts.insert(offset);
            decoded.push((offset, insn));
        }
    }

    for (offset, insn) in &decoded {
        if let DecodedInstruction::Branch(branch) = insn {
            let absolute = branch.map_labels(
                |relative| *offset as isize + *relative as isize,
                |relative| *offset as isize + *relative as isize,
                |_| (),
            );
            for target in absolute.jump_targets().targets() {
                if *target < 0 || !starts.contains(&(*target as usize)) {
                    return Err(FormatError::BadBranchTarget {
                        offset: *offset,
                        target: (*target).max(0) as usize,
                    }
                    .into());
                }
                labelled.insert(*target as usize);
            }
        }
    }

    for handler in &code.exception_table {
        for pc in [handler.start_pc.0 as usize, handler.handler_pc.0 as usize] {
            if !starts.contains(&pc) {
                return Err(FormatError::BadBranchTarget {
                    offset: pc,
                    target: pc,
                }
                .into());
            }
            labelled.insert(pc);
        }
        let end = handler.end_pc.0 as usize;
        if !starts.contains(&end) && end != code_length {
            return Err(FormatError::BadBranchTarget {
                offset: end,
                target: end,
            }
            .into());
        }
        labelled.insert(end);
    }

    let mut line_numbers: Vec<(u16, u16)> = vec![];
    for code_attribute in &code.attributes {
        if code_attribute.name(constants)? == LineNumberTable::NAME {
            let mut cursor = ByteCursor::new(&code_attribute.info);
            let table = LineNumberTable::parse(&mut cursor)?;
            for (start_pc, line) in table.0 {
                if starts.contains(&(start_pc.0 as usize)) {
                    labelled.insert(start_pc.0 as usize);
                    line_numbers.push((start_pc.0, line));
                }
            }
        }
    }

    // Second pass: emit the events
    stage.receive(ClassEvent::Code(CodeEvent::Start {
        max_stack: code.max_stack,
        max_locals: code.max_locals,
        raw: attribute,
    }))?;

    for (offset, insn) in &decoded {
        if labelled.contains(offset) {
            stage.receive(ClassEvent::Code(CodeEvent::Label(Label::Offset(
                *offset as u16,
            ))))?;
        }
        match insn {
            DecodedInstruction::Basic(insn) => {
                stage.receive(ClassEvent::Code(CodeEvent::Instruction(*insn)))?;
            }
            DecodedInstruction::Branch(branch) => {
                let next = *offset + branch.width();
                let placed = branch.map_labels(
                    |relative| Label::Offset((*offset as isize + *relative as isize) as u16),
                    |relative| Label::Offset((*offset as isize + *relative as isize) as u16),
                    |_| Label::Offset(next as u16),
                );
                stage.receive(ClassEvent::Code(CodeEvent::Branch(placed)))?;
            }
        }
    }
    if labelled.contains(&code_length) {
        stage.receive(ClassEvent::Code(CodeEvent::Label(Label::Offset(
            code_length as u16,
        ))))?;
    }

    for handler in &code.exception_table {
        let catch_type = match handler.catch_type {
            None => None,
            Some(index) => Some(constants.class_name(index)?),
        };
        stage.receive(ClassEvent::Code(CodeEvent::Handler {
            start: Label::Offset(handler.start_pc.0),
            end: Label::Offset(handler.end_pc.0),
            handler: Label::Offset(handler.handler_pc.0),
            catch_type,
        }))?;
    }

    for (start_pc, line) in line_numbers {
        stage.receive(ClassEvent::Code(CodeEvent::LineNumber(
            Label::Offset(start_pc),
            line,
        )))?;
    }

    stage.receive(ClassEvent::Code(CodeEvent::End))
}
