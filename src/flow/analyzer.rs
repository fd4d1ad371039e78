//! Method body builder organized around basic blocks.
//!
//! Code is accumulated one instruction at a time into blocks that always end in an explicit
//! branch. Calling [`CodeBuilder::finish`] runs a forward dataflow pass over the block graph to
//! recompute the frame at every block boundary, lays the blocks out (fixing up switch padding and
//! rewriting jumps that overflow their 16-bit offset field), and serializes everything into a
//! `Code` attribute. Verification frames are recomputed from scratch rather than patched, so
//! callers are free to splice instructions anywhere without tracking what that does to the
//! original `StackMapTable`.

use crate::classfile::attribute::{
    Attribute, BytecodeArray, BytecodeIndex, Code, ExceptionHandler, StackMapFrame, StackMapTable,
};
use crate::classfile::binary::Serialize;
use crate::classfile::constants::ConstantPool;
use crate::classfile::instructions::{BranchInstruction, Instruction};
use crate::errors::Error;
use crate::flow::frame::{AnalysisType, Frame, SerializableType, VerificationType};
use crate::flow::jump_encoding::{block_layout, widen_oversized_jumps, SIGNED_16BIT_JUMP_RANGE};
use crate::util::{OffsetVec, Width};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Name for a position in a method body that is not yet pinned to a bytecode offset
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub enum Label {
    /// Bytecode offset in the method this code was decoded from
    Offset(u16),

    /// Made by a [`LabelGenerator`]
    Synthetic(usize),
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Offset(offset) => write!(f, "@{}", offset),
            Label::Synthetic(id) => write!(f, "L{}", id),
        }
    }
}

/// Generates fresh labels
pub struct LabelGenerator {
    next_label: usize,
}

impl LabelGenerator {
    pub fn new() -> LabelGenerator {
        LabelGenerator { next_label: 0 }
    }

    pub fn fresh_label(&mut self) -> Label {
        let label = Label::Synthetic(self.next_label);
        self.next_label += 1;
        label
    }
}

impl Default for LabelGenerator {
    fn default() -> LabelGenerator {
        LabelGenerator::new()
    }
}

/// How much frame information to persist into the finished `Code` attribute
///
/// The dataflow pass always runs in full (it is what computes `max_stack`/`max_locals` and
/// catches inconsistent joins); the mode only controls whether a `StackMapTable` is emitted.
/// Classfiles at version 50 or higher require the table.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FrameMode {
    StackSizeOnly,
    FullFrames,
}

/// Straight-line run of instructions ending in an explicit branch
#[derive(Clone, Debug)]
pub struct BasicBlock {
    /// Frame at the start of the block, filled in by the dataflow pass (`None` means the block
    /// has not been reached yet)
    pub entry_frame: Option<Frame>,

    pub instructions: OffsetVec<Instruction>,

    pub branch_end: BranchInstruction<Label, Label, Label>,
}

impl Width for BasicBlock {
    fn width(&self) -> usize {
        self.instructions.offset_len().0 + self.branch_end.width()
    }
}

struct HandlerSpec {
    start: Label,
    end: Label,
    handler: Label,

    /// Internal name of the caught class, or `None` to catch everything
    catch_type: Option<String>,
}

/// Accumulates a method body and turns it into a `Code` attribute
pub struct CodeBuilder {
    mode: FrameMode,

    /// Internal name of the enclosing class
    this_class: String,

    /// Frame implied by the method descriptor (the implicit frame at offset 0)
    entry_frame: Frame,

    labels: LabelGenerator,
    order: Vec<Label>,
    blocks: HashMap<Label, BasicBlock>,

    /// Block currently being filled
    current: Option<(Label, OffsetVec<Instruction>)>,

    /// Fallthrough label promised by the last `end_block`, to be placed next
    pending: Option<Label>,

    handlers: Vec<HandlerSpec>,
}

impl CodeBuilder {
    pub fn new(mode: FrameMode, this_class: impl Into<String>, entry_frame: Frame) -> CodeBuilder {
        let mut labels = LabelGenerator::new();
        let entry = labels.fresh_label();
        CodeBuilder {
            mode,
            this_class: this_class.into(),
            entry_frame,
            labels,
            order: vec![],
            blocks: HashMap::new(),
            current: Some((entry, OffsetVec::new())),
            pending: None,
            handlers: vec![],
        }
    }

    pub fn fresh_label(&mut self) -> Label {
        self.labels.fresh_label()
    }

    /// Append a straight-line instruction to the block being filled
    ///
    /// If no block is open, one is opened: under the promised fallthrough label if the previous
    /// block fell through, or under a fresh anonymous label otherwise (code after an
    /// unconditional branch with no label is unreachable and gets replaced by filler at the end).
    pub fn push(&mut self, insn: Instruction) {
        let (label, mut instructions) = self.reopen();
        instructions.push(insn);
        self.current = Some((label, instructions));
    }

    /// End the block being filled with an explicit branch
    pub fn end_block(
        &mut self,
        branch_end: BranchInstruction<Label, Label, Label>,
    ) -> Result<(), Error> {
        let (label, instructions) = self.reopen();
        self.pending = branch_end.fallthrough_target();
        self.close(label, instructions, branch_end)
    }

    /// Pin a label to the current position, starting a new block
    pub fn place_label(&mut self, label: Label) -> Result<(), Error> {
        if self.blocks.contains_key(&label) {
            return Err(Error::DuplicateLabel {
                label: format!("{:?}", label),
            });
        }
        match (self.current.take(), self.pending.take()) {
            (Some((open_label, instructions)), _) => {
                if open_label == label {
                    self.current = Some((open_label, instructions));
                    return Ok(());
                }
                self.close(open_label, instructions, BranchInstruction::FallThrough(label))?;
                self.current = Some((label, OffsetVec::new()));
            }
            (None, Some(promised)) => {
                if promised != label {
                    return Err(Error::WrongFallThrough {
                        expected: format!("{:?}", promised),
                        found: format!("{:?}", label),
                    });
                }
                self.current = Some((label, OffsetVec::new()));
            }
            (None, None) => {
                self.current = Some((label, OffsetVec::new()));
            }
        }
        Ok(())
    }

    /// Register an exception handler covering `start` (inclusive) to `end` (exclusive)
    ///
    /// `catch_type` is the internal name of the caught class; `None` catches everything. The
    /// handler edge is integrated into the dataflow pass after all explicit edges: the handler
    /// entry frame gets the locals merged across every reachable covered instruction and a stack
    /// holding just the thrown exception.
    pub fn add_handler(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<String>,
    ) {
        self.handlers.push(HandlerSpec {
            start,
            end,
            handler,
            catch_type,
        });
    }

    fn reopen(&mut self) -> (Label, OffsetVec<Instruction>) {
        match (self.current.take(), self.pending.take()) {
            (Some(current), _) => current,
            (None, Some(promised)) => (promised, OffsetVec::new()),
            (None, None) => (self.labels.fresh_label(), OffsetVec::new()),
        }
    }

    fn close(
        &mut self,
        label: Label,
        instructions: OffsetVec<Instruction>,
        branch_end: BranchInstruction<Label, Label, Label>,
    ) -> Result<(), Error> {
        let block = BasicBlock {
            entry_frame: None,
            instructions,
            branch_end,
        };
        if self.blocks.insert(label, block).is_some() {
            return Err(Error::DuplicateLabel {
                label: format!("{:?}", label),
            });
        }
        self.order.push(label);
        Ok(())
    }

    /// Run the dataflow pass, lay out the blocks, and serialize the method body
    ///
    /// Apart from the `Code` attribute itself, this returns the final bytecode offset of every
    /// placed label (so callers can rebuild offset-keyed attributes like `LineNumberTable`).
    /// `method_name` and `method_descriptor` are only used in error values.
    pub fn finish(
        self,
        constants: &mut ConstantPool,
        method_name: &str,
        method_descriptor: &str,
    ) -> Result<(Code, HashMap<Label, u16>), Error> {
        let CodeBuilder {
            mode,
            this_class,
            entry_frame: initial_frame,
            mut labels,
            mut order,
            mut blocks,
            current,
            pending,
            handlers,
        } = self;

        // A trailing empty block marks the end of the code range (handler ranges may end there)
        let end_marker = match (current, pending) {
            (Some((label, instructions)), _) if instructions.len() == 0 => Some(label),
            (Some(_), _) | (None, Some(_)) => return Err(Error::FallsOffEnd),
            (None, None) => None,
        };

        let entry = match order.first() {
            Some(label) => *label,
            None => return Err(Error::FallsOffEnd),
        };

        // Every jump and handler must resolve to a placed block
        for block in blocks.values() {
            for target in block.branch_end.jump_targets().targets() {
                if !blocks.contains_key(target) {
                    return Err(Error::UnplacedLabel {
                        label: format!("{:?}", target),
                    });
                }
            }
            if let Some(next) = block.branch_end.fallthrough_target() {
                if !blocks.contains_key(&next) {
                    return Err(Error::FallsOffEnd);
                }
            }
        }
        for handler in &handlers {
            for label in [handler.start, handler.handler] {
                if !blocks.contains_key(&label) {
                    return Err(Error::UnplacedLabel {
                        label: format!("{:?}", label),
                    });
                }
            }
            if !blocks.contains_key(&handler.end) && end_marker != Some(handler.end) {
                return Err(Error::UnplacedLabel {
                    label: format!("{:?}", handler.end),
                });
            }
        }

        // Stable identities for the values pushed by `new`, assigned before the (iterative)
        // dataflow pass so revisiting a block reuses the same identity
        let mut uninit_ids: HashMap<(Label, usize), usize> = HashMap::new();
        let mut uninit_sites: Vec<(Label, usize)> = vec![];
        for label in &order {
            for (_, index, insn) in blocks[label].instructions.iter() {
                if matches!(insn, Instruction::New(_)) {
                    uninit_ids.insert((*label, index), uninit_sites.len());
                    uninit_sites.push((*label, index));
                }
            }
        }

        let positions: HashMap<Label, usize> =
            order.iter().enumerate().map(|(i, l)| (*l, i)).collect();

        let mut max_stack = 0usize;
        let mut max_locals = 0usize;
        let mut worklist = vec![entry];
        if let Some(block) = blocks.get_mut(&entry) {
            block.entry_frame = Some(initial_frame.clone());
        }

        // Explicit edges first; handler edges are layered on afterwards and the whole thing
        // re-runs until the handler entry frames stop changing
        loop {
            run_fixpoint(
                &mut blocks,
                &mut worklist,
                &positions,
                constants,
                &this_class,
                &uninit_ids,
                &mut max_stack,
                &mut max_locals,
            )?;

            let mut handler_changed = false;
            for handler in &handlers {
                let start = position_of(&positions, handler.start)?;
                let end = match end_marker {
                    Some(marker) if marker == handler.end => order.len(),
                    _ => position_of(&positions, handler.end)?,
                };

                // Locals merged across every reachable instruction in the covered range
                let mut covered_locals: Option<Frame> = None;
                for label in &order[start..end] {
                    let block = &blocks[label];
                    let mut state = match &block.entry_frame {
                        Some(frame) => frame.clone(),
                        None => continue,
                    };
                    let mut steps = vec![locals_only(&state)];
                    for (_, index, insn) in block.instructions.iter() {
                        let uninit_id = uninit_ids.get(&(*label, index)).copied().unwrap_or(0);
                        state
                            .apply(insn, constants, uninit_id, &this_class)
                            .map_err(|message| Error::FrameInconsistency {
                                offset: positions[label],
                                message,
                            })?;
                        steps.push(locals_only(&state));
                    }
                    for step in steps {
                        covered_locals = Some(match covered_locals {
                            None => step,
                            Some(merged) => merged.merge(&step).map_err(|message| {
                                Error::FrameInconsistency {
                                    offset: positions[label],
                                    message,
                                }
                            })?,
                        });
                    }
                }

                let covered_locals = match covered_locals {
                    Some(frame) => frame.locals,
                    None => continue, // nothing reachable throws into this handler
                };
                let caught = handler
                    .catch_type
                    .clone()
                    .unwrap_or_else(|| "java/lang/Throwable".to_owned());
                let handler_frame = Frame {
                    locals: covered_locals,
                    stack: std::iter::once(VerificationType::Object(caught)).collect(),
                };

                let before = worklist.len();
                merge_entry_frame(
                    &mut blocks,
                    &mut worklist,
                    handler.handler,
                    &handler_frame,
                    positions[&handler.handler],
                )?;
                if worklist.len() != before {
                    handler_changed = true;
                }
            }

            if !handler_changed {
                break;
            }
        }

        // Unreachable blocks are replaced with minimal filler the verifier accepts
        let mut any_filler = false;
        for label in &order {
            if let Some(block) = blocks.get_mut(label) {
                if block.entry_frame.is_none() {
                    any_filler = true;
                    block.instructions = std::iter::once(Instruction::Nop).collect();
                    block.branch_end = BranchInstruction::AThrow;
                    block.entry_frame = Some(Frame {
                        locals: OffsetVec::new(),
                        stack: std::iter::once(VerificationType::Object(
                            "java/lang/Throwable".to_owned(),
                        ))
                        .collect(),
                    });
                }
            }
        }
        if any_filler {
            max_stack = max_stack.max(1);
        }

        widen_oversized_jumps(&mut order, &mut blocks, &mut labels, &SIGNED_16BIT_JUMP_RANGE);

        let (offsets, total_length) = block_layout(&order, &mut blocks);
        if total_length > u16::MAX as usize {
            return Err(Error::MethodCodeTooLarge {
                name: method_name.to_owned(),
                descriptor: method_descriptor.to_owned(),
            });
        }

        let mut code_bytes: Vec<u8> = Vec::with_capacity(total_length);
        for (position, label) in order.iter().enumerate() {
            let block = &blocks[label];
            debug_assert_eq!(offsets[label], code_bytes.len());
            if let Some(next) = block.branch_end.fallthrough_target() {
                debug_assert_eq!(order.get(position + 1), Some(&next));
            }

            for (_, _, insn) in block.instructions.iter() {
                insn.serialize(&mut code_bytes)?;
            }

            let opcode_offset = offsets[label] + block.instructions.offset_len().0;
            let relative = |target: &Label| offsets[target] as isize - opcode_offset as isize;
            let encoded: BranchInstruction<i16, i32, ()> = block.branch_end.map_labels(
                |target| relative(target) as i16,
                |target| relative(target) as i32,
                |_| (),
            );
            encoded.serialize(&mut code_bytes)?;
        }

        let mut label_offsets: HashMap<Label, u16> = offsets
            .iter()
            .map(|(label, offset)| (*label, *offset as u16))
            .collect();
        if let Some(marker) = end_marker {
            label_offsets.insert(marker, total_length as u16);
        }

        let mut exception_table = Vec::with_capacity(handlers.len());
        for handler in &handlers {
            let lookup = |label: &Label| -> Result<BytecodeIndex, Error> {
                label_offsets
                    .get(label)
                    .map(|offset| BytecodeIndex(*offset))
                    .ok_or(Error::UnplacedLabel {
                        label: format!("{:?}", label),
                    })
            };
            let catch_type = match &handler.catch_type {
                Some(class_name) => Some(constants.get_class(class_name)?),
                None => None,
            };
            exception_table.push(ExceptionHandler {
                start_pc: lookup(&handler.start)?,
                end_pc: lookup(&handler.end)?,
                handler_pc: lookup(&handler.handler)?,
                catch_type,
            });
        }

        let mut attributes: Vec<Attribute> = vec![];
        if mode == FrameMode::FullFrames {
            // Final bytecode offset of each `new`, for `Uninitialized` entries in frames
            let mut uninit_offsets: HashMap<usize, u16> = HashMap::new();
            for (id, (label, index)) in uninit_sites.iter().enumerate() {
                if let Some((offset_in_block, _)) = blocks[label].instructions.get_index(*index) {
                    uninit_offsets.insert(id, (offsets[label] + offset_in_block.0) as u16);
                }
            }

            // Frames go wherever the verifier restarts: branch targets, handler entries, and
            // blocks that follow a terminal instruction
            let mut needs_frame: HashSet<Label> = HashSet::new();
            for label in &order {
                for target in blocks[label].branch_end.jump_targets().targets() {
                    needs_frame.insert(*target);
                }
            }
            for position in 1..order.len() {
                if blocks[&order[position - 1]]
                    .branch_end
                    .fallthrough_target()
                    .is_none()
                {
                    needs_frame.insert(order[position]);
                }
            }
            for handler in &handlers {
                needs_frame.insert(handler.handler);
            }

            let mut frames: Vec<StackMapFrame> = vec![];
            let mut prev_offset: Option<u16> = None;
            let mut prev_locals = serialize_types(&initial_frame.locals, constants, &uninit_offsets)?;
            for label in &order {
                if !needs_frame.contains(label) {
                    continue;
                }
                let offset = offsets[label] as u16;
                if prev_offset == Some(offset) {
                    continue; // empty block sharing an offset with the previous frame
                }
                let frame = match &blocks[label].entry_frame {
                    Some(frame) => frame,
                    None => continue,
                };
                let locals = serialize_types(&frame.locals, constants, &uninit_offsets)?;
                let stack = serialize_types(&frame.stack, constants, &uninit_offsets)?;
                let offset_delta = match prev_offset {
                    None => offset,
                    Some(previous) => offset - previous - 1,
                };
                frames.push(compress_frame(&prev_locals, &locals, &stack, offset_delta));
                prev_offset = Some(offset);
                prev_locals = locals;
            }

            if !frames.is_empty() {
                attributes.push(constants.get_attribute(StackMapTable(frames))?);
            }
        }

        let code = Code {
            max_stack: max_stack as u16,
            max_locals: max_locals as u16,
            code_array: BytecodeArray(code_bytes),
            exception_table,
            attributes,
        };
        Ok((code, label_offsets))
    }
}

fn position_of(positions: &HashMap<Label, usize>, label: Label) -> Result<usize, Error> {
    positions.get(&label).copied().ok_or(Error::UnplacedLabel {
        label: format!("{:?}", label),
    })
}

fn locals_only(frame: &Frame) -> Frame {
    Frame {
        locals: frame.locals.clone(),
        stack: OffsetVec::new(),
    }
}

/// Propagate frames along explicit edges until nothing changes
#[allow(clippy::too_many_arguments)]
fn run_fixpoint(
    blocks: &mut HashMap<Label, BasicBlock>,
    worklist: &mut Vec<Label>,
    positions: &HashMap<Label, usize>,
    constants: &ConstantPool,
    this_class: &str,
    uninit_ids: &HashMap<(Label, usize), usize>,
    max_stack: &mut usize,
    max_locals: &mut usize,
) -> Result<(), Error> {
    while let Some(label) = worklist.pop() {
        let block = blocks[&label].clone();
        let position = positions[&label];
        let mut state = match block.entry_frame {
            Some(frame) => frame,
            None => continue,
        };
        track_limits(&state, max_stack, max_locals);

        for (_, index, insn) in block.instructions.iter() {
            let uninit_id = uninit_ids.get(&(label, index)).copied().unwrap_or(0);
            state
                .apply(insn, constants, uninit_id, this_class)
                .map_err(|message| Error::FrameInconsistency {
                    offset: position,
                    message,
                })?;
            track_limits(&state, max_stack, max_locals);
        }
        state
            .apply_branch(&block.branch_end)
            .map_err(|message| Error::FrameInconsistency {
                offset: position,
                message,
            })?;

        let mut successors: Vec<Label> = block.branch_end.jump_targets().targets().to_vec();
        if let Some(next) = block.branch_end.fallthrough_target() {
            successors.push(next);
        }
        for successor in successors {
            let position = position_of(positions, successor)?;
            merge_entry_frame(blocks, worklist, successor, &state, position)?;
        }
    }
    Ok(())
}

fn track_limits(frame: &Frame, max_stack: &mut usize, max_locals: &mut usize) {
    *max_stack = (*max_stack).max(frame.stack.offset_len().0);
    *max_locals = (*max_locals).max(frame.locals.offset_len().0);
}

/// Merge a frame flowing into a block, requeueing the block if its entry frame changed
fn merge_entry_frame(
    blocks: &mut HashMap<Label, BasicBlock>,
    worklist: &mut Vec<Label>,
    label: Label,
    incoming: &Frame,
    position: usize,
) -> Result<(), Error> {
    let block = blocks.get_mut(&label).ok_or(Error::UnplacedLabel {
        label: format!("{:?}", label),
    })?;
    let merged = match &block.entry_frame {
        None => incoming.clone(),
        Some(existing) => {
            existing
                .merge(incoming)
                .map_err(|message| Error::FrameInconsistency {
                    offset: position,
                    message,
                })?
        }
    };
    if block.entry_frame.as_ref() != Some(&merged) {
        block.entry_frame = Some(merged);
        worklist.push(label);
    }
    Ok(())
}

fn serialize_types(
    types: &OffsetVec<AnalysisType>,
    constants: &mut ConstantPool,
    uninit_offsets: &HashMap<usize, u16>,
) -> Result<Vec<SerializableType>, Error> {
    types
        .iter()
        .map(|(_, _, typ)| {
            typ.map(
                |class_name| constants.get_class(class_name),
                |id| {
                    uninit_offsets
                        .get(id)
                        .copied()
                        .ok_or_else(|| Error::FrameInconsistency {
                            offset: 0,
                            message: "uninitialized value type survives into unreachable code"
                                .to_owned(),
                        })
                },
            )
        })
        .collect()
}

/// Pick the most compact `StackMapTable` entry for a frame, given the previous frame's locals
fn compress_frame(
    prev_locals: &[SerializableType],
    locals: &[SerializableType],
    stack: &[SerializableType],
    offset_delta: u16,
) -> StackMapFrame {
    if stack.is_empty() {
        if locals == prev_locals {
            return StackMapFrame::SameLocalsNoStack { offset_delta };
        }
        if locals.len() > prev_locals.len()
            && locals.len() - prev_locals.len() <= 3
            && locals.starts_with(prev_locals)
        {
            return StackMapFrame::AppendLocalsNoStack {
                offset_delta,
                locals: locals[prev_locals.len()..].to_vec(),
            };
        }
        if prev_locals.len() > locals.len()
            && prev_locals.len() - locals.len() <= 3
            && prev_locals.starts_with(locals)
        {
            return StackMapFrame::ChopLocalsNoStack {
                offset_delta,
                chopped_k: (prev_locals.len() - locals.len()) as u8,
            };
        }
    } else if stack.len() == 1 && locals == prev_locals {
        return StackMapFrame::SameLocalsOneStack {
            offset_delta,
            stack: stack[0].clone(),
        };
    }
    StackMapFrame::Full {
        offset_delta,
        locals: locals.to_vec(),
        stack: stack.to_vec(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::classfile::attribute::AttributeLike;
    use crate::classfile::instructions::OrdComparison;
    use crate::descriptor::{FieldType, MethodDescriptor, ParseDescriptor};

    fn static_entry(descriptor: &str) -> Frame {
        let descriptor = MethodDescriptor::parse(descriptor).unwrap();
        Frame::entry_frame(None, &descriptor.parameters)
    }

    fn attribute_names(constants: &ConstantPool, code: &Code) -> Vec<String> {
        code.attributes
            .iter()
            .map(|attr| attr.name(constants).unwrap().to_owned())
            .collect()
    }

    #[test]
    fn straight_line_addition() {
        let mut constants = ConstantPool::new();
        let mut builder = CodeBuilder::new(FrameMode::StackSizeOnly, "Adder", static_entry("(II)I"));
        builder.push(Instruction::ILoad(0));
        builder.push(Instruction::ILoad(1));
        builder.push(Instruction::IAdd);
        builder.end_block(BranchInstruction::IReturn).unwrap();

        let (code, _) = builder.finish(&mut constants, "add", "(II)I").unwrap();
        assert_eq!(code.max_stack, 2);
        assert_eq!(code.max_locals, 2);
        assert_eq!(code.code_array.0, vec![0x1a, 0x1b, 0x60, 0xac]);
        assert!(attribute_names(&constants, &code).is_empty());
    }

    #[test]
    fn branch_target_gets_a_frame() {
        let mut constants = ConstantPool::new();
        let mut builder = CodeBuilder::new(FrameMode::FullFrames, "Max", static_entry("(II)I"));
        let bigger = builder.fresh_label();

        builder.push(Instruction::ILoad(0));
        builder.push(Instruction::ILoad(1));
        let fall = builder.fresh_label();
        builder
            .end_block(BranchInstruction::IfICmp(OrdComparison::LT, bigger, fall))
            .unwrap();
        builder.push(Instruction::ILoad(0));
        builder.end_block(BranchInstruction::IReturn).unwrap();
        builder.place_label(bigger).unwrap();
        builder.push(Instruction::ILoad(1));
        builder.end_block(BranchInstruction::IReturn).unwrap();

        let (code, label_offsets) = builder.finish(&mut constants, "max", "(II)I").unwrap();
        assert_eq!(
            code.code_array.0,
            vec![0x1a, 0x1b, 0xa1, 0x00, 0x05, 0x1a, 0xac, 0x1b, 0xac],
        );
        assert_eq!(label_offsets[&bigger], 7);
        assert_eq!(
            attribute_names(&constants, &code),
            vec![StackMapTable::NAME.to_owned()],
        );
    }

    #[test]
    fn mismatched_stack_depths_fail_loudly() {
        let mut constants = ConstantPool::new();
        let mut builder =
            CodeBuilder::new(FrameMode::FullFrames, "Bad", static_entry("(I)I"));
        let join = builder.fresh_label();
        let shallow = builder.fresh_label();

        builder.push(Instruction::ILoad(0));
        let fall = builder.fresh_label();
        builder
            .end_block(BranchInstruction::If(OrdComparison::EQ, shallow, fall))
            .unwrap();
        // this path reaches the join with two values on the stack
        builder.push(Instruction::IConst0);
        builder.push(Instruction::IConst1);
        builder.end_block(BranchInstruction::Goto(join)).unwrap();
        // this one with a single value
        builder.place_label(shallow).unwrap();
        builder.push(Instruction::IConst0);
        builder.end_block(BranchInstruction::Goto(join)).unwrap();
        builder.place_label(join).unwrap();
        builder.end_block(BranchInstruction::IReturn).unwrap();

        let result = builder.finish(&mut constants, "bad", "(I)I");
        assert!(matches!(result, Err(Error::FrameInconsistency { .. })));
    }

    #[test]
    fn unreachable_block_becomes_filler() {
        let mut constants = ConstantPool::new();
        let mut builder =
            CodeBuilder::new(FrameMode::StackSizeOnly, "Dead", static_entry("()V"));
        builder.end_block(BranchInstruction::Return).unwrap();

        // nothing jumps here, so the original instructions must not survive
        let dead = builder.fresh_label();
        builder.place_label(dead).unwrap();
        builder.push(Instruction::IConst0);
        builder.push(Instruction::IConst1);
        builder.push(Instruction::IAdd);
        builder.end_block(BranchInstruction::IReturn).unwrap();

        let (code, _) = builder.finish(&mut constants, "dead", "()V").unwrap();
        assert_eq!(code.code_array.0, vec![0xb1, 0x00, 0xbf]);
    }

    #[test]
    fn handler_entry_frame_holds_the_thrown_exception() {
        let mut constants = ConstantPool::new();
        let mut builder =
            CodeBuilder::new(FrameMode::FullFrames, "Catcher", static_entry("()V"));
        let start = builder.fresh_label();
        let handler = builder.fresh_label();
        let done = builder.fresh_label();

        builder.place_label(start).unwrap();
        builder.push(Instruction::Nop);
        builder.end_block(BranchInstruction::Goto(done)).unwrap();
        builder.place_label(handler).unwrap();
        builder.end_block(BranchInstruction::AThrow).unwrap();
        builder.place_label(done).unwrap();
        builder.end_block(BranchInstruction::Return).unwrap();
        builder.add_handler(
            start,
            handler,
            handler,
            Some("java/lang/RuntimeException".to_owned()),
        );

        let (code, label_offsets) = builder.finish(&mut constants, "run", "()V").unwrap();
        assert_eq!(code.max_stack, 1);
        assert_eq!(code.exception_table.len(), 1);
        let entry = &code.exception_table[0];
        assert_eq!(entry.start_pc.0, 0);
        assert_eq!(entry.end_pc.0, label_offsets[&handler]);
        assert_eq!(entry.handler_pc.0, label_offsets[&handler]);
        assert!(entry.catch_type.is_some());
        assert_eq!(
            attribute_names(&constants, &code),
            vec![StackMapTable::NAME.to_owned()],
        );
    }

    #[test]
    fn oversized_method_is_rejected_with_its_name() {
        let mut constants = ConstantPool::new();
        let mut builder =
            CodeBuilder::new(FrameMode::StackSizeOnly, "Huge", static_entry("()V"));
        for _ in 0..70_000 {
            builder.push(Instruction::Nop);
        }
        builder.end_block(BranchInstruction::Return).unwrap();

        match builder.finish(&mut constants, "bulk", "()V") {
            Err(Error::MethodCodeTooLarge { name, descriptor }) => {
                assert_eq!(name, "bulk");
                assert_eq!(descriptor, "()V");
            }
            other => panic!("expected MethodCodeTooLarge, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn object_parameters_round_through_frames() {
        let mut constants = ConstantPool::new();
        let descriptor = MethodDescriptor {
            parameters: vec![FieldType::object("java/lang/String")],
            return_type: Some(FieldType::object("java/lang/String")),
        };
        let entry = Frame::entry_frame(None, &descriptor.parameters);
        let mut builder = CodeBuilder::new(FrameMode::FullFrames, "Echo", entry);
        let out = builder.fresh_label();

        builder.push(Instruction::ALoad(0));
        let fall = builder.fresh_label();
        builder
            .end_block(BranchInstruction::IfNull(
                crate::classfile::instructions::EqComparison::EQ,
                out,
                fall,
            ))
            .unwrap();
        builder.push(Instruction::ALoad(0));
        builder.end_block(BranchInstruction::AReturn).unwrap();
        builder.place_label(out).unwrap();
        builder.push(Instruction::AConstNull);
        builder.end_block(BranchInstruction::AReturn).unwrap();

        let (code, _) = builder
            .finish(&mut constants, "echo", "(Ljava/lang/String;)Ljava/lang/String;")
            .unwrap();
        assert_eq!(code.max_stack, 1);
        assert_eq!(code.max_locals, 1);
        assert_eq!(
            attribute_names(&constants, &code),
            vec![StackMapTable::NAME.to_owned()],
        );
    }
}
