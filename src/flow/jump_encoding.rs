//! Rewrites jumps whose relative offset does not fit in the signed 16-bit field of the short
//! branch encodings.
//!
//! The rewrite switches oversized jumps over to `goto_w`. This is tricky because the rewrites are
//! themselves longer than the jump they replace, so fixing one jump can push another out of
//! range. The process still terminates: a rewritten jump never needs revisiting, and the small
//! jumps introduced by a rewrite cover short fixed distances.
//!
//! An unconditional jump gains two `nop`s so the inserted segment is a multiple of four bytes
//! wide (keeping `tableswitch`/`lookupswitch` padding intact):
//!
//! ```text,ignore,no_run
//!                           nop
//!                           nop
//!     goto L2               goto_w L2
//! L1: ...         =>    L1: ...
//! L2: ...               L2: ...
//! ```
//!
//! A conditional jump is inverted and bounced through two fresh blocks (already exactly eight
//! bytes):
//!
//! ```text,ignore,no_run
//!                           ifnot* L4
//!     if* L2            L3: goto L1
//! L1: ...               L4: goto_w L2
//!     ...         =>    L1: ...
//! L2: ...               L2: ...
//! ```

use crate::classfile::instructions::{BranchInstruction, Instruction, JumpTargets};
use crate::flow::analyzer::{BasicBlock, Label, LabelGenerator};
use crate::util::Width;
use std::collections::HashMap;
use std::ops::Range;

/// Range of relative jump offsets supported by `goto` and `if*` branch instructions
pub const SIGNED_16BIT_JUMP_RANGE: Range<isize> = Range {
    start: i16::MIN as isize,
    end: i16::MAX as isize + 1,
};

/// Assign a bytecode offset to every block, in the given order
///
/// Switch padding depends on the offset of the switch opcode, and the padding in turn shifts
/// later offsets, so this iterates until the layout is stable. Returns the offset of each block
/// along with the total code length.
pub fn block_layout(
    order: &[Label],
    blocks: &mut HashMap<Label, BasicBlock>,
) -> (HashMap<Label, usize>, usize) {
    loop {
        let mut offsets = HashMap::with_capacity(order.len());
        let mut current = 0usize;
        for label in order {
            offsets.insert(*label, current);
            current += blocks[label].width();
        }

        let mut stable = true;
        for label in order {
            let block = blocks.get_mut(label).expect("block for ordered label");
            let opcode_offset = offsets[label] + block.instructions.offset_len().0;
            let wanted = (3 - opcode_offset % 4) as u8;
            match &mut block.branch_end {
                BranchInstruction::TableSwitch { padding, .. }
                | BranchInstruction::LookupSwitch { padding, .. } => {
                    if *padding != wanted {
                        *padding = wanted;
                        stable = false;
                    }
                }
                _ => (),
            }
        }

        if stable {
            return (offsets, current);
        }
    }
}

/// Detect which 16-bit jumps are oversized and rewrite them, inserting new blocks as needed
pub fn widen_oversized_jumps(
    order: &mut Vec<Label>,
    blocks: &mut HashMap<Label, BasicBlock>,
    labels: &mut LabelGenerator,
    small_jump_range: &Range<isize>,
) {
    loop {
        let (offsets, _) = block_layout(order, blocks);

        let mut oversized = None;
        for label in order.iter() {
            if let JumpTargets::Regular(target) = blocks[label].branch_end.jump_targets() {
                let opcode_offset = offsets[label] + blocks[label].instructions.offset_len().0;
                let distance = offsets[&target] as isize - opcode_offset as isize;
                if !small_jump_range.contains(&distance) {
                    oversized = Some(*label);
                    break;
                }
            }
        }

        let from_label = match oversized {
            Some(label) => label,
            None => return,
        };

        let block = blocks.get_mut(&from_label).expect("oversized jump block");
        match block.branch_end.clone() {
            BranchInstruction::Goto(target) => {
                block.instructions.push(Instruction::Nop);
                block.instructions.push(Instruction::Nop);
                block.branch_end = BranchInstruction::GotoW(target);
            }

            conditional => {
                let near = labels.fresh_label();
                let far = labels.fresh_label();
                let (inverted, next_label, far_label) = match conditional {
                    BranchInstruction::If(comp, far_lbl, next_lbl) => (
                        BranchInstruction::If(!comp, far, near),
                        next_lbl,
                        far_lbl,
                    ),
                    BranchInstruction::IfICmp(comp, far_lbl, next_lbl) => (
                        BranchInstruction::IfICmp(!comp, far, near),
                        next_lbl,
                        far_lbl,
                    ),
                    BranchInstruction::IfACmp(comp, far_lbl, next_lbl) => (
                        BranchInstruction::IfACmp(!comp, far, near),
                        next_lbl,
                        far_lbl,
                    ),
                    BranchInstruction::IfNull(comp, far_lbl, next_lbl) => (
                        BranchInstruction::IfNull(!comp, far, near),
                        next_lbl,
                        far_lbl,
                    ),
                    other => unreachable!("regular jump ends in {:?}", other),
                };
                block.branch_end = inverted;

                let near_frame = blocks[&next_label].entry_frame.clone();
                let far_frame = blocks[&far_label].entry_frame.clone();
                blocks.insert(
                    near,
                    BasicBlock {
                        entry_frame: near_frame,
                        instructions: Default::default(),
                        branch_end: BranchInstruction::Goto(next_label),
                    },
                );
                blocks.insert(
                    far,
                    BasicBlock {
                        entry_frame: far_frame,
                        instructions: Default::default(),
                        branch_end: BranchInstruction::GotoW(far_label),
                    },
                );

                let position = order
                    .iter()
                    .position(|label| *label == from_label)
                    .expect("ordered label for oversized jump");
                order.insert(position + 1, near);
                order.insert(position + 2, far);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::classfile::instructions::OrdComparison;

    fn block(
        instructions: Vec<Instruction>,
        branch_end: BranchInstruction<Label, Label, Label>,
    ) -> BasicBlock {
        BasicBlock {
            entry_frame: None,
            instructions: instructions.into_iter().collect(),
            branch_end,
        }
    }

    #[test]
    fn short_jumps_are_untouched() {
        let mut labels = LabelGenerator::new();
        let l1 = labels.fresh_label();
        let l2 = labels.fresh_label();

        let mut order = vec![l1, l2];
        let mut blocks = HashMap::new();
        blocks.insert(
            l1,
            block(vec![Instruction::IConst1], BranchInstruction::Goto(l1)),
        );
        blocks.insert(l2, block(vec![], BranchInstruction::Return));

        widen_oversized_jumps(&mut order, &mut blocks, &mut labels, &SIGNED_16BIT_JUMP_RANGE);
        assert_eq!(order, vec![l1, l2]);
        assert!(matches!(
            blocks[&l1].branch_end,
            BranchInstruction::Goto(_)
        ));
    }

    #[test]
    fn oversized_goto_becomes_goto_w() {
        let mut labels = LabelGenerator::new();
        let l1 = labels.fresh_label();
        let l2 = labels.fresh_label();

        // 40000 bytes of filler puts the backward jump well out of 16-bit range
        let filler = (0..20000)
            .flat_map(|_| vec![Instruction::IConst1, Instruction::Pop])
            .collect::<Vec<_>>();
        let mut order = vec![l1, l2];
        let mut blocks = HashMap::new();
        blocks.insert(l1, block(vec![], BranchInstruction::FallThrough(l2)));
        blocks.insert(l2, block(filler, BranchInstruction::Goto(l1)));

        widen_oversized_jumps(&mut order, &mut blocks, &mut labels, &SIGNED_16BIT_JUMP_RANGE);
        assert_eq!(order, vec![l1, l2]);
        assert!(matches!(blocks[&l2].branch_end, BranchInstruction::GotoW(_)));
        // the two nops keep the inserted segment a multiple of four bytes
        assert_eq!(blocks[&l2].instructions.len(), 40002);
    }

    #[test]
    fn oversized_conditional_is_inverted_and_bounced() {
        let mut labels = LabelGenerator::new();
        let l1 = labels.fresh_label();
        let l2 = labels.fresh_label();
        let l3 = labels.fresh_label();

        let filler = (0..20000)
            .flat_map(|_| vec![Instruction::IConst1, Instruction::Pop])
            .collect::<Vec<_>>();
        let mut order = vec![l1, l2, l3];
        let mut blocks = HashMap::new();
        blocks.insert(l1, block(vec![], BranchInstruction::FallThrough(l2)));
        blocks.insert(
            l2,
            block(
                filler,
                BranchInstruction::If(OrdComparison::EQ, l1, l3),
            ),
        );
        blocks.insert(l3, block(vec![], BranchInstruction::Return));

        widen_oversized_jumps(&mut order, &mut blocks, &mut labels, &SIGNED_16BIT_JUMP_RANGE);

        assert_eq!(order.len(), 5);
        let (near, far) = (order[2], order[3]);
        assert_eq!(
            blocks[&l2].branch_end,
            BranchInstruction::If(OrdComparison::NE, far, near)
        );
        assert_eq!(blocks[&near].branch_end, BranchInstruction::Goto(l3));
        assert_eq!(blocks[&far].branch_end, BranchInstruction::GotoW(l1));
    }

    #[test]
    fn boundary_backward_jump_at_exact_range_limit() {
        // A backward goto of exactly -32768 stays short; one byte further must widen
        let mut labels = LabelGenerator::new();
        let target = labels.fresh_label();
        let jumper = labels.fresh_label();

        // target block is `filler` bytes wide, goto opcode sits right after it
        let build = |filler_bytes: usize| {
            let filler = (0..filler_bytes).map(|_| Instruction::Nop).collect::<Vec<_>>();
            let mut order = vec![target, jumper];
            let mut blocks = HashMap::new();
            blocks.insert(
                target,
                block(filler, BranchInstruction::FallThrough(jumper)),
            );
            blocks.insert(jumper, block(vec![], BranchInstruction::Goto(target)));
            (order.clone(), blocks, order.remove(0))
        };

        let (mut order, mut blocks, _) = build(32768);
        widen_oversized_jumps(&mut order, &mut blocks, &mut labels, &SIGNED_16BIT_JUMP_RANGE);
        assert!(matches!(blocks[&jumper].branch_end, BranchInstruction::Goto(_)));

        let (mut order, mut blocks, _) = build(32769);
        widen_oversized_jumps(&mut order, &mut blocks, &mut labels, &SIGNED_16BIT_JUMP_RANGE);
        assert!(matches!(blocks[&jumper].branch_end, BranchInstruction::GotoW(_)));
    }
}
