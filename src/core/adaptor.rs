// This module defines the MachineAdaptor trait, the bridge between the mode
// switching pass and whatever machine IR it runs on. The pass never looks at
// opcodes or operands itself: it asks the adaptor to enumerate blocks and
// instructions in program order, classify instructions, resolve the
// definitions feeding an instruction's register uses, report where the
// condition flag register is live, allocate fresh registers and materialize
// the logical operations the pass decides on (capture the entry mask, enter
// uniform or divergent mode, save and restore the flag). References are small
// Copy handles; every handle the pass keeps annotations for also exposes a
// dense local index so annotations can live in plain arrays.

//! Adaptor responsibilities.
//!
//! The adaptor is the glue between the pass and the target's machine IR. The
//! pass assumes:
//! - The function has a single entry block and PHIs only at block heads.
//! - Virtual registers are in SSA form; physical register uses are resolved by
//!   the adaptor to the reaching definition in the same block.
//! - Instruction and block local indices are dense and stable for the run.
//!   Instructions created during the run may get indices past
//!   [`MachineAdaptor::inst_count`]; the pass never asks about them.

use super::mode::InstClass;
use std::fmt::Debug;

/// Where an emitted instruction goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint<I, B> {
    /// Immediately before the given instruction.
    Before(I),
    /// After the last instruction of the block.
    End(B),
}

/// Logical operations the pass asks the target to materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeOp<R> {
    /// Copy the current lane mask into `dst`.
    CaptureMask { dst: R },
    /// Enable whole quads: restore from `saved` or recompute from the current mask.
    EnterUniform { saved: Option<R> },
    /// Restrict the mask to `live_mask`, optionally saving the uniform mask to `save`.
    EnterDivergent { live_mask: R, save: Option<R> },
    /// Copy the condition flag into `dst`.
    SaveFlag { dst: R },
    /// Copy `src` back into the condition flag.
    RestoreFlag { src: R },
}

/// Source a live-mask query is lowered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskSource<R> {
    /// The mask register as it currently is.
    Ambient,
    /// The mask captured at function entry.
    Captured(R),
}

/// One live segment of the condition flag inside a block.
///
/// `def` is the instruction writing the flag (`None` when the flag is live on
/// entry to the block) and `last_use` the last instruction reading it (`None`
/// when the flag is live out of the block).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagSegment<I> {
    pub def: Option<I>,
    pub last_use: Option<I>,
}

/// Bridge between a machine IR and the mode switching pass.
pub trait MachineAdaptor {
    type InstRef: Copy + Eq + Debug;
    type BlockRef: Copy + Eq + Debug;
    type Reg: Copy + Eq + Debug;

    /// Name of the current function (for diagnostics).
    fn function_name(&self) -> &str {
        ""
    }

    /// Whether the current function uses the pixel shader calling convention.
    fn is_pixel_shader(&self) -> bool;

    /// Whether shader outputs written by the function must be computed for whole quads.
    fn has_uniform_outputs(&self) -> bool {
        false
    }

    /// Entry block of the current function.
    fn entry_block(&self) -> Self::BlockRef;

    /// Blocks of the current function in layout order.
    fn blocks(&self) -> Box<dyn Iterator<Item = Self::BlockRef> + '_>;

    /// Number of blocks; bound for [`MachineAdaptor::block_local_idx`].
    fn block_count(&self) -> usize;

    /// Dense index of a block.
    fn block_local_idx(&self, block: Self::BlockRef) -> usize;

    /// Name of a block (for diagnostics).
    fn block_name(&self, _block: Self::BlockRef) -> &str {
        ""
    }

    /// Predecessors of a block.
    fn block_preds(&self, block: Self::BlockRef) -> Box<dyn Iterator<Item = Self::BlockRef> + '_>;

    /// Successors of a block.
    fn block_succs(&self, block: Self::BlockRef) -> Box<dyn Iterator<Item = Self::BlockRef> + '_>;

    /// Instructions of a block in program order, PHIs included.
    fn block_insts(&self, block: Self::BlockRef) -> Box<dyn Iterator<Item = Self::InstRef> + '_>;

    /// First instruction of the block that is not a PHI.
    fn first_non_phi(&self, block: Self::BlockRef) -> Option<Self::InstRef> {
        self.block_insts(block).find(|&inst| !self.inst_is_phi(inst))
    }

    /// Number of instructions known at the start of the run.
    fn inst_count(&self) -> usize;

    /// Dense index of an instruction.
    fn inst_local_idx(&self, inst: Self::InstRef) -> usize;

    /// Block containing the instruction.
    fn inst_block(&self, inst: Self::InstRef) -> Self::BlockRef;

    /// Previous instruction in the same block.
    fn prev_inst(&self, inst: Self::InstRef) -> Option<Self::InstRef>;

    fn inst_is_phi(&self, inst: Self::InstRef) -> bool;

    fn inst_is_terminator(&self, inst: Self::InstRef) -> bool;

    /// Mode-relevant classification of the instruction.
    fn inst_class(&self, inst: Self::InstRef) -> InstClass;

    /// Whether the instruction is the structured "else" pseudo.
    fn inst_is_else(&self, _inst: Self::InstRef) -> bool {
        false
    }

    /// Whether the instruction's result depends on the lane mask at all.
    ///
    /// Scalar instructions sometimes carry a requirement so that it propagates
    /// to the branches they feed, but they execute the same in either mode.
    fn requires_correct_state(&self, inst: Self::InstRef) -> bool;

    /// Whether the instruction writes a physical vector register (a shader output).
    fn defines_output(&self, _inst: Self::InstRef) -> bool {
        false
    }

    /// Instructions defining the registers read by `inst`.
    fn use_defs(&self, inst: Self::InstRef) -> Vec<Self::InstRef>;

    /// Printable form of an instruction (for diagnostics).
    fn inst_display(&self, inst: Self::InstRef) -> String {
        format!("{:?}", inst)
    }

    /// Live segments of the condition flag in a block, in program order.
    ///
    /// The first call creates the flag's live range; it stays cached until
    /// [`MachineAdaptor::remove_flag_range`].
    fn flag_segments(&mut self, block: Self::BlockRef) -> Vec<FlagSegment<Self::InstRef>>;

    /// Drop the flag live range created by [`MachineAdaptor::flag_segments`].
    fn remove_flag_range(&mut self);

    /// Fresh register able to hold a lane mask.
    fn new_mask_reg(&mut self) -> Self::Reg;

    /// Fresh register able to hold the condition flag.
    fn new_flag_reg(&mut self) -> Self::Reg;

    /// Materialize `op` at `at`.
    fn emit(&mut self, at: InsertPoint<Self::InstRef, Self::BlockRef>, op: ModeOp<Self::Reg>) -> Self::InstRef;

    /// Replace a live-mask query by a copy from `src`.
    fn lower_live_mask_query(&mut self, query: Self::InstRef, src: MaskSource<Self::Reg>) -> Self::InstRef;

    /// Ask the structured control flow lowering to invert the given "else".
    fn set_else_invert(&mut self, inst: Self::InstRef);
}
