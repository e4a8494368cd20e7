//! Per-function annotations and the propagation worklist.
//!
//! Annotations live in arrays indexed by the adaptor's dense instruction and
//! block indices, allocated in the session arena. Instructions created while
//! instrumenting get indices past the recorded count and read back as
//! unconstrained.

use std::fmt;

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;

use crate::core::{MachineAdaptor, Mode};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InstrInfo {
    /// Mode the instruction itself needs. Set at most once.
    pub needs: Mode,
    /// Union of what later instructions in the block and successors need.
    pub out_needs: Mode,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Union of the block's instruction needs.
    pub needs: Mode,
    pub in_needs: Mode,
    pub out_needs: Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItem<I, B> {
    Inst(I),
    Block(B),
}

pub struct ModeState<'arena, A: MachineAdaptor> {
    insts: BumpVec<'arena, InstrInfo>,
    blocks: BumpVec<'arena, BlockInfo>,
    worklist: BumpVec<'arena, WorkItem<A::InstRef, A::BlockRef>>,
    live_mask_queries: BumpVec<'arena, A::InstRef>,
    dequeues: usize,
}

impl<'arena, A: MachineAdaptor> ModeState<'arena, A> {
    /// Empty annotations for the adaptor's current function.
    pub fn new_in(arena: &'arena Bump, adaptor: &A) -> Self {
        let mut insts = BumpVec::with_capacity_in(adaptor.inst_count(), arena);
        insts.resize(adaptor.inst_count(), InstrInfo::default());
        let mut blocks = BumpVec::with_capacity_in(adaptor.block_count(), arena);
        blocks.resize(adaptor.block_count(), BlockInfo::default());
        Self {
            insts,
            blocks,
            worklist: BumpVec::new_in(arena),
            live_mask_queries: BumpVec::new_in(arena),
            dequeues: 0,
        }
    }

    /// Whether the instruction existed when the annotations were created.
    pub fn is_tracked(&self, adaptor: &A, inst: A::InstRef) -> bool {
        adaptor.inst_local_idx(inst) < self.insts.len()
    }

    pub fn inst(&self, adaptor: &A, inst: A::InstRef) -> InstrInfo {
        self.insts.get(adaptor.inst_local_idx(inst)).copied().unwrap_or_default()
    }

    pub(crate) fn inst_mut(&mut self, adaptor: &A, inst: A::InstRef) -> &mut InstrInfo {
        &mut self.insts[adaptor.inst_local_idx(inst)]
    }

    pub fn block(&self, adaptor: &A, block: A::BlockRef) -> BlockInfo {
        self.blocks[adaptor.block_local_idx(block)]
    }

    pub(crate) fn block_mut(&mut self, adaptor: &A, block: A::BlockRef) -> &mut BlockInfo {
        &mut self.blocks[adaptor.block_local_idx(block)]
    }

    /// All instruction annotations, by local index.
    pub fn inst_infos(&self) -> &[InstrInfo] {
        &self.insts
    }

    /// All block annotations, by local index.
    pub fn block_infos(&self) -> &[BlockInfo] {
        &self.blocks
    }

    pub(crate) fn push(&mut self, item: WorkItem<A::InstRef, A::BlockRef>) {
        self.worklist.push(item);
    }

    pub(crate) fn pop(&mut self) -> Option<WorkItem<A::InstRef, A::BlockRef>> {
        let item = self.worklist.pop()?;
        self.dequeues += 1;
        Some(item)
    }

    pub fn pending(&self) -> usize {
        self.worklist.len()
    }

    /// Number of worklist items processed so far.
    pub fn dequeues(&self) -> usize {
        self.dequeues
    }

    pub(crate) fn add_live_mask_query(&mut self, inst: A::InstRef) {
        self.live_mask_queries.push(inst);
    }

    pub fn live_mask_queries(&self) -> &[A::InstRef] {
        &self.live_mask_queries
    }

    /// Printable dump of the solved annotations.
    pub fn display<'s>(&'s self, adaptor: &'s A) -> StateDump<'s, 'arena, A> {
        StateDump { state: self, adaptor }
    }
}

pub struct StateDump<'s, 'arena, A: MachineAdaptor> {
    state: &'s ModeState<'arena, A>,
    adaptor: &'s A,
}

impl<A: MachineAdaptor> fmt::Display for StateDump<'_, '_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let adaptor = self.adaptor;
        for block in adaptor.blocks() {
            let info = self.state.block(adaptor, block);
            writeln!(
                f,
                "Block {}: InNeeds = {}, Needs = {}, OutNeeds = {}",
                adaptor.block_name(block),
                info.in_needs,
                info.needs,
                info.out_needs
            )?;
            for inst in adaptor.block_insts(block) {
                if !self.state.is_tracked(adaptor, inst) {
                    continue;
                }
                let info = self.state.inst(adaptor, inst);
                writeln!(
                    f,
                    "  {}    Needs = {}, OutNeeds = {}",
                    adaptor.inst_display(inst),
                    info.needs,
                    info.out_needs
                )?;
            }
        }
        Ok(())
    }
}
