//! Fixed-point propagation of mode requirements.
//!
//! Requirements flow backwards inside a block, from blocks to their
//! predecessors, and forwards from blocks into their successors' entry
//! requirements. Every update is an OR into a two-bit set, so each field
//! changes at most twice and the worklist drains after
//! O(instructions + blocks) steps.

use crate::core::{MachineAdaptor, Mode};

use super::scanner::{mark_uses_uniform, scan_instructions};
use super::state::{ModeState, WorkItem};

fn propagate_instruction<A: MachineAdaptor>(state: &mut ModeState<'_, A>, adaptor: &A, inst: A::InstRef) {
    let block = adaptor.inst_block(inst);
    let mut info = state.inst(adaptor, inst);

    // Branches and stores to scratch memory that feed uniform code must run
    // uniform themselves.
    if info.out_needs.contains(Mode::UNIFORM)
        && info.needs.is_empty()
        && (adaptor.inst_is_terminator(inst) || adaptor.inst_class(inst).is_memory_store())
    {
        state.inst_mut(adaptor, inst).needs = Mode::UNIFORM;
        info.needs = Mode::UNIFORM;
    }

    let block_info = state.block_mut(adaptor, block);
    block_info.needs |= info.needs;
    if block_info.in_needs.merge(info.needs) {
        state.push(WorkItem::Block(block));
    }

    if let Some(prev) = adaptor.prev_inst(inst) {
        if !adaptor.inst_is_phi(prev) {
            let in_needs = info.needs | info.out_needs;
            if state.inst_mut(adaptor, prev).out_needs.merge(in_needs) {
                state.push(WorkItem::Inst(prev));
            }
        }
    }

    debug_assert!(info.needs != Mode::all(), "{} needs both modes", adaptor.inst_display(inst));

    if info.needs == Mode::UNIFORM {
        mark_uses_uniform(state, adaptor, inst);
    }
}

fn propagate_block<A: MachineAdaptor>(state: &mut ModeState<'_, A>, adaptor: &A, block: A::BlockRef) {
    let info = state.block(adaptor, block);

    if let Some(last) = adaptor.block_insts(block).last() {
        if state.inst_mut(adaptor, last).out_needs.merge(info.out_needs) {
            state.push(WorkItem::Inst(last));
        }
    }

    for pred in adaptor.block_preds(block) {
        let pred_info = state.block_mut(adaptor, pred);
        if pred_info.out_needs.merge(info.in_needs) {
            pred_info.in_needs |= info.in_needs;
            state.push(WorkItem::Block(pred));
        }
    }

    for succ in adaptor.block_succs(block) {
        if state.block_mut(adaptor, succ).in_needs.merge(info.out_needs) {
            state.push(WorkItem::Block(succ));
        }
    }
}

/// Process one worklist item. Returns `false` once the worklist is empty.
pub fn propagate_step<A: MachineAdaptor>(state: &mut ModeState<'_, A>, adaptor: &A) -> bool {
    match state.pop() {
        Some(WorkItem::Inst(inst)) => propagate_instruction(state, adaptor, inst),
        Some(WorkItem::Block(block)) => propagate_block(state, adaptor, block),
        None => return false,
    }
    true
}

/// Drain the worklist.
pub fn propagate<A: MachineAdaptor>(state: &mut ModeState<'_, A>, adaptor: &A) {
    while propagate_step(state, adaptor) {}
}

/// Scan and propagate. Returns the function's global flags.
pub fn analyze_function<A: MachineAdaptor>(state: &mut ModeState<'_, A>, adaptor: &A) -> Mode {
    let global_flags = scan_instructions(state, adaptor);
    propagate(state, adaptor);
    log::debug!("propagation done after {} dequeues", state.dequeues());
    global_flags
}
