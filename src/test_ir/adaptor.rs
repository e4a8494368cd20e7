//! TestIR adaptor implementation for the mode switching pass.
//!
//! This adaptor lets the pass run on TIR functions, so the analysis and the
//! instrumentation can be tested with hand-written machine code.

use super::liveness::{compute_flag_ranges, FlagRanges};
use super::{Function, Inst, Opcode, PhysReg, Reg, TestIR};
use crate::core::{FlagSegment, InsertPoint, InstClass, MachineAdaptor, MaskSource, ModeOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstRef(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncRef(pub u32);

const EXEC: Reg = Reg::Phys(PhysReg::Exec);
const SCC: Reg = Reg::Phys(PhysReg::Scc);

/// Adaptor that implements MachineAdaptor for TestIR
pub struct TestIRAdaptor<'ir> {
    ir: &'ir mut TestIR,
    cur_func: u32,
    flag_ranges: Option<FlagRanges>,
}

impl<'ir> TestIRAdaptor<'ir> {
    pub fn new(ir: &'ir mut TestIR) -> Self {
        Self { ir, cur_func: 0, flag_ranges: None }
    }

    /// Get all functions in the module
    pub fn funcs(&self) -> impl Iterator<Item = FuncRef> {
        (0..self.ir.functions.len() as u32).map(FuncRef)
    }

    /// Make `func` the function the pass queries and rewrites.
    pub fn switch_func(&mut self, func: FuncRef) {
        self.cur_func = func.0;
        self.flag_ranges = None;
    }

    pub fn func_name(&self, func: FuncRef) -> &str {
        &self.ir.functions[func.0 as usize].name
    }

    pub fn cur_func(&self) -> &Function {
        &self.ir.functions[self.cur_func as usize]
    }

    fn cur_func_mut(&mut self) -> &mut Function {
        &mut self.ir.functions[self.cur_func as usize]
    }

    fn inst(&self, inst: InstRef) -> &Inst {
        &self.cur_func().insts[inst.0 as usize]
    }

    /// Whether the flag live range is currently materialized.
    pub fn has_flag_range(&self) -> bool {
        self.flag_ranges.is_some()
    }

    fn place(&mut self, at: InsertPoint<InstRef, BlockRef>, inst: Inst) -> InstRef {
        let func = self.cur_func_mut();
        let idx = func.push_inst(inst);
        match at {
            InsertPoint::Before(before) => func.insert_before(before.0, idx),
            InsertPoint::End(block) => func.append(block.0, idx),
        }
        InstRef(idx)
    }

    fn is_scalar_reg(&self, reg: Reg) -> bool {
        match reg {
            Reg::Virt(v) => self.cur_func().regs[v as usize].scalar,
            Reg::Phys(p) => p.is_scalar(),
        }
    }
}

impl<'ir> MachineAdaptor for TestIRAdaptor<'ir> {
    type InstRef = InstRef;
    type BlockRef = BlockRef;
    type Reg = Reg;

    fn function_name(&self) -> &str {
        &self.cur_func().name
    }

    fn is_pixel_shader(&self) -> bool {
        self.cur_func().pixel_shader
    }

    fn has_uniform_outputs(&self) -> bool {
        self.cur_func().uniform_outputs
    }

    fn entry_block(&self) -> BlockRef {
        BlockRef(0)
    }

    fn blocks(&self) -> Box<dyn Iterator<Item = BlockRef> + '_> {
        Box::new((0..self.cur_func().blocks.len() as u32).map(BlockRef))
    }

    fn block_count(&self) -> usize {
        self.cur_func().blocks.len()
    }

    fn block_local_idx(&self, block: BlockRef) -> usize {
        block.0 as usize
    }

    fn block_name(&self, block: BlockRef) -> &str {
        &self.cur_func().blocks[block.0 as usize].name
    }

    fn block_preds(&self, block: BlockRef) -> Box<dyn Iterator<Item = BlockRef> + '_> {
        Box::new(self.cur_func().blocks[block.0 as usize].preds.iter().map(|&b| BlockRef(b)))
    }

    fn block_succs(&self, block: BlockRef) -> Box<dyn Iterator<Item = BlockRef> + '_> {
        Box::new(self.cur_func().blocks[block.0 as usize].succs.iter().map(|&b| BlockRef(b)))
    }

    fn block_insts(&self, block: BlockRef) -> Box<dyn Iterator<Item = InstRef> + '_> {
        Box::new(self.cur_func().blocks[block.0 as usize].insts.iter().map(|&i| InstRef(i)))
    }

    fn inst_count(&self) -> usize {
        self.cur_func().insts.len()
    }

    fn inst_local_idx(&self, inst: InstRef) -> usize {
        inst.0 as usize
    }

    fn inst_block(&self, inst: InstRef) -> BlockRef {
        BlockRef(self.inst(inst).block)
    }

    fn prev_inst(&self, inst: InstRef) -> Option<InstRef> {
        let func = self.cur_func();
        let pos = func.position(inst.0)?;
        let block = &func.blocks[self.inst(inst).block as usize];
        pos.checked_sub(1).map(|p| InstRef(block.insts[p]))
    }

    fn inst_is_phi(&self, inst: InstRef) -> bool {
        self.inst(inst).op == Opcode::Phi
    }

    fn inst_is_terminator(&self, inst: InstRef) -> bool {
        self.inst(inst).op.info().is_terminator
    }

    fn inst_class(&self, inst: InstRef) -> InstClass {
        self.inst(inst).op.info().class
    }

    fn inst_is_else(&self, inst: InstRef) -> bool {
        self.inst(inst).op == Opcode::Else
    }

    fn requires_correct_state(&self, inst: InstRef) -> bool {
        let inst = self.inst(inst);
        let info = inst.op.info();
        if info.is_terminator {
            return true;
        }
        if info.is_scalar {
            return false;
        }
        // Copies to scalar registers never touch vector lanes.
        if info.is_transient {
            if let Some(&def) = inst.defs.first() {
                return !self.is_scalar_reg(def);
            }
        }
        true
    }

    fn defines_output(&self, inst: InstRef) -> bool {
        self.inst(inst).defs.iter().any(|d| matches!(d, Reg::Phys(PhysReg::Vgpr(_))))
    }

    fn use_defs(&self, inst: InstRef) -> Vec<InstRef> {
        let func = self.cur_func();
        let data = self.inst(inst);
        let mut defs = Vec::new();
        for &reg in &data.uses {
            match reg {
                Reg::Virt(v) => {
                    if let Some(def) = func.regs[v as usize].def {
                        defs.push(InstRef(def));
                    }
                }
                // The lane mask is what the pass manipulates, never a dependency.
                Reg::Phys(PhysReg::Exec) => {}
                Reg::Phys(_) => {
                    // Physical registers are only followed to their reaching
                    // definition inside the block; live-in values are skipped.
                    let Some(pos) = func.position(inst.0) else { continue };
                    let block = &func.blocks[data.block as usize];
                    if let Some(&def) = block.insts[..pos]
                        .iter()
                        .rev()
                        .find(|&&i| func.insts[i as usize].writes(reg))
                    {
                        defs.push(InstRef(def));
                    }
                }
            }
        }
        defs
    }

    fn inst_display(&self, inst: InstRef) -> String {
        self.cur_func().inst_to_string(inst.0)
    }

    fn flag_segments(&mut self, block: BlockRef) -> Vec<FlagSegment<InstRef>> {
        if self.flag_ranges.is_none() {
            self.flag_ranges = Some(compute_flag_ranges(self.cur_func()));
        }
        self.flag_ranges
            .as_ref()
            .and_then(|ranges| ranges.get(&block.0))
            .cloned()
            .unwrap_or_default()
    }

    fn remove_flag_range(&mut self) {
        self.flag_ranges = None;
    }

    fn new_mask_reg(&mut self) -> Reg {
        self.cur_func_mut().fresh_reg("mask")
    }

    fn new_flag_reg(&mut self) -> Reg {
        self.cur_func_mut().fresh_reg("flag")
    }

    fn emit(&mut self, at: InsertPoint<InstRef, BlockRef>, op: ModeOp<Reg>) -> InstRef {
        let inst = match op {
            ModeOp::CaptureMask { dst } => Inst::new(Opcode::Copy, vec![dst], vec![EXEC]),
            ModeOp::EnterUniform { saved: Some(saved) } => Inst::new(Opcode::Copy, vec![EXEC], vec![saved]),
            ModeOp::EnterUniform { saved: None } => Inst::new(Opcode::SWqm, vec![EXEC], vec![EXEC]),
            ModeOp::EnterDivergent { live_mask, save: Some(save) } => {
                Inst::new(Opcode::SAndSaveexec, vec![save], vec![live_mask])
            }
            ModeOp::EnterDivergent { live_mask, save: None } => {
                Inst::new(Opcode::SAnd, vec![EXEC], vec![EXEC, live_mask])
            }
            ModeOp::SaveFlag { dst } => Inst::new(Opcode::Copy, vec![dst], vec![SCC]),
            ModeOp::RestoreFlag { src } => Inst::new(Opcode::Copy, vec![SCC], vec![src]),
        };
        let placed = self.place(at, inst);
        log::trace!("emitted {}", self.inst_display(placed));
        placed
    }

    fn lower_live_mask_query(&mut self, query: InstRef, src: MaskSource<Reg>) -> InstRef {
        let source = match src {
            MaskSource::Ambient => EXEC,
            MaskSource::Captured(reg) => reg,
        };
        let defs = self.inst(query).defs.clone();
        let copy = self.place(InsertPoint::Before(query), Inst::new(Opcode::Copy, defs, vec![source]));
        self.cur_func_mut().erase(query.0);
        copy
    }

    fn set_else_invert(&mut self, inst: InstRef) {
        self.cur_func_mut().insts[inst.0 as usize].invert = true;
    }
}
