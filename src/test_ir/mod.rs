//! Test IR (TIR) data structures for exercising the mode switching pass.
//!
//! TIR is a small machine-level IR: registers instead of SSA values, explicit
//! physical registers for the lane mask and the condition flag, and opcodes
//! grouped by how they interact with lane modes. It is meant to be easy to
//! write by hand and to print back after the pass has rewritten it.
//!
//! # TIR Format
//!
//! ```text
//! ; Comments start with semicolon
//! func_name(ps, uniform_outputs) {
//! entry:
//!     %a = v_op
//!     %t = sample %a
//!     $scc = s_cmp %a
//!     store %t
//!     s_cbranch $scc, ^next, ^done
//! next:
//!     br ^done
//! done:
//!     ret
//! }
//! ```
//!
//! `%name` is a virtual register (`%name:s` marks a scalar register at its
//! definition), `$exec` is the lane mask, `$scc` the condition flag, `$vcc`
//! the vector condition and `$vN` a shader output register.

use std::fmt;

use crate::core::InstClass;

pub mod adaptor;
pub mod check;
pub mod liveness;
pub mod parser;

pub use adaptor::{BlockRef, InstRef, TestIRAdaptor};
pub use check::{CheckDirective, TestRunner, TestSpec};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TestIR {
    pub functions: Vec<Function>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Function {
    pub name: String,
    /// Uses the pixel shader calling convention (`ps` attribute).
    pub pixel_shader: bool,
    /// Shader outputs must be computed for whole quads (`uniform_outputs` attribute).
    pub uniform_outputs: bool,
    pub blocks: Vec<Block>,
    /// Instruction arena. Indices are stable; erased instructions stay here but
    /// are no longer listed by any block.
    pub insts: Vec<Inst>,
    pub regs: Vec<VirtReg>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub name: String,
    /// Instruction indices in program order.
    pub insts: Vec<u32>,
    pub succs: Vec<u32>,
    pub preds: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub op: Opcode,
    pub defs: Vec<Reg>,
    pub uses: Vec<Reg>,
    /// Branch targets, or the incoming blocks of a PHI (parallel to `uses`).
    pub targets: Vec<u32>,
    pub block: u32,
    /// Invert flag of the structured "else" pseudo.
    pub invert: bool,
    pub erased: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VirtReg {
    pub name: String,
    pub scalar: bool,
    pub def: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    Virt(u32),
    Phys(PhysReg),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysReg {
    /// Lane mask.
    Exec,
    /// Scalar condition flag.
    Scc,
    /// Vector condition mask.
    Vcc,
    /// Vector register bound to a shader input or output.
    Vgpr(u8),
}

impl PhysReg {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "exec" => Some(PhysReg::Exec),
            "scc" => Some(PhysReg::Scc),
            "vcc" => Some(PhysReg::Vcc),
            _ => name.strip_prefix('v')?.parse().ok().map(PhysReg::Vgpr),
        }
    }

    pub fn is_scalar(self) -> bool {
        !matches!(self, PhysReg::Vgpr(_))
    }
}

impl fmt::Display for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysReg::Exec => write!(f, "$exec"),
            PhysReg::Scc => write!(f, "$scc"),
            PhysReg::Vcc => write!(f, "$vcc"),
            PhysReg::Vgpr(n) => write!(f, "$v{}", n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    VOp,
    SOp,
    SCmp,
    Copy,
    Load,
    Ds,
    Sample,
    Store,
    Atomic,
    Export,
    ScratchStore,
    Live,
    Phi,
    Br,
    CondBr,
    SCbranch,
    Else,
    Ret,
    SWqm,
    SAnd,
    SAndSaveexec,
}

#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub name: &'static str,
    pub is_terminator: bool,
    /// Executes on the scalar unit, independent of the lane mask.
    pub is_scalar: bool,
    /// Disappears or turns into a plain move after coalescing.
    pub is_transient: bool,
    pub class: InstClass,
    /// Number of block operands, `!0` for any.
    pub target_count: u32,
}

impl Opcode {
    pub const fn info(self) -> OpInfo {
        use Opcode::*;
        const fn op(name: &'static str, class: InstClass) -> OpInfo {
            OpInfo { name, is_terminator: false, is_scalar: false, is_transient: false, class, target_count: 0 }
        }
        const fn scalar(name: &'static str) -> OpInfo {
            OpInfo { is_scalar: true, ..op(name, InstClass::Plain) }
        }
        const fn term(name: &'static str, target_count: u32) -> OpInfo {
            OpInfo { is_terminator: true, target_count, ..op(name, InstClass::Plain) }
        }
        match self {
            VOp => op("v_op", InstClass::Plain),
            SOp => scalar("s_op"),
            SCmp => scalar("s_cmp"),
            Copy => OpInfo { is_transient: true, ..op("copy", InstClass::Plain) },
            Load => op("load", InstClass::Plain),
            Ds => op("ds", InstClass::LaneShare),
            Sample => op("sample", InstClass::Derivative),
            Store => op("store", InstClass::SideEffect { store: true }),
            Atomic => op("atomic", InstClass::SideEffect { store: true }),
            Export => op("export", InstClass::SideEffect { store: false }),
            ScratchStore => op("scratch_store", InstClass::MemoryStore),
            Live => OpInfo { is_transient: true, ..op("live", InstClass::LiveMaskQuery) },
            Phi => OpInfo { target_count: !0, ..op("phi", InstClass::Plain) },
            Br => term("br", 1),
            CondBr => term("condbr", 2),
            SCbranch => term("s_cbranch", 2),
            Else => term("else", 1),
            Ret => term("ret", 0),
            SWqm => scalar("s_wqm"),
            SAnd => scalar("s_and"),
            SAndSaveexec => scalar("s_and_saveexec"),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        use Opcode::*;
        const ALL: [Opcode; 21] = [
            VOp, SOp, SCmp, Copy, Load, Ds, Sample, Store, Atomic, Export, ScratchStore, Live,
            Phi, Br, CondBr, SCbranch, Else, Ret, SWqm, SAnd, SAndSaveexec,
        ];
        ALL.into_iter().find(|op| op.info().name == s)
    }
}

impl Inst {
    pub fn new(op: Opcode, defs: Vec<Reg>, uses: Vec<Reg>) -> Self {
        Self { op, defs, uses, targets: Vec::new(), block: 0, invert: false, erased: false }
    }

    pub fn reads(&self, reg: Reg) -> bool {
        self.uses.contains(&reg)
    }

    pub fn writes(&self, reg: Reg) -> bool {
        self.defs.contains(&reg)
    }
}

impl Function {
    /// Scalar virtual register named `prefix` plus the lowest free number.
    pub fn fresh_reg(&mut self, prefix: &str) -> Reg {
        let mut counter = 0;
        let name = loop {
            let candidate = format!("{}{}", prefix, counter);
            if !self.regs.iter().any(|r| r.name == candidate) {
                break candidate;
            }
            counter += 1;
        };
        self.regs.push(VirtReg { name, scalar: true, def: None });
        Reg::Virt(self.regs.len() as u32 - 1)
    }

    /// Add an instruction to the arena without placing it in a block.
    pub fn push_inst(&mut self, inst: Inst) -> u32 {
        let idx = self.insts.len() as u32;
        for def in &inst.defs {
            if let Reg::Virt(v) = *def {
                self.regs[v as usize].def = Some(idx);
            }
        }
        self.insts.push(inst);
        idx
    }

    /// Position of an instruction inside its block, `None` once erased.
    pub fn position(&self, inst: u32) -> Option<usize> {
        let data = &self.insts[inst as usize];
        if data.erased {
            return None;
        }
        let block = &self.blocks[data.block as usize];
        block.insts.iter().position(|&i| i == inst)
    }

    /// Place `new` immediately before `before`.
    pub fn insert_before(&mut self, before: u32, new: u32) {
        let block = self.insts[before as usize].block;
        let pos = self
            .position(before)
            .unwrap_or_else(|| panic!("instruction {} is not in block {}", before, block));
        self.insts[new as usize].block = block;
        self.blocks[block as usize].insts.insert(pos, new);
    }

    /// Place `new` at the end of `block`.
    pub fn append(&mut self, block: u32, new: u32) {
        self.insts[new as usize].block = block;
        self.blocks[block as usize].insts.push(new);
    }

    /// Unlink an instruction from its block.
    pub fn erase(&mut self, inst: u32) {
        if let Some(pos) = self.position(inst) {
            let block = self.insts[inst as usize].block;
            self.blocks[block as usize].insts.remove(pos);
        }
        self.insts[inst as usize].erased = true;
    }

    /// Recompute predecessor lists from successor lists.
    pub fn compute_preds(&mut self) {
        for block in &mut self.blocks {
            block.preds.clear();
        }
        for b in 0..self.blocks.len() {
            for s in self.blocks[b].succs.clone() {
                self.blocks[s as usize].preds.push(b as u32);
            }
        }
    }

    fn write_reg(&self, out: &mut String, reg: Reg, is_def: bool) {
        match reg {
            Reg::Virt(v) => {
                let info = &self.regs[v as usize];
                out.push('%');
                out.push_str(&info.name);
                if is_def && info.scalar {
                    out.push_str(":s");
                }
            }
            Reg::Phys(p) => out.push_str(&p.to_string()),
        }
    }

    /// Textual form of one instruction, as accepted by the parser.
    pub fn inst_to_string(&self, idx: u32) -> String {
        let inst = &self.insts[idx as usize];
        let mut out = String::new();
        for (i, def) in inst.defs.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.write_reg(&mut out, *def, true);
        }
        if !inst.defs.is_empty() {
            out.push_str(" = ");
        }
        out.push_str(inst.op.info().name);

        let mut operands = Vec::new();
        if inst.op == Opcode::Phi {
            for (reg, block) in inst.uses.iter().zip(&inst.targets) {
                let mut s = format!("[^{}, ", self.blocks[*block as usize].name);
                self.write_reg(&mut s, *reg, false);
                s.push(']');
                operands.push(s);
            }
        } else {
            for reg in &inst.uses {
                let mut s = String::new();
                self.write_reg(&mut s, *reg, false);
                operands.push(s);
            }
            for block in &inst.targets {
                operands.push(format!("^{}", self.blocks[*block as usize].name));
            }
        }
        if !operands.is_empty() {
            out.push(' ');
            out.push_str(&operands.join(", "));
        }
        if inst.invert {
            out.push_str(" invert");
        }
        out
    }

    pub fn print(&self) -> String {
        let mut output = String::new();
        let mut attrs = Vec::new();
        if self.pixel_shader {
            attrs.push("ps");
        }
        if self.uniform_outputs {
            attrs.push("uniform_outputs");
        }
        output.push_str(&format!("{}({}) {{\n", self.name, attrs.join(", ")));
        for block in &self.blocks {
            output.push_str(&format!("{}:\n", block.name));
            for &inst in &block.insts {
                output.push_str("  ");
                output.push_str(&self.inst_to_string(inst));
                output.push('\n');
            }
        }
        output.push_str("}\n");
        output
    }
}

impl TestIR {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        parser::parse_ir(text)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn print(&self) -> String {
        self.functions.iter().map(Function::print).collect::<Vec<_>>().join("\n")
    }
}

impl fmt::Display for TestIR {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.print())
    }
}
