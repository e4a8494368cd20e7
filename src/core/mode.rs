// This module defines the two-bit execution mode lattice the pass computes over.
// A Mode is a set over {UNIFORM, DIVERGENT}: UNIFORM means every lane of a quad
// is enabled (required for derivative and cross-lane reads), DIVERGENT means
// the exact live-lane mask is in effect (required around stores and atomics).
// The empty set means the point is unconstrained. Annotations only ever grow
// by bitwise OR, which is what makes the propagation terminate. InstClass is
// the closed classification of instructions the scanner seeds from, together
// with the small table mapping each class to the requirement it introduces.

//! Execution modes and instruction classes.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Set of execution modes required at a program point.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Mode: u8 {
        /// All lanes of every quad enabled.
        const UNIFORM = 0x1;
        /// Exactly the live lanes enabled.
        const DIVERGENT = 0x2;
    }
}

impl Mode {
    /// True if this set names exactly one mode.
    pub fn is_single(self) -> bool {
        self == Mode::UNIFORM || self == Mode::DIVERGENT
    }

    /// OR `other` into `self`, returning whether anything changed.
    pub fn merge(&mut self, other: Mode) -> bool {
        let grown = *self | other;
        if grown == *self {
            return false;
        }
        *self = grown;
        true
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        if self.contains(Mode::UNIFORM) {
            f.write_str("Uniform")?;
        }
        if self.contains(Mode::DIVERGENT) {
            if self.contains(Mode::UNIFORM) {
                f.write_str("|")?;
            }
            f.write_str("Divergent")?;
        }
        Ok(())
    }
}

/// Classification of a machine instruction as far as lane modes are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstClass {
    /// Lane-wise computation with no inherent requirement.
    Plain,
    /// Reads values of neighbouring lanes directly (LDS permutes, swizzles).
    LaneShare,
    /// Derivative consumer such as an image sample; its inputs must have been
    /// computed for the whole quad but the instruction itself may run in any mode.
    Derivative,
    /// Side effect that must only happen for live lanes.
    SideEffect { store: bool },
    /// Store to private memory that later uniform code may read back.
    MemoryStore,
    /// Request for the lane mask the function was entered with.
    LiveMaskQuery,
}

/// What the scanner does with an instruction of a given class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seed {
    /// Nothing to record.
    None,
    /// The instruction itself needs this mode.
    Needs(Mode),
    /// Every definition feeding this instruction needs uniform mode.
    UniformInputs,
    /// Remember the instruction for later lowering.
    LiveMaskQuery,
}

impl InstClass {
    /// Seed table used by the scanner.
    pub const fn seed(self) -> Seed {
        match self {
            InstClass::Plain | InstClass::MemoryStore => Seed::None,
            InstClass::LaneShare => Seed::Needs(Mode::UNIFORM),
            InstClass::Derivative => Seed::UniformInputs,
            InstClass::SideEffect { .. } => Seed::Needs(Mode::DIVERGENT),
            InstClass::LiveMaskQuery => Seed::LiveMaskQuery,
        }
    }

    /// Whether the instruction writes memory.
    pub const fn is_memory_store(self) -> bool {
        matches!(self, InstClass::MemoryStore | InstClass::SideEffect { store: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_reports_growth() {
        let mut mode = Mode::empty();
        assert!(mode.merge(Mode::UNIFORM));
        assert!(!mode.merge(Mode::UNIFORM));
        assert!(mode.merge(Mode::DIVERGENT));
        assert_eq!(mode, Mode::all());
        assert!(!mode.merge(Mode::empty()));
    }

    #[test]
    fn test_display() {
        assert_eq!(Mode::empty().to_string(), "-");
        assert_eq!(Mode::UNIFORM.to_string(), "Uniform");
        assert_eq!(Mode::DIVERGENT.to_string(), "Divergent");
        assert_eq!(Mode::all().to_string(), "Uniform|Divergent");
    }

    #[test]
    fn test_seed_table() {
        assert_eq!(InstClass::LaneShare.seed(), Seed::Needs(Mode::UNIFORM));
        assert_eq!(InstClass::SideEffect { store: false }.seed(), Seed::Needs(Mode::DIVERGENT));
        assert_eq!(InstClass::Derivative.seed(), Seed::UniformInputs);
        assert_eq!(InstClass::MemoryStore.seed(), Seed::None);
        assert!(InstClass::MemoryStore.is_memory_store());
        assert!(InstClass::SideEffect { store: true }.is_memory_store());
        assert!(!InstClass::SideEffect { store: false }.is_memory_store());
        assert!(!InstClass::Plain.is_memory_store());
    }
}
