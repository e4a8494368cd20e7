//! WQM - lane mode switching for SIMT machine code.
//!
//! Pixel shaders run with two kinds of lane masks: the exact set of live
//! lanes, and whole quads, where helper lanes are enabled so derivatives and
//! cross-lane reads see defined neighbours. This crate decides, for every
//! instruction and block of a machine function, which of the two modes must
//! be in effect and rewrites the function to switch between them at as few
//! points as possible, without clobbering a live condition flag.
//!
//! # Primary Usage
//!
//! ```
//! use wqm::test_ir::{TestIR, TestIRAdaptor};
//! use wqm::WholeQuadMode;
//!
//! let mut ir = TestIR::parse("f(ps) {\nentry:\n  %a = v_op\n  %t = sample %a\n  ret\n}\n").unwrap();
//! let mut pass = WholeQuadMode::new();
//! let changed = pass.run(&mut TestIRAdaptor::new(&mut ir)).unwrap();
//! assert!(changed);
//! assert!(ir.print().contains("$exec = s_wqm $exec"));
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Mode lattice, the [`MachineAdaptor`] trait, errors, session
//! - [`wqm`] - Scanner, propagation, instrumentation and the pass driver
//! - [`test_ir`] - Textual machine IR, its adaptor and the filetest runner

pub mod core;
pub mod test_ir;
pub mod wqm;

pub use core::{
    // Adaptor interface
    FlagSegment, InsertPoint, MachineAdaptor, MaskSource, ModeOp,
    // Modes
    InstClass, Mode, Seed,
    // Errors
    PassError, PassResult,
    // Session management
    PassSession, PassStats, RunStats,
};
pub use wqm::{PassConfig, WholeQuadMode};
