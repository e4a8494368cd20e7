// This module is the shared infrastructure of the mode switching pass: the
// two-bit Mode lattice and the closed instruction classification it is seeded
// from, the MachineAdaptor trait through which the pass sees and rewrites a
// target's machine IR, the error types for upstream invariant violations, and
// the session that owns the per-function scratch arena and pass statistics.

//! Core infrastructure
//!
//! # Key Components
//!
//! ## Modes (`mode`)
//! - [`Mode`] flag set over uniform / divergent execution
//! - [`InstClass`] and the class → requirement table
//!
//! ## Adaptor (`adaptor`)
//! - [`MachineAdaptor`]: classification, def/use, flag liveness, emission
//!
//! ## Session Management (`session`)
//! - Arena for per-function annotations, reset between functions
//! - Pass statistics

pub mod adaptor;
pub mod error;
pub mod mode;
pub mod session;

pub use adaptor::{FlagSegment, InsertPoint, MachineAdaptor, MaskSource, ModeOp};
pub use error::{PassError, PassResult};
pub use mode::{InstClass, Mode, Seed};
pub use session::{PassSession, PassStats, RunStats};
