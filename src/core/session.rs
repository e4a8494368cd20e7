// This module provides the pass session: the scratch arena that per-function
// annotation arrays and the worklist are allocated in, and the statistics
// accumulated over every function the pass has seen. The arena is reset at
// the start of each function, so annotations never outlive the run that
// produced them while the allocation itself is reused across functions.
// PassStats is plain counters plus a Display implementation for the driver's
// --stats output.

//! Arena-based pass session management.

use bumpalo::Bump;
use std::fmt;

/// Scratch memory and statistics shared by all runs of one pass object.
pub struct PassSession {
    /// Arena for per-function annotations.
    scratch: Bump,

    stats: PassStats,

    /// Function currently being processed.
    current_function: Option<String>,
}

impl PassSession {
    pub fn new() -> Self {
        Self { scratch: Bump::new(), stats: PassStats::default(), current_function: None }
    }

    /// Session whose arena starts with `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { scratch: Bump::with_capacity(capacity), ..Self::new() }
    }

    /// Start a new function: release the previous function's annotations.
    pub fn begin_function(&mut self, name: &str) {
        self.scratch.reset();
        self.current_function = Some(name.to_string());
        self.stats.functions_seen += 1;
    }

    /// Arena for the current function.
    pub fn scratch(&self) -> &Bump {
        &self.scratch
    }

    pub fn current_function(&self) -> Option<&str> {
        self.current_function.as_deref()
    }

    /// Bytes currently allocated in the scratch arena.
    pub fn memory_used(&self) -> usize {
        self.scratch.allocated_bytes()
    }

    pub fn stats(&self) -> &PassStats {
        &self.stats
    }

    /// Fold the counters of one finished run into the session totals.
    pub fn record_run(&mut self, run: &RunStats) {
        let stats = &mut self.stats;
        if run.changed {
            stats.functions_changed += 1;
        }
        stats.worklist_dequeues += run.worklist_dequeues;
        stats.mode_switches += run.mode_switches;
        stats.flag_saves += run.flag_saves;
        stats.live_mask_queries_lowered += run.live_mask_queries_lowered;
        stats.else_inverted += run.else_inverted;
        if let Some(name) = &self.current_function {
            log::debug!(
                "{}: {} switches, {} flag saves, {} dequeues",
                name,
                run.mode_switches,
                run.flag_saves,
                run.worklist_dequeues
            );
        }
    }
}

impl Default for PassSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters of a single run of the pass on one function.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub changed: bool,
    pub worklist_dequeues: usize,
    pub mode_switches: usize,
    pub flag_saves: usize,
    pub live_mask_queries_lowered: usize,
    pub else_inverted: usize,
}

/// Totals over every function a session has seen.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassStats {
    /// Functions handed to the pass.
    pub functions_seen: usize,

    /// Functions the pass rewrote.
    pub functions_changed: usize,

    /// Items taken off the propagation worklist.
    pub worklist_dequeues: usize,

    /// Mode switch instructions inserted.
    pub mode_switches: usize,

    /// Flag save/restore pairs inserted.
    pub flag_saves: usize,

    /// Live-mask queries replaced by copies.
    pub live_mask_queries_lowered: usize,

    /// "else" pseudos marked for inversion.
    pub else_inverted: usize,
}

impl fmt::Display for PassStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Mode Switch Statistics:")?;
        writeln!(f, "  Functions seen: {}", self.functions_seen)?;
        writeln!(f, "  Functions changed: {}", self.functions_changed)?;
        writeln!(f, "  Worklist dequeues: {}", self.worklist_dequeues)?;
        writeln!(f, "  Mode switches: {}", self.mode_switches)?;
        writeln!(f, "  Flag saves: {}", self.flag_saves)?;
        writeln!(f, "  Live-mask queries lowered: {}", self.live_mask_queries_lowered)?;
        writeln!(f, "  Else inverted: {}", self.else_inverted)?;
        Ok(())
    }
}
