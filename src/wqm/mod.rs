// This module is the mode switching pass itself. WholeQuadMode owns the pass
// configuration and a PassSession whose arena holds the per-function
// annotations. A run on one function checks the calling convention and the
// CFG handed over by the adaptor, seeds requirements from instruction classes
// (scanner), solves them to a fixed point (propagate), logs the solved state,
// and finally inserts mode switches and lowers live-mask queries
// (instrument). The adaptor is borrowed mutably for the whole run and nothing
// refers to it afterwards.

//! Lane mode switching pass.
//!
//! Typical flow:
//! ```text
//! for each function {
//!     adaptor.switch_func(func);
//!     pass.run(&mut adaptor)?;
//! }
//! println!("{}", pass.stats());
//! ```

pub mod instrument;
pub mod propagate;
pub mod scanner;
pub mod state;

pub use instrument::{instrument, lower_live_mask_queries};
pub use propagate::{analyze_function, propagate, propagate_step};
pub use scanner::scan_instructions;
pub use state::{BlockInfo, InstrInfo, ModeState, StateDump, WorkItem};

use crate::core::{MachineAdaptor, PassError, PassResult, PassSession, PassStats, RunStats};

/// Knobs of the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassConfig {
    /// Only process functions using the pixel shader calling convention.
    pub require_pixel_shader: bool,
    /// Log the solved annotations at debug level.
    pub dump_state: bool,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self { require_pixel_shader: true, dump_state: true }
    }
}

/// Check that predecessor and successor lists agree and that every block
/// owns the instructions it lists.
pub fn verify_cfg<A: MachineAdaptor>(adaptor: &A) -> PassResult<()> {
    for block in adaptor.blocks() {
        let name = adaptor.block_name(block);
        for succ in adaptor.block_succs(block) {
            if !adaptor.block_preds(succ).any(|p| p == block) {
                return Err(PassError::MalformedCfg {
                    reason: format!("{} is a successor of {} but does not list it as predecessor", adaptor.block_name(succ), name),
                });
            }
        }
        for pred in adaptor.block_preds(block) {
            if !adaptor.block_succs(pred).any(|s| s == block) {
                return Err(PassError::MalformedCfg {
                    reason: format!("{} is a predecessor of {} but does not list it as successor", adaptor.block_name(pred), name),
                });
            }
        }
        for inst in adaptor.block_insts(block) {
            if adaptor.inst_block(inst) != block {
                return Err(PassError::MalformedCfg {
                    reason: format!("{} is listed in {} but belongs to another block", adaptor.inst_display(inst), name),
                });
            }
        }
    }
    Ok(())
}

/// The pass object. Reuse it across functions to keep the arena allocation
/// and accumulate statistics.
pub struct WholeQuadMode {
    config: PassConfig,
    session: PassSession,
}

impl WholeQuadMode {
    pub fn new() -> Self {
        Self::with_config(PassConfig::default())
    }

    pub fn with_config(config: PassConfig) -> Self {
        Self { config, session: PassSession::new() }
    }

    pub fn config(&self) -> &PassConfig {
        &self.config
    }

    pub fn session(&self) -> &PassSession {
        &self.session
    }

    pub fn stats(&self) -> &PassStats {
        self.session.stats()
    }

    /// Run the pass on the adaptor's current function.
    ///
    /// Returns whether the function was modified.
    pub fn run<A: MachineAdaptor>(&mut self, adaptor: &mut A) -> PassResult<bool> {
        self.session.begin_function(adaptor.function_name());

        if self.config.require_pixel_shader && !adaptor.is_pixel_shader() {
            log::debug!("{}: not a pixel shader, skipping", adaptor.function_name());
            return Ok(false);
        }

        verify_cfg(adaptor)?;

        let mut stats = RunStats::default();
        let changed = {
            let mut state = ModeState::new_in(self.session.scratch(), adaptor);
            let global_flags = analyze_function(&mut state, adaptor);
            stats.worklist_dequeues = state.dequeues();

            log::debug!("{}: global flags {}", adaptor.function_name(), global_flags);
            if self.config.dump_state && log::log_enabled!(log::Level::Debug) {
                log::debug!("solved state:\n{}", state.display(adaptor));
            }

            instrument(&state, adaptor, global_flags, &mut stats)?
        };

        stats.changed = changed;
        self.session.record_run(&stats);
        Ok(changed)
    }
}

impl Default for WholeQuadMode {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_ir::{TestIR, TestIRAdaptor};

    #[test]
    fn test_non_pixel_shader_is_skipped() {
        let text = "f() {\nentry:\n  %a = v_op\n  %t = sample %a\n  ret\n}\n";
        let mut ir = TestIR::parse(text).unwrap();
        let mut pass = WholeQuadMode::new();
        assert!(!pass.run(&mut TestIRAdaptor::new(&mut ir)).unwrap());
        assert_eq!(ir.print(), text);
        assert_eq!(pass.stats().functions_seen, 1);
        assert_eq!(pass.stats().functions_changed, 0);
    }

    #[test]
    fn test_gate_can_be_disabled() {
        let mut ir = TestIR::parse("f() {\nentry:\n  %a = v_op\n  %t = sample %a\n  ret\n}\n").unwrap();
        let mut pass = WholeQuadMode::with_config(PassConfig { require_pixel_shader: false, ..Default::default() });
        assert!(pass.run(&mut TestIRAdaptor::new(&mut ir)).unwrap());
        assert!(ir.print().contains("$exec = s_wqm $exec"));
    }

    #[test]
    fn test_malformed_cfg() {
        let mut ir = TestIR::parse("f(ps) {\nentry:\n  br ^next\nnext:\n  ret\n}\n").unwrap();
        ir.functions[0].blocks[1].preds.clear();
        let mut pass = WholeQuadMode::new();
        let err = pass.run(&mut TestIRAdaptor::new(&mut ir)).unwrap_err();
        assert!(matches!(err, PassError::MalformedCfg { .. }));
        assert!(err.to_string().contains("next is a successor of entry"));
    }

    #[test]
    fn test_stats_accumulate_over_functions() {
        let mut ir = TestIR::parse(
            r#"
a(ps) {
entry:
  %x = v_op
  %t = sample %x
  store %t
  ret
}

b(ps) {
entry:
  %y = v_op
  ret
}
"#,
        )
        .unwrap();
        let mut pass = WholeQuadMode::new();
        let mut adaptor = TestIRAdaptor::new(&mut ir);
        let funcs: Vec<_> = adaptor.funcs().collect();
        let mut changed = Vec::new();
        for func in funcs {
            adaptor.switch_func(func);
            changed.push(pass.run(&mut adaptor).unwrap());
        }
        assert_eq!(changed, vec![true, false]);

        let stats = pass.stats();
        assert_eq!(stats.functions_seen, 2);
        assert_eq!(stats.functions_changed, 1);
        assert_eq!(stats.mode_switches, 2);
        assert_eq!(pass.session().current_function(), Some("b"));
    }
}
