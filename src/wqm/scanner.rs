//! Seeding of per-instruction requirements.

use crate::core::{MachineAdaptor, Mode, Seed};

use super::state::{ModeState, WorkItem};

/// Give `inst` its own requirement unless it already has one.
///
/// Returns whether the instruction was newly marked. An instruction keeps the
/// first mode it is marked with: an atomic that feeds a derivative stays
/// divergent, which is what the hardware semantics ask for.
pub(crate) fn mark_instruction<A: MachineAdaptor>(
    state: &mut ModeState<'_, A>,
    adaptor: &A,
    inst: A::InstRef,
    flag: Mode,
) -> bool {
    debug_assert!(flag.is_single());
    let info = state.inst_mut(adaptor, inst);
    if !info.needs.is_empty() {
        return false;
    }
    info.needs = flag;
    state.push(WorkItem::Inst(inst));
    true
}

/// Mark every instruction defining an input of `inst` as uniform, and the
/// inputs of those, and so on.
///
/// Runs on an explicit stack. Def-use chains through loop PHIs are cyclic, so
/// the walk only continues from instructions it marked itself.
pub(crate) fn mark_uses_uniform<A: MachineAdaptor>(
    state: &mut ModeState<'_, A>,
    adaptor: &A,
    inst: A::InstRef,
) {
    let mut stack = vec![inst];
    while let Some(user) = stack.pop() {
        for def in adaptor.use_defs(user) {
            if mark_instruction(state, adaptor, def, Mode::UNIFORM) {
                stack.push(def);
            }
        }
    }
}

/// Seed requirements from instruction classes and collect live-mask queries.
///
/// Returns the union of every requirement seen in the function.
pub fn scan_instructions<A: MachineAdaptor>(state: &mut ModeState<'_, A>, adaptor: &A) -> Mode {
    let mut global_flags = Mode::empty();
    let uniform_outputs = adaptor.has_uniform_outputs();

    for block in adaptor.blocks() {
        for inst in adaptor.block_insts(block) {
            let flags = match adaptor.inst_class(inst).seed() {
                Seed::Needs(mode) => mode,
                Seed::UniformInputs => {
                    // Derivatives only need their inputs computed for whole quads.
                    mark_uses_uniform(state, adaptor, inst);
                    global_flags |= Mode::UNIFORM;
                    continue;
                }
                Seed::LiveMaskQuery => {
                    state.add_live_mask_query(inst);
                    continue;
                }
                Seed::None if uniform_outputs && adaptor.defines_output(inst) => Mode::UNIFORM,
                Seed::None => continue,
            };

            mark_instruction(state, adaptor, inst, flags);
            global_flags |= flags;
        }
    }

    log::debug!("scan: global flags {}, {} live-mask queries", global_flags, state.live_mask_queries().len());
    global_flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_ir::{InstRef, TestIR, TestIRAdaptor};
    use bumpalo::Bump;

    #[test]
    fn test_seeds_and_global_flags() {
        let mut ir = TestIR::parse(
            r#"
f(ps) {
entry:
  %a = v_op
  %b = v_op %a
  %c = v_op
  %t = sample %b
  %d = ds %c
  %m:s = live
  store %t
  ret
}
"#,
        )
        .unwrap();
        let adaptor = TestIRAdaptor::new(&mut ir);
        let arena = Bump::new();
        let mut state = ModeState::new_in(&arena, &adaptor);

        let global = scan_instructions(&mut state, &adaptor);
        assert_eq!(global, Mode::all());

        let needs = |i: u32| state.inst(&adaptor, InstRef(i)).needs;
        // %b and %a feed the sample; the sample itself is unconstrained.
        assert_eq!(needs(0), Mode::UNIFORM);
        assert_eq!(needs(1), Mode::UNIFORM);
        assert_eq!(needs(2), Mode::empty());
        assert_eq!(needs(3), Mode::empty());
        assert_eq!(needs(4), Mode::UNIFORM);
        assert_eq!(needs(5), Mode::empty());
        assert_eq!(needs(6), Mode::DIVERGENT);
        assert_eq!(state.live_mask_queries(), &[InstRef(5)]);
        assert!(state.inst_infos().iter().all(|i| i.out_needs.is_empty()));
    }

    #[test]
    fn test_first_mark_wins() {
        let mut ir = TestIR::parse(
            r#"
f(ps) {
entry:
  %a = atomic
  %t = sample %a
  ret
}
"#,
        )
        .unwrap();
        let adaptor = TestIRAdaptor::new(&mut ir);
        let arena = Bump::new();
        let mut state = ModeState::new_in(&arena, &adaptor);

        scan_instructions(&mut state, &adaptor);
        assert_eq!(state.inst(&adaptor, InstRef(0)).needs, Mode::DIVERGENT);
    }

    #[test]
    fn test_transitive_marking_terminates_on_cycles() {
        let mut ir = TestIR::parse(
            r#"
f(ps) {
entry:
  %init = v_op
  br ^body
body:
  %x = phi [^entry, %init], [^body, %next]
  %next = v_op %x
  %t = sample %next
  $scc = s_cmp
  s_cbranch $scc, ^body, ^exit
exit:
  ret
}
"#,
        )
        .unwrap();
        let adaptor = TestIRAdaptor::new(&mut ir);
        let arena = Bump::new();
        let mut state = ModeState::new_in(&arena, &adaptor);

        scan_instructions(&mut state, &adaptor);
        for i in [0, 2, 3] {
            assert_eq!(state.inst(&adaptor, InstRef(i)).needs, Mode::UNIFORM, "inst {}", i);
        }
        // Each instruction is queued once, when it is first marked.
        assert_eq!(state.pending(), 3);
    }

    #[test]
    fn test_uniform_outputs_attribute() {
        let mut ir = TestIR::parse(
            r#"
f(ps, uniform_outputs) {
entry:
  %a = v_op
  $v0 = v_op %a
  ret
}
"#,
        )
        .unwrap();
        let adaptor = TestIRAdaptor::new(&mut ir);
        let arena = Bump::new();
        let mut state = ModeState::new_in(&arena, &adaptor);

        assert_eq!(scan_instructions(&mut state, &adaptor), Mode::UNIFORM);
        assert_eq!(state.inst(&adaptor, InstRef(1)).needs, Mode::UNIFORM);
        // Inputs follow during propagation, not during the scan.
        assert_eq!(state.inst(&adaptor, InstRef(0)).needs, Mode::empty());
    }
}
