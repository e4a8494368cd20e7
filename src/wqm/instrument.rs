// This module rewrites a function once its mode requirements are solved. The
// entry lane mask is captured into a register when divergent code or live-mask
// queries need it. Functions that only ever need uniform mode get a single
// switch at entry. Otherwise every block is walked with a cursor holding the
// mode currently in effect, and a switch is emitted wherever an instruction
// (or the block exit) needs the other mode. A switch may go anywhere between
// the previous constrained instruction and the one that needs it; inside that
// free zone a point where the condition flag is dead is preferred, because the
// emitted mask operations clobber it. When no such point exists the flag is
// saved before the switch and restored right after it.

//! Mode switch insertion and live-mask query lowering.

use crate::core::{InsertPoint, MachineAdaptor, MaskSource, Mode, ModeOp, PassError, PassResult, RunStats};

use super::state::ModeState;

/// Instructions of one block as they were before instrumentation, with the
/// flag's live gaps mapped onto them.
///
/// Gap `g` is the point right before the `g`-th instruction; gap `len` is the
/// end of the block.
struct BlockWalk<A: MachineAdaptor> {
    block: A::BlockRef,
    insts: Vec<A::InstRef>,
    flag_gaps: Option<Vec<(usize, usize)>>,
}

impl<A: MachineAdaptor> BlockWalk<A> {
    fn new(state: &ModeState<'_, A>, adaptor: &A, block: A::BlockRef) -> Self {
        let insts = adaptor
            .block_insts(block)
            .filter(|&inst| !adaptor.inst_is_phi(inst) && state.is_tracked(adaptor, inst))
            .collect();
        Self { block, insts, flag_gaps: None }
    }

    fn point(&self, gap: usize) -> InsertPoint<A::InstRef, A::BlockRef> {
        match self.insts.get(gap) {
            Some(&inst) => InsertPoint::Before(inst),
            None => InsertPoint::End(self.block),
        }
    }

    /// Inclusive gap ranges in which the flag holds a live value.
    fn flag_gaps(&mut self, adaptor: &mut A) -> &[(usize, usize)] {
        if self.flag_gaps.is_none() {
            let position = |inst: A::InstRef| self.insts.iter().position(|&i| i == inst);
            let gaps = adaptor
                .flag_segments(self.block)
                .into_iter()
                .map(|segment| {
                    let first = segment.def.and_then(position).map_or(0, |def| def + 1);
                    let last = segment.last_use.and_then(position).unwrap_or(self.insts.len());
                    (first, last)
                })
                .collect();
            self.flag_gaps = Some(gaps);
        }
        self.flag_gaps.as_deref().unwrap_or_default()
    }
}

/// Save the flag at `at` and return the point between the save and the restore.
fn save_flag<A: MachineAdaptor>(
    adaptor: &mut A,
    at: InsertPoint<A::InstRef, A::BlockRef>,
    stats: &mut RunStats,
) -> InsertPoint<A::InstRef, A::BlockRef> {
    let saved = adaptor.new_flag_reg();
    adaptor.emit(at, ModeOp::SaveFlag { dst: saved });
    let restore = adaptor.emit(at, ModeOp::RestoreFlag { src: saved });
    stats.flag_saves += 1;
    log::trace!("saved flag around {}", adaptor.inst_display(restore));
    InsertPoint::Before(restore)
}

/// Pick a point in gaps `first..=last` for an operation that clobbers the flag
/// if `clobbers_flag` is set.
///
/// Starting from the preferred end, live flag segments are skipped towards
/// the other end. If the walk runs out of room the flag is saved and restored
/// around the returned point.
fn prepare_insertion<A: MachineAdaptor>(
    adaptor: &mut A,
    walk: &mut BlockWalk<A>,
    first: usize,
    last: usize,
    prefer_last: bool,
    clobbers_flag: bool,
    stats: &mut RunStats,
) -> InsertPoint<A::InstRef, A::BlockRef> {
    if !clobbers_flag {
        return walk.point(if prefer_last { last } else { first });
    }

    let mut gap = if prefer_last { last } else { first };
    let segments = walk.flag_gaps(adaptor);
    let live = loop {
        let Some(&(seg_first, seg_last)) = segments.iter().find(|&&(f, l)| f <= gap && gap <= l) else {
            break false;
        };
        if prefer_last {
            match seg_first.checked_sub(1) {
                Some(next) if next >= first => gap = next,
                _ => break true,
            }
        } else {
            let next = seg_last + 1;
            if next > last {
                break true;
            }
            gap = next;
        }
    };

    let at = walk.point(gap);
    if live {
        save_flag(adaptor, at, stats)
    } else {
        at
    }
}

fn switch_invariant<A: MachineAdaptor>(adaptor: &A, block: A::BlockRef, reason: &str) -> PassError {
    PassError::SwitchInvariant { block: adaptor.block_name(block).to_string(), reason: reason.to_string() }
}

fn process_block<A: MachineAdaptor>(
    state: &ModeState<'_, A>,
    adaptor: &mut A,
    block: A::BlockRef,
    is_entry: bool,
    live_mask: Option<A::Reg>,
    stats: &mut RunStats,
) -> PassResult<()> {
    let info = state.block(adaptor, block);
    if !info.in_needs.contains(Mode::UNIFORM) {
        return Ok(());
    }

    // A non-entry block that is uniform throughout needs nothing.
    if !is_entry && !info.needs.contains(Mode::DIVERGENT) && info.out_needs != Mode::DIVERGENT {
        return Ok(());
    }

    log::debug!("processing block {}", adaptor.block_name(block));

    let mut walk = BlockWalk::new(state, adaptor, block);
    let uniform_from_mask = is_entry;
    let mut cursor = if is_entry { Mode::DIVERGENT } else { Mode::UNIFORM };
    let mut saved_uniform: Option<A::Reg> = None;
    let mut first: Option<usize> = None;

    for gap in 0..=walk.insts.len() {
        let zone_start = *first.get_or_insert(gap);
        let mut needs = Mode::empty();
        let mut out_needs = Mode::empty();

        if let Some(&inst) = walk.insts.get(gap) {
            if adaptor.requires_correct_state(inst) {
                let inst_info = state.inst(adaptor, inst);
                needs = inst_info.needs;
                out_needs = inst_info.out_needs;
            }

            if adaptor.inst_is_terminator(inst) && needs.is_empty() && out_needs == Mode::DIVERGENT {
                needs = Mode::DIVERGENT;
            }

            if adaptor.inst_is_else(inst) && info.out_needs == Mode::DIVERGENT {
                adaptor.set_else_invert(inst);
                stats.else_inverted += 1;
            }
        } else if info.out_needs.contains(Mode::UNIFORM) {
            needs = Mode::UNIFORM;
        } else if info.out_needs == Mode::DIVERGENT {
            needs = Mode::DIVERGENT;
        }

        if needs.is_empty() {
            continue;
        }

        if needs != cursor {
            let to_uniform = needs == Mode::UNIFORM;
            let at = prepare_insertion(
                adaptor,
                &mut walk,
                zone_start,
                gap,
                to_uniform,
                !to_uniform || uniform_from_mask,
                stats,
            );

            let op = if to_uniform {
                if uniform_from_mask != saved_uniform.is_none() {
                    return Err(switch_invariant(
                        adaptor,
                        block,
                        "uniform mask must be saved exactly when it cannot be recomputed",
                    ));
                }
                ModeOp::EnterUniform { saved: saved_uniform.take() }
            } else {
                let Some(live_mask) = live_mask else {
                    return Err(switch_invariant(adaptor, block, "divergent switch without a captured live mask"));
                };
                if !uniform_from_mask && out_needs.contains(Mode::UNIFORM) {
                    saved_uniform = Some(adaptor.new_mask_reg());
                }
                ModeOp::EnterDivergent { live_mask, save: saved_uniform }
            };

            let switch = adaptor.emit(at, op);
            log::trace!("{} -> {}: {}", cursor, needs, adaptor.inst_display(switch));
            stats.mode_switches += 1;
            cursor = needs;
        }

        first = None;
    }

    Ok(())
}

/// Replace every live-mask query by a copy from `src`.
pub fn lower_live_mask_queries<A: MachineAdaptor>(
    adaptor: &mut A,
    queries: &[A::InstRef],
    src: MaskSource<A::Reg>,
    stats: &mut RunStats,
) {
    for &query in queries {
        let copy = adaptor.lower_live_mask_query(query, src);
        log::trace!("lowered live-mask query to {}", adaptor.inst_display(copy));
        stats.live_mask_queries_lowered += 1;
    }
}

/// Insert mode switches according to the solved `state`.
///
/// Returns whether the function changed.
pub fn instrument<A: MachineAdaptor>(
    state: &ModeState<'_, A>,
    adaptor: &mut A,
    global_flags: Mode,
    stats: &mut RunStats,
) -> PassResult<bool> {
    let queries = state.live_mask_queries().to_vec();

    if !global_flags.contains(Mode::UNIFORM) {
        lower_live_mask_queries(adaptor, &queries, MaskSource::Ambient, stats);
        return Ok(!queries.is_empty());
    }

    let entry = adaptor.entry_block();
    let entry_point = match adaptor.first_non_phi(entry) {
        Some(inst) => InsertPoint::Before(inst),
        None => InsertPoint::End(entry),
    };

    let mut live_mask = None;
    if global_flags.contains(Mode::DIVERGENT) || !queries.is_empty() {
        let dst = adaptor.new_mask_reg();
        adaptor.emit(entry_point, ModeOp::CaptureMask { dst });
        live_mask = Some(dst);
    }
    let mask_source = live_mask.map_or(MaskSource::Ambient, MaskSource::Captured);

    if global_flags == Mode::UNIFORM {
        // Uniform throughout: switch once at entry.
        adaptor.emit(entry_point, ModeOp::EnterUniform { saved: None });
        stats.mode_switches += 1;
        lower_live_mask_queries(adaptor, &queries, mask_source, stats);
        return Ok(true);
    }

    let blocks: Vec<_> = adaptor.blocks().collect();
    let processed = blocks
        .into_iter()
        .try_for_each(|block| process_block(state, adaptor, block, block == entry, live_mask, stats));

    // The flag is not otherwise tracked; drop what was computed for it.
    adaptor.remove_flag_range();
    processed?;

    lower_live_mask_queries(adaptor, &queries, mask_source, stats);

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_ir::{InstRef, TestIR, TestIRAdaptor};
    use crate::wqm::analyze_function;
    use bumpalo::Bump;

    fn run(text: &str) -> (String, RunStats) {
        let mut ir = TestIR::parse(text).unwrap();
        let mut stats = RunStats::default();
        {
            let mut adaptor = TestIRAdaptor::new(&mut ir);
            let arena = Bump::new();
            let mut state = ModeState::new_in(&arena, &adaptor);
            let global = analyze_function(&mut state, &adaptor);
            stats.changed = instrument(&state, &mut adaptor, global, &mut stats).unwrap();
        }
        (ir.print(), stats)
    }

    #[test]
    fn test_divergent_only_lowers_queries_to_ambient_mask() {
        let (out, stats) = run("f(ps) {\nentry:\n  %m:s = live\n  store %m\n  ret\n}\n");
        assert_eq!(out, "f(ps) {\nentry:\n  %m:s = copy $exec\n  store %m\n  ret\n}\n");
        assert!(stats.changed);
        assert_eq!(stats.mode_switches, 0);
        assert_eq!(stats.live_mask_queries_lowered, 1);
    }

    #[test]
    fn test_store_after_sample_in_entry() {
        let (out, stats) = run(
            r#"
f(ps) {
entry:
  %a = v_op
  %t = sample %a
  store %t
  ret
}
"#,
        );
        assert_eq!(
            out,
            "f(ps) {\nentry:\n  %mask0:s = copy $exec\n  $exec = s_wqm $exec\n  %a = v_op\n  \
             $exec = s_and $exec, %mask0\n  %t = sample %a\n  store %t\n  ret\n}\n"
        );
        assert_eq!(stats.mode_switches, 2);
        assert_eq!(stats.flag_saves, 0);
    }

    #[test]
    fn test_flag_live_at_preferred_point_moves_switch() {
        // Both switches have room to move: the uniform one goes above the
        // compare, the divergent one below the flag's last use.
        let (out, stats) = run(
            r#"
f(ps) {
entry:
  $scc = s_cmp
  %a = v_op
  %b:s = s_op $scc
  %t = sample %a
  store %t
  ret
}
"#,
        );
        assert_eq!(stats.flag_saves, 0);
        assert_eq!(stats.mode_switches, 2);
        assert!(out.contains("  %mask0:s = copy $exec\n  $exec = s_wqm $exec\n  $scc = s_cmp\n"), "{}", out);
        assert!(out.contains("  %b:s = s_op $scc\n  $exec = s_and $exec, %mask0\n  %t = sample %a\n"), "{}", out);
    }

    #[test]
    fn test_flag_live_across_whole_zone_is_saved() {
        let (out, stats) = run(
            r#"
f(ps) {
entry:
  $scc = s_cmp
  %a = v_op
  %t = sample %a
  store %t
  s_cbranch $scc, ^x, ^x
x:
  ret
}
"#,
        );
        assert_eq!(stats.flag_saves, 1);
        assert!(
            out.contains(
                "  %a = v_op\n  %flag0:s = copy $scc\n  $exec = s_and $exec, %mask0\n  $scc = copy %flag0\n  %t = sample %a\n"
            ),
            "{}",
            out
        );
    }

    #[test]
    fn test_else_is_inverted_when_block_leaves_divergent() {
        let (out, stats) = run(
            r#"
f(ps) {
entry:
  %a = v_op
  %t = sample %a
  else ^next
next:
  store %t
  ret
}
"#,
        );
        assert_eq!(stats.else_inverted, 1);
        assert!(out.contains("  else ^next invert\n"), "{}", out);
    }

    #[test]
    fn test_invariant_error_still_drops_flag_range() {
        let mut ir = TestIR::parse(
            r#"
f(ps) {
entry:
  %a = v_op
  %t = sample %a
  br ^body
body:
  store %t
  %u = sample %a
  ret
}
"#,
        )
        .unwrap();
        let mut adaptor = TestIRAdaptor::new(&mut ir);
        let arena = Bump::new();
        let mut state = ModeState::new_in(&arena, &adaptor);
        let global = analyze_function(&mut state, &adaptor);
        assert_eq!(global, Mode::all());

        // Without uniform on its way out the store never saves the uniform
        // mask, so switching back for the sample has nothing to restore.
        state.inst_mut(&adaptor, InstRef(3)).out_needs = Mode::DIVERGENT;

        let mut stats = RunStats::default();
        let err = instrument(&state, &mut adaptor, global, &mut stats).unwrap_err();
        assert!(matches!(err, PassError::SwitchInvariant { ref block, .. } if block == "body"), "{:?}", err);
        assert!(!adaptor.has_flag_range());
    }
}
