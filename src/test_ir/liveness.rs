// This module computes where the scalar condition flag ($scc) is live in a TIR
// function, which is the only liveness information the mode switching pass
// consumes. It first orders blocks in post order with an explicit DFS stack
// (the same walk used for block layout elsewhere), then solves the
// backward "live on entry" problem for the flag until nothing changes, and
// finally splits each block into segments running from a flag definition (or
// the block entry) to the last read of that definition (or the block exit).
// Unreachable blocks are appended after the DFS order so every block is solved.

use super::{Function, InstRef, PhysReg, Reg};
use crate::core::FlagSegment;
use hashbrown::{HashMap, HashSet};

const FLAG: Reg = Reg::Phys(PhysReg::Scc);

/// Flag live segments per block index.
pub type FlagRanges = HashMap<u32, Vec<FlagSegment<InstRef>>>;

/// Post order of the blocks reachable from the entry block, followed by the
/// unreachable ones.
pub fn post_order(func: &Function) -> Vec<u32> {
    let mut post = Vec::with_capacity(func.blocks.len());
    let mut stack = vec![(0u32, false)];
    let mut visited = HashSet::new();
    while let Some((block, processed)) = stack.pop() {
        if processed {
            post.push(block);
            continue;
        }
        if !visited.insert(block) {
            continue;
        }
        stack.push((block, true));
        for &succ in func.blocks[block as usize].succs.iter().rev() {
            stack.push((succ, false));
        }
    }
    for block in 0..func.blocks.len() as u32 {
        if !visited.contains(&block) {
            post.push(block);
        }
    }
    post
}

/// Whether the flag is live on entry to each block.
pub fn flag_live_in(func: &Function) -> Vec<bool> {
    let n = func.blocks.len();

    // Per block: read before any write, and written at all.
    let mut upward_use = vec![false; n];
    let mut writes = vec![false; n];
    for (b, block) in func.blocks.iter().enumerate() {
        for &i in &block.insts {
            let inst = &func.insts[i as usize];
            if inst.reads(FLAG) && !writes[b] {
                upward_use[b] = true;
            }
            if inst.writes(FLAG) {
                writes[b] = true;
            }
        }
    }

    let order = post_order(func);
    let mut live_in = vec![false; n];
    let mut changed = true;
    while changed {
        changed = false;
        for &b in &order {
            let block = &func.blocks[b as usize];
            let live_out = block.succs.iter().any(|&s| live_in[s as usize]);
            let live = upward_use[b as usize] || (live_out && !writes[b as usize]);
            if live && !live_in[b as usize] {
                live_in[b as usize] = true;
                changed = true;
            }
        }
    }
    live_in
}

/// Flag live segments of every block of `func`.
pub fn compute_flag_ranges(func: &Function) -> FlagRanges {
    let live_in = flag_live_in(func);
    let mut ranges = FlagRanges::new();

    for (b, block) in func.blocks.iter().enumerate() {
        let live_out = block.succs.iter().any(|&s| live_in[s as usize]);
        let mut segments = Vec::new();
        let mut current = live_in[b].then_some(FlagSegment { def: None, last_use: None });

        for &i in &block.insts {
            let inst = &func.insts[i as usize];
            if inst.reads(FLAG) {
                if let Some(seg) = current.as_mut() {
                    seg.last_use = Some(InstRef(i));
                }
            }
            if inst.writes(FLAG) {
                if let Some(seg) = current.take() {
                    if seg.last_use.is_some() {
                        segments.push(seg);
                    }
                }
                current = Some(FlagSegment { def: Some(InstRef(i)), last_use: None });
            }
        }

        if let Some(mut seg) = current {
            if live_out {
                seg.last_use = None;
                segments.push(seg);
            } else if seg.last_use.is_some() {
                segments.push(seg);
            }
        }

        log::trace!("flag segments of {}: {:?}", block.name, segments);
        ranges.insert(b as u32, segments);
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_ir::TestIR;

    #[test]
    fn test_segments_inside_block() {
        let ir = TestIR::parse(
            r#"
f(ps) {
entry:
  %a = v_op
  $scc = s_cmp %a
  %b = v_op %a
  %c:s = s_op $scc
  %d = v_op %b
  ret
}
"#,
        )
        .unwrap();
        let func = &ir.functions[0];
        let ranges = compute_flag_ranges(func);
        assert_eq!(
            ranges[&0],
            vec![FlagSegment { def: Some(InstRef(1)), last_use: Some(InstRef(3)) }]
        );
    }

    #[test]
    fn test_flag_live_across_edge() {
        let ir = TestIR::parse(
            r#"
f(ps) {
entry:
  %a = v_op
  $scc = s_cmp %a
  br ^next
next:
  %b = v_op
  s_cbranch $scc, ^done, ^done
done:
  ret
}
"#,
        )
        .unwrap();
        let func = &ir.functions[0];
        assert_eq!(flag_live_in(func), vec![false, true, false]);

        let ranges = compute_flag_ranges(func);
        assert_eq!(ranges[&0], vec![FlagSegment { def: Some(InstRef(1)), last_use: None }]);
        assert_eq!(ranges[&1], vec![FlagSegment { def: None, last_use: Some(InstRef(4)) }]);
        assert!(ranges[&2].is_empty());
    }

    #[test]
    fn test_dead_flag_def_has_no_segment() {
        let ir = TestIR::parse("f(ps) {\nentry:\n  $scc = s_cmp\n  ret\n}\n").unwrap();
        let ranges = compute_flag_ranges(&ir.functions[0]);
        assert!(ranges[&0].is_empty());
    }

    #[test]
    fn test_post_order_visits_loops_once() {
        let ir = TestIR::parse(
            r#"
f(ps) {
entry:
  br ^body
body:
  $scc = s_cmp
  s_cbranch $scc, ^body, ^exit
exit:
  ret
dead:
  ret
}
"#,
        )
        .unwrap();
        assert_eq!(post_order(&ir.functions[0]), vec![2, 1, 0, 3]);
    }
}
