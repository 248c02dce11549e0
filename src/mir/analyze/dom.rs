use crate::mir::*;
use rustc_hash::{FxHashMap, FxHashSet};

/// Dominance relation as full dominator sets, computed by the naive
/// iterative dataflow:
///   Dom(n) = {n} U Inter(Dom(p) for p in preds(n))
/// Post-dominance runs the same solver over the reversed CFG with every
/// Return block as a root.
#[derive(Debug, Clone)]
pub struct DomTree {
    sets: FxHashMap<BlockId, FxHashSet<BlockId>>,
}

impl DomTree {
    /// True iff every relevant path through `b` passes through `a`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.sets.get(&b).is_some_and(|s| s.contains(&a))
    }
}

pub fn compute_dominators(fn_ir: &FnIR) -> DomTree {
    let preds = fn_ir.pred_map();
    let edges_in: Vec<Vec<BlockId>> = preds;
    solve(fn_ir, &[fn_ir.entry], &edges_in)
}

pub fn compute_post_dominators(fn_ir: &FnIR) -> DomTree {
    // Reversed CFG: predecessors become successors.
    let mut edges_in: Vec<Vec<BlockId>> = vec![Vec::new(); fn_ir.blocks.len()];
    for blk in &fn_ir.blocks {
        for succ in blk.term.successors() {
            edges_in[blk.id].push(succ);
        }
    }

    let roots: Vec<BlockId> = fn_ir
        .blocks
        .iter()
        .filter(|b| matches!(b.term, Terminator::Return(_)))
        .map(|b| b.id)
        .collect();

    solve(fn_ir, &roots, &edges_in)
}

fn solve(fn_ir: &FnIR, roots: &[BlockId], edges_in: &[Vec<BlockId>]) -> DomTree {
    let all_blocks: FxHashSet<BlockId> = (0..fn_ir.blocks.len()).collect();
    let roots: FxHashSet<BlockId> = roots.iter().copied().collect();
    let mut sets: FxHashMap<BlockId, FxHashSet<BlockId>> = FxHashMap::default();

    for &b in &all_blocks {
        if roots.contains(&b) {
            sets.insert(b, std::iter::once(b).collect());
        } else {
            sets.insert(b, all_blocks.clone());
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for bb in 0..fn_ir.blocks.len() {
            if roots.contains(&bb) {
                continue;
            }
            let ins = &edges_in[bb];
            if ins.is_empty() {
                continue; // Unreachable from the roots in this direction.
            }

            let mut new_set: Option<FxHashSet<BlockId>> = None;
            for p in ins {
                if let Some(p_set) = sets.get(p) {
                    match new_set {
                        None => new_set = Some(p_set.clone()),
                        Some(ref mut set) => set.retain(|x| p_set.contains(x)),
                    }
                }
            }

            if let Some(mut set) = new_set {
                set.insert(bb);
                if set != sets[&bb] {
                    sets.insert(bb, set);
                    changed = true;
                }
            }
        }
    }

    DomTree { sets }
}
