use crate::mir::analyze::dom;
use crate::mir::*;
use rustc_hash::FxHashSet;

/// Read-only view of one natural loop, in the shape the fusion checks
/// consume: header/latch/preheader/guard/exit accessors plus the canonical
/// induction variable when one exists.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub header: BlockId,
    pub latch: BlockId, // The block that jumps back to header
    pub latch_count: usize,
    pub preheader: Option<BlockId>, // Unique predecessor outside the loop
    pub guard: Option<BlockId>,     // Conditional branch that can skip the loop
    pub exits: Vec<BlockId>,        // Blocks outside the loop targeted by loop blocks
    pub body: FxHashSet<BlockId>,   // All blocks in the loop
    pub iv: Option<InductionVar>,
}

#[derive(Debug, Clone)]
pub struct InductionVar {
    pub phi: ValueId,
    pub init: ValueId,
    pub step: i64,      // +1, -1, etc.
    pub step_op: BinOp, // Add/Sub
}

impl InductionVar {
    /// Step with the Add/Sub direction folded in.
    pub fn effective_step(&self) -> i64 {
        match self.step_op {
            BinOp::Sub => -self.step,
            _ => self.step,
        }
    }
}

impl LoopInfo {
    /// Simplified form: unique preheader and a single latch. Loops failing
    /// this are rejected outright by the fusion driver.
    pub fn is_simplified(&self) -> bool {
        self.preheader.is_some() && self.latch_count == 1
    }

    pub fn contains(&self, block: BlockId) -> bool {
        self.body.contains(&block)
    }

    /// The unique block outside the loop that loop exits target, if there
    /// is exactly one.
    pub fn exit_block(&self) -> Option<BlockId> {
        if self.exits.len() == 1 {
            Some(self.exits[0])
        } else {
            None
        }
    }

    /// The block control reaches before the loop body executes: the guard
    /// branch when the loop is guarded, the preheader otherwise.
    pub fn entry_point(&self) -> Option<BlockId> {
        self.guard.or(self.preheader)
    }

    /// True iff any other discovered loop nests inside this one.
    pub fn contains_nested(&self, all: &[LoopInfo]) -> bool {
        all.iter()
            .any(|other| other.header != self.header && self.body.contains(&other.header))
    }

    /// Takes over the blocks of a retired loop after fusion.
    pub fn absorb(&mut self, retired: &LoopInfo) {
        for &b in &retired.body {
            self.body.insert(b);
        }
    }
}

pub struct LoopAnalyzer<'a> {
    fn_ir: &'a FnIR,
    preds: Vec<Vec<BlockId>>,
    reachable: FxHashSet<BlockId>,
}

impl<'a> LoopAnalyzer<'a> {
    pub fn new(fn_ir: &'a FnIR) -> Self {
        Self {
            fn_ir,
            preds: fn_ir.pred_map(),
            reachable: fn_ir.reachable_blocks(),
        }
    }

    /// Discovers natural loops from back edges (src -> dst where dst
    /// dominates src). Loops sharing a header are merged into one LoopInfo
    /// with latch_count > 1, which is enough for the simplified-form check
    /// to reject them. Unreachable blocks never form loops, so a region
    /// disconnected by a prior rewrite cannot resurface here.
    ///
    /// Returned in reverse structural order: later headers first.
    pub fn find_loops(&self) -> Vec<LoopInfo> {
        let doms = dom::compute_dominators(self.fn_ir);
        let mut headers: Vec<BlockId> = Vec::new();
        let mut latches: Vec<Vec<BlockId>> = Vec::new();

        for blk in &self.fn_ir.blocks {
            if !self.reachable.contains(&blk.id) {
                continue;
            }
            for dst in blk.term.successors() {
                if doms.dominates(dst, blk.id) {
                    // Back edge blk -> dst; dst is header, blk is latch.
                    match headers.iter().position(|&h| h == dst) {
                        Some(i) => latches[i].push(blk.id),
                        None => {
                            headers.push(dst);
                            latches.push(vec![blk.id]);
                        }
                    }
                }
            }
        }

        let mut loops: Vec<LoopInfo> = headers
            .into_iter()
            .zip(latches)
            .map(|(header, latches)| self.analyze_natural_loop(header, &latches))
            .collect();
        loops.sort_by(|a, b| b.header.cmp(&a.header));
        loops
    }

    fn analyze_natural_loop(&self, header: BlockId, latches: &[BlockId]) -> LoopInfo {
        // Collect body blocks by walking predecessors from each latch back
        // to the header.
        let mut body = FxHashSet::default();
        body.insert(header);
        let mut stack: Vec<BlockId> = Vec::new();
        for &latch in latches {
            if body.insert(latch) {
                stack.push(latch);
            }
        }
        while let Some(node) = stack.pop() {
            for &pred in &self.preds[node] {
                if body.insert(pred) {
                    stack.push(pred);
                }
            }
        }

        // Exits: blocks outside the loop targeted by loop blocks.
        let mut exits: Vec<BlockId> = Vec::new();
        for &block in &body {
            for succ in self.fn_ir.successors(block) {
                if !body.contains(&succ) && !exits.contains(&succ) {
                    exits.push(succ);
                }
            }
        }
        exits.sort_unstable();

        let preheader = self.find_preheader(header, &body);
        let guard = preheader.and_then(|ph| self.find_guard(ph, &exits));
        let latch = latches[0];
        let iv = self.find_induction_variable(header, latch);

        LoopInfo {
            header,
            latch,
            latch_count: latches.len(),
            preheader,
            guard,
            exits,
            body,
            iv,
        }
    }

    fn find_preheader(&self, header: BlockId, body: &FxHashSet<BlockId>) -> Option<BlockId> {
        let outside: Vec<BlockId> = self.preds[header]
            .iter()
            .copied()
            .filter(|p| !body.contains(p))
            .collect();
        match outside.as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    /// A loop is guarded when the preheader's unique predecessor branches
    /// conditionally, with one arm entering the preheader and the other
    /// skipping the loop entirely, landing where the loop itself exits.
    /// A branch whose other arm goes anywhere else gates nothing: a
    /// preceding loop's header exiting into this preheader is the common
    /// case and must not be mistaken for a guard.
    fn find_guard(&self, preheader: BlockId, exits: &[BlockId]) -> Option<BlockId> {
        let [g] = self.preds[preheader].as_slice() else {
            return None;
        };
        let Terminator::If {
            then_bb, else_bb, ..
        } = &self.fn_ir.blocks[*g].term
        else {
            return None;
        };
        let skip = if *then_bb == preheader {
            *else_bb
        } else if *else_bb == preheader {
            *then_bb
        } else {
            return None;
        };
        if skip != preheader && exits.contains(&skip) {
            Some(*g)
        } else {
            None
        }
    }

    /// Traces header phis for the fusion anchor: a two-way phi whose latch
    /// incoming value is an additive update of the phi itself by a constant
    /// step.
    fn find_induction_variable(&self, header: BlockId, latch: BlockId) -> Option<InductionVar> {
        for (vid, val) in self.fn_ir.values.iter().enumerate() {
            if val.phi_block != Some(header) {
                continue;
            }
            let ValueKind::Phi { args } = &val.kind else {
                continue;
            };
            if args.len() != 2 {
                continue;
            }
            let Some((next_val, _)) = args.iter().find(|(_, b)| *b == latch) else {
                continue;
            };
            let (init, _) = args.iter().find(|(_, b)| *b != latch)?;

            if let Some((step, step_op)) = self.analyze_step(*next_val, vid) {
                return Some(InductionVar {
                    phi: vid,
                    init: *init,
                    step,
                    step_op,
                });
            }
        }
        None
    }

    fn analyze_step(&self, val_id: ValueId, phi_id: ValueId) -> Option<(i64, BinOp)> {
        let ValueKind::Binary { op, lhs, rhs } = &self.fn_ir.values[val_id].kind else {
            return None;
        };
        if !matches!(op, BinOp::Add | BinOp::Sub) {
            return None;
        }
        let simple_const = |vid: ValueId| -> Option<i64> {
            if let ValueKind::Const(n) = &self.fn_ir.values[vid].kind {
                Some(*n)
            } else {
                None
            }
        };

        if *lhs == phi_id {
            if let Some(n) = simple_const(*rhs) {
                return Some((n, *op));
            }
        }
        if *op == BinOp::Add && *rhs == phi_id {
            if let Some(n) = simple_const(*lhs) {
                return Some((n, *op));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // entry -> ph -> header(If iv < 10 -> body / exit); body -> latch -> header
    fn counting_loop() -> (FnIR, ValueId) {
        let mut f = FnIR::new("count", vec![ParamDecl::array("a")]);
        let entry = f.add_block();
        let ph = f.add_block();
        let header = f.add_block();
        let body = f.add_block();
        let latch = f.add_block();
        let exit = f.add_block();

        let c0 = f.add_const(0);
        let c1 = f.add_const(1);
        let c10 = f.add_const(10);
        let a = f.add_param(0);
        let iv = f.add_phi(header, vec![(c0, ph)]);
        let next = f.add_binary(BinOp::Add, iv, c1);
        f.set_phi_args(iv, vec![(c0, ph), (next, latch)]);
        let cond = f.add_binary(BinOp::Lt, iv, c10);

        f.set_term(entry, Terminator::Goto(ph));
        f.set_term(ph, Terminator::Goto(header));
        f.set_term(
            header,
            Terminator::If {
                cond,
                then_bb: body,
                else_bb: exit,
            },
        );
        f.push_store(body, a, iv, iv);
        f.set_term(body, Terminator::Goto(latch));
        f.set_term(latch, Terminator::Goto(header));
        f.set_term(exit, Terminator::Return(None));
        (f, iv)
    }

    #[test]
    fn finds_canonical_loop_shape() {
        let (f, iv) = counting_loop();
        let loops = LoopAnalyzer::new(&f).find_loops();
        assert_eq!(loops.len(), 1);
        let lp = &loops[0];
        assert_eq!(lp.header, 2);
        assert_eq!(lp.latch, 4);
        assert_eq!(lp.preheader, Some(1));
        assert_eq!(lp.guard, None);
        assert_eq!(lp.exit_block(), Some(5));
        assert!(lp.is_simplified());
        assert!(lp.contains(3));
        assert!(!lp.contains(1));

        let found = lp.iv.as_ref().expect("induction variable");
        assert_eq!(found.phi, iv);
        assert_eq!(found.effective_step(), 1);
    }

    #[test]
    fn two_back_edges_are_not_simplified() {
        let (mut f, _) = counting_loop();
        // Second latch: body conditionally loops straight back to header.
        let extra = f.add_block();
        let cond2 = f.add_const(1);
        f.set_term(
            3,
            Terminator::If {
                cond: cond2,
                then_bb: 4,
                else_bb: extra,
            },
        );
        f.set_term(extra, Terminator::Goto(2));

        let loops = LoopAnalyzer::new(&f).find_loops();
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].latch_count, 2);
        assert!(!loops[0].is_simplified());
    }

    #[test]
    fn unreachable_cycle_is_ignored() {
        let (mut f, _) = counting_loop();
        let dead_a = f.add_block();
        let dead_b = f.add_block();
        f.set_term(dead_a, Terminator::Goto(dead_b));
        f.set_term(dead_b, Terminator::Goto(dead_a));

        let loops = LoopAnalyzer::new(&f).find_loops();
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].header, 2);
    }

    #[test]
    fn nested_loop_is_detected() {
        let mut f = FnIR::new("nested", vec![ParamDecl::scalar("p")]);
        let entry = f.add_block();
        let ph_outer = f.add_block();
        let h_outer = f.add_block();
        let ph_inner = f.add_block();
        let h_inner = f.add_block();
        let latch_inner = f.add_block();
        let latch_outer = f.add_block();
        let exit = f.add_block();
        let p = f.add_param(0);

        f.set_term(entry, Terminator::Goto(ph_outer));
        f.set_term(ph_outer, Terminator::Goto(h_outer));
        f.set_term(
            h_outer,
            Terminator::If {
                cond: p,
                then_bb: ph_inner,
                else_bb: exit,
            },
        );
        f.set_term(ph_inner, Terminator::Goto(h_inner));
        f.set_term(
            h_inner,
            Terminator::If {
                cond: p,
                then_bb: latch_inner,
                else_bb: latch_outer,
            },
        );
        f.set_term(latch_inner, Terminator::Goto(h_inner));
        f.set_term(latch_outer, Terminator::Goto(h_outer));
        f.set_term(exit, Terminator::Return(None));

        let loops = LoopAnalyzer::new(&f).find_loops();
        assert_eq!(loops.len(), 2);
        let outer = loops.iter().find(|l| l.header == h_outer).unwrap();
        let inner = loops.iter().find(|l| l.header == h_inner).unwrap();
        assert!(outer.contains_nested(&loops));
        assert!(!inner.contains_nested(&loops));
    }

    #[test]
    fn exit_branch_into_next_preheader_is_not_a_guard() {
        // Two back-to-back loops; the first header's exit arm lands in the
        // second loop's preheader. That branch cannot skip the second
        // loop, so the second loop is unguarded and enters through its
        // preheader.
        let mut f = FnIR::new("pair", vec![ParamDecl::scalar("p")]);
        let entry = f.add_block();
        let ph1 = f.add_block();
        let h1 = f.add_block();
        let latch1 = f.add_block();
        let ph2 = f.add_block();
        let h2 = f.add_block();
        let latch2 = f.add_block();
        let exit = f.add_block();
        let p = f.add_param(0);

        f.set_term(entry, Terminator::Goto(ph1));
        f.set_term(ph1, Terminator::Goto(h1));
        f.set_term(
            h1,
            Terminator::If {
                cond: p,
                then_bb: latch1,
                else_bb: ph2,
            },
        );
        f.set_term(latch1, Terminator::Goto(h1));
        f.set_term(ph2, Terminator::Goto(h2));
        f.set_term(
            h2,
            Terminator::If {
                cond: p,
                then_bb: latch2,
                else_bb: exit,
            },
        );
        f.set_term(latch2, Terminator::Goto(h2));
        f.set_term(exit, Terminator::Return(None));

        let loops = LoopAnalyzer::new(&f).find_loops();
        let second = loops.iter().find(|l| l.header == h2).unwrap();
        assert_eq!(second.preheader, Some(ph2));
        assert_eq!(second.guard, None);
        assert_eq!(second.entry_point(), Some(ph2));

        let first = loops.iter().find(|l| l.header == h1).unwrap();
        assert_eq!(first.exit_block(), Some(ph2));
    }

    #[test]
    fn guard_block_is_reported() {
        let (mut f, _) = counting_loop();
        // Turn entry into a guard: If c -> ph / exit.
        let c = f.add_const(1);
        f.set_term(
            0,
            Terminator::If {
                cond: c,
                then_bb: 1,
                else_bb: 5,
            },
        );
        let loops = LoopAnalyzer::new(&f).find_loops();
        assert_eq!(loops[0].guard, Some(0));
        assert_eq!(loops[0].entry_point(), Some(0));
    }
}
