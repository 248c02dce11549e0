use crate::mir::analyze::alias::{self, AliasClass};
use crate::mir::analyze::loops::{InductionVar, LoopInfo};
use crate::mir::*;
use rustc_hash::FxHashSet;

/// Direction of a dependence between a write and a read across matched
/// logical iterations of two loops. Same means the read always observes
/// the write from its own iteration; Backward means the read's element is
/// written by an earlier iteration, Forward by a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepDirection {
    Same,
    Forward,
    Backward,
    Unknown,
}

/// A memory write inside a loop body.
#[derive(Debug, Clone, Copy)]
pub struct MemWrite {
    pub base: ValueId,
    pub idx: ValueId,
}

/// A memory read executed (directly or through operand chains) by a loop.
#[derive(Debug, Clone, Copy)]
pub struct MemRead {
    pub value: ValueId,
    pub base: ValueId,
    pub idx: ValueId,
}

pub fn writes_in(fn_ir: &FnIR, lp: &LoopInfo) -> Vec<MemWrite> {
    let mut writes = Vec::new();
    let mut blocks: Vec<BlockId> = lp.body.iter().copied().collect();
    blocks.sort_unstable();
    for bb in blocks {
        for instr in &fn_ir.blocks[bb].instrs {
            match instr {
                Instr::Store { base, idx, .. } => writes.push(MemWrite {
                    base: *base,
                    idx: *idx,
                }),
            }
        }
    }
    writes
}

/// Collects every Load reachable from the loop's instructions and branch
/// conditions through operand chains. This over-approximates the loads the
/// loop executes, which only errs toward rejecting a fusion.
pub fn reads_in(fn_ir: &FnIR, lp: &LoopInfo) -> Vec<MemRead> {
    let mut roots: Vec<ValueId> = Vec::new();
    let mut blocks: Vec<BlockId> = lp.body.iter().copied().collect();
    blocks.sort_unstable();
    for bb in blocks {
        let blk = &fn_ir.blocks[bb];
        for instr in &blk.instrs {
            match instr {
                Instr::Store { base, idx, val } => roots.extend([*base, *idx, *val]),
            }
        }
        if let Terminator::If { cond, .. } = &blk.term {
            roots.push(*cond);
        }
    }
    // Phis homed in the loop execute their incoming computations once per
    // trip even when no store or branch consumes them: an accumulator like
    // s += a[i] reads memory through the latch edge alone.
    for val in &fn_ir.values {
        if let ValueKind::Phi { args } = &val.kind
            && val.phi_block.is_some_and(|b| lp.contains(b))
        {
            roots.extend(args.iter().map(|(v, _)| *v));
        }
    }

    let mut seen: FxHashSet<ValueId> = FxHashSet::default();
    let mut reads = Vec::new();
    let mut worklist = roots;
    while let Some(vid) = worklist.pop() {
        if !seen.insert(vid) {
            continue;
        }
        match &fn_ir.values[vid].kind {
            ValueKind::Load { base, idx } => {
                reads.push(MemRead {
                    value: vid,
                    base: *base,
                    idx: *idx,
                });
                worklist.extend([*base, *idx]);
            }
            ValueKind::Binary { lhs, rhs, .. } => worklist.extend([*lhs, *rhs]),
            ValueKind::Phi { args } => worklist.extend(args.iter().map(|(v, _)| *v)),
            ValueKind::Const(_) | ValueKind::Param { .. } => {}
        }
    }
    reads.sort_by_key(|r| r.value);
    reads
}

/// Classification of an index expression relative to a loop's induction
/// variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexForm {
    IvOffset(i64), // iv + c
    Absolute(i64), // constant, iteration-independent
    Opaque,
}

fn classify_index(fn_ir: &FnIR, idx: ValueId, iv_phi: ValueId) -> IndexForm {
    if idx == iv_phi {
        return IndexForm::IvOffset(0);
    }
    match &fn_ir.values[idx].kind {
        ValueKind::Const(c) => IndexForm::Absolute(*c),
        ValueKind::Binary { op, lhs, rhs } => {
            let constant = |v: ValueId| match &fn_ir.values[v].kind {
                ValueKind::Const(c) => Some(*c),
                _ => None,
            };
            match op {
                BinOp::Add if *lhs == iv_phi => constant(*rhs)
                    .map(IndexForm::IvOffset)
                    .unwrap_or(IndexForm::Opaque),
                BinOp::Add if *rhs == iv_phi => constant(*lhs)
                    .map(IndexForm::IvOffset)
                    .unwrap_or(IndexForm::Opaque),
                BinOp::Sub if *lhs == iv_phi => constant(*rhs)
                    .and_then(i64::checked_neg)
                    .map(IndexForm::IvOffset)
                    .unwrap_or(IndexForm::Opaque),
                _ => IndexForm::Opaque,
            }
        }
        _ => IndexForm::Opaque,
    }
}

/// Induction variables of the two loops advance in lockstep only when they
/// start at the same constant and take the same step; otherwise matched
/// iterations touch incomparable elements.
fn ivs_aligned(fn_ir: &FnIR, iv_w: &InductionVar, iv_r: &InductionVar) -> bool {
    let init = |iv: &InductionVar| match &fn_ir.values[iv.init].kind {
        ValueKind::Const(c) => Some(*c),
        _ => None,
    };
    match (init(iv_w), init(iv_r)) {
        (Some(a), Some(b)) => a == b && iv_w.effective_step() == iv_r.effective_step(),
        _ => false,
    }
}

/// The dependence oracle. None means the accesses are provably disjoint;
/// Some carries the direction across matched iterations, with Unknown when
/// the oracle cannot resolve the access pattern.
pub fn depends(
    fn_ir: &FnIR,
    write: &MemWrite,
    read: &MemRead,
    iv_w: &InductionVar,
    iv_r: &InductionVar,
) -> Option<DepDirection> {
    let wcls = alias::class_for_base(fn_ir, write.base);
    let rcls = alias::class_for_base(fn_ir, read.base);
    if alias::provably_disjoint(wcls, rcls) {
        return None;
    }
    if wcls == AliasClass::Unknown || rcls == AliasClass::Unknown {
        return Some(DepDirection::Unknown);
    }

    let wform = classify_index(fn_ir, write.idx, iv_w.phi);
    let rform = classify_index(fn_ir, read.idx, iv_r.phi);

    match (wform, rform) {
        (IndexForm::IvOffset(cw), IndexForm::IvOffset(cr)) => {
            if !ivs_aligned(fn_ir, iv_w, iv_r) {
                return Some(DepDirection::Unknown);
            }
            // Offsets near the i64 extremes do not subtract cleanly; give
            // up rather than report a sign-flipped direction.
            let Some(d) = cr.checked_sub(cw) else {
                return Some(DepDirection::Unknown);
            };
            Some(if d == 0 {
                DepDirection::Same
            } else if d < 0 {
                DepDirection::Backward
            } else {
                DepDirection::Forward
            })
        }
        (IndexForm::Absolute(a), IndexForm::Absolute(b)) => {
            if a == b {
                // Same element touched every iteration; the interleaving
                // changes what the read observes.
                Some(DepDirection::Unknown)
            } else {
                None
            }
        }
        _ => Some(DepDirection::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A two-array harness with an induction variable per "loop"; the
    // oracle itself never looks at blocks, only at index expressions.
    struct Harness {
        f: FnIR,
        iv1: InductionVar,
        iv2: InductionVar,
        a: ValueId,
        b: ValueId,
    }

    fn harness() -> Harness {
        let mut f = FnIR::new("dep", vec![ParamDecl::array("a"), ParamDecl::array("b")]);
        let ph = f.add_block();
        let h1 = f.add_block();
        let h2 = f.add_block();
        let c0 = f.add_const(0);
        let c1 = f.add_const(1);
        let a = f.add_param(0);
        let b = f.add_param(1);
        let p1 = f.add_phi(h1, vec![]);
        let n1 = f.add_binary(BinOp::Add, p1, c1);
        let p2 = f.add_phi(h2, vec![]);
        let n2 = f.add_binary(BinOp::Add, p2, c1);
        let _ = (ph, n1, n2);
        let iv1 = InductionVar {
            phi: p1,
            init: c0,
            step: 1,
            step_op: BinOp::Add,
        };
        let iv2 = InductionVar {
            phi: p2,
            init: c0,
            step: 1,
            step_op: BinOp::Add,
        };
        Harness { f, iv1, iv2, a, b }
    }

    fn write(base: ValueId, idx: ValueId) -> MemWrite {
        MemWrite { base, idx }
    }

    fn read(base: ValueId, idx: ValueId) -> MemRead {
        MemRead {
            value: 0,
            base,
            idx,
        }
    }

    #[test]
    fn same_iteration_access_is_same_direction() {
        let h = harness();
        let d = depends(
            &h.f,
            &write(h.a, h.iv1.phi),
            &read(h.a, h.iv2.phi),
            &h.iv1,
            &h.iv2,
        );
        assert_eq!(d, Some(DepDirection::Same));
    }

    #[test]
    fn reading_an_earlier_element_is_backward() {
        let mut h = harness();
        let c1 = h.f.add_const(1);
        let idx = h.f.add_binary(BinOp::Sub, h.iv2.phi, c1); // a[i - 1]
        let d = depends(&h.f, &write(h.a, h.iv1.phi), &read(h.a, idx), &h.iv1, &h.iv2);
        assert_eq!(d, Some(DepDirection::Backward));
    }

    #[test]
    fn reading_a_later_element_is_forward() {
        let mut h = harness();
        let c1 = h.f.add_const(1);
        let idx = h.f.add_binary(BinOp::Add, h.iv2.phi, c1); // a[i + 1]
        let d = depends(&h.f, &write(h.a, h.iv1.phi), &read(h.a, idx), &h.iv1, &h.iv2);
        assert_eq!(d, Some(DepDirection::Forward));
    }

    #[test]
    fn disjoint_arrays_have_no_dependence() {
        let h = harness();
        let d = depends(
            &h.f,
            &write(h.a, h.iv1.phi),
            &read(h.b, h.iv2.phi),
            &h.iv1,
            &h.iv2,
        );
        assert_eq!(d, None);

        // Even an opaque index on a different array stays independent.
        let mut h = harness();
        let opaque = h.f.add_binary(BinOp::Mul, h.iv2.phi, h.iv2.phi);
        let d = depends(
            &h.f,
            &write(h.a, h.iv1.phi),
            &read(h.b, opaque),
            &h.iv1,
            &h.iv2,
        );
        assert_eq!(d, None);
    }

    #[test]
    fn opaque_index_on_same_array_is_unknown() {
        let mut h = harness();
        let opaque = h.f.add_binary(BinOp::Mul, h.iv2.phi, h.iv2.phi);
        let d = depends(
            &h.f,
            &write(h.a, h.iv1.phi),
            &read(h.a, opaque),
            &h.iv1,
            &h.iv2,
        );
        assert_eq!(d, Some(DepDirection::Unknown));
    }

    #[test]
    fn misaligned_induction_variables_are_unknown() {
        let mut h = harness();
        let c5 = h.f.add_const(5);
        let iv2 = InductionVar {
            init: c5, // starts at 5, not 0
            ..h.iv2
        };
        let d = depends(
            &h.f,
            &write(h.a, h.iv1.phi),
            &read(h.a, iv2.phi),
            &h.iv1,
            &iv2,
        );
        assert_eq!(d, Some(DepDirection::Unknown));
    }

    #[test]
    fn accumulator_loads_are_visible() {
        // s += a[i + 1] with no store in the loop: the only path to the
        // load runs through the accumulator phi's latch edge.
        use crate::mir::analyze::loops::LoopAnalyzer;

        let mut f = FnIR::new("acc", vec![ParamDecl::array("a")]);
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
        let idx = f.add_binary(BinOp::Add, iv, c1);
        let ld = f.add_load(a, idx);
        let s = f.add_phi(header, vec![(c0, ph)]);
        let ns = f.add_binary(BinOp::Add, s, ld);
        f.set_phi_args(s, vec![(c0, ph), (ns, latch)]);

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
        f.set_term(body, Terminator::Goto(latch));
        f.set_term(latch, Terminator::Goto(header));
        f.set_term(exit, Terminator::Return(Some(s)));

        let loops = LoopAnalyzer::new(&f).find_loops();
        assert_eq!(loops.len(), 1);
        let reads = reads_in(&f, &loops[0]);
        assert!(reads.iter().any(|r| r.value == ld));
    }

    #[test]
    fn extreme_offsets_stay_conservative() {
        let mut h = harness();
        // iv - i64::MIN cannot be normalized to iv + c.
        let cmin = h.f.add_const(i64::MIN);
        let sub = h.f.add_binary(BinOp::Sub, h.iv2.phi, cmin);
        assert_eq!(
            depends(&h.f, &write(h.a, h.iv1.phi), &read(h.a, sub), &h.iv1, &h.iv2),
            Some(DepDirection::Unknown)
        );

        // Offsets whose difference overflows i64 must not report a
        // direction.
        let cmax = h.f.add_const(i64::MAX);
        let wmin = h.f.add_binary(BinOp::Add, h.iv1.phi, cmin);
        let radd = h.f.add_binary(BinOp::Add, h.iv2.phi, cmax);
        assert_eq!(
            depends(&h.f, &write(h.a, wmin), &read(h.a, radd), &h.iv1, &h.iv2),
            Some(DepDirection::Unknown)
        );
    }

    #[test]
    fn distinct_constant_elements_are_disjoint() {
        let mut h = harness();
        let c3 = h.f.add_const(3);
        let c4 = h.f.add_const(4);
        assert_eq!(
            depends(&h.f, &write(h.a, c3), &read(h.a, c4), &h.iv1, &h.iv2),
            None
        );
        assert_eq!(
            depends(&h.f, &write(h.a, c3), &read(h.a, c3), &h.iv1, &h.iv2),
            Some(DepDirection::Unknown)
        );
    }
}
