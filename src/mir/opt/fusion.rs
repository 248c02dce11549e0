//! Loop fusion. Two adjacent counted loops with provably equal trip counts
//! are merged into one, so the fused body runs both original bodies per
//! iteration. Every legality check is conservative: when an analysis cannot
//! prove a pair safe, the pair is rejected and the function is untouched.

use crate::error::{FuseAbort, FuseResult};
use crate::mir::analyze::dependence::{self, DepDirection, MemRead};
use crate::mir::analyze::dom::{self, DomTree};
use crate::mir::analyze::loops::{InductionVar, LoopAnalyzer, LoopInfo};
use crate::mir::analyze::trip_count;
use crate::mir::opt::{Invalidations, env_bool, env_usize};
use crate::mir::verify::verify_ir;
use crate::mir::*;
use std::fmt;

/// Adjacency: control leaving the first loop must fall directly into the
/// second with no intervening block. A loop without a unique exit never
/// qualifies.
pub fn is_adjacent(l1: &LoopInfo, l2: &LoopInfo) -> bool {
    match (l1.exit_block(), l2.entry_point()) {
        (Some(exit), Some(entry)) => exit == entry,
        _ => false,
    }
}

/// Control-flow equivalence: whenever one loop runs, so does the other.
/// The first must dominate the second and the second post-dominate the
/// first; a guard that can skip the second loop breaks the latter.
pub fn control_flow_equivalent(
    doms: &DomTree,
    pdoms: &DomTree,
    l1: &LoopInfo,
    l2: &LoopInfo,
) -> bool {
    doms.dominates(l1.header, l2.header) && pdoms.dominates(l2.header, l1.header)
}

pub fn same_trip_count(fn_ir: &FnIR, l1: &LoopInfo, l2: &LoopInfo) -> bool {
    let tc1 = trip_count::trip_count(fn_ir, l1);
    let tc2 = trip_count::trip_count(fn_ir, l2);
    trip_count::equal(&tc1, &tc2)
}

fn unsafe_dir(dir: Option<DepDirection>) -> bool {
    matches!(
        dir,
        Some(DepDirection::Forward | DepDirection::Backward | DepDirection::Unknown)
    )
}

/// Memory safety check across the pair. Any loop-carried dependence between
/// the two bodies defeats fusion: after the rewrite, iteration i of the
/// second body runs before iterations i+1.. of the first, so only
/// same-iteration dependences (and proven independence) preserve behavior.
/// Write-write pairs matter too: fusing reorders the stores that decide an
/// element's final value.
pub fn has_unsafe_dependence(
    fn_ir: &FnIR,
    l1: &LoopInfo,
    l2: &LoopInfo,
    iv1: &InductionVar,
    iv2: &InductionVar,
) -> bool {
    let w1 = dependence::writes_in(fn_ir, l1);
    let w2 = dependence::writes_in(fn_ir, l2);
    let r1 = dependence::reads_in(fn_ir, l1);
    let r2 = dependence::reads_in(fn_ir, l2);

    for w in &w1 {
        for r in &r2 {
            if unsafe_dir(dependence::depends(fn_ir, w, r, iv1, iv2)) {
                return true;
            }
        }
        for w_other in &w2 {
            let as_read = MemRead {
                value: 0,
                base: w_other.base,
                idx: w_other.idx,
            };
            if unsafe_dir(dependence::depends(fn_ir, w, &as_read, iv1, iv2)) {
                return true;
            }
        }
    }
    for w in &w2 {
        for r in &r1 {
            if unsafe_dir(dependence::depends(fn_ir, w, r, iv2, iv1)) {
                return true;
            }
        }
    }
    false
}

fn header_arms(fn_ir: &FnIR, lp: &LoopInfo) -> FuseResult<(BlockId, BlockId)> {
    match &fn_ir.blocks[lp.header].term {
        Terminator::If {
            then_bb, else_bb, ..
        } => match (lp.contains(*then_bb), lp.contains(*else_bb)) {
            (true, false) => Ok((*then_bb, *else_bb)),
            (false, true) => Ok((*else_bb, *then_bb)),
            _ => Err(FuseAbort::UnexpectedTerminator { block: lp.header }),
        },
        _ => Err(FuseAbort::UnexpectedTerminator { block: lp.header }),
    }
}

/// The unique non-header body block that enters the latch. This is where
/// the splice cuts.
fn last_body(preds: &[Vec<BlockId>], lp: &LoopInfo) -> FuseResult<BlockId> {
    let ins: Vec<BlockId> = preds[lp.latch]
        .iter()
        .copied()
        .filter(|p| lp.contains(*p))
        .collect();
    match ins.as_slice() {
        [one] if *one != lp.header => Ok(*one),
        [] | [_] => Err(FuseAbort::EmptyBody { header: lp.header }),
        _ => Err(FuseAbort::AmbiguousLatchEntry { header: lp.header }),
    }
}

fn expect_goto(fn_ir: &FnIR, block: BlockId, target: BlockId) -> FuseResult<()> {
    match &fn_ir.blocks[block].term {
        Terminator::Goto(t) if *t == target => Ok(()),
        _ => Err(FuseAbort::UnexpectedTerminator { block }),
    }
}

/// Rewrites the CFG so `l1` subsumes `l2`. All structural requirements are
/// validated before the first edit; an Err leaves the function exactly as
/// it was. On success the second loop's header, latch, and preheader become
/// an unreachable region (they are detached, not deleted, so ids stay
/// stable), and `l1` is updated in place to cover the merged body.
pub fn fuse(fn_ir: &mut FnIR, l1: &mut LoopInfo, l2: &LoopInfo) -> FuseResult<Invalidations> {
    let iv1 = l1
        .iv
        .clone()
        .ok_or(FuseAbort::MissingInductionVar { header: l1.header })?;
    let iv2 = l2
        .iv
        .clone()
        .ok_or(FuseAbort::MissingInductionVar { header: l2.header })?;
    let ph1 = l1
        .preheader
        .ok_or(FuseAbort::MissingPreheader { header: l1.header })?;
    let ph2 = l2
        .preheader
        .ok_or(FuseAbort::MissingPreheader { header: l2.header })?;
    let exit2 = l2
        .exit_block()
        .ok_or(FuseAbort::MissingExit { header: l2.header })?;
    l1.exit_block()
        .ok_or(FuseAbort::MissingExit { header: l1.header })?;

    let (_, _) = header_arms(fn_ir, l1)?;
    let (first_body2, _) = header_arms(fn_ir, l2)?;

    let preds = fn_ir.pred_map();
    let last_body1 = last_body(&preds, l1)?;
    let last_body2 = last_body(&preds, l2)?;
    expect_goto(fn_ir, last_body1, l1.latch)?;
    expect_goto(fn_ir, last_body2, l2.latch)?;
    expect_goto(fn_ir, l1.latch, l1.header)?;
    expect_goto(fn_ir, l2.latch, l2.header)?;

    // Blocks whose predecessor edges the rewrite changes. A phi homed in
    // any of them would need incoming values the rewrite cannot invent.
    let frozen = [first_body2, l1.latch, l2.latch, exit2, ph2];
    for val in &fn_ir.values {
        let Some(home) = val.phi_block else { continue };
        let ValueKind::Phi { args } = &val.kind else {
            continue;
        };
        if frozen.contains(&home) {
            return Err(FuseAbort::MisplacedPhi {
                value: val.id,
                block: home,
            });
        }
        if home == l2.header {
            for (_, src) in args {
                if *src != ph2 && *src != l2.latch {
                    return Err(FuseAbort::MisplacedPhi {
                        value: val.id,
                        block: home,
                    });
                }
            }
        }
    }

    // Past this point every step succeeds.

    // Detach the retired header first: it no longer gates entry, and its
    // latch edge keeps the dead region internally consistent.
    fn_ir.set_term(l2.header, Terminator::Goto(l2.latch));

    // Splice the second body between the first body and the shared latch.
    fn_ir.set_term(last_body1, Terminator::Goto(first_body2));
    fn_ir.set_term(last_body2, Terminator::Goto(l1.latch));

    // The fused loop exits straight to the second loop's exit.
    if let Terminator::If {
        then_bb, else_bb, ..
    } = &mut fn_ir.blocks[l1.header].term
    {
        if l1.contains(*then_bb) {
            *else_bb = exit2;
        } else {
            *then_bb = exit2;
        }
    }

    // The second induction variable collapses onto the first.
    fn_ir.replace_all_uses(iv2.phi, iv1.phi);

    // Remaining phis of the retired header (accumulators and the like)
    // move into the fused header, with their incoming edges renamed to the
    // surviving preheader and latch.
    for vid in 0..fn_ir.values.len() {
        if vid == iv2.phi || fn_ir.values[vid].phi_block != Some(l2.header) {
            continue;
        }
        fn_ir.values[vid].phi_block = Some(l1.header);
        if let ValueKind::Phi { args } = &mut fn_ir.values[vid].kind {
            for (_, src) in args.iter_mut() {
                if *src == ph2 {
                    *src = ph1;
                } else if *src == l2.latch {
                    *src = l1.latch;
                }
            }
        }
    }

    l1.absorb(l2);
    l1.exits = vec![exit2];
    Ok(Invalidations::cfg_mutation())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    NotSimplified,
    Nested,
    NotAdjacent,
    NotControlFlowEquivalent,
    TripCountMismatch,
    UnsafeDependence,
    Aborted(FuseAbort),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotSimplified => write!(f, "a loop is not in simplified form"),
            RejectReason::Nested => write!(f, "a loop contains a nested loop"),
            RejectReason::NotAdjacent => write!(f, "loops are not adjacent"),
            RejectReason::NotControlFlowEquivalent => {
                write!(f, "loops are not control-flow equivalent")
            }
            RejectReason::TripCountMismatch => write!(f, "trip counts are not provably equal"),
            RejectReason::UnsafeDependence => write!(f, "a memory dependence prevents fusion"),
            RejectReason::Aborted(a) => write!(f, "transform aborted: {}", a),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedPair {
    pub first: BlockId,  // header of the earlier loop
    pub second: BlockId, // header of the later loop
    pub reason: RejectReason,
}

#[derive(Debug, Default)]
pub struct FusionReport {
    pub fused: Vec<(BlockId, BlockId)>,
    pub rejected: Vec<RejectedPair>,
    pub invalidated: Invalidations,
    pub rounds: usize,
}

/// Fixpoint driver. Each round recomputes loops and dominance, scans
/// candidate pairs in program order, and restarts after the first
/// successful fusion so chains of three or more loops collapse fully.
pub struct MirLoopFuse;

impl MirLoopFuse {
    pub fn optimize(&self, fn_ir: &mut FnIR) -> FusionReport {
        let trace = env_bool("LOOPFUSE_TRACE");
        let verify_each = env_bool("LOOPFUSE_VERIFY_EACH_FUSE");
        let max_fusions = env_usize("LOOPFUSE_MAX_FUSIONS", usize::MAX);
        let mut report = FusionReport::default();

        'rounds: loop {
            if report.fused.len() >= max_fusions {
                break;
            }
            report.rounds += 1;
            let mut loops = LoopAnalyzer::new(fn_ir).find_loops();
            loops.reverse(); // ascending by header
            let doms = dom::compute_dominators(fn_ir);
            let pdoms = dom::compute_post_dominators(fn_ir);

            for i in 0..loops.len().saturating_sub(1) {
                let (l1, l2) = (&loops[i], &loops[i + 1]);
                let reject = |reason: RejectReason, report: &mut FusionReport| {
                    if trace {
                        eprintln!(
                            "[loopfuse] bb{} / bb{}: {}",
                            l1.header, l2.header, reason
                        );
                    }
                    report.rejected.push(RejectedPair {
                        first: l1.header,
                        second: l2.header,
                        reason,
                    });
                };

                if !l1.is_simplified() || !l2.is_simplified() {
                    reject(RejectReason::NotSimplified, &mut report);
                    continue;
                }
                if l1.contains_nested(&loops) || l2.contains_nested(&loops) {
                    reject(RejectReason::Nested, &mut report);
                    continue;
                }
                if !is_adjacent(l1, l2) {
                    reject(RejectReason::NotAdjacent, &mut report);
                    continue;
                }
                if !control_flow_equivalent(&doms, &pdoms, l1, l2) {
                    reject(RejectReason::NotControlFlowEquivalent, &mut report);
                    continue;
                }
                if !same_trip_count(fn_ir, l1, l2) {
                    reject(RejectReason::TripCountMismatch, &mut report);
                    continue;
                }
                let (Some(iv1), Some(iv2)) = (&l1.iv, &l2.iv) else {
                    // Unreachable once trip counts compared equal, but the
                    // dependence oracle needs both anchors.
                    reject(
                        RejectReason::Aborted(FuseAbort::MissingInductionVar {
                            header: l1.header,
                        }),
                        &mut report,
                    );
                    continue;
                };
                if has_unsafe_dependence(fn_ir, l1, l2, iv1, iv2) {
                    reject(RejectReason::UnsafeDependence, &mut report);
                    continue;
                }

                let mut fused = l1.clone();
                match fuse(fn_ir, &mut fused, l2) {
                    Ok(inv) => {
                        if trace {
                            eprintln!(
                                "[loopfuse] fused loop at bb{} into loop at bb{}",
                                l2.header, fused.header
                            );
                        }
                        report.fused.push((fused.header, l2.header));
                        report.invalidated.merge(&inv);
                        if verify_each && let Err(e) = verify_ir(fn_ir) {
                            panic!(
                                "IR broken after fusing bb{} and bb{}: {}",
                                fused.header, l2.header, e
                            );
                        }
                        debug_assert!(verify_ir(fn_ir).is_ok());
                        continue 'rounds;
                    }
                    Err(abort) => {
                        reject(RejectReason::Aborted(abort), &mut report);
                        continue;
                    }
                }
            }
            break;
        }
        report
    }
}
