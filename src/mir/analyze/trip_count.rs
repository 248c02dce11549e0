use crate::mir::analyze::invariant::LoopInvariance;
use crate::mir::analyze::loops::LoopInfo;
use crate::mir::*;

/// Closed-form summary of how many times a loop's latch is taken before
/// exit. Unknown is a sentinel, not zero: two Unknown counts never compare
/// equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TripCount {
    Known(TcExpr),
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcExpr {
    Const(u64),
    Symbolic {
        limit: LimitKey,
        init: i64,
        step: i64,
        op: BinOp, // normalized: induction variable on the left
    },
}

/// Identity of a loop-invariant bound. Two distinct Param values with the
/// same index denote the same runtime quantity even when their ValueIds
/// differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKey {
    Param(usize),
    Value(ValueId),
}

/// Equality decision procedure over two trip-count summaries. Anything
/// short of a proof is false.
pub fn equal(a: &TripCount, b: &TripCount) -> bool {
    match (a, b) {
        (TripCount::Known(x), TripCount::Known(y)) => x == y,
        _ => false,
    }
}

pub fn trip_count(fn_ir: &FnIR, lp: &LoopInfo) -> TripCount {
    let Some(iv) = &lp.iv else {
        return TripCount::Unknown;
    };

    let Terminator::If {
        cond,
        then_bb,
        else_bb,
    } = &fn_ir.blocks[lp.header].term
    else {
        return TripCount::Unknown;
    };

    let ValueKind::Binary { op, lhs, rhs } = &fn_ir.values[*cond].kind else {
        return TripCount::Unknown;
    };

    // Normalize to "iv <op> limit", with the comparison describing the
    // continue condition.
    let (mut op, limit) = if *lhs == iv.phi {
        (*op, *rhs)
    } else if *rhs == iv.phi {
        (flip(*op), *lhs)
    } else {
        return TripCount::Unknown;
    };

    let continues_on_true = match (lp.contains(*then_bb), lp.contains(*else_bb)) {
        (true, false) => true,
        (false, true) => false,
        _ => return TripCount::Unknown,
    };
    if !continues_on_true {
        op = match negate(op) {
            Some(o) => o,
            None => return TripCount::Unknown,
        };
    }

    let step = iv.effective_step();
    let monotone_toward_limit = match op {
        BinOp::Lt | BinOp::Le => step > 0,
        BinOp::Gt | BinOp::Ge => step < 0,
        _ => return TripCount::Unknown,
    };
    if !monotone_toward_limit {
        return TripCount::Unknown;
    }

    let ValueKind::Const(init) = fn_ir.values[iv.init].kind else {
        return TripCount::Unknown;
    };

    if let ValueKind::Const(bound) = fn_ir.values[limit].kind {
        return TripCount::Known(TcExpr::Const(count_iterations(init, bound, step, op)));
    }

    // Symbolic bound: only meaningful when it holds still across the loop.
    let mut inv = LoopInvariance::new(fn_ir, lp);
    if !inv.is_invariant(limit) {
        return TripCount::Unknown;
    }
    let key = match &fn_ir.values[limit].kind {
        ValueKind::Param { index } => LimitKey::Param(*index),
        _ => LimitKey::Value(limit),
    };
    TripCount::Known(TcExpr::Symbolic {
        limit: key,
        init,
        step,
        op,
    })
}

fn count_iterations(init: i64, bound: i64, step: i64, op: BinOp) -> u64 {
    let init = init as i128;
    let step = step as i128;
    // Fold inclusive bounds into the exclusive form.
    let bound = match op {
        BinOp::Le => bound as i128 + 1,
        BinOp::Ge => bound as i128 - 1,
        _ => bound as i128,
    };

    let distance = match op {
        BinOp::Lt | BinOp::Le => bound - init,
        _ => init - bound,
    };
    if distance <= 0 {
        return 0;
    }
    let stride = step.abs();
    ((distance + stride - 1) / stride) as u64
}

fn flip(op: BinOp) -> BinOp {
    match op {
        BinOp::Lt => BinOp::Gt,
        BinOp::Le => BinOp::Ge,
        BinOp::Gt => BinOp::Lt,
        BinOp::Ge => BinOp::Le,
        other => other,
    }
}

fn negate(op: BinOp) -> Option<BinOp> {
    match op {
        BinOp::Lt => Some(BinOp::Ge),
        BinOp::Le => Some(BinOp::Gt),
        BinOp::Gt => Some(BinOp::Le),
        BinOp::Ge => Some(BinOp::Lt),
        _ => None,
    }
}
