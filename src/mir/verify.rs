use crate::mir::*;
use rustc_hash::FxHashSet;
use std::fmt;

#[derive(Debug)]
pub enum VerifyError {
    BadValue(ValueId),
    BadBlock(BlockId),
    BadTerminator(BlockId),
    NotAnArrayBase {
        value: ValueId,
    },
    NotAScalar {
        value: ValueId,
    },
    OrphanPhi(ValueId),
    InvalidPhiSource {
        phi_val: ValueId,
        block: BlockId,
    },
    PhiPredMismatch {
        phi_val: ValueId,
        expected: usize,
        got: usize,
    },
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::BadValue(v) => write!(f, "Invalid ValueId: {}", v),
            VerifyError::BadBlock(b) => write!(f, "Invalid BlockId: {}", b),
            VerifyError::BadTerminator(b) => write!(f, "Invalid Terminator in Block: {}", b),
            VerifyError::NotAnArrayBase { value } => {
                write!(f, "Value {} is used as a memory base but is not an array parameter", value)
            }
            VerifyError::NotAScalar { value } => {
                write!(f, "Array parameter value {} used in scalar position", value)
            }
            VerifyError::OrphanPhi(v) => write!(f, "Phi {} has no owning block", v),
            VerifyError::InvalidPhiSource { phi_val, block } => write!(
                f,
                "Phi {} references invalid or duplicate predecessor block {}",
                phi_val, block
            ),
            VerifyError::PhiPredMismatch {
                phi_val,
                expected,
                got,
            } => write!(
                f,
                "Phi {} does not cover its block's predecessors. Expected {}, got {}",
                phi_val, expected, got
            ),
        }
    }
}

pub fn verify_ir(fn_ir: &FnIR) -> Result<(), VerifyError> {
    check_blk(fn_ir, fn_ir.entry)?;

    let reachable = fn_ir.reachable_blocks();
    let preds = fn_ir.pred_map();

    // 1. Validate all value definitions and operands.
    for (vid, val) in fn_ir.values.iter().enumerate() {
        if val.id != vid {
            return Err(VerifyError::BadValue(vid));
        }

        match &val.kind {
            ValueKind::Binary { lhs, rhs, .. } => {
                check_val(fn_ir, *lhs)?;
                check_val(fn_ir, *rhs)?;
                check_scalar(fn_ir, *lhs)?;
                check_scalar(fn_ir, *rhs)?;
            }
            ValueKind::Load { base, idx } => {
                check_val(fn_ir, *base)?;
                check_val(fn_ir, *idx)?;
                check_array_base(fn_ir, *base)?;
                check_scalar(fn_ir, *idx)?;
            }
            ValueKind::Phi { args } => {
                let owner = val.phi_block.ok_or(VerifyError::OrphanPhi(vid))?;
                check_blk(fn_ir, owner)?;
                let mut seen = FxHashSet::default();
                for (v, b) in args {
                    check_val(fn_ir, *v)?;
                    check_blk(fn_ir, *b)?;
                    if !seen.insert(*b) || !preds[owner].contains(b) {
                        return Err(VerifyError::InvalidPhiSource {
                            phi_val: vid,
                            block: *b,
                        });
                    }
                }
                // A phi in a live block must merge exactly one value per
                // predecessor edge. Dead blocks keep stale edges around
                // until a cleanup pass prunes them.
                if reachable.contains(&owner) && args.len() != preds[owner].len() {
                    return Err(VerifyError::PhiPredMismatch {
                        phi_val: vid,
                        expected: preds[owner].len(),
                        got: args.len(),
                    });
                }
            }
            ValueKind::Const(_) | ValueKind::Param { .. } => {}
        }
    }

    // 2. Validate block structure.
    for (bid, blk) in fn_ir.blocks.iter().enumerate() {
        if blk.id != bid {
            return Err(VerifyError::BadBlock(bid));
        }

        for instr in &blk.instrs {
            match instr {
                Instr::Store { base, idx, val } => {
                    check_val(fn_ir, *base)?;
                    check_val(fn_ir, *idx)?;
                    check_val(fn_ir, *val)?;
                    check_array_base(fn_ir, *base)?;
                    check_scalar(fn_ir, *idx)?;
                    check_scalar(fn_ir, *val)?;
                }
            }
        }

        match &blk.term {
            Terminator::Goto(target) => check_blk(fn_ir, *target)?,
            Terminator::If {
                cond,
                then_bb,
                else_bb,
            } => {
                check_val(fn_ir, *cond)?;
                check_scalar(fn_ir, *cond)?;
                check_blk(fn_ir, *then_bb)?;
                check_blk(fn_ir, *else_bb)?;
            }
            Terminator::Return(Some(v)) => {
                check_val(fn_ir, *v)?;
                check_scalar(fn_ir, *v)?;
            }
            Terminator::Return(None) => {}
            Terminator::Unreachable => {
                if !blk.instrs.is_empty() {
                    return Err(VerifyError::BadTerminator(bid));
                }
            }
        }
    }

    Ok(())
}

fn check_val(fn_ir: &FnIR, vid: ValueId) -> Result<(), VerifyError> {
    if vid >= fn_ir.values.len() {
        Err(VerifyError::BadValue(vid))
    } else {
        Ok(())
    }
}

fn check_blk(fn_ir: &FnIR, bid: BlockId) -> Result<(), VerifyError> {
    if bid >= fn_ir.blocks.len() {
        Err(VerifyError::BadBlock(bid))
    } else {
        Ok(())
    }
}

fn is_array_param(fn_ir: &FnIR, vid: ValueId) -> bool {
    match &fn_ir.values[vid].kind {
        ValueKind::Param { index } => fn_ir.params.get(*index).is_some_and(|p| p.is_array),
        _ => false,
    }
}

fn check_array_base(fn_ir: &FnIR, vid: ValueId) -> Result<(), VerifyError> {
    if is_array_param(fn_ir, vid) {
        Ok(())
    } else {
        Err(VerifyError::NotAnArrayBase { value: vid })
    }
}

fn check_scalar(fn_ir: &FnIR, vid: ValueId) -> Result<(), VerifyError> {
    if is_array_param(fn_ir, vid) {
        Err(VerifyError::NotAScalar { value: vid })
    } else {
        Ok(())
    }
}
