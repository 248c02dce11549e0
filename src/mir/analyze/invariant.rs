use crate::mir::analyze::alias::{self, AliasClass};
use crate::mir::analyze::loops::LoopInfo;
use crate::mir::*;
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tri {
    Invariant,
    Variant,
    InProgress,
}

/// Memoized loop-invariance oracle for one loop. Results live in an
/// explicit table keyed by value identity instead of annotations on the IR;
/// the InProgress state cuts cycles through phi nodes, which are resolved
/// as Variant (fail closed).
pub struct LoopInvariance<'a> {
    fn_ir: &'a FnIR,
    lp: &'a LoopInfo,
    mutated: FxHashSet<AliasClass>,
    has_unknown_mutation: bool,
    memo: FxHashMap<ValueId, Tri>,
}

impl<'a> LoopInvariance<'a> {
    pub fn new(fn_ir: &'a FnIR, lp: &'a LoopInfo) -> Self {
        let mut mutated = FxHashSet::default();
        let mut has_unknown_mutation = false;
        for &bb in &lp.body {
            for instr in &fn_ir.blocks[bb].instrs {
                match instr {
                    Instr::Store { base, .. } => {
                        let cls = alias::class_for_base(fn_ir, *base);
                        if cls == AliasClass::Unknown {
                            has_unknown_mutation = true;
                        } else {
                            mutated.insert(cls);
                        }
                    }
                }
            }
        }
        Self {
            fn_ir,
            lp,
            mutated,
            has_unknown_mutation,
            memo: FxHashMap::default(),
        }
    }

    pub fn is_invariant(&mut self, vid: ValueId) -> bool {
        self.classify(vid) == Tri::Invariant
    }

    fn classify(&mut self, vid: ValueId) -> Tri {
        match self.memo.get(&vid) {
            Some(Tri::InProgress) => return Tri::Variant,
            Some(t) => return *t,
            None => {}
        }
        self.memo.insert(vid, Tri::InProgress);
        let result = self.classify_uncached(vid);
        self.memo.insert(vid, result);
        result
    }

    fn classify_uncached(&mut self, vid: ValueId) -> Tri {
        match &self.fn_ir.values[vid].kind {
            ValueKind::Const(_) | ValueKind::Param { .. } => Tri::Invariant,
            ValueKind::Binary { lhs, rhs, .. } => {
                let (lhs, rhs) = (*lhs, *rhs);
                if self.classify(lhs) == Tri::Invariant && self.classify(rhs) == Tri::Invariant {
                    Tri::Invariant
                } else {
                    Tri::Variant
                }
            }
            ValueKind::Phi { args } => {
                // A phi homed inside the loop carries a new value per
                // iteration. Outside, it is invariant if every incoming
                // value is.
                if let Some(b) = self.fn_ir.values[vid].phi_block {
                    if self.lp.contains(b) {
                        return Tri::Variant;
                    }
                }
                let args: Vec<ValueId> = args.iter().map(|(v, _)| *v).collect();
                if args
                    .into_iter()
                    .all(|a| a == vid || self.classify(a) == Tri::Invariant)
                {
                    Tri::Invariant
                } else {
                    Tri::Variant
                }
            }
            ValueKind::Load { base, idx } => {
                let (base, idx) = (*base, *idx);
                if self.has_unknown_mutation {
                    return Tri::Variant;
                }
                let cls = alias::class_for_base(self.fn_ir, base);
                if cls == AliasClass::Unknown || self.mutated.contains(&cls) {
                    return Tri::Variant;
                }
                if self.classify(base) == Tri::Invariant && self.classify(idx) == Tri::Invariant {
                    Tri::Invariant
                } else {
                    Tri::Variant
                }
            }
        }
    }
}
