use crate::mir::*;

/// Conservative aliasing buckets for memory bases. Distinct array
/// parameters are assumed disjoint; anything the analysis cannot name may
/// alias everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AliasClass {
    Param(usize),
    Unknown,
}

pub fn class_for_base(fn_ir: &FnIR, base: ValueId) -> AliasClass {
    match &fn_ir.values[base].kind {
        ValueKind::Param { index } if fn_ir.params.get(*index).is_some_and(|p| p.is_array) => {
            AliasClass::Param(*index)
        }
        _ => AliasClass::Unknown,
    }
}

pub fn may_alias(a: AliasClass, b: AliasClass) -> bool {
    match (a, b) {
        (AliasClass::Unknown, _) | (_, AliasClass::Unknown) => true,
        _ => a == b,
    }
}

pub fn provably_disjoint(a: AliasClass, b: AliasClass) -> bool {
    !may_alias(a, b)
}
