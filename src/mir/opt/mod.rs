pub mod fusion;

pub use fusion::{FusionReport, MirLoopFuse, RejectReason, RejectedPair};

use crate::mir::verify::{VerifyError, verify_ir};
use crate::mir::FnIR;

/// Which cached analyses a rewrite has made stale. Trip counts survive a
/// fusion because neither loop's bound, init, or step is touched; everything
/// shaped by the CFG does not.
#[derive(Debug, Clone, Copy, Default)]
pub struct Invalidations {
    pub loops: bool,
    pub dominators: bool,
    pub post_dominators: bool,
    pub dependence: bool,
    pub trip_counts: bool,
}

impl Invalidations {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn cfg_mutation() -> Self {
        Self {
            loops: true,
            dominators: true,
            post_dominators: true,
            dependence: true,
            trip_counts: false,
        }
    }

    pub fn merge(&mut self, other: &Invalidations) {
        self.loops |= other.loops;
        self.dominators |= other.dominators;
        self.post_dominators |= other.post_dominators;
        self.dependence |= other.dependence;
        self.trip_counts |= other.trip_counts;
    }
}

#[derive(Debug)]
pub struct FusionOutcome {
    pub changed: bool,
    pub report: FusionReport,
}

/// Top-level entry point: verifies the input, runs the fusion pass to a
/// fixpoint, and verifies the result. A malformed input is reported as an
/// error instead of being transformed.
pub struct FusionEngine;

impl FusionEngine {
    pub fn run(fn_ir: &mut FnIR) -> Result<FusionOutcome, VerifyError> {
        verify_ir(fn_ir)?;
        let report = MirLoopFuse.optimize(fn_ir);
        verify_ir(fn_ir)?;
        Ok(FusionOutcome {
            changed: !report.fused.is_empty(),
            report,
        })
    }
}

pub(crate) fn env_bool(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| !v.is_empty() && v != "0")
}

pub(crate) fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
