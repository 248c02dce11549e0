use crate::mir::{BlockId, ValueId};
use std::fmt;

pub type FuseResult<T> = Result<T, FuseAbort>;

/// Reasons the fusion transformer refuses to rewrite a loop pair after the
/// legality checks already passed. Every variant is raised before the first
/// CFG edit, so an aborted fusion leaves the function untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuseAbort {
    MissingInductionVar { header: BlockId },
    EmptyBody { header: BlockId },
    AmbiguousLatchEntry { header: BlockId },
    MissingExit { header: BlockId },
    MissingPreheader { header: BlockId },
    UnexpectedTerminator { block: BlockId },
    MisplacedPhi { value: ValueId, block: BlockId },
}

impl fmt::Display for FuseAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuseAbort::MissingInductionVar { header } => {
                write!(f, "no induction variable found for loop at block {}", header)
            }
            FuseAbort::EmptyBody { header } => {
                write!(f, "loop at block {} has no body blocks to splice", header)
            }
            FuseAbort::AmbiguousLatchEntry { header } => write!(
                f,
                "loop at block {} has more than one body block entering the latch",
                header
            ),
            FuseAbort::MissingExit { header } => {
                write!(f, "loop at block {} has no unique exit block", header)
            }
            FuseAbort::MissingPreheader { header } => {
                write!(f, "loop at block {} has no preheader", header)
            }
            FuseAbort::UnexpectedTerminator { block } => {
                write!(f, "block {} does not end in the expected branch", block)
            }
            FuseAbort::MisplacedPhi { value, block } => write!(
                f,
                "phi {} in block {} is outside the loop headers and cannot be rewired",
                value, block
            ),
        }
    }
}

impl std::error::Error for FuseAbort {}
