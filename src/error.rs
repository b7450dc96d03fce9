//! Compile-time diagnostics (spec.md §7, expanded in SPEC_FULL §10.3).
//!
//! Runtime "failures" (empty table sets, missing tables) are deliberately
//! *not* represented here — per §7 they just fail the branch and drive
//! backtracking inside the VM.

use crate::term::Clause;
use thiserror::Error;

/// Implementation limit on variable count: indices must fit so that a
/// sentinel distinct from any valid index is representable (spec.md §7, §9).
pub const MAX_VARIABLES: usize = 256;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    /// A term had more than 2 arguments (spec.md §4.1: "Terms with >2
    /// arguments are rejected").
    #[error("term has more than 2 arguments: {clause:?}")]
    TooManyArguments { clause: Clause },

    /// More than [`MAX_VARIABLES`] distinct variables were discovered.
    #[error("query references more than {MAX_VARIABLES} variables")]
    TooManyVariables,

    /// A variable is unreachable from the elected root (spec.md §4.2 step 7).
    #[error("variable `{name}` is unconstrained: no path from the root")]
    UnconstrainedVariable { name: String },

    /// A literal subject id has no backing table in the store.
    #[error("entity {id} referenced as a literal subject has no backing table")]
    UnknownEntity { id: u32 },
}

pub type CompileResult<T> = Result<T, CompileError>;
