//! Resource ceilings (spec.md §5, SPEC_FULL §10.4).
//!
//! There is no on-disk format and no CLI for this crate — nothing here is
//! loaded from a file or environment, so this deliberately does not pull in
//! `figment` the way `inputlayer`'s own `config::Config` does for its
//! storage/optimization settings. A host embedding the engine constructs an
//! `EngineConfig` in code and overrides the knobs it cares about.

/// Resource ceilings the planner and VM are built around (spec.md §5, §7).
///
/// `max_variables` is a real input: [`crate::program::compile_with_config`]
/// passes it straight to [`crate::variable::VariablePlanner::plan_with_limit`]
/// in place of the crate's hardcoded default. `inline_walk_frames` is
/// read-only documentation of [`crate::vm::QueryIter::new_with_config`]'s
/// `debug_assert` — the walk stack's inline capacity is a compile-time const
/// generic, so this field can describe that ceiling but never change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Hard cap on distinct variables in a single compiled program (spec.md
    /// §7's "too many variables" diagnostic).
    pub max_variables: usize,
    /// Inline frame count for the `SubSet`/`SuperSet` walk stack before it
    /// falls back to a heap allocation (spec.md §5).
    pub inline_walk_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_variables: crate::error::MAX_VARIABLES,
            inline_walk_frames: 16,
        }
    }
}
