//! # patchloop-patch
//!
//! Turns textual change descriptions into file mutations.
//!
//! ## Overview
//!
//! Generators are asked for unified diffs but do not always produce them.
//! [`PatchEngine`] runs an ordered cascade of [`PatchStrategy`] values and
//! takes the first one that yields non-empty content:
//!
//! 1. [`StrictDiff`] - a well-formed diff whose context matches exactly
//! 2. [`LineReconstruction`] - hunk bodies of a degraded diff, prefixes stripped
//! 3. [`LiteralReplacement`] - marker-free text becomes the whole file
//!
//! If nothing usable comes out, the prior content is kept. A file is never
//! emptied by a bad change.
//!
//! [`ChangeSetApplier`] applies a [`ChangeSet`] to a workspace directory and
//! reports an [`ApplyOutcome`] with one bucket per file.

mod applier;
mod change;
mod engine;
pub mod unified;

pub use applier::{ApplyError, ChangeSetApplier};
pub use change::{ApplyOutcome, ChangeSet, FileChange};
pub use engine::{
    strip_code_fence, Attempt, LineReconstruction, LiteralReplacement, MalformedChange,
    PatchEngine, PatchStrategy, Patched, StrategyKind, StrictDiff,
};
pub use unified::{DiffError, UnifiedDiff};
