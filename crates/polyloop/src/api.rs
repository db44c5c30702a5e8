//! Curated re-exports of the supported surface.
//!
//! Callers should be able to drive the whole pipeline from this module;
//! everything else is internal and may change shape.

// Inputs
pub use crate::ir::{AffineSchedule, ArrayId, Inst, MemAccess, Op};
pub use crate::poly::{AffineLoop, TripCount};

// Scheduling
pub use crate::schedule::{CarriedDepFlag, LoopBlock, ScheduledNode};

// Materialization
pub use crate::tree::{LoopTreeSchedule, SubLoop, TreeNode};

// Cost model
pub use crate::cost::{
    optimize_tree, CacheLevel, CoreWidth, LoopSummary, LoopTransform, Machine,
};
