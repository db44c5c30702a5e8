//! Polyhedral loop-nest optimization.
//!
//! Given a block of affine loops and memory accesses, the library builds
//! dependence polyhedra, solves a lexicographic LP for a legal affine
//! schedule per store cluster, materializes the result as a loop tree, and
//! searches register-unroll / vectorization / cache-blocking factors
//! against a machine descriptor.
//!
//! Pipeline: [`schedule::LoopBlock::optimize`] →
//! [`tree::LoopTreeSchedule::init`] → [`cost::optimize_tree`].

pub mod containers;
pub mod cost;
pub mod deps;
pub mod graph;
pub mod ir;
pub mod math;
pub mod poly;
pub mod schedule;
pub mod tree;

pub mod api;

/// Library version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
