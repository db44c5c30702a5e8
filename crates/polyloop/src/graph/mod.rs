//! Graph algorithms: strongly connected components and loop-permutation
//! iteration. Both the scheduler's node graph and the cost model's
//! register-ordering search go through these.

pub mod perm;
pub mod scc;

pub use perm::{LoopPermutations, Permutations};
pub use scc::{strongly_connected_components, IndexGraph};

#[cfg(test)]
mod tests;
