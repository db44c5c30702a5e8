//! Polyhedral kernel: affine loop nests and dependence polyhedra.
//!
//! `AffineLoop` is the iteration-space polyhedron handed in by the frontend;
//! `DepPoly` is the pairwise dependence polyhedron from which Farkas simplex
//! pairs are derived for the scheduling LP.

pub mod dep;
pub mod loops;

pub use dep::DepPoly;
pub use loops::{AffineLoop, TripCount};

#[cfg(test)]
mod tests;
