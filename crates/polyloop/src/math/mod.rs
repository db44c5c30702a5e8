//! Exact integer/rational linear algebra for schedule construction.
//!
//! Everything the scheduler proves, it proves in exact arithmetic: loop
//! polyhedra and schedules are `i64` matrices, LP tableaus are `i128`
//! rationals. Floating point only enters in the cost model.

pub mod linalg;
pub mod rat;
pub mod simplex;

pub use linalg::{gcd, lcm, lex_sign, normalize_row, null_space, rank, scaled_inv};
pub use rat::Rat;
pub use simplex::Simplex;

#[cfg(test)]
mod tests;
