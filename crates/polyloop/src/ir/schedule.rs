//! Affine schedules.
//!
//! `Phi_s·i + omega_s <_lex Phi_t·i + omega_t` means schedule `s` executes
//! before schedule `t`. Rows of `phi` go outermost (row 0) to innermost;
//! `fusion_omega` interleaves statement order between loop levels, so the
//! full lexicographic key at depth `d` is
//! `(fusion_omega[0], phi[0]·i + offset_omega[0], .., fusion_omega[n])`.

use nalgebra::DMatrix;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AffineSchedule {
    pub phi: DMatrix<i64>,
    pub offset_omega: Vec<i64>,
    pub fusion_omega: Vec<i64>,
}

impl AffineSchedule {
    /// Identity schedule over `n` loops.
    pub fn identity(n: usize) -> Self {
        Self {
            phi: DMatrix::identity(n, n),
            offset_omega: vec![0; n],
            fusion_omega: vec![0; n + 1],
        }
    }
    #[inline]
    pub fn num_loops(&self) -> usize {
        self.phi.nrows()
    }
    /// Row for depth `d` (0 = outermost).
    #[inline]
    pub fn row(&self, d: usize) -> Vec<i64> {
        (0..self.phi.ncols()).map(|j| self.phi[(d, j)]).collect()
    }
    pub fn set_row(&mut self, d: usize, row: &[i64]) {
        debug_assert_eq!(row.len(), self.phi.ncols());
        for (j, &x) in row.iter().enumerate() {
            self.phi[(d, j)] = x;
        }
    }
    /// Do the two schedules share fusion coordinates through `depth` levels?
    pub fn fused_through(&self, other: &AffineSchedule, depth: usize) -> bool {
        self.fusion_omega[..=depth] == other.fusion_omega[..=depth]
    }
}
