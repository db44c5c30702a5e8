//! Memory accesses rotated by a solved schedule.
//!
//! With old induction variables `i`, new variables `j = Phi·i + omega`, and
//! subscript `x = M·i + c`, substituting `i = Phi⁻¹(j - omega)` gives
//!
//! ```text
//!   M* = M·Phi⁻¹            (integer, with denominator s from scaledInv)
//!   x  = (M*·j + c*) / s,   c* = s·c - M*·omega
//! ```
//!
//! so updating an access is computing `M*` and `c*` in exact integer form.
//! Rotating the loop itself is `loop.rotate(Phi⁻¹, s)`.

use nalgebra::{DMatrix, DVector};

use crate::containers::BitSet;
use crate::ir::mem::MemAccess;

#[derive(Clone, Debug)]
pub struct Address {
    /// Index of the originating access in the block's memory list.
    pub mem: usize,
    /// Owning scheduled node.
    pub node: usize,
    /// `M·Phi⁻¹`, `arrayDim x numLoops` over the new variables.
    pub index: DMatrix<i64>,
    /// `s·c - index·omega`; subscripts are `(index·j + offset) / denom`.
    pub offset: DVector<i64>,
    pub denom: i64,
    pub is_store: bool,
    // Placement state used while building the loop tree.
    pub graph_id: usize,
    /// Tree node currently holding this address.
    pub tree: usize,
    pub parents: BitSet,
    pub children: BitSet,
    pub ancestors: BitSet,
    pub descendants: BitSet,
    pub placed: bool,
}

impl Address {
    pub fn rotate(
        mem_id: usize,
        node: usize,
        mem: &MemAccess,
        pinv: &DMatrix<i64>,
        denom: i64,
        omega: &[i64],
    ) -> Address {
        let n = mem.num_loops();
        debug_assert_eq!(pinv.nrows(), n);
        debug_assert_eq!(omega.len(), n);
        let index = &mem.index * pinv;
        let om = DVector::from_column_slice(omega);
        let offset = &mem.offset * denom - &index * om;
        Address {
            mem: mem_id,
            node,
            index,
            offset,
            denom,
            is_store: mem.is_store,
            graph_id: usize::MAX,
            tree: 0,
            parents: BitSet::new(),
            children: BitSet::new(),
            ancestors: BitSet::new(),
            descendants: BitSet::new(),
            placed: false,
        }
    }

    #[inline]
    pub fn num_loops(&self) -> usize {
        self.index.ncols()
    }

    /// Does the access ignore loop axis `l` (zero column of the rotated
    /// index matrix)?
    pub fn independent_of(&self, l: usize) -> bool {
        (0..self.index.nrows()).all(|d| self.index[(d, l)] == 0)
    }

    /// Canonicalize rows to gcd-1 form together with the denominator; used
    /// by the round-trip laws.
    pub fn canonicalized(mut self) -> Address {
        let mut g = self.denom;
        for d in 0..self.index.nrows() {
            for j in 0..self.index.ncols() {
                g = crate::math::gcd(g, self.index[(d, j)]);
            }
            g = crate::math::gcd(g, self.offset[d]);
        }
        if g > 1 {
            self.denom /= g;
            for d in 0..self.index.nrows() {
                for j in 0..self.index.ncols() {
                    self.index[(d, j)] /= g;
                }
                self.offset[d] /= g;
            }
        }
        self
    }
}
