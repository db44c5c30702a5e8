//! Memory-access descriptors and the instruction graph they hang off.
//!
//! The frontend hands the optimizer a flat list of `MemAccess`es plus the
//! instruction list connecting them. Instructions are a closed sum; the
//! scheduler only distinguishes load/store/compute/phi.

use nalgebra::{DMatrix, DVector};

use crate::poly::AffineLoop;

/// Base-pointer identity; equal ids may alias, distinct ids never do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArrayId(pub usize);

/// Arithmetic opcodes the cost model distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Fma,
    Sqrt,
}

/// Closed instruction sum. Operand references are indices into the owning
/// block's instruction list; `mem` references index its memory list.
#[derive(Clone, Debug)]
pub enum Inst {
    Load { mem: usize },
    Store { mem: usize, value: usize },
    Compute { op: Op, operands: Vec<usize> },
    /// Loop-carried recurrence: `init` from outside, `recur` from the body.
    Phi { init: usize, recur: usize },
}

/// One memory access in its original (unrotated) loop coordinates.
///
/// The subscript of array dimension `d` is
/// `index[d,:] · i + offset[d] + sym_offset[d,:] · s`.
#[derive(Clone, Debug)]
pub struct MemAccess {
    pub array: ArrayId,
    pub loop_nest: AffineLoop,
    /// `arrayDim x numLoops`, loop columns outermost first.
    pub index: DMatrix<i64>,
    pub offset: DVector<i64>,
    pub sym_offset: DMatrix<i64>,
    /// Lexicographic program-order seed, length `numLoops + 1`.
    pub fusion_omega: Vec<i64>,
    pub is_store: bool,
    pub elem_bytes: u32,
    /// The load or store instruction this access belongs to.
    pub inst: usize,
}

impl MemAccess {
    #[inline]
    pub fn num_loops(&self) -> usize {
        self.index.ncols()
    }
    #[inline]
    pub fn array_dim(&self) -> usize {
        self.index.nrows()
    }
    #[inline]
    pub fn is_load(&self) -> bool {
        !self.is_store
    }
    /// A load of the value this store just wrote, used to make register
    /// reuse across iterations explicit. Shares every coordinate with the
    /// store.
    pub fn reload(&self, inst: usize) -> MemAccess {
        debug_assert!(self.is_store);
        MemAccess {
            is_store: false,
            inst,
            ..self.clone()
        }
    }
}
