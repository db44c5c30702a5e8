//! Affine loop nests as integer polyhedra.
//!
//! Constraints are rows `a · (1 | s | i) >= 0` over the constant, the
//! symbolic parameters, and the induction variables (outermost first).
//!
//! Invariants after `normalize`:
//! - no zero rows, no duplicate rows;
//! - each row's entries have gcd 1.

use nalgebra::DMatrix;

use crate::math::normalize_row;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TripCount {
    pub known: bool,
    pub count: i64,
}

/// Trip-count guess when the bounds are symbolic.
const UNKNOWN_TRIP: i64 = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AffineLoop {
    a: DMatrix<i64>,
    num_sym: usize,
}

impl AffineLoop {
    pub fn from_parts(a: DMatrix<i64>, num_sym: usize) -> Self {
        debug_assert!(a.ncols() > num_sym);
        let mut l = Self { a, num_sym };
        l.normalize();
        l
    }

    /// Rectangular nest `0 <= i_l < extents[l]` with constant extents.
    pub fn rect(extents: &[i64]) -> Self {
        let n = extents.len();
        let mut a = DMatrix::<i64>::zeros(2 * n, 1 + n);
        for (l, &ext) in extents.iter().enumerate() {
            a[(2 * l, 1 + l)] = 1; // i_l >= 0
            a[(2 * l + 1, 0)] = ext - 1; // i_l <= ext - 1
            a[(2 * l + 1, 1 + l)] = -1;
        }
        Self::from_parts(a, 0)
    }

    #[inline]
    pub fn num_loops(&self) -> usize {
        self.a.ncols() - 1 - self.num_sym
    }
    #[inline]
    pub fn num_sym(&self) -> usize {
        self.num_sym
    }
    #[inline]
    pub fn inequalities(&self) -> &DMatrix<i64> {
        &self.a
    }
    #[inline]
    fn iv_col(&self, l: usize) -> usize {
        1 + self.num_sym + l
    }

    fn normalize(&mut self) {
        let nc = self.a.ncols();
        let mut rows: Vec<Vec<i64>> = Vec::with_capacity(self.a.nrows());
        for i in 0..self.a.nrows() {
            let mut row: Vec<i64> = (0..nc).map(|j| self.a[(i, j)]).collect();
            if row[1..].iter().all(|&x| x == 0) {
                debug_assert!(row[0] >= 0, "constant contradiction in loop bounds");
                continue;
            }
            normalize_row(&mut row);
            if !rows.contains(&row) {
                rows.push(row);
            }
        }
        let mut a = DMatrix::<i64>::zeros(rows.len(), nc);
        for (i, row) in rows.iter().enumerate() {
            for (j, &x) in row.iter().enumerate() {
                a[(i, j)] = x;
            }
        }
        self.a = a;
    }

    /// Eliminate induction variable `l` by Fourier-Motzkin projection.
    pub fn remove_loop(&self, l: usize) -> AffineLoop {
        debug_assert!(l < self.num_loops());
        let col = self.iv_col(l);
        let nc = self.a.ncols();
        let keep = |j: usize| j != col;
        let mut rows: Vec<Vec<i64>> = Vec::new();
        let (mut lower, mut upper): (Vec<usize>, Vec<usize>) = (Vec::new(), Vec::new());
        for i in 0..self.a.nrows() {
            let c = self.a[(i, col)];
            if c == 0 {
                rows.push((0..nc).filter(|&j| keep(j)).map(|j| self.a[(i, j)]).collect());
            } else if c > 0 {
                lower.push(i);
            } else {
                upper.push(i);
            }
        }
        for &li in &lower {
            for &ui in &upper {
                let lp = self.a[(li, col)];
                let un = -self.a[(ui, col)];
                let mut row: Vec<i64> = (0..nc)
                    .filter(|&j| keep(j))
                    .map(|j| self.a[(li, j)] * un + self.a[(ui, j)] * lp)
                    .collect();
                normalize_row(&mut row);
                rows.push(row);
            }
        }
        let mut a = DMatrix::<i64>::zeros(rows.len(), nc - 1);
        for (i, row) in rows.iter().enumerate() {
            for (j, &x) in row.iter().enumerate() {
                a[(i, j)] = x;
            }
        }
        AffineLoop::from_parts(a, self.num_sym)
    }

    /// Apply a scaled inverse schedule to the induction-variable block:
    /// `i = (pinv/denom) · j`. Rows are scaled by `denom` so the result stays
    /// integral, then renormalized.
    pub fn rotate(&self, pinv: &DMatrix<i64>, denom: i64) -> AffineLoop {
        let n = self.num_loops();
        debug_assert_eq!(pinv.nrows(), n);
        debug_assert!(denom > 0);
        let nr = self.a.nrows();
        let mut a = DMatrix::<i64>::zeros(nr, self.a.ncols());
        for i in 0..nr {
            for j in 0..1 + self.num_sym {
                a[(i, j)] = self.a[(i, j)] * denom;
            }
            for jl in 0..n {
                let mut v = 0i64;
                for k in 0..n {
                    v += self.a[(i, self.iv_col(k))] * pinv[(k, jl)];
                }
                a[(i, self.iv_col(jl))] = v;
            }
        }
        AffineLoop::from_parts(a, self.num_sym)
    }

    /// Constant bounds on loop `l` when rows mention only that variable.
    pub fn trip_count(&self, l: usize) -> TripCount {
        let col = self.iv_col(l);
        let (mut lo, mut hi): (Option<i64>, Option<i64>) = (None, None);
        for i in 0..self.a.nrows() {
            let c = self.a[(i, col)];
            if c == 0 {
                continue;
            }
            let pure = (1..self.a.ncols())
                .filter(|&j| j != col)
                .all(|j| self.a[(i, j)] == 0);
            if !pure {
                continue;
            }
            let k = self.a[(i, 0)];
            if c > 0 {
                // c*i + k >= 0  ->  i >= ceil(-k / c)
                let b = (-k).div_euclid(c) + i64::from((-k).rem_euclid(c) != 0);
                lo = Some(lo.map_or(b, |x: i64| x.max(b)));
            } else {
                // c*i + k >= 0, c < 0  ->  i <= floor(k / -c)
                let b = k.div_euclid(-c);
                hi = Some(hi.map_or(b, |x: i64| x.min(b)));
            }
        }
        match (lo, hi) {
            (Some(lo), Some(hi)) => TripCount {
                known: true,
                count: (hi - lo + 1).max(0),
            },
            _ => TripCount {
                known: false,
                count: UNKNOWN_TRIP,
            },
        }
    }

}
