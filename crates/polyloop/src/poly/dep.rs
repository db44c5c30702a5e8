//! Dependence polyhedra and their Farkas duals.
//!
//! A `DepPoly` lives over the concatenated vector
//! `z = (1 | s.. | i_x.. | i_y.. | t..)`: the intersection of both
//! iteration spaces, the "same memory cell" equalities
//! `M_x·i_x + c_x = M_y·i_y + c_y`, and one zero-step time dimension per
//! direction of reuse slack (the common null space of the index matrices
//! when the two accesses share a loop nest).
//!
//! The Farkas dual of "the schedule difference is non-negative over the
//! polyhedron" is a simplex whose rows correspond to the coordinates of `z`
//! and whose columns are
//! `(b | λ0 λ.. μ+.. μ-.. | ω_x ω_y | φ_x.. φ_y.. | w [| u..])`,
//! with `numLambda = #inequalities + 2·#equalities` (λ0 on top of that).
//! The `w` column shifts the constant row to demand `δ >= 1`; bounding
//! simplices additionally carry one `u` column per symbol.

use nalgebra::DMatrix;

use crate::ir::MemAccess;
use crate::math::{normalize_row, null_space, Simplex};

#[derive(Clone, Debug)]
pub struct DepPoly {
    /// Inequalities `a · z >= 0`.
    a: DMatrix<i64>,
    /// Equalities `e · z == 0`.
    e: DMatrix<i64>,
    dim0: usize,
    dim1: usize,
    num_sym: usize,
    time_dim: usize,
    null_step: Vec<i64>,
}

impl DepPoly {
    #[inline]
    pub fn dim0(&self) -> usize {
        self.dim0
    }
    #[inline]
    pub fn dim1(&self) -> usize {
        self.dim1
    }
    #[inline]
    pub fn num_sym(&self) -> usize {
        self.num_sym
    }
    #[inline]
    pub fn time_dim(&self) -> usize {
        self.time_dim
    }
    #[inline]
    pub fn null_step(&self, t: usize) -> i64 {
        self.null_step[t]
    }
    /// One multiplier per inequality, two per equality (split signs).
    #[inline]
    pub fn num_lambda(&self) -> usize {
        self.a.nrows() + 2 * self.e.nrows()
    }
    #[inline]
    pub fn num_phi_coef(&self) -> usize {
        self.dim0 + self.dim1
    }
    #[inline]
    pub const fn num_omega_coef() -> usize {
        2
    }
    #[inline]
    pub fn num_schedule_coef(&self) -> usize {
        self.num_phi_coef() + Self::num_omega_coef()
    }
    /// Farkas rows that do not correspond to time dimensions.
    #[inline]
    pub fn non_time_rows(&self) -> usize {
        1 + self.num_sym + self.dim0 + self.dim1
    }
    #[inline]
    fn num_z(&self) -> usize {
        1 + self.num_sym + self.dim0 + self.dim1 + self.time_dim
    }
    #[inline]
    fn col_x(&self, l: usize) -> usize {
        1 + self.num_sym + l
    }
    #[inline]
    fn col_y(&self, l: usize) -> usize {
        1 + self.num_sym + self.dim0 + l
    }
    #[inline]
    fn col_t(&self, k: usize) -> usize {
        1 + self.num_sym + self.dim0 + self.dim1 + k
    }

    /// Dependence polyhedron of two accesses to the same array. `None` when
    /// the kernel proves the accesses never refer to the same cell.
    pub fn dependence(x: &MemAccess, y: &MemAccess) -> Option<DepPoly> {
        debug_assert_eq!(x.array, y.array);
        debug_assert_eq!(x.array_dim(), y.array_dim(), "accesses not delinearized");
        debug_assert_eq!(x.loop_nest.num_sym(), y.loop_nest.num_sym());
        let (dim0, dim1) = (x.num_loops(), y.num_loops());
        let num_sym = x.loop_nest.num_sym();
        let same_nest = x.loop_nest == y.loop_nest && dim0 == dim1;
        // Reuse slack exists when both index matrices share null directions;
        // restrict to the shared-nest case, which covers reloads and repeat
        // accesses within one nest.
        let (null_basis, null_step): (DMatrix<i64>, Vec<i64>) = if same_nest {
            let mut stacked = DMatrix::<i64>::zeros(x.array_dim() + y.array_dim(), dim0);
            stacked.view_mut((0, 0), (x.array_dim(), dim0)).copy_from(&x.index);
            stacked
                .view_mut((x.array_dim(), 0), (y.array_dim(), dim0))
                .copy_from(&y.index);
            let basis = null_space(&stacked.transpose());
            let steps = (0..basis.nrows())
                .map(|k| (0..dim0).map(|l| basis[(k, l)] * basis[(k, l)]).sum())
                .collect();
            (basis, steps)
        } else {
            (DMatrix::zeros(0, 0), Vec::new())
        };
        let time_dim = null_basis.nrows();
        let nz = 1 + num_sym + dim0 + dim1 + time_dim;

        // Inequalities: both loop nests, mapped into the combined space.
        let xa = x.loop_nest.inequalities();
        let ya = y.loop_nest.inequalities();
        let mut a = DMatrix::<i64>::zeros(xa.nrows() + ya.nrows(), nz);
        for r in 0..xa.nrows() {
            a[(r, 0)] = xa[(r, 0)];
            for j in 0..num_sym {
                a[(r, 1 + j)] = xa[(r, 1 + j)];
            }
            for l in 0..dim0 {
                a[(r, 1 + num_sym + l)] = xa[(r, 1 + num_sym + l)];
            }
        }
        for r in 0..ya.nrows() {
            let rr = xa.nrows() + r;
            a[(rr, 0)] = ya[(r, 0)];
            for j in 0..num_sym {
                a[(rr, 1 + j)] = ya[(r, 1 + j)];
            }
            for l in 0..dim1 {
                a[(rr, 1 + num_sym + dim0 + l)] = ya[(r, 1 + num_sym + l)];
            }
        }

        // Equalities: same cell, plus the time parameterization of the null
        // directions: n_k·(i_y - i_x) == ‖n_k‖²·t_k.
        let d = x.array_dim();
        let mut e = DMatrix::<i64>::zeros(d + time_dim, nz);
        for r in 0..d {
            e[(r, 0)] = x.offset[r] - y.offset[r];
            for j in 0..num_sym {
                e[(r, 1 + j)] = x.sym_offset[(r, j)] - y.sym_offset[(r, j)];
            }
            for l in 0..dim0 {
                e[(r, 1 + num_sym + l)] = x.index[(r, l)];
            }
            for l in 0..dim1 {
                e[(r, 1 + num_sym + dim0 + l)] = -y.index[(r, l)];
            }
        }
        for k in 0..time_dim {
            let r = d + k;
            for l in 0..dim0 {
                e[(r, 1 + num_sym + l)] = -null_basis[(k, l)];
                e[(r, 1 + num_sym + dim0 + l)] = null_basis[(k, l)];
            }
            e[(r, 1 + num_sym + dim0 + dim1 + k)] = -null_step[k];
        }

        let mut poly = DepPoly {
            a,
            e,
            dim0,
            dim1,
            num_sym,
            time_dim,
            null_step,
        };
        poly.normalize();
        if poly.is_empty() {
            None
        } else {
            Some(poly)
        }
    }

    /// The self-dependence polyhedron of a store (x = y = `store`).
    pub fn self_dep(store: &MemAccess) -> DepPoly {
        DepPoly::dependence(store, store).expect("self dependence cannot be empty")
    }

    fn normalize(&mut self) {
        for m in [&mut self.a, &mut self.e] {
            for i in 0..m.nrows() {
                let mut row: Vec<i64> = (0..m.ncols()).map(|j| m[(i, j)]).collect();
                normalize_row(&mut row);
                for (j, &v) in row.iter().enumerate() {
                    m[(i, j)] = v;
                }
            }
        }
    }

    /// Rational emptiness of the polyhedron (variables unconstrained in
    /// sign; nonnegativity of induction variables comes from the loop rows).
    pub fn is_empty(&self) -> bool {
        !feasible_free(&self.a, &self.e)
    }

    /// Substitute time dimension `k` at `tau` steps, folding its column into
    /// the constants. Used to probe and then commit time directions.
    pub fn with_time_step(&self, k: usize, tau: i64) -> DepPoly {
        let mut out = self.clone();
        let col = self.col_t(k);
        for i in 0..out.a.nrows() {
            let c = out.a[(i, col)];
            if c != 0 {
                out.a[(i, 0)] += c * tau;
                out.a[(i, col)] = 0;
            }
        }
        for i in 0..out.e.nrows() {
            let c = out.e[(i, col)];
            if c != 0 {
                out.e[(i, 0)] += c * tau;
                out.e[(i, col)] = 0;
            }
        }
        out
    }

    /// Satisfaction simplex for the given direction: forward demands
    /// `sched_y - sched_x >= 0` over the polyhedron.
    pub fn satisfaction(&self, fwd: bool) -> Simplex {
        self.farkas(fwd, false)
    }
    /// Bounding simplex for the same direction:
    /// `w + u·s - (sched_y - sched_x) >= 0` (forward orientation shown).
    pub fn bounding(&self, fwd: bool) -> Simplex {
        self.farkas(fwd, true)
    }
    /// `[forward, backward]` satisfaction pair used for direction checks.
    pub fn farkas_pair(&self) -> [Simplex; 2] {
        [self.satisfaction(true), self.satisfaction(false)]
    }

    // Column offsets within a Farkas simplex (variable indices, so the
    // constant column is not counted).
    #[inline]
    pub fn lambda_span(&self) -> usize {
        1 + self.num_lambda()
    }
    #[inline]
    pub fn omega_off(&self) -> usize {
        self.lambda_span()
    }
    #[inline]
    pub fn phi_off(&self) -> usize {
        self.omega_off() + Self::num_omega_coef()
    }
    #[inline]
    pub fn w_off(&self) -> usize {
        self.phi_off() + self.num_phi_coef()
    }
    #[inline]
    pub fn u_off(&self) -> usize {
        self.w_off() + 1
    }

    fn farkas(&self, fwd: bool, bounding: bool) -> Simplex {
        let (na, ne) = (self.a.nrows(), self.e.nrows());
        let nrows = self.num_z();
        let ncols = 1 + self.w_off() + 1 + if bounding { self.num_sym } else { 0 };
        let sign = if fwd { 1i64 } else { -1 };
        // Bounding subtracts the schedule difference instead of asserting it.
        let ssign = if bounding { -sign } else { sign };
        let mut c = DMatrix::<i64>::zeros(nrows, ncols);
        for v in 0..nrows {
            // lambda0 multiplies the constant coordinate only
            if v == 0 {
                c[(v, 1)] = 1;
            }
            for r in 0..na {
                c[(v, 2 + r)] = self.a[(r, v)];
            }
            for r in 0..ne {
                c[(v, 2 + na + r)] = self.e[(r, v)];
                c[(v, 2 + na + ne + r)] = -self.e[(r, v)];
            }
        }
        let (omega, phi, w) = (1 + self.omega_off(), 1 + self.phi_off(), 1 + self.w_off());
        // Constant row: λ-combination - (ω_y - ω_x) == 0 (forward), and the
        // margin column that turns δ >= 0 into δ >= 1.
        c[(0, omega)] = ssign;
        c[(0, omega + 1)] = -ssign;
        // Satisfaction: margin column turning δ >= 0 into δ >= 1.
        // Bounding: the w slack itself. Both land in the constant row as -1.
        c[(0, w)] = -1;
        for l in 0..self.dim0 {
            c[(1 + self.num_sym + l, phi + l)] = ssign;
        }
        for l in 0..self.dim1 {
            c[(1 + self.num_sym + self.dim0 + l, phi + self.dim0 + l)] = -ssign;
        }
        if bounding {
            for j in 0..self.num_sym {
                c[(1 + j, 1 + self.u_off() + j)] = -1;
            }
        }
        Simplex::new(c)
    }

    /// Feasibility of the polyhedron conditioned on the fixed outer schedule
    /// rows being equal: `φx[r]·i_x + ox[r] == φy[r]·i_y + oy[r]`. Returns
    /// `true` when the conditioned polyhedron is empty, i.e. the dependence
    /// is satisfied by conditional independence.
    pub fn check_sat(
        &self,
        phi_x: &DMatrix<i64>,
        off_x: &[i64],
        phi_y: &DMatrix<i64>,
        off_y: &[i64],
    ) -> bool {
        let rows = phi_x.nrows();
        debug_assert_eq!(rows, phi_y.nrows());
        debug_assert!(phi_x.ncols() >= self.dim0 && phi_y.ncols() >= self.dim1);
        let nz = self.num_z();
        let mut e = DMatrix::<i64>::zeros(self.e.nrows() + rows, nz);
        e.view_mut((0, 0), (self.e.nrows(), nz)).copy_from(&self.e);
        for r in 0..rows {
            let er = self.e.nrows() + r;
            e[(er, 0)] = off_x[r] - off_y[r];
            for l in 0..self.dim0 {
                e[(er, self.col_x(l))] = phi_x[(r, l)];
            }
            for l in 0..self.dim1 {
                e[(er, self.col_y(l))] = -phi_y[(r, l)];
            }
        }
        !feasible_free(&self.a, &e)
    }

    #[cfg(test)]
    pub(crate) fn inequalities(&self) -> &DMatrix<i64> {
        &self.a
    }
    #[cfg(test)]
    pub(crate) fn equalities(&self) -> &DMatrix<i64> {
        &self.e
    }
}

/// LP feasibility of `{z : a·(1,z) >= 0, e·(1,z) == 0}` with sign-free `z`,
/// by splitting each coordinate into a difference of nonnegative parts.
fn feasible_free(a: &DMatrix<i64>, e: &DMatrix<i64>) -> bool {
    let nz = a.ncols().max(e.ncols());
    let nv = nz - 1;
    let (na, ne) = (a.nrows(), e.nrows());
    // columns: b | p_1..p_nv | n_1..n_nv | slack per inequality
    let mut c = DMatrix::<i64>::zeros(na + ne, 1 + 2 * nv + na);
    for r in 0..na {
        c[(r, 0)] = -a[(r, 0)];
        for v in 0..nv {
            c[(r, 1 + v)] = a[(r, 1 + v)];
            c[(r, 1 + nv + v)] = -a[(r, 1 + v)];
        }
        c[(r, 1 + 2 * nv + r)] = -1;
    }
    for r in 0..ne {
        c[(na + r, 0)] = -e[(r, 0)];
        for v in 0..nv {
            c[(na + r, 1 + v)] = e[(r, 1 + v)];
            c[(na + r, 1 + nv + v)] = -e[(r, 1 + v)];
        }
    }
    Simplex::new(c).feasible()
}
