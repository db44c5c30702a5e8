//! Exact lexicographic simplex over equality-form tableaus.
//!
//! Constraints are stored as an integer matrix whose column 0 is the
//! constant: row `i` encodes `sum_j cons[(i, 1+j)] * x_j == cons[(i, 0)]`
//! with every `x_j >= 0`. Solving happens on an exact rational tableau:
//! phase-1 feasibility with Bland's rule, then sequential minimization of a
//! suffix of the variables, pinning each optimum before moving on.

use nalgebra::DMatrix;

use super::rat::Rat;

#[derive(Clone, Debug)]
pub struct Simplex {
    cons: DMatrix<i64>,
}

impl Simplex {
    pub fn new(cons: DMatrix<i64>) -> Self {
        Self { cons }
    }
    #[inline]
    pub fn num_vars(&self) -> usize {
        self.cons.ncols().saturating_sub(1)
    }
    #[inline]
    pub fn num_cons(&self) -> usize {
        self.cons.nrows()
    }
    #[inline]
    pub fn constraints(&self) -> &DMatrix<i64> {
        &self.cons
    }
    #[inline]
    pub fn constraints_mut(&mut self) -> &mut DMatrix<i64> {
        &mut self.cons
    }
    /// Drop all variable columns from `nv` onward (keeps the constant).
    pub fn truncate_vars(&mut self, nv: usize) {
        if nv < self.num_vars() {
            self.cons = self.cons.columns(0, 1 + nv).into_owned();
        }
    }

    /// Is the system satisfiable at all?
    pub fn feasible(&self) -> bool {
        Tableau::from_rows(self.rows(self.num_cons(), self.num_vars(), &[], 0)).is_some()
    }

    /// Feasibility with variables `var_start..var_start+vals.len()` fixed to
    /// `vals`, every later variable dropped (held at zero), and only the
    /// leading `keep_rows` constraint rows retained.
    pub fn feasible_with(&self, vals: &[i64], var_start: usize, keep_rows: usize) -> bool {
        debug_assert!(keep_rows <= self.num_cons());
        Tableau::from_rows(self.rows(keep_rows, var_start, vals, var_start)).is_some()
    }

    /// Sequentially minimize variables `skip..` in index order, pinning each
    /// optimum. Returns the value of every variable, or `None` if infeasible.
    pub fn lex_minimize(&self, skip: usize) -> Option<Vec<Rat>> {
        let n = self.num_vars();
        let mut t = Tableau::from_rows(self.rows(self.num_cons(), n, &[], 0))?;
        for v in skip..n {
            t.minimize_and_pin(v);
        }
        Some((0..n).map(|v| t.value(v)).collect())
    }

    /// Materialize `keep_rows` rows over `nfree` leading variables, with
    /// `vals` substituted for the variables starting at `subst_start`.
    fn rows(&self, keep_rows: usize, nfree: usize, vals: &[i64], subst_start: usize) -> RawRows {
        let mut rows = Vec::with_capacity(keep_rows);
        let mut b = Vec::with_capacity(keep_rows);
        for i in 0..keep_rows {
            let mut bi = self.cons[(i, 0)] as i128;
            for (k, &v) in vals.iter().enumerate() {
                let c = subst_start + k;
                if 1 + c < self.cons.ncols() {
                    bi -= self.cons[(i, 1 + c)] as i128 * v as i128;
                }
            }
            rows.push(
                (0..nfree)
                    .map(|j| {
                        if 1 + j < self.cons.ncols() {
                            Rat::int(self.cons[(i, 1 + j)])
                        } else {
                            Rat::ZERO
                        }
                    })
                    .collect::<Vec<_>>(),
            );
            b.push(Rat::new(bi, 1));
        }
        RawRows { rows, b, n: nfree }
    }
}

struct RawRows {
    rows: Vec<Vec<Rat>>,
    b: Vec<Rat>,
    n: usize,
}

/// Rational tableau with an explicit basis. Column indices < `n` are real
/// variables; during phase 1 columns `n..n+m` are artificials.
struct Tableau {
    t: Vec<Vec<Rat>>,
    b: Vec<Rat>,
    basis: Vec<usize>,
    n: usize,
    dead: Vec<bool>,
    pinned: Vec<Rat>,
}

impl Tableau {
    /// Phase 1: drive the artificial basis to zero. `None` if infeasible.
    fn from_rows(raw: RawRows) -> Option<Tableau> {
        let RawRows { mut rows, mut b, n } = raw;
        let m = rows.len();
        for (i, row) in rows.iter_mut().enumerate() {
            if b[i].is_negative() {
                for x in row.iter_mut() {
                    *x = -*x;
                }
                b[i] = -b[i];
            }
            row.extend((0..m).map(|j| if j == i { Rat::ONE } else { Rat::ZERO }));
        }
        let mut t = Tableau {
            t: rows,
            b,
            basis: (n..n + m).collect(),
            n,
            dead: vec![false; n],
            pinned: vec![Rat::ZERO; n],
        };
        loop {
            // Reduced cost of x_j for z = sum of artificial-basic rows.
            let entering = (0..t.n).find(|&j| {
                !t.dead[j] && {
                    let mut s = Rat::ZERO;
                    for i in 0..t.t.len() {
                        if t.basis[i] >= t.n {
                            s += t.t[i][j];
                        }
                    }
                    s.is_positive()
                }
            });
            let Some(j) = entering else { break };
            let r = t.ratio_row(j)?;
            t.pivot(r, j);
        }
        // Infeasible if any artificial stays basic at a non-zero value.
        for i in 0..t.t.len() {
            if t.basis[i] >= t.n && !t.b[i].is_zero() {
                return None;
            }
        }
        t.expel_artificials();
        Some(t)
    }

    fn expel_artificials(&mut self) {
        let mut i = 0;
        while i < self.t.len() {
            if self.basis[i] >= self.n {
                if let Some(j) = (0..self.n).find(|&j| !self.dead[j] && !self.t[i][j].is_zero()) {
                    self.pivot(i, j);
                } else {
                    // Redundant row (zero over real vars, b == 0).
                    self.t.remove(i);
                    self.b.remove(i);
                    self.basis.remove(i);
                    continue;
                }
            }
            i += 1;
        }
        for row in self.t.iter_mut() {
            row.truncate(self.n);
        }
    }

    /// Bland ratio test for entering column `j`; `None` means no positive
    /// pivot exists in that column.
    fn ratio_row(&self, j: usize) -> Option<usize> {
        let mut best: Option<(Rat, usize)> = None;
        for i in 0..self.t.len() {
            if !self.t[i][j].is_positive() {
                continue;
            }
            let ratio = self.b[i] / self.t[i][j];
            match &best {
                Some((r, bi))
                    if *r < ratio || (*r == ratio && self.basis[*bi] <= self.basis[i]) => {}
                _ => best = Some((ratio, i)),
            }
        }
        best.map(|(_, i)| i)
    }

    fn pivot(&mut self, r: usize, c: usize) {
        let piv = self.t[r][c];
        debug_assert!(!piv.is_zero());
        let inv = piv.recip();
        for x in self.t[r].iter_mut() {
            *x = *x * inv;
        }
        self.b[r] = self.b[r] * inv;
        for i in 0..self.t.len() {
            if i == r || self.t[i][c].is_zero() {
                continue;
            }
            let f = self.t[i][c];
            for j in 0..self.t[i].len() {
                let s = self.t[r][j] * f;
                self.t[i][j] -= s;
            }
            let s = self.b[r] * f;
            self.b[i] -= s;
        }
        self.basis[r] = c;
    }

    fn row_of(&self, v: usize) -> Option<usize> {
        self.basis.iter().position(|&b| b == v)
    }

    fn value(&self, v: usize) -> Rat {
        if self.dead[v] {
            self.pinned[v]
        } else if let Some(r) = self.row_of(v) {
            self.b[r]
        } else {
            Rat::ZERO
        }
    }

    /// Minimize `x_v`, then fix it at its optimum so later objectives cannot
    /// degrade it.
    fn minimize_and_pin(&mut self, v: usize) {
        if self.dead[v] {
            return;
        }
        loop {
            let Some(r) = self.row_of(v) else {
                // Non-basic: value 0, which is the floor.
                self.dead[v] = true;
                self.pinned[v] = Rat::ZERO;
                return;
            };
            if self.b[r].is_zero() {
                break;
            }
            // z = x_v = b_r - sum t[r][j] x_j: any positive t[r][j] lowers z.
            let entering =
                (0..self.n).find(|&j| j != v && !self.dead[j] && self.t[r][j].is_positive());
            let Some(j) = entering else { break };
            // Row r has t[r][j] > 0, so the ratio test cannot come up empty.
            let lr = self.ratio_row(j).unwrap_or(r);
            self.pivot(lr, j);
        }
        // Pin at the achieved optimum.
        if let Some(r) = self.row_of(v) {
            let m = self.b[r];
            self.pinned[v] = m;
            self.dead[v] = true;
            self.b[r] = Rat::ZERO;
            self.t[r][v] = Rat::ZERO;
            // Row r lost its basic variable; repair or drop it.
            if let Some(j) = (0..self.n).find(|&j| !self.dead[j] && self.t[r][j].is_positive()) {
                self.pivot(r, j);
            } else if let Some(j) = (0..self.n).find(|&j| !self.dead[j] && !self.t[r][j].is_zero())
            {
                for x in self.t[r].iter_mut() {
                    *x = -*x;
                }
                self.pivot(r, j);
            } else {
                self.t.remove(r);
                self.b.remove(r);
                self.basis.remove(r);
            }
        } else {
            self.dead[v] = true;
            self.pinned[v] = Rat::ZERO;
        }
    }
}
