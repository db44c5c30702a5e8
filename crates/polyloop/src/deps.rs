//! Dependence edges between memory accesses.
//!
//! A `Dependence` owns its polyhedron and the Farkas simplex pair the LP
//! consumes: `satisfaction` encodes "the schedule orders sink after source",
//! `bounding` encodes "the violation is bounded by `w + u·N`". The
//! `sat_lvl` shift register tracks, per recursion level, the depth at which
//! the edge was satisfied and whether that was by LP offset (high bit set)
//! or by conditional independence.
//!
//! Edges live in one central vector; each access chains through its
//! incoming and outgoing edges via `next_in`/`next_out` indices, in
//! insertion order.

use nalgebra::DMatrix;

use crate::ir::MemAccess;
use crate::math::Simplex;
use crate::poly::DepPoly;

const UNSAT: u8 = 255;
const LP_BIT: u8 = 0x80;

#[derive(Clone, Debug)]
pub struct Dependence {
    pub poly: DepPoly,
    pub satisfaction: Simplex,
    pub bounding: Simplex,
    /// Source access (memory index in the owning block).
    pub input: usize,
    /// Sink access.
    pub output: usize,
    /// `true` when (input, output) == (x, y) of the polyhedron.
    pub forward: bool,
    pub in_depth: usize,
    pub out_depth: usize,
    /// Chain links: next edge sharing this edge's output / input.
    pub next_in: Option<usize>,
    pub next_out: Option<usize>,
    sat_lvl: [u8; 8],
}

impl Dependence {
    fn new(
        poly: DepPoly,
        satisfaction: Simplex,
        bounding: Simplex,
        input: usize,
        output: usize,
        in_depth: usize,
        out_depth: usize,
        forward: bool,
    ) -> Dependence {
        let d = Dependence {
            poly,
            satisfaction,
            bounding,
            input,
            output,
            forward,
            in_depth,
            out_depth,
            next_in: None,
            next_out: None,
            sat_lvl: [UNSAT; 8],
        };
        debug_assert_eq!(
            d.in_depth + d.out_depth,
            d.poly.num_phi_coef(),
            "phi coefficient accounting"
        );
        d
    }

    // --- satisfaction level stack ---

    /// Push the current level before a speculative LP pass. Pretending to be
    /// one level deeper clears the slot when it is not yet decided there.
    pub fn stash_sat_level(&mut self, depth: u8) {
        debug_assert!(depth <= 127);
        debug_assert!(self.sat_lvl[7] == UNSAT, "sat level stack overflow");
        self.sat_lvl.copy_within(0..7, 1);
        if self.sat_level() + 1 > depth {
            self.sat_lvl[0] = UNSAT;
        }
    }
    pub fn pop_sat_level(&mut self) {
        self.sat_lvl.copy_within(1..8, 0);
        self.sat_lvl[7] = UNSAT;
    }
    /// Satisfied at `d` because the LP chose an offset; the loop at `d`
    /// cannot be reordered past this edge.
    pub fn set_sat_level_lp(&mut self, d: u8) {
        self.sat_lvl[0] = LP_BIT | d;
    }
    /// Satisfied at `d` by conditional independence; parallelization stays
    /// legal.
    pub fn set_sat_level_independent(&mut self, d: u8) {
        self.sat_lvl[0] = d;
    }
    #[inline]
    pub fn sat_level(&self) -> u8 {
        self.sat_lvl[0] & 0x7f
    }
    #[inline]
    pub fn is_sat(&self, depth: usize) -> bool {
        usize::from(self.sat_level()) <= depth
    }
    #[inline]
    pub fn is_active(&self, depth: usize) -> bool {
        usize::from(self.sat_level()) > depth
    }
    #[inline]
    pub fn is_cond_indep(&self) -> bool {
        self.sat_lvl[0] & LP_BIT == 0
    }
    /// An edge is out of play once the level exceeds either endpoint's nest.
    #[inline]
    pub fn is_inactive(&self, depth: usize) -> bool {
        depth >= self.in_depth.min(self.out_depth)
    }
    /// Forget all satisfaction decisions (fresh scheduling attempt).
    pub fn reset_sat_levels(&mut self) {
        self.sat_lvl = [UNSAT; 8];
    }
    #[cfg(test)]
    pub(crate) fn raw_sat_stack(&self) -> [u8; 8] {
        self.sat_lvl
    }

    // --- Farkas block accessors used by the LP assembly ---

    #[inline]
    pub fn num_lambda(&self) -> usize {
        // satisfaction and bounding each carry their own multipliers
        2 * self.poly.lambda_span()
    }
    #[inline]
    pub fn num_constraints(&self) -> usize {
        self.satisfaction.num_cons() + self.bounding.num_cons()
    }
    /// Number of symbol-dependent bounding variables (the `u`s).
    #[inline]
    pub fn num_dyn_bounding(&self) -> usize {
        self.poly.num_sym()
    }
    pub fn num_phi_coefficients(&self) -> usize {
        self.poly.num_phi_coef()
    }
    /// Phi column ranges of the polyhedron's x/y blocks mapped to this
    /// edge's (input, output) orientation.
    pub fn phi_ranges(&self) -> [(usize, usize); 2] {
        let x = (self.poly.phi_off(), self.poly.dim0());
        let y = (self.poly.phi_off() + self.poly.dim0(), self.poly.dim1());
        if self.forward {
            [x, y]
        } else {
            [y, x]
        }
    }
    /// Omega column of the input / output side.
    pub fn omega_cols(&self) -> [usize; 2] {
        let o = self.poly.omega_off();
        if self.forward {
            [o, o + 1]
        } else {
            [o + 1, o]
        }
    }

    /// Decide execution order of `x` relative to `y`: `true` when `x`
    /// executes first. Fusion coordinates decide outer levels; ties fall to
    /// feasibility of the Farkas pair with unit schedules at the depth.
    pub fn check_direction(poly: &DepPoly, x: &MemAccess, y: &MemAccess) -> bool {
        let [fxy, fyx] = poly.farkas_pair();
        let common = x.num_loops().min(y.num_loops());
        let nphi = poly.num_phi_coef();
        for i in 0..=common {
            if y.fusion_omega[i] != x.fusion_omega[i] {
                return y.fusion_omega[i] > x.fusion_omega[i];
            }
            // The deciding level must exist while loops remain: instruction
            // order at the shared depth differs at the latest.
            debug_assert!(
                i < common,
                "fusion omegas identical through the common nest"
            );
            if i >= common {
                break;
            }
            let mut vals = vec![0i64; 2 + nphi];
            vals[2 + i] = 1;
            vals[2 + poly.dim0() + i] = 1;
            if !fxy.feasible_with(&vals, poly.omega_off(), poly.non_time_rows()) {
                debug_assert!(fyx.feasible_with(&vals, poly.omega_off(), poly.non_time_rows()));
                return false;
            }
            if !fyx.feasible_with(&vals, poly.omega_off(), poly.non_time_rows()) {
                return true;
            }
        }
        true
    }

    /// Check a pair of accesses to the same array (at least one a store).
    /// Returns zero edges (proven independent), one edge (timeless), or two
    /// (a repeat access across time creates both orderings).
    pub fn check(x_id: usize, x: &MemAccess, y_id: usize, y: &MemAccess) -> Vec<Dependence> {
        let Some(poly) = DepPoly::dependence(x, y) else {
            return Vec::new();
        };
        debug_assert_eq!(x.num_loops(), poly.dim0());
        debug_assert_eq!(y.num_loops(), poly.dim1());
        let fwd = Self::check_direction(&poly, x, y);
        if poly.time_dim() == 0 {
            vec![Self::oriented(poly, x_id, x, y_id, y, fwd)]
        } else {
            Self::time_check(poly, x_id, x, y_id, y, fwd)
        }
    }

    /// Construct the store's reload edge set: a new load of the just-stored
    /// value plus the dependence edges tying it to the store. The store is
    /// always the source.
    pub fn reload(
        store_id: usize,
        store: &MemAccess,
        load_id: usize,
        load: &MemAccess,
    ) -> Vec<Dependence> {
        let poly = DepPoly::self_dep(store);
        if poly.time_dim() == 0 {
            vec![Self::oriented(poly, store_id, store, load_id, load, true)]
        } else {
            Self::time_check(poly, store_id, store, load_id, load, true)
        }
    }

    fn oriented(
        poly: DepPoly,
        x_id: usize,
        x: &MemAccess,
        y_id: usize,
        y: &MemAccess,
        fwd: bool,
    ) -> Dependence {
        let sat = poly.satisfaction(fwd);
        let bnd = poly.bounding(fwd);
        let (in_id, out_id, in_d, out_d) = if fwd {
            (x_id, y_id, x.num_loops(), y.num_loops())
        } else {
            (y_id, x_id, y.num_loops(), x.num_loops())
        };
        Dependence::new(poly, sat, bnd, in_id, out_id, in_d, out_d, fwd)
    }

    /// Repeat accesses across time: probe each time dimension's direction,
    /// commit the net shift, and emit both orderings.
    fn time_check(
        poly: DepPoly,
        x_id: usize,
        x: &MemAccess,
        y_id: usize,
        y: &MemAccess,
        fwd: bool,
    ) -> Vec<Dependence> {
        let dep0 = Self::oriented(poly.clone(), x_id, x, y_id, y, fwd);
        // For each time dimension, find the sign that realizes the reversed
        // ordering: shift by one step and ask which direction survives.
        let mut committed = poly.clone();
        for k in 0..poly.time_dim() {
            let probe = poly.with_time_step(k, 1);
            let dir = Self::check_direction(&probe, x, y);
            let tau = if dir { 1 } else { -1 };
            committed = committed.with_time_step(k, tau);
        }
        let dep1 = Self::oriented(committed, x_id, x, y_id, y, !fwd);
        vec![dep0, dep1]
    }

    /// Is the dependence satisfied by schedules fixed through `rows` levels?
    /// Infeasibility of the conditioned polyhedron means the two accesses
    /// never meet once the outer schedules agree.
    pub fn check_empty_sat(
        &self,
        in_phi: &DMatrix<i64>,
        in_off: &[i64],
        out_phi: &DMatrix<i64>,
        out_off: &[i64],
    ) -> bool {
        let (xp, xo, yp, yo) = if self.forward {
            (in_phi, in_off, out_phi, out_off)
        } else {
            (out_phi, out_off, in_phi, in_off)
        };
        self.poly.check_sat(xp, xo, yp, yo)
    }

    /// Rebuild this edge with a different source access (used when loads are
    /// duplicated or reloads copy a store's edges).
    pub fn replace_input(&self, new_in: usize, depth: usize) -> Dependence {
        let mut e = self.clone();
        e.input = new_in;
        e.in_depth = depth;
        e.next_in = None;
        e.next_out = None;
        e
    }
    pub fn replace_output(&self, new_out: usize, depth: usize) -> Dependence {
        let mut e = self.clone();
        e.output = new_out;
        e.out_depth = depth;
        e.next_in = None;
        e.next_out = None;
        e
    }
}
