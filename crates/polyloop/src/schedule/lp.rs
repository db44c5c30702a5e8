//! Per-depth omni-simplex assembly and solution extraction.
//!
//! Variable order in the LP (after the constant column):
//! `lambdas | slack | omegas | phis | w | u`. The lexicographic objective
//! minimizes everything after the lambdas in that order, so slack
//! normalization wins over offsets, offsets over rotations, and deferral
//! (`w`, `u`) is a last resort.

use nalgebra::DMatrix;
use tracing::trace;

use crate::containers::BitSet;
use crate::math::{lcm, lex_sign, null_space, rank, Simplex};

use super::{GraphView, LoopBlock};

impl LoopBlock {
    /// Count LP parameters contributed by edges active at this depth.
    /// `stash` additionally pushes each edge's satisfaction level, for the
    /// speculative `optimize_sat_dep` retry.
    pub(super) fn count_aux_params(&mut self, g: &GraphView, d: usize, stash: bool) {
        let ids = self.active_edge_ids(g, d);
        self.num_lambda = 0;
        self.num_bounding = 0;
        self.num_constraints = 0;
        self.num_active_edges = 0;
        for e in ids {
            if stash {
                self.edges[e].stash_sat_level(d as u8);
            }
            let edge = &self.edges[e];
            self.num_lambda += edge.num_lambda();
            self.num_bounding += edge.num_dyn_bounding();
            self.num_constraints += edge.num_constraints();
            self.num_active_edges += 1;
        }
    }

    /// Assign each candidate node its omega slot and (if its row is still
    /// free) a phi block plus one independence slack.
    pub(super) fn set_schedule_memory_offsets(&mut self, g: &GraphView, d: usize) {
        self.num_omega_coefs = 0;
        self.num_phi_coefs = 0;
        self.num_slack = 0;
        let candidates: Vec<usize> = g
            .node_ids
            .iter()
            .filter(|&n| self.nodes[n].num_loops > d && self.node_has_active_edges(g, n, d))
            .collect();
        for n in candidates {
            let loops = self.nodes[n].num_loops;
            let node = &mut self.nodes[n];
            node.omega_offset = self.num_omega_coefs;
            self.num_omega_coefs += 1;
            if node.phi_is_scheduled(d) {
                continue;
            }
            node.phi_offset = self.num_phi_coefs;
            self.num_phi_coefs += loops;
            self.num_slack += 1;
        }
    }

    /// Solve depth `d` for the view. On success the solved rows are written
    /// into the nodes, satisfied edges are deactivated, and the set of
    /// LP-satisfied edges is returned.
    pub(super) fn solve_graph(
        &mut self,
        g: &mut GraphView,
        d: usize,
        satisfy_deps: bool,
    ) -> Option<BitSet> {
        if self.num_lambda == 0 {
            self.set_schedules_independent(g, d);
            return Some(BitSet::new());
        }
        let omni = self.instantiate_omni_simplex(g, d, satisfy_deps);
        let sol = omni.lex_minimize(self.num_lambda)?;
        trace!(depth = d, satisfy_deps, "lp solved");
        self.update_schedules(g, d, &sol);
        Some(self.deactivate_satisfied_edges(g, d, &sol))
    }

    fn instantiate_omni_simplex(&self, g: &GraphView, d: usize, satisfy_deps: bool) -> Simplex {
        let nvars = self.num_lambda
            + self.num_slack
            + self.num_omega_coefs
            + self.num_phi_coefs
            + self.num_active_edges
            + self.num_bounding;
        let nrows = self.num_constraints + self.num_slack;
        let mut c = DMatrix::<i64>::zeros(nrows, 1 + nvars);
        let omega_base = self.num_lambda + self.num_slack;
        let phi_base = omega_base + self.num_omega_coefs;
        let w_base = phi_base + self.num_phi_coefs;
        let u_base = w_base + self.num_active_edges;
        let mut row = 0usize;
        let mut l = 0usize; // lambda cursor
        let mut w_var = w_base;
        let mut u_var = u_base;
        for e in self.active_edge_ids(g, d) {
            let edge = &self.edges[e];
            let sat = edge.satisfaction.constraints();
            let bnd = edge.bounding.constraints();
            let (nsat, nbnd) = (sat.nrows(), bnd.nrows());
            let span = edge.poly.lambda_span();
            // Lambda blocks: satisfaction rows then bounding rows, each with
            // a private multiplier set.
            for r in 0..nsat {
                for j in 0..span {
                    c[(row + r, 1 + l + j)] = sat[(r, 1 + j)];
                }
                let mut b = sat[(r, 0)];
                if satisfy_deps {
                    b += sat[(r, 1 + edge.poly.w_off())];
                }
                c[(row + r, 0)] = b;
            }
            for r in 0..nbnd {
                for j in 0..span {
                    c[(row + nsat + r, 1 + l + span + j)] = bnd[(r, 1 + j)];
                }
                c[(row + nsat + r, 0)] = bnd[(r, 0)];
                c[(row + nsat + r, 1 + w_var)] = bnd[(r, 1 + edge.poly.w_off())];
                for k in 0..edge.num_dyn_bounding() {
                    c[(row + nsat + r, 1 + u_var + k)] = bnd[(r, 1 + edge.poly.u_off() + k)];
                }
            }
            l += 2 * span;
            // Phi and omega blocks per endpoint, outer-aligned into the
            // owning node's variables; scheduled rows fold into constants.
            let sides = [
                (edge.input, edge.in_depth, 0usize),
                (edge.output, edge.out_depth, 1usize),
            ];
            for (acc, side_depth, side) in sides {
                if d >= side_depth {
                    continue;
                }
                let node_id = self.mem_node[acc].expect("edge endpoint in a node");
                let node = &self.nodes[node_id];
                let (pstart, pwidth) = edge.phi_ranges()[side];
                let ocol = edge.omega_cols()[side];
                for r in 0..nsat {
                    c[(row + r, 1 + omega_base + node.omega_offset)] += sat[(r, 1 + ocol)];
                }
                for r in 0..nbnd {
                    c[(row + nsat + r, 1 + omega_base + node.omega_offset)] += bnd[(r, 1 + ocol)];
                }
                if node.phi_is_scheduled(d) {
                    for r in 0..nsat {
                        let mut acc_v = 0i64;
                        for j in 0..pwidth {
                            acc_v += sat[(r, 1 + pstart + j)] * node.schedule.phi[(d, j)];
                        }
                        c[(row + r, 0)] -= acc_v;
                    }
                    for r in 0..nbnd {
                        let mut acc_v = 0i64;
                        for j in 0..pwidth {
                            acc_v += bnd[(r, 1 + pstart + j)] * node.schedule.phi[(d, j)];
                        }
                        c[(row + nsat + r, 0)] -= acc_v;
                    }
                } else {
                    for r in 0..nsat {
                        for j in 0..pwidth {
                            c[(row + r, 1 + phi_base + node.phi_offset + j)] +=
                                sat[(r, 1 + pstart + j)];
                        }
                    }
                    for r in 0..nbnd {
                        for j in 0..pwidth {
                            c[(row + nsat + r, 1 + phi_base + node.phi_offset + j)] +=
                                bnd[(r, 1 + pstart + j)];
                        }
                    }
                }
            }
            row += nsat + nbnd;
            w_var += 1;
            u_var += edge.num_dyn_bounding();
        }
        debug_assert_eq!(l, self.num_lambda);
        debug_assert_eq!(row, self.num_constraints);
        self.add_independent_solution_constraints(&mut c, g, d, row, phi_base);
        Simplex::new(c)
    }

    /// One `phi-combination >= 1` row per unscheduled candidate node,
    /// preventing the trivial all-zero rotation. At depth 0 the combination
    /// is the plain sum; deeper levels combine the null space of the fixed
    /// outer rows, sign-flipped to preserve the original outer-first
    /// traversal bias.
    fn add_independent_solution_constraints(
        &self,
        c: &mut DMatrix<i64>,
        g: &GraphView,
        d: usize,
        mut row: usize,
        phi_base: usize,
    ) {
        let mut s = self.num_lambda;
        for n in g.node_ids.iter() {
            let node = &self.nodes[n];
            if node.phi_is_scheduled(d)
                || node.num_loops <= d
                || !self.node_has_active_edges(g, n, d)
            {
                continue;
            }
            c[(row, 0)] = 1;
            if d == 0 {
                for j in 0..node.num_loops {
                    c[(row, 1 + phi_base + node.phi_offset + j)] = 1;
                }
            } else {
                let outer = node.schedule.phi.rows(0, d).into_owned();
                let basis = null_space(&outer.transpose());
                debug_assert!(basis.nrows() > 0, "fixed rows already span the space");
                for m in 0..basis.nrows() {
                    let sign = lex_sign((0..basis.ncols()).map(|j| basis[(m, j)]));
                    for j in 0..node.num_loops {
                        c[(row, 1 + phi_base + node.phi_offset + j)] += sign * basis[(m, j)];
                    }
                }
            }
            c[(row, 1 + s)] = -1;
            s += 1;
            row += 1;
        }
        debug_assert_eq!(row, c.nrows());
    }

    fn update_schedules(&mut self, g: &GraphView, d: usize, sol: &[crate::math::Rat]) {
        let omega_base = self.num_lambda + self.num_slack;
        let phi_base = omega_base + self.num_omega_coefs;
        let ids: Vec<usize> = g.node_ids.iter().collect();
        for n in ids {
            if self.nodes[n].num_loops <= d {
                continue;
            }
            if !self.node_has_active_edges(g, n, d) {
                self.complete_schedule_row(n, d);
                continue;
            }
            let loops = self.nodes[n].num_loops;
            let scheduled = self.nodes[n].phi_is_scheduled(d);
            let s_omega = sol[omega_base + self.nodes[n].omega_offset];
            if scheduled {
                debug_assert!(s_omega.is_integer());
                self.nodes[n].schedule.offset_omega[d] = s_omega.numer_i64();
                continue;
            }
            let phis = &sol[phi_base + self.nodes[n].phi_offset
                ..phi_base + self.nodes[n].phi_offset + loops];
            // Clear denominators across the row and the offset together.
            let mut l = s_omega.denom_i64();
            for p in phis {
                l = lcm(l, p.denom_i64());
            }
            let node = &mut self.nodes[n];
            node.schedule.offset_omega[d] = s_omega.numer_i64() * (l / s_omega.denom_i64());
            let mut all_zero = true;
            for (j, p) in phis.iter().enumerate() {
                let v = p.numer_i64() * (l / p.denom_i64());
                debug_assert!(v >= 0, "lp phi coefficients are nonnegative");
                node.schedule.phi[(d, j)] = v;
                all_zero &= v == 0;
            }
            debug_assert!(!all_zero, "independence constraint violated");
        }
    }

    /// Mark edges whose `w`/`u` came out non-zero as satisfied at `d` by the
    /// LP, deactivate them, and flag the carried dependence on both nodes.
    /// Edges the fixed schedules render unreachable are retired as
    /// conditionally independent.
    fn deactivate_satisfied_edges(
        &mut self,
        g: &mut GraphView,
        d: usize,
        sol: &[crate::math::Rat],
    ) -> BitSet {
        let w_base =
            self.num_lambda + self.num_slack + self.num_omega_coefs + self.num_phi_coefs;
        let u_base = w_base + self.num_active_edges;
        let mut deactivated = BitSet::new();
        let ids = self.active_edge_ids(g, d);
        let any = sol[w_base..u_base + self.num_bounding]
            .iter()
            .any(|x| !x.is_zero());
        if any {
            let mut w = w_base;
            let mut u = u_base;
            for e in ids {
                let nu = self.edges[e].num_dyn_bounding();
                let hit =
                    !sol[w].is_zero() || sol[u..u + nu].iter().any(|x| !x.is_zero());
                if hit {
                    g.active_edges.remove(e);
                    deactivated.insert(e);
                    self.edges[e].set_sat_level_lp(d as u8);
                    let (i, o) = (self.edges[e].input, self.edges[e].output);
                    if let Some(ni) = self.mem_node[i] {
                        self.carried[ni].set(d);
                    }
                    if let Some(no) = self.mem_node[o] {
                        self.carried[no].set(d);
                    }
                }
                w += 1;
                u += nu;
            }
        }
        // Conditional independence: with rows 0..=d fixed, some remaining
        // edges can no longer connect two iterations.
        for e in self.active_edge_ids(g, d) {
            let edge = &self.edges[e];
            let (Some(ni), Some(no)) = (self.mem_node[edge.input], self.mem_node[edge.output])
            else {
                continue;
            };
            let rows = d + 1;
            let in_phi = phi_rows(&self.nodes[ni].schedule.phi, rows, edge.in_depth);
            let out_phi = phi_rows(&self.nodes[no].schedule.phi, rows, edge.out_depth);
            let in_off = &self.nodes[ni].schedule.offset_omega[..rows];
            let out_off = &self.nodes[no].schedule.offset_omega[..rows];
            if edge.check_empty_sat(&in_phi, in_off, &out_phi, out_off) {
                self.edges[e].set_sat_level_independent(d as u8);
                g.active_edges.remove(e);
            }
        }
        deactivated
    }

    /// Give every candidate node a schedule row without solving: the
    /// earliest unit row independent of its fixed outer rows, offset zero.
    pub(super) fn set_schedules_independent(&mut self, g: &GraphView, d: usize) {
        let ids: Vec<usize> = g.node_ids.iter().collect();
        for n in ids {
            if self.nodes[n].num_loops > d && !self.nodes[n].phi_is_scheduled(d) {
                self.complete_schedule_row(n, d);
            }
        }
    }

    fn complete_schedule_row(&mut self, n: usize, d: usize) {
        let loops = self.nodes[n].num_loops;
        let phi = &mut self.nodes[n].schedule.phi;
        for j in 0..loops {
            let mut stacked = DMatrix::<i64>::zeros(d + 1, loops);
            stacked.view_mut((0, 0), (d, loops)).copy_from(&phi.rows(0, d));
            stacked[(d, j)] = 1;
            if rank(&stacked) == d + 1 {
                for k in 0..loops {
                    phi[(d, k)] = i64::from(k == j);
                }
                self.nodes[n].schedule.offset_omega[d] = 0;
                return;
            }
        }
        debug_assert!(false, "outer rows spanned the space");
    }
}

fn phi_rows(phi: &DMatrix<i64>, rows: usize, width: usize) -> DMatrix<i64> {
    let mut m = DMatrix::<i64>::zeros(rows, width);
    for r in 0..rows {
        for j in 0..width.min(phi.ncols()) {
            m[(r, j)] = phi[(r, j)];
        }
    }
    m
}
