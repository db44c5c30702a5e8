//! Joint register-unroll / vectorization / cache-factor search.
//!
//! Recursive descent over the pre-order loop stream. A reorderable loop
//! enumerates register unroll factors 1..=16 and, if nothing outer is
//! vectorized yet, vectorization widths from the machine maximum down to
//! scalar. Sub-loops are evaluated under the candidate state with early
//! exit against the best cost seen; the outermost loop finishes by running
//! the cache optimizer over its nest chain.

use tracing::debug;

use crate::schedule::LoopBlock;
use crate::tree::LoopTreeSchedule;

use super::cache::{CacheOptimizer, LoopSpec};
use super::machine::Machine;
use super::regs::ReductionExpansionBounds;
use super::summary::{summarize, TreeSummary};
use super::unrolls::Unrolls;

/// Per-loop output of the optimizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopTransform {
    pub l2_vector_width: u32,
    /// Register unroll factor, 1..=16.
    pub register_unroll: i32,
    /// Cache tile in multiples of the register factor; 1 = unblocked.
    pub cache_unroll: i64,
    /// Innermost-cache-loop choice; 0xf keeps the given order.
    pub cache_permutation: u8,
}

impl Default for LoopTransform {
    fn default() -> Self {
        LoopTransform {
            l2_vector_width: 0,
            register_unroll: 1,
            cache_unroll: 1,
            cache_permutation: 0xf,
        }
    }
}

pub struct SearchResult {
    pub transforms: Vec<LoopTransform>,
    pub cost: f64,
}

/// Optimize a solved, materialized block on the given machine.
pub fn optimize_tree(machine: &Machine, lb: &LoopBlock, lts: &LoopTreeSchedule) -> SearchResult {
    let summary = summarize(machine, lb, lts);
    let l2maxvf = lb
        .memory
        .iter()
        .map(|m| machine.l2_max_vector_width(m.elem_bytes))
        .min()
        .unwrap_or(0);
    let mut ctx = SearchCtx {
        machine,
        summary: &summary,
        trfs: vec![LoopTransform::default(); summary.loops.len()],
        phi_pressure: vec![0.0; summary.loops.len()],
        unrolls: Unrolls::default(),
        l2maxvf,
    };
    let cost = ctx.optimize_root();
    debug!(cost, "cost search finished");
    SearchResult {
        transforms: ctx.trfs,
        cost,
    }
}

struct SearchCtx<'a> {
    machine: &'a Machine,
    summary: &'a TreeSummary,
    trfs: Vec<LoopTransform>,
    /// Max perennial register pressure observed per loop, for phi spills.
    phi_pressure: Vec<f64>,
    unrolls: Unrolls,
    l2maxvf: u32,
}

impl SearchCtx<'_> {
    /// The stream's first entry is a virtual trip-1 loop for the code
    /// outside all loops; it gets no unroll slot, so mask bit `l` refers to
    /// real loop `l` throughout.
    fn optimize_root(&mut self) -> f64 {
        let info = self.summary.loops[0];
        let mut cur = 0.0;
        let mut li = 1usize;
        let mut bi = 0usize;
        let mut live_counts: Vec<f64> = Vec::new();
        let mut reb = ReductionExpansionBounds::new(1.0);
        let register_count = f64::from(self.machine.num_vector_regs);
        for i in 0..=info.num_sub_loops {
            let bb = &self.summary.blocks[bi];
            bi += 1;
            let (c, _) = bb.cost(
                &self.unrolls,
                register_count,
                i == 0,
                &mut reb,
                self.machine.core.comp,
                &mut live_counts,
            );
            cur += c.reduce(self.machine.core);
            if i == info.num_sub_loops {
                break;
            }
            let (nli, nbi, sub_cost) = self.optimize_loop(li, bi, f64::INFINITY);
            li = nli;
            bi = nbi;
            cur += sub_cost;
        }
        cur
    }
    /// Optimize the loop at `loop_idx` whose first block is `block_idx`.
    /// Returns the stream cursors past this subtree and its best cost.
    fn optimize_loop(
        &mut self,
        loop_idx: usize,
        block_idx: usize,
        best_external: f64,
    ) -> (usize, usize, f64) {
        let info = self.summary.loops[loop_idx];
        let umax = if info.reorderable { 16 } else { 1 };
        let l2vmax = if info.reorderable && self.unrolls.vf.mask == 0 {
            self.l2maxvf
        } else {
            0
        };
        let mut best_internal = f64::INFINITY;
        let mut best_trfs: Option<Vec<LoopTransform>> = None;
        let mut best_phi: Vec<f64> = Vec::new();
        let mut end_cursors = (loop_idx + 1, block_idx + 1);
        for u in 1..=umax {
            self.unrolls
                .push(u, info.trip_count as f64, info.known_trip);
            let mut l2v = l2vmax;
            loop {
                self.unrolls.set_vf(l2v);
                let (li, bi, cur) =
                    self.evaluate(loop_idx, block_idx, &info, best_internal.min(best_external));
                end_cursors = (li, bi);
                if cur < best_internal {
                    let mut total = cur;
                    if self.unrolls.depth() == 1 {
                        // Outermost: assign cache factors for the nest chain.
                        let chain = self.nest_chain(loop_idx, u, l2v);
                        if !chain.is_empty() {
                            let co = CacheOptimizer {
                                caches: &self.machine.caches,
                                cacheline_bits: self.machine.cacheline_bits,
                            };
                            let (ccost, mults) =
                                co.optimize(&chain.iter().map(|c| c.1).collect::<Vec<_>>(),
                                            &self.summary.leaves);
                            total += ccost;
                            if total < best_internal {
                                for ((lidx, _), m) in chain.iter().zip(mults) {
                                    self.trfs[*lidx].cache_unroll = m;
                                }
                            }
                        }
                    }
                    if total < best_internal {
                        best_internal = total;
                        self.trfs[loop_idx].register_unroll = u;
                        self.trfs[loop_idx].l2_vector_width = l2v;
                        best_trfs = Some(self.trfs[loop_idx..end_cursors.0].to_vec());
                        best_phi = self.phi_pressure[loop_idx..end_cursors.0].to_vec();
                    }
                }
                if l2v == 0 {
                    break;
                }
                l2v -= 1;
            }
            self.unrolls.set_vf(0);
            self.unrolls.pop();
        }
        if let Some(bt) = best_trfs {
            self.trfs[loop_idx..loop_idx + bt.len()].copy_from_slice(&bt);
            self.phi_pressure[loop_idx..loop_idx + best_phi.len()].copy_from_slice(&best_phi);
        }
        (end_cursors.0, end_cursors.1, best_internal)
    }

    /// One (u, l2v) trial: cost this loop's blocks and recurse into its
    /// sub-loops, stopping early when the running total cannot win.
    fn evaluate(
        &mut self,
        loop_idx: usize,
        block_idx: usize,
        info: &super::summary::LoopSummary,
        best: f64,
    ) -> (usize, usize, f64) {
        let mut cur = 0.0;
        let mut li = loop_idx + 1;
        let mut bi = block_idx;
        let mut live_counts: Vec<f64> = Vec::new();
        self.phi_pressure[loop_idx] = 0.0;
        let mut reb = ReductionExpansionBounds::new(self.unrolls.current_unroll());
        let register_count = f64::from(self.machine.num_vector_regs);
        for i in 0..=info.num_sub_loops {
            let bb = &self.summary.blocks[bi];
            bi += 1;
            let (mut c, phi) = bb.cost(
                &self.unrolls,
                register_count,
                i == 0,
                &mut reb,
                self.machine.core.comp,
                &mut live_counts,
            );
            self.phi_pressure[loop_idx] = self.phi_pressure[loop_idx].max(phi);
            if i == info.num_sub_loops {
                if info.num_reductions > 0 {
                    let (rex, uf) = reb.choose(self.unrolls.current_unroll());
                    debug_assert!(super::regs::divides(rex, self.unrolls.current_unroll()));
                    c.latency *= uf;
                    if rex > 1.0 {
                        // Replicated accumulators must be combined at the end.
                        let cur_bit = 1u32 << (self.unrolls.depth() - 1);
                        let mut combine = 0.0;
                        for rc in &bb.reduction_comp {
                            combine += rc.cost
                                * self
                                    .unrolls
                                    .dependent_unroll_product(u32::from(rc.mask) & !cur_bit);
                        }
                        c.add_compute(combine * (rex - 1.0));
                    }
                }
                cur += c.reduce(self.machine.core);
                break;
            }
            cur += c.reduce(self.machine.core);
            let (nli, nbi, sub_cost) = self.optimize_loop(li, bi, best - cur);
            li = nli;
            bi = nbi;
            cur += sub_cost;
            if cur > best {
                // Still need the cursors; skip the remaining work cheaply by
                // walking the stream without evaluating further subloops.
                let (sli, sbi) = self.skip_rest(li, bi, info.num_sub_loops - (i + 1));
                return (sli, sbi, cur);
            }
        }
        (li, bi, cur)
    }

    /// Advance cursors past the pending exit block and `remaining` sibling
    /// sub-loops with their exits.
    fn skip_rest(&self, mut li: usize, mut bi: usize, remaining: usize) -> (usize, usize) {
        bi += 1; // the exit block of the sub-loop we stopped after
        for _ in 0..remaining {
            let (nli, nbi) = self.skip_loop(li, bi);
            li = nli;
            bi = nbi + 1; // the sibling's exit block
        }
        (li, bi)
    }
    fn skip_loop(&self, loop_idx: usize, mut bi: usize) -> (usize, usize) {
        let info = self.summary.loops[loop_idx];
        let mut li = loop_idx + 1;
        bi += 1; // header
        for _ in 0..info.num_sub_loops {
            let (nli, nbi) = self.skip_loop(li, bi);
            li = nli;
            bi = nbi + 1; // exit
        }
        (li, bi)
    }

    /// The straight-line chain of reorderable loops under `loop_idx`, with
    /// the loop-spec view the cache optimizer wants. Trees that fan out are
    /// left unblocked.
    fn nest_chain(&self, root: usize, u_root: i32, l2v_root: u32) -> Vec<(usize, LoopSpec)> {
        let mut chain = Vec::new();
        let mut idx = root;
        let mut depth = 0usize;
        loop {
            let info = self.summary.loops[idx];
            if info.num_sub_loops > 1 {
                return Vec::new();
            }
            if info.reorderable {
                let (u, l2v) = if idx == root {
                    (u_root, l2v_root)
                } else {
                    (
                        self.trfs[idx].register_unroll,
                        self.trfs[idx].l2_vector_width,
                    )
                };
                let reg_factor = i64::from(u) << l2v;
                chain.push((
                    idx,
                    LoopSpec {
                        axis: depth,
                        trip: info.trip_count as f64,
                        reg_factor,
                        phi_cost: self.phi_pressure[idx] * self.machine.load_stow_cycles(),
                    },
                ));
            }
            if info.num_sub_loops == 0 {
                break;
            }
            idx += 1;
            depth += 1;
        }
        chain
    }
}
