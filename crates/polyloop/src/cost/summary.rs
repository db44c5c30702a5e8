//! Pre-assembly of the cost model's inputs from a materialized loop tree.
//!
//! The search consumes two parallel streams: a pre-order `LoopSummary` per
//! tree node (the root is a virtual trip-1 loop), and one `BBCost` per
//! instruction block, in execution order `header, sub0.., exit0, sub1..`.

use nalgebra::DMatrix;

use crate::ir::{Inst, Op};
use crate::schedule::LoopBlock;
use crate::tree::LoopTreeSchedule;

use super::machine::Machine;
use super::mem::{MemCostSummary, MemCosts, OrthogonalAxes};
use super::model::Cost;
use super::regs::{IntraBlockRegisterUse, LiveInfo, MaskCoef, ReductionExpansionBounds};
use super::unrolls::Unrolls;

/// Per-loop facts the search needs, in pre-order.
#[derive(Clone, Copy, Debug)]
pub struct LoopSummary {
    pub reorderable: bool,
    pub known_trip: bool,
    pub trip_count: i64,
    pub num_sub_loops: usize,
    pub num_reductions: usize,
    /// Reorderable loops strictly below this one.
    pub sub_tree_size: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct CompCost {
    pub cost: f64,
    pub mask: u16,
}

/// Everything needed to cost one instruction block under a given unroll
/// state.
#[derive(Clone, Debug, Default)]
pub struct BBCost {
    pub latency: f64,
    pub orth: Vec<MemCostSummary>,
    pub conv: Vec<(MemCostSummary, DMatrix<i64>)>,
    pub comp: Vec<CompCost>,
    /// Extra combine work if the innermost reduction is register-expanded.
    pub reduction_comp: Vec<CompCost>,
    pub intra: Vec<IntraBlockRegisterUse>,
    pub live: Vec<LiveInfo>,
}

impl BBCost {
    /// Cost of one micro-kernel pass over this block, scaled to its full
    /// execution count, with register-spill penalties folded in. Returns the
    /// cost and the perennial (phi) register pressure.
    pub fn cost(
        &self,
        unrolls: &Unrolls,
        register_count: f64,
        can_hoist: bool,
        reb: &mut ReductionExpansionBounds,
        comp_throughput: f64,
        live_counts: &mut Vec<f64>,
    ) -> (Cost, f64) {
        let mut c = super::mem::memcosts(unrolls, &self.orth);
        c += super::mem::memcosts_conv(unrolls, &self.conv);
        let mut comp = 0.0;
        for cc in &self.comp {
            comp += cc.cost * unrolls.dependent_unroll_product(u32::from(cc.mask));
        }
        c.add_compute(comp);
        c.set_latency(self.latency);
        reb.update_lower_bound(comp_throughput, c.latency, c.comp);
        let num_iters = unrolls.count_iterations();
        let mut reg_use = 0.0;
        let mut max_peren = 0.0;
        for rubu in &self.intra {
            let peren = rubu.perennial_use(unrolls);
            let ephem = rubu.ephemeral_use(unrolls);
            let ru = reb.update_upper_bound(ephem, peren, register_count);
            max_peren = f64::max(max_peren, peren);
            reg_use = f64::max(reg_use, ru);
        }
        let mut register_deficit = reg_use - register_count;
        if register_deficit > 0.0 {
            c.add_load_stow(unrolls.full_unroll_product() * register_deficit);
        }
        register_deficit = register_deficit.min(0.0);
        c = c * num_iters;
        if !self.live.is_empty() {
            let hoisted_trip = if can_hoist {
                unrolls.count_hoisted_iterations()
            } else {
                num_iters
            };
            let base = live_counts.len();
            for li in &self.live {
                let mut lc = 0.0;
                for &p in &li.prev_idxs {
                    if p != 0 {
                        lc += live_counts[base - usize::from(p)];
                    }
                }
                if li.used_here {
                    // all spilled entries must be reloaded
                    let reg_per = unrolls.dependent_unroll_product(u32::from(li.dep_mask));
                    let to_load =
                        (f64::from(li.total_count) - f64::from(li.additional)) * reg_per - lc;
                    debug_assert!(to_load >= -1e-9);
                    c.add_load(hoisted_trip * to_load.max(0.0));
                    lc = f64::from(li.total_count) * reg_per;
                } else {
                    register_deficit += lc;
                    if register_deficit > 0.0 {
                        c.add_stow(hoisted_trip * register_deficit);
                        lc -= register_deficit;
                        register_deficit = 0.0;
                    }
                    lc += f64::from(li.additional);
                }
                live_counts.push(lc);
            }
        }
        (c, max_peren)
    }
}

/// Assembled cost-model inputs: parallel loop and block streams, plus the
/// per-leaf array summaries the cache optimizer uses.
pub struct TreeSummary {
    pub loops: Vec<LoopSummary>,
    pub blocks: Vec<BBCost>,
    pub leaves: Vec<super::cache::DepSummary>,
}

/// Build the streams from a solved block and its tree.
pub fn summarize(machine: &Machine, lb: &LoopBlock, lts: &LoopTreeSchedule) -> TreeSummary {
    let mut s = TreeSummary {
        loops: Vec::new(),
        blocks: Vec::new(),
        leaves: Vec::new(),
    };
    let mut live_slots: std::collections::HashMap<usize, usize> = std::collections::HashMap::new();
    let mut live_emitted = 0usize;
    walk(
        machine,
        lb,
        lts,
        0,
        &mut s,
        &mut live_slots,
        &mut live_emitted,
    );
    s
}

fn walk(
    machine: &Machine,
    lb: &LoopBlock,
    lts: &LoopTreeSchedule,
    tree: usize,
    out: &mut TreeSummary,
    live_slots: &mut std::collections::HashMap<usize, usize>,
    live_emitted: &mut usize,
) {
    let t = &lts.trees[tree];
    let (known, trip) = if tree == 0 {
        (true, 1)
    } else {
        let tc = t
            .nest
            .as_ref()
            .map(|n| n.trip_count(t.depth - 1))
            .unwrap_or(crate::poly::TripCount {
                known: false,
                count: 1,
            });
        (tc.known, tc.count)
    };
    let loop_idx = out.loops.len();
    out.loops.push(LoopSummary {
        reorderable: tree != 0 && loop_reorderable(lb, lts, tree),
        known_trip: known,
        trip_count: trip,
        num_sub_loops: t.sub.len(),
        num_reductions: 0,
        sub_tree_size: 0,
    });
    out.blocks.push(block_cost(
        machine,
        lb,
        lts,
        tree,
        &t.header,
        live_slots,
        live_emitted,
    ));
    let mut reductions = 0usize;
    if t.sub.is_empty() {
        reductions = leaf_reductions(machine, lb, lts, tree, out);
    }
    for (i, sub) in t.sub.iter().enumerate() {
        walk(machine, lb, lts, sub.tree, out, live_slots, live_emitted);
        out.blocks.push(block_cost(
            machine,
            lb,
            lts,
            tree,
            &t.sub[i].exit,
            live_slots,
            live_emitted,
        ));
    }
    let subtree: usize = out.loops[loop_idx + 1..]
        .iter()
        .map(|l| usize::from(l.reorderable))
        .sum();
    out.loops[loop_idx].sub_tree_size = subtree;
    out.loops[loop_idx].num_reductions = reductions;
}

/// A loop is reorderable unless an LP-satisfied dependence other than a
/// reduction reload is carried at its level.
fn loop_reorderable(lb: &LoopBlock, lts: &LoopTreeSchedule, tree: usize) -> bool {
    let axis = lts.trees[tree].depth - 1;
    for e in &lb.edges {
        if usize::from(e.sat_level()) != axis || e.is_cond_indep() {
            continue;
        }
        if !is_reduction_edge(lb, e) {
            return false;
        }
    }
    true
}

fn is_reduction_edge(lb: &LoopBlock, e: &crate::deps::Dependence) -> bool {
    let (i, o) = (&lb.memory[e.input], &lb.memory[e.output]);
    lb.mem_node[e.input] == lb.mem_node[e.output] && i.array == o.array && i.index == o.index
}

fn access_masks(lts: &LoopTreeSchedule, addr: usize) -> OrthogonalAxes {
    let a = &lts.addrs[addr];
    let mut dep = 0u32;
    let mut contig = 0u32;
    let d = a.index.nrows();
    for l in 0..a.index.ncols() {
        let nonzero = (0..d).any(|r| a.index[(r, l)] != 0);
        if nonzero {
            dep |= 1 << l;
        }
        // Contiguous: unit step in the fastest-varying (last) dimension and
        // no effect on the others.
        if d > 0
            && a.index[(d - 1, l)] == a.denom
            && (0..d - 1).all(|r| a.index[(r, l)] == 0)
        {
            contig |= 1 << l;
        }
    }
    OrthogonalAxes { contig, dep }
}

fn mem_costs(_machine: &Machine, is_store: bool) -> [MemCosts; 2] {
    let load = MemCosts {
        scalar: 1.0,
        contig: 1.0,
        noncon: 8.0,
    };
    let stow = MemCosts {
        scalar: 1.0,
        contig: 1.0,
        noncon: 12.0,
    };
    if is_store {
        [MemCosts::default(), stow]
    } else {
        [load, MemCosts::default()]
    }
}

fn block_cost(
    machine: &Machine,
    lb: &LoopBlock,
    lts: &LoopTreeSchedule,
    tree: usize,
    addrs: &[usize],
    live_slots: &mut std::collections::HashMap<usize, usize>,
    live_emitted: &mut usize,
) -> BBCost {
    let mut bb = BBCost::default();
    let mut ephemeral: Vec<MaskCoef> = Vec::new();
    let mut perennial: Vec<MaskCoef> = Vec::new();
    let depth = lts.trees[tree].depth;
    let mut seen_nodes: Vec<usize> = Vec::new();
    for &a in addrs {
        let addr = &lts.addrs[a];
        let orth = access_masks(lts, a);
        let costs = mem_costs(machine, addr.is_store);
        let mcs = MemCostSummary { costs, orth };
        let conv = (0..addr.index.ncols()).any(|l| {
            (0..addr.index.nrows())
                .filter(|&r| addr.index[(r, l)] != 0)
                .count()
                > 1
        });
        if conv {
            bb.conv.push((mcs, addr.index.clone()));
        } else {
            bb.orth.push(mcs);
        }
        let mask = orth.dep as u16;
        if !addr.is_store && mask != 0 {
            push_mask(&mut ephemeral, mask, 1);
        }
        // Register chains of stores placed here contribute compute and, for
        // reductions, a perennial accumulator.
        if addr.is_store && !seen_nodes.contains(&addr.node) {
            seen_nodes.push(addr.node);
            let node = &lb.nodes[addr.node];
            let kernel_mask = node
                .memory
                .iter()
                .filter_map(|m| lts.mem_addr[m])
                .fold(0u32, |acc, aa| acc | access_masks(lts, aa).dep)
                as u16;
            for m in node.memory.iter() {
                let inst = lb.memory[m].inst;
                collect_computes(lb, inst, kernel_mask, machine, &mut bb.comp);
            }
            let reduction = depth > 0 && (orth.dep >> (depth - 1)) & 1 == 0;
            if reduction {
                push_mask(&mut perennial, mask, 1);
                if let Some(op) = node_combine_op(lb, addr.node) {
                    bb.latency = bb.latency.max(machine.op_latency(op));
                    bb.reduction_comp.push(CompCost {
                        cost: machine.op_cost(op, 0),
                        mask,
                    });
                }
            } else if mask != 0 {
                push_mask(&mut ephemeral, mask, 1);
            }
        }
        // Values loaded here but consumed in a deeper block live across the
        // intervening sub-loops.
        if !addr.is_store {
            let consumer_deeper = lb
                .nodes
                .get(addr.node)
                .map(|n| {
                    n.memory.iter().any(|m| {
                        lb.memory[m].is_store
                            && lts.mem_addr[m]
                                .is_some_and(|sa| lts.trees[lts.addrs[sa].tree].depth > depth)
                    })
                })
                .unwrap_or(false);
            if consumer_deeper {
                bb.live.push(LiveInfo {
                    used_here: true,
                    dep_mask: orth.dep as u16,
                    additional: 1,
                    total_count: 1,
                    prev_idxs: [0, 0],
                });
                live_slots.insert(a, *live_emitted);
                *live_emitted += 1;
            }
        }
    }
    if !ephemeral.is_empty() || !perennial.is_empty() {
        let depth1 = depth.max(1);
        bb.intra
            .push(IntraBlockRegisterUse::new(&ephemeral, &perennial, depth1));
    }
    bb
}

fn push_mask(v: &mut Vec<MaskCoef>, mask: u16, coef: u16) {
    if let Some(mc) = v.iter_mut().find(|mc| mc.mask == mask) {
        mc.coef += coef;
    } else {
        v.push(MaskCoef { mask, coef });
    }
}

fn collect_computes(
    lb: &LoopBlock,
    inst: usize,
    mask: u16,
    machine: &Machine,
    out: &mut Vec<CompCost>,
) {
    match &lb.insts[inst] {
        Inst::Store { value, .. } => collect_computes(lb, *value, mask, machine, out),
        Inst::Compute { op, .. } => out.push(CompCost {
            cost: machine.op_cost(*op, 0),
            mask,
        }),
        _ => {}
    }
}

fn node_combine_op(lb: &LoopBlock, node: usize) -> Option<Op> {
    for m in lb.nodes[node].memory.iter() {
        let mut inst = lb.memory[m].inst;
        if let Inst::Store { value, .. } = lb.insts[inst] {
            inst = value;
        }
        if let Inst::Compute { op, .. } = lb.insts[inst] {
            return Some(op);
        }
    }
    None
}

/// Build the leaf's array summary for the cache optimizer and count its
/// reductions.
fn leaf_reductions(
    _machine: &Machine,
    lb: &LoopBlock,
    lts: &LoopTreeSchedule,
    tree: usize,
    out: &mut TreeSummary,
) -> usize {
    let depth = lts.trees[tree].depth;
    let mut reductions = 0usize;
    let mut dep_entries: Vec<super::cache::DepSummaryEntry> = Vec::new();
    let mut indep_entries: Vec<super::cache::DepSummaryEntry> = Vec::new();
    // Collect every address of the whole nest path (hoisted ones included)
    // by walking up the parents.
    let mut chain = Vec::new();
    let mut cur = Some(tree);
    while let Some(t) = cur {
        chain.push(t);
        cur = lts.trees[t].parent;
    }
    // One entry per (array, pattern); a store doubles the cost coefficient
    // (write-back) instead of adding a second entry.
    let mut patterns: Vec<(crate::ir::ArrayId, u32, u64, bool)> = Vec::new();
    for t in chain {
        for &a in lts.trees[t]
            .header
            .iter()
            .chain(lts.trees[t].sub.iter().flat_map(|s| s.exit.iter()))
        {
            let addr = &lts.addrs[a];
            let mem = &lb.memory[addr.mem];
            let orth = access_masks(lts, a);
            let bits = u64::from(mem.elem_bytes) * 8;
            if let Some(p) = patterns
                .iter_mut()
                .find(|p| p.0 == mem.array && p.1 == orth.dep)
            {
                p.3 |= addr.is_store;
            } else {
                patterns.push((mem.array, orth.dep, bits, addr.is_store));
            }
        }
    }
    for (_, dep, bits, stored) in patterns {
        let entry = super::cache::DepSummaryEntry {
            dep_mask: dep as u16,
            fit_coef: bits as u16,
            cost_coef: (bits * if stored { 2 } else { 1 }) as u16,
        };
        if depth > 0 && (dep >> (depth - 1)) & 1 == 1 {
            dep_entries.push(entry);
        } else {
            indep_entries.push(entry);
            if stored && depth > 0 {
                reductions += 1;
            }
        }
    }
    out.leaves.push(super::cache::DepSummary {
        dependent: dep_entries,
        independent: indep_entries,
    });
    reductions
}
