//! The linear-program loop scheduler.
//!
//! A `LoopBlock` is a set of loops executed together, with no divergent
//! control flow. It owns the accesses, the dependence edges between them,
//! and one `ScheduledNode` per store cluster (a store plus the loads and
//! reloads feeding it through registers). `optimize` fixes every node's
//! affine schedule by solving one lexicographic LP per depth, falling back
//! to SCC decomposition with greedy re-fusion when a level is infeasible.

mod graph;
mod lp;

pub use graph::GraphView;

use tracing::debug;

use crate::containers::BitSet;
use crate::deps::Dependence;
use crate::ir::{AffineSchedule, Inst, MemAccess};
use crate::math::rank;

/// A set of memory accesses scheduled together, connected through registers.
/// `A[i] = B[i] + C[i]` is one node: loads feed a compute feeding the store.
#[derive(Clone, Debug)]
pub struct ScheduledNode {
    pub memory: BitSet,
    pub in_neighbors: BitSet,
    pub out_neighbors: BitSet,
    pub schedule: AffineSchedule,
    pub num_loops: usize,
    /// Outer rows of phi fixed by orthogonalization.
    pub rank: usize,
    // LP variable-packing scratch.
    pub(crate) phi_offset: usize,
    pub(crate) omega_offset: usize,
}

impl ScheduledNode {
    fn new() -> Self {
        Self {
            memory: BitSet::new(),
            in_neighbors: BitSet::new(),
            out_neighbors: BitSet::new(),
            schedule: AffineSchedule::identity(0),
            num_loops: 0,
            rank: 0,
            phi_offset: 0,
            omega_offset: 0,
        }
    }
    #[inline]
    pub fn phi_is_scheduled(&self, d: usize) -> bool {
        d < self.rank
    }
    fn add_memory(&mut self, mem_id: usize, num_loops: usize) {
        self.memory.insert(mem_id);
        self.num_loops = self.num_loops.max(num_loops);
    }
    fn init_schedule(&mut self) {
        self.schedule = AffineSchedule::identity(self.num_loops);
    }
    /// Pre-schedule the outer `r` rows from a full-row-rank index matrix
    /// (reductions get their natural axes outermost).
    fn schedule_phi(&mut self, index: &nalgebra::DMatrix<i64>, r: usize) {
        for i in 0..r {
            for j in 0..self.num_loops {
                self.schedule.phi[(i, j)] = if j < index.ncols() { index[(i, j)] } else { 0 };
            }
        }
        self.rank = r;
    }
    fn unschedule_phi(&mut self) {
        self.rank = 0;
    }
}

/// Per-node bitmask of depths where some incident dependence was satisfied
/// by an LP offset (those loops cannot be reordered or parallelized).
#[derive(Clone, Copy, Debug, Default)]
pub struct CarriedDepFlag(pub u32);

impl CarriedDepFlag {
    #[inline]
    pub fn carries(self, d: usize) -> bool {
        (self.0 >> d) & 1 == 1
    }
    #[inline]
    pub fn set(&mut self, d: usize) {
        self.0 |= 1 << d;
    }
    /// Clear all depths `>= d`.
    #[inline]
    pub fn reset_deep(&mut self, d: usize) {
        self.0 &= (1u32 << d) - 1;
    }
}

pub struct LoopBlock {
    pub memory: Vec<MemAccess>,
    pub insts: Vec<Inst>,
    pub nodes: Vec<ScheduledNode>,
    pub edges: Vec<Dependence>,
    pub carried: Vec<CarriedDepFlag>,
    /// Per access: head of the chain of edges whose output / input is it.
    in_head: Vec<Option<usize>>,
    out_head: Vec<Option<usize>>,
    pub(crate) mem_node: Vec<Option<usize>>,
    // LP packing counters for the current (graph, depth).
    pub(crate) num_phi_coefs: usize,
    pub(crate) num_omega_coefs: usize,
    pub(crate) num_slack: usize,
    pub(crate) num_lambda: usize,
    pub(crate) num_bounding: usize,
    pub(crate) num_constraints: usize,
    pub(crate) num_active_edges: usize,
}

impl LoopBlock {
    pub fn new(memory: Vec<MemAccess>, insts: Vec<Inst>) -> Self {
        let n = memory.len();
        LoopBlock {
            memory,
            insts,
            nodes: Vec::new(),
            edges: Vec::new(),
            carried: Vec::new(),
            in_head: vec![None; n],
            out_head: vec![None; n],
            mem_node: vec![None; n],
            num_phi_coefs: 0,
            num_omega_coefs: 0,
            num_slack: 0,
            num_lambda: 0,
            num_bounding: 0,
            num_constraints: 0,
            num_active_edges: 0,
        }
    }

    #[inline]
    pub fn max_depth(&self) -> usize {
        self.memory.iter().map(|m| m.num_loops()).max().unwrap_or(0)
    }

    // --- edge chains ---

    fn push_edge(&mut self, mut dep: Dependence) -> usize {
        let id = self.edges.len();
        dep.next_in = self.in_head[dep.output];
        self.in_head[dep.output] = Some(id);
        dep.next_out = self.out_head[dep.input];
        self.out_head[dep.input] = Some(id);
        self.edges.push(dep);
        id
    }
    pub fn in_edge_ids(&self, mem: usize) -> EdgeChain<'_> {
        EdgeChain {
            lb: self,
            cur: self.in_head[mem],
            incoming: true,
        }
    }
    pub fn out_edge_ids(&self, mem: usize) -> EdgeChain<'_> {
        EdgeChain {
            lb: self,
            cur: self.out_head[mem],
            incoming: false,
        }
    }

    fn push_access(&mut self, mem: MemAccess) -> usize {
        let id = self.memory.len();
        self.memory.push(mem);
        self.in_head.push(None);
        self.out_head.push(None);
        self.mem_node.push(None);
        id
    }

    // --- step 1: dependence edges ---

    fn fill_edges(&mut self) {
        for i in 1..self.memory.len() {
            for j in 0..i {
                let (x, y) = (&self.memory[i], &self.memory[j]);
                if x.array != y.array || (x.is_load() && y.is_load()) {
                    continue;
                }
                let deps = Dependence::check(i, x, j, y);
                for d in deps {
                    self.push_edge(d);
                }
            }
        }
    }

    // --- step 2: cluster accesses into nodes along register def-use ---

    fn connect_graph(&mut self) {
        let user_to_mem: std::collections::HashMap<usize, usize> = self
            .memory
            .iter()
            .enumerate()
            .map(|(m, acc)| (acc.inst, m))
            .collect();
        let store_ids: Vec<usize> = (0..self.memory.len())
            .filter(|&m| self.memory[m].is_store)
            .collect();
        for s in store_ids {
            if self.mem_node[s].is_some() {
                continue; // a reload access inserted for an earlier node
            }
            let node_id = self.nodes.len();
            let mut node = ScheduledNode::new();
            node.add_memory(s, self.memory[s].num_loops());
            self.mem_node[s] = Some(node_id);
            self.nodes.push(node);
            let mut visited = std::collections::HashSet::new();
            let root = self.memory[s].inst;
            self.search_operands(&user_to_mem, &mut visited, node_id, root);
        }
        for node in &mut self.nodes {
            node.init_schedule();
        }
        // Node-level graph: one arc per dependence edge.
        for e in 0..self.edges.len() {
            let (i, o) = (self.edges[e].input, self.edges[e].output);
            if let (Some(a), Some(b)) = (self.mem_node[i], self.mem_node[o]) {
                self.nodes[a].out_neighbors.insert(b);
                self.nodes[b].in_neighbors.insert(a);
            }
        }
        self.carried = vec![CarriedDepFlag::default(); self.nodes.len()];
    }

    /// Walk the operand tree of `inst`, attaching in-block loads to the node
    /// and turning stored intermediates into reloads.
    fn search_operands(
        &mut self,
        user_to_mem: &std::collections::HashMap<usize, usize>,
        visited: &mut std::collections::HashSet<usize>,
        node_id: usize,
        inst: usize,
    ) {
        if !visited.insert(inst) {
            return;
        }
        let operands: Vec<usize> = match &self.insts[inst] {
            Inst::Load { .. } => return,
            Inst::Store { value, .. } => vec![*value],
            Inst::Compute { operands, .. } => operands.clone(),
            Inst::Phi { init, recur } => vec![*init, *recur],
        };
        for op in operands {
            self.check_user(user_to_mem, visited, node_id, op);
        }
    }

    fn check_user(
        &mut self,
        user_to_mem: &std::collections::HashMap<usize, usize>,
        visited: &mut std::collections::HashSet<usize>,
        node_id: usize,
        inst: usize,
    ) {
        if visited.contains(&inst) {
            return;
        }
        if let Inst::Load { .. } = self.insts[inst] {
            visited.insert(inst);
            let Some(&mem_id) = user_to_mem.get(&inst) else {
                return;
            };
            let mem_id = if self.mem_node[mem_id].is_some() {
                self.duplicate_load(mem_id)
            } else {
                mem_id
            };
            let n = self.memory[mem_id].num_loops();
            self.nodes[node_id].add_memory(mem_id, n);
            self.mem_node[mem_id] = Some(node_id);
            return;
        }
        if !self.reload_if_stored(visited, node_id, inst) {
            self.search_operands(user_to_mem, visited, node_id, inst);
        }
    }

    /// If `inst`'s value is written by another store in the block, the value
    /// is reloaded from memory instead of chaining the whole computation
    /// into this node.
    fn reload_if_stored(
        &mut self,
        visited: &mut std::collections::HashSet<usize>,
        node_id: usize,
        inst: usize,
    ) -> bool {
        let store_mem = self.memory.iter().position(|m| {
            m.is_store
                && matches!(self.insts[m.inst], Inst::Store { value, .. } if value == inst)
        });
        let Some(store_id) = store_mem else {
            return false;
        };
        if visited.contains(&self.memory[store_id].inst) {
            return false;
        }
        visited.insert(self.memory[store_id].inst);
        // Create the reload access and its load instruction.
        let load_inst = self.insts.len();
        let store_access = self.memory[store_id].clone();
        self.insts.push(Inst::Load {
            mem: self.memory.len(),
        });
        let load = store_access.reload(load_inst);
        let load_id = self.push_access(load);
        // Every store->store edge out of the source also orders the reload.
        let succ: Vec<usize> = self
            .out_edge_ids(store_id)
            .filter(|&e| self.memory[self.edges[e].output].is_store)
            .collect();
        let depth = self.memory[load_id].num_loops();
        for e in succ {
            let copy = self.edges[e].replace_input(load_id, depth);
            self.push_edge(copy);
        }
        let reload_edges =
            Dependence::reload(store_id, &self.memory[store_id], load_id, &self.memory[load_id]);
        for d in reload_edges {
            self.push_edge(d);
        }
        let n = self.memory[load_id].num_loops();
        self.nodes[node_id].add_memory(load_id, n);
        self.mem_node[load_id] = Some(node_id);
        true
    }

    /// Loads consumed by several stores are duplicated so each node owns a
    /// private copy (more reordering freedom, fewer real loads after fusion).
    fn duplicate_load(&mut self, load_id: usize) -> usize {
        let load_inst = self.insts.len();
        let copy = {
            let m = &self.memory[load_id];
            debug_assert!(m.is_load());
            let mut c = m.clone();
            c.inst = load_inst;
            c
        };
        self.insts.push(Inst::Load {
            mem: self.memory.len(),
        });
        let new_id = self.push_access(copy);
        let depth = self.memory[new_id].num_loops();
        let ins: Vec<usize> = self.in_edge_ids(load_id).collect();
        for e in ins {
            let c = self.edges[e].replace_output(new_id, depth);
            self.push_edge(c);
        }
        let outs: Vec<usize> = self.out_edge_ids(load_id).collect();
        for e in outs {
            let c = self.edges[e].replace_input(new_id, depth);
            self.push_edge(c);
        }
        new_id
    }

    // --- step 4: orthogonalization + recursion ---

    /// Entry point: build edges and nodes, then search for schedules.
    /// Returns the set of dependence edges satisfied by LP offsets, or
    /// `None` when no legal schedule was found (caller leaves the block
    /// unoptimized).
    pub fn optimize(&mut self) -> Option<BitSet> {
        self.fill_edges();
        self.connect_graph();
        #[cfg(debug_assertions)]
        self.validate_edges();
        self.opt_orth()
    }

    fn opt_orth(&mut self) -> Option<BitSet> {
        let g = self.full_graph();
        let max_depth = self.max_depth();
        let mut try_orth = false;
        for e in 0..self.edges.len() {
            let edge = &self.edges[e];
            let (inp, outp) = (&self.memory[edge.input], &self.memory[edge.output]);
            if inp.is_load() == outp.is_load() {
                continue;
            }
            let (Some(a), Some(b)) = (self.mem_node[edge.input], self.mem_node[edge.output]) else {
                continue;
            };
            if a != b || self.nodes[a].phi_is_scheduled(0) {
                continue;
            }
            if inp.index != outp.index {
                continue;
            }
            let r = rank(&inp.index);
            if r == edge.in_depth || r != inp.index.nrows() {
                continue;
            }
            let index = inp.index.clone();
            self.nodes[a].schedule_phi(&index, r);
            try_orth = true;
        }
        if try_orth {
            debug!("attempting orthogonalized schedule");
            if let Some(sat) = self.optimize_graph(g.clone(), 0, max_depth) {
                return Some(sat);
            }
            for n in &mut self.nodes {
                n.unschedule_phi();
            }
            self.reset_solver_state();
        }
        self.optimize_graph(g, 0, max_depth)
    }

    /// Clear satisfaction levels and carried-dep flags before a fresh
    /// attempt from depth 0.
    fn reset_solver_state(&mut self) {
        for e in &mut self.edges {
            e.reset_sat_levels();
        }
        for c in &mut self.carried {
            *c = CarriedDepFlag::default();
        }
    }

    #[cfg(debug_assertions)]
    fn validate_edges(&self) {
        for e in &self.edges {
            debug_assert_eq!(e.in_depth + e.out_depth, e.num_phi_coefficients());
        }
    }

    /// Optimize the view at depth `d`; recurse inward on success, otherwise
    /// split by strongly connected components.
    fn optimize_graph(&mut self, mut g: GraphView, d: usize, max_depth: usize) -> Option<BitSet> {
        if d >= max_depth {
            return Some(BitSet::new());
        }
        self.count_aux_params(&g, d, false);
        self.set_schedule_memory_offsets(&g, d);
        let active_backup = g.active_edges.clone();
        if let Some(mut dep_sat) = self.solve_graph(&mut g, d, false) {
            if d + 1 == max_depth {
                return Some(dep_sat);
            }
            if let Some(dep_sat_nest) = self.optimize_graph(g.clone(), d + 1, max_depth) {
                let both = !dep_sat.is_empty() && !dep_sat_nest.is_empty();
                dep_sat.union_with(&dep_sat_nest);
                if both {
                    return Some(self.optimize_sat_dep(g, d, max_depth, dep_sat, active_backup));
                }
                return Some(dep_sat);
            }
        }
        self.break_graph(g, d)
    }

    /// Retry the level demanding satisfaction (`delta >= 1`) of deps the
    /// plain pass deferred; keep it only if the whole nest still solves.
    fn optimize_sat_dep(
        &mut self,
        mut g: GraphView,
        d: usize,
        max_depth: usize,
        dep_sat_level: BitSet,
        active_backup: BitSet,
    ) -> BitSet {
        debug!(depth = d, "retrying with forced dependence satisfaction");
        g.active_edges = active_backup;
        let stashed_view = g.clone();
        let old_schedules: Vec<(usize, AffineSchedule)> = g
            .node_ids
            .iter()
            .map(|n| (n, self.nodes[n].schedule.clone()))
            .collect();
        let old_carried = self.carried.clone();
        for c in &mut self.carried {
            c.reset_deep(d);
        }
        self.count_aux_params(&g, d, true);
        self.set_schedule_memory_offsets(&g, d);
        if let Some(mut sat) = self.solve_graph(&mut g, d, true) {
            if let Some(nest) = self.optimize_graph(g.clone(), d + 1, max_depth) {
                sat.union_with(&nest);
                return sat;
            }
        }
        // Failed: restore every piece of state the attempt touched. The pop
        // must cover exactly the edges whose levels were stashed.
        for (n, s) in old_schedules {
            self.nodes[n].schedule = s;
        }
        self.carried = old_carried;
        for e in self.active_edge_ids(&stashed_view, d) {
            self.edges[e].pop_sat_level();
        }
        dep_sat_level
    }

    /// SCC fallback: split the nodes, solve each component at this depth,
    /// then greedily fuse consecutive components whose cross edges the
    /// solved schedules already satisfy.
    fn break_graph(&mut self, g: GraphView, d: usize) -> Option<BitSet> {
        let components = {
            let view = graph::NodeGraphView { lb: self, g: &g };
            crate::graph::strongly_connected_components(&view)
        };
        if components.len() <= 1 {
            return None;
        }
        debug!(depth = d, n = components.len(), "breaking graph into SCCs");
        let mut graphs: Vec<GraphView> = components.iter().map(|c| g.sub(c)).collect();
        let mut sat_deps = BitSet::new();
        for sg in &mut graphs {
            if d >= self.graph_max_depth(sg) {
                continue;
            }
            self.count_aux_params(sg, d, false);
            self.set_schedule_memory_offsets(sg, d);
            let mut sgc = sg.clone();
            let sat = self.solve_graph(&mut sgc, d, false)?;
            *sg = sgc;
            sat_deps.union_with(&sat);
        }
        // Greedy top-down fusion via the depth-d fusion coordinate.
        let mut unfused_offset = 0i64;
        let mut base: GraphView = graphs[0].clone();
        let mut base_graphs: Vec<GraphView> = Vec::new();
        for gi in graphs.into_iter().skip(1) {
            if self.can_fuse(&base, &gi, d) {
                base.union_with(&gi);
            } else {
                for n in base.node_ids.iter() {
                    self.nodes[n].schedule.fusion_omega[d] = unfused_offset;
                }
                unfused_offset += 1;
                base_graphs.push(base);
                base = gi;
            }
        }
        for n in base.node_ids.iter() {
            self.nodes[n].schedule.fusion_omega[d] = unfused_offset;
        }
        base_graphs.push(base);
        for bg in base_graphs {
            let md = self.graph_max_depth(&bg);
            let sat = self.optimize_graph(bg, d + 1, md)?;
            sat_deps.union_with(&sat);
        }
        Some(sat_deps)
    }

    /// Every edge crossing the two views must be deep enough and already
    /// satisfied by the solved schedules for the fusion to be legal.
    fn can_fuse(&self, g0: &GraphView, g1: &GraphView, d: usize) -> bool {
        for e in 0..self.edges.len() {
            if !self.connects(e, g0, g1) {
                continue;
            }
            let edge = &self.edges[e];
            if edge.in_depth <= d || edge.out_depth <= d {
                return false;
            }
            if !self.edge_satisfied_at(e, d) {
                return false;
            }
        }
        true
    }

    /// Test whether the solved schedules order this edge correctly at `d`.
    fn edge_satisfied_at(&self, e: usize, d: usize) -> bool {
        let edge = &self.edges[e];
        let (Some(ni), Some(no)) = (self.mem_node[edge.input], self.mem_node[edge.output]) else {
            return true;
        };
        let (si, so) = (&self.nodes[ni].schedule, &self.nodes[no].schedule);
        let (sx, sy) = if edge.forward { (si, so) } else { (so, si) };
        let (d0, d1) = (edge.poly.dim0(), edge.poly.dim1());
        let mut vals = vec![0i64; 2 + d0 + d1];
        vals[0] = sx.offset_omega[d];
        vals[1] = sy.offset_omega[d];
        for j in 0..d0 {
            vals[2 + j] = sx.phi[(d, j)];
        }
        for j in 0..d1 {
            vals[2 + d0 + j] = sy.phi[(d, j)];
        }
        edge.satisfaction
            .feasible_with(&vals, edge.poly.omega_off(), edge.satisfaction.num_cons())
    }
}

/// Iterator over an access's edge chain, in insertion order.
pub struct EdgeChain<'a> {
    lb: &'a LoopBlock,
    cur: Option<usize>,
    incoming: bool,
}

impl Iterator for EdgeChain<'_> {
    type Item = usize;
    fn next(&mut self) -> Option<usize> {
        let e = self.cur?;
        let edge = &self.lb.edges[e];
        self.cur = if self.incoming {
            edge.next_in
        } else {
            edge.next_out
        };
        Some(e)
    }
}

#[cfg(test)]
mod tests;
