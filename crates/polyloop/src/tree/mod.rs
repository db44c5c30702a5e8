//! Loop-tree materialization of solved schedules.
//!
//! Once every node's `(Phi, omega, fusionOmega)` is fixed, accesses are
//! rotated by the scaled inverse schedule and inserted into a tree of loops
//! keyed by fusion coordinates. Within each level, addresses are ordered by
//! the strongly-connected components of an address graph whose vertices are
//! the addresses at or below the level plus a (start, stop) boundary pair
//! per sub-loop; isolated addresses whose rotated index matrix ignores a
//! sub-loop are hoisted out of it.

use nalgebra::DMatrix;

use crate::containers::BitSet;
use crate::graph::{strongly_connected_components, IndexGraph};
use crate::ir::Address;
use crate::math::scaled_inv;
use crate::poly::AffineLoop;
use crate::schedule::LoopBlock;

/// One loop in the materialized tree. The root (depth 0) is the block
/// outside all loops; `sub[i]` pairs a child with the instruction block
/// executed after it exits.
#[derive(Clone, Debug, Default)]
pub struct TreeNode {
    pub parent: Option<usize>,
    pub depth: usize,
    /// Rotated loop nest of the node that created this level; trip count of
    /// this loop is `nest.trip_count(depth - 1)`.
    pub nest: Option<AffineLoop>,
    pub header: Vec<usize>,
    pub sub: Vec<SubLoop>,
}

#[derive(Clone, Debug, Default)]
pub struct SubLoop {
    pub tree: usize,
    pub exit: Vec<usize>,
}

/// Dependence arc between two addresses, with the loop level (if any) at
/// which the schedule satisfied it.
#[derive(Clone, Copy, Debug)]
struct Arc {
    src: usize,
    dst: usize,
    sat: u8,
}

#[derive(Clone, Debug)]
pub struct LoopTreeSchedule {
    pub trees: Vec<TreeNode>,
    pub addrs: Vec<Address>,
    /// Access index -> its rotated address.
    pub mem_addr: Vec<Option<usize>>,
}

impl LoopTreeSchedule {
    /// Build the tree from a solved block: rotate every access, insert it at
    /// the depth of its node, then order each level.
    pub fn init(lb: &LoopBlock) -> LoopTreeSchedule {
        let mut this = LoopTreeSchedule {
            trees: vec![TreeNode::default()],
            addrs: Vec::new(),
            mem_addr: vec![None; lb.memory.len()],
        };
        for (n, node) in lb.nodes.iter().enumerate() {
            let leaf = this.alloc_loop_path(&node.schedule.fusion_omega, node.num_loops);
            this.insert_mem(lb, n, leaf);
        }
        // Address-level dependence arcs: the rotated edges (tagged with the
        // depth at which the LP satisfied them) plus each node's register
        // chain into its store, which orders within a single iteration.
        let mut arcs: Vec<Arc> = Vec::new();
        for e in &lb.edges {
            if let (Some(a), Some(b)) = (this.mem_addr[e.input], this.mem_addr[e.output]) {
                if a != b {
                    arcs.push(Arc {
                        src: a,
                        dst: b,
                        sat: e.sat_level(),
                    });
                }
            }
        }
        for node in &lb.nodes {
            let store = node
                .memory
                .iter()
                .find(|&m| lb.memory[m].is_store && this.mem_addr[m].is_some());
            if let Some(s) = store.and_then(|m| this.mem_addr[m]) {
                for m in node.memory.iter() {
                    if let Some(a) = this.mem_addr[m] {
                        if a != s {
                            arcs.push(Arc {
                                src: a,
                                dst: s,
                                sat: u8::MAX >> 1,
                            });
                        }
                    }
                }
            }
        }
        this.place_addr(0, &arcs);
        this
    }

    /// Descend/create children keyed by fusion coordinates.
    fn alloc_loop_path(&mut self, fusion: &[i64], num_loops: usize) -> usize {
        let mut cur = 0usize;
        for (i, &f) in fusion.iter().take(num_loops).enumerate() {
            let slot = usize::try_from(f).unwrap_or(0);
            while self.trees[cur].sub.len() <= slot {
                let id = self.trees.len();
                self.trees.push(TreeNode {
                    parent: Some(cur),
                    depth: i + 1,
                    ..TreeNode::default()
                });
                self.trees[cur].sub.push(SubLoop {
                    tree: id,
                    exit: Vec::new(),
                });
            }
            cur = self.trees[cur].sub[slot].tree;
        }
        cur
    }

    /// Rotate a node's accesses into `leaf`'s header.
    fn insert_mem(&mut self, lb: &LoopBlock, n: usize, leaf: usize) {
        let node = &lb.nodes[n];
        let (pinv, denom) =
            scaled_inv(&node.schedule.phi).expect("schedules are invertible by construction");
        debug_assert_eq!(
            &node.schedule.phi * &pinv,
            DMatrix::identity(node.num_loops, node.num_loops) * denom
        );
        if self.trees[leaf].nest.is_none() {
            if let Some(m) = node
                .memory
                .iter()
                .find(|&m| lb.memory[m].num_loops() == node.num_loops)
            {
                self.trees[leaf].nest = Some(lb.memory[m].loop_nest.rotate(&pinv, denom));
            }
        }
        for m in node.memory.iter() {
            let mem = &lb.memory[m];
            let nl = mem.num_loops();
            debug_assert!(nl <= node.num_loops);
            let sub_pinv = pinv.view((0, 0), (nl, nl)).into_owned();
            let mut addr = Address::rotate(m, n, mem, &sub_pinv, denom, &node.schedule.offset_omega[..nl]);
            addr.tree = leaf;
            let id = self.addrs.len();
            self.mem_addr[m] = Some(id);
            self.trees[leaf].header.push(id);
            self.addrs.push(addr);
        }
    }

    /// Order one level: recursively place sub-loops, then walk the SCCs of
    /// the boundary-augmented address graph. Returns every address at or
    /// below this level, in placement order.
    fn place_addr(&mut self, tree: usize, arcs: &[Arc]) -> Vec<usize> {
        let mut level: Vec<usize> = std::mem::take(&mut self.trees[tree].header);
        let mut counts: Vec<usize> = vec![level.len()];
        let subs: Vec<usize> = self.trees[tree].sub.iter().map(|s| s.tree).collect();
        for &s in &subs {
            let below = self.place_addr(s, arcs);
            level.extend(below);
            counts.push(level.len());
        }
        let num_addr = level.len();
        let num_bound = 2 * subs.len();
        // Re-index the subset and rebuild the local relation sets.
        let in_level: std::collections::HashMap<usize, usize> = level
            .iter()
            .enumerate()
            .map(|(g, &a)| (a, g))
            .collect();
        for (g, &a) in level.iter().enumerate() {
            let addr = &mut self.addrs[a];
            addr.graph_id = g;
            addr.parents = BitSet::new();
            addr.children = BitSet::new();
        }
        let depth = self.trees[tree].depth;
        for arc in arcs {
            // Arcs an enclosing loop already enforces impose no order here.
            if usize::from(arc.sat) < depth {
                continue;
            }
            if let (Some(&gs), Some(&gd)) = (in_level.get(&arc.src), in_level.get(&arc.dst)) {
                self.addrs[arc.dst].parents.insert(gs);
                self.addrs[arc.src].children.insert(gd);
            }
        }
        // Boundary vertices per sub-loop: start = num_addr + 2i,
        // stop = start + 1. The chain stop_i -> start_{i+1} pins sub-loop
        // order; members hang between their start and stop.
        let mut bound_in: Vec<BitSet> = vec![BitSet::new(); num_bound];
        let mut bound_out: Vec<BitSet> = vec![BitSet::new(); num_bound];
        for i in 0..subs.len() {
            let start = 2 * i;
            let stop = start + 1;
            if i > 0 {
                bound_out[start - 1].insert(num_addr + start);
                bound_in[start].insert(num_addr + start - 1);
            }
            let members = &level[counts[i]..counts[i + 1]];
            if members.is_empty() {
                bound_out[start].insert(num_addr + stop);
                bound_in[stop].insert(num_addr + start);
            }
            for &m in members {
                let g = self.addrs[m].graph_id;
                bound_out[start].insert(g);
                bound_in[stop].insert(g);
                self.addrs[m].parents.insert(num_addr + start);
                self.addrs[m].children.insert(num_addr + stop);
            }
        }
        // Transitive ancestors/descendants over the local relation.
        for &a in &level {
            self.addrs[a].ancestors = self.closure(&level, a, true, num_addr);
            self.addrs[a].descendants = self.closure(&level, a, false, num_addr);
        }
        let components = {
            let g = AddrGraph {
                lts: self,
                level: &level,
                bound_in: &bound_in,
                bound_out: &bound_out,
                num_addr,
            };
            strongly_connected_components(&g)
        };
        let mut current_loop = 0usize;
        let mut in_loop = false;
        let mut exits: Vec<Vec<usize>> = vec![Vec::new(); subs.len()];
        let mut header: Vec<usize> = Vec::new();
        for scc in &components {
            if scc.len() == 1 {
                let ind = scc.first().unwrap();
                if ind < num_addr {
                    let a = level[ind];
                    debug_assert!(!self.addrs[a].placed || in_loop);
                    if in_loop {
                        let members = &level[counts[current_loop]..counts[current_loop + 1]];
                        if let Some(after) = self.hoist_decision(tree, a, members, subs[current_loop])
                        {
                            if self.addrs[a].placed {
                                self.remove_from_tree(self.addrs[a].tree, a);
                            }
                            self.addrs[a].tree = tree;
                            let dst = if after {
                                &mut exits[current_loop]
                            } else if current_loop == 0 {
                                &mut header
                            } else {
                                &mut exits[current_loop - 1]
                            };
                            dst.push(a);
                        }
                    } else if !self.addrs[a].placed {
                        if current_loop == 0 {
                            header.push(a);
                        } else {
                            exits[current_loop - 1].push(a);
                        }
                    }
                    self.addrs[a].placed = true;
                } else {
                    let b = ind - num_addr;
                    debug_assert_eq!(b & 1, usize::from(in_loop));
                    debug_assert_eq!(b >> 1, current_loop);
                    if in_loop {
                        // leaving sub-loop `current_loop`
                        current_loop += 1;
                    }
                    in_loop = !in_loop;
                }
            } else {
                debug_assert!(in_loop, "cycles must live inside a sub-loop");
            }
        }
        self.trees[tree].header = header;
        for (i, ex) in exits.into_iter().enumerate() {
            self.trees[tree].sub[i].exit = ex;
        }
        level
    }

    /// Can the isolated in-loop address move out of the sub-loop? `Some`
    /// gives the side: `true` places it after the loop (it depends on
    /// members), `false` before. `None` keeps it inside.
    fn hoist_decision(
        &self,
        tree: usize,
        a: usize,
        members: &[usize],
        sub_tree: usize,
    ) -> Option<bool> {
        let depth = self.trees[tree].depth;
        let addr = &self.addrs[a];
        let hoistable = !addr.placed
            || (addr.tree == sub_tree && depth < addr.num_loops() && addr.independent_of(depth));
        if !hoistable {
            return None;
        }
        let (mut is_parent, mut is_child) = (false, false);
        for &m in members {
            if m == a {
                continue;
            }
            let g = self.addrs[m].graph_id;
            is_parent |= addr.ancestors.contains(g);
            is_child |= addr.descendants.contains(g);
        }
        if is_parent && is_child {
            debug_assert!(addr.placed);
            return None;
        }
        Some(is_parent)
    }

    fn remove_from_tree(&mut self, tree: usize, a: usize) {
        let t = &mut self.trees[tree];
        if let Some(p) = t.header.iter().position(|&x| x == a) {
            t.header.remove(p);
            return;
        }
        for s in &mut t.sub {
            if let Some(p) = s.exit.iter().position(|&x| x == a) {
                s.exit.remove(p);
                return;
            }
        }
        debug_assert!(false, "address not found in its tree");
    }

    fn closure(&self, level: &[usize], a: usize, up: bool, num_addr: usize) -> BitSet {
        let mut seen = BitSet::new();
        let mut stack: Vec<usize> = {
            let s = if up {
                &self.addrs[a].parents
            } else {
                &self.addrs[a].children
            };
            s.iter().filter(|&g| g < num_addr).collect()
        };
        while let Some(g) = stack.pop() {
            if seen.contains(g) {
                continue;
            }
            seen.insert(g);
            let next = if up {
                &self.addrs[level[g]].parents
            } else {
                &self.addrs[level[g]].children
            };
            for n in next.iter().filter(|&n| n < num_addr) {
                if !seen.contains(n) {
                    stack.push(n);
                }
            }
        }
        seen
    }

    /// Execution-ordered addresses of a tree node's blocks (header, then
    /// each sub-loop's exit).
    pub fn block_order(&self, tree: usize) -> Vec<usize> {
        let mut out = self.trees[tree].header.clone();
        for s in &self.trees[tree].sub {
            out.extend(s.exit.iter().copied());
        }
        out
    }
}

struct AddrGraph<'a> {
    lts: &'a LoopTreeSchedule,
    level: &'a [usize],
    bound_in: &'a [BitSet],
    bound_out: &'a [BitSet],
    num_addr: usize,
}

impl IndexGraph for AddrGraph<'_> {
    fn num_vertices(&self) -> usize {
        self.num_addr + self.bound_in.len()
    }
    fn vertex_ids(&self) -> impl Iterator<Item = usize> + '_ {
        0..self.num_vertices()
    }
    fn in_neighbors(&self, v: usize) -> impl Iterator<Item = usize> + '_ {
        let set = if v < self.num_addr {
            self.lts.addrs[self.level[v]].parents.clone()
        } else {
            self.bound_in[v - self.num_addr].clone()
        };
        set.iter().collect::<Vec<_>>().into_iter()
    }
}

#[cfg(test)]
mod tests;
