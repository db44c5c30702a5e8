//! Register-pressure modeling.
//!
//! Intra-block: each check point carries ephemeral entries (live only
//! between their def and use; consumption depends on the unroll *order*)
//! and perennial entries (live across the whole block; consumption is the
//! full dependent-unroll product). Ephemeral use is minimized over the
//! permutations compatible with the SCC decomposition of the
//! loop-relation graph, since any order inside a component is achievable.
//!
//! Inter-block: an 8-byte record per live range tracks whether the range is
//! used in this block, how many registers it wants, and which previous
//! blocks' counts flow in.

use crate::containers::LoopSet;
use crate::graph::{strongly_connected_components, IndexGraph, LoopPermutations};
use crate::math::gcd;

use super::unrolls::Unrolls;

#[derive(Clone, Copy, Debug)]
pub struct MaskCoef {
    pub mask: u16,
    pub coef: u16,
}

/// Loop-relation graph: `data[a]` holds the loops that must unroll inside
/// `a` for some ephemeral entry.
struct IndexRelationGraph {
    data: Vec<LoopSet>,
}

impl IndexRelationGraph {
    fn new(depth1: usize) -> Self {
        Self {
            data: vec![LoopSet::default(); depth1],
        }
    }
    fn add_edges(&mut self, a: usize, js: LoopSet) {
        self.data[a] = self.data[a].union(js);
    }
}

impl IndexGraph for IndexRelationGraph {
    fn num_vertices(&self) -> usize {
        self.data.len()
    }
    fn vertex_ids(&self) -> impl Iterator<Item = usize> + '_ {
        0..self.data.len()
    }
    fn in_neighbors(&self, v: usize) -> impl Iterator<Item = usize> + '_ {
        self.data[v].iter()
    }
}

#[derive(Clone, Debug, Default)]
pub struct IntraBlockRegisterUse {
    perms: LoopPermutations,
    mask_coefs: Vec<MaskCoef>,
    num_temp: usize,
}

impl IntraBlockRegisterUse {
    pub fn new(ephemeral: &[MaskCoef], perennial: &[MaskCoef], depth1: usize) -> Self {
        let mut graph = IndexRelationGraph::new(depth1);
        for mc in ephemeral {
            debug_assert!(usize::from(mc.mask) < (1 << depth1));
            let dep = LoopSet::from_mask(mc.mask);
            for a in dep.flipped(depth1).iter() {
                graph.add_edges(a, dep);
            }
        }
        let mut mask_coefs = Vec::with_capacity(ephemeral.len() + perennial.len());
        mask_coefs.extend_from_slice(ephemeral);
        mask_coefs.extend_from_slice(perennial);
        let perms = if ephemeral.is_empty() {
            LoopPermutations::default()
        } else {
            let comps = strongly_connected_components(&graph);
            LoopPermutations::new(
                comps
                    .into_iter()
                    .map(|c| {
                        let mut ls = LoopSet::default();
                        for v in c.iter() {
                            ls.insert(v);
                        }
                        ls
                    })
                    .collect(),
            )
        };
        IntraBlockRegisterUse {
            perms,
            mask_coefs,
            num_temp: ephemeral.len(),
        }
    }

    fn ephemeral_mask_coefs(&self) -> &[MaskCoef] {
        &self.mask_coefs[..self.num_temp]
    }
    fn perennial_mask_coefs(&self) -> &[MaskCoef] {
        &self.mask_coefs[self.num_temp..]
    }

    /// Registers consumed by one entry under a given unroll order: the
    /// product of dependent unroll factors interior to the outermost
    /// independent one.
    fn register_consumption(order: &[u8], dep_mask: u16, unrolls: &Unrolls) -> f64 {
        debug_assert!(dep_mask != 0);
        let pop = dep_mask.count_ones() as usize;
        let depth = order.len();
        debug_assert!(depth >= pop);
        if depth == pop {
            return 1.0;
        }
        let mut d = 0usize;
        loop {
            let bit = 1u16 << order[d];
            d += 1;
            if bit & dep_mask == 0 {
                break;
            }
        }
        if d > pop {
            return 1.0;
        }
        let mut r = 1.0;
        let mut rpop = pop - d;
        loop {
            let i = order[d] as usize;
            d += 1;
            if (1u16 << i) & dep_mask == 0 {
                continue;
            }
            r *= unrolls.unroll(i);
            if rpop == 0 {
                return r;
            }
            rpop -= 1;
        }
    }

    /// Minimum ephemeral register use over the admissible unroll orders.
    pub fn ephemeral_use(&self, unrolls: &Unrolls) -> f64 {
        if self.perms.is_empty() || self.num_temp == 0 {
            return 0.0;
        }
        let mut acc = f64::MAX;
        for order in self.perms.iter() {
            let mut ao = 0.0;
            for mc in self.ephemeral_mask_coefs() {
                ao += f64::from(mc.coef) * Self::register_consumption(&order, mc.mask, unrolls);
            }
            acc = acc.min(ao);
        }
        acc
    }

    pub fn perennial_use(&self, unrolls: &Unrolls) -> f64 {
        self.perennial_mask_coefs()
            .iter()
            .map(|mc| f64::from(mc.coef) * unrolls.dependent_unroll_product(u32::from(mc.mask)))
            .sum()
    }
}

/// Bounds on how often a reduction accumulator is duplicated across the
/// unroll. Expanding hides latency but multiplies perennial register use.
#[derive(Clone, Copy, Debug)]
pub struct ReductionExpansionBounds {
    /// Narrowed to avoid spilling; hard limit.
    pub upper_bound: f64,
    /// Raised to avoid losing throughput to latency.
    pub lower_bound: f64,
}

impl ReductionExpansionBounds {
    pub fn new(upper_bound: f64) -> Self {
        Self {
            upper_bound,
            lower_bound: 1.0,
        }
    }
    /// Smallest divisor of `ub` at least the (soft) lower bound; the upper
    /// bound wins when they conflict. Returns `(expansion, ub/expansion)`.
    pub fn choose(&self, ub: f64) -> (f64, f64) {
        let rx = self.lower_bound.min(self.upper_bound);
        let ubi = ub as i64;
        for f in 1..=ubi {
            if ubi % f == 0 && f as f64 >= rx {
                return (f as f64, (ubi / f) as f64);
            }
        }
        (ub, 1.0)
    }
    pub fn update_lower_bound(&mut self, throughput: f64, latency: f64, comp: f64) {
        let tl = throughput * latency;
        if tl > self.lower_bound * comp && comp > 0.0 {
            self.lower_bound = (tl / comp).ceil();
        }
    }
    /// Shrink the upper bound so `expansion·perennial + ephemeral` fits the
    /// register file; returns the resulting register use.
    pub fn update_upper_bound(&mut self, ephemeral: f64, perennial: f64, register_count: f64) -> f64 {
        let d = register_count - ephemeral;
        if d < perennial * self.upper_bound {
            self.upper_bound = if d > perennial { (d / perennial).floor() } else { 1.0 };
        }
        ephemeral + perennial * self.upper_bound
    }
}

/// Per-live-range record consumed once per block, in block order.
#[derive(Clone, Copy, Debug, Default)]
pub struct LiveInfo {
    pub used_here: bool,
    pub dep_mask: u16,
    /// Registers added by instructions inside the block (no load cost).
    pub additional: u16,
    /// Total registers the range wants while live here.
    pub total_count: u16,
    /// Offsets (1-based, 0 = none) back to prior blocks' live counts.
    pub prev_idxs: [u8; 2],
}

/// `choose` must return a divisor; used by the search and asserted in tests.
pub fn divides(factor: f64, of: f64) -> bool {
    let (f, o) = (factor as i64, of as i64);
    f > 0 && o % f == 0 && gcd(f, o) == f
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::unrolls::Unrolls;

    fn unrolls(m: i32, n: i32, k: i32) -> Unrolls {
        let mut u = Unrolls::default();
        u.push(m, 64.0, true);
        u.push(n, 64.0, true);
        u.push(k, 64.0, true);
        u
    }

    /// The matmul register-ordering example: order [k,m,n], unrolls
    /// (m,n,k) = (2,3,4). A[m,k] needs 1, B[k,n] needs n's unroll, C[m,n]
    /// the product of m's and n's.
    #[test]
    fn register_consumption_matmul() {
        let u = unrolls(2, 3, 4);
        let order = [2u8, 0, 1];
        assert_eq!(
            IntraBlockRegisterUse::register_consumption(&order, 0b101, &u),
            1.0
        );
        assert_eq!(
            IntraBlockRegisterUse::register_consumption(&order, 0b110, &u),
            3.0
        );
        assert_eq!(
            IntraBlockRegisterUse::register_consumption(&order, 0b011, &u),
            6.0
        );
    }

    /// The SCC-derived permutations find the order minimizing ephemeral use.
    #[test]
    fn ephemeral_use_minimizes_over_orders() {
        let eph = [
            MaskCoef { mask: 0b101, coef: 1 },
            MaskCoef { mask: 0b110, coef: 1 },
            MaskCoef { mask: 0b011, coef: 1 },
        ];
        let rubu = IntraBlockRegisterUse::new(&eph, &[], 3);
        let u = unrolls(2, 3, 4);
        let use_ = rubu.ephemeral_use(&u);
        assert!(use_ > 0.0);
        // No order can beat holding each value once (3 registers) and none
        // should exceed the full-product worst case.
        assert!(use_ >= 3.0 && use_ <= (2.0 * 3.0 + 2.0 * 4.0 + 3.0 * 4.0));
    }

    #[test]
    fn reduction_expansion_choose_divides() {
        for ub in 1..=16i64 {
            for lb in 1..=16i64 {
                let reb = ReductionExpansionBounds {
                    upper_bound: 16.0,
                    lower_bound: lb as f64,
                };
                let (rex, uf) = reb.choose(ub as f64);
                assert!(divides(rex, ub as f64), "{rex} does not divide {ub}");
                assert_eq!(rex * uf, ub as f64);
                assert!(rex >= 1.0 && rex <= ub as f64);
            }
        }
    }

    #[test]
    fn upper_bound_prevents_spills() {
        let mut reb = ReductionExpansionBounds::new(8.0);
        // 20 ephemeral + expansion * 4 perennial must fit 32 registers.
        let ru = reb.update_upper_bound(20.0, 4.0, 32.0);
        assert!(reb.upper_bound <= 3.0);
        assert!(ru <= 32.0);
    }
}
