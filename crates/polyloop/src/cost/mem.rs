//! Memory cost of an access set under the current unroll/vector state.
//!
//! Cost of an access is its base cost times the unroll product of the loops
//! it depends on (the independent loops were already divided out of its
//! execution count). Vectorized accesses split three ways: the vector axis
//! is contiguous (cheap), no axis is contiguous (gather/scatter), or a
//! contiguous axis exists but is not the vector axis; the last case picks
//! the cheaper of gather/scatter versus contiguous-loads-plus-shuffles, and
//! considers hoisted packing when independent loops can amortize it.

use nalgebra::DMatrix;

use super::model::Cost;
use super::unrolls::Unrolls;

/// Base reciprocal-throughput costs of one access shape.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemCosts {
    pub scalar: f64,
    pub contig: f64,
    pub noncon: f64,
}

/// Loop-axis structure of an access: which axes are contiguous in memory,
/// and which axes the subscript depends on at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrthogonalAxes {
    pub contig: u32,
    pub dep: u32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MemCostSummary {
    /// `[load, store]` costs.
    pub costs: [MemCosts; 2],
    pub orth: OrthogonalAxes,
}

pub fn cost(unrolls: &Unrolls, mcs: &MemCostSummary) -> Cost {
    let [mc_load, mc_stow] = mcs.costs;
    let orth = mcs.orth;
    let c = unrolls.dependent_unroll_product(orth.dep);
    let vf = unrolls.vf;
    let (l, s);
    if orth.dep & vf.mask != 0 {
        // depends on the vectorized index
        if vf.mask & orth.contig != 0 {
            l = mc_load.contig;
            s = mc_stow.contig;
        } else if orth.contig == 0 {
            l = mc_load.noncon;
            s = mc_stow.noncon;
        } else {
            return discontiguous_with_contiguous_axis(unrolls, mcs, c);
        }
    } else {
        l = mc_load.scalar;
        s = mc_stow.scalar;
    }
    Cost {
        load: l * c,
        stow: s * c,
        ..Cost::default()
    }
}

/// The vector axis is discontiguous but some unrolled axis is contiguous:
/// compare gather/scatter against `max(u, v)` contiguous transfers plus
/// `u·log2(v)` shuffles, then consider hoisting a packed copy when the
/// access ignores some loops.
fn discontiguous_with_contiguous_axis(unrolls: &Unrolls, mcs: &MemCostSummary, c: f64) -> Cost {
    let [mc_load, mc_stow] = mcs.costs;
    let orth = mcs.orth;
    let first_contig = orth.contig.trailing_zeros() as usize;
    let u = unrolls.unroll(first_contig);
    let v = unrolls.vf.factor();
    let ufactor = u.max(v);
    let (lc, sc, ld, sd) = (
        mc_load.contig,
        mc_stow.contig,
        mc_load.noncon,
        mc_stow.noncon,
    );
    let lcf = lc * ufactor;
    let scf = sc * ufactor;
    let shuf_count = u * f64::from(unrolls.vf.l2);
    let shuf_ratio = c / u;
    let prefer_shuf_over_gather = lcf + shuf_count * lc < ld * u;
    let prefer_shuf_over_scatter = scf + shuf_count * sc < sd * u;
    let mut comp = 0.0;
    if prefer_shuf_over_gather {
        comp += shuf_count * lc;
    }
    if prefer_shuf_over_scatter {
        comp += shuf_count * sc;
    }
    let sgsc = Cost {
        load: if prefer_shuf_over_gather {
            lcf * shuf_ratio
        } else {
            ld * c
        },
        stow: if prefer_shuf_over_scatter {
            scf * shuf_ratio
        } else {
            sd * c
        },
        comp: comp * shuf_ratio,
        latency: 0.0,
    };
    if (orth.dep.count_ones() as usize) < unrolls.depth() {
        // Packing alternative: transfer once between the original layout and
        // a packed buffer, amortized over the loops the access ignores, then
        // stream contiguously.
        let indep_iters = unrolls.independent_loop_iters(orth.dep);
        let l = mc_load.contig * c;
        let s = mc_stow.contig * c;
        let pack_overhead = (sgsc
            + Cost {
                load: s,
                stow: l,
                ..Cost::default()
            })
            / indep_iters;
        let pack_cost = pack_overhead
            + Cost {
                load: l,
                stow: s,
                ..Cost::default()
            };
        if pack_cost.load + pack_cost.stow + pack_cost.comp < sgsc.load + sgsc.stow + sgsc.comp {
            return pack_cost;
        }
    }
    sgsc
}

/// General fallback when one loop feeds several array dimensions: a
/// gcd-coupled correction factor scales the orthogonal-axes cost down for
/// index collisions across the unrolled iterations.
pub fn cost_conv(unrolls: &Unrolls, mcs: &MemCostSummary, inds: &DMatrix<i64>) -> Cost {
    let array_dim = inds.nrows();
    // Hoisted accesses keep their full column count; trailing columns are
    // zero and the unroll stack stops at the block's depth.
    let num_loops = inds.ncols().min(unrolls.depth());
    debug_assert!(array_dim > 0 && num_loops > 0);
    let mut c = 1.0;
    for d in 0..array_dim {
        let mut g: i64 = 0;
        let mut axes: Vec<usize> = Vec::new();
        let mut uprod = 1.0;
        for l in 0..num_loops {
            if (1u32 << l) == unrolls.vf.mask {
                continue;
            }
            let a = inds[(d, l)];
            if a == 0 {
                continue;
            }
            // Rows repeating this column pattern are only counted once.
            let dup = (0..array_dim).any(|k| {
                k != d && inds[(k, l)] != 0 && (inds.row(d) == inds.row(k) && d > k)
            });
            if dup {
                continue;
            }
            let u = unrolls.unroll(l);
            if axes.is_empty() {
                g = a;
                uprod = u;
            } else {
                g = crate::math::gcd(g, a);
                uprod *= u;
            }
            axes.push(l);
        }
        if axes.len() < 2 {
            continue;
        }
        let dg = g as f64;
        let mut prod = 1.0;
        for &l in &axes {
            let a = inds[(d, l)];
            if a != 0 {
                prod *= 1.0 - (a as f64 / dg) * (unrolls.unroll(l) / uprod);
            }
        }
        c *= 1.0 - prod;
    }
    cost(unrolls, mcs) * c
}

pub fn memcosts(unrolls: &Unrolls, orth_axes: &[MemCostSummary]) -> Cost {
    let mut costs = Cost::default();
    for mcs in orth_axes {
        costs += cost(unrolls, mcs);
    }
    costs
}

pub fn memcosts_conv(unrolls: &Unrolls, conv: &[(MemCostSummary, DMatrix<i64>)]) -> Cost {
    let mut costs = Cost::default();
    for (mcs, inds) in conv {
        costs += cost_conv(unrolls, mcs, inds);
    }
    costs
}
