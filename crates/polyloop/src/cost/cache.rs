//! Cache-blocking factor selection.
//!
//! Each leaf contributes a `DepSummary`: every distinct array access
//! pattern with its loop-dependence mask, a fit coefficient (bits per
//! element of tile footprint) and a cost coefficient (bits moved per touch;
//! stores count twice for the write-back). Entries are classified as
//! dependent-on or independent-of the innermost cache loop: consecutive
//! blocks of that loop reuse the resident tiles of independent arrays (the
//! fit check guarantees a tile survives one block), so that axis drops out
//! of every reload product.
//!
//! Every cache level gets its own tile. A level's feed bandwidth is charged
//! with the bits that must cross into it:
//!
//! ```text
//!   traffic_l(a) = volume(a) · Π_{j ∉ dep(a), j ≠ inner} trip_j / c_j^l
//! ```
//!
//! when the level-`l` tile fits (way usage `ceil(ws·fit/stride)` per array,
//! victim levels counted incrementally above the next inner level), and
//! with register-tile reloads when it does not (the stream case).
//! Accumulator (phi) spills are charged once per outer-tile turnover. Each
//! level's factors are searched per loop with a shrinking sample window
//! over multiples of the register factor, ending in an exhaustive scan once
//! the window collapses; the outermost level's tile is reported as the
//! per-loop cache factors.

use tracing::trace;

use super::machine::CacheLevel;

#[derive(Clone, Copy, Debug)]
pub struct DepSummaryEntry {
    pub dep_mask: u16,
    /// Footprint bits per element of tile volume.
    pub fit_coef: u16,
    /// Bits moved per element touched.
    pub cost_coef: u16,
}

/// Array accesses of one leaf, split by dependence on the innermost loop.
#[derive(Clone, Debug, Default)]
pub struct DepSummary {
    pub dependent: Vec<DepSummaryEntry>,
    pub independent: Vec<DepSummaryEntry>,
}

impl DepSummary {
    pub fn entries(&self) -> impl Iterator<Item = &DepSummaryEntry> {
        self.dependent.iter().chain(self.independent.iter())
    }
}

/// One cache-blockable loop, outermost first.
#[derive(Clone, Copy, Debug)]
pub struct LoopSpec {
    /// Bit in the dependence masks.
    pub axis: usize,
    pub trip: f64,
    /// Register tile (unroll · vector width); cache factors are multiples.
    pub reg_factor: i64,
    /// Spill/reload cost of live accumulators when this loop's tile turns
    /// over.
    pub phi_cost: f64,
}

pub struct CacheOptimizer<'a> {
    pub caches: &'a [CacheLevel],
    pub cacheline_bits: i64,
}

impl CacheOptimizer<'_> {
    /// Pick cache-factor multiples per loop. Levels are costed with their
    /// own tiles and summed; the outermost level's tile (the macro tile) is
    /// returned as the per-loop multiples (1 = unblocked beyond the
    /// register tile).
    pub fn optimize(&self, loops: &[LoopSpec], leaves: &[DepSummary]) -> (f64, Vec<i64>) {
        let mut total = 0.0;
        let mut outer = vec![1i64; loops.len()];
        for lvl in 0..self.caches.len() {
            let mut mult = vec![1i64; loops.len()];
            total += self.opt_level(loops, leaves, &mut mult, 0, lvl);
            outer = mult;
        }
        // Accumulators spill once per macro-tile turnover.
        for (l, spec) in loops.iter().enumerate() {
            if spec.phi_cost > 0.0 {
                total += spec.phi_cost * (spec.trip / Self::tile_iters(loops, &outer, l)).max(1.0);
            }
        }
        trace!(?outer, total, "cache factors chosen");
        (total, outer)
    }

    fn opt_level(
        &self,
        loops: &[LoopSpec],
        leaves: &[DepSummary],
        mult: &mut Vec<i64>,
        i: usize,
        lvl: usize,
    ) -> f64 {
        if i == loops.len() {
            return self.eval_level(loops, leaves, mult, lvl);
        }
        let max_mult = ((loops[i].trip / loops[i].reg_factor as f64).floor() as i64).max(1);
        let (best_m, best_c) = search_window(1, max_mult, |m| {
            mult[i] = m;
            self.opt_level(loops, leaves, mult, i + 1, lvl)
        });
        mult[i] = best_m;
        // Re-fill the tail with the choices matching the winner.
        let c = self.opt_level(loops, leaves, mult, i + 1, lvl);
        debug_assert!((c - best_c).abs() <= 1e-6 * best_c.abs().max(1.0));
        best_c
    }

    fn tile_iters(loops: &[LoopSpec], mult: &[i64], l: usize) -> f64 {
        (mult[l] * loops[l].reg_factor) as f64
    }

    /// Joint fit of every leaf array at cache level `lvl` for this tile.
    fn fits(&self, loops: &[LoopSpec], leaf: &DepSummary, mult: &[i64], lvl: usize) -> bool {
        let cache = &self.caches[lvl];
        let mut ways_used: u64 = 0;
        for e in leaf.entries() {
            let ws = self.working_set_bits(loops, mult, e);
            let mut ways = ways_of(ws, cache.stride);
            if cache.victim && lvl > 0 {
                // Exclusive: only the excess above the inner level occupies.
                let inner = &self.caches[lvl - 1];
                let held = ways_of(ws, inner.stride).min(u64::from(inner.associativity))
                    * inner.stride as u64;
                let excess = ws.saturating_sub(held);
                ways = ways_of(excess, cache.stride);
            }
            ways_used += ways;
            if ways_used > u64::from(cache.associativity) {
                return false;
            }
        }
        true
    }

    fn working_set_bits(&self, loops: &[LoopSpec], mult: &[i64], e: &DepSummaryEntry) -> u64 {
        let mut ws = f64::from(e.fit_coef);
        for (l, spec) in loops.iter().enumerate() {
            if (e.dep_mask >> spec.axis) & 1 == 1 {
                ws *= Self::tile_iters(loops, mult, l);
            }
        }
        // Partial lines still occupy whole lines.
        let lines = (ws / self.cacheline_bits as f64).ceil();
        (lines * self.cacheline_bits as f64) as u64
    }

    /// Bits crossing into level `lvl` under this tile, times the feed
    /// bandwidth. Fitting tiles reload once per block of each ignored loop
    /// except the innermost cache loop (resident reuse); non-fitting tiles
    /// stream at register-tile granularity.
    fn eval_level(&self, loops: &[LoopSpec], leaves: &[DepSummary], mult: &[i64], lvl: usize) -> f64 {
        let cache = &self.caches[lvl];
        let inner = loops.last().map(|l| l.axis);
        let mut traffic = 0.0;
        for leaf in leaves {
            let fits = self.fits(loops, leaf, mult, lvl);
            for e in leaf.entries() {
                let mut volume = f64::from(e.cost_coef);
                let mut reload = 1.0;
                for (l, spec) in loops.iter().enumerate() {
                    if (e.dep_mask >> spec.axis) & 1 == 1 {
                        volume *= spec.trip;
                    } else if !fits {
                        reload *= (spec.trip / spec.reg_factor as f64).max(1.0);
                    } else if Some(spec.axis) != inner {
                        reload *= (spec.trip / Self::tile_iters(loops, mult, l)).max(1.0);
                    }
                }
                traffic += volume * reload;
            }
        }
        cache.inv_next_bandwidth * traffic
    }

    #[cfg(test)]
    pub(super) fn eval_tile(&self, loops: &[LoopSpec], leaves: &[DepSummary], mult: &[i64]) -> f64 {
        (0..self.caches.len())
            .map(|lvl| self.eval_level(loops, leaves, mult, lvl))
            .sum()
    }
    #[cfg(test)]
    pub(super) fn eval_level_tile(
        &self,
        loops: &[LoopSpec],
        leaves: &[DepSummary],
        mult: &[i64],
        lvl: usize,
    ) -> f64 {
        self.eval_level(loops, leaves, mult, lvl)
    }
    #[cfg(test)]
    pub(super) fn fits_tile(
        &self,
        loops: &[LoopSpec],
        leaf: &DepSummary,
        mult: &[i64],
        lvl: usize,
    ) -> bool {
        self.fits(loops, leaf, mult, lvl)
    }
}

#[inline]
fn ways_of(bits: u64, stride: i64) -> u64 {
    bits.div_ceil(stride as u64)
}

/// Shrinking-window search over an integer range: sample seven points,
/// contract around the best, finish exhaustively when the window collapses.
pub(super) fn search_window(lo: i64, hi: i64, mut f: impl FnMut(i64) -> f64) -> (i64, f64) {
    debug_assert!(lo <= hi);
    let (mut lo, mut hi) = (lo, hi);
    while hi - lo > 6 {
        let mut xs = [0i64; 7];
        for (k, x) in xs.iter_mut().enumerate() {
            *x = lo + (hi - lo) * k as i64 / 6;
        }
        let mut best = 0usize;
        let mut best_c = f64::INFINITY;
        for (k, &x) in xs.iter().enumerate() {
            let c = f(x);
            if c < best_c {
                best_c = c;
                best = k;
            }
        }
        let new_lo = xs[best.saturating_sub(1)];
        let new_hi = xs[(best + 1).min(6)];
        if new_lo == lo && new_hi == hi {
            break;
        }
        lo = new_lo;
        hi = new_hi;
    }
    let mut best_x = lo;
    let mut best_c = f64::INFINITY;
    for x in lo..=hi {
        let c = f(x);
        if c < best_c {
            best_c = c;
            best_x = x;
        }
    }
    (best_x, best_c)
}
