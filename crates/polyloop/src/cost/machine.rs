//! Target machine descriptors.
//!
//! A `Machine` is a data table: cache geometry, per-cycle core widths, and
//! vector register shape. Cache strides and fit coefficients are in bits so
//! sub-byte element types stay representable.

use crate::ir::Op;

/// Issue widths in operations per cycle.
#[derive(Clone, Copy, Debug)]
pub struct CoreWidth {
    pub load: f64,
    pub stow: f64,
    pub comp: f64,
    pub total: f64,
}

/// One cache level.
#[derive(Clone, Copy, Debug)]
pub struct CacheLevel {
    /// Line size times number of sets, in bits: one way's worth of data.
    pub stride: i64,
    /// A victim cache's occupancy is counted above the next inner level.
    pub victim: bool,
    pub associativity: u32,
    /// Cycles per byte of the next-outer level feeding this one.
    pub inv_next_bandwidth: f64,
}

#[derive(Clone, Debug)]
pub struct Machine {
    pub vector_bytes: u32,
    pub num_vector_regs: u32,
    pub cacheline_bits: i64,
    pub caches: Vec<CacheLevel>,
    pub core: CoreWidth,
}

const KIB: i64 = 1024;

impl Machine {
    /// Skylake-Server-like descriptor: 512-bit vectors, 32 registers,
    /// L1 32 KiB 8-way, L2 1 MiB 16-way, L3 1.375 MiB/core 11-way victim.
    pub fn skylake_server() -> Machine {
        Machine {
            vector_bytes: 64,
            num_vector_regs: 32,
            cacheline_bits: 512,
            caches: vec![
                CacheLevel {
                    stride: 8 * 4 * KIB,
                    victim: false,
                    associativity: 8,
                    inv_next_bandwidth: 0.125 / 52.0,
                },
                CacheLevel {
                    stride: 8 * 64 * KIB,
                    victim: false,
                    associativity: 16,
                    inv_next_bandwidth: 0.125 / 3.0,
                },
                CacheLevel {
                    stride: 8 * 128 * KIB,
                    victim: true,
                    associativity: 11,
                    inv_next_bandwidth: 0.125 / 1.0,
                },
            ],
            core: CoreWidth {
                load: 2.0,
                stow: 1.0,
                comp: 2.0,
                total: 4.0,
            },
        }
    }

    /// log2 of the widest vectorization factor for an element size.
    pub fn l2_max_vector_width(&self, elem_bytes: u32) -> u32 {
        debug_assert!(elem_bytes > 0);
        let lanes = (self.vector_bytes / elem_bytes).max(1);
        lanes.ilog2()
    }

    /// Reciprocal throughput of an op at a vectorization factor; vector ops
    /// cost the same per instruction as scalar until the type exceeds the
    /// register, which the caller prevents.
    pub fn op_cost(&self, op: Op, _l2v: u32) -> f64 {
        match op {
            Op::Add | Op::Sub => 0.5,
            Op::Mul | Op::Fma => 0.5,
            Op::Div => 4.0,
            Op::Sqrt => 6.0,
        }
    }

    /// Latency in cycles, for reduction chains.
    pub fn op_latency(&self, op: Op) -> f64 {
        match op {
            Op::Add | Op::Sub | Op::Mul | Op::Fma => 4.0,
            Op::Div => 14.0,
            Op::Sqrt => 18.0,
        }
    }

    /// Combined cost of spilling and refilling one register.
    pub fn load_stow_cycles(&self) -> f64 {
        1.0 / self.core.load + 1.0 / self.core.stow
    }
}
