//! Scenario constructors: small named kernels fed through the full
//! schedule → materialize → cost pipeline.

use anyhow::{anyhow, Result};
use nalgebra::{dmatrix, DMatrix, DVector};
use serde::Serialize;

use polyloop::api::{
    optimize_tree, AffineLoop, ArrayId, Inst, LoopBlock, LoopTreeSchedule, Machine, MemAccess, Op,
};

#[derive(Serialize)]
pub struct ScenarioResult {
    pub scenario: String,
    pub cost: f64,
    pub nodes: Vec<NodeOut>,
    pub transforms: Vec<TransformOut>,
}

#[derive(Serialize)]
pub struct NodeOut {
    pub phi: Vec<Vec<i64>>,
    pub offset_omega: Vec<i64>,
    pub fusion_omega: Vec<i64>,
}

#[derive(Serialize)]
pub struct TransformOut {
    pub vector_width: u32,
    pub register_unroll: i32,
    pub cache_unroll: i64,
}

fn access(
    array: usize,
    nest: &AffineLoop,
    index: DMatrix<i64>,
    offset: Vec<i64>,
    fusion: Vec<i64>,
    is_store: bool,
    inst: usize,
) -> MemAccess {
    let d = index.nrows();
    MemAccess {
        array: ArrayId(array),
        loop_nest: nest.clone(),
        index,
        offset: DVector::from_vec(offset),
        sym_offset: DMatrix::zeros(d, nest.num_sym()),
        fusion_omega: fusion,
        is_store,
        elem_bytes: 8,
        inst,
    }
}

fn finish(name: &str, mut lb: LoopBlock) -> Result<ScenarioResult> {
    lb.optimize()
        .ok_or_else(|| anyhow!("{name}: no legal schedule found"))?;
    let lts = LoopTreeSchedule::init(&lb);
    let machine = Machine::skylake_server();
    let result = optimize_tree(&machine, &lb, &lts);
    let nodes = lb
        .nodes
        .iter()
        .map(|n| NodeOut {
            phi: (0..n.schedule.phi.nrows())
                .map(|r| n.schedule.row(r))
                .collect(),
            offset_omega: n.schedule.offset_omega.clone(),
            fusion_omega: n.schedule.fusion_omega.clone(),
        })
        .collect();
    let transforms = result
        .transforms
        .iter()
        .skip(1) // the virtual root
        .map(|t| TransformOut {
            vector_width: 1 << t.l2_vector_width,
            register_unroll: t.register_unroll,
            cache_unroll: t.cache_unroll,
        })
        .collect();
    Ok(ScenarioResult {
        scenario: name.to_string(),
        cost: result.cost,
        nodes,
        transforms,
    })
}

/// `C[m,n] += A[m,k] * B[k,n]`, square extents.
pub fn gemm(size: i64) -> Result<ScenarioResult> {
    let nest = AffineLoop::rect(&[size, size, size]);
    let insts = vec![
        Inst::Load { mem: 0 },
        Inst::Load { mem: 1 },
        Inst::Load { mem: 2 },
        Inst::Compute {
            op: Op::Fma,
            operands: vec![0, 1, 2],
        },
        Inst::Store { mem: 3, value: 3 },
    ];
    let memory = vec![
        access(
            1,
            &nest,
            dmatrix![1i64, 0, 0; 0, 0, 1],
            vec![0, 0],
            vec![0, 0, 0, 0],
            false,
            0,
        ),
        access(
            2,
            &nest,
            dmatrix![0i64, 0, 1; 0, 1, 0],
            vec![0, 0],
            vec![0, 0, 0, 1],
            false,
            1,
        ),
        access(
            0,
            &nest,
            dmatrix![1i64, 0, 0; 0, 1, 0],
            vec![0, 0],
            vec![0, 0, 0, 2],
            false,
            2,
        ),
        access(
            0,
            &nest,
            dmatrix![1i64, 0, 0; 0, 1, 0],
            vec![0, 0],
            vec![0, 0, 0, 3],
            true,
            4,
        ),
    ];
    finish("gemm", LoopBlock::new(memory, insts))
}

/// `for i { for j < i { x[i] -= x[j] * U[j,i] } ; x[i] /= U[i,i] }`.
pub fn trisolve(size: i64) -> Result<ScenarioResult> {
    // 0 <= i < N, 0 <= j <= i-1
    let tri = AffineLoop::from_parts(
        dmatrix![
            0i64, 1, 0;
            size - 1, -1, 0;
            0, 0, 1;
            -1, 1, -1
        ],
        0,
    );
    let outer = AffineLoop::rect(&[size]);
    let insts = vec![
        Inst::Load { mem: 0 }, // x[j]
        Inst::Load { mem: 1 }, // U[j,i]
        Inst::Load { mem: 2 }, // x[i]
        Inst::Compute {
            op: Op::Fma,
            operands: vec![0, 1, 2],
        },
        Inst::Store { mem: 3, value: 3 }, // x[i]
        Inst::Load { mem: 4 },            // x[i] again
        Inst::Load { mem: 5 },            // U[i,i]
        Inst::Compute {
            op: Op::Div,
            operands: vec![5, 6],
        },
        Inst::Store { mem: 6, value: 7 }, // x[i]
    ];
    let memory = vec![
        access(0, &tri, dmatrix![0i64, 1], vec![0], vec![0, 0, 0], false, 0),
        access(
            1,
            &tri,
            dmatrix![0i64, 1; 1, 0],
            vec![0, 0],
            vec![0, 0, 1],
            false,
            1,
        ),
        access(0, &tri, dmatrix![1i64, 0], vec![0], vec![0, 0, 2], false, 2),
        access(0, &tri, dmatrix![1i64, 0], vec![0], vec![0, 0, 3], true, 4),
        access(0, &outer, dmatrix![1i64], vec![0], vec![0, 1], false, 5),
        access(1, &outer, dmatrix![1i64; 1], vec![0, 0], vec![0, 2], false, 6),
        access(0, &outer, dmatrix![1i64], vec![0], vec![0, 3], true, 8),
    ];
    finish("trisolve", LoopBlock::new(memory, insts))
}

/// Two independent outer products sharing a nest.
pub fn fused_pair(size: i64) -> Result<ScenarioResult> {
    let nest = AffineLoop::rect(&[size, size]);
    let insts = vec![
        Inst::Load { mem: 0 },
        Inst::Load { mem: 1 },
        Inst::Compute {
            op: Op::Mul,
            operands: vec![0, 1],
        },
        Inst::Store { mem: 2, value: 2 },
        Inst::Load { mem: 3 },
        Inst::Load { mem: 4 },
        Inst::Compute {
            op: Op::Mul,
            operands: vec![4, 5],
        },
        Inst::Store { mem: 5, value: 6 },
    ];
    let memory = vec![
        access(1, &nest, dmatrix![1i64, 0], vec![0], vec![0, 0, 0], false, 0),
        access(2, &nest, dmatrix![0i64, 1], vec![0], vec![0, 0, 1], false, 1),
        access(
            0,
            &nest,
            dmatrix![1i64, 0; 0, 1],
            vec![0, 0],
            vec![0, 0, 2],
            true,
            3,
        ),
        access(4, &nest, dmatrix![1i64, 0], vec![0], vec![0, 0, 3], false, 4),
        access(5, &nest, dmatrix![0i64, 1], vec![0], vec![0, 0, 4], false, 5),
        access(
            3,
            &nest,
            dmatrix![1i64, 0; 0, 1],
            vec![0, 0],
            vec![0, 0, 5],
            true,
            7,
        ),
    ];
    finish("fusedpair", LoopBlock::new(memory, insts))
}
