use nalgebra::{dmatrix, DMatrix, DVector};

use super::*;
use crate::ir::{ArrayId, Inst, MemAccess, Op};
use crate::poly::AffineLoop;
use crate::schedule::LoopBlock;

fn access(
    array: usize,
    nest: &AffineLoop,
    index: DMatrix<i64>,
    fusion: Vec<i64>,
    is_store: bool,
    inst: usize,
) -> MemAccess {
    let d = index.nrows();
    MemAccess {
        array: ArrayId(array),
        loop_nest: nest.clone(),
        index,
        offset: DVector::zeros(d),
        sym_offset: DMatrix::zeros(d, 0),
        fusion_omega: fusion,
        is_store,
        elem_bytes: 8,
        inst,
    }
}

/// `C[i,j] = A[i]`: the A load ignores `j`, so it hoists out of the inner
/// loop into the `i` body; the store stays inside.
#[test]
fn loop_invariant_load_hoists() {
    let nest = AffineLoop::rect(&[8, 8]);
    let insts = vec![
        Inst::Load { mem: 0 },
        Inst::Store { mem: 1, value: 0 },
    ];
    let memory = vec![
        access(1, &nest, dmatrix![1i64, 0], vec![0, 0, 0], false, 0),
        access(0, &nest, dmatrix![1i64, 0; 0, 1], vec![0, 0, 1], true, 1),
    ];
    let mut lb = LoopBlock::new(memory, insts);
    lb.optimize().expect("schedulable");
    let lts = LoopTreeSchedule::init(&lb);
    // root -> i-loop -> j-loop
    assert_eq!(lts.trees.len(), 3);
    let i_tree = lts.trees[0].sub[0].tree;
    let j_tree = lts.trees[i_tree].sub[0].tree;
    assert_eq!(lts.trees[j_tree].depth, 2);
    let load = lts.mem_addr[0].unwrap();
    let store = lts.mem_addr[1].unwrap();
    assert_eq!(lts.trees[i_tree].header, vec![load]);
    assert_eq!(lts.trees[j_tree].header, vec![store]);
    assert_eq!(lts.addrs[load].tree, i_tree);
}

/// GEMM materialization: identity schedule means identity rotation, and the
/// innermost block keeps the register chain order with the store last.
#[test]
fn gemm_tree_and_rotation() {
    let nest = AffineLoop::rect(&[8, 8, 8]);
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
        access(1, &nest, dmatrix![1i64, 0, 0; 0, 0, 1], vec![0, 0, 0, 0], false, 0),
        access(2, &nest, dmatrix![0i64, 0, 1; 0, 1, 0], vec![0, 0, 0, 1], false, 1),
        access(0, &nest, dmatrix![1i64, 0, 0; 0, 1, 0], vec![0, 0, 0, 2], false, 2),
        access(0, &nest, dmatrix![1i64, 0, 0; 0, 1, 0], vec![0, 0, 0, 3], true, 4),
    ];
    let mut lb = LoopBlock::new(memory, insts);
    lb.optimize().expect("schedulable");
    let lts = LoopTreeSchedule::init(&lb);
    // Chain root -> m -> n -> k.
    let m = lts.trees[0].sub[0].tree;
    let n = lts.trees[m].sub[0].tree;
    let k = lts.trees[n].sub[0].tree;
    assert_eq!(lts.trees[k].depth, 3);
    // Identity rotation preserves the index matrices exactly.
    for mem in 0..4 {
        let a = &lts.addrs[lts.mem_addr[mem].unwrap()];
        assert_eq!(a.denom, 1);
        assert_eq!(a.index, lb.memory[mem].index);
        assert_eq!(a.offset, DVector::zeros(2));
    }
    // C's load does not depend on k, but the carried reuse pair keeps it at
    // the innermost level with the store after it.
    // Register-chain parents come first: every load precedes the store.
    let order = lts.block_order(k);
    let store = lts.mem_addr[3].unwrap();
    assert_eq!(*order.last().unwrap(), store);
    assert_eq!(order.len(), 4);
    for mem in 0..3 {
        let a = lts.mem_addr[mem].unwrap();
        assert!(order.iter().position(|&x| x == a).unwrap() < 3);
    }
    // The rotated loop nest kept its trip counts.
    let nest = lts.trees[k].nest.as_ref().unwrap();
    assert_eq!(nest.trip_count(2).count, 8);
}
