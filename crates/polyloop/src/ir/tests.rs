use nalgebra::{dmatrix, DMatrix, DVector};
use proptest::prelude::*;

use super::*;
use crate::math::scaled_inv;
use crate::poly::AffineLoop;

fn mem(index: DMatrix<i64>, offset: Vec<i64>) -> MemAccess {
    let nest = AffineLoop::rect(&vec![8; index.ncols()]);
    let d = index.nrows();
    MemAccess {
        array: ArrayId(0),
        loop_nest: nest,
        index,
        offset: DVector::from_vec(offset),
        sym_offset: DMatrix::zeros(d, 0),
        fusion_omega: vec![0; 3],
        is_store: true,
        elem_bytes: 8,
        inst: 0,
    }
}

#[test]
fn rotation_offset_law() {
    // offset_new == denom * offset_old - M_new * omega.
    let m = mem(dmatrix![1i64, 0; 0, 1], vec![3, -2]);
    let phi = dmatrix![1i64, 1; 0, 1];
    let (pinv, denom) = scaled_inv(&phi).unwrap();
    let omega = [2i64, 5];
    let a = Address::rotate(0, 0, &m, &pinv, denom, &omega);
    let expect = &m.offset * denom - &a.index * DVector::from_column_slice(&omega);
    assert_eq!(a.offset, expect);
    assert_eq!(&phi * &pinv, DMatrix::identity(2, 2) * denom);
}

#[test]
fn identity_rotation_is_identity() {
    let m = mem(dmatrix![1i64, 0; 0, 1], vec![0, 0]);
    let a = Address::rotate(0, 0, &m, &DMatrix::identity(2, 2), 1, &[0, 0]);
    assert_eq!(a.index, m.index);
    assert_eq!(a.offset, m.offset);
    assert_eq!(a.denom, 1);
    assert!(!a.independent_of(0) && !a.independent_of(1));
}

#[test]
fn reload_mirrors_store() {
    let m = mem(dmatrix![1i64, 0], vec![0]);
    let r = m.reload(7);
    assert!(r.is_load());
    assert_eq!(r.inst, 7);
    assert_eq!(r.index, m.index);
}

proptest! {
    /// Rotating by Phi and then by its inverse returns the original access
    /// after canonicalization.
    #[test]
    fn rotate_round_trip(a in -3i64..=3, b in -3i64..=3) {
        // Unimodular 2x2: det == 1 by construction.
        let phi = dmatrix![1i64, a; b, 1 + a * b];
        let m = mem(dmatrix![1i64, 2; 0, 1], vec![1, 4]);
        let (pinv, s) = scaled_inv(&phi).unwrap();
        let fwd = Address::rotate(0, 0, &m, &pinv, s, &[0, 0]);
        // Undo: rotate the rotated index by phi scaled back.
        let undone = Address {
            index: &fwd.index * &phi,
            denom: fwd.denom * 1,
            offset: fwd.offset.clone(),
            ..fwd.clone()
        }
        .canonicalized();
        prop_assert_eq!(&undone.index, &m.index);
        prop_assert_eq!(undone.denom, 1);
    }
}
