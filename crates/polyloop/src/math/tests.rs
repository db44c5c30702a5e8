use super::*;
use nalgebra::{dmatrix, DMatrix};

#[test]
fn rank_and_null_space() {
    let m = dmatrix![1i64, 0; 0, 1; 1, 1];
    assert_eq!(rank(&m), 2);
    let n = null_space(&m);
    // One direction: rows 0 + rows 1 - row 2 = 0.
    assert_eq!(n.nrows(), 1);
    let v = [n[(0, 0)], n[(0, 1)], n[(0, 2)]];
    assert_eq!(
        [
            v[0] * 1 + v[1] * 0 + v[2] * 1,
            v[0] * 0 + v[1] * 1 + v[2] * 1
        ],
        [0, 0]
    );

    let full = dmatrix![2i64, 0; 0, 3];
    assert_eq!(null_space(&full).nrows(), 0);
}

#[test]
fn scaled_inverse_is_exact() {
    let m = dmatrix![2i64, 1; 1, 1];
    let (inv, s) = scaled_inv(&m).unwrap();
    let prod = &m * &inv;
    assert_eq!(prod, DMatrix::identity(2, 2) * s);

    let perm = dmatrix![0i64, 1, 0; 0, 0, 1; 1, 0, 0];
    let (pinv, ps) = scaled_inv(&perm).unwrap();
    assert_eq!(ps, 1);
    assert_eq!(&perm * &pinv, DMatrix::identity(3, 3));

    let singular = dmatrix![1i64, 2; 2, 4];
    assert!(scaled_inv(&singular).is_none());
}

#[test]
fn simplex_feasibility() {
    // x0 + x1 == 3, x0 - x1 == 1 -> x = (2, 1).
    let feasible = Simplex::new(dmatrix![3i64, 1, 1; 1, 1, -1]);
    assert!(feasible.feasible());
    // x0 + x1 == -1 with x >= 0 is infeasible.
    let infeasible = Simplex::new(dmatrix![-1i64, 1, 1]);
    assert!(!infeasible.feasible());
}

#[test]
fn simplex_lex_minimize_pins_in_order() {
    // x0 + x1 == 3; minimizing x0 then x1 gives (0, 3).
    let s = Simplex::new(dmatrix![3i64, 1, 1]);
    let sol = s.lex_minimize(0).unwrap();
    assert_eq!(sol[0], Rat::ZERO);
    assert_eq!(sol[1], Rat::int(3));

    // x0 + x1 == 3, x0 >= 1 (as x0 - slack == 1): min x0 = 1, then x1 = 2.
    let s = Simplex::new(dmatrix![3i64, 1, 1, 0; 1, 1, 0, -1]);
    let sol = s.lex_minimize(0).unwrap();
    assert_eq!(sol[0], Rat::ONE);
    assert_eq!(sol[1], Rat::int(2));
}

#[test]
fn simplex_fixed_variable_query() {
    // lambda0 - lambda1 == x, lambdas >= 0; with x fixed to 2 feasible,
    // row-restricted variants behave the same with one row.
    let s = Simplex::new(dmatrix![0i64, 1, -1, -1]);
    assert!(s.feasible_with(&[2], 2, 1));
    assert!(s.feasible_with(&[-2], 2, 1));
    // lambda0 == x - 1 with lambda0 >= 0 and x = 0 is infeasible.
    let t = Simplex::new(dmatrix![-1i64, 1, -1]);
    assert!(!t.feasible_with(&[0], 1, 1));
}

#[test]
fn rational_ordering() {
    let a = Rat::new(1, 3);
    let b = Rat::new(1, 2);
    assert!(a < b);
    assert_eq!(a + a + a, Rat::ONE);
    assert_eq!((b * Rat::int(4)).numer_i64(), 2);
    assert_eq!(Rat::new(-2, -4), Rat::new(1, 2));
}
