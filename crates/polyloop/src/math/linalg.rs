//! Integer matrix helpers: rank, null spaces, scaled inverses.
//!
//! All routines are exact. Schedules must satisfy `Phi * inv == denom * I`
//! as an integer identity, so nothing here ever rounds.

use nalgebra::DMatrix;

use super::rat::Rat;

#[inline]
pub fn gcd(mut a: i64, mut b: i64) -> i64 {
    a = a.abs();
    b = b.abs();
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

#[inline]
pub fn lcm(a: i64, b: i64) -> i64 {
    if a == 0 || b == 0 {
        0
    } else {
        (a / gcd(a, b)).abs() * b.abs()
    }
}

/// Sign of the first non-zero entry; 0 for the zero vector.
#[inline]
pub fn lex_sign(x: impl IntoIterator<Item = i64>) -> i64 {
    for a in x {
        if a != 0 {
            return if a > 0 { 1 } else { -1 };
        }
    }
    0
}

/// Divide a row through by the gcd of its entries (no-op on zero rows).
pub fn normalize_row(row: &mut [i64]) {
    let mut g = 0;
    for &x in row.iter() {
        g = gcd(g, x);
    }
    if g > 1 {
        for x in row.iter_mut() {
            *x /= g;
        }
    }
}

/// Rank by fraction-free (Bareiss) elimination on an `i128` copy.
pub fn rank(m: &DMatrix<i64>) -> usize {
    let (nr, nc) = (m.nrows(), m.ncols());
    let mut a: Vec<Vec<i128>> = (0..nr)
        .map(|i| (0..nc).map(|j| m[(i, j)] as i128).collect())
        .collect();
    let mut r = 0usize;
    let mut prev: i128 = 1;
    for c in 0..nc {
        let Some(p) = (r..nr).find(|&i| a[i][c] != 0) else {
            continue;
        };
        a.swap(r, p);
        let piv = a[r][c];
        for i in r + 1..nr {
            for j in c + 1..nc {
                a[i][j] = (a[i][j] * piv - a[i][c] * a[r][j]) / prev;
            }
            a[i][c] = 0;
        }
        prev = piv;
        r += 1;
        if r == nr {
            break;
        }
    }
    r
}

/// Integer basis (rows) of the left null space `{ n : n·A = 0 }`.
///
/// Rows are gcd-normalized. Returns a `0 x nrows(A)` matrix when A has full
/// row rank.
pub fn null_space(a: &DMatrix<i64>) -> DMatrix<i64> {
    let (nr, nc) = (a.nrows(), a.ncols());
    // Augment [A | I]; rows whose A-part eliminates to zero record a null
    // combination in the identity part.
    let mut b: Vec<Vec<i128>> = (0..nr)
        .map(|i| {
            let mut row: Vec<i128> = (0..nc).map(|j| a[(i, j)] as i128).collect();
            row.extend((0..nr).map(|j| (j == i) as i128));
            row
        })
        .collect();
    let mut r = 0usize;
    for c in 0..nc {
        let Some(p) = (r..nr).find(|&i| b[i][c] != 0) else {
            continue;
        };
        b.swap(r, p);
        let piv = b[r][c];
        for i in 0..nr {
            if i == r || b[i][c] == 0 {
                continue;
            }
            let f = b[i][c];
            for j in 0..nc + nr {
                b[i][j] = b[i][j] * piv - f * b[r][j];
            }
            reduce_row(&mut b[i]);
        }
        r += 1;
        if r == nr {
            break;
        }
    }
    let null_rows: Vec<usize> = (0..nr)
        .filter(|&i| (0..nc).all(|j| b[i][j] == 0))
        .collect();
    let mut out = DMatrix::<i64>::zeros(null_rows.len(), nr);
    for (k, &i) in null_rows.iter().enumerate() {
        let mut row: Vec<i128> = b[i][nc..].to_vec();
        reduce_row(&mut row);
        for j in 0..nr {
            debug_assert!(i64::try_from(row[j]).is_ok());
            out[(k, j)] = row[j] as i64;
        }
    }
    out
}

fn reduce_row(row: &mut [i128]) {
    let mut g: i128 = 0;
    for &x in row.iter() {
        g = gcd128(g, x);
    }
    if g > 1 {
        for x in row.iter_mut() {
            *x /= g;
        }
    }
}

fn gcd128(mut a: i128, mut b: i128) -> i128 {
    a = a.abs();
    b = b.abs();
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// `(inv, s)` with `m * inv == s * I` exactly, `s = |det(m)| / g` for the
/// smallest integer scaling `g` permits. `None` if `m` is singular.
pub fn scaled_inv(m: &DMatrix<i64>) -> Option<(DMatrix<i64>, i64)> {
    let n = m.nrows();
    debug_assert_eq!(n, m.ncols(), "scaled_inv requires a square matrix");
    // Gauss-Jordan over exact rationals; n is the loop depth (<= 15).
    let mut a: Vec<Vec<Rat>> = (0..n)
        .map(|i| {
            let mut row: Vec<Rat> = (0..n).map(|j| Rat::int(m[(i, j)])).collect();
            row.extend((0..n).map(|j| if i == j { Rat::ONE } else { Rat::ZERO }));
            row
        })
        .collect();
    for c in 0..n {
        let p = (c..n).find(|&i| !a[i][c].is_zero())?;
        a.swap(c, p);
        let piv = a[c][c];
        for j in 0..2 * n {
            a[c][j] = a[c][j] / piv;
        }
        for i in 0..n {
            if i == c || a[i][c].is_zero() {
                continue;
            }
            let f = a[i][c];
            for j in 0..2 * n {
                let s = a[c][j] * f;
                a[i][j] -= s;
            }
        }
    }
    // Clear denominators: s = lcm of all denominators in the inverse block.
    let mut s: i64 = 1;
    for row in &a {
        for x in &row[n..] {
            s = lcm(s, x.denom_i64());
        }
    }
    let mut inv = DMatrix::<i64>::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            let x = a[i][n + j] * Rat::int(s);
            debug_assert!(x.is_integer());
            inv[(i, j)] = x.numer_i64();
        }
    }
    Some((inv, s))
}
