//! Exact rational scalar for the simplex tableau.
//!
//! `i128` components keep the fraction-free pivoting of small scheduling LPs
//! comfortably inside the representable range; values extracted into
//! schedules are small and converted back to `i64`.

use std::cmp::Ordering;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rat {
    num: i128,
    // invariant: den > 0, gcd(|num|, den) == 1
    den: i128,
}

fn gcd128(mut a: i128, mut b: i128) -> i128 {
    a = a.abs();
    b = b.abs();
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl Rat {
    pub const ZERO: Rat = Rat { num: 0, den: 1 };
    pub const ONE: Rat = Rat { num: 1, den: 1 };

    #[inline]
    pub fn new(num: i128, den: i128) -> Rat {
        debug_assert!(den != 0, "zero denominator");
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
        let g = gcd128(num, den);
        if g <= 1 {
            Rat { num, den }
        } else {
            Rat {
                num: num / g,
                den: den / g,
            }
        }
    }
    #[inline]
    pub fn int(x: i64) -> Rat {
        Rat {
            num: x as i128,
            den: 1,
        }
    }
    #[inline]
    pub fn numer(self) -> i128 {
        self.num
    }
    #[inline]
    pub fn denom(self) -> i128 {
        self.den
    }
    #[inline]
    pub fn numer_i64(self) -> i64 {
        debug_assert!(i64::try_from(self.num).is_ok(), "rational out of i64 range");
        self.num as i64
    }
    #[inline]
    pub fn denom_i64(self) -> i64 {
        debug_assert!(i64::try_from(self.den).is_ok(), "rational out of i64 range");
        self.den as i64
    }
    #[inline]
    pub fn is_zero(self) -> bool {
        self.num == 0
    }
    #[inline]
    pub fn is_negative(self) -> bool {
        self.num < 0
    }
    #[inline]
    pub fn is_positive(self) -> bool {
        self.num > 0
    }
    #[inline]
    pub fn is_integer(self) -> bool {
        self.den == 1
    }
    #[inline]
    pub fn recip(self) -> Rat {
        debug_assert!(self.num != 0);
        Rat::new(self.den, self.num)
    }
}

impl From<i64> for Rat {
    fn from(x: i64) -> Rat {
        Rat::int(x)
    }
}

impl Add for Rat {
    type Output = Rat;
    fn add(self, o: Rat) -> Rat {
        Rat::new(self.num * o.den + o.num * self.den, self.den * o.den)
    }
}
impl Sub for Rat {
    type Output = Rat;
    fn sub(self, o: Rat) -> Rat {
        Rat::new(self.num * o.den - o.num * self.den, self.den * o.den)
    }
}
impl Mul for Rat {
    type Output = Rat;
    fn mul(self, o: Rat) -> Rat {
        Rat::new(self.num * o.num, self.den * o.den)
    }
}
impl Div for Rat {
    type Output = Rat;
    fn div(self, o: Rat) -> Rat {
        debug_assert!(!o.is_zero());
        Rat::new(self.num * o.den, self.den * o.num)
    }
}
impl Neg for Rat {
    type Output = Rat;
    fn neg(self) -> Rat {
        Rat {
            num: -self.num,
            den: self.den,
        }
    }
}
impl AddAssign for Rat {
    fn add_assign(&mut self, o: Rat) {
        *self = *self + o;
    }
}
impl SubAssign for Rat {
    fn sub_assign(&mut self, o: Rat) {
        *self = *self - o;
    }
}

impl PartialOrd for Rat {
    fn partial_cmp(&self, o: &Rat) -> Option<Ordering> {
        Some(self.cmp(o))
    }
}
impl Ord for Rat {
    fn cmp(&self, o: &Rat) -> Ordering {
        // denominators are positive, so cross multiplication preserves order
        (self.num * o.den).cmp(&(o.num * self.den))
    }
}
