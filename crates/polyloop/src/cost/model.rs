//! Cost accumulator and its roofline reduction.

use super::machine::CoreWidth;

/// Reciprocal-throughput counts split by port class, plus a latency floor.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Cost {
    pub load: f64,
    pub stow: f64,
    pub comp: f64,
    pub latency: f64,
}

impl Cost {
    #[inline]
    pub fn add_load(&mut self, c: f64) {
        self.load += c;
    }
    #[inline]
    pub fn add_stow(&mut self, c: f64) {
        self.stow += c;
    }
    #[inline]
    pub fn add_compute(&mut self, c: f64) {
        self.comp += c;
    }
    #[inline]
    pub fn add_load_stow(&mut self, c: f64) {
        self.load += c;
        self.stow += c;
    }
    #[inline]
    pub fn set_latency(&mut self, l: f64) {
        self.latency = l;
    }

    /// Leaky-ReLU roofline: mostly the binding resource, with a small
    /// leakage term so non-binding pressure still tilts decisions.
    pub fn reduce(&self, c: CoreWidth) -> f64 {
        const LEAKAGE: f64 = 1.0 / 8.0;
        let total = self.load + self.stow + self.comp;
        let l = self.load / c.load;
        let s = self.stow / c.stow;
        let a = self.comp / c.comp;
        let t = total / c.total;
        let mx = l.max(s).max(a).max(self.latency).max(t);
        let acc = l + s + a + self.latency + t;
        (1.0 - LEAKAGE) * mx + LEAKAGE * acc
    }
}

impl std::ops::Add for Cost {
    type Output = Cost;
    fn add(self, o: Cost) -> Cost {
        Cost {
            load: self.load + o.load,
            stow: self.stow + o.stow,
            comp: self.comp + o.comp,
            latency: self.latency.max(o.latency),
        }
    }
}
impl std::ops::AddAssign for Cost {
    fn add_assign(&mut self, o: Cost) {
        self.load += o.load;
        self.stow += o.stow;
        self.comp += o.comp;
        // latency propagates as a max along block chains
        self.latency = self.latency.max(o.latency);
    }
}
impl std::ops::Mul<f64> for Cost {
    type Output = Cost;
    fn mul(self, f: f64) -> Cost {
        Cost {
            load: self.load * f,
            stow: self.stow * f,
            comp: self.comp * f,
            latency: self.latency * f,
        }
    }
}
impl std::ops::Div<f64> for Cost {
    type Output = Cost;
    fn div(self, d: f64) -> Cost {
        self * (1.0 / d)
    }
}
