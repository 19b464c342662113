//! Deterministic random number generation for synthetic applications.
//!
//! RULE: sample generation never calls a platform RNG. Every stream is
//! seeded from (seed XOR stream index), so the same seed always yields the
//! same applications and adding a stream never disturbs existing ones.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

pub struct SampleRng {
    inner: Pcg64Mcg,
}

impl SampleRng {
    pub fn new(seed: u64, stream: u64) -> Self {
        let derived_seed = seed ^ (stream.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self { inner: Pcg64Mcg::seed_from_u64(derived_seed) }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll a u64 in [0, n).
    pub fn below(&mut self, n: u64) -> u64 {
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }

    /// Uniform float in [lo, hi).
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    /// Standard normal via Box-Muller.
    pub fn normal(&mut self, mean: f64, std: f64) -> f64 {
        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std * z
    }

    /// Pick an item with probability proportional to its weight.
    pub fn weighted<'a, T>(&mut self, items: &'a [(T, f64)]) -> &'a T {
        assert!(!items.is_empty(), "weighted pick from empty slice");
        let total: f64 = items.iter().map(|(_, w)| w).sum();
        let mut roll = self.next_f64() * total;
        for (item, weight) in items {
            if roll < *weight {
                return item;
            }
            roll -= weight;
        }
        &items[items.len() - 1].0
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        assert!(!items.is_empty(), "pick from empty slice");
        &items[self.below(items.len() as u64) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = SampleRng::new(42, 1);
        let mut b = SampleRng::new(42, 1);
        for _ in 0..100 {
            assert_eq!(a.next_f64().to_bits(), b.next_f64().to_bits());
        }
    }

    #[test]
    fn streams_differ() {
        let mut a = SampleRng::new(42, 1);
        let mut b = SampleRng::new(42, 2);
        let same = (0..20).filter(|_| a.below(1000) == b.below(1000)).count();
        assert!(same < 5);
    }

    #[test]
    fn floats_stay_in_unit_interval() {
        let mut rng = SampleRng::new(7, 0);
        for _ in 0..10_000 {
            let x = rng.next_f64();
            assert!((0.0..1.0).contains(&x));
        }
    }
}
