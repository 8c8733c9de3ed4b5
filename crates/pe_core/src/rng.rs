//! Seeded RNG for **presentation order only** (no OS entropy in the core).

use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};

/// Newtype over ChaCha20Rng used to shuffle `presented_order`.
#[derive(Debug)]
pub struct OrderRng(ChaCha20Rng);

/// Create an order RNG from an integer seed.
pub fn order_rng_from_seed(seed: u64) -> OrderRng {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&seed.to_le_bytes());
    OrderRng(ChaCha20Rng::from_seed(bytes))
}

impl OrderRng {
    /// Uniform index in `0..n` via rejection sampling (no modulo bias).
    fn index(&mut self, n: usize) -> usize {
        debug_assert!(n > 0);
        let n_u64 = n as u64;
        let zone = u64::MAX - (u64::MAX % n_u64);
        loop {
            let x = self.0.next_u64();
            if x < zone {
                return (x % n_u64) as usize;
            }
        }
    }

    /// Fisher–Yates shuffle in place.
    pub fn shuffle<T>(&mut self, xs: &mut [T]) {
        for i in (1..xs.len()).rev() {
            let j = self.index(i + 1);
            xs.swap(i, j);
        }
    }
}

impl Default for OrderRng {
    fn default() -> Self {
        order_rng_from_seed(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_order() {
        let mut a: Vec<u32> = (0..16).collect();
        let mut b: Vec<u32> = (0..16).collect();
        order_rng_from_seed(7).shuffle(&mut a);
        order_rng_from_seed(7).shuffle(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut xs: Vec<u32> = (0..32).collect();
        order_rng_from_seed(42).shuffle(&mut xs);
        let mut sorted = xs.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn different_seeds_usually_differ() {
        let mut a: Vec<u32> = (0..16).collect();
        let mut b: Vec<u32> = (0..16).collect();
        order_rng_from_seed(1).shuffle(&mut a);
        order_rng_from_seed(2).shuffle(&mut b);
        assert_ne!(a, b);
    }
}
