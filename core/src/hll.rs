/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! A HyperLogLog cardinality estimator, used to size each subgraph's
//! fixed-capacity hash table before it is populated.

/// A HyperLogLog sketch over 64-bit hashes, with `2^precision` registers.
#[derive(Clone, Debug)]
pub struct HyperLogLog {
    precision: u32,
    registers: Vec<u8>,
}

impl HyperLogLog {
    /// `precision` in `4..=18`; higher precision narrows the estimate at the
    /// cost of `2^precision` bytes of memory.
    pub fn new(precision: u32) -> Self {
        assert!((4..=18).contains(&precision));
        HyperLogLog {
            precision,
            registers: vec![0u8; 1usize << precision],
        }
    }

    /// Folds in one already-hashed value (e.g. a minimizer's seeded 64-bit
    /// hash).
    pub fn add_hash(&mut self, hash: u64) {
        let m = self.registers.len();
        let idx = (hash as usize) & (m - 1);
        let rest = hash >> self.precision;
        // Position of the lowest set bit among the remaining bits, 1-indexed;
        // an all-zero remainder counts as `64 - precision + 1`.
        let rho = if rest == 0 {
            (64 - self.precision + 1) as u8
        } else {
            (rest.trailing_zeros() + 1) as u8
        };
        if rho > self.registers[idx] {
            self.registers[idx] = rho;
        }
    }

    /// Merges another sketch of the same precision into this one.
    pub fn merge(&mut self, other: &HyperLogLog) {
        assert_eq!(self.precision, other.precision);
        for (a, b) in self.registers.iter_mut().zip(other.registers.iter()) {
            *a = (*a).max(*b);
        }
    }

    /// The estimated cardinality, using the standard HLL estimator with small-
    /// and large-range corrections.
    pub fn estimate(&self) -> f64 {
        let m = self.registers.len() as f64;
        let alpha_m = match self.registers.len() {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m),
        };
        let sum: f64 = self
            .registers
            .iter()
            .map(|&r| 2f64.powi(-(r as i32)))
            .sum();
        let raw = alpha_m * m * m / sum;

        let zeros = self.registers.iter().filter(|&&r| r == 0).count();
        if raw <= 2.5 * m && zeros > 0 {
            // Linear counting for the small-range correction.
            m * (m / zeros as f64).ln()
        } else {
            raw
        }
    }

    /// A capacity suggestion for a fixed-size open-addressing hash table with
    /// the given load factor, including a slack multiplier to absorb
    /// estimation error.
    pub fn suggested_capacity(&self, load_factor: f64, slack: f64) -> usize {
        let estimate = self.estimate() * slack;
        let needed = (estimate / load_factor).ceil() as usize;
        needed.max(1).next_power_of_two()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xxhash_rust::xxh3::xxh3_64;

    #[test]
    fn estimate_is_in_the_right_ballpark() {
        let mut hll = HyperLogLog::new(14);
        let n = 100_000u64;
        for i in 0..n {
            hll.add_hash(xxh3_64(&i.to_le_bytes()));
        }
        let est = hll.estimate();
        let err = (est - n as f64).abs() / n as f64;
        assert!(err < 0.1, "relative error too high: {err} (est={est})");
    }

    #[test]
    fn merging_is_equivalent_to_a_union() {
        let mut a = HyperLogLog::new(12);
        let mut b = HyperLogLog::new(12);
        for i in 0..5000u64 {
            a.add_hash(xxh3_64(&i.to_le_bytes()));
        }
        for i in 2500..7500u64 {
            b.add_hash(xxh3_64(&i.to_le_bytes()));
        }
        a.merge(&b);
        let est = a.estimate();
        assert!((est - 7500.0).abs() / 7500.0 < 0.15);
    }

    #[test]
    fn suggested_capacity_is_a_power_of_two() {
        let mut hll = HyperLogLog::new(10);
        for i in 0..1000u64 {
            hll.add_hash(xxh3_64(&i.to_le_bytes()));
        }
        let cap = hll.suggested_capacity(0.75, 1.2);
        assert!(cap.is_power_of_two());
        assert!(cap as f64 >= 1000.0 / 0.75);
    }
}
