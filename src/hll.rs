//! HyperLogLog registers for distinct-approximation indexes.
//!
//! Dense representation: 2^precision one-byte registers, merged by max.
//! Inputs are hashed with xxh3 over the packed value tuple, so the sketch is
//! insensitive to how callers built the value. The sketch is add-only;
//! deleting a record does not shrink the estimate.

use lodestone_core::StoreError;
use xxhash_rust::xxh3::xxh3_64;

/// Bias-correction constant for m >= 128 registers.
const ALPHA_LARGE: f64 = 0.7213;
const ALPHA_BIAS: f64 = 1.079;

#[derive(Debug, Clone, PartialEq)]
pub struct HyperLogLog {
    precision: u8,
    registers: Vec<u8>,
}

impl HyperLogLog {
    pub fn new(precision: u8) -> Self {
        assert!(
            (4..=18).contains(&precision),
            "precision out of supported range"
        );
        Self {
            precision,
            registers: vec![0; 1 << precision],
        }
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Observe one packed value.
    pub fn insert(&mut self, packed: &[u8]) {
        self.insert_hash(xxh3_64(packed));
    }

    fn insert_hash(&mut self, hash: u64) {
        let index = (hash >> (64 - self.precision)) as usize;
        let rest = hash << self.precision;
        // rank: leading zeros of the remaining bits, plus one; the all-zero
        // remainder saturates at the full width.
        let rank = if rest == 0 {
            65 - self.precision
        } else {
            rest.leading_zeros() as u8 + 1
        };
        if rank > self.registers[index] {
            self.registers[index] = rank;
        }
    }

    /// Merge another sketch of the same precision, register-wise max.
    pub fn merge(&mut self, other: &HyperLogLog) -> Result<(), StoreError> {
        if other.precision != self.precision {
            return Err(StoreError::decode("HLL precision mismatch on merge"));
        }
        for (mine, theirs) in self.registers.iter_mut().zip(&other.registers) {
            if *theirs > *mine {
                *mine = *theirs;
            }
        }
        Ok(())
    }

    /// Cardinality estimate with linear-counting small-range correction.
    pub fn estimate(&self) -> u64 {
        let m = self.registers.len() as f64;
        let alpha = ALPHA_LARGE / (1.0 + ALPHA_BIAS / m);

        let mut harmonic = 0.0;
        let mut zeros = 0u64;
        for &register in &self.registers {
            harmonic += 2f64.powi(-i32::from(register));
            if register == 0 {
                zeros += 1;
            }
        }

        let raw = alpha * m * m / harmonic;
        if raw <= 2.5 * m && zeros > 0 {
            (m * (m / zeros as f64).ln()).round() as u64
        } else {
            raw.round() as u64
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.registers.len());
        bytes.push(self.precision);
        bytes.extend_from_slice(&self.registers);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        let (precision, registers) = bytes
            .split_first()
            .ok_or_else(|| StoreError::decode("empty HLL value"))?;
        if !(4..=18).contains(precision) || registers.len() != 1 << *precision {
            return Err(StoreError::decode("malformed HLL value"));
        }
        Ok(Self {
            precision: *precision,
            registers: registers.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(count: u64) -> HyperLogLog {
        let mut hll = HyperLogLog::new(14);
        for i in 0..count {
            hll.insert(format!("element-{i}").as_bytes());
        }
        hll
    }

    #[test]
    fn test_empty_estimates_zero() {
        assert_eq!(HyperLogLog::new(14).estimate(), 0);
    }

    #[test]
    fn test_small_counts_near_exact() {
        // linear counting regime: tiny sets estimate within a register
        // collision or two
        for count in [1u64, 2, 10, 100] {
            let estimate = filled(count).estimate();
            let slack = 1 + count / 50;
            assert!(
                estimate.abs_diff(count) <= slack,
                "count {count} estimated as {estimate}"
            );
        }
    }

    #[test]
    fn test_duplicates_do_not_grow_estimate() {
        let mut hll = HyperLogLog::new(14);
        for _ in 0..1000 {
            hll.insert(b"same-element");
        }
        assert_eq!(hll.estimate(), 1);
    }

    #[test]
    fn test_large_count_within_error_bound() {
        let count = 50_000u64;
        let estimate = filled(count).estimate() as f64;
        let error = (estimate - count as f64).abs() / count as f64;
        // precision 14 gives ~0.8% standard error; 5% is a generous bound
        assert!(error < 0.05, "relative error {error}");
    }

    #[test]
    fn test_merge_matches_union() {
        let mut a = HyperLogLog::new(14);
        let mut b = HyperLogLog::new(14);
        for i in 0..500 {
            a.insert(format!("left-{i}").as_bytes());
            b.insert(format!("right-{i}").as_bytes());
        }
        a.merge(&b).unwrap();
        let estimate = a.estimate() as f64;
        let error = (estimate - 1000.0).abs() / 1000.0;
        assert!(error < 0.05, "relative error {error}");
    }

    #[test]
    fn test_serialization_roundtrip() {
        let hll = filled(123);
        let restored = HyperLogLog::from_bytes(&hll.to_bytes()).unwrap();
        assert_eq!(hll, restored);
    }

    #[test]
    fn test_merge_rejects_precision_mismatch() {
        let mut a = HyperLogLog::new(14);
        let b = HyperLogLog::new(12);
        assert!(a.merge(&b).is_err());
    }
}
