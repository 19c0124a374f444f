//! Secondary-key types and their total-order/NaN-canonicalization rules.
//!
//! Secondary indexes exist for `{u64, u128, u256, f64, f128}`,
//! ordered by IEEE-754 total order for floats (NaN is the largest value, and
//! every NaN bit pattern collapses to one canonical representation on
//! store). Integers already have a total order, so `u64`/`u128`/`U256`
//! implement the marker trait directly; the two float types get dedicated
//! wrappers because `f64`/`f128` do not implement `Ord` in the standard
//! library (NaN has no natural place in a total order without this
//! normalization).

use primitive_types::U256;

/// Marker for types usable as a secondary-index key: totally ordered, and
/// with a `canonicalize` step applied once on store (a no-op for integers).
pub trait SecondaryKey: Copy + Ord + Eq + std::fmt::Debug + Send + Sync + 'static {
    fn canonicalize(self) -> Self {
        self
    }
}

impl SecondaryKey for u64 {}
impl SecondaryKey for u128 {}
impl SecondaryKey for U256 {}

/// `f64` wrapper with IEEE-754 total order and a single canonical NaN.
///
/// Uses the same bit-flipping technique as the standard library's
/// `f64::total_cmp` (stable since Rust 1.62): flip the sign bit for
/// non-negative numbers and flip every bit for negative numbers, which
/// turns IEEE-754's partial order into a correct total order over the
/// reinterpreted integer bits, with all NaNs sorting as the largest value.
#[derive(Debug, Clone, Copy)]
pub struct TotalOrdF64(pub f64);

impl TotalOrdF64 {
    /// Canonical bit pattern used for every NaN, so two different NaN
    /// payloads that both get stored compare equal.
    const CANONICAL_NAN: f64 = f64::NAN;

    fn key_bits(self) -> i64 {
        let bits = self.0.to_bits() as i64;
        bits ^ (((bits >> 63) as u64) >> 1) as i64
    }
}

impl SecondaryKey for TotalOrdF64 {
    fn canonicalize(self) -> Self {
        if self.0.is_nan() {
            TotalOrdF64(Self::CANONICAL_NAN)
        } else {
            self
        }
    }
}

impl PartialEq for TotalOrdF64 {
    fn eq(&self, other: &Self) -> bool {
        self.key_bits() == other.key_bits()
    }
}
impl Eq for TotalOrdF64 {}

impl PartialOrd for TotalOrdF64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalOrdF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key_bits().cmp(&other.key_bits())
    }
}

/// Storage-only binary128 value: no arithmetic is implemented (this crate
/// never computes with secondary keys, only orders and round-trips them), so
/// the raw IEEE-754 binary128 bit pattern (1 sign + 15 exponent + 112
/// mantissa bits) is kept in a `u128` and ordered with the same
/// total-order transform as [`TotalOrdF64`], generalized to 128 bits. No
/// crate in the dependency graph provides a binary128 type; EOSIO-originated
/// hosts leave single-vs-multiple NaN bit pattern handling underspecified,
/// resolved here by normalizing every NaN bit pattern to one canonical value.
#[derive(Debug, Clone, Copy)]
pub struct Float128 {
    bits: u128,
}

impl Float128 {
    const SIGN_MASK: u128 = 1 << 127;
    const EXPONENT_MASK: u128 = 0x7fff << 112;
    const MANTISSA_MASK: u128 = (1 << 112) - 1;
    /// Canonical quiet-NaN bit pattern: sign 0, exponent all-ones, mantissa's
    /// top bit set (the conventional "quiet" NaN encoding).
    const CANONICAL_NAN_BITS: u128 = Self::EXPONENT_MASK | (1 << 111);

    pub fn from_bits(bits: u128) -> Self {
        Self { bits }
    }

    pub fn to_bits(self) -> u128 {
        self.bits
    }

    fn is_nan(self) -> bool {
        (self.bits & Self::EXPONENT_MASK) == Self::EXPONENT_MASK
            && (self.bits & Self::MANTISSA_MASK) != 0
    }

    fn key_bits(self) -> i128 {
        let bits = self.bits as i128;
        bits ^ (((bits >> 127) as u128) >> 1) as i128
    }
}

impl SecondaryKey for Float128 {
    fn canonicalize(self) -> Self {
        if self.is_nan() {
            Float128::from_bits(Self::CANONICAL_NAN_BITS)
        } else {
            self
        }
    }
}

impl PartialEq for Float128 {
    fn eq(&self, other: &Self) -> bool {
        self.key_bits() == other.key_bits()
    }
}
impl Eq for Float128 {}

impl PartialOrd for Float128 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Float128 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key_bits().cmp(&other.key_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_order_matches_numeric_order_for_non_nan() {
        let values = [-1.0, -0.0, 0.0, 1.0, f64::NEG_INFINITY, f64::INFINITY];
        let mut sorted: Vec<TotalOrdF64> = values.iter().map(|&v| TotalOrdF64(v)).collect();
        sorted.sort();
        let sorted_f64: Vec<f64> = sorted.iter().map(|t| t.0).collect();
        assert_eq!(
            sorted_f64,
            vec![f64::NEG_INFINITY, -0.0, 0.0, 1.0, f64::INFINITY]
        );
    }

    #[test]
    fn nan_sorts_last_and_is_canonicalized() {
        let a = TotalOrdF64(f64::NAN).canonicalize();
        let b = TotalOrdF64(-f64::NAN).canonicalize();
        assert_eq!(a, b);
        assert!(a > TotalOrdF64(f64::INFINITY));
    }

    #[test]
    fn negative_zero_orders_before_positive_zero() {
        assert!(TotalOrdF64(-0.0) < TotalOrdF64(0.0));
    }

    #[test]
    fn seed_case_5_float_ordering() {
        let mut values = vec![1.0, -0.0, 0.0, f64::NAN, f64::NEG_INFINITY, f64::INFINITY]
            .into_iter()
            .map(|v| TotalOrdF64(v).canonicalize())
            .collect::<Vec<_>>();
        values.sort();
        let as_f64: Vec<f64> = values.iter().map(|v| v.0).collect();
        assert_eq!(as_f64[0], f64::NEG_INFINITY);
        assert_eq!(as_f64[1].to_bits(), (-0.0f64).to_bits());
        assert_eq!(as_f64[2].to_bits(), (0.0f64).to_bits());
        assert_eq!(as_f64[3], 1.0);
        assert_eq!(as_f64[4], f64::INFINITY);
        assert!(as_f64[5].is_nan());
    }

    #[test]
    fn float128_canonicalizes_any_nan_bit_pattern() {
        let nan_a = Float128::from_bits(Float128::EXPONENT_MASK | 1).canonicalize();
        let nan_b = Float128::from_bits(Float128::EXPONENT_MASK | (1 << 50)).canonicalize();
        assert_eq!(nan_a, nan_b);
    }

    #[test]
    fn float128_orders_negative_before_positive() {
        let neg_one = Float128::from_bits(Float128::SIGN_MASK | (0x3fffu128 << 112));
        let pos_one = Float128::from_bits(0x3fffu128 << 112);
        assert!(neg_one < pos_one);
    }
}
