//! Finite field arithmetic over `Z_F` with signed canonical representatives.
//!
//! Every value produced here lies in the canonical window
//!
//! ```text
//! [-(F-1)/2, (F-1)/2]   if F is odd
//! [-F/2,      F/2 - 1]  if F is even
//! ```
//!
//! i.e. `x mod F` shifted so that it straddles zero.  The [`Field`] type wraps
//! the order and exposes addition, subtraction, multiplication and negation on
//! those representatives.  The module also hosts the field-bounded secure
//! samplers and the conversions between field integers and bounded reals.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use rand::{Rng, RngCore};

use crate::bytes::div_round_up;
use crate::error::{P4pError, P4pResult};

/// Extra random bits drawn before reducing modulo a bound.  The statistical
/// distance of the samplers to the uniform distribution is at most `2^-t`.
pub const STATISTICAL_SECURITY_BITS: u32 = 20;

/// Largest supported field order.  Keeping `F <= 2^62` means the sum of three
/// canonical elements always fits in an `i64`.
pub const MAX_FIELD_ORDER: i64 = 1 << 62;

/// Returns the representative of `x` modulo `m` in the canonical window.
///
/// The result `r` satisfies `-m <= 2r < m`.  For odd `m` the window is
/// symmetric, `[-(m-1)/2, (m-1)/2]`, rather than the `floor(m/2)`-threshold
/// form that maps `(m-1)/2` to a negative value.
///
/// # Panics
///
/// Panics if `m` is not positive.
pub fn canonical_mod(x: i64, m: i64) -> i64 {
    canonical_mod_wide(i128::from(x), m)
}

/// [`canonical_mod`] for a 128-bit input, used after wide accumulations.
///
/// # Panics
///
/// Panics if `m` is not positive.
pub fn canonical_mod_wide(x: i128, m: i64) -> i64 {
    assert!(m > 0, "modulus must be positive");
    let m = i128::from(m);
    let r = x.rem_euclid(m);
    let r = if 2 * r < m { r } else { r - m };
    r as i64
}

/// The prime-or-not field `Z_F` used for shares and accumulators.
///
/// Unlike a textbook prime field the order may be even; only addition,
/// subtraction and multiplication are needed by the aggregation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    order: i64,
}

impl Field {
    /// Creates the field of the given order.
    ///
    /// Fails with [`P4pError::InvalidParameter`] unless `0 < order <= 2^62`.
    pub fn new(order: i64) -> P4pResult<Self> {
        if order <= 0 {
            return Err(P4pError::InvalidParameter(format!(
                "field order must be positive, got {order}"
            )));
        }
        if order > MAX_FIELD_ORDER {
            return Err(P4pError::InvalidParameter(format!(
                "field order {order} exceeds 2^62"
            )));
        }
        Ok(Field { order })
    }

    /// Returns the order `F`.
    #[inline]
    pub fn order(&self) -> i64 {
        self.order
    }

    /// Smallest canonical representative.
    #[inline]
    pub fn min_element(&self) -> i64 {
        -(self.order / 2)
    }

    /// Largest canonical representative.
    #[inline]
    pub fn max_element(&self) -> i64 {
        (self.order - 1) / 2
    }

    /// Returns `true` if `x` is already a canonical representative.
    #[inline]
    pub fn contains(&self, x: i64) -> bool {
        x >= self.min_element() && x <= self.max_element()
    }

    /// Maps an arbitrary integer to its canonical representative.
    #[inline]
    pub fn reduce(&self, x: i64) -> i64 {
        canonical_mod(x, self.order)
    }

    /// Adds two field elements.
    #[inline]
    pub fn add(&self, a: i64, b: i64) -> i64 {
        canonical_mod_wide(i128::from(a) + i128::from(b), self.order)
    }

    /// Subtracts `b` from `a`.
    #[inline]
    pub fn sub(&self, a: i64, b: i64) -> i64 {
        canonical_mod_wide(i128::from(a) - i128::from(b), self.order)
    }

    /// Multiplies two field elements.
    #[inline]
    pub fn mul(&self, a: i64, b: i64) -> i64 {
        canonical_mod_wide(i128::from(a) * i128::from(b), self.order)
    }

    /// Returns the additive inverse of `a`.
    #[inline]
    pub fn neg(&self, a: i64) -> i64 {
        canonical_mod_wide(-i128::from(a), self.order)
    }
}

fn random_bits(bits: u64) -> BigUint {
    let len = div_round_up(bits as usize, 8);
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    let excess = (len * 8) as u64 - bits;
    if let Some(top) = buf.last_mut() {
        *top &= 0xFF >> excess;
    }
    BigUint::from_bytes_le(&buf)
}

/// Draws a value in `[0, bound)` whose distance to uniform is at most `2^-t`.
///
/// `bitLength(bound) + t` random bits are reduced modulo `bound`.
pub fn random_residue(bound: &BigUint) -> P4pResult<BigUint> {
    if bound.is_zero() {
        return Err(P4pError::InvalidParameter(
            "random bound must be positive".into(),
        ));
    }
    let bits = bound.bits() + u64::from(STATISTICAL_SECURITY_BITS);
    Ok(random_bits(bits) % bound)
}

/// Draws a value in `[1, bound - 1]`, resampling whenever the reduction is zero.
pub fn random_field_element(bound: &BigUint) -> P4pResult<BigUint> {
    if *bound < BigUint::from(2u8) {
        return Err(P4pError::InvalidParameter(format!(
            "random field element needs a bound of at least 2, got {bound}"
        )));
    }
    loop {
        let r = random_residue(bound)?;
        if !r.is_zero() {
            return Ok(r);
        }
    }
}

/// Word-sized [`random_residue`].
pub fn random_residue_u64(bound: u64) -> P4pResult<u64> {
    if bound == 0 {
        return Err(P4pError::InvalidParameter(
            "random bound must be positive".into(),
        ));
    }
    // At most 64 + 20 bits are needed, so a single u128 draw suffices.
    let bits = 64 - bound.leading_zeros() + STATISTICAL_SECURITY_BITS;
    let raw: u128 = rand::thread_rng().gen::<u128>() >> (128 - bits);
    (raw % u128::from(bound))
        .to_u64()
        .ok_or_else(|| P4pError::InvalidParameter("residue overflow".into()))
}

/// Word-sized [`random_field_element`].
pub fn random_field_element_u64(bound: u64) -> P4pResult<u64> {
    if bound < 2 {
        return Err(P4pError::InvalidParameter(format!(
            "random field element needs a bound of at least 2, got {bound}"
        )));
    }
    loop {
        let r = random_residue_u64(bound)?;
        if r != 0 {
            return Ok(r);
        }
    }
}

/// Converts field integers to reals in `[-R, R]` with scale `alpha = 2R/F`.
pub fn itor(data: &[i64], f: i64, r: f64) -> Vec<f64> {
    let alpha = 2.0 * r / f as f64;
    data.iter().map(|&x| x as f64 * alpha).collect()
}

/// [`itor`] applied to `data[offset..offset + len]`.
pub fn itor_range(data: &[i64], offset: usize, len: usize, f: i64, r: f64) -> P4pResult<Vec<f64>> {
    let window = checked_window(data, offset, len)?;
    Ok(itor(window, f, r))
}

/// Row-wise [`itor`].
pub fn itor_matrix(data: &[Vec<i64>], f: i64, r: f64) -> Vec<Vec<f64>> {
    data.iter().map(|row| itor(row, f, r)).collect()
}

/// Converts reals in `[-R, R]` back to field integers, rounding to nearest
/// with ties away from zero.
pub fn rtoi(data: &[f64], f: i64, r: f64) -> Vec<i64> {
    let alpha = 2.0 * r / f as f64;
    data.iter().map(|&x| (x / alpha).round() as i64).collect()
}

/// [`rtoi`] applied to `data[offset..offset + len]`.
pub fn rtoi_range(data: &[f64], offset: usize, len: usize, f: i64, r: f64) -> P4pResult<Vec<i64>> {
    let window = checked_window(data, offset, len)?;
    Ok(rtoi(window, f, r))
}

/// Row-wise [`rtoi`].
pub fn rtoi_matrix(data: &[Vec<f64>], f: i64, r: f64) -> Vec<Vec<i64>> {
    data.iter().map(|row| rtoi(row, f, r)).collect()
}

fn checked_window<T>(data: &[T], offset: usize, len: usize) -> P4pResult<&[T]> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| P4pError::InvalidParameter("range overflows usize".into()))?;
    data.get(offset..end)
        .ok_or_else(|| P4pError::dimension(end, data.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn canonical_windows() {
        let odd: Vec<i64> = (0..5).map(|x| canonical_mod(x, 5)).collect();
        assert_eq!(odd, vec![0, 1, 2, -2, -1]);
        let even: Vec<i64> = (0..4).map(|x| canonical_mod(x, 4)).collect();
        assert_eq!(even, vec![0, 1, -2, -1]);
        assert_eq!(canonical_mod(-7, 5), -2);
        assert_eq!(canonical_mod(i64::MIN, 7), canonical_mod_wide(i64::MIN as i128, 7));
        assert_eq!(canonical_mod(123, 1), 0);
    }

    #[test]
    fn field_arithmetic() {
        let field = Field::new(65537).unwrap();
        assert_eq!(field.add(32768, 1), -32768);
        assert_eq!(field.sub(-32768, 1), 32768);
        assert_eq!(field.mul(256, 256), -1);
        assert_eq!(field.neg(5), -5);
        assert_eq!(field.min_element(), -32768);
        assert_eq!(field.max_element(), 32768);
        assert!(field.contains(32768));
        assert!(!field.contains(32769));
    }

    #[test]
    fn field_order_is_validated() {
        assert!(Field::new(0).is_err());
        assert!(Field::new(-5).is_err());
        assert!(Field::new(MAX_FIELD_ORDER + 1).is_err());
        assert!(Field::new(MAX_FIELD_ORDER).is_ok());
    }

    #[test]
    fn random_field_element_avoids_zero() {
        for bound in [2u64, 3, 7, 65537] {
            for _ in 0..2_000 {
                let r = random_field_element_u64(bound).unwrap();
                assert!(r >= 1 && r < bound);
            }
        }
        let big = BigUint::from(1u8) << 200u32;
        for _ in 0..200 {
            let r = random_field_element(&big).unwrap();
            assert!(!r.is_zero() && r < big);
        }
        assert!(random_field_element_u64(1).is_err());
        assert!(random_field_element(&BigUint::from(1u8)).is_err());
    }

    #[test]
    fn random_residue_covers_small_range() {
        let mut seen = [false; 3];
        for _ in 0..500 {
            seen[random_residue_u64(3).unwrap() as usize] = true;
        }
        assert_eq!(seen, [true; 3]);
        assert!(random_residue(&BigUint::zero()).is_err());
    }

    #[test]
    fn conversion_ranges_are_checked() {
        let data = [1i64, 2, 3, 4];
        let v = itor_range(&data, 1, 2, 100, 50.0).unwrap();
        assert_eq!(v, vec![2.0, 3.0]);
        assert!(itor_range(&data, 3, 2, 100, 50.0).is_err());
        let back = rtoi_range(&[0.4, 1.5, -1.5], 0, 3, 100, 50.0).unwrap();
        assert_eq!(back, vec![0, 2, -2]);
        let m = rtoi_matrix(&itor_matrix(&[vec![7, -7]], 100, 10.0), 100, 10.0);
        assert_eq!(m, vec![vec![7, -7]]);
    }

    proptest! {
        #[test]
        fn canonical_mod_range_and_congruence(x in any::<i64>(), m in 1i64..=MAX_FIELD_ORDER) {
            let r = canonical_mod(x, m);
            prop_assert!(2 * i128::from(r) < i128::from(m));
            prop_assert!(2 * i128::from(r) >= -i128::from(m));
            prop_assert_eq!((i128::from(x) - i128::from(r)).rem_euclid(i128::from(m)), 0);
        }

        #[test]
        fn itor_rtoi_round_trip(x in -(1i64 << 40)..(1i64 << 40), r in 1.0f64..1e6) {
            let f = 1i64 << 42;
            let back = rtoi(&itor(&[x], f, r), f, r);
            prop_assert_eq!(back[0], x);
        }

        #[test]
        fn rtoi_itor_error_is_half_a_unit(y in -1000.0f64..1000.0) {
            let (f, r) = (1i64 << 20, 1000.0);
            let alpha = 2.0 * r / f as f64;
            let back = itor(&rtoi(&[y], f, r), f, r)[0];
            prop_assert!((back - y).abs() <= alpha / 2.0 + 1e-9);
        }
    }
}
