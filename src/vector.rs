//! Dense vector algebra over `Z_F` and over the reals.
//!
//! Field vectors are plain `Vec<i64>` of canonical representatives.  Every
//! binary operation checks operand lengths and fails with
//! [`P4pError::DimensionMismatch`] instead of truncating.

use rand::Rng;

use crate::error::{P4pError, P4pResult};
use crate::field::{canonical_mod_wide, random_field_element_u64, random_residue_u64, Field};

/// Ordered, fixed-length sequence of canonical field elements.
pub type FieldVector = Vec<i64>;

/// Half-width of the integer window used by [`rand_vector`] for a target norm.
const NORM_SAMPLING_WINDOW: i64 = 10_000;

fn ensure_same_len(expected: usize, actual: usize) -> P4pResult<()> {
    if expected != actual {
        return Err(P4pError::dimension(expected, actual));
    }
    Ok(())
}

/// Inner product accumulated in 128 bits, without modular reduction.
pub fn inner_product(v1: &[i64], v2: &[i64]) -> P4pResult<i128> {
    ensure_same_len(v1.len(), v2.len())?;
    Ok(v1
        .iter()
        .zip(v2)
        .map(|(&a, &b)| i128::from(a) * i128::from(b))
        .sum())
}

/// Inner product reduced to a canonical element of `Z_f`.
///
/// Each product is reduced before accumulation, so no dimension can overflow.
pub fn inner_product_mod(v1: &[i64], v2: &[i64], f: i64) -> P4pResult<i64> {
    ensure_same_len(v1.len(), v2.len())?;
    let field = Field::new(f)?;
    let acc: i128 = v1
        .iter()
        .zip(v2)
        .map(|(&a, &b)| i128::from(field.mul(a, b)))
        .sum();
    Ok(canonical_mod_wide(acc, f))
}

/// Real-valued inner product.
pub fn inner_product_real(v1: &[f64], v2: &[f64]) -> P4pResult<f64> {
    ensure_same_len(v1.len(), v2.len())?;
    Ok(v1.iter().zip(v2).map(|(a, b)| a * b).sum())
}

/// Computes `y = a*x + y` in `Z_f`.
pub fn laxpy(a: i64, x: &[i64], y: &mut [i64], f: i64) -> P4pResult<()> {
    ensure_same_len(y.len(), x.len())?;
    let field = Field::new(f)?;
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi = field.add(field.mul(a, xi), *yi);
    }
    Ok(())
}

/// Computes `y = a*x + y` over the reals.
pub fn laxpy_real(a: f64, x: &[f64], y: &mut [f64]) -> P4pResult<()> {
    ensure_same_len(y.len(), x.len())?;
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi += a * xi;
    }
    Ok(())
}

/// Writes the canonical sum `v1 + v2` into `out`.
pub fn vector_add(v1: &[i64], v2: &[i64], out: &mut [i64], f: i64) -> P4pResult<()> {
    let m = out.len();
    ensure_same_len(m, v1.len())?;
    ensure_same_len(m, v2.len())?;
    let field = Field::new(f)?;
    for j in 0..m {
        out[j] = field.add(v1[j], v2[j]);
    }
    Ok(())
}

/// Writes the canonical sum `v1 + v2 + v3` into `out`.
pub fn vector_three_add(
    v1: &[i64],
    v2: &[i64],
    v3: &[i64],
    out: &mut [i64],
    f: i64,
) -> P4pResult<()> {
    let m = out.len();
    ensure_same_len(m, v1.len())?;
    ensure_same_len(m, v2.len())?;
    ensure_same_len(m, v3.len())?;
    Field::new(f)?;
    for j in 0..m {
        let s = i128::from(v1[j]) + i128::from(v2[j]) + i128::from(v3[j]);
        out[j] = canonical_mod_wide(s, f);
    }
    Ok(())
}

/// Returns a canonical vector whose coordinates are uniform over all of `Z_f`.
pub fn uniform_vector(m: usize, f: i64) -> P4pResult<FieldVector> {
    let field = Field::new(f)?;
    (0..m)
        .map(|_| Ok(field.reduce(random_residue_u64(f as u64)? as i64)))
        .collect()
}

/// Generates a random `m`-dimensional vector.
///
/// With `l2 <= 0` each coordinate is an independent [`random_field_element_u64`]
/// shifted by `-floor(F/2)`.  With `l2 > 0` coordinates are drawn from the
/// window `[-10000, 10000]` and scaled so that the L2-norm equals `l2`, each
/// coordinate rounded to the nearest integer (ties away from zero).  Sampling
/// from the whole field would make the scale factor vanish.
pub fn rand_vector(m: usize, f: i64, l2: f64) -> P4pResult<FieldVector> {
    let field = Field::new(f)?;
    if l2 <= 0.0 {
        let half = f / 2;
        return (0..m)
            .map(|_| Ok(random_field_element_u64(f as u64)? as i64 - half))
            .collect();
    }
    if m == 0 {
        return Ok(Vec::new());
    }
    let mut rng = rand::thread_rng();
    loop {
        let raw: Vec<i64> = (0..m)
            .map(|_| rng.gen_range(-NORM_SAMPLING_WINDOW..=NORM_SAMPLING_WINDOW))
            .collect();
        let norm = l2_norm(&raw);
        if norm == 0.0 {
            continue;
        }
        let scale = l2 / norm;
        return Ok(raw
            .iter()
            .map(|&x| field.reduce((x as f64 * scale).round() as i64))
            .collect());
    }
}

/// Euclidean norm of an integer vector.
pub fn l2_norm(v: &[i64]) -> f64 {
    v.iter()
        .map(|&x| {
            let x = x as f64;
            x * x
        })
        .sum::<f64>()
        .sqrt()
}

/// Smallest element, or `None` for an empty slice.
pub fn min<T: PartialOrd + Copy>(data: &[T]) -> Option<T> {
    data.iter()
        .copied()
        .fold(None, |acc, x| match acc {
            Some(m) if m <= x => Some(m),
            _ => Some(x),
        })
}

/// Largest element, or `None` for an empty slice.
pub fn max<T: PartialOrd + Copy>(data: &[T]) -> Option<T> {
    data.iter()
        .copied()
        .fold(None, |acc, x| match acc {
            Some(m) if m >= x => Some(m),
            _ => Some(x),
        })
}

/// Largest element over all rows of a matrix.
pub fn max_matrix<T: PartialOrd + Copy>(data: &[Vec<T>]) -> Option<T> {
    let row_maxima: Vec<T> = data.iter().filter_map(|row| max(row)).collect();
    max(&row_maxima)
}

/// Smallest element over all rows of a matrix.
pub fn min_matrix<T: PartialOrd + Copy>(data: &[Vec<T>]) -> Option<T> {
    let row_minima: Vec<T> = data.iter().filter_map(|row| min(row)).collect();
    min(&row_minima)
}

/// Largest absolute value; `0.0` for an empty slice.
pub fn max_abs(data: &[f64]) -> f64 {
    data.iter().fold(0.0, |acc: f64, x| acc.max(x.abs()))
}

/// Largest absolute value of an integer slice; `0` for an empty slice.
pub fn max_abs_i64(data: &[i64]) -> u64 {
    data.iter().map(|x| x.unsigned_abs()).max().unwrap_or(0)
}

/// Largest absolute value over all rows of a real matrix.
pub fn max_abs_matrix(data: &[Vec<f64>]) -> f64 {
    data.iter().fold(0.0, |acc: f64, row| acc.max(max_abs(row)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const F: i64 = 65537;

    #[test]
    fn inner_products() {
        assert_eq!(inner_product(&[1, 2, 3], &[4, -5, 6]).unwrap(), 12);
        assert_eq!(inner_product_mod(&[32768, 1], &[2, 0], F).unwrap(), -1);
        assert_eq!(inner_product_real(&[0.5, 2.0], &[2.0, 0.25]).unwrap(), 1.5);
        let big = [i64::MAX, i64::MAX];
        assert_eq!(
            inner_product(&big, &big).unwrap(),
            2 * i128::from(i64::MAX) * i128::from(i64::MAX)
        );
    }

    #[test]
    fn laxpy_updates_in_place() {
        let mut y = vec![1, 2, 3];
        laxpy(2, &[10, 20, 32767], &mut y, F).unwrap();
        assert_eq!(y, vec![21, 42, canonical_mod_wide(65537, F)]);
        let mut yr = vec![1.0, 1.0];
        laxpy_real(0.5, &[2.0, 4.0], &mut yr).unwrap();
        assert_eq!(yr, vec![2.0, 3.0]);
        assert!(laxpy(1, &[1], &mut y, F).is_err());
        assert!(laxpy_real(1.0, &[1.0], &mut yr).is_err());
    }

    #[test]
    fn additions_reduce() {
        let mut out = vec![0; 2];
        vector_add(&[32768, -5], &[1, 5], &mut out, F).unwrap();
        assert_eq!(out, vec![-32768, 0]);
        vector_three_add(&[32768, 1], &[32768, 1], &[32768, 1], &mut out, F).unwrap();
        assert_eq!(out, vec![canonical_mod_wide(3 * 32768, F), 3]);
    }

    #[test]
    fn rand_vector_hits_target_norm() {
        for _ in 0..20 {
            let v = rand_vector(16, 1 << 40, 500.0).unwrap();
            // Rounding moves each coordinate by at most 1/2.
            assert!((l2_norm(&v) - 500.0).abs() <= 2.0);
        }
    }

    #[test]
    fn rand_vector_without_norm_stays_in_field() {
        let field = Field::new(101).unwrap();
        let v = rand_vector(1000, 101, 0.0).unwrap();
        assert!(v.iter().all(|&x| field.contains(x)));
        let u = uniform_vector(1000, 101).unwrap();
        assert!(u.iter().all(|&x| field.contains(x)));
        assert!(rand_vector(3, 0, 1.0).is_err());
    }

    #[test]
    fn reductions() {
        assert_eq!(min(&[3.0, -1.0, 2.0]), Some(-1.0));
        assert_eq!(max(&[3, -1, 2]), Some(3));
        assert_eq!(max::<f64>(&[]), None);
        assert_eq!(max(&[-3.0, -1.0]), Some(-1.0));
        assert_eq!(max_matrix(&[vec![1, 9], vec![], vec![4]]), Some(9));
        assert_eq!(min_matrix(&[vec![1, 9], vec![-4]]), Some(-4));
        assert_eq!(max_abs(&[1.0, -7.5, 3.0]), 7.5);
        assert_eq!(max_abs(&[]), 0.0);
        assert_eq!(max_abs_i64(&[i64::MIN, 3]), 1u64 << 63);
        assert_eq!(max_abs_matrix(&[vec![1.0], vec![-2.0, 0.5]]), 2.0);
    }

    proptest! {
        #[test]
        fn mismatched_lengths_are_rejected(a in 0usize..12, b in 0usize..12) {
            prop_assume!(a != b);
            let v1 = vec![1i64; a];
            let v2 = vec![1i64; b];
            let mut out = vec![0i64; a];
            prop_assert!(
                matches!(inner_product(&v1, &v2), Err(P4pError::DimensionMismatch { .. })),
                "inner_product accepted lengths {} and {}", a, b
            );
            prop_assert!(
                matches!(vector_add(&v1, &v2, &mut out, F), Err(P4pError::DimensionMismatch { .. })),
                "vector_add accepted lengths {} and {}", a, b
            );
            prop_assert!(
                matches!(
                    vector_three_add(&v1, &v1, &v2, &mut out, F),
                    Err(P4pError::DimensionMismatch { .. })
                ),
                "vector_three_add accepted lengths {} and {}", a, b
            );
        }

        #[test]
        fn accumulation_order_does_not_matter(
            shares in proptest::collection::vec(proptest::collection::vec(-32768i64..=32768, 4), 1..8),
            seed in any::<u64>(),
        ) {
            let fold = |order: &[Vec<i64>]| {
                let mut sum = vec![0i64; 4];
                for share in order {
                    let prev = sum.clone();
                    vector_add(&prev, share, &mut sum, F).unwrap();
                }
                sum
            };
            let mut permuted = shares.clone();
            let len = permuted.len();
            permuted.rotate_left((seed as usize) % len);
            permuted.reverse();
            prop_assert_eq!(fold(&shares), fold(&permuted));
        }
    }
}
