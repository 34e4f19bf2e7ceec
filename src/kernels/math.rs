use ndarray::{Array, Array1, Array2, ArrayView1, ArrayView2, LinalgScalar};
use ndarray_linalg::{Scalar, SVD};
use num_traits::Float;

use crate::Result;

/// Compute the outer product of two one-dimensional vectors of length (m x 1) and (n x 1)
///
/// The outer product is the (m x n) matrix whose elements are products of elements in the first
/// vector with those in the second.
///
/// # Examples
///
/// ```
/// use voltammetry::kernels::math::outer_product;
/// use ndarray::{arr1, arr2};
///
/// let u = arr1(&[1., 2., 3.]);
/// let v = arr1(&[4., 5., 6.]);
/// let outer_product = outer_product(u.view(), v.view()).unwrap();
///
/// let expected = arr2(&[[4., 5., 6.], [8., 10., 12.], [12., 15., 18.]]);
/// assert_eq!(outer_product, expected);
///```
pub fn outer_product<T: LinalgScalar>(u: ArrayView1<T>, v: ArrayView1<T>) -> Result<Array2<T>> {
    let u: Array2<T> = u.to_owned().into_shape((u.len(), 1))?;
    let v: Array2<T> = v.to_owned().into_shape((1, v.len()))?;

    Ok(ndarray::linalg::kron(&u, &v))
}

/// Generate the Vandermonde matrix of `degree` for observations `x`
///
/// The Vandermonde matrix is a (n x degree + 1) matrix. Each row of the matrix is a geometric
/// progression for an individual observation `x` from power `0` to `degree` inclusive.
///
/// # Panics
///
/// The generator panics in the event that `degree` cannot be converted to `i32`.
///
/// # Examples
///
/// ```
/// use voltammetry::kernels::math::vandermonde;
/// use ndarray::arr2;
///
/// let observations: Vec<f64> = vec![2., 3.];
/// let vander = vandermonde(&observations, 2).unwrap();
///
/// let expected = arr2(&[[1., 2., 4.], [1., 3., 9.]]);
/// assert_eq!(vander, expected);
/// ```
pub fn vandermonde<T: Copy + Scalar>(x: &[T], degree: usize) -> Result<Array2<T>> {
    let vals = x.iter().flat_map(|xi| {
        (0..=degree).map(|i| xi.powi(i32::try_from(i).expect("{i} doesn't fit in `i32`")))
    });

    Ok(Array::from_iter(vals).into_shape((x.len(), degree + 1))?)
}

/// Regularised pseudo-inverse `(AᵗA + λI)⁻¹Aᵗ` computed through the SVD of `a`
///
/// Singular values below `rcond · σ_max` are discarded when `lambda` is zero, which gives the
/// Moore-Penrose pseudo-inverse.
pub fn pinv(a: ArrayView2<f64>, lambda: f64) -> Result<Array2<f64>> {
    let (u, s, vt) = a.to_owned().svd(true, true)?;
    let (Some(u), Some(vt)) = (u, vt) else {
        return Err(crate::Error::computation("SVD did not return singular vectors"));
    };
    let rcond = f64::EPSILON * (a.nrows().max(a.ncols()) as f64);
    let s_max = s.iter().copied().fold(0.0_f64, f64::max);

    let rank = s.len();
    let mut inverse = Array2::<f64>::zeros((a.ncols(), a.nrows()));
    for k in 0..rank {
        let sigma = s[k];
        let factor = if lambda > 0.0 {
            sigma / sigma.mul_add(sigma, lambda)
        } else if sigma > rcond * s_max {
            1.0 / sigma
        } else {
            0.0
        };
        if factor == 0.0 {
            continue;
        }
        for i in 0..a.ncols() {
            let v_ik = vt[[k, i]] * factor;
            for j in 0..a.nrows() {
                inverse[[i, j]] += v_ik * u[[j, k]];
            }
        }
    }
    Ok(inverse)
}

/// Element-wise product of two equally shaped matrices
pub fn hadamard(a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
    a * b
}

pub fn mean<T: Float>(values: &[T]) -> T {
    let Some(count) = T::from(values.len()).filter(|_| !values.is_empty()) else {
        return T::nan();
    };
    values.iter().fold(T::zero(), |sum, v| sum + *v) / count
}

/// Sample standard deviation (n - 1 in the denominator)
pub fn standard_deviation<T: Float>(values: &[T]) -> T {
    let Some(dof) = T::from(values.len().saturating_sub(1)).filter(|d| !d.is_zero()) else {
        return T::zero();
    };
    let mean = mean(values);
    let sum_sq = values
        .iter()
        .fold(T::zero(), |sum, v| sum + (*v - mean).powi(2));
    (sum_sq / dof).sqrt()
}

/// Euclidean norm of a vector
pub fn norm(values: ArrayView1<f64>) -> f64 {
    values.dot(&values).sqrt()
}

/// Squared Pearson correlation between two equally long series
pub fn r_squared_between(a: &[f64], b: &[f64]) -> f64 {
    let ma = mean(a);
    let mb = mean(b);
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        sab += (x - ma) * (y - mb);
        saa += (x - ma).powi(2);
        sbb += (y - mb).powi(2);
    }
    if saa == 0.0 || sbb == 0.0 {
        return 0.0;
    }
    sab * sab / (saa * sbb)
}

/// Coefficient of determination of `fitted` against `observed`
pub fn coefficient_of_determination(observed: &[f64], fitted: &[f64]) -> f64 {
    let m = mean(observed);
    let ss_tot: f64 = observed.iter().map(|o| (o - m).powi(2)).sum();
    let ss_res: f64 = observed
        .iter()
        .zip(fitted)
        .map(|(o, f)| (o - f).powi(2))
        .sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Diagonal matrix from a vector
pub fn diag(values: &Array1<f64>) -> Array2<f64> {
    Array2::from_diag(values)
}
