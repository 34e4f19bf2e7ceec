//! Alternating slice-wise decomposition of three-way arrays.
//!
//! A stack of `K` matrices `R_k` (`I x J`) is modelled as `R_k ≈ X · diag(z_k) · Yᵗ` with `F`
//! shared profiles in `X` (`I x F`) and `Y` (`J x F`) and per-slice loadings `Z` (`K x F`).
//!
//! The slices are first compressed onto the dominant `F` dimensional row and column subspaces
//! (`U`, `V`), the compressed `F x F` problem `Uᵗ R_k V ≈ G · diag(z_k) · Hᵗ` is solved by
//! alternating regularised least squares, and the full size profiles are recovered as `X = U·G`,
//! `Y = V·H`.

use log::debug;
use ndarray::{s, Array1, Array2, ArrayView2, ArrayView3, Axis};
use ndarray_linalg::SVD;

use super::math::{hadamard, outer_product, pinv};
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct AsdResult {
    /// `I x F`, unit norm columns
    pub x: Array2<f64>,
    /// `J x F`, unit norm columns
    pub y: Array2<f64>,
    /// `K x F`, carries the scale of each factor
    pub z: Array2<f64>,
    /// The iteration cap was reached before the convergence criterion was met
    pub failed: bool,
    pub iterations: usize,
    /// Relative change of the residual in the last iteration
    pub convergence: f64,
}

impl AsdResult {
    pub fn rank(&self) -> usize {
        self.x.ncols()
    }

    /// `X · diag(z_k) · Yᵗ`
    ///
    /// # Errors
    /// Propagates shape errors, which cannot occur for a result produced by [`asd`].
    pub fn reconstruct_slice(&self, k: usize) -> Result<Array2<f64>> {
        let mut slice = Array2::zeros((self.x.nrows(), self.y.nrows()));
        for f in 0..self.rank() {
            slice.scaled_add(self.z[[k, f]], &outer_product(self.x.column(f), self.y.column(f))?);
        }
        Ok(slice)
    }

    /// Rank one contribution of factor `f` to slice `k`
    ///
    /// # Errors
    /// Propagates shape errors, which cannot occur for a result produced by [`asd`].
    pub fn factor_slice(&self, k: usize, f: usize) -> Result<Array2<f64>> {
        Ok(outer_product(self.x.column(f), self.y.column(f))? * self.z[[k, f]])
    }
}

/// Normalise every column of `m` to unit length with its largest magnitude element positive.
///
/// Returns the signed factors that were divided out, so that `old[:, f] = new[:, f] * scale[f]`.
/// Zero columns are left alone with a factor of one.
pub fn scale_matrix(m: &mut Array2<f64>) -> Array1<f64> {
    let mut scales = Array1::ones(m.ncols());
    for (mut column, scale) in m.axis_iter_mut(Axis(1)).zip(scales.iter_mut()) {
        let norm = column.dot(&column).sqrt();
        if norm == 0.0 || !norm.is_finite() {
            continue;
        }
        let dominant = column
            .iter()
            .copied()
            .max_by(|a, b| a.abs().total_cmp(&b.abs()))
            .unwrap_or(1.0);
        let signed = if dominant < 0.0 { -norm } else { norm };
        column /= signed;
        *scale = signed;
    }
    scales
}

fn leading_vectors(covariance: Array2<f64>, rank: usize) -> Result<Array2<f64>> {
    let (u, _, _) = covariance.svd(true, false)?;
    let u = u.ok_or_else(|| Error::computation("SVD did not return singular vectors"))?;
    Ok(u.slice(s![.., ..rank]).to_owned())
}

/// `(A + λ' I)⁻¹` with `λ' = λ · trace(A) / F`, so the penalty follows the scale of the data
fn regularised_inverse(a: &Array2<f64>, lambda: f64) -> Result<Array2<f64>> {
    #[allow(clippy::cast_precision_loss)]
    let penalty = lambda * a.diag().sum() / a.nrows() as f64;
    let mut regularised = a.clone();
    regularised.diag_mut().mapv_inplace(|d| d + penalty);
    pinv(regularised.view(), 0.0)
}

/// Per-slice loadings for fixed profiles: `z_k = ((AᵗA)∘(BᵗB))⁻¹ diag(Aᵗ S_k B)`
fn loadings<'a>(
    a: &Array2<f64>,
    b: &Array2<f64>,
    slices: impl Iterator<Item = ArrayView2<'a, f64>>,
    lambda: f64,
) -> Result<Array2<f64>> {
    let inverse = regularised_inverse(&hadamard(&a.t().dot(a), &b.t().dot(b)), lambda)?;
    let rows: Vec<Array1<f64>> = slices
        .map(|slice| inverse.dot(&a.t().dot(&slice).dot(b).diag()))
        .collect();
    let mut z = Array2::zeros((rows.len(), a.ncols()));
    for (mut row, values) in z.axis_iter_mut(Axis(0)).zip(rows) {
        row.assign(&values);
    }
    Ok(z)
}

fn residual(compressed: &[Array2<f64>], g: &Array2<f64>, h: &Array2<f64>, z: &Array2<f64>) -> f64 {
    compressed
        .iter()
        .enumerate()
        .map(|(k, c)| {
            let model = (g * &z.row(k)).dot(&h.t());
            (c - &model).mapv(|v| v * v).sum()
        })
        .sum()
}

/// Decompose `tensor` (`I x J x K`, slices along the last axis) into `rank` factors.
///
/// `lambda` weighs the ridge penalty of the alternating solves relative to the trace of each
/// normal matrix. Iteration stops when the residual changes by less than `epsilon` relative to the
/// previous iteration, or falls below `epsilon²` of the total sum of squares. Reaching
/// `max_iterations` first sets [`AsdResult::failed`].
///
/// # Errors
/// Returns [`Error::ComputationFailed`] if `rank` is zero or exceeds `min(I, J)`, the tensor is
/// empty or contains no signal, and propagates linear algebra failures.
pub fn asd(
    tensor: ArrayView3<f64>,
    rank: usize,
    lambda: f64,
    epsilon: f64,
    max_iterations: usize,
) -> Result<AsdResult> {
    let (i_dim, j_dim, k_dim) = tensor.dim();
    if i_dim == 0 || j_dim == 0 || k_dim == 0 {
        return Err(Error::computation("cannot decompose an empty array"));
    }
    if rank == 0 || rank > i_dim.min(j_dim) {
        return Err(Error::computation(format!(
            "rank {rank} is not possible for {i_dim} x {j_dim} slices"
        )));
    }
    let slices = || tensor.axis_iter(Axis(2));

    let mut row_covariance = Array2::<f64>::zeros((i_dim, i_dim));
    let mut column_covariance = Array2::<f64>::zeros((j_dim, j_dim));
    for slice in slices() {
        row_covariance += &slice.dot(&slice.t());
        column_covariance += &slice.t().dot(&slice);
    }
    if row_covariance.diag().sum() == 0.0 {
        return Err(Error::computation("the array contains no signal"));
    }
    let u = leading_vectors(row_covariance, rank)?;
    let v = leading_vectors(column_covariance, rank)?;

    let compressed: Vec<Array2<f64>> = slices().map(|slice| u.t().dot(&slice).dot(&v)).collect();
    let total: f64 = compressed.iter().map(|c| c.mapv(|v| v * v).sum()).sum();

    let mean = compressed
        .iter()
        .fold(Array2::<f64>::zeros((rank, rank)), |acc, c| acc + c);
    let (g0, _, ht0) = mean.svd(true, true)?;
    let (Some(mut g), Some(ht0)) = (g0, ht0) else {
        return Err(Error::computation("SVD did not return singular vectors"));
    };
    let mut h = ht0.t().to_owned();
    let mut z = loadings(&g, &h, compressed.iter().map(Array2::view), lambda)?;

    let mut sigma = residual(&compressed, &g, &h, &z);
    let mut convergence = f64::INFINITY;
    let mut iterations = 0;
    let mut failed = true;
    while iterations < max_iterations {
        iterations += 1;

        let mut projection = Array2::<f64>::zeros((rank, rank));
        for (k, c) in compressed.iter().enumerate() {
            projection += &(c.dot(&h) * &z.row(k));
        }
        let gram = hadamard(&h.t().dot(&h), &z.t().dot(&z));
        g = projection.dot(&regularised_inverse(&gram, lambda)?);
        let scales = scale_matrix(&mut g);
        z *= &scales;

        let mut projection = Array2::<f64>::zeros((rank, rank));
        for (k, c) in compressed.iter().enumerate() {
            projection += &(c.t().dot(&g) * &z.row(k));
        }
        let gram = hadamard(&g.t().dot(&g), &z.t().dot(&z));
        h = projection.dot(&regularised_inverse(&gram, lambda)?);
        let scales = scale_matrix(&mut h);
        z *= &scales;

        z = loadings(&g, &h, compressed.iter().map(Array2::view), lambda)?;

        let previous = sigma;
        sigma = residual(&compressed, &g, &h, &z);
        if !sigma.is_finite() {
            return Err(Error::computation("decomposition diverged"));
        }
        convergence = if previous > 0.0 {
            (previous - sigma).abs() / previous
        } else {
            0.0
        };
        if convergence < epsilon || sigma <= epsilon * epsilon * total {
            failed = false;
            break;
        }
    }
    debug!(
        "ASD of rank {rank} stopped after {iterations} iterations, relative change {convergence:e}"
    );

    let mut x = u.dot(&g);
    let mut y = v.dot(&h);
    scale_matrix(&mut x);
    scale_matrix(&mut y);
    let z = loadings(&x, &y, slices(), 0.0)?;

    let mut order: Vec<usize> = (0..rank).collect();
    let explained = z.t().dot(&z).diag().to_owned();
    order.sort_by(|a, b| explained[*b].total_cmp(&explained[*a]));

    Ok(AsdResult {
        x: x.select(Axis(1), &order),
        y: y.select(Axis(1), &order),
        z: z.select(Axis(1), &order),
        failed,
        iterations,
        convergence,
    })
}

#[cfg(test)]
mod tests {
    use super::{asd, scale_matrix};

    use ndarray::{arr2, Array, Array2, Array3};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand_isaac::Isaac64Rng;

    fn synthetic(x: &Array2<f64>, y: &Array2<f64>, z: &Array2<f64>) -> Array3<f64> {
        let (i_dim, j_dim, k_dim) = (x.nrows(), y.nrows(), z.nrows());
        let mut tensor = Array3::zeros((i_dim, j_dim, k_dim));
        for k in 0..k_dim {
            let slice = (x * &z.row(k)).dot(&y.t());
            tensor.index_axis_mut(ndarray::Axis(2), k).assign(&slice);
        }
        tensor
    }

    #[test]
    fn rank_two_arrays_are_reconstructed() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let x = Array::random_using((8, 2), Uniform::new(0.1, 1.0), &mut rng);
        let y = Array::random_using((30, 2), Uniform::new(0.1, 1.0), &mut rng);
        let z = Array::random_using((5, 2), Uniform::new(0.5, 2.0), &mut rng);
        let tensor = synthetic(&x, &y, &z);

        let result = asd(tensor.view(), 2, 0.0, 1e-8, 5000).unwrap();

        assert!(!result.failed);
        for k in 0..5 {
            let expected = tensor.index_axis(ndarray::Axis(2), k);
            let actual = result.reconstruct_slice(k).unwrap();
            let error = (&actual - &expected).mapv(|v| v * v).sum().sqrt();
            let norm = expected.mapv(|v| v * v).sum().sqrt();
            assert!(error / norm < 1e-6, "slice {k}: relative error {}", error / norm);
        }
    }

    #[test]
    fn factors_are_unit_norm_and_sorted() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let x = Array::random_using((6, 2), Uniform::new(0.1, 1.0), &mut rng);
        let y = Array::random_using((20, 2), Uniform::new(0.1, 1.0), &mut rng);
        let mut z = Array::random_using((4, 2), Uniform::new(0.5, 1.0), &mut rng);
        z.column_mut(1).mapv_inplace(|v| v * 10.0);
        let tensor = synthetic(&x, &y, &z);

        let result = asd(tensor.view(), 2, 1e-9, 1e-8, 5000).unwrap();

        for f in 0..2 {
            let x = result.x.column(f);
            approx::assert_relative_eq!(x.dot(&x), 1.0, max_relative = 1e-10);
            let y = result.y.column(f);
            approx::assert_relative_eq!(y.dot(&y), 1.0, max_relative = 1e-10);
        }
        let explained = result.z.t().dot(&result.z).diag().to_owned();
        assert!(explained[0] >= explained[1]);
    }

    #[test]
    fn impossible_ranks_are_rejected() {
        let tensor = Array3::<f64>::ones((3, 4, 2));
        assert!(asd(tensor.view(), 0, 0.0, 1e-6, 10).is_err());
        assert!(asd(tensor.view(), 4, 0.0, 1e-6, 10).is_err());
        assert!(asd(Array3::<f64>::zeros((3, 4, 2)).view(), 1, 0.0, 1e-6, 10).is_err());
    }

    #[test]
    fn iteration_cap_flags_failure() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let tensor = Array::random_using((6, 10, 4), Uniform::new(-1.0, 1.0), &mut rng);
        let result = asd(tensor.view(), 3, 0.0, 0.0, 2).unwrap();
        assert!(result.failed);
        assert_eq!(result.iterations, 2);
    }

    #[test]
    fn columns_are_scaled_with_a_positive_dominant_element() {
        let mut m = arr2(&[[3.0, 0.0], [-4.0, 0.0]]);
        let scales = scale_matrix(&mut m);
        approx::assert_relative_eq!(scales[0], -5.0);
        approx::assert_relative_eq!(scales[1], 1.0);
        approx::assert_relative_eq!(m[[1, 0]], 0.8);
    }
}
