use std::ops::Range;

use ndarray::{Array1, Axis};
use ndarray_linalg::LeastSquaresSvd;

use super::math::vandermonde;
use crate::{Error, Result};

/// How the abscissa is conditioned before the Vandermonde matrix is built
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scaling {
    /// Fit against the raw abscissa
    Unscaled,
    /// Map the data window onto `[-1, 1]` first. High degree fits over potentials in mV are
    /// badly conditioned without this.
    Scaled,
}

/// Result of a polynomial least squares fit
///
/// Coefficients are ordered from the constant term upwards and are expressed in the (possibly
/// scaled) domain, [`FitResult::evaluate`] takes care of the mapping.
#[derive(Clone, Debug)]
pub struct FitResult {
    solution: Array1<f64>,
    window: Range<f64>,
    scaling: Scaling,
}

impl FitResult {
    pub const fn solution(&self) -> &Array1<f64> {
        &self.solution
    }

    /// The abscissa interval covered by the fitted data
    pub const fn window(&self) -> &Range<f64> {
        &self.window
    }

    pub fn window_contains(&self, x: &f64) -> bool {
        *x >= self.window.start && *x <= self.window.end
    }

    fn to_domain(&self, x: f64) -> f64 {
        match self.scaling {
            Scaling::Unscaled => x,
            Scaling::Scaled => {
                let width = self.window.end - self.window.start;
                if width == 0.0 {
                    0.0
                } else {
                    2.0 * (x - self.window.start) / width - 1.0
                }
            }
        }
    }

    /// Value of the polynomial at `x`, evaluated with Horner's scheme
    pub fn evaluate_at(&self, x: f64) -> f64 {
        let x = self.to_domain(x);
        self.solution
            .iter()
            .rev()
            .fold(0.0, |acc, coeff| acc.mul_add(x, *coeff))
    }

    pub fn evaluate(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|x| self.evaluate_at(*x)).collect()
    }
}

/// Weighted polynomial least squares of `degree` through `(x, y)`
///
/// Weights multiply the squared residuals, so each row of the system is scaled by `sqrt(w)`.
///
/// # Errors
/// Returns [`Error::ComputationFailed`] if the inputs are inconsistent or there are fewer points
/// than coefficients, and propagates solver failures.
pub fn polyfit(
    x: &[f64],
    y: &[f64],
    degree: usize,
    weights: Option<&[f64]>,
    scaling: Scaling,
) -> Result<FitResult> {
    if x.len() != y.len() {
        return Err(Error::computation(format!(
            "cannot fit {} abscissa values against {} ordinates",
            x.len(),
            y.len()
        )));
    }
    if x.len() <= degree {
        return Err(Error::computation(format!(
            "a degree {degree} polynomial needs more than {} points",
            x.len()
        )));
    }
    if let Some(w) = weights {
        if w.len() != x.len() {
            return Err(Error::computation("weights do not match the data"));
        }
    }

    let start = x.iter().copied().fold(f64::INFINITY, f64::min);
    let end = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut result = FitResult {
        solution: Array1::zeros(degree + 1),
        window: Range { start, end },
        scaling,
    };

    let domain: Vec<f64> = x.iter().map(|x| result.to_domain(*x)).collect();
    let mut matrix = vandermonde(&domain, degree)?;
    let mut rhs = Array1::from_vec(y.to_vec());

    if let Some(w) = weights {
        let rows = matrix.axis_iter_mut(Axis(0)).zip(rhs.iter_mut());
        for ((mut row, target), weight) in rows.zip(w) {
            let factor = weight.max(0.0).sqrt();
            row *= factor;
            *target *= factor;
        }
    }

    let solution = matrix.least_squares(&rhs)?.solution;
    if solution.iter().any(|c| !c.is_finite()) {
        return Err(Error::computation("polynomial fit did not produce finite coefficients"));
    }
    result.solution = solution;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::{polyfit, Scaling};
    use crate::Result;

    use ndarray_rand::rand::{Rng, SeedableRng};
    use rand_isaac::Isaac64Rng;

    #[test]
    fn exact_polynomials_are_recovered() -> Result<()> {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let coeffs: [f64; 4] = [rng.gen(), rng.gen(), rng.gen(), rng.gen()];
        #[allow(clippy::cast_precision_loss)]
        let x: Vec<f64> = (0..50).map(|i| -1.0 + 0.04 * i as f64).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|x| coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c))
            .collect();

        let fit = polyfit(&x, &y, 3, None, Scaling::Unscaled)?;

        for (expected, actual) in coeffs.iter().zip(fit.solution()) {
            approx::assert_relative_eq!(expected, actual, max_relative = 1e-8);
        }
        Ok(())
    }

    #[test]
    fn scaled_fits_evaluate_in_the_original_domain() -> Result<()> {
        #[allow(clippy::cast_precision_loss)]
        let x: Vec<f64> = (0..100).map(|i| -500.0 + 10.0 * i as f64).collect();
        let y: Vec<f64> = x.iter().map(|x| 3.0 + 0.01 * x - 2e-5 * x * x).collect();

        let fit = polyfit(&x, &y, 2, None, Scaling::Scaled)?;

        for (xi, yi) in x.iter().zip(&y) {
            approx::assert_relative_eq!(fit.evaluate_at(*xi), *yi, max_relative = 1e-8);
        }
        assert!(fit.window_contains(&0.0));
        assert!(!fit.window_contains(&1000.0));
        Ok(())
    }

    #[test]
    fn zero_weights_ignore_outliers() -> Result<()> {
        let x = [0., 1., 2., 3., 4.];
        let y = [1., 3., 100., 7., 9.];
        let w = [1., 1., 0., 1., 1.];

        let fit = polyfit(&x, &y, 1, Some(&w), Scaling::Unscaled)?;

        approx::assert_relative_eq!(fit.solution()[0], 1.0, max_relative = 1e-10);
        approx::assert_relative_eq!(fit.solution()[1], 2.0, max_relative = 1e-10);
        Ok(())
    }

    #[test]
    fn underdetermined_fits_fail() {
        assert!(polyfit(&[0., 1.], &[0., 1.], 3, None, Scaling::Unscaled).is_err());
    }
}
