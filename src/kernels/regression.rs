//! Straight line calibration statistics for standard addition.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::{Error, Result};

/// A value with its standard uncertainty
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub value: f64,
    pub uncertainty: f64,
}

impl Estimate {
    pub const fn from_centroid(value: f64) -> Self {
        Self {
            value,
            uncertainty: 0.0,
        }
    }

    /// Mean and sample standard deviation of repeated determinations
    pub fn from_samples(samples: &[f64]) -> Self {
        Self {
            value: super::math::mean(samples),
            uncertainty: super::math::standard_deviation(samples),
        }
    }
}

/// `y = slope * x + intercept`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    pub fn evaluate(&self, x: f64) -> f64 {
        self.slope.mul_add(x, self.intercept)
    }

    /// Where the line crosses `y = 0`
    pub fn x_intercept(&self) -> f64 {
        -self.intercept / self.slope
    }

    /// Residual standard deviation `sqrt(Σ(y - ŷ)² / (n - 2))`
    pub fn residual_standard_deviation(&self, x: &[f64], y: &[f64]) -> f64 {
        let ss: f64 = x
            .iter()
            .zip(y)
            .map(|(x, y)| (y - self.evaluate(*x)).powi(2))
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let dof = (x.len() as f64 - 2.0).max(1.0);
        (ss / dof).sqrt()
    }
}

/// Least squares line through `(x, y)` from the 2x2 normal equations
///
/// # Errors
/// Returns [`Error::ComputationFailed`] with fewer than two points, mismatched lengths or when all
/// `x` coincide.
pub fn calc_normal_equation_fit(x: &[f64], y: &[f64]) -> Result<LinearFit> {
    if x.len() != y.len() {
        return Err(Error::computation("x and y differ in length"));
    }
    if x.len() < 2 {
        return Err(Error::computation("a line needs at least two points"));
    }
    #[allow(clippy::cast_precision_loss)]
    let n = x.len() as f64;
    let sx: f64 = x.iter().sum();
    let sy: f64 = y.iter().sum();
    let sxx: f64 = x.iter().map(|x| x * x).sum();
    let sxy: f64 = x.iter().zip(y).map(|(x, y)| x * y).sum();

    let determinant = n.mul_add(sxx, -sx * sx);
    if determinant.abs() <= f64::EPSILON * n * sxx.abs().max(1.0) {
        return Err(Error::computation("all x values coincide"));
    }
    let slope = n.mul_add(sxy, -sx * sy) / determinant;
    let intercept = sxx.mul_add(sy, -sx * sxy) / determinant;
    Ok(LinearFit { slope, intercept })
}

/// Standard deviation of the concentration found by extrapolating `fit` to the x axis
///
/// Uses the standard addition form
/// `sx0 = s_r / |m| · sqrt(1/k + 1/n + (ȳ0 - ȳ)² / (m² Σ(xᵢ - x̄)²))`
/// where `k` and `ȳ0` are the number and mean response of the points without addition (`x = 0`).
///
/// # Errors
/// Returns [`Error::ComputationFailed`] without an `x = 0` point, with fewer than three points, or
/// for a zero slope.
pub fn calc_sx0(fit: &LinearFit, x: &[f64], y: &[f64]) -> Result<f64> {
    if x.len() != y.len() {
        return Err(Error::computation("x and y differ in length"));
    }
    if x.len() < 3 {
        return Err(Error::computation("sx0 needs at least three points"));
    }
    let blank: Vec<f64> = x
        .iter()
        .zip(y)
        .filter(|(x, _)| **x == 0.0)
        .map(|(_, y)| *y)
        .collect();
    if blank.is_empty() {
        return Err(Error::computation("no point without addition (x = 0) exists"));
    }
    if fit.slope == 0.0 || !fit.slope.is_finite() {
        return Err(Error::computation("calibration slope is zero"));
    }

    #[allow(clippy::cast_precision_loss)]
    let (n, k) = (x.len() as f64, blank.len() as f64);
    let x_mean = x.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;
    let y0_mean = blank.iter().sum::<f64>() / k;
    let sxx: f64 = x.iter().map(|x| (x - x_mean).powi(2)).sum();

    let s_r = fit.residual_standard_deviation(x, y);
    let m = fit.slope;
    let sx0 = s_r / m.abs()
        * ((y0_mean - y_mean).powi(2) / (m * m * sxx) + 1.0 / k + 1.0 / n).sqrt();
    Ok(sx0)
}

/// Half width of the two sided confidence interval of a standard addition result
///
/// # Errors
/// Returns [`Error::ComputationFailed`] with fewer than three points or a level outside `(0, 1)`.
pub fn confidence_interval(sx0: f64, n: usize, level: f64) -> Result<f64> {
    if n < 3 {
        return Err(Error::computation("a confidence interval needs at least three points"));
    }
    if level <= 0.0 || level >= 1.0 || level.is_nan() {
        return Err(Error::computation(format!("confidence level {level} is not in (0, 1)")));
    }
    #[allow(clippy::cast_precision_loss)]
    let dof = (n - 2) as f64;
    let t = StudentsT::new(0.0, 1.0, dof)
        .map_err(|e| Error::computation(e.to_string()))?
        .inverse_cdf(1.0 - (1.0 - level) / 2.0);
    Ok(t * sx0)
}

/// Half width of the confidence interval of the mean of repeated determinations,
/// `t(level, n - 1) · s / sqrt(n)`
///
/// # Errors
/// Returns [`Error::ComputationFailed`] with fewer than two samples or a level outside `(0, 1)`.
pub fn mean_confidence_interval(samples: &[f64], level: f64) -> Result<f64> {
    if samples.len() < 2 {
        return Err(Error::computation("a confidence interval needs at least two samples"));
    }
    if level <= 0.0 || level >= 1.0 || level.is_nan() {
        return Err(Error::computation(format!("confidence level {level} is not in (0, 1)")));
    }
    #[allow(clippy::cast_precision_loss)]
    let n = samples.len() as f64;
    let t = StudentsT::new(0.0, 1.0, n - 1.0)
        .map_err(|e| Error::computation(e.to_string()))?
        .inverse_cdf(1.0 - (1.0 - level) / 2.0);
    Ok(t * super::math::standard_deviation(samples) / n.sqrt())
}

/// Decimal place at which to round a result whose uncertainty is `value`
///
/// `max(0, -floor(log10(value)) + digits - 1)`, non-positive or non-finite values give `0`.
pub fn significant_digits(value: f64, digits: i32) -> i32 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    #[allow(clippy::cast_possible_truncation)]
    let exponent = value.log10().floor() as i32;
    (-exponent + digits - 1).max(0)
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Fixed point text of `value` with `places` decimals
pub fn format_rounded(value: f64, places: i32) -> String {
    let places = usize::try_from(places).unwrap_or(0);
    format!("{value:.places$}")
}

#[cfg(test)]
mod tests {
    use super::{
        calc_normal_equation_fit, calc_sx0, confidence_interval, format_rounded, round_to,
        significant_digits, Estimate, LinearFit,
    };
    use crate::Error;

    use ndarray_rand::rand::{Rng, SeedableRng};
    use proptest::prelude::*;
    use rand_isaac::Isaac64Rng;

    #[test]
    fn collinear_points_are_fitted_exactly() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        for _ in 0..20 {
            let m: f64 = rng.gen_range(-10.0..10.0);
            let b: f64 = rng.gen_range(-10.0..10.0);
            let n = rng.gen_range(3..30);
            let x: Vec<f64> = (0..n).map(|_| rng.gen_range(-5.0..5.0)).collect();
            let y: Vec<f64> = x.iter().map(|x| m * x + b).collect();

            let fit = calc_normal_equation_fit(&x, &y).unwrap();
            approx::assert_relative_eq!(fit.slope, m, epsilon = 1e-8, max_relative = 1e-8);
            approx::assert_relative_eq!(fit.intercept, b, epsilon = 1e-8, max_relative = 1e-8);
        }
    }

    #[test]
    fn coincident_abscissae_cannot_be_fitted() {
        assert!(matches!(
            calc_normal_equation_fit(&[1., 1., 1.], &[1., 2., 3.]),
            Err(Error::ComputationFailed(_))
        ));
    }

    #[test]
    fn sx0_requires_a_blank() {
        let x = [1., 2., 3., 4.];
        let y = [2., 4.1, 5.9, 8.];
        let fit = calc_normal_equation_fit(&x, &y).unwrap();
        assert!(matches!(
            calc_sx0(&fit, &x, &y),
            Err(Error::ComputationFailed(_))
        ));
    }

    #[test]
    fn sx0_of_a_known_calibration() {
        let x = [0., 1., 2., 3., 4.];
        let y = [1.1, 2.9, 5.2, 6.8, 9.1];
        let fit = calc_normal_equation_fit(&x, &y).unwrap();
        let sx0 = calc_sx0(&fit, &x, &y).unwrap();

        approx::assert_relative_eq!(fit.slope, 1.99, max_relative = 1e-12);
        approx::assert_relative_eq!(fit.intercept, 1.04, max_relative = 1e-12);
        let s_r = fit.residual_standard_deviation(&x, &y);
        let expected =
            s_r / 1.99 * ((1.1f64 - 5.02).powi(2) / (1.99 * 1.99 * 10.0) + 1.0 + 0.2).sqrt();
        approx::assert_relative_eq!(sx0, expected, max_relative = 1e-12);
        assert!(sx0 > 0.0);
    }

    #[test]
    fn confidence_interval_uses_the_t_quantile() {
        // t(0.975, 3) = 3.182446305284263
        let ci = confidence_interval(1.0, 5, 0.95).unwrap();
        approx::assert_relative_eq!(ci, 3.182_446_305_284_263, max_relative = 1e-6);
        assert!(confidence_interval(1.0, 2, 0.95).is_err());
    }

    #[test]
    fn rounding_follows_the_uncertainty() {
        assert_eq!(significant_digits(0.0123, 2), 3);
        assert_eq!(significant_digits(0.5, 1), 1);
        assert_eq!(significant_digits(123.0, 2), 0);
        assert_eq!(significant_digits(0.0, 2), 0);
        approx::assert_relative_eq!(round_to(1.23456, 3), 1.235);
        assert_eq!(format_rounded(1.5, 2), "1.50");
    }

    #[test]
    fn estimates_from_samples() {
        let estimate = Estimate::from_samples(&[1., 2., 3.]);
        approx::assert_relative_eq!(estimate.value, 2.0);
        approx::assert_relative_eq!(estimate.uncertainty, 1.0);
        let line = LinearFit { slope: 2.0, intercept: -4.0 };
        approx::assert_relative_eq!(line.x_intercept(), 2.0);
    }

    proptest! {
        #[test]
        fn sx0_is_never_negative(
            noise in prop::collection::vec(-0.5f64..0.5, 5),
            slope in 0.1f64..10.0,
        ) {
            let x = [0., 1., 2., 3., 4.];
            let y: Vec<f64> = x.iter().zip(&noise).map(|(x, e)| slope * x + 2.0 + e).collect();
            let fit = calc_normal_equation_fit(&x, &y).unwrap();
            prop_assume!(fit.slope.abs() > 1e-6);
            let sx0 = calc_sx0(&fit, &x, &y).unwrap();
            prop_assert!(sx0 >= 0.0);
        }
    }
}
