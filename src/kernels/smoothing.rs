use ndarray::Array2;

use super::math::{pinv, vandermonde};
use crate::{Error, Result};

/// Savitzky-Golay smoothing of equally spaced samples.
///
/// Interior points are replaced by the value at the centre of a degree `degree` least squares
/// polynomial over `window` neighbours. The first and last `window / 2` points are evaluated at
/// their own offset of the polynomial fitted to the first or last full window.
///
/// # Errors
/// Returns [`Error::ComputationFailed`] if `window` is even, smaller than three or longer than the
/// signal, or if `degree >= window`.
pub fn savitzky_golay(y: &[f64], window: usize, degree: usize) -> Result<Vec<f64>> {
    if window < 3 || window % 2 == 0 {
        return Err(Error::computation(format!(
            "window {window} must be an odd number of at least 3"
        )));
    }
    if degree >= window {
        return Err(Error::computation(format!(
            "degree {degree} must be lower than the window {window}"
        )));
    }
    if window > y.len() {
        return Err(Error::computation(format!(
            "window {window} is longer than the {} point signal",
            y.len()
        )));
    }

    let half = window / 2;
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    let offsets: Vec<f64> = (0..window).map(|i| i as f64 - half as f64).collect();
    // (degree + 1) x window, row k maps window samples to the k-th coefficient
    let projection: Array2<f64> = pinv(vandermonde(&offsets, degree)?.view(), 0.0)?;

    let weights_at = |offset: f64| -> Vec<f64> {
        (0..window)
            .map(|j| {
                (0..=degree)
                    .rev()
                    .fold(0.0_f64, |acc, k| acc.mul_add(offset, projection[[k, j]]))
            })
            .collect()
    };
    let apply = |weights: &[f64], start: usize| -> f64 {
        weights
            .iter()
            .zip(&y[start..start + window])
            .map(|(w, v)| w * v)
            .sum()
    };

    let n = y.len();
    let centre = weights_at(0.0);
    let mut smoothed = vec![0.0; n];
    for i in half..n - half {
        smoothed[i] = apply(&centre, i - half);
    }
    for (i, offset) in offsets.iter().take(half).enumerate() {
        smoothed[i] = apply(&weights_at(*offset), 0);
        smoothed[n - 1 - i] = apply(&weights_at(-offset), n - window);
    }
    Ok(smoothed)
}
