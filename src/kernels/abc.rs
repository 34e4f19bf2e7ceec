//! Automatic background correction by iterative polynomial envelope fitting.
//!
//! The background estimate starts as the signal itself. Every iteration fits a polynomial to the
//! current estimate and clips the estimate down to the fit wherever the fit lies below it, so
//! peaks are progressively shaved off while the baseline is retained.

use log::debug;

use super::polyfit::{polyfit, Scaling};
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct AbcResult {
    pub background: Vec<f64>,
    /// `y - background`, never negative
    pub signal: Vec<f64>,
    /// Iterations actually performed
    pub iterations: usize,
}

/// # Errors
/// Returns [`Error::ComputationFailed`] if `x` and `y` differ in length, there are too few points
/// for `degree`, or `iterations` is zero.
pub fn calc_abc(x: &[f64], y: &[f64], degree: usize, iterations: usize) -> Result<AbcResult> {
    if iterations == 0 {
        return Err(Error::computation("background correction needs at least one iteration"));
    }
    if x.len() != y.len() {
        return Err(Error::computation(format!(
            "x has {} points but y has {}",
            x.len(),
            y.len()
        )));
    }

    let mut background = y.to_vec();
    let mut performed = 0;
    for _ in 0..iterations {
        performed += 1;
        let fit = polyfit(x, &background, degree, None, Scaling::Scaled)?;
        let mut changed = false;
        for (b, fitted) in background.iter_mut().zip(fit.evaluate(x)) {
            if fitted < *b {
                *b = fitted;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    debug!("background correction finished after {performed} iterations");

    let signal = y.iter().zip(&background).map(|(y, b)| y - b).collect();
    Ok(AbcResult {
        background,
        signal,
        iterations: performed,
    })
}

#[cfg(test)]
mod tests {
    use super::calc_abc;

    use proptest::prelude::*;

    fn gaussian_on_slope(points: usize) -> (Vec<f64>, Vec<f64>) {
        #[allow(clippy::cast_precision_loss)]
        let x: Vec<f64> = (0..points).map(|i| i as f64).collect();
        let y = x
            .iter()
            .map(|x| 0.02f64.mul_add(*x, 1.0) + 5.0 * (-((x - 50.0) / 5.0).powi(2)).exp())
            .collect();
        (x, y)
    }

    #[test]
    fn peaks_are_separated_from_a_linear_baseline() {
        let (x, y) = gaussian_on_slope(100);
        let result = calc_abc(&x, &y, 1, 200).unwrap();

        let peak = result.signal[50];
        assert!(peak > 4.5, "peak height {peak}");
        assert!(result.signal[5].abs() < 0.3);
        assert!(result.signal[95].abs() < 0.3);
    }

    #[test]
    fn zero_iterations_are_rejected() {
        let (x, y) = gaussian_on_slope(10);
        assert!(calc_abc(&x, &y, 1, 0).is_err());
    }

    #[test]
    fn stops_when_nothing_changes() {
        let x = [0., 1., 2., 3., 4., 5.];
        let y = [1., 1., 1., 1., 1., 1.];
        let result = calc_abc(&x, &y, 1, 50).unwrap();
        assert!(result.iterations < 50);
    }

    proptest! {
        #[test]
        fn background_never_exceeds_the_signal(
            y in prop::collection::vec(-1e3f64..1e3, 8..64),
            degree in 0usize..4,
            iterations in 1usize..20,
        ) {
            #[allow(clippy::cast_precision_loss)]
            let x: Vec<f64> = (0..y.len()).map(|i| i as f64).collect();
            let result = calc_abc(&x, &y, degree, iterations).unwrap();
            for (b, yi) in result.background.iter().zip(&y) {
                prop_assert!(b <= yi);
            }
            for s in &result.signal {
                prop_assert!(*s >= 0.0);
            }
        }

        #[test]
        fn more_iterations_never_raise_the_background(
            y in prop::collection::vec(-1e3f64..1e3, 8..64),
            iterations in 1usize..10,
        ) {
            #[allow(clippy::cast_precision_loss)]
            let x: Vec<f64> = (0..y.len()).map(|i| i as f64).collect();
            let fewer = calc_abc(&x, &y, 2, iterations).unwrap();
            let more = calc_abc(&x, &y, 2, iterations + 1).unwrap();
            for (a, b) in more.background.iter().zip(&fewer.background) {
                prop_assert!(a <= b);
            }
        }
    }
}
