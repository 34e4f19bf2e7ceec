use rustfft::{num_complex::Complex64, FftPlanner};

use crate::{Error, Result};

fn forward(y: &[f64]) -> Vec<Complex64> {
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(y.len());
    let mut buffer: Vec<Complex64> = y.iter().map(|v| Complex64::new(*v, 0.0)).collect();
    fft.process(&mut buffer);
    buffer
}

/// Remove every frequency component from bin `cutoff` upwards.
///
/// Bins `[cutoff, N - cutoff)` are zeroed, which keeps the spectrum Hermitian, and the real part
/// of the normalised inverse transform is returned. A cutoff past the Nyquist bin leaves the
/// signal unchanged.
///
/// # Errors
/// Returns [`Error::ComputationFailed`] for an empty signal or a zero cutoff, which would remove
/// the signal altogether.
pub fn low_pass(y: &[f64], cutoff: usize) -> Result<Vec<f64>> {
    if y.is_empty() {
        return Err(Error::computation("cannot filter an empty signal"));
    }
    if cutoff == 0 {
        return Err(Error::computation("a cutoff at bin 0 removes the whole signal"));
    }
    let n = y.len();
    let mut spectrum = forward(y);
    let end = n.saturating_sub(cutoff);
    if cutoff < end {
        for bin in &mut spectrum[cutoff..end] {
            *bin = Complex64::new(0.0, 0.0);
        }
    }

    let mut planner = FftPlanner::new();
    planner.plan_fft_inverse(n).process(&mut spectrum);

    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / n as f64;
    Ok(spectrum.iter().map(|c| c.re * scale).collect())
}

/// Magnitudes of the non-redundant half of the spectrum, bins `0..=N/2`
pub fn spectrum(y: &[f64]) -> Vec<f64> {
    if y.is_empty() {
        return vec![];
    }
    forward(y)
        .iter()
        .take(y.len() / 2 + 1)
        .map(|c| c.norm())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{low_pass, spectrum};

    use ndarray_rand::rand::{Rng, SeedableRng};
    use rand_isaac::Isaac64Rng;
    use rustfft::num_complex::Complex64;

    /// Direct O(N²) evaluation of the same filter
    fn explicit_low_pass(y: &[f64], cutoff: usize) -> Vec<f64> {
        let n = y.len();
        #[allow(clippy::cast_precision_loss)]
        let nf = n as f64;
        let tau = std::f64::consts::TAU;
        let mut bins: Vec<Complex64> = (0..n)
            .map(|k| {
                y.iter().enumerate().fold(Complex64::new(0.0, 0.0), |acc, (t, v)| {
                    #[allow(clippy::cast_precision_loss)]
                    let angle = -tau * (k * t) as f64 / nf;
                    acc + Complex64::new(angle.cos(), angle.sin()) * *v
                })
            })
            .collect();
        for bin in &mut bins[cutoff..n - cutoff] {
            *bin = Complex64::new(0.0, 0.0);
        }
        (0..n)
            .map(|t| {
                bins.iter()
                    .enumerate()
                    .fold(0.0, |acc, (k, c)| {
                        #[allow(clippy::cast_precision_loss)]
                        let angle = tau * (k * t) as f64 / nf;
                        acc + (*c * Complex64::new(angle.cos(), angle.sin())).re
                    })
                    / nf
            })
            .collect()
    }

    fn noisy_sinusoid(n: usize) -> Vec<f64> {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let t = i as f64 / n as f64;
                (std::f64::consts::TAU * 3.0 * t).sin() + 0.2 * rng.gen_range(-1.0..1.0)
            })
            .collect()
    }

    #[test]
    fn matches_direct_transform() {
        let y = noisy_sinusoid(256);
        let filtered = low_pass(&y, 10).unwrap();
        let expected = explicit_low_pass(&y, 10);
        for (a, b) in filtered.iter().zip(&expected) {
            approx::assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn low_frequencies_pass_untouched() {
        let y: Vec<f64> = (0..256)
            .map(|i| {
                let t = f64::from(i) / 256.0;
                (std::f64::consts::TAU * 3.0 * t).cos()
            })
            .collect();
        let filtered = low_pass(&y, 10).unwrap();
        for (a, b) in filtered.iter().zip(&y) {
            approx::assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn noise_is_attenuated() {
        let y = noisy_sinusoid(256);
        let before = spectrum(&y);
        let after = spectrum(&low_pass(&y, 10).unwrap());
        assert_eq!(after.len(), 129);
        approx::assert_relative_eq!(before[3], after[3], max_relative = 1e-9);
        assert!(after[10..].iter().all(|m| *m < 1e-9));
    }

    #[test]
    fn zero_cutoff_is_rejected() {
        assert!(low_pass(&[1.0, 2.0], 0).is_err());
        assert!(low_pass(&[], 3).is_err());
    }
}
