use crate::{Error, Result};

/// Evaluate the natural cubic spline through `(knots_x, knots_y)` at every point of `x`.
///
/// Knots must be strictly increasing. Points outside the knot interval are evaluated with the
/// polynomial of the nearest end segment.
///
/// # Errors
/// Returns [`Error::ComputationFailed`] for fewer than two knots, mismatched lengths or knots that
/// do not increase.
pub fn natural_cubic(knots_x: &[f64], knots_y: &[f64], x: &[f64]) -> Result<Vec<f64>> {
    let n = knots_x.len();
    if n != knots_y.len() {
        return Err(Error::computation("spline knots and values differ in length"));
    }
    if n < 2 {
        return Err(Error::computation("a spline needs at least two knots"));
    }
    if knots_x.windows(2).any(|w| w[1] <= w[0]) {
        return Err(Error::computation("spline knots must be strictly increasing"));
    }

    let m = second_derivatives(knots_x, knots_y);

    Ok(x.iter()
        .map(|&xi| {
            let segment = match knots_x.partition_point(|k| *k <= xi) {
                0 => 0,
                p if p >= n => n - 2,
                p => p - 1,
            };
            let (x0, x1) = (knots_x[segment], knots_x[segment + 1]);
            let (y0, y1) = (knots_y[segment], knots_y[segment + 1]);
            let (m0, m1) = (m[segment], m[segment + 1]);
            let h = x1 - x0;
            let a = (x1 - xi) / h;
            let b = (xi - x0) / h;
            a * y0
                + b * y1
                + ((a.powi(3) - a) * m0 + (b.powi(3) - b) * m1) * h * h / 6.0
        })
        .collect())
}

/// Second derivatives at the knots, with zero curvature at both ends.
///
/// The interior equations form a tridiagonal system, solved with the Thomas algorithm.
fn second_derivatives(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut m = vec![0.0; n];
    if n < 3 {
        return m;
    }

    let interior = n - 2;
    let mut diag = vec![0.0; interior];
    let mut upper = vec![0.0; interior];
    let mut rhs = vec![0.0; interior];
    for i in 0..interior {
        let h0 = x[i + 1] - x[i];
        let h1 = x[i + 2] - x[i + 1];
        diag[i] = 2.0 * (h0 + h1);
        upper[i] = h1;
        rhs[i] = 6.0 * ((y[i + 2] - y[i + 1]) / h1 - (y[i + 1] - y[i]) / h0);
    }

    for i in 1..interior {
        let lower = x[i + 1] - x[i];
        let factor = lower / diag[i - 1];
        diag[i] -= factor * upper[i - 1];
        rhs[i] -= factor * rhs[i - 1];
    }

    m[interior] = rhs[interior - 1] / diag[interior - 1];
    for i in (0..interior - 1).rev() {
        m[i + 1] = (rhs[i] - upper[i] * m[i + 2]) / diag[i];
    }
    m
}
