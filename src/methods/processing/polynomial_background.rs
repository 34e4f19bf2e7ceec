use crate::config::Config;
use crate::curve::{CurveData, XAxis};
use crate::kernels::polyfit::{polyfit, Scaling};
use crate::method::{Method, MethodContext, MethodKind, MethodRun, StepDescriptor};
use crate::methods::field;
use crate::steps::{stored, validators, SelectTwoRanges, Settings};
use crate::{Error, Result};

/// Polynomial fitted to two background regions on either side of the peak, then subtracted
#[derive(Clone, Copy, Debug, Default)]
pub struct PolynomialBackground;

fn subtract_background(
    curve: &CurveData,
    ranges: &[(f64, f64); 2],
    degree: usize,
) -> Result<Vec<f64>> {
    let mut x = vec![];
    let mut y = vec![];
    for (start, end) in ranges {
        let (first, last) = curve
            .index_range(XAxis::Potential, *start, *end)
            .ok_or_else(|| Error::computation("the background range does not cover the curve"))?;
        x.extend_from_slice(&curve.potential()[first..=last]);
        y.extend_from_slice(&curve.current()[first..=last]);
    }
    let fit = polyfit(&x, &y, degree, None, Scaling::Scaled)?;
    Ok(curve
        .current()
        .iter()
        .zip(fit.evaluate(curve.potential()))
        .map(|(i, b)| i - b)
        .collect())
}

impl Method for PolynomialBackground {
    fn key(&self) -> &'static str {
        "polynomial_background"
    }

    fn display_name(&self) -> &'static str {
        "Polynomial background subtraction"
    }

    fn kind(&self) -> MethodKind {
        MethodKind::Processing
    }

    fn steps(&self, _config: &Config) -> Vec<StepDescriptor> {
        vec![
            StepDescriptor::new(
                "Select background",
                "Select two ranges of pure background, one on each side of the peak.",
                SelectTwoRanges,
            ),
            StepDescriptor::new(
                "Background degree",
                "Degree of the polynomial fitted to the selected ranges.",
                Settings::new(vec![field(
                    "degree",
                    "Degree",
                    3.0,
                    validators::non_negative_integer,
                    "must be a non-negative integer",
                )]),
            ),
        ]
    }

    fn check_integrity(&self, ctx: &MethodContext<'_>) -> Result<()> {
        super::check_members(ctx)
    }

    fn finalize(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        let ranges: [(f64, f64); 2] = stored(&ctx.run, SelectTwoRanges::KIND)?;
        let degree = Settings::count(&ctx.run, "degree")?;
        super::process_members(ctx, |curve| subtract_background(curve, &ranges, degree))?;
        Ok(())
    }

    fn apply(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        self.finalize(ctx)
    }

    fn final_content(&self, run: &MethodRun) -> Result<String> {
        let degree = Settings::count(run, "degree")?;
        super::summary(
            run,
            &format!("Polynomial background subtraction (degree {degree})"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::subtract_background;
    use crate::curve::CurveData;
    use crate::store::{CurveDataId, CurveId, UserId};

    #[test]
    fn quadratic_background_is_removed() {
        let potential: Vec<f64> = (0..101).map(|i| f64::from(i) - 50.0).collect();
        let current: Vec<f64> = potential
            .iter()
            .map(|e| 0.002 * e * e + 0.1 * e + 3.0 + 5.0 * (-(e / 5.0).powi(2)).exp())
            .collect();
        let curve = CurveData::from_vectors(
            CurveDataId(1),
            UserId(1),
            CurveId(1),
            potential,
            vec![0.0; 101],
            current,
        )
        .unwrap();

        let signal = subtract_background(&curve, &[(-50.0, -25.0), (25.0, 50.0)], 2).unwrap();

        approx::assert_relative_eq!(signal[0], 0.0, epsilon = 1e-6);
        approx::assert_relative_eq!(signal[50], 5.0, epsilon = 1e-4);
        approx::assert_relative_eq!(signal[100], 0.0, epsilon = 1e-6);
    }
}
