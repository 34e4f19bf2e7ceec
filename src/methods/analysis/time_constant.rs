use log::{info, warn};
use ndarray_rand::rand::SeedableRng;
use rand_isaac::Isaac64Rng;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::kernels::asd::asd;
use crate::kernels::decay::{
    classify_factor, estimate_time_constant, FactorKind, TimeConstantEstimate,
};
use crate::kernels::math::mean;
use crate::kernels::regression::{format_rounded, significant_digits};
use crate::method::{
    ensure_completed, integrity, Method, MethodContext, MethodKind, MethodRun, StepDescriptor,
    EXPORT_KEY,
};
use crate::methods::{field, selected_indices};
use crate::steps::{validators, SelectRange, Settings};
use crate::{Error, Result};

/// Time constant of the charging current.
///
/// The raw samples of each point are decomposed, each factor's sample profile is classified as a
/// capacitive or a faradaic decay, and the capacitive ones are fitted for `τ` and `R`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimeConstant;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactorReport {
    pub factor: usize,
    pub kind: FactorKind,
    /// The better model reached the configured `R²`
    pub classified: bool,
    pub capacitive_r_squared: f64,
    pub faradaic_r_squared: f64,
    pub estimate: Option<TimeConstantEstimate>,
}

impl FactorReport {
    fn export_row(&self) -> Vec<f64> {
        #[allow(clippy::cast_precision_loss)]
        let mut row = vec![
            self.factor as f64,
            match self.kind {
                FactorKind::Capacitive => 0.0,
                FactorKind::Faradaic => 1.0,
            },
        ];
        match &self.estimate {
            Some(e) => row.extend([e.tau.value, e.tau_ci, e.resistance.value, e.resistance_ci]),
            None => row.extend([f64::NAN; 4]),
        }
        row
    }
}

/// The classified capacitive factor with the best capacitive `R²`
fn charging_factor(reports: &[FactorReport], min_r_squared: f64) -> Result<&FactorReport> {
    reports
        .iter()
        .filter(|r| r.classified && r.kind == FactorKind::Capacitive && r.estimate.is_some())
        .max_by(|a, b| a.capacitive_r_squared.total_cmp(&b.capacitive_r_squared))
        .ok_or_else(|| {
            Error::computation(format!(
                "no factor fits a charging current with R² of at least {min_r_squared}"
            ))
        })
}

impl Method for TimeConstant {
    fn key(&self) -> &'static str {
        "time_constant"
    }

    fn display_name(&self) -> &'static str {
        "Time constant"
    }

    fn kind(&self) -> MethodKind {
        MethodKind::Analysis
    }

    fn steps(&self, _config: &Config) -> Vec<StepDescriptor> {
        vec![
            StepDescriptor::new(
                "Select range",
                "Select the potential range whose samples are decomposed.",
                SelectRange,
            ),
            StepDescriptor::new(
                "Decomposition",
                "Number of factors to extract. The process can take up to several minutes.",
                Settings::new(vec![field(
                    "factors",
                    "Factors",
                    2.0,
                    validators::positive_integer,
                    "must be a positive integer",
                )]),
            ),
        ]
    }

    fn check_integrity(&self, ctx: &MethodContext<'_>) -> Result<()> {
        let members = ctx.members()?;
        integrity::minimum_curves(&members, 1)?;
        let length = integrity::uniform_length(&members)?;
        if length < 2 {
            return Err(Error::computation("the curves need at least two points"));
        }
        integrity::has_samples(&members)?;
        Ok(())
    }

    fn finalize(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        let members = ctx.members()?;
        let first = &members[0];
        let range = selected_indices(&ctx.run, first)?;
        let factors = Settings::count(&ctx.run, "factors")?;
        let tensor = super::sample_tensor(&members, range)?;
        let per_point = tensor.dim().0;

        let step = (first.potential()[1] - first.potential()[0]).abs();
        #[allow(clippy::cast_precision_loss)]
        let interval = (first.time()[1] - first.time()[0]) / per_point as f64;
        if step == 0.0 || interval <= 0.0 {
            return Err(Error::computation("the curves have no potential step or time base"));
        }
        #[allow(clippy::cast_precision_loss)]
        let time: Vec<f64> = (0..per_point).map(|i| i as f64 * interval).collect();

        let asd_config = &ctx.config.asd;
        let decomposition = asd(
            tensor.view(),
            factors,
            asd_config.lambda,
            asd_config.epsilon,
            asd_config.max_iterations,
        )?;
        if decomposition.failed {
            warn!("{}: decomposition did not converge", ctx.run.id);
            return Err(Error::computation(format!(
                "the decomposition did not converge within {} iterations",
                decomposition.iterations
            )));
        }

        let fit = &ctx.config.fit;
        let mut rng = Isaac64Rng::seed_from_u64(fit.seed);
        let mut reports = Vec::with_capacity(decomposition.rank());
        for f in 0..decomposition.rank() {
            // Unit-norm profile scaled to the factor's mean current
            let amplitude = mean(&decomposition.z.column(f).to_vec())
                * mean(&decomposition.y.column(f).to_vec());
            let profile: Vec<f64> =
                decomposition.x.column(f).iter().map(|x| x * amplitude).collect();
            let classification = classify_factor(&time, &profile, step, 0.0)?;
            let classified = classification
                .capacitive_r_squared
                .max(classification.faradaic_r_squared)
                >= fit.min_r_squared;
            let estimate = if classification.kind == FactorKind::Capacitive {
                match estimate_time_constant(
                    &time,
                    &profile,
                    step,
                    fit.refits,
                    ctx.config.report.confidence_level,
                    &mut rng,
                ) {
                    Ok(estimate) => Some(estimate),
                    Err(e) => {
                        warn!("{}: no time constant for factor {f}: {e}", ctx.run.id);
                        None
                    }
                }
            } else {
                None
            };
            info!("{}: factor {f} is {:?}", ctx.run.id, classification.kind);
            reports.push(FactorReport {
                factor: f,
                kind: classification.kind,
                classified,
                capacitive_r_squared: classification.capacitive_r_squared,
                faradaic_r_squared: classification.faradaic_r_squared,
                estimate,
            });
        }
        let charging = charging_factor(&reports, fit.min_r_squared)?;
        info!("{}: factor {} is the charging current", ctx.run.id, charging.factor);

        let rows: Vec<Vec<f64>> = reports.iter().map(FactorReport::export_row).collect();
        ctx.run.set_custom(EXPORT_KEY, &rows)?;
        ctx.run.set_custom("factors", &reports)?;
        ctx.run.set_custom("digits", &ctx.config.report.significant_digits)?;
        Ok(())
    }

    fn apply(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        self.finalize(ctx)
    }

    fn final_content(&self, run: &MethodRun) -> Result<String> {
        ensure_completed(run)?;
        let reports: Vec<FactorReport> = run.custom("factors")?;
        let digits: i32 = run.custom("digits")?;
        let mut lines = vec![self.display_name().to_owned()];
        for report in &reports {
            let line = match &report.estimate {
                Some(e) => {
                    let tau_places = significant_digits(e.tau_ci, digits);
                    let r_places = significant_digits(e.resistance_ci, digits);
                    format!(
                        "Factor {}: capacitive, τ = {} ± {} ms, R = {} ± {} ({} fits)",
                        report.factor + 1,
                        format_rounded(e.tau.value, tau_places),
                        format_rounded(e.tau_ci, tau_places),
                        format_rounded(e.resistance.value, r_places),
                        format_rounded(e.resistance_ci, r_places),
                        e.fits
                    )
                }
                None => format!(
                    "Factor {}: faradaic, R² {:.4}",
                    report.factor + 1,
                    report.faradaic_r_squared
                ),
            };
            lines.push(if report.classified {
                line
            } else {
                format!("{line} (weak fit)")
            });
        }
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::{charging_factor, FactorReport};
    use crate::kernels::decay::{FactorKind, TimeConstantEstimate};
    use crate::kernels::regression::Estimate;
    use crate::Error;

    fn report(factor: usize, kind: FactorKind, r_squared: f64, classified: bool) -> FactorReport {
        let estimate = (kind == FactorKind::Capacitive).then(|| TimeConstantEstimate {
            tau: Estimate::from_centroid(7.5),
            resistance: Estimate::from_centroid(100.0),
            tau_ci: 0.1,
            resistance_ci: 1.0,
            fits: 50,
        });
        FactorReport {
            factor,
            kind,
            classified,
            capacitive_r_squared: r_squared,
            faradaic_r_squared: 0.5,
            estimate,
        }
    }

    #[test]
    fn weak_capacitive_factors_are_not_a_charging_current() {
        let reports = vec![
            report(0, FactorKind::Faradaic, 0.2, true),
            report(1, FactorKind::Capacitive, 0.6, false),
        ];
        assert!(matches!(
            charging_factor(&reports, 0.9),
            Err(Error::ComputationFailed(_))
        ));
    }

    #[test]
    fn best_classified_capacitive_factor_is_chosen() {
        let reports = vec![
            report(0, FactorKind::Capacitive, 0.95, true),
            report(1, FactorKind::Capacitive, 0.99, true),
            report(2, FactorKind::Capacitive, 0.999, false),
        ];
        assert_eq!(charging_factor(&reports, 0.9).unwrap().factor, 1);
    }
}
