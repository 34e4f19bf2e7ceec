use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::dataset::Dataset;
use crate::kernels::asd::asd;
use crate::kernels::math::r_squared_between;
use crate::method::{integrity, Method, MethodContext, MethodKind, MethodRun, StepDescriptor};
use crate::methods::{configured, field, selected_indices};
use crate::steps::{validators, SelectAnalyte, SelectRange, Settings};
use crate::{Error, Result};

/// Standard addition on the concentration loadings of a multi-sampled decomposition.
///
/// The raw samples in the selected range form a samples × points × curves array. Its factor
/// whose curve loadings follow the added concentrations best is taken as the analyte signal.
#[derive(Clone, Copy, Debug, Default)]
pub struct AsdStandardAddition;

/// Which factor was used and how the decomposition went
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecompositionSummary {
    pub factor: usize,
    pub r_squared: f64,
    pub iterations: usize,
}

impl Method for AsdStandardAddition {
    fn key(&self) -> &'static str {
        "asd_standard_addition"
    }

    fn display_name(&self) -> &'static str {
        "Standard addition with slice-wise decomposition"
    }

    fn kind(&self) -> MethodKind {
        MethodKind::Analysis
    }

    fn steps(&self, config: &Config) -> Vec<StepDescriptor> {
        vec![
            StepDescriptor::new(
                "Select analyte",
                "Analyte whose concentration is determined.",
                SelectAnalyte,
            ),
            StepDescriptor::new(
                "Select peak",
                "Select the range containing the analyte's peak.",
                SelectRange,
            ),
            StepDescriptor::new(
                "Decomposition",
                "Number of factors to extract. The process can take up to several minutes.",
                Settings::new(vec![field(
                    "factors",
                    "Factors",
                    configured(config.asd.factors),
                    validators::positive_integer,
                    "must be a positive integer",
                )]),
            ),
        ]
    }

    fn initial_for_step(&self, index: usize, _run: &MethodRun, dataset: &Dataset) -> Option<Value> {
        super::sole_analyte(index, dataset)
    }

    fn check_integrity(&self, ctx: &MethodContext<'_>) -> Result<()> {
        let members = super::standard_addition_members(ctx)?;
        integrity::has_samples(&members)?;
        Ok(())
    }

    fn finalize(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        let members = ctx.members()?;
        let range = selected_indices(&ctx.run, &members[0])?;
        let factors = Settings::count(&ctx.run, "factors")?;
        let tensor = super::sample_tensor(&members, range)?;
        let asd_config = &ctx.config.asd;
        let decomposition = asd(
            tensor.view(),
            factors,
            asd_config.lambda,
            asd_config.epsilon,
            asd_config.max_iterations,
        )?;
        if decomposition.failed {
            warn!(
                "{}: decomposition stopped after {} iterations without converging",
                ctx.run.id, decomposition.iterations
            );
            return Err(Error::computation(format!(
                "the decomposition did not converge within {} iterations",
                decomposition.iterations
            )));
        }

        let concentrations = ctx.dataset.concentrations_for(ctx.analyte()?);
        let (factor, r_squared) = (0..decomposition.rank())
            .map(|f| {
                let loadings = decomposition.z.column(f).to_vec();
                (f, r_squared_between(&loadings, &concentrations))
            })
            .filter(|(_, r2)| r2.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| Error::computation("no factor follows the added concentrations"))?;
        info!("{}: factor {factor} follows the additions with R² {r_squared}", ctx.run.id);

        let responses = decomposition.z.column(factor).to_vec();
        ctx.run.set_custom(
            "decomposition",
            &DecompositionSummary {
                factor,
                r_squared,
                iterations: decomposition.iterations,
            },
        )?;
        super::finish_standard_addition(ctx, &responses)
    }

    fn apply(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        self.finalize(ctx)
    }

    fn final_content(&self, run: &MethodRun) -> Result<String> {
        let mut text = super::standard_addition_content(run, self.display_name())?;
        let summary: DecompositionSummary = run.custom("decomposition")?;
        text.push_str(&format!(
            "\nFactor {} of the decomposition, R² {:.4} after {} iterations",
            summary.factor + 1,
            summary.r_squared,
            summary.iterations
        ));
        Ok(text)
    }
}
