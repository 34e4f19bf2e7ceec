use log::debug;

use crate::config::Config;
use crate::kernels::abc::calc_abc;
use crate::method::{Method, MethodContext, MethodKind, MethodRun, StepDescriptor};
use crate::methods::{configured, field};
use crate::steps::{validators, Settings};
use crate::Result;

/// Iterative polynomial envelope background removal of every curve
#[derive(Clone, Copy, Debug, Default)]
pub struct AutomaticBackgroundCorrection;

impl Method for AutomaticBackgroundCorrection {
    fn key(&self) -> &'static str {
        "automatic_background_correction"
    }

    fn display_name(&self) -> &'static str {
        "Automatic background correction"
    }

    fn kind(&self) -> MethodKind {
        MethodKind::Processing
    }

    fn steps(&self, config: &Config) -> Vec<StepDescriptor> {
        vec![StepDescriptor::new(
            "Background parameters",
            "Degree of the background polynomial and the maximal number of iterations.",
            Settings::new(vec![
                field(
                    "degree",
                    "Degree",
                    configured(config.abc.degree),
                    validators::non_negative_integer,
                    "must be a non-negative integer",
                ),
                field(
                    "iterations",
                    "Iterations",
                    configured(config.abc.iterations),
                    validators::positive_integer,
                    "must be a positive integer",
                ),
            ]),
        )]
    }

    fn check_integrity(&self, ctx: &MethodContext<'_>) -> Result<()> {
        super::check_members(ctx)
    }

    fn finalize(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        let degree = Settings::count(&ctx.run, "degree")?;
        let iterations = Settings::count(&ctx.run, "iterations")?;
        super::process_members(ctx, |curve| {
            let result = calc_abc(curve.potential(), curve.current(), degree, iterations)?;
            debug!("{}: background settled after {} iterations", curve.id, result.iterations);
            Ok(result.signal)
        })?;
        Ok(())
    }

    fn apply(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        self.finalize(ctx)
    }

    fn final_content(&self, run: &MethodRun) -> Result<String> {
        let degree = Settings::count(run, "degree")?;
        super::summary(
            run,
            &format!("Automatic background correction (degree {degree})"),
        )
    }
}
