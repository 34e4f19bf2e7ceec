use log::debug;

use crate::config::Config;
use crate::kernels::smoothing::savitzky_golay;
use crate::method::{Method, MethodContext, MethodKind, MethodRun, StepDescriptor};
use crate::methods::field;
use crate::steps::{validators, Settings};
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, Default)]
pub struct SavitzkyGolay;

impl Method for SavitzkyGolay {
    fn key(&self) -> &'static str {
        "savitzky_golay"
    }

    fn display_name(&self) -> &'static str {
        "Savitzky-Golay smoothing"
    }

    fn kind(&self) -> MethodKind {
        MethodKind::Processing
    }

    fn steps(&self, _config: &Config) -> Vec<StepDescriptor> {
        vec![StepDescriptor::new(
            "Smoothing parameters",
            "Window length in points and degree of the local polynomial.",
            Settings::new(vec![
                field(
                    "window",
                    "Window",
                    7.0,
                    validators::odd_window,
                    "must be an odd integer of at least 3",
                ),
                field(
                    "degree",
                    "Degree",
                    3.0,
                    validators::non_negative_integer,
                    "must be a non-negative integer",
                ),
            ]),
        )]
    }

    fn check_integrity(&self, ctx: &MethodContext<'_>) -> Result<()> {
        super::check_members(ctx)
    }

    fn finalize(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        let window = Settings::count(&ctx.run, "window")?;
        let degree = Settings::count(&ctx.run, "degree")?;
        if degree >= window {
            return Err(Error::computation(format!(
                "degree {degree} must be lower than the window {window}"
            )));
        }
        let count = super::process_members(ctx, |curve| {
            savitzky_golay(curve.current(), window, degree)
        })?;
        debug!("smoothed {count} curves with window {window}, degree {degree}");
        Ok(())
    }

    fn apply(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        self.finalize(ctx)
    }

    fn final_content(&self, run: &MethodRun) -> Result<String> {
        let window = Settings::count(run, "window")?;
        let degree = Settings::count(run, "degree")?;
        super::summary(
            run,
            &format!("Savitzky-Golay smoothing (window {window}, degree {degree})"),
        )
    }
}
