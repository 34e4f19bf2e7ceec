use crate::config::Config;
use crate::curve::CurveData;
use crate::kernels::math::mean;
use crate::method::{integrity, Method, MethodContext, MethodKind, MethodRun, StepDescriptor};
use crate::methods::field;
use crate::steps::{validators, Settings};
use crate::{Error, Result};

/// Recompute each point from a window of its raw samples
#[derive(Clone, Copy, Debug, Default)]
pub struct SamplingWindow;

fn resample(curve: &CurveData, start: usize, count: usize) -> Result<Vec<f64>> {
    (0..curve.len())
        .map(|point| {
            let samples = curve.samples_of_point(point).ok_or_else(|| {
                Error::computation(format!("{} was not recorded with multi-sampling", curve.id))
            })?;
            let window = samples.get(start..start + count).ok_or_else(|| {
                Error::computation(format!(
                    "samples {start}..{} exceed the {} samples per point",
                    start + count,
                    samples.len()
                ))
            })?;
            Ok(mean(window))
        })
        .collect()
}

impl Method for SamplingWindow {
    fn key(&self) -> &'static str {
        "sampling_window"
    }

    fn display_name(&self) -> &'static str {
        "Sampling window"
    }

    fn kind(&self) -> MethodKind {
        MethodKind::Processing
    }

    fn steps(&self, _config: &Config) -> Vec<StepDescriptor> {
        vec![StepDescriptor::new(
            "Sampling window",
            "First raw sample of each point and the number of samples to average.",
            Settings::new(vec![
                field(
                    "start",
                    "First sample",
                    0.0,
                    validators::non_negative_integer,
                    "must be a non-negative integer",
                ),
                field(
                    "count",
                    "Samples",
                    1.0,
                    validators::positive_integer,
                    "must be a positive integer",
                ),
            ]),
        )]
    }

    fn check_integrity(&self, ctx: &MethodContext<'_>) -> Result<()> {
        super::check_members(ctx)?;
        integrity::has_samples(&ctx.members()?)?;
        Ok(())
    }

    fn finalize(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        let start = Settings::count(&ctx.run, "start")?;
        let count = Settings::count(&ctx.run, "count")?;
        super::process_members(ctx, |curve| resample(curve, start, count))?;
        Ok(())
    }

    fn apply(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        self.finalize(ctx)
    }

    fn final_content(&self, run: &MethodRun) -> Result<String> {
        let start = Settings::count(run, "start")?;
        let count = Settings::count(run, "count")?;
        super::summary(
            run,
            &format!("Sampling window (samples {start} to {})", start + count - 1),
        )
    }
}
