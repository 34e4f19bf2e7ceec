use crate::config::Config;
use crate::kernels::fft::low_pass;
use crate::method::{Method, MethodContext, MethodKind, MethodRun, StepDescriptor};
use crate::steps::{stored, Confirmation, SelectPoint};
use crate::{Error, Result};

/// Low pass filtering in the frequency domain, the cutoff is picked on the spectrum
#[derive(Clone, Copy, Debug, Default)]
pub struct FftLowPass;

fn cutoff(run: &MethodRun) -> Result<usize> {
    let point: f64 = stored(run, SelectPoint::KIND)?;
    let bin = point.round();
    if bin < 1.0 || !bin.is_finite() {
        return Err(Error::computation(format!("cutoff bin {point} is not above zero")));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(bin as usize)
}

impl Method for FftLowPass {
    fn key(&self) -> &'static str {
        "fft_low_pass"
    }

    fn display_name(&self) -> &'static str {
        "FFT low pass filter"
    }

    fn kind(&self) -> MethodKind {
        MethodKind::Processing
    }

    fn steps(&self, _config: &Config) -> Vec<StepDescriptor> {
        vec![
            StepDescriptor::new(
                "Select cutoff",
                "Pick the first frequency bin to remove on the magnitude spectrum.",
                SelectPoint,
            ),
            StepDescriptor::new(
                "Confirm",
                "Accept the filtered curves or go back to choose another cutoff.",
                Confirmation,
            ),
        ]
    }

    fn check_integrity(&self, ctx: &MethodContext<'_>) -> Result<()> {
        super::check_members(ctx)
    }

    fn finalize(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        let cutoff = cutoff(&ctx.run)?;
        super::process_members(ctx, |curve| low_pass(curve.current(), cutoff))?;
        Ok(())
    }

    fn apply(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        self.finalize(ctx)
    }

    fn final_content(&self, run: &MethodRun) -> Result<String> {
        let cutoff = cutoff(run)?;
        super::summary(run, &format!("FFT low pass filter (cutoff bin {cutoff})"))
    }
}
