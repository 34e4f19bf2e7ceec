//! Processing methods: each member is replaced by a processed copy.

mod automatic_background_correction;
mod curve_averaging;
mod fft_low_pass;
mod polynomial_background;
mod sampling_window;
mod savitzky_golay;

pub use automatic_background_correction::AutomaticBackgroundCorrection;
pub use curve_averaging::CurveAveraging;
pub use fft_low_pass::FftLowPass;
pub use polynomial_background::PolynomialBackground;
pub use sampling_window::SamplingWindow;
pub use savitzky_golay::SavitzkyGolay;

use crate::curve::CurveData;
use crate::method::{ensure_completed, integrity, MethodContext, MethodRun, EXPORT_KEY};
use crate::Result;

/// Key of the number of curves a processing run replaced
pub const PROCESSED_KEY: &str = "processed";

/// Replace every member by a copy whose current is `process(member)`, returning the count
fn process_members(
    ctx: &mut MethodContext<'_>,
    mut process: impl FnMut(&CurveData) -> Result<Vec<f64>>,
) -> Result<usize> {
    let members = ctx.members()?;
    integrity::minimum_curves(&members, 1)?;
    let mut columns = Vec::with_capacity(members.len());
    for original in &members {
        let mut copy = original.get_copy(ctx.next_curve_data_id());
        copy.set_current(process(original)?)?;
        columns.push(copy.current().to_vec());
        ctx.replace_member(original.id, copy)?;
    }
    let rows = super::point_rows(members[0].potential(), &columns);
    ctx.run.set_custom(EXPORT_KEY, &rows)?;
    ctx.run.set_custom(PROCESSED_KEY, &members.len())?;
    Ok(members.len())
}

/// Processing integrity: at least one curve, all of the same length
fn check_members(ctx: &MethodContext<'_>) -> Result<()> {
    let members = ctx.members()?;
    integrity::minimum_curves(&members, 1)?;
    integrity::uniform_length(&members)?;
    Ok(())
}

fn summary(run: &MethodRun, what: &str) -> Result<String> {
    ensure_completed(run)?;
    let count: usize = run.custom(PROCESSED_KEY)?;
    Ok(format!("{what} applied to {count} curves."))
}
