use itertools::{Itertools, MinMaxResult};
use serde_json::Value;

use crate::config::Config;
use crate::curve::CurveData;
use crate::dataset::Dataset;
use crate::method::{Method, MethodContext, MethodKind, MethodRun, StepDescriptor};
use crate::methods::selected_indices;
use crate::steps::{SelectAnalyte, SelectRange};
use crate::Result;

/// Standard addition on the peak height read directly from each curve
#[derive(Clone, Copy, Debug, Default)]
pub struct RegularStandardAddition;

/// `max - min` of the current over points `first..=last`
pub(crate) fn peak_height(current: &[f64], (first, last): (usize, usize)) -> f64 {
    let window = &current[first..=last.min(current.len() - 1)];
    match window.iter().copied().minmax_by(f64::total_cmp) {
        MinMaxResult::MinMax(min, max) => max - min,
        MinMaxResult::OneElement(_) | MinMaxResult::NoElements => 0.0,
    }
}

fn heights(run: &MethodRun, members: &[CurveData]) -> Result<Vec<f64>> {
    members
        .iter()
        .map(|curve| Ok(peak_height(curve.current(), selected_indices(run, curve)?)))
        .collect()
}

impl Method for RegularStandardAddition {
    fn key(&self) -> &'static str {
        "regular_standard_addition"
    }

    fn display_name(&self) -> &'static str {
        "Standard addition"
    }

    fn kind(&self) -> MethodKind {
        MethodKind::Analysis
    }

    fn steps(&self, _config: &Config) -> Vec<StepDescriptor> {
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
        ]
    }

    fn initial_for_step(&self, index: usize, _run: &MethodRun, dataset: &Dataset) -> Option<Value> {
        super::sole_analyte(index, dataset)
    }

    fn check_integrity(&self, ctx: &MethodContext<'_>) -> Result<()> {
        super::standard_addition_members(ctx).map(|_| ())
    }

    fn finalize(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        let members = ctx.members()?;
        let responses = heights(&ctx.run, &members)?;
        super::finish_standard_addition(ctx, &responses)
    }

    fn apply(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        self.finalize(ctx)
    }

    fn final_content(&self, run: &MethodRun) -> Result<String> {
        super::standard_addition_content(run, self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::peak_height;

    #[test]
    fn height_spans_the_selected_points() {
        let current = [0.0, 1.0, 5.0, 2.0, 9.0];
        approx::assert_relative_eq!(peak_height(&current, (1, 3)), 4.0);
        approx::assert_relative_eq!(peak_height(&current, (0, 10)), 9.0);
    }
}
