//! Analysis methods: results are stored in the run, the dataset is locked.

mod asd_standard_addition;
mod ga_standard_addition;
mod regular_standard_addition;
mod time_constant;

pub use asd_standard_addition::AsdStandardAddition;
pub use ga_standard_addition::GaStandardAddition;
pub use regular_standard_addition::RegularStandardAddition;
pub use time_constant::{FactorReport, TimeConstant};

use std::fmt::Write;

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ReportConfig;
use crate::curve::CurveData;
use crate::dataset::Dataset;
use crate::kernels::regression::{
    calc_normal_equation_fit, calc_sx0, confidence_interval, format_rounded, round_to,
    significant_digits,
};
use crate::method::{ensure_completed, integrity, MethodContext, MethodRun, EXPORT_KEY};
use crate::store::AnalyteId;
use crate::{Error, Result};

/// Key of the [`StandardAdditionResult`] in the run's custom data
pub const RESULT_KEY: &str = "result";

/// Calibration line of a standard addition and the concentration it yields
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StandardAdditionResult {
    pub analyte: AnalyteId,
    pub unit: String,
    pub concentrations: Vec<f64>,
    pub responses: Vec<f64>,
    pub slope: f64,
    pub intercept: f64,
    /// `-intercept / slope`
    pub x_intercept: f64,
    /// `-intercept / slope`, the crossing of the calibration line with the concentration axis.
    /// Its magnitude is the concentration in the sample.
    pub result: f64,
    pub sx0: f64,
    /// Confidence half width of `result`
    pub ci: f64,
    pub confidence_level: f64,
    /// Decimal places used for display
    pub places: i32,
}

impl StandardAdditionResult {
    /// # Errors
    /// Returns [`Error::ComputationFailed`] if the calibration cannot be evaluated.
    pub fn compute(
        analyte: AnalyteId,
        unit: &str,
        concentrations: &[f64],
        responses: &[f64],
        report: &ReportConfig,
    ) -> Result<Self> {
        let fit = calc_normal_equation_fit(concentrations, responses)?;
        let sx0 = calc_sx0(&fit, concentrations, responses)?;
        let ci = confidence_interval(sx0, concentrations.len(), report.confidence_level)?;
        let result = -fit.intercept / fit.slope;
        if !result.is_finite() {
            return Err(Error::computation("the calibration does not cross the axis"));
        }
        let places = if ci > 0.0 {
            significant_digits(ci, report.significant_digits)
        } else {
            significant_digits(result.abs(), report.significant_digits)
        };
        Ok(Self {
            analyte,
            unit: unit.to_owned(),
            concentrations: concentrations.to_vec(),
            responses: responses.to_vec(),
            slope: fit.slope,
            intercept: fit.intercept,
            x_intercept: fit.x_intercept(),
            result,
            sx0,
            ci,
            confidence_level: report.confidence_level,
            places,
        })
    }

    pub fn rounded_result(&self) -> f64 {
        round_to(self.result, self.places)
    }

    /// Store the result and its calibration points for export
    ///
    /// # Errors
    /// Returns [`Error::Json`] if the result cannot be represented.
    pub fn store(&self, run: &mut MethodRun) -> Result<()> {
        let rows: Vec<Vec<f64>> = self
            .concentrations
            .iter()
            .zip(&self.responses)
            .map(|(c, r)| vec![*c, *r])
            .collect();
        run.set_custom(EXPORT_KEY, &rows)?;
        run.set_custom(RESULT_KEY, self)
    }

    /// Report text under `title`
    pub fn render(&self, title: &str) -> String {
        let mut text = format!("{title}\n");
        let _ = writeln!(
            text,
            "Result: {} ± {} {} ({}% confidence)",
            format_rounded(self.result, self.places),
            format_rounded(self.ci, self.places),
            self.unit,
            self.confidence_level * 100.0
        );
        let _ = writeln!(text, "Analyte: {}", self.analyte);
        let _ = writeln!(text, "Slope: {:e}", self.slope);
        let _ = writeln!(text, "Intercept: {:e}", self.intercept);
        let _ = writeln!(text, "x-intercept: {:e}", self.x_intercept);
        let _ = write!(text, "sx0: {:e}", self.sx0);
        text
    }
}

/// Final content of a standard addition run
fn standard_addition_content(run: &MethodRun, title: &str) -> Result<String> {
    ensure_completed(run)?;
    let result: StandardAdditionResult = run.custom(RESULT_KEY)?;
    Ok(result.render(title))
}

/// Preselects the analyte of the first step when the dataset defines only one
fn sole_analyte(index: usize, dataset: &Dataset) -> Option<Value> {
    match (index, dataset.analytes()) {
        (0, [analyte]) => serde_json::to_value(analyte).ok(),
        _ => None,
    }
}

/// Checks shared by the standard addition methods, returning the members
fn standard_addition_members(ctx: &MethodContext<'_>) -> Result<Vec<CurveData>> {
    integrity::has_analytes(&ctx.dataset)?;
    let members = ctx.members()?;
    integrity::minimum_curves(&members, 3)?;
    integrity::uniform_length(&members)?;
    integrity::has_blank(&ctx.dataset, ctx.analyte()?)?;
    Ok(members)
}

/// Evaluate the calibration of `responses` against the selected analyte and store it
fn finish_standard_addition(ctx: &mut MethodContext<'_>, responses: &[f64]) -> Result<()> {
    let analyte = ctx.analyte()?;
    let concentrations = ctx.dataset.concentrations_for(analyte);
    let result = StandardAdditionResult::compute(
        analyte,
        ctx.dataset.unit(analyte).code(),
        &concentrations,
        responses,
        &ctx.config.report,
    )?;
    log::info!(
        "{}: {} = {} ± {}",
        ctx.run.id,
        analyte,
        result.rounded_result(),
        round_to(result.ci, result.places)
    );
    result.store(&mut ctx.run)
}

/// Raw samples of points `first..=last` of each curve as a samples × points × curves array
fn sample_tensor(curves: &[CurveData], (first, last): (usize, usize)) -> Result<Array3<f64>> {
    let per_point = integrity::has_samples(curves)?;
    let points = last + 1 - first;
    let mut tensor = Array3::zeros((per_point, points, curves.len()));
    for (k, curve) in curves.iter().enumerate() {
        for (j, point) in (first..=last).enumerate() {
            let samples = curve.samples_of_point(point).ok_or_else(|| {
                Error::computation(format!("{} has no samples for point {point}", curve.id))
            })?;
            for (i, sample) in samples.iter().enumerate() {
                tensor[[i, j, k]] = *sample;
            }
        }
    }
    Ok(tensor)
}
