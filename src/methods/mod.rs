//! The method catalogue.

pub mod analysis;
pub mod processing;

use crate::curve::{CurveData, XAxis};
use crate::method::MethodRun;
use crate::steps::{stored, SelectRange, SettingField};
use crate::{Error, Result};

pub(crate) const fn field(
    name: &'static str,
    label: &'static str,
    default: f64,
    validator: fn(f64) -> bool,
    requirement: &'static str,
) -> SettingField {
    SettingField {
        name,
        label,
        default,
        validator,
        requirement,
    }
}

/// A configured count as a settings default
#[allow(clippy::cast_precision_loss)]
pub(crate) fn configured(count: usize) -> f64 {
    count as f64
}

/// Inclusive index range of `curve` covered by the stored [`SelectRange`] potentials
pub(crate) fn selected_indices(run: &MethodRun, curve: &CurveData) -> Result<(usize, usize)> {
    let (start, end): (f64, f64) = stored(run, SelectRange::KIND)?;
    curve
        .index_range(XAxis::Potential, start, end)
        .ok_or_else(|| Error::computation("the selected range does not cover the curve"))
}

/// Rows of `[x, column values...]`, one per point
pub(crate) fn point_rows(x: &[f64], columns: &[Vec<f64>]) -> Vec<Vec<f64>> {
    x.iter()
        .enumerate()
        .map(|(i, x)| {
            std::iter::once(*x)
                .chain(columns.iter().map(|c| c.get(i).copied().unwrap_or(f64::NAN)))
                .collect()
        })
        .collect()
}
