//! Interactive step definitions.
//!
//! A step validates one submission and, when it is acceptable, records the result in the run's
//! step data under its [`MethodStep::kind`]. Nothing is written when validation fails.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::Dataset;
use crate::method::MethodRun;
use crate::store::{AnalyteId, CurveDataId};
use crate::{Error, Result};

/// Maximum number of cursors a caller may submit
pub const MAX_CURSORS: usize = 4;

/// What the caller submits for a step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StepInput {
    /// Cursor positions on the x axis, empty slots allowed
    Cursors(Vec<Option<f64>>),
    /// Free text tag for each curve
    Tags(BTreeMap<CurveDataId, String>),
    Analyte(AnalyteId),
    /// Raw text of each named field
    Settings(BTreeMap<String, String>),
    Confirm(bool),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Advance,
    /// The caller asked to go one step back
    Back,
}

/// What a step may look at and write to while it processes a submission
pub struct StepContext<'a> {
    pub dataset: &'a Dataset,
    pub run: &'a mut MethodRun,
}

pub trait MethodStep: Send + Sync {
    /// Key of the step's entry in the run's step data
    fn kind(&self) -> &'static str;

    /// Default content for the caller's form
    fn initial(&self) -> Option<Value> {
        None
    }

    /// Validate `input` and record it
    ///
    /// # Errors
    /// Returns [`Error::ValidationFailed`] when the input does not satisfy the step, in which case
    /// `ctx.run` is left untouched.
    fn process(&self, input: &StepInput, ctx: &mut StepContext<'_>) -> Result<StepOutcome>;
}

/// Typed read of a step's stored result
///
/// # Errors
/// Returns [`Error::ComputationFailed`] if the step has not been completed or holds something
/// else.
pub fn stored<T: DeserializeOwned>(run: &MethodRun, kind: &str) -> Result<T> {
    let value = run
        .step_data
        .get(kind)
        .ok_or_else(|| Error::computation(format!("step {kind} has no data")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| Error::computation(format!("step {kind} holds unexpected data: {e}")))
}

fn cursors(input: &StepInput) -> Result<Vec<f64>> {
    let StepInput::Cursors(values) = input else {
        return Err(Error::validation("expected cursor positions"));
    };
    if values.len() > MAX_CURSORS {
        return Err(Error::validation(format!(
            "at most {MAX_CURSORS} cursors can be submitted"
        )));
    }
    let given: Vec<f64> = values.iter().flatten().copied().collect();
    if given.iter().any(|v| !v.is_finite()) {
        return Err(Error::validation("cursor positions must be finite"));
    }
    Ok(given)
}

fn sorted(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// One x coordinate, the first filled cursor
#[derive(Clone, Copy, Debug, Default)]
pub struct SelectPoint;

impl SelectPoint {
    pub const KIND: &'static str = "SelectPoint";
}

impl MethodStep for SelectPoint {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn process(&self, input: &StepInput, ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
        let point = *cursors(input)?
            .first()
            .ok_or_else(|| Error::validation("select a point"))?;
        ctx.run.step_data.insert(Self::KIND.to_owned(), Value::from(point));
        Ok(StepOutcome::Advance)
    }
}

/// Two x coordinates stored as a sorted interval
#[derive(Clone, Copy, Debug, Default)]
pub struct SelectRange;

impl SelectRange {
    pub const KIND: &'static str = "SelectRange";
}

impl MethodStep for SelectRange {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn process(&self, input: &StepInput, ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
        let given = cursors(input)?;
        let [a, b] = given[..] else {
            return Err(Error::validation(format!(
                "select exactly two points, {} given",
                given.len()
            )));
        };
        let range = sorted(a, b);
        ctx.run
            .step_data
            .insert(Self::KIND.to_owned(), serde_json::to_value(range)?);
        Ok(StepOutcome::Advance)
    }
}

/// Four x coordinates forming two disjoint intervals, stored in ascending order
#[derive(Clone, Copy, Debug, Default)]
pub struct SelectTwoRanges;

impl SelectTwoRanges {
    pub const KIND: &'static str = "SelectTwoRanges";
}

impl MethodStep for SelectTwoRanges {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn process(&self, input: &StepInput, ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
        let given = cursors(input)?;
        let [a, b, c, d] = given[..] else {
            return Err(Error::validation(format!(
                "select exactly four points, {} given",
                given.len()
            )));
        };
        let mut ranges = [sorted(a, b), sorted(c, d)];
        ranges.sort_by(|x, y| x.0.total_cmp(&y.0));
        if ranges[0].1 >= ranges[1].0 {
            return Err(Error::validation("the two ranges must not overlap"));
        }
        ctx.run
            .step_data
            .insert(Self::KIND.to_owned(), serde_json::to_value(ranges)?);
        Ok(StepOutcome::Advance)
    }
}

/// Group the dataset's curves by a free text tag
#[derive(Clone, Copy, Debug, Default)]
pub struct TagCurves;

impl TagCurves {
    pub const KIND: &'static str = "TagCurves";
}

impl MethodStep for TagCurves {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn process(&self, input: &StepInput, ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
        let StepInput::Tags(tags) = input else {
            return Err(Error::validation("expected curve tags"));
        };
        let mut groups: BTreeMap<String, Vec<CurveDataId>> = BTreeMap::new();
        for (curve, tag) in tags {
            let tag = tag.trim();
            if tag.is_empty() {
                continue;
            }
            if !tag.chars().all(char::is_alphanumeric) {
                return Err(Error::validation(format!("tag '{tag}' is not alphanumeric")));
            }
            if !ctx.dataset.members().contains(curve) {
                return Err(Error::validation(format!(
                    "{curve} is not part of {}",
                    ctx.dataset.id
                )));
            }
            groups.entry(tag.to_owned()).or_default().push(*curve);
        }
        if groups.is_empty() {
            return Err(Error::validation("tag at least one curve"));
        }
        ctx.run
            .step_data
            .insert(Self::KIND.to_owned(), serde_json::to_value(groups)?);
        Ok(StepOutcome::Advance)
    }
}

/// Choose one of the dataset's analytes
#[derive(Clone, Copy, Debug, Default)]
pub struct SelectAnalyte;

impl SelectAnalyte {
    pub const KIND: &'static str = "SelectAnalyte";
}

impl MethodStep for SelectAnalyte {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn process(&self, input: &StepInput, ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
        let StepInput::Analyte(analyte) = input else {
            return Err(Error::validation("expected an analyte"));
        };
        if !ctx.dataset.analytes().contains(analyte) {
            return Err(Error::validation(format!(
                "{analyte} is not defined in {}",
                ctx.dataset.id
            )));
        }
        ctx.run
            .step_data
            .insert(Self::KIND.to_owned(), serde_json::to_value(analyte)?);
        ctx.run.analyte = Some(*analyte);
        Ok(StepOutcome::Advance)
    }
}

/// A named numeric field of a [`Settings`] step
#[derive(Clone, Debug)]
pub struct SettingField {
    pub name: &'static str,
    pub label: &'static str,
    pub default: f64,
    pub validator: fn(f64) -> bool,
    /// Shown when the validator rejects a value
    pub requirement: &'static str,
}

/// Named scalar values, each checked by its own validator
#[derive(Clone, Debug)]
pub struct Settings {
    pub fields: Vec<SettingField>,
}

impl Settings {
    pub const KIND: &'static str = "Settings";

    pub fn new(fields: Vec<SettingField>) -> Self {
        Self { fields }
    }

    /// Stored value of `name`
    ///
    /// # Errors
    /// Returns [`Error::ComputationFailed`] if the step has not been completed or lacks the field.
    pub fn value(run: &MethodRun, name: &str) -> Result<f64> {
        let values: BTreeMap<String, f64> = stored(run, Self::KIND)?;
        values
            .get(name)
            .copied()
            .ok_or_else(|| Error::computation(format!("setting {name} was not recorded")))
    }

    /// Stored value of `name` as a count
    ///
    /// # Errors
    /// As [`Settings::value`], and [`Error::ComputationFailed`] for negative or fractional values.
    pub fn count(run: &MethodRun, name: &str) -> Result<usize> {
        let value = Self::value(run, name)?;
        if value < 0.0 || value.fract() != 0.0 || value > 1e9 {
            return Err(Error::computation(format!("setting {name} is not a count: {value}")));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(value as usize)
    }
}

impl MethodStep for Settings {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn initial(&self) -> Option<Value> {
        let defaults: BTreeMap<&str, f64> =
            self.fields.iter().map(|f| (f.name, f.default)).collect();
        serde_json::to_value(defaults).ok()
    }

    fn process(&self, input: &StepInput, ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
        let StepInput::Settings(raw) = input else {
            return Err(Error::validation("expected settings"));
        };
        let mut values = BTreeMap::new();
        for field in &self.fields {
            let value = match raw.get(field.name).map(|s| s.trim()) {
                None | Some("") => field.default,
                Some(text) => text.parse::<f64>().map_err(|_| {
                    Error::validation(format!("{}: '{text}' is not a number", field.label))
                })?,
            };
            if !(field.validator)(value) {
                return Err(Error::validation(format!(
                    "{}: {}",
                    field.label, field.requirement
                )));
            }
            values.insert(field.name.to_owned(), value);
        }
        ctx.run
            .step_data
            .insert(Self::KIND.to_owned(), serde_json::to_value(values)?);
        Ok(StepOutcome::Advance)
    }
}

/// Accept to go on, reject to go back
#[derive(Clone, Copy, Debug, Default)]
pub struct Confirmation;

impl Confirmation {
    pub const KIND: &'static str = "Confirmation";
}

impl MethodStep for Confirmation {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn process(&self, input: &StepInput, ctx: &mut StepContext<'_>) -> Result<StepOutcome> {
        let StepInput::Confirm(accepted) = input else {
            return Err(Error::validation("expected a confirmation"));
        };
        if !accepted {
            return Ok(StepOutcome::Back);
        }
        ctx.run.step_data.insert(Self::KIND.to_owned(), Value::Bool(true));
        Ok(StepOutcome::Advance)
    }
}

/// Validators for [`SettingField`]
pub mod validators {
    pub fn positive(value: f64) -> bool {
        value > 0.0
    }

    pub fn non_negative_integer(value: f64) -> bool {
        value >= 0.0 && value.fract() == 0.0
    }

    pub fn positive_integer(value: f64) -> bool {
        value >= 1.0 && value.fract() == 0.0
    }

    /// Odd integer of at least 3, e.g. a smoothing window
    pub fn odd_window(value: f64) -> bool {
        value >= 3.0 && value.fract() == 0.0 && value % 2.0 == 1.0
    }

    pub fn unit_interval(value: f64) -> bool {
        (0.0..=1.0).contains(&value)
    }

    pub fn at_least_two(value: f64) -> bool {
        value >= 2.0 && value.fract() == 0.0
    }
}
