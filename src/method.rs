//! Methods and their persisted runs.

use std::collections::BTreeMap;

use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::curve::CurveData;
use crate::dataset::Dataset;
use crate::steps::MethodStep;
use crate::store::{
    AnalyteId, CurveDataId, DatasetId, ObjectStore, Owned, RunId, Transaction, User, UserId,
};
use crate::{Error, Result};

/// Key of the custom data entry holding the matrix returned by [`Method::exportable_data`]
pub const EXPORT_KEY: &str = "export";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodKind {
    /// Produces results, locks the dataset
    Analysis,
    /// Replaces the dataset's curves by processed copies
    Processing,
}

/// Where a run stands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// No active step, not completed, e.g. a derived run that has not been applied yet
    Idle,
    AtStep(usize),
    Finished,
    /// Cancelled or failed, soft-deleted
    Discarded,
}

/// Persisted record of one invocation of a method against a dataset
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MethodRun {
    pub id: RunId,
    pub dataset: DatasetId,
    pub owner: UserId,
    /// Registry key of the method
    pub method: String,
    pub kind: MethodKind,
    pub active_step: Option<usize>,
    pub completed: bool,
    pub deleted: bool,
    /// Result of each completed step, keyed by step kind
    pub step_data: BTreeMap<String, Value>,
    /// Results of the method
    pub custom_data: BTreeMap<String, Value>,
    /// The completed run whose parameters this run re-uses
    pub applies_model: Option<RunId>,
    pub analyte: Option<AnalyteId>,
}

impl Owned for MethodRun {
    fn owner(&self) -> UserId {
        self.owner
    }
}

impl MethodRun {
    pub fn new(
        id: RunId,
        dataset: DatasetId,
        owner: UserId,
        method: &str,
        kind: MethodKind,
    ) -> Self {
        Self {
            id,
            dataset,
            owner,
            method: method.to_owned(),
            kind,
            active_step: Some(0),
            completed: false,
            deleted: false,
            step_data: BTreeMap::new(),
            custom_data: BTreeMap::new(),
            applies_model: None,
            analyte: None,
        }
    }

    pub const fn state(&self) -> RunState {
        if self.deleted {
            RunState::Discarded
        } else if self.completed {
            RunState::Finished
        } else {
            match self.active_step {
                Some(index) => RunState::AtStep(index),
                None => RunState::Idle,
            }
        }
    }

    /// # Errors
    /// Returns [`Error::Json`] if `value` cannot be represented.
    pub fn set_custom<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        self.custom_data
            .insert(key.to_owned(), serde_json::to_value(value)?);
        Ok(())
    }

    /// # Errors
    /// Returns [`Error::DoesNotExist`] if the run has no such result and [`Error::Json`] if it
    /// holds a different type.
    pub fn custom<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .custom_data
            .get(key)
            .ok_or_else(|| Error::DoesNotExist(format!("result {key} of {}", self.id)))?;
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// A step of a method with the text shown to the caller
pub struct StepDescriptor {
    pub title: &'static str,
    pub description: &'static str,
    pub step: Box<dyn MethodStep>,
}

impl StepDescriptor {
    pub fn new(
        title: &'static str,
        description: &'static str,
        step: impl MethodStep + 'static,
    ) -> Self {
        Self {
            title,
            description,
            step: Box::new(step),
        }
    }
}

/// Everything a method may use while it finalizes.
///
/// `run` and `dataset` are working copies. Reads and writes go through `txn`, which the engine
/// commits together with the copies once the method succeeds, or drops if it fails.
pub struct MethodContext<'a> {
    pub user: &'a User,
    pub config: &'a Config,
    pub run: MethodRun,
    pub dataset: Dataset,
    pub txn: Transaction<'a>,
}

impl MethodContext<'_> {
    /// Members of the dataset in order
    ///
    /// # Errors
    /// Propagates store errors for missing curve data.
    pub fn members(&self) -> Result<Vec<CurveData>> {
        self.dataset
            .members()
            .iter()
            .map(|id| self.curve_data(*id))
            .collect()
    }

    /// # Errors
    /// Returns [`Error::DoesNotExist`] for unknown ids.
    pub fn curve_data(&self, id: CurveDataId) -> Result<CurveData> {
        self.txn.curve_data(id)
    }

    pub fn next_curve_data_id(&self) -> CurveDataId {
        CurveDataId(self.txn.next_id())
    }

    /// Store `processed` (a copy of `original`) and put it in `original`'s place in the dataset
    ///
    /// # Errors
    /// Returns [`Error::NotAllowed`] for a locked dataset and [`Error::DoesNotExist`] if
    /// `original` is not a member.
    pub fn replace_member(&mut self, original: CurveDataId, processed: CurveData) -> Result<()> {
        self.dataset.replace_curve(original, processed.id)?;
        self.txn.put_curve_data(processed);
        Ok(())
    }

    /// The analyte selected for the run
    ///
    /// # Errors
    /// Returns [`Error::ComputationFailed`] if none was selected.
    pub fn analyte(&self) -> Result<AnalyteId> {
        self.run
            .analyte
            .ok_or_else(|| Error::computation("no analyte was selected"))
    }
}

/// An analysis or processing procedure.
///
/// Implementations are stateless, everything a run needs lives in its [`MethodRun`].
pub trait Method: Send + Sync {
    /// Stable registry key
    fn key(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn kind(&self) -> MethodKind;

    /// The steps in the order they are taken, settings defaults seeded from `config`
    fn steps(&self, config: &Config) -> Vec<StepDescriptor>;

    /// Seed for the form of step `index`, overriding the step's own default
    fn initial_for_step(
        &self,
        _index: usize,
        _run: &MethodRun,
        _dataset: &Dataset,
    ) -> Option<Value> {
        None
    }

    /// Cheap pre-checks run before any kernel
    ///
    /// # Errors
    /// Returns [`Error::ComputationFailed`] if the dataset does not suit the method.
    fn check_integrity(&self, _ctx: &MethodContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Run the numerical pipeline over the completed step data
    ///
    /// # Errors
    /// Any error fails the run.
    fn finalize(&self, ctx: &mut MethodContext<'_>) -> Result<()>;

    /// Re-run a completed method's parameters against another dataset
    ///
    /// # Errors
    /// Returns [`Error::NotApplicable`] unless the method supports it.
    fn apply(&self, _ctx: &mut MethodContext<'_>) -> Result<()> {
        Err(Error::NotApplicable(format!(
            "{} depends on the dataset it was run against",
            self.display_name()
        )))
    }

    /// The matrix behind the final report
    ///
    /// # Errors
    /// Returns [`Error::NotAllowed`] for runs that have not completed.
    fn exportable_data(&self, run: &MethodRun) -> Result<Array2<f64>> {
        if !run.completed {
            return Err(Error::NotAllowed(format!("{} has not completed", run.id)));
        }
        // NaN cells are stored as JSON null
        let rows: Vec<Vec<Option<f64>>> = run.custom(EXPORT_KEY)?;
        let rows: Vec<Vec<f64>> = rows
            .into_iter()
            .map(|row| row.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
            .collect();
        rows_to_matrix(&rows)
    }

    /// Human readable summary of a completed run
    ///
    /// # Errors
    /// Returns [`Error::NotAllowed`] for runs that have not completed.
    fn final_content(&self, run: &MethodRun) -> Result<String>;
}

/// Stack equally long rows into a matrix
///
/// # Errors
/// Returns [`Error::Shape`] if the rows differ in length.
pub fn rows_to_matrix(rows: &[Vec<f64>]) -> Result<Array2<f64>> {
    let columns = rows.first().map_or(0, Vec::len);
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Ok(Array2::from_shape_vec((rows.len(), columns), flat)?)
}

/// # Errors
/// Returns [`Error::NotAllowed`] for runs that have not completed.
pub fn ensure_completed(run: &MethodRun) -> Result<()> {
    if run.completed {
        Ok(())
    } else {
        Err(Error::NotAllowed(format!("{} has not completed", run.id)))
    }
}

/// Checks shared by several methods, to be called from [`Method::check_integrity`]
pub mod integrity {
    use crate::curve::CurveData;
    use crate::dataset::Dataset;
    use crate::store::AnalyteId;
    use crate::{Error, Result};

    /// All curves have the same number of points, which is returned
    ///
    /// # Errors
    /// Returns [`Error::ComputationFailed`] for an empty dataset or differing lengths.
    pub fn uniform_length(curves: &[CurveData]) -> Result<usize> {
        let first = curves
            .first()
            .ok_or_else(|| Error::computation("the dataset holds no curves"))?
            .len();
        if curves.iter().any(|c| c.len() != first) {
            return Err(Error::computation("all curves must have the same number of points"));
        }
        Ok(first)
    }

    /// # Errors
    /// Returns [`Error::ComputationFailed`] with fewer than `minimum` curves.
    pub fn minimum_curves(curves: &[CurveData], minimum: usize) -> Result<()> {
        if curves.len() < minimum {
            return Err(Error::computation(format!(
                "at least {minimum} curves are required, {} available",
                curves.len()
            )));
        }
        Ok(())
    }

    /// # Errors
    /// Returns [`Error::ComputationFailed`] if the dataset defines no analyte.
    pub fn has_analytes(dataset: &Dataset) -> Result<()> {
        if dataset.analytes().is_empty() {
            return Err(Error::computation("the dataset defines no analyte"));
        }
        Ok(())
    }

    /// At least one curve without addition of `analyte`
    ///
    /// # Errors
    /// Returns [`Error::ComputationFailed`] otherwise.
    pub fn has_blank(dataset: &Dataset, analyte: AnalyteId) -> Result<()> {
        if !dataset.concentrations_for(analyte).iter().any(|c| *c == 0.0) {
            return Err(Error::computation(
                "standard addition needs a curve without addition (concentration 0)",
            ));
        }
        Ok(())
    }

    /// Every curve carries raw samples, with the same count per point, which is returned
    ///
    /// # Errors
    /// Returns [`Error::ComputationFailed`] if any curve lacks multi-sampling data.
    pub fn has_samples(curves: &[CurveData]) -> Result<usize> {
        let mut per_point = None;
        for curve in curves {
            let spp = curve.samples_per_point().ok_or_else(|| {
                Error::computation("the curves were not recorded with multi-sampling")
            })?;
            if per_point.is_some_and(|p| p != spp) {
                return Err(Error::computation(
                    "all curves must have the same number of samples per point",
                ));
            }
            per_point = Some(spp);
        }
        per_point.ok_or_else(|| Error::computation("the dataset holds no curves"))
    }
}

#[cfg(test)]
mod tests {
    use super::{integrity, rows_to_matrix, MethodKind, MethodRun, RunState};
    use crate::curve::CurveData;
    use crate::store::{CurveDataId, CurveId, DatasetId, RunId, UserId};

    #[test]
    fn run_state_follows_the_flags() {
        let mut run =
            MethodRun::new(RunId(1), DatasetId(1), UserId(1), "m", MethodKind::Processing);
        assert_eq!(run.state(), RunState::AtStep(0));
        run.active_step = None;
        assert_eq!(run.state(), RunState::Idle);
        run.completed = true;
        assert_eq!(run.state(), RunState::Finished);
        run.deleted = true;
        assert_eq!(run.state(), RunState::Discarded);
    }

    #[test]
    fn custom_data_round_trips_typed_values() {
        let mut run = MethodRun::new(RunId(1), DatasetId(1), UserId(1), "m", MethodKind::Analysis);
        run.set_custom("result", &1.25_f64).unwrap();
        approx::assert_relative_eq!(run.custom::<f64>("result").unwrap(), 1.25);
        assert!(run.custom::<f64>("missing").is_err());
    }

    #[test]
    fn missing_export_values_read_back_as_nan() {
        struct Stub;
        impl super::Method for Stub {
            fn key(&self) -> &'static str {
                "stub"
            }
            fn display_name(&self) -> &'static str {
                "Stub"
            }
            fn kind(&self) -> MethodKind {
                MethodKind::Analysis
            }
            fn steps(&self, _config: &crate::config::Config) -> Vec<super::StepDescriptor> {
                vec![]
            }
            fn finalize(&self, _ctx: &mut super::MethodContext<'_>) -> crate::Result<()> {
                Ok(())
            }
            fn final_content(&self, _run: &MethodRun) -> crate::Result<String> {
                Ok(String::new())
            }
        }

        let mut run =
            MethodRun::new(RunId(1), DatasetId(1), UserId(1), "stub", MethodKind::Analysis);
        run.set_custom(super::EXPORT_KEY, &vec![vec![1.0, f64::NAN]]).unwrap();
        assert!(super::Method::exportable_data(&Stub, &run).is_err());
        run.completed = true;
        let matrix = super::Method::exportable_data(&Stub, &run).unwrap();
        assert_eq!(matrix[[0, 0]], 1.0);
        assert!(matrix[[0, 1]].is_nan());
    }

    #[test]
    fn ragged_rows_are_not_a_matrix() {
        assert!(rows_to_matrix(&[vec![1.0, 2.0], vec![3.0]]).is_err());
        assert_eq!(rows_to_matrix(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap().dim(), (2, 2));
    }

    #[test]
    fn lengths_must_agree() {
        let curve = |id, n| {
            CurveData::from_vectors(
                CurveDataId(id),
                UserId(1),
                CurveId(1),
                vec![0.0; n],
                vec![0.0; n],
                vec![0.0; n],
            )
                .unwrap()
        };
        assert_eq!(integrity::uniform_length(&[curve(1, 5), curve(2, 5)]).unwrap(), 5);
        assert!(integrity::uniform_length(&[curve(1, 5), curve(2, 4)]).is_err());
        assert!(integrity::has_samples(&[curve(1, 5)]).is_err());
    }
}
