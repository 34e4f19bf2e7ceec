use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::params::ParamTable;
use crate::store::{CurveDataId, CurveId, Owned, RunId, UserId};
use crate::{Error, Result};

/// One acquired measurement, immutable once parsed
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Curve {
    pub id: CurveId,
    pub owner: UserId,
    /// Name of the file the curve was read from
    pub file_name: String,
    pub name: String,
    pub comment: String,
    pub params: ParamTable,
    pub date: Option<NaiveDateTime>,
    pub potential: Vec<f64>,
    pub time: Vec<f64>,
    pub current: Vec<f64>,
    pub current_samples: Option<Vec<f64>>,
}

impl Owned for Curve {
    fn owner(&self) -> UserId {
        self.owner
    }
}

/// Quantity used as the abscissa when curves are inspected or ranges are selected
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum XAxis {
    #[default]
    Potential,
    Time,
    /// Index of the point
    Sample,
}

/// A version of a curve's signal, possibly processed.
///
/// Processing never mutates a `CurveData` in place, a copy is made with [`CurveData::get_copy`]
/// and the copy records where it came from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CurveData {
    pub id: CurveDataId,
    pub owner: UserId,
    pub curve: CurveId,
    pub based_on: Option<CurveDataId>,
    pub processed_with: Option<RunId>,
    /// Ancestors, oldest first
    pub lineage: Vec<CurveDataId>,
    pub date: Option<NaiveDateTime>,
    potential: Vec<f64>,
    time: Vec<f64>,
    current: Vec<f64>,
    current_samples: Option<Vec<f64>>,
    samples_per_point: Option<usize>,
}

impl Owned for CurveData {
    fn owner(&self) -> UserId {
        self.owner
    }
}

impl CurveData {
    /// Build the first version of `curve`'s signal
    pub fn from_curve(id: CurveDataId, curve: &Curve) -> Self {
        Self {
            id,
            owner: curve.owner,
            curve: curve.id,
            based_on: None,
            processed_with: None,
            lineage: vec![],
            date: curve.date,
            potential: curve.potential.clone(),
            time: curve.time.clone(),
            current: curve.current.clone(),
            current_samples: curve.current_samples.clone(),
            samples_per_point: curve.params.samples_per_point(),
        }
    }

    /// Build a stand-alone signal
    ///
    /// # Errors
    /// Returns [`Error::ComputationFailed`] if the vectors have different lengths.
    pub fn from_vectors(
        id: CurveDataId,
        owner: UserId,
        curve: CurveId,
        potential: Vec<f64>,
        time: Vec<f64>,
        current: Vec<f64>,
    ) -> Result<Self> {
        if potential.len() != current.len() || time.len() != current.len() {
            return Err(Error::computation(format!(
                "inconsistent curve lengths: potential {}, time {}, current {}",
                potential.len(),
                time.len(),
                current.len()
            )));
        }
        Ok(Self {
            id,
            owner,
            curve,
            based_on: None,
            processed_with: None,
            lineage: vec![],
            date: None,
            potential,
            time,
            current,
            current_samples: None,
            samples_per_point: None,
        })
    }

    /// Attach raw oversampled current, `samples.len()` must be a multiple of the point count
    ///
    /// # Errors
    /// Returns [`Error::ComputationFailed`] if the samples do not divide into the points.
    pub fn with_current_samples(mut self, samples: Vec<f64>) -> Result<Self> {
        let points = self.len();
        if points == 0 || samples.is_empty() || samples.len() % points != 0 {
            return Err(Error::computation(format!(
                "{} samples cannot be split over {points} points",
                samples.len()
            )));
        }
        self.samples_per_point = Some(samples.len() / points);
        self.current_samples = Some(samples);
        Ok(self)
    }

    /// New identity holding the same signal, derived from `self`
    #[must_use]
    pub fn get_copy(&self, id: CurveDataId) -> Self {
        let mut lineage = self.lineage.clone();
        lineage.push(self.id);
        Self {
            id,
            based_on: Some(self.id),
            processed_with: None,
            lineage,
            ..self.clone()
        }
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    pub fn potential(&self) -> &[f64] {
        &self.potential
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn current(&self) -> &[f64] {
        &self.current
    }

    pub fn current_samples(&self) -> Option<&[f64]> {
        self.current_samples.as_deref()
    }

    pub const fn samples_per_point(&self) -> Option<usize> {
        self.samples_per_point
    }

    /// Raw samples acquired for point `index`
    pub fn samples_of_point(&self, index: usize) -> Option<&[f64]> {
        let spp = self.samples_per_point?;
        self.current_samples
            .as_deref()?
            .get(index * spp..(index + 1) * spp)
    }

    /// Replace the current vector
    ///
    /// # Errors
    /// Returns [`Error::ComputationFailed`] if the length changes.
    pub fn set_current(&mut self, current: Vec<f64>) -> Result<()> {
        if current.len() != self.current.len() {
            return Err(Error::computation(format!(
                "processed current has {} points, expected {}",
                current.len(),
                self.current.len()
            )));
        }
        self.current = current;
        Ok(())
    }

    /// Abscissa for `axis`
    pub fn x_vector(&self, axis: XAxis) -> Vec<f64> {
        match axis {
            XAxis::Potential => self.potential.clone(),
            XAxis::Time => self.time.clone(),
            #[allow(clippy::cast_precision_loss)]
            XAxis::Sample => (0..self.len()).map(|i| i as f64).collect(),
        }
    }

    pub fn y_vector(&self) -> &[f64] {
        &self.current
    }

    /// Index of the point whose abscissa is closest to `value`
    pub fn x_index(&self, axis: XAxis, value: f64) -> Option<usize> {
        self.x_vector(axis)
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (*a - value).abs().total_cmp(&(*b - value).abs()))
            .map(|(index, _)| index)
    }

    /// Sorted index range `[start, end]` covering the abscissa interval between `a` and `b`
    pub fn index_range(&self, axis: XAxis, a: f64, b: f64) -> Option<(usize, usize)> {
        let start = self.x_index(axis, a)?;
        let end = self.x_index(axis, b)?;
        Some((start.min(end), start.max(end)))
    }
}

#[cfg(test)]
mod tests {
    use super::{CurveData, XAxis};
    use crate::store::{CurveDataId, CurveId, UserId};
    use crate::Result;

    fn ramp(points: usize) -> CurveData {
        #[allow(clippy::cast_precision_loss)]
        let potential = (0..points).map(|i| -100.0 + 2.0 * i as f64).collect();
        #[allow(clippy::cast_precision_loss)]
        let time = (0..points).map(|i| 10.0 * i as f64).collect();
        let current = vec![1.0; points];
        CurveData::from_vectors(CurveDataId(1), UserId(1), CurveId(1), potential, time, current)
            .unwrap()
    }

    #[test]
    fn index_lookup_picks_the_nearest_point() {
        let data = ramp(100);
        assert_eq!(data.x_index(XAxis::Potential, -100.0), Some(0));
        assert_eq!(data.x_index(XAxis::Potential, -95.1), Some(2));
        assert_eq!(data.x_index(XAxis::Time, 10_000.0), Some(99));
        assert_eq!(data.x_index(XAxis::Sample, 42.4), Some(42));
    }

    #[test]
    fn ranges_are_normalised() {
        let data = ramp(100);
        assert_eq!(data.index_range(XAxis::Sample, 50.0, 10.0), Some((10, 50)));
    }

    #[test]
    fn copies_extend_the_lineage() {
        let original = ramp(4);
        let first = original.get_copy(CurveDataId(2));
        let second = first.get_copy(CurveDataId(3));

        assert_eq!(second.based_on, Some(CurveDataId(2)));
        assert_eq!(second.lineage, vec![CurveDataId(1), CurveDataId(2)]);
        assert_eq!(second.current(), original.current());
    }

    #[test]
    fn inconsistent_vectors_are_rejected() {
        let err = CurveData::from_vectors(
            CurveDataId(1),
            UserId(1),
            CurveId(1),
            vec![0.0; 3],
            vec![0.0; 3],
            vec![0.0; 2],
        );
        assert!(err.is_err());
    }

    #[test]
    fn samples_are_split_per_point() -> Result<()> {
        let data = ramp(3).with_current_samples(vec![1., 2., 3., 4., 5., 6.])?;
        assert_eq!(data.samples_per_point(), Some(2));
        assert_eq!(data.samples_of_point(1), Some(&[3., 4.][..]));
        assert!(ramp(3).with_current_samples(vec![1.0; 4]).is_err());
        Ok(())
    }
}
