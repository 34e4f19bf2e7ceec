use std::ops::{Index, IndexMut};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Number of slots in the analyzer parameter table
pub const PARAM_COUNT: usize = 64;

/// Slots of the analyzer parameter table.
///
/// The discriminant is the slot position used by the binary formats. Potentials are stored in mV,
/// times in ms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Param {
    /// Measurement technique, see [`Technique`]
    Method = 0,
    Sampling = 1,
    Electrodes = 2,
    Averaging = 3,
    Cyclic = 4,
    CurrentRange = 5,
    Polarographic = 6,
    ElectrodeType = 7,
    Multielectrode = 8,
    /// Starting potential
    Ep = 9,
    /// Final potential
    Ek = 10,
    /// Potential step
    Estep = 11,
    /// Pulse amplitude
    DeltaE = 12,
    /// Initial potential
    E0 = 13,
    /// Probing time
    Tp = 14,
    /// Waiting time
    Tw = 15,
    Tk = 16,
    Td = 17,
    /// Number of points of the curve
    Ptnr = 18,
    Kn = 19,
    Mi = 20,
    BreakNr = 21,
    Stirrer = 22,
    StirrerSpeed = 23,
    Mercury = 24,
    DropTime = 25,
    KnockPower = 26,
    KnockTime = 27,
    Impulse = 28,
    ImpulseWidth = 29,
    PretreatmentCount = 30,
    PretreatmentEnd = 31,
    PretreatmentPotential1 = 32,
    PretreatmentTime1 = 33,
    PretreatmentPotential2 = 34,
    PretreatmentTime2 = 35,
    PretreatmentPotential3 = 36,
    PretreatmentTime3 = 37,
    GasPurge = 38,
    GasTime = 39,
    Inertia = 40,
    Electrolysis = 41,
    ElectrolysisPotential = 42,
    ElectrolysisTime = 43,
    Equilibrium = 44,
    EquilibriumTime = 45,
    RotationSpeed = 46,
    Temperature = 47,
    DateDay = 48,
    DateMonth = 49,
    DateYear = 50,
    DateHour = 51,
    DateMinutes = 52,
    DateSeconds = 53,
    Potentiostat = 54,
    Gain = 55,
    Filter = 56,
    Resistance = 57,
    /// Non-zero when raw (non averaged) samples are stored with the curve
    NonAveragedSampling = 58,
    /// Samples acquired per point when raw samples are stored
    SamplesPerPoint = 59,
    /// Sampling frequency in Hz
    SamplingRate = 60,
    Vacuum = 61,
    Reserved62 = 62,
    Reserved63 = 63,
}

impl Param {
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Measurement techniques encoded in [`Param::Method`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Technique {
    StaircaseVoltammetry,
    NormalPulse,
    DifferentialPulse,
    SquareWave,
    LinearSweep,
    Unknown(i32),
}

impl From<i32> for Technique {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::StaircaseVoltammetry,
            1 => Self::NormalPulse,
            2 => Self::DifferentialPulse,
            3 => Self::SquareWave,
            4 => Self::LinearSweep,
            other => Self::Unknown(other),
        }
    }
}

/// Fixed 64-slot table of integer analyzer parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamTable(Vec<i32>);

impl Default for ParamTable {
    fn default() -> Self {
        Self(vec![0; PARAM_COUNT])
    }
}

impl ParamTable {
    /// Build a table from a dense slice of exactly [`PARAM_COUNT`] values
    pub fn from_dense(values: &[i32]) -> Option<Self> {
        (values.len() == PARAM_COUNT).then(|| Self(values.to_vec()))
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }

    /// Set a slot by raw position, ignoring positions outside the table
    pub fn set_raw(&mut self, slot: usize, value: i32) -> bool {
        self.0.get_mut(slot).map(|s| *s = value).is_some()
    }

    pub fn technique(&self) -> Technique {
        Technique::from(self[Param::Method])
    }

    /// Number of points, negative values count as zero
    pub fn points(&self) -> usize {
        usize::try_from(self[Param::Ptnr]).unwrap_or(0)
    }

    /// Samples stored per point, `None` unless non averaged sampling was enabled
    pub fn samples_per_point(&self) -> Option<usize> {
        if self[Param::NonAveragedSampling] == 0 {
            return None;
        }
        usize::try_from(self[Param::SamplesPerPoint])
            .ok()
            .filter(|&spp| spp > 0)
    }

    /// Acquisition timestamp from the date slots, `None` if they do not form a valid date
    pub fn acquisition_date(&self) -> Option<NaiveDateTime> {
        let as_u32 = |p: Param| u32::try_from(self[p]).ok();
        NaiveDate::from_ymd_opt(
            self[Param::DateYear],
            as_u32(Param::DateMonth)?,
            as_u32(Param::DateDay)?,
        )?
            .and_hms_opt(
                as_u32(Param::DateHour)?,
                as_u32(Param::DateMinutes)?,
                as_u32(Param::DateSeconds)?,
            )
    }

    /// Potential of point `index` for a staircase-like scan, in mV
    pub fn potential_at(&self, index: usize) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let index = index as f64;
        f64::from(self[Param::Estep]).mul_add(index, f64::from(self[Param::Ep]))
    }

    /// Time of point `index` assuming one probing and one waiting period per point, in ms
    pub fn time_at(&self, index: usize) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let index = index as f64;
        f64::from(self[Param::Tp] + self[Param::Tw]) * index
    }
}

impl Index<Param> for ParamTable {
    type Output = i32;

    fn index(&self, param: Param) -> &i32 {
        &self.0[param.index()]
    }
}

impl IndexMut<Param> for ParamTable {
    fn index_mut(&mut self, param: Param) -> &mut i32 {
        &mut self.0[param.index()]
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::{Param, ParamTable, Technique, PARAM_COUNT};

    #[test]
    fn date_slots_form_the_acquisition_date() {
        let mut params = ParamTable::default();
        params[Param::DateYear] = 2019;
        params[Param::DateMonth] = 3;
        params[Param::DateDay] = 14;
        params[Param::DateHour] = 9;
        params[Param::DateMinutes] = 26;
        params[Param::DateSeconds] = 53;

        let date = params.acquisition_date().unwrap();
        assert_eq!(date.year(), 2019);
        assert_eq!(date.day(), 14);
        assert_eq!(date.minute(), 26);
    }

    #[test]
    fn empty_date_slots_are_not_a_date() {
        assert!(ParamTable::default().acquisition_date().is_none());
    }

    #[test]
    fn dense_tables_must_have_every_slot() {
        assert!(ParamTable::from_dense(&[0; 10]).is_none());
        assert!(ParamTable::from_dense(&[0; PARAM_COUNT]).is_some());
    }

    #[test]
    fn samples_per_point_requires_the_sampling_flag() {
        let mut params = ParamTable::default();
        params[Param::SamplesPerPoint] = 20;
        assert_eq!(params.samples_per_point(), None);
        params[Param::NonAveragedSampling] = 1;
        assert_eq!(params.samples_per_point(), Some(20));
    }

    #[test]
    fn potentials_follow_the_staircase() {
        let mut params = ParamTable::default();
        params[Param::Ep] = -200;
        params[Param::Estep] = 2;
        params[Param::Method] = 2;
        approx::assert_relative_eq!(params.potential_at(50), -100.0);
        assert_eq!(params.technique(), Technique::DifferentialPulse);
    }
}
