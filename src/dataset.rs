use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::store::{AnalyteId, CurveDataId, DatasetId, Owned, RunId, UserId};
use crate::{Error, Result};

/// A chemical species whose concentration is determined
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Analyte {
    pub id: AnalyteId,
    /// Unique across the store
    pub name: String,
    pub atomic_mass: Option<f64>,
}

/// Concentration units, stored by code
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcentrationUnit {
    #[default]
    GramsPerLitre,
    MilligramsPerLitre,
    MicrogramsPerLitre,
    NanogramsPerLitre,
    Molar,
    Millimolar,
    Micromolar,
    Nanomolar,
}

impl ConcentrationUnit {
    pub const fn code(self) -> &'static str {
        match self {
            Self::GramsPerLitre => "g/L",
            Self::MilligramsPerLitre => "mg/L",
            Self::MicrogramsPerLitre => "µg/L",
            Self::NanogramsPerLitre => "ng/L",
            Self::Molar => "M",
            Self::Millimolar => "mM",
            Self::Micromolar => "µM",
            Self::Nanomolar => "nM",
        }
    }
}

/// Sparse `analyte -> curve -> concentration` table.
///
/// Entries that are not stored read as `0.0`. [`ConcentrationTable::reconcile`] brings the table in
/// line with a membership list, so after every membership change each analyte has an explicit
/// entry for each member and none for former members.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationTable {
    values: BTreeMap<AnalyteId, BTreeMap<CurveDataId, f64>>,
    units: BTreeMap<AnalyteId, ConcentrationUnit>,
}

impl ConcentrationTable {
    pub fn get(&self, analyte: AnalyteId, curve: CurveDataId) -> f64 {
        self.values
            .get(&analyte)
            .and_then(|per_curve| per_curve.get(&curve))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn set(&mut self, analyte: AnalyteId, curve: CurveDataId, value: f64) {
        self.values.entry(analyte).or_default().insert(curve, value);
    }

    pub fn unit(&self, analyte: AnalyteId) -> ConcentrationUnit {
        self.units.get(&analyte).copied().unwrap_or_default()
    }

    pub fn set_unit(&mut self, analyte: AnalyteId, unit: ConcentrationUnit) {
        self.units.insert(analyte, unit);
    }

    pub fn contains_analyte(&self, analyte: AnalyteId) -> bool {
        self.values.contains_key(&analyte)
    }

    pub fn remove_analyte(&mut self, analyte: AnalyteId) {
        self.values.remove(&analyte);
        self.units.remove(&analyte);
    }

    /// Move the concentrations of `from` onto `to`, used when a member is replaced by its
    /// processed copy
    pub fn transfer(&mut self, from: CurveDataId, to: CurveDataId) {
        for per_curve in self.values.values_mut() {
            if let Some(value) = per_curve.remove(&from) {
                per_curve.insert(to, value);
            }
        }
    }

    /// Fill missing member entries with `0.0` and drop entries of non-members
    pub fn reconcile(&mut self, analytes: &[AnalyteId], members: &[CurveDataId]) {
        self.values.retain(|analyte, _| analytes.contains(analyte));
        self.units.retain(|analyte, _| analytes.contains(analyte));
        for analyte in analytes {
            let per_curve = self.values.entry(*analyte).or_default();
            per_curve.retain(|curve, _| members.contains(curve));
            for member in members {
                per_curve.entry(*member).or_insert(0.0);
            }
        }
    }
}

/// State restored by [`Dataset::undo`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UndoSnapshot {
    pub members: Vec<CurveDataId>,
    pub analytes: Vec<AnalyteId>,
    pub concentrations: ConcentrationTable,
    /// Processing run that produced the current state
    pub produced_by: RunId,
}

/// One processing run applied to, or undone on, a dataset
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub run: RunId,
    pub method: String,
    #[serde(default)]
    pub undone: bool,
}

/// Named collection of curve versions with concentration bookkeeping
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub owner: UserId,
    pub name: String,
    members: Vec<CurveDataId>,
    analytes: Vec<AnalyteId>,
    concentrations: ConcentrationTable,
    undo: Option<UndoSnapshot>,
    history: Vec<HistoryEntry>,
    locked: bool,
    pub deleted: bool,
}

impl Owned for Dataset {
    fn owner(&self) -> UserId {
        self.owner
    }
}

impl Dataset {
    pub fn new(id: DatasetId, owner: UserId, name: &str) -> Self {
        Self {
            id,
            owner,
            name: name.to_owned(),
            members: vec![],
            analytes: vec![],
            concentrations: ConcentrationTable::default(),
            undo: None,
            history: vec![],
            locked: false,
            deleted: false,
        }
    }

    pub fn members(&self) -> &[CurveDataId] {
        &self.members
    }

    pub fn analytes(&self) -> &[AnalyteId] {
        &self.analytes
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    pub const fn undo_snapshot(&self) -> Option<&UndoSnapshot> {
        self.undo.as_ref()
    }

    /// Once an analysis has been run the membership is frozen for good
    pub fn lock(&mut self) {
        self.locked = true;
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.locked {
            return Err(Error::NotAllowed(format!(
                "{} is locked by an analysis",
                self.id
            )));
        }
        Ok(())
    }

    fn reconcile(&mut self) {
        self.concentrations.reconcile(&self.analytes, &self.members);
    }

    /// # Errors
    /// Returns [`Error::NotAllowed`] if the dataset is locked.
    pub fn add_curve(&mut self, curve: CurveDataId) -> Result<()> {
        self.ensure_unlocked()?;
        if !self.members.contains(&curve) {
            self.members.push(curve);
        }
        self.reconcile();
        Ok(())
    }

    /// # Errors
    /// Returns [`Error::NotAllowed`] if the dataset is locked.
    pub fn remove_curve(&mut self, curve: CurveDataId) -> Result<()> {
        self.ensure_unlocked()?;
        self.members.retain(|member| *member != curve);
        self.reconcile();
        Ok(())
    }

    /// Put `new` in the place of `old`, keeping order and concentrations
    ///
    /// # Errors
    /// Returns [`Error::NotAllowed`] if the dataset is locked and [`Error::DoesNotExist`] if `old`
    /// is not a member.
    pub fn replace_curve(&mut self, old: CurveDataId, new: CurveDataId) -> Result<()> {
        self.ensure_unlocked()?;
        let position = self
            .members
            .iter()
            .position(|member| *member == old)
            .ok_or_else(|| Error::DoesNotExist(format!("{old} is not a member of {}", self.id)))?;
        self.members[position] = new;
        self.concentrations.transfer(old, new);
        self.reconcile();
        Ok(())
    }

    /// Replace the whole membership, concentrations of surviving members are kept
    ///
    /// # Errors
    /// Returns [`Error::NotAllowed`] if the dataset is locked.
    pub fn set_members(&mut self, members: Vec<CurveDataId>) -> Result<()> {
        self.ensure_unlocked()?;
        self.members = members;
        self.reconcile();
        Ok(())
    }

    pub fn add_analyte(&mut self, analyte: AnalyteId, unit: ConcentrationUnit) {
        if !self.analytes.contains(&analyte) {
            self.analytes.push(analyte);
        }
        self.concentrations.set_unit(analyte, unit);
        self.reconcile();
    }

    /// # Errors
    /// Returns [`Error::DoesNotExist`] if the analyte or the curve do not belong to the dataset.
    pub fn set_concentration(
        &mut self,
        analyte: AnalyteId,
        curve: CurveDataId,
        value: f64,
    ) -> Result<()> {
        if !self.analytes.contains(&analyte) {
            return Err(Error::DoesNotExist(format!("{analyte} in {}", self.id)));
        }
        if !self.members.contains(&curve) {
            return Err(Error::DoesNotExist(format!("{curve} in {}", self.id)));
        }
        self.concentrations.set(analyte, curve, value);
        Ok(())
    }

    pub fn concentration(&self, analyte: AnalyteId, curve: CurveDataId) -> f64 {
        self.concentrations.get(analyte, curve)
    }

    /// Concentrations of `analyte` in member order
    pub fn concentrations_for(&self, analyte: AnalyteId) -> Vec<f64> {
        self.members
            .iter()
            .map(|member| self.concentrations.get(analyte, *member))
            .collect()
    }

    pub fn unit(&self, analyte: AnalyteId) -> ConcentrationUnit {
        self.concentrations.unit(analyte)
    }

    pub const fn concentration_table(&self) -> &ConcentrationTable {
        &self.concentrations
    }

    /// Remember the current state before `run` changes it
    pub fn snapshot_for_undo(&mut self, run: RunId) {
        self.undo = Some(UndoSnapshot {
            members: self.members.clone(),
            analytes: self.analytes.clone(),
            concentrations: self.concentrations.clone(),
            produced_by: run,
        });
    }

    pub fn record_history(&mut self, run: RunId, method: &str) {
        self.history.push(HistoryEntry {
            run,
            method: method.to_owned(),
            undone: false,
        });
    }

    /// Restore the snapshot, returning the run that is being undone
    ///
    /// # Errors
    /// Returns [`Error::NotAllowed`] if the dataset is locked or there is nothing to undo.
    pub fn undo(&mut self) -> Result<RunId> {
        self.ensure_unlocked()?;
        let snapshot = self
            .undo
            .take()
            .ok_or_else(|| Error::NotAllowed(format!("nothing to undo in {}", self.id)))?;
        self.members = snapshot.members;
        self.analytes = snapshot.analytes;
        self.concentrations = snapshot.concentrations;
        let method = self
            .history
            .iter()
            .rev()
            .find(|entry| entry.run == snapshot.produced_by)
            .map(|entry| entry.method.clone())
            .unwrap_or_default();
        self.history.push(HistoryEntry {
            run: snapshot.produced_by,
            method,
            undone: true,
        });
        Ok(snapshot.produced_by)
    }
}
