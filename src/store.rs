//! Object store seam.
//!
//! Persistence is an external collaborator: the engine only needs typed reads, soft-delete
//! aware lookups and an atomic commit of a [`ChangeSet`]. [`InMemoryStore`] is the reference
//! implementation and [`Transaction`] layers buffered writes over any store, so a failed step
//! leaves nothing behind.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::curve::{Curve, CurveData};
use crate::dataset::{Analyte, Dataset};
use crate::method::MethodRun;
use crate::{Error, Result};

macro_rules! id_type {
    ($name:ident, $label:literal) => {
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} #{}", $label, self.0)
            }
        }
    };
}

id_type!(UserId, "user");
id_type!(CurveId, "curve");
id_type!(CurveDataId, "curve data");
id_type!(DatasetId, "dataset");
id_type!(AnalyteId, "analyte");
id_type!(RunId, "run");

/// The caller on whose behalf an operation runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

impl User {
    pub fn new(id: u64, name: &str) -> Self {
        Self {
            id: UserId(id),
            name: name.to_owned(),
        }
    }
}

/// Objects subject to permission checks
pub trait Owned {
    fn owner(&self) -> UserId;
}

/// Permission checks, denial is always reported as [`Error::NotAllowed`]
pub trait AccessPolicy: Send + Sync {
    fn can_read(&self, user: &User, object: &dyn Owned) -> bool;
    fn can_write(&self, user: &User, object: &dyn Owned) -> bool;
}

/// Only the owner may read or write
#[derive(Clone, Copy, Debug, Default)]
pub struct OwnerOnly;

impl AccessPolicy for OwnerOnly {
    fn can_read(&self, user: &User, object: &dyn Owned) -> bool {
        object.owner() == user.id
    }

    fn can_write(&self, user: &User, object: &dyn Owned) -> bool {
        object.owner() == user.id
    }
}

/// # Errors
/// Returns [`Error::NotAllowed`] if `policy` denies read access.
pub fn check_read(policy: &dyn AccessPolicy, user: &User, object: &dyn Owned) -> Result<()> {
    if policy.can_read(user, object) {
        Ok(())
    } else {
        Err(Error::NotAllowed(format!("{} may not read this object", user.id)))
    }
}

/// # Errors
/// Returns [`Error::NotAllowed`] if `policy` denies write access.
pub fn check_write(policy: &dyn AccessPolicy, user: &User, object: &dyn Owned) -> Result<()> {
    if policy.can_write(user, object) {
        Ok(())
    } else {
        Err(Error::NotAllowed(format!("{} may not modify this object", user.id)))
    }
}

/// Writes to be applied atomically
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    pub curves: BTreeMap<CurveId, Curve>,
    pub curve_data: BTreeMap<CurveDataId, CurveData>,
    pub datasets: BTreeMap<DatasetId, Dataset>,
    pub analytes: BTreeMap<AnalyteId, Analyte>,
    pub runs: BTreeMap<RunId, MethodRun>,
}

impl ChangeSet {
    pub fn put_curve(&mut self, curve: Curve) {
        self.curves.insert(curve.id, curve);
    }

    pub fn put_curve_data(&mut self, data: CurveData) {
        self.curve_data.insert(data.id, data);
    }

    pub fn put_dataset(&mut self, dataset: Dataset) {
        self.datasets.insert(dataset.id, dataset);
    }

    pub fn put_analyte(&mut self, analyte: Analyte) {
        self.analytes.insert(analyte.id, analyte);
    }

    pub fn put_run(&mut self, run: MethodRun) {
        self.runs.insert(run.id, run);
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
            && self.curve_data.is_empty()
            && self.datasets.is_empty()
            && self.analytes.is_empty()
            && self.runs.is_empty()
    }
}

/// Generic object store.
///
/// Getters return soft-deleted records too, callers decide whether those count as missing.
pub trait ObjectStore: Send + Sync {
    /// Fresh identifier, unique across all record types
    fn next_id(&self) -> u64;

    /// # Errors
    /// Returns [`Error::DoesNotExist`] if no curve has this id.
    fn curve(&self, id: CurveId) -> Result<Curve>;

    /// # Errors
    /// Returns [`Error::DoesNotExist`] if no curve data has this id.
    fn curve_data(&self, id: CurveDataId) -> Result<CurveData>;

    /// # Errors
    /// Returns [`Error::DoesNotExist`] if no dataset has this id.
    fn dataset(&self, id: DatasetId) -> Result<Dataset>;

    /// # Errors
    /// Returns [`Error::DoesNotExist`] if no analyte has this id.
    fn analyte(&self, id: AnalyteId) -> Result<Analyte>;

    fn find_analyte(&self, name: &str) -> Option<Analyte>;

    /// # Errors
    /// Returns [`Error::DoesNotExist`] if no run has this id.
    fn run(&self, id: RunId) -> Result<MethodRun>;

    /// Every run recorded against `dataset`, deleted ones included
    fn runs_for_dataset(&self, dataset: DatasetId) -> Vec<MethodRun>;

    /// Apply all writes of `changes` at once
    ///
    /// # Errors
    /// Returns an error if the store cannot persist the changes, in which case none are applied.
    fn commit(&self, changes: ChangeSet) -> Result<()>;
}

fn missing(what: impl fmt::Display) -> Error {
    Error::DoesNotExist(what.to_string())
}

#[derive(Default)]
struct Tables {
    curves: BTreeMap<CurveId, Curve>,
    curve_data: BTreeMap<CurveDataId, CurveData>,
    datasets: BTreeMap<DatasetId, Dataset>,
    analytes: BTreeMap<AnalyteId, Analyte>,
    runs: BTreeMap<RunId, MethodRun>,
}

/// Store kept in process memory
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        // tables are only written by `commit`, poisoning cannot leave them half updated
        let tables = self
            .tables
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&tables)
    }
}

impl ObjectStore for InMemoryStore {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn curve(&self, id: CurveId) -> Result<Curve> {
        self.read(|t| t.curves.get(&id).cloned())
            .ok_or_else(|| missing(id))
    }

    fn curve_data(&self, id: CurveDataId) -> Result<CurveData> {
        self.read(|t| t.curve_data.get(&id).cloned())
            .ok_or_else(|| missing(id))
    }

    fn dataset(&self, id: DatasetId) -> Result<Dataset> {
        self.read(|t| t.datasets.get(&id).cloned())
            .ok_or_else(|| missing(id))
    }

    fn analyte(&self, id: AnalyteId) -> Result<Analyte> {
        self.read(|t| t.analytes.get(&id).cloned())
            .ok_or_else(|| missing(id))
    }

    fn find_analyte(&self, name: &str) -> Option<Analyte> {
        self.read(|t| t.analytes.values().find(|a| a.name == name).cloned())
    }

    fn run(&self, id: RunId) -> Result<MethodRun> {
        self.read(|t| t.runs.get(&id).cloned())
            .ok_or_else(|| missing(id))
    }

    fn runs_for_dataset(&self, dataset: DatasetId) -> Vec<MethodRun> {
        self.read(|t| {
            t.runs
                .values()
                .filter(|run| run.dataset == dataset)
                .cloned()
                .collect()
        })
    }

    fn commit(&self, changes: ChangeSet) -> Result<()> {
        let mut tables = self
            .tables
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tables.curves.extend(changes.curves);
        tables.curve_data.extend(changes.curve_data);
        tables.datasets.extend(changes.datasets);
        tables.analytes.extend(changes.analytes);
        tables.runs.extend(changes.runs);
        Ok(())
    }
}

/// Buffered writes over a store.
///
/// Reads see pending writes first. Dropping the transaction discards everything, [`commit`]
/// hands the whole change set to the store in one call.
///
/// [`commit`]: Transaction::commit
pub struct Transaction<'a> {
    store: &'a dyn ObjectStore,
    pending: ChangeSet,
}

impl<'a> Transaction<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self {
            store,
            pending: ChangeSet::default(),
        }
    }

    /// # Errors
    /// Propagates the store's commit error.
    pub fn commit(self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.store.commit(self.pending)
    }

    pub const fn pending(&self) -> &ChangeSet {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut ChangeSet {
        &mut self.pending
    }

    pub fn put_curve_data(&mut self, data: CurveData) {
        self.pending.put_curve_data(data);
    }

    pub fn put_dataset(&mut self, dataset: Dataset) {
        self.pending.put_dataset(dataset);
    }

    pub fn put_run(&mut self, run: MethodRun) {
        self.pending.put_run(run);
    }
}

impl ObjectStore for Transaction<'_> {
    fn next_id(&self) -> u64 {
        self.store.next_id()
    }

    fn curve(&self, id: CurveId) -> Result<Curve> {
        match self.pending.curves.get(&id) {
            Some(curve) => Ok(curve.clone()),
            None => self.store.curve(id),
        }
    }

    fn curve_data(&self, id: CurveDataId) -> Result<CurveData> {
        match self.pending.curve_data.get(&id) {
            Some(data) => Ok(data.clone()),
            None => self.store.curve_data(id),
        }
    }

    fn dataset(&self, id: DatasetId) -> Result<Dataset> {
        match self.pending.datasets.get(&id) {
            Some(dataset) => Ok(dataset.clone()),
            None => self.store.dataset(id),
        }
    }

    fn analyte(&self, id: AnalyteId) -> Result<Analyte> {
        match self.pending.analytes.get(&id) {
            Some(analyte) => Ok(analyte.clone()),
            None => self.store.analyte(id),
        }
    }

    fn find_analyte(&self, name: &str) -> Option<Analyte> {
        self.pending
            .analytes
            .values()
            .find(|a| a.name == name)
            .cloned()
            .or_else(|| self.store.find_analyte(name))
    }

    fn run(&self, id: RunId) -> Result<MethodRun> {
        match self.pending.runs.get(&id) {
            Some(run) => Ok(run.clone()),
            None => self.store.run(id),
        }
    }

    fn runs_for_dataset(&self, dataset: DatasetId) -> Vec<MethodRun> {
        let mut runs: BTreeMap<RunId, MethodRun> = self
            .store
            .runs_for_dataset(dataset)
            .into_iter()
            .map(|run| (run.id, run))
            .collect();
        for run in self.pending.runs.values().filter(|r| r.dataset == dataset) {
            runs.insert(run.id, run.clone());
        }
        runs.into_values().collect()
    }

    fn commit(&self, _changes: ChangeSet) -> Result<()> {
        Err(Error::NotAllowed(
            "nested commits are not supported, write through the transaction".to_owned(),
        ))
    }
}
