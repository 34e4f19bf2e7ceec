//! The step engine.
//!
//! Drives a [`MethodRun`] through its method's steps. Every transition reads the run, works on a
//! copy and writes the copy back in a single commit, so a failed transition leaves the stored run
//! exactly as it was. Every transition that reads and writes a dataset, or a run of it, holds that
//! dataset's mutex, so writes to one dataset never interleave. Distinct datasets proceed
//! independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use ndarray::Array2;
use serde_json::Value;

use crate::config::Config;
use crate::dataset::Dataset;
use crate::method::{Method, MethodContext, MethodKind, MethodRun, RunState};
use crate::registry;
use crate::steps::{StepContext, StepInput, StepOutcome};
use crate::store::{
    check_read, check_write, AccessPolicy, CurveDataId, DatasetId, ObjectStore, OwnerOnly, RunId,
    Transaction, User,
};
use crate::{Error, Result};

/// What the caller needs to render the current step
#[derive(Clone, Debug, PartialEq)]
pub struct StepView {
    pub index: usize,
    /// Number of steps of the method
    pub count: usize,
    pub title: &'static str,
    pub description: &'static str,
    pub kind: &'static str,
    pub initial: Option<Value>,
}

#[derive(Clone, Copy)]
enum Pipeline {
    Finalize,
    Apply,
}

pub struct StepEngine<S, P = OwnerOnly> {
    store: S,
    policy: P,
    config: Config,
    locks: Mutex<HashMap<DatasetId, Arc<Mutex<()>>>>,
}

impl<S: ObjectStore> StepEngine<S, OwnerOnly> {
    pub fn new(store: S, config: Config) -> Self {
        Self::with_policy(store, OwnerOnly, config)
    }
}

impl<S: ObjectStore, P: AccessPolicy> StepEngine<S, P> {
    pub fn with_policy(store: S, policy: P, config: Config) -> Self {
        Self {
            store,
            policy,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Run `f` holding the mutex of `dataset`. The entry is dropped from the map once nobody else
    /// holds or waits for it.
    fn locked<T>(&self, dataset: DatasetId, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(dataset).or_default())
        };
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        drop(lock);
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&dataset)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&dataset);
        }
        result
    }

    #[cfg(test)]
    fn held_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn dataset(&self, user: &User, id: DatasetId, write: bool) -> Result<Dataset> {
        let dataset = self.store.dataset(id)?;
        if dataset.deleted {
            return Err(Error::DoesNotExist(id.to_string()));
        }
        if write {
            check_write(&self.policy, user, &dataset)?;
        } else {
            check_read(&self.policy, user, &dataset)?;
        }
        Ok(dataset)
    }

    fn run(&self, user: &User, id: RunId, write: bool) -> Result<MethodRun> {
        let run = self.store.run(id)?;
        if run.deleted {
            return Err(Error::DoesNotExist(id.to_string()));
        }
        if write {
            check_write(&self.policy, user, &run)?;
        } else {
            check_read(&self.policy, user, &run)?;
        }
        Ok(run)
    }

    fn persist_run(&self, run: MethodRun) -> Result<()> {
        let mut txn = Transaction::new(&self.store);
        txn.put_run(run);
        txn.commit()
    }

    /// Create a run of `method_key` on `dataset`, positioned at the first step
    ///
    /// # Errors
    /// Returns [`Error::DoesNotExist`] for unknown methods or datasets, [`Error::NotAllowed`] if
    /// the user may not modify the dataset or a processing method is started on a locked dataset.
    pub fn start(&self, user: &User, method_key: &str, dataset: DatasetId) -> Result<RunId> {
        self.locked(dataset, || self.create_run(user, method_key, dataset))
    }

    fn create_run(&self, user: &User, method_key: &str, dataset: DatasetId) -> Result<RunId> {
        let method = registry::get(method_key)?;
        let mut dataset = self.dataset(user, dataset, true)?;
        let kind = method.kind();
        if kind == MethodKind::Processing && dataset.is_locked() {
            return Err(Error::NotAllowed(format!(
                "{} is locked by an analysis, it cannot be processed",
                dataset.id
            )));
        }

        let id = RunId(self.store.next_id());
        let run = MethodRun::new(id, dataset.id, user.id, method_key, kind);
        let mut txn = Transaction::new(&self.store);
        if kind == MethodKind::Analysis && !dataset.is_locked() {
            dataset.lock();
            txn.put_dataset(dataset);
        }
        txn.put_run(run);
        txn.commit()?;
        info!("{} started {} ({method_key})", user.id, id);
        Ok(id)
    }

    /// # Errors
    /// Returns [`Error::DoesNotExist`] for missing or deleted runs and [`Error::NotAllowed`] if the
    /// user may not read the run.
    pub fn state(&self, user: &User, run: RunId) -> Result<RunState> {
        let record = self.store.run(run)?;
        check_read(&self.policy, user, &record)?;
        Ok(record.state())
    }

    /// # Errors
    /// Returns [`Error::NotAllowed`] if the run is not waiting for input.
    pub fn current_step(&self, user: &User, run: RunId) -> Result<StepView> {
        let run = self.run(user, run, false)?;
        let RunState::AtStep(index) = run.state() else {
            return Err(Error::NotAllowed(format!("{} is not waiting for input", run.id)));
        };
        let method = registry::get(&run.method)?;
        let dataset = self.dataset(user, run.dataset, false)?;
        let steps = method.steps(&self.config);
        let descriptor = steps
            .get(index)
            .ok_or_else(|| Error::computation(format!("{} has no step {index}", run.method)))?;
        Ok(StepView {
            index,
            count: steps.len(),
            title: descriptor.title,
            description: descriptor.description,
            kind: descriptor.step.kind(),
            initial: method
                .initial_for_step(index, &run, &dataset)
                .or_else(|| descriptor.step.initial()),
        })
    }

    /// Validate `input` against the current step and advance, finalizing after the last step
    ///
    /// # Errors
    /// Returns [`Error::ValidationFailed`] for rejected input, leaving the run untouched, and the
    /// method's error if finalizing fails, in which case the run is discarded.
    pub fn submit(&self, user: &User, run: RunId, input: &StepInput) -> Result<RunState> {
        let dataset = self.run(user, run, true)?.dataset;
        self.locked(dataset, || self.advance(user, run, input))
    }

    fn advance(&self, user: &User, run: RunId, input: &StepInput) -> Result<RunState> {
        let mut run = self.run(user, run, true)?;
        let RunState::AtStep(index) = run.state() else {
            return Err(Error::NotAllowed(format!("{} is not waiting for input", run.id)));
        };
        let dataset = self.dataset(user, run.dataset, true)?;
        let method = registry::get(&run.method)?;
        let steps = method.steps(&self.config);
        let descriptor = steps
            .get(index)
            .ok_or_else(|| Error::computation(format!("{} has no step {index}", run.method)))?;

        let original = run.clone();
        let outcome = descriptor.step.process(
            input,
            &mut StepContext {
                dataset: &dataset,
                run: &mut run,
            },
        );
        match outcome {
            Err(e) => {
                debug!("{} rejected input for step {index}: {e}", original.id);
                Err(e)
            }
            Ok(StepOutcome::Back) => self.rewind(original),
            Ok(StepOutcome::Advance) if index + 1 < steps.len() => {
                run.active_step = Some(index + 1);
                let state = run.state();
                self.persist_run(run)?;
                info!("{} advanced to step {}", original.id, index + 1);
                Ok(state)
            }
            Ok(StepOutcome::Advance) => {
                run.active_step = None;
                run.completed = true;
                self.complete(user, method.as_ref(), run, dataset, original, Pipeline::Finalize)
            }
        }
    }

    /// Go one step back, discarding the run when it is at its first step
    ///
    /// # Errors
    /// Returns [`Error::NotAllowed`] if the run is not waiting for input.
    pub fn back(&self, user: &User, run: RunId) -> Result<RunState> {
        let dataset = self.run(user, run, true)?.dataset;
        self.locked(dataset, || self.rewind(self.run(user, run, true)?))
    }

    fn rewind(&self, mut run: MethodRun) -> Result<RunState> {
        match run.state() {
            RunState::AtStep(0) => {
                run.deleted = true;
                info!("{} cancelled", run.id);
            }
            RunState::AtStep(index) => {
                run.active_step = Some(index - 1);
                info!("{} went back to step {}", run.id, index - 1);
            }
            _ => {
                return Err(Error::NotAllowed(format!("{} is not waiting for input", run.id)));
            }
        }
        let state = run.state();
        self.persist_run(run)?;
        Ok(state)
    }

    /// Run `pipeline` inside a transaction and commit its writes together with `run` and
    /// `dataset`. On failure nothing of the attempt survives and `discard` is stored soft-deleted.
    fn complete(
        &self,
        user: &User,
        method: &dyn Method,
        run: MethodRun,
        dataset: Dataset,
        mut discard: MethodRun,
        pipeline: Pipeline,
    ) -> Result<RunState> {
        let id = run.id;
        match self.execute(user, method, run, dataset, pipeline) {
            Ok(state) => {
                info!("{id} completed ({})", method.key());
                Ok(state)
            }
            Err(e) => {
                warn!("{id} failed ({}): {e}", method.key());
                discard.deleted = true;
                self.persist_run(discard)?;
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        user: &User,
        method: &dyn Method,
        run: MethodRun,
        mut dataset: Dataset,
        pipeline: Pipeline,
    ) -> Result<RunState> {
        let processing = run.kind == MethodKind::Processing;
        if processing {
            if dataset.is_locked() {
                return Err(Error::NotAllowed(format!(
                    "{} is locked by an analysis, it cannot be processed",
                    dataset.id
                )));
            }
            dataset.snapshot_for_undo(run.id);
        }
        let before: Vec<CurveDataId> = dataset.members().to_vec();

        let mut ctx = MethodContext {
            user,
            config: &self.config,
            run,
            dataset,
            txn: Transaction::new(&self.store),
        };
        method.check_integrity(&ctx)?;
        match pipeline {
            Pipeline::Finalize => method.finalize(&mut ctx)?,
            Pipeline::Apply => method.apply(&mut ctx)?,
        }

        let MethodContext {
            run,
            mut dataset,
            mut txn,
            ..
        } = ctx;
        if processing {
            let produced: Vec<CurveDataId> = dataset
                .members()
                .iter()
                .filter(|id| !before.contains(id))
                .copied()
                .collect();
            for id in produced {
                let mut data = txn.curve_data(id)?;
                data.processed_with = Some(run.id);
                txn.put_curve_data(data);
            }
            dataset.record_history(run.id, &run.method);
        }
        let state = run.state();
        txn.put_dataset(dataset);
        txn.put_run(run);
        txn.commit()?;
        Ok(state)
    }

    /// Re-use the parameters of completed run `model` on another dataset
    ///
    /// # Errors
    /// Returns [`Error::NotAllowed`] if `model` has not completed, [`Error::NotApplicable`] if its
    /// method cannot be re-used and the method's error if the new dataset does not suit it.
    pub fn apply(&self, user: &User, model: RunId, dataset: DatasetId) -> Result<RunId> {
        self.locked(dataset, || self.derive_run(user, model, dataset))
    }

    fn derive_run(&self, user: &User, model: RunId, dataset: DatasetId) -> Result<RunId> {
        let model = self.run(user, model, false)?;
        if !model.completed {
            return Err(Error::NotAllowed(format!("{} has not completed", model.id)));
        }
        let method = registry::get(&model.method)?;
        let mut dataset = self.dataset(user, dataset, true)?;
        if let Some(analyte) = model.analyte {
            if !dataset.analytes().contains(&analyte) {
                return Err(Error::computation(format!(
                    "{analyte} is not defined in {}",
                    dataset.id
                )));
            }
        }

        let id = RunId(self.store.next_id());
        let mut derived = MethodRun::new(id, dataset.id, user.id, &model.method, model.kind);
        derived.step_data = model.step_data.clone();
        derived.analyte = model.analyte;
        derived.applies_model = Some(model.id);
        if derived.kind == MethodKind::Analysis {
            dataset.lock();
        }

        let discard = derived.clone();
        derived.active_step = None;
        derived.completed = true;
        match self.execute(user, method.as_ref(), derived, dataset, Pipeline::Apply) {
            Ok(_) => {
                info!("{id} applied {} to a new dataset", model.id);
                Ok(id)
            }
            Err(Error::NotApplicable(reason)) => Err(Error::NotApplicable(reason)),
            Err(e) => {
                warn!("applying {} failed: {e}", model.id);
                let mut discard = discard;
                discard.active_step = None;
                discard.deleted = true;
                self.persist_run(discard)?;
                Err(e)
            }
        }
    }

    /// Restore the dataset as it was before its last processing and discard that processing run
    ///
    /// # Errors
    /// Returns [`Error::NotAllowed`] if the dataset is locked or has nothing to undo.
    pub fn undo(&self, user: &User, dataset: DatasetId) -> Result<RunId> {
        self.locked(dataset, || self.restore(user, dataset))
    }

    fn restore(&self, user: &User, dataset: DatasetId) -> Result<RunId> {
        let mut dataset = self.dataset(user, dataset, true)?;
        let undone = dataset.undo()?;
        let mut txn = Transaction::new(&self.store);
        match txn.run(undone) {
            Ok(mut run) => {
                run.deleted = true;
                txn.put_run(run);
            }
            Err(Error::DoesNotExist(_)) => {}
            Err(e) => return Err(e),
        }
        txn.put_dataset(dataset);
        txn.commit()?;
        info!("{} undid {undone}", user.id);
        Ok(undone)
    }

    /// # Errors
    /// Returns [`Error::NotAllowed`] for incomplete runs.
    pub fn final_content(&self, user: &User, run: RunId) -> Result<String> {
        let run = self.run(user, run, false)?;
        registry::get(&run.method)?.final_content(&run)
    }

    /// # Errors
    /// Returns [`Error::NotAllowed`] for incomplete runs.
    pub fn exportable_data(&self, user: &User, run: RunId) -> Result<Array2<f64>> {
        let run = self.run(user, run, false)?;
        registry::get(&run.method)?.exportable_data(&run)
    }

    /// Soft-delete a run
    ///
    /// # Errors
    /// Returns [`Error::NotAllowed`] if the user may not modify it.
    pub fn delete_run(&self, user: &User, run: RunId) -> Result<()> {
        let dataset = self.run(user, run, true)?.dataset;
        self.locked(dataset, || {
            let mut run = self.run(user, run, true)?;
            run.deleted = true;
            info!("{} deleted {}", user.id, run.id);
            self.persist_run(run)
        })
    }
}
