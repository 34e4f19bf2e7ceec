#![allow(dead_code)]

use ndarray_rand::rand::{Rng, SeedableRng};
use rand_isaac::Isaac64Rng;

use voltammetry::config::Config;
use voltammetry::curve::CurveData;
use voltammetry::dataset::{Analyte, ConcentrationUnit, Dataset};
use voltammetry::engine::StepEngine;
use voltammetry::store::{
    AnalyteId, ChangeSet, CurveDataId, CurveId, DatasetId, InMemoryStore, ObjectStore, User,
};

pub const POINTS: usize = 81;
/// Concentration already present in every synthetic sample
pub const SAMPLE_CONCENTRATION: f64 = 0.5;

pub struct Fixture {
    pub engine: StepEngine<InMemoryStore>,
    pub user: User,
    pub analyte: AnalyteId,
}

/// Potentials from -500 to -100 mV in 5 mV steps
pub fn potentials() -> Vec<f64> {
    #[allow(clippy::cast_precision_loss)]
    (0..POINTS).map(|i| -500.0 + 5.0 * i as f64).collect()
}

/// Gaussian peak at -300 mV whose height follows the total concentration
fn peak(added: f64, potential: f64) -> f64 {
    2.0 * (SAMPLE_CONCENTRATION + added) * (-((potential + 300.0) / 20.0).powi(2) / 2.0).exp()
}

/// Samples of one point: the peak decays over the samples, the flat baseline does not
fn point_samples<R: Rng>(added: f64, potential: f64, count: usize, rng: &mut R) -> Vec<f64> {
    #[allow(clippy::cast_precision_loss)]
    (0..count)
        .map(|s| {
            let decay = (-(s as f64) / 3.0).exp();
            peak(added, potential).mul_add(decay, 0.1) + 1e-4 * rng.gen_range(-1.0..1.0)
        })
        .collect()
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let engine = StepEngine::new(InMemoryStore::new(), config);
        let analyte = AnalyteId(engine.store().next_id());
        let mut changes = ChangeSet::default();
        changes.put_analyte(Analyte {
            id: analyte,
            name: "Pb".to_owned(),
            atomic_mass: Some(207.2),
        });
        engine.store().commit(changes).unwrap();
        Self {
            engine,
            user: User::new(1, "owner"),
            analyte,
        }
    }

    /// Store a dataset with one peak curve per concentration of added standard
    pub fn dataset(&self, added: &[f64], samples_per_point: Option<usize>) -> DatasetId {
        let store = self.engine.store();
        let mut rng = Isaac64Rng::seed_from_u64(40);
        let mut changes = ChangeSet::default();
        let mut dataset =
            Dataset::new(DatasetId(store.next_id()), self.user.id, "standard addition");
        let mut ids = vec![];
        for c in added {
            let id = CurveDataId(store.next_id());
            let spp = samples_per_point.unwrap_or(1);
            let samples: Vec<f64> = potentials()
                .iter()
                .flat_map(|e| point_samples(*c, *e, spp, &mut rng))
                .collect();
            #[allow(clippy::cast_precision_loss)]
            let current = samples.chunks(spp).map(|s| s.iter().sum::<f64>() / spp as f64).collect();
            #[allow(clippy::cast_precision_loss)]
            let time = (0..POINTS).map(|i| 20.0 * i as f64).collect();
            let mut data = CurveData::from_vectors(
                id,
                self.user.id,
                CurveId(store.next_id()),
                potentials(),
                time,
                current,
            )
            .unwrap();
            if samples_per_point.is_some() {
                data = data.with_current_samples(samples).unwrap();
            }
            changes.put_curve_data(data);
            dataset.add_curve(id).unwrap();
            ids.push(id);
        }
        dataset.add_analyte(self.analyte, ConcentrationUnit::MilligramsPerLitre);
        for (id, c) in ids.iter().zip(added) {
            dataset.set_concentration(self.analyte, *id, *c).unwrap();
        }
        let id = dataset.id;
        changes.put_dataset(dataset);
        store.commit(changes).unwrap();
        id
    }

    pub fn load(&self, dataset: DatasetId) -> Dataset {
        self.engine.store().dataset(dataset).unwrap()
    }
}
