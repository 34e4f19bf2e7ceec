mod common;

use std::collections::BTreeMap;

use approx::assert_abs_diff_eq;

use common::{Fixture, POINTS, SAMPLE_CONCENTRATION};
use voltammetry::config::Config;
use voltammetry::kernels::decay::FactorKind;
use voltammetry::method::RunState;
use voltammetry::methods::analysis::{FactorReport, StandardAdditionResult, RESULT_KEY};
use voltammetry::steps::StepInput;
use voltammetry::store::{DatasetId, ObjectStore, RunId};
use voltammetry::Error;

const ADDED: [f64; 5] = [0.0, 1.0, 2.0, 3.0, 4.0];

fn peak_range() -> StepInput {
    StepInput::Cursors(vec![Some(-200.0), None, Some(-400.0)])
}

fn settings(values: &[(&str, &str)]) -> StepInput {
    StepInput::Settings(
        values
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<BTreeMap<_, _>>(),
    )
}

fn currents(fixture: &Fixture, dataset: DatasetId) -> Vec<Vec<f64>> {
    fixture
        .load(dataset)
        .members()
        .iter()
        .map(|id| fixture.engine.store().curve_data(*id).unwrap().current().to_vec())
        .collect()
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap()
}

/// A decomposition that cannot converge within its iteration limit
fn stalling_config() -> Config {
    let mut config = Config::default();
    config.asd.max_iterations = 3;
    config.asd.epsilon = 0.0;
    config
}

fn assert_discarded_without_result(fixture: &Fixture, run: RunId, dataset: DatasetId) {
    assert_eq!(
        fixture.engine.state(&fixture.user, run).unwrap(),
        RunState::Discarded
    );
    let stored = fixture.engine.store().run(run).unwrap();
    assert!(!stored.completed);
    assert!(stored.custom::<StandardAdditionResult>(RESULT_KEY).is_err());
    assert!(stored.custom::<Vec<FactorReport>>("factors").is_err());
    assert!(fixture.load(dataset).history().is_empty());
}

#[test]
fn time_constant_of_the_decaying_factor() {
    let fixture = Fixture::new();
    let dataset = fixture.dataset(&ADDED, Some(8));
    let run = fixture
        .engine
        .start(&fixture.user, "time_constant", dataset)
        .unwrap();
    fixture.engine.submit(&fixture.user, run, &peak_range()).unwrap();
    let state = fixture
        .engine
        .submit(&fixture.user, run, &settings(&[("factors", "2")]))
        .unwrap();
    assert_eq!(state, RunState::Finished);

    let reports: Vec<FactorReport> = fixture
        .engine
        .store()
        .run(run)
        .unwrap()
        .custom("factors")
        .unwrap();
    assert_eq!(reports.len(), 2);
    // samples decay as exp(-s / 3) with 2.5 ms between samples
    let charging = reports
        .iter()
        .filter(|r| r.classified && r.kind == FactorKind::Capacitive)
        .find_map(|r| r.estimate)
        .unwrap();
    assert_abs_diff_eq!(charging.tau.value, 7.5, epsilon = 0.5);

    let content = fixture.engine.final_content(&fixture.user, run).unwrap();
    assert!(content.contains("capacitive"));
    let export = fixture.engine.exportable_data(&fixture.user, run).unwrap();
    assert_eq!(export.dim().0, 2);
}

#[test]
fn time_constant_fails_when_the_decomposition_does_not_converge() {
    let fixture = Fixture::with_config(stalling_config());
    let dataset = fixture.dataset(&ADDED, Some(8));
    let run = fixture
        .engine
        .start(&fixture.user, "time_constant", dataset)
        .unwrap();
    fixture.engine.submit(&fixture.user, run, &peak_range()).unwrap();
    let before = fixture.load(dataset);

    assert!(matches!(
        fixture
            .engine
            .submit(&fixture.user, run, &settings(&[("factors", "2")])),
        Err(Error::ComputationFailed(_))
    ));
    assert_discarded_without_result(&fixture, run, dataset);
    assert_eq!(fixture.load(dataset), before);
}

#[test]
fn asd_standard_addition_fails_when_the_decomposition_does_not_converge() {
    let fixture = Fixture::with_config(stalling_config());
    let dataset = fixture.dataset(&ADDED, Some(8));
    let run = fixture
        .engine
        .start(&fixture.user, "asd_standard_addition", dataset)
        .unwrap();
    fixture
        .engine
        .submit(&fixture.user, run, &StepInput::Analyte(fixture.analyte))
        .unwrap();
    fixture.engine.submit(&fixture.user, run, &peak_range()).unwrap();
    let before = fixture.load(dataset);

    assert!(matches!(
        fixture
            .engine
            .submit(&fixture.user, run, &settings(&[("factors", "2")])),
        Err(Error::ComputationFailed(_))
    ));
    assert_discarded_without_result(&fixture, run, dataset);
    assert_eq!(fixture.load(dataset), before);
}

#[test]
fn configured_factors_seed_the_decomposition_step() {
    let mut config = Config::default();
    config.asd.factors = 4;
    let fixture = Fixture::with_config(config);
    let dataset = fixture.dataset(&ADDED, Some(8));
    let run = fixture
        .engine
        .start(&fixture.user, "asd_standard_addition", dataset)
        .unwrap();
    fixture
        .engine
        .submit(&fixture.user, run, &StepInput::Analyte(fixture.analyte))
        .unwrap();
    fixture.engine.submit(&fixture.user, run, &peak_range()).unwrap();

    let view = fixture.engine.current_step(&fixture.user, run).unwrap();
    assert_eq!(view.kind, "Settings");
    assert_eq!(view.initial, Some(serde_json::json!({ "factors": 4.0 })));
}

#[test]
fn genetic_background_recovers_the_sample_concentration() {
    let fixture = Fixture::new();
    let dataset = fixture.dataset(&ADDED, None);
    let run = fixture
        .engine
        .start(&fixture.user, "ga_standard_addition", dataset)
        .unwrap();
    fixture
        .engine
        .submit(&fixture.user, run, &StepInput::Analyte(fixture.analyte))
        .unwrap();
    fixture.engine.submit(&fixture.user, run, &peak_range()).unwrap();

    let view = fixture.engine.current_step(&fixture.user, run).unwrap();
    assert_eq!(
        view.initial,
        Some(serde_json::json!({ "generations": 100.0, "population": 40.0 }))
    );

    let state = fixture
        .engine
        .submit(
            &fixture.user,
            run,
            &settings(&[("generations", "20"), ("population", "10")]),
        )
        .unwrap();
    assert_eq!(state, RunState::Finished);

    let result: StandardAdditionResult = fixture
        .engine
        .store()
        .run(run)
        .unwrap()
        .custom(RESULT_KEY)
        .unwrap();
    assert_abs_diff_eq!(result.result, -SAMPLE_CONCENTRATION, epsilon = 5e-2);
    assert!(fixture
        .engine
        .final_content(&fixture.user, run)
        .unwrap()
        .contains("knots"));
}

#[test]
fn background_correction_removes_the_baseline_and_keeps_the_peak() {
    let mut config = Config::default();
    config.abc.degree = 3;
    let fixture = Fixture::with_config(config);
    let dataset = fixture.dataset(&ADDED, None);
    let before = currents(&fixture, dataset);
    let run = fixture
        .engine
        .start(&fixture.user, "automatic_background_correction", dataset)
        .unwrap();

    let view = fixture.engine.current_step(&fixture.user, run).unwrap();
    assert_eq!(
        view.initial,
        Some(serde_json::json!({ "degree": 3.0, "iterations": 50.0 }))
    );
    let state = fixture.engine.submit(&fixture.user, run, &settings(&[])).unwrap();
    assert_eq!(state, RunState::Finished);

    let after = currents(&fixture, dataset);
    assert_eq!(after.len(), ADDED.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(new.len(), POINTS);
        assert_abs_diff_eq!(new[0], 0.0, epsilon = 0.05);
        assert_abs_diff_eq!(new[POINTS - 1], 0.0, epsilon = 0.05);
        assert_eq!(argmax(new), 40);
        assert!(new[40] > 0.5 * (old[40] - 0.1));
    }
    assert!(fixture
        .engine
        .final_content(&fixture.user, run)
        .unwrap()
        .contains("degree 3"));
}

#[test]
fn low_pass_filter_keeps_a_smooth_peak() {
    let fixture = Fixture::new();
    let dataset = fixture.dataset(&ADDED, None);
    let before = currents(&fixture, dataset);
    let run = fixture
        .engine
        .start(&fixture.user, "fft_low_pass", dataset)
        .unwrap();

    let cutoff = StepInput::Cursors(vec![Some(12.0)]);
    assert_eq!(
        fixture.engine.submit(&fixture.user, run, &cutoff).unwrap(),
        RunState::AtStep(1)
    );
    let state = fixture
        .engine
        .submit(&fixture.user, run, &StepInput::Confirm(true))
        .unwrap();
    assert_eq!(state, RunState::Finished);

    let after = currents(&fixture, dataset);
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(argmax(new), 40);
        assert_abs_diff_eq!(new[40], old[40], epsilon = 0.02);
    }
    assert!(fixture
        .engine
        .final_content(&fixture.user, run)
        .unwrap()
        .contains("cutoff bin 12"));
}

#[test]
fn rejected_confirmation_returns_to_the_cutoff() {
    let fixture = Fixture::new();
    let dataset = fixture.dataset(&ADDED, None);
    let before = fixture.load(dataset);
    let run = fixture
        .engine
        .start(&fixture.user, "fft_low_pass", dataset)
        .unwrap();
    fixture
        .engine
        .submit(&fixture.user, run, &StepInput::Cursors(vec![Some(3.0)]))
        .unwrap();

    let state = fixture
        .engine
        .submit(&fixture.user, run, &StepInput::Confirm(false))
        .unwrap();
    assert_eq!(state, RunState::AtStep(0));
    assert_eq!(fixture.engine.current_step(&fixture.user, run).unwrap().index, 0);
    assert_eq!(fixture.load(dataset), before);

    // a new cutoff can be picked and confirmed
    fixture
        .engine
        .submit(&fixture.user, run, &StepInput::Cursors(vec![Some(12.0)]))
        .unwrap();
    assert_eq!(
        fixture
            .engine
            .submit(&fixture.user, run, &StepInput::Confirm(true))
            .unwrap(),
        RunState::Finished
    );
    assert!(fixture
        .engine
        .final_content(&fixture.user, run)
        .unwrap()
        .contains("cutoff bin 12"));
}
