use log::info;
use ndarray_rand::rand::SeedableRng;
use rand_isaac::Isaac64Rng;
use serde_json::Value;

use crate::config::Config;
use crate::dataset::Dataset;
use crate::kernels::genetic::{optimize_background, GeneticOptions};
use crate::method::{Method, MethodContext, MethodKind, MethodRun, StepDescriptor};
use crate::methods::{configured, field, selected_indices};
use crate::steps::{validators, SelectAnalyte, SelectRange, Settings};
use crate::Result;

/// Standard addition after a genetic search for a spline background shared by all curves
#[derive(Clone, Copy, Debug, Default)]
pub struct GaStandardAddition;

impl Method for GaStandardAddition {
    fn key(&self) -> &'static str {
        "ga_standard_addition"
    }

    fn display_name(&self) -> &'static str {
        "Standard addition with genetic background"
    }

    fn kind(&self) -> MethodKind {
        MethodKind::Analysis
    }

    fn steps(&self, config: &Config) -> Vec<StepDescriptor> {
        vec![
            StepDescriptor::new(
                "Select analyte",
                "Analyte whose concentration is determined.",
                SelectAnalyte,
            ),
            StepDescriptor::new(
                "Select peak",
                "Select the region of the peak, the background is searched around it.",
                SelectRange,
            ),
            StepDescriptor::new(
                "Optimisation",
                "Generations and population of the search. \
                 The process can take up to several minutes.",
                Settings::new(vec![
                    field(
                        "generations",
                        "Generations",
                        configured(config.genetic.generations),
                        validators::positive_integer,
                        "must be a positive integer",
                    ),
                    field(
                        "population",
                        "Population",
                        configured(config.genetic.population),
                        validators::at_least_two,
                        "must be an integer of at least 2",
                    ),
                ]),
            ),
        ]
    }

    fn initial_for_step(&self, index: usize, _run: &MethodRun, dataset: &Dataset) -> Option<Value> {
        super::sole_analyte(index, dataset)
    }

    fn check_integrity(&self, ctx: &MethodContext<'_>) -> Result<()> {
        super::standard_addition_members(ctx).map(|_| ())
    }

    fn finalize(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        let members = ctx.members()?;
        let peak = selected_indices(&ctx.run, &members[0])?;
        let options = GeneticOptions {
            generations: Settings::count(&ctx.run, "generations")?,
            population: Settings::count(&ctx.run, "population")?,
            ..GeneticOptions::from(&ctx.config.genetic)
        };
        let mut rng = Isaac64Rng::seed_from_u64(ctx.config.genetic.seed);
        let signals: Vec<Vec<f64>> = members.iter().map(|c| c.current().to_vec()).collect();
        let result =
            optimize_background(members[0].potential(), &signals, peak, &options, &mut rng)?;
        info!(
            "{}: best background after {} generations has fitness {}",
            ctx.run.id, result.generations, result.fitness
        );

        let responses: Vec<f64> = result
            .signal
            .iter()
            .map(|signal| {
                signal[peak.0..=peak.1]
                    .iter()
                    .copied()
                    .fold(f64::NEG_INFINITY, f64::max)
            })
            .collect();
        let knots: Vec<usize> = result
            .mask
            .iter()
            .enumerate()
            .filter_map(|(i, knot)| knot.then_some(i))
            .collect();
        ctx.run.set_custom("knots", &knots)?;
        ctx.run.set_custom("fitness", &result.fitness)?;
        super::finish_standard_addition(ctx, &responses)
    }

    fn apply(&self, ctx: &mut MethodContext<'_>) -> Result<()> {
        self.finalize(ctx)
    }

    fn final_content(&self, run: &MethodRun) -> Result<String> {
        let mut text = super::standard_addition_content(run, self.display_name())?;
        let knots: Vec<usize> = run.custom("knots")?;
        text.push_str(&format!("\nBackground spline through {} knots", knots.len()));
        Ok(text)
    }
}
