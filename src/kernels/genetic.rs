//! Background estimation by evolving spline knot positions with a genetic algorithm.
//!
//! An individual is a boolean mask over the sample positions; selected positions become the knots
//! of a natural cubic spline that models the background of every curve. Individuals are rewarded
//! for leaving a tall, symmetric peak in the given region and a flat remainder elsewhere.

use log::debug;
use ndarray_rand::rand::seq::index::sample;
use ndarray_rand::rand::Rng;

use super::spline::natural_cubic;
use crate::config::GeneticConfig;
use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct GeneticOptions {
    pub population: usize,
    pub generations: usize,
    /// Knots selected in each initial individual, end points included
    pub knots: usize,
    /// Share of each new generation produced by crossover
    pub crossover_fraction: f64,
    /// Probability of flipping each interior bit
    pub mutation_rate: f64,
}

impl From<&GeneticConfig> for GeneticOptions {
    fn from(config: &GeneticConfig) -> Self {
        Self {
            population: config.population,
            generations: config.generations,
            knots: config.knots,
            crossover_fraction: config.crossover_fraction,
            mutation_rate: config.mutation_rate,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GeneticResult {
    /// Knot mask of the best individual
    pub mask: Vec<bool>,
    /// Background of each curve
    pub background: Vec<Vec<f64>>,
    /// Background subtracted curves
    pub signal: Vec<Vec<f64>>,
    pub fitness: f64,
    pub generations: usize,
}

struct Problem<'a> {
    x: &'a [f64],
    signals: &'a [Vec<f64>],
    peak: (usize, usize),
    ranges: Vec<f64>,
}

impl Problem<'_> {
    fn backgrounds(&self, mask: &[bool]) -> Result<Vec<Vec<f64>>> {
        let mut order: Vec<usize> = (0..mask.len()).filter(|i| mask[*i]).collect();
        order.sort_by(|a, b| self.x[*a].total_cmp(&self.x[*b]));
        let knots_x: Vec<f64> = order.iter().map(|i| self.x[*i]).collect();
        self.signals
            .iter()
            .map(|y| {
                let knots_y: Vec<f64> = order.iter().map(|i| y[*i]).collect();
                natural_cubic(&knots_x, &knots_y, self.x)
            })
            .collect()
    }

    /// `Σ height / (1 + asymmetry + outside)` over the curves.
    ///
    /// Asymmetry and the residual outside the peak are taken relative to each curve's range so
    /// the score does not depend on the current unit.
    fn fitness(&self, mask: &[bool]) -> Result<f64> {
        let (left, right) = self.peak;
        let n = mask.len();
        let reach = left.min(n - 1 - right).min(right - left).max(1);
        let mut total = 0.0;
        for ((y, background), range) in self
            .signals
            .iter()
            .zip(self.backgrounds(mask)?)
            .zip(&self.ranges)
        {
            let s: Vec<f64> = y.iter().zip(&background).map(|(y, b)| y - b).collect();
            let height = s[left..=right]
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max)
                .max(0.0);

            let asymmetry: f64 = (1..=reach)
                .filter(|d| *d <= left && right + d < n)
                .map(|d| (s[left - d] - s[right + d]).abs())
                .sum::<f64>()
                / range;

            let outside_points = n - (right - left + 1);
            let outside = if outside_points == 0 {
                0.0
            } else {
                #[allow(clippy::cast_precision_loss)]
                let count = outside_points as f64;
                s.iter()
                    .enumerate()
                    .filter(|(i, _)| *i < left || *i > right)
                    .map(|(_, v)| v.abs())
                    .sum::<f64>()
                    / count
                    / range
            };

            total += height / (1.0 + asymmetry + outside);
        }
        Ok(total)
    }
}

/// Rank based scaling, the best individual gets `1`, the next `1/2` and so on, normalised so the
/// scaled values add up to the population size.
fn rank_scaling(fitness: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..fitness.len()).collect();
    order.sort_by(|a, b| fitness[*b].total_cmp(&fitness[*a]));
    let mut scaled = vec![0.0; fitness.len()];
    for (rank, index) in order.iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let value = 1.0 / (rank + 1) as f64;
        scaled[*index] = value;
    }
    let sum: f64 = scaled.iter().sum();
    #[allow(clippy::cast_precision_loss)]
    let size = fitness.len() as f64;
    scaled.iter_mut().for_each(|v| *v *= size / sum);
    scaled
}

fn roulette(scaled: &[f64], rng: &mut impl Rng) -> usize {
    let total: f64 = scaled.iter().sum();
    let mut target = rng.gen_range(0.0..total);
    for (index, value) in scaled.iter().enumerate() {
        if target < *value {
            return index;
        }
        target -= value;
    }
    scaled.len() - 1
}

/// Interior positions a knot may occupy, everything but the end points and the peak region
fn candidates(n: usize, (left, right): (usize, usize)) -> Vec<usize> {
    (1..n - 1).filter(|i| *i < left || *i > right).collect()
}

fn random_mask(n: usize, knots: usize, candidates: &[usize], rng: &mut impl Rng) -> Vec<bool> {
    let mut mask = vec![false; n];
    mask[0] = true;
    mask[n - 1] = true;
    for index in sample(rng, candidates.len(), knots - 2).into_iter() {
        mask[candidates[index]] = true;
    }
    mask
}

/// Evolve the background knot mask shared by `signals`.
///
/// `peak` is the inclusive index range of the peak. The first and last samples are always knots,
/// the peak region never holds one.
///
/// # Errors
/// Returns [`Error::ComputationFailed`] for inconsistent curve lengths, a peak region that does not
/// leave room on both sides, fewer than two individuals or generations below one, or an
/// impossible knot count.
pub fn optimize_background(
    x: &[f64],
    signals: &[Vec<f64>],
    peak: (usize, usize),
    options: &GeneticOptions,
    rng: &mut impl Rng,
) -> Result<GeneticResult> {
    let n = x.len();
    if signals.is_empty() || signals.iter().any(|s| s.len() != n) {
        return Err(Error::computation("every curve must match the abscissa length"));
    }
    let (left, right) = peak;
    if left == 0 || right <= left || right + 1 >= n {
        return Err(Error::computation(format!(
            "peak region {left}..={right} must lie strictly inside the {n} point curves"
        )));
    }
    if options.population < 2 || options.generations < 1 {
        return Err(Error::computation(
            "the genetic algorithm needs two individuals and one generation",
        ));
    }
    let candidates = candidates(n, peak);
    if options.knots < 2 || options.knots - 2 > candidates.len() {
        return Err(Error::computation(format!(
            "{} knots cannot be placed on {n} points outside the peak",
            options.knots
        )));
    }

    let ranges = signals
        .iter()
        .map(|s| {
            let max = s.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let min = s.iter().copied().fold(f64::INFINITY, f64::min);
            if max > min {
                max - min
            } else {
                1.0
            }
        })
        .collect();
    let problem = Problem {
        x,
        signals,
        peak,
        ranges,
    };

    let mut population: Vec<Vec<bool>> = (0..options.population)
        .map(|_| random_mask(n, options.knots, &candidates, rng))
        .collect();
    let mut best_mask = population[0].clone();
    let mut best_fitness = f64::NEG_INFINITY;

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let crossovers = ((options.population - 1) as f64
        * options.crossover_fraction.clamp(0.0, 1.0))
    .round() as usize;

    for _ in 0..options.generations {
        let fitness = population
            .iter()
            .map(|mask| problem.fitness(mask))
            .collect::<Result<Vec<f64>>>()?;
        let (elite, elite_fitness) = fitness
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((0, f64::NEG_INFINITY));
        if elite_fitness > best_fitness {
            best_fitness = elite_fitness;
            best_mask = population[elite].clone();
        }

        let scaled = rank_scaling(&fitness);
        let mut next = Vec::with_capacity(options.population);
        next.push(population[elite].clone());
        for slot in 1..options.population {
            let mut child = population[roulette(&scaled, rng)].clone();
            if slot <= crossovers {
                let other = &population[roulette(&scaled, rng)];
                let cut = rng.gen_range(1..n);
                child[cut..].copy_from_slice(&other[cut..]);
            }
            for index in &candidates {
                if rng.gen_bool(options.mutation_rate.clamp(0.0, 1.0)) {
                    child[*index] = !child[*index];
                }
            }
            next.push(child);
        }
        population = next;
    }

    // the last generation has not been scored yet
    for mask in &population {
        let fitness = problem.fitness(mask)?;
        if fitness > best_fitness {
            best_fitness = fitness;
            best_mask = mask.clone();
        }
    }
    debug!(
        "genetic background search finished with fitness {best_fitness} using {} knots",
        best_mask.iter().filter(|b| **b).count()
    );

    let background = problem.backgrounds(&best_mask)?;
    let signal = signals
        .iter()
        .zip(&background)
        .map(|(y, b)| y.iter().zip(b).map(|(y, b)| y - b).collect())
        .collect();
    Ok(GeneticResult {
        mask: best_mask,
        background,
        signal,
        fitness: best_fitness,
        generations: options.generations,
    })
}
