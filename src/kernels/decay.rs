//! Current decay models after a potential step.
//!
//! A capacitive (double layer charging) current decays exponentially,
//! `i(t) = (dE / R) · exp(-(t + ε) / τ)`, while a diffusion limited faradaic current follows
//! `i(t) = a · sqrt(t + ε)` over the sampled window. `ε` is the unknown delay between the potential
//! step and the first sample; it cannot be separated from `R` by a fit, so it is supplied by the
//! caller and varied between repeated fits to estimate the spread of `τ` and `R`.

use argmin::core::{Executor, Jacobian, Operator};
use argmin::solver::gaussnewton::{GaussNewton, GaussNewtonLS};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use log::{debug, warn};
use ndarray::{Array1, Array2};
use ndarray_rand::rand::Rng;
use serde::{Deserialize, Serialize};

use super::math::coefficient_of_determination;
use super::regression::{calc_normal_equation_fit, mean_confidence_interval, Estimate};
use crate::{Error, Result};

/// Exponential decay with `R = p[0]²` and `τ = p[1]²`, which keeps both non-negative without a
/// bounded solver.
#[derive(Clone)]
pub struct CapacitiveProblem {
    time: Array1<f64>,
    current: Array1<f64>,
    step: f64,
    offset: f64,
}

impl CapacitiveProblem {
    /// # Errors
    /// Returns [`Error::ComputationFailed`] for mismatched or too short series, a zero step or a
    /// negative offset.
    pub fn new(time: &[f64], current: &[f64], step: f64, offset: f64) -> Result<Self> {
        if time.len() != current.len() {
            return Err(Error::computation("time and current differ in length"));
        }
        if time.len() < 3 {
            return Err(Error::computation("a decay fit needs at least three points"));
        }
        if step == 0.0 || !step.is_finite() {
            return Err(Error::computation("the potential step must be non-zero"));
        }
        if offset < 0.0 {
            return Err(Error::computation("the time offset must not be negative"));
        }
        Ok(Self {
            time: Array1::from_vec(time.to_vec()),
            current: Array1::from_vec(current.to_vec()),
            step,
            offset,
        })
    }

    fn compute(&self, params: &Array1<f64>) -> Array1<f64> {
        let resistance = params[0] * params[0];
        let tau = params[1] * params[1];
        self.time
            .mapv(|t| self.step / resistance * (-(t + self.offset) / tau).exp())
    }

    /// Starting point from a straight line through `ln(i / dE)`, falling back to a time constant of
    /// a third of the window when the data are not a clean decay.
    fn initial_parameters(&self) -> Array1<f64> {
        let (t, ln_i): (Vec<f64>, Vec<f64>) = self
            .time
            .iter()
            .zip(&self.current)
            .filter(|(_, i)| *i / self.step > 0.0)
            .map(|(t, i)| (t + self.offset, (i / self.step).ln()))
            .unzip();

        let window = self.time[self.time.len() - 1] - self.time[0];
        let (resistance, tau) = match calc_normal_equation_fit(&t, &ln_i) {
            Ok(line) if line.slope < 0.0 => (1.0 / line.intercept.exp(), -1.0 / line.slope),
            _ => {
                let first = self.current[0].abs().max(f64::MIN_POSITIVE);
                (self.step.abs() / first, (window / 3.0).max(f64::EPSILON))
            }
        };
        Array1::from_vec(vec![resistance.sqrt(), tau.sqrt()])
    }

    fn residual_sum_of_squares(&self, params: &Array1<f64>) -> f64 {
        (self.compute(params) - &self.current).mapv(|r| r * r).sum()
    }

    fn run_line_search(&self, initial_parameters: Array1<f64>) -> Result<Array1<f64>> {
        let linesearch = MoreThuenteLineSearch::new().with_bounds(0.0, 1.0)?;
        let solver = GaussNewtonLS::new(linesearch).with_tolerance(f64::EPSILON.sqrt())?;

        let res = Executor::new(self.clone(), solver)
            .configure(|state| state.param(initial_parameters).max_iters(100))
            .run()?;

        let mut state = res.state().clone();
        state
            .take_param()
            .ok_or_else(|| Error::computation("the decay fit returned no parameters"))
    }

    fn run_damped(&self, initial_parameters: Array1<f64>) -> Result<Array1<f64>> {
        let solver = GaussNewton::new()
            .with_gamma(0.5)?
            .with_tolerance(f64::EPSILON.sqrt())?;

        let res = Executor::new(self.clone(), solver)
            .configure(|state| state.param(initial_parameters).max_iters(200))
            .run()?;

        let mut state = res.state().clone();
        state
            .take_param()
            .ok_or_else(|| Error::computation("the decay fit returned no parameters"))
    }

    /// Fit `R` and `τ`
    ///
    /// Gauss-Newton with a More-Thuente line search is tried first. The line search refuses to
    /// start from a point where no descent direction exists, in which case a damped Gauss-Newton
    /// iteration takes over.
    ///
    /// # Errors
    /// Propagates solver failures and returns [`Error::ComputationFailed`] for a degenerate
    /// solution.
    pub fn solve(self) -> Result<CapacitiveFit> {
        let initial_parameters = self.initial_parameters();
        let scale = self.current.mapv(|i| i * i).sum();
        let param = if self.residual_sum_of_squares(&initial_parameters) <= 1e-24 * scale {
            initial_parameters
        } else {
            match self.run_line_search(initial_parameters.clone()) {
                Ok(param) => param,
                Err(e) => {
                    debug!("line search fit failed ({e}), retrying with damped steps");
                    self.run_damped(initial_parameters)?
                }
            }
        };

        let fitted = self.compute(&param);
        let resistance = param[0] * param[0];
        let tau = param[1] * param[1];
        if !(resistance > 0.0 && tau > 0.0 && resistance.is_finite() && tau.is_finite()) {
            return Err(Error::computation("the decay fit degenerated"));
        }
        Ok(CapacitiveFit {
            resistance,
            tau,
            offset: self.offset,
            r_squared: coefficient_of_determination(&self.current.to_vec(), &fitted.to_vec()),
        })
    }

    /// Column `ii` of the Jacobian of the model with respect to the parameters
    fn jacobian_column(&self, params: &Array1<f64>, ii: usize) -> Array1<f64> {
        let model = self.compute(params);
        match ii {
            0 => model * (-2.0 / params[0]),
            _ => {
                let b = params[1];
                &model * &self.time.mapv(|t| 2.0 * (t + self.offset) / (b * b * b))
            }
        }
    }
}

impl Operator for CapacitiveProblem {
    type Param = Array1<f64>;
    type Output = Array1<f64>;

    fn apply(&self, p: &Self::Param) -> ::std::result::Result<Self::Output, argmin::core::Error> {
        Ok(self.compute(p) - &self.current)
    }
}

impl Jacobian for CapacitiveProblem {
    type Param = Array1<f64>;
    type Jacobian = Array2<f64>;

    fn jacobian(
        &self,
        p: &Self::Param,
    ) -> ::std::result::Result<Self::Jacobian, argmin::core::Error> {
        let mut jacobian = Array2::zeros((self.time.len(), p.len()));
        for jj in 0..p.len() {
            jacobian
                .column_mut(jj)
                .assign(&self.jacobian_column(p, jj));
        }
        Ok(jacobian)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapacitiveFit {
    pub resistance: f64,
    pub tau: f64,
    pub offset: f64,
    pub r_squared: f64,
}

impl CapacitiveFit {
    pub fn evaluate(&self, step: f64, t: f64) -> f64 {
        step / self.resistance * (-(t + self.offset) / self.tau).exp()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaradaicFit {
    pub a: f64,
    pub offset: f64,
    pub r_squared: f64,
}

/// Least squares `a` of `i = a · sqrt(t + ε)`, which is linear in `a`
///
/// # Errors
/// Returns [`Error::ComputationFailed`] for mismatched series, negative `t + ε` or an all zero
/// abscissa.
pub fn fit_faradaic(time: &[f64], current: &[f64], offset: f64) -> Result<FaradaicFit> {
    if time.len() != current.len() || time.is_empty() {
        return Err(Error::computation("time and current differ in length"));
    }
    if time.iter().any(|t| t + offset < 0.0) {
        return Err(Error::computation("t + ε must not be negative"));
    }
    let basis: Vec<f64> = time.iter().map(|t| (t + offset).sqrt()).collect();
    let denominator: f64 = basis.iter().map(|b| b * b).sum();
    if denominator == 0.0 {
        return Err(Error::computation("the faradaic model is degenerate at t + ε = 0"));
    }
    let a = basis.iter().zip(current).map(|(b, i)| b * i).sum::<f64>() / denominator;
    let fitted: Vec<f64> = basis.iter().map(|b| a * b).collect();
    Ok(FaradaicFit {
        a,
        offset,
        r_squared: coefficient_of_determination(current, &fitted),
    })
}

/// # Errors
/// Propagates [`CapacitiveProblem::new`] and solver errors.
pub fn fit_capacitive(
    time: &[f64],
    current: &[f64],
    step: f64,
    offset: f64,
) -> Result<CapacitiveFit> {
    CapacitiveProblem::new(time, current, step, offset)?.solve()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactorKind {
    Capacitive,
    Faradaic,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: FactorKind,
    pub capacitive_r_squared: f64,
    pub faradaic_r_squared: f64,
}

/// Decide which decay model describes a factor profile better.
///
/// A capacitive fit that fails to converge counts as `R² = -∞`.
///
/// # Errors
/// Returns an error only when neither model can be fitted.
pub fn classify_factor(
    time: &[f64],
    current: &[f64],
    step: f64,
    offset: f64,
) -> Result<Classification> {
    let capacitive = match fit_capacitive(time, current, step, offset) {
        Ok(fit) => fit.r_squared,
        Err(e) => {
            debug!("capacitive model did not fit: {e}");
            f64::NEG_INFINITY
        }
    };
    let faradaic = fit_faradaic(time, current, offset)?.r_squared;
    Ok(Classification {
        kind: if capacitive >= faradaic {
            FactorKind::Capacitive
        } else {
            FactorKind::Faradaic
        },
        capacitive_r_squared: capacitive,
        faradaic_r_squared: faradaic,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeConstantEstimate {
    pub tau: Estimate,
    pub resistance: Estimate,
    /// Confidence half width of the mean `τ`
    pub tau_ci: f64,
    /// Confidence half width of the mean `R`
    pub resistance_ci: f64,
    pub fits: usize,
}

/// Repeat the capacitive fit with offsets drawn uniformly from `[0, Δt)`, `Δt` being the sampling
/// interval, and summarise the spread of `τ` and `R`.
///
/// # Errors
/// Returns [`Error::ComputationFailed`] if fewer than two of the refits succeed.
pub fn estimate_time_constant(
    time: &[f64],
    current: &[f64],
    step: f64,
    refits: usize,
    level: f64,
    rng: &mut impl Rng,
) -> Result<TimeConstantEstimate> {
    if time.len() < 3 {
        return Err(Error::computation("a decay fit needs at least three points"));
    }
    let interval = time[1] - time[0];
    if interval <= 0.0 {
        return Err(Error::computation("sampling times must increase"));
    }

    let mut taus = Vec::with_capacity(refits);
    let mut resistances = Vec::with_capacity(refits);
    for _ in 0..refits {
        let offset = rng.gen_range(0.0..interval);
        match fit_capacitive(time, current, step, offset) {
            Ok(fit) => {
                taus.push(fit.tau);
                resistances.push(fit.resistance);
            }
            Err(e) => warn!("refit with offset {offset} failed: {e}"),
        }
    }
    if taus.len() < 2 {
        return Err(Error::computation(format!(
            "only {} of {refits} decay fits succeeded",
            taus.len()
        )));
    }

    Ok(TimeConstantEstimate {
        tau: Estimate::from_samples(&taus),
        resistance: Estimate::from_samples(&resistances),
        tau_ci: mean_confidence_interval(&taus, level)?,
        resistance_ci: mean_confidence_interval(&resistances, level)?,
        fits: taus.len(),
    })
}
