use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Kernel defaults used by the analysis and processing methods.
///
/// Every section is optional in the TOML file, missing sections and fields fall back to
/// [`Config::default`].
///
/// ```
/// use voltammetry::config::Config;
///
/// let config: Config = Config::from_toml("[asd]\nlambda = 0.5\n").unwrap();
/// assert_eq!(config.asd.lambda, 0.5);
/// assert_eq!(config.abc.degree, Config::default().abc.degree);
/// ```
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub abc: AbcConfig,
    pub asd: AsdConfig,
    pub genetic: GeneticConfig,
    pub fit: FitConfig,
    pub report: ReportConfig,
}

impl Config {
    /// Read a configuration from a TOML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid TOML for [`Config`].
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// # Errors
    /// Returns an error if `contents` is not valid TOML for [`Config`].
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        log::debug!("loaded configuration {config:?}");
        Ok(config)
    }
}

/// Iterative polynomial envelope background removal
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AbcConfig {
    pub degree: usize,
    pub iterations: usize,
}

impl Default for AbcConfig {
    fn default() -> Self {
        Self {
            degree: 4,
            iterations: 50,
        }
    }
}

/// Alternating slice-wise decomposition
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AsdConfig {
    pub lambda: f64,
    pub epsilon: f64,
    pub max_iterations: usize,
    /// Number of factors proposed to the user
    pub factors: usize,
}

impl Default for AsdConfig {
    fn default() -> Self {
        Self {
            lambda: 1e-6,
            epsilon: 1e-9,
            max_iterations: 2_000,
            factors: 3,
        }
    }
}

/// Genetic background optimisation
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GeneticConfig {
    pub population: usize,
    pub generations: usize,
    pub knots: usize,
    pub crossover_fraction: f64,
    pub mutation_rate: f64,
    pub seed: u64,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population: 40,
            generations: 100,
            knots: 8,
            crossover_fraction: 0.8,
            mutation_rate: 0.02,
            seed: 40,
        }
    }
}

/// Nonlinear decay fits
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FitConfig {
    /// Number of random-offset refits used for the confidence intervals
    pub refits: usize,
    /// Minimal coefficient of determination for a factor to count as classified
    pub min_r_squared: f64,
    pub seed: u64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            refits: 50,
            min_r_squared: 0.9,
            seed: 40,
        }
    }
}

/// Presentation of results
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    pub significant_digits: i32,
    pub confidence_level: f64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            significant_digits: 2,
            confidence_level: 0.95,
        }
    }
}
