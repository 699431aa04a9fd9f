use std::error::Error;
use std::fmt::{self, Display};
use std::str::FromStr;

use anyhow::bail;
use log::debug;
use nalgebra::DMatrix;

use crate::Result;

mod fs81;
mod hky;

pub type SubstMatrix = DMatrix<f64>;
/// Stationary distributions, one row per site class.
pub type StatDistr = DMatrix<f64>;

/// Tolerance on the row sums of a stationary distribution.
pub(crate) const DISTRIBUTION_TOLERANCE: f64 = 1e-6;

pub struct ConfigurationError {
    pub(crate) message: String,
}
impl fmt::Debug for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl Error for ConfigurationError {}

/// How a branch parameter is turned into a transition matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EvolModelType {
    /// `FS81alpha`: the branch parameter is the substitution probability.
    ProbabilityMixing,
    /// `FS81beta`: the branch parameter is an expected number of substitutions.
    RateMixing,
    /// `HKY:<ratio>`: transitions and transversions mix at different rates.
    TransitionTransversion { ratio: f64 },
}

impl Display for EvolModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvolModelType::ProbabilityMixing => write!(f, "FS81alpha"),
            EvolModelType::RateMixing => write!(f, "FS81beta"),
            EvolModelType::TransitionTransversion { ratio } => write!(f, "HKY:{}", ratio),
        }
    }
}

impl FromStr for EvolModelType {
    type Err = anyhow::Error;

    fn from_str(selector: &str) -> Result<Self> {
        let selector = selector.trim();
        match selector.to_ascii_uppercase().as_str() {
            "FS81ALPHA" => Ok(EvolModelType::ProbabilityMixing),
            "FS81BETA" => Ok(EvolModelType::RateMixing),
            name if name.starts_with("HKY") => {
                let ratio = name
                    .split_once(':')
                    .and_then(|(model, ratio)| (model == "HKY").then_some(ratio))
                    .map(|ratio| ratio.trim().parse::<f64>());
                match ratio {
                    Some(Ok(ratio)) if ratio.is_finite() && ratio >= 0.0 => {
                        Ok(EvolModelType::TransitionTransversion { ratio })
                    }
                    _ => bail!(ConfigurationError {
                        message: format!(
                            "Malformed HKY selector {}, expected HKY:<ratio> with a non-negative ratio",
                            selector
                        ),
                    }),
                }
            }
            _ => bail!(ConfigurationError {
                message: format!("Unknown evolutionary model {}", selector),
            }),
        }
    }
}

/// Stationary distributions plus the rule that turns a branch parameter into transition
/// probabilities.
///
/// The transition matrix has `dimension * K` rows: row `a + i * K` holds the distribution
/// of the child given parent symbol `a` in site class `i`.
#[derive(Clone, Debug, PartialEq)]
pub struct EvolModel {
    model_type: EvolModelType,
    pi: StatDistr,
    transitions: SubstMatrix,
}

impl Display for EvolModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} with {} site class(es) over {} symbols",
            self.model_type,
            self.dimension(),
            self.alphabet_size()
        )
    }
}

impl EvolModel {
    /// Creates a model with uniform stationary distributions.
    pub fn new(model_type: EvolModelType, dimension: usize, alphabet_size: usize) -> Result<Self> {
        if dimension == 0 || alphabet_size == 0 {
            bail!(ConfigurationError {
                message: format!(
                    "Evolutionary model needs at least one site class and one symbol, got {}x{}",
                    dimension, alphabet_size
                ),
            });
        }
        if matches!(model_type, EvolModelType::TransitionTransversion { .. }) && alphabet_size != 4
        {
            bail!(ConfigurationError {
                message: format!(
                    "HKY is only defined for alphabets of size 4, got {}",
                    alphabet_size
                ),
            });
        }
        let pi = StatDistr::from_element(dimension, alphabet_size, 1.0 / alphabet_size as f64);
        let mut model = EvolModel {
            model_type,
            pi,
            transitions: SubstMatrix::zeros(dimension * alphabet_size, alphabet_size),
        };
        model.reinit(1.0);
        Ok(model)
    }

    pub fn with_stat_distr(model_type: EvolModelType, pi: StatDistr) -> Result<Self> {
        let mut model = Self::new(model_type, pi.nrows(), pi.ncols())?;
        model.set_stat_distr(pi)?;
        Ok(model)
    }

    pub fn model_type(&self) -> EvolModelType {
        self.model_type
    }

    pub fn dimension(&self) -> usize {
        self.pi.nrows()
    }

    pub fn alphabet_size(&self) -> usize {
        self.pi.ncols()
    }

    pub fn stat_distr(&self) -> &StatDistr {
        &self.pi
    }

    pub fn set_stat_distr(&mut self, pi: StatDistr) -> Result<()> {
        if pi.shape() != self.pi.shape() {
            bail!(ConfigurationError {
                message: format!(
                    "Stationary distribution of shape {:?} does not fit a model of shape {:?}",
                    pi.shape(),
                    self.pi.shape()
                ),
            });
        }
        validate_distributions(&pi)?;
        self.pi = pi;
        self.reinit(1.0);
        Ok(())
    }

    /// Changes the number of site classes, resetting all of them to uniform.
    pub fn resize(&mut self, dimension: usize) -> Result<()> {
        if dimension == self.dimension() {
            return Ok(());
        }
        debug!(
            "Resizing {} model from {} to {} site classes.",
            self.model_type,
            self.dimension(),
            dimension
        );
        *self = Self::new(self.model_type, dimension, self.alphabet_size())?;
        Ok(())
    }

    /// Recomputes the stored transition matrix for the branch parameter `t`.
    pub fn reinit(&mut self, t: f64) -> &SubstMatrix {
        self.transitions = self.transitions(t);
        &self.transitions
    }

    pub fn current_transitions(&self) -> &SubstMatrix {
        &self.transitions
    }

    pub fn transitions(&self, t: f64) -> SubstMatrix {
        let k = self.alphabet_size();
        let mut matrix = SubstMatrix::zeros(self.dimension() * k, k);
        for class in 0..self.dimension() {
            let pi = self.pi.row(class).iter().copied().collect::<Vec<_>>();
            let block = match self.model_type {
                EvolModelType::ProbabilityMixing => fs81::probability_mixing(&pi, t),
                EvolModelType::RateMixing => fs81::rate_mixing(&pi, t),
                EvolModelType::TransitionTransversion { ratio } => {
                    hky::transition_transversion(&pi, t, ratio)
                }
            };
            matrix.view_mut((class * k, 0), (k, k)).copy_from(&block);
        }
        matrix
    }

    /// Transition matrix that ignores the branch parameter: every row of class `i` is the
    /// stationary distribution of class `i`.
    pub fn unweighted_transitions(&self) -> SubstMatrix {
        let k = self.alphabet_size();
        SubstMatrix::from_fn(self.dimension() * k, k, |row, b| self.pi[(row / k, b)])
    }
}

pub(crate) fn validate_distributions(pi: &StatDistr) -> Result<()> {
    for (class, row) in pi.row_iter().enumerate() {
        if row.iter().any(|p| !p.is_finite() || *p < 0.0) {
            bail!(ConfigurationError {
                message: format!("Stationary distribution {} has invalid entries", class),
            });
        }
        let sum = row.sum();
        if (sum - 1.0).abs() > DISTRIBUTION_TOLERANCE {
            bail!(ConfigurationError {
                message: format!(
                    "Stationary distribution {} sums to {} instead of 1",
                    class, sum
                ),
            });
        }
    }
    Ok(())
}
