use std::fmt::{self, Display};

use anyhow::bail;
use log::debug;

use crate::bayes_net::StructuralError;
use crate::evolutionary_models::{ConfigurationError, StatDistr};
use crate::handler::BayesNetHandler;
use crate::Result;

/// Lower bound of branch lengths reachable through the flat parameter view.
pub const MIN_BLEN: f64 = 0.0005;

/// Which model parameters an optimiser sees, and how they are flattened.
///
/// Every parameter lives on an unconstrained scale: stationary distributions as log
/// probabilities (normalised per site class on the way back), branch lengths through a
/// logit onto `(MIN_BLEN, 1)` and temperatures as logarithms.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParameterSet {
    /// All site classes of one column, or of every column in turn.
    StationaryDistributions { column: Option<usize> },
    /// Non-root branch lengths in preorder. `shared` uses one value per branch position
    /// for all columns, which then need trees of the same size.
    BranchLengths { column: Option<usize>, shared: bool },
    /// One temperature per column, or a single one for all columns.
    Temperatures { local: bool },
}

impl Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterSet::StationaryDistributions { column: Some(c) } => {
                write!(f, "stationary distributions of column {}", c)
            }
            ParameterSet::StationaryDistributions { column: None } => {
                write!(f, "stationary distributions")
            }
            ParameterSet::BranchLengths { column: Some(c), .. } => {
                write!(f, "branch lengths of column {}", c)
            }
            ParameterSet::BranchLengths {
                column: None,
                shared,
            } => write!(
                f,
                "{} branch lengths",
                if *shared { "shared" } else { "per-column" }
            ),
            ParameterSet::Temperatures { local } => write!(
                f,
                "{} temperature(s)",
                if *local { "per-column" } else { "global" }
            ),
        }
    }
}

fn encode_blen(blen: f64) -> f64 {
    let blen = blen.clamp(MIN_BLEN + f64::EPSILON, 1.0 - f64::EPSILON);
    ((blen - MIN_BLEN) / (1.0 - blen)).ln()
}

fn decode_blen(x: f64) -> f64 {
    let sigmoid = 1.0 / (1.0 + (-x).exp());
    MIN_BLEN + (1.0 - MIN_BLEN) * sigmoid
}

fn encode_stat_distr(pi: &StatDistr) -> Vec<f64> {
    pi.row_iter()
        .flat_map(|row| {
            row.iter()
                .map(|p| p.max(f64::MIN_POSITIVE).ln())
                .collect::<Vec<_>>()
        })
        .collect()
}

fn decode_stat_distr(values: &[f64], dimension: usize, alphabet_size: usize) -> StatDistr {
    let mut pi = StatDistr::zeros(dimension, alphabet_size);
    for (class, block) in values.chunks(alphabet_size).enumerate() {
        let max = block.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weights = block.iter().map(|v| (v - max).exp()).collect::<Vec<_>>();
        let total: f64 = weights.iter().sum();
        for (a, w) in weights.into_iter().enumerate() {
            pi[(class, a)] = w / total;
        }
    }
    pi
}

impl BayesNetHandler {
    fn parameter_columns(&self, column: Option<usize>) -> Result<Vec<usize>> {
        match column {
            Some(c) => {
                self.tree(c)?;
                Ok(vec![c])
            }
            None => Ok((0..self.len()).collect()),
        }
    }

    fn shared_branch_count(&self) -> Result<usize> {
        let Some(first) = self.trees().first() else {
            return Ok(0);
        };
        if let Some(other) = self.trees().iter().find(|t| t.len() != first.len()) {
            bail!(StructuralError::NodeCountMismatch {
                first: first.len(),
                second: other.len(),
            });
        }
        Ok(first.len() - 1)
    }

    pub fn number_of_parameters(&self, set: ParameterSet) -> Result<usize> {
        Ok(match set {
            ParameterSet::StationaryDistributions { column } => self
                .parameter_columns(column)?
                .iter()
                .map(|&c| self.trees()[c].evol_model().stat_distr().len())
                .sum(),
            ParameterSet::BranchLengths {
                column: None,
                shared: true,
            } => self.shared_branch_count()?,
            ParameterSet::BranchLengths { column, .. } => self
                .parameter_columns(column)?
                .iter()
                .map(|&c| self.trees()[c].len() - 1)
                .sum(),
            ParameterSet::Temperatures { local: true } => self.len(),
            ParameterSet::Temperatures { local: false } => usize::from(!self.is_empty()),
        })
    }

    /// Current values of the parameter set on the unconstrained scale.
    pub fn get_parameters(&self, set: ParameterSet) -> Result<Vec<f64>> {
        let mut values = Vec::with_capacity(self.number_of_parameters(set)?);
        match set {
            ParameterSet::StationaryDistributions { column } => {
                for c in self.parameter_columns(column)? {
                    values.extend(encode_stat_distr(
                        self.trees()[c].evol_model().stat_distr(),
                    ));
                }
            }
            ParameterSet::BranchLengths {
                column: None,
                shared: true,
            } => {
                self.shared_branch_count()?;
                if let Some(first) = self.trees().first() {
                    values.extend(first.branch_lengths(self.net()).into_iter().map(encode_blen));
                }
            }
            ParameterSet::BranchLengths { column, .. } => {
                for c in self.parameter_columns(column)? {
                    values.extend(
                        self.trees()[c]
                            .branch_lengths(self.net())
                            .into_iter()
                            .map(encode_blen),
                    );
                }
            }
            ParameterSet::Temperatures { local: true } => {
                values.extend(self.trees().iter().map(|t| t.temperature().ln()));
            }
            ParameterSet::Temperatures { local: false } => {
                values.extend(self.trees().first().map(|t| t.temperature().ln()));
            }
        }
        Ok(values)
    }

    /// Installs values produced by an optimiser, reinitialises the affected columns and
    /// invalidates cached scores.
    pub fn set_parameters(&mut self, set: ParameterSet, values: &[f64]) -> Result<()> {
        let expected = self.number_of_parameters(set)?;
        if values.len() != expected {
            bail!(ConfigurationError {
                message: format!(
                    "Expected {} values for {}, got {}",
                    expected,
                    set,
                    values.len()
                ),
            });
        }
        debug!("Setting {} from {} values.", set, values.len());
        match set {
            ParameterSet::StationaryDistributions { column } => {
                let mut offset = 0;
                for c in self.parameter_columns(column)? {
                    let model = self.trees()[c].evol_model();
                    let (dimension, k) = (model.dimension(), model.alphabet_size());
                    let block = &values[offset..offset + dimension * k];
                    offset += dimension * k;
                    self.set_stat_distr(c, decode_stat_distr(block, dimension, k))?;
                }
            }
            ParameterSet::BranchLengths {
                column: None,
                shared: true,
            } => {
                for c in 0..self.len() {
                    self.install_branch_lengths(c, values)?;
                }
            }
            ParameterSet::BranchLengths { column, .. } => {
                let mut offset = 0;
                for c in self.parameter_columns(column)? {
                    let n_branches = self.trees()[c].len() - 1;
                    self.install_branch_lengths(c, &values[offset..offset + n_branches])?;
                    offset += n_branches;
                }
            }
            ParameterSet::Temperatures { local } => {
                for c in 0..self.len() {
                    let x = if local { values[c] } else { values[0] };
                    self.set_temperature(c, x.exp())?;
                }
            }
        }
        Ok(())
    }

    fn install_branch_lengths(&mut self, column: usize, values: &[f64]) -> Result<()> {
        for (i, &x) in values.iter().enumerate() {
            self.trees[column].set_branch_length(&mut self.net, i + 1, decode_blen(x));
        }
        self.init_column(column)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::{decode_blen, decode_stat_distr, encode_blen, encode_stat_distr, MIN_BLEN};
    use crate::evolutionary_models::StatDistr;

    #[test]
    fn blen_transform_inverts() {
        for blen in [0.001, 0.05, 0.3, 0.5, 0.9] {
            assert_relative_eq!(decode_blen(encode_blen(blen)), blen, epsilon = 1e-12);
        }
        assert!(decode_blen(-50.0) >= MIN_BLEN);
        assert!(decode_blen(50.0) <= 1.0);
    }

    #[test]
    fn stat_distr_transform_normalises() {
        let pi = StatDistr::from_row_slice(2, 2, &[0.25, 0.75, 0.5, 0.5]);
        let decoded = decode_stat_distr(&encode_stat_distr(&pi), 2, 2);
        assert_relative_eq!(decoded, pi, epsilon = 1e-12);
        let shifted = decode_stat_distr(&[1.0, 1.0, 0.0, 100.0], 2, 2);
        assert_relative_eq!(shifted[(0, 0)], 0.5);
        assert_relative_eq!(shifted[(1, 1)], 1.0, epsilon = 1e-12);
    }
}
