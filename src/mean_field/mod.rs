use std::ops::Range;

use anyhow::bail;
use log::{debug, warn};

use crate::bayes_net::{BayesNet, Node, StructuralError};
use crate::config::MeanFieldConfig;
use crate::elimination::ExactLikelihood;
use crate::evolutionary_models::ConfigurationError;
use crate::handler::BayesNetHandler;
use crate::sequences::PhyloSequence;
use crate::Result;

mod cache;

pub use cache::{CachedScore, ScoreCache};

/// Result of one run of the fixed-point iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeanFieldOutcome {
    pub sweeps: usize,
    pub converged: bool,
    pub free_energy: f64,
}

/// `weight * ln(p)` with `0 * ln(0) = 0`, any positive weight on a zero probability gives
/// negative infinity.
fn weighted_log(weight: f64, p: f64) -> f64 {
    if weight == 0.0 {
        0.0
    } else if p > 0.0 {
        weight * p.ln()
    } else {
        f64::NEG_INFINITY
    }
}

/// Fully factorised approximation of the posterior over the hidden nodes of a net.
///
/// Every unobserved node gets a distribution `q` over the alphabet. A session belongs to one
/// sample: [`MeanField::init`] fixes which nodes are hidden, the iteration then improves `q`
/// node by node until the free energy stops changing.
#[derive(Clone, Debug)]
pub struct MeanField {
    config: MeanFieldConfig,
    alphabet_size: usize,
    node2hidden: Vec<Option<usize>>,
    q: Vec<f64>,
}

impl MeanField {
    pub fn new(config: MeanFieldConfig) -> Self {
        MeanField {
            config,
            alphabet_size: 0,
            node2hidden: Vec::new(),
            q: Vec::new(),
        }
    }

    pub fn config(&self) -> &MeanFieldConfig {
        &self.config
    }

    /// Maps the unobserved nodes of the net to slots of `q` and makes every `q` uniform.
    pub fn init(&mut self, net: &BayesNet) {
        let k = net.alphabet_size();
        let mut n_hidden = 0;
        self.alphabet_size = k;
        self.node2hidden = net
            .nodes()
            .iter()
            .map(|node| {
                (!node.is_observed()).then(|| {
                    n_hidden += 1;
                    (n_hidden - 1) * k
                })
            })
            .collect();
        if n_hidden == net.len() && !net.is_empty() {
            warn!("There are no observed nodes.");
        }
        self.q = vec![1.0 / k as f64; n_hidden * k];
    }

    /// Pushes the sample into the leaves of the handler and starts a fresh approximation.
    pub fn init_observation(
        &mut self,
        handler: &mut BayesNetHandler,
        sequence: &PhyloSequence,
    ) -> Result<()> {
        handler.observe(sequence)?;
        self.init(handler.net());
        Ok(())
    }

    pub fn n_hidden(&self) -> usize {
        self.node2hidden.iter().flatten().count()
    }

    /// Distribution of a hidden node, `None` for observed nodes.
    pub fn q(&self, idx: usize) -> Option<&[f64]> {
        let k = self.alphabet_size;
        self.node2hidden
            .get(idx)
            .copied()
            .flatten()
            .map(|slot| &self.q[slot..slot + k])
    }

    /// All distributions, hidden nodes in index order.
    pub fn state(&self) -> &[f64] {
        &self.q
    }

    /// Replaces all distributions, e.g. with the state of an earlier run on the same sample.
    pub fn set_state(&mut self, q: &[f64]) -> Result<()> {
        if q.len() != self.q.len() {
            bail!(StructuralError::Dimension {
                expected: self.q.len(),
                found: q.len(),
            });
        }
        self.q.copy_from_slice(q);
        Ok(())
    }

    /// Whether the hidden nodes of the session are exactly the unobserved nodes of `net`.
    pub fn is_synced(&self, net: &BayesNet) -> bool {
        self.alphabet_size == net.alphabet_size()
            && self.node2hidden.len() == net.len()
            && net
                .nodes()
                .iter()
                .zip(self.node2hidden.iter())
                .all(|(node, slot)| node.is_observed() != slot.is_some())
    }

    fn check_synced(&self, net: &BayesNet) -> Result<()> {
        if !self.is_synced(net) {
            bail!(ConfigurationError {
                message: String::from(
                    "Mean-field state does not match the observations of the net"
                ),
            });
        }
        Ok(())
    }

    fn slot(&self, idx: usize) -> Option<usize> {
        self.node2hidden[idx]
    }

    /// Product of `q` over the unobserved parents for the CPF row `row`, zero if the row
    /// contradicts an observed parent. The parent at position `skip` is left out.
    fn parent_weight(
        &self,
        net: &BayesNet,
        node: &Node,
        row: usize,
        skip: Option<usize>,
    ) -> f64 {
        let query = node.cpf.configuration(row);
        let mut prod = 1.0;
        for (p, (&parent, &symbol)) in node.parents.iter().zip(query.iter()).enumerate() {
            if Some(p) == skip {
                continue;
            }
            match (net.node(parent).observation, self.slot(parent)) {
                (Some(obs), _) if obs != symbol => return 0.0,
                (None, Some(slot)) => prod *= self.q[slot + symbol],
                _ => {}
            }
        }
        prod
    }

    /// Log weight of symbol `a` at the hidden node `idx` given all other distributions.
    fn log_weight(&self, net: &BayesNet, idx: usize, a: usize) -> f64 {
        let node = net.node(idx);
        let table = net.table(idx);
        let mut weight = 0.0;
        for row in 0..node.cpf.rows() {
            weight += weighted_log(self.parent_weight(net, node, row, None), table[(row, a)]);
        }
        for &child_idx in &node.children {
            let child = net.node(child_idx);
            let child_table = net.table(child_idx);
            let Some(pos) = child.parent_position(idx) else {
                continue;
            };
            for ac in 0..self.alphabet_size {
                let own = match (child.observation, self.slot(child_idx)) {
                    (Some(obs), _) if obs != ac => continue,
                    (None, Some(slot)) => self.q[slot + ac],
                    _ => 1.0,
                };
                for row in 0..child.cpf.rows() {
                    if child.cpf.configuration(row)[pos] != a {
                        continue;
                    }
                    let prod = own * self.parent_weight(net, child, row, Some(pos));
                    weight += weighted_log(prod, child_table[(row, ac)]);
                }
            }
        }
        weight
    }

    fn sweep(&mut self, net: &BayesNet) {
        let k = self.alphabet_size;
        for &idx in net.order() {
            let Some(slot) = self.slot(idx) else {
                continue;
            };
            let weights = (0..k)
                .map(|a| self.log_weight(net, idx, a))
                .collect::<Vec<_>>();
            let max = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if !max.is_finite() {
                continue;
            }
            let exp = weights.iter().map(|w| (w - max).exp()).collect::<Vec<_>>();
            let total: f64 = exp.iter().sum();
            for (a, e) in exp.into_iter().enumerate() {
                self.q[slot + a] = e / total;
            }
        }
    }

    /// Updates every `q` in turn until the free energy changes by less than the tolerance.
    /// Running out of sweeps is not an error, the outcome reports it.
    pub fn optimise_by_normalisation(
        &mut self,
        handler: &BayesNetHandler,
    ) -> Result<MeanFieldOutcome> {
        let net = handler.net();
        if !self.is_synced(net) {
            debug!("Observations changed, restarting from uniform distributions.");
            self.init(net);
        }
        let (min_sweeps, max_sweeps) = (self.config.min_sweeps, self.config.max_sweeps);
        let mut free_energy = self.free_energy(handler)?;
        let mut converged = false;
        let mut sweeps = 0;
        while (sweeps < max_sweeps && !converged) || sweeps < min_sweeps {
            self.sweep(net);
            let next = self.free_energy(handler)?;
            if (free_energy - next).abs() < self.config.tolerance {
                converged = true;
            }
            free_energy = next;
            sweeps += 1;
        }
        if converged {
            debug!(
                "Mean field converged after {} sweeps with free energy {}.",
                sweeps, free_energy
            );
        } else {
            debug!(
                "Mean field stopped after {} sweeps without converging, free energy {}.",
                sweeps, free_energy
            );
        }
        Ok(MeanFieldOutcome {
            sweeps,
            converged,
            free_energy,
        })
    }

    /// Free energy over all columns of the handler.
    pub fn free_energy(&self, handler: &BayesNetHandler) -> Result<f64> {
        self.free_energy_window(handler, 0..handler.len())
    }

    /// Negative entropy of `q` minus the expected log probability of the net under `q`,
    /// restricted to the nodes of the given columns.
    pub fn free_energy_window(
        &self,
        handler: &BayesNetHandler,
        columns: Range<usize>,
    ) -> Result<f64> {
        let net = handler.net();
        self.check_synced(net)?;
        let k = self.alphabet_size;
        let mut entropy = 0.0;
        let mut expected = 0.0;
        for column in columns {
            for &idx in handler.tree(column)?.nodes() {
                let node = net.node(idx);
                let table = net.table(idx);
                if let Some(slot) = self.slot(idx) {
                    entropy += self.q[slot..slot + k]
                        .iter()
                        .filter(|&&q| q > 0.0)
                        .map(|q| q * q.ln())
                        .sum::<f64>();
                }
                match (node.observation, self.slot(idx)) {
                    (Some(obs), _) => {
                        for row in 0..node.cpf.rows() {
                            let prod = self.parent_weight(net, node, row, None);
                            expected += weighted_log(prod, table[(row, obs)]);
                        }
                    }
                    (None, Some(slot)) if node.is_root() => {
                        for h in 0..k {
                            expected += weighted_log(self.q[slot + h], table[(0, h)]);
                        }
                    }
                    (None, Some(slot)) => {
                        for h in 0..k {
                            for row in 0..node.cpf.rows() {
                                let prod = self.parent_weight(net, node, row, None)
                                    * self.q[slot + h];
                                expected += weighted_log(prod, table[(row, h)]);
                            }
                        }
                    }
                    (None, None) => {}
                }
            }
        }
        Ok(entropy - expected)
    }

    /// Approximate log-likelihood of the observations.
    pub fn score(&self, handler: &BayesNetHandler) -> Result<f64> {
        Ok(-self.free_energy(handler)?)
    }

    /// Exact log-likelihood of the current observations, for checking the approximation.
    pub fn log_likelihood<E: ExactLikelihood>(
        &self,
        handler: &BayesNetHandler,
        exact: &E,
    ) -> Result<f64> {
        exact.log_likelihood(handler.net())
    }
}
