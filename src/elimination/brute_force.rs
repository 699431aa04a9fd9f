use anyhow::bail;
use log::debug;

use crate::bayes_net::{BayesNet, StructuralError};
use crate::config::ExactConfig;
use crate::elimination::ExactLikelihood;
use crate::Result;

/// Sums the joint probability over every assignment of the hidden nodes. Exponential in the
/// number of hidden nodes, only meant to check other inference methods on small nets.
#[derive(Clone, Copy, Debug, Default)]
pub struct NodeSumming {
    config: ExactConfig,
}

impl NodeSumming {
    pub fn new(config: ExactConfig) -> Self {
        NodeSumming { config }
    }

    /// Probability of a full assignment of all nodes under the effective tables of the net.
    pub fn joint_probability(net: &BayesNet, assignment: &[usize]) -> Result<f64> {
        let mut product = 1.0;
        for node in net.nodes() {
            let query = node
                .parents
                .iter()
                .map(|&p| assignment[p])
                .collect::<Vec<_>>();
            let row = node.cpf.row_index(&query)?;
            product *= net.table(node.idx)[(row, assignment[node.idx])];
        }
        Ok(product)
    }
}

impl ExactLikelihood for NodeSumming {
    fn likelihood(&self, net: &BayesNet) -> Result<f64> {
        let k = net.alphabet_size();
        let hidden = net
            .nodes()
            .iter()
            .filter(|n| !n.is_observed())
            .map(|n| n.idx)
            .collect::<Vec<_>>();
        if hidden.len() > self.config.max_hidden {
            bail!(StructuralError::TooManyHidden {
                size: hidden.len(),
                limit: self.config.max_hidden,
            });
        }
        let mut assignment = net
            .nodes()
            .iter()
            .map(|n| n.observation.unwrap_or(0))
            .collect::<Vec<_>>();
        let mut total = 0.0;
        for code in 0..k.pow(hidden.len() as u32) {
            let mut rest = code;
            for &idx in &hidden {
                assignment[idx] = rest % k;
                rest /= k;
            }
            total += Self::joint_probability(net, &assignment)?;
        }
        debug!(
            "Summed over {} assignments of {} hidden nodes.",
            k.pow(hidden.len() as u32),
            hidden.len()
        );
        Ok(total)
    }
}
