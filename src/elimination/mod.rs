use anyhow::bail;
use log::debug;

use crate::bayes_net::{BayesNet, StructuralError};
use crate::config::ExactConfig;
use crate::Result;

mod brute_force;

pub use brute_force::NodeSumming;

/// Exact probability of the current observations of a net, every hidden node summed out.
pub trait ExactLikelihood {
    fn likelihood(&self, net: &BayesNet) -> Result<f64>;

    fn log_likelihood(&self, net: &BayesNet) -> Result<f64> {
        Ok(self.likelihood(net)?.ln())
    }
}

/// Variable elimination along the reverse topological order of the net.
///
/// The frontier holds every node that was touched but not yet summed out. A table over the
/// frontier is indexed in mixed radix with frontier position 0 as the least significant
/// digit, so appending nodes to the frontier keeps the codes of the previous table as the
/// lower digits.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimpleNodeElimination {
    config: ExactConfig,
}

impl SimpleNodeElimination {
    pub fn new(config: ExactConfig) -> Self {
        SimpleNodeElimination { config }
    }

    /// Multiplies the factor of `idx` into `sum` and sums the node out.
    fn eliminate(
        &self,
        net: &BayesNet,
        idx: usize,
        frontier: &mut Vec<usize>,
        sum: Vec<f64>,
    ) -> Result<Vec<f64>> {
        let k = net.alphabet_size();
        let node = net.node(idx);
        let old_size = sum.len();
        for &member in std::iter::once(&idx).chain(node.parents.iter()) {
            if !frontier.contains(&member) {
                frontier.push(member);
            }
        }
        if frontier.len() > self.config.max_frontier {
            bail!(StructuralError::FrontierTooLarge {
                size: frontier.len(),
                limit: self.config.max_frontier,
            });
        }
        let pows = (0..=frontier.len())
            .map(|p| k.pow(p as u32))
            .collect::<Vec<_>>();
        let digit = |code: usize, pos: usize| (code / pows[pos]) % k;
        let pos = frontier.iter().position(|&n| n == idx).unwrap_or_default();
        let parent_pos = node
            .parents
            .iter()
            .map(|p| frontier.iter().position(|n| n == p).unwrap_or_default())
            .collect::<Vec<_>>();
        let table = net.table(idx);
        let size = pows[frontier.len()];

        let mut gen = vec![0.0; size];
        for (code, value) in gen.iter_mut().enumerate() {
            let old = sum[code % old_size];
            *value = if node.is_root() {
                old
            } else {
                let row = parent_pos
                    .iter()
                    .enumerate()
                    .map(|(p, &fp)| pows[p] * digit(code, fp))
                    .sum::<usize>();
                table[(row, digit(code, pos))] * old
            };
        }

        let mut summed = vec![0.0; size / k];
        for (code, value) in gen.into_iter().enumerate() {
            let a = digit(code, pos);
            if node.observation.is_some_and(|obs| obs != a) {
                continue;
            }
            let prior = if node.is_root() { table[(0, a)] } else { 1.0 };
            let reduced = code % pows[pos] + (code / pows[pos + 1]) * pows[pos];
            summed[reduced] += value * prior;
        }
        frontier.remove(pos);
        Ok(summed)
    }
}

impl ExactLikelihood for SimpleNodeElimination {
    fn likelihood(&self, net: &BayesNet) -> Result<f64> {
        let mut frontier = Vec::new();
        let mut sum = vec![1.0];
        let mut widest = 0;
        for &idx in net.order().iter().rev() {
            sum = self.eliminate(net, idx, &mut frontier, sum)?;
            widest = widest.max(frontier.len() + 1);
        }
        debug!(
            "Eliminated {} nodes with a frontier of at most {} nodes.",
            net.len(),
            widest
        );
        Ok(sum[0])
    }
}
