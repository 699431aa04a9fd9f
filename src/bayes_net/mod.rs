use std::error::Error;
use std::fmt;

use anyhow::bail;
use log::debug;
use nalgebra::DMatrix;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::alphabets::ALPHABET_SIZE;
use crate::Result;

mod cpf;
mod node;

pub use cpf::Cpf;
pub use node::Node;

/// Errors in the wiring of a network or in the shape of the data pushed into it.
#[derive(Clone, Debug, PartialEq)]
pub enum StructuralError {
    Dimension { expected: usize, found: usize },
    SymbolOutOfRange { symbol: usize, alphabet_size: usize },
    TableShape { expected: (usize, usize), found: (usize, usize) },
    UnknownNode(usize),
    SelfLoop(usize),
    DuplicateEdge { parent: usize, child: usize },
    MissingEdge { parent: usize, child: usize },
    Cycle { parent: usize, child: usize },
    NodeCountMismatch { first: usize, second: usize },
    NotStarTopology { nodes: usize, leaves: usize },
    ObservationLength { leaves: usize, nodes: usize, found: usize },
    UnknownColumn(usize),
    FrontierTooLarge { size: usize, limit: usize },
    TooManyHidden { size: usize, limit: usize },
}

impl fmt::Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralError::Dimension { expected, found } => write!(
                f,
                "Query has {} entries but the node has {} parents",
                found, expected
            ),
            StructuralError::SymbolOutOfRange {
                symbol,
                alphabet_size,
            } => write!(
                f,
                "Symbol {} is outside of the alphabet of size {}",
                symbol, alphabet_size
            ),
            StructuralError::TableShape { expected, found } => write!(
                f,
                "Table of shape {:?} does not fit a CPF of shape {:?}",
                found, expected
            ),
            StructuralError::UnknownNode(idx) => write!(f, "No node with index {}", idx),
            StructuralError::SelfLoop(idx) => write!(f, "Node {} cannot be its own parent", idx),
            StructuralError::DuplicateEdge { parent, child } => {
                write!(f, "Edge {} -> {} already exists", parent, child)
            }
            StructuralError::MissingEdge { parent, child } => {
                write!(f, "There is no edge {} -> {}", parent, child)
            }
            StructuralError::Cycle { parent, child } => {
                write!(f, "Edge {} -> {} would close a cycle", parent, child)
            }
            StructuralError::NodeCountMismatch { first, second } => write!(
                f,
                "Trees have different numbers of nodes: {} and {}",
                first, second
            ),
            StructuralError::NotStarTopology { nodes, leaves } => write!(
                f,
                "A star topology is required, got {} nodes with {} leaves",
                nodes, leaves
            ),
            StructuralError::ObservationLength {
                leaves,
                nodes,
                found,
            } => write!(
                f,
                "Observation of length {} matches neither the {} leaves nor the {} nodes",
                found, leaves, nodes
            ),
            StructuralError::UnknownColumn(idx) => write!(f, "No column with index {}", idx),
            StructuralError::FrontierTooLarge { size, limit } => write!(
                f,
                "Elimination frontier of {} nodes exceeds the limit of {}",
                size, limit
            ),
            StructuralError::TooManyHidden { size, limit } => write!(
                f,
                "Enumerating {} hidden nodes exceeds the limit of {}",
                size, limit
            ),
        }
    }
}

impl Error for StructuralError {}

/// Directed acyclic graph of discrete variables, stored as an arena of [`Node`]s.
///
/// The net keeps a topological order of its nodes, layered by the longest path from any
/// root, that is refreshed on every edge change.
#[derive(Clone, Debug)]
pub struct BayesNet {
    alphabet_size: usize,
    nodes: Vec<Node>,
    order: Vec<usize>,
    use_independent_transitions: bool,
}

impl Default for BayesNet {
    fn default() -> Self {
        BayesNet::new(ALPHABET_SIZE)
    }
}

impl BayesNet {
    pub fn new(alphabet_size: usize) -> Self {
        BayesNet {
            alphabet_size,
            nodes: Vec::new(),
            order: Vec::new(),
            use_independent_transitions: false,
        }
    }

    pub fn with_independent_transitions(mut self, use_independent: bool) -> Self {
        self.use_independent_transitions = use_independent;
        self
    }

    pub fn uses_independent_transitions(&self) -> bool {
        self.use_independent_transitions
    }

    pub fn alphabet_size(&self) -> usize {
        self.alphabet_size
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }

    pub(crate) fn node_mut(&mut self, idx: usize) -> &mut Node {
        &mut self.nodes[idx]
    }

    /// Nodes in topological order, parents before children.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes.iter().filter(|n| n.is_root()).map(|n| n.idx)
    }

    pub fn add_node(&mut self, name: &str) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Node::new(idx, name, self.alphabet_size));
        self.order.push(idx);
        idx
    }

    /// Adds the edge `parent -> child`. The child's CPF is rebuilt as a uniform table for
    /// the new number of parents.
    pub fn add_child(&mut self, parent: usize, child: usize) -> Result<()> {
        self.check_node(parent)?;
        self.check_node(child)?;
        if parent == child {
            bail!(StructuralError::SelfLoop(parent));
        }
        if self.nodes[child].parents.contains(&parent) {
            bail!(StructuralError::DuplicateEdge { parent, child });
        }
        if self.reaches(child, parent) {
            bail!(StructuralError::Cycle { parent, child });
        }
        self.nodes[parent].children.push(child);
        self.nodes[child].parents.push(parent);
        let n_parents = self.nodes[child].parents.len();
        self.nodes[child].cpf = Cpf::new(self.alphabet_size, n_parents);
        self.update_order();
        debug!("Added edge {} -> {}.", parent, child);
        Ok(())
    }

    pub fn remove_child(&mut self, parent: usize, child: usize) -> Result<()> {
        self.check_node(parent)?;
        self.check_node(child)?;
        let Some(pos) = self.nodes[child].parent_position(parent) else {
            bail!(StructuralError::MissingEdge { parent, child });
        };
        self.nodes[child].parents.remove(pos);
        self.nodes[parent].children.retain(|&c| c != child);
        let n_parents = self.nodes[child].parents.len();
        self.nodes[child].cpf = Cpf::new(self.alphabet_size, n_parents);
        self.update_order();
        debug!("Removed edge {} -> {}.", parent, child);
        Ok(())
    }

    /// Whether `to` can be reached from `from` following child edges.
    pub fn reaches(&self, from: usize, to: usize) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![from];
        while let Some(idx) = stack.pop() {
            if idx == to {
                return true;
            }
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            stack.extend(self.nodes[idx].children.iter().filter(|&&c| !visited[c]));
        }
        false
    }

    fn check_node(&self, idx: usize) -> Result<()> {
        if idx >= self.nodes.len() {
            bail!(StructuralError::UnknownNode(idx));
        }
        Ok(())
    }

    /// Layers nodes by their maximal depth below any root, ties broken by index.
    fn update_order(&mut self) {
        let n = self.nodes.len();
        let mut depth = vec![0usize; n];
        let mut pending = self
            .nodes
            .iter()
            .map(|node| node.parents.len())
            .collect::<Vec<_>>();
        let mut stack = self.roots().collect::<Vec<_>>();
        while let Some(idx) = stack.pop() {
            for &child in &self.nodes[idx].children {
                depth[child] = depth[child].max(depth[idx] + 1);
                pending[child] -= 1;
                if pending[child] == 0 {
                    stack.push(child);
                }
            }
        }
        let mut order = (0..n).collect::<Vec<_>>();
        order.sort_by_key(|&idx| (depth[idx], idx));
        self.order = order;
    }

    /// Table used by inference for the given node. Unobserved tree leaves use the
    /// branch-length independent transitions when the net is configured to.
    pub fn table(&self, idx: usize) -> &DMatrix<f64> {
        let node = &self.nodes[idx];
        if self.use_independent_transitions
            && node.phylo_leaf
            && !node.phylo_root
            && !node.is_observed()
        {
            if let Some(independent) = node.cpf.independent() {
                return independent;
            }
        }
        node.cpf.cond_prob()
    }

    pub fn observe(&mut self, idx: usize, symbol: usize) -> Result<()> {
        self.check_node(idx)?;
        self.nodes[idx].observe(symbol);
        Ok(())
    }

    pub fn clear_observations(&mut self) {
        for node in self.nodes.iter_mut() {
            node.observation = None;
        }
    }

    /// Observed symbol of every node, unobserved nodes get the alphabet size as sentinel.
    pub fn observations(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .map(|n| n.observation.unwrap_or(self.alphabet_size))
            .collect()
    }

    /// Multiplies every CPF row with the marginals of the node's parents, giving the joint
    /// table of node and parents. Marginals are read off in topological order.
    pub fn calculate_combined_probs(&mut self) {
        let mut marginals: Vec<Vec<f64>> = vec![Vec::new(); self.nodes.len()];
        for &idx in &self.order {
            let node = &self.nodes[idx];
            let mut combined = node.cpf.cond_prob().clone();
            for row in 0..combined.nrows() {
                let factor: f64 = node
                    .cpf
                    .configuration(row)
                    .iter()
                    .zip(node.parents.iter())
                    .map(|(&symbol, &parent)| marginals[parent][symbol])
                    .product();
                combined.row_mut(row).scale_mut(factor);
            }
            marginals[idx] = combined.row_sum().iter().copied().collect();
            self.nodes[idx].cpf.set_combined(combined);
        }
    }

    /// Unconditional distribution of a node, valid after [`Self::calculate_combined_probs`].
    pub fn marginal(&self, idx: usize) -> Vec<f64> {
        self.nodes[idx].cpf.marginal()
    }

    /// Ancestral sampling of a full assignment. Entries of `partial` inside the alphabet are
    /// kept, all others are drawn from the conditional tables given the sampled parents.
    pub fn draw_full_observation<R: Rng + ?Sized>(
        &self,
        partial: &[usize],
        rng: &mut R,
    ) -> Result<Vec<usize>> {
        if partial.len() != self.nodes.len() {
            bail!(StructuralError::ObservationLength {
                leaves: self.nodes.iter().filter(|n| n.is_leaf()).count(),
                nodes: self.nodes.len(),
                found: partial.len(),
            });
        }
        let mut full = partial.to_vec();
        for &idx in &self.order {
            if full[idx] < self.alphabet_size {
                continue;
            }
            let node = &self.nodes[idx];
            let query = node.parents.iter().map(|&p| full[p]).collect::<Vec<_>>();
            let row = node.cpf.row_index(&query)?;
            let weights = WeightedIndex::new(node.cpf.cond_prob().row(row).iter())?;
            full[idx] = weights.sample(rng);
        }
        Ok(full)
    }
}
