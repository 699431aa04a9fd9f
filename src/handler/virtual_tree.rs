use anyhow::bail;
use log::debug;
use nalgebra::DMatrix;

use crate::bayes_net::{BayesNet, StructuralError};
use crate::evolutionary_models::{ConfigurationError, EvolModel};
use crate::tree::{tree_parser, Tree, TreeNode};
use crate::Result;

/// One phylogenetic tree of the union net, bound to one alignment column.
///
/// Local node `i` is the `i`-th node of the tree in preorder, so local node 0 is the tree
/// root. All branch CPFs of the tree are derived from `evol_model`.
#[derive(Clone, Debug)]
pub struct VirtualTree {
    nodes: Vec<usize>,
    leaves: Vec<usize>,
    tree_children: Vec<Vec<usize>>,
    temperature: f64,
    evol_model: EvolModel,
}

impl VirtualTree {
    /// Adds the nodes and branches of `tree` to `net`.
    pub(crate) fn build(
        net: &mut BayesNet,
        tree: &Tree,
        column: usize,
        evol_model: EvolModel,
    ) -> Result<Self> {
        let mut nodes = Vec::with_capacity(tree.len());
        for tree_node in &tree.nodes {
            let name = if tree_node.is_leaf() {
                format!("pos_{}:{}", column, tree_node.id)
            } else {
                format!("pos_{}:iN{}", column, tree_node.idx)
            };
            let idx = net.add_node(&name);
            let node = net.node_mut(idx);
            node.label = tree_node.id.clone();
            node.phylo_root = tree_node.parent.is_none();
            node.phylo_leaf = tree_node.is_leaf();
            node.blen = tree_node.blen;
            nodes.push(idx);
        }
        for tree_node in &tree.nodes {
            if let Some(parent) = tree_node.parent {
                net.add_child(nodes[parent], nodes[tree_node.idx])?;
            }
        }
        Ok(VirtualTree {
            nodes,
            leaves: tree.leaves(),
            tree_children: tree.nodes.iter().map(|n| n.children.clone()).collect(),
            temperature: 1.0,
            evol_model,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn n_leaves(&self) -> usize {
        self.leaves.len()
    }

    /// Net index of local node `i`.
    pub fn node(&self, i: usize) -> usize {
        self.nodes[i]
    }

    pub fn nodes(&self) -> &[usize] {
        &self.nodes
    }

    /// Net index of the `i`-th leaf.
    pub fn leaf(&self, i: usize) -> usize {
        self.nodes[self.leaves[i]]
    }

    pub fn leaves(&self) -> Vec<usize> {
        self.leaves.iter().map(|&l| self.nodes[l]).collect()
    }

    /// Local position of a net node in this tree.
    pub fn node_position(&self, idx: usize) -> Option<usize> {
        self.nodes.iter().position(|&n| n == idx)
    }

    pub fn is_star(&self) -> bool {
        self.len() > 1 && self.n_leaves() + 1 == self.len() && self.leaves[0] != 0
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub(crate) fn set_temperature(&mut self, temperature: f64) {
        self.temperature = temperature;
    }

    pub fn evol_model(&self) -> &EvolModel {
        &self.evol_model
    }

    pub(crate) fn evol_model_mut(&mut self) -> &mut EvolModel {
        &mut self.evol_model
    }

    /// Branch lengths of all non-root nodes in preorder.
    pub fn branch_lengths(&self, net: &BayesNet) -> Vec<f64> {
        self.nodes[1..].iter().map(|&n| net.node(n).blen).collect()
    }

    pub(crate) fn set_branch_length(&self, net: &mut BayesNet, local: usize, blen: f64) {
        net.node_mut(self.nodes[local]).blen = blen;
    }

    /// Pushes the state of the evolutionary model into the CPFs of all nodes of the tree.
    ///
    /// With temperature 1 the root gets the stationary distributions and every other node
    /// the transitions for its branch length. Any other temperature filters the first leaf,
    /// which needs a star tree and a model with a single site class.
    pub fn init_parameters(&self, net: &mut BayesNet) -> Result<()> {
        if self.temperature == 1.0 {
            for (local, &idx) in self.nodes.iter().enumerate() {
                let (cond_prob, independent) = if local == 0 {
                    let pi = self.evol_model.stat_distr().clone();
                    (pi.clone(), pi)
                } else {
                    (
                        self.evol_model.transitions(net.node(idx).blen),
                        self.evol_model.unweighted_transitions(),
                    )
                };
                let cpf = &mut net.node_mut(idx).cpf;
                cpf.set_cond_prob(cond_prob)?;
                cpf.set_independent(independent)?;
            }
            return Ok(());
        }
        self.init_filtered_parameters(net)
    }

    fn init_filtered_parameters(&self, net: &mut BayesNet) -> Result<()> {
        if self.evol_model.dimension() > 1 {
            bail!(ConfigurationError {
                message: format!(
                    "Temperature {} needs a model with one site class, got {}",
                    self.temperature,
                    self.evol_model.dimension()
                ),
            });
        }
        if !self.is_star() {
            bail!(StructuralError::NotStarTopology {
                nodes: self.len(),
                leaves: self.n_leaves(),
            });
        }
        debug!(
            "Initialising parameters with temperature {}.",
            self.temperature
        );
        let k = self.evol_model.alphabet_size();
        let pi = self.evol_model.stat_distr();
        let sharpened = pi.map(|p| p.powf(self.temperature));
        let pi_a = &sharpened / sharpened.sum();

        let first_leaf = self.leaf(0);
        let transitions = self.evol_model.transitions(net.node(first_leaf).blen);
        let pi_y = &pi_a * &transitions;
        let reverse = DMatrix::from_fn(k, k, |c, r| {
            if pi_y[c] > 0.0 {
                pi_a[r] * transitions[(r, c)] / pi_y[c]
            } else {
                pi_a[r]
            }
        });

        let root = &mut net.node_mut(self.nodes[0]).cpf;
        root.set_cond_prob(pi_y.clone())?;
        root.set_independent(pi_y)?;
        let leaf = &mut net.node_mut(first_leaf).cpf;
        leaf.set_cond_prob(reverse)?;
        leaf.set_independent(self.evol_model.unweighted_transitions())?;
        for i in 1..self.n_leaves() {
            let idx = self.leaf(i);
            let cpf_values = self.evol_model.transitions(net.node(idx).blen);
            let cpf = &mut net.node_mut(idx).cpf;
            cpf.set_cond_prob(cpf_values)?;
            cpf.set_independent(self.evol_model.unweighted_transitions())?;
        }
        Ok(())
    }

    /// A vector with one entry per leaf sets the leaves, one entry per node sets every node.
    pub fn set_observation(&self, net: &mut BayesNet, observation: &[usize]) -> Result<()> {
        let targets = if observation.len() == self.n_leaves() {
            self.leaves()
        } else if observation.len() == self.len() {
            self.nodes.clone()
        } else {
            bail!(StructuralError::ObservationLength {
                leaves: self.n_leaves(),
                nodes: self.len(),
                found: observation.len(),
            });
        };
        for (idx, &symbol) in targets.into_iter().zip(observation) {
            net.node_mut(idx).observe(symbol);
        }
        Ok(())
    }

    /// Observed leaf symbols, the alphabet size marks unobserved leaves.
    pub fn observation(&self, net: &BayesNet) -> Vec<usize> {
        self.leaves()
            .into_iter()
            .map(|l| net.node(l).observation.unwrap_or(net.alphabet_size()))
            .collect()
    }

    /// Snapshot of the tree with the current branch lengths of the net.
    pub fn to_tree(&self, net: &BayesNet) -> Tree {
        let mut nodes = Vec::with_capacity(self.len());
        for (local, &idx) in self.nodes.iter().enumerate() {
            let mut node = TreeNode::new(local, None);
            node.id = net.node(idx).label.clone();
            node.blen = net.node(idx).blen;
            node.children = self.tree_children[local].clone();
            nodes.push(node);
        }
        for local in 0..self.len() {
            for &child in &self.tree_children[local] {
                nodes[child].parent = Some(local);
            }
        }
        Tree::new(nodes)
    }

    pub fn newick(&self, net: &BayesNet) -> String {
        self.to_tree(net).to_newick()
    }

    /// Takes the branch lengths from a newick string of the same topology and reinitialises
    /// the CPFs.
    pub fn reinit_branch_lengths(&self, net: &mut BayesNet, newick: &str) -> Result<()> {
        let blens = tree_parser::blens_from_newick(&self.to_tree(net), newick)?;
        for (local, blen) in blens.into_iter().enumerate() {
            self.set_branch_length(net, local + 1, blen);
        }
        self.init_parameters(net)
    }
}
