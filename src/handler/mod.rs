use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::bail;
use log::{debug, info, warn};
use rand::Rng;

use crate::alphabets::ALPHABET_SIZE;
use crate::bayes_net::{BayesNet, StructuralError};
use crate::config::ModelConfig;
use crate::evolutionary_models::{ConfigurationError, EvolModel, StatDistr};
use crate::sequences::PhyloSequence;
use crate::tree::tree_parser;
use crate::Result;

mod parameters;
mod serialization;
mod virtual_tree;

pub use parameters::{ParameterSet, MIN_BLEN};
pub use virtual_tree::VirtualTree;

static NEXT_VERSION: AtomicU64 = AtomicU64::new(0);

fn next_version() -> u64 {
    NEXT_VERSION.fetch_add(1, Ordering::Relaxed)
}

/// Owns the union net of all columns, one [`VirtualTree`] per column and the table of
/// horizontal connections between columns.
///
/// `connection_table[i][j] == 1` means that every node of column `j` has the matching node
/// of column `i` as an additional parent. The version changes on every change of the
/// parameters or the wiring. Versions are drawn from a process-wide counter, so no two
/// handlers ever report the same version for different models and a cached score is only
/// valid for the handler state it was computed with.
#[derive(Clone, Debug)]
pub struct BayesNetHandler {
    net: BayesNet,
    trees: Vec<VirtualTree>,
    connection_table: Vec<Vec<u8>>,
    version: u64,
}

impl Default for BayesNetHandler {
    fn default() -> Self {
        BayesNetHandler::new(ALPHABET_SIZE)
    }
}

impl BayesNetHandler {
    pub fn new(alphabet_size: usize) -> Self {
        BayesNetHandler {
            net: BayesNet::new(alphabet_size),
            trees: Vec::new(),
            connection_table: Vec::new(),
            version: next_version(),
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        let mut handler = BayesNetHandler::new(config.alphabet_size);
        handler.net = handler
            .net
            .with_independent_transitions(config.use_independent_transitions);
        handler
    }

    pub(crate) fn set_independent_transitions(&mut self, use_independent: bool) {
        let net = std::mem::take(&mut self.net);
        self.net = net.with_independent_transitions(use_independent);
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn net(&self) -> &BayesNet {
        &self.net
    }

    pub fn trees(&self) -> &[VirtualTree] {
        &self.trees
    }

    pub fn tree(&self, column: usize) -> Result<&VirtualTree> {
        match self.trees.get(column) {
            Some(tree) => Ok(tree),
            None => bail!(StructuralError::UnknownColumn(column)),
        }
    }

    pub fn connection_table(&self) -> &[Vec<u8>] {
        &self.connection_table
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn check_column(&self, column: usize) -> Result<()> {
        self.tree(column).map(|_| ())
    }

    fn touch(&mut self) {
        self.version = next_version();
    }

    /// Appends a column whose tree is given as a newick string. The connection table grows
    /// by one row and column, previous entries are kept.
    pub fn add_bayes_net(&mut self, newick: &str, evol_model: EvolModel) -> Result<usize> {
        if evol_model.alphabet_size() != self.net.alphabet_size() {
            bail!(ConfigurationError {
                message: format!(
                    "Model over {} symbols does not fit a net over {} symbols",
                    evol_model.alphabet_size(),
                    self.net.alphabet_size()
                ),
            });
        }
        let tree = tree_parser::from_newick(newick)?;
        let column = self.trees.len();
        let virtual_tree = VirtualTree::build(&mut self.net, &tree, column, evol_model)?;
        virtual_tree.init_parameters(&mut self.net)?;
        self.trees.push(virtual_tree);
        for row in self.connection_table.iter_mut() {
            row.push(0);
        }
        self.connection_table.push(vec![0; self.trees.len()]);
        self.touch();
        info!(
            "Added column {} with {} nodes using {}.",
            column,
            tree.len(),
            self.trees[column].evol_model()
        );
        Ok(column)
    }

    fn incoming(&self, column: usize) -> usize {
        self.connection_table
            .iter()
            .map(|row| row[column] as usize)
            .sum()
    }

    /// At most one horizontal edge may enter a column.
    pub fn is_dimer_consistent(&self) -> bool {
        (0..self.len()).all(|column| self.incoming(column) <= 1)
    }

    /// Makes node `i` of column `t1` a parent of node `i` of column `t2`, for every `i`.
    ///
    /// The model of `t2` is resized to one site class per configuration of its horizontal
    /// parents and the CPFs of `t2` are reinitialised.
    pub fn connect_virtual_trees(&mut self, t1: usize, t2: usize) -> Result<()> {
        self.check_column(t1)?;
        self.check_column(t2)?;
        let (first, second) = (self.trees[t1].len(), self.trees[t2].len());
        if first != second {
            bail!(StructuralError::NodeCountMismatch { first, second });
        }
        if self.connection_table[t1][t2] == 1 {
            bail!(StructuralError::DuplicateEdge {
                parent: t1,
                child: t2
            });
        }
        for i in 0..first {
            let (parent, child) = (self.trees[t1].node(i), self.trees[t2].node(i));
            if parent == child || self.net.reaches(child, parent) {
                bail!(StructuralError::Cycle { parent, child });
            }
        }
        for i in 0..first {
            self.net
                .add_child(self.trees[t1].node(i), self.trees[t2].node(i))?;
        }
        self.connection_table[t1][t2] = 1;
        if !self.is_dimer_consistent() {
            warn!(
                "Connecting column {} to column {} breaks dimer consistency.",
                t1, t2
            );
        }
        self.fit_model_to_parents(t2)?;
        info!("Connected column {} to column {}.", t1, t2);
        Ok(())
    }

    /// Removes the horizontal edges added by [`Self::connect_virtual_trees`].
    pub fn separate_virtual_trees(&mut self, t1: usize, t2: usize) -> Result<()> {
        self.check_column(t1)?;
        self.check_column(t2)?;
        if self.connection_table[t1][t2] == 0 {
            bail!(StructuralError::MissingEdge {
                parent: t1,
                child: t2
            });
        }
        for i in 0..self.trees[t1].len() {
            self.net
                .remove_child(self.trees[t1].node(i), self.trees[t2].node(i))?;
        }
        self.connection_table[t1][t2] = 0;
        self.fit_model_to_parents(t2)?;
        info!("Separated column {} from column {}.", t1, t2);
        Ok(())
    }

    fn fit_model_to_parents(&mut self, column: usize) -> Result<()> {
        let n_horizontal = self.net.node(self.trees[column].node(0)).parents.len();
        let dimension = self.net.alphabet_size().pow(n_horizontal as u32);
        if self.trees[column].evol_model().dimension() != dimension {
            debug!(
                "Column {} now has {} horizontal parent(s), using {} site classes.",
                column, n_horizontal, dimension
            );
            self.trees[column].evol_model_mut().resize(dimension)?;
        }
        self.init_column(column)
    }

    /// Reinitialises the CPFs of every column from its evolutionary model.
    pub fn init_parameters(&mut self) -> Result<()> {
        for column in 0..self.trees.len() {
            self.trees[column].init_parameters(&mut self.net)?;
        }
        self.touch();
        Ok(())
    }

    pub fn init_column(&mut self, column: usize) -> Result<()> {
        self.check_column(column)?;
        self.trees[column].init_parameters(&mut self.net)?;
        self.touch();
        Ok(())
    }

    pub fn set_evol_model(&mut self, column: usize, evol_model: EvolModel) -> Result<()> {
        self.check_column(column)?;
        let previous = std::mem::replace(self.trees[column].evol_model_mut(), evol_model);
        if let Err(err) = self.init_column(column) {
            *self.trees[column].evol_model_mut() = previous;
            self.trees[column].init_parameters(&mut self.net)?;
            return Err(err);
        }
        Ok(())
    }

    pub fn set_stat_distr(&mut self, column: usize, pi: StatDistr) -> Result<()> {
        self.check_column(column)?;
        self.trees[column].evol_model_mut().set_stat_distr(pi)?;
        self.init_column(column)
    }

    pub fn set_temperature(&mut self, column: usize, temperature: f64) -> Result<()> {
        self.check_column(column)?;
        let previous = self.trees[column].temperature();
        self.trees[column].set_temperature(temperature);
        if let Err(err) = self.init_column(column) {
            self.trees[column].set_temperature(previous);
            return Err(err);
        }
        Ok(())
    }

    /// Sets the branch length above local node `local` of the column.
    pub fn set_branch_length(&mut self, column: usize, local: usize, blen: f64) -> Result<()> {
        self.check_column(column)?;
        if local == 0 || local >= self.trees[column].len() {
            bail!(StructuralError::UnknownNode(local));
        }
        self.trees[column].set_branch_length(&mut self.net, local, blen);
        self.init_column(column)
    }

    pub fn reinit_branch_lengths(&mut self, column: usize, newick: &str) -> Result<()> {
        self.check_column(column)?;
        self.trees[column].reinit_branch_lengths(&mut self.net, newick)?;
        self.touch();
        Ok(())
    }

    pub fn newick(&self, column: usize) -> Result<String> {
        Ok(self.tree(column)?.newick(&self.net))
    }

    pub fn set_observation(&mut self, column: usize, observation: &[usize]) -> Result<()> {
        self.check_column(column)?;
        self.trees[column].set_observation(&mut self.net, observation)
    }

    pub fn clear_observations(&mut self) {
        self.net.clear_observations();
    }

    /// Pushes the columns of a sample into the leaves, columns beyond the sample stay
    /// unobserved.
    pub fn observe(&mut self, sequence: &PhyloSequence) -> Result<()> {
        self.net.clear_observations();
        for column in 0..self.len().min(sequence.len()) {
            self.trees[column].set_observation(&mut self.net, sequence.column(column))?;
        }
        Ok(())
    }

    pub fn calculate_combined_probs(&mut self) {
        self.net.calculate_combined_probs();
    }

    /// Per column, the unconditional distribution at the given leaf, i.e. the motif as seen
    /// in one species.
    pub fn leaf_marginals(&mut self, leaf: usize) -> Result<Vec<Vec<f64>>> {
        self.net.calculate_combined_probs();
        let mut marginals = Vec::with_capacity(self.len());
        for tree in &self.trees {
            if leaf >= tree.n_leaves() {
                bail!(StructuralError::UnknownNode(leaf));
            }
            marginals.push(self.net.marginal(tree.leaf(leaf)));
        }
        Ok(marginals)
    }

    /// Draws a complete sample from the model and returns the leaf symbols per column.
    pub fn draw_sample<R: Rng + ?Sized>(&self, id: &str, rng: &mut R) -> Result<PhyloSequence> {
        let hidden = vec![self.net.alphabet_size(); self.net.len()];
        let full = self.net.draw_full_observation(&hidden, rng)?;
        let columns = self
            .trees
            .iter()
            .map(|tree| tree.leaves().into_iter().map(|l| full[l]).collect())
            .collect();
        Ok(PhyloSequence::new(id, columns))
    }
}

#[cfg(test)]
mod tests;
