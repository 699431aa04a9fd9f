use std::fmt::{Debug, Display};

use crate::bayes_net::Cpf;

#[derive(Clone, PartialEq)]
pub struct Node {
    pub idx: usize,
    pub name: String,
    /// Taxon label for leaves, empty for inner nodes.
    pub label: String,
    pub parents: Vec<usize>,
    pub children: Vec<usize>,
    pub phylo_root: bool,
    pub phylo_leaf: bool,
    /// Branch length to the parent in the node's own tree.
    pub blen: f64,
    pub observation: Option<usize>,
    pub cpf: Cpf,
}

impl Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.label.is_empty() {
            write!(f, "{} ({})", self.name, self.idx)
        } else {
            write!(f, "{} ({}) with label {}", self.name, self.idx, self.label)
        }
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{}:{}, parents: {:?}, children: {:?}, observation: {:?}",
            self, self.blen, self.parents, self.children, self.observation
        )
    }
}

impl Node {
    pub(crate) fn new(idx: usize, name: &str, alphabet_size: usize) -> Self {
        Node {
            idx,
            name: name.to_string(),
            label: String::new(),
            parents: Vec::new(),
            children: Vec::new(),
            phylo_root: false,
            phylo_leaf: false,
            blen: 0.0,
            observation: None,
            cpf: Cpf::new(alphabet_size, 0),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_observed(&self) -> bool {
        self.observation.is_some()
    }

    /// Sets the observed symbol, anything outside the alphabet clears the observation.
    pub fn observe(&mut self, symbol: usize) {
        self.observation = (symbol < self.cpf.alphabet_size()).then_some(symbol);
    }

    /// Position of `parent` in this node's parent list, i.e. its digit in the CPF rows.
    pub fn parent_position(&self, parent: usize) -> Option<usize> {
        self.parents.iter().position(|&p| p == parent)
    }
}
