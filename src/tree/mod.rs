use std::fmt::{Debug, Display};

pub mod tree_parser;

/// Node of a parsed tree. Nodes are stored in preorder, so a parent always has a smaller
/// index than its children and the root is node 0.
#[derive(Clone, PartialEq)]
pub struct TreeNode {
    pub idx: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub blen: f64,
    pub id: String,
}

impl Display for TreeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.id.is_empty() {
            write!(f, "{}", self.idx)
        } else {
            write!(f, "{} with id {}", self.idx, self.id)
        }
    }
}

impl Debug for TreeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "({}) {}:{}, parent: {:?}, children: {:?}",
            self.id, self.idx, self.blen, self.parent, self.children,
        )
    }
}

impl TreeNode {
    pub(crate) fn new(idx: usize, parent: Option<usize>) -> Self {
        TreeNode {
            idx,
            parent,
            children: Vec::new(),
            blen: 0.0,
            id: String::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    pub fn new(nodes: Vec<TreeNode>) -> Self {
        Tree { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> usize {
        0
    }

    pub fn node(&self, idx: usize) -> &TreeNode {
        &self.nodes[idx]
    }

    /// Leaves in preorder.
    pub fn leaves(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.idx)
            .collect()
    }

    /// Branch lengths of all non-root nodes, in preorder.
    pub fn blens(&self) -> Vec<f64> {
        self.nodes.iter().skip(1).map(|n| n.blen).collect()
    }

    /// Root plus leaves only.
    pub fn is_star(&self) -> bool {
        !self.is_empty()
            && !self.nodes[0].is_leaf()
            && self.leaves().len() + 1 == self.len()
    }

    /// Same wiring and labels, branch lengths ignored.
    pub fn same_topology(&self, other: &Tree) -> bool {
        self.len() == other.len()
            && self
                .nodes
                .iter()
                .zip(other.nodes.iter())
                .all(|(a, b)| a.parent == b.parent && a.children == b.children && a.id == b.id)
    }

    /// Newick representation with full precision branch lengths. The root gets no branch
    /// length.
    pub fn to_newick(&self) -> String {
        enum Token {
            Open(usize),
            Close(usize),
            Comma,
        }
        let mut newick = String::new();
        if self.is_empty() {
            newick.push(';');
            return newick;
        }
        let mut stack = vec![Token::Open(self.root())];
        while let Some(token) = stack.pop() {
            match token {
                Token::Open(idx) => {
                    let node = &self.nodes[idx];
                    if node.is_leaf() {
                        self.push_label(&mut newick, idx);
                        continue;
                    }
                    newick.push('(');
                    stack.push(Token::Close(idx));
                    for (i, &child) in node.children.iter().enumerate().rev() {
                        stack.push(Token::Open(child));
                        if i > 0 {
                            stack.push(Token::Comma);
                        }
                    }
                }
                Token::Close(idx) => {
                    newick.push(')');
                    self.push_label(&mut newick, idx);
                }
                Token::Comma => newick.push(','),
            }
        }
        newick.push(';');
        newick
    }

    fn push_label(&self, newick: &mut String, idx: usize) {
        let node = &self.nodes[idx];
        if needs_quotes(&node.id) {
            newick.push_str(&format!("'{}'", node.id));
        } else {
            newick.push_str(&node.id);
        }
        if node.parent.is_some() {
            newick.push_str(&format!(":{}", node.blen));
        }
    }
}

fn needs_quotes(label: &str) -> bool {
    label
        .chars()
        .any(|c| c.is_whitespace() || "()[]':;,".contains(c))
}
