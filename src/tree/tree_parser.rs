use std::fmt;

use anyhow::bail;
use log::{debug, info};
use pest::{error::Error as PestError, iterators::Pair, Parser};
use pest_derive::Parser;

use crate::tree::{Tree, TreeNode};
use crate::Result;

#[derive(Parser)]
#[grammar = "./tree/newick.pest"]
pub struct NewickParser;

#[derive(Debug)]
pub(crate) struct ParsingError(pub(crate) Box<PestError<Rule>>);

impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Malformed newick string")?;
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParsingError {}

/// Parses a single rooted newick tree. A missing trailing semicolon is tolerated.
pub fn from_newick(newick: &str) -> Result<Tree> {
    let newick = newick.trim();
    let terminated;
    let newick = if newick.ends_with(';') {
        newick
    } else {
        terminated = format!("{};", newick);
        terminated.as_str()
    };
    let mut pairs = match NewickParser::parse(Rule::newick, newick) {
        Ok(pairs) => pairs,
        Err(err) => bail!(ParsingError(Box::new(err))),
    };
    let Some(tree_rule) = pairs.next().and_then(|newick| newick.into_inner().next()) else {
        bail!("Empty newick string");
    };
    let Some(root_rule) = tree_rule.into_inner().next() else {
        bail!("Newick string without a tree");
    };
    let tree = parse_nodes(root_rule)?;
    debug!(
        "Parsed newick tree with {} nodes and {} leaves.",
        tree.len(),
        tree.leaves().len()
    );
    Ok(tree)
}

/// Reads branch lengths from `newick` into a tree that must have the same topology.
pub fn blens_from_newick(tree: &Tree, newick: &str) -> Result<Vec<f64>> {
    info!("Reading branch lengths from newick string.");
    let other = from_newick(newick)?;
    if !tree.same_topology(&other) {
        bail!("Newick string {} does not match the tree topology", newick);
    }
    Ok(other.blens())
}

fn parse_nodes(root_rule: Pair<Rule>) -> Result<Tree> {
    let mut nodes: Vec<TreeNode> = Vec::new();
    let mut stack: Vec<(Pair<Rule>, Option<usize>)> = vec![(root_rule, None)];
    while let Some((rule, parent)) = stack.pop() {
        let idx = nodes.len();
        let mut node = TreeNode::new(idx, parent);
        let mut children = Vec::new();
        for inner in rule.into_inner() {
            match inner.as_rule() {
                Rule::label => node.id = parse_label(inner.as_str()),
                Rule::branch_length => node.blen = inner.as_str().parse::<f64>()?,
                Rule::internal | Rule::leaf => children.push(inner),
                _ => unreachable!(),
            }
        }
        if let Some(parent) = parent {
            nodes[parent].children.push(idx);
        }
        nodes.push(node);
        stack.extend(children.into_iter().rev().map(|child| (child, Some(idx))));
    }
    Ok(Tree::new(nodes))
}

fn parse_label(label: &str) -> String {
    label
        .strip_prefix('\'')
        .and_then(|l| l.strip_suffix('\''))
        .unwrap_or(label)
        .to_string()
}
