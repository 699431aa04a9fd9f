use anyhow::bail;
use nalgebra::DMatrix;

use crate::bayes_net::StructuralError;
use crate::Result;

/// Conditional probability table of one node.
///
/// Rows are addressed by a parent configuration in mixed radix with parent 0 as the
/// least significant digit: `row = sum_p K^p * query[p]`. Each row is a distribution over
/// the `K` symbols of the node.
#[derive(Clone, Debug, PartialEq)]
pub struct Cpf {
    alphabet_size: usize,
    n_parents: usize,
    cond_prob: DMatrix<f64>,
    independent: Option<DMatrix<f64>>,
    combined: DMatrix<f64>,
    lookup: Vec<Vec<usize>>,
}

impl Cpf {
    /// Uniform table for a node with `n_parents` parents.
    pub fn new(alphabet_size: usize, n_parents: usize) -> Self {
        let rows = alphabet_size.pow(n_parents as u32);
        let cond_prob = DMatrix::from_element(rows, alphabet_size, 1.0 / alphabet_size as f64);
        let lookup = (0..rows)
            .map(|row| {
                (0..n_parents)
                    .map(|p| (row / alphabet_size.pow(p as u32)) % alphabet_size)
                    .collect()
            })
            .collect();
        Cpf {
            alphabet_size,
            n_parents,
            combined: cond_prob.clone(),
            cond_prob,
            independent: None,
            lookup,
        }
    }

    pub fn alphabet_size(&self) -> usize {
        self.alphabet_size
    }

    pub fn n_parents(&self) -> usize {
        self.n_parents
    }

    pub fn rows(&self) -> usize {
        self.cond_prob.nrows()
    }

    /// Row index of a parent configuration.
    pub fn row_index(&self, query: &[usize]) -> Result<usize> {
        if query.len() != self.n_parents {
            bail!(StructuralError::Dimension {
                expected: self.n_parents,
                found: query.len(),
            });
        }
        let mut row = 0;
        let mut weight = 1;
        for &symbol in query {
            if symbol >= self.alphabet_size {
                bail!(StructuralError::SymbolOutOfRange {
                    symbol,
                    alphabet_size: self.alphabet_size,
                });
            }
            row += symbol * weight;
            weight *= self.alphabet_size;
        }
        Ok(row)
    }

    /// Parent configuration encoded by the given row.
    pub fn configuration(&self, row: usize) -> &[usize] {
        &self.lookup[row]
    }

    pub fn lookup(&self) -> &[Vec<usize>] {
        &self.lookup
    }

    /// Conditional probability of `symbol` given the parent configuration `query`.
    pub fn get(&self, query: &[usize], symbol: usize) -> Result<f64> {
        if symbol >= self.alphabet_size {
            bail!(StructuralError::SymbolOutOfRange {
                symbol,
                alphabet_size: self.alphabet_size,
            });
        }
        let row = self.row_index(query)?;
        Ok(self.cond_prob[(row, symbol)])
    }

    pub fn cond_prob(&self) -> &DMatrix<f64> {
        &self.cond_prob
    }

    pub fn set_cond_prob(&mut self, cond_prob: DMatrix<f64>) -> Result<()> {
        self.check_shape(&cond_prob)?;
        self.cond_prob = cond_prob;
        Ok(())
    }

    pub fn independent(&self) -> Option<&DMatrix<f64>> {
        self.independent.as_ref()
    }

    pub fn set_independent(&mut self, independent: DMatrix<f64>) -> Result<()> {
        self.check_shape(&independent)?;
        self.independent = Some(independent);
        Ok(())
    }

    /// Joint table of this node and its parents, see [`BayesNet::calculate_combined_probs`].
    ///
    /// [`BayesNet::calculate_combined_probs`]: crate::bayes_net::BayesNet::calculate_combined_probs
    pub fn combined(&self) -> &DMatrix<f64> {
        &self.combined
    }

    pub(crate) fn set_combined(&mut self, combined: DMatrix<f64>) {
        debug_assert_eq!(combined.shape(), self.cond_prob.shape());
        self.combined = combined;
    }

    /// Unconditional distribution of the node: column sums of the combined table.
    pub fn marginal(&self) -> Vec<f64> {
        self.combined.row_sum().iter().copied().collect()
    }

    fn check_shape(&self, table: &DMatrix<f64>) -> Result<()> {
        let expected = self.cond_prob.shape();
        if table.shape() != expected {
            bail!(StructuralError::TableShape {
                expected,
                found: table.shape(),
            });
        }
        Ok(())
    }
}
