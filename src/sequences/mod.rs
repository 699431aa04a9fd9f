use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use anyhow::bail;
use log::debug;

use crate::alphabets::Alphabet;
use crate::io::DataError;
use crate::Result;

/// Observations of one sample over consecutive alignment columns. Every column holds one
/// symbol index per species (or per node of the column's tree); indices outside the
/// alphabet mark missing data.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PhyloSequence {
    id: String,
    columns: Vec<Vec<usize>>,
}

impl PhyloSequence {
    pub fn new(id: &str, columns: Vec<Vec<usize>>) -> Self {
        PhyloSequence {
            id: id.to_string(),
            columns,
        }
    }

    /// Builds the columns from aligned per-species rows, e.g. `["ACGT", "AC-T"]`.
    pub fn from_species_rows<S: AsRef<[u8]>>(
        id: &str,
        rows: &[S],
        alphabet: &Alphabet,
    ) -> Result<Self> {
        let rows = rows.iter().map(|r| r.as_ref()).collect::<Vec<_>>();
        let Some(first) = rows.first() else {
            bail!(DataError {
                message: String::from("No species rows given")
            });
        };
        if let Some(row) = rows.iter().find(|r| r.len() != first.len()) {
            bail!(DataError {
                message: format!(
                    "Species rows differ in length: {} and {}",
                    first.len(),
                    row.len()
                )
            });
        }
        if let Some(row) = rows.iter().find(|r| !alphabet.is_word(r)) {
            bail!(DataError {
                message: format!(
                    "Invalid genetic sequence encountered: {}",
                    String::from_utf8_lossy(row)
                )
            });
        }
        let columns = (0..first.len())
            .map(|m| rows.iter().map(|r| alphabet.symbol_index(r[m])).collect())
            .collect::<Vec<_>>();
        debug!(
            "Built sample {} with {} columns over {} species.",
            id,
            columns.len(),
            rows.len()
        );
        Ok(PhyloSequence::new(id, columns))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, m: usize) -> &[usize] {
        &self.columns[m]
    }

    pub fn columns(&self) -> &[Vec<usize>] {
        &self.columns
    }

    /// Columns `start..start + len`, clipped at the end of the sample.
    pub fn window(&self, start: usize, len: usize) -> PhyloSequence {
        let start = start.min(self.columns.len());
        let end = (start + len).min(self.columns.len());
        PhyloSequence::new(
            &format!("{}[{}..{}]", self.id, start, end),
            self.columns[start..end].to_vec(),
        )
    }

    /// Hash of the observation content only, the id does not contribute.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.columns.hash(&mut hasher);
        hasher.finish()
    }
}

/// A sample together with its weight in a training objective.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightedSample {
    pub sequence: PhyloSequence,
    pub weight: f64,
}

impl WeightedSample {
    pub fn new(sequence: PhyloSequence, weight: f64) -> Self {
        WeightedSample { sequence, weight }
    }
}
