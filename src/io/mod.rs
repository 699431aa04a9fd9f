use std::error::Error;
use std::fmt::{self, Display};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use anyhow::bail;
use itertools::Itertools;
use log::info;
use nalgebra::DMatrix;

use crate::alphabets::Alphabet;
use crate::handler::BayesNetHandler;
use crate::sequences::{PhyloSequence, WeightedSample};
use crate::tree::{tree_parser, Tree};
use crate::Result;

pub(crate) struct DataError {
    pub(crate) message: String,
}
impl fmt::Debug for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl Error for DataError {}

/// Wraps `content` into `<tag>...</tag>`.
pub fn add_tags(content: &str, tag: &str) -> String {
    format!("<{tag}>{content}</{tag}>\n")
}

pub fn append_with_tags(buffer: &mut String, value: &impl Display, tag: &str) {
    buffer.push_str(&add_tags(&value.to_string(), tag));
}

pub fn has_tag(text: &str, tag: &str) -> bool {
    text.contains(&format!("<{tag}>"))
}

/// Content of the first `<tag>` block in `text`.
pub fn extract_for_tag<'a>(text: &'a str, tag: &str) -> Result<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let Some(start) = text.find(&open).map(|pos| pos + open.len()) else {
        bail!(DataError {
            message: format!("Missing tag {}", tag)
        });
    };
    let Some(len) = text[start..].find(&close) else {
        bail!(DataError {
            message: format!("Unterminated tag {}", tag)
        });
    };
    Ok(&text[start..start + len])
}

pub fn extract_value<T>(text: &str, tag: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
{
    Ok(extract_for_tag(text, tag)?.trim().parse::<T>()?)
}

/// Rows separated by `;`, entries by spaces. Entries are written with full precision.
pub fn format_matrix(matrix: &DMatrix<f64>) -> String {
    matrix
        .row_iter()
        .map(|row| row.iter().join(" "))
        .join(";")
}

pub fn parse_matrix(text: &str) -> Result<DMatrix<f64>> {
    let rows = parse_rows::<f64>(text)?;
    let ncols = rows.first().map_or(0, |r| r.len());
    Ok(DMatrix::from_row_iterator(
        rows.len(),
        ncols,
        rows.into_iter().flatten(),
    ))
}

pub fn format_connection_table(table: &[Vec<u8>]) -> String {
    table.iter().map(|row| row.iter().join(" ")).join(";")
}

pub fn parse_connection_table(text: &str) -> Result<Vec<Vec<u8>>> {
    let rows = parse_rows::<u8>(text)?;
    if rows.iter().any(|r| r.len() != rows.len()) {
        bail!(DataError {
            message: String::from("Connection table is not square")
        });
    }
    Ok(rows)
}

fn parse_rows<T>(text: &str) -> Result<Vec<Vec<T>>>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
{
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let mut rows = Vec::new();
    for row in text.split(';') {
        let values = row
            .split_whitespace()
            .map(|v| v.parse::<T>())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.push(values);
    }
    if rows.iter().any(|r| r.len() != rows[0].len()) {
        bail!(DataError {
            message: format!("Ragged table: {}", text)
        });
    }
    Ok(rows)
}

/// Reads a single newick tree from a file.
pub fn read_newick_from_file(path: &Path) -> Result<Tree> {
    info!("Reading newick tree from file {}", path.display());
    let newick = fs::read_to_string(path)?;
    info!("Read file successfully");
    tree_parser::from_newick(&newick)
}

/// Restores a handler from its tagged text representation.
pub fn read_handler_from_file(path: &Path) -> Result<BayesNetHandler> {
    info!("Reading model from file {}", path.display());
    let text = fs::read_to_string(path)?;
    let handler = BayesNetHandler::from_tagged_string(&text)?;
    info!("Read model with {} column(s) successfully", handler.len());
    Ok(handler)
}

/// Writes the handler's tagged text representation. Will return an error if the file
/// already exists.
pub fn write_handler_to_file(handler: &BayesNetHandler, path: &Path) -> Result<()> {
    info!("Writing model to file {}", path.display());
    if path.exists() {
        bail!(DataError {
            message: String::from("File already exists")
        });
    }
    let mut writer = File::create(path)?;
    writer.write_all(handler.to_tagged_string().as_bytes())?;
    info!("Finished writing successfully");
    Ok(())
}

/// Parses a weighted sample written as `id:weight:row,row,...` with one aligned row per
/// species, e.g. `site1:2.0:ACG,ACG,ATG`.
pub fn parse_sample(text: &str, alphabet: &Alphabet) -> Result<WeightedSample> {
    let fields = text.trim().splitn(3, ':').collect::<Vec<_>>();
    let &[id, weight, rows] = fields.as_slice() else {
        bail!(DataError {
            message: format!("Expected id:weight:rows, got {}", text)
        });
    };
    let Ok(weight) = weight.parse::<f64>() else {
        bail!(DataError {
            message: format!("Invalid sample weight: {}", weight)
        });
    };
    let rows = rows.split(',').map(str::trim).collect::<Vec<_>>();
    let sequence = PhyloSequence::from_species_rows(id, &rows, alphabet)?;
    Ok(WeightedSample::new(sequence, weight))
}
