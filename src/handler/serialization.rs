use anyhow::bail;
use log::{debug, info};

use crate::alphabets::ALPHABET_SIZE;
use crate::evolutionary_models::{EvolModel, EvolModelType, StatDistr};
use crate::handler::BayesNetHandler;
use crate::io::{
    add_tags, append_with_tags, extract_for_tag, extract_value, format_connection_table,
    format_matrix, has_tag, parse_connection_table, parse_matrix, DataError,
};
use crate::Result;

const N_TREES: &str = "numberOfTrees";
const CONNECTIONS: &str = "connectionTable";
const INDEPENDENT: &str = "independentTransitions";
const EVOL_MODEL: &str = "evolModel";
const MODEL_TYPE: &str = "modelType";
const DIMENSION: &str = "dimension";
const STAT_DISTR: &str = "statDistr";
const TEMPERATURE: &str = "temperature";
const NEWICK: &str = "newickString";

fn column_tag(column: usize) -> String {
    format!("VirtualTree{}", column)
}

struct ColumnState {
    model_type: EvolModelType,
    stat_distr: StatDistr,
    temperature: f64,
    newick: String,
}

fn parse_column(text: &str, column: usize) -> Result<ColumnState> {
    let block = extract_for_tag(text, &column_tag(column))?;
    let model = extract_for_tag(block, EVOL_MODEL)?;
    let model_type = extract_for_tag(model, MODEL_TYPE)?.parse::<EvolModelType>()?;
    let dimension: usize = extract_value(model, DIMENSION)?;
    let stat_distr = parse_matrix(extract_for_tag(model, STAT_DISTR)?)?;
    if stat_distr.nrows() != dimension {
        bail!(DataError {
            message: format!(
                "Column {} declares {} site classes but stores {}",
                column,
                dimension,
                stat_distr.nrows()
            )
        });
    }
    let temperature = if has_tag(block, TEMPERATURE) {
        extract_value(block, TEMPERATURE)?
    } else {
        1.0
    };
    Ok(ColumnState {
        model_type,
        stat_distr,
        temperature,
        newick: extract_for_tag(block, NEWICK)?.trim().to_string(),
    })
}

impl BayesNetHandler {
    /// Tagged text blocks holding everything needed to rebuild the handler: the number of
    /// columns, the connection table and per column the model, temperature and tree.
    pub fn to_tagged_string(&self) -> String {
        let mut text = String::new();
        append_with_tags(&mut text, &self.len(), N_TREES);
        append_with_tags(
            &mut text,
            &format_connection_table(self.connection_table()),
            CONNECTIONS,
        );
        append_with_tags(
            &mut text,
            &self.net().uses_independent_transitions(),
            INDEPENDENT,
        );
        for (column, tree) in self.trees().iter().enumerate() {
            let model = tree.evol_model();
            let mut model_text = String::from("\n");
            append_with_tags(&mut model_text, &model.model_type(), MODEL_TYPE);
            append_with_tags(&mut model_text, &model.dimension(), DIMENSION);
            append_with_tags(
                &mut model_text,
                &format_matrix(model.stat_distr()),
                STAT_DISTR,
            );
            let mut column_text = String::from("\n");
            column_text.push_str(&add_tags(&model_text, EVOL_MODEL));
            append_with_tags(&mut column_text, &tree.temperature(), TEMPERATURE);
            append_with_tags(&mut column_text, &tree.newick(self.net()), NEWICK);
            text.push_str(&add_tags(&column_text, &column_tag(column)));
        }
        text
    }

    /// Rebuilds a handler written by [`Self::to_tagged_string`]. The union net is built
    /// from the trees, columns are reconnected from the table, then the models and
    /// temperatures are installed and all CPFs reinitialised.
    pub fn from_tagged_string(text: &str) -> Result<Self> {
        let n_trees: usize = extract_value(text, N_TREES)?;
        let table = parse_connection_table(extract_for_tag(text, CONNECTIONS)?)?;
        if table.len() != n_trees {
            bail!(DataError {
                message: format!(
                    "Connection table has {} rows for {} columns",
                    table.len(),
                    n_trees
                )
            });
        }
        let use_independent = if has_tag(text, INDEPENDENT) {
            extract_value::<bool>(text, INDEPENDENT)?
        } else {
            false
        };
        let columns = (0..n_trees)
            .map(|c| parse_column(text, c))
            .collect::<Result<Vec<_>>>()?;
        let alphabet_size = columns
            .first()
            .map_or(ALPHABET_SIZE, |c| c.stat_distr.ncols());

        let mut handler = BayesNetHandler::new(alphabet_size);
        handler.set_independent_transitions(use_independent);
        for column in &columns {
            let model = EvolModel::new(column.model_type, 1, alphabet_size)?;
            handler.add_bayes_net(&column.newick, model)?;
        }
        for i in (0..n_trees).rev() {
            for j in 0..n_trees {
                if table[i][j] == 1 {
                    handler.connect_virtual_trees(i, j)?;
                }
            }
        }
        for (c, column) in columns.into_iter().enumerate() {
            debug!(
                "Restoring column {} with {} at temperature {}.",
                c, column.model_type, column.temperature
            );
            *handler.trees[c].evol_model_mut() =
                EvolModel::with_stat_distr(column.model_type, column.stat_distr)?;
            handler.trees[c].set_temperature(column.temperature);
        }
        handler.init_parameters()?;
        info!("Restored model with {} column(s).", handler.len());
        Ok(handler)
    }
}
