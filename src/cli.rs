use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use phylo_bayes::config::{CacheConfig, MeanFieldConfig, ModelConfig};
use phylo_bayes::likelihood::ScoringMode;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub(super) enum Mode {
    /// Negative mean-field free energy
    MeanField,
    /// Exact log-likelihood by variable elimination
    Exact,
}

impl From<Mode> for ScoringMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::MeanField => ScoringMode::MeanField,
            Mode::Exact => ScoringMode::Exact,
        }
    }
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub(super) struct Cli {
    /// Persisted Bayes net model
    #[arg(short, long, value_name = "MODEL_FILE")]
    pub(super) model_file: PathBuf,

    /// Weighted sample as id:weight:rows, one aligned row per species separated by commas,
    /// e.g. site1:1.0:AC,AC,GC
    #[arg(short, long = "sample", value_name = "SAMPLE", required = true)]
    pub(super) samples: Vec<String>,

    /// How samples are scored
    #[arg(long, value_enum, default_value_t = Mode::MeanField)]
    pub(super) mode: Mode,

    /// Maximum number of mean-field sweeps
    #[arg(long, default_value_t = 100)]
    pub(super) max_sweeps: usize,

    /// Mean-field stops once the free energy changes by less than this between sweeps
    #[arg(long, default_value_t = 1e-5)]
    pub(super) tolerance: f64,

    /// Start mean-field iterations from cached distributions
    #[arg(long)]
    pub(super) warm_start: bool,

    /// Optimise the branch lengths of all columns before scoring and write the model here
    #[arg(short, long, value_name = "OUTPUT_MODEL_FILE")]
    pub(super) output_model_file: Option<PathBuf>,

    /// Maximum number of optimiser iterations
    #[arg(long, default_value_t = 100)]
    pub(super) max_iters: u64,
}

impl Cli {
    pub(super) fn model_config(&self) -> ModelConfig {
        ModelConfig::default()
            .with_mean_field(
                MeanFieldConfig::default()
                    .with_max_sweeps(self.max_sweeps)
                    .with_tolerance(self.tolerance),
            )
            .with_cache(CacheConfig {
                warm_start: self.warm_start,
                ..CacheConfig::default()
            })
    }
}
