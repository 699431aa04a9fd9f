use std::fmt::{self, Display};

use log::{debug, info};

use crate::config::ModelConfig;
use crate::elimination::{ExactLikelihood, SimpleNodeElimination};
use crate::handler::BayesNetHandler;
use crate::mean_field::{CachedScore, MeanField, ScoreCache};
use crate::sequences::{PhyloSequence, WeightedSample};
use crate::Result;

pub trait SampleCostFunction {
    fn score(&mut self, handler: &mut BayesNetHandler, sequence: &PhyloSequence) -> Result<f64>;
    fn reset(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ScoringMode {
    /// Negative free energy of the converged mean-field approximation.
    #[default]
    MeanField,
    /// Log-likelihood by variable elimination.
    Exact,
}

impl Display for ScoringMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringMode::MeanField => write!(f, "mean field"),
            ScoringMode::Exact => write!(f, "exact"),
        }
    }
}

/// Scores samples under a handler and remembers the results per parameter version.
#[derive(Clone, Debug)]
pub struct Scorer {
    mode: ScoringMode,
    config: ModelConfig,
    cache: ScoreCache,
}

impl Scorer {
    pub fn new(mode: ScoringMode, config: ModelConfig) -> Self {
        Scorer {
            mode,
            config,
            cache: ScoreCache::new(&config.cache),
        }
    }

    pub fn mode(&self) -> ScoringMode {
        self.mode
    }

    pub fn cache(&self) -> &ScoreCache {
        &self.cache
    }

    fn mean_field_score(
        &mut self,
        handler: &mut BayesNetHandler,
        sequence: &PhyloSequence,
        fingerprint: u64,
    ) -> Result<(f64, Option<Vec<f64>>)> {
        let mut mean_field = MeanField::new(self.config.mean_field);
        mean_field.init_observation(handler, sequence)?;
        if self.config.cache.warm_start {
            if let Some(q) = self.cache.warm_start(fingerprint) {
                if q.len() == mean_field.state().len() {
                    mean_field.set_state(q)?;
                }
            }
        }
        let outcome = mean_field.optimise_by_normalisation(handler)?;
        let q = self
            .config
            .cache
            .warm_start
            .then(|| mean_field.state().to_vec());
        Ok((-outcome.free_energy, q))
    }

    /// Weighted sum of the scores of all samples.
    pub fn score_all(
        &mut self,
        handler: &mut BayesNetHandler,
        samples: &[WeightedSample],
    ) -> Result<f64> {
        let mut total = 0.0;
        for sample in samples {
            total += sample.weight * self.score(handler, &sample.sequence)?;
        }
        info!(
            "Scored {} samples in {} mode, total {}.",
            samples.len(),
            self.mode,
            total
        );
        Ok(total)
    }
}

impl SampleCostFunction for Scorer {
    fn score(&mut self, handler: &mut BayesNetHandler, sequence: &PhyloSequence) -> Result<f64> {
        let fingerprint = sequence.fingerprint();
        let version = handler.version();
        if let Some(score) = self.cache.get(fingerprint, version) {
            return Ok(score);
        }
        let (score, q) = match self.mode {
            ScoringMode::MeanField => self.mean_field_score(handler, sequence, fingerprint)?,
            ScoringMode::Exact => {
                handler.observe(sequence)?;
                let elimination = SimpleNodeElimination::new(self.config.exact);
                (elimination.log_likelihood(handler.net())?, None)
            }
        };
        debug!("Sample {} scored {}.", sequence.id(), score);
        self.cache.insert(
            fingerprint,
            CachedScore {
                version,
                score,
                q,
            },
        );
        Ok(score)
    }

    fn reset(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests;
