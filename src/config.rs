use std::fmt::{self, Display};

use crate::alphabets::ALPHABET_SIZE;

/// Settings of the mean-field fixed-point iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeanFieldConfig {
    pub max_sweeps: usize,
    pub min_sweeps: usize,
    /// Convergence threshold on the change of the free energy between sweeps.
    pub tolerance: f64,
}

impl Default for MeanFieldConfig {
    fn default() -> Self {
        MeanFieldConfig {
            max_sweeps: 100,
            min_sweeps: 2,
            tolerance: 1e-5,
        }
    }
}

impl MeanFieldConfig {
    pub fn with_max_sweeps(mut self, max_sweeps: usize) -> Self {
        self.max_sweeps = max_sweeps;
        self
    }

    pub fn with_min_sweeps(mut self, min_sweeps: usize) -> Self {
        self.min_sweeps = min_sweeps;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

/// Limits of exact inference, both bound the size of the tables allocated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExactConfig {
    /// Largest number of nodes in the elimination frontier.
    pub max_frontier: usize,
    /// Largest number of hidden nodes the brute-force summation enumerates.
    pub max_hidden: usize,
}

impl Default for ExactConfig {
    fn default() -> Self {
        ExactConfig {
            max_frontier: 10,
            max_hidden: 10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CacheConfig {
    pub capacity: usize,
    /// Start the mean-field iteration from the cached state of an earlier score.
    pub warm_start: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: 1024,
            warm_start: false,
        }
    }
}

/// Everything a scoring run needs besides the model itself.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelConfig {
    pub alphabet_size: usize,
    pub use_independent_transitions: bool,
    pub mean_field: MeanFieldConfig,
    pub exact: ExactConfig,
    pub cache: CacheConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            alphabet_size: ALPHABET_SIZE,
            use_independent_transitions: false,
            mean_field: MeanFieldConfig::default(),
            exact: ExactConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ModelConfig {
    pub fn with_independent_transitions(mut self, use_independent: bool) -> Self {
        self.use_independent_transitions = use_independent;
        self
    }

    pub fn with_mean_field(mut self, mean_field: MeanFieldConfig) -> Self {
        self.mean_field = mean_field;
        self
    }

    pub fn with_exact(mut self, exact: ExactConfig) -> Self {
        self.exact = exact;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

impl Display for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "alphabet size {}, independent transitions {}, mean field sweeps {}..{} with \
             tolerance {}, frontier limit {}, hidden limit {}, cache capacity {}{}",
            self.alphabet_size,
            self.use_independent_transitions,
            self.mean_field.min_sweeps,
            self.mean_field.max_sweeps,
            self.mean_field.tolerance,
            self.exact.max_frontier,
            self.exact.max_hidden,
            self.cache.capacity,
            if self.cache.warm_start {
                " (warm start)"
            } else {
                ""
            }
        )
    }
}
