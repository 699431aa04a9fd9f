use std::collections::VecDeque;

use hashbrown::HashMap;
use log::debug;

use crate::config::CacheConfig;

#[derive(Clone, Debug, PartialEq)]
pub struct CachedScore {
    /// Parameter version of the handler the score was computed with.
    pub version: u64,
    pub score: f64,
    pub q: Option<Vec<f64>>,
}

/// Scores keyed by the fingerprint of a sample. Entries computed with another parameter
/// version are not returned as scores, but their `q` can still seed a new iteration. The
/// oldest entry is evicted once the capacity is reached.
#[derive(Clone, Debug)]
pub struct ScoreCache {
    capacity: usize,
    entries: HashMap<u64, CachedScore>,
    insertion_order: VecDeque<u64>,
    hits: usize,
    misses: usize,
}

impl Default for ScoreCache {
    fn default() -> Self {
        ScoreCache::new(&CacheConfig::default())
    }
}

impl ScoreCache {
    pub fn new(config: &CacheConfig) -> Self {
        ScoreCache {
            capacity: config.capacity,
            entries: HashMap::with_capacity(config.capacity),
            insertion_order: VecDeque::with_capacity(config.capacity),
            hits: 0,
            misses: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    /// Score of the sample if it was computed with the given parameter version.
    pub fn get(&mut self, fingerprint: u64, version: u64) -> Option<f64> {
        match self.entries.get(&fingerprint) {
            Some(entry) if entry.version == version => {
                self.hits += 1;
                Some(entry.score)
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    /// Stored mean-field state of the sample, whatever version it was computed with.
    pub fn warm_start(&self, fingerprint: u64) -> Option<&[f64]> {
        self.entries
            .get(&fingerprint)
            .and_then(|entry| entry.q.as_deref())
    }

    pub fn insert(&mut self, fingerprint: u64, entry: CachedScore) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(fingerprint, entry).is_some() {
            return;
        }
        self.insertion_order.push_back(fingerprint);
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.insertion_order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            debug!("Evicted cached score {:x}.", oldest);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
    }
}
