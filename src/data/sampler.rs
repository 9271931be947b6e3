//! Mini-batch index sampling.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Yields mini-batches of example indices, optionally reshuffled on every
/// pass. The final batch of a pass may be short.
#[derive(Debug, Clone)]
pub struct BatchSampler {
    indices: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl BatchSampler {
    pub fn new(indices: Vec<usize>, batch_size: usize, shuffle: bool, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut sampler = Self {
            indices,
            cursor: 0,
            batch_size: batch_size.max(1),
            shuffle,
            rng,
        };
        sampler.reset();
        sampler
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Batches in one full pass.
    pub fn num_batches(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }

    /// Start a new pass, reshuffling if enabled.
    pub fn reset(&mut self) {
        if self.shuffle {
            self.indices.shuffle(&mut self.rng);
        }
        self.cursor = 0;
    }

    /// Next batch of the current pass, `None` once the pass is exhausted.
    pub fn next_batch(&mut self) -> Option<Vec<usize>> {
        if self.cursor >= self.indices.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.indices.len());
        let batch = self.indices[self.cursor..end].to_vec();
        self.cursor = end;
        Some(batch)
    }

    /// Next batch, starting a new pass when the current one runs out.
    pub fn next_cycling(&mut self) -> Vec<usize> {
        match self.next_batch() {
            Some(batch) => batch,
            None => {
                self.reset();
                self.next_batch().unwrap_or_default()
            }
        }
    }
}
