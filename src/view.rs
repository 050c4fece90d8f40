//! View ordering
//!
//! A view is a persisted permutation of a table's columns and rows. The
//! permutation itself is a pure function of `n` and a random source, kept
//! injectable so tests can pin the shuffle with a seed.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Produce a uniformly random permutation of `[0, n)`.
///
/// `ranks[i]` is the display rank assigned to the `i`-th identifier.
pub fn permutation<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<usize> {
    let mut ranks: Vec<usize> = (0..n).collect();
    ranks.shuffle(rng);
    ranks
}

/// Check that `ranks` uses every value in `[0, n)` exactly once.
pub fn ranks_are_permutation(ranks: &[usize], n: usize) -> bool {
    if ranks.len() != n {
        return false;
    }
    let mut seen = vec![false; n];
    for &rank in ranks {
        if rank >= n || seen[rank] {
            return false;
        }
        seen[rank] = true;
    }
    true
}

/// Seedable source of view permutations.
#[derive(Debug, Clone)]
pub struct ViewOrderer {
    rng: StdRng,
}

impl ViewOrderer {
    /// Deterministic orderer for reproducible runs and tests
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Seeded when `seed` is set, entropy-backed otherwise
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::from_entropy(),
        }
    }

    /// Next permutation of `[0, n)`; successive calls are independent.
    pub fn ranks(&mut self, n: usize) -> Vec<usize> {
        permutation(n, &mut self.rng)
    }
}

impl Default for ViewOrderer {
    fn default() -> Self {
        Self::from_entropy()
    }
}
