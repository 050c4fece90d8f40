//! Cell payload sources

use crate::skeleton::Uid;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Default payload length in characters
pub const DEFAULT_PAYLOAD_LEN: usize = 20;

/// Produces the text stored in the cell at `(row, column)`.
pub trait PayloadSource: Send + Sync {
    fn payload(&self, row: &Uid, column: &Uid) -> String;
}

impl<F> PayloadSource for F
where
    F: Fn(&Uid, &Uid) -> String + Send + Sync,
{
    fn payload(&self, row: &Uid, column: &Uid) -> String {
        self(row, column)
    }
}

fn alphanumeric<R: Rng>(rng: &mut R, len: usize) -> String {
    rng.sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

/// Fresh random alphanumeric text for every cell
#[derive(Debug, Clone, Copy)]
pub struct RandomText {
    pub len: usize,
}

impl Default for RandomText {
    fn default() -> Self {
        Self {
            len: DEFAULT_PAYLOAD_LEN,
        }
    }
}

impl PayloadSource for RandomText {
    fn payload(&self, _row: &Uid, _column: &Uid) -> String {
        alphanumeric(&mut rand::thread_rng(), self.len)
    }
}

/// The same text in every cell
#[derive(Debug, Clone)]
pub struct FixedText(pub String);

impl PayloadSource for FixedText {
    fn payload(&self, _row: &Uid, _column: &Uid) -> String {
        self.0.clone()
    }
}

/// Random-looking text that is a pure function of `(seed, row, column)`,
/// so a filled table can be verified cell by cell after reconstruction.
#[derive(Debug, Clone, Copy)]
pub struct SeededText {
    pub len: usize,
    pub seed: u64,
}

impl PayloadSource for SeededText {
    fn payload(&self, row: &Uid, column: &Uid) -> String {
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        row.hash(&mut hasher);
        column.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());
        alphanumeric(&mut rng, self.len)
    }
}
