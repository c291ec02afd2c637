//! Reproducible resampling of sample weights.
//!
//! Classic bootstrap draws `n` rows with replacement from an `n`-row input.
//! That requires the whole input up front, which a streaming aggregation
//! doesn't have.  Instead we count every row `Poisson(w)` times, where `w`
//! is the row's original sample weight.  Per-row Poisson draws are
//! independent, so each page can be resampled on its own as it arrives.
//!
//! All randomness flows from a single 64-bit seed per replica set:
//!
//! * A [`ResamplingStream`] turns the seed into a sequence of sub-seeds, one
//!   per (replica, input page) pair.
//! * A [`PoissonizedBlock`] turns a sub-seed and a row position into the
//!   resampled weight of that row.

use std::{fmt::Debug, sync::Arc};

use rand::{thread_rng, Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Poisson};
use rand_xoshiro::SplitMix64;

use crate::{
    block::{Block, ColumnType, Value},
    error::{BootstrapError, BootstrapResult},
};

/// Source of seeds for newly created replica sets.
pub trait SeedProvider: Debug + Send + Sync {
    fn next_seed(&self) -> u64;
}

/// Draws seeds from the thread-local generator seeded by the OS.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadRandomSeeds;

impl SeedProvider for ThreadRandomSeeds {
    fn next_seed(&self) -> u64 {
        thread_rng().gen()
    }
}

/// Sequential generator of sub-seeds.
///
/// Backed by SplitMix64, whose output is a bijection of a counter that
/// advances by an odd constant, so a stream never yields the same sub-seed
/// twice within 2^64 draws.  The stream cannot be cloned or rewound.
#[derive(Debug)]
pub struct ResamplingStream {
    seed: u64,
    draws: u64,
    rng: SplitMix64,
}

impl ResamplingStream {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            draws: 0,
            rng: SplitMix64::seed_from_u64(seed),
        }
    }

    /// Seed the stream was constructed with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of sub-seeds drawn so far.
    pub fn draws(&self) -> u64 {
        self.draws
    }

    pub fn next_subseed(&mut self) -> u64 {
        self.draws += 1;
        self.rng.next_u64()
    }
}

/// Draws the resampled weight of the row at `position`.
///
/// A pure function of its arguments.  Non-positive and non-finite weights
/// resample to 0.
pub fn poisson_weight(seed: u64, position: usize, weight: f64) -> i64 {
    if !(weight > 0.0 && weight.is_finite()) {
        return 0;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(position as u64);
    match Poisson::new(weight) {
        Ok(poisson) => {
            let draw: f64 = poisson.sample(&mut rng);
            draw as i64
        }
        Err(_) => 0,
    }
}

/// A view of a weight column where every weight is replaced with a
/// Poisson-distributed draw with mean equal to the original weight.
///
/// Nothing is materialized: each read computes the draw for that position,
/// and repeated reads of a position return the same value.  Null weights
/// stay null.
#[derive(Debug)]
pub struct PoissonizedBlock {
    weights: Arc<dyn Block>,
    seed: u64,
}

impl PoissonizedBlock {
    pub fn new(weights: Arc<dyn Block>, seed: u64) -> BootstrapResult<Self> {
        if !weights.column_type().is_numeric() {
            return Err(BootstrapError::invalid_argument(format!(
                "sample weights must be numeric, found a {:?} column",
                weights.column_type()
            )));
        }
        Ok(Self { weights, seed })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Block for PoissonizedBlock {
    fn column_type(&self) -> ColumnType {
        ColumnType::Long
    }

    fn position_count(&self) -> usize {
        self.weights.position_count()
    }

    fn value(&self, position: usize) -> Value<'_> {
        match self.weights.value(position).as_f64() {
            Some(weight) => Value::Long(poisson_weight(self.seed, position, weight)),
            None => Value::Null,
        }
    }
}
