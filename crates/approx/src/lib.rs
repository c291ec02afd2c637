//! Approximate aggregation with confidence intervals.
//!
//! [`BootstrappedAggregation`] turns any numeric aggregation function into
//! an approximate one.  It runs many replicas of the function, each over a
//! Poisson-resampled version of the (already sampled) input, and reports the
//! median of the replica results together with a margin of error derived
//! from their spread:
//!
//! ```text
//! 5050.0 +/- 1143.5
//! ```
//!
//! Accumulators can be split across workers: the intermediate state of a
//! bootstrapped accumulator packs the intermediate states of all of its
//! replicas, and merging it into a peer merges replica `i` into replica `i`.

pub mod block;
pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod error;
pub mod function;
pub mod interval;
pub mod random;
pub mod replicas;


pub use block::{ArrayBlock, Block, BlockBuilder, ColumnType, GroupByIdBlock, Page, Value};
pub use bootstrap::{
    BootstrappedAccumulator, BootstrappedAggregation, BootstrappedGroupedAccumulator,
};
pub use config::BootstrapConfig;
pub use error::{BootstrapError, BootstrapResult};
pub use function::{Accumulator, AggregationFunction, GroupedAccumulator};
pub use interval::{format_approximate_output, ConfidenceInterval};
pub use random::{SeedProvider, ThreadRandomSeeds};
