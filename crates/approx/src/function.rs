//! Aggregation capabilities.
//!
//! An [`AggregationFunction`] is a factory of accumulators.  Each
//! accumulator consumes input pages, can be reduced to an intermediate
//! state, can merge intermediate states produced by peers (e.g., other
//! workers running the same aggregation over a different partition), and
//! finally produces the aggregate value.
//!
//! The ungrouped [`Accumulator`] computes one aggregate over all input rows.
//! The [`GroupedAccumulator`] computes one aggregate per group, where the
//! group of every input row is given by a [`GroupByIdBlock`].

use std::fmt::Debug;

use crate::{
    block::{ArrayBlock, Block, BlockBuilder, ColumnType, GroupByIdBlock, Page},
    error::BootstrapResult,
};

pub trait AggregationFunction: Debug + Send + Sync {
    /// Types of the argument channels.
    fn parameter_types(&self) -> Vec<ColumnType>;

    /// Type of the value produced by `evaluate_final`.
    fn final_type(&self) -> ColumnType;

    /// Type of the value produced by `evaluate_intermediate`.
    fn intermediate_type(&self) -> ColumnType;

    /// Creates an accumulator over raw input rows.
    ///
    /// * `mask_channel` - optional boolean-like channel selecting the rows
    ///   to aggregate.
    /// * `sample_weight_channel` - optional channel with the number of times
    ///   each row should be counted.
    /// * `confidence` - confidence level, only meaningful for approximate
    ///   functions.
    /// * `argument_channels` - channels holding the function arguments.
    fn create_accumulator(
        &self,
        mask_channel: Option<usize>,
        sample_weight_channel: Option<usize>,
        confidence: f64,
        argument_channels: &[usize],
    ) -> BootstrapResult<Box<dyn Accumulator>>;

    /// Creates an accumulator that only merges intermediate states.
    fn create_intermediate_accumulator(
        &self,
        confidence: f64,
    ) -> BootstrapResult<Box<dyn Accumulator>>;

    /// Grouped version of [`Self::create_accumulator`].
    fn create_grouped_accumulator(
        &self,
        mask_channel: Option<usize>,
        sample_weight_channel: Option<usize>,
        confidence: f64,
        argument_channels: &[usize],
    ) -> BootstrapResult<Box<dyn GroupedAccumulator>>;

    /// Grouped version of [`Self::create_intermediate_accumulator`].
    fn create_grouped_intermediate_accumulator(
        &self,
        confidence: f64,
    ) -> BootstrapResult<Box<dyn GroupedAccumulator>>;
}

pub trait Accumulator: Debug + Send {
    fn final_type(&self) -> ColumnType;

    fn intermediate_type(&self) -> ColumnType;

    fn add_input(&mut self, page: &Page) -> BootstrapResult<()>;

    /// Merges every position of `block`, each an intermediate state of
    /// type [`Self::intermediate_type`].
    fn add_intermediate(&mut self, block: &dyn Block) -> BootstrapResult<()>;

    /// Returns a single-position block with the intermediate state.
    fn evaluate_intermediate(&self) -> BootstrapResult<ArrayBlock>;

    /// Returns a single-position block with the final value.
    fn evaluate_final(&self) -> BootstrapResult<ArrayBlock>;
}

pub trait GroupedAccumulator: Debug + Send {
    /// Approximate memory footprint of the accumulator, in bytes.
    fn estimated_size(&self) -> u64;

    fn final_type(&self) -> ColumnType;

    fn intermediate_type(&self) -> ColumnType;

    fn add_input(&mut self, group_ids: &GroupByIdBlock, page: &Page) -> BootstrapResult<()>;

    /// Merges position `i` of `block` into group `group_ids.group_id(i)`.
    fn add_intermediate(
        &mut self,
        group_ids: &GroupByIdBlock,
        block: &dyn Block,
    ) -> BootstrapResult<()>;

    /// Appends the intermediate state of `group_id` to `output`.
    fn evaluate_intermediate(&self, group_id: usize, output: &mut BlockBuilder)
        -> BootstrapResult<()>;

    /// Appends the final value of `group_id` to `output`.
    fn evaluate_final(&self, group_id: usize, output: &mut BlockBuilder) -> BootstrapResult<()>;
}
