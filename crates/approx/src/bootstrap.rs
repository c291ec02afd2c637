//! Approximate aggregation by bootstrap resampling.
//!
//! [`BootstrappedAggregation`] wraps a numeric aggregation function.  Each
//! accumulator it creates runs a fixed number of replicas of the wrapped
//! function, each over an independently resampled view of the input (see
//! [`random`](crate::random)), and outputs the spread of their results as a
//! confidence interval of the form `"<estimate> +/- <error>"`.
//!
//! Intermediate states pack the intermediate state of every replica into a
//! single byte string, so the wrapper always advertises
//! [`ColumnType::Varbinary`] for both its intermediate and final types.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    block::{ArrayBlock, Block, BlockBuilder, ColumnType, GroupByIdBlock, Page, Value},
    config::BootstrapConfig,
    error::{BootstrapError, BootstrapResult},
    function::{Accumulator, AggregationFunction, GroupedAccumulator},
    random::{SeedProvider, ThreadRandomSeeds},
    replicas::ReplicaSet,
};

/// Confidence passed to every replica.  Only approximate wrapped functions
/// look at it.
const REPLICA_CONFIDENCE: f64 = 1.0;

fn require_sample_weight(sample_weight_channel: Option<usize>) -> BootstrapResult<usize> {
    sample_weight_channel.ok_or_else(|| {
        BootstrapError::invalid_argument("sample weight must be present for bootstrapping")
    })
}

/// Bootstrapped version of a numeric aggregation function.
#[derive(Debug, Clone)]
pub struct BootstrappedAggregation {
    function: Arc<dyn AggregationFunction>,
    replicas: usize,
    seeds: Arc<dyn SeedProvider>,
}

impl BootstrappedAggregation {
    /// Wraps `function` with the default configuration, seeding every
    /// accumulator from the thread-local random generator.
    pub fn new(function: Arc<dyn AggregationFunction>) -> BootstrapResult<Self> {
        Self::with_config(
            function,
            &BootstrapConfig::default(),
            Arc::new(ThreadRandomSeeds),
        )
    }

    /// Wraps `function`.
    ///
    /// Fails if `function` doesn't produce a [`ColumnType::Long`] or
    /// [`ColumnType::Double`] final value, or if `config` is invalid.
    pub fn with_config(
        function: Arc<dyn AggregationFunction>,
        config: &BootstrapConfig,
        seeds: Arc<dyn SeedProvider>,
    ) -> BootstrapResult<Self> {
        config.validate()?;
        if !function.final_type().is_numeric() {
            return Err(BootstrapError::Configuration(format!(
                "bootstrap only supports functions that output a number, {function:?} outputs {:?}",
                function.final_type()
            )));
        }

        Ok(Self {
            function,
            replicas: config.replicas,
            seeds,
        })
    }

    /// The wrapped function.
    pub fn function(&self) -> &Arc<dyn AggregationFunction> {
        &self.function
    }

    /// Number of replicas in every accumulator created by this wrapper.
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    fn create_replicas<A, F>(&self, mut create: F) -> BootstrapResult<Vec<Box<A>>>
    where
        A: ?Sized,
        F: FnMut() -> BootstrapResult<Box<A>>,
    {
        (0..self.replicas).map(|_| create()).collect()
    }

    /// Like [`AggregationFunction::create_accumulator`], with an explicit
    /// seed.
    pub fn create_deterministic_accumulator(
        &self,
        mask_channel: Option<usize>,
        sample_weight_channel: usize,
        confidence: f64,
        seed: u64,
        argument_channels: &[usize],
    ) -> BootstrapResult<BootstrappedAccumulator> {
        let replicas = self.create_replicas(|| {
            self.function.create_accumulator(
                mask_channel,
                Some(sample_weight_channel),
                REPLICA_CONFIDENCE,
                argument_channels,
            )
        })?;
        debug!(
            replicas = self.replicas,
            seed,
            confidence,
            sample_weight_channel,
            "creating bootstrapped accumulator"
        );
        BootstrappedAccumulator::new(replicas, Some(sample_weight_channel), confidence, seed)
    }

    /// Like [`AggregationFunction::create_intermediate_accumulator`], with
    /// an explicit seed.
    pub fn create_deterministic_intermediate_accumulator(
        &self,
        confidence: f64,
        seed: u64,
    ) -> BootstrapResult<BootstrappedAccumulator> {
        let replicas = self.create_replicas(|| {
            self.function
                .create_intermediate_accumulator(REPLICA_CONFIDENCE)
        })?;
        debug!(
            replicas = self.replicas,
            seed, confidence, "creating intermediate bootstrapped accumulator"
        );
        BootstrappedAccumulator::new(replicas, None, confidence, seed)
    }

    /// Like [`AggregationFunction::create_grouped_accumulator`], with an
    /// explicit seed.
    pub fn create_deterministic_grouped_accumulator(
        &self,
        mask_channel: Option<usize>,
        sample_weight_channel: usize,
        confidence: f64,
        seed: u64,
        argument_channels: &[usize],
    ) -> BootstrapResult<BootstrappedGroupedAccumulator> {
        let replicas = self.create_replicas(|| {
            self.function.create_grouped_accumulator(
                mask_channel,
                Some(sample_weight_channel),
                REPLICA_CONFIDENCE,
                argument_channels,
            )
        })?;
        debug!(
            replicas = self.replicas,
            seed,
            confidence,
            sample_weight_channel,
            "creating grouped bootstrapped accumulator"
        );
        BootstrappedGroupedAccumulator::new(
            replicas,
            Some(sample_weight_channel),
            confidence,
            seed,
        )
    }

    /// Like [`AggregationFunction::create_grouped_intermediate_accumulator`],
    /// with an explicit seed.
    pub fn create_deterministic_grouped_intermediate_accumulator(
        &self,
        confidence: f64,
        seed: u64,
    ) -> BootstrapResult<BootstrappedGroupedAccumulator> {
        let replicas = self.create_replicas(|| {
            self.function
                .create_grouped_intermediate_accumulator(REPLICA_CONFIDENCE)
        })?;
        debug!(
            replicas = self.replicas,
            seed, confidence, "creating grouped intermediate bootstrapped accumulator"
        );
        BootstrappedGroupedAccumulator::new(replicas, None, confidence, seed)
    }
}

impl AggregationFunction for BootstrappedAggregation {
    fn parameter_types(&self) -> Vec<ColumnType> {
        self.function.parameter_types()
    }

    fn final_type(&self) -> ColumnType {
        ColumnType::Varbinary
    }

    fn intermediate_type(&self) -> ColumnType {
        ColumnType::Varbinary
    }

    fn create_accumulator(
        &self,
        mask_channel: Option<usize>,
        sample_weight_channel: Option<usize>,
        confidence: f64,
        argument_channels: &[usize],
    ) -> BootstrapResult<Box<dyn Accumulator>> {
        let sample_weight_channel = require_sample_weight(sample_weight_channel)?;
        Ok(Box::new(self.create_deterministic_accumulator(
            mask_channel,
            sample_weight_channel,
            confidence,
            self.seeds.next_seed(),
            argument_channels,
        )?))
    }

    fn create_intermediate_accumulator(
        &self,
        confidence: f64,
    ) -> BootstrapResult<Box<dyn Accumulator>> {
        Ok(Box::new(self.create_deterministic_intermediate_accumulator(
            confidence,
            self.seeds.next_seed(),
        )?))
    }

    fn create_grouped_accumulator(
        &self,
        mask_channel: Option<usize>,
        sample_weight_channel: Option<usize>,
        confidence: f64,
        argument_channels: &[usize],
    ) -> BootstrapResult<Box<dyn GroupedAccumulator>> {
        let sample_weight_channel = require_sample_weight(sample_weight_channel)?;
        Ok(Box::new(self.create_deterministic_grouped_accumulator(
            mask_channel,
            sample_weight_channel,
            confidence,
            self.seeds.next_seed(),
            argument_channels,
        )?))
    }

    fn create_grouped_intermediate_accumulator(
        &self,
        confidence: f64,
    ) -> BootstrapResult<Box<dyn GroupedAccumulator>> {
        Ok(Box::new(
            self.create_deterministic_grouped_intermediate_accumulator(
                confidence,
                self.seeds.next_seed(),
            )?,
        ))
    }
}

/// Ungrouped bootstrapped accumulator.
#[derive(Debug)]
pub struct BootstrappedAccumulator {
    replicas: ReplicaSet<dyn Accumulator>,
}

impl BootstrappedAccumulator {
    pub fn new(
        replicas: Vec<Box<dyn Accumulator>>,
        sample_weight_channel: Option<usize>,
        confidence: f64,
        seed: u64,
    ) -> BootstrapResult<Self> {
        Ok(Self {
            replicas: ReplicaSet::new(replicas, sample_weight_channel, confidence, seed)?,
        })
    }

    pub fn replicas(&self) -> &ReplicaSet<dyn Accumulator> {
        &self.replicas
    }
}

impl Accumulator for BootstrappedAccumulator {
    fn final_type(&self) -> ColumnType {
        ColumnType::Varbinary
    }

    fn intermediate_type(&self) -> ColumnType {
        ColumnType::Varbinary
    }

    fn add_input(&mut self, page: &Page) -> BootstrapResult<()> {
        self.replicas
            .add_resampled_input(page, |replica, page| replica.add_input(page))
    }

    /// Merges replica `i` of every packed state into replica `i`.
    ///
    /// On error, some replicas may already have merged the block, so the
    /// accumulator must be discarded.
    fn add_intermediate(&mut self, block: &dyn Block) -> BootstrapResult<()> {
        if block.position_count() == 0 {
            return Err(BootstrapError::invalid_argument(
                "intermediate block has no positions",
            ));
        }

        for states in self.replicas.unpack(block)? {
            for (replica, state) in self.replicas.iter_mut().zip(states.iter()) {
                replica.add_intermediate(state)?;
            }
        }
        Ok(())
    }

    fn evaluate_intermediate(&self) -> BootstrapResult<ArrayBlock> {
        let packed = self
            .replicas
            .pack(|replica| replica.evaluate_intermediate())?;
        Ok(ArrayBlock::single_varbinary(packed))
    }

    fn evaluate_final(&self) -> BootstrapResult<ArrayBlock> {
        let output = self
            .replicas
            .format_final(|replica| replica.evaluate_final())?;
        Ok(ArrayBlock::single_varbinary(output.into_bytes()))
    }
}

/// Grouped bootstrapped accumulator.
#[derive(Debug)]
pub struct BootstrappedGroupedAccumulator {
    replicas: ReplicaSet<dyn GroupedAccumulator>,
}

impl BootstrappedGroupedAccumulator {
    pub fn new(
        replicas: Vec<Box<dyn GroupedAccumulator>>,
        sample_weight_channel: Option<usize>,
        confidence: f64,
        seed: u64,
    ) -> BootstrapResult<Self> {
        Ok(Self {
            replicas: ReplicaSet::new(replicas, sample_weight_channel, confidence, seed)?,
        })
    }

    pub fn replicas(&self) -> &ReplicaSet<dyn GroupedAccumulator> {
        &self.replicas
    }
}

impl GroupedAccumulator for BootstrappedGroupedAccumulator {
    fn estimated_size(&self) -> u64 {
        self.replicas
            .iter()
            .map(|replica| replica.estimated_size())
            .sum()
    }

    fn final_type(&self) -> ColumnType {
        ColumnType::Varbinary
    }

    fn intermediate_type(&self) -> ColumnType {
        ColumnType::Varbinary
    }

    fn add_input(&mut self, group_ids: &GroupByIdBlock, page: &Page) -> BootstrapResult<()> {
        if group_ids.position_count() != page.position_count() {
            return Err(BootstrapError::invalid_argument(format!(
                "{} group ids for a page with {} positions",
                group_ids.position_count(),
                page.position_count()
            )));
        }

        self.replicas
            .add_resampled_input(page, |replica, page| replica.add_input(group_ids, page))
    }

    fn add_intermediate(
        &mut self,
        group_ids: &GroupByIdBlock,
        block: &dyn Block,
    ) -> BootstrapResult<()> {
        if group_ids.position_count() != block.position_count() {
            return Err(BootstrapError::invalid_argument(format!(
                "{} group ids for an intermediate block with {} positions",
                group_ids.position_count(),
                block.position_count()
            )));
        }

        // Regroup the unpacked states by replica, so that every replica
        // merges all of its states in one call.
        let mut columns: Vec<BlockBuilder> = self
            .replicas
            .iter()
            .map(|replica| BlockBuilder::new(replica.intermediate_type()))
            .collect();
        for states in self.replicas.unpack(block)? {
            for (column, state) in columns.iter_mut().zip(states.iter()) {
                if state.position_count() != 1 {
                    return Err(BootstrapError::invalid_argument(format!(
                        "packed replica state has {} positions, expected 1",
                        state.position_count()
                    )));
                }
                column.append_from(state, 0)?;
            }
        }

        trace!(
            positions = block.position_count(),
            groups = group_ids.group_count(),
            "merging grouped intermediate states"
        );
        // A failure here leaves earlier replicas merged, so the accumulator
        // must be discarded.
        for (replica, column) in self.replicas.iter_mut().zip(columns) {
            replica.add_intermediate(group_ids, &column.build())?;
        }
        Ok(())
    }

    fn evaluate_intermediate(
        &self,
        group_id: usize,
        output: &mut BlockBuilder,
    ) -> BootstrapResult<()> {
        let packed = self.replicas.pack(|replica| {
            let mut state = BlockBuilder::new(replica.intermediate_type());
            replica.evaluate_intermediate(group_id, &mut state)?;
            Ok(state.build())
        })?;
        output.append(Value::Varbinary(&packed))
    }

    fn evaluate_final(&self, group_id: usize, output: &mut BlockBuilder) -> BootstrapResult<()> {
        let formatted = self.replicas.format_final(|replica| {
            let mut result = BlockBuilder::new(replica.final_type());
            replica.evaluate_final(group_id, &mut result)?;
            Ok(result.build())
        })?;
        output.append(Value::Varbinary(formatted.as_bytes()))
    }
}
