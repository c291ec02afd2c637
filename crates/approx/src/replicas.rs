//! The ensemble of replicas behind a bootstrapped accumulator.
//!
//! A [`ReplicaSet`] owns `N` accumulators of the wrapped function, the
//! [`ResamplingStream`] they share, and the confidence level of the output.
//! It is used by both [`BootstrappedAccumulator`] and
//! [`BootstrappedGroupedAccumulator`], which differ only in how they call
//! into the individual replicas.
//!
//! # Replica identity
//!
//! Replica `i` is always the `i`-th accumulator in the set.  Intermediate
//! states are packed and unpacked in index order, so the state of replica
//! `i` on one worker is always merged into replica `i` on the peer that
//! consumes it.  Mixing up replicas between workers would pair up unrelated
//! resamples and silently corrupt the interval.
//!
//! [`BootstrappedAccumulator`]: crate::BootstrappedAccumulator
//! [`BootstrappedGroupedAccumulator`]: crate::BootstrappedGroupedAccumulator

use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    block::{ArrayBlock, Block, Page, Value},
    codec::{decode_blocks, encode_blocks},
    error::{BootstrapError, BootstrapResult},
    interval::{check_confidence, format_approximate_output},
    random::{PoissonizedBlock, ResamplingStream},
};

#[derive(Debug)]
pub struct ReplicaSet<A: ?Sized> {
    replicas: Vec<Box<A>>,
    stream: ResamplingStream,
    /// `None` for sets that only merge intermediate states.
    sample_weight_channel: Option<usize>,
    confidence: f64,
}

impl<A: ?Sized> ReplicaSet<A> {
    pub fn new(
        replicas: Vec<Box<A>>,
        sample_weight_channel: Option<usize>,
        confidence: f64,
        seed: u64,
    ) -> BootstrapResult<Self> {
        if replicas.len() < 2 {
            return Err(BootstrapError::invalid_argument(format!(
                "bootstrapping requires at least 2 replicas, got {}",
                replicas.len()
            )));
        }
        check_confidence(confidence)?;

        Ok(Self {
            replicas,
            stream: ResamplingStream::new(seed),
            sample_weight_channel,
            confidence,
        })
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn seed(&self) -> u64 {
        self.stream.seed()
    }

    pub fn sample_weight_channel(&self) -> Option<usize> {
        self.sample_weight_channel
    }

    /// Replicas in index order.
    pub fn iter(&self) -> impl Iterator<Item = &A> {
        self.replicas.iter().map(|replica| &**replica)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut A> {
        self.replicas.iter_mut().map(|replica| &mut **replica)
    }

    /// Feeds `page` to every replica, in index order, each time with the
    /// sample weight channel independently resampled.
    ///
    /// Draws one sub-seed per replica from the stream, so no two calls (or
    /// replicas) ever see the same resample.
    pub fn add_resampled_input<F>(&mut self, page: &Page, mut add_input: F) -> BootstrapResult<()>
    where
        F: FnMut(&mut A, &Page) -> BootstrapResult<()>,
    {
        let channel = self.sample_weight_channel.ok_or_else(|| {
            BootstrapError::invalid_argument(
                "raw input requires a sample weight channel; this accumulator only merges intermediate states",
            )
        })?;
        let weights = page.block(channel)?.clone();

        trace!(
            positions = page.position_count(),
            replicas = self.replicas.len(),
            "resampling input page"
        );

        for replica in self.replicas.iter_mut() {
            let resampled = PoissonizedBlock::new(weights.clone(), self.stream.next_subseed())?;
            let page = page.with_block(channel, Arc::new(resampled))?;
            add_input(&mut **replica, &page)?;
        }
        Ok(())
    }

    /// Unpacks every position of a block of packed states.
    ///
    /// Returns, for each position, one sub-state per replica in index
    /// order.  Fails unless every blob holds exactly [`Self::len`]
    /// sub-states.
    pub fn unpack(&self, block: &dyn Block) -> BootstrapResult<Vec<Vec<ArrayBlock>>> {
        trace!(
            positions = block.position_count(),
            "unpacking intermediate replica states"
        );

        (0..block.position_count())
            .map(|position| {
                let Value::Varbinary(bytes) = block.value(position) else {
                    return Err(BootstrapError::invalid_argument(format!(
                        "expected packed replica states at position {position}, found {:?}",
                        block.value(position)
                    )));
                };

                let states = decode_blocks(bytes)?;
                if states.len() != self.replicas.len() {
                    return Err(BootstrapError::invalid_argument(format!(
                        "number of packed replica states ({}) does not match the number of replicas ({})",
                        states.len(),
                        self.replicas.len()
                    )));
                }
                Ok(states)
            })
            .collect()
    }

    /// Packs one intermediate state per replica, in index order.
    pub fn pack<F>(&self, mut evaluate_intermediate: F) -> BootstrapResult<Vec<u8>>
    where
        F: FnMut(&A) -> BootstrapResult<ArrayBlock>,
    {
        let states = self
            .replicas
            .iter()
            .map(|replica| evaluate_intermediate(&**replica))
            .collect::<BootstrapResult<Vec<_>>>()?;

        let bytes = encode_blocks(states)?;
        trace!(size = bytes.len(), "packed replica states");
        Ok(bytes)
    }

    /// Collects the final value of every replica and formats their
    /// confidence interval.
    ///
    /// The sample always holds one value per replica.  A null result (e.g.,
    /// a replica whose resample drew none of the rows) counts as 0.
    pub fn format_final<F>(&self, mut evaluate_final: F) -> BootstrapResult<String>
    where
        F: FnMut(&A) -> BootstrapResult<ArrayBlock>,
    {
        let mut sample = Vec::with_capacity(self.replicas.len());
        let mut nulls = 0;

        for (index, replica) in self.replicas.iter().enumerate() {
            let result = evaluate_final(&**replica)?;
            if result.position_count() == 0 {
                return Err(BootstrapError::invalid_argument(format!(
                    "accumulator returned no results (replica {index})"
                )));
            }

            match result.value(0) {
                Value::Null => {
                    nulls += 1;
                    sample.push(0.0);
                }
                value => sample.push(value.as_f64().ok_or_else(|| {
                    BootstrapError::InternalInvariant(format!(
                        "expected a numeric result from replica {index}, found {value:?}"
                    ))
                })?),
            }
        }

        if nulls > 0 {
            debug!(
                nulls,
                replicas = self.replicas.len(),
                "counting null replica results as 0"
            );
        }
        format_approximate_output(&sample, self.confidence)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::ReplicaSet;
    use crate::{
        block::{ArrayBlock, Block, ColumnType, Page, Value},
        codec::encode_blocks,
        function::{Accumulator, AggregationFunction},
        test::{long_page, WeightedSum},
        BootstrapError,
    };

    fn replica_set(replicas: usize, weight_channel: Option<usize>) -> ReplicaSet<dyn Accumulator> {
        let replicas = (0..replicas)
            .map(|_| {
                WeightedSum
                    .create_accumulator(None, weight_channel, 1.0, &[0])
                    .unwrap()
            })
            .collect();
        ReplicaSet::new(replicas, weight_channel, 0.95, 17).unwrap()
    }

    #[test]
    fn needs_two_replicas() {
        let replicas = vec![WeightedSum.create_accumulator(None, Some(1), 1.0, &[0]).unwrap()];
        assert!(matches!(
            ReplicaSet::new(replicas, Some(1), 0.95, 0),
            Err(BootstrapError::InvalidArgument(_))
        ));
    }

    #[test]
    fn each_replica_sees_its_own_resample() {
        let mut set = replica_set(4, Some(1));
        let page = long_page(&[1, 2, 3, 4, 5, 6, 7, 8], &[1, 1, 1, 1, 1, 1, 1, 1]);

        let mut seeds = Vec::new();
        set.add_resampled_input(&page, |_, page| {
            let weights = page.block(1).unwrap();
            assert_eq!(weights.column_type(), ColumnType::Long);
            let resampled: Vec<Option<i64>> = (0..page.position_count())
                .map(|position| match weights.value(position) {
                    Value::Long(weight) => Some(weight),
                    _ => None,
                })
                .collect();
            seeds.push(resampled);
            Ok(())
        })
        .unwrap();

        assert_eq!(seeds.len(), 4);
        assert!(seeds.windows(2).any(|pair| pair[0] != pair[1]));
    }

    #[test]
    fn intermediate_only_rejects_input() {
        let mut set = replica_set(3, None);
        let page = long_page(&[1], &[1]);
        assert!(matches!(
            set.add_resampled_input(&page, |_, _| Ok(())),
            Err(BootstrapError::InvalidArgument(_))
        ));
    }

    #[test]
    fn unpack_checks_state_count() {
        let set = replica_set(3, Some(1));
        let blob = encode_blocks(vec![ArrayBlock::from_longs([1]); 2]).unwrap();
        let error = set.unpack(&ArrayBlock::single_varbinary(blob)).unwrap_err();
        assert!(matches!(error, BootstrapError::InvalidArgument(_)));

        let error = set.unpack(&ArrayBlock::from_longs([1])).unwrap_err();
        assert!(matches!(error, BootstrapError::InvalidArgument(_)));

        let blob = encode_blocks(vec![ArrayBlock::from_longs([1]); 3]).unwrap();
        let states = set.unpack(&ArrayBlock::single_varbinary(blob)).unwrap();
        assert_eq!(states, vec![vec![ArrayBlock::from_longs([1]); 3]]);
    }

    #[test]
    fn format_final_counts_nulls_as_zero() {
        let set = replica_set(3, Some(1));
        let mut results = vec![
            ArrayBlock::Long(vec![None]),
            ArrayBlock::Long(vec![None]),
            ArrayBlock::from_longs([100]),
        ]
        .into_iter();
        // Sample {0, 0, 100}, not {100}.
        assert_eq!(
            set.format_final(|_| Ok(results.next().unwrap())).unwrap(),
            "50.0 +/- 50.0"
        );

        assert_eq!(
            set.format_final(|_| Ok(ArrayBlock::Double(vec![None]))).unwrap(),
            "0.0 +/- 0.0"
        );
    }

    #[test]
    fn format_final_rejects_missing_results() {
        let set = replica_set(3, Some(1));
        assert!(matches!(
            set.format_final(|_| Ok(ArrayBlock::empty(ColumnType::Long))),
            Err(BootstrapError::InvalidArgument(_))
        ));
        assert!(matches!(
            set.format_final(|_| Ok(ArrayBlock::single_varbinary(vec![1]))),
            Err(BootstrapError::InternalInvariant(_))
        ));
    }

    #[test]
    fn pack_preserves_replica_order() {
        let mut set = replica_set(3, Some(1));
        let page = Page::new(vec![
            ArrayBlock::from_longs([5]).into_arc(),
            ArrayBlock::from_longs([1]).into_arc(),
        ])
        .unwrap();
        set.add_resampled_input(&page, |replica, page| replica.add_input(page))
            .unwrap();

        let blob = set.pack(|replica| replica.evaluate_intermediate()).unwrap();
        let states = set.unpack(&ArrayBlock::single_varbinary(blob)).unwrap();
        let expected: Vec<_> = set
            .iter()
            .map(|replica| replica.evaluate_intermediate().unwrap())
            .collect();
        assert_eq!(states, vec![expected]);
        assert!(states[0]
            .iter()
            .all(|state| matches!(state.value(0), Value::Null | Value::Long(_))));
    }
}
