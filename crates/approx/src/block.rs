//! Columnar batches consumed and produced by accumulators.
//!
//! A [`Page`] is an ordered list of channels (columns), each a [`Block`] of
//! equal length.  Blocks are read one position at a time through
//! [`Block::value`], which lets a block be a lazy view over another block
//! (see [`PoissonizedBlock`](crate::random::PoissonizedBlock)) rather than
//! materialized data.  Accumulator outputs are always materialized as
//! [`ArrayBlock`]s, which is what the [`codec`](crate::codec) packs.

use std::{fmt::Debug, sync::Arc};

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};

use crate::error::{BootstrapError, BootstrapResult};

/// Type of the values stored in a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit signed integer.
    Long,
    /// 64-bit float.
    Double,
    /// Opaque byte string.
    Varbinary,
}

impl ColumnType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }
}

/// A single value read from a block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value<'a> {
    Null,
    Long(i64),
    Double(f64),
    Varbinary(&'a [u8]),
}

impl Value<'_> {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Reads a numeric value, widening integers to `f64`.
    ///
    /// Returns `None` for nulls and byte strings.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Long(v) => Some(v as f64),
            Value::Double(v) => Some(v),
            Value::Null | Value::Varbinary(_) => None,
        }
    }
}

/// A column of values addressed by position.
///
/// `value` panics when `position >= position_count()`, like slice
/// indexing.
pub trait Block: Debug + Send + Sync {
    fn column_type(&self) -> ColumnType;

    fn position_count(&self) -> usize;

    fn value(&self, position: usize) -> Value<'_>;

    fn is_null(&self, position: usize) -> bool {
        self.value(position).is_null()
    }
}

/// A materialized block.
#[derive(Clone, Debug, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum ArrayBlock {
    Long(Vec<Option<i64>>),
    Double(Vec<Option<f64>>),
    Varbinary(Vec<Option<Vec<u8>>>),
}

impl ArrayBlock {
    pub fn empty(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Long => Self::Long(Vec::new()),
            ColumnType::Double => Self::Double(Vec::new()),
            ColumnType::Varbinary => Self::Varbinary(Vec::new()),
        }
    }

    pub fn from_longs(values: impl IntoIterator<Item = i64>) -> Self {
        Self::Long(values.into_iter().map(Some).collect())
    }

    pub fn from_doubles(values: impl IntoIterator<Item = f64>) -> Self {
        Self::Double(values.into_iter().map(Some).collect())
    }

    /// A block holding exactly one byte string.
    pub fn single_varbinary(bytes: Vec<u8>) -> Self {
        Self::Varbinary(vec![Some(bytes)])
    }

    /// A block holding exactly one null of the given type.
    pub fn single_null(column_type: ColumnType) -> Self {
        let mut builder = BlockBuilder::new(column_type);
        builder.append_null();
        builder.build()
    }

    pub fn into_arc(self) -> Arc<dyn Block> {
        Arc::new(self)
    }
}

impl Block for ArrayBlock {
    fn column_type(&self) -> ColumnType {
        match self {
            Self::Long(_) => ColumnType::Long,
            Self::Double(_) => ColumnType::Double,
            Self::Varbinary(_) => ColumnType::Varbinary,
        }
    }

    fn position_count(&self) -> usize {
        match self {
            Self::Long(values) => values.len(),
            Self::Double(values) => values.len(),
            Self::Varbinary(values) => values.len(),
        }
    }

    fn value(&self, position: usize) -> Value<'_> {
        match self {
            Self::Long(values) => values[position].map_or(Value::Null, Value::Long),
            Self::Double(values) => values[position].map_or(Value::Null, Value::Double),
            Self::Varbinary(values) => values[position]
                .as_deref()
                .map_or(Value::Null, Value::Varbinary),
        }
    }
}

/// Appends values of a single type and produces an [`ArrayBlock`].
#[derive(Debug)]
pub struct BlockBuilder {
    block: ArrayBlock,
}

impl BlockBuilder {
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            block: ArrayBlock::empty(column_type),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        self.block.column_type()
    }

    pub fn position_count(&self) -> usize {
        self.block.position_count()
    }

    pub fn append_null(&mut self) {
        match &mut self.block {
            ArrayBlock::Long(values) => values.push(None),
            ArrayBlock::Double(values) => values.push(None),
            ArrayBlock::Varbinary(values) => values.push(None),
        }
    }

    /// Appends `value`, which must be null or match the builder's type.
    pub fn append(&mut self, value: Value<'_>) -> BootstrapResult<()> {
        if value.is_null() {
            self.append_null();
            return Ok(());
        }

        match (&mut self.block, value) {
            (ArrayBlock::Long(values), Value::Long(v)) => values.push(Some(v)),
            (ArrayBlock::Double(values), Value::Double(v)) => values.push(Some(v)),
            (ArrayBlock::Varbinary(values), Value::Varbinary(v)) => values.push(Some(v.to_vec())),
            (block, value) => {
                return Err(BootstrapError::invalid_argument(format!(
                    "cannot append {value:?} to a {:?} block",
                    block.column_type()
                )))
            }
        }
        Ok(())
    }

    /// Copies the value at `position` of `block`.
    pub fn append_from(&mut self, block: &dyn Block, position: usize) -> BootstrapResult<()> {
        self.append(block.value(position))
    }

    pub fn build(self) -> ArrayBlock {
        self.block
    }
}

/// An ordered set of channels with equal position counts.
#[derive(Clone, Debug)]
pub struct Page {
    blocks: Vec<Arc<dyn Block>>,
    position_count: usize,
}

impl Page {
    pub fn new(blocks: Vec<Arc<dyn Block>>) -> BootstrapResult<Self> {
        let position_count = blocks.first().map_or(0, |block| block.position_count());
        if let Some((channel, block)) = blocks
            .iter()
            .enumerate()
            .find(|(_, block)| block.position_count() != position_count)
        {
            return Err(BootstrapError::invalid_argument(format!(
                "channel {channel} has {} positions, expected {position_count}",
                block.position_count()
            )));
        }

        Ok(Self {
            blocks,
            position_count,
        })
    }

    pub fn channel_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn position_count(&self) -> usize {
        self.position_count
    }

    pub fn block(&self, channel: usize) -> BootstrapResult<&Arc<dyn Block>> {
        self.blocks.get(channel).ok_or_else(|| {
            BootstrapError::invalid_argument(format!(
                "channel {channel} out of range for a page with {} channels",
                self.blocks.len()
            ))
        })
    }

    pub fn blocks(&self) -> &[Arc<dyn Block>] {
        &self.blocks
    }

    /// Returns a copy of this page with `channel` replaced by `block`.
    ///
    /// Other channels are shared, not copied.
    pub fn with_block(&self, channel: usize, block: Arc<dyn Block>) -> BootstrapResult<Self> {
        self.block(channel)?;
        if block.position_count() != self.position_count {
            return Err(BootstrapError::invalid_argument(format!(
                "replacement for channel {channel} has {} positions, expected {}",
                block.position_count(),
                self.position_count
            )));
        }

        let mut blocks = self.blocks.clone();
        blocks[channel] = block;
        Ok(Self {
            blocks,
            position_count: self.position_count,
        })
    }
}

/// Group id of every row of a page, for grouped accumulation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupByIdBlock {
    group_count: usize,
    ids: Vec<usize>,
}

impl GroupByIdBlock {
    /// `group_count` is the number of groups seen so far, including the
    /// ones referenced by `ids`.
    pub fn new(group_count: usize, ids: Vec<usize>) -> BootstrapResult<Self> {
        if let Some(id) = ids.iter().find(|&&id| id >= group_count) {
            return Err(BootstrapError::invalid_argument(format!(
                "group id {id} is not below the group count {group_count}"
            )));
        }
        Ok(Self { group_count, ids })
    }

    pub fn group_count(&self) -> usize {
        self.group_count
    }

    pub fn position_count(&self) -> usize {
        self.ids.len()
    }

    pub fn group_id(&self, position: usize) -> usize {
        self.ids[position]
    }

    pub fn ids(&self) -> &[usize] {
        &self.ids
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::{ArrayBlock, Block, BlockBuilder, ColumnType, GroupByIdBlock, Page, Value};
    use crate::BootstrapError;

    #[test]
    fn array_block_values() {
        let block = ArrayBlock::Varbinary(vec![Some(b"abc".to_vec()), None]);
        assert_eq!(block.column_type(), ColumnType::Varbinary);
        assert_eq!(block.position_count(), 2);
        assert_eq!(block.value(0), Value::Varbinary(b"abc"));
        assert!(block.is_null(1));

        let block = ArrayBlock::from_longs([3, 4]);
        assert_eq!(block.value(1).as_f64(), Some(4.0));
        assert_eq!(Value::Varbinary(b"x").as_f64(), None);
    }

    #[test]
    fn builder_rejects_mismatched_types() {
        let mut builder = BlockBuilder::new(ColumnType::Double);
        builder.append(Value::Double(1.5)).unwrap();
        builder.append(Value::Null).unwrap();
        assert!(matches!(
            builder.append(Value::Long(1)),
            Err(BootstrapError::InvalidArgument(_))
        ));
        assert_eq!(builder.build(), ArrayBlock::Double(vec![Some(1.5), None]));
    }

    #[test]
    fn builder_copies_positions() {
        let source = ArrayBlock::from_longs([7, 8, 9]);
        let mut builder = BlockBuilder::new(ColumnType::Long);
        builder.append_from(&source, 2).unwrap();
        builder.append_from(&source, 0).unwrap();
        assert_eq!(builder.position_count(), 2);
        assert_eq!(builder.build(), ArrayBlock::from_longs([9, 7]));
    }

    #[test]
    fn page_channels_must_agree() {
        let error = Page::new(vec![
            ArrayBlock::from_longs([1, 2]).into_arc(),
            ArrayBlock::from_longs([1]).into_arc(),
        ])
        .unwrap_err();
        assert!(matches!(error, BootstrapError::InvalidArgument(_)));

        let page = Page::new(vec![
            ArrayBlock::from_longs([1, 2]).into_arc(),
            ArrayBlock::from_doubles([0.5, 0.25]).into_arc(),
        ])
        .unwrap();
        assert_eq!(page.channel_count(), 2);
        assert_eq!(page.position_count(), 2);
        assert!(page.block(2).is_err());
    }

    #[test]
    fn page_with_block_shares_other_channels() {
        let values: Arc<dyn Block> = ArrayBlock::from_longs([1, 2]).into_arc();
        let page = Page::new(vec![values.clone(), ArrayBlock::from_longs([1, 1]).into_arc()])
            .unwrap();

        let replaced = page
            .with_block(1, ArrayBlock::from_longs([5, 6]).into_arc())
            .unwrap();
        assert!(Arc::ptr_eq(replaced.block(0).unwrap(), &values));
        assert_eq!(replaced.block(1).unwrap().value(1), Value::Long(6));
        assert_eq!(page.block(1).unwrap().value(1), Value::Long(1));

        assert!(page
            .with_block(1, ArrayBlock::from_longs([5]).into_arc())
            .is_err());
    }

    #[test]
    fn group_ids_are_bounded() {
        assert!(GroupByIdBlock::new(2, vec![0, 2]).is_err());
        let ids = GroupByIdBlock::new(3, vec![2, 0, 2]).unwrap();
        assert_eq!(ids.position_count(), 3);
        assert_eq!(ids.group_id(0), 2);
        assert_eq!(ids.group_count(), 3);
    }
}
