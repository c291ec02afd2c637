//! Packs an ordered list of blocks into one flat buffer and back.
//!
//! The buffer is an `rkyv` archive of the block list.  Order and count are
//! preserved exactly; nothing else about the layout is part of the
//! contract.

use rkyv::{AlignedVec, Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

use crate::{
    block::ArrayBlock,
    error::{BootstrapError, BootstrapResult},
};

#[derive(Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
struct PackedBlocks {
    blocks: Vec<ArrayBlock>,
}

/// Serializes `blocks`, in order, into a single buffer.
pub fn encode_blocks(blocks: Vec<ArrayBlock>) -> BootstrapResult<Vec<u8>> {
    let packed = PackedBlocks { blocks };
    let bytes = rkyv::to_bytes::<_, 4096>(&packed)
        .map_err(|e| BootstrapError::Codec(format!("{e:?}")))?;
    Ok(bytes.to_vec())
}

/// Inverse of [`encode_blocks`].
pub fn decode_blocks(bytes: &[u8]) -> BootstrapResult<Vec<ArrayBlock>> {
    // Archives must be read from an aligned buffer.
    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);

    let packed = rkyv::from_bytes::<PackedBlocks>(&aligned)
        .map_err(|e| BootstrapError::Codec(format!("{e:?}")))?;
    Ok(packed.blocks)
}
