use hfs_types_rs::{CatalogNodeId, ForkType};

use super::ByteReader;
use crate::error::{Error, Result};

/// Key of an extents overflow record. Defined as `struct HFSPlusExtentKey` in
/// TN1150 > Extents Overflow File Key.
///
/// `start_block` is the fork-relative allocation block at which the record's
/// extents begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtentKey {
    pub fork_type: ForkType,
    pub file_id: CatalogNodeId,
    pub start_block: u32,
}

impl ExtentKey {
    pub const KEY_LENGTH: u16 = 10;
    pub const SIZE: usize = 2 + Self::KEY_LENGTH as usize;

    pub fn new(fork_type: ForkType, file_id: CatalogNodeId, start_block: u32) -> Self {
        Self {
            fork_type,
            file_id,
            start_block,
        }
    }
}

/// Decode an extent key, returning it with the offset of the following data.
pub fn decode_extent_key(bytes: &[u8]) -> Result<(ExtentKey, usize)> {
    let mut reader = ByteReader::new("extent key", bytes);
    let key_length = reader.u16()?;
    if key_length != ExtentKey::KEY_LENGTH {
        return Err(Error::malformed_value(
            "key length",
            0,
            key_length,
            "extent keys are always 10 bytes",
        ));
    }

    let fork_type = ForkType::try_from(reader.u8()?)
        .map_err(|unknown| Error::unknown_value("fork type", 2, unknown))?;
    let _pad = reader.u8()?;
    let file_id = reader.u32()?;
    let start_block = reader.u32()?;

    Ok((
        ExtentKey {
            fork_type,
            file_id,
            start_block,
        },
        reader.position(),
    ))
}

pub fn encode_extent_key(key: &ExtentKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(ExtentKey::SIZE);
    out.extend_from_slice(&ExtentKey::KEY_LENGTH.to_be_bytes());
    out.push(key.fork_type.into());
    out.push(0);
    out.extend_from_slice(&key.file_id.to_be_bytes());
    out.extend_from_slice(&key.start_block.to_be_bytes());
    out
}
