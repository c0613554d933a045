use deku::ctx::Endian;
use deku::prelude::*;
use hfs_types_rs::{CatalogNodeId, DateTime, VolumeAttributeMask, VolumeSignature};

use super::{ByteReader, decode_fixed, encode_fixed};
use crate::error::{Error, Result};

/// Extent information. Defined as `struct HFSPlusExtentDescriptor` in
/// TN1150 > Fork Data Structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct ExtentDescriptor {
    pub start_block: u32,
    pub block_count: u32,
}

impl ExtentDescriptor {
    pub const SIZE: usize = 8;

    pub const fn new(start_block: u32, block_count: u32) -> Self {
        Self {
            start_block,
            block_count,
        }
    }

    /// An all-zero descriptor terminates an extent record.
    pub fn is_empty(&self) -> bool {
        self.start_block == 0 && self.block_count == 0
    }
}

/// A fork's inline extents, and every extents overflow leaf record, hold
/// exactly eight descriptors.
pub type ExtentRecord = [ExtentDescriptor; 8];

pub const EXTENT_RECORD_SIZE: usize = ExtentDescriptor::SIZE * 8;

/// The used prefix of an extent record, up to the first all-zero descriptor.
pub fn trim_extents(record: &ExtentRecord) -> &[ExtentDescriptor] {
    let used = record
        .iter()
        .position(ExtentDescriptor::is_empty)
        .unwrap_or(record.len());
    &record[..used]
}

pub fn decode_extent_record(bytes: &[u8]) -> Result<ExtentRecord> {
    let mut reader = ByteReader::new("extent record", bytes);
    let mut record = ExtentRecord::default();
    for descriptor in record.iter_mut() {
        descriptor.start_block = reader.u32()?;
        descriptor.block_count = reader.u32()?;
    }
    Ok(record)
}

pub fn encode_extent_record(record: &ExtentRecord) -> Vec<u8> {
    record
        .iter()
        .flat_map(|d| d.start_block.to_be_bytes().into_iter().chain(d.block_count.to_be_bytes()))
        .collect()
}

/// Resource and Data Fork contents. Defined as `struct HFSPlusForkData` in
/// TN1150 > Fork Data Structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct ForkData {
    pub logical_size: u64,
    pub clump_size: u32,
    pub total_blocks: u32,

    pub extents: ExtentRecord,
}

impl ForkData {
    pub const SIZE: usize = 80;

    /// Inline extents up to the first unused slot.
    pub fn basic_extents(&self) -> &[ExtentDescriptor] {
        trim_extents(&self.extents)
    }
}

pub fn decode_fork_data(bytes: &[u8]) -> Result<ForkData> {
    decode_fixed("fork data", bytes, ForkData::SIZE)
}

pub fn encode_fork_data(fork: &ForkData) -> Result<Vec<u8>> {
    encode_fixed("fork data", fork)
}

/// Volume Header, stored at 1024 bytes from start, and secondary header at 1024
/// bytes from the end. Defined as `struct HFSPlusVolumeHeader` in
/// TN1150 > Volume Header.
#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct VolumeHeader {
    pub signature: u16,
    pub version: u16,
    pub attributes: u32,
    pub last_mounted_version: u32,
    pub journal_info_block: u32,

    pub create_date: DateTime,
    pub modify_date: DateTime,
    pub backup_date: DateTime,
    pub checked_date: DateTime,

    pub file_count: u32,
    pub folder_count: u32,

    pub block_size: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,

    pub next_allocation: u32,
    pub rsrc_clump_size: u32,
    pub data_clump_size: u32,
    pub next_catalog_id: CatalogNodeId,

    pub write_count: u32,
    pub encodings_bitmap: u64,

    pub finder_info: [u32; 8],

    pub allocation_file: ForkData,
    pub extents_file: ForkData,
    pub catalog_file: ForkData,
    pub attributes_file: ForkData,
    pub startup_file: ForkData,
}

impl VolumeHeader {
    pub const SIZE: usize = 512;

    /// Byte offset of the primary header from the start of the volume.
    pub const OFFSET: u64 = 1024;

    pub fn volume_signature(&self) -> Result<VolumeSignature> {
        VolumeSignature::try_from(self.signature)
            .map_err(|unknown| Error::unknown_value("signature", 0, unknown))
    }

    pub fn has_attribute(&self, mask: VolumeAttributeMask) -> bool {
        mask.is_set(self.attributes)
    }
}

pub fn decode_volume_header(bytes: &[u8]) -> Result<VolumeHeader> {
    decode_fixed("volume header", bytes, VolumeHeader::SIZE)
}

pub fn encode_volume_header(header: &VolumeHeader) -> Result<Vec<u8>> {
    encode_fixed("volume header", header)
}
