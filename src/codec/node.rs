use deku::prelude::*;
use hfs_types_rs::{BTreeKeyCompareType, BTreeNodeType};
use itertools::Itertools;

use super::{decode_fixed, encode_fixed};
use crate::error::{Error, Result};

#[derive(DekuRead, DekuWrite)]
#[deku(endian = "big")]
struct RawNodeDescriptor {
    forward_link: u32,
    backward_link: u32,
    kind: i8,
    height: u8,
    num_records: u16,
    reserved: u16,
}

/// BTree Node Descriptor.
/// Defined as `struct BTNodeDescriptor` in TN1150 > Node Structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreeNodeDescriptor {
    pub forward_link: u32,
    pub backward_link: u32,
    pub kind: BTreeNodeType,
    pub height: u8,
    pub num_records: u16,
    pub reserved: u16,
}

impl BTreeNodeDescriptor {
    pub const SIZE: usize = 14;

    /// Offset of the `kind` field.
    pub const KIND_OFFSET: usize = 8;

    pub fn new(kind: BTreeNodeType, height: u8, num_records: u16) -> Self {
        Self {
            forward_link: 0,
            backward_link: 0,
            kind,
            height,
            num_records,
            reserved: 0,
        }
    }
}

pub fn decode_node_descriptor(bytes: &[u8]) -> Result<BTreeNodeDescriptor> {
    let raw: RawNodeDescriptor = decode_fixed("node descriptor", bytes, BTreeNodeDescriptor::SIZE)?;
    let kind = BTreeNodeType::try_from(raw.kind)
        .map_err(|unknown| Error::unknown_value("node kind", BTreeNodeDescriptor::KIND_OFFSET, unknown))?;

    Ok(BTreeNodeDescriptor {
        forward_link: raw.forward_link,
        backward_link: raw.backward_link,
        kind,
        height: raw.height,
        num_records: raw.num_records,
        reserved: raw.reserved,
    })
}

pub fn encode_node_descriptor(descriptor: &BTreeNodeDescriptor) -> Result<Vec<u8>> {
    let raw = RawNodeDescriptor {
        forward_link: descriptor.forward_link,
        backward_link: descriptor.backward_link,
        kind: descriptor.kind.into(),
        height: descriptor.height,
        num_records: descriptor.num_records,
        reserved: descriptor.reserved,
    };
    encode_fixed("node descriptor", &raw)
}

/// BTree Header describing the shape of the tree. First record of node 0.
/// Defined as `struct BTHeaderRec` in TN1150 > Header Record.
#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "big")]
pub struct BTreeHeaderRecord {
    pub tree_depth: u16,
    pub root_node: u32,
    pub leaf_records: u32,
    pub first_leaf_node: u32,
    pub last_leaf_node: u32,
    pub node_size: u16,
    pub max_key_length: u16,
    pub total_nodes: u32,
    pub free_nodes: u32,
    pub reserved_1: u16,
    pub clump_size: u32,
    pub btree_type: u8,
    pub key_compare_type: u8,
    pub attributes: u32,
    pub reserved_3: [u32; 16],
}

impl BTreeHeaderRecord {
    pub const SIZE: usize = 106;

    pub const MIN_NODE_SIZE: u16 = 512;
    pub const MAX_NODE_SIZE: u16 = 32768;

    pub fn compare_type(&self) -> Result<BTreeKeyCompareType> {
        BTreeKeyCompareType::try_from(self.key_compare_type)
            .map_err(|unknown| Error::unknown_value("key compare type", 37, unknown))
    }
}

pub fn decode_bt_header_record(bytes: &[u8]) -> Result<BTreeHeaderRecord> {
    decode_fixed("header record", bytes, BTreeHeaderRecord::SIZE)
}

pub fn encode_bt_header_record(header: &BTreeHeaderRecord) -> Result<Vec<u8>> {
    encode_fixed("header record", header)
}

/// The second record of a header node is reserved, 128 bytes long.
pub const USER_DATA_RECORD_SIZE: usize = 128;

/// Split a raw node into its records using the offsets table at the end of the
/// node.
///
/// Offsets are stored in descending position: the last two bytes of the node
/// hold the start of record 0, and the entry closest to the records holds the
/// start of free space. Each returned slice runs from a record's start to the
/// next offset, which bounds but does not define the record; callers derive
/// the actual length from the record's own key.
pub fn decode_node_records<'a>(node: &'a [u8], descriptor: &BTreeNodeDescriptor) -> Result<Vec<&'a [u8]>> {
    let count = usize::from(descriptor.num_records);
    let table_len = 2 * (count + 1);
    if BTreeNodeDescriptor::SIZE + table_len > node.len() {
        return Err(Error::malformed_value(
            "record count",
            10,
            descriptor.num_records,
            format!("offsets table does not fit a {} byte node", node.len()),
        ));
    }
    let table_start = node.len() - table_len;

    let offsets = (0..=count)
        .map(|i| {
            let at = node.len() - 2 * (i + 1);
            (at, usize::from(u16::from_be_bytes([node[at], node[at + 1]])))
        })
        .collect::<Vec<_>>();

    if let Some(&(at, first)) = offsets.first() {
        if first < BTreeNodeDescriptor::SIZE {
            return Err(Error::malformed_value(
                "record offset",
                at,
                first as i64,
                "record overlaps the node descriptor",
            ));
        }
    }

    for ((_, start), (at, next)) in offsets.iter().copied().tuple_windows() {
        if next <= start {
            return Err(Error::malformed_value(
                "record offset",
                at,
                next as i64,
                format!("offsets table is not ascending after {start}"),
            ));
        }
    }

    if let Some(&(at, free)) = offsets.last() {
        if free > table_start {
            return Err(Error::malformed_value(
                "free space offset",
                at,
                free as i64,
                "records overlap the offsets table",
            ));
        }
    }

    Ok(offsets
        .iter()
        .tuple_windows()
        .map(|(&(_, start), &(_, end))| &node[start..end])
        .collect())
}

/// Lay out a node of `node_size` bytes holding `records` in order, writing the
/// offsets table at the end of the node. `num_records` of the descriptor is
/// taken from `records`.
pub fn encode_node(descriptor: &BTreeNodeDescriptor, records: &[Vec<u8>], node_size: usize) -> Result<Vec<u8>> {
    let count = u16::try_from(records.len())
        .map_err(|_| Error::malformed("record count", format!("{} records in one node", records.len())))?;

    let mut node = encode_node_descriptor(&BTreeNodeDescriptor {
        num_records: count,
        ..*descriptor
    })?;

    let mut offsets = Vec::with_capacity(records.len() + 1);
    for record in records {
        offsets.push(node.len());
        node.extend_from_slice(record);
    }
    offsets.push(node.len());

    let table_len = 2 * offsets.len();
    if node.len() + table_len > node_size {
        return Err(Error::malformed(
            "node",
            format!("{} bytes of records do not fit a {node_size} byte node", node.len()),
        ));
    }

    node.resize(node_size - table_len, 0);
    for offset in offsets.iter().rev() {
        node.extend_from_slice(&(*offset as u16).to_be_bytes());
    }
    Ok(node)
}
