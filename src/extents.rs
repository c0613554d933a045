//! The extents overflow file, holding the extents of forks that do not fit in
//! the eight inline descriptors of their catalog record.

use std::cmp::Ordering;

use hfs_types_rs::{CatalogNodeId, ForkType};
use tracing::trace;

use crate::btree::{BTree, LeafRecord, NodeSource, TreeCodec};
use crate::codec::{ExtentKey, ExtentRecord, decode_extent_key, decode_extent_record};
use crate::error::{Result, TreeKind};

pub type ExtentOverflowRecord = LeafRecord<ExtentKey, ExtentRecord>;

/// Extent key ordering: file id, fork type, then start block.
pub fn compare_extent_keys(a: &ExtentKey, b: &ExtentKey) -> Ordering {
    a.file_id
        .cmp(&b.file_id)
        .then(a.fork_type.cmp(&b.fork_type))
        .then(a.start_block.cmp(&b.start_block))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtentsCodec;

impl TreeCodec for ExtentsCodec {
    type Key = ExtentKey;
    type Value = ExtentRecord;

    const TREE: TreeKind = TreeKind::ExtentsOverflow;

    fn decode_key(&self, record: &[u8]) -> Result<(ExtentKey, usize)> {
        decode_extent_key(record)
    }

    fn decode_value(&self, payload: &[u8]) -> Result<ExtentRecord> {
        decode_extent_record(payload)
    }

    fn compare(&self, a: &ExtentKey, b: &ExtentKey) -> Ordering {
        compare_extent_keys(a, b)
    }
}

#[derive(Debug)]
pub struct ExtentsOverflow {
    tree: BTree<ExtentsCodec>,
}

impl ExtentsOverflow {
    pub fn open(source: impl NodeSource + 'static) -> Result<Self> {
        Ok(Self {
            tree: BTree::open(source, |_| Ok(ExtentsCodec))?,
        })
    }

    pub fn tree(&self) -> &BTree<ExtentsCodec> {
        &self.tree
    }

    /// Overflow record of a fork starting at fork-relative block
    /// `start_block`.
    pub fn lookup(
        &self,
        fork_type: ForkType,
        file_id: CatalogNodeId,
        start_block: u32,
    ) -> Result<Option<ExtentOverflowRecord>> {
        let found = self.tree.search(&ExtentKey::new(fork_type, file_id, start_block))?;
        trace!(%fork_type, file_id, start_block, found = found.is_some(), "extents_lookup");
        Ok(found)
    }

    /// All overflow records of one fork, in start block order.
    pub fn fork_records(&self, fork_type: ForkType, file_id: CatalogNodeId) -> Result<Vec<ExtentOverflowRecord>> {
        let min = ExtentKey::new(fork_type, file_id, 0);
        let max = match fork_type {
            ForkType::Data => Some(ExtentKey::new(ForkType::Resource, file_id, 0)),
            ForkType::Resource => file_id
                .checked_add(1)
                .map(|next| ExtentKey::new(ForkType::Data, next, 0)),
        };
        self.tree.search_range(&min, max.as_ref())
    }
}
