//! Generic read-only B-tree engine shared by the catalog and extents overflow
//! files.
//!
//! A tree is a sequence of fixed-size nodes stored in a fork. Node 0 is the
//! header node; index nodes map the first key of each child to its node
//! number, and leaf nodes carry the records. The engine knows nothing about
//! key layout or ordering: both come from a [`TreeCodec`].

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use hfs_types_rs::BTreeNodeType;
use tracing::{debug, trace};

use crate::codec::{
    BTreeHeaderRecord, BTreeNodeDescriptor, ByteReader, decode_bt_header_record, decode_node_descriptor,
    decode_node_records,
};
use crate::error::{Error, Result, TreeKind};

/// Nodes visited by one descent before the tree is considered corrupt. Real
/// trees stay well below this.
pub const MAX_TREE_DEPTH: usize = 16;

/// Storage holding a tree's nodes, addressed by byte offset within the tree
/// file.
pub trait NodeSource: Send + Sync {
    /// Fill `buf` from `offset`. Reading past the end of the file is an error.
    fn read_node_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

impl<F> NodeSource for F
where
    F: Fn(u64, &mut [u8]) -> Result<()> + Send + Sync,
{
    fn read_node_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self(offset, buf)
    }
}

/// Key and payload interpretation for one kind of tree.
pub trait TreeCodec: Send + Sync {
    type Key: Clone + fmt::Debug;
    type Value: Clone + fmt::Debug;

    /// Tree named in error locations and log events.
    const TREE: TreeKind;

    /// Decode the key at the start of a record, returning it with the offset
    /// of the data that follows.
    fn decode_key(&self, record: &[u8]) -> Result<(Self::Key, usize)>;

    /// Decode the payload of a leaf record.
    fn decode_value(&self, payload: &[u8]) -> Result<Self::Value>;

    fn compare(&self, a: &Self::Key, b: &Self::Key) -> Ordering;
}

/// Pointer record of an index node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord<K> {
    pub key: K,
    pub child: u32,
}

/// Decoded record of a leaf node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafRecord<K, V> {
    pub key: K,
    pub data: V,
}

#[derive(Debug, Clone)]
pub enum NodeBody<K, V> {
    Header(BTreeHeaderRecord),
    /// Allocation map continuation. Not interpreted.
    Map,
    Index(Vec<IndexRecord<K>>),
    Leaf(Vec<LeafRecord<K, V>>),
}

#[derive(Debug, Clone)]
pub struct Node<K, V> {
    pub number: u32,
    pub descriptor: BTreeNodeDescriptor,
    pub body: NodeBody<K, V>,
}

pub type TreeNode<C> = Node<<C as TreeCodec>::Key, <C as TreeCodec>::Value>;
pub type TreeRecord<C> = LeafRecord<<C as TreeCodec>::Key, <C as TreeCodec>::Value>;

/// An opened B-tree. Every operation reads the nodes it needs afresh, so a
/// tree can be shared between threads.
pub struct BTree<C: TreeCodec> {
    source: Box<dyn NodeSource>,
    codec: C,
    header: BTreeHeaderRecord,
}

impl<C: TreeCodec> fmt::Debug for BTree<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BTree")
            .field("tree", &C::TREE)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl<C: TreeCodec> BTree<C> {
    /// Read and validate the header node, then build the codec from the header
    /// record.
    pub fn open<S, F>(source: S, make_codec: F) -> Result<Self>
    where
        S: NodeSource + 'static,
        F: FnOnce(&BTreeHeaderRecord) -> Result<C>,
    {
        let at_header = |e: Error| e.at_node(C::TREE, 0);

        // Node size is unknown until the header record is read, and no node is
        // smaller than this.
        let mut head = vec![0u8; usize::from(BTreeHeaderRecord::MIN_NODE_SIZE)];
        source.read_node_bytes(0, &mut head).map_err(at_header)?;

        let descriptor = decode_node_descriptor(&head).map_err(at_header)?;
        if descriptor.kind != BTreeNodeType::Header {
            return Err(at_header(Error::malformed_value(
                "node kind",
                BTreeNodeDescriptor::KIND_OFFSET,
                i8::from(descriptor.kind),
                "node 0 is not a header node",
            )));
        }

        let header = decode_bt_header_record(&head[BTreeNodeDescriptor::SIZE..]).map_err(at_header)?;
        let node_size = header.node_size;
        if !node_size.is_power_of_two()
            || !(BTreeHeaderRecord::MIN_NODE_SIZE..=BTreeHeaderRecord::MAX_NODE_SIZE).contains(&node_size)
        {
            return Err(at_header(Error::malformed_value(
                "node size",
                BTreeNodeDescriptor::SIZE + 18,
                node_size,
                "must be a power of two between 512 and 32768",
            )));
        }
        if header.root_node >= header.total_nodes && header.root_node != 0 {
            return Err(at_header(Error::malformed_value(
                "root node",
                BTreeNodeDescriptor::SIZE + 2,
                header.root_node,
                format!("tree has {} nodes", header.total_nodes),
            )));
        }

        let codec = make_codec(&header).map_err(at_header)?;
        debug!(
            tree = %C::TREE,
            node_size,
            depth = header.tree_depth,
            root = header.root_node,
            total_nodes = header.total_nodes,
            leaf_records = header.leaf_records,
            "btree_open"
        );

        Ok(Self {
            source: Box::new(source),
            codec,
            header,
        })
    }

    pub fn header(&self) -> &BTreeHeaderRecord {
        &self.header
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn node_size(&self) -> usize {
        usize::from(self.header.node_size)
    }

    /// Read and decode one node.
    pub fn node(&self, number: u32) -> Result<TreeNode<C>> {
        if number >= self.header.total_nodes {
            return Err(Error::malformed_value(
                "node number",
                0,
                number,
                format!("tree has {} nodes", self.header.total_nodes),
            )
            .in_tree(C::TREE));
        }

        let mut buf = vec![0u8; self.node_size()];
        let offset = u64::from(number) * self.node_size() as u64;
        self.source
            .read_node_bytes(offset, &mut buf)
            .and_then(|()| self.decode_node(number, &buf))
            .map_err(|e| e.at_node(C::TREE, number))
    }

    fn decode_node(&self, number: u32, buf: &[u8]) -> Result<TreeNode<C>> {
        let descriptor = decode_node_descriptor(buf)?;
        let records = decode_node_records(buf, &descriptor)?;

        let body = match descriptor.kind {
            BTreeNodeType::Header => NodeBody::Header(decode_bt_header_record(
                records.first().copied().unwrap_or_default(),
            )?),
            BTreeNodeType::Map => NodeBody::Map,
            BTreeNodeType::Index => NodeBody::Index(
                records
                    .iter()
                    .map(|record| {
                        let (key, data_offset) = self.codec.decode_key(record)?;
                        let child = ByteReader::at("index record", record, data_offset).u32()?;
                        Ok(IndexRecord { key, child })
                    })
                    .collect::<Result<_>>()?,
            ),
            BTreeNodeType::Leaf => NodeBody::Leaf(
                records
                    .iter()
                    .map(|record| {
                        let (key, data_offset) = self.codec.decode_key(record)?;
                        let payload = record.get(data_offset..).unwrap_or_default();
                        let data = self.codec.decode_value(payload)?;
                        Ok(LeafRecord { key, data })
                    })
                    .collect::<Result<_>>()?,
            ),
        };

        trace!(
            tree = %C::TREE,
            node = number,
            kind = ?descriptor.kind,
            height = descriptor.height,
            records = descriptor.num_records,
            "btree_node_read"
        );
        Ok(Node {
            number,
            descriptor,
            body,
        })
    }

    /// Find the leaf record whose key equals `key`.
    ///
    /// Each index level follows the largest key not greater than the search
    /// key. A search key smaller than every key in the root cannot be present.
    pub fn search(&self, key: &C::Key) -> Result<Option<TreeRecord<C>>> {
        let root = self.header.root_node;
        if root == 0 {
            return Ok(None);
        }

        let mut visited = Vec::with_capacity(usize::from(self.header.tree_depth));
        let mut number = root;
        loop {
            self.enter(&mut visited, number)?;
            let node = self.node(number)?;
            match node.body {
                NodeBody::Index(records) => {
                    let next = records
                        .iter()
                        .filter(|r| self.codec.compare(&r.key, key) != Ordering::Greater)
                        .max_by(|a, b| self.codec.compare(&a.key, &b.key));
                    let Some(next) = next else {
                        if number == root {
                            trace!(tree = %C::TREE, ?key, "btree_search_below_root");
                            return Ok(None);
                        }
                        return Err(Error::malformed(
                            "index record",
                            "no key at or below a key the parent routed here",
                        )
                        .at_node(C::TREE, number));
                    };
                    self.check_child(number, next.child)?;
                    number = next.child;
                }
                NodeBody::Leaf(records) => {
                    return Ok(records
                        .into_iter()
                        .find(|r| self.codec.compare(&r.key, key) == Ordering::Equal));
                }
                NodeBody::Header(_) | NodeBody::Map => {
                    return Err(unexpected_kind::<C>(number, node.descriptor.kind));
                }
            }
        }
    }

    /// Collect the leaf records with `min <= key < max` in key order, where a
    /// missing `max` means unbounded.
    ///
    /// At each index node the largest key below `min` is followed alongside
    /// every key inside the range, since the first matching records may live
    /// under a smaller separator.
    pub fn search_range(&self, min: &C::Key, max: Option<&C::Key>) -> Result<Vec<TreeRecord<C>>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        if self.header.root_node != 0 {
            self.collect_range(self.header.root_node, min, max, 1, &mut seen, &mut out)?;
        }
        trace!(tree = %C::TREE, ?min, ?max, found = out.len(), "btree_range");
        Ok(out)
    }

    fn in_range(&self, key: &C::Key, min: &C::Key, max: Option<&C::Key>) -> bool {
        self.codec.compare(key, min) != Ordering::Less
            && max.is_none_or(|max| self.codec.compare(key, max) == Ordering::Less)
    }

    fn collect_range(
        &self,
        number: u32,
        min: &C::Key,
        max: Option<&C::Key>,
        depth: usize,
        seen: &mut HashSet<u32>,
        out: &mut Vec<TreeRecord<C>>,
    ) -> Result<()> {
        if depth > MAX_TREE_DEPTH {
            return Err(too_deep::<C>(number));
        }

        let node = self.node(number)?;
        match node.body {
            NodeBody::Index(records) => {
                let below = records
                    .iter()
                    .filter(|r| self.codec.compare(&r.key, min) == Ordering::Less)
                    .max_by(|a, b| self.codec.compare(&a.key, &b.key));
                let within = records.iter().filter(|r| self.in_range(&r.key, min, max));
                for record in below.into_iter().chain(within) {
                    self.check_child(number, record.child)?;
                    // each node has one parent, so a second visit means shared subtrees
                    if !seen.insert(record.child) {
                        return Err(Error::malformed_value("child node", 0, record.child, "node reached twice")
                            .at_node(C::TREE, number));
                    }
                    self.collect_range(record.child, min, max, depth + 1, seen, out)?;
                }
                Ok(())
            }
            NodeBody::Leaf(records) => {
                out.extend(records.into_iter().filter(|r| self.in_range(&r.key, min, max)));
                Ok(())
            }
            NodeBody::Header(_) | NodeBody::Map => Err(unexpected_kind::<C>(number, node.descriptor.kind)),
        }
    }

    /// Every leaf record in key order, following the leaf chain from the first
    /// leaf node.
    pub fn leaf_records(&self) -> Result<Vec<TreeRecord<C>>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut number = self.header.first_leaf_node;

        while number != 0 {
            if !seen.insert(number) {
                return Err(Error::malformed_value(
                    "forward link",
                    0,
                    number,
                    "leaf chain revisits a node",
                )
                .in_tree(C::TREE));
            }
            let node = self.node(number)?;
            let next = node.descriptor.forward_link;
            match node.body {
                NodeBody::Leaf(records) => out.extend(records),
                _ => return Err(unexpected_kind::<C>(number, node.descriptor.kind)),
            }
            number = next;
        }

        Ok(out)
    }

    fn enter(&self, visited: &mut Vec<u32>, number: u32) -> Result<()> {
        if visited.contains(&number) {
            return Err(Error::malformed_value("child node", 0, number, "descent revisits a node").in_tree(C::TREE));
        }
        if visited.len() >= MAX_TREE_DEPTH {
            return Err(too_deep::<C>(number));
        }
        visited.push(number);
        Ok(())
    }

    fn check_child(&self, parent: u32, child: u32) -> Result<()> {
        if child == 0 || child >= self.header.total_nodes {
            return Err(Error::malformed_value(
                "child node",
                0,
                child,
                format!("tree has {} nodes", self.header.total_nodes),
            )
            .at_node(C::TREE, parent));
        }
        Ok(())
    }
}

fn unexpected_kind<C: TreeCodec>(number: u32, kind: BTreeNodeType) -> Error {
    Error::malformed_value(
        "node kind",
        BTreeNodeDescriptor::KIND_OFFSET,
        i8::from(kind),
        format!("{kind:?} node reached during traversal"),
    )
    .at_node(C::TREE, number)
}

fn too_deep<C: TreeCodec>(number: u32) -> Error {
    Error::malformed(
        "tree depth",
        format!("descent exceeds {MAX_TREE_DEPTH} levels"),
    )
    .at_node(C::TREE, number)
}
