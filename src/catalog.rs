//! The catalog file: the volume namespace, keyed by parent id and name.

use std::cmp::Ordering;
use std::collections::HashSet;

use hfs_types_rs::{BTreeKeyCompareType, CatalogNodeId, SpecialFileCatalogNodeId, VolumeSignature};
use tracing::debug;

use crate::btree::{BTree, LeafRecord, NodeSource, TreeCodec};
use crate::codec::{
    BTreeHeaderRecord, CatalogFile, CatalogFolder, CatalogKey, CatalogRecord, UnicodeName, decode_catalog_key,
    decode_catalog_record,
};
use crate::error::{Error, Result, TreeKind};
use crate::unicode::Collation;

/// A catalog leaf record: its key and decoded payload.
pub type CatalogEntry = LeafRecord<CatalogKey, CatalogRecord>;

impl CatalogEntry {
    pub fn parent_id(&self) -> CatalogNodeId {
        self.key.parent_id
    }

    pub fn name(&self) -> &UnicodeName {
        &self.key.name
    }

    /// Id of the folder or file, `None` for thread records.
    pub fn id(&self) -> Option<CatalogNodeId> {
        self.data.id()
    }

    pub fn as_folder(&self) -> Option<&CatalogFolder> {
        self.data.as_folder()
    }

    pub fn as_file(&self) -> Option<&CatalogFile> {
        self.data.as_file()
    }
}

/// Catalog key ordering: parent id, then name under the volume's collation.
pub fn compare_catalog_keys(collation: Collation, a: &CatalogKey, b: &CatalogKey) -> Ordering {
    a.parent_id
        .cmp(&b.parent_id)
        .then_with(|| collation.compare(a.name.units(), b.name.units()))
}

/// Collation of a catalog. HFS Plus always folds case; HFSX declares its
/// choice in the header record.
pub fn resolve_collation(signature: VolumeSignature, header: &BTreeHeaderRecord) -> Result<Collation> {
    match signature {
        VolumeSignature::HfsPlus => Ok(Collation::CaseFolding),
        VolumeSignature::HfsX => match header.compare_type()? {
            BTreeKeyCompareType::CaseFolding => Ok(Collation::CaseFolding),
            BTreeKeyCompareType::BinaryCompare => Ok(Collation::Binary),
            BTreeKeyCompareType::Unspecified => Err(Error::malformed_value(
                "key compare type",
                37,
                header.key_compare_type,
                "HFSX catalog does not declare a collation",
            )),
        },
        VolumeSignature::Hfs | VolumeSignature::Mfs => Err(Error::malformed_value(
            "signature",
            0,
            u16::from(signature),
            "not an HFS Plus catalog",
        )),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CatalogCodec {
    pub collation: Collation,
}

impl TreeCodec for CatalogCodec {
    type Key = CatalogKey;
    type Value = CatalogRecord;

    const TREE: TreeKind = TreeKind::Catalog;

    fn decode_key(&self, record: &[u8]) -> Result<(CatalogKey, usize)> {
        decode_catalog_key(record)
    }

    fn decode_value(&self, payload: &[u8]) -> Result<CatalogRecord> {
        decode_catalog_record(payload)
    }

    fn compare(&self, a: &CatalogKey, b: &CatalogKey) -> Ordering {
        compare_catalog_keys(self.collation, a, b)
    }
}

const ROOT_PARENT: CatalogNodeId = SpecialFileCatalogNodeId::RootParent as CatalogNodeId;
pub(crate) const ROOT_FOLDER: CatalogNodeId = SpecialFileCatalogNodeId::RootFolder as CatalogNodeId;

/// Folder under the root holding the `iNode<N>` targets of file hard links.
pub const FILE_LINK_FOLDER: &str = "\0\0\0\0HFS+ Private Data";
/// Folder under the root holding the `dir_<N>` targets of directory hard
/// links.
pub const DIRECTORY_LINK_FOLDER: &str = ".HFS+ Private Directory Data\r";

#[derive(Debug)]
pub struct Catalog {
    tree: BTree<CatalogCodec>,
}

impl Catalog {
    pub fn open(source: impl NodeSource + 'static, signature: VolumeSignature) -> Result<Self> {
        let tree = BTree::open(source, |header| {
            Ok(CatalogCodec {
                collation: resolve_collation(signature, header)?,
            })
        })?;
        Ok(Self { tree })
    }

    pub fn tree(&self) -> &BTree<CatalogCodec> {
        &self.tree
    }

    pub fn collation(&self) -> Collation {
        self.tree.codec().collation
    }

    /// Record stored under `(parent_id, name)`.
    pub fn get(&self, parent_id: CatalogNodeId, name: impl Into<UnicodeName>) -> Result<Option<CatalogEntry>> {
        self.tree.search(&CatalogKey::new(parent_id, name))
    }

    /// Parent id and name of the folder or file `id`, read from its thread
    /// record.
    pub fn resolve_id_to_key(&self, id: CatalogNodeId) -> Result<Option<CatalogKey>> {
        let Some(entry) = self.tree.search(&CatalogKey::thread(id))? else {
            return Ok(None);
        };
        match entry.data.as_thread() {
            Some(thread) => Ok(Some(thread.target_key())),
            None => Err(Error::malformed_value(
                "record type",
                0,
                i16::from(entry.data.record_type()),
                format!("thread key of {id} holds a non-thread record"),
            )
            .in_tree(TreeKind::Catalog)),
        }
    }

    /// Folder or file record of `id`.
    pub fn lookup_id(&self, id: CatalogNodeId) -> Result<Option<CatalogEntry>> {
        let Some(key) = self.resolve_id_to_key(id)? else {
            return Ok(None);
        };
        self.thread_target(id, &key).map(Some)
    }

    fn thread_target(&self, id: CatalogNodeId, key: &CatalogKey) -> Result<CatalogEntry> {
        match self.tree.search(key)? {
            Some(entry) if entry.id() == Some(id) => Ok(entry),
            Some(entry) => Err(Error::malformed_value(
                "thread record",
                0,
                entry.id().unwrap_or_default(),
                format!("thread of {id} points at another record"),
            )
            .in_tree(TreeKind::Catalog)),
            None => Err(Error::malformed_value(
                "thread record",
                0,
                id,
                format!("thread points at missing record ({}, {:?})", key.parent_id, key.name.to_string_lossy()),
            )
            .in_tree(TreeKind::Catalog)),
        }
    }

    /// The root folder record. Found through its thread when present,
    /// otherwise by scanning the children of the root parent.
    pub fn get_root(&self) -> Result<CatalogEntry> {
        if let Some(key) = self.resolve_id_to_key(ROOT_FOLDER)? {
            return self.thread_target(ROOT_FOLDER, &key);
        }

        debug!("catalog_root_thread_missing");
        self.list_children(ROOT_PARENT)?
            .into_iter()
            .find(|entry| entry.id() == Some(ROOT_FOLDER))
            .ok_or_else(|| Error::malformed("root folder", "no record for the root folder").in_tree(TreeKind::Catalog))
    }

    /// Folders and files directly inside `folder_id`, in catalog order.
    pub fn list_children(&self, folder_id: CatalogNodeId) -> Result<Vec<CatalogEntry>> {
        let min = CatalogKey::thread(folder_id);
        let max = folder_id.checked_add(1).map(CatalogKey::thread);
        let children = self
            .tree
            .search_range(&min, max.as_ref())?
            .into_iter()
            .filter(|entry| entry.key.parent_id == folder_id && !entry.data.is_thread())
            .collect::<Vec<_>>();
        debug!(folder_id, children = children.len(), "catalog_list");
        Ok(children)
    }

    /// Every entry from the root folder down to `entry`, inclusive.
    pub fn path_to(&self, entry: &CatalogEntry) -> Result<Vec<CatalogEntry>> {
        let mut path = vec![entry.clone()];
        let mut seen = HashSet::new();
        let mut parent = entry.key.parent_id;

        while parent != ROOT_PARENT {
            if !seen.insert(parent) {
                return Err(Error::malformed_value("parent id", 0, parent, "parent chain loops")
                    .in_tree(TreeKind::Catalog));
            }
            let Some(key) = self.resolve_id_to_key(parent)? else {
                return Err(Error::malformed_value(
                    "thread record",
                    0,
                    parent,
                    "folder on the path has no thread record",
                )
                .in_tree(TreeKind::Catalog));
            };
            let folder = self.thread_target(parent, &key)?;
            parent = folder.key.parent_id;
            path.push(folder);
        }

        path.reverse();
        Ok(path)
    }
}
