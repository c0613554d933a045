//! Synthetic B-trees and volume images for tests.

use hfs_types_rs::{
    BTreeAttributeMask, BTreeKeyCompareType, BTreeNodeType, BTreeType, ForkType, VolumeAttributeMask,
    VolumeSignature, VolumeVersion, WellKnownFileType,
};

use crate::catalog::{DIRECTORY_LINK_FOLDER, FILE_LINK_FOLDER};
use crate::codec::*;

/// Key bytes and payload bytes of one leaf record.
pub(crate) type RawRecord = (Vec<u8>, Vec<u8>);

#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeShape {
    pub node_size: usize,
    /// Index records per index node.
    pub fanout: usize,
    pub max_key_length: u16,
    pub compare_type: u8,
    pub attributes: u32,
}

impl TreeShape {
    pub(crate) fn catalog(compare_type: BTreeKeyCompareType) -> Self {
        Self {
            node_size: 4096,
            fanout: 2,
            max_key_length: 516,
            compare_type: compare_type.into(),
            attributes: BTreeAttributeMask::BigKeys as u32 | BTreeAttributeMask::VariableIndexKeys as u32,
        }
    }

    pub(crate) fn extents() -> Self {
        Self {
            node_size: 512,
            fanout: 8,
            max_key_length: ExtentKey::KEY_LENGTH,
            compare_type: 0,
            attributes: BTreeAttributeMask::BigKeys as u32,
        }
    }
}

fn linked(kind: BTreeNodeType, height: u8, number: usize, first: usize, last: usize) -> BTreeNodeDescriptor {
    BTreeNodeDescriptor {
        forward_link: if number < last { number as u32 + 1 } else { 0 },
        backward_link: if number > first { number as u32 - 1 } else { 0 },
        ..BTreeNodeDescriptor::new(kind, height, 0)
    }
}

/// Lay out a tree file: node 0 is the header node, the given leaves follow in
/// order, then each index level bottom-up with the root last. Index records
/// carry the first key of their child.
pub(crate) fn build_tree(shape: &TreeShape, leaves: &[Vec<RawRecord>]) -> Vec<u8> {
    let mut nodes = vec![Vec::new()];
    let mut level = Vec::new();
    let mut leaf_records = 0;

    for records in leaves {
        let number = nodes.len();
        let descriptor = linked(BTreeNodeType::Leaf, 1, number, 1, leaves.len());
        let encoded = records.iter().map(|(key, payload)| [&key[..], &payload[..]].concat()).collect::<Vec<_>>();
        nodes.push(encode_node(&descriptor, &encoded, shape.node_size).unwrap());
        level.push((records[0].0.clone(), number as u32));
        leaf_records += records.len();
    }

    let mut height = 1u8;
    while level.len() > 1 {
        height += 1;
        let first = nodes.len();
        let last = first + level.len().div_ceil(shape.fanout) - 1;
        let mut next = Vec::new();
        for group in level.chunks(shape.fanout) {
            let number = nodes.len();
            let descriptor = linked(BTreeNodeType::Index, height, number, first, last);
            let encoded = group
                .iter()
                .map(|(key, child)| [&key[..], &child.to_be_bytes()[..]].concat())
                .collect::<Vec<_>>();
            nodes.push(encode_node(&descriptor, &encoded, shape.node_size).unwrap());
            next.push((group[0].0.clone(), number as u32));
        }
        level = next;
    }

    let header = BTreeHeaderRecord {
        tree_depth: if leaves.is_empty() { 0 } else { u16::from(height) },
        root_node: level.first().map_or(0, |(_, number)| *number),
        leaf_records: leaf_records as u32,
        first_leaf_node: if leaves.is_empty() { 0 } else { 1 },
        last_leaf_node: leaves.len() as u32,
        node_size: shape.node_size as u16,
        max_key_length: shape.max_key_length,
        total_nodes: nodes.len() as u32,
        free_nodes: 0,
        btree_type: BTreeType::Hfs as u8,
        key_compare_type: shape.compare_type,
        attributes: shape.attributes,
        ..Default::default()
    };
    let map_size = shape.node_size - BTreeNodeDescriptor::SIZE - BTreeHeaderRecord::SIZE - USER_DATA_RECORD_SIZE - 8;
    nodes[0] = encode_node(
        &BTreeNodeDescriptor::new(BTreeNodeType::Header, 0, 0),
        &[
            encode_bt_header_record(&header).unwrap(),
            vec![0; USER_DATA_RECORD_SIZE],
            vec![0; map_size],
        ],
        shape.node_size,
    )
    .unwrap();

    nodes.concat()
}

pub(crate) fn catalog_record(key: CatalogKey, record: CatalogRecord) -> RawRecord {
    (encode_catalog_key(&key).unwrap(), encode_catalog_record(&record).unwrap())
}

pub(crate) fn folder(parent: u32, name: &str, id: u32, valence: u32) -> RawRecord {
    catalog_record(
        CatalogKey::new(parent, name),
        CatalogRecord::Folder(CatalogFolder {
            folder_id: id,
            valence,
            ..Default::default()
        }),
    )
}

pub(crate) fn file(parent: u32, name: &str, id: u32, data: ForkData, resource: ForkData) -> RawRecord {
    catalog_record(
        CatalogKey::new(parent, name),
        CatalogRecord::File(CatalogFile {
            file_id: id,
            data_fork: data,
            resource_fork: resource,
            ..Default::default()
        }),
    )
}

pub(crate) fn thread(id: u32, folder: bool, parent: u32, name: &str) -> RawRecord {
    let thread = CatalogThread {
        parent_id: parent,
        name: UnicodeName::from(name),
    };
    catalog_record(
        CatalogKey::thread(id),
        if folder {
            CatalogRecord::FolderThread(thread)
        } else {
            CatalogRecord::FileThread(thread)
        },
    )
}

/// A file or directory hard link to inode `inode`.
pub(crate) fn hard_link(parent: u32, name: &str, id: u32, kind: WellKnownFileType, inode: u32) -> RawRecord {
    let (file_type, file_creator) = match kind {
        WellKnownFileType::HardLink => (WellKnownFileType::HARD_LINK_TYPE, WellKnownFileType::HARD_LINK_CREATOR),
        WellKnownFileType::DirectoryHardLink => (
            WellKnownFileType::DIRECTORY_HARD_LINK_TYPE,
            WellKnownFileType::DIRECTORY_HARD_LINK_CREATOR,
        ),
        WellKnownFileType::SymbolicLink => {
            (WellKnownFileType::SYMBOLIC_LINK_TYPE, WellKnownFileType::SYMBOLIC_LINK_CREATOR)
        }
    };
    catalog_record(
        CatalogKey::new(parent, name),
        CatalogRecord::File(CatalogFile {
            file_id: id,
            permissions: BsdInfo {
                special: inode,
                ..Default::default()
            },
            user_info: FileInfo {
                file_type,
                file_creator,
                ..Default::default()
            },
            ..Default::default()
        }),
    )
}

pub(crate) fn fork(logical_size: u64, extents: &[ExtentDescriptor]) -> ForkData {
    let mut fork = ForkData {
        logical_size,
        total_blocks: extents.iter().map(|e| e.block_count).sum(),
        ..Default::default()
    };
    fork.extents[..extents.len()].copy_from_slice(extents);
    fork
}

pub(crate) const VOLUME_NAME: &str = "Macintosh HD";
pub(crate) const BLOCK_SIZE: u32 = 512;
pub(crate) const TOTAL_BLOCKS: u32 = 140;

pub(crate) const DOCUMENTS_ID: u32 = 16;
pub(crate) const A_TXT_ID: u32 = 17;
pub(crate) const B_TXT_ID: u32 = 18;
pub(crate) const C_ID: u32 = 19;
/// File inside `c` whose on-disk name contains a slash.
pub(crate) const SLASH_ID: u32 = 20;
pub(crate) const SLASH_NAME: &str = "x/y";

pub(crate) const A_TXT_SIZE: u64 = 5000;
pub(crate) const B_TXT_DATA: &[u8] = b"hello, world";
pub(crate) const B_TXT_RESOURCE: &[u8] = b"rsrc";

/// a.txt: two inline extents of 4 and 2 blocks, the remaining 4 blocks in the
/// extents overflow file.
pub(crate) fn a_txt_fork() -> ForkData {
    fork(A_TXT_SIZE, &[ExtentDescriptor::new(100, 4), ExtentDescriptor::new(110, 2)])
}

pub(crate) const A_TXT_OVERFLOW: ExtentDescriptor = ExtentDescriptor::new(120, 4);

/// Byte stored at a logical position of a.txt.
pub(crate) fn a_txt_byte(position: u64) -> u8 {
    (position % 251) as u8
}

/// Catalog leaves of the test volume, three leaf nodes. The three children of
/// folder 16 span the second and third leaf.
pub(crate) fn catalog_leaves() -> Vec<Vec<RawRecord>> {
    let b_txt_data = fork(B_TXT_DATA.len() as u64, &[ExtentDescriptor::new(130, 1)]);
    let b_txt_resource = fork(B_TXT_RESOURCE.len() as u64, &[ExtentDescriptor::new(131, 1)]);
    vec![
        vec![
            folder(1, VOLUME_NAME, 2, 1),
            thread(2, true, 1, VOLUME_NAME),
            folder(2, "Documents", DOCUMENTS_ID, 3),
        ],
        vec![
            thread(DOCUMENTS_ID, true, 2, "Documents"),
            file(DOCUMENTS_ID, "a.txt", A_TXT_ID, a_txt_fork(), ForkData::default()),
        ],
        vec![
            file(DOCUMENTS_ID, "b.txt", B_TXT_ID, b_txt_data, b_txt_resource),
            folder(DOCUMENTS_ID, "c", C_ID, 1),
            thread(A_TXT_ID, false, DOCUMENTS_ID, "a.txt"),
            thread(B_TXT_ID, false, DOCUMENTS_ID, "b.txt"),
            thread(C_ID, true, DOCUMENTS_ID, "c"),
            file(C_ID, SLASH_NAME, SLASH_ID, ForkData::default(), ForkData::default()),
            thread(SLASH_ID, false, C_ID, SLASH_NAME),
        ],
    ]
}

/// Node numbers of the catalog built from [`catalog_leaves`].
pub(crate) const CATALOG_ROOT_NODE: u32 = 6;
pub(crate) const CATALOG_NODES: u32 = 7;

pub(crate) fn catalog_tree(compare_type: BTreeKeyCompareType) -> Vec<u8> {
    build_tree(&TreeShape::catalog(compare_type), &catalog_leaves())
}

pub(crate) const FILE_LINK_DIR_ID: u32 = 21;
pub(crate) const INODE_ID: u32 = 22;
pub(crate) const DIR_LINK_DIR_ID: u32 = 23;
pub(crate) const DIR_INODE_ID: u32 = 24;
/// Hard link `Documents/link` to inode 22.
pub(crate) const LINK_ID: u32 = 25;
/// Directory hard link `Documents/dlink` to folder `dir_24`.
pub(crate) const DIR_LINK_ID: u32 = 26;
/// File `inner` inside `dir_24`.
pub(crate) const INNER_ID: u32 = 27;
/// Folder named like a file inode in the file link folder.
pub(crate) const FOLDER_INODE_ID: u32 = 30;
pub(crate) const LINKED_DATA: &[u8] = b"one file, two names";

/// Catalog leaves of [`catalog_leaves`] plus the two private link folders
/// under the root and one link of each kind in `Documents`. The root's
/// children are ordered under the given collation.
pub(crate) fn link_catalog_leaves(compare_type: BTreeKeyCompareType) -> Vec<Vec<RawRecord>> {
    let mut leaves = catalog_leaves();

    let documents = folder(2, "Documents", DOCUMENTS_ID, 5);
    let files = folder(2, FILE_LINK_FOLDER, FILE_LINK_DIR_ID, 2);
    let dirs = folder(2, DIRECTORY_LINK_FOLDER, DIR_LINK_DIR_ID, 1);
    // NUL sorts first in binary order and last when folding case
    let root_children = match compare_type {
        BTreeKeyCompareType::BinaryCompare => [files, dirs, documents],
        _ => [dirs, documents, files],
    };
    leaves[0] = [folder(1, VOLUME_NAME, 2, 3), thread(2, true, 1, VOLUME_NAME)]
        .into_iter()
        .chain(root_children)
        .collect();

    let inode_name = format!("iNode{INODE_ID}");
    let dir_name = format!("dir_{DIR_INODE_ID}");
    let misplaced_name = format!("iNode{FOLDER_INODE_ID}");
    let linked = fork(LINKED_DATA.len() as u64, &[ExtentDescriptor::new(132, 1)]);
    // after b.txt and c
    leaves[2].insert(
        2,
        hard_link(DOCUMENTS_ID, "dlink", DIR_LINK_ID, WellKnownFileType::DirectoryHardLink, DIR_INODE_ID),
    );
    leaves[2].insert(3, hard_link(DOCUMENTS_ID, "link", LINK_ID, WellKnownFileType::HardLink, INODE_ID));
    leaves[2].extend([
        thread(FILE_LINK_DIR_ID, true, 2, FILE_LINK_FOLDER),
        file(FILE_LINK_DIR_ID, &inode_name, INODE_ID, linked, ForkData::default()),
        folder(FILE_LINK_DIR_ID, &misplaced_name, FOLDER_INODE_ID, 0),
        thread(INODE_ID, false, FILE_LINK_DIR_ID, &inode_name),
        thread(DIR_LINK_DIR_ID, true, 2, DIRECTORY_LINK_FOLDER),
        folder(DIR_LINK_DIR_ID, &dir_name, DIR_INODE_ID, 1),
        thread(DIR_INODE_ID, true, DIR_LINK_DIR_ID, &dir_name),
        file(DIR_INODE_ID, "inner", INNER_ID, ForkData::default(), ForkData::default()),
        thread(LINK_ID, false, DOCUMENTS_ID, "link"),
        thread(DIR_LINK_ID, false, DOCUMENTS_ID, "dlink"),
        thread(INNER_ID, false, DIR_INODE_ID, "inner"),
        thread(FOLDER_INODE_ID, true, FILE_LINK_DIR_ID, &misplaced_name),
    ]);
    leaves
}

pub(crate) fn extents_tree() -> Vec<u8> {
    let mut record = ExtentRecord::default();
    record[0] = A_TXT_OVERFLOW;
    build_tree(
        &TreeShape::extents(),
        &[vec![(
            encode_extent_key(&ExtentKey::new(ForkType::Data, A_TXT_ID, 6)),
            encode_extent_record(&record),
        )]],
    )
}

/// A complete volume image with its layout.
pub(crate) struct TestVolume {
    pub image: Vec<u8>,
    pub catalog_extents: Vec<ExtentDescriptor>,
}

impl TestVolume {
    /// Physical offset of a catalog node inside the image.
    pub(crate) fn catalog_node_offset(&self, node: u32) -> usize {
        let mut logical = u64::from(node) * 4096;
        for extent in &self.catalog_extents {
            let len = u64::from(extent.block_count) * u64::from(BLOCK_SIZE);
            if logical < len {
                return (u64::from(extent.start_block) * u64::from(BLOCK_SIZE) + logical) as usize;
            }
            logical -= len;
        }
        panic!("catalog node {node} outside the catalog extents");
    }

    /// Overwrite the kind byte of a catalog node.
    pub(crate) fn corrupt_catalog_node_kind(&mut self, node: u32, kind: u8) {
        let at = self.catalog_node_offset(node) + BTreeNodeDescriptor::KIND_OFFSET;
        self.image[at] = kind;
    }
}

fn write_blocks(image: &mut [u8], start_block: u32, data: &[u8]) {
    let at = (start_block * BLOCK_SIZE) as usize;
    image[at..at + data.len()].copy_from_slice(data);
}

/// Build the test volume. `signature` selects HFS Plus or HFSX; the catalog
/// compare type is written as given.
pub(crate) fn test_volume(signature: VolumeSignature, compare_type: BTreeKeyCompareType) -> TestVolume {
    volume_with_catalog(signature, catalog_tree(compare_type))
}

/// The test volume with the hard link records of [`link_catalog_leaves`]
/// and the shared inode's data at block 132.
pub(crate) fn link_volume(signature: VolumeSignature, compare_type: BTreeKeyCompareType) -> TestVolume {
    let catalog = build_tree(&TreeShape::catalog(compare_type), &link_catalog_leaves(compare_type));
    let mut volume = volume_with_catalog(signature, catalog);
    write_blocks(&mut volume.image, 132, LINKED_DATA);
    volume
}

fn volume_with_catalog(signature: VolumeSignature, catalog: Vec<u8>) -> TestVolume {
    let mut image = vec![0u8; (TOTAL_BLOCKS * BLOCK_SIZE) as usize];

    let extents = extents_tree();
    assert_eq!(extents.len(), 1024);
    write_blocks(&mut image, 4, &extents);

    assert_eq!(catalog.len(), CATALOG_NODES as usize * 4096);
    let catalog_extents = vec![ExtentDescriptor::new(8, 28), ExtentDescriptor::new(48, 28)];
    let half = catalog.len() / 2;
    write_blocks(&mut image, 8, &catalog[..half]);
    write_blocks(&mut image, 48, &catalog[half..]);

    let a_txt = (0..A_TXT_SIZE).map(a_txt_byte).collect::<Vec<_>>();
    write_blocks(&mut image, 100, &a_txt[..2048]);
    write_blocks(&mut image, 110, &a_txt[2048..3072]);
    write_blocks(&mut image, 120, &a_txt[3072..]);
    write_blocks(&mut image, 130, B_TXT_DATA);
    write_blocks(&mut image, 131, B_TXT_RESOURCE);

    let header = VolumeHeader {
        signature: signature.into(),
        version: match signature {
            VolumeSignature::HfsX => VolumeVersion::HfsX as u16,
            _ => VolumeVersion::HfsPlus as u16,
        },
        attributes: VolumeAttributeMask::Unmounted as u32,
        file_count: 3,
        folder_count: 2,
        block_size: BLOCK_SIZE,
        total_blocks: TOTAL_BLOCKS,
        free_blocks: 4,
        next_catalog_id: 21,
        extents_file: fork(1024, &[ExtentDescriptor::new(4, 2)]),
        catalog_file: fork(catalog.len() as u64, &catalog_extents),
        ..Default::default()
    };
    let header = encode_volume_header(&header).unwrap();
    image[1024..1024 + header.len()].copy_from_slice(&header);

    TestVolume { image, catalog_extents }
}
