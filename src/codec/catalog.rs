use deku::ctx::Endian;
use deku::prelude::*;
use hfs_types_rs::{
    CatalogFileFlag, CatalogNodeId, CatalogRecordType, DateTime, FinderFlags, ForkType, OsType,
    WellKnownFileType,
};

use super::{ByteReader, ForkData, UnicodeName, decode_fixed, encode_fixed, read_unicode_name, write_unicode_name};
use crate::error::{Error, Result};

/// Key of every catalog record. Defined as `struct HFSPlusCatalogKey` in
/// TN1150 > Catalog File Key.
///
/// Thread records are keyed by the node's own id and an empty name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CatalogKey {
    pub parent_id: CatalogNodeId,
    pub name: UnicodeName,
}

impl CatalogKey {
    /// Key length of a key with an empty name, not counting the length field.
    pub const MIN_KEY_LENGTH: u16 = 6;

    pub fn new(parent_id: CatalogNodeId, name: impl Into<UnicodeName>) -> Self {
        Self {
            parent_id,
            name: name.into(),
        }
    }

    /// Key under which the thread record of `id` is stored.
    pub fn thread(id: CatalogNodeId) -> Self {
        Self {
            parent_id: id,
            name: UnicodeName::empty(),
        }
    }
}

/// Decode a catalog key from the start of a record.
///
/// Returns the key and the offset of the data that follows it, which is the
/// key length rounded up to an even offset.
pub fn decode_catalog_key(bytes: &[u8]) -> Result<(CatalogKey, usize)> {
    let mut reader = ByteReader::new("catalog key", bytes);
    let key_length = reader.u16()?;
    if key_length < CatalogKey::MIN_KEY_LENGTH {
        return Err(Error::malformed_value(
            "key length",
            0,
            key_length,
            "shorter than a parent id and name length",
        ));
    }

    let parent_id = reader.u32()?;
    let name = read_unicode_name(&mut reader)?;

    let end = 2 + usize::from(key_length);
    if reader.position() > end {
        return Err(Error::malformed_value(
            "key length",
            0,
            key_length,
            format!("name of {} code units does not fit the key", name.len()),
        ));
    }

    Ok((CatalogKey { parent_id, name }, end + end % 2))
}

pub fn encode_catalog_key(key: &CatalogKey) -> Result<Vec<u8>> {
    let key_length = CatalogKey::MIN_KEY_LENGTH as usize + 2 * key.name.len();
    let mut out = Vec::with_capacity(2 + key_length);
    out.extend_from_slice(&(key_length as u16).to_be_bytes());
    out.extend_from_slice(&key.parent_id.to_be_bytes());
    write_unicode_name(&mut out, &key.name)?;
    Ok(out)
}

/// File and Folder permissions. Defined as `struct HFSPlusBSDInfo` in
/// TN1150 > HFS Plus Permissions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct BsdInfo {
    pub owner_id: u32,
    pub group_id: u32,
    pub admin_flags: u8,
    pub owner_flags: u8,
    pub file_mode: u16,
    /// Inode number, link count or raw device, depending on the file.
    pub special: u32,
}

/// A location on screen, used to store window placement.
/// Defined in TN1150 > Finder Info.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct Point {
    pub v: i16,
    pub h: i16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct Rect {
    pub top: i16,
    pub left: i16,
    pub bottom: i16,
    pub right: i16,
}

/// Presentation info for Finder.
/// Defined in TN1150 > Finder Info.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct FileInfo {
    pub file_type: OsType,
    pub file_creator: OsType,
    pub finder_flags: u16,
    pub location: Point,
    pub reserved: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct ExtendedFileInfo {
    pub reserved_1: [i16; 4],
    pub extended_finder_flags: u16,
    pub reserved_2: i16,
    pub put_away_folder_id: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct FolderInfo {
    pub window_bounds: Rect,
    pub finder_flags: u16,
    pub location: Point,
    pub reserved: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct ExtendedFolderInfo {
    pub scroll_position: Point,
    pub reserved_1: i32,
    pub extended_finder_flags: u16,
    pub reserved_2: i16,
    pub put_away_folder_id: i32,
}

/// Folder record, following the record type. Defined as
/// `struct HFSPlusCatalogFolder` in TN1150 > Catalog Folder Records.
#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct CatalogFolder {
    pub flags: u16,
    /// Number of files and folders directly contained by this folder.
    pub valence: u32,
    pub folder_id: CatalogNodeId,
    pub create_date: DateTime,
    pub content_mod_date: DateTime,
    pub attribute_mod_date: DateTime,
    pub access_date: DateTime,
    pub backup_date: DateTime,
    pub permissions: BsdInfo,
    pub user_info: FolderInfo,
    pub finder_info: ExtendedFolderInfo,
    pub text_encoding: u32,
    pub reserved: u32,
}

impl CatalogFolder {
    /// On-disk size, including the record type.
    pub const SIZE: usize = 88;

    pub fn is_invisible(&self) -> bool {
        FinderFlags::IsInvisible.is_set(self.user_info.finder_flags)
    }
}

/// File record, following the record type. Defined as
/// `struct HFSPlusCatalogFile` in TN1150 > Catalog File Records.
#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct CatalogFile {
    pub flags: u16,
    pub reserved_1: u32,
    pub file_id: CatalogNodeId,
    pub create_date: DateTime,
    pub content_mod_date: DateTime,
    pub attribute_mod_date: DateTime,
    pub access_date: DateTime,
    pub backup_date: DateTime,
    pub permissions: BsdInfo,
    pub user_info: FileInfo,
    pub finder_info: ExtendedFileInfo,
    pub text_encoding: u32,
    pub reserved_2: u32,

    pub data_fork: ForkData,
    pub resource_fork: ForkData,
}

impl CatalogFile {
    /// On-disk size, including the record type.
    pub const SIZE: usize = 248;

    pub fn fork(&self, fork_type: ForkType) -> &ForkData {
        match fork_type {
            ForkType::Data => &self.data_fork,
            ForkType::Resource => &self.resource_fork,
        }
    }

    pub fn is_locked(&self) -> bool {
        CatalogFileFlag::FileLocked.is_set(self.flags)
    }

    pub fn is_invisible(&self) -> bool {
        FinderFlags::IsInvisible.is_set(self.user_info.finder_flags)
    }

    /// Hard link or symbolic link, as marked by the Finder type and creator.
    pub fn link_type(&self) -> Option<WellKnownFileType> {
        WellKnownFileType::from_codes(self.user_info.file_type, self.user_info.file_creator)
    }

    /// Inode number a file or directory hard link refers to.
    pub fn link_inode(&self) -> Option<u32> {
        match self.link_type()? {
            WellKnownFileType::HardLink | WellKnownFileType::DirectoryHardLink => Some(self.permissions.special),
            WellKnownFileType::SymbolicLink => None,
        }
    }
}

/// Link from a catalog node id back to its parent and name. Defined as
/// `struct HFSPlusCatalogThread` in TN1150 > Catalog Thread Records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogThread {
    pub parent_id: CatalogNodeId,
    pub name: UnicodeName,
}

impl CatalogThread {
    /// Key of the record this thread points at.
    pub fn target_key(&self) -> CatalogKey {
        CatalogKey {
            parent_id: self.parent_id,
            name: self.name.clone(),
        }
    }
}

/// Payload of a catalog leaf record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogRecord {
    Folder(CatalogFolder),
    File(CatalogFile),
    FolderThread(CatalogThread),
    FileThread(CatalogThread),
}

impl CatalogRecord {
    pub fn record_type(&self) -> CatalogRecordType {
        match self {
            CatalogRecord::Folder(_) => CatalogRecordType::Folder,
            CatalogRecord::File(_) => CatalogRecordType::File,
            CatalogRecord::FolderThread(_) => CatalogRecordType::FolderThread,
            CatalogRecord::FileThread(_) => CatalogRecordType::FileThread,
        }
    }

    pub fn is_thread(&self) -> bool {
        matches!(self, CatalogRecord::FolderThread(_) | CatalogRecord::FileThread(_))
    }

    /// Id of the folder or file. Threads carry no id of their own.
    pub fn id(&self) -> Option<CatalogNodeId> {
        match self {
            CatalogRecord::Folder(folder) => Some(folder.folder_id),
            CatalogRecord::File(file) => Some(file.file_id),
            CatalogRecord::FolderThread(_) | CatalogRecord::FileThread(_) => None,
        }
    }

    pub fn as_folder(&self) -> Option<&CatalogFolder> {
        match self {
            CatalogRecord::Folder(folder) => Some(folder),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&CatalogFile> {
        match self {
            CatalogRecord::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_thread(&self) -> Option<&CatalogThread> {
        match self {
            CatalogRecord::FolderThread(thread) | CatalogRecord::FileThread(thread) => Some(thread),
            _ => None,
        }
    }
}

/// Decode the payload of a catalog leaf record, dispatching on its record type.
pub fn decode_catalog_record(bytes: &[u8]) -> Result<CatalogRecord> {
    let mut reader = ByteReader::new("catalog record", bytes);
    let raw_type = reader.i16()?;
    let record_type = CatalogRecordType::try_from(raw_type)
        .map_err(|unknown| Error::unknown_value("record type", 0, unknown))?;

    match record_type {
        CatalogRecordType::Folder => {
            let body = bytes.get(2..).unwrap_or_default();
            decode_fixed("catalog folder", body, CatalogFolder::SIZE - 2).map(CatalogRecord::Folder)
        }
        CatalogRecordType::File => {
            let body = bytes.get(2..).unwrap_or_default();
            decode_fixed("catalog file", body, CatalogFile::SIZE - 2).map(CatalogRecord::File)
        }
        CatalogRecordType::FolderThread | CatalogRecordType::FileThread => {
            let _reserved = reader.i16()?;
            let parent_id = reader.u32()?;
            let name = read_unicode_name(&mut reader)?;
            let thread = CatalogThread { parent_id, name };
            Ok(if record_type == CatalogRecordType::FolderThread {
                CatalogRecord::FolderThread(thread)
            } else {
                CatalogRecord::FileThread(thread)
            })
        }
    }
}

pub fn encode_catalog_record(record: &CatalogRecord) -> Result<Vec<u8>> {
    let mut out = i16::from(record.record_type()).to_be_bytes().to_vec();
    match record {
        CatalogRecord::Folder(folder) => out.extend(encode_fixed("catalog folder", folder)?),
        CatalogRecord::File(file) => out.extend(encode_fixed("catalog file", file)?),
        CatalogRecord::FolderThread(thread) | CatalogRecord::FileThread(thread) => {
            out.extend_from_slice(&0i16.to_be_bytes());
            out.extend_from_slice(&thread.parent_id.to_be_bytes());
            write_unicode_name(&mut out, &thread.name)?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ExtentDescriptor;

    fn sample_file() -> CatalogFile {
        let mut file = CatalogFile {
            flags: CatalogFileFlag::ThreadExists as u16,
            file_id: 17,
            create_date: 0xC000_0000,
            permissions: BsdInfo {
                owner_id: 501,
                group_id: 20,
                file_mode: 0o100644,
                ..Default::default()
            },
            user_info: FileInfo {
                file_type: u32::from_be_bytes(*b"TEXT"),
                file_creator: u32::from_be_bytes(*b"ttxt"),
                location: Point { v: -1, h: 300 },
                ..Default::default()
            },
            ..Default::default()
        };
        file.data_fork.logical_size = 5000;
        file.data_fork.extents[0] = ExtentDescriptor::new(100, 4);
        file.data_fork.extents[1] = ExtentDescriptor::new(110, 2);
        file.resource_fork.extents = [ExtentDescriptor::new(7, 1); 8];
        file
    }

    #[test]
    fn key_boundaries_round_trip() {
        for key in [
            CatalogKey::thread(16),
            CatalogKey::new(u32::MAX, UnicodeName::new(vec![0xFFFF; 255])),
            CatalogKey::new(2, "Documents"),
        ] {
            let bytes = encode_catalog_key(&key).unwrap();
            assert_eq!(bytes.len(), 8 + 2 * key.name.len());
            let (decoded, data_offset) = decode_catalog_key(&bytes).unwrap();
            assert_eq!(decoded, key);
            assert_eq!(data_offset, bytes.len());
        }
    }

    #[test]
    fn key_layout() {
        let bytes = encode_catalog_key(&CatalogKey::new(2, "ab")).unwrap();
        assert_eq!(bytes, [0u8, 10, 0, 0, 0, 2, 0, 2, 0, b'a', 0, b'b']);
    }

    #[test]
    fn key_length_bounds_the_name() {
        // key length 6 but a name of one code unit
        let bytes = [0u8, 6, 0, 0, 0, 2, 0, 1, 0, b'a'];
        let err = decode_catalog_key(&bytes).unwrap_err();
        assert_eq!(err.as_malformed().unwrap().field, "key length");

        let err = decode_catalog_key(&[0u8, 4, 0, 0, 0, 2]).unwrap_err();
        assert_eq!(err.as_malformed().unwrap().value, Some(4));
    }

    #[test]
    fn padded_key_data_offset_is_even() {
        // odd key length leaves a pad byte before the data
        let bytes = [0u8, 7, 0, 0, 0, 2, 0, 0, 0xAA, 0, 0];
        let (key, data_offset) = decode_catalog_key(&bytes).unwrap();
        assert_eq!(key, CatalogKey::thread(2));
        assert_eq!(data_offset, 10);
    }

    #[test]
    fn record_sizes() {
        let folder = encode_catalog_record(&CatalogRecord::Folder(CatalogFolder::default())).unwrap();
        assert_eq!(folder.len(), CatalogFolder::SIZE);
        assert_eq!(&folder[0..2], &[0, 1]);

        let file = encode_catalog_record(&CatalogRecord::File(sample_file())).unwrap();
        assert_eq!(file.len(), CatalogFile::SIZE);
        // file id at offset 8, data fork at 88
        assert_eq!(&file[8..12], &17u32.to_be_bytes());
        assert_eq!(&file[88..96], &5000u64.to_be_bytes());
    }

    #[test]
    fn records_round_trip() {
        let records = [
            CatalogRecord::Folder(CatalogFolder {
                valence: 3,
                folder_id: 16,
                user_info: FolderInfo {
                    window_bounds: Rect {
                        top: -5,
                        left: 0,
                        bottom: i16::MAX,
                        right: i16::MIN,
                    },
                    finder_flags: FinderFlags::IsInvisible as u16,
                    ..Default::default()
                },
                ..Default::default()
            }),
            CatalogRecord::File(sample_file()),
            CatalogRecord::FolderThread(CatalogThread {
                parent_id: 2,
                name: UnicodeName::from("Documents"),
            }),
            CatalogRecord::FileThread(CatalogThread {
                parent_id: 16,
                name: UnicodeName::empty(),
            }),
            CatalogRecord::FileThread(CatalogThread {
                parent_id: 16,
                name: UnicodeName::new(vec![0x00E9; 255]),
            }),
        ];

        for record in records {
            let bytes = encode_catalog_record(&record).unwrap();
            assert_eq!(decode_catalog_record(&bytes).unwrap(), record);
        }
    }

    #[test]
    fn unknown_record_type() {
        let mut bytes = encode_catalog_record(&CatalogRecord::Folder(CatalogFolder::default())).unwrap();
        bytes[1] = 9;
        let err = decode_catalog_record(&bytes).unwrap_err();
        let malformed = err.as_malformed().unwrap();
        assert_eq!(malformed.field, "record type");
        assert_eq!(malformed.value, Some(9));
    }

    #[test]
    fn truncated_file_record() {
        let bytes = encode_catalog_record(&CatalogRecord::File(sample_file())).unwrap();
        let err = decode_catalog_record(&bytes[..200]).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof { needed: 246, .. }));
    }

    #[test]
    fn file_helpers() {
        let file = sample_file();
        assert_eq!(file.fork(ForkType::Data).logical_size, 5000);
        assert_eq!(file.fork(ForkType::Resource).basic_extents().len(), 8);
        assert!(!file.is_locked());
        assert_eq!(file.link_type(), None);
        assert_eq!(file.link_inode(), None);
    }

    #[test]
    fn link_inodes_come_from_bsd_special() {
        let mut file = sample_file();
        file.permissions.special = 22;
        file.user_info.file_type = WellKnownFileType::HARD_LINK_TYPE;
        file.user_info.file_creator = WellKnownFileType::HARD_LINK_CREATOR;
        assert_eq!(file.link_inode(), Some(22));

        file.user_info.file_type = WellKnownFileType::DIRECTORY_HARD_LINK_TYPE;
        file.user_info.file_creator = WellKnownFileType::DIRECTORY_HARD_LINK_CREATOR;
        assert_eq!(file.link_type(), Some(WellKnownFileType::DirectoryHardLink));
        assert_eq!(file.link_inode(), Some(22));

        file.user_info.file_type = WellKnownFileType::SYMBOLIC_LINK_TYPE;
        file.user_info.file_creator = WellKnownFileType::SYMBOLIC_LINK_CREATOR;
        assert_eq!(file.link_inode(), None);
    }
}
