// SPDX-License-Identifier: MIT

//! Enumerations and well-known values from Apple's [TN1150 - HFS Plus Volume Format](https://developer.apple.com/library/archive/technotes/tn/tn1150.html),
//! adjusted to use Rust-friendly naming.
//!
//! On-disk integers are converted with `TryFrom`, which reports the raw value
//! when it is not one of the documented discriminants. Conversion back to the
//! raw integer is infallible.

#![forbid(dead_code, unsafe_code, unused)]

use std::fmt;

/// A raw on-disk value that does not correspond to any known discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownValue {
    /// Name of the type the value was converted into.
    pub type_name: &'static str,
    /// Raw value, sign-extended where the on-disk field is signed.
    pub value: i64,
}

impl fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} value {:#x}", self.type_name, self.value)
    }
}

impl std::error::Error for UnknownValue {}

fn unknown<T>(type_name: &'static str, value: impl Into<i64>) -> Result<T, UnknownValue> {
    Err(UnknownValue {
        type_name,
        value: value.into(),
    })
}

/// Dates are seconds since 01-01-1904 GMT, including a leap day for years
/// evenly divisible by four. The volume header creation date is stored in
/// local time instead.
///
/// Described in TN1150 [HFS Plus Dates](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#HFSPlusDates).
pub type DateTime = u32;

/// Catalog Node ID
///
/// Described in TN1150 [Catalog File](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#CatalogFile)
pub type CatalogNodeId = u32;

pub type FourCharCode = u32;
pub type OsType = FourCharCode;

// region Volume

/// Signature word at offset 1024 of a volume.
///
/// Described in TN1150 [Volume Header](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#VolumeHeader)
/// and, for the legacy formats, in Inside Macintosh: Files.
#[cfg_attr(feature = "repr_c", repr(C))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeSignature {
    /// Original Macintosh File System
    Mfs,
    /// Legacy HFS, which may wrap an embedded HFS Plus volume
    Hfs,
    HfsPlus,
    HfsX,
}

impl VolumeSignature {
    pub const MFS: u16 = 0xD2D7;
    pub const HFS: u16 = u16::from_be_bytes(*b"BD");
    pub const HFS_PLUS: u16 = u16::from_be_bytes(*b"H+");
    pub const HFS_X: u16 = u16::from_be_bytes(*b"HX");

    /// Whether this signature identifies a volume with an HFS Plus catalog.
    pub fn is_hfs_plus_family(self) -> bool {
        matches!(self, Self::HfsPlus | Self::HfsX)
    }
}

impl TryFrom<u16> for VolumeSignature {
    type Error = UnknownValue;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            Self::MFS => Ok(Self::Mfs),
            Self::HFS => Ok(Self::Hfs),
            Self::HFS_PLUS => Ok(Self::HfsPlus),
            Self::HFS_X => Ok(Self::HfsX),
            _ => unknown("volume signature", value),
        }
    }
}

impl From<VolumeSignature> for u16 {
    fn from(value: VolumeSignature) -> Self {
        match value {
            VolumeSignature::Mfs => VolumeSignature::MFS,
            VolumeSignature::Hfs => VolumeSignature::HFS,
            VolumeSignature::HfsPlus => VolumeSignature::HFS_PLUS,
            VolumeSignature::HfsX => VolumeSignature::HFS_X,
        }
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeVersion {
    HfsPlus = 4,
    HfsX = 5,
}

/// Attribute bits of the volume header.
///
/// Described in TN1150 [Volume Attributes](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#VolumeAttributes)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeAttributeMask {
    // Bits 0-7 are reserved. macOS uses bit 7 to indicate hardware
    // read-only status.
    HardwareLock = 1 << 7,

    /// The volume was correctly flushed before being unmounted.
    Unmounted = 1 << 8,

    /// The overflow file contains bad block records.
    SparedBlocks = 1 << 9,

    /// Blocks from this volume should not be cached.
    NoCacheRequired = 1 << 10,

    /// The volume is currently mounted, inverted from the Unmounted bit.
    VolumeInconsistent = 1 << 11,

    /// `next_catalog_id` has overflowed, smaller ids are being reused.
    CatalogNodeIdsReused = 1 << 12,

    /// The volume is journaled, the journal is at `journal_info_block`.
    VolumeJournaled = 1 << 13,

    // Bit 14 is reserved
    SoftwareLock = 1 << 15,
}

impl VolumeAttributeMask {
    /// Whether this bit is set in a raw attributes word.
    pub fn is_set(self, attributes: u32) -> bool {
        attributes & self as u32 != 0
    }
}

/// Catalog node ids reserved by the file system.
///
/// Described in TN1150 [Catalog File](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#CatalogFile)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialFileCatalogNodeId {
    RootParent = 1,
    RootFolder = 2,
    ExtentsFile = 3,
    CatalogFile = 4,
    BadBlockFile = 5,
    AllocationFile = 6,
    StartupFile = 7,
    AttributesFile = 8,
    RepairCatalogFile = 14,
    BogusExtentFile = 15,
    FirstUserCatalogNode = 16,
}

impl From<SpecialFileCatalogNodeId> for CatalogNodeId {
    fn from(value: SpecialFileCatalogNodeId) -> Self {
        value as CatalogNodeId
    }
}

// endregion

// region B-tree

/// Described in TN1150 [B-Trees](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#BTrees)
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BTreeNodeType {
    /// Data Record
    Leaf = -1,
    /// Pointer Record
    Index = 0,
    /// Header Record
    Header = 1,
    /// Map Record
    Map = 2,
}

impl TryFrom<i8> for BTreeNodeType {
    type Error = UnknownValue;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Leaf),
            0 => Ok(Self::Index),
            1 => Ok(Self::Header),
            2 => Ok(Self::Map),
            _ => unknown("node kind", value),
        }
    }
}

impl From<BTreeNodeType> for i8 {
    fn from(value: BTreeNodeType) -> Self {
        value as i8
    }
}

/// Identifier for a B-tree's type.
///
/// Described in TN1150 [Header Record](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#HeaderRecord)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BTreeType {
    /// Control File. Catalog, extent, and attribute trees.
    Hfs = 0,

    // 1-127 used in macOS 9 and earlier.
    User = 128,

    Reserved = 255,
}

/// Case sensitivity for keys in a B-tree.
///
/// Only meaningful for HFSX volumes; HFS Plus catalogs leave the field zeroed
/// and always fold case.
///
/// Described in TN1150 [Header Record](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#HeaderRecord)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BTreeKeyCompareType {
    /// Zero on HFS Plus volumes.
    Unspecified = 0x00,
    /// Case-insensitive comparisons
    CaseFolding = 0xCF,
    /// Binary comparison
    BinaryCompare = 0xBC,
}

impl TryFrom<u8> for BTreeKeyCompareType {
    type Error = UnknownValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Unspecified),
            0xCF => Ok(Self::CaseFolding),
            0xBC => Ok(Self::BinaryCompare),
            _ => unknown("key compare type", value),
        }
    }
}

impl From<BTreeKeyCompareType> for u8 {
    fn from(value: BTreeKeyCompareType) -> Self {
        value as u8
    }
}

/// Described in TN1150 [Header Record](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#HeaderRecord)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BTreeAttributeMask {
    /// Not used in HFS+.
    BadClose = 1,

    /// Key length is a u16. Must be set for all HFS+ B-trees.
    BigKeys = 2,

    /// Index keys occupy their own key length instead of maxKeyLength bytes.
    /// Set for the Catalog B-tree, cleared for the Extents B-tree.
    VariableIndexKeys = 4,
}

impl BTreeAttributeMask {
    pub fn is_set(self, attributes: u32) -> bool {
        attributes & self as u32 != 0
    }
}

// endregion

// region Catalog

/// Type of data contained in a catalog leaf record.
///
/// Described by TN1150 in [Catalog File Data](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#CatalogFile)
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogRecordType {
    Folder = 0x0001,
    File = 0x0002,
    FolderThread = 0x0003,
    FileThread = 0x0004,
}

impl TryFrom<i16> for CatalogRecordType {
    type Error = UnknownValue;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::Folder),
            0x0002 => Ok(Self::File),
            0x0003 => Ok(Self::FolderThread),
            0x0004 => Ok(Self::FileThread),
            _ => unknown("catalog record type", value),
        }
    }
}

impl From<CatalogRecordType> for i16 {
    fn from(value: CatalogRecordType) -> Self {
        value as i16
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFileFlag {
    /// None of the forks may be modified, but they may be opened for reading.
    FileLocked = 1,
    ThreadExists = 2,
}

impl CatalogFileFlag {
    pub fn is_set(self, flags: u16) -> bool {
        flags & self as u16 != 0
    }
}

/// Finder flags (finderFlags, fdFlags and frFlags)
///
/// Described by TN1150 in [Finder Info](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#FinderInfo)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinderFlags {
    IsOnDesk = 0x0001,
    Color = 0x000E,
    IsShared = 0x0040,
    HasNoInits = 0x0080,
    HasBeenInited = 0x0100,
    HasCustomIcon = 0x0400,
    IsStationery = 0x0800,
    NameLocked = 0x1000,
    HasBundle = 0x2000,
    IsInvisible = 0x4000,
    IsAlias = 0x8000,
}

impl FinderFlags {
    pub fn is_set(self, flags: u16) -> bool {
        flags & self as u16 != 0
    }
}

/// File type and creator pairs with special meaning to the file system.
///
/// Described by TN1150 in [Hard Links](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#HardLinks)
/// and [Symbolic Links](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#Symlinks)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellKnownFileType {
    /// File hard link, pointing at an `iNode<N>` file in the private data folder.
    HardLink,
    /// Directory hard link, pointing at a `dir_<N>` folder in the private
    /// directory data folder.
    DirectoryHardLink,
    SymbolicLink,
}

impl WellKnownFileType {
    pub const HARD_LINK_TYPE: OsType = u32::from_be_bytes(*b"hlnk");
    pub const HARD_LINK_CREATOR: OsType = u32::from_be_bytes(*b"hfs+");
    pub const DIRECTORY_HARD_LINK_TYPE: OsType = u32::from_be_bytes(*b"fdrp");
    pub const DIRECTORY_HARD_LINK_CREATOR: OsType = u32::from_be_bytes(*b"MACS");
    pub const SYMBOLIC_LINK_TYPE: OsType = u32::from_be_bytes(*b"slnk");
    pub const SYMBOLIC_LINK_CREATOR: OsType = u32::from_be_bytes(*b"rhap");

    /// Identify a special file from its Finder type and creator codes.
    pub fn from_codes(file_type: OsType, creator: OsType) -> Option<Self> {
        match (file_type, creator) {
            (Self::HARD_LINK_TYPE, Self::HARD_LINK_CREATOR) => Some(Self::HardLink),
            (Self::DIRECTORY_HARD_LINK_TYPE, Self::DIRECTORY_HARD_LINK_CREATOR) => Some(Self::DirectoryHardLink),
            (Self::SYMBOLIC_LINK_TYPE, Self::SYMBOLIC_LINK_CREATOR) => Some(Self::SymbolicLink),
            _ => None,
        }
    }
}

// endregion

// region Extents

/// Fork addressed by an extent key.
///
/// Described by TN1150 in [Extents Overflow File Key](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#ExtentsOverflowFile)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ForkType {
    Data = 0x00,
    Resource = 0xFF,
}

impl TryFrom<u8> for ForkType {
    type Error = UnknownValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Data),
            0xFF => Ok(Self::Resource),
            _ => unknown("fork type", value),
        }
    }
}

impl From<ForkType> for u8 {
    fn from(value: ForkType) -> Self {
        value as u8
    }
}

impl fmt::Display for ForkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => f.write_str("data"),
            Self::Resource => f.write_str("resource"),
        }
    }
}

// endregion

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_match_ascii() {
        assert_eq!(VolumeSignature::HFS_PLUS, 0x482B);
        assert_eq!(VolumeSignature::HFS_X, 0x4858);
        assert_eq!(VolumeSignature::HFS, 0x4244);
        assert_eq!(
            VolumeSignature::try_from(0x4858),
            Ok(VolumeSignature::HfsX)
        );
        assert!(VolumeSignature::HfsX.is_hfs_plus_family());
        assert!(!VolumeSignature::Hfs.is_hfs_plus_family());
    }

    #[test]
    fn node_type_round_trip() {
        for kind in [
            BTreeNodeType::Leaf,
            BTreeNodeType::Index,
            BTreeNodeType::Header,
            BTreeNodeType::Map,
        ] {
            assert_eq!(BTreeNodeType::try_from(i8::from(kind)), Ok(kind));
        }
    }

    #[test]
    fn unknown_values_are_reported() {
        let err = BTreeNodeType::try_from(7).unwrap_err();
        assert_eq!(err.value, 7);
        assert_eq!(err.type_name, "node kind");

        let err = ForkType::try_from(0x01).unwrap_err();
        assert_eq!(err.value, 1);

        let err = CatalogRecordType::try_from(-2).unwrap_err();
        assert_eq!(err.value, -2);
    }

    #[test]
    fn fork_type_orders_data_first() {
        assert!(ForkType::Data < ForkType::Resource);
    }

    #[test]
    fn well_known_link_codes() {
        assert_eq!(
            WellKnownFileType::from_codes(
                WellKnownFileType::SYMBOLIC_LINK_TYPE,
                WellKnownFileType::SYMBOLIC_LINK_CREATOR
            ),
            Some(WellKnownFileType::SymbolicLink)
        );
        assert_eq!(
            WellKnownFileType::from_codes(
                WellKnownFileType::DIRECTORY_HARD_LINK_TYPE,
                WellKnownFileType::DIRECTORY_HARD_LINK_CREATOR
            ),
            Some(WellKnownFileType::DirectoryHardLink)
        );
        assert_eq!(
            WellKnownFileType::from_codes(WellKnownFileType::HARD_LINK_TYPE, WellKnownFileType::DIRECTORY_HARD_LINK_CREATOR),
            None
        );
        assert_eq!(WellKnownFileType::from_codes(0, 0), None);
    }

    #[test]
    fn attribute_masks() {
        let attributes = VolumeAttributeMask::Unmounted as u32
            | VolumeAttributeMask::VolumeJournaled as u32;
        assert!(VolumeAttributeMask::Unmounted.is_set(attributes));
        assert!(VolumeAttributeMask::VolumeJournaled.is_set(attributes));
        assert!(!VolumeAttributeMask::SoftwareLock.is_set(attributes));
    }
}
