//! An opened HFS Plus or HFSX volume.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use hfs_types_rs::{
    CatalogNodeId, ForkType, SpecialFileCatalogNodeId, VolumeAttributeMask, VolumeSignature, WellKnownFileType,
};
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogEntry, DIRECTORY_LINK_FOLDER, FILE_LINK_FOLDER, ROOT_FOLDER};
use crate::codec::{ByteReader, CatalogFile, CatalogRecord, VolumeHeader, decode_volume_header};
use crate::error::{Error, Result, TreeKind};
use crate::extents::ExtentsOverflow;
use crate::fork::{ForkCopy, ForkStream, resolve_extents};
use crate::source::{BlockSource, CacheOptions, CachedSource, Region};

/// File system found by [`detect_file_system`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystemKind {
    Mfs,
    Hfs,
    /// HFS volume carrying an embedded HFS Plus volume.
    HfsWrappedHfsPlus,
    HfsPlus,
    HfsX,
    Unknown,
}

/// Offset of the embedded volume signature within an HFS master directory
/// block.
const EMBED_SIGNATURE_OFFSET: usize = 124;
const MDB_SIZE: usize = 162;

/// Identify the file system in `source` from the signature at byte 1024.
/// Sources too short to hold a volume header are `Unknown`.
pub fn detect_file_system(source: &dyn BlockSource) -> Result<FileSystemKind> {
    if source.len() < VolumeHeader::OFFSET + VolumeHeader::SIZE as u64 {
        return Ok(FileSystemKind::Unknown);
    }
    let mut mdb = [0u8; MDB_SIZE];
    source.read_exact_at(VolumeHeader::OFFSET, &mut mdb)?;

    let signature = u16::from_be_bytes([mdb[0], mdb[1]]);
    let kind = match VolumeSignature::try_from(signature) {
        Ok(VolumeSignature::Mfs) => FileSystemKind::Mfs,
        Ok(VolumeSignature::Hfs) => {
            let embedded = ByteReader::at("master directory block", &mdb, EMBED_SIGNATURE_OFFSET).u16()?;
            match embedded {
                VolumeSignature::HFS_PLUS => FileSystemKind::HfsWrappedHfsPlus,
                0 => FileSystemKind::Hfs,
                other => {
                    warn!(embedded_signature = other, "hfs_wrapper_unknown_embedded_signature");
                    FileSystemKind::Hfs
                }
            }
        }
        Ok(VolumeSignature::HfsPlus) => FileSystemKind::HfsPlus,
        Ok(VolumeSignature::HfsX) => FileSystemKind::HfsX,
        Err(_) => FileSystemKind::Unknown,
    };
    Ok(kind)
}

/// Byte range of the HFS Plus volume embedded in an HFS wrapper.
pub fn embedded_volume_range(source: &dyn BlockSource) -> Result<(u64, u64)> {
    let mut mdb = [0u8; MDB_SIZE];
    source.read_exact_at(VolumeHeader::OFFSET, &mut mdb)?;

    let block_size = ByteReader::at("master directory block", &mdb, 20).u32()?;
    let first_block = ByteReader::at("master directory block", &mdb, 28).u16()?;
    let mut extent = ByteReader::at("master directory block", &mdb, EMBED_SIGNATURE_OFFSET + 2);
    let (start, count) = (extent.u16()?, extent.u16()?);

    if block_size == 0 || block_size % 512 != 0 {
        return Err(Error::malformed_value(
            "allocation block size",
            20,
            block_size,
            "wrapper block size must be a non-zero multiple of 512",
        ));
    }
    if count == 0 {
        return Err(Error::malformed_value(
            "embedded extent",
            EMBED_SIGNATURE_OFFSET + 4,
            count,
            "embedded volume is empty",
        ));
    }

    let offset = u64::from(first_block) * 512 + u64::from(start) * u64::from(block_size);
    Ok((offset, u64::from(count) * u64::from(block_size)))
}

/// How [`Volume::open_with`] prepares the volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeOptions {
    /// Put a block cache in front of the source.
    pub cache: Option<CacheOptions>,
    /// Run [`Volume::sanity_check`] before returning.
    pub sanity_check: bool,
}

impl VolumeOptions {
    pub fn with_cache(mut self, cache: CacheOptions) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_sanity_check(mut self, sanity_check: bool) -> Self {
        self.sanity_check = sanity_check;
        self
    }
}

/// Read-only view of one volume. All methods take `&self`; a volume can be
/// shared between threads.
pub struct Volume {
    source: Arc<dyn BlockSource>,
    header: VolumeHeader,
    signature: VolumeSignature,
    catalog: Catalog,
    extents: ExtentsOverflow,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("signature", &self.signature)
            .field("block_size", &self.header.block_size)
            .field("total_blocks", &self.header.total_blocks)
            .finish_non_exhaustive()
    }
}

impl Volume {
    pub fn open(source: impl BlockSource + 'static) -> Result<Self> {
        Self::open_with(source, VolumeOptions::default())
    }

    pub fn open_with(source: impl BlockSource + 'static, options: VolumeOptions) -> Result<Self> {
        let mut source: Arc<dyn BlockSource> = Arc::new(source);

        if detect_file_system(&*source)? == FileSystemKind::HfsWrappedHfsPlus {
            let (offset, len) = embedded_volume_range(&*source)?;
            info!(offset, len, "volume_unwrap_hfs");
            source = Arc::new(Region::new(source, offset, len)?);
        }
        if let Some(cache) = options.cache {
            source = Arc::new(CachedSource::new(source, cache)?);
        }

        let mut raw = [0u8; VolumeHeader::SIZE];
        source.read_exact_at(VolumeHeader::OFFSET, &mut raw)?;
        let header = decode_volume_header(&raw)?;
        let signature = header.volume_signature()?;
        if !signature.is_hfs_plus_family() {
            return Err(Error::malformed_value(
                "signature",
                0,
                header.signature,
                format!("{signature:?} volumes are not supported"),
            ));
        }

        let block_size = header.block_size;
        if block_size < 512 || !block_size.is_power_of_two() {
            return Err(Error::malformed_value(
                "block size",
                40,
                block_size,
                "must be a power of two of at least 512",
            ));
        }

        if header.has_attribute(VolumeAttributeMask::VolumeJournaled)
            && !header.has_attribute(VolumeAttributeMask::Unmounted)
        {
            warn!(
                journal_info_block = header.journal_info_block,
                "volume_journal_not_replayed"
            );
        }
        if header.has_attribute(VolumeAttributeMask::VolumeInconsistent) {
            warn!("volume_marked_inconsistent");
        }

        let extents_fork = ForkStream::new(
            source.clone(),
            resolve_extents(
                &header.extents_file,
                SpecialFileCatalogNodeId::ExtentsFile.into(),
                ForkType::Data,
                block_size,
                None,
            )
            .map_err(|e| e.in_tree(TreeKind::ExtentsOverflow))?,
            block_size,
            0,
            header.extents_file.logical_size,
        );
        let extents = ExtentsOverflow::open(extents_fork)?;

        let catalog_fork = ForkStream::new(
            source.clone(),
            resolve_extents(
                &header.catalog_file,
                SpecialFileCatalogNodeId::CatalogFile.into(),
                ForkType::Data,
                block_size,
                Some(&extents),
            )
            .map_err(|e| e.in_tree(TreeKind::Catalog))?,
            block_size,
            0,
            header.catalog_file.logical_size,
        );
        let catalog = Catalog::open(catalog_fork, signature)?;

        let volume = Self {
            source,
            header,
            signature,
            catalog,
            extents,
        };
        if options.sanity_check {
            volume.sanity_check()?;
        }

        info!(
            signature = ?volume.signature,
            block_size,
            total_blocks = volume.header.total_blocks,
            free_blocks = volume.header.free_blocks,
            files = volume.header.file_count,
            folders = volume.header.folder_count,
            "volume_open"
        );
        Ok(volume)
    }

    pub fn header(&self) -> &VolumeHeader {
        &self.header
    }

    pub fn kind(&self) -> VolumeSignature {
        self.signature
    }

    pub fn block_size(&self) -> u32 {
        self.header.block_size
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn extents_overflow(&self) -> &ExtentsOverflow {
        &self.extents
    }

    /// Volume name, stored as the name of the root folder.
    pub fn name(&self) -> Result<String> {
        Ok(self.root()?.name().to_string())
    }

    pub fn root(&self) -> Result<CatalogEntry> {
        self.catalog.get_root()
    }

    pub fn list(&self, folder_id: CatalogNodeId) -> Result<Vec<CatalogEntry>> {
        self.catalog.list_children(folder_id)
    }

    pub fn lookup(&self, id: CatalogNodeId) -> Result<CatalogEntry> {
        self.catalog
            .lookup_id(id)?
            .ok_or_else(|| Error::NotFound(format!("catalog node {id}")))
    }

    /// Entry at a slash-separated path from the root folder. A `:` in a
    /// component stands for a `/` in the on-disk name; `.` and `..` are
    /// honoured, with `..` at the root staying at the root. Hard links along
    /// the way are followed, so the result is the link's target.
    pub fn resolve_path(&self, path: &str) -> Result<Option<CatalogEntry>> {
        let mut stack = vec![self.root()?];
        for component in path.split('/').filter(|c| !c.is_empty()) {
            match component {
                "." => {}
                ".." => {
                    if stack.len() > 1 {
                        stack.pop();
                    }
                }
                name => {
                    let Some(folder_id) = stack.last().and_then(CatalogEntry::as_folder).map(|f| f.folder_id) else {
                        return Ok(None);
                    };
                    let Some(entry) = self.catalog.get(folder_id, name.replace(':', "/").as_str())? else {
                        return Ok(None);
                    };
                    stack.push(self.resolve_link(&entry)?);
                }
            }
        }
        Ok(stack.pop())
    }

    /// Target of a hard link: the `iNode<N>` file or `dir_<N>` folder in the
    /// private folders under the root. Every other entry, symbolic links
    /// included, comes back unchanged, as does a link whose target is gone.
    pub fn resolve_link(&self, entry: &CatalogEntry) -> Result<CatalogEntry> {
        let target = match entry.as_file() {
            Some(file) => self.link_target(file)?,
            None => None,
        };
        Ok(target.unwrap_or_else(|| entry.clone()))
    }

    fn link_target(&self, file: &CatalogFile) -> Result<Option<CatalogEntry>> {
        let (folder, prefix, is_directory) = match file.link_type() {
            Some(WellKnownFileType::HardLink) => (FILE_LINK_FOLDER, "iNode", false),
            Some(WellKnownFileType::DirectoryHardLink) => (DIRECTORY_LINK_FOLDER, "dir_", true),
            Some(WellKnownFileType::SymbolicLink) | None => return Ok(None),
        };
        let inode = file.permissions.special;
        let name = format!("{prefix}{inode}");

        let private = self.catalog.get(ROOT_FOLDER, folder)?;
        let target = match private.as_ref().and_then(CatalogEntry::as_folder) {
            Some(private) => self.catalog.get(private.folder_id, name.as_str())?,
            None => None,
        };
        let Some(target) = target else {
            warn!(file_id = file.file_id, inode, "hard_link_target_missing");
            return Ok(None);
        };

        let found_directory = match &target.data {
            CatalogRecord::Folder(_) => true,
            CatalogRecord::File(_) => false,
            CatalogRecord::FolderThread(_) | CatalogRecord::FileThread(_) => !is_directory,
        };
        if found_directory != is_directory {
            return Err(Error::malformed_value(
                "link target",
                0,
                inode,
                format!("{name} is not a {}", if is_directory { "folder" } else { "file" }),
            )
            .in_tree(TreeKind::Catalog));
        }
        debug!(file_id = file.file_id, inode, target = ?target.id(), "hard_link_resolved");
        Ok(Some(target))
    }

    /// Entries from the root folder down to `entry`.
    pub fn path_to(&self, entry: &CatalogEntry) -> Result<Vec<CatalogEntry>> {
        self.catalog.path_to(entry)
    }

    /// Slash-separated path of `entry` below the root, with on-disk slashes
    /// shown as `:`.
    pub fn posix_path(&self, entry: &CatalogEntry) -> Result<String> {
        let path = self.path_to(entry)?;
        let components = path
            .iter()
            .skip(1)
            .map(|e| e.name().to_string().replace('/', ":"))
            .collect::<Vec<_>>();
        Ok(format!("/{}", components.join("/")))
    }

    /// Stream over one fork of a file, with overflow extents resolved. A file
    /// hard link reads the fork of the inode it refers to.
    pub fn open_fork(&self, file: &CatalogFile, fork_type: ForkType) -> Result<ForkStream> {
        let target = self.link_target(file)?;
        let file = target.as_ref().and_then(CatalogEntry::as_file).unwrap_or(file);
        let fork = file.fork(fork_type);
        let extents = resolve_extents(fork, file.file_id, fork_type, self.block_size(), Some(&self.extents))?;
        Ok(ForkStream::new(
            self.source.clone(),
            extents,
            self.block_size(),
            0,
            fork.logical_size,
        ))
    }

    /// Copy one fork of a file into `writer`.
    pub fn extract_fork<W: Write + ?Sized>(
        &self,
        file: &CatalogFile,
        fork_type: ForkType,
        writer: &mut W,
    ) -> Result<ForkCopy> {
        self.open_fork(file, fork_type)?.copy_to(writer)
    }

    /// Logical size of one fork of a file, or the total over every file below
    /// a folder.
    pub fn fork_size_recursive(&self, entry: &CatalogEntry, fork_type: ForkType) -> Result<u64> {
        let mut total = 0u64;
        let mut pending = vec![entry.data.clone()];
        let mut seen = HashSet::new();

        while let Some(record) = pending.pop() {
            match record {
                CatalogRecord::File(file) => total += file.fork(fork_type).logical_size,
                CatalogRecord::Folder(folder) => {
                    if !seen.insert(folder.folder_id) {
                        return Err(Error::malformed_value(
                            "folder id",
                            0,
                            folder.folder_id,
                            "folder appears twice in its own subtree",
                        )
                        .in_tree(TreeKind::Catalog));
                    }
                    pending.extend(self.list(folder.folder_id)?.into_iter().map(|child| child.data));
                }
                CatalogRecord::FolderThread(_) | CatalogRecord::FileThread(_) => {}
            }
        }
        Ok(total)
    }

    /// Check that the header agrees with the source: the block counts are
    /// consistent, the volume fits, and its first and last sectors read.
    pub fn sanity_check(&self) -> Result<()> {
        let header = &self.header;
        if header.free_blocks > header.total_blocks {
            return Err(Error::malformed_value(
                "free blocks",
                48,
                header.free_blocks,
                format!("more than the {} total blocks", header.total_blocks),
            ));
        }

        let volume_len = u64::from(header.total_blocks) * u64::from(header.block_size);
        if volume_len > self.source.len() {
            return Err(Error::malformed_value(
                "total blocks",
                44,
                header.total_blocks,
                format!("volume of {volume_len} bytes exceeds the {} byte source", self.source.len()),
            ));
        }

        let mut sector = [0u8; 512];
        self.source.read_exact_at(0, &mut sector)?;
        self.source.read_exact_at(volume_len.saturating_sub(512), &mut sector)?;
        Ok(())
    }
}
