//! Fork resolution and random-access reads over a fork's extents.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use hfs_types_rs::{CatalogNodeId, ForkType};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::btree::NodeSource;
use crate::codec::{ExtentDescriptor, ExtentRecord, ForkData, trim_extents};
use crate::error::{Error, Result, TreeKind};
use crate::extents::ExtentsOverflow;
use crate::source::BlockSource;

/// Where overflow extents of a fork are looked up.
pub trait OverflowLookup {
    fn overflow_extents(
        &self,
        fork_type: ForkType,
        file_id: CatalogNodeId,
        start_block: u32,
    ) -> Result<Option<ExtentRecord>>;
}

impl OverflowLookup for ExtentsOverflow {
    fn overflow_extents(
        &self,
        fork_type: ForkType,
        file_id: CatalogNodeId,
        start_block: u32,
    ) -> Result<Option<ExtentRecord>> {
        Ok(self.lookup(fork_type, file_id, start_block)?.map(|record| record.data))
    }
}

/// Complete extent list of a fork: the inline extents followed by as many
/// overflow records as the logical size needs.
///
/// `overflow` is `None` only while resolving the extents overflow file itself,
/// whose extents must all be inline.
pub fn resolve_extents(
    fork: &ForkData,
    file_id: CatalogNodeId,
    fork_type: ForkType,
    block_size: u32,
    overflow: Option<&dyn OverflowLookup>,
) -> Result<Vec<ExtentDescriptor>> {
    let block_size = u64::from(block_size);
    let mut extents = fork.basic_extents().to_vec();
    let mut covered = extents.iter().map(|e| u64::from(e.block_count)).sum::<u64>();

    while covered.saturating_mul(block_size) < fork.logical_size {
        let start_block = u32::try_from(covered).map_err(|_| {
            Error::malformed("extent record", format!("{fork_type} fork of {file_id} exceeds 2^32 blocks"))
                .in_tree(TreeKind::ExtentsOverflow)
        })?;
        let Some(overflow) = overflow else {
            return Err(Error::malformed_value(
                "logical size",
                0,
                i64::try_from(fork.logical_size).unwrap_or(i64::MAX),
                format!("{fork_type} fork of {file_id} is not covered by its inline extents"),
            ));
        };
        let Some(record) = overflow.overflow_extents(fork_type, file_id, start_block)? else {
            return Err(Error::malformed_value(
                "extent key",
                0,
                start_block,
                format!("no overflow record for the {fork_type} fork of {file_id}"),
            )
            .in_tree(TreeKind::ExtentsOverflow));
        };

        let more = trim_extents(&record);
        let advance = more.iter().map(|e| u64::from(e.block_count)).sum::<u64>();
        if advance == 0 {
            return Err(Error::malformed_value(
                "extent record",
                0,
                start_block,
                format!("empty overflow record for the {fork_type} fork of {file_id}"),
            )
            .in_tree(TreeKind::ExtentsOverflow));
        }

        debug!(file_id, %fork_type, start_block, extents = more.len(), advance, "fork_overflow_extents");
        extents.extend_from_slice(more);
        covered += advance;
    }

    Ok(extents)
}

/// Byte stream over a resolved fork. Holds no cursor: every read names its
/// offset, so one stream can serve several readers.
#[derive(Clone)]
pub struct ForkStream {
    source: Arc<dyn BlockSource>,
    extents: Vec<ExtentDescriptor>,
    block_size: u64,
    data_start: u64,
    len: u64,
}

impl std::fmt::Debug for ForkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkStream")
            .field("extents", &self.extents)
            .field("block_size", &self.block_size)
            .field("data_start", &self.data_start)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl ForkStream {
    /// `data_start` is the byte offset of allocation block 0 within `source`.
    pub fn new(
        source: Arc<dyn BlockSource>,
        extents: Vec<ExtentDescriptor>,
        block_size: u32,
        data_start: u64,
        len: u64,
    ) -> Self {
        Self {
            source,
            extents,
            block_size: u64::from(block_size),
            data_start,
            len,
        }
    }

    /// Logical size of the fork in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn extents(&self) -> &[ExtentDescriptor] {
        &self.extents
    }

    /// Read up to `buf.len()` bytes at `offset`, stopping at the logical end
    /// of the fork. Issues one source read per extent touched.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(self.len - offset).unwrap_or(usize::MAX));

        let mut done = 0;
        let mut extent_start = 0u64;
        for extent in &self.extents {
            if done == want {
                break;
            }
            let extent_end = u64::from(extent.block_count)
                .checked_mul(self.block_size)
                .and_then(|len| extent_start.checked_add(len))
                .ok_or_else(|| unaddressable(extent))?;
            let position = offset + done as u64;
            if position < extent_end {
                let within = position - extent_start;
                let n = usize::try_from(extent_end - position).map_or(want - done, |left| left.min(want - done));
                let physical = u64::from(extent.start_block)
                    .checked_mul(self.block_size)
                    .and_then(|start| start.checked_add(self.data_start))
                    .and_then(|start| start.checked_add(within))
                    .ok_or_else(|| unaddressable(extent))?;
                trace!(offset = position, physical, len = n, "fork_read");
                self.source.read_exact_at(physical, &mut buf[done..done + n])?;
                done += n;
            }
            extent_start = extent_end;
        }

        if done < want {
            return Err(Error::malformed_value(
                "extent record",
                0,
                i64::try_from(extent_start).unwrap_or(i64::MAX),
                format!("extents end before the logical size of {} bytes", self.len),
            ));
        }
        Ok(done)
    }

    /// Fill `buf` completely from `offset`.
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let n = self.read_at(offset, buf)?;
        if n < buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("fork read at {offset} of {} bytes past the logical size {}", buf.len(), self.len),
            )
            .into());
        }
        Ok(())
    }

    /// Sequential reader starting at offset 0.
    pub fn reader(&self) -> ForkReader {
        ForkReader {
            stream: self.clone(),
            position: 0,
        }
    }

    /// Copy the whole fork into `writer`, hashing it on the way.
    pub fn copy_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<ForkCopy> {
        const CHUNK: usize = 64 * 1024;

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHUNK];
        let mut offset = 0u64;
        loop {
            let n = self.read_at(offset, &mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            writer.write_all(&buf[..n])?;
            offset += n as u64;
        }

        Ok(ForkCopy {
            bytes: offset,
            sha256: format!("{:x}", hasher.finalize()),
        })
    }
}

impl NodeSource for ForkStream {
    fn read_node_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.read_exact_at(offset, buf)
    }
}

/// Outcome of [`ForkStream::copy_to`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkCopy {
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the copied bytes.
    pub sha256: String,
}

/// `Read + Seek` cursor over a [`ForkStream`].
#[derive(Debug, Clone)]
pub struct ForkReader {
    stream: ForkStream,
    position: u64,
}

impl Read for ForkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.stream.read_at(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for ForkReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.stream.len().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        self.position = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative or overflowing position")
        })?;
        Ok(self.position)
    }
}

fn unaddressable(extent: &ExtentDescriptor) -> Error {
    Error::malformed_value(
        "extent record",
        0,
        extent.start_block,
        "extent lies outside the addressable range",
    )
}
