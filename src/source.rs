//! Byte-addressed access to the region holding a volume.
//!
//! Every read names its absolute offset, so nothing above this layer shares a
//! cursor. Sources that can only seek-then-read are wrapped in
//! [`LockedStream`], which serialises the pair.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

/// Volume region with explicit-offset reads.
pub trait BlockSource: Send + Sync {
    /// Total length of the region in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `buf.len()` bytes starting at `offset`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

impl<S: BlockSource + ?Sized> BlockSource for Arc<S> {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

impl<S: BlockSource + ?Sized> BlockSource for &S {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

fn check_bounds(offset: u64, len: usize, source_len: u64) -> io::Result<()> {
    let end = offset
        .checked_add(len as u64)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "read range overflows u64"))?;
    if end > source_len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("read out of bounds: offset={offset} len={len} source_len={source_len}"),
        ));
    }
    Ok(())
}

/// In-memory image, mostly useful for tests and small volumes.
impl BlockSource for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        check_bounds(offset, buf.len(), BlockSource::len(self))?;
        let start = offset as usize;
        buf.copy_from_slice(&self[start..start + buf.len()]);
        Ok(())
    }
}

/// File or raw device read with positional I/O.
#[derive(Debug, Clone)]
pub struct FileSource {
    file: Arc<File>,
    len: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::options().read(true).open(path.as_ref())?;
        Self::new(file)
    }

    pub fn new(mut file: File) -> io::Result<Self> {
        // Block devices report a zero metadata length, so measure by seeking.
        let len = match file.metadata()?.len() {
            0 => file.seek(SeekFrom::End(0))?,
            len => len,
        };
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl BlockSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    #[cfg(unix)]
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;

        check_bounds(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset)
    }

    #[cfg(windows)]
    fn read_exact_at(&self, offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;

        check_bounds(offset, buf.len(), self.len)?;
        let mut offset = offset;
        while !buf.is_empty() {
            match self.file.seek_read(buf, offset) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Window onto part of another source, such as a partition located by a
/// partition map. Offsets are relative to the start of the window.
#[derive(Debug, Clone)]
pub struct Region<S> {
    inner: S,
    offset: u64,
    len: u64,
}

impl<S: BlockSource> Region<S> {
    pub fn new(inner: S, offset: u64, len: u64) -> io::Result<Self> {
        check_bounds(offset, 0, inner.len())?;
        let available = inner.len() - offset;
        if len > available {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("region of {len} bytes at {offset} exceeds source of {} bytes", inner.len()),
            ));
        }
        Ok(Self { inner, offset, len })
    }
}

impl<S: BlockSource> BlockSource for Region<S> {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        check_bounds(offset, buf.len(), self.len)?;
        self.inner.read_exact_at(self.offset + offset, buf)
    }
}

/// Adapter for stateful streams. The seek and the read happen under one lock,
/// so concurrent callers never observe each other's cursor.
#[derive(Debug)]
pub struct LockedStream<R> {
    inner: Mutex<R>,
    len: u64,
}

impl<R: Read + Seek> LockedStream<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        Ok(Self {
            inner: Mutex::new(inner),
            len,
        })
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R: Read + Seek + Send> BlockSource for LockedStream<R> {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        check_bounds(offset, buf.len(), self.len)?;
        let mut inner = self.inner.lock();
        inner.seek(SeekFrom::Start(offset))?;
        inner.read_exact(buf)
    }
}

/// Size and capacity of a [`CachedSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Bytes per cached block. Must be a non-zero power of two.
    pub block_size: u32,
    /// Number of blocks kept in memory.
    pub capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            block_size: 4096,
            capacity: 1024,
        }
    }
}

#[derive(Default)]
struct CacheState {
    /// Block data and the generation of its latest use.
    blocks: HashMap<u64, (Arc<[u8]>, u64)>,
    /// Uses oldest first. An entry is stale once its block is used again or
    /// evicted.
    order: VecDeque<(u64, u64)>,
    generation: u64,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn get(&mut self, block: u64) -> Option<Arc<[u8]>> {
        let data = self.blocks.get(&block).map(|(data, _)| Arc::clone(data))?;
        self.touch(block);
        Some(data)
    }

    fn insert(&mut self, block: u64, data: Arc<[u8]>, capacity: usize) {
        if !self.blocks.contains_key(&block) {
            while self.blocks.len() >= capacity && self.evict() {}
        }
        self.blocks.insert(block, (data, 0));
        self.touch(block);
    }

    fn touch(&mut self, block: u64) {
        self.generation += 1;
        if let Some((_, used)) = self.blocks.get_mut(&block) {
            *used = self.generation;
        }
        self.order.push_back((block, self.generation));

        if self.order.len() > 2 * self.blocks.len() + 16 {
            let blocks = &self.blocks;
            self.order
                .retain(|(block, generation)| blocks.get(block).is_some_and(|(_, used)| used == generation));
        }
    }

    /// Drop the least recently used block, if any.
    fn evict(&mut self) -> bool {
        while let Some((block, generation)) = self.order.pop_front() {
            if self.blocks.get(&block).is_some_and(|(_, used)| *used == generation) {
                self.blocks.remove(&block);
                return true;
            }
        }
        false
    }
}

/// Fixed-size block cache in front of another source, evicting the least
/// recently used block once full.
pub struct CachedSource<S> {
    inner: S,
    options: CacheOptions,
    state: Mutex<CacheState>,
}

impl<S: BlockSource> CachedSource<S> {
    pub fn new(inner: S, options: CacheOptions) -> io::Result<Self> {
        if options.block_size == 0 || !options.block_size.is_power_of_two() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid cache block_size={} (must be power of two)", options.block_size),
            ));
        }
        Ok(Self {
            inner,
            options,
            state: Mutex::new(CacheState::default()),
        })
    }

    /// Cache hits and misses since creation.
    pub fn stats(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.hits, state.misses)
    }

    fn block(&self, block: u64) -> io::Result<Arc<[u8]>> {
        {
            let mut state = self.state.lock();
            if let Some(data) = state.get(block) {
                state.hits += 1;
                return Ok(data);
            }
            state.misses += 1;
        }

        // The final block may be partial.
        let block_size = u64::from(self.options.block_size);
        let start = block * block_size;
        let len = block_size.min(self.inner.len().saturating_sub(start)) as usize;
        let mut data = vec![0u8; len];
        self.inner.read_exact_at(start, &mut data)?;
        trace!(block, len, "cache_fill");
        let data: Arc<[u8]> = data.into();

        if self.options.capacity > 0 {
            self.state.lock().insert(block, Arc::clone(&data), self.options.capacity);
        }
        Ok(data)
    }
}

impl<S: BlockSource> BlockSource for CachedSource<S> {
    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        check_bounds(offset, buf.len(), self.inner.len())?;
        let block_size = u64::from(self.options.block_size);

        let mut done = 0;
        while done < buf.len() {
            let position = offset + done as u64;
            let block = position / block_size;
            let within = (position % block_size) as usize;
            let data = self.block(block)?;
            let n = (data.len() - within).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&data[within..within + n]);
            done += n;
        }
        Ok(())
    }
}
