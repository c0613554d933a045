#![forbid(unsafe_code)]

//! Read-only access to HFS Plus and HFSX volumes.
//!
//! A [`Volume`] is opened over any [`BlockSource`]: a disk image, a raw
//! device, or a window into a partitioned image. It walks the catalog and
//! extents overflow B-trees on demand and never writes. Damaged structures
//! are reported as [`Error::Malformed`] with the tree, node and field
//! involved, and only affect operations that touch them.
//!
//! ```no_run
//! use hfsread::{FileSource, ForkType, Volume};
//!
//! let volume = Volume::open(FileSource::open("disk.img")?)?;
//! println!("{}", volume.name()?);
//! if let Some(entry) = volume.resolve_path("/Documents/notes.txt")? {
//!     if let Some(file) = entry.as_file() {
//!         let mut out = Vec::new();
//!         volume.extract_fork(file, ForkType::Data, &mut out)?;
//!     }
//! }
//! # Ok::<(), hfsread::Error>(())
//! ```

pub mod btree;
pub mod catalog;
pub mod codec;
pub mod error;
pub mod extents;
pub mod fork;
pub mod source;
pub mod unicode;
pub mod volume;

#[cfg(test)]
mod testutil;

pub use hfs_types_rs::{CatalogNodeId, ForkType, VolumeSignature};

pub use catalog::{Catalog, CatalogEntry};
pub use codec::{CatalogFile, CatalogFolder, CatalogKey, CatalogRecord, ExtentDescriptor, UnicodeName, VolumeHeader};
pub use error::{Error, Location, Malformed, Result, TreeKind};
pub use extents::ExtentsOverflow;
pub use fork::{ForkCopy, ForkReader, ForkStream};
pub use source::{BlockSource, CacheOptions, CachedSource, FileSource, LockedStream, Region};
pub use unicode::Collation;
pub use volume::{FileSystemKind, Volume, VolumeOptions, detect_file_system};
