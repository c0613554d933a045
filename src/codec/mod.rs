//! Decoders and encoders for the fixed on-disk layouts described by TN1150.
//!
//! All integers are big-endian. Fixed-size structures are derived with deku,
//! while the variable-length catalog key and unicode names are hand-coded.
//! Nothing in here performs I/O or checks cross-structure invariants; a
//! truncated buffer yields [`Error::UnexpectedEof`] and an unknown enumerated
//! value yields [`Error::Malformed`] carrying the raw value and its offset.

use std::fmt;

use deku::{DekuContainerRead, DekuContainerWrite};

use crate::error::{Error, Result};

pub mod catalog;
pub mod extents;
pub mod node;
pub mod volume;

pub use catalog::*;
pub use extents::*;
pub use node::*;
pub use volume::*;

/// Decode a deku-derived structure occupying the first `size` bytes of `bytes`.
pub(crate) fn decode_fixed<'a, T>(structure: &'static str, bytes: &'a [u8], size: usize) -> Result<T>
where
    T: DekuContainerRead<'a>,
{
    if bytes.len() < size {
        return Err(Error::eof(structure, 0, size, bytes.len()));
    }

    let (_rest, value) =
        T::from_bytes((&bytes[..size], 0)).map_err(|err| Error::malformed(structure, err.to_string()))?;
    Ok(value)
}

pub(crate) fn encode_fixed<T>(structure: &'static str, value: &T) -> Result<Vec<u8>>
where
    T: DekuContainerWrite,
{
    value
        .to_bytes()
        .map_err(|err| Error::malformed(structure, err.to_string()))
}

/// Big-endian reader over a borrowed buffer, for the layouts deku cannot
/// describe on its own.
pub(crate) struct ByteReader<'a> {
    structure: &'static str,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(structure: &'static str, buf: &'a [u8]) -> Self {
        Self { structure, buf, pos: 0 }
    }

    pub(crate) fn at(structure: &'static str, buf: &'a [u8], pos: usize) -> Self {
        Self { structure, buf, pos }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let available = self.buf.len().saturating_sub(self.pos);
        if available < len {
            return Err(Error::eof(self.structure, self.pos, len, available));
        }

        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn i16(&mut self) -> Result<i16> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Unicode 2.0 string of at most 255 UTF-16 code units, stored fully decomposed.
/// Defined as `struct HFSUniStr255` in TN1150 > HFS Plus Names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UnicodeName(Vec<u16>);

impl UnicodeName {
    pub const MAX_LENGTH: usize = 255;

    pub fn new(units: Vec<u16>) -> Self {
        Self(units)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn units(&self) -> &[u16] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.0)
    }
}

impl From<&str> for UnicodeName {
    fn from(value: &str) -> Self {
        Self(value.encode_utf16().collect())
    }
}

impl fmt::Display for UnicodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        char::decode_utf16(self.0.iter().copied())
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .try_for_each(|c| fmt::Write::write_char(f, c))
    }
}

/// Read a length-prefixed name, as found in catalog keys and thread records.
pub(crate) fn read_unicode_name(reader: &mut ByteReader<'_>) -> Result<UnicodeName> {
    let length_offset = reader.position();
    let length = reader.u16()?;
    if usize::from(length) > UnicodeName::MAX_LENGTH {
        return Err(Error::malformed_value(
            "name length",
            length_offset,
            length,
            "names hold at most 255 code units",
        ));
    }

    let bytes = reader.take(usize::from(length) * 2)?;
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    Ok(UnicodeName(units))
}

pub(crate) fn write_unicode_name(out: &mut Vec<u8>, name: &UnicodeName) -> Result<()> {
    if name.len() > UnicodeName::MAX_LENGTH {
        return Err(Error::malformed("name length", format!("{} code units exceeds 255", name.len())));
    }

    out.extend_from_slice(&(name.len() as u16).to_be_bytes());
    name.units()
        .iter()
        .for_each(|unit| out.extend_from_slice(&unit.to_be_bytes()));
    Ok(())
}

/// Decode a standalone `HFSUniStr255`.
pub fn decode_unicode_name(bytes: &[u8]) -> Result<UnicodeName> {
    read_unicode_name(&mut ByteReader::new("unicode name", bytes))
}

pub fn encode_unicode_name(name: &UnicodeName) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(2 + name.len() * 2);
    write_unicode_name(&mut out, name)?;
    Ok(out)
}
