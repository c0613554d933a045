//! Error taxonomy for reading HFS Plus structures.

use std::fmt;
use std::io;

use hfs_types_rs::UnknownValue;
use thiserror::Error;

/// The B-tree a failure was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    Catalog,
    ExtentsOverflow,
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeKind::Catalog => f.write_str("catalog"),
            TreeKind::ExtentsOverflow => f.write_str("extents overflow"),
        }
    }
}

/// Where in the volume an inconsistency was found. Both parts are optional, as
/// codec errors are raised before the enclosing node is known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    pub tree: Option<TreeKind>,
    pub node: Option<u32>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.tree, self.node) {
            (Some(tree), Some(node)) => write!(f, "{tree} node {node}"),
            (Some(tree), None) => write!(f, "{tree} tree"),
            (None, Some(node)) => write!(f, "node {node}"),
            (None, None) => f.write_str("volume"),
        }
    }
}

/// Description of a structural invariant that did not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Malformed {
    pub location: Location,
    /// Name of the on-disk field, or of the structure for whole-record problems.
    pub field: &'static str,
    /// Byte offset of the field within the buffer being decoded.
    pub offset: Option<usize>,
    /// Offending raw value.
    pub value: Option<i64>,
    pub reason: String,
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed {} in {}", self.field, self.location)?;
        if let Some(offset) = self.offset {
            write!(f, " at offset {offset}")?;
        }
        if let Some(value) = self.value {
            write!(f, " (value {value:#x})")?;
        }
        write!(f, ": {}", self.reason)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(
        "unexpected end of data in {structure} ({location}): needed {needed} bytes at offset {offset}, {available} available"
    )]
    UnexpectedEof {
        structure: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
        location: Location,
    },

    #[error("{0}")]
    Malformed(Box<Malformed>),

    #[error("{0} not found")]
    NotFound(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Malformed(Box::new(Malformed {
            location: Location::default(),
            field,
            offset: None,
            value: None,
            reason: reason.into(),
        }))
    }

    pub(crate) fn malformed_value(
        field: &'static str,
        offset: usize,
        value: impl Into<i64>,
        reason: impl Into<String>,
    ) -> Self {
        Error::Malformed(Box::new(Malformed {
            location: Location::default(),
            field,
            offset: Some(offset),
            value: Some(value.into()),
            reason: reason.into(),
        }))
    }

    pub(crate) fn unknown_value(field: &'static str, offset: usize, unknown: UnknownValue) -> Self {
        Error::malformed_value(field, offset, unknown.value, unknown.to_string())
    }

    pub(crate) fn eof(structure: &'static str, offset: usize, needed: usize, available: usize) -> Self {
        Error::UnexpectedEof {
            structure,
            offset,
            needed,
            available,
            location: Location::default(),
        }
    }

    /// Attach the tree to a structural error that does not carry one yet.
    pub fn in_tree(self, tree: TreeKind) -> Self {
        self.with_location(|location| {
            location.tree.get_or_insert(tree);
        })
    }

    /// Attach the tree and node number to a structural error that does not
    /// carry them yet.
    pub fn at_node(self, tree: TreeKind, node: u32) -> Self {
        self.with_location(|location| {
            location.tree.get_or_insert(tree);
            location.node.get_or_insert(node);
        })
    }

    fn with_location(mut self, update: impl FnOnce(&mut Location)) -> Self {
        match &mut self {
            Error::Malformed(malformed) => update(&mut malformed.location),
            Error::UnexpectedEof { location, .. } => update(location),
            Error::Io(_) | Error::NotFound(_) => {}
        }
        self
    }

    /// The structural detail, for malformed-structure errors.
    pub fn as_malformed(&self) -> Option<&Malformed> {
        match self {
            Error::Malformed(malformed) => Some(malformed),
            _ => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::Malformed(_) | Error::UnexpectedEof { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Io(e) => e,
            not_found @ Error::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, not_found),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_is_attached_once() {
        let err = Error::malformed_value("kind", 8, 7, "unknown node kind")
            .at_node(TreeKind::Catalog, 12)
            .at_node(TreeKind::ExtentsOverflow, 3);

        let malformed = err.as_malformed().unwrap();
        assert_eq!(malformed.location.tree, Some(TreeKind::Catalog));
        assert_eq!(malformed.location.node, Some(12));
        assert_eq!(malformed.offset, Some(8));
        assert_eq!(malformed.value, Some(7));
        assert_eq!(
            err.to_string(),
            "malformed kind in catalog node 12 at offset 8 (value 0x7): unknown node kind"
        );
    }

    #[test]
    fn eof_carries_location() {
        let err = Error::eof("node descriptor", 0, 14, 3).in_tree(TreeKind::ExtentsOverflow);
        match err {
            Error::UnexpectedEof {
                needed,
                available,
                location,
                ..
            } => {
                assert_eq!((needed, available), (14, 3));
                assert_eq!(location.tree, Some(TreeKind::ExtentsOverflow));
                assert_eq!(location.node, None);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn io_errors_are_untouched() {
        let err = Error::from(io::Error::new(io::ErrorKind::Other, "device gone"))
            .at_node(TreeKind::Catalog, 1);
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_malformed());
    }
}
