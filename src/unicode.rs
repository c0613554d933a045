//! Catalog name collation.
//!
//! HFS Plus catalogs always compare names case-insensitively. HFSX catalogs
//! record their choice in the B-tree header: either the same case-folded
//! comparison or a plain binary comparison of UTF-16 code units.

use std::cmp::Ordering;

use hfs_types_rs::BTreeKeyCompareType;

/// How catalog names are ordered within one volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collation {
    /// Unsigned code unit comparison, shorter name first on a common prefix.
    Binary,
    /// Comparison after case folding, ignoring code units with no collation
    /// weight.
    ///
    /// Folding uses the standard library's single-character lowercase
    /// mapping rather than Apple's fixed table, so a few non-Latin names
    /// (Georgian capitals, for one) can order differently than on a Mac and
    /// fail an exact-name lookup.
    CaseFolding,
}

impl Collation {
    pub fn compare(self, a: &[u16], b: &[u16]) -> Ordering {
        match self {
            Collation::Binary => a.cmp(b),
            Collation::CaseFolding => compare_case_folded(a, b),
        }
    }
}

impl From<Collation> for BTreeKeyCompareType {
    fn from(value: Collation) -> Self {
        match value {
            Collation::Binary => BTreeKeyCompareType::BinaryCompare,
            Collation::CaseFolding => BTreeKeyCompareType::CaseFolding,
        }
    }
}

/// Fold a single code unit. Zero means the unit is skipped entirely.
///
/// Lowercasing only applies when it maps one BMP character to another; lone
/// surrogates and multi-character expansions compare by value.
pub fn fold(unit: u16) -> u16 {
    match unit {
        // NUL sorts after everything else
        0x0000 => 0xFFFF,
        0x200C..=0x200F | 0x202A..=0x202E | 0x206A..=0x206F | 0xFEFF => 0,
        0xD800..=0xDFFF => unit,
        0x0041..=0x005A => unit + 0x20,
        0x0000..=0x007F => unit,
        _ => {
            let Some(c) = char::from_u32(u32::from(unit)) else {
                return unit;
            };
            let mut lower = c.to_lowercase();
            match (lower.next(), lower.next()) {
                (Some(l), None) => u16::try_from(u32::from(l)).unwrap_or(unit),
                _ => unit,
            }
        }
    }
}

/// Case-insensitive ordering of two names.
pub fn compare_case_folded(a: &[u16], b: &[u16]) -> Ordering {
    let mut a = a.iter().map(|&u| fold(u)).filter(|&u| u != 0);
    let mut b = b.iter().map(|&u| fold(u)).filter(|&u| u != 0);
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match x.cmp(&y) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn binary_is_case_sensitive() {
        let c = Collation::Binary;
        assert_eq!(c.compare(&utf16("B"), &utf16("a")), Ordering::Less);
        assert_eq!(c.compare(&utf16("ab"), &utf16("abc")), Ordering::Less);
        assert_eq!(c.compare(&utf16(""), &utf16("")), Ordering::Equal);
        assert_eq!(c.compare(&[0xFFFF], &[0x0041]), Ordering::Greater);
    }

    #[test]
    fn folding_ignores_case() {
        let c = Collation::CaseFolding;
        assert_eq!(c.compare(&utf16("Documents"), &utf16("DOCUMENTS")), Ordering::Equal);
        assert_eq!(c.compare(&utf16("a"), &utf16("B")), Ordering::Less);
        assert_eq!(c.compare(&utf16("ÉCOLE"), &utf16("école")), Ordering::Equal);
        assert_eq!(c.compare(&utf16("Straße"), &utf16("STRASSE")), Ordering::Greater);
    }

    #[test]
    fn folding_skips_ignorable_units() {
        let c = Collation::CaseFolding;
        let joined = vec![0x0061, 0x200D, 0x0062];
        assert_eq!(c.compare(&joined, &utf16("AB")), Ordering::Equal);
        assert_eq!(c.compare(&[0xFEFF], &[]), Ordering::Equal);
    }

    #[test]
    fn nul_sorts_last() {
        let c = Collation::CaseFolding;
        assert_eq!(c.compare(&[0x0000], &[0xFFFE]), Ordering::Greater);
        assert_eq!(c.compare(&[0x0000], &[0xFFFF]), Ordering::Equal);
    }

    #[test]
    fn surrogates_compare_by_value() {
        assert_eq!(fold(0xD83D), 0xD83D);
        assert_eq!(fold(0x0130), 0x0130);
        assert_eq!(fold(0x0391), 0x03B1);
    }
}
