//! Client dialect descriptors. A dialect fixes the header shape, cipher
//! family, payload text encoding and the port the client connects on.

pub const VERSION_COUNT: usize = 6;
pub const LANG_COUNT: usize = 8;

pub const LANG_JAPANESE: u8 = 0;
pub const LANG_ENGLISH: u8 = 1;

/// Directory codes for the per-language quest trees.
pub const LANGUAGE_CODES: [&str; LANG_COUNT] = ["jp", "en", "de", "fr", "es", "cs", "ct", "kr"];

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum Version {
    Dcv1 = 0,
    Dcv2 = 1,
    Pc = 2,
    Gc = 3,
    Ep3 = 4,
    Bb = 5,
}

/// Packet header shapes. Variant A is shared by DC, GC and Episode 3;
/// variant B moves the length field first (PC); variant C is the 8-byte
/// Blue Burst header.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HeaderVariant {
    A,
    B,
    C,
}

impl Version {
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(idx: usize) -> Option<Version> {
        match idx {
            0 => Some(Version::Dcv1),
            1 => Some(Version::Dcv2),
            2 => Some(Version::Pc),
            3 => Some(Version::Gc),
            4 => Some(Version::Ep3),
            5 => Some(Version::Bb),
            _ => None,
        }
    }

    /// Size of the packet header for this dialect.
    #[inline]
    pub fn hdr_size(self) -> usize {
        match self {
            Version::Bb => 8,
            _ => 4,
        }
    }

    #[inline]
    pub fn header_variant(self) -> HeaderVariant {
        match self {
            Version::Pc => HeaderVariant::B,
            Version::Bb => HeaderVariant::C,
            _ => HeaderVariant::A,
        }
    }

    /// Offset added to the block's base port for this dialect's
    /// listening socket.
    #[inline]
    pub fn port_offset(self) -> u16 {
        match self {
            Version::Dcv1 | Version::Dcv2 => 0,
            Version::Pc => 1,
            Version::Gc => 2,
            Version::Ep3 => 3,
            Version::Bb => 4,
        }
    }

    /// True when the dialect's text payloads are UTF-16LE rather than
    /// 8-bit Shift-JIS/ISO-8859-1.
    #[inline]
    pub fn uses_utf16(self) -> bool {
        matches!(self, Version::Pc | Version::Bb)
    }

    #[inline]
    pub fn is_dc(self) -> bool {
        matches!(self, Version::Dcv1 | Version::Dcv2)
    }

    /// Directory code for the per-version quest trees.
    pub fn quest_code(self) -> &'static str {
        match self {
            Version::Dcv1 => "v1",
            Version::Dcv2 => "v2",
            Version::Pc => "pc",
            Version::Gc => "gc",
            Version::Ep3 => "e3",
            Version::Bb => "bb",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Version::Dcv1 => "DCv1",
            Version::Dcv2 => "DCv2",
            Version::Pc => "PC",
            Version::Gc => "GC",
            Version::Ep3 => "Ep3",
            Version::Bb => "BB",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_sizes() {
        assert_eq!(Version::Dcv1.hdr_size(), 4);
        assert_eq!(Version::Pc.hdr_size(), 4);
        assert_eq!(Version::Bb.hdr_size(), 8);
    }

    #[test]
    fn port_layout_is_consecutive() {
        let offsets: Vec<u16> = [
            Version::Dcv1,
            Version::Pc,
            Version::Gc,
            Version::Ep3,
            Version::Bb,
        ]
        .iter()
        .map(|v| v.port_offset())
        .collect();

        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn index_roundtrip() {
        for idx in 0..VERSION_COUNT {
            assert_eq!(Version::from_index(idx).unwrap().index(), idx);
        }
        assert!(Version::from_index(VERSION_COUNT).is_none());
    }
}
