use crate::net::support::{ErrorType, NetworkError, NetworkResult};
use crate::version::{HeaderVariant, Version};
use byteorder::{ByteOrder, LittleEndian};

pub const MAX_HDR_SIZE: usize = 8;

/// A decoded packet header. The three wire shapes all carry a type, a
/// flags field and a total length (header included); they differ only in
/// field widths and ordering.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Header {
    pub pkt_type: u16,
    pub flags: u32,
    pub len: u16,
}

impl Header {
    #[inline]
    pub fn new(pkt_type: u16, flags: u32, len: u16) -> Header {
        Header {
            pkt_type,
            flags,
            len,
        }
    }

    /// Decode a header from `raw`, which must hold at least
    /// `version.hdr_size()` bytes of decrypted stream.
    pub fn parse(version: Version, raw: &[u8]) -> Header {
        match version.header_variant() {
            HeaderVariant::A => Header {
                pkt_type: u16::from(raw[0]),
                flags: u32::from(raw[1]),
                len: LittleEndian::read_u16(&raw[2..4]),
            },
            HeaderVariant::B => Header {
                len: LittleEndian::read_u16(&raw[0..2]),
                pkt_type: u16::from(raw[2]),
                flags: u32::from(raw[3]),
            },
            HeaderVariant::C => Header {
                len: LittleEndian::read_u16(&raw[0..2]),
                pkt_type: LittleEndian::read_u16(&raw[2..4]),
                flags: LittleEndian::read_u32(&raw[4..8]),
            },
        }
    }

    /// Encode the header into the first `version.hdr_size()` bytes of
    /// `out`.
    pub fn write(&self, version: Version, out: &mut [u8]) {
        match version.header_variant() {
            HeaderVariant::A => {
                out[0] = self.pkt_type as u8;
                out[1] = self.flags as u8;
                LittleEndian::write_u16(&mut out[2..4], self.len);
            }
            HeaderVariant::B => {
                LittleEndian::write_u16(&mut out[0..2], self.len);
                out[2] = self.pkt_type as u8;
                out[3] = self.flags as u8;
            }
            HeaderVariant::C => {
                LittleEndian::write_u16(&mut out[0..2], self.len);
                LittleEndian::write_u16(&mut out[2..4], self.pkt_type);
                LittleEndian::write_u32(&mut out[4..8], self.flags);
            }
        }
    }

    /// Validate the length field against the header size and return the
    /// transport length: the declared length rounded up to the next
    /// multiple of the header size.
    pub fn transport_len(&self, hdr_size: usize) -> NetworkResult<usize> {
        let len = self.len as usize;

        if len < hdr_size {
            return Err(NetworkError::Fatal(ErrorType::BadLength));
        }

        Ok(round_up(len, hdr_size))
    }
}

/// Round `len` up to the next multiple of `align` (a power of two).
#[inline]
pub fn round_up(len: usize, align: usize) -> usize {
    (len + align - 1) & !(align - 1)
}
