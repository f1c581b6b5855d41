//! Text encoding conversion between the wire encodings the legacy
//! clients speak (Shift-JIS, ISO-8859-1, UTF-16LE) and the UTF-8 the
//! server works in internally.
//!
//! Every conversion is best-effort: unmappable characters are replaced
//! rather than failing the packet. 8-bit strings are assumed Shift-JIS
//! when they carry the `\tJ` language tag and ISO-8859-1 otherwise.

use encoding_rs::{SHIFT_JIS, WINDOWS_1252};

/// Language tag marking a string as Japanese-encoded.
pub const TAG_JAPANESE: &str = "\tJ";
/// Language tag marking a string as Western-encoded.
pub const TAG_ENGLISH: &str = "\tE";

/// True if the string carries the Japanese language tag.
#[inline]
pub fn is_japanese(s: &str) -> bool {
    s.starts_with(TAG_JAPANESE)
}

/// Ensure a chat/name string starts with one of the two language tags,
/// prefixing `\tE` when none is present.
pub fn ensure_tagged(s: &str) -> String {
    if s.starts_with(TAG_JAPANESE) || s.starts_with(TAG_ENGLISH) {
        s.to_string()
    } else {
        let mut tagged = String::with_capacity(s.len() + 2);
        tagged.push_str(TAG_ENGLISH);
        tagged.push_str(s);
        tagged
    }
}

/// Strip a trailing NUL run from an 8-bit wire string.
#[inline]
pub fn strip_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

/// Decode a Shift-JIS byte string to UTF-8.
pub fn sjis_to_utf8(bytes: &[u8]) -> String {
    let (out, _, _) = SHIFT_JIS.decode(strip_nul(bytes));
    out.into_owned()
}

/// Decode an ISO-8859-1 byte string to UTF-8. Windows-1252 is used as
/// the decoder since it is a superset on the range the clients emit.
pub fn iso8859_to_utf8(bytes: &[u8]) -> String {
    let (out, _, _) = WINDOWS_1252.decode(strip_nul(bytes));
    out.into_owned()
}

/// Decode an 8-bit wire string, picking the source encoding off the
/// language tag.
pub fn decode_8bit(bytes: &[u8]) -> String {
    let stripped = strip_nul(bytes);

    if stripped.starts_with(TAG_JAPANESE.as_bytes()) {
        sjis_to_utf8(stripped)
    } else {
        iso8859_to_utf8(stripped)
    }
}

/// Encode UTF-8 to Shift-JIS, substituting unmappable characters.
pub fn utf8_to_sjis(s: &str) -> Vec<u8> {
    let (out, _, _) = SHIFT_JIS.encode(s);
    out.into_owned()
}

/// Encode UTF-8 to ISO-8859-1 (via Windows-1252), substituting
/// unmappable characters.
pub fn utf8_to_8859(s: &str) -> Vec<u8> {
    let (out, _, _) = WINDOWS_1252.encode(s);
    out.into_owned()
}

/// Encode an 8-bit wire string, picking the target encoding off the
/// language tag.
pub fn encode_8bit(s: &str) -> Vec<u8> {
    if is_japanese(s) {
        utf8_to_sjis(s)
    } else {
        utf8_to_8859(s)
    }
}

/// Encode UTF-8 to UTF-16LE bytes.
pub fn utf8_to_utf16le(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() * 2);

    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }

    out
}

/// Decode UTF-16LE bytes to UTF-8, stopping at the first NUL unit. An
/// odd trailing byte is dropped.
pub fn utf16le_to_utf8(bytes: &[u8]) -> String {
    let mut units = Vec::with_capacity(bytes.len() / 2);

    for pair in bytes.chunks_exact(2) {
        let unit = u16::from_le_bytes([pair[0], pair[1]]);

        if unit == 0 {
            break;
        }

        units.push(unit);
    }

    String::from_utf16_lossy(&units)
}

/// Copy a UTF-8 string into a fixed-size 8-bit wire field, NUL padded
/// and always NUL terminated.
pub fn write_8bit_fixed(s: &str, field: &mut [u8]) {
    let encoded = encode_8bit(s);
    let len = encoded.len().min(field.len().saturating_sub(1));

    field[..len].copy_from_slice(&encoded[..len]);

    for byte in field[len..].iter_mut() {
        *byte = 0;
    }
}

/// Copy a UTF-8 string into a fixed-size UTF-16LE wire field, NUL padded
/// and always NUL terminated.
pub fn write_utf16_fixed(s: &str, field: &mut [u8]) {
    let encoded = utf8_to_utf16le(s);
    let mut len = encoded.len().min(field.len().saturating_sub(2));
    len &= !1;

    field[..len].copy_from_slice(&encoded[..len]);

    for byte in field[len..].iter_mut() {
        *byte = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_survives_8859() {
        let msg = "\tEHello, world";
        let bytes = encode_8bit(msg);
        assert_eq!(decode_8bit(&bytes), msg);
    }

    #[test]
    fn tagged_japanese_goes_through_sjis() {
        let msg = "\tJこんにちは";
        let bytes = encode_8bit(msg);
        assert_eq!(decode_8bit(&bytes), msg);
    }

    #[test]
    fn basic_latin_roundtrips_utf16() {
        let msg = "Lobby 01";
        let bytes = utf8_to_utf16le(msg);
        assert_eq!(bytes.len(), msg.len() * 2);
        assert_eq!(utf16le_to_utf8(&bytes), msg);
    }

    #[test]
    fn utf16_decode_stops_at_nul() {
        let mut bytes = utf8_to_utf16le("abc");
        bytes.extend_from_slice(&[0, 0, b'x', 0]);
        assert_eq!(utf16le_to_utf8(&bytes), "abc");
    }

    #[test]
    fn ensure_tagged_leaves_tags_alone() {
        assert_eq!(ensure_tagged("\tJfoo"), "\tJfoo");
        assert_eq!(ensure_tagged("\tEfoo"), "\tEfoo");
        assert_eq!(ensure_tagged("foo"), "\tEfoo");
    }

    #[test]
    fn fixed_field_is_terminated() {
        let mut field = [0xFFu8; 8];
        write_8bit_fixed("\tElongerthanfield", &mut field);
        assert_eq!(field[7], 0);

        let mut wfield = [0xFFu8; 10];
        write_utf16_fixed("abcdefgh", &mut wfield);
        assert_eq!(&wfield[8..], &[0, 0]);
    }
}
