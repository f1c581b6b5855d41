//! Chat packets and the text transforms that run before broadcast:
//! language tagging, color-code rewriting and the censor pass.

use crate::client::Client;
use crate::net::support::NetworkResult;
use crate::packets::{PacketBuf, CHAT_TYPE};
use crate::version::Version;
use psokit::text;

/// Rewrite `<cc>C<x>` sequences to `\tC<x>` so the configured
/// color-chat character enables client color codes. Only fires when a
/// `C` follows and at least one character follows the `C`.
pub fn rewrite_color_codes(msg: &str, cc_char: u8) -> String {
    let mut bytes = msg.as_bytes().to_vec();
    let len = bytes.len();

    for i in 0..len {
        if bytes[i] == cc_char && i + 2 < len && bytes[i + 1] == b'C' {
            bytes[i] = b'\t';
        }
    }

    // The rewrite only touches single ASCII bytes.
    String::from_utf8(bytes).unwrap_or_else(|_| msg.to_string())
}

/// Replace censored words in the UTF-8 intermediate form. Runs once
/// before the per-recipient re-encoding.
pub fn censor(msg: &str, words: &[String]) -> String {
    let mut out = msg.to_string();

    for word in words {
        if word.is_empty() {
            continue;
        }

        let lower = out.to_lowercase();
        let target = word.to_lowercase();
        let mut result = String::with_capacity(out.len());
        let mut pos = 0;

        while let Some(found) = lower[pos..].find(&target) {
            let at = pos + found;
            result.push_str(&out[pos..at]);
            result.extend(std::iter::repeat('*').take(word.chars().count()));
            pos = at + target.len();
        }

        result.push_str(&out[pos..]);
        out = result;
    }

    out
}

/// Chat packet: session tag, the sender's guildcard and the message in
/// the recipient's encoding.
pub fn build_chat(recipient: Version, sender_gc: u32, msg: &str) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, CHAT_TYPE, 0);

    pkt.u32(0);
    pkt.u32(sender_gc);
    pkt.message(msg);

    pkt.finish()
}

pub fn send_chat(c: &mut Client, sender_gc: u32, msg: &str) -> NetworkResult<()> {
    let tagged = text::ensure_tagged(msg);
    let pkt = build_chat(c.version, sender_gc, &tagged);
    c.channel.enqueue(pkt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::frame::Header;

    #[test]
    fn color_char_rewrites_to_tab() {
        assert_eq!(rewrite_color_codes("$C3Hello", b'$'), "\tC3Hello");
        // No character after the C: left alone.
        assert_eq!(rewrite_color_codes("$C", b'$'), "$C");
        // Not followed by C: left alone.
        assert_eq!(rewrite_color_codes("$5Hello", b'$'), "$5Hello");
        // Mid-string occurrence.
        assert_eq!(rewrite_color_codes("hi $C7there", b'$'), "hi \tC7there");
    }

    #[test]
    fn censor_masks_words_case_insensitively() {
        let words = vec!["frog".to_string()];

        assert_eq!(censor("what a FROG day", &words), "what a **** day");
        assert_eq!(censor("clean message", &words), "clean message");
    }

    #[test]
    fn chat_packet_per_dialect_encoding() {
        let pc = build_chat(Version::Pc, 1234, "\tC3Hello");
        let hdr = Header::parse(Version::Pc, &pc);
        assert_eq!(hdr.pkt_type, CHAT_TYPE);

        // pad + gc, then UTF-16LE text.
        assert_eq!(&pc[8..12], &1234u32.to_le_bytes());
        assert_eq!(&pc[12..16], &[0x09, 0x00, b'C', 0x00]);

        let dc = build_chat(Version::Dcv2, 1234, "\tC3Hello");
        assert_eq!(&dc[12..20], b"\tC3Hello");
    }
}
