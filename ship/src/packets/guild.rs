//! Guild-card search replies and simple mail, both of which cross
//! dialects and blocks and therefore re-encode every text field.

use crate::client::Client;
use crate::net::support::NetworkResult;
use crate::packets::{PacketBuf, GUILD_REPLY_TYPE, SIMPLE_MAIL_TYPE};
use crate::version::Version;
use psokit::{text, time};

/// Everything a search reply needs to know about the target, collected
/// from the ship's online directory.
#[derive(Debug, Clone)]
pub struct GuildReplyInfo {
    pub guildcard: u32,
    pub name: String,
    pub lobby_name: String,
    pub block: u32,
    pub ship_name: String,
    pub ip: [u8; 4],
    /// Base (DC) port of the target's block; the recipient's dialect
    /// offset is added here.
    pub base_port: u16,
    pub menu_id: u32,
    pub item_id: u32,
}

impl GuildReplyInfo {
    /// `"<lobby-name>,BLOCK<nn>,<ship-name>"` location line.
    pub fn location_string(&self) -> String {
        format!(
            "{},BLOCK{:02},{}",
            self.lobby_name, self.block, self.ship_name
        )
    }
}

pub fn build_guild_reply(recipient: Version, info: &GuildReplyInfo) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, GUILD_REPLY_TYPE, 0);
    let port = info.base_port + recipient.port_offset();

    pkt.u32(0x0001_0000);
    pkt.u32(info.guildcard);
    pkt.u32(0);
    pkt.bytes(&info.ip);
    pkt.u16(port);
    pkt.u16(0);
    pkt.text(&info.location_string(), 0x44);
    pkt.u32(info.menu_id);
    pkt.u32(info.item_id);
    pkt.text(&info.name, 0x20);

    pkt.finish()
}

/// IPv6 variant, distinguished by flags = 6 and the wide address field.
pub fn build_guild_reply6(recipient: Version, info: &GuildReplyInfo, ip6: [u8; 16]) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, GUILD_REPLY_TYPE, 6);
    let port = info.base_port + recipient.port_offset();

    pkt.u32(0x0001_0000);
    pkt.u32(info.guildcard);
    pkt.u32(0);
    pkt.bytes(&ip6);
    pkt.u16(port);
    pkt.u16(0);
    pkt.text(&info.location_string(), 0x44);
    pkt.u32(info.menu_id);
    pkt.u32(info.item_id);
    pkt.text(&info.name, 0x20);

    pkt.finish()
}

pub fn send_guild_reply(c: &mut Client, info: &GuildReplyInfo) -> NetworkResult<()> {
    let pkt = build_guild_reply(c.version, info);
    c.channel.enqueue(pkt)
}

pub fn send_guild_reply6(c: &mut Client, info: &GuildReplyInfo, ip6: [u8; 16]) -> NetworkResult<()> {
    let pkt = build_guild_reply6(c.version, info, ip6);
    c.channel.enqueue(pkt)
}

/// A simple mail in dialect-neutral form.
#[derive(Debug, Clone)]
pub struct SimpleMail {
    pub sender_gc: u32,
    pub sender_name: String,
    pub dest_gc: u32,
    pub message: String,
}

/// Simple mail, re-encoded per recipient. Blue Burst additionally
/// carries a UTF-16 timestamp stamped at emission time.
pub fn build_simple_mail(recipient: Version, mail: &SimpleMail) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, SIMPLE_MAIL_TYPE, 0);

    pkt.u32(0x0001_0000);
    pkt.u32(mail.sender_gc);
    pkt.text(&mail.sender_name, 16);
    pkt.u32(mail.dest_gc);

    if recipient == Version::Bb {
        pkt.text_utf16(&time::mail_timestamp(), 0x40);
    }

    pkt.message(&text::ensure_tagged(&mail.message));

    pkt.finish()
}

pub fn send_simple_mail(c: &mut Client, mail: &SimpleMail) -> NetworkResult<()> {
    let pkt = build_simple_mail(c.version, mail);
    c.channel.enqueue(pkt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::frame::Header;

    fn info() -> GuildReplyInfo {
        GuildReplyInfo {
            guildcard: 424242,
            name: "\tEVash".to_string(),
            lobby_name: "BLOCK01-02".to_string(),
            block: 1,
            ship_name: "Aurora".to_string(),
            ip: [10, 0, 0, 5],
            base_port: 12000,
            menu_id: 0xFFFF_FFFF,
            item_id: 2,
        }
    }

    #[test]
    fn location_string_shape() {
        assert_eq!(info().location_string(), "BLOCK01-02,BLOCK01,Aurora");
    }

    #[test]
    fn port_adjusts_to_recipient_dialect() {
        let reply_dc = build_guild_reply(Version::Dcv2, &info());
        let reply_gc = build_guild_reply(Version::Gc, &info());
        let reply_ep3 = build_guild_reply(Version::Ep3, &info());

        // port lives after tag+gc+pad+ip = 16 bytes of body.
        let off = 4 + 16;
        assert_eq!(
            u16::from_le_bytes([reply_dc[off], reply_dc[off + 1]]),
            12000
        );
        assert_eq!(
            u16::from_le_bytes([reply_gc[off], reply_gc[off + 1]]),
            12002
        );
        assert_eq!(
            u16::from_le_bytes([reply_ep3[off], reply_ep3[off + 1]]),
            12003
        );
    }

    #[test]
    fn ipv6_reply_flags_the_variant() {
        let pkt = build_guild_reply6(Version::Gc, &info(), [0xFE; 16]);
        let hdr = Header::parse(Version::Gc, &pkt);

        assert_eq!(hdr.pkt_type, GUILD_REPLY_TYPE);
        assert_eq!(hdr.flags, 6);
    }

    #[test]
    fn bb_mail_carries_timestamp() {
        let mail = SimpleMail {
            sender_gc: 1,
            sender_name: "\tEMilly".to_string(),
            dest_gc: 2,
            message: "\tEhello there".to_string(),
        };

        let bb = build_simple_mail(Version::Bb, &mail);
        let dc = build_simple_mail(Version::Dcv2, &mail);

        // BB: 8 hdr + tag/gc 8 + name 32 + dest 4, then a 0x40-byte
        // UTF-16 stamp.
        let stamp_off = 8 + 8 + 32 + 4;
        let stamp = text::utf16le_to_utf8(&bb[stamp_off..stamp_off + 0x40]);
        assert_eq!(stamp.len(), 16);
        assert_eq!(&stamp[4..5], ".");

        // DC mail has no timestamp field: name(16) + dest follows tag.
        assert_eq!(&dc[4 + 8 + 16..4 + 8 + 20], &2u32.to_le_bytes());
    }
}
