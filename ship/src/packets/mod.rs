//! Outbound packet constructors. Each constructor formats a packet in
//! the recipient's dialect (header shape, field widths, text encoding)
//! and hands it to the session channel, which pads and encrypts.

pub mod chat;
pub mod game;
pub mod guild;
pub mod info;
pub mod lobby;
pub mod menu;
pub mod quest;

use crate::client::Client;
use crate::net::frame::Header;
use crate::net::support::NetworkResult;
use crate::version::Version;
use byteorder::{LittleEndian, WriteBytesExt};
use psokit::crypto::BB_SEED_SIZE;
use psokit::text;
use psokit::time;

// Packet types, shared across dialects unless noted.
pub const WELCOME_TYPE: u16 = 0x02;
pub const BB_WELCOME_TYPE: u16 = 0x03;
pub const SECURITY_TYPE: u16 = 0x04;
pub const BURST_TYPE: u16 = 0x05;
pub const CHAT_TYPE: u16 = 0x06;
pub const BLOCK_LIST_TYPE: u16 = 0x07;
pub const GAME_LIST_TYPE: u16 = 0x08;
pub const INFO_REQUEST_TYPE: u16 = 0x09;
pub const DC_GAME_CREATE_TYPE: u16 = 0x0C;
pub const MENU_SELECT_TYPE: u16 = 0x10;
pub const INFO_REPLY_TYPE: u16 = 0x11;
pub const QUEST_CHUNK_TYPE: u16 = 0x13;
pub const REDIRECT_TYPE: u16 = 0x19;
pub const MSG1_TYPE: u16 = 0x1A;
pub const PING_TYPE: u16 = 0x1D;
pub const LOBBY_INFO_TYPE: u16 = 0x1F;
pub const GUILD_SEARCH_TYPE: u16 = 0x40;
pub const GUILD_REPLY_TYPE: u16 = 0x41;
pub const QUEST_FILE_TYPE: u16 = 0x44;
pub const GAME_COMMAND0_TYPE: u16 = 0x60;
pub const CHAR_DATA_TYPE: u16 = 0x61;
pub const GAME_COMMAND2_TYPE: u16 = 0x62;
pub const GAME_JOIN_TYPE: u16 = 0x64;
pub const GAME_ADD_PLAYER_TYPE: u16 = 0x65;
pub const GAME_LEAVE_TYPE: u16 = 0x66;
pub const LOBBY_JOIN_TYPE: u16 = 0x67;
pub const LOBBY_ADD_PLAYER_TYPE: u16 = 0x68;
pub const LOBBY_LEAVE_TYPE: u16 = 0x69;
pub const GAME_COMMANDC_TYPE: u16 = 0x6C;
pub const GAME_COMMANDD_TYPE: u16 = 0x6D;
pub const DONE_BURST_TYPE: u16 = 0x6F;
pub const SIMPLE_MAIL_TYPE: u16 = 0x81;
pub const LOBBY_LIST_TYPE: u16 = 0x83;
pub const LOBBY_CHANGE_TYPE: u16 = 0x84;
pub const LOBBY_ARROW_LIST_TYPE: u16 = 0x88;
pub const LOBBY_ARROW_CHANGE_TYPE: u16 = 0x89;
pub const LOBBY_NAME_TYPE: u16 = 0x8A;
pub const LOGIN_8B_TYPE: u16 = 0x8B;
pub const LOGIN_93_TYPE: u16 = 0x93;
pub const CHAR_DATA_REQUEST_TYPE: u16 = 0x95;
pub const LOGIN_9D_TYPE: u16 = 0x9D;
pub const LOGIN_9E_TYPE: u16 = 0x9E;
pub const SHIP_LIST_TYPE: u16 = 0xA0;
pub const BLOCK_LIST_REQ_TYPE: u16 = 0xA1;
pub const QUEST_LIST_TYPE: u16 = 0xA2;
pub const QUEST_INFO_TYPE: u16 = 0xA3;
pub const QUEST_END_LIST_TYPE: u16 = 0xA9;
pub const QUEST_LOAD_DONE_TYPE: u16 = 0xAC;
pub const TEXT_MSG_TYPE: u16 = 0xB0;
pub const TIMESTAMP_TYPE: u16 = 0xB1;
pub const CHOICE_OPTION_TYPE: u16 = 0xC0;
pub const CHOICE_SETTING_TYPE: u16 = 0xC1;
pub const CHOICE_SEARCH_TYPE: u16 = 0xC2;
pub const CHOICE_REPLY_TYPE: u16 = 0xC3;
pub const C_RANK_TYPE: u16 = 0xC5;
pub const BLACKLIST_TYPE: u16 = 0xC6;
pub const AUTOREPLY_SET_TYPE: u16 = 0xC7;
pub const AUTOREPLY_CLEAR_TYPE: u16 = 0xC8;
pub const MSG_BOX_TYPE: u16 = 0xD5;
pub const INFOBOARD_TYPE: u16 = 0xD8;
pub const INFOBOARD_WRITE_TYPE: u16 = 0xD9;
pub const LOBBY_EVENT_TYPE: u16 = 0xDA;
pub const BB_OPTION_UPDATE_TYPE: u16 = 0x00ED;
pub const BB_SECURITY_TYPE: u16 = 0x00E6;
pub const BB_FULL_CHARACTER_TYPE: u16 = 0x00E7;

// Menu ids for the select packets.
pub const MENU_ID_INFODESK: u32 = 0x0000_0000;
pub const MENU_ID_BLOCK: u32 = 0x0000_0001;
pub const MENU_ID_GAME: u32 = 0x0000_0002;
pub const MENU_ID_QCATEGORY: u32 = 0x0000_0003;
pub const MENU_ID_QUEST: u32 = 0x0000_0004;
pub const MENU_ID_SHIP: u32 = 0x0000_0005;
pub const MENU_ID_GAME_TYPE: u32 = 0x0000_0006;
pub const MENU_ID_GM: u32 = 0x0000_0007;
pub const MENU_ID_LOBBY: u32 = 0xFFFF_FFFF;

/// The copyright banner the legacy clients expect verbatim in the
/// welcome packet.
pub const DC_WELCOME_COPYRIGHT: &str = "DreamCast Lobby Server. Copyright SEGA Enterprises. 1999";
pub const BB_WELCOME_COPYRIGHT: &str =
    "Phantasy Star Online Blue Burst Game Server. Copyright 1999-2004 SONICTEAM.";

/// Sequential packet writer. Reserves header space up front and patches
/// the length field when finished; the channel pads to alignment.
pub struct PacketBuf {
    version: Version,
    pkt_type: u16,
    flags: u32,
    buf: Vec<u8>,
}

impl PacketBuf {
    pub fn new(version: Version, pkt_type: u16, flags: u32) -> PacketBuf {
        PacketBuf {
            version,
            pkt_type,
            flags,
            buf: vec![0u8; version.hdr_size()],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Direct access to the backing storage for serializers that write
    /// whole records (disp data, inventories).
    #[inline]
    pub fn raw_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    #[inline]
    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    #[inline]
    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.write_u16::<LittleEndian>(v).unwrap();
        self
    }

    #[inline]
    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.write_u32::<LittleEndian>(v).unwrap();
        self
    }

    #[inline]
    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.buf.write_f32::<LittleEndian>(v).unwrap();
        self
    }

    #[inline]
    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    #[inline]
    pub fn zeros(&mut self, count: usize) -> &mut Self {
        self.buf.resize(self.buf.len() + count, 0);
        self
    }

    /// Fixed-width 8-bit text field, NUL padded/terminated.
    pub fn text_8bit(&mut self, s: &str, width: usize) -> &mut Self {
        let start = self.buf.len();
        self.buf.resize(start + width, 0);
        text::write_8bit_fixed(s, &mut self.buf[start..]);
        self
    }

    /// Fixed-width UTF-16LE text field, NUL padded/terminated.
    pub fn text_utf16(&mut self, s: &str, width: usize) -> &mut Self {
        let start = self.buf.len();
        self.buf.resize(start + width, 0);
        text::write_utf16_fixed(s, &mut self.buf[start..]);
        self
    }

    /// Fixed-width text field in the recipient's encoding.
    pub fn text(&mut self, s: &str, width_8bit: usize) -> &mut Self {
        if self.version.uses_utf16() {
            self.text_utf16(s, width_8bit * 2)
        } else {
            self.text_8bit(s, width_8bit)
        }
    }

    /// Variable-length message body in the recipient's encoding, NUL
    /// terminated.
    pub fn message(&mut self, s: &str) -> &mut Self {
        if self.version.uses_utf16() {
            let encoded = text::utf8_to_utf16le(s);
            self.buf.extend_from_slice(&encoded);
            self.buf.extend_from_slice(&[0, 0]);
        } else {
            let encoded = text::encode_8bit(s);
            self.buf.extend_from_slice(&encoded);
            self.buf.push(0);
        }
        self
    }

    /// Patch the header and return the formatted packet.
    pub fn finish(mut self) -> Vec<u8> {
        let len = self.buf.len() as u16;
        let hdr = Header::new(self.pkt_type, self.flags, len);
        let hdr_size = self.version.hdr_size();
        hdr.write(self.version, &mut self.buf[..hdr_size]);
        self.buf
    }

    /// Patch the header with late-bound flags (entry counts).
    pub fn finish_with_flags(mut self, flags: u32) -> Vec<u8> {
        self.flags = flags;
        self.finish()
    }
}

/// Send a header-only packet (pings, burst markers, simple acks).
pub fn send_simple(c: &mut Client, pkt_type: u16, flags: u32) -> NetworkResult<()> {
    let pkt = PacketBuf::new(c.version, pkt_type, flags).finish();
    c.channel.enqueue(pkt)
}

/// Build the plaintext welcome packet carrying the copyright banner and
/// the two seeds.
pub fn build_welcome(version: Version, svect: u32, cvect: u32) -> Vec<u8> {
    let mut pkt = PacketBuf::new(version, WELCOME_TYPE, 0);

    pkt.text_8bit(DC_WELCOME_COPYRIGHT, 0x40);
    pkt.u32(svect);
    pkt.u32(cvect);

    pkt.finish()
}

/// Build the Blue Burst welcome packet with its 48-byte vectors.
pub fn build_bb_welcome(svect: &[u8; BB_SEED_SIZE], cvect: &[u8; BB_SEED_SIZE]) -> Vec<u8> {
    let mut pkt = PacketBuf::new(Version::Bb, BB_WELCOME_TYPE, 0);

    pkt.text_8bit(BB_WELCOME_COPYRIGHT, 0x60);
    pkt.bytes(svect);
    pkt.bytes(cvect);

    pkt.finish()
}

/// Security packet: the client's session tag and guildcard, plus any
/// opaque security blob to be echoed back on login elsewhere.
pub fn send_security(c: &mut Client, gc: u32, data: &[u8]) -> NetworkResult<()> {
    let pkt = if c.version == Version::Bb {
        let mut pkt = PacketBuf::new(Version::Bb, BB_SECURITY_TYPE, 0);
        pkt.u32(0); // error code
        pkt.u32(0x0001_0000);
        pkt.u32(gc);
        pkt.u32(0); // team id
        pkt.bytes(data);
        pkt.zeros(40usize.saturating_sub(data.len()));
        pkt.u32(0x0000_0102); // client capabilities
        pkt.finish()
    } else {
        let mut pkt = PacketBuf::new(c.version, SECURITY_TYPE, 0);
        pkt.u32(0x0001_0000);
        pkt.u32(gc);
        pkt.bytes(data);
        pkt.finish()
    };

    c.channel.enqueue(pkt)
}

/// Redirect the client to another address (IPv4).
pub fn send_redirect(c: &mut Client, ip: [u8; 4], port: u16) -> NetworkResult<()> {
    let mut pkt = PacketBuf::new(c.version, REDIRECT_TYPE, 0);

    pkt.bytes(&ip);
    pkt.u16(port);
    pkt.u16(0);

    c.channel.enqueue(pkt.finish())
}

/// Redirect the client to another address (IPv6).
pub fn send_redirect6(c: &mut Client, ip: [u8; 16], port: u16) -> NetworkResult<()> {
    let mut pkt = PacketBuf::new(c.version, REDIRECT_TYPE, 6);

    pkt.bytes(&ip);
    pkt.u16(port);
    pkt.u16(0);

    c.channel.enqueue(pkt.finish())
}

/// Wall-clock timestamp packet.
pub fn send_timestamp(c: &mut Client) -> NetworkResult<()> {
    let mut pkt = PacketBuf::new(c.version, TIMESTAMP_TYPE, 0);

    pkt.text_8bit(&time::packet_timestamp(), 28);

    c.channel.enqueue(pkt.finish())
}

/// One-line message shown in the client's message area.
pub fn send_message1(c: &mut Client, msg: &str) -> NetworkResult<()> {
    send_message(c, MSG1_TYPE, msg)
}

/// Chat-log text message (command feedback and the like).
pub fn send_txt(c: &mut Client, msg: &str) -> NetworkResult<()> {
    send_message(c, TEXT_MSG_TYPE, msg)
}

/// Boxed message that interrupts the client UI.
pub fn send_msg_box(c: &mut Client, msg: &str) -> NetworkResult<()> {
    send_message(c, MSG_BOX_TYPE, msg)
}

/// Information reply for the info-desk and menu info requests.
pub fn send_info_reply(c: &mut Client, msg: &str) -> NetworkResult<()> {
    send_message(c, INFO_REPLY_TYPE, msg)
}

fn send_message(c: &mut Client, pkt_type: u16, msg: &str) -> NetworkResult<()> {
    let tagged = text::ensure_tagged(msg);
    let mut pkt = PacketBuf::new(c.version, pkt_type, 0);

    pkt.message(&tagged);

    c.channel.enqueue(pkt.finish())
}

/// Boxed multi-line ban notice, sent right before the disconnect.
pub fn send_ban_msg(c: &mut Client, until: u64, reason: &str) -> NetworkResult<()> {
    let mut msg = String::from("\tEYou have been banned from this ship.");

    if until == 0 {
        msg.push_str("\nYour ban does not expire.");
    } else {
        msg.push_str("\nYour ban ends at the posted time.");
    }

    if !reason.is_empty() {
        msg.push_str("\nReason: ");
        msg.push_str(reason);
    }

    send_msg_box(c, &msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::frame::Header;

    #[test]
    fn welcome_carries_banner_and_seeds() {
        let pkt = build_welcome(Version::Dcv2, 0xAABBCCDD, 0x11223344);
        let hdr = Header::parse(Version::Dcv2, &pkt);

        assert_eq!(hdr.pkt_type, WELCOME_TYPE);
        assert_eq!(hdr.len as usize, pkt.len());
        assert_eq!(pkt.len(), 4 + 0x40 + 8);

        let banner = &pkt[4..4 + DC_WELCOME_COPYRIGHT.len()];
        assert_eq!(banner, DC_WELCOME_COPYRIGHT.as_bytes());

        let svect = &pkt[4 + 0x40..4 + 0x44];
        assert_eq!(svect, &[0xDD, 0xCC, 0xBB, 0xAA]);
    }

    #[test]
    fn bb_welcome_is_eight_byte_framed() {
        let svect = [1u8; BB_SEED_SIZE];
        let cvect = [2u8; BB_SEED_SIZE];
        let pkt = build_bb_welcome(&svect, &cvect);
        let hdr = Header::parse(Version::Bb, &pkt);

        assert_eq!(hdr.pkt_type, BB_WELCOME_TYPE);
        assert_eq!(pkt.len(), 8 + 0x60 + 96);
        assert_eq!(&pkt[8 + 0x60..8 + 0x60 + 48], &svect[..]);
    }

    #[test]
    fn pc_header_layout_in_builder() {
        let pkt = PacketBuf::new(Version::Pc, MSG1_TYPE, 0).finish();

        // Variant B: length first, then type.
        assert_eq!(pkt[0], 4);
        assert_eq!(pkt[2], MSG1_TYPE as u8);
    }

    #[test]
    fn message_encoding_follows_dialect() {
        let mut dc = PacketBuf::new(Version::Dcv2, MSG1_TYPE, 0);
        dc.message("\tEhi");
        let dc_pkt = dc.finish();
        assert_eq!(&dc_pkt[4..], b"\tEhi\0");

        let mut pc = PacketBuf::new(Version::Pc, MSG1_TYPE, 0);
        pc.message("\tEhi");
        let pc_pkt = pc.finish();
        assert_eq!(pc_pkt.len() - 4, 2 * 4 + 2);
        assert_eq!(&pc_pkt[4..8], &[0x09, 0x00, b'E', 0x00]);
    }
}
