//! Lobby-scope aggregate packets: info boards, C-rank data and the
//! choice search surface.

use crate::client::Client;
use crate::net::support::NetworkResult;
use crate::packets::{
    PacketBuf, CHOICE_OPTION_TYPE, CHOICE_REPLY_TYPE, C_RANK_TYPE, INFOBOARD_TYPE,
};
use crate::player::{c_rank_size, reshape_c_rank};
use crate::version::Version;

/// One member's info board, already in UTF-8.
#[derive(Debug, Clone)]
pub struct InfoboardEntry {
    pub name: String,
    pub board: String,
}

/// Aggregate info-board packet for the recipient's lobby.
pub fn build_infoboard(recipient: Version, entries: &[InfoboardEntry]) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, INFOBOARD_TYPE, 0);

    for entry in entries {
        pkt.text(&entry.name, 0x10);
        pkt.text(&entry.board, 0xAC);
    }

    pkt.finish_with_flags(entries.len() as u32)
}

pub fn send_infoboard(c: &mut Client, entries: &[InfoboardEntry]) -> NetworkResult<()> {
    let pkt = build_infoboard(c.version, entries);
    c.channel.enqueue(pkt)
}

/// One member's C-rank blob in the canonical (largest) shape.
#[derive(Debug, Clone)]
pub struct CRankEntry {
    pub client_id: u32,
    pub blob: Vec<u8>,
}

/// Aggregate C-rank packet; every blob reshapes to the recipient's
/// dialect-specific entry size.
pub fn build_c_rank(recipient: Version, entries: &[CRankEntry]) -> Vec<u8> {
    let size = c_rank_size(recipient);
    let mut pkt = PacketBuf::new(recipient, C_RANK_TYPE, 0);

    for entry in entries {
        pkt.u32(entry.client_id);
        let shaped = reshape_c_rank(&entry.blob, size);
        pkt.bytes(&shaped);
    }

    pkt.finish_with_flags(entries.len() as u32)
}

pub fn send_c_rank(c: &mut Client, entries: &[CRankEntry]) -> NetworkResult<()> {
    let pkt = build_c_rank(c.version, entries);
    c.channel.enqueue(pkt)
}

/// The choice-search option list: class and level band filters.
pub fn send_choice_search_options(c: &mut Client) -> NetworkResult<()> {
    const OPTIONS: [(u32, u32, &str); 5] = [
        (0x00, 0x0001, "\tEAny Class"),
        (0x00, 0x0002, "\tEHunter"),
        (0x00, 0x0003, "\tERanger"),
        (0x00, 0x0004, "\tEForce"),
        (0x01, 0x0001, "\tEAny Level"),
    ];

    let mut pkt = PacketBuf::new(c.version, CHOICE_OPTION_TYPE, 0);

    for (menu, item, label) in OPTIONS.iter() {
        pkt.u16(*menu as u16);
        pkt.u16(*item as u16);
        pkt.text(label, 0x1C);
    }

    c.channel.enqueue(pkt.finish_with_flags(OPTIONS.len() as u32))
}

/// One row of a choice-search reply.
#[derive(Debug, Clone)]
pub struct ChoiceReplyEntry {
    pub guildcard: u32,
    pub name: String,
    pub info: String,
    pub location: String,
    pub ip: [u8; 4],
    pub port: u16,
    pub menu_id: u32,
    pub item_id: u32,
}

pub fn build_choice_reply(recipient: Version, entries: &[ChoiceReplyEntry]) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, CHOICE_REPLY_TYPE, 0);

    for entry in entries {
        pkt.u32(entry.guildcard);
        pkt.text(&entry.name, 0x10);
        pkt.text(&entry.info, 0x20);
        pkt.text(&entry.location, 0x30);
        pkt.bytes(&entry.ip);
        pkt.u16(entry.port);
        pkt.u16(0);
        pkt.u32(entry.menu_id);
        pkt.u32(entry.item_id);
    }

    pkt.finish_with_flags(entries.len() as u32)
}

pub fn send_choice_reply(c: &mut Client, entries: &[ChoiceReplyEntry]) -> NetworkResult<()> {
    let pkt = build_choice_reply(c.version, entries);
    c.channel.enqueue(pkt)
}

/// The Blue Burst full character/option blob: display record,
/// inventory mirror, C-rank and info board in one packet.
pub fn send_bb_full_char(c: &mut Client) -> NetworkResult<()> {
    use crate::packets::BB_FULL_CHARACTER_TYPE;
    use crate::player::C_RANK_SIZE_GC;

    let mut pkt = PacketBuf::new(Version::Bb, BB_FULL_CHARACTER_TYPE, 0);

    let disp = c.disp.clone();
    disp.write(pkt.raw_mut(), Version::Bb);
    c.inventory.write(pkt.raw_mut());

    let shaped = reshape_c_rank(&c.c_rank, C_RANK_SIZE_GC);
    pkt.bytes(&shaped);
    pkt.text_utf16(&c.infoboard.clone(), 0xAC * 2);

    c.channel.enqueue(pkt.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::frame::Header;
    use crate::player::{C_RANK_SIZE_DC, C_RANK_SIZE_GC, C_RANK_SIZE_PC};

    #[test]
    fn c_rank_entry_sizes_follow_dialect() {
        let entries = vec![CRankEntry {
            client_id: 0,
            blob: vec![3u8; C_RANK_SIZE_GC],
        }];

        let dc = build_c_rank(Version::Dcv2, &entries);
        let pc = build_c_rank(Version::Pc, &entries);
        let gc = build_c_rank(Version::Gc, &entries);

        assert_eq!(dc.len(), 4 + 4 + C_RANK_SIZE_DC);
        assert_eq!(pc.len(), 4 + 4 + C_RANK_SIZE_PC);
        assert_eq!(gc.len(), 4 + 4 + C_RANK_SIZE_GC);
    }

    #[test]
    fn infoboard_aggregates_entries() {
        let entries = vec![
            InfoboardEntry {
                name: "\tEOne".to_string(),
                board: "\tEfirst".to_string(),
            },
            InfoboardEntry {
                name: "\tETwo".to_string(),
                board: "\tEsecond".to_string(),
            },
        ];

        let pkt = build_infoboard(Version::Gc, &entries);
        let hdr = Header::parse(Version::Gc, &pkt);

        assert_eq!(hdr.flags, 2);
        assert_eq!(pkt.len(), 4 + 2 * (0x10 + 0xAC));
    }
}
