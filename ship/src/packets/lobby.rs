//! Lobby roster packets: join, add-player, leave, arrows, the lobby
//! list menu and the lobby name reply.

use crate::client::Client;
use crate::lobby::Lobby;
use crate::net::support::NetworkResult;
use crate::packets::{
    PacketBuf, LOBBY_ADD_PLAYER_TYPE, LOBBY_ARROW_LIST_TYPE, LOBBY_JOIN_TYPE, LOBBY_LEAVE_TYPE,
    LOBBY_LIST_TYPE, LOBBY_NAME_TYPE, MENU_ID_LOBBY,
};
use crate::player::{DispData, Inventory};
use crate::version::Version;

/// Per-member snapshot collected under the lobby before any recipient
/// is written to. Keeps the constructors free of cross-session borrows.
#[derive(Clone)]
pub struct RosterEntry {
    pub guildcard: u32,
    pub slot: u8,
    pub version: Version,
    pub disp: DispData,
    pub inventory: Inventory,
    pub arrow: u32,
}

/// Entry header shared by the roster-carrying packets.
fn write_entry_hdr(pkt: &mut PacketBuf, entry: &RosterEntry) {
    pkt.u32(0x0001_0000);
    pkt.u32(entry.guildcard);
    pkt.u32(0xFFFF_FFFF); // ip, never meaningful ship-side
    pkt.u32(u32::from(entry.slot));
    pkt.text(&entry.disp.name, 16);
}

/// Write a roster entry's display record in the recipient's shape.
pub(super) fn write_disp(pkt: &mut PacketBuf, disp: &DispData) {
    let version = pkt.version();
    disp.write(pkt.raw_mut(), version);
}

/// Whether roster records should have the v3-only classes remapped for
/// this recipient: always in default lobbies, and in game lobbies only
/// when the game is v1 (in v2 games the forbidden class stays visible
/// so the leader can kick cleanly).
pub fn remap_classes_for(lobby: &Lobby) -> bool {
    !lobby.is_game() || !lobby.v2
}

pub fn build_lobby_join(
    recipient: Version,
    lobby: &Lobby,
    block: u32,
    my_slot: u8,
    entries: &[RosterEntry],
) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, LOBBY_JOIN_TYPE, 0);

    // DC clients crash on lobby event codes they do not know.
    let event = if recipient >= Version::Gc {
        u16::from(lobby.event)
    } else {
        0
    };

    pkt.u8(my_slot);
    pkt.u8(lobby.leader);
    pkt.u8(1);
    pkt.u8(lobby.id.wrapping_sub(1) as u8);
    pkt.u16(block as u16);
    pkt.u16(event);

    let remap = remap_classes_for(lobby);

    for entry in entries {
        write_entry_hdr(&mut pkt, entry);
        let disp = entry.disp.for_recipient(recipient, remap);
        write_disp(&mut pkt, &disp);
    }

    pkt.finish_with_flags(entries.len() as u32)
}

pub fn send_lobby_join(
    c: &mut Client,
    lobby: &Lobby,
    block: u32,
    entries: &[RosterEntry],
) -> NetworkResult<()> {
    let pkt = build_lobby_join(c.version, lobby, block, c.client_id, entries);
    c.channel.enqueue(pkt)
}

pub fn build_lobby_add_player(
    recipient: Version,
    lobby: &Lobby,
    block: u32,
    joiner: &RosterEntry,
) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, LOBBY_ADD_PLAYER_TYPE, 0);

    pkt.u8(joiner.slot);
    pkt.u8(lobby.leader);
    pkt.u8(1);
    pkt.u8(lobby.id.wrapping_sub(1) as u8);
    pkt.u16(block as u16);
    pkt.u16(0);

    write_entry_hdr(&mut pkt, joiner);
    let disp = joiner.disp.for_recipient(recipient, remap_classes_for(lobby));
    write_disp(&mut pkt, &disp);

    pkt.finish_with_flags(1)
}

pub fn send_lobby_add_player(
    c: &mut Client,
    lobby: &Lobby,
    block: u32,
    joiner: &RosterEntry,
) -> NetworkResult<()> {
    let pkt = build_lobby_add_player(c.version, lobby, block, joiner);
    c.channel.enqueue(pkt)
}

pub fn build_lobby_leave(recipient: Version, left_slot: u8, leader: u8) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, LOBBY_LEAVE_TYPE, 0);

    pkt.u8(left_slot);
    pkt.u8(leader);
    pkt.u16(0);

    pkt.finish_with_flags(u32::from(left_slot))
}

pub fn send_lobby_leave(c: &mut Client, left_slot: u8, leader: u8) -> NetworkResult<()> {
    let pkt = build_lobby_leave(c.version, left_slot, leader);
    c.channel.enqueue(pkt)
}

/// Arrow color list for the recipient's current lobby.
pub fn build_arrow_list(recipient: Version, entries: &[RosterEntry]) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, LOBBY_ARROW_LIST_TYPE, 0);

    for entry in entries {
        pkt.u32(0x0001_0000);
        pkt.u32(entry.guildcard);
        pkt.u32(entry.arrow);
    }

    pkt.finish_with_flags(entries.len() as u32)
}

pub fn send_arrow_list(c: &mut Client, entries: &[RosterEntry]) -> NetworkResult<()> {
    let pkt = build_arrow_list(c.version, entries);
    c.channel.enqueue(pkt)
}

/// The 15-entry default lobby list menu.
pub fn build_lobby_list(recipient: Version, lobby_ids: &[u32]) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, LOBBY_LIST_TYPE, 0);

    for &id in lobby_ids {
        pkt.u32(MENU_ID_LOBBY);
        pkt.u32(id);
        pkt.u32(0);
    }

    pkt.finish_with_flags(lobby_ids.len() as u32)
}

pub fn send_lobby_list(c: &mut Client, lobby_ids: &[u32]) -> NetworkResult<()> {
    let pkt = build_lobby_list(c.version, lobby_ids);
    c.channel.enqueue(pkt)
}

/// Current lobby name, re-encoded for the recipient.
pub fn send_lobby_name(c: &mut Client, name: &str) -> NetworkResult<()> {
    let mut pkt = PacketBuf::new(c.version, LOBBY_NAME_TYPE, 0);
    pkt.message(name);
    c.channel.enqueue(pkt.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::{GameParams, Lobby, FIRST_GAME_LOBBY_ID};
    use crate::net::frame::Header;
    use crate::player::CharClass;

    fn entry(slot: u8, class: CharClass) -> RosterEntry {
        let mut disp = DispData::default();
        disp.name = "\tETest".to_string();
        disp.ch_class = class as u8;

        RosterEntry {
            guildcard: 1000 + u32::from(slot),
            slot,
            version: Version::Dcv2,
            disp,
            inventory: Inventory::new(),
            arrow: 1,
        }
    }

    fn v1_game() -> Lobby {
        Lobby::new_game(
            FIRST_GAME_LOBBY_ID,
            GameParams {
                name: "\tEGamma".to_string(),
                password: String::new(),
                version: Version::Dcv1,
                difficulty: 0,
                battle: false,
                challenge: false,
                v2: false,
                episode: 1,
                single_player: false,
                event: 0,
                section: 0,
                rand_seed: 0,
            },
            [0; 0x20],
        )
    }

    #[test]
    fn join_packet_counts_entries_in_flags() {
        let lobby = Lobby::new_default(1, 1, 2);
        let entries = vec![entry(0, CharClass::HUmar), entry(2, CharClass::RAcast)];

        let pkt = build_lobby_join(Version::Gc, &lobby, 1, 2, &entries);
        let hdr = Header::parse(Version::Gc, &pkt);

        assert_eq!(hdr.pkt_type, LOBBY_JOIN_TYPE);
        assert_eq!(hdr.flags, 2);
        // client_id, leader
        assert_eq!(pkt[4], 2);
        assert_eq!(pkt[5], 0);
    }

    #[test]
    fn dc_recipients_do_not_see_event_codes() {
        let lobby = Lobby::new_default(1, 1, 9);

        let dc = build_lobby_join(Version::Dcv2, &lobby, 1, 0, &[]);
        let gc = build_lobby_join(Version::Gc, &lobby, 1, 0, &[]);

        assert_eq!(&dc[10..12], &[0, 0]);
        assert_eq!(&gc[10..12], &[9, 0]);
    }

    #[test]
    fn add_player_remaps_class_in_v1_games_only() {
        let v1 = v1_game();
        let joiner = entry(1, CharClass::HUcaseal);

        let pkt = build_lobby_add_player(Version::Dcv1, &v1, 1, &joiner);
        // Body fields end at 12; entry header is 16 bytes of ids plus a
        // 16-byte name; inside the disp record the class byte follows
        // stats(14) + pad(10) + level/exp/meseta(12) + name(16) +
        // section(1).
        let disp_start = 12 + 16 + 16;
        let class_off = disp_start + 14 + 10 + 12 + 16 + 1;
        assert_eq!(pkt[class_off], CharClass::HUcast as u8);

        let mut v2 = v1_game();
        v2.v2 = true;
        let pkt = build_lobby_add_player(Version::Dcv1, &v2, 1, &joiner);
        assert_eq!(pkt[class_off], CharClass::HUcaseal as u8);
    }

    #[test]
    fn leave_packet_carries_new_leader() {
        let pkt = build_lobby_leave(Version::Dcv2, 0, 1);
        let hdr = Header::parse(Version::Dcv2, &pkt);

        assert_eq!(hdr.pkt_type, LOBBY_LEAVE_TYPE);
        assert_eq!(pkt[4], 0);
        assert_eq!(pkt[5], 1);
    }

    #[test]
    fn lobby_list_has_fifteen_rows() {
        let ids: Vec<u32> = (1..=15).collect();
        let pkt = build_lobby_list(Version::Dcv2, &ids);
        let hdr = Header::parse(Version::Dcv2, &pkt);

        assert_eq!(hdr.flags, 15);
        assert_eq!(pkt.len(), 4 + 15 * 12);
    }
}
