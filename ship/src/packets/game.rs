//! Game-room packets: join, add-player, leave and the block game list.

use crate::client::Client;
use crate::lobby::Lobby;
use crate::net::support::NetworkResult;
use crate::packets::lobby::{remap_classes_for, write_disp, RosterEntry};
use crate::packets::{
    PacketBuf, GAME_ADD_PLAYER_TYPE, GAME_JOIN_TYPE, GAME_LEAVE_TYPE, GAME_LIST_TYPE, MENU_ID_GAME,
};
use crate::version::Version;

/// Game join: the full in-game context (mode flags, map variation
/// array, PRNG seed) plus the present members' summary headers.
pub fn build_game_join(
    recipient: Version,
    lobby: &Lobby,
    my_slot: u8,
    entries: &[RosterEntry],
) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, GAME_JOIN_TYPE, 0);

    pkt.u8(my_slot);
    pkt.u8(lobby.leader);
    pkt.u8(1);
    pkt.u8(lobby.difficulty);
    pkt.u8(lobby.battle as u8);
    pkt.u8(lobby.event);
    pkt.u8(lobby.section);
    pkt.u8(lobby.challenge as u8);
    pkt.u32(lobby.rand_seed);
    pkt.u8(lobby.episode);
    pkt.u8(lobby.flags as u8 & crate::lobby::LOBBY_FLAG_SINGLEPLAYER as u8);
    pkt.u16(0);

    for map in lobby.maps.iter() {
        pkt.u32(*map);
    }

    for entry in entries {
        pkt.u32(0x0001_0000);
        pkt.u32(entry.guildcard);
        pkt.u32(0xFFFF_FFFF);
        pkt.u32(u32::from(entry.slot));
        pkt.text(&entry.disp.name, 16);

        // v2 and later clients expect the level alongside the header.
        if recipient != Version::Dcv1 {
            pkt.u32(entry.disp.level.saturating_sub(1));
        }
    }

    pkt.finish_with_flags(entries.len() as u32)
}

pub fn send_game_join(c: &mut Client, lobby: &Lobby, entries: &[RosterEntry]) -> NetworkResult<()> {
    let pkt = build_game_join(c.version, lobby, c.client_id, entries);
    c.channel.enqueue(pkt)
}

/// Add-player for games carries the joiner's full summary record and
/// inventory mirror, transcoded per recipient.
pub fn build_game_add_player(recipient: Version, lobby: &Lobby, joiner: &RosterEntry) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, GAME_ADD_PLAYER_TYPE, 0);

    pkt.u8(joiner.slot);
    pkt.u8(lobby.leader);
    pkt.u8(1);
    pkt.u8(0);
    pkt.u32(0);

    pkt.u32(0x0001_0000);
    pkt.u32(joiner.guildcard);
    pkt.u32(0xFFFF_FFFF);
    pkt.u32(u32::from(joiner.slot));
    pkt.text(&joiner.disp.name, 16);

    let disp = joiner.disp.for_recipient(recipient, remap_classes_for(lobby));
    write_disp(&mut pkt, &disp);
    joiner.inventory.write(pkt.raw_mut());

    pkt.finish_with_flags(1)
}

pub fn send_game_add_player(
    c: &mut Client,
    lobby: &Lobby,
    joiner: &RosterEntry,
) -> NetworkResult<()> {
    let pkt = build_game_add_player(c.version, lobby, joiner);
    c.channel.enqueue(pkt)
}

pub fn build_game_leave(recipient: Version, left_slot: u8, leader: u8) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, GAME_LEAVE_TYPE, 0);

    pkt.u8(left_slot);
    pkt.u8(leader);
    pkt.u16(0);

    pkt.finish_with_flags(u32::from(left_slot))
}

pub fn send_game_leave(c: &mut Client, left_slot: u8, leader: u8) -> NetworkResult<()> {
    let pkt = build_game_leave(c.version, left_slot, leader);
    c.channel.enqueue(pkt)
}

/// One row of the block's game list menu.
pub struct GameListEntry {
    pub id: u32,
    pub name: String,
    pub difficulty: u8,
    pub players: u8,
    pub episode: u8,
    pub v2: bool,
    pub battle: bool,
    pub challenge: bool,
    pub locked: bool,
}

pub fn build_game_list(recipient: Version, ship_name: &str, games: &[GameListEntry]) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, GAME_LIST_TYPE, 0);

    // Banner row carrying the ship name.
    pkt.u32(MENU_ID_GAME);
    pkt.u32(0);
    pkt.u8(0);
    pkt.u8(0);
    pkt.text(ship_name, 16);
    pkt.u8(0);
    pkt.u8(0);

    for game in games {
        let mut flags = 0u8;

        if game.battle {
            flags |= 0x01;
        }
        if game.challenge {
            flags |= 0x02;
        }
        if game.locked {
            flags |= 0x04;
        }
        if game.v2 {
            flags |= 0x40;
        }

        pkt.u32(MENU_ID_GAME);
        pkt.u32(game.id);
        pkt.u8(game.difficulty + 0x22);
        pkt.u8(game.players);
        pkt.text(&game.name, 16);
        pkt.u8(game.episode);
        pkt.u8(flags);
    }

    pkt.finish_with_flags(games.len() as u32)
}

pub fn send_game_list(
    c: &mut Client,
    ship_name: &str,
    games: &[GameListEntry],
) -> NetworkResult<()> {
    let pkt = build_game_list(c.version, ship_name, games);
    c.channel.enqueue(pkt)
}

/// Warp one client to an area, as a server-originated subcommand.
pub fn send_warp(c: &mut Client, area: u8) -> NetworkResult<()> {
    let mut pkt = PacketBuf::new(c.version, crate::packets::GAME_COMMAND0_TYPE, 0);

    pkt.u8(crate::subcmd::SUBCMD_WARP);
    pkt.u8(2);
    pkt.u8(c.client_id);
    pkt.u8(0);
    pkt.u8(area);
    pkt.zeros(3);

    c.channel.enqueue(pkt.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::{GameParams, FIRST_GAME_LOBBY_ID};
    use crate::net::frame::Header;
    use crate::player::{DispData, Inventory};

    fn game() -> Lobby {
        let mut maps = [0u32; 0x20];
        maps[3] = 7;

        Lobby::new_game(
            FIRST_GAME_LOBBY_ID,
            GameParams {
                name: "\tEDelta".to_string(),
                password: String::new(),
                version: Version::Gc,
                difficulty: 2,
                battle: true,
                challenge: false,
                v2: true,
                episode: 1,
                single_player: false,
                event: 1,
                section: 5,
                rand_seed: 0xCAFE_F00D,
                },
            maps,
        )
    }

    fn entry(slot: u8) -> RosterEntry {
        let mut disp = DispData::default();
        disp.name = "\tEIon".to_string();
        disp.level = 42;

        RosterEntry {
            guildcard: 500,
            slot,
            version: Version::Gc,
            disp,
            inventory: Inventory::new(),
            arrow: 1,
        }
    }

    #[test]
    fn game_join_carries_seed_and_maps() {
        let lobby = game();
        let pkt = build_game_join(Version::Gc, &lobby, 0, &[entry(0)]);
        let hdr = Header::parse(Version::Gc, &pkt);

        assert_eq!(hdr.pkt_type, GAME_JOIN_TYPE);
        assert_eq!(hdr.flags, 1);

        // difficulty at body offset 3, seed at offset 8.
        assert_eq!(pkt[4 + 3], 2);
        assert_eq!(&pkt[4 + 8..4 + 12], &[0x0D, 0xF0, 0xFE, 0xCA]);

        // maps start at body offset 16; slot 3 carries the variation.
        let map3 = 4 + 16 + 3 * 4;
        assert_eq!(&pkt[map3..map3 + 4], &[7, 0, 0, 0]);
    }

    #[test]
    fn v1_recipients_get_no_levels() {
        let lobby = game();

        let v1 = build_game_join(Version::Dcv1, &lobby, 0, &[entry(0)]);
        let v2 = build_game_join(Version::Dcv2, &lobby, 0, &[entry(0)]);

        assert_eq!(v2.len() - v1.len(), 4);
    }

    #[test]
    fn add_player_includes_inventory_block() {
        let lobby = game();
        let mut joiner = entry(1);

        for i in 0..4 {
            joiner.inventory.add(crate::player::Item {
                item_id: 0x10000 + i,
                ..Default::default()
            });
        }

        let pkt = build_game_add_player(Version::Gc, &lobby, &joiner);

        // Fixed prefix + entry header + disp + full inventory block.
        let expected =
            4 + 8 + 16 + 16 + 0x50 + 4 + crate::player::INV_MAX_ITEMS * 20;
        assert_eq!(pkt.len(), expected);
        assert_eq!(pkt[4 + 8 + 16 + 16 + 0x50], 4); // item count
    }

    #[test]
    fn game_list_flags_encode_mode() {
        let games = vec![GameListEntry {
            id: 0x21,
            name: "\tERun".to_string(),
            difficulty: 1,
            players: 3,
            episode: 1,
            v2: true,
            battle: true,
            challenge: false,
            locked: true,
        }];

        let pkt = build_game_list(Version::Dcv2, "Aurora", &games);
        let hdr = Header::parse(Version::Dcv2, &pkt);
        assert_eq!(hdr.flags, 1);

        // Banner row is 28 bytes; game row flags are its last byte.
        let row = 4 + 28;
        assert_eq!(pkt[row + 8], 1 + 0x22);
        assert_eq!(pkt[row + 9], 3);
        assert_eq!(pkt[row + 27], 0x01 | 0x04 | 0x40);
    }
}
