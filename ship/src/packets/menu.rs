//! Uniform menu packets: a banner row carrying the ship name, then one
//! row per entry, all in the recipient's encoding. Used for the block
//! list, ship list, info desk and the GM menu.

use crate::client::Client;
use crate::net::support::NetworkResult;
use crate::packets::{
    PacketBuf, BLOCK_LIST_TYPE, LOBBY_INFO_TYPE, MENU_ID_BLOCK, MENU_ID_INFODESK, MENU_ID_SHIP,
    SHIP_LIST_TYPE,
};
use crate::version::Version;

#[derive(Debug, Clone)]
pub struct MenuEntry {
    pub menu_id: u32,
    pub item_id: u32,
    pub flags: u16,
    pub name: String,
}

impl MenuEntry {
    pub fn new(menu_id: u32, item_id: u32, name: &str) -> MenuEntry {
        MenuEntry {
            menu_id,
            item_id,
            flags: 0,
            name: name.to_string(),
        }
    }
}

/// Build a menu packet of the given type. The first row is the banner
/// with the ship's name; `flags` counts the non-banner rows.
pub fn build_menu(
    recipient: Version,
    pkt_type: u16,
    banner_menu_id: u32,
    ship_name: &str,
    entries: &[MenuEntry],
) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, pkt_type, 0);

    pkt.u32(banner_menu_id);
    pkt.u32(0);
    pkt.u16(0x0004);
    pkt.text(ship_name, 0x12);

    for entry in entries {
        pkt.u32(entry.menu_id);
        pkt.u32(entry.item_id);
        pkt.u16(entry.flags);
        pkt.text(&entry.name, 0x12);
    }

    pkt.finish_with_flags(entries.len() as u32)
}

/// The block list menu.
pub fn send_block_list(c: &mut Client, ship_name: &str, blocks: u32) -> NetworkResult<()> {
    let entries: Vec<MenuEntry> = (1..=blocks)
        .map(|b| MenuEntry::new(MENU_ID_BLOCK, b, &format!("\tEBLOCK{:02}", b)))
        .collect();

    let pkt = build_menu(c.version, BLOCK_LIST_TYPE, MENU_ID_BLOCK, ship_name, &entries);
    c.channel.enqueue(pkt)
}

/// A row of the inter-ship list, straight from the peer directory.
#[derive(Debug, Clone)]
pub struct ShipListEntry {
    pub ship_id: u32,
    pub name: String,
    /// Non-zero when this row is a sub-market (menu code) entry.
    pub menu_code: u16,
}

pub fn send_ship_list(c: &mut Client, ship_name: &str, ships: &[ShipListEntry]) -> NetworkResult<()> {
    let entries: Vec<MenuEntry> = ships
        .iter()
        .map(|s| MenuEntry {
            menu_id: MENU_ID_SHIP | (u32::from(s.menu_code) << 8),
            item_id: s.ship_id,
            flags: 0,
            name: s.name.clone(),
        })
        .collect();

    let pkt = build_menu(c.version, SHIP_LIST_TYPE, MENU_ID_SHIP, ship_name, &entries);
    c.channel.enqueue(pkt)
}

/// Info-desk menu from the configured entries.
pub fn send_info_list(c: &mut Client, ship_name: &str, titles: &[String]) -> NetworkResult<()> {
    let entries: Vec<MenuEntry> = titles
        .iter()
        .enumerate()
        .map(|(idx, title)| MenuEntry::new(MENU_ID_INFODESK, idx as u32, title))
        .collect();

    let pkt = build_menu(
        c.version,
        LOBBY_INFO_TYPE,
        MENU_ID_INFODESK,
        ship_name,
        &entries,
    );
    c.channel.enqueue(pkt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::frame::Header;

    #[test]
    fn menu_counts_rows_excluding_banner() {
        let entries = vec![
            MenuEntry::new(MENU_ID_BLOCK, 1, "\tEBLOCK01"),
            MenuEntry::new(MENU_ID_BLOCK, 2, "\tEBLOCK02"),
        ];

        let pkt = build_menu(Version::Dcv2, BLOCK_LIST_TYPE, MENU_ID_BLOCK, "Aurora", &entries);
        let hdr = Header::parse(Version::Dcv2, &pkt);

        assert_eq!(hdr.pkt_type, BLOCK_LIST_TYPE);
        assert_eq!(hdr.flags, 2);
        // banner + 2 rows, 28 bytes each for 8-bit dialects.
        assert_eq!(pkt.len(), 4 + 3 * 28);
    }

    #[test]
    fn utf16_menus_double_name_width() {
        let entries = vec![MenuEntry::new(MENU_ID_BLOCK, 1, "\tEBLOCK01")];

        let pkt = build_menu(Version::Pc, BLOCK_LIST_TYPE, MENU_ID_BLOCK, "Aurora", &entries);
        assert_eq!(pkt.len(), 4 + 2 * (10 + 0x24));
    }

    #[test]
    fn ship_list_encodes_menu_codes() {
        let ships = vec![ShipListEntry {
            ship_id: 9,
            name: "\tEPioneer".to_string(),
            menu_code: 0x0102,
        }];

        // Sub-market rows keep the market in the menu id's high bits.
        let entries: Vec<MenuEntry> = ships
            .iter()
            .map(|s| MenuEntry {
                menu_id: MENU_ID_SHIP | (u32::from(s.menu_code) << 8),
                item_id: s.ship_id,
                flags: 0,
                name: s.name.clone(),
            })
            .collect();

        assert_eq!(entries[0].menu_id, 0x0001_0205);
    }
}
