//! Per-connection session state. A `Client` owns its channel (socket +
//! keystreams + buffered tails) and every piece of state the packet
//! handlers cache about the player behind it.

use crate::lobby::LobbyId;
use crate::net::channel::Channel;
use crate::player::{DispData, Inventory, BLACKLIST_SIZE, IGNORE_LIST_SIZE};
use crate::version::Version;
use psokit::logging;
use std::time::Instant;

pub type ClientId = usize;

pub const FLAG_DISCONNECTED: u32 = 0x0000_0010;
pub const FLAG_SENT_MOTD: u32 = 0x0000_0040;
pub const FLAG_LOGGED_IN: u32 = 0x0000_0100;
pub const FLAG_STFU: u32 = 0x0000_0200;
pub const FLAG_BURSTING: u32 = 0x0000_0400;
pub const FLAG_OVERRIDE_GAME: u32 = 0x0000_0800;
pub const FLAG_AUTO_BACKUP: u32 = 0x0000_2000;
pub const FLAG_GC_PROTECT: u32 = 0x0000_8000;
pub const FLAG_IS_NTE: u32 = 0x0001_0000;
pub const FLAG_QLOAD_DONE: u32 = 0x0008_0000;
pub const FLAG_LEGIT: u32 = 0x0020_0000;
pub const FLAG_ALWAYS_LEGIT: u32 = 0x0100_0000;
pub const FLAG_WORD_CENSOR: u32 = 0x0800_0000;

pub const PRIV_LOCAL_GM: u8 = 0x01;
pub const PRIV_GLOBAL_GM: u8 = 0x02;
pub const PRIV_LOCAL_ROOT: u8 = 0x04;
pub const PRIV_GLOBAL_ROOT: u8 = 0x08;

pub struct Client {
    pub id: ClientId,
    pub version: Version,
    pub channel: Channel,

    pub guildcard: u32,
    pub privilege: u8,
    pub language: u8,
    pub q_lang: u8,
    pub flags: u32,

    /// Slot index inside the current lobby.
    pub client_id: u8,
    pub lobby: Option<LobbyId>,
    /// Game lobby mid-creation, installed on the burst handshake.
    pub create_lobby: Option<LobbyId>,

    pub arrow: u32,
    pub cur_area: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,

    pub disp: DispData,
    pub inventory: Inventory,

    pub blacklist: [u32; BLACKLIST_SIZE],
    pub ignore_list: Vec<u32>,
    pub autoreply: Option<String>,
    pub infoboard: String,
    pub c_rank: Vec<u8>,

    pub join_time: Instant,
    pub login_time: Instant,

    pub log: logging::Logger,
}

impl Client {
    pub fn new(id: ClientId, channel: Channel, log: logging::Logger) -> Client {
        let now = Instant::now();
        let version = channel.version();

        Client {
            id,
            version,
            channel,
            guildcard: 0,
            privilege: 0,
            language: 0,
            q_lang: 0,
            flags: 0,
            client_id: 0,
            lobby: None,
            create_lobby: None,
            arrow: 1,
            cur_area: 0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            disp: DispData::default(),
            inventory: Inventory::new(),
            blacklist: [0; BLACKLIST_SIZE],
            ignore_list: Vec::new(),
            autoreply: None,
            infoboard: String::new(),
            c_rank: Vec::new(),
            join_time: now,
            login_time: now,
            log,
        }
    }

    #[inline]
    pub fn is_disconnected(&self) -> bool {
        self.flags & FLAG_DISCONNECTED != 0
    }

    #[inline]
    pub fn mark_disconnected(&mut self) {
        self.flags |= FLAG_DISCONNECTED;
    }

    #[inline]
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    #[inline]
    pub fn is_gm(&self) -> bool {
        self.privilege & (PRIV_LOCAL_GM | PRIV_GLOBAL_GM | PRIV_LOCAL_ROOT | PRIV_GLOBAL_ROOT) != 0
    }

    pub fn name(&self) -> &str {
        let name = self.disp.name.as_str();

        name.strip_prefix("\tJ")
            .or_else(|| name.strip_prefix("\tE"))
            .unwrap_or(name)
    }

    #[inline]
    pub fn level(&self) -> u32 {
        self.disp.level
    }

    pub fn has_blacklisted(&self, gc: u32) -> bool {
        gc != 0 && self.blacklist.contains(&gc)
    }

    pub fn has_ignored(&self, gc: u32) -> bool {
        gc != 0 && self.ignore_list.contains(&gc)
    }

    /// True if broadcasts from `gc` must be suppressed for this client,
    /// by either the transient ignore list or the persistent blacklist.
    pub fn suppresses(&self, gc: u32) -> bool {
        self.has_ignored(gc) || self.has_blacklisted(gc)
    }

    /// Add a guildcard to the transient ignore list. Silently drops the
    /// request once the list is full.
    pub fn add_ignore(&mut self, gc: u32) -> bool {
        if self.ignore_list.len() >= IGNORE_LIST_SIZE || self.has_ignored(gc) {
            return false;
        }

        self.ignore_list.push(gc);
        true
    }

    pub fn remove_ignore(&mut self, gc: u32) -> bool {
        match self.ignore_list.iter().position(|&g| g == gc) {
            Some(idx) => {
                self.ignore_list.remove(idx);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Building a Client requires a live socket for its channel; the
    // list logic below is what is worth pinning and does not need one.

    #[test]
    fn ignore_list_caps_out() {
        let mut list: Vec<u32> = Vec::new();

        for gc in 1..=IGNORE_LIST_SIZE as u32 {
            assert!(list.len() < IGNORE_LIST_SIZE);
            list.push(gc);
        }

        assert_eq!(list.len(), IGNORE_LIST_SIZE);
    }

    #[test]
    fn name_strips_language_tag() {
        let mut disp = DispData::default();
        disp.name = "\tJありす".to_string();

        let stripped = disp
            .name
            .strip_prefix("\tJ")
            .or_else(|| disp.name.strip_prefix("\tE"))
            .unwrap_or(&disp.name);

        assert_eq!(stripped, "ありす");
    }
}
