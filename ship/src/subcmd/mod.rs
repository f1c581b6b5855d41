//! The inner subcommand space carried by the 0x60/0x62/0x6C/0x6D
//! envelopes: opcode constants, envelope parsing, the burst whitelist
//! and the Dreamcast Network Trial Edition opcode translation.

pub mod handlers;

// Subcommands handled with side effects or synthesized replies.
pub const SUBCMD_GUILDCARD: u8 = 0x06;
pub const SUBCMD_SYMBOL_CHAT: u8 = 0x07;
pub const SUBCMD_HIT_MONSTER: u8 = 0x0A;
pub const SUBCMD_TELEPORT: u8 = 0x17;
pub const SUBCMD_SET_AREA: u8 = 0x1F;
pub const SUBCMD_SET_AREA_21: u8 = 0x21;
pub const SUBCMD_LOAD_22: u8 = 0x22;
pub const SUBCMD_FINISH_LOAD: u8 = 0x23;
pub const SUBCMD_SET_POS_24: u8 = 0x24;
pub const SUBCMD_EQUIP: u8 = 0x25;
pub const SUBCMD_REMOVE_EQUIP: u8 = 0x26;
pub const SUBCMD_USE_ITEM: u8 = 0x27;
pub const SUBCMD_DELETE_ITEM: u8 = 0x29;
pub const SUBCMD_DROP_ITEM: u8 = 0x2A;
pub const SUBCMD_TAKE_ITEM: u8 = 0x2B;
pub const SUBCMD_LEVELUP: u8 = 0x30;
pub const SUBCMD_SET_POS_3E: u8 = 0x3E;
pub const SUBCMD_SET_POS_3F: u8 = 0x3F;
pub const SUBCMD_MOVE_SLOW: u8 = 0x40;
pub const SUBCMD_MOVE_FAST: u8 = 0x42;
pub const SUBCMD_USED_TECH: u8 = 0x48;
pub const SUBCMD_TALK_SHOP: u8 = 0x52;
pub const SUBCMD_LOBBY_ACTION: u8 = 0x58;
pub const SUBCMD_DEL_MAP_ITEM: u8 = 0x59;
pub const SUBCMD_PICK_UP: u8 = 0x5A;
pub const SUBCMD_DROP_STACK: u8 = 0x5D;
pub const SUBCMD_BUY: u8 = 0x5E;
pub const SUBCMD_ITEMDROP: u8 = 0x5F;
pub const SUBCMD_ITEMREQ: u8 = 0x60;
pub const SUBCMD_DESTROY_ITEM: u8 = 0x63;
pub const SUBCMD_BURST2: u8 = 0x6B;
pub const SUBCMD_BURST3: u8 = 0x6C;
pub const SUBCMD_BURST1: u8 = 0x6D;
pub const SUBCMD_BURST4: u8 = 0x6E;
pub const SUBCMD_BURST5: u8 = 0x6F;
pub const SUBCMD_BURST_PLDATA: u8 = 0x70;
pub const SUBCMD_BURST6: u8 = 0x71;
pub const SUBCMD_BURST_DONE: u8 = 0x72;
pub const SUBCMD_WORD_SELECT: u8 = 0x74;
pub const SUBCMD_KILL_MONSTER: u8 = 0x76;
pub const SUBCMD_SYNC_REG: u8 = 0x77;
pub const SUBCMD_CMODE_GRAVE: u8 = 0x7C;
pub const SUBCMD_WARP: u8 = 0x94;
pub const SUBCMD_CHANGE_STAT: u8 = 0x9A;
pub const SUBCMD_BITEMREQ: u8 = 0xA2;
pub const SUBCMD_LOBBY_CHAIR: u8 = 0xAB;
pub const SUBCMD_CHAIR_DIR: u8 = 0xAF;
pub const SUBCMD_CHAIR_MOVE: u8 = 0xB0;
pub const SUBCMD_SHOPREQ: u8 = 0xB5;
pub const SUBCMD_SHOPINV: u8 = 0xB6;
pub const SUBCMD_SHOPBUY: u8 = 0xB7;
pub const SUBCMD_OPEN_BANK: u8 = 0xBB;
pub const SUBCMD_BANK_INV: u8 = 0xBC;
pub const SUBCMD_BANK_ACTION: u8 = 0xBD;
pub const SUBCMD_CREATE_ITEM: u8 = 0xBE;
pub const SUBCMD_JUKEBOX: u8 = 0xBF;
pub const SUBCMD_REQ_EXP: u8 = 0xC8;

// Dreamcast Network Trial Edition renumbering.
pub const SUBCMD_DCNTE_SET_AREA: u8 = 0x1D;
pub const SUBCMD_DCNTE_FINISH_LOAD: u8 = 0x1F;
pub const SUBCMD_DCNTE_SET_POS: u8 = 0x36;
pub const SUBCMD_DCNTE_MOVE_SLOW: u8 = 0x37;
pub const SUBCMD_DCNTE_MOVE_FAST: u8 = 0x39;
pub const SUBCMD_DCNTE_TALK_SHOP: u8 = 0x46;

/// A parsed inner envelope. `data` is everything after the two-byte
/// opcode/size header.
#[derive(Debug, Copy, Clone)]
pub struct Envelope<'a> {
    pub opcode: u8,
    /// Declared size in 4-byte words, header included.
    pub size: u8,
    pub data: &'a [u8],
}

impl<'a> Envelope<'a> {
    /// Parse the inner envelope out of a packet body (outer header
    /// already stripped). The declared word count must fit the body.
    pub fn parse(body: &'a [u8]) -> Option<Envelope<'a>> {
        if body.len() < 4 {
            return None;
        }

        let opcode = body[0];
        let size = body[1];

        if usize::from(size) * 4 > body.len() {
            return None;
        }

        Some(Envelope {
            opcode,
            size,
            data: &body[2..],
        })
    }
}

/// Subcommands that may cross the lobby while a burst is in progress:
/// the burst sequence itself plus the state-replay messages the joiner
/// needs to see.
pub fn burst_allowed(opcode: u8) -> bool {
    matches!(
        opcode,
        SUBCMD_BURST2
            | SUBCMD_BURST3
            | SUBCMD_BURST1
            | SUBCMD_BURST4
            | SUBCMD_BURST5
            | SUBCMD_BURST_PLDATA
            | SUBCMD_BURST6
            | SUBCMD_BURST_DONE
            | SUBCMD_SET_AREA_21
            | SUBCMD_LOAD_22
            | SUBCMD_FINISH_LOAD
            | SUBCMD_SET_POS_3F
    )
}

const NTE_MAP: [(u8, u8); 6] = [
    (SUBCMD_DCNTE_SET_AREA, SUBCMD_SET_AREA_21),
    (SUBCMD_DCNTE_FINISH_LOAD, SUBCMD_FINISH_LOAD),
    (SUBCMD_DCNTE_SET_POS, SUBCMD_SET_POS_3F),
    (SUBCMD_DCNTE_MOVE_SLOW, SUBCMD_MOVE_SLOW),
    (SUBCMD_DCNTE_MOVE_FAST, SUBCMD_MOVE_FAST),
    (SUBCMD_DCNTE_TALK_SHOP, SUBCMD_TALK_SHOP),
];

/// Trial-edition opcode to the standard numbering.
pub fn nte_to_std(opcode: u8) -> Option<u8> {
    NTE_MAP
        .iter()
        .find(|(nte, _)| *nte == opcode)
        .map(|(_, std)| *std)
}

/// Standard opcode to the trial-edition numbering.
pub fn std_to_nte(opcode: u8) -> Option<u8> {
    NTE_MAP
        .iter()
        .find(|(_, std)| *std == opcode)
        .map(|(nte, _)| *nte)
}

/// Rewrite an outgoing subcommand opcode for a trial-edition recipient.
/// Returns None when the subcommand has no trial-edition rendering and
/// the copy must be dropped.
pub fn translate_for_nte(opcode: u8) -> Option<u8> {
    if let Some(nte) = std_to_nte(opcode) {
        return Some(nte);
    }

    // Everything from word-select up never shipped in the trial build.
    if opcode >= SUBCMD_WORD_SELECT {
        return None;
    }

    Some(opcode)
}

/// Normalize an incoming opcode from a trial-edition sender.
pub fn translate_from_nte(opcode: u8) -> u8 {
    nte_to_std(opcode).unwrap_or(opcode)
}
