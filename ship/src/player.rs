//! Character-facing data: the display record emitted in roster packets,
//! the inventory mirror, character classes and the cross-dialect
//! normalization rules applied when a record is shown to an older
//! client.

use crate::version::Version;
use byteorder::{LittleEndian, WriteBytesExt};
use psokit::text;

pub const INV_MAX_ITEMS: usize = 30;
pub const BLACKLIST_SIZE: usize = 30;
pub const IGNORE_LIST_SIZE: usize = 10;

/// C-rank blob sizes per dialect family.
pub const C_RANK_SIZE_DC: usize = 0xB8;
pub const C_RANK_SIZE_PC: usize = 0xF0;
pub const C_RANK_SIZE_GC: usize = 0x118;

pub const INFOBOARD_MAX: usize = 0xAC;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum CharClass {
    HUmar = 0,
    HUnewearl = 1,
    HUcast = 2,
    RAmar = 3,
    RAcast = 4,
    RAcaseal = 5,
    FOmarl = 6,
    FOnewm = 7,
    FOnewearl = 8,
    HUcaseal = 9,
    FOmar = 10,
    RAmarl = 11,
}

/// Highest class index the DC/PC clients know about.
pub const DC_PC_CLASS_MAX: u8 = CharClass::FOnewearl as u8;

impl CharClass {
    pub fn from_u8(v: u8) -> Option<CharClass> {
        match v {
            0 => Some(CharClass::HUmar),
            1 => Some(CharClass::HUnewearl),
            2 => Some(CharClass::HUcast),
            3 => Some(CharClass::RAmar),
            4 => Some(CharClass::RAcast),
            5 => Some(CharClass::RAcaseal),
            6 => Some(CharClass::FOmarl),
            7 => Some(CharClass::FOnewm),
            8 => Some(CharClass::FOnewearl),
            9 => Some(CharClass::HUcaseal),
            10 => Some(CharClass::FOmar),
            11 => Some(CharClass::RAmarl),
            _ => None,
        }
    }

    /// The stand-in class shown to DC/PC clients for classes they do not
    /// have models for.
    pub fn dc_pc_equivalent(self) -> CharClass {
        match self {
            CharClass::HUcaseal => CharClass::HUcast,
            CharClass::FOmar => CharClass::FOmarl,
            CharClass::RAmarl => CharClass::RAmar,
            other => other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CharClass::HUmar => "HUmar",
            CharClass::HUnewearl => "HUnewearl",
            CharClass::HUcast => "HUcast",
            CharClass::RAmar => "RAmar",
            CharClass::RAcast => "RAcast",
            CharClass::RAcaseal => "RAcaseal",
            CharClass::FOmarl => "FOmarl",
            CharClass::FOnewm => "FOnewm",
            CharClass::FOnewearl => "FOnewearl",
            CharClass::HUcaseal => "HUcaseal",
            CharClass::FOmar => "FOmar",
            CharClass::RAmarl => "RAmarl",
        }
    }
}

/// One inventory slot mirrored from the client's own reports.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Item {
    pub data: [u32; 3],
    pub item_id: u32,
    pub data2: u32,
}

/// The server's mirror of a character's inventory, capped at the
/// client-side maximum.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub items: Vec<Item>,
}

impl Inventory {
    pub fn new() -> Inventory {
        Inventory { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Add a mirrored item, dropping it on the floor if the mirror is
    /// already at capacity.
    pub fn add(&mut self, item: Item) -> bool {
        if self.items.len() >= INV_MAX_ITEMS {
            return false;
        }

        self.items.push(item);
        true
    }

    /// Remove an item by id.
    pub fn remove(&mut self, item_id: u32) -> Option<Item> {
        let idx = self.items.iter().position(|it| it.item_id == item_id)?;
        Some(self.items.remove(idx))
    }

    pub fn find(&self, item_id: u32) -> Option<&Item> {
        self.items.iter().find(|it| it.item_id == item_id)
    }

    /// Parse an inventory block written by `write`. Returns the mirror
    /// and the number of bytes consumed.
    pub fn parse(body: &[u8]) -> Option<(Inventory, usize)> {
        const BLOCK_LEN: usize = 4 + INV_MAX_ITEMS * 20;

        if body.len() < BLOCK_LEN {
            return None;
        }

        let count = (body[0] as usize).min(INV_MAX_ITEMS);
        let mut items = Vec::with_capacity(count);

        for idx in 0..count {
            let base = 4 + idx * 20;
            let word = |off: usize| {
                u32::from_le_bytes([
                    body[base + off],
                    body[base + off + 1],
                    body[base + off + 2],
                    body[base + off + 3],
                ])
            };

            items.push(Item {
                data: [word(0), word(4), word(8)],
                item_id: word(12),
                data2: word(16),
            });
        }

        Some((Inventory { items }, BLOCK_LEN))
    }

    /// Serialize the inventory block of a game roster entry.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.items.len() as u8);
        out.extend_from_slice(&[0u8; 3]);

        for idx in 0..INV_MAX_ITEMS {
            let item = self.items.get(idx).copied().unwrap_or_default();

            for word in &item.data {
                out.write_u32::<LittleEndian>(*word).unwrap();
            }
            out.write_u32::<LittleEndian>(item.item_id).unwrap();
            out.write_u32::<LittleEndian>(item.data2).unwrap();
        }
    }
}

/// The display record copied into roster packets: name, appearance and
/// the summary stat block. Kept in a dialect-neutral form and rewritten
/// for the recipient at serialization time.
#[derive(Debug, Clone)]
pub struct DispData {
    pub name: String,
    pub section: u8,
    pub ch_class: u8,
    pub costume: u16,
    pub skin: u16,
    pub face: u16,
    pub head: u16,
    pub hair: u16,
    pub hair_r: u16,
    pub hair_g: u16,
    pub hair_b: u16,
    pub prop_x: f32,
    pub prop_y: f32,
    /// atp, mst, evp, hp, dfp, ata, lck
    pub stats: [u16; 7],
    pub level: u32,
    pub exp: u32,
    pub meseta: u32,
}

impl Default for DispData {
    fn default() -> DispData {
        DispData {
            name: String::new(),
            section: 0,
            ch_class: 0,
            costume: 0,
            skin: 0,
            face: 0,
            head: 0,
            hair: 0,
            hair_r: 0,
            hair_g: 0,
            hair_b: 0,
            prop_x: 0.0,
            prop_y: 0.0,
            stats: [0; 7],
            level: 1,
            exp: 0,
            meseta: 0,
        }
    }
}

impl DispData {
    /// Rewrite the record for a recipient dialect. Costume, skin and
    /// hair indices fold into the range the DC/PC clients have models
    /// for; the three v3-only classes remap to their stand-ins when
    /// `remap_classes` is set (default lobbies and v1 games; in v2 games
    /// the remap is skipped so the creator can see and kick the
    /// forbidden class).
    pub fn for_recipient(&self, recipient: Version, remap_classes: bool) -> DispData {
        let mut out = self.clone();

        if recipient >= Version::Gc {
            return out;
        }

        out.costume %= 9;
        out.skin %= 9;
        out.hair %= 9;

        if remap_classes {
            if let Some(class) = CharClass::from_u8(out.ch_class) {
                let mapped = class.dc_pc_equivalent();
                out.ch_class = mapped as u8;
            }
        }

        if matches!(
            CharClass::from_u8(out.ch_class),
            Some(CharClass::HUmar) | Some(CharClass::RAmar) | Some(CharClass::FOnewm)
        ) && out.hair > 6
        {
            out.hair = 0;
        }

        out
    }

    /// Serialize the record in the recipient's dialect shape. Names are
    /// 16 bytes of tagged 8-bit text everywhere except Blue Burst,
    /// which carries 16 UTF-16 units.
    pub fn write(&self, out: &mut Vec<u8>, recipient: Version) {
        for stat in &self.stats {
            out.write_u16::<LittleEndian>(*stat).unwrap();
        }

        out.extend_from_slice(&[0u8; 10]);

        out.write_u32::<LittleEndian>(self.level).unwrap();
        out.write_u32::<LittleEndian>(self.exp).unwrap();
        out.write_u32::<LittleEndian>(self.meseta).unwrap();

        if recipient == Version::Bb {
            let mut field = [0u8; 32];
            text::write_utf16_fixed(&self.name, &mut field);
            out.extend_from_slice(&field);
        } else {
            let mut field = [0u8; 16];
            text::write_8bit_fixed(&self.name, &mut field);
            out.extend_from_slice(&field);
        }

        out.push(self.section);
        out.push(self.ch_class);
        out.write_u16::<LittleEndian>(0).unwrap();

        out.write_u16::<LittleEndian>(self.costume).unwrap();
        out.write_u16::<LittleEndian>(self.skin).unwrap();
        out.write_u16::<LittleEndian>(self.face).unwrap();
        out.write_u16::<LittleEndian>(self.head).unwrap();
        out.write_u16::<LittleEndian>(self.hair).unwrap();

        out.write_u16::<LittleEndian>(self.hair_r).unwrap();
        out.write_u16::<LittleEndian>(self.hair_g).unwrap();
        out.write_u16::<LittleEndian>(self.hair_b).unwrap();

        out.write_f32::<LittleEndian>(self.prop_x).unwrap();
        out.write_f32::<LittleEndian>(self.prop_y).unwrap();
    }

    /// Parse a record written by `write`. Returns the record and the
    /// number of bytes consumed.
    pub fn parse(body: &[u8], version: Version) -> Option<(DispData, usize)> {
        let name_len = if version == Version::Bb { 32 } else { 16 };
        let total = 14 + 10 + 12 + name_len + 4 + 10 + 6 + 8;

        if body.len() < total {
            return None;
        }

        let u16_at = |off: usize| u16::from_le_bytes([body[off], body[off + 1]]);
        let u32_at = |off: usize| {
            u32::from_le_bytes([body[off], body[off + 1], body[off + 2], body[off + 3]])
        };
        let f32_at = |off: usize| f32::from_bits(u32_at(off));

        let mut stats = [0u16; 7];
        for (idx, stat) in stats.iter_mut().enumerate() {
            *stat = u16_at(idx * 2);
        }

        let name = if version == Version::Bb {
            text::utf16le_to_utf8(&body[36..36 + name_len])
        } else {
            psokit::text::decode_8bit(&body[36..36 + name_len])
        };

        let base = 36 + name_len;

        Some((
            DispData {
                name,
                section: body[base],
                ch_class: body[base + 1],
                costume: u16_at(base + 4),
                skin: u16_at(base + 6),
                face: u16_at(base + 8),
                head: u16_at(base + 10),
                hair: u16_at(base + 12),
                hair_r: u16_at(base + 14),
                hair_g: u16_at(base + 16),
                hair_b: u16_at(base + 18),
                prop_x: f32_at(base + 20),
                prop_y: f32_at(base + 24),
                stats,
                level: u32_at(24),
                exp: u32_at(28),
                meseta: u32_at(32),
            },
            total,
        ))
    }
}

/// Reshape a C-rank blob between the three dialect sizes: the common
/// prefix is shared, the larger shapes zero-fill.
pub fn reshape_c_rank(src: &[u8], target_size: usize) -> Vec<u8> {
    let mut out = vec![0u8; target_size];
    let copy = src.len().min(target_size);
    out[..copy].copy_from_slice(&src[..copy]);
    out
}

/// The C-rank blob size used by a recipient dialect.
pub fn c_rank_size(version: Version) -> usize {
    match version {
        Version::Pc => C_RANK_SIZE_PC,
        Version::Gc | Version::Ep3 | Version::Bb => C_RANK_SIZE_GC,
        _ => C_RANK_SIZE_DC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v3_character() -> DispData {
        DispData {
            name: "\tEAsh".to_string(),
            ch_class: CharClass::HUcaseal as u8,
            costume: 11,
            skin: 14,
            hair: 8,
            level: 42,
            ..Default::default()
        }
    }

    #[test]
    fn v3_classes_remap_for_dc_recipients() {
        let disp = v3_character();
        let shown = disp.for_recipient(Version::Dcv1, true);

        assert_eq!(shown.ch_class, CharClass::HUcast as u8);
        assert_eq!(shown.costume, 2);
        assert_eq!(shown.skin, 5);
    }

    #[test]
    fn remap_skipped_in_v2_games() {
        let disp = v3_character();
        let shown = disp.for_recipient(Version::Dcv2, false);

        // The joiner keeps the forbidden class so the leader can see and
        // kick them; cosmetics still fold into range.
        assert_eq!(shown.ch_class, CharClass::HUcaseal as u8);
        assert_eq!(shown.costume, 2);
    }

    #[test]
    fn gc_recipients_see_the_record_untouched() {
        let disp = v3_character();
        let shown = disp.for_recipient(Version::Gc, true);

        assert_eq!(shown.ch_class, CharClass::HUcaseal as u8);
        assert_eq!(shown.costume, 11);
    }

    #[test]
    fn hair_clamps_on_affected_classes() {
        let mut disp = v3_character();
        disp.ch_class = CharClass::RAmarl as u8;
        disp.hair = 8;

        // RAmarl remaps to RAmar, which only has 7 hairstyles.
        let shown = disp.for_recipient(Version::Pc, true);
        assert_eq!(shown.ch_class, CharClass::RAmar as u8);
        assert_eq!(shown.hair, 0);
    }

    #[test]
    fn disp_sizes_are_fixed_per_dialect() {
        let disp = v3_character();

        let mut dc = Vec::new();
        disp.write(&mut dc, Version::Dcv2);

        let mut bb = Vec::new();
        disp.write(&mut bb, Version::Bb);

        assert_eq!(dc.len(), 0x50);
        assert_eq!(bb.len(), 0x60);
    }

    #[test]
    fn inventory_caps_at_client_limit() {
        let mut inv = Inventory::new();

        for i in 0..INV_MAX_ITEMS as u32 {
            assert!(inv.add(Item {
                item_id: i,
                ..Default::default()
            }));
        }

        assert!(!inv.add(Item::default()));

        let mut out = Vec::new();
        inv.write(&mut out);
        assert_eq!(out.len(), 4 + INV_MAX_ITEMS * 20);
    }

    #[test]
    fn c_rank_reshape_shares_prefix() {
        let src = vec![7u8; C_RANK_SIZE_GC];
        let dc = reshape_c_rank(&src, C_RANK_SIZE_DC);
        let back = reshape_c_rank(&dc, C_RANK_SIZE_GC);

        assert_eq!(dc.len(), C_RANK_SIZE_DC);
        assert_eq!(&back[..C_RANK_SIZE_DC], &src[..C_RANK_SIZE_DC]);
        assert!(back[C_RANK_SIZE_DC..].iter().all(|&b| b == 0));
    }
}
