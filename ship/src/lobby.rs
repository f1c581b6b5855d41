//! Lobby and game-room state machine: admission gating, slot
//! management, leader election, burst synchronization state and the
//! per-slot item id fountain.

use crate::client::ClientId;
use crate::player::DC_PC_CLASS_MAX;
use crate::version::Version;

pub type LobbyId = u32;

pub const DEFAULT_LOBBY_COUNT: usize = 15;
pub const LOBBY_MAX_CLIENTS: usize = 12;
pub const GAME_MAX_CLIENTS: usize = 4;
pub const GAME_PASSWORD_MAX: usize = 16;

/// Game lobby ids start above the default lobby range.
pub const FIRST_GAME_LOBBY_ID: LobbyId = 0x20;

pub const LOBBY_FLAG_BURSTING: u32 = 0x0001;
pub const LOBBY_FLAG_QUESTING: u32 = 0x0002;
pub const LOBBY_FLAG_QUESTSEL: u32 = 0x0004;
pub const LOBBY_FLAG_V1ONLY: u32 = 0x0008;
pub const LOBBY_FLAG_PCONLY: u32 = 0x0010;
pub const LOBBY_FLAG_DCONLY: u32 = 0x0020;
pub const LOBBY_FLAG_GC_ALLOWED: u32 = 0x0040;
pub const LOBBY_FLAG_SINGLEPLAYER: u32 = 0x0080;
pub const LOBBY_FLAG_TEMP_UNAVAILABLE: u32 = 0x0100;
pub const LOBBY_FLAG_LEGIT_MODE: u32 = 0x0200;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LobbyKind {
    Default,
    Game,
    Ep3Game,
}

/// Admission refusal codes, each surfaced to the client as a distinct
/// one-line message.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum JoinError {
    Full,
    Nonexistent,
    Bursting,
    LevelTooLow,
    LevelTooHigh,
    V2Only,
    Questing,
    QuestSel,
    LegitFail,
    Unavailable,
    DcOnly,
    V1Only,
    PcOnly,
    SinglePlayer,
    ClassForbidden,
}

impl JoinError {
    /// The localizable body of the refusal message. The caller prefixes
    /// the "Can't join game!" banner.
    pub fn message(self) -> &'static str {
        match self {
            JoinError::Full => "\tC7This game is\nfull.",
            JoinError::Nonexistent => "\tC7This game is\nnon-existant.",
            JoinError::Bursting => "\tC7A Player is\nbursting.",
            JoinError::LevelTooLow => "\tC7Your level is\ntoo low.",
            JoinError::LevelTooHigh => "\tC7Your level is\ntoo high.",
            JoinError::V2Only => "\tC7This game is for\nVersion 2 only.",
            JoinError::Questing => "\tC7A quest is in\nprogress.",
            JoinError::QuestSel => "\tC7Quest selection\nis in progress",
            JoinError::LegitFail => {
                "\tC7Game mode is set\nto legit and you\nfailed the legit\ncheck!"
            }
            JoinError::Unavailable => "\tC7The game is\ntemporarily\nunavailable.",
            JoinError::DcOnly => "\tC7The game is\nfor PSODC only.",
            JoinError::V1Only => "\tC7The game is\nfor PSOv1 only.",
            JoinError::PcOnly => "\tC7The game is\nfor PSOPC only.",
            JoinError::SinglePlayer => "\tC7The game is\nin single player\nmode.",
            JoinError::ClassForbidden => "\tC7Your class is\nnot allowed in a\nPSOv1 game.",
        }
    }
}

/// The facts about a joiner that admission gating needs, decoupled from
/// the session object so the ladder can be exercised directly.
#[derive(Debug, Clone)]
pub struct AdmissionQuery {
    pub version: Version,
    pub level: u32,
    pub class: u8,
    pub passes_legit: bool,
}

/// Outcome of removing a player from a lobby.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RemoveOutcome {
    /// Game lobby emptied out and must be destroyed.
    Destroyed,
    /// Lobby still populated; carries the (possibly re-elected) leader.
    Remaining { leader: u8 },
}

/// Parameters fixed at game creation.
#[derive(Debug, Clone)]
pub struct GameParams {
    pub name: String,
    pub password: String,
    pub version: Version,
    pub difficulty: u8,
    pub battle: bool,
    pub challenge: bool,
    pub v2: bool,
    pub episode: u8,
    pub single_player: bool,
    pub event: u8,
    pub section: u8,
    pub rand_seed: u32,
}

#[derive(Clone)]
pub struct Lobby {
    pub id: LobbyId,
    pub kind: LobbyKind,
    pub name: String,
    pub password: String,

    pub max_clients: usize,
    slots: [Option<ClientId>; LOBBY_MAX_CLIENTS],
    pub leader: u8,
    num_clients: usize,

    pub version: Version,
    pub episode: u8,
    pub difficulty: u8,
    pub battle: bool,
    pub challenge: bool,
    pub v2: bool,
    pub section: u8,
    pub event: u8,

    pub maps: [u32; 0x20],
    pub rand_seed: u32,

    pub qid: u32,
    pub quest_lang: u8,

    pub flags: u32,
    pub min_level: u32,
    pub max_level: u32,

    highest_item: [u32; GAME_MAX_CLIENTS],
}

/// Minimum character level to enter a game at each difficulty, by the
/// rule the v2 servers used (Normal/Hard/Very Hard/Ultimate).
pub fn min_level_for_difficulty(difficulty: u8) -> u32 {
    match difficulty {
        0 => 1,
        1 => 20,
        2 => 40,
        _ => 80,
    }
}

impl Lobby {
    /// Pre-created lounge, block startup.
    pub fn new_default(id: LobbyId, block: u32, event: u8) -> Lobby {
        Lobby {
            id,
            kind: LobbyKind::Default,
            name: format!("BLOCK{:02}-{:02}", block, id),
            password: String::new(),
            max_clients: LOBBY_MAX_CLIENTS,
            slots: [None; LOBBY_MAX_CLIENTS],
            leader: 0,
            num_clients: 0,
            version: Version::Dcv1,
            episode: 0,
            difficulty: 0,
            battle: false,
            challenge: false,
            v2: true,
            section: 0,
            event,
            maps: [0; 0x20],
            rand_seed: 0,
            qid: 0,
            quest_lang: 0,
            flags: LOBBY_FLAG_GC_ALLOWED,
            min_level: 0,
            max_level: 0,
            highest_item: [0; GAME_MAX_CLIENTS],
        }
    }

    /// On-demand game room. Mode flags derive from the creator's
    /// dialect and choices.
    pub fn new_game(id: LobbyId, params: GameParams, maps: [u32; 0x20]) -> Lobby {
        let kind = if params.version == Version::Ep3 {
            LobbyKind::Ep3Game
        } else {
            LobbyKind::Game
        };

        let mut flags = 0;

        match params.version {
            Version::Dcv1 if !params.v2 => flags |= LOBBY_FLAG_V1ONLY,
            Version::Pc if !params.v2 => flags |= LOBBY_FLAG_PCONLY,
            Version::Gc | Version::Ep3 => flags |= LOBBY_FLAG_GC_ALLOWED,
            _ => {}
        }

        if params.single_player {
            flags |= LOBBY_FLAG_SINGLEPLAYER;
        }

        let min_level = min_level_for_difficulty(params.difficulty);

        Lobby {
            id,
            kind,
            name: params.name,
            password: params.password,
            max_clients: GAME_MAX_CLIENTS,
            slots: [None; LOBBY_MAX_CLIENTS],
            leader: 0,
            num_clients: 0,
            version: params.version,
            episode: params.episode,
            difficulty: params.difficulty,
            battle: params.battle,
            challenge: params.challenge,
            v2: params.v2,
            section: params.section,
            event: params.event,
            maps,
            rand_seed: params.rand_seed,
            qid: 0,
            quest_lang: 0,
            flags,
            min_level,
            max_level: 0,
            highest_item: [0; GAME_MAX_CLIENTS],
        }
    }

    #[inline]
    pub fn is_game(&self) -> bool {
        self.kind != LobbyKind::Default
    }

    #[inline]
    pub fn num_clients(&self) -> usize {
        self.num_clients
    }

    #[inline]
    pub fn slot(&self, idx: usize) -> Option<ClientId> {
        self.slots.get(idx).copied().flatten()
    }

    /// Ids of every occupant, with their slot indices, slot order.
    pub fn occupants(&self) -> Vec<(usize, ClientId)> {
        self.slots[..self.max_clients]
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.map(|id| (idx, id)))
            .collect()
    }

    #[inline]
    pub fn is_bursting(&self) -> bool {
        self.flags & LOBBY_FLAG_BURSTING != 0
    }

    #[inline]
    pub fn set_flag(&mut self, flag: u32) {
        self.flags |= flag;
    }

    #[inline]
    pub fn clear_flag(&mut self, flag: u32) {
        self.flags &= !flag;
    }

    /// The admission ladder for game lobbies. Default lobbies admit
    /// anything with a free slot.
    pub fn check_admission(&self, q: &AdmissionQuery) -> Result<(), JoinError> {
        if self.kind == LobbyKind::Default {
            return match self.free_slot() {
                Some(_) => Ok(()),
                None => Err(JoinError::Full),
            };
        }

        // Class gating: the three v3 classes have no v1 models.
        if self.flags & LOBBY_FLAG_V1ONLY != 0 && q.class > DC_PC_CLASS_MAX {
            return Err(JoinError::ClassForbidden);
        }

        // Dialect/mode gating.
        if self.flags & LOBBY_FLAG_V1ONLY != 0 && q.version != Version::Dcv1 {
            return Err(JoinError::V1Only);
        }

        if self.flags & LOBBY_FLAG_PCONLY != 0 && q.version != Version::Pc {
            return Err(JoinError::PcOnly);
        }

        if self.flags & LOBBY_FLAG_DCONLY != 0 && !q.version.is_dc() {
            return Err(JoinError::DcOnly);
        }

        if self.v2 && q.version == Version::Dcv1 {
            return Err(JoinError::V2Only);
        }

        match self.kind {
            LobbyKind::Ep3Game if q.version != Version::Ep3 => {
                return Err(JoinError::Unavailable);
            }
            LobbyKind::Game if q.version == Version::Ep3 => {
                return Err(JoinError::Unavailable);
            }
            _ => {}
        }

        if self.version == Version::Bb && q.version != Version::Bb {
            return Err(JoinError::Unavailable);
        }

        if self.version != Version::Bb && q.version == Version::Bb {
            return Err(JoinError::Unavailable);
        }

        if q.version >= Version::Gc
            && self.version < Version::Gc
            && self.flags & LOBBY_FLAG_GC_ALLOWED == 0
        {
            return Err(JoinError::Unavailable);
        }

        if self.flags & LOBBY_FLAG_TEMP_UNAVAILABLE != 0 {
            return Err(JoinError::Unavailable);
        }

        if self.flags & LOBBY_FLAG_SINGLEPLAYER != 0 && self.num_clients > 0 {
            return Err(JoinError::SinglePlayer);
        }

        // Level band.
        if q.level < self.min_level {
            return Err(JoinError::LevelTooLow);
        }

        if self.max_level > 0 && q.level > self.max_level {
            return Err(JoinError::LevelTooHigh);
        }

        // State machine gating.
        if self.is_bursting() {
            return Err(JoinError::Bursting);
        }

        if self.flags & LOBBY_FLAG_QUESTSEL != 0 {
            return Err(JoinError::QuestSel);
        }

        if self.flags & LOBBY_FLAG_LEGIT_MODE != 0 && !q.passes_legit {
            return Err(JoinError::LegitFail);
        }

        match self.free_slot() {
            Some(_) => Ok(()),
            None => Err(JoinError::Full),
        }
    }

    /// Lowest open slot index.
    pub fn free_slot(&self) -> Option<usize> {
        self.slots[..self.max_clients]
            .iter()
            .position(|slot| slot.is_none())
    }

    /// Install a session into the lowest open slot, re-electing the
    /// leader. Returns the slot index.
    pub fn install(&mut self, client: ClientId) -> Result<usize, JoinError> {
        let slot = self.free_slot().ok_or(JoinError::Full)?;

        self.slots[slot] = Some(client);
        self.num_clients += 1;
        self.elect_leader();

        Ok(slot)
    }

    /// Clear a slot. Leader re-election runs before the caller
    /// broadcasts the departure, so the leave packet already carries the
    /// new leader.
    pub fn remove(&mut self, slot: usize) -> RemoveOutcome {
        if self.slots[slot].take().is_some() {
            self.num_clients -= 1;
        }

        if self.num_clients == 0 && self.is_game() {
            return RemoveOutcome::Destroyed;
        }

        self.elect_leader();
        RemoveOutcome::Remaining {
            leader: self.leader,
        }
    }

    /// The leader is always the lowest-numbered filled slot.
    pub fn elect_leader(&mut self) {
        if let Some(idx) = self.slots[..self.max_clients]
            .iter()
            .position(|slot| slot.is_some())
        {
            self.leader = idx as u8;
        }
    }

    /// Rewrite a joiner's inventory ids from the slot's fountain and
    /// advance the high-water mark past the last id issued.
    pub fn assign_inventory_ids(&mut self, slot: usize, inv: &mut crate::player::Inventory) {
        for item in inv.items.iter_mut() {
            item.item_id = self.next_item_id(slot);
        }
    }

    /// Mint a fresh, lobby-unique item id in `slot`'s lane. Ids carry
    /// the slot in the high bits so the four lanes never collide.
    pub fn next_item_id(&mut self, slot: usize) -> u32 {
        let high = self.highest_item[slot];

        let id = if high == 0 {
            0x0001_0000 | ((slot as u32) << 21)
        } else {
            high + 1
        };

        self.highest_item[slot] = id;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game() -> Lobby {
        Lobby::new_game(
            FIRST_GAME_LOBBY_ID,
            GameParams {
                name: "\tEAlpha".to_string(),
                password: "pass".to_string(),
                version: Version::Dcv2,
                difficulty: 0,
                battle: false,
                challenge: false,
                v2: true,
                episode: 1,
                single_player: false,
                event: 0,
                section: 3,
                rand_seed: 0x1234,
            },
        [0; 0x20],
        )
    }

    fn query(version: Version, level: u32) -> AdmissionQuery {
        AdmissionQuery {
            version,
            level,
            class: 0,
            passes_legit: true,
        }
    }

    #[test]
    fn leader_is_lowest_filled_slot() {
        let mut lobby = game();

        lobby.install(100).unwrap();
        lobby.install(101).unwrap();
        lobby.install(102).unwrap();
        assert_eq!(lobby.leader, 0);

        // Leader leaves; slot 1 takes over before anyone is told.
        match lobby.remove(0) {
            RemoveOutcome::Remaining { leader } => assert_eq!(leader, 1),
            other => panic!("unexpected outcome {:?}", other),
        }

        // Rejoin lands in the vacated lowest slot and reclaims the lead.
        let slot = lobby.install(103).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(lobby.leader, 0);
    }

    #[test]
    fn empty_game_is_destroyed() {
        let mut lobby = game();

        lobby.install(7).unwrap();
        assert_eq!(lobby.remove(0), RemoveOutcome::Destroyed);
    }

    #[test]
    fn default_lobby_survives_emptying() {
        let mut lobby = Lobby::new_default(1, 1, 0);

        lobby.install(7).unwrap();
        assert_eq!(
            lobby.remove(0),
            RemoveOutcome::Remaining { leader: 0 }
        );
    }

    #[test]
    fn admission_gates_on_level() {
        let mut lobby = game();
        lobby.min_level = 20;
        lobby.max_level = 60;

        assert_eq!(
            lobby.check_admission(&query(Version::Dcv2, 5)),
            Err(JoinError::LevelTooLow)
        );
        assert_eq!(
            lobby.check_admission(&query(Version::Dcv2, 90)),
            Err(JoinError::LevelTooHigh)
        );
        assert_eq!(lobby.check_admission(&query(Version::Dcv2, 30)), Ok(()));
    }

    #[test]
    fn v1_client_rejected_from_v2_game() {
        let lobby = game();

        assert_eq!(
            lobby.check_admission(&query(Version::Dcv1, 50)),
            Err(JoinError::V2Only)
        );
    }

    #[test]
    fn v3_class_rejected_from_v1_game() {
        let mut lobby = Lobby::new_game(
            FIRST_GAME_LOBBY_ID,
            GameParams {
                name: "\tEBeta".to_string(),
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
        );
        lobby.min_level = 1;

        let mut q = query(Version::Dcv1, 10);
        q.class = crate::player::CharClass::HUcaseal as u8;

        assert_eq!(
            lobby.check_admission(&q),
            Err(JoinError::ClassForbidden)
        );
    }

    #[test]
    fn bursting_blocks_third_parties() {
        let mut lobby = game();

        lobby.install(1).unwrap();
        lobby.set_flag(LOBBY_FLAG_BURSTING);

        assert_eq!(
            lobby.check_admission(&query(Version::Dcv2, 50)),
            Err(JoinError::Bursting)
        );

        lobby.clear_flag(LOBBY_FLAG_BURSTING);
        assert_eq!(lobby.check_admission(&query(Version::Dcv2, 50)), Ok(()));
    }

    #[test]
    fn full_game_refuses() {
        let mut lobby = game();

        for id in 0..GAME_MAX_CLIENTS {
            lobby.install(id).unwrap();
        }

        assert_eq!(
            lobby.check_admission(&query(Version::Dcv2, 50)),
            Err(JoinError::Full)
        );
    }

    #[test]
    fn single_player_admits_only_the_creator() {
        let mut lobby = game();
        lobby.set_flag(LOBBY_FLAG_SINGLEPLAYER);

        assert_eq!(lobby.check_admission(&query(Version::Dcv2, 50)), Ok(()));
        lobby.install(1).unwrap();

        assert_eq!(
            lobby.check_admission(&query(Version::Dcv2, 50)),
            Err(JoinError::SinglePlayer)
        );
    }

    #[test]
    fn item_ids_are_unique_across_joins_and_drops() {
        let mut lobby = game();
        let mut seen = std::collections::HashSet::new();

        // Two joiners with inventories, then interleaved drops.
        let mut inv = crate::player::Inventory::new();
        for _ in 0..5 {
            inv.add(crate::player::Item::default());
        }

        lobby.assign_inventory_ids(0, &mut inv);
        for item in &inv.items {
            assert!(seen.insert(item.item_id), "dup id {:#x}", item.item_id);
        }

        let mut inv2 = crate::player::Inventory::new();
        for _ in 0..3 {
            inv2.add(crate::player::Item::default());
        }

        lobby.assign_inventory_ids(1, &mut inv2);
        for item in &inv2.items {
            assert!(seen.insert(item.item_id), "dup id {:#x}", item.item_id);
        }

        for _ in 0..20 {
            assert!(seen.insert(lobby.next_item_id(0)));
            assert!(seen.insert(lobby.next_item_id(1)));
            assert!(seen.insert(lobby.next_item_id(2)));
        }

        // Late joiner in a lane that already minted drops.
        let mut inv3 = crate::player::Inventory::new();
        for _ in 0..4 {
            inv3.add(crate::player::Item::default());
        }

        lobby.assign_inventory_ids(2, &mut inv3);
        for item in &inv3.items {
            assert!(seen.insert(item.item_id), "dup id {:#x}", item.item_id);
        }
    }

    #[test]
    fn item_id_shape() {
        let mut lobby = game();

        let id = lobby.next_item_id(3);
        assert_eq!(id, 0x0001_0000 | (3 << 21));
        assert_eq!(lobby.next_item_id(3), id + 1);
    }
}
