//! GM menu surface: a declarative entry table filtered by privilege and
//! lobby type, and the action decoding for selections.

use crate::client::{PRIV_GLOBAL_GM, PRIV_GLOBAL_ROOT, PRIV_LOCAL_GM, PRIV_LOCAL_ROOT};
use crate::lobby::LobbyKind;
use crate::packets::menu::MenuEntry;
use crate::packets::MENU_ID_GM;

// Submenus of the GM menu.
pub const MENU_ID_GM_GAME_EVENT: u32 = 0x0000_0607;
pub const MENU_ID_GM_LOBBY_EVENT: u32 = 0x0000_0707;

pub const ITEM_ID_GM_REF_QUESTS: u32 = 0x0000_0001;
pub const ITEM_ID_GM_REF_GMS: u32 = 0x0000_0002;
pub const ITEM_ID_GM_REF_LIMITS: u32 = 0x0000_0003;
pub const ITEM_ID_GM_SHUTDOWN: u32 = 0x0000_0004;
pub const ITEM_ID_GM_GAME_EVENT: u32 = 0x0000_0006;
pub const ITEM_ID_GM_LOBBY_EVENT: u32 = 0x0000_0007;

pub const LOBBY_TYPE_DEFAULT: u8 = 0x01;
pub const LOBBY_TYPE_GAME: u8 = 0x02;

const ANY_GM: u8 = PRIV_LOCAL_GM | PRIV_GLOBAL_GM | PRIV_LOCAL_ROOT | PRIV_GLOBAL_ROOT;
const ANY_ROOT: u8 = PRIV_LOCAL_ROOT | PRIV_GLOBAL_ROOT;

pub struct GmMenuItem {
    pub menu_id: u32,
    pub item_id: u32,
    /// Any of these privilege bits grants the row.
    pub privilege: u8,
    /// Lobby types the row is offered in.
    pub lobby_types: u8,
    pub text: &'static str,
}

/// The whole GM surface as data; generic traversal below does the rest.
pub static GM_MENU_ITEMS: &[GmMenuItem] = &[
    GmMenuItem {
        menu_id: MENU_ID_GM,
        item_id: ITEM_ID_GM_REF_QUESTS,
        privilege: ANY_ROOT,
        lobby_types: LOBBY_TYPE_DEFAULT,
        text: "\tERefresh Quests",
    },
    GmMenuItem {
        menu_id: MENU_ID_GM,
        item_id: ITEM_ID_GM_REF_GMS,
        privilege: ANY_ROOT,
        lobby_types: LOBBY_TYPE_DEFAULT,
        text: "\tERefresh GMs",
    },
    GmMenuItem {
        menu_id: MENU_ID_GM,
        item_id: ITEM_ID_GM_REF_LIMITS,
        privilege: ANY_ROOT,
        lobby_types: LOBBY_TYPE_DEFAULT,
        text: "\tERefresh Limits",
    },
    GmMenuItem {
        menu_id: MENU_ID_GM,
        item_id: ITEM_ID_GM_SHUTDOWN,
        privilege: ANY_ROOT,
        lobby_types: LOBBY_TYPE_DEFAULT,
        text: "\tEShut Down Ship",
    },
    GmMenuItem {
        menu_id: MENU_ID_GM,
        item_id: ITEM_ID_GM_GAME_EVENT,
        privilege: ANY_GM,
        lobby_types: LOBBY_TYPE_DEFAULT,
        text: "\tESet Game Event",
    },
    GmMenuItem {
        menu_id: MENU_ID_GM,
        item_id: ITEM_ID_GM_LOBBY_EVENT,
        privilege: ANY_GM,
        lobby_types: LOBBY_TYPE_DEFAULT,
        text: "\tESet Lobby Event",
    },
];

/// Rows of `menu_id` this session may see in its current lobby.
pub fn entries_for(menu_id: u32, privilege: u8, kind: LobbyKind) -> Vec<MenuEntry> {
    let lobby_bit = match kind {
        LobbyKind::Default => LOBBY_TYPE_DEFAULT,
        _ => LOBBY_TYPE_GAME,
    };

    GM_MENU_ITEMS
        .iter()
        .filter(|item| item.menu_id == menu_id)
        .filter(|item| item.privilege & privilege != 0)
        .filter(|item| item.lobby_types & lobby_bit != 0)
        .map(|item| MenuEntry::new(item.menu_id, item.item_id, item.text))
        .collect()
}

/// Decoded GM selections.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum GmAction {
    RefreshQuests,
    RefreshGms,
    RefreshLimits,
    Shutdown,
    GameEvent(u8),
    LobbyEvent(u8),
}

/// Decode a menu selection into an action, or None when the selection
/// is not a GM item (or not one this session is allowed to trigger).
pub fn action_for(menu_id: u32, item_id: u32, privilege: u8) -> Option<GmAction> {
    match menu_id {
        MENU_ID_GM => {
            let item = GM_MENU_ITEMS
                .iter()
                .find(|it| it.menu_id == MENU_ID_GM && it.item_id == item_id)?;

            if item.privilege & privilege == 0 {
                return None;
            }

            match item_id {
                ITEM_ID_GM_REF_QUESTS => Some(GmAction::RefreshQuests),
                ITEM_ID_GM_REF_GMS => Some(GmAction::RefreshGms),
                ITEM_ID_GM_REF_LIMITS => Some(GmAction::RefreshLimits),
                ITEM_ID_GM_SHUTDOWN => Some(GmAction::Shutdown),
                _ => None,
            }
        }
        MENU_ID_GM_GAME_EVENT if privilege & ANY_GM != 0 => {
            Some(GmAction::GameEvent(item_id as u8))
        }
        MENU_ID_GM_LOBBY_EVENT if privilege & ANY_GM != 0 => {
            Some(GmAction::LobbyEvent(item_id as u8))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_players_see_nothing() {
        assert!(entries_for(MENU_ID_GM, 0, LobbyKind::Default).is_empty());
    }

    #[test]
    fn local_gm_sees_event_rows_only() {
        let rows = entries_for(MENU_ID_GM, PRIV_LOCAL_GM, LobbyKind::Default);

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| {
            r.item_id == ITEM_ID_GM_GAME_EVENT || r.item_id == ITEM_ID_GM_LOBBY_EVENT
        }));
    }

    #[test]
    fn root_sees_everything_in_the_lounge() {
        let rows = entries_for(MENU_ID_GM, PRIV_LOCAL_ROOT, LobbyKind::Default);
        assert_eq!(rows.len(), GM_MENU_ITEMS.len());

        // But nothing inside a game.
        let rows = entries_for(MENU_ID_GM, PRIV_LOCAL_ROOT, LobbyKind::Game);
        assert!(rows.is_empty());
    }

    #[test]
    fn actions_enforce_privilege() {
        assert_eq!(
            action_for(MENU_ID_GM, ITEM_ID_GM_REF_QUESTS, PRIV_LOCAL_ROOT),
            Some(GmAction::RefreshQuests)
        );
        assert_eq!(action_for(MENU_ID_GM, ITEM_ID_GM_REF_QUESTS, PRIV_LOCAL_GM), None);
        assert_eq!(
            action_for(MENU_ID_GM_GAME_EVENT, 3, PRIV_LOCAL_GM),
            Some(GmAction::GameEvent(3))
        );
        assert_eq!(action_for(MENU_ID_GM_GAME_EVENT, 3, 0), None);
    }
}
