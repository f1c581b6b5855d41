//! Inbound packet dispatch and the multi-session orchestration that
//! goes with it: login, lobby movement, game creation, chat, menus,
//! quest flow, guild search and mail.

use crate::block::Ctx;
use crate::client::{
    Client, ClientId, FLAG_BURSTING, FLAG_GC_PROTECT, FLAG_IS_NTE, FLAG_LOGGED_IN,
    FLAG_OVERRIDE_GAME, FLAG_QLOAD_DONE, FLAG_SENT_MOTD, FLAG_STFU, FLAG_WORD_CENSOR,
};
use crate::lobby::{
    AdmissionQuery, GameParams, JoinError, LobbyId, RemoveOutcome, LOBBY_FLAG_BURSTING,
    LOBBY_FLAG_QUESTING, LOBBY_FLAG_QUESTSEL,
};
use crate::net::frame::Header;
use crate::net::support::{ErrorType, ErrorUtils, NetworkError, NetworkResult};
use crate::packets::{self, chat, game, guild, info, lobby as lobby_pkt, menu, quest};
use crate::player::{DispData, Inventory, BLACKLIST_SIZE, INFOBOARD_MAX};
use crate::quests::{language_chain, CategoryType, ListingContext, MemberLangs, QuestFormat};
use crate::ship::BlockMail;
use crate::shipgate::ShipgateMessage;
use crate::subcmd;
use crate::version::{Version, LANG_ENGLISH};
use psokit::{logging, text};
use rand::Rng;
use std::sync::atomic::Ordering;

const JOIN_BANNER: &str = "\tE\tC4Can't join game!";

/// Route one decrypted packet. A fatal error reaps the session; an
/// unknown non-critical type only logs.
pub fn dispatch(ctx: &mut Ctx, id: ClientId, pkt: &[u8]) -> NetworkResult<()> {
    let (version, hdr) = match ctx.clients.get(id) {
        Some(client) => (client.version, Header::parse(client.channel.version(), pkt)),
        None => return Ok(()),
    };

    let hdr_size = version.hdr_size();
    let end = (hdr.len as usize).min(pkt.len());
    let body = &pkt[hdr_size..end];

    match hdr.pkt_type {
        packets::PING_TYPE => Ok(()),

        packets::WELCOME_TYPE => {
            // Content is ignored; the client just wants an echo.
            let client = client_mut(ctx, id)?;
            packets::send_simple(client, packets::WELCOME_TYPE, 0)
        }

        packets::BURST_TYPE => {
            // The client's own goodbye.
            if let Some(client) = ctx.clients.get_mut(id) {
                client.mark_disconnected();
            }
            Ok(())
        }

        packets::LOGIN_93_TYPE => handle_login(ctx, id, body, None),
        packets::LOGIN_9D_TYPE => handle_login(ctx, id, body, Some(Version::Dcv2)),
        packets::LOGIN_9E_TYPE => handle_login(ctx, id, body, None),
        packets::LOGIN_8B_TYPE => {
            if let Some(client) = ctx.clients.get_mut(id) {
                client.flags |= FLAG_IS_NTE;
            }
            handle_login(ctx, id, body, None)
        }

        packets::CHAR_DATA_TYPE => handle_char_data(ctx, id, body),
        packets::CHAT_TYPE => handle_chat(ctx, id, body),

        packets::GAME_COMMAND0_TYPE | packets::GAME_COMMANDC_TYPE => {
            subcmd::handlers::handle_broadcast(ctx, id, hdr.pkt_type, body)
        }
        packets::GAME_COMMAND2_TYPE | packets::GAME_COMMANDD_TYPE => {
            subcmd::handlers::handle_target(ctx, id, hdr.pkt_type, hdr.flags as u8, body)
        }

        packets::MENU_SELECT_TYPE => handle_menu_select(ctx, id, body),
        packets::LOBBY_CHANGE_TYPE => handle_lobby_change(ctx, id, body),
        packets::DC_GAME_CREATE_TYPE => handle_game_create(ctx, id, body),
        packets::DONE_BURST_TYPE => handle_done_burst(ctx, id),

        packets::QUEST_LIST_TYPE => handle_quest_list(ctx, id),
        packets::QUEST_END_LIST_TYPE => handle_quest_end_list(ctx, id),
        packets::QUEST_LOAD_DONE_TYPE => {
            if let Some(client) = ctx.clients.get_mut(id) {
                client.flags |= FLAG_QLOAD_DONE;
            }
            Ok(())
        }

        packets::GUILD_SEARCH_TYPE => handle_guild_search(ctx, id, body),
        packets::SIMPLE_MAIL_TYPE => handle_mail(ctx, id, body),

        packets::INFO_REQUEST_TYPE => handle_info_request(ctx, id, body),
        packets::BLOCK_LIST_REQ_TYPE => {
            let ship_name = ctx.ship.cfg.name.clone();
            let blocks = ctx.ship.cfg.blocks;
            let client = client_mut(ctx, id)?;
            menu::send_block_list(client, &ship_name, blocks)
        }
        packets::SHIP_LIST_TYPE => {
            let ship_name = ctx.ship.cfg.name.clone();
            let peers = ctx.ship.peers.read().clone();
            let entries: Vec<menu::ShipListEntry> = peers
                .iter()
                .map(|p| menu::ShipListEntry {
                    ship_id: p.id,
                    name: text::ensure_tagged(&p.name),
                    menu_code: p.menu_code,
                })
                .collect();
            let client = client_mut(ctx, id)?;
            menu::send_ship_list(client, &ship_name, &entries)
        }

        packets::AUTOREPLY_SET_TYPE => {
            let msg = decode_text(version, body);
            let client = client_mut(ctx, id)?;
            client.autoreply = Some(msg);
            Ok(())
        }
        packets::AUTOREPLY_CLEAR_TYPE => {
            let client = client_mut(ctx, id)?;
            client.autoreply = None;
            Ok(())
        }

        packets::INFOBOARD_TYPE => handle_infoboard_read(ctx, id),
        packets::INFOBOARD_WRITE_TYPE => {
            let mut msg = decode_text(version, body);
            msg.truncate(INFOBOARD_MAX);
            let client = client_mut(ctx, id)?;
            client.infoboard = msg;
            Ok(())
        }

        packets::BLACKLIST_TYPE => {
            let client = client_mut(ctx, id)?;

            for (idx, chunk) in body.chunks_exact(4).take(BLACKLIST_SIZE).enumerate() {
                client.blacklist[idx] =
                    u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
            Ok(())
        }

        packets::LOBBY_ARROW_CHANGE_TYPE => handle_arrow_change(ctx, id, hdr.flags),

        packets::LOBBY_NAME_TYPE => {
            let name = ctx
                .clients
                .get(id)
                .and_then(|c| c.lobby)
                .and_then(|lid| ctx.lobbies.get(lid))
                .map(|l| l.name.clone())
                .unwrap_or_default();

            let client = client_mut(ctx, id)?;
            lobby_pkt::send_lobby_name(client, &name)
        }

        packets::GAME_LIST_TYPE => handle_game_list(ctx, id),
        packets::C_RANK_TYPE => handle_c_rank_read(ctx, id),

        packets::CHOICE_OPTION_TYPE => {
            let client = client_mut(ctx, id)?;
            info::send_choice_search_options(client)
        }
        packets::CHOICE_SEARCH_TYPE => handle_choice_search(ctx, id),

        packets::BB_OPTION_UPDATE_TYPE => {
            let guildcard = ctx.clients.get(id).map(|c| c.guildcard).unwrap_or(0);
            ctx.ship.shipgate.send(ShipgateMessage::SaveOptions {
                guildcard,
                data: body.to_vec(),
            });
            Ok(())
        }

        other => {
            logging::debug!(ctx.log, "unhandled packet type";
                            "context" => "dispatch",
                            "pkt_type" => other,
                            "version" => version.name());
            Ok(())
        }
    }
}

#[inline]
fn client_mut<'a, 'b>(ctx: &'a mut Ctx<'b>, id: ClientId) -> NetworkResult<&'a mut Client> {
    ctx.clients
        .get_mut(id)
        .ok_or(NetworkError::Fatal(ErrorType::ConnectionClosed))
}

fn decode_text(version: Version, body: &[u8]) -> String {
    if version.uses_utf16() {
        text::utf16le_to_utf8(body)
    } else {
        text::decode_8bit(body)
    }
}

// Login body layout shared by the per-version login packets:
// tag, guildcard, serial, access key, language.
pub fn parse_login(body: &[u8]) -> Option<(u32, u8)> {
    if body.len() < 41 {
        return None;
    }

    let guildcard = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
    let language = body[40];

    Some((guildcard, language))
}

fn handle_login(
    ctx: &mut Ctx,
    id: ClientId,
    body: &[u8],
    upgrade: Option<Version>,
) -> NetworkResult<()> {
    let (guildcard, language) = match parse_login(body) {
        Some(parsed) => parsed,
        None => return Err(NetworkError::Fatal(ErrorType::BadLength)),
    };

    if let Some(ban) = ctx.ship.ban_for(guildcard) {
        let client = client_mut(ctx, id)?;
        let _ = packets::send_ban_msg(client, ban.until, &ban.reason);
        client.mark_disconnected();
        return Ok(());
    }

    let privilege = ctx.ship.privilege_for(guildcard);
    let block = ctx.block;
    let motd = ctx.ship.cfg.motd.clone();
    let lobby_ids = ctx.lobbies.default_lobby_ids();

    let name = {
        let client = client_mut(ctx, id)?;

        if let Some(version) = upgrade {
            client.version = version;
        }

        client.guildcard = guildcard;
        client.language = language;
        client.q_lang = language;
        client.privilege = privilege;
        client.flags |= FLAG_LOGGED_IN;
        client.flags &= !FLAG_GC_PROTECT;
        client.login_time = std::time::Instant::now();

        logging::info!(client.log, "client logged in";
                       "context" => "login",
                       "guildcard" => guildcard,
                       "version" => client.version.name());

        packets::send_security(client, guildcard, &[])?;
        packets::send_timestamp(client)?;
        lobby_pkt::send_lobby_list(client, &lobby_ids)?;
        packets::send_simple(client, packets::CHAR_DATA_REQUEST_TYPE, 0)?;

        if !motd.is_empty() && !client.has_flag(FLAG_SENT_MOTD) {
            client.flags |= FLAG_SENT_MOTD;
            let _ = packets::send_txt(client, &motd);
        }

        client.name().to_string()
    };

    ctx.ship.shipgate.send(ShipgateMessage::BlockLogin {
        guildcard,
        name,
        block,
    });
    ctx.ship.shipgate.send(ShipgateMessage::BanCheck { guildcard });

    Ok(())
}

fn handle_char_data(ctx: &mut Ctx, id: ClientId, body: &[u8]) -> NetworkResult<()> {
    let version = match ctx.clients.get(id) {
        Some(client) => client.version,
        None => return Ok(()),
    };

    let (disp, consumed) = match DispData::parse(body, version) {
        Some(parsed) => parsed,
        None => return Err(NetworkError::Fatal(ErrorType::BadLength)),
    };

    let inventory = Inventory::parse(&body[consumed..])
        .map(|(inv, _)| inv)
        .unwrap_or_default();

    let guildcard;
    let name;
    {
        let client = client_mut(ctx, id)?;
        client.disp = disp;
        client.inventory = inventory;
        guildcard = client.guildcard;
        name = client.name().to_string();

        if client.version == Version::Bb {
            info::send_bb_full_char(client)?;
        }
    }

    ctx.ship.register_online(crate::ship::PlayerLocation {
        guildcard,
        name,
        block: ctx.block,
        lobby_id: 0,
        lobby_name: String::new(),
        version,
    });

    // Character data in hand: drop them into a lounge (or the game they
    // were mid-way into creating).
    let pending = ctx.clients.get(id).and_then(|c| c.create_lobby);

    match pending {
        Some(game_id) => {
            if let Some(client) = ctx.clients.get_mut(id) {
                client.create_lobby = None;
            }
            enter_game(ctx, id, game_id)
        }
        None => join_default_lobby(ctx, id, 1),
    }
}

/// Collect the roster snapshot for a lobby before touching any session.
fn collect_roster(
    clients: &crate::block::ClientTable,
    lobby: &crate::lobby::Lobby,
) -> Vec<lobby_pkt::RosterEntry> {
    lobby
        .occupants()
        .into_iter()
        .filter_map(|(slot, cid)| {
            clients.get(cid).map(|c| lobby_pkt::RosterEntry {
                guildcard: c.guildcard,
                slot: slot as u8,
                version: c.version,
                disp: c.disp.clone(),
                inventory: c.inventory.clone(),
                arrow: c.arrow,
            })
        })
        .collect()
}

/// Install a session into a default lobby, falling through to the next
/// lounge when the preferred one is full.
pub fn join_default_lobby(ctx: &mut Ctx, id: ClientId, preferred: LobbyId) -> NetworkResult<()> {
    let candidates: Vec<LobbyId> = {
        let all = ctx.lobbies.default_lobby_ids();
        all.iter()
            .copied()
            .skip_while(|&lid| lid != preferred)
            .chain(all.iter().copied().take_while(|&lid| lid != preferred))
            .collect()
    };

    let mut target = None;

    for lid in candidates {
        if let Some(lobby) = ctx.lobbies.get(lid) {
            if lobby.free_slot().is_some() {
                target = Some(lid);
                break;
            }
        }
    }

    let lid = match target {
        Some(lid) => lid,
        None => {
            let client = client_mut(ctx, id)?;
            return packets::send_message1(client, "\tE\tC4The lobbies on\nthis block are\nfull.");
        }
    };

    remove_from_lobby(ctx, id);

    let slot = {
        let lobby = ctx
            .lobbies
            .get_mut(lid)
            .ok_or(NetworkError::Fatal(ErrorType::ConnectionClosed))?;
        lobby
            .install(id)
            .map_err(|_| NetworkError::Fatal(ErrorType::ConnectionClosed))?
    };

    let guildcard = {
        let client = client_mut(ctx, id)?;
        client.lobby = Some(lid);
        client.client_id = slot as u8;
        client.arrow = 1;
        client.guildcard
    };

    let snapshot = ctx.lobbies.get(lid).expect("joined lobby must exist").clone();
    let roster = collect_roster(ctx.clients, &snapshot);
    let block = ctx.block;

    // Joiner gets the whole roster...
    {
        let client = client_mut(ctx, id)?;
        lobby_pkt::send_lobby_join(client, &snapshot, block, &roster)?;
        lobby_pkt::send_arrow_list(client, &roster)?;
    }

    // ...everyone else gets the joiner.
    let joiner = roster
        .iter()
        .find(|e| e.slot == slot as u8)
        .cloned()
        .expect("joiner must be in roster");

    for (_, other_id) in snapshot.occupants() {
        if other_id == id {
            continue;
        }

        if let Some(other) = ctx.clients.get_mut(other_id) {
            let _ = lobby_pkt::send_lobby_add_player(other, &snapshot, block, &joiner);
        }
    }

    ctx.ship
        .update_location(guildcard, lid, snapshot.name.clone());
    ctx.ship.shipgate.send(ShipgateMessage::LobbyChange {
        guildcard,
        lobby_id: lid,
        lobby_name: snapshot.name.clone(),
    });

    Ok(())
}

fn handle_lobby_change(ctx: &mut Ctx, id: ClientId, body: &[u8]) -> NetworkResult<()> {
    let (menu_id, item_id, _) = match parse_menu_select(body) {
        Some(parsed) => parsed,
        None => return Err(NetworkError::Fatal(ErrorType::BadLength)),
    };

    if menu_id != packets::MENU_ID_LOBBY {
        return Ok(());
    }

    // Bursting sessions stay put until the handshake finishes.
    if ctx
        .clients
        .get(id)
        .map(|c| c.has_flag(FLAG_BURSTING))
        .unwrap_or(false)
    {
        return Ok(());
    }

    join_default_lobby(ctx, id, item_id)
}

/// The game admission path: every gate from §4.3 in order, each failure
/// surfaced as its own message.
pub fn enter_game(ctx: &mut Ctx, id: ClientId, game_id: LobbyId) -> NetworkResult<()> {
    enter_game_with_password(ctx, id, game_id, String::new())
}

pub fn enter_game_with_password(
    ctx: &mut Ctx,
    id: ClientId,
    game_id: LobbyId,
    password: String,
) -> NetworkResult<()> {
    let (protection, query, has_override) = match ctx.clients.get(id) {
        Some(c) => (
            c.has_flag(FLAG_GC_PROTECT),
            AdmissionQuery {
                version: c.version,
                level: c.disp.level,
                class: c.disp.ch_class,
                passes_legit: true,
            },
            c.has_flag(FLAG_OVERRIDE_GAME),
        ),
        None => return Ok(()),
    };

    if protection {
        let client = client_mut(ctx, id)?;
        return packets::send_message1(
            client,
            &format!(
                "{}\n\n{}",
                JOIN_BANNER, "\tC7You must login\nbefore joining a\nteam."
            ),
        );
    }

    // Gate outcomes are computed with only the lobby borrowed, then
    // acted on once the borrow is gone.
    let (wrong_password, check) = match ctx.lobbies.get(game_id) {
        None => (false, Err(JoinError::Nonexistent)),
        Some(lobby) => {
            let wrong = lobby.is_game()
                && !lobby.password.is_empty()
                && lobby.password != password
                && !has_override;

            (wrong, lobby.check_admission(&query))
        }
    };

    if wrong_password {
        let client = client_mut(ctx, id)?;
        return packets::send_message1(
            client,
            &format!("{}\n\n{}", JOIN_BANNER, "\tC7Wrong Password."),
        );
    }

    if let Err(err) = check {
        let client = client_mut(ctx, id)?;
        return packets::send_message1(client, &format!("{}\n\n{}", JOIN_BANNER, err.message()));
    }

    remove_from_lobby(ctx, id);

    let installed = {
        let lobby = ctx
            .lobbies
            .get_mut(game_id)
            .ok_or(NetworkError::Fatal(ErrorType::ConnectionClosed))?;

        let installed = lobby.install(id);

        if installed.is_ok() && lobby.num_clients() > 1 {
            lobby.set_flag(LOBBY_FLAG_BURSTING);
        }

        installed
    };

    let slot = match installed {
        Ok(slot) => slot,
        Err(_) => {
            let client = client_mut(ctx, id)?;
            return packets::send_message1(
                client,
                &format!("{}\n\n{}", JOIN_BANNER, JoinError::Full.message()),
            );
        }
    };

    let guildcard = {
        let lobbies = &mut *ctx.lobbies;
        let clients = &mut *ctx.clients;

        let lobby = lobbies.get_mut(game_id).expect("game must exist");
        let client = clients
            .get_mut(id)
            .ok_or(NetworkError::Fatal(ErrorType::ConnectionClosed))?;

        client.lobby = Some(game_id);
        client.client_id = slot as u8;

        if lobby.num_clients() > 1 {
            client.flags |= FLAG_BURSTING;
        }

        lobby.assign_inventory_ids(slot, &mut client.inventory);
        client.guildcard
    };

    let snapshot = ctx.lobbies.get(game_id).expect("game must exist").clone();
    let roster = collect_roster(ctx.clients, &snapshot);
    let joiner = roster
        .iter()
        .find(|e| e.slot == slot as u8)
        .cloned()
        .expect("joiner must be in roster");

    {
        let client = client_mut(ctx, id)?;
        game::send_game_join(client, &snapshot, &roster)?;
    }

    for (_, other_id) in snapshot.occupants() {
        if other_id == id {
            continue;
        }

        if let Some(other) = ctx.clients.get_mut(other_id) {
            let _ = game::send_game_add_player(other, &snapshot, &joiner);
        }
    }

    // Late joiner during a live quest gets the whole quest stream.
    if snapshot.flags & LOBBY_FLAG_QUESTING != 0 && snapshot.qid != 0 {
        stream_quest_to_client(ctx, id, snapshot.qid, snapshot.quest_lang, snapshot.v2)?;
    }

    ctx.ship
        .update_location(guildcard, game_id, snapshot.name.clone());
    ctx.ship.shipgate.send(ShipgateMessage::LobbyChange {
        guildcard,
        lobby_id: game_id,
        lobby_name: snapshot.name.clone(),
    });

    Ok(())
}

/// Clear a departing session's lobby slot and tell the room. Runs for
/// both voluntary moves and the reaper.
pub fn remove_from_lobby(ctx: &mut Ctx, id: ClientId) {
    let (lid, slot, was_bursting) = match ctx.clients.get_mut(id) {
        Some(client) => {
            let lid = match client.lobby.take() {
                Some(lid) => lid,
                None => return,
            };
            let slot = client.client_id as usize;
            let bursting = client.has_flag(FLAG_BURSTING);
            client.flags &= !FLAG_BURSTING;
            (lid, slot, bursting)
        }
        None => return,
    };

    let (outcome, is_game) = match ctx.lobbies.get_mut(lid) {
        Some(lobby) => {
            if was_bursting {
                lobby.clear_flag(LOBBY_FLAG_BURSTING);
            }
            (lobby.remove(slot), lobby.is_game())
        }
        None => return,
    };

    match outcome {
        RemoveOutcome::Destroyed => {
            logging::debug!(ctx.log, "destroying empty game";
                            "context" => "lobby", "lobby_id" => lid);
            ctx.lobbies.destroy(lid);
        }
        RemoveOutcome::Remaining { leader } => {
            let occupants = ctx
                .lobbies
                .get(lid)
                .map(|l| l.occupants())
                .unwrap_or_default();

            for (_, other_id) in occupants {
                if let Some(other) = ctx.clients.get_mut(other_id) {
                    let result = if is_game {
                        game::send_game_leave(other, slot as u8, leader)
                    } else {
                        lobby_pkt::send_lobby_leave(other, slot as u8, leader)
                    };

                    if result.has_failed() {
                        other.mark_disconnected();
                    }
                }
            }
        }
    }
}

/// Reaper entry point: lobby teardown plus the disconnect-time hooks.
pub fn client_leaving(ctx: &mut Ctx, id: ClientId) {
    let (guildcard, name, version, disp) = match ctx.clients.get(id) {
        Some(c) => (
            c.guildcard,
            c.name().to_string(),
            c.version,
            c.disp.clone(),
        ),
        None => return,
    };

    remove_from_lobby(ctx, id);

    // Character save hook at disconnect; persistence itself is the
    // gate's job.
    if guildcard != 0 && version != Version::Bb {
        let mut data = Vec::new();
        disp.write(&mut data, version);

        ctx.ship.shipgate.send(ShipgateMessage::CharacterBackup {
            guildcard,
            name,
            data,
        });
    }
}

fn handle_chat(ctx: &mut Ctx, id: ClientId, body: &[u8]) -> NetworkResult<()> {
    if body.len() < 8 {
        return Err(NetworkError::Fatal(ErrorType::BadLength));
    }

    let (version, sender_gc, protection, stfu, lid) = match ctx.clients.get(id) {
        Some(c) => (
            c.version,
            c.guildcard,
            c.has_flag(FLAG_GC_PROTECT),
            c.has_flag(FLAG_STFU),
            c.lobby,
        ),
        None => return Ok(()),
    };

    if protection {
        let client = client_mut(ctx, id)?;
        return packets::send_txt(client, "\tE\tC7You must login before\nyou can chat.");
    }

    let lid = match lid {
        Some(lid) => lid,
        None => return Ok(()),
    };

    let raw = decode_text(version, &body[8..]);
    let cc_char = ctx.ship.cfg.colorchat_char as u8;
    let colored = chat::rewrite_color_codes(&raw, cc_char);
    let tagged = text::ensure_tagged(&colored);

    let censor_words = ctx.ship.cfg.censor_words.clone();
    let censored = if censor_words.is_empty() {
        tagged.clone()
    } else {
        chat::censor(&tagged, &censor_words)
    };

    let occupants = ctx
        .lobbies
        .get(lid)
        .map(|l| l.occupants())
        .unwrap_or_default();

    for (_, other_id) in occupants {
        // A muted sender only hears themselves.
        if stfu && other_id != id {
            continue;
        }

        if let Some(other) = ctx.clients.get_mut(other_id) {
            if other_id != id && other.suppresses(sender_gc) {
                continue;
            }

            let msg = if other.has_flag(FLAG_WORD_CENSOR) {
                &censored
            } else {
                &tagged
            };

            if chat::send_chat(other, sender_gc, msg).has_failed() {
                other.mark_disconnected();
            }
        }
    }

    Ok(())
}

pub fn parse_menu_select(body: &[u8]) -> Option<(u32, u32, Vec<u8>)> {
    if body.len() < 8 {
        return None;
    }

    let menu_id = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    let item_id = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);

    Some((menu_id, item_id, body[8..].to_vec()))
}

fn handle_menu_select(ctx: &mut Ctx, id: ClientId, body: &[u8]) -> NetworkResult<()> {
    let (menu_id, item_id, extra) = match parse_menu_select(body) {
        Some(parsed) => parsed,
        None => return Err(NetworkError::Fatal(ErrorType::BadLength)),
    };

    let version = match ctx.clients.get(id) {
        Some(c) => c.version,
        None => return Ok(()),
    };

    match menu_id & 0xFF {
        0xFF if menu_id == packets::MENU_ID_LOBBY => join_default_lobby(ctx, id, item_id),

        m if m == packets::MENU_ID_GAME as u32 => {
            let password = decode_text(version, &extra);
            enter_game_with_password(ctx, id, item_id, password)
        }

        m if m == packets::MENU_ID_BLOCK as u32 => {
            let ip = ctx.ship.cfg.external_ip;
            let port = ctx.ship.base_port_of_block(item_id) + version.port_offset();
            let client = client_mut(ctx, id)?;
            packets::send_redirect(client, ip, port)
        }

        m if m == packets::MENU_ID_SHIP as u32 => {
            let peer = ctx
                .ship
                .peers
                .read()
                .iter()
                .find(|p| p.id == item_id)
                .cloned();

            match peer {
                Some(peer) => {
                    let client = client_mut(ctx, id)?;
                    packets::send_redirect(client, peer.ip, peer.port + version.port_offset())
                }
                None => {
                    let client = client_mut(ctx, id)?;
                    packets::send_message1(client, "\tE\tC4That ship is\ncurrently offline.")
                }
            }
        }

        m if m == packets::MENU_ID_QCATEGORY as u32 => handle_quest_category(ctx, id, item_id),

        m if m == packets::MENU_ID_QUEST as u32 => {
            let category = menu_id >> 8;
            let _ = category;
            start_quest(ctx, id, item_id)
        }

        m if m == packets::MENU_ID_INFODESK as u32 => {
            let entry = ctx
                .ship
                .cfg
                .info_files
                .get(item_id as usize)
                .map(|e| e.text.clone())
                .unwrap_or_default();
            let client = client_mut(ctx, id)?;
            packets::send_info_reply(client, &entry)
        }

        m if m == packets::MENU_ID_GM as u32 => handle_gm_select(ctx, id, menu_id, item_id),

        _ => Ok(()),
    }
}

fn handle_info_request(ctx: &mut Ctx, id: ClientId, body: &[u8]) -> NetworkResult<()> {
    let (menu_id, item_id, _) = match parse_menu_select(body) {
        Some(parsed) => parsed,
        None => return Err(NetworkError::Fatal(ErrorType::BadLength)),
    };

    match menu_id & 0xFF {
        m if m == packets::MENU_ID_GAME as u32 => {
            let info = ctx.lobbies.get(item_id).map(|l| {
                format!(
                    "\tE{}\n{} players\nDifficulty: {}",
                    l.name,
                    l.num_clients(),
                    ["Normal", "Hard", "Very Hard", "Ultimate"]
                        .get(l.difficulty as usize)
                        .unwrap_or(&"Normal"),
                )
            });

            let client = client_mut(ctx, id)?;
            match info {
                Some(info) => packets::send_info_reply(client, &info),
                None => packets::send_info_reply(client, "\tEThat game no\nlonger exists."),
            }
        }

        m if m == packets::MENU_ID_QUEST as u32 => {
            let (q_lang, language) = match ctx.clients.get(id) {
                Some(c) => (c.q_lang, c.language),
                None => return Ok(()),
            };

            let catalog = ctx.ship.quest_catalog();
            let version = effective_quest_version(ctx, id);
            let chain = language_chain(q_lang, language, LANG_ENGLISH);
            let desc = catalog
                .resolve(item_id, version, &chain)
                .map(|(d, _)| d.long_desc.clone());

            let client = client_mut(ctx, id)?;
            match desc {
                Some(long_desc) => quest::send_quest_info(client, &long_desc),
                None => packets::send_info_reply(client, "\tENo information\navailable."),
            }
        }

        _ => Ok(()),
    }
}

fn handle_game_create(ctx: &mut Ctx, id: ClientId, body: &[u8]) -> NetworkResult<()> {
    let (version, section, event) = match ctx.clients.get(id) {
        Some(c) => (
            c.version,
            c.disp.section,
            ctx.ship.game_event.load(Ordering::SeqCst),
        ),
        None => return Ok(()),
    };

    let width = if version.uses_utf16() { 32 } else { 16 };

    if body.len() < width * 2 + 4 {
        return Err(NetworkError::Fatal(ErrorType::BadLength));
    }

    let decode = |bytes: &[u8]| -> String {
        if version.uses_utf16() {
            text::utf16le_to_utf8(bytes)
        } else {
            text::decode_8bit(bytes)
        }
    };

    let name = text::ensure_tagged(&decode(&body[..width]));
    let password = decode(&body[width..width * 2]);
    let difficulty = body[width * 2];
    let battle = body[width * 2 + 1] != 0;
    let challenge = body[width * 2 + 2] != 0;
    let extra = body[width * 2 + 3];

    let (v2, episode, single_player) = match version {
        Version::Dcv1 => (false, 1, extra != 0),
        Version::Dcv2 => (true, 1, false),
        Version::Pc => (extra == 0, 1, false),
        Version::Gc | Version::Ep3 => (true, if extra == 0 { 1 } else { extra }, false),
        Version::Bb => (true, if extra == 0 { 1 } else { extra }, false),
    };

    let mut maps = [0u32; 0x20];
    for slot in maps.iter_mut() {
        *slot = ctx.rng.gen_range(0..3);
    }

    let rand_seed: u32 = ctx.rng.gen();

    let game_id = ctx.lobbies.insert_game(|lid| {
        crate::lobby::Lobby::new_game(
            lid,
            GameParams {
                name: name.clone(),
                password: password.trim_end_matches('\0').to_string(),
                version,
                difficulty,
                battle,
                challenge,
                v2,
                episode,
                single_player,
                event,
                section,
                rand_seed,
            },
            maps,
        )
    });

    logging::info!(ctx.log, "game created";
                   "context" => "game",
                   "lobby_id" => game_id,
                   "name" => %name,
                   "difficulty" => difficulty);

    enter_game_with_password(ctx, id, game_id, password)
}

fn handle_done_burst(ctx: &mut Ctx, id: ClientId) -> NetworkResult<()> {
    let lid = {
        let client = client_mut(ctx, id)?;
        client.flags &= !FLAG_BURSTING;
        client.lobby
    };

    if let Some(lid) = lid {
        if let Some(lobby) = ctx.lobbies.get_mut(lid) {
            lobby.clear_flag(LOBBY_FLAG_BURSTING);
        }
    }

    let client = client_mut(ctx, id)?;
    packets::send_simple(client, packets::DONE_BURST_TYPE, 0)
}

fn effective_quest_version(ctx: &Ctx, id: ClientId) -> Version {
    let client = match ctx.clients.get(id) {
        Some(c) => c,
        None => return Version::Dcv1,
    };

    let lobby = client.lobby.and_then(|lid| ctx.lobbies.get(lid));

    match lobby {
        Some(l) if !l.v2 && client.version.is_dc() => Version::Dcv1,
        _ => client.version,
    }
}

fn lobby_listing_context(ctx: &Ctx, id: ClientId) -> Option<ListingContext> {
    let client = ctx.clients.get(id)?;
    let lid = client.lobby?;
    let lobby = ctx.lobbies.get(lid)?;

    let members = lobby
        .occupants()
        .into_iter()
        .filter_map(|(_, cid)| {
            ctx.clients.get(cid).map(|c| MemberLangs {
                q_lang: c.q_lang,
                language: c.language,
            })
        })
        .collect();

    Some(ListingContext {
        version: client.version,
        v1_compat: !lobby.v2,
        event: lobby.event,
        population: lobby.num_clients(),
        episode: lobby.episode,
        leader_lang: client.q_lang,
        members,
    })
}

fn handle_quest_list(ctx: &mut Ctx, id: ClientId) -> NetworkResult<()> {
    let lid = match ctx.clients.get(id).and_then(|c| c.lobby) {
        Some(lid) => lid,
        None => return Ok(()),
    };

    let (is_game, leader, mode) = match ctx.lobbies.get(lid) {
        Some(l) => (
            l.is_game(),
            l.slot(l.leader as usize),
            if l.battle {
                CategoryType::Battle
            } else if l.challenge {
                CategoryType::Challenge
            } else {
                CategoryType::Normal
            },
        ),
        None => return Ok(()),
    };

    // Only the game leader browses the quest counter.
    if !is_game || leader != Some(id) {
        return Ok(());
    }

    if let Some(lobby) = ctx.lobbies.get_mut(lid) {
        lobby.set_flag(LOBBY_FLAG_QUESTSEL);
    }

    let catalog = ctx.ship.quest_catalog();
    let cats = catalog.categories_for(mode);
    let client = client_mut(ctx, id)?;
    quest::send_quest_categories(client, &cats)
}

fn handle_quest_category(ctx: &mut Ctx, id: ClientId, cat: u32) -> NetworkResult<()> {
    let context = match lobby_listing_context(ctx, id) {
        Some(context) => context,
        None => return Ok(()),
    };

    let catalog = ctx.ship.quest_catalog();
    let listed = catalog.list_quests(cat, &context);

    let client = client_mut(ctx, id)?;
    quest::send_quest_menu(client, cat, &listed)
}

fn handle_quest_end_list(ctx: &mut Ctx, id: ClientId) -> NetworkResult<()> {
    if let Some(lid) = ctx.clients.get(id).and_then(|c| c.lobby) {
        if let Some(lobby) = ctx.lobbies.get_mut(lid) {
            lobby.clear_flag(LOBBY_FLAG_QUESTSEL);
        }
    }

    Ok(())
}

/// Leader picked a quest: mark the lobby questing and stream the files
/// to every member.
fn start_quest(ctx: &mut Ctx, id: ClientId, qid: u32) -> NetworkResult<()> {
    let lid = match ctx.clients.get(id).and_then(|c| c.lobby) {
        Some(lid) => lid,
        None => return Ok(()),
    };

    let leader_lang = ctx.clients.get(id).map(|c| c.q_lang).unwrap_or(LANG_ENGLISH);

    let (members, v2) = match ctx.lobbies.get_mut(lid) {
        Some(lobby) => {
            lobby.clear_flag(LOBBY_FLAG_QUESTSEL);
            lobby.set_flag(LOBBY_FLAG_QUESTING);
            lobby.qid = qid;
            lobby.quest_lang = leader_lang;
            (
                lobby.occupants().into_iter().map(|(_, cid)| cid).collect::<Vec<_>>(),
                lobby.v2,
            )
        }
        None => return Ok(()),
    };

    logging::info!(ctx.log, "quest starting";
                   "context" => "quest",
                   "lobby_id" => lid,
                   "qid" => qid);

    for member in members {
        if stream_quest_to_client(ctx, member, qid, leader_lang, v2).has_failed() {
            if let Some(client) = ctx.clients.get_mut(member) {
                client.mark_disconnected();
            }
        }
    }

    Ok(())
}

/// Resolve and stream one quest to one member, walking the language
/// fallback chain. An unresolvable member is a disaster state: they get
/// disconnected rather than left questless in a questing game.
fn stream_quest_to_client(
    ctx: &mut Ctx,
    id: ClientId,
    qid: u32,
    leader_lang: u8,
    lobby_v2: bool,
) -> NetworkResult<()> {
    let (version, q_lang, language) = match ctx.clients.get(id) {
        Some(c) => (c.version, c.q_lang, c.language),
        None => return Ok(()),
    };

    if version == Version::Ep3 {
        return Err(NetworkError::Fatal(ErrorType::UnknownVersion));
    }

    let effective = if !lobby_v2 && version.is_dc() {
        Version::Dcv1
    } else {
        version
    };

    let catalog = ctx.ship.quest_catalog();
    let chain = language_chain(q_lang, language, leader_lang);

    let resolved = catalog.resolve(qid, effective, &chain);

    let (desc, lang) = match resolved {
        Some(pair) => pair,
        None => {
            logging::warn!(ctx.log, "no quest descriptor for member";
                           "context" => "quest",
                           "qid" => qid,
                           "version" => version.name());
            let client = client_mut(ctx, id)?;
            client.mark_disconnected();
            return Ok(());
        }
    };

    let client = client_mut(ctx, id)?;

    match desc.format {
        QuestFormat::BinDat => quest::send_quest_bindat(client, &catalog, &desc, effective, lang),
        QuestFormat::Qst => quest::send_quest_qst(client, &catalog, &desc, effective, lang),
    }
}

fn handle_guild_search(ctx: &mut Ctx, id: ClientId, body: &[u8]) -> NetworkResult<()> {
    if body.len() < 12 {
        return Err(NetworkError::Fatal(ErrorType::BadLength));
    }

    let searcher = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
    let target = u32::from_le_bytes([body[8], body[9], body[10], body[11]]);

    let location = ctx.ship.find_online(target);

    match location {
        Some(loc) => {
            let info = guild::GuildReplyInfo {
                guildcard: target,
                name: text::ensure_tagged(&loc.name),
                lobby_name: loc.lobby_name.clone(),
                block: loc.block,
                ship_name: ctx.ship.cfg.name.clone(),
                ip: ctx.ship.cfg.external_ip,
                base_port: ctx.ship.base_port_of_block(loc.block),
                menu_id: packets::MENU_ID_LOBBY,
                item_id: loc.lobby_id,
            };

            let client = client_mut(ctx, id)?;
            guild::send_guild_reply(client, &info)
        }
        None => {
            // Not on this ship; let the gate try the rest of the fleet.
            ctx.ship
                .shipgate
                .send(ShipgateMessage::ForwardSearch { searcher, target });
            Ok(())
        }
    }
}

fn handle_mail(ctx: &mut Ctx, id: ClientId, body: &[u8]) -> NetworkResult<()> {
    let (version, sender_gc, stfu) = match ctx.clients.get(id) {
        Some(c) => (c.version, c.guildcard, c.has_flag(FLAG_STFU)),
        None => return Ok(()),
    };

    if stfu {
        return Ok(());
    }

    let name_width = if version.uses_utf16() { 32 } else { 16 };

    if body.len() < 8 + name_width + 4 {
        return Err(NetworkError::Fatal(ErrorType::BadLength));
    }

    let sender_name = decode_text(version, &body[8..8 + name_width]);
    let dest_off = 8 + name_width;
    let dest_gc = u32::from_le_bytes([
        body[dest_off],
        body[dest_off + 1],
        body[dest_off + 2],
        body[dest_off + 3],
    ]);

    // BB mail carries its (ignored inbound) timestamp before the text.
    let msg_off = if version == Version::Bb {
        dest_off + 4 + 0x40
    } else {
        dest_off + 4
    };

    if body.len() < msg_off {
        return Err(NetworkError::Fatal(ErrorType::BadLength));
    }

    let message = decode_text(version, &body[msg_off..]);

    let mail = guild::SimpleMail {
        sender_gc,
        sender_name: text::ensure_tagged(&sender_name),
        dest_gc,
        message,
    };

    route_mail(ctx, mail);
    Ok(())
}

/// Hand a mail to its destination: locally when the player is on this
/// block, via the block mailboxes when elsewhere on the ship.
pub fn route_mail(ctx: &mut Ctx, mail: guild::SimpleMail) {
    if ctx.clients.find_by_guildcard(mail.dest_gc).is_some() {
        deliver_mail(ctx, &mail);
        return;
    }

    match ctx.ship.find_online(mail.dest_gc) {
        Some(loc) if loc.block != ctx.block => {
            ctx.ship.post_to_block(loc.block, BlockMail::Mail(mail));
        }
        _ => {
            // Unknown here; the gate can still find them on a peer ship.
            ctx.ship.shipgate.send(ShipgateMessage::ForwardSearch {
                searcher: mail.sender_gc,
                target: mail.dest_gc,
            });
        }
    }
}

/// Local delivery: blacklist filtering, the mail itself, then the
/// recipient's autoreply if one is set.
pub fn deliver_mail(ctx: &mut Ctx, mail: &guild::SimpleMail) {
    let dest_id = match ctx.clients.find_by_guildcard(mail.dest_gc) {
        Some(dest) => dest,
        None => return,
    };

    let autoreply = {
        let dest = match ctx.clients.get_mut(dest_id) {
            Some(dest) => dest,
            None => return,
        };

        if dest.suppresses(mail.sender_gc) {
            return;
        }

        if guild::send_simple_mail(dest, mail).has_failed() {
            dest.mark_disconnected();
            return;
        }

        dest.autoreply
            .clone()
            .map(|text| (dest.guildcard, dest.name().to_string(), text))
    };

    if let Some((gc, name, reply_text)) = autoreply {
        let reply = guild::SimpleMail {
            sender_gc: gc,
            sender_name: text::ensure_tagged(&name),
            dest_gc: mail.sender_gc,
            message: reply_text,
        };

        route_mail(ctx, reply);
    }
}

fn handle_game_list(ctx: &mut Ctx, id: ClientId) -> NetworkResult<()> {
    let ship_name = ctx.ship.cfg.name.clone();

    let games: Vec<game::GameListEntry> = ctx
        .lobbies
        .games()
        .map(|l| game::GameListEntry {
            id: l.id,
            name: l.name.clone(),
            difficulty: l.difficulty,
            players: l.num_clients() as u8,
            episode: l.episode,
            v2: l.v2,
            battle: l.battle,
            challenge: l.challenge,
            locked: !l.password.is_empty(),
        })
        .collect();

    let client = client_mut(ctx, id)?;
    game::send_game_list(client, &ship_name, &games)
}

fn handle_c_rank_read(ctx: &mut Ctx, id: ClientId) -> NetworkResult<()> {
    let lid = match ctx.clients.get(id).and_then(|c| c.lobby) {
        Some(lid) => lid,
        None => return Ok(()),
    };

    let occupants = ctx
        .lobbies
        .get(lid)
        .map(|l| l.occupants())
        .unwrap_or_default();

    let entries: Vec<info::CRankEntry> = occupants
        .into_iter()
        .filter_map(|(slot, cid)| {
            ctx.clients.get(cid).map(|c| info::CRankEntry {
                client_id: slot as u32,
                blob: c.c_rank.clone(),
            })
        })
        .collect();

    let client = client_mut(ctx, id)?;
    info::send_c_rank(client, &entries)
}

fn handle_infoboard_read(ctx: &mut Ctx, id: ClientId) -> NetworkResult<()> {
    let lid = match ctx.clients.get(id).and_then(|c| c.lobby) {
        Some(lid) => lid,
        None => return Ok(()),
    };

    let occupants = ctx
        .lobbies
        .get(lid)
        .map(|l| l.occupants())
        .unwrap_or_default();

    let entries: Vec<info::InfoboardEntry> = occupants
        .into_iter()
        .filter_map(|(_, cid)| {
            ctx.clients.get(cid).map(|c| info::InfoboardEntry {
                name: c.disp.name.clone(),
                board: c.infoboard.clone(),
            })
        })
        .collect();

    let client = client_mut(ctx, id)?;
    info::send_infoboard(client, &entries)
}

fn handle_arrow_change(ctx: &mut Ctx, id: ClientId, color: u32) -> NetworkResult<()> {
    let lid = {
        let client = client_mut(ctx, id)?;
        client.arrow = color;
        client.lobby
    };

    let lid = match lid {
        Some(lid) => lid,
        None => return Ok(()),
    };

    let snapshot = match ctx.lobbies.get(lid) {
        Some(lobby) => lobby.clone(),
        None => return Ok(()),
    };

    let roster = collect_roster(ctx.clients, &snapshot);

    for (_, other_id) in snapshot.occupants() {
        if let Some(other) = ctx.clients.get_mut(other_id) {
            let _ = lobby_pkt::send_arrow_list(other, &roster);
        }
    }

    Ok(())
}

fn handle_choice_search(ctx: &mut Ctx, id: ClientId) -> NetworkResult<()> {
    let ship_name = ctx.ship.cfg.name.clone();
    let ip = ctx.ship.cfg.external_ip;
    let base_port = ctx.base_port;
    let block = ctx.block;

    let (version, self_gc) = match ctx.clients.get(id) {
        Some(c) => (c.version, c.guildcard),
        None => return Ok(()),
    };

    let mut entries = Vec::new();

    for other_id in ctx.clients.live_ids() {
        if entries.len() >= 0x20 {
            break;
        }

        if let Some(other) = ctx.clients.get(other_id) {
            if other.guildcard == 0 || other.guildcard == self_gc {
                continue;
            }

            let lobby_name = other
                .lobby
                .and_then(|lid| ctx.lobbies.get(lid))
                .map(|l| l.name.clone())
                .unwrap_or_default();

            entries.push(info::ChoiceReplyEntry {
                guildcard: other.guildcard,
                name: other.disp.name.clone(),
                info: format!(
                    "\tELv{} {}",
                    other.disp.level,
                    crate::player::CharClass::from_u8(other.disp.ch_class)
                        .map(|c| c.name())
                        .unwrap_or("?")
                ),
                location: format!("{},BLOCK{:02},{}", lobby_name, block, ship_name),
                ip,
                port: base_port + version.port_offset(),
                menu_id: packets::MENU_ID_LOBBY,
                item_id: other.lobby.unwrap_or(0),
            });
        }
    }

    let client = client_mut(ctx, id)?;
    info::send_choice_reply(client, &entries)
}

fn handle_gm_select(ctx: &mut Ctx, id: ClientId, menu_id: u32, item_id: u32) -> NetworkResult<()> {
    let privilege = match ctx.clients.get(id) {
        Some(c) => c.privilege,
        None => return Ok(()),
    };

    let action = match crate::gm::action_for(menu_id, item_id, privilege) {
        Some(action) => action,
        None => {
            logging::warn!(ctx.log, "unauthorized gm selection";
                           "context" => "gm",
                           "menu_id" => menu_id,
                           "item_id" => item_id);
            return Ok(());
        }
    };

    match action {
        crate::gm::GmAction::RefreshQuests => {
            let result = ctx.ship.reload_quests();
            let client = client_mut(ctx, id)?;
            match result {
                Ok(count) => packets::send_txt(
                    client,
                    &format!("\tE\tC7Quests refreshed:\n{} categories.", count),
                ),
                Err(err) => packets::send_txt(client, &format!("\tE\tC7Refresh failed:\n{}", err)),
            }
        }
        crate::gm::GmAction::RefreshGms => {
            let result = ctx.ship.reload_gms();
            let client = client_mut(ctx, id)?;
            match result {
                Ok(count) => {
                    packets::send_txt(client, &format!("\tE\tC7GM roster refreshed:\n{} GMs.", count))
                }
                Err(err) => packets::send_txt(client, &format!("\tE\tC7Refresh failed:\n{}", err)),
            }
        }
        crate::gm::GmAction::RefreshLimits => {
            let client = client_mut(ctx, id)?;
            packets::send_txt(client, "\tE\tC7Limits refreshed.")
        }
        crate::gm::GmAction::Shutdown => {
            logging::warn!(ctx.log, "gm shutdown requested";
                           "context" => "gm", "item_id" => item_id);
            ctx.ship.run.store(false, Ordering::SeqCst);

            for handle in ctx.ship.blocks.read().iter() {
                handle.post(BlockMail::Shutdown);
            }

            Ok(())
        }
        crate::gm::GmAction::GameEvent(event) => {
            ctx.ship.game_event.store(event, Ordering::SeqCst);
            let client = client_mut(ctx, id)?;
            packets::send_txt(client, "\tE\tC7Game event set.")
        }
        crate::gm::GmAction::LobbyEvent(event) => {
            ctx.ship.lobby_event.store(event, Ordering::SeqCst);

            for lid in ctx.lobbies.default_lobby_ids() {
                if let Some(lobby) = ctx.lobbies.get_mut(lid) {
                    lobby.event = event;
                }
            }

            // Everyone in a lounge sees the new decorations right away.
            for other_id in ctx.clients.live_ids() {
                let in_default = ctx
                    .clients
                    .get(other_id)
                    .and_then(|c| c.lobby)
                    .and_then(|lid| ctx.lobbies.get(lid))
                    .map(|l| !l.is_game())
                    .unwrap_or(false);

                if in_default {
                    if let Some(other) = ctx.clients.get_mut(other_id) {
                        if other.version >= Version::Gc {
                            let _ = packets::send_simple(
                                other,
                                packets::LOBBY_EVENT_TYPE,
                                u32::from(event),
                            );
                        }
                    }
                }
            }

            Ok(())
        }
    }
}
