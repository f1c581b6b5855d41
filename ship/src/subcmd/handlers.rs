//! The subcommand router: side-effect bookkeeping for the sender,
//! server-synthesized replies, and the per-recipient transcoded
//! broadcast/target fan-out.

use crate::block::Ctx;
use crate::client::{ClientId, FLAG_IS_NTE};
use crate::lobby::LobbyId;
use crate::net::support::{ErrorType, ErrorUtils, NetworkError, NetworkResult};
use crate::packets::PacketBuf;
use crate::player::Item;
use crate::subcmd::*;
use byteorder::{ByteOrder, LittleEndian};
use psokit::logging;
use rand::Rng;

/// Base item codes the synthesized drops are rolled from. Authoritative
/// drop policy lives behind the shipgate; this covers the common case
/// of a lobby without policy tables.
const DROP_TABLE: [u32; 4] = [0x0003_0000, 0x0003_0100, 0x0003_0200, 0x0004_0000];

fn read_f32(data: &[u8], off: usize) -> f32 {
    f32::from_bits(LittleEndian::read_u32(&data[off..off + 4]))
}

/// Snapshot of the sender taken before any other session is touched.
struct Sender {
    lobby: LobbyId,
    slot: u8,
    guildcard: u32,
    is_nte: bool,
}

fn sender_snapshot(ctx: &Ctx, id: ClientId) -> Option<Sender> {
    let client = ctx.clients.get(id)?;

    Some(Sender {
        lobby: client.lobby?,
        slot: client.client_id,
        guildcard: client.guildcard,
        is_nte: client.has_flag(FLAG_IS_NTE),
    })
}

/// Rebuild the envelope in a recipient's dialect and queue it. Returns
/// false when the copy had to be dropped for that dialect.
fn forward_copy(
    ctx: &mut Ctx,
    recipient: ClientId,
    outer_type: u16,
    flags: u32,
    body: &[u8],
) -> bool {
    let (is_nte, _version) = match ctx.clients.get(recipient) {
        Some(c) => (c.has_flag(FLAG_IS_NTE), c.version),
        None => return false,
    };

    let opcode = if is_nte {
        match translate_for_nte(body[0]) {
            Some(opcode) => opcode,
            None => return false,
        }
    } else {
        body[0]
    };

    if let Some(client) = ctx.clients.get_mut(recipient) {
        let mut pkt = PacketBuf::new(client.version, outer_type, flags);
        pkt.u8(opcode);
        pkt.bytes(&body[1..]);

        if client.channel.enqueue(pkt.finish()).has_failed() {
            client.mark_disconnected();
            return false;
        }
    }

    true
}

/// Broadcast envelope (0x60 / 0x6C): update cached state, maybe answer
/// the sender directly, then fan out transcoded copies.
pub fn handle_broadcast(
    ctx: &mut Ctx,
    id: ClientId,
    outer_type: u16,
    body: &[u8],
) -> NetworkResult<()> {
    let sender = match sender_snapshot(ctx, id) {
        Some(sender) => sender,
        None => return Ok(()),
    };

    let env = match Envelope::parse(body) {
        Some(env) => env,
        None => return Err(NetworkError::Fatal(ErrorType::BadLength)),
    };

    let opcode = if sender.is_nte {
        translate_from_nte(env.opcode)
    } else {
        env.opcode
    };

    // Normalized copy of the inner payload for the fan-out.
    let mut normalized = body.to_vec();
    normalized[0] = opcode;

    apply_side_effects(ctx, id, &sender, opcode, env.data)?;

    // Requests the server answers itself are never reflected.
    match opcode {
        SUBCMD_ITEMREQ | SUBCMD_BITEMREQ => return synthesize_drop(ctx, id, &sender, env.data),
        SUBCMD_SHOPREQ => return synthesize_shop(ctx, id),
        SUBCMD_OPEN_BANK => return synthesize_bank(ctx, id),
        SUBCMD_BANK_ACTION => return synthesize_bank(ctx, id),
        SUBCMD_REQ_EXP => return synthesize_exp(ctx, id, env.data),
        _ => {}
    }

    // A burst in progress freezes everything but the handshake and its
    // state replay.
    let bursting = ctx
        .lobbies
        .get(sender.lobby)
        .map(|l| l.is_bursting())
        .unwrap_or(false);

    if bursting && !burst_allowed(opcode) {
        logging::trace!(ctx.log, "subcommand dropped during burst";
                        "context" => "subcmd", "opcode" => opcode);
        return Ok(());
    }

    let occupants = ctx
        .lobbies
        .get(sender.lobby)
        .map(|l| l.occupants())
        .unwrap_or_default();

    for (_, other_id) in occupants {
        if other_id == id {
            continue;
        }

        let suppressed = ctx
            .clients
            .get(other_id)
            .map(|c| c.suppresses(sender.guildcard))
            .unwrap_or(true);

        if suppressed {
            continue;
        }

        forward_copy(ctx, other_id, outer_type, 0, &normalized);
    }

    Ok(())
}

/// Target envelope (0x62 / 0x6D): deliver to exactly one slot.
pub fn handle_target(
    ctx: &mut Ctx,
    id: ClientId,
    outer_type: u16,
    target_slot: u8,
    body: &[u8],
) -> NetworkResult<()> {
    let sender = match sender_snapshot(ctx, id) {
        Some(sender) => sender,
        None => return Ok(()),
    };

    let env = match Envelope::parse(body) {
        Some(env) => env,
        None => return Err(NetworkError::Fatal(ErrorType::BadLength)),
    };

    let opcode = if sender.is_nte {
        translate_from_nte(env.opcode)
    } else {
        env.opcode
    };

    let target = ctx
        .lobbies
        .get(sender.lobby)
        .and_then(|l| l.slot(usize::from(target_slot)));

    let target = match target {
        Some(target) if target != id => target,
        _ => return Ok(()),
    };

    let mut normalized = body.to_vec();
    normalized[0] = opcode;

    forward_copy(ctx, target, outer_type, u32::from(target_slot), &normalized);
    Ok(())
}

/// State the router mirrors off the wire before forwarding.
fn apply_side_effects(
    ctx: &mut Ctx,
    id: ClientId,
    sender: &Sender,
    opcode: u8,
    data: &[u8],
) -> NetworkResult<()> {
    match opcode {
        SUBCMD_SET_AREA | SUBCMD_SET_AREA_21 => {
            if data.len() < 3 {
                return Err(NetworkError::Fatal(ErrorType::BadLength));
            }

            // The slot byte has to be the sender's own.
            if data[0] != sender.slot {
                return Err(NetworkError::Fatal(ErrorType::Misaligned));
            }

            if let Some(client) = ctx.clients.get_mut(id) {
                client.cur_area = u32::from(data[2]);
            }
        }

        SUBCMD_SET_POS_24 | SUBCMD_SET_POS_3E | SUBCMD_SET_POS_3F => {
            if data.len() < 14 {
                return Err(NetworkError::Fatal(ErrorType::BadLength));
            }

            if data[0] != sender.slot {
                return Err(NetworkError::Fatal(ErrorType::Misaligned));
            }

            if let Some(client) = ctx.clients.get_mut(id) {
                client.x = read_f32(data, 2);
                client.y = read_f32(data, 6);
                client.z = read_f32(data, 10);
            }
        }

        SUBCMD_MOVE_SLOW | SUBCMD_MOVE_FAST => {
            if data.len() < 10 {
                return Err(NetworkError::Fatal(ErrorType::BadLength));
            }

            if data[0] != sender.slot {
                return Err(NetworkError::Fatal(ErrorType::Misaligned));
            }

            if let Some(client) = ctx.clients.get_mut(id) {
                client.x = read_f32(data, 2);
                client.z = read_f32(data, 6);
            }
        }

        SUBCMD_DROP_ITEM | SUBCMD_DROP_STACK | SUBCMD_DELETE_ITEM | SUBCMD_USE_ITEM
        | SUBCMD_DESTROY_ITEM => {
            if data.len() < 8 {
                return Err(NetworkError::Fatal(ErrorType::BadLength));
            }

            let item_id = LittleEndian::read_u32(&data[4..8]);

            if let Some(client) = ctx.clients.get_mut(id) {
                client.inventory.remove(item_id);
            }
        }

        SUBCMD_TAKE_ITEM => {
            if data.len() < 20 {
                return Err(NetworkError::Fatal(ErrorType::BadLength));
            }

            let item = Item {
                item_id: LittleEndian::read_u32(&data[4..8]),
                data: [
                    LittleEndian::read_u32(&data[8..12]),
                    LittleEndian::read_u32(&data[12..16]),
                    LittleEndian::read_u32(&data[16..20]),
                ],
                data2: 0,
            };

            if let Some(client) = ctx.clients.get_mut(id) {
                client.inventory.add(item);
            }
        }

        SUBCMD_LEVELUP => {
            if data.len() < 4 {
                return Err(NetworkError::Fatal(ErrorType::BadLength));
            }

            let level = u32::from(LittleEndian::read_u16(&data[2..4]));

            if let Some(client) = ctx.clients.get_mut(id) {
                client.disp.level = level.max(1);
            }
        }

        SUBCMD_CMODE_GRAVE => {
            if let Some(client) = ctx.clients.get_mut(id) {
                client.c_rank = data.to_vec();
            }
        }

        _ => {}
    }

    Ok(())
}

/// Answer an item-drop request with a rolled item, to the requester
/// only.
fn synthesize_drop(ctx: &mut Ctx, id: ClientId, sender: &Sender, data: &[u8]) -> NetworkResult<()> {
    if data.len() < 14 {
        return Err(NetworkError::Fatal(ErrorType::BadLength));
    }

    let area = data[2];
    let x = read_f32(data, 6);
    let z = read_f32(data, 10);

    let item_id = match ctx.lobbies.get_mut(sender.lobby) {
        Some(lobby) => lobby.next_item_id(usize::from(sender.slot)),
        None => return Ok(()),
    };

    let base = DROP_TABLE[ctx.rng.gen_range(0..DROP_TABLE.len())];
    let amount: u32 = ctx.rng.gen_range(1..100);

    let version = match ctx.clients.get(id) {
        Some(c) => c.version,
        None => return Ok(()),
    };

    let mut pkt = PacketBuf::new(version, crate::packets::GAME_COMMAND0_TYPE, 0);
    pkt.u8(SUBCMD_ITEMDROP);
    pkt.u8(8); // payload words
    pkt.u8(area);
    pkt.u8(0);
    pkt.f32(x);
    pkt.f32(z);
    pkt.u32(base);
    pkt.u32(0);
    pkt.u32(0);
    pkt.u32(item_id);
    pkt.u32(if base == 0x0004_0000 { amount } else { 0 });

    let client = match ctx.clients.get_mut(id) {
        Some(client) => client,
        None => return Ok(()),
    };

    client.channel.enqueue(pkt.finish())
}

/// Canned shop inventory for the requester.
fn synthesize_shop(ctx: &mut Ctx, id: ClientId) -> NetworkResult<()> {
    let version = match ctx.clients.get(id) {
        Some(c) => c.version,
        None => return Ok(()),
    };

    let mut pkt = PacketBuf::new(version, crate::packets::GAME_COMMAND0_TYPE, 0);
    pkt.u8(SUBCMD_SHOPINV);
    pkt.u8(2);
    pkt.u16(0);
    pkt.u32(0);

    let client = match ctx.clients.get_mut(id) {
        Some(client) => client,
        None => return Ok(()),
    };

    client.channel.enqueue(pkt.finish())
}

/// Bank contents (the mirror holds none; the gate owns the real bank).
fn synthesize_bank(ctx: &mut Ctx, id: ClientId) -> NetworkResult<()> {
    let version = match ctx.clients.get(id) {
        Some(c) => c.version,
        None => return Ok(()),
    };

    let mut pkt = PacketBuf::new(version, crate::packets::GAME_COMMAND0_TYPE, 0);
    pkt.u8(SUBCMD_BANK_INV);
    pkt.u8(3);
    pkt.u16(0);
    pkt.u32(0); // item count
    pkt.u32(0); // meseta

    let client = match ctx.clients.get_mut(id) {
        Some(client) => client,
        None => return Ok(()),
    };

    client.channel.enqueue(pkt.finish())
}

/// Experience reward for a monster kill, requester only.
fn synthesize_exp(ctx: &mut Ctx, id: ClientId, data: &[u8]) -> NetworkResult<()> {
    if data.len() < 4 {
        return Err(NetworkError::Fatal(ErrorType::BadLength));
    }

    let enemy = LittleEndian::read_u16(&data[2..4]);

    let difficulty = ctx
        .clients
        .get(id)
        .and_then(|c| c.lobby)
        .and_then(|lid| ctx.lobbies.get(lid))
        .map(|l| l.difficulty)
        .unwrap_or(0);

    let exp = (u32::from(enemy % 64) + 1) * (u32::from(difficulty) + 1);

    let version = match ctx.clients.get(id) {
        Some(c) => c.version,
        None => return Ok(()),
    };

    let mut pkt = PacketBuf::new(version, crate::packets::GAME_COMMAND0_TYPE, 0);
    pkt.u8(SUBCMD_JUKEBOX); // 0xBF doubles as give-exp on Blue Burst
    pkt.u8(3);
    pkt.u16(0);
    pkt.u32(exp);
    pkt.u32(0);

    if let Some(client) = ctx.clients.get_mut(id) {
        client.disp.exp = client.disp.exp.wrapping_add(exp);
        client.channel.enqueue(pkt.finish())
    } else {
        Ok(())
    }
}
