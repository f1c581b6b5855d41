//! The block reactor: one thread multiplexing five dialect listeners,
//! the wake registration and every member session. Owns the client
//! arena and the lobby table outright, so packet handling never takes a
//! lock.

use crate::client::{Client, ClientId, FLAG_GC_PROTECT, FLAG_LOGGED_IN};
use crate::handlers;
use crate::lobby::{Lobby, LobbyId, DEFAULT_LOBBY_COUNT, FIRST_GAME_LOBBY_ID};
use crate::net::channel::{Channel, SCRATCH_SIZE};
use crate::net::support::ErrorUtils;
use crate::packets;
use crate::ship::{BlockHandle, BlockMail, ShipShared};
use crate::version::Version;
use indexmap::IndexMap;
use mio::net::TcpListener;
use mio::{Events, Poll, PollOpt, Ready, Registration, Token};
use psokit::crypto::{Cipher, BB_SEED_SIZE};
use psokit::logging;
use psokit::time;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TOKEN_WAKE: Token = Token(0);
const TOKEN_LISTENER_BASE: usize = 1;
const TOKEN_CLIENT_BASE: usize = 16;

/// No traffic for this long and the session is presumed dead.
const TIMEOUT_IDLE: Duration = Duration::from_secs(90);
/// Quiet this long inbound and we probe with a ping...
const TIMEOUT_PING_IDLE: Duration = Duration::from_secs(30);
/// ...unless we ourselves sent something recently.
const TIMEOUT_PING_SENT: Duration = Duration::from_secs(10);
/// Protected sessions must log in within this window.
const TIMEOUT_PROTECTION: Duration = Duration::from_secs(60);

const POLL_TIMEOUT: Duration = Duration::from_secs(15);

/// Slot-reusing session arena. Sessions are looked up by their stable
/// id; the live set iterates in insertion order.
pub struct ClientTable {
    slots: Vec<Option<Client>>,
    free: Vec<ClientId>,
    live: indexmap::IndexSet<ClientId>,
}

impl ClientTable {
    pub fn new() -> ClientTable {
        ClientTable {
            slots: Vec::new(),
            free: Vec::new(),
            live: indexmap::IndexSet::new(),
        }
    }

    /// Reserve a slot and build the session in place.
    pub fn insert_with<F: FnOnce(ClientId) -> Client>(&mut self, build: F) -> ClientId {
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        self.slots[id] = Some(build(id));
        self.live.insert(id);
        id
    }

    #[inline]
    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.slots.get(id).and_then(|slot| slot.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.slots.get_mut(id).and_then(|slot| slot.as_mut())
    }

    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        let client = self.slots.get_mut(id)?.take();

        if client.is_some() {
            self.live.swap_remove(&id);
            self.free.push(id);
        }

        client
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Snapshot of the live ids, safe to iterate while mutating.
    pub fn live_ids(&self) -> Vec<ClientId> {
        self.live.iter().copied().collect()
    }

    pub fn find_by_guildcard(&self, gc: u32) -> Option<ClientId> {
        if gc == 0 {
            return None;
        }

        self.live
            .iter()
            .copied()
            .find(|&id| self.get(id).map(|c| c.guildcard == gc).unwrap_or(false))
    }
}

/// Default lobbies plus the on-demand game rooms.
pub struct LobbyTable {
    lobbies: IndexMap<LobbyId, Lobby>,
    next_game_id: LobbyId,
}

impl LobbyTable {
    pub fn new(block: u32, lobby_event: u8) -> LobbyTable {
        let mut lobbies = IndexMap::new();

        for id in 1..=DEFAULT_LOBBY_COUNT as LobbyId {
            lobbies.insert(id, Lobby::new_default(id, block, lobby_event));
        }

        LobbyTable {
            lobbies,
            next_game_id: FIRST_GAME_LOBBY_ID,
        }
    }

    #[inline]
    pub fn get(&self, id: LobbyId) -> Option<&Lobby> {
        self.lobbies.get(&id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: LobbyId) -> Option<&mut Lobby> {
        self.lobbies.get_mut(&id)
    }

    pub fn insert_game(&mut self, build: impl FnOnce(LobbyId) -> Lobby) -> LobbyId {
        let id = self.next_game_id;
        self.next_game_id += 1;
        self.lobbies.insert(id, build(id));
        id
    }

    pub fn destroy(&mut self, id: LobbyId) {
        self.lobbies.shift_remove(&id);
    }

    pub fn games(&self) -> impl Iterator<Item = &Lobby> {
        self.lobbies.values().filter(|l| l.is_game())
    }

    pub fn game_count(&self) -> usize {
        self.lobbies.values().filter(|l| l.is_game()).count()
    }

    pub fn default_lobby_ids(&self) -> Vec<LobbyId> {
        (1..=DEFAULT_LOBBY_COUNT as LobbyId).collect()
    }
}

/// Everything a packet handler may touch, reborrowed from the block for
/// the duration of one dispatch.
pub struct Ctx<'a> {
    pub clients: &'a mut ClientTable,
    pub lobbies: &'a mut LobbyTable,
    pub ship: &'a Arc<ShipShared>,
    pub rng: &'a mut SmallRng,
    pub block: u32,
    pub base_port: u16,
    pub log: &'a logging::Logger,
}

/// Bind the block's sockets and spin up its reactor thread.
pub fn start(
    ship: Arc<ShipShared>,
    index: u32,
) -> io::Result<(BlockHandle, thread::JoinHandle<()>)> {
    let base_port = ship.cfg.block_base_port(index);
    let log = ship.log.new(logging::o!("block" => index));

    let poll = Poll::new()?;
    let mut listeners = Vec::new();

    let dialects = [
        Version::Dcv1,
        Version::Pc,
        Version::Gc,
        Version::Ep3,
        Version::Bb,
    ];

    for (i, &version) in dialects.iter().enumerate() {
        let addr: SocketAddr = format!("{}:{}", ship.cfg.bind, base_port + version.port_offset())
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad bind address"))?;

        let listener = TcpListener::bind(&addr)?;

        poll.register(
            &listener,
            Token(TOKEN_LISTENER_BASE + i),
            Ready::readable(),
            PollOpt::level(),
        )?;

        listeners.push((listener, version));
    }

    let (registration, wake) = Registration::new2();
    poll.register(&registration, TOKEN_WAKE, Ready::readable(), PollOpt::edge())?;

    let (mail_tx, mail_rx) = crossbeam_channel::unbounded();

    let handle = BlockHandle {
        index,
        base_port,
        mail: mail_tx,
        wake,
    };

    // Sibling blocks diverge by folding the port into the seed.
    let seed = time::timestamp_secs() ^ u64::from(base_port);
    let lobby_event = ship.cfg.lobby_event;

    let thread = thread::Builder::new()
        .name(format!("block-{:02}", index))
        .spawn(move || {
            let block = Block {
                index,
                base_port,
                ship,
                poll,
                events: Events::with_capacity(1024),
                listeners,
                _wake: registration,
                mail: mail_rx,
                clients: ClientTable::new(),
                lobbies: LobbyTable::new(index, lobby_event),
                rng: SmallRng::seed_from_u64(seed),
                scratch: vec![0u8; SCRATCH_SIZE],
                run: true,
                log,
            };

            block.run();
        })?;

    Ok((handle, thread))
}

struct Block {
    index: u32,
    base_port: u16,
    ship: Arc<ShipShared>,

    poll: Poll,
    events: Events,
    listeners: Vec<(TcpListener, Version)>,
    _wake: Registration,
    mail: crossbeam_channel::Receiver<BlockMail>,

    clients: ClientTable,
    lobbies: LobbyTable,

    rng: SmallRng,
    scratch: Vec<u8>,
    run: bool,
    log: logging::Logger,
}

impl Block {
    fn run(mut self) {
        logging::info!(self.log, "up and running";
                       "context" => "block",
                       "base_port" => self.base_port);

        while self.run {
            let timeout = self.liveness_pass();

            if self
                .poll
                .poll(&mut self.events, Some(timeout))
                .is_err()
            {
                break;
            }

            let events: Vec<mio::Event> = self.events.iter().collect();

            for event in events {
                match event.token() {
                    TOKEN_WAKE => self.drain_mail(),
                    Token(t) if t >= TOKEN_LISTENER_BASE && t < TOKEN_LISTENER_BASE + self.listeners.len() => {
                        self.accept_pass(t - TOKEN_LISTENER_BASE);
                    }
                    Token(t) if t >= TOKEN_CLIENT_BASE => {
                        let id = t - TOKEN_CLIENT_BASE;

                        if event.readiness().is_readable() {
                            self.client_readable(id);
                        }

                        if event.readiness().is_writable() {
                            self.client_writable(id);
                        }
                    }
                    _ => {}
                }
            }

            // Push out anything handlers queued on sessions that did
            // not report writable this pass.
            for id in self.clients.live_ids() {
                self.client_writable(id);
            }

            self.reap();

            if !self.ship.run.load(Ordering::SeqCst) {
                self.run = false;
            }
        }

        self.shutdown();
    }

    /// Walk the live sessions checking idle/ping/protection timers.
    /// Returns the poll timeout, shortened to zero when a reap is due.
    fn liveness_pass(&mut self) -> Duration {
        let now = Instant::now();
        let mut timeout = POLL_TIMEOUT;

        for id in self.clients.live_ids() {
            let client = match self.clients.get_mut(id) {
                Some(client) => client,
                None => continue,
            };

            if client.is_disconnected() {
                timeout = Duration::from_secs(0);
                continue;
            }

            let idle = client.channel.last_ingress_elapsed(now);

            if idle >= TIMEOUT_IDLE {
                logging::info!(client.log, "ping timeout";
                               "context" => "liveness",
                               "guildcard" => client.guildcard);
                client.mark_disconnected();
                timeout = Duration::from_secs(0);
                continue;
            }

            if idle >= TIMEOUT_PING_IDLE
                && client.channel.last_egress_elapsed(now) >= TIMEOUT_PING_SENT
                && packets::send_simple(client, packets::PING_TYPE, 0).has_failed()
            {
                client.mark_disconnected();
                timeout = Duration::from_secs(0);
                continue;
            }

            if client.has_flag(FLAG_GC_PROTECT)
                && !client.has_flag(FLAG_LOGGED_IN)
                && now.duration_since(client.join_time) >= TIMEOUT_PROTECTION
            {
                client.mark_disconnected();
                timeout = Duration::from_secs(0);
            }
        }

        timeout
    }

    fn accept_pass(&mut self, listener_idx: usize) {
        loop {
            let (stream, peer) = match self.listeners[listener_idx].0.accept() {
                Ok(pair) => pair,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    logging::warn!(self.log, "accept failed";
                                   "context" => "accept", "error" => %err);
                    return;
                }
            };

            let version = self.listeners[listener_idx].1;
            self.create_connection(stream, peer, version);
        }
    }

    fn create_connection(
        &mut self,
        stream: mio::net::TcpStream,
        peer: SocketAddr,
        version: Version,
    ) {
        logging::debug!(self.log, "accepted connection";
                        "context" => "accept",
                        "peer" => %peer,
                        "version" => version.name());

        // Build the per-direction keystreams and the plaintext welcome.
        let (recv_cipher, send_cipher, welcome) = match version {
            Version::Dcv1 | Version::Dcv2 | Version::Pc => {
                let sseed: u32 = self.rng.gen();
                let cseed: u32 = self.rng.gen();
                (
                    Cipher::new_v2(cseed),
                    Cipher::new_v2(sseed),
                    packets::build_welcome(version, sseed, cseed),
                )
            }
            Version::Gc | Version::Ep3 => {
                let sseed: u32 = self.rng.gen();
                let cseed: u32 = self.rng.gen();
                (
                    Cipher::new_v3(cseed),
                    Cipher::new_v3(sseed),
                    packets::build_welcome(version, sseed, cseed),
                )
            }
            Version::Bb => {
                let mut sseed = [0u8; BB_SEED_SIZE];
                let mut cseed = [0u8; BB_SEED_SIZE];
                self.rng.fill(&mut sseed[..]);
                self.rng.fill(&mut cseed[..]);
                (
                    Cipher::new_bb(&cseed),
                    Cipher::new_bb(&sseed),
                    packets::build_bb_welcome(&sseed, &cseed),
                )
            }
        };

        let log = self.log.new(logging::o!("peer" => format!("{}", peer)));

        let id = self.clients.insert_with(|id| {
            let channel = Channel::new(stream, version, peer, recv_cipher, send_cipher, log.clone());
            Client::new(id, channel, log)
        });

        let client = self.clients.get_mut(id).expect("fresh client must exist");

        if client.channel.enqueue_plain(&welcome).has_failed() {
            client.mark_disconnected();
            return;
        }

        let register = self.poll.register(
            client.channel.stream(),
            Token(TOKEN_CLIENT_BASE + id),
            Ready::readable() | Ready::writable(),
            PollOpt::edge(),
        );

        if register.is_err() {
            client.mark_disconnected();
            return;
        }

        self.ship.client_count.fetch_add(1, Ordering::SeqCst);
    }

    fn client_readable(&mut self, id: ClientId) {
        let mut packets_in = Vec::new();

        {
            let client = match self.clients.get_mut(id) {
                Some(client) => client,
                None => return,
            };

            if client.is_disconnected() {
                return;
            }

            if client
                .channel
                .process_inbound(&mut self.scratch, &mut packets_in)
                .is_err()
            {
                client.mark_disconnected();
                return;
            }
        }

        for pkt in packets_in {
            let mut ctx = Ctx {
                clients: &mut self.clients,
                lobbies: &mut self.lobbies,
                ship: &self.ship,
                rng: &mut self.rng,
                block: self.index,
                base_port: self.base_port,
                log: &self.log,
            };

            if handlers::dispatch(&mut ctx, id, &pkt).has_failed() {
                if let Some(client) = self.clients.get_mut(id) {
                    client.mark_disconnected();
                }
                break;
            }

            if self.clients.get(id).map(|c| c.is_disconnected()).unwrap_or(true) {
                break;
            }
        }
    }

    fn client_writable(&mut self, id: ClientId) {
        if let Some(client) = self.clients.get_mut(id) {
            if !client.is_disconnected()
                && client.channel.has_egress()
                && client.channel.send_pending().has_failed()
            {
                client.mark_disconnected();
            }
        }
    }

    fn drain_mail(&mut self) {
        while let Ok(mail) = self.mail.try_recv() {
            match mail {
                BlockMail::Shutdown => {
                    self.run = false;
                }
                BlockMail::Kick { guildcard, reason } => {
                    if let Some(id) = self.clients.find_by_guildcard(guildcard) {
                        if let Some(client) = self.clients.get_mut(id) {
                            let msg = if reason.is_empty() {
                                "\tEYou have been kicked by a GM.".to_string()
                            } else {
                                format!("\tEYou have been kicked by a GM.\n\nReason:\n{}", reason)
                            };

                            let _ = packets::send_msg_box(client, &msg);
                            client.mark_disconnected();
                        }
                    }
                }
                BlockMail::Mail(mail) => {
                    let mut ctx = Ctx {
                        clients: &mut self.clients,
                        lobbies: &mut self.lobbies,
                        ship: &self.ship,
                        rng: &mut self.rng,
                        block: self.index,
                        base_port: self.base_port,
                        log: &self.log,
                    };

                    handlers::deliver_mail(&mut ctx, &mail);
                }
            }
        }
    }

    /// Remove and destroy every session flagged disconnected, clearing
    /// its lobby slot first.
    fn reap(&mut self) {
        for id in self.clients.live_ids() {
            let disconnected = self
                .clients
                .get(id)
                .map(|c| c.is_disconnected())
                .unwrap_or(false);

            if !disconnected {
                continue;
            }

            let mut ctx = Ctx {
                clients: &mut self.clients,
                lobbies: &mut self.lobbies,
                ship: &self.ship,
                rng: &mut self.rng,
                block: self.index,
                base_port: self.base_port,
                log: &self.log,
            };

            handlers::client_leaving(&mut ctx, id);

            if let Some(client) = self.clients.remove(id) {
                logging::info!(self.log, "disconnecting client";
                               "context" => "reap",
                               "guildcard" => client.guildcard,
                               "peer" => %client.channel.peer());

                let _ = self.poll.deregister(client.channel.stream());
                self.ship.client_count.fetch_sub(1, Ordering::SeqCst);

                if client.guildcard != 0 {
                    self.ship.unregister_online(client.guildcard);
                }
            }
        }
    }

    fn shutdown(mut self) {
        logging::info!(self.log, "shutting down"; "context" => "block");

        for id in self.clients.live_ids() {
            if let Some(client) = self.clients.get_mut(id) {
                client.mark_disconnected();
            }
        }

        self.reap();
    }
}
