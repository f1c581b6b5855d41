//! Process-wide ship state: the block set, the online-player directory,
//! the read-mostly stores (quest catalog, GM roster, bans, limits) and
//! the peer-ship directory.

use crate::block;
use crate::config::{load_ban_list, load_gm_roster, BanRecord, PeerShipConfig, ShipConfig};
use crate::packets::guild::SimpleMail;
use crate::quests::QuestCatalog;
use crate::shipgate::{Shipgate, ShipgateMessage};
use crate::version::Version;
use hashbrown::HashMap;
use mio::SetReadiness;
use parking_lot::RwLock;
use psokit::logging;
use psokit::time;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Item-legitimacy policy handle. The policy tables themselves are an
/// external collaborator; only the check surface exists here.
pub struct LimitsTable {
    pub name: String,
}

impl LimitsTable {
    pub fn check_legit(&self, _inventory: &crate::player::Inventory) -> bool {
        true
    }
}

/// Where a player currently is, ship-wide. Maintained at login, lobby
/// change and disconnect; read by guild-card search and simple mail.
#[derive(Debug, Clone)]
pub struct PlayerLocation {
    pub guildcard: u32,
    pub name: String,
    pub block: u32,
    pub lobby_id: u32,
    pub lobby_name: String,
    pub version: Version,
}

/// Commands a block's reactor drains from its mailbox after a wake.
pub enum BlockMail {
    Mail(SimpleMail),
    Kick { guildcard: u32, reason: String },
    Shutdown,
}

/// The ship's handle on one running block.
pub struct BlockHandle {
    pub index: u32,
    pub base_port: u16,
    pub mail: crossbeam_channel::Sender<BlockMail>,
    pub wake: SetReadiness,
}

impl BlockHandle {
    /// Post a command and wake the reactor out of its poll.
    pub fn post(&self, mail: BlockMail) {
        let _ = self.mail.send(mail);
        let _ = self.wake.set_readiness(mio::Ready::readable());
    }
}

pub struct ShipShared {
    pub cfg: ShipConfig,
    pub log: logging::Logger,

    pub quests: RwLock<Arc<QuestCatalog>>,
    pub gms: RwLock<HashMap<u32, u8>>,
    pub bans: RwLock<HashMap<u32, BanRecord>>,
    pub limits: RwLock<LimitsTable>,

    pub online: RwLock<HashMap<u32, PlayerLocation>>,
    pub peers: RwLock<Vec<PeerShipConfig>>,
    pub blocks: RwLock<Vec<BlockHandle>>,

    pub client_count: AtomicUsize,
    pub game_event: AtomicU8,
    pub lobby_event: AtomicU8,
    pub run: AtomicBool,

    pub shipgate: Shipgate,
}

impl ShipShared {
    pub fn new(cfg: ShipConfig, log: logging::Logger, shipgate: Shipgate) -> ShipShared {
        let game_event = AtomicU8::new(cfg.event);
        let lobby_event = AtomicU8::new(cfg.lobby_event);
        let peers = RwLock::new(cfg.ships.clone());
        let limits = RwLock::new(LimitsTable {
            name: cfg.limits_name.clone(),
        });

        ShipShared {
            cfg,
            log,
            quests: RwLock::new(Arc::new(QuestCatalog::empty())),
            gms: RwLock::new(HashMap::new()),
            bans: RwLock::new(HashMap::new()),
            limits,
            online: RwLock::new(HashMap::new()),
            peers,
            blocks: RwLock::new(Vec::new()),
            client_count: AtomicUsize::new(0),
            game_event,
            lobby_event,
            run: AtomicBool::new(true),
            shipgate,
        }
    }

    /// Current quest catalog snapshot.
    pub fn quest_catalog(&self) -> Arc<QuestCatalog> {
        Arc::clone(&self.quests.read())
    }

    /// Swap in a freshly parsed catalog; on failure the old one stays.
    pub fn reload_quests(&self) -> Result<usize, String> {
        let catalog = QuestCatalog::load(
            Path::new(&self.cfg.quest_file),
            Path::new(&self.cfg.quest_dir),
        )?;

        let count = catalog.categories.len();
        *self.quests.write() = Arc::new(catalog);
        Ok(count)
    }

    pub fn reload_gms(&self) -> Result<usize, String> {
        let roster = load_gm_roster(Path::new(&self.cfg.gm_file))?;
        let count = roster.len();
        *self.gms.write() = roster;
        Ok(count)
    }

    pub fn reload_bans(&self) -> Result<usize, String> {
        let bans = load_ban_list(Path::new(&self.cfg.ban_file))?;
        let count = bans.len();
        *self.bans.write() = bans;
        Ok(count)
    }

    pub fn privilege_for(&self, gc: u32) -> u8 {
        self.gms.read().get(&gc).copied().unwrap_or(0)
    }

    /// Active ban for a guildcard, if any. Expired bans are ignored.
    pub fn ban_for(&self, gc: u32) -> Option<BanRecord> {
        let bans = self.bans.read();
        let ban = bans.get(&gc)?;

        if ban.until != 0 && ban.until < time::timestamp_secs() {
            return None;
        }

        Some(ban.clone())
    }

    pub fn register_online(&self, loc: PlayerLocation) {
        self.online.write().insert(loc.guildcard, loc);
    }

    pub fn update_location(&self, gc: u32, lobby_id: u32, lobby_name: String) {
        if let Some(loc) = self.online.write().get_mut(&gc) {
            loc.lobby_id = lobby_id;
            loc.lobby_name = lobby_name;
        }
    }

    pub fn unregister_online(&self, gc: u32) {
        self.online.write().remove(&gc);
    }

    pub fn find_online(&self, gc: u32) -> Option<PlayerLocation> {
        self.online.read().get(&gc).cloned()
    }

    /// Deliver mail (or a kick) to whichever block hosts the player.
    pub fn post_to_block(&self, block: u32, mail: BlockMail) {
        let blocks = self.blocks.read();

        if let Some(handle) = blocks.iter().find(|b| b.index == block) {
            handle.post(mail);
        }
    }

    pub fn base_port_of_block(&self, block: u32) -> u16 {
        self.cfg.block_base_port(block)
    }
}

pub struct Ship {
    pub shared: Arc<ShipShared>,
    block_threads: Vec<JoinHandle<()>>,
    shipgate_thread: JoinHandle<()>,
}

impl Ship {
    /// Bring the whole ship up: shipgate link, stores, then one reactor
    /// thread per block.
    pub fn start(cfg: ShipConfig, log: logging::Logger) -> std::io::Result<Ship> {
        let (shipgate, shipgate_thread) =
            Shipgate::start(cfg.shipgate_addr.clone(), log.new(logging::o!()));

        let shared = Arc::new(ShipShared::new(cfg, log, shipgate));

        if !shared.cfg.quest_file.is_empty() {
            match shared.reload_quests() {
                Ok(count) => {
                    logging::info!(shared.log, "quest catalog loaded";
                                   "context" => "startup", "categories" => count);
                }
                Err(err) => {
                    logging::warn!(shared.log, "quest catalog failed to load";
                                   "context" => "startup", "error" => %err);
                }
            }
        }

        if !shared.cfg.gm_file.is_empty() {
            if let Err(err) = shared.reload_gms() {
                logging::warn!(shared.log, "gm roster failed to load";
                               "context" => "startup", "error" => %err);
            }
        }

        if !shared.cfg.ban_file.is_empty() {
            if let Err(err) = shared.reload_bans() {
                logging::warn!(shared.log, "ban list failed to load";
                               "context" => "startup", "error" => %err);
            }
        }

        let mut block_threads = Vec::new();

        for index in 1..=shared.cfg.blocks {
            let (handle, thread) = block::start(Arc::clone(&shared), index)?;
            shared.blocks.write().push(handle);
            block_threads.push(thread);
        }

        logging::info!(shared.log, "ship up";
                       "context" => "startup",
                       "name" => %shared.cfg.name,
                       "blocks" => shared.cfg.blocks);

        Ok(Ship {
            shared,
            block_threads,
            shipgate_thread,
        })
    }

    /// Graceful stop: drop the run flag, poke every reactor awake and
    /// join the lot.
    pub fn shutdown(self) {
        self.shared.run.store(false, Ordering::SeqCst);

        for handle in self.shared.blocks.read().iter() {
            handle.post(BlockMail::Shutdown);
        }

        for thread in self.block_threads {
            let _ = thread.join();
        }

        self.shared.shipgate.send(ShipgateMessage::Shutdown);
        let _ = self.shipgate_thread.join();

        logging::info!(self.shared.log, "ship down"; "context" => "shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> ShipShared {
        let cfg: ShipConfig = serdeconv::from_toml_str(
            r#"
name = "Aurora"
base_port = 12000
"#,
        )
        .unwrap();

        let log = logging::Logger::root(logging::Discard, logging::o!());
        let (gate, thread) = Shipgate::start(String::new(), log.clone());
        gate.send(ShipgateMessage::Shutdown);
        let _ = thread.join();

        ShipShared::new(cfg, log, gate)
    }

    #[test]
    fn online_directory_tracks_moves() {
        let ship = shared();

        ship.register_online(PlayerLocation {
            guildcard: 42,
            name: "Rei".to_string(),
            block: 1,
            lobby_id: 1,
            lobby_name: "BLOCK01-01".to_string(),
            version: Version::Gc,
        });

        ship.update_location(42, 0x21, "\tERaid".to_string());

        let loc = ship.find_online(42).unwrap();
        assert_eq!(loc.lobby_id, 0x21);
        assert_eq!(loc.lobby_name, "\tERaid");

        ship.unregister_online(42);
        assert!(ship.find_online(42).is_none());
    }

    #[test]
    fn expired_bans_do_not_fire() {
        let ship = shared();

        ship.bans.write().insert(
            9,
            BanRecord {
                guildcard: 9,
                until: 1,
                reason: "old".to_string(),
            },
        );
        ship.bans.write().insert(
            10,
            BanRecord {
                guildcard: 10,
                until: 0,
                reason: "permanent".to_string(),
            },
        );

        assert!(ship.ban_for(9).is_none());
        assert!(ship.ban_for(10).is_some());
        assert!(ship.ban_for(11).is_none());
    }
}
