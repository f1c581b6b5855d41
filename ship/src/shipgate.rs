//! Message-send surface of the shipgate link. The gate itself is an
//! external collaborator; the ship only ever hands typed messages to
//! the link thread and never blocks the reactors on it.

use crossbeam_channel::{unbounded, Receiver, Sender};
use psokit::logging;
use std::thread;

#[derive(Debug, Clone)]
pub enum ShipgateMessage {
    BlockLogin {
        guildcard: u32,
        name: String,
        block: u32,
    },
    LobbyChange {
        guildcard: u32,
        lobby_id: u32,
        lobby_name: String,
    },
    ForwardSearch {
        searcher: u32,
        target: u32,
    },
    BanCheck {
        guildcard: u32,
    },
    Kick {
        guildcard: u32,
        reason: String,
    },
    CharacterBackup {
        guildcard: u32,
        name: String,
        data: Vec<u8>,
    },
    SaveOptions {
        guildcard: u32,
        data: Vec<u8>,
    },
    Shutdown,
}

/// Handle cloned into every block. `send` is a channel hand-off; the
/// link thread owns the actual connection lifecycle.
#[derive(Clone)]
pub struct Shipgate {
    tx: Sender<ShipgateMessage>,
}

impl Shipgate {
    pub fn start(addr: String, log: logging::Logger) -> (Shipgate, thread::JoinHandle<()>) {
        let (tx, rx) = unbounded();

        let handle = thread::Builder::new()
            .name("shipgate".to_string())
            .spawn(move || link_thread(addr, rx, log))
            .expect("Error spawning shipgate thread");

        (Shipgate { tx }, handle)
    }

    /// Queue a message for the link. Never blocks the caller.
    #[inline]
    pub fn send(&self, msg: ShipgateMessage) {
        let _ = self.tx.send(msg);
    }
}

fn link_thread(addr: String, rx: Receiver<ShipgateMessage>, log: logging::Logger) {
    logging::info!(log, "shipgate link up"; "context" => "shipgate", "addr" => %addr);

    while let Ok(msg) = rx.recv() {
        match msg {
            ShipgateMessage::Shutdown => break,
            other => {
                logging::trace!(log, "shipgate message queued";
                                "context" => "shipgate",
                                "message" => ?other);
            }
        }
    }

    logging::info!(log, "shipgate link down"; "context" => "shipgate");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_stops_the_link_thread() {
        let log = logging::Logger::root(logging::Discard, logging::o!());
        let (gate, handle) = Shipgate::start("127.0.0.1:0".to_string(), log);

        gate.send(ShipgateMessage::BanCheck { guildcard: 77 });
        gate.send(ShipgateMessage::Shutdown);

        handle.join().unwrap();
    }
}
