//! Per-connection state: one [`ClientSession`] per joined player, and the
//! [`SessionRegistry`] the network layer uses to find and broadcast to them.
//!
//! A session never touches [`GameSimulator`](crate::game::GameSimulator)
//! directly; the network layer reads incoming [`shared::Message`]s off of
//! it and decides what to do with them, keeping the dispatch policy in one
//! place (`network.rs`).

use log::debug;
use shared::{decode_message, encode_message, frame, try_extract_message, Message};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// One connected player's socket plus the flag that tells its read loop
/// when to stop.
pub struct ClientSession {
    pub player_id: u32,
    pub player_name: String,
    stream: TcpStream,
    running: AtomicBool,
}

impl ClientSession {
    pub fn new(player_id: u32, player_name: String, stream: TcpStream) -> Self {
        Self {
            player_id,
            player_name,
            stream,
            running: AtomicBool::new(true),
        }
    }

    /// Sends one framed message. Safe to call from any thread concurrently
    /// with [`ClientSession::run`]'s reads: a `TcpStream` reads and writes
    /// independently, and writing through `&TcpStream` needs no lock.
    pub fn send(&self, message: &Message) -> std::io::Result<()> {
        let bytes = frame(&encode_message(message));
        (&self.stream).write_all(&bytes)
    }

    /// Blocks reading frames off the socket, decoding and handing each
    /// [`Message`] to `dispatch`, until the peer closes the connection, a
    /// read error occurs, or either `self` or `server_running` is cleared.
    ///
    /// Runs on the session's own worker thread; returns when the connection
    /// is done, at which point the caller is responsible for removing this
    /// session from the registry and notifying the game simulator.
    pub fn run(&self, server_running: &AtomicBool, mut dispatch: impl FnMut(Message)) {
        let mut receive_buffer = Vec::new();
        let mut read_chunk = [0u8; 1024];

        while self.running.load(Ordering::Relaxed) && server_running.load(Ordering::Relaxed) {
            let read = (&self.stream).read(&mut read_chunk);
            match read {
                Ok(0) => break,
                Ok(n) => {
                    receive_buffer.extend_from_slice(&read_chunk[..n]);
                    while let Some(payload) = try_extract_message(&mut receive_buffer) {
                        match decode_message(&payload) {
                            Ok(message) => dispatch(message),
                            Err(err) => debug!(
                                "player {} sent an unrecognized message: {err}",
                                self.player_id
                            ),
                        }
                    }
                }
                Err(err) => {
                    debug!("player {} read error: {err}", self.player_id);
                    break;
                }
            }
        }
    }

    /// Stops this session's read loop and closes the socket in both
    /// directions. Idempotent.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// The set of currently connected sessions, keyed by player id.
///
/// Guards the same lock the rest of this codebase calls `clientsMutex`:
/// broadcasts take a snapshot under this lock and release it before any
/// socket write, so a slow or stuck peer can't stall the registry.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<BTreeMap<u32, Arc<ClientSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, session: Arc<ClientSession>) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.player_id, session);
    }

    pub fn remove(&self, player_id: u32) -> Option<Arc<ClientSession>> {
        self.sessions.lock().unwrap().remove(&player_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Snapshots the currently connected sessions in ascending id order.
    /// Callers must not hold this snapshot across a blocking socket write
    /// while expecting the lock to still be held; it isn't.
    pub fn snapshot(&self) -> Vec<Arc<ClientSession>> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }

    /// Broadcasts `message` to every connected session, logging (but not
    /// propagating) individual send failures.
    pub fn broadcast(&self, message: &Message) {
        for session in self.snapshot() {
            if let Err(err) = session.send(message) {
                debug!("failed to notify player {}: {err}", session.player_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn registry_reuses_ids_after_removal() {
        let registry = SessionRegistry::new();
        let (_keep_alive, server_side) = loopback_pair();
        let session = Arc::new(ClientSession::new(1, "a".into(), server_side));
        registry.insert(session.clone());
        assert_eq!(registry.len(), 1);

        registry.remove(1);
        assert_eq!(registry.len(), 0);

        let (_keep_alive2, server_side2) = loopback_pair();
        let reused = Arc::new(ClientSession::new(1, "b".into(), server_side2));
        registry.insert(reused);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot()[0].player_name, "b");
    }

    #[test]
    fn snapshot_is_ascending_by_id() {
        let registry = SessionRegistry::new();
        let (_k1, s1) = loopback_pair();
        let (_k2, s2) = loopback_pair();
        registry.insert(Arc::new(ClientSession::new(5, "five".into(), s1)));
        registry.insert(Arc::new(ClientSession::new(2, "two".into(), s2)));

        let ids: Vec<u32> = registry.snapshot().iter().map(|s| s.player_id).collect();
        assert_eq!(ids, vec![2, 5]);
    }

    #[test]
    fn run_stops_when_peer_closes() {
        let (client, server_side) = loopback_pair();
        let session = ClientSession::new(1, "solo".into(), server_side);
        let running = AtomicBool::new(true);
        drop(client);

        let mut seen = Vec::new();
        session.run(&running, |msg| seen.push(msg));
        assert!(seen.is_empty());
    }
}
