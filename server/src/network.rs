//! # Server Network Layer
//!
//! This module owns the TCP listener, the acceptor loop, the simulation tick
//! worker, and shutdown orchestration. It is the glue between
//! [`crate::session::ClientSession`] (one per connection) and
//! [`crate::game::GameSimulator`] (the single authoritative mutator of game
//! state).
//!
//! ## Concurrency model
//!
//! Four kinds of OS thread cooperate here: the main thread (construction and
//! `stop()`), one acceptor thread, one tick thread, and one read-worker
//! thread per connected session. All coordination goes through two atomic
//! flags (`server_running`, `game_running`), the session registry's lock,
//! and the simulator's own internal locks — there is no async runtime and
//! no channel; every suspension point here is a genuine blocking syscall or
//! a short sleep.
//!
//! Lock order, when more than one is held: the session registry's lock,
//! then the simulator's state lock, then its input-queue lock. Nothing in
//! this module holds the registry lock across a socket write; see
//! [`SessionRegistry::broadcast`](crate::session::SessionRegistry::broadcast).

use crate::game::GameSimulator;
use crate::session::{ClientSession, SessionRegistry};
use log::{debug, error, info, warn};
use shared::{Message, MAX_SESSIONS, UPDATE_INTERVAL_MS};
use std::collections::BTreeMap;
use std::io;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long the acceptor waits, in total, for a pending connection before
/// re-checking its reap/capacity/shutdown conditions. Polled in small
/// increments since `std::net::TcpListener` has no native timeout-based
/// accept (no `select()`/`poll()` equivalent in std); a non-blocking
/// listener plus a short sleep loop is the idiomatic std-only substitute.
const ACCEPT_POLL_TIMEOUT: Duration = Duration::from_secs(1);
const ACCEPT_POLL_STEP: Duration = Duration::from_millis(50);
/// How long the acceptor sleeps when the session cap is reached.
const CAPACITY_BACKOFF: Duration = Duration::from_millis(200);

/// The authoritative TCP server for one lobby.
///
/// Always lives behind an `Arc` (see [`Server::new`]) so that the acceptor
/// and tick threads can hold their own strong reference back into it.
pub struct Server {
    listener: Mutex<Option<TcpListener>>,
    simulator: Arc<GameSimulator>,
    sessions: Arc<SessionRegistry>,
    session_workers: Mutex<BTreeMap<u32, JoinHandle<()>>>,
    server_running: Arc<AtomicBool>,
    game_running: Arc<AtomicBool>,
    acceptor_handle: Mutex<Option<JoinHandle<()>>>,
    tick_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listener: Mutex::new(None),
            simulator: Arc::new(GameSimulator::new()),
            sessions: Arc::new(SessionRegistry::new()),
            session_workers: Mutex::new(BTreeMap::new()),
            server_running: Arc::new(AtomicBool::new(false)),
            game_running: Arc::new(AtomicBool::new(false)),
            acceptor_handle: Mutex::new(None),
            tick_handle: Mutex::new(None),
        })
    }

    /// Binds the listener. Fatal: a failure here means the server cannot
    /// run at all, matching the reference implementation's `init()`.
    pub fn init(&self, port: u16) -> bool {
        match TcpListener::bind(("0.0.0.0", port)) {
            Ok(listener) => {
                if let Err(err) = listener.set_nonblocking(true) {
                    error!("failed to set listener non-blocking: {err}");
                    return false;
                }
                info!("Listening on 0.0.0.0:{port}");
                *self.listener.lock().unwrap() = Some(listener);
                true
            }
            Err(err) => {
                error!("bind/listen failed on port {port}: {err}");
                false
            }
        }
    }

    /// Marks the server running and starts the acceptor, either inline
    /// (`background = false`, blocks the calling thread) or on its own
    /// worker (`background = true`).
    pub fn start(self: &Arc<Self>, background: bool) {
        if self.server_running.swap(true, Ordering::SeqCst) {
            info!("Server already running");
            return;
        }
        if background {
            let server = Arc::clone(self);
            let handle = thread::spawn(move || server.acceptor_loop());
            *self.acceptor_handle.lock().unwrap() = Some(handle);
        } else {
            Arc::clone(self).acceptor_loop();
        }
    }

    /// Starts the simulation tick worker. Requires the server to already be
    /// running; rejected (returns `false`) if the game is already running.
    pub fn start_game(self: &Arc<Self>) -> bool {
        if !self.server_running.load(Ordering::SeqCst) {
            warn!("cannot start game: server is not running");
            return false;
        }
        if self.game_running.swap(true, Ordering::SeqCst) {
            info!("Game already running");
            return false;
        }
        self.simulator.start();
        let server = Arc::clone(self);
        let handle = thread::spawn(move || server.tick_loop());
        *self.tick_handle.lock().unwrap() = Some(handle);
        true
    }

    /// Idempotent shutdown: broadcasts `ServerShutdown`, clears the running
    /// flags, signals every session, joins the tick and acceptor workers,
    /// then closes and joins every session.
    pub fn stop(&self) {
        if !self.server_running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.sessions.broadcast(&Message::ServerShutdown);

        self.game_running.store(false, Ordering::SeqCst);
        self.simulator.stop();

        for session in self.sessions.snapshot() {
            session.shutdown();
        }

        // The listener is polled non-blocking, so the acceptor observes
        // `server_running` on its own within one poll cycle; there is no
        // blocking accept() to interrupt by closing the socket here.
        *self.listener.lock().unwrap() = None;

        if let Some(handle) = self.tick_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.acceptor_handle.lock().unwrap().take() {
            let _ = handle.join();
        }

        let mut workers = self.session_workers.lock().unwrap();
        for (_, handle) in std::mem::take(&mut *workers) {
            let _ = handle.join();
        }

        info!("Server has stopped cleanly");
    }

    pub fn is_running(&self) -> bool {
        self.server_running.load(Ordering::SeqCst)
    }

    /// The port the listener is bound to, or `None` before `init()` / after
    /// `stop()`. Mainly useful for tests that bind an ephemeral port (`0`)
    /// and need to learn what the OS actually assigned.
    pub fn local_port(&self) -> Option<u16> {
        self.listener
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
            .map(|addr| addr.port())
    }

    fn acceptor_loop(self: Arc<Self>) {
        loop {
            if !self.server_running.load(Ordering::SeqCst) {
                break;
            }

            self.reap_finished_sessions();

            if self.sessions.len() >= MAX_SESSIONS {
                thread::sleep(CAPACITY_BACKOFF);
                continue;
            }

            match self.wait_for_connection() {
                Some(stream) => self.accept_connection(stream),
                None => continue,
            }
        }
        info!("Stopped listening for clients");
    }

    /// Polls the non-blocking listener for up to [`ACCEPT_POLL_TIMEOUT`],
    /// returning the accepted stream or `None` on timeout / shutdown.
    fn wait_for_connection(&self) -> Option<std::net::TcpStream> {
        let deadline = Instant::now() + ACCEPT_POLL_TIMEOUT;
        while Instant::now() < deadline {
            if !self.server_running.load(Ordering::SeqCst) {
                return None;
            }
            let accepted = {
                let guard = self.listener.lock().unwrap();
                guard.as_ref().map(TcpListener::accept)
            };
            match accepted {
                Some(Ok((stream, _addr))) => return Some(stream),
                Some(Err(err)) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_STEP);
                }
                Some(Err(err)) => {
                    if self.server_running.load(Ordering::SeqCst) {
                        warn!("accept failed: {err}");
                    }
                    return None;
                }
                None => return None, // listener torn down by stop()
            }
        }
        None
    }

    fn accept_connection(self: &Arc<Self>, stream: std::net::TcpStream) {
        let player_id = self.simulator.add_player();
        let player_name = format!("Player{player_id}");
        info!("New client connected, playerId: {player_id}");

        let session = Arc::new(ClientSession::new(player_id, player_name, stream));
        self.sessions.insert(Arc::clone(&session));

        let server = Arc::clone(self);
        let worker_session = Arc::clone(&session);
        let handle = thread::spawn(move || server.run_session(worker_session));
        self.session_workers
            .lock()
            .unwrap()
            .insert(player_id, handle);

        if let Err(err) = session.send(&Message::PlayerJoined(player_id)) {
            warn!("failed to notify player {player_id} of join: {err}");
        }
        if self.simulator.player_count() == 1 {
            if let Err(err) = session.send(&Message::MarkClientHost) {
                warn!("failed to mark player {player_id} as host: {err}");
            }
        }

        self.broadcast_player_list();
    }

    /// Runs one session's read-decode-dispatch loop to completion, then
    /// tears it down. Cannot join its own `JoinHandle` (a thread can't join
    /// itself); the acceptor's `reap_finished_sessions` does that instead.
    fn run_session(self: Arc<Self>, session: Arc<ClientSession>) {
        let player_id = session.player_id;
        let server_running = Arc::clone(&self.server_running);
        let dispatcher = Arc::clone(&self);
        session.run(&server_running, move |message| {
            dispatcher.dispatch(player_id, message)
        });

        debug!("session worker exiting for player {player_id}");
        self.sessions.remove(player_id);
        self.simulator.remove_player(player_id);
        if self.server_running.load(Ordering::SeqCst) {
            self.broadcast_player_list();
        }
    }

    /// Routes one decoded client->server message. Unrecognized or
    /// server->client-only tags are logged and dropped, matching the
    /// reference dispatcher's `default:` arm.
    fn dispatch(self: &Arc<Self>, player_id: u32, message: Message) {
        match message {
            Message::RequestPlayerList => self.broadcast_player_list(),
            Message::PlayerInput {
                player_id: wire_id,
                input_x,
                input_y,
            } => self.simulator.queue_player_input(wire_id, input_x, input_y),
            Message::RequestStartGame => {
                self.start_game();
            }
            other => debug!("unhandled message from player {player_id}: {other:?}"),
        }
    }

    /// Reaps session workers whose read loop has already returned. The
    /// registry entry is removed by the session itself on exit; this only
    /// joins (trivially, since the thread is done) and drops the handle.
    fn reap_finished_sessions(&self) {
        let mut workers = self.session_workers.lock().unwrap();
        let finished: Vec<u32> = workers
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in finished {
            if let Some(handle) = workers.remove(&id) {
                if let Err(err) = handle.join() {
                    error!("session worker for player {id} panicked: {err:?}");
                }
            }
        }
    }

    fn tick_loop(self: Arc<Self>) {
        let mut previous_time = Instant::now();
        while self.game_running.load(Ordering::SeqCst) && self.server_running.load(Ordering::SeqCst) {
            let now = Instant::now();
            let elapsed = now.duration_since(previous_time).as_millis() as u32;
            if elapsed as u64 >= UPDATE_INTERVAL_MS {
                self.simulator.update(elapsed);
                self.broadcast_game_state();
                previous_time = now;
            } else {
                thread::sleep(Duration::from_millis(1));
            }
        }
        info!("Game loop ended");
    }

    fn broadcast_player_list(&self) {
        if !self.server_running.load(Ordering::SeqCst) {
            return;
        }
        let names: Vec<String> = self
            .simulator
            .get_game_state()
            .players
            .values()
            .map(|p| p.name.clone())
            .collect();
        self.sessions.broadcast(&Message::PlayerList(names));
    }

    fn broadcast_game_state(&self) {
        if !self.server_running.load(Ordering::SeqCst) {
            return;
        }
        let state = self.simulator.get_game_state();
        self.sessions.broadcast(&Message::GameState(state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{decode_message, try_extract_message};
    use std::io::{Read, Write};
    use std::net::TcpStream;

    fn connect_to(server: &Arc<Server>, port: u16) -> TcpStream {
        for _ in 0..100 {
            if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)) {
                return stream;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("could not connect to test server");
    }

    fn read_one_message(stream: &mut TcpStream) -> Message {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            if let Some(payload) = try_extract_message(&mut buffer) {
                return decode_message(&payload).unwrap();
            }
            let n = stream.read(&mut chunk).expect("read failed");
            assert!(n > 0, "peer closed before a full message arrived");
            buffer.extend_from_slice(&chunk[..n]);
        }
    }

    #[test]
    fn accept_assigns_id_and_marks_first_client_host() {
        let server = Server::new();
        assert!(server.init(0));
        let port = server.local_port().unwrap();
        server.start(true);

        let mut client = connect_to(&server, port);
        assert_eq!(read_one_message(&mut client), Message::PlayerJoined(1));
        assert_eq!(read_one_message(&mut client), Message::MarkClientHost);
        assert_eq!(
            read_one_message(&mut client),
            Message::PlayerList(vec!["Player1".to_string()])
        );

        server.stop();
    }

    #[test]
    fn second_client_is_not_marked_host() {
        let server = Server::new();
        assert!(server.init(0));
        let port = server.local_port().unwrap();
        server.start(true);

        let mut first = connect_to(&server, port);
        read_one_message(&mut first); // PlayerJoined(1)
        read_one_message(&mut first); // MarkClientHost
        read_one_message(&mut first); // PlayerList

        let mut second = connect_to(&server, port);
        assert_eq!(read_one_message(&mut second), Message::PlayerJoined(2));
        // No MarkClientHost for the second client: next frame is the list.
        assert_eq!(
            read_one_message(&mut second),
            Message::PlayerList(vec!["Player1".to_string(), "Player2".to_string()])
        );
        // The first client also observes the refreshed roster.
        assert_eq!(
            read_one_message(&mut first),
            Message::PlayerList(vec!["Player1".to_string(), "Player2".to_string()])
        );

        server.stop();
    }

    #[test]
    fn stop_is_idempotent_and_broadcasts_shutdown() {
        let server = Server::new();
        assert!(server.init(0));
        let port = server.local_port().unwrap();
        server.start(true);

        let mut client = connect_to(&server, port);
        read_one_message(&mut client); // PlayerJoined
        read_one_message(&mut client); // MarkClientHost
        read_one_message(&mut client); // PlayerList

        server.stop();
        assert_eq!(read_one_message(&mut client), Message::ServerShutdown);

        server.stop(); // idempotent, must not hang or panic
    }

    #[test]
    fn disconnect_removes_player_and_rebroadcasts_list() {
        let server = Server::new();
        assert!(server.init(0));
        let port = server.local_port().unwrap();
        server.start(true);

        let mut first = connect_to(&server, port);
        read_one_message(&mut first);
        read_one_message(&mut first);
        read_one_message(&mut first);

        let second = connect_to(&server, port);
        read_one_message(&mut first); // refreshed list after second joins

        drop(second);

        assert_eq!(
            read_one_message(&mut first),
            Message::PlayerList(vec!["Player1".to_string()])
        );

        server.stop();
    }
}
