//! # Arena Server Library
//!
//! This library provides the authoritative server implementation for the
//! capture-the-flag arena game. It owns the canonical game state, processes
//! client inputs, and broadcasts updates to keep every connected client in
//! sync.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The server runs the only copy of the game physics and state that
//! matters. Clients are dumb terminals: they send input and render whatever
//! the server last told them.
//!
//! ### Session Management
//! Handles the complete lifecycle of client connections including:
//! - Connection establishment and player id assignment
//! - Input dispatch and game-start requests
//! - Disconnection handling and cleanup
//!
//! ### State Broadcasting
//! Regularly transmits the current game state to all connected clients at
//! a fixed tick rate, and rebroadcasts the player list on join/leave.
//!
//! ## Architecture Design
//!
//! ### Thread-Per-Connection
//! The server runs one OS thread accepting connections, one OS thread
//! driving the fixed-rate simulation tick, and one OS thread per connected
//! session reading that session's socket. There is no async runtime:
//! locking discipline (see `network` module docs) keeps this simple model
//! correct without a single central event loop.
//!
//! ### TCP-Based Communication
//! Uses TCP for reliable, ordered delivery; the wire protocol is a small
//! ASCII length-prefixed framing (see [`shared`]) rather than a binary
//! serialization format, since every message kind is tiny and fixed-shape.
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! Manages individual client connections and the live registry of them:
//! - Per-connection socket and read-loop lifecycle
//! - Broadcast helpers used by `network`
//!
//! ### Game Module (`game`)
//! Contains the authoritative game state and simulation logic:
//! - Master game state with all player positions, velocities, and flags
//! - Physics simulation (acceleration, friction, wall and player collision)
//! - Flag pickup/capture rule enforcement
//!
//! ### Network Module (`network`)
//! Handles connection acceptance, the tick loop, and message dispatch:
//! - Listener accept loop with capacity and readiness polling
//! - Tick loop driving [`game::GameSimulator::update`] at a fixed rate
//! - Routing incoming messages to the simulator or back out as broadcasts
//!
//! ## Performance Characteristics
//!
//! ### Tick Rate
//! The server runs at a fixed tick rate (60Hz, via
//! [`shared::UPDATE_INTERVAL_MS`]) once a game has been started, ensuring
//! consistent simulation timing independent of per-tick wall-clock jitter.
//!
//! ### Scalability
//! Designed for small arena matches, capped at [`shared::MAX_SESSIONS`]
//! concurrent players; the acceptor backs off rather than accepting beyond
//! that cap.
//!
//! ## Security Considerations
//!
//! ### Input Validation
//! Player input is clamped to a unit-length direction vector before it
//! affects the simulation; malformed or oversized wire frames are dropped
//! rather than panicking the session thread that received them.
//!
//! ### State Authority
//! The server is the single source of truth for positions, velocities, and
//! flag ownership; no client-reported state ever overwrites it.

pub mod game;
pub mod network;
pub mod session;
