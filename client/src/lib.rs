//! # Arena Client Library
//!
//! This library provides the thin client-side network shell for the
//! capture-the-flag arena game. It has no rendering, no input capture, and
//! no local simulation: the server is authoritative for all game state, so
//! the client's entire job is to frame and send [`shared::Message`]s and
//! forward what it receives back to the caller.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Connects to a server, runs a background receive loop that decodes framed
//! messages off the socket, and hands them to caller-supplied callbacks.
//! Intercepts `PLAYER_JOINED` (to remember the connection's assigned player
//! id) and `SERVER_SHUTDOWN` (to disconnect locally) before anything else
//! sees them.

pub mod network;
