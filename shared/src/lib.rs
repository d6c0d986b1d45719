//! # Shared CTF Arena Library
//!
//! This crate holds the data structures, physics constants, and wire protocol
//! shared by the `server` and `client` binaries. It defines the single source
//! of truth for what a `PlayerState`/`GameState` looks like and how the two
//! sides of the TCP connection encode messages to and from bytes.
//!
//! ## Wire protocol
//!
//! Every message on the wire is framed as `LEN:PAYLOAD`, where `LEN` is the
//! ASCII decimal byte length of `PAYLOAD` and `PAYLOAD`'s first byte is a tag
//! identifying one of the nine [`Message`] kinds. [`frame`] produces the
//! envelope; [`try_extract_message`] consumes it back out of a per-connection
//! receive buffer, one frame at a time, tolerating arbitrary fragmentation.
//!
//! ## Simulation constants
//!
//! The arena is a fixed 800x600 rectangle; players are circles of radius
//! [`PLAYER_RADIUS`]. All physics constants used by the server's tick step
//! live here so both crates (and their tests) agree on one set of numbers.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

/// Red team identifier. Assigned to players with an even id.
pub const TEAM_RED: u8 = 0;
/// Blue team identifier. Assigned to players with an odd id.
pub const TEAM_BLUE: u8 = 1;

/// Radius of a player's collision circle, in arena pixels.
pub const PLAYER_RADIUS: f32 = 15.0;
/// Acceleration applied per unit of (normalized) input, pixels/second^2.
pub const PLAYER_ACCELERATION: f32 = 60.0;
/// Hard cap on player speed, pixels/second.
pub const PLAYER_MAX_SPEED: f32 = 1000.0;
/// Per-second velocity decay factor applied during physics integration.
pub const PLAYER_FRICTION: f32 = 0.98;
/// Restitution coefficient used when two players collide.
pub const PLAYER_RESTITUTION: f32 = 0.2;
/// Restitution coefficient used when a player bounces off an arena wall.
pub const WALL_RESTITUTION: f32 = 0.15;
/// Width of the arena, in pixels.
pub const ARENA_WIDTH: f32 = 800.0;
/// Height of the arena, in pixels.
pub const ARENA_HEIGHT: f32 = 600.0;
/// Resting point of the red flag when nobody carries it.
pub const RED_FLAG_HOME: (f32, f32) = (100.0, 300.0);
/// Resting point of the blue flag when nobody carries it.
pub const BLUE_FLAG_HOME: (f32, f32) = (700.0, 300.0);

/// Nominal simulation tick period in milliseconds (~60Hz).
pub const UPDATE_INTERVAL_MS: u64 = 1000 / 60;
/// Hard cap on concurrently connected sessions, enforced by the acceptor.
pub const MAX_SESSIONS: usize = 8;
/// Default TCP port the server listens on.
pub const DEFAULT_PORT: u16 = 12345;

/// Returns the team a newly connected player is assigned to, by id parity.
pub fn team_for_player_id(id: u32) -> u8 {
    (id % 2) as u8
}

/// Returns the arena spawn point for a team's home side.
///
/// `y` is always the vertical midline; `x` is 100px in from the team's wall.
pub fn team_spawn(team: u8) -> (f32, f32) {
    let x = if team == TEAM_RED {
        100.0
    } else {
        ARENA_WIDTH - 100.0
    };
    (x, ARENA_HEIGHT / 2.0)
}

/// One connected player's authoritative state.
///
/// Mutation of a `PlayerState` is exclusively the game simulator's job;
/// sessions only read ids and enqueue [`PlayerInput`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub id: u32,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub velocity_x: f32,
    pub velocity_y: f32,
    pub team: u8,
    /// Milliseconds until this player may act again; 0 means active.
    pub respawn_timer: u32,
    pub connected: bool,
    pub has_flag: bool,
}

impl PlayerState {
    /// Creates a player at rest at its team's home spawn.
    pub fn new(id: u32, name: String, team: u8) -> Self {
        let (x, y) = team_spawn(team);
        Self {
            id,
            name,
            x,
            y,
            velocity_x: 0.0,
            velocity_y: 0.0,
            team,
            respawn_timer: 0,
            connected: true,
            has_flag: false,
        }
    }

    /// True while this player is respawning and may not act or collide.
    pub fn is_respawning(&self) -> bool {
        self.respawn_timer > 0
    }
}

/// The authoritative snapshot of one lobby's world state.
///
/// Holds one player map keyed by id plus the score and flag-carrier fields.
/// Player iteration order is ascending id (`BTreeMap`), which this codebase
/// fixes as the canonical order for flag pickup/capture and pairwise
/// collision resolution within a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct GameState {
    pub lobby_id: u32,
    pub map_id: u8,
    pub red_score: u8,
    pub blue_score: u8,
    pub players: BTreeMap<u32, PlayerState>,
    /// Carrier id for the red flag, or 0 if it's resting at home.
    pub red_flag: u32,
    /// Carrier id for the blue flag, or 0 if it's resting at home.
    pub blue_flag: u32,
}

impl GameState {
    pub fn new() -> Self {
        Self {
            lobby_id: 1,
            map_id: 0,
            red_score: 0,
            blue_score: 0,
            players: BTreeMap::new(),
            red_flag: 0,
            blue_flag: 0,
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

/// A single queued movement input from a player, awaiting the next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerInput {
    pub player_id: u32,
    pub input_x: f32,
    pub input_y: f32,
}

// --- Wire protocol -------------------------------------------------------

const TAG_PLAYER_LIST: u8 = b'1';
const TAG_GAME_STATE: u8 = b'2';
const TAG_PLAYER_INPUT: u8 = b'3';
const TAG_REQUEST_PLAYER_LIST: u8 = b'4';
const TAG_PLAYER_JOINED: u8 = b'5';
const TAG_PLAYER_LEFT: u8 = b'6';
const TAG_MARK_CLIENT_HOST: u8 = b'7';
const TAG_REQUEST_START_GAME: u8 = b'8';
const TAG_SERVER_SHUTDOWN: u8 = b'9';

const MARK_CLIENT_HOST_BODY: &str = "CLIENT_IS_HOST";
const REQUEST_START_GAME_BODY: &str = "START_GAME_SERVER";

/// A decoded application message, typed over the nine wire tags in the
/// protocol table. Callers never match on a raw tag byte; [`decode_message`]
/// and [`encode_message`] are the only places that know the tag values.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// S->C: comma-separated player names.
    PlayerList(Vec<String>),
    /// S->C: a full game state snapshot.
    GameState(GameState),
    /// C->S: one player's queued movement input.
    PlayerInput {
        player_id: u32,
        input_x: f32,
        input_y: f32,
    },
    /// C->S: ask for a fresh `PlayerList`.
    RequestPlayerList,
    /// S->C: the id assigned to the connection that receives this.
    PlayerJoined(u32),
    /// S->C: reserved, currently never constructed.
    PlayerLeft,
    /// S->C: marks the receiving client as the lobby host.
    MarkClientHost,
    /// C->S: ask the server to start the simulation tick loop.
    RequestStartGame,
    /// S->C: the server is shutting down; the client should disconnect.
    ServerShutdown,
}

/// A malformed or unrecognized decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// The payload was empty; there is no tag byte to read.
    EmptyPayload,
    /// The first byte did not match any known [`Message`] tag.
    UnknownTag(u8),
    /// The tag matched but the body did not parse (bad UTF-8, bad number, ...).
    Malformed(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::EmptyPayload => write!(f, "empty message payload"),
            ProtocolError::UnknownTag(tag) => write!(f, "unknown message tag {:#04x}", tag),
            ProtocolError::Malformed(why) => write!(f, "malformed message body: {why}"),
        }
    }
}

impl Error for ProtocolError {}

/// Encodes a [`Message`] into its tag-prefixed wire payload (unframed).
pub fn encode_message(message: &Message) -> Vec<u8> {
    match message {
        Message::PlayerList(names) => {
            let mut body = vec![TAG_PLAYER_LIST];
            body.extend_from_slice(names.join(",").as_bytes());
            body
        }
        Message::GameState(state) => {
            let mut body = vec![TAG_GAME_STATE];
            body.extend_from_slice(encode_game_state(state).as_bytes());
            body
        }
        Message::PlayerInput {
            player_id,
            input_x,
            input_y,
        } => {
            let mut body = vec![TAG_PLAYER_INPUT];
            body.extend_from_slice(format!("{player_id},{input_x},{input_y}").as_bytes());
            body
        }
        Message::RequestPlayerList => vec![TAG_REQUEST_PLAYER_LIST],
        Message::PlayerJoined(id) => {
            let mut body = vec![TAG_PLAYER_JOINED];
            body.extend_from_slice(id.to_string().as_bytes());
            body
        }
        Message::PlayerLeft => vec![TAG_PLAYER_LEFT],
        Message::MarkClientHost => {
            let mut body = vec![TAG_MARK_CLIENT_HOST];
            body.extend_from_slice(MARK_CLIENT_HOST_BODY.as_bytes());
            body
        }
        Message::RequestStartGame => {
            let mut body = vec![TAG_REQUEST_START_GAME];
            body.extend_from_slice(REQUEST_START_GAME_BODY.as_bytes());
            body
        }
        Message::ServerShutdown => vec![TAG_SERVER_SHUTDOWN],
    }
}

/// Decodes a tag-prefixed wire payload (as extracted by [`try_extract_message`])
/// into a typed [`Message`].
pub fn decode_message(payload: &[u8]) -> Result<Message, ProtocolError> {
    let (&tag, body) = payload.split_first().ok_or(ProtocolError::EmptyPayload)?;
    let body = std::str::from_utf8(body).map_err(|_| ProtocolError::Malformed("not utf-8"))?;

    match tag {
        TAG_PLAYER_LIST => {
            let names = if body.is_empty() {
                Vec::new()
            } else {
                body.split(',').map(str::to_string).collect()
            };
            Ok(Message::PlayerList(names))
        }
        TAG_GAME_STATE => decode_game_state(body)
            .map(Message::GameState)
            .ok_or(ProtocolError::Malformed("game state")),
        TAG_PLAYER_INPUT => {
            let mut parts = body.splitn(3, ',');
            let player_id = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or(ProtocolError::Malformed("player input id"))?;
            let input_x = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or(ProtocolError::Malformed("player input x"))?;
            let input_y = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or(ProtocolError::Malformed("player input y"))?;
            Ok(Message::PlayerInput {
                player_id,
                input_x,
                input_y,
            })
        }
        TAG_REQUEST_PLAYER_LIST => Ok(Message::RequestPlayerList),
        TAG_PLAYER_JOINED => body
            .parse()
            .map(Message::PlayerJoined)
            .map_err(|_| ProtocolError::Malformed("player joined id")),
        TAG_PLAYER_LEFT => Ok(Message::PlayerLeft),
        TAG_MARK_CLIENT_HOST => Ok(Message::MarkClientHost),
        TAG_REQUEST_START_GAME => Ok(Message::RequestStartGame),
        TAG_SERVER_SHUTDOWN => Ok(Message::ServerShutdown),
        other => Err(ProtocolError::UnknownTag(other)),
    }
}

/// Serializes a [`GameState`] to its pipe/comma/semicolon-delimited text body
/// (without the leading tag byte): `lobbyId|mapId|redScore|blueScore|redFlag|blueFlag|p1;p2;...`
/// with each player as `id,name,x,y,vx,vy,team,connected;`.
fn encode_game_state(state: &GameState) -> String {
    let mut out = format!(
        "{}|{}|{}|{}|{}|{}|",
        state.lobby_id, state.map_id, state.red_score, state.blue_score, state.red_flag, state.blue_flag
    );
    for player in state.players.values() {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{};",
            player.id,
            player.name,
            player.x,
            player.y,
            player.velocity_x,
            player.velocity_y,
            player.team,
            player.connected
        ));
    }
    out
}

fn decode_game_state(body: &str) -> Option<GameState> {
    let mut fields = body.splitn(7, '|');
    let lobby_id = fields.next()?.parse().ok()?;
    let map_id = fields.next()?.parse().ok()?;
    let red_score = fields.next()?.parse().ok()?;
    let blue_score = fields.next()?.parse().ok()?;
    let red_flag = fields.next()?.parse().ok()?;
    let blue_flag = fields.next()?.parse().ok()?;
    let player_list = fields.next().unwrap_or("");

    let mut players = BTreeMap::new();
    for entry in player_list.split(';') {
        if entry.is_empty() {
            continue;
        }
        let mut parts = entry.splitn(8, ',');
        let id: u32 = parts.next()?.parse().ok()?;
        let name = parts.next()?.to_string();
        let x = parts.next()?.parse().ok()?;
        let y = parts.next()?.parse().ok()?;
        let velocity_x = parts.next()?.parse().ok()?;
        let velocity_y = parts.next()?.parse().ok()?;
        let team = parts.next()?.parse().ok()?;
        let connected = parts.next()?.parse().ok()?;
        players.insert(
            id,
            PlayerState {
                id,
                name,
                x,
                y,
                velocity_x,
                velocity_y,
                team,
                respawn_timer: 0,
                connected,
                has_flag: false,
            },
        );
    }

    Some(GameState {
        lobby_id,
        map_id,
        red_score,
        blue_score,
        players,
        red_flag,
        blue_flag,
    })
}

/// Wraps a payload in the `LEN:PAYLOAD` framing envelope.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = format!("{}:", payload.len()).into_bytes();
    out.extend_from_slice(payload);
    out
}

/// Attempts to pull one complete framed payload out of `buffer`.
///
/// On success, the consumed bytes (the `LEN:` prefix and the payload) are
/// drained from the front of `buffer` and the payload is returned. If the
/// buffer doesn't yet hold a complete frame, returns `None` and leaves
/// `buffer` untouched. If the decimal length prefix is corrupt, the entire
/// buffer is discarded (per the protocol's corrupt-frame recovery policy)
/// and `None` is returned.
///
/// Callers should call this in a loop after every append, since a single
/// append can complete more than one frame.
pub fn try_extract_message(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let colon = buffer.iter().position(|&b| b == b':')?;

    let len_str = std::str::from_utf8(&buffer[..colon]).ok();
    let len = len_str.and_then(|s| s.parse::<usize>().ok());

    let len = match len {
        Some(len) => len,
        None => {
            buffer.clear();
            return None;
        }
    };

    let header_len = colon + 1;
    if buffer.len() < header_len + len {
        return None;
    }

    let payload = buffer[header_len..header_len + len].to_vec();
    buffer.drain(..header_len + len);
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn team_for_player_id_alternates() {
        assert_eq!(team_for_player_id(1), TEAM_BLUE);
        assert_eq!(team_for_player_id(2), TEAM_RED);
    }

    #[test]
    fn team_spawn_points() {
        assert_eq!(team_spawn(TEAM_RED), (100.0, 300.0));
        assert_eq!(team_spawn(TEAM_BLUE), (700.0, 300.0));
    }

    #[test]
    fn frame_then_extract_round_trips() {
        let mut buffer = frame(b"HELLO");
        buffer.extend(frame(b"HI"));
        let first = try_extract_message(&mut buffer).unwrap();
        let second = try_extract_message(&mut buffer).unwrap();
        assert_eq!(first, b"HELLO");
        assert_eq!(second, b"HI");
        assert!(buffer.is_empty());
        assert!(try_extract_message(&mut buffer).is_none());
    }

    #[test]
    fn extract_one_byte_at_a_time_yields_both_frames_in_order() {
        let stream = b"5:HELLO3:HI";
        let mut buffer = Vec::new();
        let mut messages = Vec::new();
        for byte in stream {
            buffer.push(*byte);
            while let Some(msg) = try_extract_message(&mut buffer) {
                messages.push(msg);
            }
        }
        assert_eq!(messages, vec![b"HELLO".to_vec(), b"HI".to_vec()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn corrupt_length_prefix_discards_buffer() {
        let mut buffer = b"abc:garbage".to_vec();
        assert!(try_extract_message(&mut buffer).is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn missing_colon_waits_for_more_bytes() {
        let mut buffer = b"hello world".to_vec();
        assert!(try_extract_message(&mut buffer).is_none());
        assert_eq!(buffer, b"hello world");
    }

    #[test]
    fn player_input_round_trips_through_encode_decode() {
        let message = Message::PlayerInput {
            player_id: 7,
            input_x: 0.5,
            input_y: -1.0,
        };
        let encoded = encode_message(&message);
        let decoded = decode_message(&encoded).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn player_joined_round_trips() {
        let message = Message::PlayerJoined(42);
        let encoded = encode_message(&message);
        assert_eq!(decode_message(&encoded).unwrap(), message);
    }

    #[test]
    fn player_list_round_trips() {
        let message = Message::PlayerList(vec!["Player1".to_string(), "Player2".to_string()]);
        let encoded = encode_message(&message);
        assert_eq!(decode_message(&encoded).unwrap(), message);
    }

    #[test]
    fn player_list_empty_round_trips() {
        let message = Message::PlayerList(vec![]);
        let encoded = encode_message(&message);
        assert_eq!(decode_message(&encoded).unwrap(), message);
    }

    #[test]
    fn request_player_list_round_trips() {
        let encoded = encode_message(&Message::RequestPlayerList);
        assert_eq!(decode_message(&encoded).unwrap(), Message::RequestPlayerList);
    }

    #[test]
    fn mark_client_host_round_trips() {
        let encoded = encode_message(&Message::MarkClientHost);
        assert_eq!(decode_message(&encoded).unwrap(), Message::MarkClientHost);
    }

    #[test]
    fn request_start_game_round_trips() {
        let encoded = encode_message(&Message::RequestStartGame);
        assert_eq!(decode_message(&encoded).unwrap(), Message::RequestStartGame);
    }

    #[test]
    fn server_shutdown_round_trips() {
        let encoded = encode_message(&Message::ServerShutdown);
        assert_eq!(decode_message(&encoded).unwrap(), Message::ServerShutdown);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = decode_message(b"\xff").unwrap_err();
        assert_eq!(err, ProtocolError::UnknownTag(0xff));
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert_eq!(decode_message(b""), Err(ProtocolError::EmptyPayload));
    }

    #[test]
    fn game_state_round_trips_modulo_float_formatting() {
        let mut state = GameState::new();
        let mut p1 = PlayerState::new(1, "Player1".to_string(), TEAM_RED);
        p1.x = 123.5;
        p1.y = 64.25;
        p1.velocity_x = -10.0;
        state.players.insert(1, p1);
        state.red_score = 3;
        state.blue_flag = 1;

        let encoded = encode_message(&Message::GameState(state.clone()));
        let decoded = decode_message(&encoded).unwrap();

        match decoded {
            Message::GameState(decoded_state) => {
                assert_eq!(decoded_state.lobby_id, state.lobby_id);
                assert_eq!(decoded_state.red_score, state.red_score);
                assert_eq!(decoded_state.blue_flag, state.blue_flag);
                let p = &decoded_state.players[&1];
                assert_approx_eq!(p.x, 123.5, 1e-4);
                assert_approx_eq!(p.y, 64.25, 1e-4);
                assert_approx_eq!(p.velocity_x, -10.0, 1e-4);
                assert_eq!(p.name, "Player1");
            }
            _ => panic!("expected GameState variant"),
        }
    }

    #[test]
    fn game_state_trailing_semicolon_after_every_player() {
        let mut state = GameState::new();
        state
            .players
            .insert(1, PlayerState::new(1, "Player1".to_string(), TEAM_RED));
        state
            .players
            .insert(2, PlayerState::new(2, "Player2".to_string(), TEAM_BLUE));

        let encoded = encode_game_state(&state);
        assert!(encoded.ends_with(';'));
        assert_eq!(encoded.matches(';').count(), 2);
    }
}
