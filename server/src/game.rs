//! Authoritative game simulation: player bookkeeping, the per-tick physics
//! step, and capture-the-flag scoring.
//!
//! `GameSimulator` is the sole mutator of [`GameState`]; everything else
//! (sessions, the network layer) only reads snapshots via [`GameSimulator::get_game_state`]
//! or enqueues input via [`GameSimulator::queue_player_input`]. Internally it
//! holds two locks, `state` and `input_queue`, matching the lock order and
//! responsibilities this codebase documents for the rest of the server.

use log::info;
use shared::{
    team_for_player_id, team_spawn, GameState, PlayerInput, PlayerState, ARENA_HEIGHT,
    ARENA_WIDTH, BLUE_FLAG_HOME, PLAYER_ACCELERATION, PLAYER_FRICTION, PLAYER_MAX_SPEED,
    PLAYER_RADIUS, PLAYER_RESTITUTION, RED_FLAG_HOME, TEAM_BLUE, TEAM_RED, WALL_RESTITUTION,
};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Owns the authoritative [`GameState`] plus the pending input queue, and
/// implements the fixed-step tick algorithm that advances both.
pub struct GameSimulator {
    state: Mutex<GameState>,
    input_queue: Mutex<VecDeque<PlayerInput>>,
}

impl GameSimulator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GameState::new()),
            input_queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Lifecycle marker; logging only, called once per `start_game()`.
    pub fn start(&self) {
        let lobby_id = self.state.lock().unwrap().lobby_id;
        info!("Simulator started for lobby {lobby_id}");
    }

    /// Lifecycle marker; logging only. Idempotent, matches `stop()`.
    pub fn stop(&self) {
        let lobby_id = self.state.lock().unwrap().lobby_id;
        info!("Simulator stopped for lobby {lobby_id}");
    }

    /// Allocates the smallest unused positive id, assigns a team by id
    /// parity, spawns the player at that team's home side, and returns the
    /// new id. The player's name is derived from the id (`PlayerN`); the
    /// protocol has no join-time field for a client-supplied name.
    pub fn add_player(&self) -> u32 {
        let mut state = self.state.lock().unwrap();
        let id = smallest_unused_id(&state);
        let team = team_for_player_id(id);
        let name = format!("Player{id}");
        let player = PlayerState::new(id, name.clone(), team);
        info!("{name} (id: {id}) added to team {team}");
        state.players.insert(id, player);
        id
    }

    /// Removes a player. If this empties the lobby, resets scores and flag
    /// carriers.
    pub fn remove_player(&self, id: u32) -> bool {
        let mut state = self.state.lock().unwrap();
        let removed = state.players.remove(&id).is_some();
        if removed {
            info!("Player {id} removed from game");
            if state.players.is_empty() {
                state.red_score = 0;
                state.blue_score = 0;
                state.red_flag = 0;
                state.blue_flag = 0;
            } else {
                if state.red_flag == id {
                    state.red_flag = 0;
                }
                if state.blue_flag == id {
                    state.blue_flag = 0;
                }
            }
        }
        removed
    }

    /// Reassigns a player's team in place. Does not reposition the player;
    /// exposed but never invoked by the protocol dispatcher (see open question
    /// in the design notes).
    pub fn set_player_team(&self, id: u32, team: u8) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.players.get_mut(&id) {
            Some(player) => {
                player.team = team;
                true
            }
            None => false,
        }
    }

    /// Enqueues a raw input; no validation here. A stale id (player already
    /// removed) is silently dropped when the queue is drained.
    pub fn queue_player_input(&self, player_id: u32, input_x: f32, input_y: f32) {
        self.input_queue.lock().unwrap().push_back(PlayerInput {
            player_id,
            input_x,
            input_y,
        });
    }

    /// Returns a value-copy snapshot of the current state.
    pub fn get_game_state(&self) -> GameState {
        self.state.lock().unwrap().clone()
    }

    /// Returns the current player count (used to detect "first player joined").
    pub fn player_count(&self) -> usize {
        self.state.lock().unwrap().players.len()
    }

    /// The tick step: respawn countdown, input drain, physics integration,
    /// wall collisions, flag pickup/capture, then pairwise player collisions
    /// with the pop rule. `delta_ms` is the measured elapsed time since the
    /// previous tick.
    pub fn update(&self, delta_ms: u32) {
        let dt = delta_ms as f32 / 1000.0;

        {
            let mut state = self.state.lock().unwrap();
            for player in state.players.values_mut() {
                player.respawn_timer = player.respawn_timer.saturating_sub(delta_ms);
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            let mut queue = self.input_queue.lock().unwrap();
            while let Some(input) = queue.pop_front() {
                let Some(player) = state.players.get_mut(&input.player_id) else {
                    continue;
                };
                if player.is_respawning() {
                    continue;
                }
                apply_input(player, input.input_x, input.input_y, dt);
            }
        }

        let mut state = self.state.lock().unwrap();
        for player in state.players.values_mut() {
            if !player.connected {
                continue;
            }
            integrate_physics(player, dt);
            resolve_wall_collision(player);
        }

        resolve_flag_interactions(&mut state);
        resolve_player_collisions(&mut state);
    }
}

impl Default for GameSimulator {
    fn default() -> Self {
        Self::new()
    }
}

fn smallest_unused_id(state: &GameState) -> u32 {
    let mut candidate = 1;
    for &id in state.players.keys() {
        if id == candidate {
            candidate += 1;
        } else if id > candidate {
            break;
        }
    }
    candidate
}

fn apply_input(player: &mut PlayerState, mut input_x: f32, mut input_y: f32, dt: f32) {
    let length = (input_x * input_x + input_y * input_y).sqrt();
    if length > 1.0 {
        input_x /= length;
        input_y /= length;
    }

    player.velocity_x += input_x * PLAYER_ACCELERATION * dt;
    player.velocity_y += input_y * PLAYER_ACCELERATION * dt;

    let speed = (player.velocity_x.powi(2) + player.velocity_y.powi(2)).sqrt();
    if speed > PLAYER_MAX_SPEED {
        player.velocity_x = player.velocity_x / speed * PLAYER_MAX_SPEED;
        player.velocity_y = player.velocity_y / speed * PLAYER_MAX_SPEED;
    }
}

fn integrate_physics(player: &mut PlayerState, dt: f32) {
    let decay = PLAYER_FRICTION.powf(dt);
    player.velocity_x *= decay;
    player.velocity_y *= decay;

    player.x += player.velocity_x * dt;
    player.y += player.velocity_y * dt;

    if player.velocity_x.abs() < 0.01 {
        player.velocity_x = 0.0;
    }
    if player.velocity_y.abs() < 0.01 {
        player.velocity_y = 0.0;
    }
}

fn resolve_wall_collision(player: &mut PlayerState) {
    if player.x < PLAYER_RADIUS {
        player.x = PLAYER_RADIUS;
        if player.velocity_x < 0.0 {
            player.velocity_x = -player.velocity_x * WALL_RESTITUTION;
        }
    } else if player.x > ARENA_WIDTH - PLAYER_RADIUS {
        player.x = ARENA_WIDTH - PLAYER_RADIUS;
        if player.velocity_x > 0.0 {
            player.velocity_x = -player.velocity_x * WALL_RESTITUTION;
        }
    }

    if player.y < PLAYER_RADIUS {
        player.y = PLAYER_RADIUS;
        if player.velocity_y < 0.0 {
            player.velocity_y = -player.velocity_y * WALL_RESTITUTION;
        }
    } else if player.y > ARENA_HEIGHT - PLAYER_RADIUS {
        player.y = ARENA_HEIGHT - PLAYER_RADIUS;
        if player.velocity_y > 0.0 {
            player.velocity_y = -player.velocity_y * WALL_RESTITUTION;
        }
    }
}

fn distance(x1: f32, y1: f32, x2: f32, y2: f32) -> f32 {
    ((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt()
}

/// Returns a player to their team's home spawn with flag released and
/// velocity zeroed. Used for both flag capture and the pop rule.
fn respawn_at_home(player: &mut PlayerState) {
    player.has_flag = false;
    player.velocity_x = 0.0;
    player.velocity_y = 0.0;
    let (x, y) = team_spawn(player.team);
    player.x = x;
    player.y = y;
}

/// Flag pickup and capture, iterated in ascending id order so that two
/// simultaneous pickups in the same tick resolve deterministically.
fn resolve_flag_interactions(state: &mut GameState) {
    let ids: Vec<u32> = state.players.keys().copied().collect();
    for id in ids {
        let (x, y, team, is_respawning, has_flag) = {
            let p = &state.players[&id];
            (p.x, p.y, p.team, p.is_respawning(), p.has_flag)
        };
        if is_respawning {
            continue;
        }

        if team == TEAM_RED && state.blue_flag == 0 && distance(x, y, BLUE_FLAG_HOME.0, BLUE_FLAG_HOME.1) < 2.0 * PLAYER_RADIUS {
            state.blue_flag = id;
            state.players.get_mut(&id).unwrap().has_flag = true;
        } else if team == TEAM_BLUE && state.red_flag == 0 && distance(x, y, RED_FLAG_HOME.0, RED_FLAG_HOME.1) < 2.0 * PLAYER_RADIUS {
            state.red_flag = id;
            state.players.get_mut(&id).unwrap().has_flag = true;
        }

        if has_flag && team == TEAM_RED && state.red_flag == 0 && distance(x, y, RED_FLAG_HOME.0, RED_FLAG_HOME.1) < 2.0 * PLAYER_RADIUS {
            state.players.get_mut(&id).unwrap().has_flag = false;
            state.blue_flag = 0;
            state.red_score = state.red_score.saturating_add(1);
        } else if has_flag && team == TEAM_BLUE && state.blue_flag == 0 && distance(x, y, BLUE_FLAG_HOME.0, BLUE_FLAG_HOME.1) < 2.0 * PLAYER_RADIUS {
            state.players.get_mut(&id).unwrap().has_flag = false;
            state.red_flag = 0;
            state.blue_score = state.blue_score.saturating_add(1);
        }
    }
}

/// Pairwise circular collision resolution plus the flag-pop rule, iterated
/// over ascending-id pairs `i < j`. Colliding pairs are separated and given
/// an elastic impulse; a pair where one side carries the opposing team's
/// flag pops it back home.
fn resolve_player_collisions(state: &mut GameState) {
    let ids: Vec<u32> = state.players.keys().copied().collect();

    for i in 0..ids.len() {
        if state.players[&ids[i]].is_respawning() {
            continue;
        }
        for j in (i + 1)..ids.len() {
            let (id1, id2) = (ids[i], ids[j]);
            if state.players[&id2].is_respawning() {
                continue;
            }

            let mut p1 = state.players[&id1].clone();
            let mut p2 = state.players[&id2].clone();

            let dx = p1.x - p2.x;
            let dy = p1.y - p2.y;
            let dist = (dx * dx + dy * dy).sqrt();
            let collided = dist < 2.0 * PLAYER_RADIUS && dist > 0.0;

            if collided {
                let nx = dx / dist;
                let ny = dy / dist;
                let overlap = 2.0 * PLAYER_RADIUS - dist;
                let separation = overlap / 2.0;

                p1.x += nx * separation;
                p1.y += ny * separation;
                p2.x -= nx * separation;
                p2.y -= ny * separation;

                let rel_vx = p1.velocity_x - p2.velocity_x;
                let rel_vy = p1.velocity_y - p2.velocity_y;
                let vel_along_normal = rel_vx * nx + rel_vy * ny;

                if vel_along_normal <= 0.0 {
                    let impulse = -(1.0 + PLAYER_RESTITUTION) * vel_along_normal / 2.0;
                    let impulse_x = nx * impulse;
                    let impulse_y = ny * impulse;
                    p1.velocity_x += impulse_x;
                    p1.velocity_y += impulse_y;
                    p2.velocity_x -= impulse_x;
                    p2.velocity_y -= impulse_y;
                }

                if p1.has_flag && p1.team != p2.team {
                    respawn_at_home(&mut p1);
                    if p1.team == TEAM_RED {
                        state.blue_flag = 0;
                    } else {
                        state.red_flag = 0;
                    }
                    info!("{} was popped", p1.name);
                }
                if p2.has_flag && p1.team != p2.team {
                    respawn_at_home(&mut p2);
                    if p2.team == TEAM_RED {
                        state.blue_flag = 0;
                    } else {
                        state.red_flag = 0;
                    }
                    info!("{} was popped", p2.name);
                }
            }

            state.players.insert(id1, p1);
            state.players.insert(id2, p2);
        }
    }
}
