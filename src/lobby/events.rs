use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, UserId};

use super::types::LobbyPlayer;

/// Countdown announced when a lobby fills and hands off to the game
/// backend.
pub const LOBBY_START_COUNTDOWN_SECS: u32 = 5;

/// Typed events fanned out to lobby subscribers. Heartbeats are not
/// events; they travel as SSE comment frames and never reach this enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum LobbyEvent {
    PlayerJoined { player: LobbyPlayer },
    PlayerLeft { player_id: UserId },
    LobbyStarting { countdown: u32 },
    GameStarted { session_id: SessionId },
    LobbyClosed { reason: String },
}

impl LobbyEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LobbyEvent::PlayerJoined { .. } => "player_joined",
            LobbyEvent::PlayerLeft { .. } => "player_left",
            LobbyEvent::LobbyStarting { .. } => "lobby_starting",
            LobbyEvent::GameStarted { .. } => "game_started",
            LobbyEvent::LobbyClosed { .. } => "lobby_closed",
        }
    }
}
