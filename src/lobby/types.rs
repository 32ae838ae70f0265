use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ContractId, LobbyId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LobbyStatus {
    Waiting,
    Starting,
    InGame,
    Closed,
}

impl LobbyStatus {
    /// A user may sit in at most one non-terminal lobby.
    pub fn is_terminal(self) -> bool {
        matches!(self, LobbyStatus::Closed)
    }

    pub fn accepts_players(self) -> bool {
        matches!(self, LobbyStatus::Waiting)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyPlayer {
    pub user_id: UserId,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
}

/// A waiting room for one contract. Capacity is bounded by the contract's
/// `max_players`; a full lobby leaves `WAITING` immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lobby {
    pub lobby_id: LobbyId,
    pub contract_id: ContractId,
    pub status: LobbyStatus,
    pub players: Vec<LobbyPlayer>,
    pub created_at: DateTime<Utc>,
}

impl Lobby {
    pub fn contains(&self, user_id: &UserId) -> bool {
        self.players.iter().any(|p| &p.user_id == user_id)
    }

    /// 1-based seat position in join order.
    pub fn position_of(&self, user_id: &UserId) -> Option<usize> {
        self.players
            .iter()
            .position(|p| &p.user_id == user_id)
            .map(|idx| idx + 1)
    }
}

/// Returned to a joining player.
#[derive(Debug, Clone)]
pub struct JoinLobbyOutput {
    pub lobby: Lobby,
    pub position: usize,
    pub is_ready: bool,
}
