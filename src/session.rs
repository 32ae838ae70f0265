use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::error::HubError;
use crate::ids::{ContractId, SessionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    Active,
    Settled,
    Cancelled,
    Expired,
}

impl SessionStatus {
    /// Terminal sessions are frozen; exactly one terminal transition ever
    /// commits for a session.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Settled | SessionStatus::Cancelled | SessionStatus::Expired
        )
    }

    /// Guard for Settle/Cancel/Expire. Distinguishes the idempotency
    /// conflict (`AlreadySettled`) from dead-end states (`InvalidState`).
    pub fn ensure_open(self) -> Result<(), HubError> {
        match self {
            SessionStatus::Pending | SessionStatus::Active => Ok(()),
            SessionStatus::Settled => Err(HubError::AlreadySettled),
            SessionStatus::Cancelled => Err(HubError::InvalidState("session is cancelled")),
            SessionStatus::Expired => Err(HubError::InvalidState("session is expired")),
        }
    }
}

/// Per-player escrow row. `amount_locked` is recorded at lock time and
/// never re-derived from the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPlayer {
    pub user_id: UserId,
    pub amount_locked: Amount,
    pub is_winner: bool,
    pub win_amount: Amount,
}

impl SessionPlayer {
    pub fn locked(user_id: UserId, amount_locked: Amount) -> Self {
        Self {
            user_id,
            amount_locked,
            is_winner: false,
            win_amount: Amount::zero(),
        }
    }
}

/// An escrow execution: funds locked at creation, resolved by exactly one
/// of settle, cancel or expire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSession {
    pub session_id: SessionId,
    pub contract_id: ContractId,
    pub status: SessionStatus,
    pub total_pot: Amount,
    pub players: Vec<SessionPlayer>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl GameSession {
    pub fn player(&self, user_id: &UserId) -> Option<&SessionPlayer> {
        self.players.iter().find(|p| &p.user_id == user_id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Outcome rows applied when a session settles.
#[derive(Debug, Clone)]
pub struct PlayerOutcome {
    pub user_id: UserId,
    pub is_winner: bool,
    pub win_amount: Amount,
}
