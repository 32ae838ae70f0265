use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::ids::{EntryId, SessionId, UserId};

/// Kind of a balance-changing event. LOCK/UNLOCK move funds between the
/// available and locked portions without touching the total; the rest move
/// the total itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Lock,
    Unlock,
    Win,
    Lose,
    Fee,
    Deposit,
    Withdraw,
}

impl EntryType {
    /// Effect on the owning account's total balance: +1, -1 or 0 per
    /// unit of `amount`. FEE rows are only ever booked against the
    /// reserved platform account, which they credit.
    pub fn balance_effect(self) -> i8 {
        match self {
            EntryType::Lock | EntryType::Unlock => 0,
            EntryType::Win | EntryType::Deposit | EntryType::Fee => 1,
            EntryType::Lose | EntryType::Withdraw => -1,
        }
    }
}

/// Immutable row in the append-only money ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub user_id: UserId,
    pub entry_type: EntryType,
    pub amount: Amount,
    /// The user's total balance immediately after this entry.
    pub balance_after: Amount,
    pub session_id: Option<SessionId>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Row data for an append; the store assigns `entry_id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub user_id: UserId,
    pub entry_type: EntryType,
    pub amount: Amount,
    pub balance_after: Amount,
    pub session_id: Option<SessionId>,
    pub description: Option<String>,
}

impl NewLedgerEntry {
    pub fn for_session(
        user_id: UserId,
        entry_type: EntryType,
        amount: Amount,
        balance_after: Amount,
        session_id: SessionId,
    ) -> Self {
        Self {
            user_id,
            entry_type,
            amount,
            balance_after,
            session_id: Some(session_id),
            description: None,
        }
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
