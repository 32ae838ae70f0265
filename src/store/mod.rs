use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::catalog::{Contract, Game};
use crate::error::HubError;
use crate::ids::{ContractId, EntryId, ExternalAuthId, GameId, SessionId, UserId};
use crate::ledger::{LedgerEntry, NewLedgerEntry};
use crate::session::{GameSession, PlayerOutcome, SessionStatus};
use crate::user::{BalanceState, NewUser, User};

pub mod in_memory;

pub use in_memory::InMemoryHub;

/// Append-only ledger reads. Appends happen exclusively through a
/// [`HubTxn`] so they commit together with the balance mutations they
/// describe.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Rows for one user, `created_at` descending with `entry_id` as the
    /// stable tiebreak, plus the total row count for pagination.
    async fn history(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<LedgerEntry>, usize), HubError>;

    /// All rows referencing a session, `created_at` ascending.
    async fn by_session(&self, session_id: &SessionId) -> Result<Vec<LedgerEntry>, HubError>;
}

/// Per-user balance reads and the conditional update used outside engine
/// transactions.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_external_auth_id(
        &self,
        external_auth_id: &ExternalAuthId,
    ) -> Result<Option<User>, HubError>;

    async fn find_by_id(&self, user_id: &UserId) -> Result<Option<User>, HubError>;

    async fn find_by_ids(&self, user_ids: &[UserId]) -> Result<Vec<User>, HubError>;

    /// Conditional update: fails with `ConcurrencyConflict` unless the
    /// current row matches `expected` exactly. The only sanctioned balance
    /// mutation outside a [`HubTxn`].
    async fn compare_and_update(
        &self,
        user_id: &UserId,
        expected: BalanceState,
        new: BalanceState,
    ) -> Result<User, HubError>;
}

/// Session reads used outside engine transactions (status endpoints and
/// the expiry sweeper).
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find(&self, session_id: &SessionId) -> Result<Option<GameSession>, HubError>;

    /// Sessions still in `{PENDING, ACTIVE}` whose `expires_at` is past.
    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<GameSession>, HubError>;
}

/// Immutable-after-creation game and contract records.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_game(&self, game_id: &GameId) -> Result<Option<Game>, HubError>;

    async fn find_contract(&self, contract_id: &ContractId) -> Result<Option<Contract>, HubError>;

    async fn insert_game(&self, game: Game) -> Result<(), HubError>;

    async fn insert_contract(&self, contract: Contract) -> Result<(), HubError>;
}

/// Transactional seam for the contract engine. Everything performed
/// through one txn commits atomically or not at all; the backend
/// serializes transactions against each other.
#[async_trait]
pub trait HubStorage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn HubTxn>, HubError>;
}

#[async_trait]
pub trait HubTxn: Send {
    async fn load_contract(
        &mut self,
        contract_id: &ContractId,
    ) -> Result<Option<Contract>, HubError>;

    async fn load_user_by_external(
        &mut self,
        external_auth_id: &ExternalAuthId,
    ) -> Result<Option<User>, HubError>;

    async fn load_user(&mut self, user_id: &UserId) -> Result<Option<User>, HubError>;

    /// Provision the account for a new external subject, enforcing the
    /// case-insensitive display-name reservation.
    async fn find_or_create_user(&mut self, new: NewUser) -> Result<User, HubError>;

    /// Unconditional balance write participating in this transaction. The
    /// caller already holds the per-user serialization this txn provides;
    /// invariants are still checked on every write.
    async fn update_balance(
        &mut self,
        user_id: &UserId,
        new: BalanceState,
    ) -> Result<(), HubError>;

    async fn append_ledger(&mut self, entry: NewLedgerEntry) -> Result<EntryId, HubError>;

    async fn insert_session(&mut self, session: GameSession) -> Result<(), HubError>;

    async fn load_session(
        &mut self,
        session_id: &SessionId,
    ) -> Result<Option<GameSession>, HubError>;

    /// Move a session to a terminal status, recording player outcomes.
    /// Rejects any write against a session that is already terminal.
    async fn finalize_session(
        &mut self,
        session_id: &SessionId,
        status: SessionStatus,
        outcomes: &[PlayerOutcome],
        settled_at: Option<DateTime<Utc>>,
    ) -> Result<(), HubError>;

    async fn commit(self: Box<Self>) -> Result<(), HubError>;

    async fn rollback(self: Box<Self>);
}
