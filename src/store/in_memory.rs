use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::catalog::{Contract, Game};
use crate::error::HubError;
use crate::ids::{ContractId, EntryId, ExternalAuthId, GameId, SessionId, UserId};
use crate::ledger::{LedgerEntry, NewLedgerEntry};
use crate::session::{GameSession, PlayerOutcome, SessionStatus};
use crate::user::{BalanceState, NewUser, User};

use super::{CatalogStore, HubStorage, HubTxn, LedgerStore, SessionStore, UserStore};

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, User>,
    users_by_external: HashMap<ExternalAuthId, UserId>,
    display_names: HashMap<String, UserId>,
    games: HashMap<GameId, Game>,
    game_names: HashMap<String, GameId>,
    contracts: HashMap<ContractId, Contract>,
    sessions: HashMap<SessionId, GameSession>,
    ledger: Vec<LedgerEntry>,
    entry_seq: u64,
}

/// In-memory backend implementing every store capability plus the
/// transactional seam. Writes inside a transaction are buffered and
/// applied under one write lock at commit; transactions are serialized by
/// an exclusive lock, which also covers `compare_and_update`.
pub struct InMemoryHub {
    inner: Arc<RwLock<Inner>>,
    txn_lock: Arc<Mutex<()>>,
}

impl InMemoryHub {
    pub fn new() -> Self {
        let mut inner = Inner::default();
        // The reserved platform account exists from genesis so FEE rows
        // always have a balance row to book against.
        let platform = User {
            user_id: UserId::platform(),
            external_auth_id: ExternalAuthId::from("sub_platform"),
            display_name: "platform".to_owned(),
            balance: crate::amount::Amount::zero(),
            locked_balance: crate::amount::Amount::zero(),
            created_at: Utc::now(),
        };
        inner
            .display_names
            .insert(platform.display_name.clone(), platform.user_id.clone());
        inner
            .users_by_external
            .insert(platform.external_auth_id.clone(), platform.user_id.clone());
        inner.users.insert(platform.user_id.clone(), platform);
        Self {
            inner: Arc::new(RwLock::new(inner)),
            txn_lock: Arc::new(Mutex::new(())),
        }
    }
}

impl Default for InMemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryHub {
    async fn history(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<LedgerEntry>, usize), HubError> {
        let inner = self.inner.read();
        let mut rows: Vec<LedgerEntry> = inner
            .ledger
            .iter()
            .filter(|entry| &entry.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.entry_id.cmp(&a.entry_id))
        });
        let total = rows.len();
        let page = rows.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    async fn by_session(&self, session_id: &SessionId) -> Result<Vec<LedgerEntry>, HubError> {
        let inner = self.inner.read();
        let mut rows: Vec<LedgerEntry> = inner
            .ledger
            .iter()
            .filter(|entry| entry.session_id.as_ref() == Some(session_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.entry_id.cmp(&b.entry_id))
        });
        Ok(rows)
    }
}

#[async_trait]
impl UserStore for InMemoryHub {
    async fn find_by_external_auth_id(
        &self,
        external_auth_id: &ExternalAuthId,
    ) -> Result<Option<User>, HubError> {
        let inner = self.inner.read();
        Ok(inner
            .users_by_external
            .get(external_auth_id)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn find_by_id(&self, user_id: &UserId) -> Result<Option<User>, HubError> {
        Ok(self.inner.read().users.get(user_id).cloned())
    }

    async fn find_by_ids(&self, user_ids: &[UserId]) -> Result<Vec<User>, HubError> {
        let inner = self.inner.read();
        Ok(user_ids
            .iter()
            .filter_map(|id| inner.users.get(id))
            .cloned()
            .collect())
    }

    async fn compare_and_update(
        &self,
        user_id: &UserId,
        expected: BalanceState,
        new: BalanceState,
    ) -> Result<User, HubError> {
        // Serialize against engine transactions as well as other CAS calls.
        let _guard = self.txn_lock.lock().await;
        new.check_invariants()?;
        let mut inner = self.inner.write();
        let user = inner
            .users
            .get_mut(user_id)
            .ok_or(HubError::NotFound("user"))?;
        if BalanceState::of(user) != expected {
            return Err(HubError::ConcurrencyConflict);
        }
        user.balance = new.balance;
        user.locked_balance = new.locked;
        Ok(user.clone())
    }
}

#[async_trait]
impl SessionStore for InMemoryHub {
    async fn find(&self, session_id: &SessionId) -> Result<Option<GameSession>, HubError> {
        Ok(self.inner.read().sessions.get(session_id).cloned())
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<GameSession>, HubError> {
        let inner = self.inner.read();
        Ok(inner
            .sessions
            .values()
            .filter(|session| !session.status.is_terminal() && session.is_expired(now))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CatalogStore for InMemoryHub {
    async fn find_game(&self, game_id: &GameId) -> Result<Option<Game>, HubError> {
        Ok(self.inner.read().games.get(game_id).cloned())
    }

    async fn find_contract(&self, contract_id: &ContractId) -> Result<Option<Contract>, HubError> {
        Ok(self.inner.read().contracts.get(contract_id).cloned())
    }

    async fn insert_game(&self, game: Game) -> Result<(), HubError> {
        let mut inner = self.inner.write();
        if inner.game_names.contains_key(&game.name) {
            return Err(HubError::validation_field("name", "game name is taken"));
        }
        inner.game_names.insert(game.name.clone(), game.game_id.clone());
        inner.games.insert(game.game_id.clone(), game);
        Ok(())
    }

    async fn insert_contract(&self, contract: Contract) -> Result<(), HubError> {
        contract.validate()?;
        let mut inner = self.inner.write();
        if !inner.games.contains_key(&contract.game_id) {
            return Err(HubError::NotFound("game"));
        }
        inner
            .contracts
            .insert(contract.contract_id.clone(), contract);
        Ok(())
    }
}

#[async_trait]
impl HubStorage for InMemoryHub {
    async fn begin(&self) -> Result<Box<dyn HubTxn>, HubError> {
        let guard = Arc::clone(&self.txn_lock).lock_owned().await;
        Ok(Box::new(InMemoryTxn {
            inner: Arc::clone(&self.inner),
            _guard: guard,
            balance_updates: Vec::new(),
            ledger_appends: Vec::new(),
            new_users: Vec::new(),
            new_sessions: Vec::new(),
            finalized: Vec::new(),
            staged_entry_seq: self.inner.read().entry_seq,
        }))
    }
}

struct FinalizedSession {
    session_id: SessionId,
    status: SessionStatus,
    outcomes: Vec<PlayerOutcome>,
    settled_at: Option<DateTime<Utc>>,
}

pub struct InMemoryTxn {
    inner: Arc<RwLock<Inner>>,
    _guard: OwnedMutexGuard<()>,
    balance_updates: Vec<(UserId, BalanceState)>,
    ledger_appends: Vec<LedgerEntry>,
    new_users: Vec<User>,
    new_sessions: Vec<GameSession>,
    finalized: Vec<FinalizedSession>,
    staged_entry_seq: u64,
}

impl InMemoryTxn {
    // Read-your-writes: staged mutations shadow the shared state.
    fn staged_user(&self, user_id: &UserId) -> Option<User> {
        let mut user = self
            .new_users
            .iter()
            .find(|u| &u.user_id == user_id)
            .cloned()
            .or_else(|| self.inner.read().users.get(user_id).cloned())?;
        for (id, state) in &self.balance_updates {
            if id == user_id {
                user.balance = state.balance.clone();
                user.locked_balance = state.locked.clone();
            }
        }
        Some(user)
    }

    fn staged_session(&self, session_id: &SessionId) -> Option<GameSession> {
        let mut session = self
            .new_sessions
            .iter()
            .find(|s| &s.session_id == session_id)
            .cloned()
            .or_else(|| self.inner.read().sessions.get(session_id).cloned())?;
        for done in &self.finalized {
            if &done.session_id == session_id {
                apply_finalization(&mut session, done);
            }
        }
        Some(session)
    }
}

fn apply_finalization(session: &mut GameSession, done: &FinalizedSession) {
    session.status = done.status;
    session.settled_at = done.settled_at;
    for outcome in &done.outcomes {
        if let Some(player) = session
            .players
            .iter_mut()
            .find(|p| p.user_id == outcome.user_id)
        {
            player.is_winner = outcome.is_winner;
            player.win_amount = outcome.win_amount.clone();
        }
    }
}

#[async_trait]
impl HubTxn for InMemoryTxn {
    async fn load_contract(
        &mut self,
        contract_id: &ContractId,
    ) -> Result<Option<Contract>, HubError> {
        Ok(self.inner.read().contracts.get(contract_id).cloned())
    }

    async fn load_user_by_external(
        &mut self,
        external_auth_id: &ExternalAuthId,
    ) -> Result<Option<User>, HubError> {
        if let Some(user) = self
            .new_users
            .iter()
            .find(|u| &u.external_auth_id == external_auth_id)
        {
            return Ok(Some(user.clone()));
        }
        let user_id = self
            .inner
            .read()
            .users_by_external
            .get(external_auth_id)
            .cloned();
        Ok(user_id.and_then(|id| self.staged_user(&id)))
    }

    async fn load_user(&mut self, user_id: &UserId) -> Result<Option<User>, HubError> {
        Ok(self.staged_user(user_id))
    }

    async fn find_or_create_user(&mut self, new: NewUser) -> Result<User, HubError> {
        if let Some(existing) = self.load_user_by_external(&new.external_auth_id).await? {
            return Ok(existing);
        }
        let reserved = new.display_name.to_lowercase();
        let taken_in_store = self.inner.read().display_names.contains_key(&reserved);
        let taken_in_txn = self
            .new_users
            .iter()
            .any(|u| u.display_name.to_lowercase() == reserved);
        if taken_in_store || taken_in_txn {
            return Err(HubError::DisplayNameTaken);
        }
        let user = User {
            user_id: UserId::generate(),
            external_auth_id: new.external_auth_id,
            display_name: new.display_name,
            balance: crate::amount::Amount::zero(),
            locked_balance: crate::amount::Amount::zero(),
            created_at: Utc::now(),
        };
        self.new_users.push(user.clone());
        Ok(user)
    }

    async fn update_balance(
        &mut self,
        user_id: &UserId,
        new: BalanceState,
    ) -> Result<(), HubError> {
        new.check_invariants()?;
        if self.staged_user(user_id).is_none() {
            return Err(HubError::NotFound("user"));
        }
        self.balance_updates.push((user_id.clone(), new));
        Ok(())
    }

    async fn append_ledger(&mut self, entry: NewLedgerEntry) -> Result<EntryId, HubError> {
        // Ids are reserved from the shared sequence; the exclusive txn
        // lock guarantees no other writer advances it underneath us.
        self.staged_entry_seq += 1;
        let entry_id = EntryId::from(format!("ent_{:020}", self.staged_entry_seq));
        self.ledger_appends.push(LedgerEntry {
            entry_id: entry_id.clone(),
            user_id: entry.user_id,
            entry_type: entry.entry_type,
            amount: entry.amount,
            balance_after: entry.balance_after,
            session_id: entry.session_id,
            description: entry.description,
            created_at: Utc::now(),
        });
        Ok(entry_id)
    }

    async fn insert_session(&mut self, session: GameSession) -> Result<(), HubError> {
        if self.staged_session(&session.session_id).is_some() {
            return Err(HubError::DuplicateExecution);
        }
        self.new_sessions.push(session);
        Ok(())
    }

    async fn load_session(
        &mut self,
        session_id: &SessionId,
    ) -> Result<Option<GameSession>, HubError> {
        Ok(self.staged_session(session_id))
    }

    async fn finalize_session(
        &mut self,
        session_id: &SessionId,
        status: SessionStatus,
        outcomes: &[PlayerOutcome],
        settled_at: Option<DateTime<Utc>>,
    ) -> Result<(), HubError> {
        let session = self
            .staged_session(session_id)
            .ok_or(HubError::NotFound("session"))?;
        // Terminal immutability enforced at the storage layer too.
        session.status.ensure_open()?;
        if !status.is_terminal() {
            return Err(HubError::internal("finalize requires a terminal status"));
        }
        self.finalized.push(FinalizedSession {
            session_id: session_id.clone(),
            status,
            outcomes: outcomes.to_vec(),
            settled_at,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), HubError> {
        let mut inner = self.inner.write();
        for user in self.new_users {
            inner
                .display_names
                .insert(user.display_name.to_lowercase(), user.user_id.clone());
            inner
                .users_by_external
                .insert(user.external_auth_id.clone(), user.user_id.clone());
            inner.users.insert(user.user_id.clone(), user);
        }
        for (user_id, state) in self.balance_updates {
            let user = inner
                .users
                .get_mut(&user_id)
                .ok_or_else(|| HubError::internal("balance update for unknown user"))?;
            user.balance = state.balance;
            user.locked_balance = state.locked;
        }
        for entry in self.ledger_appends {
            inner.entry_seq = inner.entry_seq.max(entry_seq_of(&entry));
            inner.ledger.push(entry);
        }
        for session in self.new_sessions {
            inner.sessions.insert(session.session_id.clone(), session);
        }
        for done in self.finalized {
            if let Some(session) = inner.sessions.get_mut(&done.session_id) {
                apply_finalization(session, &done);
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) {
        // Buffered writes are simply dropped with the txn.
    }
}

fn entry_seq_of(entry: &LedgerEntry) -> u64 {
    entry
        .entry_id
        .as_str()
        .rsplit('_')
        .next()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0)
}
