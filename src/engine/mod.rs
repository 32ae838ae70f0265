use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::info;

use crate::amount::Amount;
use crate::error::HubError;
use crate::ids::{ContractId, ExternalAuthId, SessionId, UserId};
use crate::ledger::{EntryType, NewLedgerEntry};
use crate::session::{GameSession, PlayerOutcome, SessionPlayer, SessionStatus};
use crate::store::{HubStorage, HubTxn};
use crate::token::{SessionTokenClaims, SessionTokenCodec};
use crate::user::{validate_display_name, BalanceState, NewUser, User};

pub mod payout;

#[cfg(test)]
mod tests;

const LOG_TARGET: &str = "engine";

/// One row of a settlement request.
#[derive(Debug, Clone)]
pub struct SettleResultInput {
    pub player_id: UserId,
    pub is_winner: bool,
    pub win_amount: Option<Amount>,
}

#[derive(Debug, Clone)]
pub struct ExecuteOutcome {
    pub session: GameSession,
    pub session_token: String,
}

#[derive(Debug, Clone)]
pub struct SettleOutcome {
    pub session_id: SessionId,
    pub winners: Vec<(UserId, Amount)>,
    pub platform_fee: Amount,
}

#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub session_id: SessionId,
    pub refunded_players: Vec<UserId>,
}

/// Orchestrates the escrow lifecycle across the ledger, balance, catalog
/// and session stores. Every operation validates its inputs first, then
/// performs all effects inside a single storage transaction.
pub struct ContractEngine {
    storage: Arc<dyn HubStorage>,
    codec: Arc<SessionTokenCodec>,
}

impl ContractEngine {
    pub fn new(storage: Arc<dyn HubStorage>, codec: Arc<SessionTokenCodec>) -> Self {
        Self { storage, codec }
    }

    /// Decode a session token without touching the session store.
    pub fn verify_token(&self, token: &str) -> Result<SessionTokenClaims, HubError> {
        self.codec.verify(token)
    }

    /// Lock the entry fee for every named player, create the session and
    /// mint its capability token. Nothing persists on any failure.
    pub async fn execute(
        &self,
        contract_id: &ContractId,
        external_auth_ids: &[ExternalAuthId],
    ) -> Result<ExecuteOutcome, HubError> {
        ensure_no_duplicates(external_auth_ids)?;

        let mut txn = self.storage.begin().await?;
        let result = self
            .execute_in(txn.as_mut(), contract_id, external_auth_ids)
            .await;
        match result {
            Ok(outcome) => {
                txn.commit().await?;
                info!(
                    target = LOG_TARGET,
                    session_id = %outcome.session.session_id,
                    contract_id = %contract_id,
                    players = outcome.session.players.len(),
                    total_pot = %outcome.session.total_pot,
                    "session executed"
                );
                Ok(outcome)
            }
            Err(err) => {
                txn.rollback().await;
                Err(err)
            }
        }
    }

    async fn execute_in(
        &self,
        txn: &mut dyn HubTxn,
        contract_id: &ContractId,
        external_auth_ids: &[ExternalAuthId],
    ) -> Result<ExecuteOutcome, HubError> {
        let contract = txn
            .load_contract(contract_id)
            .await?
            .ok_or(HubError::NotFound("contract"))?;
        if !contract.is_active {
            return Err(HubError::GameNotActive);
        }

        let n = external_auth_ids.len() as u32;
        if n < contract.min_players || n > contract.max_players {
            return Err(HubError::validation_field(
                "playerIds",
                format!(
                    "contract requires between {} and {} players, got {n}",
                    contract.min_players, contract.max_players
                ),
            ));
        }

        let mut players = Vec::with_capacity(external_auth_ids.len());
        for external_id in external_auth_ids {
            let user = txn
                .load_user_by_external(external_id)
                .await?
                .ok_or(HubError::NotFound("user"))?;
            if user.available_balance() < contract.entry_fee {
                return Err(HubError::InsufficientFunds {
                    required: contract.entry_fee.clone(),
                    available: user.available_balance(),
                });
            }
            players.push(user);
        }

        let now = Utc::now();
        let session = GameSession {
            session_id: SessionId::generate(),
            contract_id: contract.contract_id.clone(),
            status: SessionStatus::Pending,
            total_pot: contract.entry_fee.scaled(players.len() as u64),
            players: players
                .iter()
                .map(|user| SessionPlayer::locked(user.user_id.clone(), contract.entry_fee.clone()))
                .collect(),
            expires_at: now + Duration::seconds(contract.ttl_seconds as i64),
            created_at: now,
            settled_at: None,
        };

        // Balance rows are touched in canonical userId order.
        let mut by_lock_order: Vec<&User> = players.iter().collect();
        by_lock_order.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        for user in by_lock_order {
            let locked = &user.locked_balance + &contract.entry_fee;
            txn.update_balance(
                &user.user_id,
                BalanceState {
                    balance: user.balance.clone(),
                    locked,
                },
            )
            .await?;
            if !contract.entry_fee.is_zero() {
                txn.append_ledger(NewLedgerEntry::for_session(
                    user.user_id.clone(),
                    EntryType::Lock,
                    contract.entry_fee.clone(),
                    user.balance.clone(),
                    session.session_id.clone(),
                ))
                .await?;
            }
        }

        txn.insert_session(session.clone()).await?;

        let session_token = self.codec.mint(&SessionTokenClaims {
            session_id: session.session_id.clone(),
            contract_id: session.contract_id.clone(),
            player_ids: session.players.iter().map(|p| p.user_id.clone()).collect(),
            total_pot: session.total_pot.clone(),
            expires_at: session.expires_at,
            iat: now.timestamp(),
        })?;

        Ok(ExecuteOutcome {
            session,
            session_token,
        })
    }

    /// Resolve a session: debit every stake, pay the winners, book the
    /// platform fee and freeze the session. Exactly one terminal
    /// transition ever commits.
    pub async fn settle(
        &self,
        session_token: &str,
        results: &[SettleResultInput],
    ) -> Result<SettleOutcome, HubError> {
        let claims = self.codec.verify(session_token)?;

        let mut txn = self.storage.begin().await?;
        let result = self.settle_in(txn.as_mut(), &claims.session_id, results).await;
        match result {
            Ok(outcome) => {
                txn.commit().await?;
                info!(
                    target = LOG_TARGET,
                    session_id = %outcome.session_id,
                    winners = outcome.winners.len(),
                    platform_fee = %outcome.platform_fee,
                    "session settled"
                );
                Ok(outcome)
            }
            Err(err) => {
                txn.rollback().await;
                Err(err)
            }
        }
    }

    async fn settle_in(
        &self,
        txn: &mut dyn HubTxn,
        session_id: &SessionId,
        results: &[SettleResultInput],
    ) -> Result<SettleOutcome, HubError> {
        let session = txn
            .load_session(session_id)
            .await?
            .ok_or(HubError::NotFound("session"))?;
        session.status.ensure_open()?;

        let now = Utc::now();
        if session.is_expired(now) {
            return Err(HubError::SessionExpired);
        }

        ensure_results_cover_players(&session, results)?;

        let contract = txn
            .load_contract(&session.contract_id)
            .await?
            .ok_or(HubError::NotFound("contract"))?;

        let winners: Vec<&SettleResultInput> =
            results.iter().filter(|r| r.is_winner).collect();
        if winners.is_empty() {
            return Err(HubError::validation_field(
                "results",
                "at least one winner is required",
            ));
        }
        for loser in results.iter().filter(|r| !r.is_winner) {
            if loser.win_amount.as_ref().is_some_and(|a| !a.is_zero()) {
                return Err(HubError::validation_field(
                    "results",
                    "non-winners cannot carry a winAmount",
                ));
            }
        }

        let fee = payout::platform_fee(&session.total_pot, contract.platform_fee_percent);
        let prize_pool = session
            .total_pot
            .checked_sub(&fee)
            .ok_or_else(|| HubError::internal("platform fee exceeds pot"))?;

        let explicit = winners.iter().any(|w| w.win_amount.is_some());
        let winner_amounts: Vec<(UserId, Amount)> = if explicit {
            let mut amounts = Vec::with_capacity(winners.len());
            for winner in &winners {
                let amount = winner.win_amount.clone().ok_or_else(|| {
                    HubError::validation_field(
                        "results",
                        "every winner needs a winAmount when any is explicit",
                    )
                })?;
                amounts.push((winner.player_id.clone(), amount));
            }
            payout::validate_explicit(&prize_pool, &amounts)?;
            amounts
        } else {
            let order: Vec<UserId> = winners.iter().map(|w| w.player_id.clone()).collect();
            payout::split_evenly(&prize_pool, &order)
        };

        // Debit every stake in canonical userId order.
        let mut stakes: Vec<(UserId, Amount)> = session
            .players
            .iter()
            .map(|p| (p.user_id.clone(), p.amount_locked.clone()))
            .collect();
        stakes.sort_by(|a, b| a.0.cmp(&b.0));
        for (user_id, stake) in &stakes {
            let user = txn
                .load_user(user_id)
                .await?
                .ok_or(HubError::NotFound("user"))?;
            let balance = user
                .balance
                .checked_sub(stake)
                .ok_or(HubError::ConcurrencyConflict)?;
            let locked = user
                .locked_balance
                .checked_sub(stake)
                .ok_or(HubError::ConcurrencyConflict)?;
            txn.update_balance(user_id, BalanceState { balance: balance.clone(), locked })
                .await?;
            if !stake.is_zero() {
                txn.append_ledger(NewLedgerEntry::for_session(
                    user_id.clone(),
                    EntryType::Lose,
                    stake.clone(),
                    balance,
                    session.session_id.clone(),
                ))
                .await?;
            }
        }

        // Credit winners in result order.
        for (user_id, amount) in &winner_amounts {
            let user = txn
                .load_user(user_id)
                .await?
                .ok_or(HubError::NotFound("user"))?;
            let balance = &user.balance + amount;
            txn.update_balance(
                user_id,
                BalanceState {
                    balance: balance.clone(),
                    locked: user.locked_balance.clone(),
                },
            )
            .await?;
            if !amount.is_zero() {
                txn.append_ledger(NewLedgerEntry::for_session(
                    user_id.clone(),
                    EntryType::Win,
                    amount.clone(),
                    balance,
                    session.session_id.clone(),
                ))
                .await?;
            }
        }

        // One aggregate FEE row against the platform account.
        if !fee.is_zero() {
            let platform_id = UserId::platform();
            let platform = txn
                .load_user(&platform_id)
                .await?
                .ok_or(HubError::NotFound("user"))?;
            let balance = &platform.balance + &fee;
            txn.update_balance(
                &platform_id,
                BalanceState {
                    balance: balance.clone(),
                    locked: platform.locked_balance.clone(),
                },
            )
            .await?;
            txn.append_ledger(NewLedgerEntry::for_session(
                platform_id,
                EntryType::Fee,
                fee.clone(),
                balance,
                session.session_id.clone(),
            ))
            .await?;
        }

        let outcomes: Vec<PlayerOutcome> = session
            .players
            .iter()
            .map(|p| {
                let won = winner_amounts
                    .iter()
                    .find(|(user_id, _)| user_id == &p.user_id);
                PlayerOutcome {
                    user_id: p.user_id.clone(),
                    is_winner: won.is_some(),
                    win_amount: won.map(|(_, a)| a.clone()).unwrap_or_else(Amount::zero),
                }
            })
            .collect();
        txn.finalize_session(
            &session.session_id,
            SessionStatus::Settled,
            &outcomes,
            Some(now),
        )
        .await?;

        Ok(SettleOutcome {
            session_id: session.session_id.clone(),
            winners: winner_amounts,
            platform_fee: fee,
        })
    }

    /// Release every stake and close the session without charging a fee.
    pub async fn cancel(
        &self,
        session_token: &str,
        reason: Option<&str>,
    ) -> Result<CancelOutcome, HubError> {
        let claims = self.codec.verify(session_token)?;
        let description = reason.unwrap_or("session cancelled").to_owned();

        let mut txn = self.storage.begin().await?;
        let result = self
            .refund_in(
                txn.as_mut(),
                &claims.session_id,
                SessionStatus::Cancelled,
                &description,
            )
            .await;
        match result {
            Ok(outcome) => {
                txn.commit().await?;
                info!(
                    target = LOG_TARGET,
                    session_id = %outcome.session_id,
                    refunded = outcome.refunded_players.len(),
                    "session cancelled"
                );
                Ok(outcome)
            }
            Err(err) => {
                txn.rollback().await;
                Err(err)
            }
        }
    }

    /// Sweeper entry point: same refund as cancel but the terminal state
    /// is `EXPIRED`. Only sessions actually past their deadline qualify.
    pub async fn expire(&self, session_id: &SessionId) -> Result<CancelOutcome, HubError> {
        let mut txn = self.storage.begin().await?;
        let result = async {
            let session = txn
                .load_session(session_id)
                .await?
                .ok_or(HubError::NotFound("session"))?;
            if !session.is_expired(Utc::now()) {
                return Err(HubError::InvalidState("session has not expired"));
            }
            self.refund_in(
                txn.as_mut(),
                session_id,
                SessionStatus::Expired,
                "session expired",
            )
            .await
        }
        .await;
        match result {
            Ok(outcome) => {
                txn.commit().await?;
                info!(
                    target = LOG_TARGET,
                    session_id = %outcome.session_id,
                    refunded = outcome.refunded_players.len(),
                    "session expired"
                );
                Ok(outcome)
            }
            Err(err) => {
                txn.rollback().await;
                Err(err)
            }
        }
    }

    async fn refund_in(
        &self,
        txn: &mut dyn HubTxn,
        session_id: &SessionId,
        status: SessionStatus,
        description: &str,
    ) -> Result<CancelOutcome, HubError> {
        let session = txn
            .load_session(session_id)
            .await?
            .ok_or(HubError::NotFound("session"))?;
        session.status.ensure_open()?;

        let mut stakes: Vec<(UserId, Amount)> = session
            .players
            .iter()
            .map(|p| (p.user_id.clone(), p.amount_locked.clone()))
            .collect();
        stakes.sort_by(|a, b| a.0.cmp(&b.0));
        for (user_id, stake) in &stakes {
            let user = txn
                .load_user(user_id)
                .await?
                .ok_or(HubError::NotFound("user"))?;
            let locked = user
                .locked_balance
                .checked_sub(stake)
                .ok_or(HubError::ConcurrencyConflict)?;
            txn.update_balance(
                user_id,
                BalanceState {
                    balance: user.balance.clone(),
                    locked,
                },
            )
            .await?;
            if !stake.is_zero() {
                txn.append_ledger(
                    NewLedgerEntry::for_session(
                        user_id.clone(),
                        EntryType::Unlock,
                        stake.clone(),
                        user.balance.clone(),
                        session.session_id.clone(),
                    )
                    .described(description),
                )
                .await?;
            }
        }

        txn.finalize_session(&session.session_id, status, &[], None)
            .await?;

        Ok(CancelOutcome {
            session_id: session.session_id.clone(),
            refunded_players: session.players.iter().map(|p| p.user_id.clone()).collect(),
        })
    }

    /// Provision the account for a new external subject on first
    /// authentication.
    pub async fn provision_user(
        &self,
        external_auth_id: &ExternalAuthId,
        display_name: &str,
    ) -> Result<User, HubError> {
        validate_display_name(display_name)?;
        let mut txn = self.storage.begin().await?;
        let result = txn
            .find_or_create_user(NewUser {
                external_auth_id: external_auth_id.clone(),
                display_name: display_name.to_owned(),
            })
            .await;
        match result {
            Ok(user) => {
                txn.commit().await?;
                Ok(user)
            }
            Err(err) => {
                txn.rollback().await;
                Err(err)
            }
        }
    }

    /// Credit an account through the same invariant-checked path every
    /// other balance mutation uses.
    pub async fn deposit(
        &self,
        user_id: &UserId,
        amount: &Amount,
        description: Option<&str>,
    ) -> Result<User, HubError> {
        if amount.is_zero() {
            return Err(HubError::validation_field("amount", "must be positive"));
        }
        let mut txn = self.storage.begin().await?;
        let result = async {
            let user = txn
                .load_user(user_id)
                .await?
                .ok_or(HubError::NotFound("user"))?;
            let balance = &user.balance + amount;
            txn.update_balance(
                user_id,
                BalanceState {
                    balance: balance.clone(),
                    locked: user.locked_balance.clone(),
                },
            )
            .await?;
            let mut entry = NewLedgerEntry {
                user_id: user_id.clone(),
                entry_type: EntryType::Deposit,
                amount: amount.clone(),
                balance_after: balance.clone(),
                session_id: None,
                description: None,
            };
            if let Some(text) = description {
                entry = entry.described(text);
            }
            txn.append_ledger(entry).await?;
            Ok(User {
                balance,
                ..user
            })
        }
        .await;
        match result {
            Ok(user) => {
                txn.commit().await?;
                Ok(user)
            }
            Err(err) => {
                txn.rollback().await;
                Err(err)
            }
        }
    }
}

fn ensure_no_duplicates(external_auth_ids: &[ExternalAuthId]) -> Result<(), HubError> {
    let mut seen = HashSet::new();
    for id in external_auth_ids {
        if !seen.insert(id) {
            return Err(HubError::validation_field(
                "playerIds",
                "duplicate player ids",
            ));
        }
    }
    Ok(())
}

fn ensure_results_cover_players(
    session: &GameSession,
    results: &[SettleResultInput],
) -> Result<(), HubError> {
    let mut expected: HashSet<&UserId> = session.players.iter().map(|p| &p.user_id).collect();
    for result in results {
        if !expected.remove(&result.player_id) {
            return Err(HubError::validation_field(
                "results",
                format!("unknown or duplicate player {}", result.player_id),
            ));
        }
    }
    if !expected.is_empty() {
        return Err(HubError::validation_field(
            "results",
            "results must cover every session player",
        ));
    }
    Ok(())
}
