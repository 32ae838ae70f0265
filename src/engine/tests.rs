use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::amount::Amount;
use crate::catalog::{digest_client_secret, Contract, Game};
use crate::error::HubError;
use crate::ids::{ContractId, ExternalAuthId, GameId, SessionId, UserId};
use crate::ledger::EntryType;
use crate::session::{GameSession, SessionPlayer, SessionStatus};
use crate::store::{CatalogStore, HubStorage, InMemoryHub, LedgerStore, SessionStore, UserStore};
use crate::token::{SessionTokenClaims, SessionTokenCodec};
use crate::user::{BalanceState, User};

use super::{ContractEngine, SettleResultInput};

struct Fixture {
    hub: Arc<InMemoryHub>,
    engine: ContractEngine,
    codec: Arc<SessionTokenCodec>,
    game_id: GameId,
}

impl Fixture {
    async fn new() -> Self {
        let hub = Arc::new(InMemoryHub::new());
        let codec = Arc::new(SessionTokenCodec::new(b"engine-test-secret".to_vec()));
        let engine = ContractEngine::new(hub.clone(), codec.clone());
        let game_id = GameId::generate();
        hub.insert_game(Game {
            game_id: game_id.clone(),
            name: "dice-arena".into(),
            client_secret_digest: digest_client_secret(b"secret"),
            callback_url: None,
            is_active: true,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        Self {
            hub,
            engine,
            codec,
            game_id,
        }
    }

    async fn contract(&self, entry_fee: u64, fee_percent: u32, min: u32, max: u32) -> Contract {
        let contract = Contract {
            contract_id: ContractId::generate(),
            game_id: self.game_id.clone(),
            name: "match".into(),
            entry_fee: Amount::from(entry_fee),
            platform_fee_percent: fee_percent,
            min_players: min,
            max_players: max,
            ttl_seconds: 300,
            is_active: true,
            created_at: Utc::now(),
        };
        self.hub.insert_contract(contract.clone()).await.unwrap();
        contract
    }

    async fn player(&self, name: &str, balance: u64) -> User {
        let user = self
            .engine
            .provision_user(&ExternalAuthId::generate(), name)
            .await
            .unwrap();
        if balance > 0 {
            self.engine
                .deposit(&user.user_id, &Amount::from(balance), Some("seed"))
                .await
                .unwrap()
        } else {
            user
        }
    }

    async fn balances(&self, user_id: &UserId) -> (Amount, Amount) {
        let user = self.hub.find_by_id(user_id).await.unwrap().unwrap();
        (user.balance, user.locked_balance)
    }

    /// Invariant 1: the newest ledger row agrees with the balance row and
    /// the signed entry effects replay to it from genesis.
    async fn assert_ledger_consistent(&self, user_id: &UserId) {
        let user = self.hub.find_by_id(user_id).await.unwrap().unwrap();
        let (rows, _) = self.hub.history(user_id, 1000, 0).await.unwrap();
        match rows.first() {
            Some(newest) => assert_eq!(
                newest.balance_after, user.balance,
                "newest balance_after mismatch for {user_id}"
            ),
            None => assert!(user.balance.is_zero()),
        }
        let mut replayed = Amount::from(0);
        for entry in rows.iter().rev() {
            match entry.entry_type.balance_effect() {
                1 => replayed += &entry.amount,
                -1 => replayed = replayed.checked_sub(&entry.amount).expect("ledger underflow"),
                _ => {}
            }
        }
        assert_eq!(replayed, user.balance, "replayed balance mismatch for {user_id}");
    }
}

fn win(user: &User) -> SettleResultInput {
    SettleResultInput {
        player_id: user.user_id.clone(),
        is_winner: true,
        win_amount: None,
    }
}

fn lose(user: &User) -> SettleResultInput {
    SettleResultInput {
        player_id: user.user_id.clone(),
        is_winner: false,
        win_amount: None,
    }
}

#[tokio::test]
async fn s1_two_player_happy_path() {
    let fx = Fixture::new().await;
    let contract = fx.contract(100, 5, 2, 2).await;
    let a = fx.player("alice", 1000).await;
    let b = fx.player("bob", 1000).await;

    let outcome = fx
        .engine
        .execute(
            &contract.contract_id,
            &[a.external_auth_id.clone(), b.external_auth_id.clone()],
        )
        .await
        .unwrap();
    let session = &outcome.session;
    assert_eq!(session.status, SessionStatus::Pending);
    assert_eq!(session.total_pot, Amount::from(200));
    assert_eq!(fx.balances(&a.user_id).await, (Amount::from(1000), Amount::from(100)));
    assert_eq!(fx.balances(&b.user_id).await, (Amount::from(1000), Amount::from(100)));

    let settled = fx
        .engine
        .settle(&outcome.session_token, &[win(&a), lose(&b)])
        .await
        .unwrap();
    assert_eq!(settled.platform_fee, Amount::from(10));
    assert_eq!(settled.winners, vec![(a.user_id.clone(), Amount::from(190))]);

    assert_eq!(fx.balances(&a.user_id).await, (Amount::from(1090), Amount::zero()));
    assert_eq!(fx.balances(&b.user_id).await, (Amount::from(900), Amount::zero()));
    assert_eq!(
        fx.balances(&UserId::platform()).await,
        (Amount::from(10), Amount::zero())
    );

    let stored = fx.hub.find(&session.session_id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Settled);
    assert!(stored.settled_at.is_some());
    let winner_row = stored.player(&a.user_id).unwrap();
    assert!(winner_row.is_winner);
    assert_eq!(winner_row.win_amount, Amount::from(190));

    // Ledger shapes per §outcome: winner LOCK→LOSE→WIN, loser LOCK→LOSE,
    // one aggregate FEE row.
    let rows = fx.hub.by_session(&session.session_id).await.unwrap();
    let types_for = |user: &UserId| -> Vec<EntryType> {
        rows.iter()
            .filter(|e| &e.user_id == user)
            .map(|e| e.entry_type)
            .collect()
    };
    assert_eq!(
        types_for(&a.user_id),
        vec![EntryType::Lock, EntryType::Lose, EntryType::Win]
    );
    assert_eq!(types_for(&b.user_id), vec![EntryType::Lock, EntryType::Lose]);
    assert_eq!(types_for(&UserId::platform()), vec![EntryType::Fee]);

    for user_id in [&a.user_id, &b.user_id, &UserId::platform()] {
        fx.assert_ledger_consistent(user_id).await;
    }
}

#[tokio::test]
async fn s2_cancel_refunds_exactly() {
    let fx = Fixture::new().await;
    let contract = fx.contract(100, 5, 2, 2).await;
    let a = fx.player("alice", 1000).await;
    let b = fx.player("bob", 1000).await;

    let outcome = fx
        .engine
        .execute(
            &contract.contract_id,
            &[a.external_auth_id.clone(), b.external_auth_id.clone()],
        )
        .await
        .unwrap();

    let cancelled = fx
        .engine
        .cancel(&outcome.session_token, Some("match aborted"))
        .await
        .unwrap();
    assert_eq!(cancelled.refunded_players.len(), 2);

    for user in [&a, &b] {
        assert_eq!(
            fx.balances(&user.user_id).await,
            (Amount::from(1000), Amount::zero())
        );
        let rows = fx.hub.by_session(&outcome.session.session_id).await.unwrap();
        let mine: Vec<EntryType> = rows
            .iter()
            .filter(|e| e.user_id == user.user_id)
            .map(|e| e.entry_type)
            .collect();
        assert_eq!(mine, vec![EntryType::Lock, EntryType::Unlock]);
        fx.assert_ledger_consistent(&user.user_id).await;
    }

    let stored = fx
        .hub
        .find(&outcome.session.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, SessionStatus::Cancelled);
}

/// Builds a consistent already-expired PENDING session directly in the
/// store: stakes locked, rows in place, deadline in the past.
async fn expired_session(fx: &Fixture, contract: &Contract, players: &[&User]) -> GameSession {
    let mut txn = fx.hub.begin().await.unwrap();
    let session = GameSession {
        session_id: SessionId::generate(),
        contract_id: contract.contract_id.clone(),
        status: SessionStatus::Pending,
        total_pot: contract.entry_fee.scaled(players.len() as u64),
        players: players
            .iter()
            .map(|u| SessionPlayer::locked(u.user_id.clone(), contract.entry_fee.clone()))
            .collect(),
        expires_at: Utc::now() - Duration::seconds(5),
        created_at: Utc::now() - Duration::seconds(10),
        settled_at: None,
    };
    for user in players {
        txn.update_balance(
            &user.user_id,
            BalanceState {
                balance: user.balance.clone(),
                locked: contract.entry_fee.clone(),
            },
        )
        .await
        .unwrap();
    }
    txn.insert_session(session.clone()).await.unwrap();
    txn.commit().await.unwrap();
    session
}

#[tokio::test]
async fn s3_settle_after_expiry_is_rejected() {
    let fx = Fixture::new().await;
    let contract = fx.contract(100, 5, 2, 2).await;
    let a = fx.player("alice", 1000).await;
    let b = fx.player("bob", 1000).await;
    let session = expired_session(&fx, &contract, &[&a, &b]).await;

    fx.engine.expire(&session.session_id).await.unwrap();
    assert_eq!(fx.balances(&a.user_id).await, (Amount::from(1000), Amount::zero()));

    let stored = fx.hub.find(&session.session_id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Expired);

    // A late settle with a perfectly valid token still bounces.
    let token = fx
        .codec
        .mint(&SessionTokenClaims {
            session_id: session.session_id.clone(),
            contract_id: contract.contract_id.clone(),
            player_ids: vec![a.user_id.clone(), b.user_id.clone()],
            total_pot: session.total_pot.clone(),
            expires_at: session.expires_at,
            iat: Utc::now().timestamp(),
        })
        .unwrap();
    let err = fx.engine.settle(&token, &[win(&a), lose(&b)]).await.unwrap_err();
    assert!(matches!(err, HubError::InvalidState(_)));
    assert_eq!(fx.balances(&a.user_id).await, (Amount::from(1000), Amount::zero()));
}

#[tokio::test]
async fn settle_rechecks_the_deadline_before_the_sweeper_runs() {
    let fx = Fixture::new().await;
    let contract = fx.contract(100, 5, 2, 2).await;
    let a = fx.player("alice", 1000).await;
    let b = fx.player("bob", 1000).await;
    let session = expired_session(&fx, &contract, &[&a, &b]).await;

    let token = fx
        .codec
        .mint(&SessionTokenClaims {
            session_id: session.session_id.clone(),
            contract_id: contract.contract_id.clone(),
            player_ids: vec![a.user_id.clone(), b.user_id.clone()],
            total_pot: session.total_pot.clone(),
            expires_at: session.expires_at,
            iat: Utc::now().timestamp(),
        })
        .unwrap();
    let err = fx.engine.settle(&token, &[win(&a), lose(&b)]).await.unwrap_err();
    assert_eq!(err, HubError::SessionExpired);
}

#[tokio::test]
async fn s4_insufficient_funds_blocks_execute() {
    let fx = Fixture::new().await;
    let contract = fx.contract(100, 5, 2, 2).await;
    let a = fx.player("alice", 1000).await;
    let c = fx.player("carol", 50).await;

    let err = fx
        .engine
        .execute(
            &contract.contract_id,
            &[a.external_auth_id.clone(), c.external_auth_id.clone()],
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        HubError::InsufficientFunds {
            required: Amount::from(100),
            available: Amount::from(50),
        }
    );

    // No partial state: both balances untouched, no session-linked rows.
    assert_eq!(fx.balances(&a.user_id).await, (Amount::from(1000), Amount::zero()));
    assert_eq!(fx.balances(&c.user_id).await, (Amount::from(50), Amount::zero()));
    let (rows, _) = fx.hub.history(&a.user_id, 100, 0).await.unwrap();
    assert!(rows.iter().all(|e| e.session_id.is_none()));
}

#[tokio::test]
async fn s5_even_split_and_remainder() {
    let fx = Fixture::new().await;

    // 300 across three winners: no remainder.
    let contract = fx.contract(100, 0, 3, 3).await;
    let players = [
        fx.player("alice", 1000).await,
        fx.player("bob", 1000).await,
        fx.player("carol", 1000).await,
    ];
    let ids: Vec<ExternalAuthId> = players.iter().map(|p| p.external_auth_id.clone()).collect();
    let outcome = fx.engine.execute(&contract.contract_id, &ids).await.unwrap();
    let results: Vec<SettleResultInput> = players.iter().map(win).collect();
    let settled = fx.engine.settle(&outcome.session_token, &results).await.unwrap();
    let amounts: Vec<Amount> = settled.winners.iter().map(|(_, a)| a.clone()).collect();
    assert_eq!(amounts, vec![Amount::from(100); 3]);

    // 1000 across four winners: 250 each.
    let contract = fx.contract(250, 0, 4, 4).await;
    let players = [
        fx.player("dave", 1000).await,
        fx.player("erin", 1000).await,
        fx.player("frank", 1000).await,
        fx.player("grace", 1000).await,
    ];
    let ids: Vec<ExternalAuthId> = players.iter().map(|p| p.external_auth_id.clone()).collect();
    let outcome = fx.engine.execute(&contract.contract_id, &ids).await.unwrap();
    let results: Vec<SettleResultInput> = players.iter().map(win).collect();
    let settled = fx.engine.settle(&outcome.session_token, &results).await.unwrap();
    let amounts: Vec<Amount> = settled.winners.iter().map(|(_, a)| a.clone()).collect();
    assert_eq!(amounts, vec![Amount::from(250); 4]);

    // 1000 across three winners: 334, 333, 333 in result order.
    let contract = fx.contract(250, 0, 4, 4).await;
    let players = [
        fx.player("heidi", 1000).await,
        fx.player("ivan", 1000).await,
        fx.player("judy", 1000).await,
        fx.player("karl", 1000).await,
    ];
    let ids: Vec<ExternalAuthId> = players.iter().map(|p| p.external_auth_id.clone()).collect();
    let outcome = fx.engine.execute(&contract.contract_id, &ids).await.unwrap();
    let results = vec![
        win(&players[0]),
        win(&players[1]),
        win(&players[2]),
        lose(&players[3]),
    ];
    let settled = fx.engine.settle(&outcome.session_token, &results).await.unwrap();
    let amounts: Vec<Amount> = settled.winners.iter().map(|(_, a)| a.clone()).collect();
    assert_eq!(
        amounts,
        vec![Amount::from(334), Amount::from(333), Amount::from(333)]
    );

    for player in &players {
        fx.assert_ledger_consistent(&player.user_id).await;
    }
}

#[tokio::test]
async fn s6_double_settle_is_idempotent() {
    let fx = Fixture::new().await;
    let contract = fx.contract(100, 5, 2, 2).await;
    let a = fx.player("alice", 1000).await;
    let b = fx.player("bob", 1000).await;

    let outcome = fx
        .engine
        .execute(
            &contract.contract_id,
            &[a.external_auth_id.clone(), b.external_auth_id.clone()],
        )
        .await
        .unwrap();
    fx.engine
        .settle(&outcome.session_token, &[win(&a), lose(&b)])
        .await
        .unwrap();

    let rows_before = fx.hub.by_session(&outcome.session.session_id).await.unwrap();
    let err = fx
        .engine
        .settle(&outcome.session_token, &[win(&a), lose(&b)])
        .await
        .unwrap_err();
    assert_eq!(err, HubError::AlreadySettled);

    let rows_after = fx.hub.by_session(&outcome.session.session_id).await.unwrap();
    assert_eq!(rows_before, rows_after);
    assert_eq!(fx.balances(&a.user_id).await, (Amount::from(1090), Amount::zero()));

    // Cancel after settle hits the same guard.
    let err = fx.engine.cancel(&outcome.session_token, None).await.unwrap_err();
    assert_eq!(err, HubError::AlreadySettled);
}

#[tokio::test]
async fn settle_after_cancel_is_invalid_state() {
    let fx = Fixture::new().await;
    let contract = fx.contract(100, 5, 2, 2).await;
    let a = fx.player("alice", 1000).await;
    let b = fx.player("bob", 1000).await;

    let outcome = fx
        .engine
        .execute(
            &contract.contract_id,
            &[a.external_auth_id.clone(), b.external_auth_id.clone()],
        )
        .await
        .unwrap();
    fx.engine.cancel(&outcome.session_token, None).await.unwrap();

    let err = fx
        .engine
        .settle(&outcome.session_token, &[win(&a), lose(&b)])
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::InvalidState(_)));
}

#[tokio::test]
async fn execute_validates_roster_and_contract() {
    let fx = Fixture::new().await;
    let contract = fx.contract(100, 5, 2, 3).await;
    let a = fx.player("alice", 1000).await;

    let err = fx
        .engine
        .execute(&contract.contract_id, &[a.external_auth_id.clone()])
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::Validation { .. }));

    let err = fx
        .engine
        .execute(
            &contract.contract_id,
            &[a.external_auth_id.clone(), a.external_auth_id.clone()],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::Validation { .. }));

    let err = fx
        .engine
        .execute(
            &ContractId::from("ctr_missing"),
            &[a.external_auth_id.clone(), ExternalAuthId::generate()],
        )
        .await
        .unwrap_err();
    assert_eq!(err, HubError::NotFound("contract"));

    let mut inactive = fx.contract(100, 5, 2, 2).await;
    inactive.contract_id = ContractId::generate();
    inactive.is_active = false;
    fx.hub.insert_contract(inactive.clone()).await.unwrap();
    let err = fx
        .engine
        .execute(
            &inactive.contract_id,
            &[a.external_auth_id.clone(), ExternalAuthId::generate()],
        )
        .await
        .unwrap_err();
    assert_eq!(err, HubError::GameNotActive);

    let err = fx
        .engine
        .execute(
            &contract.contract_id,
            &[a.external_auth_id.clone(), ExternalAuthId::from("sub_ghost")],
        )
        .await
        .unwrap_err();
    assert_eq!(err, HubError::NotFound("user"));
}

#[tokio::test]
async fn settle_validates_result_coverage_and_winners() {
    let fx = Fixture::new().await;
    let contract = fx.contract(100, 5, 2, 2).await;
    let a = fx.player("alice", 1000).await;
    let b = fx.player("bob", 1000).await;

    let outcome = fx
        .engine
        .execute(
            &contract.contract_id,
            &[a.external_auth_id.clone(), b.external_auth_id.clone()],
        )
        .await
        .unwrap();

    // Omission.
    let err = fx
        .engine
        .settle(&outcome.session_token, &[win(&a)])
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::Validation { .. }));

    // Extra player.
    let ghost = fx.player("ghost1", 0).await;
    let err = fx
        .engine
        .settle(&outcome.session_token, &[win(&a), lose(&b), lose(&ghost)])
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::Validation { .. }));

    // No winner.
    let err = fx
        .engine
        .settle(&outcome.session_token, &[lose(&a), lose(&b)])
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::Validation { .. }));

    // A garbage token never reaches the session store.
    let err = fx
        .engine
        .settle("not.a.token", &[win(&a), lose(&b)])
        .await
        .unwrap_err();
    assert_eq!(err, HubError::InvalidToken);

    // The session is still open after all those rejections.
    fx.engine
        .settle(&outcome.session_token, &[win(&a), lose(&b)])
        .await
        .unwrap();
}

#[tokio::test]
async fn explicit_win_amounts_override_the_even_split() {
    let fx = Fixture::new().await;
    let contract = fx.contract(100, 5, 2, 2).await;
    let a = fx.player("alice", 1000).await;
    let b = fx.player("bob", 1000).await;

    let outcome = fx
        .engine
        .execute(
            &contract.contract_id,
            &[a.external_auth_id.clone(), b.external_auth_id.clone()],
        )
        .await
        .unwrap();

    // Pool is 190; explicit sum must match it exactly.
    let short = vec![
        SettleResultInput {
            player_id: a.user_id.clone(),
            is_winner: true,
            win_amount: Some(Amount::from(100)),
        },
        SettleResultInput {
            player_id: b.user_id.clone(),
            is_winner: true,
            win_amount: Some(Amount::from(50)),
        },
    ];
    let err = fx.engine.settle(&outcome.session_token, &short).await.unwrap_err();
    assert!(matches!(err, HubError::Validation { .. }));

    let exact = vec![
        SettleResultInput {
            player_id: a.user_id.clone(),
            is_winner: true,
            win_amount: Some(Amount::from(150)),
        },
        SettleResultInput {
            player_id: b.user_id.clone(),
            is_winner: true,
            win_amount: Some(Amount::from(40)),
        },
    ];
    let settled = fx.engine.settle(&outcome.session_token, &exact).await.unwrap();
    assert_eq!(
        settled.winners,
        vec![
            (a.user_id.clone(), Amount::from(150)),
            (b.user_id.clone(), Amount::from(40)),
        ]
    );
    assert_eq!(fx.balances(&a.user_id).await, (Amount::from(1050), Amount::zero()));
    assert_eq!(fx.balances(&b.user_id).await, (Amount::from(940), Amount::zero()));
}

#[tokio::test]
async fn session_conservation_holds_for_settled_sessions() {
    let fx = Fixture::new().await;
    let contract = fx.contract(100, 7, 2, 2).await;
    let a = fx.player("alice", 1000).await;
    let b = fx.player("bob", 1000).await;

    let outcome = fx
        .engine
        .execute(
            &contract.contract_id,
            &[a.external_auth_id.clone(), b.external_auth_id.clone()],
        )
        .await
        .unwrap();
    let settled = fx
        .engine
        .settle(&outcome.session_token, &[win(&a), lose(&b)])
        .await
        .unwrap();

    let stored = fx.hub.find(&outcome.session.session_id).await.unwrap().unwrap();
    let locked_total: Amount = stored.players.iter().map(|p| &p.amount_locked).sum();
    let won_total: Amount = stored
        .players
        .iter()
        .filter(|p| p.is_winner)
        .map(|p| &p.win_amount)
        .sum();
    assert_eq!(locked_total, stored.total_pot);
    assert_eq!(&won_total + &settled.platform_fee, stored.total_pot);
}
