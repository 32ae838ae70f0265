use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::net::TcpListener;
use tracing::info;

use crate::amount::Amount;
use crate::auth::{HmacSignatureVerifier, StaticIdentityProvider};
use crate::catalog::{digest_client_secret, Contract, Game};
use crate::engine::ContractEngine;
use crate::ids::{ContractId, ExternalAuthId, GameId};
use crate::lobby::{InMemoryLobbyStore, LobbyEventRegistry, LobbyService};
use crate::store::{CatalogStore, InMemoryHub};
use crate::sweeper::{ExpirySweeper, SWEEP_INTERVAL};
use crate::token::SessionTokenCodec;

use super::routes::{router, ServerContext};

const LOG_TARGET: &str = "server::bootstrap";

pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Process-wide secret for session-token MACs. Never logged.
    pub token_secret: String,
    pub environment: String,
    pub sweep_interval: Duration,
    /// Bearer-token table for the local identity provider.
    pub identity_tokens: Vec<(String, ExternalAuthId)>,
    /// Seed a sample game, contract and funded accounts for development.
    pub seed_dev_fixtures: bool,
}

impl ServerConfig {
    pub fn new(bind: SocketAddr, token_secret: String, environment: String) -> Self {
        Self {
            bind,
            token_secret,
            environment,
            sweep_interval: SWEEP_INTERVAL,
            identity_tokens: Vec::new(),
            seed_dev_fixtures: false,
        }
    }
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let hub = Arc::new(InMemoryHub::new());
    let codec = Arc::new(SessionTokenCodec::new(config.token_secret.into_bytes()));
    let engine = Arc::new(ContractEngine::new(hub.clone(), codec));

    let registry = Arc::new(LobbyEventRegistry::new());
    let lobby = Arc::new(LobbyService::new(
        Arc::new(InMemoryLobbyStore::new()),
        hub.clone(),
        hub.clone(),
        registry,
    ));

    let identity = Arc::new(StaticIdentityProvider::new());
    for (token, subject) in &config.identity_tokens {
        identity.register(token.clone(), subject.clone());
    }
    let signatures = Arc::new(HmacSignatureVerifier::new());

    if config.seed_dev_fixtures {
        seed_dev_fixtures(&hub, &engine, &identity, &signatures)
            .await
            .context("failed to seed dev fixtures")?;
    }

    let sweeper = ExpirySweeper::new(hub.clone(), engine.clone())
        .with_interval(config.sweep_interval);
    let sweeper_handle = sweeper.spawn();

    let context = Arc::new(ServerContext {
        users: hub.clone(),
        ledger: hub.clone(),
        catalog: hub.clone(),
        engine,
        lobby,
        identity,
        signatures,
    });

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    let local_addr = listener.local_addr()?;
    info!(
        target = LOG_TARGET,
        %local_addr,
        environment = %config.environment,
        "pluto hub listening"
    );

    let result = axum::serve(listener, router(context).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited with error");

    sweeper_handle.abort();
    result
}

/// Minimal world for local development: one game backend with a known
/// secret, one contract, two funded players.
async fn seed_dev_fixtures(
    hub: &Arc<InMemoryHub>,
    engine: &Arc<ContractEngine>,
    identity: &Arc<StaticIdentityProvider>,
    signatures: &Arc<HmacSignatureVerifier>,
) -> Result<()> {
    let game_id = GameId::generate();
    let game_secret = b"dev-game-secret";
    hub.insert_game(Game {
        game_id: game_id.clone(),
        name: "sample-dice".into(),
        client_secret_digest: digest_client_secret(game_secret),
        callback_url: None,
        is_active: true,
        created_at: Utc::now(),
    })
    .await?;
    signatures.register(game_id.clone(), game_secret.to_vec());

    let contract_id = ContractId::generate();
    hub.insert_contract(Contract {
        contract_id: contract_id.clone(),
        game_id: game_id.clone(),
        name: "standard-match".into(),
        entry_fee: Amount::from(100),
        platform_fee_percent: 5,
        min_players: 2,
        max_players: 4,
        ttl_seconds: 300,
        is_active: true,
        created_at: Utc::now(),
    })
    .await?;

    for (token, name) in [("dev-alice", "alice"), ("dev-bob", "bob")] {
        let subject = ExternalAuthId::generate();
        identity.register(token, subject.clone());
        let user = engine.provision_user(&subject, name).await?;
        engine
            .deposit(&user.user_id, &Amount::from(1000), Some("dev seed"))
            .await?;
        info!(
            target = LOG_TARGET,
            bearer = token,
            user_id = %user.user_id,
            "seeded dev player"
        );
    }

    info!(
        target = LOG_TARGET,
        game_id = %game_id,
        contract_id = %contract_id,
        "seeded dev game and contract"
    );
    Ok(())
}

async fn shutdown_signal() {
    use tracing::warn;

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            target = LOG_TARGET,
            error = %err,
            "failed to install ctrl-c handler"
        );
    }
    info!(target = LOG_TARGET, "shutdown signal received");
}
