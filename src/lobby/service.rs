use std::sync::Arc;

use tracing::info;

use crate::error::HubError;
use crate::ids::{ContractId, LobbyId, SessionId, UserId};
use crate::store::{CatalogStore, UserStore};

use super::events::{LobbyEvent, LOBBY_START_COUNTDOWN_SECS};
use super::registry::LobbyEventRegistry;
use super::store::LobbyStore;
use super::types::{JoinLobbyOutput, Lobby, LobbyPlayer, LobbyStatus};
use super::validation::{ensure_contract_joinable, ensure_entry_fee_covered};

const LOG_TARGET: &str = "lobby::service";

/// Waiting-room state machine. Admission is gated on an advisory funds
/// precheck; nothing is locked here. The authoritative lock happens in
/// the contract engine at execute time.
pub struct LobbyService {
    lobbies: Arc<dyn LobbyStore>,
    catalog: Arc<dyn CatalogStore>,
    users: Arc<dyn UserStore>,
    registry: Arc<LobbyEventRegistry>,
}

impl LobbyService {
    pub fn new(
        lobbies: Arc<dyn LobbyStore>,
        catalog: Arc<dyn CatalogStore>,
        users: Arc<dyn UserStore>,
        registry: Arc<LobbyEventRegistry>,
    ) -> Self {
        Self {
            lobbies,
            catalog,
            users,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<LobbyEventRegistry> {
        &self.registry
    }

    pub async fn join(
        &self,
        user_id: &UserId,
        contract_id: &ContractId,
    ) -> Result<JoinLobbyOutput, HubError> {
        if self.lobbies.find_active_by_user(user_id).await?.is_some() {
            return Err(HubError::AlreadyInLobby);
        }

        let contract = self
            .catalog
            .find_contract(contract_id)
            .await?
            .ok_or(HubError::NotFound("contract"))?;
        ensure_contract_joinable(&contract)?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(HubError::NotFound("user"))?;
        ensure_entry_fee_covered(&user.available_balance(), &contract)?;

        let player = LobbyPlayer {
            user_id: user.user_id.clone(),
            display_name: user.display_name.clone(),
            joined_at: chrono::Utc::now(),
        };
        let lobby = self.lobbies.admit(&contract, player.clone()).await?;

        info!(
            target = LOG_TARGET,
            lobby_id = %lobby.lobby_id,
            user_id = %user.user_id,
            players = lobby.players.len(),
            "player joined lobby"
        );

        self.registry
            .broadcast(&lobby.lobby_id, LobbyEvent::PlayerJoined { player });
        if lobby.status == LobbyStatus::Starting {
            self.registry.broadcast(
                &lobby.lobby_id,
                LobbyEvent::LobbyStarting {
                    countdown: LOBBY_START_COUNTDOWN_SECS,
                },
            );
        }

        let position = lobby.position_of(user_id).unwrap_or(lobby.players.len());
        let is_ready = lobby.status == LobbyStatus::Starting;
        Ok(JoinLobbyOutput {
            lobby,
            position,
            is_ready,
        })
    }

    pub async fn leave(&self, user_id: &UserId) -> Result<Lobby, HubError> {
        let lobby = self.lobbies.remove_player(user_id).await?;

        info!(
            target = LOG_TARGET,
            lobby_id = %lobby.lobby_id,
            user_id = %user_id,
            remaining = lobby.players.len(),
            "player left lobby"
        );

        self.registry.broadcast(
            &lobby.lobby_id,
            LobbyEvent::PlayerLeft {
                player_id: user_id.clone(),
            },
        );
        if lobby.status == LobbyStatus::Closed {
            self.registry.broadcast(
                &lobby.lobby_id,
                LobbyEvent::LobbyClosed {
                    reason: "empty".into(),
                },
            );
            self.registry.close_lobby(&lobby.lobby_id);
        }
        Ok(lobby)
    }

    pub async fn list(&self, contract_id: Option<&ContractId>) -> Result<Vec<Lobby>, HubError> {
        self.lobbies.list(contract_id).await
    }

    pub async fn status(&self, lobby_id: &LobbyId) -> Result<Lobby, HubError> {
        self.lobbies
            .find(lobby_id)
            .await?
            .ok_or(HubError::NotFound("lobby"))
    }

    /// Called after a successful Execute so subscribers learn which
    /// session their lobby turned into.
    pub async fn notify_game_started(
        &self,
        contract_id: &ContractId,
        session_id: &SessionId,
    ) -> Result<(), HubError> {
        let Some(lobby) = self.lobbies.find_open_by_contract(contract_id).await? else {
            return Ok(());
        };
        let lobby = self
            .lobbies
            .set_status(&lobby.lobby_id, LobbyStatus::InGame)
            .await?;
        self.registry.broadcast(
            &lobby.lobby_id,
            LobbyEvent::GameStarted {
                session_id: session_id.clone(),
            },
        );
        Ok(())
    }
}
